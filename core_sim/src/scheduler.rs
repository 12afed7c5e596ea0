//! Time-ordered event queue that drives the pulse phases.

use std::collections::BTreeMap;

use bevy::ecs::schedule::ScheduleLabel;
use serde::{Deserialize, Serialize};
use sim_runtime::ReportRequest;

use crate::resources::{SimDuration, SimTime};
use crate::unit::UnitId;

/// The eight phases of a pulse, in execution order.
#[derive(
    ScheduleLabel, Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
pub enum PulsePhase {
    NewPulse,
    Engagements,
    StepAll,
    Detection,
    Regroup,
    Staffwork,
    WriteLogs,
    RemoveUnits,
}

impl PulsePhase {
    pub const ORDER: [PulsePhase; 8] = [
        PulsePhase::NewPulse,
        PulsePhase::Engagements,
        PulsePhase::StepAll,
        PulsePhase::Detection,
        PulsePhase::Regroup,
        PulsePhase::Staffwork,
        PulsePhase::WriteLogs,
        PulsePhase::RemoveUnits,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            PulsePhase::NewPulse => "new_pulse",
            PulsePhase::Engagements => "engagements",
            PulsePhase::StepAll => "step_all",
            PulsePhase::Detection => "detection",
            PulsePhase::Regroup => "regroup",
            PulsePhase::Staffwork => "staffwork",
            PulsePhase::WriteLogs => "write_logs",
            PulsePhase::RemoveUnits => "remove_units",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum EventKind {
    Phase { phase: PulsePhase },
    /// A report a unit prepares at a given time, outside its routine cycle.
    Report { unit: UnitId, kind: ReportRequest },
}

/// A non-phase event carried across save and resume.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PendingEvent {
    pub at: SimTime,
    pub event: EventKind,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ScheduledEvent {
    pub at: SimTime,
    pub seq: u64,
    pub kind: EventKind,
}

/// Events ordered by timestamp, ties broken by post order.
#[derive(Debug, Clone, Default)]
pub struct Scheduler {
    queue: BTreeMap<(SimTime, u64), EventKind>,
    next_seq: u64,
    scheduled_through: Option<SimTime>,
}

impl Scheduler {
    pub fn len(&self) -> usize {
        self.queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    pub fn post_event(&mut self, at: SimTime, kind: EventKind) {
        self.queue.insert((at, self.next_seq), kind);
        self.next_seq += 1;
    }

    /// Earliest timestamp at or after `now`.
    pub fn next_event_timestamp(&self, now: SimTime) -> Option<SimTime> {
        self.queue
            .range((now, 0)..)
            .next()
            .map(|((at, _), _)| *at)
    }

    /// Everything posted for exactly `now`, in post order.
    pub fn event_list(&self, now: SimTime) -> Vec<ScheduledEvent> {
        self.queue
            .range((now, 0)..=(now, u64::MAX))
            .map(|((at, seq), kind)| ScheduledEvent {
                at: *at,
                seq: *seq,
                kind: kind.clone(),
            })
            .collect()
    }

    /// Drop every event stamped at or before `now`.
    pub fn shred_up_to(&mut self, now: SimTime) {
        self.queue = self.queue.split_off(&(SimTime(now.0 + 1), 0));
    }

    /// Post the eight phases at every pulse boundary after `last_pulse`
    /// (or after what was already scheduled) up to `until`.
    pub fn schedule_pulses(&mut self, last_pulse: SimTime, pulse: SimDuration, until: SimTime) -> usize {
        if pulse.seconds() <= 0 {
            return 0;
        }
        let mut at = self.scheduled_through.unwrap_or(last_pulse).max(last_pulse) + pulse;
        let mut posted = 0;
        while at <= until {
            for phase in PulsePhase::ORDER {
                self.post_event(at, EventKind::Phase { phase });
            }
            self.scheduled_through = Some(at);
            posted += 1;
            at += pulse;
        }
        posted
    }

    /// Queued events other than pulse phases, in firing order.
    pub fn pending_events(&self) -> Vec<PendingEvent> {
        self.queue
            .iter()
            .filter(|(_, kind)| !matches!(kind, EventKind::Phase { .. }))
            .map(|((at, _), kind)| PendingEvent {
                at: *at,
                event: kind.clone(),
            })
            .collect()
    }

    /// Drop the scheduled pulses and forget how far they reached, e.g.
    /// after a resume. Other events stay queued.
    pub fn reset(&mut self, last_pulse: SimTime) {
        self.queue.retain(|_, kind| !matches!(kind, EventKind::Phase { .. }));
        self.scheduled_through = Some(last_pulse);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn same_timestamp_keeps_post_order() {
        let mut scheduler = Scheduler::default();
        scheduler.post_event(SimTime(600), EventKind::Phase { phase: PulsePhase::Detection });
        scheduler.post_event(SimTime(0), EventKind::Phase { phase: PulsePhase::WriteLogs });
        scheduler.post_event(SimTime(600), EventKind::Phase { phase: PulsePhase::NewPulse });
        assert_eq!(scheduler.next_event_timestamp(SimTime(1)), Some(SimTime(600)));
        let kinds: Vec<EventKind> = scheduler
            .event_list(SimTime(600))
            .into_iter()
            .map(|e| e.kind)
            .collect();
        assert_eq!(
            kinds,
            vec![
                EventKind::Phase { phase: PulsePhase::Detection },
                EventKind::Phase { phase: PulsePhase::NewPulse },
            ]
        );
        scheduler.shred_up_to(SimTime(0));
        assert_eq!(scheduler.len(), 2);
        scheduler.shred_up_to(SimTime(600));
        assert!(scheduler.is_empty());
    }

    #[test]
    fn reset_keeps_posted_reports() {
        let mut scheduler = Scheduler::default();
        let pulse = SimDuration::from_minutes(10);
        scheduler.schedule_pulses(SimTime(0), pulse, SimTime(1200));
        let report = EventKind::Report {
            unit: UnitId(4),
            kind: ReportRequest::Sitrep,
        };
        scheduler.post_event(SimTime(900), report.clone());

        assert_eq!(
            scheduler.pending_events(),
            vec![PendingEvent {
                at: SimTime(900),
                event: report.clone(),
            }]
        );
        scheduler.reset(SimTime(600));
        assert_eq!(scheduler.len(), 1);
        assert_eq!(scheduler.next_event_timestamp(SimTime(0)), Some(SimTime(900)));
        assert_eq!(scheduler.schedule_pulses(SimTime(600), pulse, SimTime(1200)), 1);
        let kinds: Vec<EventKind> = scheduler.event_list(SimTime(900)).into_iter().map(|e| e.kind).collect();
        assert_eq!(kinds, vec![report]);
    }

    #[test]
    fn pulses_are_scheduled_once() {
        let mut scheduler = Scheduler::default();
        let pulse = SimDuration::from_minutes(10);
        assert_eq!(scheduler.schedule_pulses(SimTime(0), pulse, SimTime(1800)), 3);
        assert_eq!(scheduler.len(), 24);
        assert_eq!(scheduler.schedule_pulses(SimTime(0), pulse, SimTime(1800)), 0);
        assert_eq!(scheduler.schedule_pulses(SimTime(0), pulse, SimTime(2400)), 1);
        let first = scheduler.event_list(SimTime(600));
        assert_eq!(first.len(), 8);
        assert_eq!(first[0].kind, EventKind::Phase { phase: PulsePhase::NewPulse });
        assert_eq!(first[7].kind, EventKind::Phase { phase: PulsePhase::RemoveUnits });
    }
}
