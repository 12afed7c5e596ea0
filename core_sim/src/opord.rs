//! Operation orders: the five-paragraph tree a unit executes, and the
//! text-friendly form scenarios and the driver write them in.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use sim_runtime::{parse_duration, CommandParseError, GeoTranslator, Point, Polygon};
use thiserror::Error;

use crate::agent::SupplyPolicy;
use crate::combat::FireMission;
use crate::infrastructure::{Infrastructure, LocationError};
use crate::intelligence::Contact;
use crate::oob::{Oob, OobError};
use crate::resources::{SimDuration, SimTime};
use crate::tasks::{
    first_open, IndirectFire, Offense, Redeploy, Relocate, Resupply, Sustain, Task, TaskKind,
    TaskTiming, Withdrawal,
};
use crate::unit::{Stance, UnitId};

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Situation {
    pub enemy: Vec<Contact>,
    pub notes: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Mission {
    pub statement: String,
}

/// Named control measures.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Overlay {
    pub areas: BTreeMap<String, Polygon>,
    pub points: BTreeMap<String, Point>,
}

impl Overlay {
    pub fn extend(&mut self, other: Overlay) {
        self.areas.extend(other.areas);
        self.points.extend(other.points);
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Execution {
    pub h_hour: Option<SimTime>,
    pub intent: String,
    pub maneuver_tasks: Vec<Task>,
    /// First task that is neither done nor cancelled.
    pub cursor: usize,
    pub overlay: Overlay,
    /// Essential fire support targets.
    pub efst: Vec<UnitId>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServiceSupport {
    pub css_unit: Option<UnitId>,
    pub supply_policy: Option<SupplyPolicy>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CommandSignal {
    /// Codewords in effect from the moment the order is read.
    pub codewords: Vec<String>,
    pub sitrep_hours: Option<f64>,
    pub weapons_free: Option<bool>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Opord {
    #[serde(default)]
    pub id: u64,
    #[serde(default)]
    pub issued_by: Option<UnitId>,
    pub issued: SimTime,
    #[serde(default)]
    pub received: Option<SimTime>,
    /// Merged into the current order instead of replacing it.
    #[serde(default)]
    pub frago: bool,
    #[serde(default)]
    pub situation: Situation,
    #[serde(default)]
    pub mission: Mission,
    #[serde(default)]
    pub execution: Execution,
    #[serde(default)]
    pub service_support: ServiceSupport,
    #[serde(default)]
    pub command_signal: CommandSignal,
}

impl Opord {
    pub fn new(tasks: Vec<Task>, issued: SimTime) -> Self {
        Self {
            id: 0,
            issued_by: None,
            issued,
            received: None,
            frago: false,
            situation: Situation::default(),
            mission: Mission::default(),
            execution: Execution {
                maneuver_tasks: tasks,
                ..Execution::default()
            },
            service_support: ServiceSupport::default(),
            command_signal: CommandSignal::default(),
        }
    }

    pub fn tasks(&self) -> &[Task] {
        &self.execution.maneuver_tasks
    }

    pub fn current_task(&self) -> Option<&Task> {
        self.execution.maneuver_tasks.get(self.execution.cursor)
    }

    pub fn refresh_cursor(&mut self) {
        self.execution.cursor = first_open(&self.execution.maneuver_tasks);
    }

    pub fn is_complete(&self) -> bool {
        self.execution.cursor >= self.execution.maneuver_tasks.len()
    }

    /// Merge a FRAGO. A task list in the FRAGO replaces the current one and
    /// the replaced tasks are returned; every other section present in the
    /// FRAGO overrides its counterpart.
    pub fn overlay_frago(&mut self, frago: Opord) -> Vec<Task> {
        let Opord {
            issued,
            received,
            situation,
            mission,
            execution,
            service_support,
            command_signal,
            ..
        } = frago;
        self.issued = issued;
        self.received = received.or(self.received);

        if !situation.enemy.is_empty() {
            self.situation.enemy = situation.enemy;
        }
        if !situation.notes.is_empty() {
            self.situation.notes = situation.notes;
        }
        if !mission.statement.is_empty() {
            self.mission = mission;
        }

        let own = &mut self.execution;
        if execution.h_hour.is_some() {
            own.h_hour = execution.h_hour;
        }
        if !execution.intent.is_empty() {
            own.intent = execution.intent;
        }
        own.overlay.extend(execution.overlay);
        if !execution.efst.is_empty() {
            own.efst = execution.efst;
        }
        let replaced = if execution.maneuver_tasks.is_empty() {
            Vec::new()
        } else {
            own.cursor = 0;
            std::mem::replace(&mut own.maneuver_tasks, execution.maneuver_tasks)
        };

        if service_support.css_unit.is_some() {
            self.service_support.css_unit = service_support.css_unit;
        }
        if service_support.supply_policy.is_some() {
            self.service_support.supply_policy = service_support.supply_policy;
        }
        for word in command_signal.codewords {
            if !self.command_signal.codewords.contains(&word) {
                self.command_signal.codewords.push(word);
            }
        }
        if command_signal.sitrep_hours.is_some() {
            self.command_signal.sitrep_hours = command_signal.sitrep_hours;
        }
        if command_signal.weapons_free.is_some() {
            self.command_signal.weapons_free = command_signal.weapons_free;
        }
        replaced
    }
}

#[derive(Debug, Error)]
pub enum OrderError {
    #[error(transparent)]
    Location(#[from] LocationError),
    #[error(transparent)]
    Oob(#[from] OobError),
    #[error(transparent)]
    Duration(#[from] CommandParseError),
}

/// Order as written in scenarios and by the driver. Locations are location
/// text or overlay names, units are names, times are durations after the
/// issue time (`h_hour`) or after H-hour (everything else).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OrderSpec {
    pub frago: bool,
    pub h_hour: Option<String>,
    pub enemy_notes: String,
    pub mission: String,
    pub intent: String,
    pub tasks: Vec<TaskEntry>,
    pub areas: BTreeMap<String, String>,
    pub points: BTreeMap<String, String>,
    pub efst: Vec<String>,
    pub css_unit: Option<String>,
    pub supply_policy: Option<SupplyPolicy>,
    pub codewords: Vec<String>,
    pub sitrep_hours: Option<f64>,
    pub weapons_free: Option<bool>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskEntry {
    #[serde(flatten)]
    pub task: TaskSpec,
    #[serde(default)]
    pub concurrent: bool,
    /// Begin no earlier than this long after H-hour.
    #[serde(default)]
    pub start: Option<String>,
    #[serde(default)]
    pub requires: Vec<String>,
    #[serde(default)]
    pub emits: Vec<String>,
    #[serde(default)]
    pub sitrep_on_end: bool,
}

impl From<TaskSpec> for TaskEntry {
    fn from(task: TaskSpec) -> Self {
        Self {
            task,
            concurrent: false,
            start: None,
            requires: Vec::new(),
            emits: Vec::new(),
            sitrep_on_end: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TaskSpec {
    Redeploy {
        stance: Stance,
    },
    Relocate {
        to: String,
        #[serde(default)]
        stance: Option<Stance>,
        #[serde(default)]
        mode: Option<String>,
    },
    Withdrawal {
        #[serde(default)]
        distance_km: Option<f64>,
    },
    Offense {
        objective: String,
        #[serde(default)]
        assembly: Option<String>,
        /// Line of departure, after H-hour.
        #[serde(default)]
        ld: Option<String>,
        #[serde(default)]
        axis: Vec<String>,
        #[serde(default)]
        target: Option<String>,
        #[serde(default)]
        fallback: Option<Stance>,
    },
    IndirectFire {
        zone: String,
        mission: FireMission,
        #[serde(default)]
        efst: Vec<String>,
        #[serde(default)]
        duration_hours: Option<f64>,
    },
    Resupply {
        #[serde(default)]
        dp: Option<String>,
    },
    Sustain,
}

/// What a spec is resolved against.
pub struct OrderContext<'a> {
    pub infrastructure: &'a Infrastructure,
    pub geo: &'a GeoTranslator,
    pub oob: &'a Oob,
    pub issued: SimTime,
}

struct Resolver<'a> {
    ctx: &'a OrderContext<'a>,
    overlay: Overlay,
    h_hour: SimTime,
}

impl Resolver<'_> {
    fn point(&self, text: &str) -> Result<Point, OrderError> {
        let key = text.trim();
        if let Some(p) = self.overlay.points.get(key) {
            return Ok(*p);
        }
        if let Some(area) = self.overlay.areas.get(key) {
            return Ok(area.centroid());
        }
        Ok(self.ctx.infrastructure.resolve_location(key, self.ctx.geo)?)
    }

    fn area(&self, text: &str) -> Result<Polygon, OrderError> {
        let key = text.trim();
        if let Some(area) = self.overlay.areas.get(key) {
            return Ok(area.clone());
        }
        Ok(self.ctx.infrastructure.resolve_area(key, self.ctx.geo)?)
    }

    fn unit(&self, name: &str) -> Result<UnitId, OrderError> {
        Ok(self.ctx.oob.id_by_name(name.trim())?)
    }

    fn after_h_hour(&self, text: &str) -> Result<SimTime, OrderError> {
        Ok(self.h_hour + SimDuration::from_seconds(parse_duration(text)?))
    }

    fn task(&self, entry: &TaskEntry) -> Result<Task, OrderError> {
        let kind = match &entry.task {
            TaskSpec::Redeploy { stance } => TaskKind::Redeploy(Redeploy::new(*stance)),
            TaskSpec::Relocate { to, stance, mode } => TaskKind::Relocate(
                Relocate::new(self.point(to)?, stance.unwrap_or(Stance::Deployed))
                    .with_mode(mode.clone()),
            ),
            TaskSpec::Withdrawal { distance_km } => TaskKind::Withdrawal(Withdrawal {
                distance_km: *distance_km,
                moved_km: 0.0,
            }),
            TaskSpec::Offense {
                objective,
                assembly,
                ld,
                axis,
                target,
                fallback,
            } => {
                let mut offense = Offense::new(self.area(objective)?);
                offense.assembly = assembly.as_deref().map(|a| self.point(a)).transpose()?;
                offense.ld = ld.as_deref().map(|t| self.after_h_hour(t)).transpose()?;
                offense.axis = axis
                    .iter()
                    .map(|p| self.point(p))
                    .collect::<Result<_, _>>()?;
                offense.target = target.as_deref().map(|t| self.unit(t)).transpose()?;
                offense.fallback = *fallback;
                TaskKind::Offense(offense)
            }
            TaskSpec::IndirectFire {
                zone,
                mission,
                efst,
                duration_hours,
            } => {
                let mut fire = IndirectFire::new(self.area(zone)?, *mission);
                fire.efst = efst
                    .iter()
                    .map(|name| self.unit(name))
                    .collect::<Result<_, _>>()?;
                if let Some(hours) = duration_hours {
                    fire.duration_hours = *hours;
                }
                TaskKind::IndirectFire(fire)
            }
            TaskSpec::Resupply { dp } => TaskKind::Resupply(Resupply {
                dp: dp.as_deref().map(|p| self.point(p)).transpose()?,
                ..Resupply::default()
            }),
            TaskSpec::Sustain => TaskKind::Sustain(Sustain::default()),
        };

        let h_hour_offset = entry
            .start
            .as_deref()
            .map(parse_duration)
            .transpose()?
            .map(SimDuration::from_seconds);
        let mut task = Task::new(kind).with_timing(TaskTiming {
            earliest_begin: None,
            h_hour_offset,
            codewords_required: entry.requires.clone(),
            codewords_emitted: entry.emits.clone(),
            sitrep_on_end: entry.sitrep_on_end,
        });
        task.concurrent = entry.concurrent;
        Ok(task)
    }
}

impl OrderSpec {
    pub fn with_tasks(tasks: impl IntoIterator<Item = TaskSpec>) -> Self {
        Self {
            tasks: tasks.into_iter().map(TaskEntry::from).collect(),
            ..Self::default()
        }
    }

    /// Resolve names and location text into an [`Opord`].
    pub fn resolve(&self, ctx: &OrderContext<'_>) -> Result<Opord, OrderError> {
        let h_hour = match &self.h_hour {
            Some(text) => ctx.issued + SimDuration::from_seconds(parse_duration(text)?),
            None => ctx.issued,
        };
        let mut resolver = Resolver {
            ctx,
            overlay: Overlay::default(),
            h_hour,
        };
        for (name, text) in &self.points {
            let p = resolver.point(text)?;
            resolver.overlay.points.insert(name.clone(), p);
        }
        for (name, text) in &self.areas {
            let area = resolver.area(text)?;
            resolver.overlay.areas.insert(name.clone(), area);
        }

        let tasks = self
            .tasks
            .iter()
            .map(|entry| resolver.task(entry))
            .collect::<Result<Vec<_>, _>>()?;
        let efst = self
            .efst
            .iter()
            .map(|name| resolver.unit(name))
            .collect::<Result<Vec<_>, _>>()?;
        let css_unit = self
            .css_unit
            .as_deref()
            .map(|name| resolver.unit(name))
            .transpose()?;

        let mut opord = Opord::new(tasks, ctx.issued);
        opord.frago = self.frago;
        opord.situation.notes = self.enemy_notes.clone();
        opord.mission.statement = self.mission.clone();
        opord.execution.h_hour = self.h_hour.as_ref().map(|_| h_hour);
        opord.execution.intent = self.intent.clone();
        opord.execution.overlay = resolver.overlay;
        opord.execution.efst = efst;
        opord.service_support = ServiceSupport {
            css_unit,
            supply_policy: self.supply_policy,
        };
        opord.command_signal = CommandSignal {
            codewords: self.codewords.clone(),
            sitrep_hours: self.sitrep_hours,
            weapons_free: self.weapons_free,
        };
        Ok(opord)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::unit::Unit;

    fn oob() -> Oob {
        let mut oob = Oob::default();
        oob.insert(Unit::new(UnitId(1), "1 RIFLES", "blue")).unwrap();
        oob.insert(Unit::new(UnitId(2), "2 SUPPORT", "blue")).unwrap();
        oob.insert(Unit::new(UnitId(3), "RED HQ", "red")).unwrap();
        oob
    }

    #[test]
    fn spec_resolves_names_overlay_and_times() {
        let infrastructure =
            Infrastructure::default().with_node("bridge", Point::new(4.0, 4.0));
        let geo = GeoTranslator::new();
        let oob = oob();
        let json = r#"{
            "h_hour": "1h",
            "points": { "OBJ": "2km N of node:bridge" },
            "css_unit": "2 SUPPORT",
            "tasks": [
                { "type": "relocate", "to": "OBJ", "stance": "hasty_defense", "start": "30m", "emits": ["ONE"] },
                { "type": "offense", "objective": "xy:10,10 r1km", "target": "RED HQ", "ld": "2h" }
            ]
        }"#;
        let spec: OrderSpec = serde_json::from_str(json).unwrap();
        let opord = spec
            .resolve(&OrderContext {
                infrastructure: &infrastructure,
                geo: &geo,
                oob: &oob,
                issued: SimTime(600),
            })
            .unwrap();
        assert_eq!(opord.execution.h_hour, Some(SimTime(4200)));
        assert_eq!(opord.service_support.css_unit, Some(UnitId(2)));
        let obj = opord.execution.overlay.points["OBJ"];
        assert!(obj.approx_eq(Point::new(4.0, 6.0), 1e-9));
        let first = &opord.tasks()[0];
        assert_eq!(first.timing.h_hour_offset, Some(SimDuration::from_minutes(30)));
        assert_eq!(first.timing.codewords_emitted, vec!["ONE".to_string()]);
        let TaskKind::Offense(offense) = &opord.tasks()[1].kind else {
            panic!("expected an offense");
        };
        assert_eq!(offense.target, Some(UnitId(3)));
        assert_eq!(offense.ld, Some(SimTime(4200 + 7200)));
    }

    #[test]
    fn unknown_names_fail_resolution() {
        let spec = OrderSpec {
            css_unit: Some("NOBODY".into()),
            ..OrderSpec::default()
        };
        let err = spec
            .resolve(&OrderContext {
                infrastructure: &Infrastructure::default(),
                geo: &GeoTranslator::new(),
                oob: &oob(),
                issued: SimTime(0),
            })
            .unwrap_err();
        assert!(matches!(err, OrderError::Oob(OobError::UnknownName(_))));
    }

    #[test]
    fn frago_with_tasks_replaces_and_overlays() {
        let mut opord = Opord::new(
            vec![Task::new(TaskKind::Redeploy(Redeploy::new(Stance::Transit)))],
            SimTime(0),
        );
        opord.command_signal.sitrep_hours = Some(4.0);
        opord.mission.statement = "hold".into();

        let mut keep_tasks = Opord::new(Vec::new(), SimTime(60));
        keep_tasks.frago = true;
        keep_tasks.command_signal.weapons_free = Some(true);
        assert!(opord.overlay_frago(keep_tasks).is_empty());
        assert_eq!(opord.tasks().len(), 1);
        assert_eq!(opord.command_signal.weapons_free, Some(true));
        assert_eq!(opord.command_signal.sitrep_hours, Some(4.0));

        let mut replace = Opord::new(
            vec![
                Task::new(TaskKind::Redeploy(Redeploy::new(Stance::Offense))),
                Task::new(TaskKind::Sustain(Sustain::default())),
            ],
            SimTime(120),
        );
        replace.frago = true;
        let old = opord.overlay_frago(replace);
        assert_eq!(old.len(), 1);
        assert_eq!(opord.tasks().len(), 2);
        assert_eq!(opord.mission.statement, "hold");
        assert_eq!(opord.issued, SimTime(120));
    }
}
