use serde::{Deserialize, Serialize};
use sim_runtime::{Point, Polygon};

use super::{
    hostile_contact, PlanState, ProcessOutput, Progress, Redeploy, Relocate, Task, TaskContext,
    TaskError, TaskKind,
};
use crate::combat::COMBAT;
use crate::resources::SimTime;
use crate::unit::{Stance, Unit, UnitId};

/// Pulses an assault keeps asking for an engagement before giving up.
const ASSAULT_PATIENCE: u32 = 6;

/// Attack an objective area: move up, wait for the line of departure time,
/// advance along the axis, then fight for the objective.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Offense {
    pub objective: Polygon,
    #[serde(default)]
    pub assembly: Option<Point>,
    /// Line of departure time.
    #[serde(default)]
    pub ld: Option<SimTime>,
    /// Waypoints of the axis of approach, walked before the objective.
    #[serde(default)]
    pub axis: Vec<Point>,
    #[serde(default)]
    pub target: Option<UnitId>,
    #[serde(default)]
    pub fallback: Option<Stance>,
}

impl Offense {
    pub fn new(objective: Polygon) -> Self {
        Self {
            objective,
            assembly: None,
            ld: None,
            axis: Vec::new(),
            target: None,
            fallback: None,
        }
    }

    pub(super) fn process(&mut self, out: &mut ProcessOutput, _plan: &PlanState) -> Result<(), TaskError> {
        if let Some(assembly) = self.assembly {
            out.subtasks
                .push(Task::new(TaskKind::Relocate(Relocate::new(assembly, Stance::Transit))));
        }

        let objective = self.objective.centroid();
        let mut advance = Relocate::new(objective, Stance::Offense);
        if !self.axis.is_empty() {
            let mut path = self.axis.clone();
            path.push(objective);
            advance.route.path = Some(path);
        }
        let mut advance = Task::new(TaskKind::Relocate(advance));
        if let Some(ld) = self.ld {
            advance = advance.starting_no_earlier_than(ld);
        }
        out.subtasks.push(advance);

        out.subtasks.push(Task::new(TaskKind::Assault(Assault {
            objective: self.objective.clone(),
            target: self.target,
            engaged: false,
            waited: 0,
        })));

        let fallback = self.fallback.unwrap_or(Stance::HastyDefense);
        out.after
            .push(Task::new(TaskKind::Redeploy(Redeploy::new(fallback))));
        Ok(())
    }

    /// Combat ineffective or already falling back.
    pub(super) fn should_abort(&self, unit: &Unit, ctx: &TaskContext<'_>) -> bool {
        unit.strength() < ctx.world.balance.combat.ineffective_fraction
            || unit.stance() == Stance::Withdrawal
    }
}

/// Close with the enemy on the objective and hold until the fight ends.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Assault {
    pub objective: Polygon,
    #[serde(default)]
    pub target: Option<UnitId>,
    #[serde(default)]
    pub engaged: bool,
    #[serde(default)]
    pub waited: u32,
}

impl Assault {
    pub(super) fn process(&mut self, out: &mut ProcessOutput) -> Result<(), TaskError> {
        out.task_time = 1.0;
        out.codes = vec![COMBAT.to_string()];
        Ok(())
    }

    pub(super) fn step(&mut self, unit: &mut Unit, ctx: &mut TaskContext<'_>) -> Result<Progress, TaskError> {
        let world = ctx.world;
        if world.engagements.is_engaged(unit.id) {
            self.engaged = true;
            return Ok(Progress::Running);
        }
        if self.engaged {
            // The fight for the objective is over.
            return Ok(Progress::Complete);
        }

        let named = self
            .target
            .filter(|id| world.oob.get(*id).is_some_and(|t| !t.delete_me));
        let target = named.or_else(|| {
            unit.contacts
                .values()
                .filter(|c| c.is_active() && hostile_contact(unit, c, world.oob))
                .find(|c| c.footprint().is_some_and(|f| f.overlaps(&self.objective)))
                .map(|c| c.target)
        });
        let Some(target) = target else {
            return Ok(Progress::Complete);
        };

        ctx.effects.engagement_requests.push((unit.id, target));
        self.waited += 1;
        if self.waited >= ASSAULT_PATIENCE {
            Ok(Progress::Complete)
        } else {
            Ok(Progress::Running)
        }
    }
}
