use rand::Rng;
use serde::{Deserialize, Serialize};
use sim_runtime::Polygon;

use super::{ProcessOutput, Progress, TaskContext, TaskError};
use crate::combat::{Combatant, FireMission, Strike, COMBAT};
use crate::resources::{Sides, SimTime};
use crate::unit::{Unit, UnitId};

fn default_duration() -> f64 {
    1.0
}

/// Fire into a call-for-fire zone for a while, one strike per pulse.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndirectFire {
    pub zone: Polygon,
    pub mission: FireMission,
    /// Essential fire support targets, engaged before anything else in the
    /// zone.
    #[serde(default)]
    pub efst: Vec<UnitId>,
    #[serde(default = "default_duration")]
    pub duration_hours: f64,
    #[serde(default)]
    pub elapsed_hours: f64,
    #[serde(default)]
    pub last_fired: Option<SimTime>,
}

impl IndirectFire {
    pub fn new(zone: Polygon, mission: FireMission) -> Self {
        Self {
            zone,
            mission,
            efst: Vec::new(),
            duration_hours: default_duration(),
            elapsed_hours: 0.0,
            last_fired: None,
        }
    }

    pub(super) fn process(&mut self, out: &mut ProcessOutput, unit: &Unit) -> Result<(), TaskError> {
        if unit.models.combat.indirect.is_none() {
            return Err(TaskError::NoIndirectFire(unit.id));
        }
        out.task_time = self.duration_hours;
        out.codes = vec![COMBAT.to_string()];
        Ok(())
    }

    pub(super) fn step(&mut self, unit: &mut Unit, ctx: &mut TaskContext<'_>) -> Result<Progress, TaskError> {
        let world = ctx.world;
        let now = ctx.now();
        let Some(capability) = unit.models.combat.indirect.clone() else {
            return Err(TaskError::NoIndirectFire(unit.id));
        };
        if self.last_fired == Some(now) {
            return Ok(Progress::Running);
        }

        let origin = unit.point();
        let candidates: Vec<UnitId> = world
            .oob
            .iter()
            .filter(|t| !t.delete_me && !t.is_transient())
            .filter(|t| Sides::hostile(&unit.side, &t.side))
            .filter(|t| t.footprint().overlaps(&self.zone))
            .filter(|t| {
                let range = origin.distance(t.point());
                range >= capability.min_range_km && range <= capability.max_range_km
            })
            .map(|t| t.id)
            .collect();

        let target = self
            .efst
            .iter()
            .copied()
            .find(|id| candidates.contains(id))
            .or_else(|| match candidates.len() {
                0 => None,
                n => Some(candidates[ctx.rng.gen_range(0..n)]),
            });

        if let Some(target) = target {
            let rcp = unit.raw_rcp(world.balance) * world.balance.combat.strike_rcp;
            ctx.effects.strikes.push(Strike {
                from: unit.id,
                target,
                mission: self.mission,
                rcp,
                ammo: capability.ammo.clone(),
                fired: now,
            });
            self.last_fired = Some(now);
            tracing::debug!(
                target: "opsim::combat",
                from = %unit.id,
                target_unit = %target,
                mission = ?self.mission,
                rcp,
                "strike.fired"
            );
        }

        self.elapsed_hours += world.pulse_hours();
        if self.elapsed_hours + 1.0e-9 >= self.duration_hours {
            Ok(Progress::Complete)
        } else {
            Ok(Progress::Running)
        }
    }
}
