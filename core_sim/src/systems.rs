//! One Bevy system per pulse phase, each running over the order of battle in
//! insertion order.

use std::mem;
use std::sync::Arc;

use bevy::{ecs::system::SystemParam, prelude::*};
use sim_runtime::{GeoTranslator, SupplyClass};

use crate::agent::{self, solve_echelon_footprints};
use crate::atmosphere::Atmosphere;
use crate::balance_config::{BalanceConfig, BalanceConfigHandle, RegroupBalance};
use crate::combat::{resolve_strikes, step_engagements, Engagements, Strike};
use crate::effects::{apply_effects, EffectCounters, EffectSinks, PulseEffects};
use crate::infrastructure::Infrastructure;
use crate::intelligence::{attempt_detection, Contact, DetectionEnv, DetectionOutcome, IntelError};
use crate::metrics::{collect_metrics, PulseMetrics};
use crate::oob::Oob;
use crate::pathfinding::PathCache;
use crate::resources::{IdAllocator, SimClock, SimRng};
use crate::sim_config::{SimulationConfig, SimulationConfigHandle};
use crate::tasks::{TaskContext, WorldView};
use crate::terrain::TerrainMap;
use crate::unit::{Unit, UnitId};
use crate::unit_log::log_path;

/// Geo reference of the loaded map.
#[derive(Resource, Debug, Clone, Default)]
pub struct MapGeo(pub GeoTranslator);

/// Strikes called during StepAll, landed at the next Engagements phase.
#[derive(Resource, Debug, Clone, Default)]
pub struct PendingStrikes(pub Vec<Strike>);

/// Every world resource the phases read or write.
#[derive(SystemParam)]
pub struct Kernel<'w> {
    pub oob: ResMut<'w, Oob>,
    pub terrain: Res<'w, TerrainMap>,
    pub infrastructure: Res<'w, Infrastructure>,
    pub geo: Res<'w, MapGeo>,
    pub atmosphere: Res<'w, Atmosphere>,
    pub engagements: ResMut<'w, Engagements>,
    pub clock: ResMut<'w, SimClock>,
    pub sim: Res<'w, SimulationConfigHandle>,
    pub balance: Res<'w, BalanceConfigHandle>,
    pub paths: ResMut<'w, PathCache>,
    pub rng: ResMut<'w, SimRng>,
    pub ids: ResMut<'w, IdAllocator>,
    pub strikes: ResMut<'w, PendingStrikes>,
    pub metrics: ResMut<'w, PulseMetrics>,
}

impl Kernel<'_> {
    fn configs(&self) -> (Arc<SimulationConfig>, Arc<BalanceConfig>) {
        (self.sim.get(), self.balance.get())
    }

    /// Take `id` out of the order of battle, hand it to `visit` with a view
    /// of everything else, then put it back.
    fn visit_one<R>(
        &mut self,
        id: UnitId,
        effects: &mut PulseEffects,
        visit: impl FnOnce(&mut Unit, &mut TaskContext<'_>) -> R,
    ) -> Option<R> {
        let (sim, balance) = self.configs();
        let mut unit = self.oob.take(id)?;
        let result = if unit.delete_me {
            None
        } else {
            let world = WorldView {
                oob: &self.oob,
                terrain: &self.terrain,
                infrastructure: &self.infrastructure,
                geo: &self.geo.0,
                atmosphere: &self.atmosphere,
                engagements: &self.engagements,
                clock: &self.clock,
                sim: &sim,
                balance: &balance,
            };
            let mut ctx = TaskContext {
                world: &world,
                paths: &mut self.paths,
                rng: self.rng.rng(),
                ids: &mut self.ids,
                effects,
            };
            Some(visit(&mut unit, &mut ctx))
        };
        self.oob.restore(unit);
        result
    }

    fn visit_units(&mut self, mut visit: impl FnMut(&mut Unit, &mut TaskContext<'_>)) -> EffectCounters {
        let mut effects = PulseEffects::default();
        for id in self.oob.ids() {
            self.visit_one(id, &mut effects, &mut visit);
        }
        self.apply(effects)
    }

    /// Run `visit` against a single unit outside the pulse loop and apply
    /// its effects straight away. `None` if the unit is gone.
    pub fn with_unit<R>(
        &mut self,
        id: UnitId,
        visit: impl FnOnce(&mut Unit, &mut TaskContext<'_>) -> R,
    ) -> Option<R> {
        let mut effects = PulseEffects::default();
        let result = self.visit_one(id, &mut effects, visit);
        self.apply(effects);
        result
    }

    fn apply(&mut self, effects: PulseEffects) -> EffectCounters {
        let (sim, balance) = self.configs();
        let now = self.clock.now;
        let counters = apply_effects(
            effects,
            EffectSinks {
                oob: &mut self.oob,
                engagements: &mut self.engagements,
                strikes: &mut self.strikes.0,
                ids: &mut self.ids,
                balance: &balance,
                now,
                comm_range_km: sim.comm_range_km,
                log_tail: sim.log_tail,
            },
        );
        self.metrics.counters.absorb(counters);
        counters
    }
}

pub fn new_pulse(mut clock: ResMut<SimClock>, mut rng: ResMut<SimRng>, mut oob: ResMut<Oob>) {
    clock.pulse_count += 1;
    clock.last_pulse = clock.now;
    rng.reseed_for_pulse(clock.pulse_count);
    for unit in oob.iter_mut() {
        unit.activity.clear();
    }
    tracing::trace!(target: "opsim::pulse", pulse = clock.pulse_count, now = %clock.now, "pulse.started");
}

pub fn engagements(mut kernel: Kernel) {
    let balance = kernel.balance.get();
    let hours = kernel.clock.pulse_hours();
    let now = kernel.clock.now;
    let strikes = mem::take(&mut kernel.strikes.0);
    if !strikes.is_empty() {
        let landed = resolve_strikes(strikes, &mut kernel.oob, &balance, hours);
        tracing::debug!(target: "opsim::combat", landed, "strikes.resolved");
    }
    if kernel.engagements.is_empty() {
        return;
    }
    let Kernel {
        ref mut engagements,
        ref mut oob,
        ref terrain,
        ..
    } = kernel;
    let outcome = step_engagements(engagements, oob, terrain, &balance, hours, now);
    for id in &outcome.terminated {
        tracing::info!(target: "opsim::combat", engagement = %id, "engagement.terminated");
    }
}

pub fn step_all(mut kernel: Kernel) {
    kernel.visit_units(agent::step_unit);
    solve_echelon_footprints(&mut kernel.oob);
}

pub fn detection(mut kernel: Kernel) {
    let balance = kernel.balance.get();
    let now = kernel.clock.now;
    let Kernel {
        ref mut oob,
        ref terrain,
        ref atmosphere,
        ref clock,
        ref mut rng,
        ..
    } = kernel;
    let env = DetectionEnv {
        terrain,
        atmosphere,
        balance: &balance,
        now,
        hour_of_day: clock.hour_of_day(now),
    };
    let rng = rng.rng();

    let mut updates: Vec<(UnitId, Contact, bool)> = Vec::new();
    let mut failures: Vec<(UnitId, IntelError)> = Vec::new();
    let suppressed = balance.intel.suppressed_threshold;
    for observer in oob.iter().filter(|u| !u.delete_me && u.suppression() < suppressed) {
        for target in oob
            .iter()
            .filter(|t| !t.delete_me && !t.is_transient() && t.id != observer.id)
        {
            let key = target.contact_key();
            let known = observer.contacts.get(&key);
            let fresh = known.map_or(true, |c| !c.is_direct());
            let mut contact = known
                .cloned()
                .unwrap_or_else(|| Contact::new(target.id, key));
            let (outcome, errors) = attempt_detection(observer, target, &mut contact, &env, rng);
            failures.extend(errors.into_iter().map(|e| (observer.id, e)));
            if outcome != DetectionOutcome::OutOfReach {
                let acquired = fresh && outcome == DetectionOutcome::Detected;
                updates.push((observer.id, contact, acquired));
            }
        }
    }

    for (observer, contact, acquired) in updates {
        let Some(unit) = oob.get_mut(observer) else {
            continue;
        };
        if acquired {
            tracing::debug!(
                target: "opsim::intel",
                observer = %observer,
                contact = %contact.key,
                rating = contact.rating,
                "contact.acquired"
            );
        }
        unit.contacts.insert(contact.key.clone(), contact);
    }
    for (observer, err) in failures {
        tracing::warn!(target: "opsim::intel", observer = %observer, error = %err, "detection.field_failed");
        if let Some(unit) = oob.get_mut(observer) {
            unit.log.warn(now, "opsim::intel", err.to_string());
        }
    }
}

/// Recover from suppression and drift morale toward the command climate.
/// Suppression that wears off turns partly into fatigue; a supply deficit
/// adds fatigue, otherwise an unengaged unit rests.
pub fn regroup(unit: &mut Unit, own_c3: f64, hq_c3: f64, balance: &RegroupBalance, hours: f64) {
    let rate = (balance.recovery_per_hour * hours).clamp(0.0, 1.0);

    let recovered = unit.suppression() * rate;
    unit.adjust_suppression(-recovered);
    unit.adjust_fatigue(recovered * balance.suppression_to_fatigue);

    let target = (own_c3 + hq_c3) / 2.0;
    let morale = unit.morale();
    unit.adjust_morale((target - morale) * rate);

    let deficit = unit.supply().get(SupplyClass::Unspecified) < 0.0
        || (unit.capacity.total() > 0.0 && unit.cargo_level() <= 0.0);
    if deficit {
        unit.adjust_fatigue(balance.deficit_fatigue_per_hour * hours);
    } else if unit.ground_engagements.is_empty() {
        unit.adjust_fatigue(-balance.fatigue_recovery_per_hour * hours);
    }
}

pub fn regroup_all(mut kernel: Kernel) {
    let (sim, balance) = kernel.configs();
    let hours = kernel.clock.pulse_hours();
    let levels: Vec<(UnitId, f64, f64)> = {
        let view = kernel.oob.view();
        kernel
            .oob
            .iter()
            .filter(|u| !u.delete_me && !u.is_transient())
            .map(|u| {
                let own = view.c3_level(u.id, sim.comm_range_km, &balance);
                let hq = u
                    .commander()
                    .map(|hq| view.c3_level(hq, sim.comm_range_km, &balance))
                    .unwrap_or(own);
                (u.id, own, hq)
            })
            .collect()
    };
    for (id, own, hq) in levels {
        if let Some(unit) = kernel.oob.get_mut(id) {
            regroup(unit, own, hq, &balance.regroup, hours);
        }
    }
}

pub fn staffwork(mut kernel: Kernel) {
    kernel.visit_units(agent::staffwork);
}

pub fn write_logs(mut kernel: Kernel) {
    let sim = kernel.sim.get();
    match &sim.log_dir {
        Some(dir) => {
            for unit in kernel.oob.iter_mut() {
                if unit.log.pending_len() == 0 {
                    continue;
                }
                let path = log_path(dir, &unit.side, &unit.safe_name());
                if let Err(err) = unit.log.flush_to(&path) {
                    tracing::warn!(
                        target: "opsim::persist",
                        unit = %unit.id,
                        path = %path.display(),
                        error = %err,
                        "log.flush_failed"
                    );
                    unit.log.discard_pending();
                }
            }
        }
        None => {
            for unit in kernel.oob.iter_mut() {
                unit.log.discard_pending();
            }
        }
    }

    let Kernel {
        ref mut metrics,
        ref clock,
        ref oob,
        ref engagements,
        ref paths,
        ..
    } = kernel;
    collect_metrics(metrics, clock, oob, engagements, paths);
    tracing::info!(
        target: "opsim::pulse",
        pulse = metrics.pulse,
        now = %clock.now,
        units = metrics.units,
        engagements = metrics.active_engagements,
        contacts = metrics.direct_contacts,
        "pulse.completed"
    );
}

/// Engagements drop removed participants on their next step.
pub fn remove_units(mut oob: ResMut<Oob>) {
    let doomed: Vec<UnitId> = oob.iter().filter(|u| u.delete_me).map(|u| u.id).collect();
    for id in doomed {
        if let Some(unit) = oob.remove(id) {
            tracing::debug!(target: "opsim::pulse", unit = %id, name = %unit.name, "unit.removed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::intelligence::{Sensor, Signal};
    use crate::scheduler::PulsePhase;
    use crate::terrain::TerrainClass;
    use crate::unit::Stance;
    use bevy::ecs::system::RunSystemOnce;
    use sim_runtime::{Likelihood, Point, SupplyPackage};

    fn world_with(units: Vec<Unit>) -> World {
        let mut world = World::new();
        let mut oob = Oob::default();
        for unit in units {
            oob.insert(unit).unwrap();
        }
        world.insert_resource(oob);
        world.insert_resource(TerrainMap::uniform(50.0, 50.0, 0.5, TerrainClass::Unrestricted));
        world.insert_resource(Infrastructure::default());
        world.insert_resource(MapGeo::default());
        world.insert_resource(Atmosphere::default());
        world.insert_resource(Engagements::default());
        world.insert_resource(SimClock::default());
        world.insert_resource(SimulationConfigHandle::new(SimulationConfig::builtin()));
        world.insert_resource(BalanceConfigHandle::new(BalanceConfig::builtin()));
        world.insert_resource(PathCache::default());
        world.insert_resource(SimRng::new(7));
        world.insert_resource(IdAllocator::default());
        world.insert_resource(PendingStrikes::default());
        world.insert_resource(PulseMetrics::default());
        world
    }

    fn run_phase(world: &mut World, phase: PulsePhase) {
        match phase {
            PulsePhase::NewPulse => world.run_system_once(new_pulse),
            PulsePhase::Engagements => world.run_system_once(engagements),
            PulsePhase::StepAll => world.run_system_once(step_all),
            PulsePhase::Detection => world.run_system_once(detection),
            PulsePhase::Regroup => world.run_system_once(regroup_all),
            PulsePhase::Staffwork => world.run_system_once(staffwork),
            PulsePhase::WriteLogs => world.run_system_once(write_logs),
            PulsePhase::RemoveUnits => world.run_system_once(remove_units),
        }
    }

    fn team(id: u64, name: &str, side: &str, at: Point) -> Unit {
        Unit::new(UnitId(id), name, side)
            .with_personnel("rifleman", 4)
            .at(at, 0.1)
            .with_stance(Stance::Deployed)
    }

    #[test]
    fn new_pulse_counts_and_clears_activity() {
        let mut unit = team(1, "a", "blue", Point::new(5.0, 5.0));
        unit.activity.insert("combat".into());
        let mut world = world_with(vec![unit]);
        run_phase(&mut world, PulsePhase::NewPulse);
        assert_eq!(world.resource::<SimClock>().pulse_count, 1);
        assert!(world.resource::<Oob>().get(UnitId(1)).unwrap().activity.is_empty());
    }

    fn watchful(mut unit: Unit) -> Unit {
        unit.models.intelligence.sensors.push(Sensor {
            name: "eyes".into(),
            signal: Signal::Visual,
            max_range_km: Some(3.0),
            requires: vec!["light".into(), "LOS".into()],
            degraded_by: Vec::new(),
            enhanced_by: vec!["close".into()],
            fields: vec!["side".into()],
        });
        unit.models
            .intelligence
            .signature
            .insert(Signal::Visual, Likelihood::Certain);
        unit
    }

    #[test]
    fn close_opponents_see_each_other() {
        let mut world = world_with(vec![
            watchful(team(1, "a", "blue", Point::new(10.0, 10.0))),
            watchful(team(2, "b", "red", Point::new(10.5, 10.0))),
        ]);
        run_phase(&mut world, PulsePhase::NewPulse);
        run_phase(&mut world, PulsePhase::Detection);
        let oob = world.resource::<Oob>();
        let a = oob.get(UnitId(1)).unwrap();
        let seen = a.contacts.get("red:b").expect("contact of b");
        assert!(seen.is_direct());
        assert!(seen.rating >= 1);
        assert_eq!(seen.side(), Some("red"));
        assert!(oob.get(UnitId(2)).unwrap().contacts.get("blue:a").unwrap().is_direct());
    }

    #[test]
    fn friendly_units_are_observed_too() {
        let mut world = world_with(vec![
            watchful(team(1, "a", "blue", Point::new(10.0, 10.0))),
            watchful(team(2, "b", "blue", Point::new(10.5, 10.0))),
        ]);
        run_phase(&mut world, PulsePhase::NewPulse);
        run_phase(&mut world, PulsePhase::Detection);
        let oob = world.resource::<Oob>();
        let seen = oob.get(UnitId(1)).unwrap().contacts.get("blue:b").expect("contact of b");
        assert!(seen.is_direct());
        assert_eq!(seen.side(), Some("blue"));
    }

    #[test]
    fn suppressed_observer_sees_nothing() {
        let mut pinned = watchful(team(1, "a", "blue", Point::new(10.0, 10.0)));
        pinned.set_suppression(BalanceConfig::builtin().intel.suppressed_threshold);
        let mut world = world_with(vec![pinned, watchful(team(2, "b", "red", Point::new(10.5, 10.0)))]);
        run_phase(&mut world, PulsePhase::NewPulse);
        run_phase(&mut world, PulsePhase::Detection);
        let oob = world.resource::<Oob>();
        assert!(oob.get(UnitId(1)).unwrap().contacts.is_empty());
        assert!(oob.get(UnitId(2)).unwrap().contacts.get("blue:a").unwrap().is_direct());
    }

    #[test]
    fn idle_units_expend_supply_each_step() {
        let cap = SupplyPackage::single(SupplyClass::I, 1.0);
        let unit = team(1, "a", "blue", Point::new(5.0, 5.0)).with_supply(cap, 1.0);
        let mut world = world_with(vec![unit]);
        run_phase(&mut world, PulsePhase::NewPulse);
        run_phase(&mut world, PulsePhase::StepAll);
        let left = world.resource::<Oob>().get(UnitId(1)).unwrap().supply().get(SupplyClass::I);
        assert!(left < 1.0);
    }

    #[test]
    fn regroup_trades_suppression_for_fatigue() {
        let mut unit = team(1, "a", "blue", Point::ORIGIN);
        unit.set_suppression(0.8);
        unit.set_morale(0.2);
        regroup(&mut unit, 1.0, 0.6, &RegroupBalance::default(), 1.0);
        assert!((unit.suppression() - 0.4).abs() < 1e-9);
        assert!((unit.fatigue() - 0.04).abs() < 1e-9);
        assert!((unit.morale() - 0.5).abs() < 1e-9);
    }

    #[test]
    fn regroup_tires_units_out_of_supply() {
        let cap = SupplyPackage::single(SupplyClass::I, 1.0);
        let mut unit = team(1, "a", "blue", Point::ORIGIN).with_supply(cap, 0.0);
        regroup(&mut unit, 1.0, 1.0, &RegroupBalance::default(), 2.0);
        assert!((unit.fatigue() - 0.1).abs() < 1e-9);
    }

    #[test]
    fn marked_units_are_removed_and_metrics_follow() {
        let mut gone = team(2, "b", "blue", Point::ORIGIN);
        gone.delete_me = true;
        let mut world = world_with(vec![team(1, "a", "blue", Point::ORIGIN), gone]);
        run_phase(&mut world, PulsePhase::NewPulse);
        run_phase(&mut world, PulsePhase::WriteLogs);
        assert_eq!(world.resource::<PulseMetrics>().units, 1);
        run_phase(&mut world, PulsePhase::RemoveUnits);
        let oob = world.resource::<Oob>();
        assert_eq!(oob.ids(), vec![UnitId(1)]);
    }
}
