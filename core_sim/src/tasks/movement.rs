use serde::{Deserialize, Serialize};
use sim_runtime::Point;

use super::{
    hostile_contact, PlanState, ProcessOutput, Progress, Task, TaskContext, TaskError, TaskKind,
    WorldView, TRANSIT,
};
use crate::balance_config::BalanceConfig;
use crate::pathfinding::PathRequest;
use crate::unit::{CommandAndControl, Stance, Unit};

const ARRIVAL_KM: f64 = 1.0e-9;

pub(super) fn nominal_speed(unit: &Unit, mode: &str, balance: &BalanceConfig) -> f64 {
    unit.models
        .movement
        .speed_kph
        .unwrap_or_else(|| balance.nominal_speed_kph(mode))
}

/// Current speed in km/h: nominal speed of the mode, scaled by the terrain
/// under the unit (road friction on a road corridor), the stance and C2.
pub fn movement_speed(unit: &Unit, mode: &str, world: &WorldView<'_>) -> f64 {
    let balance = world.balance;
    let at = unit.point();
    let friction_mode = if world.infrastructure.on_road(at) {
        balance.movement.road_mode.as_str()
    } else {
        mode
    };
    let friction = world.terrain.friction_at(at, &balance.friction(friction_mode));
    nominal_speed(unit, mode, balance)
        * friction
        * balance.stance(unit.stance()).speed
        * unit.c2_level(balance)
}

fn unit_mode(unit: &Unit, route_mode: &Option<String>) -> String {
    route_mode
        .clone()
        .unwrap_or_else(|| unit.models.movement.mode.clone())
}

fn transit_hours(unit: &Unit, mode: &str, from: Point, to: Point, balance: &BalanceConfig) -> f64 {
    let speed = nominal_speed(unit, mode, balance) * balance.stance(Stance::Transit).speed;
    if speed > 0.0 {
        from.distance(to) / speed
    } else {
        0.0
    }
}

/// Waypoint walker shared by the movement tasks. The path is planned on
/// the first step.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Route {
    pub destination: Point,
    #[serde(default)]
    pub mode: Option<String>,
    #[serde(default)]
    pub path: Option<Vec<Point>>,
    #[serde(default)]
    pub leg: usize,
    #[serde(default)]
    pub yielded: bool,
}

impl Route {
    pub fn new(destination: Point) -> Self {
        Self {
            destination,
            mode: None,
            path: None,
            leg: 0,
            yielded: false,
        }
    }

    /// Distance left along the planned path, or straight-line before
    /// planning.
    pub fn remaining_km(&self, from: Point) -> f64 {
        match &self.path {
            None => from.distance(self.destination),
            Some(path) => {
                let mut total = 0.0;
                let mut at = from;
                for p in path.iter().skip(self.leg) {
                    total += at.distance(*p);
                    at = *p;
                }
                total
            }
        }
    }

    /// Move one pulse along the path. Returns `true` on arrival.
    pub fn advance(
        &mut self,
        unit: &mut Unit,
        ctx: &mut TaskContext<'_>,
        allow_yield: bool,
    ) -> Result<bool, TaskError> {
        let world = ctx.world;
        let mode = unit_mode(unit, &self.mode);
        if self.path.is_none() {
            let friction = world.balance.friction(&mode);
            let path = ctx.paths.plan(PathRequest {
                terrain: world.terrain,
                geo: world.geo,
                friction: &friction,
                config: &world.sim.planner,
                precision: world.sim.coarse_mgrs_precision,
                from: unit.point(),
                to: self.destination,
            });
            self.path = Some(path);
            self.leg = 1;
        }

        let speed = movement_speed(unit, &mode, world);
        let nominal = nominal_speed(unit, &mode, world.balance);
        if allow_yield
            && !self.yielded
            && unit
                .staff
                .sop
                .should_yield(speed, nominal, world.balance.movement.slow_fraction)
        {
            self.yielded = true;
            unit.halt();
            return Ok(false);
        }
        self.yielded = false;

        let Some(path) = self.path.as_ref() else {
            return Ok(true);
        };
        if self.leg >= path.len() {
            return Ok(true);
        }
        if speed <= 0.0 {
            let at = unit.point();
            return Err(TaskError::Impassable { x: at.x, y: at.y });
        }
        let start = unit.point();
        let mut at = start;
        let mut budget = speed * world.pulse_hours();
        while self.leg < path.len() && budget > ARRIVAL_KM {
            let next = path[self.leg];
            let distance = at.distance(next);
            if distance <= budget {
                at = next;
                budget -= distance;
                self.leg += 1;
            } else {
                at = at.lerp(next, budget / distance);
                budget = 0.0;
            }
        }
        unit.set_point(at);
        let moved = start.distance(at);
        if moved > 0.0 {
            unit.set_motion(start.bearing_to(at), moved);
        }
        Ok(self.leg >= path.len())
    }
}

/// Change stance in place.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Redeploy {
    pub stance: Stance,
    /// Notional displacement left; set on the first step.
    #[serde(default)]
    pub remaining_km: Option<f64>,
}

impl Redeploy {
    pub fn new(stance: Stance) -> Self {
        Self {
            stance,
            remaining_km: None,
        }
    }

    pub(super) fn process(
        &mut self,
        out: &mut ProcessOutput,
        _plan: &PlanState,
        ctx: &mut TaskContext<'_>,
    ) -> Result<(), TaskError> {
        out.task_time = ctx.world.balance.stance(self.stance).redeploy_hours;
        out.codes = vec![TRANSIT.to_string()];
        out.end_stance = Some(self.stance);
        Ok(())
    }

    pub(super) fn step(&mut self, unit: &mut Unit, ctx: &mut TaskContext<'_>) -> Result<Progress, TaskError> {
        let world = ctx.world;
        let hours = world.pulse_hours();
        if self.remaining_km.is_none() {
            self.remaining_km = Some(unit.position().redeploy_displacement());
            unit.set_readiness(world.balance.stance(self.stance).redeploy_hours);
        }
        let mode = unit.models.movement.mode.clone();
        let friction = world.balance.friction(&mode);
        let speed = nominal_speed(unit, &mode, world.balance)
            * world.terrain.mean_friction(unit.footprint(), &friction);
        let covered = if speed > 0.0 { speed * hours } else { f64::INFINITY };
        let remaining = (self.remaining_km.unwrap_or(0.0) - covered).max(0.0);
        self.remaining_km = Some(remaining);
        unit.set_readiness(unit.readiness() - hours);

        if remaining <= ARRIVAL_KM && unit.readiness() <= 1.0e-9 {
            unit.set_readiness(0.0);
            unit.set_stance(self.stance);
            Ok(Progress::Complete)
        } else {
            Ok(Progress::Running)
        }
    }
}

/// Move to a point, redeploying into transit first and into the final
/// stance on arrival.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Relocate {
    pub route: Route,
    pub stance: Stance,
}

impl Relocate {
    pub fn new(to: Point, stance: Stance) -> Self {
        Self {
            route: Route::new(to),
            stance,
        }
    }

    pub fn with_mode(mut self, mode: Option<String>) -> Self {
        self.route.mode = mode;
        self
    }

    pub(super) fn process(
        &mut self,
        out: &mut ProcessOutput,
        unit: &mut Unit,
        plan: &PlanState,
        ctx: &mut TaskContext<'_>,
    ) -> Result<(), TaskError> {
        if plan.stance != Stance::Transit {
            out.before
                .push(Task::new(TaskKind::Redeploy(Redeploy::new(Stance::Transit))));
        }
        if self.stance != Stance::Transit {
            out.after
                .push(Task::new(TaskKind::Redeploy(Redeploy::new(self.stance))));
        }
        let mode = unit_mode(unit, &self.route.mode);
        out.task_time = transit_hours(
            unit,
            &mode,
            plan.position,
            self.route.destination,
            ctx.world.balance,
        );
        out.codes = vec![TRANSIT.to_string()];
        out.end_position = Some(self.route.destination);
        out.end_stance = Some(Stance::Transit);
        Ok(())
    }

    pub(super) fn step(&mut self, unit: &mut Unit, ctx: &mut TaskContext<'_>) -> Result<Progress, TaskError> {
        if self.route.advance(unit, ctx, true)? {
            Ok(Progress::Complete)
        } else {
            Ok(Progress::Running)
        }
    }
}

/// Drive to a point without changing stance. Used by convoys.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Ferry {
    pub route: Route,
}

impl Ferry {
    pub fn new(to: Point) -> Self {
        Self {
            route: Route::new(to),
        }
    }

    pub(super) fn process(
        &mut self,
        out: &mut ProcessOutput,
        unit: &mut Unit,
        plan: &PlanState,
        ctx: &mut TaskContext<'_>,
    ) -> Result<(), TaskError> {
        let mode = unit_mode(unit, &self.route.mode);
        out.task_time = transit_hours(
            unit,
            &mode,
            plan.position,
            self.route.destination,
            ctx.world.balance,
        );
        out.codes = vec![TRANSIT.to_string()];
        out.end_position = Some(self.route.destination);
        Ok(())
    }

    pub(super) fn step(&mut self, unit: &mut Unit, ctx: &mut TaskContext<'_>) -> Result<Progress, TaskError> {
        if self.route.advance(unit, ctx, false)? {
            Ok(Progress::Complete)
        } else {
            Ok(Progress::Running)
        }
    }
}

/// Fall back away from known enemies until no engagement holds the unit.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Withdrawal {
    /// Upper bound on the distance covered; unbounded when unset.
    #[serde(default)]
    pub distance_km: Option<f64>,
    #[serde(default)]
    pub moved_km: f64,
}

impl Withdrawal {
    pub(super) fn process(
        &mut self,
        out: &mut ProcessOutput,
        unit: &mut Unit,
        ctx: &mut TaskContext<'_>,
    ) -> Result<(), TaskError> {
        let balance = ctx.world.balance;
        let speed = nominal_speed(unit, &unit.models.movement.mode, balance)
            * balance.stance(Stance::Withdrawal).speed;
        out.task_time = match self.distance_km {
            Some(d) if speed > 0.0 => d / speed,
            _ => ctx.world.pulse_hours(),
        };
        out.codes = vec![TRANSIT.to_string()];
        out.end_stance = Some(Stance::Withdrawal);
        Ok(())
    }

    pub(super) fn step(&mut self, unit: &mut Unit, ctx: &mut TaskContext<'_>) -> Result<Progress, TaskError> {
        let world = ctx.world;
        if unit.stance() != Stance::Withdrawal {
            unit.set_stance(Stance::Withdrawal);
        }
        let engaged = world.engagements.is_engaged(unit.id);
        let me = unit.point();
        let threats: Vec<Point> = unit
            .contacts
            .values()
            .filter(|c| c.is_active() && hostile_contact(unit, c, world.oob))
            .filter_map(|c| c.location.as_ref().map(|l| l.point()))
            .collect();
        if threats.is_empty() {
            return Ok(if engaged { Progress::Running } else { Progress::Complete });
        }

        let mean = threats
            .iter()
            .fold(Point::ORIGIN, |acc, p| acc + (*p - me))
            * (1.0 / threats.len() as f64);
        let heading = me.bearing_to(me - mean);
        let left = self.distance_km.map_or(f64::INFINITY, |d| (d - self.moved_km).max(0.0));
        let mode = unit.models.movement.mode.clone();
        let step = (movement_speed(unit, &mode, world) * world.pulse_hours()).min(left);
        if step > 0.0 && mean.length() > 0.0 {
            unit.set_point(me.offset(heading, step));
            unit.set_motion(heading, step);
            self.moved_km += step;
        }
        Ok(if engaged { Progress::Running } else { Progress::Complete })
    }
}

#[cfg(test)]
mod tests {
    use super::super::test_support::Harness;
    use super::*;
    use crate::intelligence::{Contact, ContactField, ContactStatus};
    use crate::position::PositionDescriptor;
    use crate::unit::UnitId;

    fn walker(stance: Stance) -> Unit {
        let mut unit = Unit::new(UnitId(1), "walker", "blue")
            .with_personnel("rifleman", 4)
            .at(Point::new(10.0, 10.0), 0.1)
            .with_stance(stance);
        unit.models.movement.mode = "foot".into();
        unit
    }

    #[test]
    fn redeploy_completes_when_readiness_runs_out() {
        let mut harness = Harness::new();
        let mut unit = walker(Stance::Deployed);
        let mut task = Task::new(TaskKind::Redeploy(Redeploy::new(Stance::Transit)));
        let mut pulses = 0;
        loop {
            harness.tick();
            pulses += 1;
            let done = harness.with(|ctx| task.step(&mut unit, ctx, None)).unwrap();
            if done {
                break;
            }
            assert_eq!(unit.stance(), Stance::Deployed);
            assert!(pulses < 20);
        }
        assert_eq!(pulses, 6);
        assert_eq!(unit.stance(), Stance::Transit);
        assert_eq!(unit.readiness(), 0.0);
    }

    #[test]
    fn route_walks_the_path_at_movement_speed() {
        let mut harness = Harness::new();
        let mut unit = walker(Stance::Transit);
        let mut route = Route::new(Point::new(11.0, 10.0));
        harness.tick();
        let arrived = harness.with(|ctx| route.advance(&mut unit, ctx, true)).unwrap();
        assert!(!arrived);
        // 4 km/h for ten minutes, C2 0.9 in transit.
        let expected = 4.0 * 0.9 / 6.0;
        assert!((unit.point().x - (10.0 + expected)).abs() < 1e-9);
        assert!((unit.position().rate() - expected).abs() < 1e-9);
        for _ in 0..3 {
            harness.tick();
            harness.with(|ctx| route.advance(&mut unit, ctx, true)).unwrap();
        }
        assert!(unit.point().approx_eq(Point::new(11.0, 10.0), 1e-9));
    }

    #[test]
    fn slow_terrain_yields_once_under_the_readiness_policy() {
        let mut harness = Harness::new();
        harness.terrain = crate::terrain::TerrainMap::uniform(
            50.0,
            50.0,
            0.1,
            crate::terrain::TerrainClass::SeverelyRestricted,
        );
        let mut unit = walker(Stance::Transit);
        unit.models.movement.mode = "wheeled".into();
        unit.staff.sop.yield_policy = crate::agent::YieldPolicy::SlowTerrain;
        unit.staff.sop.priority = crate::agent::Priority::Readiness;
        let mut route = Route::new(Point::new(12.0, 10.0));
        harness.tick();
        harness.with(|ctx| route.advance(&mut unit, ctx, true)).unwrap();
        assert_eq!(unit.point(), Point::new(10.0, 10.0));
        harness.tick();
        harness.with(|ctx| route.advance(&mut unit, ctx, true)).unwrap();
        assert!(unit.point().x > 10.0);
    }

    #[test]
    fn withdrawal_moves_away_from_the_threat() {
        let mut harness = Harness::new();
        let mut unit = walker(Stance::Deployed);
        let mut contact = Contact::new(UnitId(9), "red:enemy");
        contact.status = ContactStatus::Direct;
        contact.location = Some(PositionDescriptor::at(Point::new(10.0, 12.0), 0.2));
        contact
            .fields
            .insert(ContactField::Side, serde_json::json!("red"));
        unit.contacts.insert(contact.key.clone(), contact);
        let mut task = Withdrawal::default();
        harness.tick();
        let progress = harness.with(|ctx| task.step(&mut unit, ctx)).unwrap();
        assert!(matches!(progress, Progress::Complete));
        assert_eq!(unit.stance(), Stance::Withdrawal);
        assert!(unit.point().y < 10.0);
        assert!((unit.point().x - 10.0).abs() < 1e-9);
    }
}
