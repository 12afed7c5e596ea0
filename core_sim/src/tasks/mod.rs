//! Hierarchical tasks: processed once into a sequence, then stepped every
//! pulse until they end.
//!
//! A task moves through `Planned → Ready → Running → Ending → Done`
//! (or `Cancelled`). Composite tasks step their subtasks in order behind a
//! cursor; leaf tasks delegate to their kind.

mod fires;
mod movement;
mod offense;
mod supply_chain;

use std::collections::BTreeSet;

use rand_chacha::ChaCha8Rng;
use serde::{Deserialize, Serialize};
use sim_runtime::{GeoTranslator, Point, SupplyPackage};
use thiserror::Error;

use crate::atmosphere::Atmosphere;
use crate::balance_config::BalanceConfig;
use crate::combat::Engagements;
use crate::effects::PulseEffects;
use crate::infrastructure::{Infrastructure, LocationError};
use crate::intelligence::Contact;
use crate::logistics::{Logistician, IDLE};
use crate::messages::Message;
use crate::oob::Oob;
use crate::pathfinding::PathCache;
use crate::resources::{IdAllocator, Sides, SimClock, SimDuration, SimTime};
use crate::sim_config::SimulationConfig;
use crate::terrain::TerrainMap;
use crate::unit::{Stance, Unit, UnitId};

pub use fires::IndirectFire;
use movement::nominal_speed;
pub use movement::{movement_speed, Ferry, Redeploy, Relocate, Route, Withdrawal};
pub use offense::{Assault, Offense};
pub use supply_chain::{
    Absorption, ConvoyMerge, DispatchSupply, DropOff, FieldResupply, Pickup, Resupply, Sustain,
};

pub const TRANSIT: &str = "transit";
pub const SUPPORT: &str = "support";

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct TaskId(pub u64);

impl std::fmt::Display for TaskId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Error)]
pub enum TaskError {
    #[error("{task} is missing its {parameter}")]
    MissingParameter {
        task: &'static str,
        parameter: &'static str,
    },
    #[error("unit {0} is not in the order of battle")]
    UnknownUnit(UnitId),
    #[error("task {0} not found")]
    UnknownTask(TaskId),
    #[error("no CSS unit is known to supply {0}")]
    NoSupplySource(UnitId),
    #[error("unit {0} has no indirect fire capability")]
    NoIndirectFire(UnitId),
    #[error("movement is blocked at ({x:.3}, {y:.3})")]
    Impassable { x: f64, y: f64 },
    #[error(transparent)]
    Location(#[from] LocationError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskState {
    #[default]
    Planned,
    Ready,
    Running,
    Ending,
    Done,
    Cancelled,
}

/// Begin gates and end-of-task signals.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TaskTiming {
    pub earliest_begin: Option<SimTime>,
    /// Offset from the order's H-hour.
    pub h_hour_offset: Option<SimDuration>,
    pub codewords_required: Vec<String>,
    pub codewords_emitted: Vec<String>,
    pub sitrep_on_end: bool,
}

/// Read-only world state visible while a unit is stepped. The stepped unit
/// itself is not in `oob`.
pub struct WorldView<'a> {
    pub oob: &'a Oob,
    pub terrain: &'a TerrainMap,
    pub infrastructure: &'a Infrastructure,
    pub geo: &'a GeoTranslator,
    pub atmosphere: &'a Atmosphere,
    pub engagements: &'a Engagements,
    pub clock: &'a SimClock,
    pub sim: &'a SimulationConfig,
    pub balance: &'a BalanceConfig,
}

impl WorldView<'_> {
    pub fn now(&self) -> SimTime {
        self.clock.now
    }

    pub fn pulse_hours(&self) -> f64 {
        self.clock.pulse_hours()
    }
}

pub struct TaskContext<'a> {
    pub world: &'a WorldView<'a>,
    pub paths: &'a mut PathCache,
    pub rng: &'a mut ChaCha8Rng,
    pub ids: &'a mut IdAllocator,
    pub effects: &'a mut PulseEffects,
}

impl TaskContext<'_> {
    pub fn now(&self) -> SimTime {
        self.world.now()
    }
}

/// Whether `contact` is an enemy of `unit`. Unclassified contacts fall back
/// to the target's true side.
pub fn hostile_contact(unit: &Unit, contact: &Contact, oob: &Oob) -> bool {
    let side = match contact.side() {
        Some(side) => side,
        None => match oob.get(contact.target) {
            Some(target) => target.side.as_str(),
            None => return false,
        },
    };
    Sides::hostile(&unit.side, side)
}

/// Projected stance and position threaded through `process`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PlanState {
    pub position: Point,
    pub stance: Stance,
}

impl PlanState {
    pub fn of(unit: &Unit) -> Self {
        Self {
            position: unit.point(),
            stance: unit.stance(),
        }
    }
}

/// What a kind reports back from `process`.
#[derive(Debug, Default)]
pub struct ProcessOutput {
    pub before: Vec<Task>,
    pub after: Vec<Task>,
    pub subtasks: Vec<Task>,
    pub task_time: f64,
    pub codes: Vec<String>,
    pub end_position: Option<Point>,
    pub end_stance: Option<Stance>,
}

#[derive(Debug)]
pub enum Progress {
    Running,
    Complete,
    /// Keep running with these subtasks appended.
    Spawn(Vec<Task>),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TaskKind {
    Redeploy(Redeploy),
    Relocate(Relocate),
    Ferry(Ferry),
    Withdrawal(Withdrawal),
    Offense(Offense),
    Assault(Assault),
    IndirectFire(IndirectFire),
    Pickup(Pickup),
    DropOff(DropOff),
    ConvoyMerge(ConvoyMerge),
    DispatchSupply(DispatchSupply),
    Resupply(Resupply),
    FieldResupply(FieldResupply),
    Sustain(Sustain),
}

impl TaskKind {
    pub fn name(&self) -> &'static str {
        match self {
            TaskKind::Redeploy(_) => "redeploy",
            TaskKind::Relocate(_) => "relocate",
            TaskKind::Ferry(_) => "ferry",
            TaskKind::Withdrawal(_) => "withdrawal",
            TaskKind::Offense(_) => "offense",
            TaskKind::Assault(_) => "assault",
            TaskKind::IndirectFire(_) => "indirect_fire",
            TaskKind::Pickup(_) => "pickup",
            TaskKind::DropOff(_) => "drop_off",
            TaskKind::ConvoyMerge(_) => "convoy_merge",
            TaskKind::DispatchSupply(_) => "dispatch_supply",
            TaskKind::Resupply(_) => "resupply",
            TaskKind::FieldResupply(_) => "field_resupply",
            TaskKind::Sustain(_) => "sustain",
        }
    }

    fn missing_parameter(&self) -> Option<&'static str> {
        match self {
            TaskKind::IndirectFire(fire) if fire.zone.is_empty() => Some("call-for-fire zone"),
            TaskKind::Offense(offense) if offense.objective.is_empty() => Some("objective"),
            TaskKind::Assault(assault) if assault.objective.is_empty() => Some("objective"),
            _ => None,
        }
    }

    fn process(
        &mut self,
        out: &mut ProcessOutput,
        unit: &mut Unit,
        plan: &PlanState,
        ctx: &mut TaskContext<'_>,
    ) -> Result<(), TaskError> {
        match self {
            TaskKind::Redeploy(task) => task.process(out, plan, ctx),
            TaskKind::Relocate(task) => task.process(out, unit, plan, ctx),
            TaskKind::Ferry(task) => task.process(out, unit, plan, ctx),
            TaskKind::Withdrawal(task) => task.process(out, unit, ctx),
            TaskKind::Offense(task) => task.process(out, plan),
            TaskKind::Assault(task) => task.process(out),
            TaskKind::IndirectFire(task) => task.process(out, unit),
            TaskKind::Pickup(task) => task.process(out, ctx),
            TaskKind::DropOff(task) => task.process(out),
            TaskKind::ConvoyMerge(task) => task.process(out),
            TaskKind::DispatchSupply(task) => task.process(out, unit, ctx),
            TaskKind::Resupply(task) => task.process(out, unit, ctx),
            TaskKind::FieldResupply(task) => task.process(out),
            TaskKind::Sustain(task) => task.process(out),
        }
    }

    fn step(&mut self, unit: &mut Unit, ctx: &mut TaskContext<'_>) -> Result<Progress, TaskError> {
        match self {
            TaskKind::Redeploy(task) => task.step(unit, ctx),
            TaskKind::Relocate(task) => task.step(unit, ctx),
            TaskKind::Ferry(task) => task.step(unit, ctx),
            TaskKind::Withdrawal(task) => task.step(unit, ctx),
            TaskKind::Offense(_) => Ok(Progress::Complete),
            TaskKind::Assault(task) => task.step(unit, ctx),
            TaskKind::IndirectFire(task) => task.step(unit, ctx),
            TaskKind::Pickup(task) => task.step(unit, ctx),
            TaskKind::DropOff(task) => task.step(unit, ctx),
            TaskKind::ConvoyMerge(task) => task.step(unit, ctx),
            TaskKind::DispatchSupply(task) => task.step(unit, ctx),
            TaskKind::Resupply(task) => task.step(unit, ctx),
            TaskKind::FieldResupply(task) => task.step(unit, ctx),
            TaskKind::Sustain(task) => task.step(unit, ctx),
        }
    }

    fn should_abort(&self, unit: &Unit, ctx: &TaskContext<'_>) -> bool {
        match self {
            TaskKind::Offense(task) => task.should_abort(unit, ctx),
            _ => false,
        }
    }

    fn on_end(&mut self, unit: &mut Unit) {
        match self {
            TaskKind::Relocate(_) | TaskKind::Ferry(_) | TaskKind::Withdrawal(_) => unit.halt(),
            _ => {}
        }
    }

    fn on_cancel(&mut self, unit: &mut Unit) {
        if let TaskKind::Redeploy(_) = self {
            unit.set_readiness(0.0);
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Task {
    #[serde(default)]
    pub id: TaskId,
    pub kind: TaskKind,
    #[serde(default)]
    pub state: TaskState,
    #[serde(default)]
    pub subtasks: Vec<Task>,
    #[serde(default)]
    pub cursor: usize,
    #[serde(default)]
    pub planned_begin: Option<SimTime>,
    #[serde(default)]
    pub planned_end: Option<SimTime>,
    #[serde(default)]
    pub begin: Option<SimTime>,
    #[serde(default)]
    pub end: Option<SimTime>,
    /// Hours.
    #[serde(default)]
    pub task_time: f64,
    #[serde(default)]
    pub required_supply: SupplyPackage,
    #[serde(default)]
    pub consumption_codes: Vec<String>,
    #[serde(default)]
    pub concurrent: bool,
    #[serde(default)]
    pub timing: TaskTiming,
    /// Where the unit is expected to be once the task ends.
    #[serde(default)]
    pub destination: Option<Point>,
    #[serde(default)]
    pub processed: bool,
}

impl Task {
    pub fn new(kind: TaskKind) -> Self {
        Self {
            id: TaskId::default(),
            kind,
            state: TaskState::Planned,
            subtasks: Vec::new(),
            cursor: 0,
            planned_begin: None,
            planned_end: None,
            begin: None,
            end: None,
            task_time: 0.0,
            required_supply: SupplyPackage::EMPTY,
            consumption_codes: Vec::new(),
            concurrent: false,
            timing: TaskTiming::default(),
            destination: None,
            processed: false,
        }
    }

    pub fn concurrent(mut self) -> Self {
        self.concurrent = true;
        self
    }

    pub fn with_timing(mut self, timing: TaskTiming) -> Self {
        self.timing = timing;
        self
    }

    pub fn starting_no_earlier_than(mut self, at: SimTime) -> Self {
        self.timing.earliest_begin = Some(at);
        self
    }

    pub fn name(&self) -> &'static str {
        self.kind.name()
    }

    pub fn is_finished(&self) -> bool {
        matches!(self.state, TaskState::Done | TaskState::Cancelled)
    }

    pub fn has_started(&self) -> bool {
        self.begin.is_some()
    }

    pub fn can_process(&self) -> bool {
        self.kind.missing_parameter().is_none()
    }

    /// Later of the direct earliest-begin time and H-hour plus offset.
    pub fn earliest_begin(&self, h_hour: Option<SimTime>) -> Option<SimTime> {
        let from_h_hour =
            h_hour.map(|h| h + self.timing.h_hour_offset.unwrap_or(SimDuration::ZERO));
        match (self.timing.earliest_begin, from_h_hour) {
            (Some(a), Some(b)) => Some(a.max(b)),
            (a, b) => a.or(b),
        }
    }

    pub fn can_begin(&self, now: SimTime, h_hour: Option<SimTime>, codewords: &BTreeSet<String>) -> bool {
        if self.has_started() {
            return true;
        }
        if self.earliest_begin(h_hour).is_some_and(|at| now < at) {
            return false;
        }
        self.timing
            .codewords_required
            .iter()
            .all(|word| codewords.contains(word))
    }

    /// Give every task in the tree without an id a fresh one.
    pub fn assign_ids(&mut self, ids: &mut IdAllocator) {
        if self.id == TaskId::default() {
            self.id = TaskId(ids.task());
        } else {
            ids.observe_task(self.id.0);
        }
        for sub in &mut self.subtasks {
            sub.assign_ids(ids);
        }
    }

    pub fn find(&self, id: TaskId) -> Option<&Task> {
        if self.id == id {
            return Some(self);
        }
        self.subtasks.iter().find_map(|sub| sub.find(id))
    }

    /// Expand into the sequence that replaces this task in its list.
    pub fn process(
        mut self,
        unit: &mut Unit,
        plan: &mut PlanState,
        ctx: &mut TaskContext<'_>,
    ) -> Result<Vec<Task>, TaskError> {
        if self.processed {
            if let Some(position) = self.destination {
                plan.position = position;
            }
            return Ok(vec![self]);
        }
        if let Some(parameter) = self.kind.missing_parameter() {
            return Err(TaskError::MissingParameter {
                task: self.name(),
                parameter,
            });
        }
        let mut out = ProcessOutput::default();
        self.kind.process(&mut out, unit, plan, ctx)?;

        let before = process_all(out.before, unit, plan, ctx);
        let mut subtasks = std::mem::take(&mut self.subtasks);
        subtasks.extend(out.subtasks);
        self.subtasks = process_all(subtasks, unit, plan, ctx);
        if let Some(position) = out.end_position {
            plan.position = position;
        }
        if let Some(stance) = out.end_stance {
            plan.stance = stance;
        }
        let after = process_all(out.after, unit, plan, ctx);

        if self.subtasks.is_empty() {
            self.task_time = out.task_time;
            self.consumption_codes = out.codes;
            let codes: Vec<&str> = if self.consumption_codes.is_empty() {
                vec![IDLE]
            } else {
                self.consumption_codes.iter().map(String::as_str).collect()
            };
            self.required_supply = unit.expenditure(&codes, self.task_time, ctx.world.balance);
        } else {
            self.task_time = self.subtasks.iter().map(|t| t.task_time).sum();
            self.required_supply = self
                .subtasks
                .iter()
                .fold(SupplyPackage::EMPTY, |acc, t| acc + t.required_supply);
            self.consumption_codes = out.codes;
        }
        self.destination = Some(plan.position);
        self.processed = true;
        self.state = TaskState::Ready;

        let mut sequence = before;
        sequence.push(self);
        sequence.extend(after);
        Ok(sequence)
    }

    /// Advance one pulse. Returns `true` once the task has ended.
    pub fn step(
        &mut self,
        unit: &mut Unit,
        ctx: &mut TaskContext<'_>,
        h_hour: Option<SimTime>,
    ) -> Result<bool, TaskError> {
        if self.is_finished() {
            return Ok(true);
        }
        let now = ctx.now();
        if self.begin.is_none() {
            self.begin = Some(now);
            self.state = TaskState::Running;
            unit.log.info(now, "opsim::staff", format!("task {} ({}) began", self.id, self.name()));
        }
        for code in &self.consumption_codes {
            unit.activity.insert(code.clone());
        }
        if self.kind.should_abort(unit, ctx) {
            unit.log.info(now, "opsim::staff", format!("task {} ({}) aborted", self.id, self.name()));
            self.end_task(unit, ctx);
            return Ok(true);
        }

        if !self.subtasks.is_empty() {
            while self.cursor < self.subtasks.len() && self.subtasks[self.cursor].is_finished() {
                self.cursor += 1;
            }
            if let Some(sub) = self.subtasks.get_mut(self.cursor) {
                if sub.can_begin(now, h_hour, &unit.staff.codewords) && sub.step(unit, ctx, h_hour)? {
                    self.cursor += 1;
                }
            }
            if self.cursor >= self.subtasks.len() {
                self.end_task(unit, ctx);
                return Ok(true);
            }
            return Ok(false);
        }

        match self.kind.step(unit, ctx)? {
            Progress::Running => Ok(false),
            Progress::Complete => {
                self.end_task(unit, ctx);
                Ok(true)
            }
            Progress::Spawn(tasks) => {
                let mut plan = PlanState::of(unit);
                let mut spawned = process_all(tasks, unit, &mut plan, ctx);
                for task in &mut spawned {
                    task.assign_ids(ctx.ids);
                }
                self.subtasks.extend(spawned);
                self.cursor = 0;
                Ok(false)
            }
        }
    }

    /// Record the end exactly once, emit codewords and flag a SITREP.
    pub fn end_task(&mut self, unit: &mut Unit, ctx: &mut TaskContext<'_>) {
        if self.end.is_some() {
            return;
        }
        let now = ctx.now();
        self.state = TaskState::Ending;
        self.end = Some(now);
        self.kind.on_end(unit);
        for word in &self.timing.codewords_emitted {
            ctx.effects.broadcast(
                Some(unit.id),
                &unit.side,
                Message::Codeword { word: word.clone() },
            );
        }
        if self.timing.sitrep_on_end {
            unit.staff.sitrep_requested = true;
        }
        self.state = TaskState::Done;
        unit.log.info(now, "opsim::staff", format!("task {} ({}) ended", self.id, self.name()));
        tracing::debug!(target: "opsim::staff", unit = %unit.id, task = %self.id, kind = self.name(), "task.ended");
    }

    /// End a task whose step failed.
    pub fn force_end(&mut self, unit: &mut Unit, ctx: &mut TaskContext<'_>, error: &TaskError) {
        let now = ctx.now();
        unit.log.warn(now, "opsim::staff", format!("task {} ({}) force-ended: {error}", self.id, self.name()));
        tracing::warn!(target: "opsim::staff", unit = %unit.id, task = %self.id, kind = self.name(), %error, "task.force_ended");
        for sub in &mut self.subtasks {
            if sub.has_started() && !sub.is_finished() {
                sub.end_task(unit, ctx);
            }
        }
        self.end_task(unit, ctx);
    }

    /// Cancel the task. A started task ends once and stays in its list as
    /// cancelled; returns `false` when an unstarted task should be dropped.
    pub fn cancel(&mut self, unit: &mut Unit, ctx: &mut TaskContext<'_>) -> bool {
        if self.is_finished() {
            return true;
        }
        if !self.has_started() {
            return false;
        }
        for sub in &mut self.subtasks {
            if sub.has_started() && !sub.is_finished() {
                sub.cancel(unit, ctx);
            }
        }
        self.kind.on_cancel(unit);
        self.end_task(unit, ctx);
        self.state = TaskState::Cancelled;
        true
    }
}

/// Process a list in order, threading the plan. Tasks that fail are dropped
/// and logged.
pub fn process_all(
    tasks: Vec<Task>,
    unit: &mut Unit,
    plan: &mut PlanState,
    ctx: &mut TaskContext<'_>,
) -> Vec<Task> {
    let mut out = Vec::with_capacity(tasks.len());
    for mut task in tasks {
        task.assign_ids(ctx.ids);
        let (id, name) = (task.id, task.name());
        match task.process(unit, plan, ctx) {
            Ok(sequence) => {
                for mut processed in sequence {
                    processed.assign_ids(ctx.ids);
                    out.push(processed);
                }
            }
            Err(error) => {
                unit.log.warn(ctx.now(), "opsim::staff", format!("task {id} ({name}) dropped: {error}"));
                tracing::warn!(target: "opsim::staff", unit = %unit.id, task = %id, kind = name, %error, "task.process_failed");
            }
        }
    }
    out
}

/// Index of the first task that is neither done nor cancelled.
pub fn first_open(tasks: &[Task]) -> usize {
    tasks
        .iter()
        .position(|t| !t.is_finished())
        .unwrap_or(tasks.len())
}

/// Lay planned begin and end times along the list, starting at `start`.
pub fn push_planned_begin_time(tasks: &mut [Task], start: SimTime, h_hour: Option<SimTime>) -> SimTime {
    let mut at = start;
    for task in tasks {
        if task.is_finished() {
            if let Some(end) = task.end {
                at = at.max(end);
            }
            continue;
        }
        let begin = task.begin.unwrap_or_else(|| {
            task.earliest_begin(h_hour).map_or(at, |earliest| earliest.max(at))
        });
        task.planned_begin = Some(begin);
        let end = if task.subtasks.is_empty() {
            begin + SimDuration::from_hours(task.task_time)
        } else {
            push_planned_begin_time(&mut task.subtasks, begin, h_hour)
        };
        task.planned_end = Some(end);
        at = end;
    }
    at
}

#[cfg(test)]
pub(crate) mod test_support {
    use rand::SeedableRng;

    use super::*;

    /// Owns everything a [`TaskContext`] borrows.
    pub struct Harness {
        pub oob: Oob,
        pub terrain: TerrainMap,
        pub infrastructure: Infrastructure,
        pub geo: GeoTranslator,
        pub atmosphere: Atmosphere,
        pub engagements: Engagements,
        pub clock: SimClock,
        pub sim: SimulationConfig,
        pub balance: BalanceConfig,
        pub paths: PathCache,
        pub rng: ChaCha8Rng,
        pub ids: IdAllocator,
        pub effects: PulseEffects,
    }

    impl Harness {
        pub fn new() -> Self {
            Self {
                oob: Oob::default(),
                terrain: TerrainMap::uniform(50.0, 50.0, 0.1, crate::terrain::TerrainClass::Unrestricted),
                infrastructure: Infrastructure::default(),
                geo: GeoTranslator::new(),
                atmosphere: Atmosphere::default(),
                engagements: Engagements::default(),
                clock: SimClock::default(),
                sim: SimulationConfig::default(),
                balance: (*BalanceConfig::builtin()).clone(),
                paths: PathCache::default(),
                rng: ChaCha8Rng::seed_from_u64(11),
                ids: IdAllocator::default(),
                effects: PulseEffects::default(),
            }
        }

        /// Advance the clock one pulse.
        pub fn tick(&mut self) {
            self.clock.last_pulse = self.clock.now;
            self.clock.now += self.clock.pulse;
        }

        pub fn with<R>(&mut self, f: impl FnOnce(&mut TaskContext<'_>) -> R) -> R {
            let world = WorldView {
                oob: &self.oob,
                terrain: &self.terrain,
                infrastructure: &self.infrastructure,
                geo: &self.geo,
                atmosphere: &self.atmosphere,
                engagements: &self.engagements,
                clock: &self.clock,
                sim: &self.sim,
                balance: &self.balance,
            };
            let mut ctx = TaskContext {
                world: &world,
                paths: &mut self.paths,
                rng: &mut self.rng,
                ids: &mut self.ids,
                effects: &mut self.effects,
            };
            f(&mut ctx)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::test_support::Harness;
    use super::*;

    fn team() -> Unit {
        Unit::new(UnitId(1), "team", "blue")
            .with_personnel("rifleman", 4)
            .at(Point::new(10.0, 10.0), 0.1)
            .with_stance(Stance::DeliberateDefense)
    }

    #[test]
    fn relocate_wraps_itself_in_redeploys() {
        let mut harness = Harness::new();
        let mut unit = team();
        let relocate = Task::new(TaskKind::Relocate(Relocate::new(Point::new(12.0, 10.0), Stance::HastyDefense)));
        let sequence = harness.with(|ctx| {
            let mut plan = PlanState::of(&unit);
            let out = process_all(vec![relocate], &mut unit, &mut plan, ctx);
            assert_eq!(plan.stance, Stance::HastyDefense);
            assert!(plan.position.approx_eq(Point::new(12.0, 10.0), 1e-9));
            out
        });
        let names: Vec<&str> = sequence.iter().map(Task::name).collect();
        assert_eq!(names, vec!["redeploy", "relocate", "redeploy"]);
        assert!(sequence.iter().all(|t| t.processed && t.id != TaskId::default()));
        assert!(sequence[1].task_time > 0.0);
    }

    #[test]
    fn can_begin_waits_for_h_hour_and_codewords() {
        let mut task = Task::new(TaskKind::Redeploy(Redeploy::new(Stance::Transit)));
        task.timing.h_hour_offset = Some(SimDuration::from_minutes(30));
        task.timing.codewords_required = vec!["BRAVO".into()];
        let mut words = BTreeSet::new();
        let h = Some(SimTime(0));
        assert!(!task.can_begin(SimTime(1200), h, &words));
        assert!(!task.can_begin(SimTime(1800), h, &words));
        words.insert("BRAVO".to_string());
        assert!(task.can_begin(SimTime(1800), h, &words));
    }

    #[test]
    fn planned_times_chain_through_the_list() {
        let mut a = Task::new(TaskKind::Redeploy(Redeploy::new(Stance::Transit)));
        a.task_time = 0.5;
        let mut b = a.clone();
        b.task_time = 1.0;
        let mut tasks = vec![a, b];
        let end = push_planned_begin_time(&mut tasks, SimTime(0), None);
        assert_eq!(tasks[1].planned_begin, Some(SimTime(1800)));
        assert_eq!(end, SimTime(5400));
    }

    #[test]
    fn unstarted_tasks_are_dropped_on_cancel_and_started_ones_end_once() {
        let mut harness = Harness::new();
        let mut unit = team();
        let mut task = Task::new(TaskKind::Redeploy(Redeploy::new(Stance::Transit)));
        harness.with(|ctx| {
            assert!(!task.clone().cancel(&mut unit, ctx));
            task.step(&mut unit, ctx, None).unwrap();
            assert!(task.cancel(&mut unit, ctx));
        });
        assert_eq!(task.state, TaskState::Cancelled);
        assert_eq!(task.end, Some(SimTime(0)));
        assert_eq!(unit.readiness(), 0.0);
        assert_eq!(unit.stance(), Stance::DeliberateDefense);
    }

    #[test]
    fn emitted_codewords_go_to_the_side() {
        let mut harness = Harness::new();
        let mut unit = team();
        let mut task = Task::new(TaskKind::Redeploy(Redeploy::new(Stance::DeliberateDefense)));
        task.timing.codewords_emitted = vec!["DONE".into()];
        task.timing.sitrep_on_end = true;
        harness.with(|ctx| task.end_task(&mut unit, ctx));
        assert_eq!(harness.effects.outbox.len(), 1);
        assert!(unit.staff.sitrep_requested);
    }
}
