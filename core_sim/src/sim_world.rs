//! The world facade: boots a scenario or a save into a Bevy [`App`], drives
//! the pulse phases from the [`Scheduler`] and exposes the operations a
//! driver or a scenario `execute` block can call.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use bevy::ecs::schedule::{ExecutorKind, Schedule};
use bevy::ecs::system::SystemState;
use bevy::prelude::*;
use serde::Deserialize;
use serde_json::Value;
use sim_runtime::{parse_duration, CommandParseError, GeoTranslator, ReportRequest};
use thiserror::Error;

use crate::agent;
use crate::atmosphere::Atmosphere;
use crate::balance_config::{BalanceConfig, BalanceConfigError, BalanceConfigHandle};
use crate::combat::Engagements;
use crate::hashing::hash_serialized;
use crate::infrastructure::Infrastructure;
use crate::messages::{self, Message, Outgoing, Recipient, Report};
use crate::metrics::PulseMetrics;
use crate::oob::{Oob, OobError};
use crate::opord::{OrderContext, OrderError, OrderSpec};
use crate::pathfinding::PathCache;
use crate::persistence::{self, PersistError, WorldFile};
use crate::reports::{self, ReportError};
use crate::resources::{IdAllocator, Sides, SimClock, SimDuration, SimRng, SimTime};
use crate::scenario::{
    build_oob, load_terrain, ExecuteBlock, InitialOrder, LoadContext, LoadError, ScenarioDocument,
};
use crate::scheduler::{EventKind, PulsePhase, Scheduler};
use crate::sim_config::{SimulationConfig, SimulationConfigError, SimulationConfigHandle};
use crate::systems::{self, Kernel, MapGeo, PendingStrikes};
use crate::tasks::{TaskError, TaskId};
use crate::terrain::{MapError, TerrainMap};
use crate::unit::{Unit, UnitId};

pub const SCENARIO_FILE: &str = "scenario.json";

#[derive(Debug, Error)]
pub enum WorldError {
    #[error("scenario not found at {0:?}")]
    ScenarioNotFound(PathBuf),
    #[error("save game not found at {0:?}")]
    SaveGameNotFound(PathBuf),
    #[error("save game file missing in {0:?}")]
    SaveGameFileNotFound(PathBuf),
    #[error("unit description {0:?} not found")]
    UnitDescriptionNotFound(PathBuf),
    #[error("unknown execute method '{0}'")]
    ExecuteScenario(String),
    #[error(transparent)]
    Load(#[from] LoadError),
    #[error(transparent)]
    Order(#[from] OrderError),
    #[error(transparent)]
    Task(#[from] TaskError),
    #[error(transparent)]
    Oob(#[from] OobError),
    #[error(transparent)]
    Map(#[from] MapError),
    #[error(transparent)]
    Report(#[from] ReportError),
    #[error(transparent)]
    Duration(#[from] CommandParseError),
    #[error(transparent)]
    Persist(PersistError),
    #[error(transparent)]
    SimConfig(#[from] SimulationConfigError),
    #[error(transparent)]
    BalanceConfig(#[from] BalanceConfigError),
    #[error("state encoding failed: {0}")]
    Encoding(#[from] bincode::Error),
}

impl From<PersistError> for WorldError {
    fn from(err: PersistError) -> Self {
        match err {
            PersistError::MissingWorldFile(path) => WorldError::SaveGameFileNotFound(path),
            PersistError::MissingUnitFile(path) => WorldError::UnitDescriptionNotFound(path),
            other => WorldError::Persist(other),
        }
    }
}

impl WorldError {
    /// Process exit code for a driver that stops on this error.
    pub fn exit_code(&self) -> i32 {
        match self {
            WorldError::ScenarioNotFound(_)
            | WorldError::SaveGameNotFound(_)
            | WorldError::SaveGameFileNotFound(_)
            | WorldError::UnitDescriptionNotFound(_) => 2,
            WorldError::ExecuteScenario(_) => 3,
            _ => 1,
        }
    }
}

/// Everything a world needs besides its units.
pub struct WorldSetup {
    pub name: String,
    pub sim: Arc<SimulationConfig>,
    pub balance: Arc<BalanceConfig>,
    pub terrain: TerrainMap,
    pub geo: GeoTranslator,
    pub infrastructure: Infrastructure,
    pub atmosphere: Atmosphere,
    pub sides: Sides,
    pub seed: u64,
    pub epoch_hour: f64,
}

impl WorldSetup {
    /// A blank world on uniform terrain, mostly for tests and benches.
    pub fn new(name: impl Into<String>, terrain: TerrainMap) -> Self {
        let sim = SimulationConfig::builtin();
        let balance = BalanceConfig::builtin();
        let atmosphere = Atmosphere::new(sim.daylight_start_hour, sim.daylight_end_hour);
        Self {
            name: name.into(),
            seed: sim.seed,
            sim,
            balance,
            terrain,
            geo: GeoTranslator::default(),
            infrastructure: Infrastructure::default(),
            atmosphere,
            sides: Sides::default(),
            epoch_hour: SimClock::default().epoch_hour,
        }
    }

    pub fn with_configs(mut self, sim: Arc<SimulationConfig>, balance: Arc<BalanceConfig>) -> Self {
        self.sim = sim;
        self.balance = balance;
        self
    }
}

pub struct SimWorld {
    app: App,
    scheduler: Scheduler,
    name: String,
    seed: u64,
}

#[derive(Deserialize)]
struct HqArgs {
    unit: String,
    #[serde(default)]
    hq: Option<String>,
}

#[derive(Deserialize)]
struct OpconArgs {
    unit: String,
    #[serde(default)]
    to: Option<String>,
}

#[derive(Deserialize)]
struct CodewordArgs {
    side: String,
    word: String,
}

#[derive(Deserialize)]
struct CancelArgs {
    unit: String,
    task: u64,
}

#[derive(Deserialize)]
struct SimulateArgs {
    duration: String,
}

fn args<T: serde::de::DeserializeOwned>(value: &Value) -> Result<T, WorldError> {
    serde_json::from_value(value.clone()).map_err(|err| WorldError::Load(LoadError::from(err)))
}

impl SimWorld {
    pub fn new(setup: WorldSetup, oob: Oob) -> Self {
        let mut ids = IdAllocator::default();
        for id in oob.ids() {
            ids.observe_unit(id.0);
        }

        let mut app = App::new();
        app.add_plugins(MinimalPlugins)
            .insert_resource(SimulationConfigHandle::new(setup.sim.clone()))
            .insert_resource(BalanceConfigHandle::new(setup.balance.clone()))
            .insert_resource(SimClock::new(setup.sim.pulse(), setup.epoch_hour))
            .insert_resource(SimRng::new(setup.seed))
            .insert_resource(ids)
            .insert_resource(setup.terrain)
            .insert_resource(MapGeo(setup.geo))
            .insert_resource(setup.infrastructure)
            .insert_resource(setup.atmosphere)
            .insert_resource(setup.sides)
            .insert_resource(Engagements::default())
            .insert_resource(PathCache::default())
            .insert_resource(PendingStrikes::default())
            .insert_resource(PulseMetrics::default())
            .insert_resource(oob);

        for phase in PulsePhase::ORDER {
            let mut schedule = Schedule::new(phase);
            schedule.set_executor_kind(ExecutorKind::SingleThreaded);
            match phase {
                PulsePhase::NewPulse => schedule.add_systems(systems::new_pulse),
                PulsePhase::Engagements => schedule.add_systems(systems::engagements),
                PulsePhase::StepAll => schedule.add_systems(systems::step_all),
                PulsePhase::Detection => schedule.add_systems(systems::detection),
                PulsePhase::Regroup => schedule.add_systems(systems::regroup_all),
                PulsePhase::Staffwork => schedule.add_systems(systems::staffwork),
                PulsePhase::WriteLogs => schedule.add_systems(systems::write_logs),
                PulsePhase::RemoveUnits => schedule.add_systems(systems::remove_units),
            };
            app.add_schedule(schedule);
        }

        tracing::info!(target: "opsim::config", world = %setup.name, seed = setup.seed, "world.created");
        Self {
            app,
            scheduler: Scheduler::default(),
            name: setup.name,
            seed: setup.seed,
        }
    }

    /// `<root>/<name>/scenario.json`.
    pub fn open(
        root: &Path,
        name: &str,
        sim: Arc<SimulationConfig>,
        balance: Arc<BalanceConfig>,
    ) -> Result<Self, WorldError> {
        Self::from_scenario(&root.join(name), sim, balance)
    }

    pub fn from_scenario(
        dir: &Path,
        sim: Arc<SimulationConfig>,
        balance: Arc<BalanceConfig>,
    ) -> Result<Self, WorldError> {
        let file = dir.join(SCENARIO_FILE);
        if !file.is_file() {
            return Err(WorldError::ScenarioNotFound(dir.to_path_buf()));
        }
        let doc = ScenarioDocument::from_file(&file)?;
        Self::from_document(&doc, dir, sim, balance)
    }

    /// Build the world, issue the initial orders, then run the `execute`
    /// blocks in order.
    pub fn from_document(
        doc: &ScenarioDocument,
        base_dir: &Path,
        sim: Arc<SimulationConfig>,
        balance: Arc<BalanceConfig>,
    ) -> Result<Self, WorldError> {
        let (terrain, geo, infrastructure) = load_terrain(doc, base_dir)?;
        let mut ids = IdAllocator::default();
        let oob = build_oob(
            doc,
            &LoadContext {
                infrastructure: &infrastructure,
                geo: &geo,
            },
            &mut ids,
            sim.log_tail,
        )?;
        let atmosphere = Atmosphere::new(sim.daylight_start_hour, sim.daylight_end_hour)
            .with_weather(doc.weather.iter().cloned());
        let setup = WorldSetup {
            name: if doc.name.is_empty() {
                base_dir
                    .file_name()
                    .map(|n| n.to_string_lossy().into_owned())
                    .unwrap_or_default()
            } else {
                doc.name.clone()
            },
            seed: doc.seed.unwrap_or(sim.seed),
            epoch_hour: doc.start_hour.unwrap_or(SimClock::default().epoch_hour),
            sim,
            balance,
            terrain,
            geo,
            infrastructure,
            atmosphere,
            sides: Sides {
                colours: doc.sides.clone(),
            },
        };

        let mut world = Self::new(setup, oob);
        for InitialOrder { unit, order } in &doc.orders {
            let id = world.oob().id_by_name(unit)?;
            world.issue_order(id, order)?;
        }
        world.execute(&doc.execute)?;
        Ok(world)
    }

    /// Restore a folder written by [`SimWorld::save`].
    pub fn resume(
        dir: &Path,
        sim: Arc<SimulationConfig>,
        balance: Arc<BalanceConfig>,
    ) -> Result<Self, WorldError> {
        if !dir.is_dir() {
            return Err(WorldError::SaveGameNotFound(dir.to_path_buf()));
        }
        let mut saved = persistence::load_world(dir)?;
        for unit in saved.oob.iter_mut() {
            unit.log.set_tail_limit(sim.log_tail);
        }
        let file = saved.world;
        let setup = WorldSetup {
            name: file.name,
            sim,
            balance,
            terrain: file.terrain,
            geo: file.geo,
            infrastructure: file.infrastructure,
            atmosphere: file.atmosphere,
            sides: file.sides,
            seed: file.seed,
            epoch_hour: file.clock.epoch_hour,
        };
        let mut world = Self::new(setup, saved.oob);
        world.scheduler.reset(file.clock.last_pulse);
        for pending in file.events {
            world.scheduler.post_event(pending.at, pending.event);
        }
        let resources = &mut world.app.world;
        resources.insert_resource(file.clock);
        resources.insert_resource(file.engagements);
        resources.insert_resource(file.ids);
        resources.insert_resource(PendingStrikes(file.strikes));
        resources.insert_resource(saved.paths);
        Ok(world)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn seed(&self) -> u64 {
        self.seed
    }

    pub fn world(&self) -> &World {
        &self.app.world
    }

    pub fn world_mut(&mut self) -> &mut World {
        &mut self.app.world
    }

    pub fn oob(&self) -> &Oob {
        self.app.world.resource::<Oob>()
    }

    pub fn clock(&self) -> &SimClock {
        self.app.world.resource::<SimClock>()
    }

    pub fn now(&self) -> SimTime {
        self.clock().now
    }

    pub fn metrics(&self) -> &PulseMetrics {
        self.app.world.resource::<PulseMetrics>()
    }

    pub fn engagements(&self) -> &Engagements {
        self.app.world.resource::<Engagements>()
    }

    pub fn unit(&self, name: &str) -> Option<&Unit> {
        self.oob().find_by_name(name)
    }

    /// Advance the clock by `dt`, running every pulse boundary on the way.
    /// Returns the number of pulses executed.
    pub fn simulate(&mut self, dt: SimDuration) -> usize {
        let (start, last_pulse, pulse) = {
            let clock = self.clock();
            (clock.now, clock.last_pulse, clock.pulse)
        };
        let until = start + dt;
        self.scheduler.schedule_pulses(last_pulse, pulse, until);

        let mut pulses = 0;
        let mut cursor = start;
        while let Some(at) = self.scheduler.next_event_timestamp(cursor) {
            if at > until {
                break;
            }
            self.app.world.resource_mut::<SimClock>().now = at;
            for event in self.scheduler.event_list(at) {
                match event.kind {
                    EventKind::Phase { phase } => {
                        if phase == PulsePhase::NewPulse {
                            pulses += 1;
                        }
                        self.app.world.run_schedule(phase);
                    }
                    EventKind::Report { unit, kind } => self.request_report(unit, kind),
                }
            }
            self.scheduler.shred_up_to(at);
            cursor = at;
        }

        let mut clock = self.app.world.resource_mut::<SimClock>();
        clock.now = clock.now.max(until);
        tracing::debug!(target: "opsim::pulse", pulses, now = %clock.now, "world.simulated");
        pulses
    }

    fn request_report(&mut self, id: UnitId, kind: ReportRequest) {
        let mut oob = self.app.world.resource_mut::<Oob>();
        let Some(unit) = oob.get_mut(id) else {
            tracing::debug!(target: "opsim::staff", unit = %id, %kind, "report.no_unit");
            return;
        };
        match kind {
            ReportRequest::Sitrep => unit.staff.sitrep_requested = true,
            ReportRequest::Intsum => unit.staff.intsum_requested = true,
        }
    }

    /// Have `unit` send a report at `at` (or now, if that has passed).
    pub fn post_report(&mut self, unit: UnitId, kind: ReportRequest, at: SimTime) {
        let at = at.max(self.now());
        self.scheduler.post_event(at, EventKind::Report { unit, kind });
    }

    /// Resolve `spec` and put it in the unit's inbox. It is processed at the
    /// unit's next Staffwork phase.
    pub fn issue_order(&mut self, unit: UnitId, spec: &OrderSpec) -> Result<(), WorldError> {
        let mut state: SystemState<Kernel> = SystemState::new(&mut self.app.world);
        let mut kernel = state.get_mut(&mut self.app.world);
        if !kernel.oob.contains(unit) {
            return Err(OobError::UnknownUnit(unit).into());
        }
        let now = kernel.clock.now;
        let opord = spec.resolve(&OrderContext {
            infrastructure: &kernel.infrastructure,
            geo: &kernel.geo.0,
            oob: &kernel.oob,
            issued: now,
        })?;
        let tasks = opord.tasks().len();
        let balance = kernel.balance.get();
        let comm_range_km = kernel.sim.config().comm_range_km;
        let Kernel {
            ref mut oob,
            ref mut ids,
            ..
        } = kernel;
        messages::deliver(
            vec![Outgoing {
                sender: None,
                recipient: Recipient::Unit(unit),
                message: Message::Opord(Box::new(opord)),
            }],
            oob,
            now,
            ids,
            comm_range_km,
            &balance,
        );
        state.apply(&mut self.app.world);
        tracing::info!(target: "opsim::staff", unit = %unit, tasks, frago = spec.frago, "order.issued");
        Ok(())
    }

    /// Broadcast a codeword to every unit of `side`.
    pub fn codeword(&mut self, side: &str, word: &str) -> usize {
        let now = self.now();
        let comm_range_km = self.app.world.resource::<SimulationConfigHandle>().config().comm_range_km;
        let balance = self.app.world.resource::<BalanceConfigHandle>().get();
        let world = &mut self.app.world;
        let queued = world.resource_scope(|world, mut oob: Mut<Oob>| {
            let mut ids = world.resource_mut::<IdAllocator>();
            messages::deliver(
                vec![Outgoing {
                    sender: None,
                    recipient: Recipient::Side(side.to_string()),
                    message: Message::Codeword {
                        word: word.to_string(),
                    },
                }],
                &mut oob,
                now,
                &mut ids,
                comm_range_km,
                &balance,
            )
        });
        tracing::info!(target: "opsim::staff", side, word, queued, "codeword.issued");
        queued
    }

    pub fn cancel_task(&mut self, unit: UnitId, task: TaskId) -> Result<(), WorldError> {
        let mut state: SystemState<Kernel> = SystemState::new(&mut self.app.world);
        let mut kernel = state.get_mut(&mut self.app.world);
        let outcome = kernel
            .with_unit(unit, |u, ctx| agent::cancel_task(u, task, ctx))
            .ok_or(TaskError::UnknownUnit(unit))?;
        state.apply(&mut self.app.world);
        Ok(outcome?)
    }

    /// Build a report from the unit's current state without sending it.
    pub fn report(&self, unit: UnitId, kind: ReportRequest) -> Result<Report, WorldError> {
        let found = self.oob().get(unit).ok_or(OobError::UnknownUnit(unit))?;
        let now = self.now();
        Ok(match kind {
            ReportRequest::Sitrep => reports::sitrep(found, now),
            ReportRequest::Intsum => reports::intsum(found, now),
        })
    }

    pub fn set_hq(&mut self, unit: UnitId, hq: Option<UnitId>) -> Result<(), WorldError> {
        self.app.world.resource_mut::<Oob>().set_hq(unit, hq)?;
        Ok(())
    }

    pub fn attach_opcon(&mut self, unit: UnitId, to: Option<UnitId>) -> Result<(), WorldError> {
        self.app.world.resource_mut::<Oob>().attach_opcon(unit, to)?;
        Ok(())
    }

    fn lookup(&self, name: &str) -> Result<UnitId, WorldError> {
        Ok(self.oob().id_by_name(name)?)
    }

    fn lookup_opt(&self, name: Option<&str>) -> Result<Option<UnitId>, WorldError> {
        name.map(|n| self.lookup(n)).transpose()
    }

    /// Run scripted calls in order. Units are named, durations are text.
    pub fn execute(&mut self, blocks: &[ExecuteBlock]) -> Result<(), WorldError> {
        for block in blocks {
            tracing::debug!(target: "opsim::config", method = %block.method, "execute.block");
            match block.method.as_str() {
                "issue_order" => {
                    let InitialOrder { unit, order } = args(&block.args)?;
                    let id = self.lookup(&unit)?;
                    self.issue_order(id, &order)?;
                }
                "set_hq" => {
                    let a: HqArgs = args(&block.args)?;
                    let id = self.lookup(&a.unit)?;
                    let hq = self.lookup_opt(a.hq.as_deref())?;
                    self.set_hq(id, hq)?;
                }
                "attach_opcon" => {
                    let a: OpconArgs = args(&block.args)?;
                    let id = self.lookup(&a.unit)?;
                    let to = self.lookup_opt(a.to.as_deref())?;
                    self.attach_opcon(id, to)?;
                }
                "codeword" => {
                    let a: CodewordArgs = args(&block.args)?;
                    self.codeword(&a.side, &a.word);
                }
                "cancel_task" => {
                    let a: CancelArgs = args(&block.args)?;
                    let id = self.lookup(&a.unit)?;
                    self.cancel_task(id, TaskId(a.task))?;
                }
                "simulate" => {
                    let a: SimulateArgs = args(&block.args)?;
                    let seconds = parse_duration(&a.duration)?;
                    self.simulate(SimDuration::from_seconds(seconds));
                }
                other => return Err(WorldError::ExecuteScenario(other.to_string())),
            }
        }
        Ok(())
    }

    pub fn save(&self, dir: &Path) -> Result<PathBuf, WorldError> {
        let world = &self.app.world;
        let file = WorldFile {
            name: self.name.clone(),
            seed: self.seed,
            clock: world.resource::<SimClock>().clone(),
            sides: world.resource::<Sides>().clone(),
            atmosphere: world.resource::<Atmosphere>().clone(),
            terrain: world.resource::<TerrainMap>().clone(),
            geo: world.resource::<MapGeo>().0.clone(),
            infrastructure: world.resource::<Infrastructure>().clone(),
            engagements: world.resource::<Engagements>().clone(),
            ids: world.resource::<IdAllocator>().clone(),
            strikes: world.resource::<PendingStrikes>().0.clone(),
            events: self.scheduler.pending_events(),
            units: Vec::new(),
        };
        Ok(persistence::save_world(
            dir,
            file,
            world.resource::<Oob>(),
            world.resource::<PathCache>(),
        )?)
    }

    /// FNV-1a over the clock, the engagements and the order of battle.
    pub fn state_hash(&self) -> Result<u64, WorldError> {
        let world = &self.app.world;
        Ok(hash_serialized(&(
            world.resource::<SimClock>(),
            world.resource::<Engagements>(),
            world.resource::<Oob>(),
        ))?)
    }
}
