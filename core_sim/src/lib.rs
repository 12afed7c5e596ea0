//! Pulse kernel of the operational simulator.
//!
//! A [`SimWorld`] owns a Bevy [`App`](bevy::app::App) whose resources hold
//! the order of battle, terrain and clock. Calling [`SimWorld::simulate`]
//! runs the eight pulse phases at every pulse boundary in the requested
//! interval, visiting units in insertion order so that a seed and an order of
//! battle always replay the same way.

pub mod agent;
pub mod atmosphere;
pub mod balance_config;
pub mod combat;
pub mod effects;
pub mod hashing;
pub mod infrastructure;
pub mod intelligence;
pub mod logistics;
pub mod messages;
pub mod metrics;
pub mod oob;
pub mod opord;
pub mod pathfinding;
pub mod persistence;
pub mod position;
pub mod reports;
pub mod resources;
pub mod scenario;
pub mod scheduler;
pub mod sim_config;
pub mod sim_world;
pub mod systems;
pub mod tasks;
pub mod terrain;
pub mod unit;
pub mod unit_log;

pub use balance_config::{load_balance_config_from_env, BalanceConfig, BalanceConfigHandle};
pub use metrics::PulseMetrics;
pub use oob::{Oob, OobError};
pub use opord::{OrderSpec, TaskSpec};
pub use resources::{SimClock, SimDuration, SimTime};
pub use scenario::{LoadError, ScenarioDocument};
pub use scheduler::PulsePhase;
pub use sim_config::{load_simulation_config_from_env, SimulationConfig, SimulationConfigHandle};
pub use sim_world::{SimWorld, WorldError, WorldSetup};
pub use tasks::TaskId;
pub use unit::{Stance, Unit, UnitId, UnitKind};
