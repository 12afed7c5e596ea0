use std::{
    env, fs, io,
    path::{Path, PathBuf},
    sync::Arc,
    time::Duration,
};

use bevy::prelude::Resource;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::resources::SimDuration;

pub const BUILTIN_SIM_CONFIG: &str = include_str!("data/sim_config.json");

/// Kernel-level knobs that are not balancing data.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SimulationConfig {
    pub pulse_minutes: u32,
    pub seed: u64,
    pub planner: PlannerConfig,
    /// Distance to HQ beyond which C3 degrades.
    pub comm_range_km: f64,
    pub contact_timeout_minutes: u32,
    pub log_dir: Option<PathBuf>,
    pub log_tail: usize,
    pub daylight_start_hour: f64,
    pub daylight_end_hour: f64,
    /// When false every message is delivered regardless of C3 level.
    pub message_suppression: bool,
    /// Digits per axis of the MGRS key used by the path cache.
    pub coarse_mgrs_precision: usize,
}

impl SimulationConfig {
    pub fn builtin() -> Arc<Self> {
        Arc::new(
            serde_json::from_str(BUILTIN_SIM_CONFIG)
                .expect("builtin simulation config should parse"),
        )
    }

    pub fn from_json_str(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }

    pub fn from_file(path: &Path) -> Result<Self, SimulationConfigError> {
        let contents =
            fs::read_to_string(path).map_err(|source| SimulationConfigError::ReadFailed {
                path: path.to_path_buf(),
                source,
            })?;
        let config = SimulationConfig::from_json_str(&contents)?;
        Ok(config)
    }

    pub fn pulse(&self) -> SimDuration {
        SimDuration::from_minutes(self.pulse_minutes.max(1) as i64)
    }

    pub fn contact_timeout(&self) -> SimDuration {
        SimDuration::from_minutes(self.contact_timeout_minutes as i64)
    }
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self {
            pulse_minutes: 10,
            seed: 0x5eed,
            planner: PlannerConfig::default(),
            comm_range_km: 30.0,
            contact_timeout_minutes: 60,
            log_dir: None,
            log_tail: 64,
            daylight_start_hour: 6.0,
            daylight_end_hour: 18.0,
            message_suppression: true,
            coarse_mgrs_precision: 2,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PlannerConfig {
    pub sample_km: f64,
    pub cutoff_km: f64,
    pub corridor_factor: f64,
    pub corridor_candidates: usize,
    pub max_depth: u32,
    pub optimise_tolerance: f64,
    pub wall_budget_secs: f64,
    pub cache_capacity: usize,
    pub hit_decay: f64,
    pub retained_fraction: f64,
}

impl PlannerConfig {
    pub fn wall_budget(&self) -> Duration {
        Duration::from_secs_f64(self.wall_budget_secs.max(0.0))
    }
}

impl Default for PlannerConfig {
    fn default() -> Self {
        Self {
            sample_km: 0.2,
            cutoff_km: 0.2,
            corridor_factor: 2.0,
            corridor_candidates: 12,
            max_depth: 5,
            optimise_tolerance: 0.01,
            wall_budget_secs: 60.0,
            cache_capacity: 1000,
            hit_decay: 0.8,
            retained_fraction: 0.8,
        }
    }
}

#[derive(Debug, Error)]
pub enum SimulationConfigError {
    #[error("failed to parse simulation config: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("failed to read simulation config from {path:?}: {source}")]
    ReadFailed {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

#[derive(Resource, Debug, Clone)]
pub struct SimulationConfigHandle(pub Arc<SimulationConfig>);

impl SimulationConfigHandle {
    pub fn new(config: Arc<SimulationConfig>) -> Self {
        Self(config)
    }

    pub fn get(&self) -> Arc<SimulationConfig> {
        Arc::clone(&self.0)
    }

    pub fn config(&self) -> &SimulationConfig {
        &self.0
    }

    pub fn replace(&mut self, config: Arc<SimulationConfig>) {
        self.0 = config;
    }
}

#[derive(Resource, Debug, Clone)]
pub struct SimulationConfigMetadata {
    path: Option<PathBuf>,
}

impl SimulationConfigMetadata {
    pub fn new(path: Option<PathBuf>) -> Self {
        Self { path }
    }

    pub fn path(&self) -> Option<&PathBuf> {
        self.path.as_ref()
    }
}

pub fn load_simulation_config_from_env() -> (Arc<SimulationConfig>, SimulationConfigMetadata) {
    let Some(path) = env::var("SIM_CONFIG_PATH").ok().map(PathBuf::from) else {
        tracing::info!(target: "opsim::config", "sim_config.loaded=builtin");
        return (SimulationConfig::builtin(), SimulationConfigMetadata::new(None));
    };

    match SimulationConfig::from_file(&path) {
        Ok(config) => {
            tracing::info!(
                target: "opsim::config",
                path = %path.display(),
                "sim_config.loaded=file"
            );
            (Arc::new(config), SimulationConfigMetadata::new(Some(path)))
        }
        Err(err) => {
            tracing::warn!(
                target: "opsim::config",
                path = %path.display(),
                error = %err,
                "sim_config.load_failed"
            );
            (SimulationConfig::builtin(), SimulationConfigMetadata::new(None))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builtin_parses_with_ten_minute_pulse() {
        let config = SimulationConfig::builtin();
        assert_eq!(config.pulse(), SimDuration::from_minutes(10));
        assert_eq!(config.planner.cache_capacity, 1000);
        assert!((config.planner.hit_decay - 0.8).abs() < 1e-12);
    }

    #[test]
    fn partial_documents_fall_back_to_defaults() {
        let config = SimulationConfig::from_json_str(r#"{ "seed": 9, "planner": { "sample_km": 0.5 } }"#)
            .unwrap();
        assert_eq!(config.seed, 9);
        assert_eq!(config.pulse_minutes, 10);
        assert!((config.planner.sample_km - 0.5).abs() < 1e-12);
        assert!((config.planner.cutoff_km - 0.2).abs() < 1e-12);
    }

    #[test]
    fn missing_file_reports_path() {
        let err = SimulationConfig::from_file(Path::new("/nonexistent/sim.json")).unwrap_err();
        assert!(matches!(err, SimulationConfigError::ReadFailed { .. }));
    }
}
