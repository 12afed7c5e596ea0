use std::{
    collections::BTreeMap,
    env, fs, io,
    path::{Path, PathBuf},
    sync::Arc,
};

use bevy::prelude::Resource;
use serde::{Deserialize, Serialize};
use sim_runtime::{Likelihood, SupplyPackage};
use thiserror::Error;

use crate::terrain::{FrictionVector, TerrainClass};
use crate::unit::Stance;

pub const BUILTIN_BALANCE_CONFIG: &str = include_str!("data/balance_config.json");

/// Named balancing tables: friction, stance modifiers, kit templates and the
/// combat, regroup and logistics constants.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct BalanceConfig {
    pub movement: MovementBalance,
    pub stances: BTreeMap<Stance, StanceProfile>,
    pub kits: BTreeMap<String, KitTemplate>,
    pub toem: BTreeMap<Likelihood, f64>,
    pub combat: CombatBalance,
    pub regroup: RegroupBalance,
    pub intel: IntelBalance,
    pub css: CssBalance,
    pub c3: C3Balance,
    pub morale: MoraleBalance,
}

impl BalanceConfig {
    pub fn builtin() -> Arc<Self> {
        Arc::new(
            serde_json::from_str(BUILTIN_BALANCE_CONFIG)
                .expect("builtin balance config should parse"),
        )
    }

    pub fn from_json_str(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }

    pub fn from_file(path: &Path) -> Result<Self, BalanceConfigError> {
        let contents =
            fs::read_to_string(path).map_err(|source| BalanceConfigError::ReadFailed {
                path: path.to_path_buf(),
                source,
            })?;
        let config = BalanceConfig::from_json_str(&contents)?;
        Ok(config)
    }

    /// Friction for `mode`, inheriting unset classes from the base mode `""`.
    pub fn friction(&self, mode: &str) -> FrictionVector {
        let mut vector = FrictionVector::UNIFORM;
        let layers = [self.movement.friction.get(""), self.movement.friction.get(mode)];
        for layer in layers.into_iter().flatten() {
            for (class, value) in layer {
                if *class != TerrainClass::OffMap {
                    vector.0[class.index()] = value.clamp(0.0, 1.0);
                }
            }
        }
        vector
    }

    pub fn nominal_speed_kph(&self, mode: &str) -> f64 {
        self.movement
            .nominal_speed_kph
            .get(mode)
            .copied()
            .unwrap_or(self.movement.default_speed_kph)
    }

    pub fn stance(&self, stance: Stance) -> StanceProfile {
        self.stances.get(&stance).cloned().unwrap_or_default()
    }

    pub fn kit(&self, template: &str) -> Option<&KitTemplate> {
        self.kits.get(template)
    }

    pub fn probability(&self, level: Likelihood) -> f64 {
        self.toem
            .get(&level)
            .copied()
            .unwrap_or_else(|| level.probability())
    }

    /// Scenario documents may add kit templates on top of the tables.
    pub fn with_extra_kits(&self, kits: &BTreeMap<String, KitTemplate>) -> Self {
        let mut merged = self.clone();
        for (name, kit) in kits {
            merged.kits.insert(name.clone(), kit.clone());
        }
        merged
    }
}

#[derive(Debug, Error)]
pub enum BalanceConfigError {
    #[error("failed to parse balance config: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("failed to read balance config from {path:?}: {source}")]
    ReadFailed {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MovementBalance {
    pub nominal_speed_kph: BTreeMap<String, f64>,
    pub default_speed_kph: f64,
    pub friction: BTreeMap<String, BTreeMap<TerrainClass, f64>>,
    /// Friction mode used on road links.
    pub road_mode: String,
    /// Relocate may yield below this share of nominal speed.
    pub slow_fraction: f64,
}

impl Default for MovementBalance {
    fn default() -> Self {
        Self {
            nominal_speed_kph: BTreeMap::new(),
            default_speed_kph: 4.0,
            friction: BTreeMap::new(),
            road_mode: "road".to_string(),
            slow_fraction: 1.0 / 3.0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StanceProfile {
    pub speed: f64,
    pub c2: f64,
    pub c3: f64,
    pub rcp: f64,
    /// Hours needed to assume this stance.
    pub redeploy_hours: f64,
    /// Signature adjustment in TOEM points.
    pub signature_shift: i32,
}

impl Default for StanceProfile {
    fn default() -> Self {
        Self {
            speed: 1.0,
            c2: 1.0,
            c3: 1.0,
            rcp: 1.0,
            redeploy_hours: 1.0,
            signature_shift: 0,
        }
    }
}

/// Per-item data for a personnel or vehicle kit.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct KitTemplate {
    pub rcp: f64,
    /// Short tons per item per hour, by activity code.
    pub consumption: BTreeMap<String, SupplyPackage>,
    /// Short tons of freight one item can carry.
    pub freight_lift: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CombatBalance {
    pub attrition_rate: f64,
    pub suppression_weight: f64,
    pub casualty_weight: f64,
    pub destruction_weight: f64,
    /// Raw RCP share below which a unit can no longer engage.
    pub ineffective_fraction: f64,
    pub sa_weight: f64,
    pub morale_scale: f64,
    pub terrain_defense: BTreeMap<TerrainClass, f64>,
    pub suppression_penalty: f64,
    pub strike_rcp: f64,
}

impl Default for CombatBalance {
    fn default() -> Self {
        Self {
            attrition_rate: 0.05,
            suppression_weight: 1.0,
            casualty_weight: 0.333,
            destruction_weight: 0.167,
            ineffective_fraction: 0.3,
            sa_weight: 0.5,
            morale_scale: 0.5,
            terrain_defense: BTreeMap::new(),
            suppression_penalty: 0.5,
            strike_rcp: 1.0,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RegroupBalance {
    pub suppression_to_fatigue: f64,
    pub recovery_per_hour: f64,
    pub deficit_fatigue_per_hour: f64,
    pub fatigue_recovery_per_hour: f64,
}

impl Default for RegroupBalance {
    fn default() -> Self {
        Self {
            suppression_to_fatigue: 0.1,
            recovery_per_hour: 0.5,
            deficit_fatigue_per_hour: 0.05,
            fatigue_recovery_per_hour: 0.01,
        }
    }
}

/// Morale levels below which a unit counts as shaken or broken.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MoraleBalance {
    pub shaken: f64,
    pub broken: f64,
}

impl Default for MoraleBalance {
    fn default() -> Self {
        Self {
            shaken: 0.6,
            broken: 0.3,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct IntelBalance {
    pub suppressed_threshold: f64,
    pub close_range_km: f64,
    pub los_block_fraction: f64,
    pub los_sample_km: f64,
    /// Contact rating at which situational awareness saturates.
    pub sa_rating_scale: f64,
}

impl Default for IntelBalance {
    fn default() -> Self {
        Self {
            suppressed_threshold: 0.8,
            close_range_km: 1.0,
            los_block_fraction: 0.5,
            los_sample_km: 0.2,
            sa_rating_scale: 10.0,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CssBalance {
    pub burden_split_threshold: f64,
    pub convoy_kit: String,
    pub convoy_mode: String,
    pub load_hours: f64,
    pub max_dispatch_per_pulse: usize,
    /// Store kept back at the CSS unit when validating a request.
    pub dispatch_overhead: SupplyPackage,
    pub logpac_radius_km: f64,
    /// Trucks in one convoy; with the kit lift this bounds a single load.
    pub convoy_size: u32,
}

impl Default for CssBalance {
    fn default() -> Self {
        Self {
            burden_split_threshold: 0.5,
            convoy_kit: "cargo_truck".to_string(),
            convoy_mode: "wheeled".to_string(),
            load_hours: 0.5,
            max_dispatch_per_pulse: 2,
            dispatch_overhead: SupplyPackage::EMPTY,
            logpac_radius_km: 0.1,
            convoy_size: 10,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct C3Balance {
    pub out_of_range_factor: f64,
    pub morale_weight: f64,
    pub fatigue_weight: f64,
    pub suppression_weight: f64,
}

impl Default for C3Balance {
    fn default() -> Self {
        Self {
            out_of_range_factor: 0.5,
            morale_weight: 0.5,
            fatigue_weight: 0.5,
            suppression_weight: 0.8,
        }
    }
}

#[derive(Resource, Debug, Clone)]
pub struct BalanceConfigHandle(pub Arc<BalanceConfig>);

impl BalanceConfigHandle {
    pub fn new(config: Arc<BalanceConfig>) -> Self {
        Self(config)
    }

    pub fn get(&self) -> Arc<BalanceConfig> {
        Arc::clone(&self.0)
    }

    pub fn config(&self) -> &BalanceConfig {
        &self.0
    }

    pub fn replace(&mut self, config: Arc<BalanceConfig>) {
        self.0 = config;
    }
}

#[derive(Resource, Debug, Clone)]
pub struct BalanceConfigMetadata {
    path: Option<PathBuf>,
}

impl BalanceConfigMetadata {
    pub fn new(path: Option<PathBuf>) -> Self {
        Self { path }
    }

    pub fn path(&self) -> Option<&PathBuf> {
        self.path.as_ref()
    }
}

pub fn load_balance_config_from_env() -> (Arc<BalanceConfig>, BalanceConfigMetadata) {
    let Some(path) = env::var("BALANCE_CONFIG_PATH").ok().map(PathBuf::from) else {
        tracing::info!(target: "opsim::config", "balance_config.loaded=builtin");
        return (BalanceConfig::builtin(), BalanceConfigMetadata::new(None));
    };

    match BalanceConfig::from_file(&path) {
        Ok(config) => {
            tracing::info!(
                target: "opsim::config",
                path = %path.display(),
                "balance_config.loaded=file"
            );
            (Arc::new(config), BalanceConfigMetadata::new(Some(path)))
        }
        Err(err) => {
            tracing::warn!(
                target: "opsim::config",
                path = %path.display(),
                error = %err,
                "balance_config.load_failed"
            );
            (BalanceConfig::builtin(), BalanceConfigMetadata::new(None))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sim_runtime::SupplyClass;

    #[test]
    fn builtin_parses_and_covers_every_stance() {
        let config = BalanceConfig::builtin();
        for stance in Stance::ALL {
            assert!(config.stances.contains_key(&stance), "{stance:?} missing");
        }
        assert!(config.kit(&config.css.convoy_kit).is_some());
    }

    #[test]
    fn modes_inherit_base_friction() {
        let config = BalanceConfig::from_json_str(
            r#"{
                "movement": {
                    "friction": {
                        "": { "restricted": 0.5, "water": 0.0 },
                        "tracked": { "restricted": 0.8 }
                    }
                }
            }"#,
        )
        .unwrap();
        let tracked = config.friction("tracked");
        assert!((tracked.get(TerrainClass::Restricted) - 0.8).abs() < 1e-12);
        assert_eq!(tracked.get(TerrainClass::Water), 0.0);
        assert_eq!(tracked.get(TerrainClass::Unrestricted), 1.0);
        let unknown = config.friction("hover");
        assert!((unknown.get(TerrainClass::Restricted) - 0.5).abs() < 1e-12);
        assert_eq!(unknown.get(TerrainClass::OffMap), 0.0);
    }

    #[test]
    fn kit_consumption_reads_class_maps() {
        let config = BalanceConfig::builtin();
        let rifleman = config.kit("rifleman").expect("rifleman kit");
        let idle = rifleman.consumption.get("idle").expect("idle rate");
        assert!(idle.get(SupplyClass::I) > 0.0);
    }
}
