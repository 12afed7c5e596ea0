//! Atmospheric and line-of-sight effects seen by sensors.

use std::collections::BTreeSet;

use bevy::prelude::Resource;
use serde::{Deserialize, Serialize};
use sim_runtime::{Point, Polygon};

use crate::balance_config::IntelBalance;
use crate::terrain::TerrainMap;

pub const LIGHT: &str = "light";
pub const NIGHT: &str = "night";
pub const LOS: &str = "LOS";
pub const CLOSE: &str = "close";

#[derive(Resource, Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Atmosphere {
    /// Scenario-wide weather effects such as `rain`, `fog` or `smoke`.
    pub weather: BTreeSet<String>,
    pub daylight_start_hour: f64,
    pub daylight_end_hour: f64,
}

impl Default for Atmosphere {
    fn default() -> Self {
        Self {
            weather: BTreeSet::new(),
            daylight_start_hour: 6.0,
            daylight_end_hour: 18.0,
        }
    }
}

impl Atmosphere {
    pub fn new(daylight_start_hour: f64, daylight_end_hour: f64) -> Self {
        Self {
            weather: BTreeSet::new(),
            daylight_start_hour,
            daylight_end_hour,
        }
    }

    pub fn with_weather<I, S>(mut self, effects: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.weather.extend(effects.into_iter().map(Into::into));
        self
    }

    pub fn is_daylight(&self, hour_of_day: f64) -> bool {
        if self.daylight_start_hour <= self.daylight_end_hour {
            hour_of_day >= self.daylight_start_hour && hour_of_day < self.daylight_end_hour
        } else {
            hour_of_day >= self.daylight_start_hour || hour_of_day < self.daylight_end_hour
        }
    }

    /// Effects present for an observer at `from` looking at `target`.
    pub fn effects_between(
        &self,
        from: Point,
        target: &Polygon,
        hour_of_day: f64,
        terrain: &TerrainMap,
        intel: &IntelBalance,
    ) -> BTreeSet<String> {
        let mut effects = self.weather.clone();
        effects.insert(if self.is_daylight(hour_of_day) { LIGHT } else { NIGHT }.to_string());

        let aim = target.centroid();
        if terrain.blocked_fraction(from, aim, intel.los_sample_km) < intel.los_block_fraction {
            effects.insert(LOS.to_string());
        }
        if target.distance_to_point(from) <= intel.close_range_km {
            effects.insert(CLOSE.to_string());
        }
        effects
    }
}
