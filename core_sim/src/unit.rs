//! Military units: identity, kits, supply store and the capability models.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use sim_runtime::{Point, Polygon, SupplyPackage};
use thiserror::Error;

use crate::agent::Staff;
use crate::balance_config::BalanceConfig;
use crate::combat::{CombatModel, EngagementId};
use crate::intelligence::{Contact, IntelligenceModel};
use crate::logistics::LogisticsModel;
use crate::position::PositionDescriptor;
use crate::unit_log::UnitLog;

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct UnitId(pub u64);

impl fmt::Display for UnitId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "U{}", self.0)
    }
}

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum Stance {
    #[default]
    Deployed,
    Transit,
    HastyDefense,
    DeliberateDefense,
    Offense,
    Withdrawal,
    Support,
    Security,
}

impl Stance {
    pub const ALL: [Stance; 8] = [
        Stance::Deployed,
        Stance::Transit,
        Stance::HastyDefense,
        Stance::DeliberateDefense,
        Stance::Offense,
        Stance::Withdrawal,
        Stance::Support,
        Stance::Security,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Stance::Deployed => "deployed",
            Stance::Transit => "transit",
            Stance::HastyDefense => "hasty_defense",
            Stance::DeliberateDefense => "deliberate_defense",
            Stance::Offense => "offense",
            Stance::Withdrawal => "withdrawal",
            Stance::Support => "support",
            Stance::Security => "security",
        }
    }
}

impl fmt::Display for Stance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unknown stance '{0}'")]
pub struct UnknownStance(pub String);

impl FromStr for Stance {
    type Err = UnknownStance;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.trim().to_ascii_lowercase().replace([' ', '-'], "_");
        Stance::ALL
            .into_iter()
            .find(|stance| stance.as_str() == normalized)
            .ok_or_else(|| UnknownStance(s.to_string()))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UnitKind {
    #[default]
    Combat,
    Css,
    Convoy,
    Logpac,
}

/// A group of identical personnel or vehicles.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Kit {
    pub template: String,
    pub authorized: u32,
    pub current: f64,
}

impl Kit {
    pub fn new(template: impl Into<String>, count: u32) -> Self {
        Self {
            template: template.into(),
            authorized: count,
            current: count as f64,
        }
    }

    pub fn strength(&self) -> f64 {
        if self.authorized == 0 {
            0.0
        } else {
            self.current / self.authorized as f64
        }
    }
}

/// Supply parcel bookkeeping carried by LOGPAC units.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogpacInfo {
    pub supreq_uid: u64,
    pub recipient: UnitId,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct C3Model {
    /// Baseline communications quality before stance and state factors.
    pub base: f64,
}

impl Default for C3Model {
    fn default() -> Self {
        Self { base: 1.0 }
    }
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct MovementModel {
    /// Friction mode, e.g. `foot`, `wheeled`, `tracked`.
    pub mode: String,
    /// Overrides the nominal speed of the mode when set.
    pub speed_kph: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Models {
    pub c3: C3Model,
    pub combat: CombatModel,
    pub intelligence: IntelligenceModel,
    pub logistics: LogisticsModel,
    pub movement: MovementModel,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Unit {
    pub id: UnitId,
    pub name: String,
    pub side: String,
    #[serde(default)]
    pub echelon: String,
    #[serde(default)]
    pub kind: UnitKind,
    position: PositionDescriptor,
    stance: Stance,
    readiness: f64,
    supply: SupplyPackage,
    #[serde(default)]
    pub capacity: SupplyPackage,
    #[serde(default)]
    pub mounted: bool,
    #[serde(default)]
    pub personnel: Vec<Kit>,
    #[serde(default)]
    pub vehicles: Vec<Kit>,
    #[serde(default)]
    pub(crate) hq: Option<UnitId>,
    #[serde(default)]
    pub(crate) opcon: Option<UnitId>,
    #[serde(default)]
    pub(crate) subordinates: Vec<UnitId>,
    #[serde(default)]
    pub staff: Staff,
    #[serde(default)]
    pub contacts: BTreeMap<String, Contact>,
    #[serde(default)]
    pub models: Models,
    morale: f64,
    fatigue: f64,
    suppression: f64,
    #[serde(default)]
    pub activity: BTreeSet<String>,
    #[serde(default)]
    pub ground_engagements: Vec<EngagementId>,
    #[serde(default)]
    pub delete_me: bool,
    #[serde(default)]
    pub echelon_footprint: Option<Polygon>,
    #[serde(default)]
    pub logpac: Option<LogpacInfo>,
    #[serde(skip)]
    pub log: UnitLog,
}

impl Unit {
    pub fn new(id: UnitId, name: impl Into<String>, side: impl Into<String>) -> Self {
        Self {
            id,
            name: name.into(),
            side: side.into(),
            echelon: String::new(),
            kind: UnitKind::Combat,
            position: PositionDescriptor::default(),
            stance: Stance::Deployed,
            readiness: 0.0,
            supply: SupplyPackage::EMPTY,
            capacity: SupplyPackage::EMPTY,
            mounted: false,
            personnel: Vec::new(),
            vehicles: Vec::new(),
            hq: None,
            opcon: None,
            subordinates: Vec::new(),
            staff: Staff::default(),
            contacts: BTreeMap::new(),
            models: Models::default(),
            morale: 1.0,
            fatigue: 0.0,
            suppression: 0.0,
            activity: BTreeSet::new(),
            ground_engagements: Vec::new(),
            delete_me: false,
            echelon_footprint: None,
            logpac: None,
            log: UnitLog::default(),
        }
    }

    pub fn at(mut self, p: Point, radius: f64) -> Self {
        self.position = PositionDescriptor::at(p, radius);
        self
    }

    pub fn with_kind(mut self, kind: UnitKind) -> Self {
        self.kind = kind;
        self
    }

    pub fn with_echelon(mut self, echelon: impl Into<String>) -> Self {
        self.echelon = echelon.into();
        self
    }

    pub fn with_stance(mut self, stance: Stance) -> Self {
        self.stance = stance;
        self
    }

    pub fn with_personnel(mut self, template: impl Into<String>, count: u32) -> Self {
        self.personnel.push(Kit::new(template, count));
        self
    }

    pub fn with_vehicles(mut self, template: impl Into<String>, count: u32) -> Self {
        self.vehicles.push(Kit::new(template, count));
        self.mounted = true;
        self
    }

    /// Capacity and a store filled to `level` of it.
    pub fn with_supply(mut self, capacity: SupplyPackage, level: f64) -> Self {
        self.capacity = capacity;
        self.supply = capacity * level.max(0.0);
        self
    }

    pub fn with_models(mut self, models: Models) -> Self {
        self.models = models;
        self
    }

    pub fn position(&self) -> &PositionDescriptor {
        &self.position
    }

    pub fn point(&self) -> Point {
        self.position.point()
    }

    pub fn footprint(&self) -> &Polygon {
        self.position.footprint()
    }

    pub fn set_point(&mut self, p: Point) {
        self.position.set_point(p);
    }

    pub fn set_motion(&mut self, course: f64, rate: f64) {
        self.position.set_motion(course, rate);
    }

    pub fn set_position(&mut self, position: PositionDescriptor) {
        self.position = position;
    }

    pub fn halt(&mut self) {
        self.position.halt();
    }

    pub fn stance(&self) -> Stance {
        self.stance
    }

    pub fn set_stance(&mut self, stance: Stance) {
        self.stance = stance;
    }

    /// Hours still needed before the unit is ready in its target stance.
    pub fn readiness(&self) -> f64 {
        self.readiness
    }

    pub fn set_readiness(&mut self, hours: f64) {
        self.readiness = hours.max(0.0);
    }

    pub fn supply(&self) -> &SupplyPackage {
        &self.supply
    }

    pub fn receive_supply(&mut self, package: SupplyPackage) {
        self.supply += package;
    }

    pub fn expend_supply(&mut self, package: SupplyPackage) {
        self.supply -= package;
    }

    pub fn set_supply(&mut self, package: SupplyPackage) {
        self.supply = package;
    }

    pub fn hq(&self) -> Option<UnitId> {
        self.hq
    }

    pub fn opcon(&self) -> Option<UnitId> {
        self.opcon
    }

    /// The unit whose orders are followed: OPCON wins over HQ.
    pub fn commander(&self) -> Option<UnitId> {
        self.opcon.or(self.hq)
    }

    pub fn subordinates(&self) -> &[UnitId] {
        &self.subordinates
    }

    pub fn morale(&self) -> f64 {
        self.morale
    }

    pub fn fatigue(&self) -> f64 {
        self.fatigue
    }

    pub fn suppression(&self) -> f64 {
        self.suppression
    }

    pub fn set_morale(&mut self, value: f64) {
        self.morale = value.clamp(0.0, 1.0);
    }

    pub fn set_fatigue(&mut self, value: f64) {
        self.fatigue = value.clamp(0.0, 1.0);
    }

    pub fn set_suppression(&mut self, value: f64) {
        self.suppression = value.clamp(0.0, 1.0);
    }

    pub fn adjust_morale(&mut self, delta: f64) {
        self.set_morale(self.morale + delta);
    }

    pub fn adjust_fatigue(&mut self, delta: f64) {
        self.set_fatigue(self.fatigue + delta);
    }

    pub fn adjust_suppression(&mut self, delta: f64) {
        self.set_suppression(self.suppression + delta);
    }

    pub fn kits(&self) -> impl Iterator<Item = &Kit> {
        self.personnel.iter().chain(self.vehicles.iter())
    }

    pub fn headcount(&self) -> f64 {
        self.personnel.iter().map(|k| k.current).sum()
    }

    pub fn vehicle_count(&self) -> f64 {
        self.vehicles.iter().map(|k| k.current).sum()
    }

    /// Current over authorised strength across all kits.
    pub fn strength(&self) -> f64 {
        let authorized: f64 = self.kits().map(|k| k.authorized as f64).sum();
        if authorized <= 0.0 {
            return 1.0;
        }
        self.kits().map(|k| k.current).sum::<f64>() / authorized
    }

    pub fn cargo_level(&self) -> f64 {
        self.supply.clamped_non_negative().level_of(&self.capacity)
    }

    /// Key used in contact maps held by other units.
    pub fn contact_key(&self) -> String {
        contact_key(&self.side, &self.name)
    }

    /// File-system friendly form of the name.
    pub fn safe_name(&self) -> String {
        safe_name(&self.name)
    }

    pub fn is_transient(&self) -> bool {
        matches!(self.kind, UnitKind::Logpac)
    }
}

pub fn contact_key(side: &str, name: &str) -> String {
    format!("{side}:{name}")
}

pub fn safe_name(name: &str) -> String {
    let mut out: String = name
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() {
                c.to_ascii_lowercase()
            } else {
                '_'
            }
        })
        .collect();
    if out.is_empty() {
        out.push('_');
    }
    out
}

/// Command and control strength.
pub trait CommandAndControl {
    /// Product of morale, fatigue and suppression factors and the stance
    /// modifier.
    fn c2_level(&self, balance: &BalanceConfig) -> f64;

    /// C2 level times communications quality and the distance-to-HQ factor.
    fn c3_level(&self, hq_distance_km: Option<f64>, comm_range_km: f64, balance: &BalanceConfig)
        -> f64;
}

impl CommandAndControl for Unit {
    fn c2_level(&self, balance: &BalanceConfig) -> f64 {
        let w = &balance.c3;
        let level = (1.0 - w.morale_weight * (1.0 - self.morale))
            * (1.0 - w.fatigue_weight * self.fatigue)
            * (1.0 - w.suppression_weight * self.suppression)
            * balance.stance(self.stance).c2;
        level.clamp(0.0, 1.0)
    }

    fn c3_level(
        &self,
        hq_distance_km: Option<f64>,
        comm_range_km: f64,
        balance: &BalanceConfig,
    ) -> f64 {
        let distance_factor = match hq_distance_km {
            Some(d) if comm_range_km > 0.0 && d > comm_range_km => {
                (comm_range_km / d).max(balance.c3.out_of_range_factor)
            }
            _ => 1.0,
        };
        let stance_c3 = balance.stance(self.stance).c3;
        (self.c2_level(balance) * self.models.c3.base * stance_c3 * distance_factor).clamp(0.0, 1.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stance_parses_spaced_names() {
        assert_eq!("deliberate defense".parse::<Stance>(), Ok(Stance::DeliberateDefense));
        assert_eq!("Hasty-Defense".parse::<Stance>(), Ok(Stance::HastyDefense));
        assert!("charge".parse::<Stance>().is_err());
    }

    #[test]
    fn condition_mutators_clamp() {
        let mut unit = Unit::new(UnitId(1), "A", "blue");
        unit.adjust_morale(-3.0);
        unit.adjust_suppression(2.0);
        unit.adjust_fatigue(0.25);
        assert_eq!(unit.morale(), 0.0);
        assert_eq!(unit.suppression(), 1.0);
        assert_eq!(unit.fatigue(), 0.25);
    }

    #[test]
    fn c2_degrades_with_state_and_c3_with_distance() {
        let balance = BalanceConfig::builtin();
        let mut unit = Unit::new(UnitId(1), "A", "blue");
        assert!((unit.c2_level(&balance) - 1.0).abs() < 1e-12);
        assert!((unit.c3_level(Some(10.0), 30.0, &balance) - 1.0).abs() < 1e-12);
        assert!((unit.c3_level(Some(45.0), 30.0, &balance) - 30.0 / 45.0).abs() < 1e-12);
        assert!((unit.c3_level(Some(600.0), 30.0, &balance) - 0.5).abs() < 1e-12);
        unit.set_suppression(0.5);
        assert!((unit.c2_level(&balance) - 0.6).abs() < 1e-12);
    }

    #[test]
    fn commander_prefers_opcon() {
        let mut unit = Unit::new(UnitId(3), "A", "blue");
        unit.hq = Some(UnitId(1));
        assert_eq!(unit.commander(), Some(UnitId(1)));
        unit.opcon = Some(UnitId(2));
        assert_eq!(unit.commander(), Some(UnitId(2)));
    }

    #[test]
    fn safe_name_replaces_punctuation() {
        assert_eq!(safe_name("1st Bn / 22 Inf"), "1st_bn___22_inf");
    }
}
