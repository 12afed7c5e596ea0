//! Sensors, signatures and contacts.
//!
//! Detection resolves a TOEM argument per (observer, target, sensor): the
//! target's signature is the starting rung, degrading effects push it down,
//! enhancing effects push it up and every earlier failed attempt adds a
//! deception con. Successful attempts refresh the observer's contact and copy
//! whichever classified fields the sensor can produce.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::str::FromStr;

use rand::Rng;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use sim_runtime::{Argument, Circle, Likelihood, Point, Polygon};
use thiserror::Error;

use crate::atmosphere::Atmosphere;
use crate::balance_config::BalanceConfig;
use crate::position::PositionDescriptor;
use crate::resources::{SimDuration, SimTime};
use crate::terrain::TerrainMap;
use crate::unit::{Unit, UnitId};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum IntelError {
    #[error("no extractor for contact field '{0}'")]
    ExtractField(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Signal {
    #[serde(rename = "visual")]
    Visual,
    #[serde(rename = "thermal")]
    Thermal,
    #[serde(rename = "sound")]
    Sound,
    #[serde(rename = "EM")]
    Em,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Sensor {
    pub name: String,
    pub signal: Signal,
    #[serde(default)]
    pub max_range_km: Option<f64>,
    #[serde(default)]
    pub requires: Vec<String>,
    #[serde(default)]
    pub degraded_by: Vec<String>,
    #[serde(default)]
    pub enhanced_by: Vec<String>,
    /// Contact fields this sensor can classify.
    #[serde(default)]
    pub fields: Vec<String>,
}

impl Sensor {
    /// Area of interest centred on `at`, if the sensor is range limited.
    pub fn area_of_interest(&self, at: Point) -> Option<Polygon> {
        self.max_range_km
            .map(|range| Circle::new(at, range).to_polygon())
    }

    /// Parse the field list, failing on names with no extractor.
    pub fn classified_fields(&self) -> Result<Vec<ContactField>, IntelError> {
        self.fields.iter().map(|f| f.parse()).collect()
    }
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct IntelligenceModel {
    pub sensors: Vec<Sensor>,
    pub signature: BTreeMap<Signal, Likelihood>,
    /// Signature overrides keyed by activity code or stance label.
    pub overrides: BTreeMap<String, BTreeMap<Signal, Likelihood>>,
}

/// Capability interface of a unit that can see and be seen.
pub trait Observer {
    fn sensors(&self) -> &[Sensor];

    /// Signature presented for `signal`, after activity and stance overrides
    /// and the stance signature shift.
    fn signature(&self, signal: Signal, balance: &BalanceConfig) -> Likelihood;
}

impl Observer for Unit {
    fn sensors(&self) -> &[Sensor] {
        &self.models.intelligence.sensors
    }

    fn signature(&self, signal: Signal, balance: &BalanceConfig) -> Likelihood {
        let model = &self.models.intelligence;
        let labels = self
            .activity
            .iter()
            .map(String::as_str)
            .chain(std::iter::once(self.stance().as_str()));
        let mut level = None;
        for label in labels {
            if let Some(found) = model.overrides.get(label).and_then(|m| m.get(&signal)) {
                level = Some(*found);
                break;
            }
        }
        let base = level
            .or_else(|| model.signature.get(&signal).copied())
            .unwrap_or(Likelihood::Neutral);
        if base == Likelihood::Impossible {
            return base;
        }
        let shift = balance.stance(self.stance()).signature_shift;
        Likelihood::from_rung(base.rung() + shift).max(Likelihood::VeryUnlikely)
    }
}

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum ContactStatus {
    #[default]
    Undetected,
    New,
    Direct,
    Reported,
    Lost,
}

impl ContactStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            ContactStatus::Undetected => "undetected",
            ContactStatus::New => "new",
            ContactStatus::Direct => "direct",
            ContactStatus::Reported => "reported",
            ContactStatus::Lost => "lost",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContactField {
    Side,
    Size,
    Toe,
    Identity,
    Augmentation,
    Personnel,
    Vehicles,
    Location,
    Stance,
    Activity,
    Course,
    Speed,
    Range,
    Bearing,
    Altitude,
    CasualtyLevel,
    Morale,
    Fatigue,
    Suppression,
    SupplyLevel,
}

impl ContactField {
    pub const ALL: [ContactField; 20] = [
        ContactField::Side,
        ContactField::Size,
        ContactField::Toe,
        ContactField::Identity,
        ContactField::Augmentation,
        ContactField::Personnel,
        ContactField::Vehicles,
        ContactField::Location,
        ContactField::Stance,
        ContactField::Activity,
        ContactField::Course,
        ContactField::Speed,
        ContactField::Range,
        ContactField::Bearing,
        ContactField::Altitude,
        ContactField::CasualtyLevel,
        ContactField::Morale,
        ContactField::Fatigue,
        ContactField::Suppression,
        ContactField::SupplyLevel,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            ContactField::Side => "side",
            ContactField::Size => "size",
            ContactField::Toe => "toe",
            ContactField::Identity => "identity",
            ContactField::Augmentation => "augmentation",
            ContactField::Personnel => "personnel",
            ContactField::Vehicles => "vehicles",
            ContactField::Location => "location",
            ContactField::Stance => "stance",
            ContactField::Activity => "activity",
            ContactField::Course => "course",
            ContactField::Speed => "speed",
            ContactField::Range => "range",
            ContactField::Bearing => "bearing",
            ContactField::Altitude => "altitude",
            ContactField::CasualtyLevel => "casualty_level",
            ContactField::Morale => "morale",
            ContactField::Fatigue => "fatigue",
            ContactField::Suppression => "suppression",
            ContactField::SupplyLevel => "supply_level",
        }
    }

    /// Read this field off the target as seen from `observer`.
    pub fn extract(self, target: &Unit, observer: Point) -> Value {
        match self {
            ContactField::Side => json!(target.side),
            ContactField::Size => json!(target.echelon),
            ContactField::Toe => {
                let templates: BTreeSet<&str> =
                    target.kits().map(|k| k.template.as_str()).collect();
                json!(templates)
            }
            ContactField::Identity => json!(target.name),
            ContactField::Augmentation => json!(target.opcon().is_some()),
            ContactField::Personnel => json!(target.headcount()),
            ContactField::Vehicles => json!(target.vehicle_count()),
            ContactField::Location => json!([target.point().x, target.point().y]),
            ContactField::Stance => json!(target.stance().as_str()),
            ContactField::Activity => json!(target.activity),
            ContactField::Course => json!(target.position().course()),
            ContactField::Speed => json!(target.position().rate()),
            ContactField::Range => json!(observer.distance(target.point())),
            ContactField::Bearing => json!(observer.bearing_to(target.point()).to_degrees()),
            ContactField::Altitude => json!(target.position().z()),
            ContactField::CasualtyLevel => json!(1.0 - target.strength()),
            ContactField::Morale => json!(target.morale()),
            ContactField::Fatigue => json!(target.fatigue()),
            ContactField::Suppression => json!(target.suppression()),
            ContactField::SupplyLevel => json!(target.cargo_level()),
        }
    }
}

impl fmt::Display for ContactField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ContactField {
    type Err = IntelError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.trim().to_ascii_lowercase().replace([' ', '-'], "_");
        let normalized = match normalized.as_str() {
            "iff" => "side",
            "toe_level" | "type" => "toe",
            other => other,
        }
        .to_string();
        ContactField::ALL
            .into_iter()
            .find(|f| f.as_str() == normalized)
            .ok_or_else(|| IntelError::ExtractField(s.to_string()))
    }
}

/// A unit's percept of another unit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Contact {
    pub target: UnitId,
    pub key: String,
    #[serde(default)]
    pub reliability: f64,
    #[serde(default)]
    pub rating: i32,
    #[serde(default)]
    pub deception: u32,
    #[serde(default)]
    pub status: ContactStatus,
    #[serde(default)]
    pub location: Option<PositionDescriptor>,
    #[serde(default)]
    pub fields: BTreeMap<ContactField, Value>,
    #[serde(default)]
    pub first_seen: Option<SimTime>,
    #[serde(default)]
    pub last_seen: Option<SimTime>,
    /// A CNTREP has gone up the chain for this contact.
    #[serde(default)]
    pub reported: bool,
}

impl Contact {
    pub fn new(target: UnitId, key: impl Into<String>) -> Self {
        Self {
            target,
            key: key.into(),
            reliability: 0.0,
            rating: 0,
            deception: 0,
            status: ContactStatus::Undetected,
            location: None,
            fields: BTreeMap::new(),
            first_seen: None,
            last_seen: None,
            reported: false,
        }
    }

    pub fn side(&self) -> Option<&str> {
        self.fields.get(&ContactField::Side).and_then(Value::as_str)
    }

    pub fn is_direct(&self) -> bool {
        self.status == ContactStatus::Direct
    }

    pub fn is_active(&self) -> bool {
        matches!(
            self.status,
            ContactStatus::New | ContactStatus::Direct | ContactStatus::Reported
        )
    }

    pub fn footprint(&self) -> Option<&Polygon> {
        self.location.as_ref().map(|l| l.footprint())
    }

    fn refresh_reliability(&mut self, sa_scale: f64) {
        let scale = sa_scale.max(1.0);
        self.reliability = (self.rating.max(0) as f64 / scale).clamp(0.0, 1.0);
    }

    /// Copy sent up or across the chain: never `direct` on arrival.
    pub fn as_report(&self) -> Contact {
        let mut copy = self.clone();
        if copy.status == ContactStatus::Direct {
            copy.status = ContactStatus::Reported;
        }
        copy
    }

    /// Promote to a direct contact with a fresh fix on `target`, used when
    /// units are locked in an engagement.
    pub fn force_direct(&mut self, target: &Unit, now: SimTime) {
        self.status = ContactStatus::Direct;
        self.rating = self.rating.max(1);
        self.location = Some(target.position().clone());
        self.fields
            .insert(ContactField::Side, Value::String(target.side.clone()));
        self.first_seen.get_or_insert(now);
        self.last_seen = Some(now);
    }
}

/// Inputs shared by every detection attempt in a pulse.
pub struct DetectionEnv<'a> {
    pub terrain: &'a TerrainMap,
    pub atmosphere: &'a Atmosphere,
    pub balance: &'a BalanceConfig,
    pub now: SimTime,
    pub hour_of_day: f64,
}

#[derive(Debug, Clone, PartialEq)]
pub enum DetectionOutcome {
    /// No sensor was able to look at the target.
    OutOfReach,
    Failed,
    Detected,
}

/// Run every sensor of `observer` against `target`, updating `contact` in
/// place. `contact` should start as the observer's existing percept or a
/// blank [`Contact::new`]. Field extraction errors are returned after the
/// remaining sensors have run.
pub fn attempt_detection<R: Rng + ?Sized>(
    observer: &Unit,
    target: &Unit,
    contact: &mut Contact,
    env: &DetectionEnv<'_>,
    rng: &mut R,
) -> (DetectionOutcome, Vec<IntelError>) {
    let mut outcome = DetectionOutcome::OutOfReach;
    let mut errors = Vec::new();
    let from = observer.point();
    let effects = env.atmosphere.effects_between(
        from,
        target.footprint(),
        env.hour_of_day,
        env.terrain,
        &env.balance.intel,
    );
    let probability = |level: Likelihood| env.balance.probability(level);

    for sensor in observer.sensors() {
        if let Some(aoi) = sensor.area_of_interest(from) {
            if !aoi.overlaps(target.footprint()) {
                continue;
            }
        }
        if sensor.requires.iter().any(|e| !effects.contains(e)) {
            continue;
        }

        let mut argument = Argument::new(target.signature(sensor.signal, env.balance));
        for effect in sensor.degraded_by.iter().filter(|e| effects.contains(*e)) {
            argument.add_con(effect.clone(), 1);
        }
        for effect in sensor.enhanced_by.iter().filter(|e| effects.contains(*e)) {
            argument.add_pro(effect.clone(), 1);
        }
        for _ in 0..contact.deception {
            argument.add_con("deception", 1);
        }

        let resolution = argument.resolve_with(rng, probability);
        if !resolution.success {
            if outcome == DetectionOutcome::OutOfReach {
                outcome = DetectionOutcome::Failed;
            }
            if contact.status != ContactStatus::Undetected || contact.rating > 0 {
                contact.deception += 1;
            }
            continue;
        }

        outcome = DetectionOutcome::Detected;
        contact.rating += resolution.increment.max(1);
        contact.deception = 0;
        contact.status = ContactStatus::Direct;
        contact.first_seen.get_or_insert(env.now);
        contact.last_seen = Some(env.now);
        contact.location = Some(target.position().clone());
        contact.refresh_reliability(env.balance.intel.sa_rating_scale);

        match sensor.classified_fields() {
            Ok(fields) => {
                let same_level = Argument::new(resolution.level);
                for field in fields {
                    if same_level.resolve_with(rng, probability).success {
                        contact.fields.insert(field, field.extract(target, from));
                    }
                }
            }
            Err(err) => errors.push(err),
        }
    }
    (outcome, errors)
}

/// Merge a received contact into `contacts`. The higher rating wins field by
/// field; a local `direct` contact is never downgraded.
pub fn merge_contact(contacts: &mut BTreeMap<String, Contact>, received: &Contact) {
    match contacts.get_mut(&received.key) {
        None => {
            contacts.insert(received.key.clone(), received.as_report());
        }
        Some(local) => {
            if received.rating > local.rating {
                for (field, value) in &received.fields {
                    local.fields.insert(*field, value.clone());
                }
                if received.location.is_some() && !local.is_direct() {
                    local.location = received.location.clone();
                }
                local.rating = received.rating;
                local.reliability = local.reliability.max(received.reliability);
            }
            if local.last_seen < received.last_seen && !local.is_direct() {
                local.last_seen = received.last_seen;
                local.status = ContactStatus::Reported;
            }
        }
    }
}

/// Age contacts: direct fixes older than half the timeout go stale, anything
/// older than the timeout is lost. Returns the keys that were lost.
pub fn age_contacts(
    contacts: &mut BTreeMap<String, Contact>,
    now: SimTime,
    timeout: SimDuration,
) -> Vec<String> {
    let mut lost = Vec::new();
    let half = SimDuration::from_seconds(timeout.seconds() / 2);
    for (key, contact) in contacts.iter_mut() {
        let Some(seen) = contact.last_seen else {
            continue;
        };
        let age = now.saturating_since(seen);
        if contact.status != ContactStatus::Lost && age > timeout {
            contact.status = ContactStatus::Lost;
            lost.push(key.clone());
        } else if contact.status == ContactStatus::Direct && age > half {
            contact.status = ContactStatus::Undetected;
        }
    }
    lost
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::terrain::TerrainClass;
    use crate::unit::Stance;
    use rand::SeedableRng;
    use rand_chacha::ChaCha8Rng;

    fn eyes() -> Sensor {
        Sensor {
            name: "eyes".into(),
            signal: Signal::Visual,
            max_range_km: Some(5.0),
            requires: vec!["light".into(), "LOS".into()],
            degraded_by: vec!["fog".into()],
            enhanced_by: vec!["close".into()],
            fields: vec!["side".into(), "size".into(), "location".into()],
        }
    }

    fn team(id: u64, side: &str, at: Point) -> Unit {
        let mut unit = Unit::new(UnitId(id), format!("team {id}"), side)
            .at(at, 0.05)
            .with_personnel("rifleman", 4);
        unit.models.intelligence.sensors.push(eyes());
        unit.models
            .intelligence
            .signature
            .insert(Signal::Visual, Likelihood::VeryLikely);
        unit
    }

    fn env<'a>(terrain: &'a TerrainMap, atmosphere: &'a Atmosphere, balance: &'a BalanceConfig) -> DetectionEnv<'a> {
        DetectionEnv {
            terrain,
            atmosphere,
            balance,
            now: SimTime(600),
            hour_of_day: 8.0,
        }
    }

    #[test]
    fn close_daylight_detection_is_certain() {
        let terrain = TerrainMap::uniform(20.0, 20.0, 0.1, TerrainClass::Unrestricted);
        let atmosphere = Atmosphere::default();
        let balance = BalanceConfig::builtin();
        let a = team(1, "blue", Point::new(10.0, 10.0));
        let b = team(2, "red", Point::new(10.5, 10.0));
        let mut rng = ChaCha8Rng::seed_from_u64(7);
        for _ in 0..20 {
            let mut contact = Contact::new(b.id, b.contact_key());
            let (outcome, errors) =
                attempt_detection(&a, &b, &mut contact, &env(&terrain, &atmosphere, &balance), &mut rng);
            assert_eq!(outcome, DetectionOutcome::Detected);
            assert!(errors.is_empty());
            assert!(contact.is_direct());
            assert!(contact.rating >= 1);
            assert_eq!(contact.side(), Some("red"));
            assert!(contact.footprint().is_some());
        }
    }

    #[test]
    fn out_of_range_targets_are_not_attempted() {
        let terrain = TerrainMap::uniform(60.0, 20.0, 0.5, TerrainClass::Unrestricted);
        let atmosphere = Atmosphere::default();
        let balance = BalanceConfig::builtin();
        let a = team(1, "blue", Point::new(5.0, 10.0));
        let b = team(2, "red", Point::new(45.0, 10.0));
        let mut contact = Contact::new(b.id, b.contact_key());
        let mut rng = ChaCha8Rng::seed_from_u64(1);
        let (outcome, _) =
            attempt_detection(&a, &b, &mut contact, &env(&terrain, &atmosphere, &balance), &mut rng);
        assert_eq!(outcome, DetectionOutcome::OutOfReach);
        assert_eq!(contact.status, ContactStatus::Undetected);
    }

    #[test]
    fn stance_and_overrides_shape_signature() {
        let balance = BalanceConfig::builtin();
        let mut unit = team(1, "blue", Point::ORIGIN);
        unit.set_stance(Stance::DeliberateDefense);
        assert_eq!(unit.signature(Signal::Visual, &balance), Likelihood::Neutral);
        unit.models.intelligence.overrides.insert(
            "combat".into(),
            BTreeMap::from([(Signal::Visual, Likelihood::Certain)]),
        );
        unit.activity.insert("combat".into());
        assert_eq!(unit.signature(Signal::Visual, &balance), Likelihood::Likely);
    }

    #[test]
    fn unknown_field_names_report_extract_error() {
        let mut sensor = eyes();
        sensor.fields.push("shoe_size".into());
        assert_eq!(
            sensor.classified_fields(),
            Err(IntelError::ExtractField("shoe_size".into()))
        );
        assert_eq!("IFF".parse::<ContactField>(), Ok(ContactField::Side));
    }

    #[test]
    fn merge_keeps_higher_rating_and_never_downgrades_direct() {
        let mut contacts = BTreeMap::new();
        let mut local = Contact::new(UnitId(9), "red:x");
        local.status = ContactStatus::Direct;
        local.rating = 2;
        local.last_seen = Some(SimTime(60));
        local.fields.insert(ContactField::Size, json!("platoon"));
        contacts.insert(local.key.clone(), local);

        let mut received = Contact::new(UnitId(9), "red:x");
        received.status = ContactStatus::Direct;
        received.rating = 5;
        received.last_seen = Some(SimTime(120));
        received.fields.insert(ContactField::Size, json!("company"));
        merge_contact(&mut contacts, &received);

        let merged = &contacts["red:x"];
        assert_eq!(merged.status, ContactStatus::Direct);
        assert_eq!(merged.rating, 5);
        assert_eq!(merged.fields[&ContactField::Size], json!("company"));

        let fresh = Contact {
            key: "red:y".into(),
            ..received.clone()
        };
        merge_contact(&mut contacts, &fresh);
        assert_eq!(contacts["red:y"].status, ContactStatus::Reported);
    }

    #[test]
    fn aging_marks_stale_then_lost() {
        let mut contacts = BTreeMap::new();
        let mut c = Contact::new(UnitId(2), "red:a");
        c.status = ContactStatus::Direct;
        c.last_seen = Some(SimTime(0));
        contacts.insert(c.key.clone(), c);
        let timeout = SimDuration::from_minutes(60);
        assert!(age_contacts(&mut contacts, SimTime(40 * 60), timeout).is_empty());
        assert_eq!(contacts["red:a"].status, ContactStatus::Undetected);
        assert_eq!(age_contacts(&mut contacts, SimTime(61 * 60), timeout), vec!["red:a"]);
        assert_eq!(contacts["red:a"].status, ContactStatus::Lost);
    }
}
