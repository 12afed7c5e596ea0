//! Engagements between units with overlapping footprints and the attrition
//! model that drives them.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use bevy::prelude::Resource;
use serde::{Deserialize, Serialize};

use crate::balance_config::BalanceConfig;
use crate::intelligence::Contact;
use crate::oob::Oob;
use crate::resources::{IdAllocator, SimTime, Sides};
use crate::terrain::TerrainMap;
use crate::unit::{Unit, UnitId};

/// Activity code recorded on every unit that fights during a pulse.
pub const COMBAT: &str = "combat";

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct EngagementId(pub u64);

impl fmt::Display for EngagementId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "E{}", self.0)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndirectFireCapability {
    pub min_range_km: f64,
    pub max_range_km: f64,
    pub ammo: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CombatModel {
    /// Multiplier on the RCP summed from kits.
    pub rcp_factor: f64,
    pub indirect: Option<IndirectFireCapability>,
}

impl Default for CombatModel {
    fn default() -> Self {
        Self {
            rcp_factor: 1.0,
            indirect: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FireMission {
    #[serde(rename = "STRIKE", alias = "strike")]
    Strike,
    #[serde(rename = "DS", alias = "ds")]
    DirectSupport,
    #[serde(rename = "CF", alias = "cf")]
    CounterFire,
    #[serde(rename = "SEAD", alias = "sead")]
    Sead,
}

/// An indirect-fire strike waiting to land.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Strike {
    pub from: UnitId,
    pub target: UnitId,
    pub mission: FireMission,
    pub rcp: f64,
    pub ammo: String,
    pub fired: SimTime,
}

#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct DamageReport {
    pub relative: f64,
    pub suppression: f64,
    pub casualties: f64,
    pub destroyed: f64,
}

/// Capability interface of a unit that can fight.
pub trait Combatant {
    /// Sum over kits of per-item RCP times current count.
    fn raw_rcp(&self, balance: &BalanceConfig) -> f64;

    /// Raw RCP adjusted for terrain, stance and suppression.
    fn effective_rcp(&self, terrain: &TerrainMap, balance: &BalanceConfig) -> f64;

    /// Spread `damage` RCP points over suppression, casualties and destroyed
    /// vehicles.
    fn inflict_damage(&mut self, damage: f64, balance: &BalanceConfig) -> DamageReport;
}

impl Combatant for Unit {
    fn raw_rcp(&self, balance: &BalanceConfig) -> f64 {
        let kits: f64 = self
            .kits()
            .filter_map(|kit| balance.kit(&kit.template).map(|t| t.rcp * kit.current))
            .sum();
        kits * self.models.combat.rcp_factor
    }

    fn effective_rcp(&self, terrain: &TerrainMap, balance: &BalanceConfig) -> f64 {
        let sample = terrain.sample_terrain(self.footprint());
        let defense: f64 = sample
            .iter()
            .map(|(class, fraction)| {
                fraction
                    * balance
                        .combat
                        .terrain_defense
                        .get(&class)
                        .copied()
                        .unwrap_or(1.0)
            })
            .sum();
        let suppression = 1.0 - balance.combat.suppression_penalty * self.suppression();
        self.raw_rcp(balance) * defense * balance.stance(self.stance()).rcp * suppression.max(0.0)
    }

    fn inflict_damage(&mut self, damage: f64, balance: &BalanceConfig) -> DamageReport {
        let raw = self.raw_rcp(balance);
        let relative = if raw > 0.0 {
            (damage / raw).clamp(0.0, 1.0)
        } else {
            1.0
        };
        if relative <= 0.0 {
            return DamageReport::default();
        }
        let weights = &balance.combat;
        let suppression = weights.suppression_weight * relative;
        self.adjust_suppression(suppression);
        let mut casualties = 0.0;
        for kit in self.personnel.iter_mut() {
            let lost = kit.current * weights.casualty_weight * relative;
            kit.current -= lost;
            casualties += lost;
        }
        let mut destroyed = 0.0;
        for kit in self.vehicles.iter_mut() {
            let lost = kit.current * weights.destruction_weight * relative;
            kit.current -= lost;
            destroyed += lost;
        }
        DamageReport {
            relative,
            suppression,
            casualties,
            destroyed,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Participant {
    pub unit: UnitId,
    pub side: String,
    pub initial_rcp: f64,
    pub joined: SimTime,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Engagement {
    pub id: EngagementId,
    pub started: SimTime,
    pub participants: Vec<Participant>,
    #[serde(default)]
    pub rounds: u32,
}

impl Engagement {
    pub fn includes(&self, unit: UnitId) -> bool {
        self.participants.iter().any(|p| p.unit == unit)
    }

    pub fn sides(&self) -> BTreeSet<&str> {
        self.participants.iter().map(|p| p.side.as_str()).collect()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngagementRequest {
    Created(EngagementId),
    Joined(EngagementId),
    AlreadyEngaged(EngagementId),
    Rejected,
}

#[derive(Resource, Debug, Clone, Default, Serialize, Deserialize)]
pub struct Engagements {
    active: BTreeMap<EngagementId, Engagement>,
}

impl Engagements {
    pub fn len(&self) -> usize {
        self.active.len()
    }

    pub fn is_empty(&self) -> bool {
        self.active.is_empty()
    }

    pub fn get(&self, id: EngagementId) -> Option<&Engagement> {
        self.active.get(&id)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Engagement> {
        self.active.values()
    }

    pub fn find_for(&self, unit: UnitId) -> Option<EngagementId> {
        self.active
            .values()
            .find(|e| e.includes(unit))
            .map(|e| e.id)
    }

    pub fn is_engaged(&self, unit: UnitId) -> bool {
        self.find_for(unit).is_some()
    }

    /// Spawn an engagement between `a` and `b`, or let one of them join the
    /// engagement the other is already in.
    pub fn request(
        &mut self,
        oob: &mut Oob,
        a: UnitId,
        b: UnitId,
        now: SimTime,
        ids: &mut IdAllocator,
        balance: &BalanceConfig,
    ) -> EngagementRequest {
        let (Some(ua), Some(ub)) = (oob.get(a), oob.get(b)) else {
            return EngagementRequest::Rejected;
        };
        if !Sides::hostile(&ua.side, &ub.side) || ua.delete_me || ub.delete_me {
            return EngagementRequest::Rejected;
        }
        let participant = |unit: &Unit| Participant {
            unit: unit.id,
            side: unit.side.clone(),
            initial_rcp: unit.raw_rcp(balance),
            joined: now,
        };
        let (pa, pb) = (participant(ua), participant(ub));

        let outcome = match (self.find_for(a), self.find_for(b)) {
            (Some(ea), Some(eb)) if ea == eb => return EngagementRequest::AlreadyEngaged(ea),
            (Some(ea), Some(_)) => return EngagementRequest::AlreadyEngaged(ea),
            (Some(existing), None) => {
                self.join(existing, pb);
                EngagementRequest::Joined(existing)
            }
            (None, Some(existing)) => {
                self.join(existing, pa);
                EngagementRequest::Joined(existing)
            }
            (None, None) => {
                let id = EngagementId(ids.engagement());
                self.active.insert(
                    id,
                    Engagement {
                        id,
                        started: now,
                        participants: vec![pa, pb],
                        rounds: 0,
                    },
                );
                EngagementRequest::Created(id)
            }
        };
        let id = match outcome {
            EngagementRequest::Created(id) | EngagementRequest::Joined(id) => id,
            _ => return outcome,
        };
        for unit in [a, b] {
            if let Some(u) = oob.get_mut(unit) {
                if !u.ground_engagements.contains(&id) {
                    u.ground_engagements.push(id);
                }
            }
        }
        tracing::info!(
            target: "opsim::combat",
            engagement = %id,
            a = %a,
            b = %b,
            joined = matches!(outcome, EngagementRequest::Joined(_)),
            "engagement.requested"
        );
        outcome
    }

    fn join(&mut self, id: EngagementId, participant: Participant) {
        if let Some(engagement) = self.active.get_mut(&id) {
            if !engagement.includes(participant.unit) {
                engagement.participants.push(participant);
            }
        }
    }

    /// Drop an engagement and clear it from every participant.
    pub fn terminate(&mut self, oob: &mut Oob, id: EngagementId) {
        let Some(engagement) = self.active.remove(&id) else {
            return;
        };
        for p in &engagement.participants {
            if let Some(unit) = oob.get_mut(p.unit) {
                unit.ground_engagements.retain(|e| *e != id);
            }
        }
        tracing::info!(
            target: "opsim::combat",
            engagement = %id,
            rounds = engagement.rounds,
            "engagement.terminated"
        );
    }
}

fn able_to_engage(unit: &Unit, initial_rcp: f64, balance: &BalanceConfig) -> bool {
    !unit.delete_me
        && unit.raw_rcp(balance) > 0.0
        && unit.raw_rcp(balance) >= balance.combat.ineffective_fraction * initial_rcp
}

fn situational_awareness(observer: &Unit, target: &Unit, balance: &BalanceConfig) -> f64 {
    observer
        .contacts
        .get(&target.contact_key())
        .map(|c| (c.rating.max(0) as f64 / balance.intel.sa_rating_scale.max(1.0)).min(1.0))
        .unwrap_or(0.0)
}

/// Outcome of one pulse of fighting.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct EngagementPulse {
    pub damage: BTreeMap<UnitId, f64>,
    pub terminated: Vec<EngagementId>,
}

/// Resolve one pulse of every active engagement.
pub fn step_engagements(
    engagements: &mut Engagements,
    oob: &mut Oob,
    terrain: &TerrainMap,
    balance: &BalanceConfig,
    pulse_hours: f64,
    now: SimTime,
) -> EngagementPulse {
    let mut report = EngagementPulse::default();
    let ids: Vec<EngagementId> = engagements.active.keys().copied().collect();
    for id in ids {
        let Some(engagement) = engagements.active.get_mut(&id) else {
            continue;
        };
        engagement
            .participants
            .retain(|p| oob.get(p.unit).is_some_and(|u| !u.delete_me));

        // Engaged units always see each other.
        let snapshot: Vec<Unit> = engagement
            .participants
            .iter()
            .filter_map(|p| oob.get(p.unit).cloned())
            .collect();
        for observer in &snapshot {
            for target in &snapshot {
                if !Sides::hostile(&observer.side, &target.side) {
                    continue;
                }
                if let Some(unit) = oob.get_mut(observer.id) {
                    unit.contacts
                        .entry(target.contact_key())
                        .or_insert_with(|| Contact::new(target.id, target.contact_key()))
                        .force_direct(target, now);
                }
            }
        }
        let snapshot: Vec<(Unit, f64)> = engagement
            .participants
            .iter()
            .filter_map(|p| oob.get(p.unit).cloned().map(|u| (u, p.initial_rcp)))
            .collect();

        let mut dealt: BTreeMap<UnitId, f64> = BTreeMap::new();
        let mut taken: BTreeMap<UnitId, f64> = BTreeMap::new();
        for (unit, initial) in &snapshot {
            if !able_to_engage(unit, *initial, balance) {
                continue;
            }
            let target = snapshot
                .iter()
                .filter(|(other, _)| Sides::hostile(&unit.side, &other.side))
                .min_by(|(x, _), (y, _)| {
                    unit.point()
                        .distance(x.point())
                        .total_cmp(&unit.point().distance(y.point()))
                        .then(x.id.cmp(&y.id))
                });
            let Some((target, _)) = target else { continue };
            let sa_us = situational_awareness(unit, target, balance);
            let sa_them = situational_awareness(target, unit, balance);
            let delta = (sa_us - sa_them).abs() * balance.combat.sa_weight;
            let exponent = if sa_us >= sa_them { delta } else { -delta };
            let rcp = unit.effective_rcp(terrain, balance) * 10f64.powf(exponent);
            let damage = rcp * balance.combat.attrition_rate * pulse_hours;
            *dealt.entry(unit.id).or_default() += damage / target.raw_rcp(balance).max(1.0e-9);
            *taken.entry(target.id).or_default() += damage;
        }

        for (unit, _) in &snapshot {
            let Some(live) = oob.get_mut(unit.id) else {
                continue;
            };
            live.activity.insert(COMBAT.to_string());
            let damage = taken.get(&unit.id).copied().unwrap_or(0.0);
            let hit = live.inflict_damage(damage, balance);
            let relative_dealt = dealt.get(&unit.id).copied().unwrap_or(0.0).min(1.0);
            live.adjust_morale((relative_dealt - hit.relative) * balance.combat.morale_scale);
            *report.damage.entry(unit.id).or_default() += damage;
        }
        engagement.rounds += 1;

        let able_sides: BTreeSet<String> = engagement
            .participants
            .iter()
            .filter_map(|p| {
                oob.get(p.unit)
                    .filter(|u| able_to_engage(u, p.initial_rcp, balance))
                    .map(|u| u.side.clone())
            })
            .collect();
        let can_continue = able_sides
            .iter()
            .any(|a| able_sides.iter().any(|b| Sides::hostile(a, b)));
        if !can_continue {
            report.terminated.push(id);
        }
    }
    for id in &report.terminated {
        engagements.terminate(oob, *id);
    }
    report
}

/// Land queued strikes. Counter-battery missions have no lethality model and
/// resolve as a logged no-op.
pub fn resolve_strikes(
    strikes: Vec<Strike>,
    oob: &mut Oob,
    balance: &BalanceConfig,
    pulse_hours: f64,
) -> usize {
    let mut landed = 0;
    for strike in strikes {
        if strike.mission == FireMission::CounterFire {
            tracing::debug!(
                target: "opsim::combat",
                from = %strike.from,
                target_unit = %strike.target,
                "strike.counter_fire_ignored"
            );
            continue;
        }
        let Some(target) = oob.get_mut(strike.target) else {
            continue;
        };
        let damage = strike.rcp * balance.combat.attrition_rate * pulse_hours;
        let hit = target.inflict_damage(damage, balance);
        if strike.mission == FireMission::Sead {
            target.adjust_suppression(hit.relative);
        }
        landed += 1;
        tracing::debug!(
            target: "opsim::combat",
            from = %strike.from,
            target_unit = %strike.target,
            damage,
            "strike.landed"
        );
    }
    landed
}
