//! Side effects collected while units are stepped, applied once the pass over
//! the order of battle is finished.

use serde::{Deserialize, Serialize};
use sim_runtime::SupplyPackage;

use crate::balance_config::BalanceConfig;
use crate::combat::{EngagementRequest, Engagements, Strike};
use crate::messages::{self, Envelope, Message, Outgoing, Recipient};
use crate::oob::Oob;
use crate::opord::Opord;
use crate::resources::{IdAllocator, SimTime};
use crate::unit::{Unit, UnitId};

/// A unit created mid-pulse, e.g. a convoy or a LOGPAC.
#[derive(Debug, Clone)]
pub struct Spawn {
    pub unit: Unit,
    pub hq: Option<UnitId>,
    /// Hand-delivered into the new unit's inbox.
    pub opord: Option<Opord>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Transfer {
    pub from: UnitId,
    pub to: UnitId,
    pub package: SupplyPackage,
}

/// Running totals folded into the pulse metrics.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EffectCounters {
    pub logpacs_spawned: u64,
    pub logpacs_absorbed: u64,
    pub convoys_dispatched: u64,
    pub messages_delivered: u64,
    pub messages_suppressed: u64,
}

impl EffectCounters {
    pub fn absorb(&mut self, other: EffectCounters) {
        self.logpacs_spawned += other.logpacs_spawned;
        self.logpacs_absorbed += other.logpacs_absorbed;
        self.convoys_dispatched += other.convoys_dispatched;
        self.messages_delivered += other.messages_delivered;
        self.messages_suppressed += other.messages_suppressed;
    }
}

#[derive(Debug, Default)]
pub struct PulseEffects {
    pub outbox: Vec<Outgoing>,
    pub spawns: Vec<Spawn>,
    pub transfers: Vec<Transfer>,
    pub deletions: Vec<UnitId>,
    pub engagement_requests: Vec<(UnitId, UnitId)>,
    pub strikes: Vec<Strike>,
    pub counters: EffectCounters,
}

impl PulseEffects {
    pub fn send(&mut self, from: UnitId, to: UnitId, message: Message) {
        self.outbox.push(Outgoing::to_unit(from, to, message));
    }

    pub fn broadcast(&mut self, from: Option<UnitId>, side: &str, message: Message) {
        self.outbox.push(Outgoing {
            sender: from,
            recipient: Recipient::Side(side.to_string()),
            message,
        });
    }
}

/// World state the effects land in.
pub struct EffectSinks<'a> {
    pub oob: &'a mut Oob,
    pub engagements: &'a mut Engagements,
    pub strikes: &'a mut Vec<Strike>,
    pub ids: &'a mut IdAllocator,
    pub balance: &'a BalanceConfig,
    pub now: SimTime,
    pub comm_range_km: f64,
    pub log_tail: usize,
}

/// Apply effects in a fixed order: spawns, transfers, deletions, engagement
/// requests, strikes, then message delivery. Returns the counters.
pub fn apply_effects(effects: PulseEffects, sinks: EffectSinks<'_>) -> EffectCounters {
    let PulseEffects {
        outbox,
        spawns,
        transfers,
        deletions,
        engagement_requests,
        strikes,
        counters,
    } = effects;
    let now = sinks.now;

    for spawn in spawns {
        let mut unit = spawn.unit;
        unit.log.set_tail_limit(sinks.log_tail);
        if let Some(opord) = spawn.opord {
            unit.staff.inbox.push_back(Envelope {
                id: sinks.ids.message(),
                sender: None,
                recipient: unit.id,
                sent: now,
                c3_level: 1.0,
                attempts: 0,
                message: Message::Opord(Box::new(opord)),
            });
        }
        let id = unit.id;
        let name = unit.name.clone();
        if let Err(err) = sinks.oob.insert(unit) {
            tracing::warn!(target: "opsim::pulse", unit = %id, error = %err, "unit.spawn_failed");
            continue;
        }
        if let Err(err) = sinks.oob.set_hq(id, spawn.hq) {
            tracing::warn!(target: "opsim::pulse", unit = %id, error = %err, "unit.link_failed");
        }
        tracing::debug!(target: "opsim::pulse", unit = %id, name = %name, "unit.spawned");
    }

    for transfer in transfers {
        let available = match sinks.oob.get(transfer.from) {
            Some(from) => from.supply().clamped_non_negative(),
            None => continue,
        };
        if !sinks.oob.contains(transfer.to) {
            continue;
        }
        let package = transfer.package.clamped_non_negative().min_with(&available);
        if let Some(from) = sinks.oob.get_mut(transfer.from) {
            from.expend_supply(package);
        }
        if let Some(to) = sinks.oob.get_mut(transfer.to) {
            to.receive_supply(package);
        }
        tracing::debug!(
            target: "opsim::logistics",
            from = %transfer.from,
            to = %transfer.to,
            tons = package.total(),
            "supply.transferred"
        );
    }

    for id in deletions {
        if let Some(unit) = sinks.oob.get_mut(id) {
            unit.delete_me = true;
        }
    }

    for (a, b) in engagement_requests {
        let outcome = sinks
            .engagements
            .request(sinks.oob, a, b, now, sinks.ids, sinks.balance);
        if outcome == EngagementRequest::Rejected {
            tracing::debug!(target: "opsim::combat", a = %a, b = %b, "engagement.rejected");
        }
    }

    sinks.strikes.extend(strikes);

    let delivered = messages::deliver(
        outbox,
        sinks.oob,
        now,
        sinks.ids,
        sinks.comm_range_km,
        sinks.balance,
    );
    tracing::trace!(target: "opsim::staff", queued = delivered, "messages.queued");
    counters
}

#[cfg(test)]
mod tests {
    use super::*;
    use sim_runtime::{Point, SupplyClass};

    fn sinks<'a>(
        oob: &'a mut Oob,
        engagements: &'a mut Engagements,
        strikes: &'a mut Vec<Strike>,
        ids: &'a mut IdAllocator,
        balance: &'a BalanceConfig,
    ) -> EffectSinks<'a> {
        EffectSinks {
            oob,
            engagements,
            strikes,
            ids,
            balance,
            now: SimTime(600),
            comm_range_km: 30.0,
            log_tail: 8,
        }
    }

    #[test]
    fn transfers_are_clamped_to_the_source_store() {
        let balance = BalanceConfig::builtin();
        let cap = SupplyPackage::single(SupplyClass::I, 10.0);
        let mut oob = Oob::default();
        oob.insert(Unit::new(UnitId(1), "css", "blue").with_supply(cap, 0.4)).unwrap();
        oob.insert(Unit::new(UnitId(2), "line", "blue").with_supply(cap, 0.0)).unwrap();
        let mut effects = PulseEffects::default();
        effects.transfers.push(Transfer {
            from: UnitId(1),
            to: UnitId(2),
            package: SupplyPackage::single(SupplyClass::I, 6.0),
        });
        let (mut engagements, mut strikes, mut ids) = (Engagements::default(), Vec::new(), IdAllocator::default());
        apply_effects(effects, sinks(&mut oob, &mut engagements, &mut strikes, &mut ids, &balance));
        assert_eq!(oob.get(UnitId(1)).unwrap().supply().get(SupplyClass::I), 0.0);
        assert_eq!(oob.get(UnitId(2)).unwrap().supply().get(SupplyClass::I), 4.0);
    }

    #[test]
    fn spawned_units_are_linked_and_receive_their_order() {
        let balance = BalanceConfig::builtin();
        let mut oob = Oob::default();
        oob.insert(Unit::new(UnitId(1), "css", "blue")).unwrap();
        let mut effects = PulseEffects::default();
        effects.spawns.push(Spawn {
            unit: Unit::new(UnitId(5), "convoy", "blue").at(Point::new(1.0, 1.0), 0.1),
            hq: Some(UnitId(1)),
            opord: Some(Opord::new(Vec::new(), SimTime(600))),
        });
        effects.deletions.push(UnitId(1));
        let (mut engagements, mut strikes, mut ids) = (Engagements::default(), Vec::new(), IdAllocator::default());
        apply_effects(effects, sinks(&mut oob, &mut engagements, &mut strikes, &mut ids, &balance));
        let convoy = oob.get(UnitId(5)).unwrap();
        assert_eq!(convoy.hq(), Some(UnitId(1)));
        assert_eq!(convoy.staff.inbox.len(), 1);
        assert_eq!(convoy.staff.inbox[0].c3_level, 1.0);
        assert!(oob.get(UnitId(1)).unwrap().subordinates().contains(&UnitId(5)));
        assert!(oob.get(UnitId(1)).unwrap().delete_me);
    }
}
