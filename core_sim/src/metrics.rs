use bevy::prelude::*;
use serde::{Deserialize, Serialize};

use crate::combat::Engagements;
use crate::effects::EffectCounters;
use crate::oob::Oob;
use crate::pathfinding::PathCache;
use crate::resources::SimClock;

/// Per-pulse gauges plus running totals, refreshed in the WriteLogs phase.
#[derive(Resource, Default, Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PulseMetrics {
    pub pulse: u64,
    pub units: usize,
    pub active_engagements: usize,
    pub direct_contacts: usize,
    /// Short tons held across the order of battle, deficits excluded.
    pub total_supply: f64,
    pub counters: EffectCounters,
    pub path_cache_hits: u64,
    pub path_cache_misses: u64,
}

pub fn collect_metrics(
    metrics: &mut PulseMetrics,
    clock: &SimClock,
    oob: &Oob,
    engagements: &Engagements,
    paths: &PathCache,
) {
    metrics.pulse = clock.pulse_count;
    let mut units = 0;
    let mut direct = 0;
    let mut supply = 0.0;
    for unit in oob.iter().filter(|u| !u.delete_me) {
        units += 1;
        direct += unit.contacts.values().filter(|c| c.is_direct()).count();
        supply += unit.supply().clamped_non_negative().total();
    }
    metrics.units = units;
    metrics.direct_contacts = direct;
    metrics.total_supply = supply;
    metrics.active_engagements = engagements.len();
    metrics.path_cache_hits = paths.hits();
    metrics.path_cache_misses = paths.misses();
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::intelligence::{Contact, ContactStatus};
    use crate::unit::{Unit, UnitId};
    use sim_runtime::{SupplyClass, SupplyPackage};

    #[test]
    fn gauges_skip_units_marked_for_deletion() {
        let mut oob = Oob::default();
        let cap = SupplyPackage::single(SupplyClass::V, 4.0);
        let mut seen = Unit::new(UnitId(1), "a", "blue").with_supply(cap, 0.5);
        let mut contact = Contact::new(UnitId(2), "red:b");
        contact.status = ContactStatus::Direct;
        seen.contacts.insert(contact.key.clone(), contact);
        oob.insert(seen).unwrap();
        let mut gone = Unit::new(UnitId(2), "b", "red").with_supply(cap, 1.0);
        gone.delete_me = true;
        oob.insert(gone).unwrap();

        let mut clock = SimClock::default();
        clock.pulse_count = 3;
        let mut metrics = PulseMetrics::default();
        metrics.counters.convoys_dispatched = 2;
        collect_metrics(&mut metrics, &clock, &oob, &Engagements::default(), &PathCache::default());
        assert_eq!(metrics.pulse, 3);
        assert_eq!(metrics.units, 1);
        assert_eq!(metrics.direct_contacts, 1);
        assert_eq!(metrics.total_supply, 2.0);
        assert_eq!(metrics.counters.convoys_dispatched, 2);
    }
}
