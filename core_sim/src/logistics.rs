//! Consumption, projection and transfer accounting on top of
//! [`SupplyPackage`] arithmetic.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use sim_runtime::SupplyPackage;

use crate::balance_config::BalanceConfig;
use crate::unit::{Unit, UnitKind};

/// Activity code used when a unit has nothing else to do.
pub const IDLE: &str = "idle";

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct LogisticsModel {
    /// Unit-level consumption per hour by activity code, on top of the kits.
    pub consumption: BTreeMap<String, SupplyPackage>,
    /// Whether this unit sources and dispatches convoys.
    pub css: bool,
}

/// Consumption over `hours` for `n` copies of `model` plus, when given, every
/// kit of `unit`.
pub fn supply_expenditure<S: AsRef<str>>(
    n: f64,
    codes: &[S],
    hours: f64,
    model: &LogisticsModel,
    unit: Option<&Unit>,
    balance: &BalanceConfig,
) -> SupplyPackage {
    let mut total = SupplyPackage::EMPTY;
    for code in codes {
        let code = code.as_ref();
        if let Some(rate) = model.consumption.get(code) {
            total += *rate * (hours * n);
        }
        let Some(unit) = unit else { continue };
        for kit in unit.kits() {
            let rate = balance
                .kit(&kit.template)
                .and_then(|template| template.consumption.get(code));
            if let Some(rate) = rate {
                total += *rate * (kit.current * hours * n);
            }
        }
    }
    total
}

/// Capability interface of a unit that holds and spends supply.
pub trait Logistician {
    /// Consumption for the listed activity codes over `hours`.
    fn expenditure<S: AsRef<str>>(&self, codes: &[S], hours: f64, balance: &BalanceConfig)
        -> SupplyPackage;

    /// Sum of expenditures over a map of activity code to hours.
    fn project_supply(&self, activities: &BTreeMap<String, f64>, balance: &BalanceConfig)
        -> SupplyPackage;

    /// Short tons the unit's kits can carry.
    fn freight_lift(&self, balance: &BalanceConfig) -> f64;

    fn is_css(&self) -> bool;
}

impl Logistician for Unit {
    fn expenditure<S: AsRef<str>>(
        &self,
        codes: &[S],
        hours: f64,
        balance: &BalanceConfig,
    ) -> SupplyPackage {
        supply_expenditure(1.0, codes, hours, &self.models.logistics, Some(self), balance)
    }

    fn project_supply(
        &self,
        activities: &BTreeMap<String, f64>,
        balance: &BalanceConfig,
    ) -> SupplyPackage {
        activities
            .iter()
            .fold(SupplyPackage::EMPTY, |acc, (code, hours)| {
                acc + self.expenditure(&[code.as_str()], *hours, balance)
            })
    }

    fn freight_lift(&self, balance: &BalanceConfig) -> f64 {
        self.kits()
            .filter_map(|kit| balance.kit(&kit.template).map(|t| t.freight_lift * kit.current))
            .sum()
    }

    fn is_css(&self) -> bool {
        self.models.logistics.css || self.kind == UnitKind::Css
    }
}

/// Largest fraction of `commodity` that `store` can release after holding back
/// `overhead`, limited by `lift` short tons of freight.
pub fn validate_request(
    commodity: &SupplyPackage,
    store: &SupplyPackage,
    overhead: &SupplyPackage,
    lift: Option<f64>,
) -> f64 {
    let available = (*store - *overhead).clamped_non_negative();
    let mut fraction = commodity.fraction_available(&available);
    if let Some(lift) = lift {
        let wanted = commodity.total();
        if wanted > 0.0 {
            fraction = fraction.min((lift / wanted).max(0.0));
        }
    }
    fraction.clamp(0.0, 1.0)
}

/// `(daily needs of the supported units × 2 × transit days) / daily freight`.
pub fn compute_resupply_burden(
    supported: &[&Unit],
    transit_hours: f64,
    daily_freight: f64,
    balance: &BalanceConfig,
) -> f64 {
    if daily_freight <= 0.0 {
        return if supported.is_empty() { 0.0 } else { f64::INFINITY };
    }
    let daily_needs: f64 = supported
        .iter()
        .map(|unit| unit.expenditure(&[IDLE], 24.0, balance).total())
        .sum();
    daily_needs * 2.0 * (transit_hours / 24.0) / daily_freight
}

/// Top the store up to `max_level` of capacity.
pub fn replenishment_for(unit: &Unit, max_level: f64) -> SupplyPackage {
    (unit.capacity * max_level - *unit.supply()).clamped_non_negative()
}

/// Split a commodity into chunks of at most `chunk` short tons.
pub fn split_commodity(commodity: &SupplyPackage, chunk: f64) -> Vec<SupplyPackage> {
    let total = commodity.total();
    if chunk <= 0.0 || total <= chunk {
        return vec![*commodity];
    }
    let pieces = (total / chunk).ceil() as usize;
    let share = 1.0 / pieces as f64;
    (0..pieces).map(|_| *commodity * share).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::unit::UnitId;
    use sim_runtime::SupplyClass;

    fn team() -> Unit {
        Unit::new(UnitId(1), "team", "blue").with_personnel("rifleman", 4)
    }

    #[test]
    fn expenditure_scales_with_kits_and_hours() {
        let balance = BalanceConfig::builtin();
        let spent = team().expenditure(&[IDLE], 2.0, &balance);
        assert!((spent.get(SupplyClass::I) - 0.0015 * 2.0 * 4.0).abs() < 1e-12);
        assert!((spent.get(SupplyClass::Water) - 0.003 * 2.0 * 4.0).abs() < 1e-12);
    }

    #[test]
    fn model_rates_add_to_kit_rates() {
        let balance = BalanceConfig::builtin();
        let mut unit = team();
        unit.models.logistics.consumption.insert(
            "transit".into(),
            SupplyPackage::single(SupplyClass::IIIb, 1.0),
        );
        let spent = supply_expenditure(2.0, &["transit"], 0.5, &unit.models.logistics, Some(&unit), &balance);
        assert!((spent.get(SupplyClass::IIIb) - 1.0).abs() < 1e-12);
        assert!((spent.get(SupplyClass::I) - 0.002 * 4.0).abs() < 1e-12);
    }

    #[test]
    fn projection_sums_activities() {
        let balance = BalanceConfig::builtin();
        let unit = team();
        let plan = BTreeMap::from([("idle".to_string(), 1.0), ("transit".to_string(), 1.0)]);
        let projected = unit.project_supply(&plan, &balance);
        let expected = unit.expenditure(&["idle", "transit"], 1.0, &balance);
        assert!((projected.total() - expected.total()).abs() < 1e-12);
    }

    #[test]
    fn validation_respects_overhead_and_lift() {
        let want = SupplyPackage::single(SupplyClass::I, 10.0);
        let store = SupplyPackage::single(SupplyClass::I, 8.0);
        let overhead = SupplyPackage::single(SupplyClass::I, 3.0);
        assert!((validate_request(&want, &store, &overhead, None) - 0.5).abs() < 1e-12);
        assert!((validate_request(&want, &store, &overhead, Some(2.0)) - 0.2).abs() < 1e-12);
    }

    #[test]
    fn burden_grows_with_transit_time() {
        let balance = BalanceConfig::builtin();
        let unit = team();
        let near = compute_resupply_burden(&[&unit], 1.0, 1.0, &balance);
        let far = compute_resupply_burden(&[&unit], 12.0, 1.0, &balance);
        assert!(far > near && near > 0.0);
        assert_eq!(compute_resupply_burden(&[], 1.0, 0.0, &balance), 0.0);
    }

    #[test]
    fn commodity_splits_into_equal_chunks() {
        let commodity = SupplyPackage::from_pairs([(SupplyClass::I, 6.0), (SupplyClass::V, 4.0)]);
        let chunks = split_commodity(&commodity, 4.0);
        assert_eq!(chunks.len(), 3);
        let total: f64 = chunks.iter().map(|c| c.total()).sum();
        assert!((total - 10.0).abs() < 1e-12);
    }
}
