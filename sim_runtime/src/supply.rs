//! Typed supply packages over the closed set of supply classes.
//!
//! Subtraction allocates upward: a deficit in a specific class is drawn from its
//! more generic parent (`IIIb -> III -> Unspecified`, everything else ->
//! `Unspecified`), so once a transaction settles only `Unspecified` can be
//! negative.

use std::collections::BTreeMap;
use std::fmt;
use std::ops::{Add, AddAssign, Mul, Sub, SubAssign};
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum SupplyClass {
    I,
    II,
    III,
    #[serde(rename = "IIIb", alias = "III(b)")]
    IIIb,
    IV,
    V,
    VI,
    VII,
    VIII,
    IX,
    X,
    #[serde(rename = "water")]
    Water,
    Unspecified,
}

impl SupplyClass {
    pub const ALL: [SupplyClass; 13] = [
        SupplyClass::I,
        SupplyClass::II,
        SupplyClass::III,
        SupplyClass::IIIb,
        SupplyClass::IV,
        SupplyClass::V,
        SupplyClass::VI,
        SupplyClass::VII,
        SupplyClass::VIII,
        SupplyClass::IX,
        SupplyClass::X,
        SupplyClass::Water,
        SupplyClass::Unspecified,
    ];

    /// Most specific classes first, so deficits cascade in one pass.
    const ALLOCATION_ORDER: [SupplyClass; 13] = [
        SupplyClass::IIIb,
        SupplyClass::I,
        SupplyClass::II,
        SupplyClass::III,
        SupplyClass::IV,
        SupplyClass::V,
        SupplyClass::VI,
        SupplyClass::VII,
        SupplyClass::VIII,
        SupplyClass::IX,
        SupplyClass::X,
        SupplyClass::Water,
        SupplyClass::Unspecified,
    ];

    pub fn index(self) -> usize {
        self as usize
    }

    pub fn parent(self) -> Option<SupplyClass> {
        match self {
            SupplyClass::IIIb => Some(SupplyClass::III),
            SupplyClass::Unspecified => None,
            _ => Some(SupplyClass::Unspecified),
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            SupplyClass::I => "I",
            SupplyClass::II => "II",
            SupplyClass::III => "III",
            SupplyClass::IIIb => "IIIb",
            SupplyClass::IV => "IV",
            SupplyClass::V => "V",
            SupplyClass::VI => "VI",
            SupplyClass::VII => "VII",
            SupplyClass::VIII => "VIII",
            SupplyClass::IX => "IX",
            SupplyClass::X => "X",
            SupplyClass::Water => "water",
            SupplyClass::Unspecified => "Unspecified",
        }
    }
}

impl fmt::Display for SupplyClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("unknown supply class `{0}`")]
pub struct UnknownSupplyClass(pub String);

impl FromStr for SupplyClass {
    type Err = UnknownSupplyClass;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        if trimmed.eq_ignore_ascii_case("III(b)") {
            return Ok(SupplyClass::IIIb);
        }
        SupplyClass::ALL
            .into_iter()
            .find(|class| class.as_str().eq_ignore_ascii_case(trimmed))
            .ok_or_else(|| UnknownSupplyClass(trimmed.to_string()))
    }
}

/// Short tons per supply class.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
#[serde(from = "BTreeMap<SupplyClass, f64>", into = "BTreeMap<SupplyClass, f64>")]
pub struct SupplyPackage {
    amounts: [f64; 13],
}

impl SupplyPackage {
    pub const EMPTY: SupplyPackage = SupplyPackage { amounts: [0.0; 13] };

    pub fn single(class: SupplyClass, amount: f64) -> Self {
        let mut package = Self::EMPTY;
        package.set(class, amount);
        package
    }

    pub fn from_pairs<I: IntoIterator<Item = (SupplyClass, f64)>>(pairs: I) -> Self {
        let mut package = Self::EMPTY;
        for (class, amount) in pairs {
            package.amounts[class.index()] += amount;
        }
        package
    }

    pub fn get(&self, class: SupplyClass) -> f64 {
        self.amounts[class.index()]
    }

    pub fn set(&mut self, class: SupplyClass, amount: f64) {
        self.amounts[class.index()] = amount;
    }

    /// Non-zero entries in class order.
    pub fn iter(&self) -> impl Iterator<Item = (SupplyClass, f64)> + '_ {
        SupplyClass::ALL
            .into_iter()
            .map(|class| (class, self.get(class)))
            .filter(|(_, amount)| *amount != 0.0)
    }

    pub fn total(&self) -> f64 {
        self.amounts.iter().sum()
    }

    pub fn l1(&self) -> f64 {
        self.amounts.iter().map(|v| v.abs()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.amounts.iter().all(|v| v.abs() < 1.0e-12)
    }

    /// Sum of negative entries, as a positive number.
    pub fn deficit(&self) -> f64 {
        self.amounts.iter().filter(|v| **v < 0.0).map(|v| -v).sum()
    }

    pub fn clamped_non_negative(&self) -> Self {
        let mut out = *self;
        for value in out.amounts.iter_mut() {
            *value = value.max(0.0);
        }
        out
    }

    /// Pairwise minimum.
    pub fn min_with(&self, other: &SupplyPackage) -> Self {
        let mut out = *self;
        for (value, other) in out.amounts.iter_mut().zip(other.amounts.iter()) {
            *value = value.min(*other);
        }
        out
    }

    /// Largest scalar `f` in [0, 1] such that `self * f` fits inside `available`.
    pub fn fraction_available(&self, available: &SupplyPackage) -> f64 {
        let mut fraction: f64 = 1.0;
        for class in SupplyClass::ALL {
            let wanted = self.get(class);
            if wanted > 0.0 {
                fraction = fraction.min(available.get(class).max(0.0) / wanted);
            }
        }
        fraction.clamp(0.0, 1.0)
    }

    /// Total over total; 0 when `capacity` is empty.
    pub fn level_of(&self, capacity: &SupplyPackage) -> f64 {
        let cap = capacity.total();
        if cap <= 0.0 {
            0.0
        } else {
            self.total() / cap
        }
    }
}

impl From<BTreeMap<SupplyClass, f64>> for SupplyPackage {
    fn from(map: BTreeMap<SupplyClass, f64>) -> Self {
        SupplyPackage::from_pairs(map)
    }
}

impl From<SupplyPackage> for BTreeMap<SupplyClass, f64> {
    fn from(package: SupplyPackage) -> Self {
        package.iter().collect()
    }
}

impl Add for SupplyPackage {
    type Output = SupplyPackage;

    fn add(mut self, rhs: SupplyPackage) -> SupplyPackage {
        self += rhs;
        self
    }
}

impl AddAssign for SupplyPackage {
    fn add_assign(&mut self, rhs: SupplyPackage) {
        for (value, other) in self.amounts.iter_mut().zip(rhs.amounts.iter()) {
            *value += *other;
        }
    }
}

impl Sub for SupplyPackage {
    type Output = SupplyPackage;

    fn sub(mut self, rhs: SupplyPackage) -> SupplyPackage {
        self -= rhs;
        self
    }
}

impl SubAssign for SupplyPackage {
    fn sub_assign(&mut self, rhs: SupplyPackage) {
        for class in SupplyClass::ALLOCATION_ORDER {
            let index = class.index();
            self.amounts[index] -= rhs.amounts[index];
            if self.amounts[index] < 0.0 {
                if let Some(parent) = class.parent() {
                    let deficit = -self.amounts[index];
                    self.amounts[index] = 0.0;
                    self.amounts[parent.index()] -= deficit;
                }
            }
        }
    }
}

impl Mul<f64> for SupplyPackage {
    type Output = SupplyPackage;

    fn mul(mut self, rhs: f64) -> SupplyPackage {
        for value in self.amounts.iter_mut() {
            *value *= rhs;
        }
        self
    }
}

impl fmt::Display for SupplyPackage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut first = true;
        for (class, amount) in self.iter() {
            if !first {
                f.write_str(", ")?;
            }
            write!(f, "{class}: {amount:.3}")?;
            first = false;
        }
        if first {
            f.write_str("empty")?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pkg(pairs: &[(SupplyClass, f64)]) -> SupplyPackage {
        SupplyPackage::from_pairs(pairs.iter().copied())
    }

    #[test]
    fn deficit_in_fuel_draws_from_bulk_then_unspecified() {
        let store = pkg(&[(SupplyClass::IIIb, 1.0), (SupplyClass::III, 2.0)]);
        let after = store - SupplyPackage::single(SupplyClass::IIIb, 4.0);
        assert_eq!(after.get(SupplyClass::IIIb), 0.0);
        assert_eq!(after.get(SupplyClass::III), 0.0);
        assert!((after.get(SupplyClass::Unspecified) + 1.0).abs() < 1e-12);
    }

    #[test]
    fn deficit_surfaces_only_on_unspecified() {
        let store = pkg(&[(SupplyClass::I, 1.0), (SupplyClass::V, 1.0)]);
        let demand = pkg(&[(SupplyClass::I, 3.0), (SupplyClass::V, 0.5)]);
        let after = store - demand;
        for class in SupplyClass::ALL {
            if class != SupplyClass::Unspecified {
                assert!(after.get(class) >= 0.0, "{class} went negative");
            }
        }
        assert!((after.get(SupplyClass::Unspecified) + 2.0).abs() < 1e-12);
        assert!((after.get(SupplyClass::V) - 0.5).abs() < 1e-12);
    }

    #[test]
    fn add_then_subtract_restores_original() {
        let p = pkg(&[(SupplyClass::I, 1.25), (SupplyClass::IIIb, 3.5), (SupplyClass::Water, 0.75)]);
        let q = pkg(&[(SupplyClass::I, 0.5), (SupplyClass::III, 2.0), (SupplyClass::IX, 1.0)]);
        let r = (p + q) - q;
        for class in SupplyClass::ALL {
            assert!((r.get(class) - p.get(class)).abs() < 1e-9, "{class}");
        }
    }

    #[test]
    fn fraction_available_limits_by_scarcest_class() {
        let request = pkg(&[(SupplyClass::I, 2.0), (SupplyClass::V, 4.0)]);
        let available = pkg(&[(SupplyClass::I, 2.0), (SupplyClass::V, 1.0)]);
        assert!((request.fraction_available(&available) - 0.25).abs() < 1e-12);
    }

    #[test]
    fn serde_uses_sparse_class_map() {
        let p = pkg(&[(SupplyClass::IIIb, 1.5), (SupplyClass::Water, 2.0)]);
        let json = serde_json::to_string(&p).unwrap();
        assert_eq!(json, r#"{"IIIb":1.5,"water":2.0}"#);
        let back: SupplyPackage = serde_json::from_str(r#"{"III(b)":1.5,"water":2.0}"#).unwrap();
        assert_eq!(back, p);
    }

    #[test]
    fn class_names_parse() {
        assert_eq!("iii(b)".parse::<SupplyClass>(), Ok(SupplyClass::IIIb));
        assert_eq!("Water".parse::<SupplyClass>(), Ok(SupplyClass::Water));
        assert!("XI".parse::<SupplyClass>().is_err());
    }
}
