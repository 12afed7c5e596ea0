//! Order of battle: the world's master list of units and the chain of
//! command between them.

use std::collections::{BTreeMap, BTreeSet};

use bevy::prelude::Resource;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::balance_config::BalanceConfig;
use crate::unit::{CommandAndControl, Unit, UnitId};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum OobError {
    #[error("unit {0} already exists")]
    DuplicateUnit(UnitId),
    #[error("unit {0} not found")]
    UnknownUnit(UnitId),
    #[error("no unit named '{0}'")]
    UnknownName(String),
    #[error("placing {child} under {parent} would create a command cycle")]
    CommandCycle { child: UnitId, parent: UnitId },
}

/// Units keyed by id, visited in insertion order.
///
/// A unit can be temporarily taken out while it is stepped; it keeps its slot
/// in the visiting order and must be restored before the phase ends.
#[derive(Resource, Debug, Clone, Default, Serialize, Deserialize)]
pub struct Oob {
    units: BTreeMap<UnitId, Unit>,
    order: Vec<UnitId>,
}

impl Oob {
    pub fn insert(&mut self, unit: Unit) -> Result<UnitId, OobError> {
        let id = unit.id;
        if self.units.contains_key(&id) || self.order.contains(&id) {
            return Err(OobError::DuplicateUnit(id));
        }
        self.order.push(id);
        self.units.insert(id, unit);
        Ok(id)
    }

    pub fn len(&self) -> usize {
        self.units.len()
    }

    pub fn is_empty(&self) -> bool {
        self.units.is_empty()
    }

    pub fn contains(&self, id: UnitId) -> bool {
        self.units.contains_key(&id)
    }

    pub fn get(&self, id: UnitId) -> Option<&Unit> {
        self.units.get(&id)
    }

    pub fn get_mut(&mut self, id: UnitId) -> Option<&mut Unit> {
        self.units.get_mut(&id)
    }

    /// Snapshot of the visiting order.
    pub fn ids(&self) -> Vec<UnitId> {
        self.order.clone()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Unit> {
        self.order.iter().filter_map(|id| self.units.get(id))
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut Unit> {
        let order = &self.order;
        let mut by_id: BTreeMap<UnitId, &mut Unit> =
            self.units.iter_mut().map(|(id, u)| (*id, u)).collect();
        order
            .iter()
            .filter_map(move |id| by_id.remove(id))
            .collect::<Vec<_>>()
            .into_iter()
    }

    pub fn find_by_name(&self, name: &str) -> Option<&Unit> {
        self.iter().find(|u| u.name == name)
    }

    pub fn id_by_name(&self, name: &str) -> Result<UnitId, OobError> {
        self.find_by_name(name)
            .map(|u| u.id)
            .ok_or_else(|| OobError::UnknownName(name.to_string()))
    }

    /// Remove a unit for stepping; put it back with [`Oob::restore`].
    pub fn take(&mut self, id: UnitId) -> Option<Unit> {
        self.units.remove(&id)
    }

    pub fn restore(&mut self, unit: Unit) {
        if !self.order.contains(&unit.id) {
            self.order.push(unit.id);
        }
        self.units.insert(unit.id, unit);
    }

    /// Delete a unit and unlink it from the chain of command. Its
    /// subordinates are left without a parent.
    pub fn remove(&mut self, id: UnitId) -> Option<Unit> {
        let unit = self.units.remove(&id)?;
        self.order.retain(|u| *u != id);
        for parent in [unit.hq, unit.opcon].into_iter().flatten() {
            if let Some(p) = self.units.get_mut(&parent) {
                p.subordinates.retain(|s| *s != id);
            }
        }
        for child in &unit.subordinates {
            if let Some(c) = self.units.get_mut(child) {
                if c.hq == Some(id) {
                    c.hq = None;
                }
                if c.opcon == Some(id) {
                    c.opcon = None;
                }
            }
        }
        Some(unit)
    }

    pub fn view(&self) -> OobView<'_> {
        OobView { oob: self, me: None }
    }

    /// A view in which `me`, currently taken out, is still visible.
    pub fn view_with<'a>(&'a self, me: &'a Unit) -> OobView<'a> {
        OobView { oob: self, me: Some(me) }
    }

    /// Place `child` under `hq`, or detach it with `None`.
    pub fn set_hq(&mut self, child: UnitId, hq: Option<UnitId>) -> Result<(), OobError> {
        self.relink(child, hq, false)
    }

    /// Attach `child` under the operational control of `to`, or end the
    /// attachment with `None`.
    pub fn attach_opcon(&mut self, child: UnitId, to: Option<UnitId>) -> Result<(), OobError> {
        self.relink(child, to, true)
    }

    fn relink(&mut self, child: UnitId, parent: Option<UnitId>, opcon: bool) -> Result<(), OobError> {
        if !self.units.contains_key(&child) {
            return Err(OobError::UnknownUnit(child));
        }
        if let Some(parent) = parent {
            if !self.units.contains_key(&parent) {
                return Err(OobError::UnknownUnit(parent));
            }
            if parent == child || self.view().ancestors(parent).contains(&child) {
                return Err(OobError::CommandCycle { child, parent });
            }
        }
        let previous = {
            let unit = self.units.get_mut(&child).ok_or(OobError::UnknownUnit(child))?;
            let slot = if opcon { &mut unit.opcon } else { &mut unit.hq };
            std::mem::replace(slot, parent)
        };
        if let Some(old) = previous {
            let still_linked = self
                .units
                .get(&child)
                .is_some_and(|u| u.hq == Some(old) || u.opcon == Some(old));
            if !still_linked {
                if let Some(p) = self.units.get_mut(&old) {
                    p.subordinates.retain(|s| *s != child);
                }
            }
        }
        if let Some(parent) = parent {
            if let Some(p) = self.units.get_mut(&parent) {
                if !p.subordinates.contains(&child) {
                    p.subordinates.push(child);
                }
            }
        }
        Ok(())
    }

    /// Units with no commander, in visiting order.
    pub fn roots(&self) -> Vec<UnitId> {
        self.iter()
            .filter(|u| u.commander().is_none())
            .map(|u| u.id)
            .collect()
    }

    /// Check that parents list their children and that no chain loops.
    pub fn validate_links(&self) -> Result<(), OobError> {
        for unit in self.iter() {
            for parent in [unit.hq, unit.opcon].into_iter().flatten() {
                let p = self.get(parent).ok_or(OobError::UnknownUnit(parent))?;
                if !p.subordinates.contains(&unit.id) {
                    return Err(OobError::UnknownUnit(unit.id));
                }
            }
            let mut seen = BTreeSet::from([unit.id]);
            let mut cursor = unit.commander();
            while let Some(id) = cursor {
                if !seen.insert(id) {
                    return Err(OobError::CommandCycle {
                        child: unit.id,
                        parent: id,
                    });
                }
                cursor = self.get(id).and_then(|u| u.commander());
            }
        }
        Ok(())
    }
}

/// Read-only chain-of-command queries over an [`Oob`].
#[derive(Clone, Copy)]
pub struct OobView<'a> {
    oob: &'a Oob,
    me: Option<&'a Unit>,
}

impl<'a> OobView<'a> {
    pub fn get(&self, id: UnitId) -> Option<&'a Unit> {
        match self.me {
            Some(me) if me.id == id => Some(me),
            _ => self.oob.get(id),
        }
    }

    pub fn oob(&self) -> &'a Oob {
        self.oob
    }

    pub fn iter(&self) -> impl Iterator<Item = &'a Unit> + '_ {
        self.oob.order.iter().filter_map(|id| self.get(*id))
    }

    pub fn commander(&self, id: UnitId) -> Option<UnitId> {
        self.get(id).and_then(|u| u.commander())
    }

    /// Commanders from `id` up to the root, nearest first.
    pub fn ancestors(&self, id: UnitId) -> Vec<UnitId> {
        let mut chain = Vec::new();
        let mut cursor = self.commander(id);
        while let Some(next) = cursor {
            if next == id || chain.contains(&next) {
                break;
            }
            chain.push(next);
            cursor = self.commander(next);
        }
        chain
    }

    /// Lowest unit commanding both `a` and `b` (either may be it).
    pub fn common_higher_echelon(&self, a: UnitId, b: UnitId) -> Option<UnitId> {
        let mut up_a = vec![a];
        up_a.extend(self.ancestors(a));
        let mut up_b = vec![b];
        up_b.extend(self.ancestors(b));
        up_a.into_iter().find(|u| up_b.contains(u))
    }

    /// Units on the path from `a` to `b` through the chain of command,
    /// excluding `a` and ending in `b`; `[None]` when unreachable.
    pub fn chain_of_command_to(&self, a: UnitId, b: UnitId) -> Vec<Option<UnitId>> {
        if a == b {
            return vec![Some(b)];
        }
        let Some(common) = self.common_higher_echelon(a, b) else {
            return vec![None];
        };
        let mut path = Vec::new();
        let mut cursor = a;
        while cursor != common {
            match self.commander(cursor) {
                Some(next) => {
                    path.push(Some(next));
                    cursor = next;
                }
                None => return vec![None],
            }
        }
        let mut down = Vec::new();
        let mut cursor = b;
        while cursor != common {
            down.push(Some(cursor));
            match self.commander(cursor) {
                Some(next) => cursor = next,
                None => return vec![None],
            }
        }
        down.reverse();
        path.extend(down);
        path
    }

    /// C3 level of `id`, with the distance to its commander folded in.
    pub fn c3_level(&self, id: UnitId, comm_range_km: f64, balance: &BalanceConfig) -> f64 {
        let Some(unit) = self.get(id) else {
            return 0.0;
        };
        let distance = unit
            .commander()
            .and_then(|c| self.get(c))
            .map(|c| c.point().distance(unit.point()));
        unit.c3_level(distance, comm_range_km, balance)
    }

    /// Product of the C3 levels of `a` and every relay between `a` and `b`.
    /// Zero when there is no chain.
    pub fn comm_level_to(
        &self,
        a: UnitId,
        b: UnitId,
        comm_range_km: f64,
        balance: &BalanceConfig,
    ) -> f64 {
        let chain = self.chain_of_command_to(a, b);
        if chain.first() == Some(&None) {
            return 0.0;
        }
        let mut level = self.c3_level(a, comm_range_km, balance);
        for relay in chain.iter().flatten().filter(|id| **id != b) {
            level *= self.c3_level(*relay, comm_range_km, balance);
        }
        level
    }

    /// Every unit below `id`, depth first.
    pub fn all_subordinates(&self, id: UnitId) -> Vec<UnitId> {
        let mut out = Vec::new();
        let mut stack: Vec<UnitId> = self
            .get(id)
            .map(|u| u.subordinates().iter().rev().copied().collect())
            .unwrap_or_default();
        while let Some(next) = stack.pop() {
            if out.contains(&next) || next == id {
                continue;
            }
            out.push(next);
            if let Some(u) = self.get(next) {
                stack.extend(u.subordinates().iter().rev().copied());
            }
        }
        out
    }
}
