#![allow(dead_code)]

use std::path::PathBuf;

use core_sim::intelligence::{Sensor, Signal};
use core_sim::terrain::{TerrainClass, TerrainMap};
use core_sim::unit::UnitKind;
use core_sim::{Oob, SimDuration, SimWorld, Stance, Unit, UnitId, WorldSetup};
use sim_runtime::{Likelihood, Point, SupplyClass, SupplyPackage};

pub fn fixture_root() -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR"))
        .join("tests")
        .join("fixtures")
}

pub fn open_terrain() -> TerrainMap {
    TerrainMap::uniform(60.0, 60.0, 0.5, TerrainClass::Unrestricted)
}

/// Daylight eyes good to 3 km and a signature that is always visible.
pub fn watchful(mut unit: Unit) -> Unit {
    unit.models.intelligence.sensors.push(Sensor {
        name: "eyes".into(),
        signal: Signal::Visual,
        max_range_km: Some(3.0),
        requires: vec!["light".into(), "LOS".into()],
        degraded_by: vec!["fog".into()],
        enhanced_by: vec!["close".into()],
        fields: vec!["side".into()],
    });
    unit.models
        .intelligence
        .signature
        .insert(Signal::Visual, Likelihood::Certain);
    unit
}

pub fn team_store() -> SupplyPackage {
    SupplyPackage::from_pairs([
        (SupplyClass::I, 1.0),
        (SupplyClass::V, 1.0),
        (SupplyClass::Water, 1.0),
    ])
}

pub fn fire_team(id: u64, name: &str, side: &str, at: Point) -> Unit {
    watchful(
        Unit::new(UnitId(id), name, side)
            .with_echelon("team")
            .with_personnel("rifleman", 4)
            .with_stance(Stance::Deployed)
            .with_supply(team_store(), 1.0)
            .at(at, 0.1),
    )
}

pub fn mech_battalion(id: u64, name: &str, side: &str, at: Point) -> Unit {
    let capacity = SupplyPackage::from_pairs([
        (SupplyClass::I, 20.0),
        (SupplyClass::IIIb, 60.0),
        (SupplyClass::V, 60.0),
        (SupplyClass::IX, 5.0),
        (SupplyClass::Water, 40.0),
    ]);
    let mut unit = watchful(
        Unit::new(UnitId(id), name, side)
            .with_echelon("battalion")
            .with_personnel("rifleman", 300)
            .with_vehicles("apc", 40)
            .with_stance(Stance::Offense)
            .with_supply(capacity, 1.0)
            .at(at, 1.5),
    );
    unit.models.movement.mode = "tracked".into();
    unit.staff.sop.weapons_free = true;
    unit
}

pub fn css_company(id: u64, name: &str, side: &str, at: Point) -> Unit {
    let store = SupplyPackage::from_pairs([
        (SupplyClass::I, 40.0),
        (SupplyClass::V, 40.0),
        (SupplyClass::IIIb, 40.0),
        (SupplyClass::Water, 40.0),
    ]);
    Unit::new(UnitId(id), name, side)
        .with_kind(UnitKind::Css)
        .with_echelon("company")
        .with_personnel("crewman", 20)
        .with_vehicles("cargo_truck", 10)
        .with_stance(Stance::Support)
        .with_supply(store, 1.0)
        .at(at, 0.5)
}

pub fn world(units: Vec<Unit>) -> SimWorld {
    let mut oob = Oob::default();
    for unit in units {
        oob.insert(unit).expect("unique unit ids");
    }
    SimWorld::new(WorldSetup::new("fixture", open_terrain()), oob)
}

/// Simulate `pulses` pulses one at a time, calling `after` between them.
pub fn pulse_by_pulse(world: &mut SimWorld, pulses: usize, mut after: impl FnMut(&SimWorld)) {
    let pulse = world.clock().pulse;
    for _ in 0..pulses {
        world.simulate(pulse);
        after(world);
    }
}

pub fn hours(h: f64) -> SimDuration {
    SimDuration::from_hours(h)
}

pub fn minutes(m: i64) -> SimDuration {
    SimDuration::from_minutes(m)
}

pub fn unit<'a>(world: &'a SimWorld, name: &str) -> &'a Unit {
    world
        .unit(name)
        .unwrap_or_else(|| panic!("unit {name} not in the order of battle"))
}
