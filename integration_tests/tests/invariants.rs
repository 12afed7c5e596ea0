mod common;

use anyhow::{ensure, Result};
use common::*;
use core_sim::balance_config::BalanceConfig;
use core_sim::pathfinding::plan_path;
use core_sim::sim_config::PlannerConfig;
use core_sim::terrain::{TerrainClass, TerrainMap};
use core_sim::{OrderSpec, SimWorld, UnitId};
use rand::rngs::SmallRng;
use rand::{Rng, SeedableRng};
use sim_runtime::{rubberband, Point, Polygon, SupplyClass, SupplyPackage};

/// Two battalions in contact, a starving team with its support company and
/// a platoon HQ, with one unit sent off across the map.
fn busy_world() -> SimWorld {
    let mut forward = fire_team(4, "FWD TEAM", "blue", Point::new(12.0, 40.0));
    forward.staff.sop.supply.min = 0.3;
    forward.staff.sop.css_unit = Some(UnitId(5));
    forward.set_supply(team_store() * 0.1);
    let mut world = world(vec![
        fire_team(1, "1 PLT", "blue", Point::new(20.0, 20.0)).with_echelon("platoon"),
        mech_battalion(2, "1-1 MECH", "blue", Point::new(25.0, 25.0)),
        mech_battalion(3, "2-7 MECH", "red", Point::new(26.0, 25.0)),
        forward,
        css_company(5, "FSC", "blue", Point::new(30.0, 40.0)),
        fire_team(6, "SCOUT", "blue", Point::new(5.0, 5.0)),
    ]);
    world.set_hq(UnitId(4), Some(UnitId(1))).unwrap();
    world.set_hq(UnitId(6), Some(UnitId(1))).unwrap();
    world.set_hq(UnitId(1), Some(UnitId(2))).unwrap();

    let order: OrderSpec = serde_json::from_value(serde_json::json!({
        "mission": "Screen the eastern flank",
        "tasks": [
            { "type": "relocate", "to": "xy:50,5", "stance": "security" },
            { "type": "redeploy", "stance": "hasty_defense" }
        ]
    }))
    .unwrap();
    world.issue_order(UnitId(6), &order).unwrap();
    world
}

fn check_world(world: &SimWorld) -> Result<()> {
    let oob = world.oob();
    oob.validate_links()?;
    let view = oob.view();
    let max_sensor_km = 3.0;

    for unit in oob.iter() {
        for class in SupplyClass::ALL {
            if class == SupplyClass::Unspecified {
                continue;
            }
            let amount = unit.supply().get(class);
            ensure!(amount >= -1e-9, "{} holds {amount} of {class}", unit.name);
        }

        if let Some(hq) = unit.hq() {
            let parent = oob.get(hq).expect("validated link");
            ensure!(
                parent.subordinates().contains(&unit.id),
                "{} is missing from {}'s subordinates",
                unit.name,
                parent.name
            );
        }

        let chain = view.ancestors(unit.id);
        ensure!(chain.len() < oob.len(), "{} has a looping chain", unit.name);
        ensure!(!chain.contains(&unit.id), "{} commands itself", unit.name);

        for contact in unit.contacts.values().filter(|c| c.is_direct()) {
            let footprint = contact.footprint();
            ensure!(footprint.is_some(), "{} holds a direct contact without a footprint", unit.name);
            if contact.last_seen == Some(world.now()) {
                let fix = footprint.expect("checked");
                let reach = max_sensor_km + fix.radius() + unit.footprint().radius() + 1e-6;
                let gap = unit.position().point().distance(fix.centroid());
                ensure!(gap <= reach, "{} saw a contact {gap} km away", unit.name);
            }
        }

        if let Some(opord) = &unit.staff.opord {
            let execution = &opord.execution;
            for task in execution.maneuver_tasks.iter().take(execution.cursor) {
                ensure!(
                    task.is_finished(),
                    "{} has an unfinished task before its cursor",
                    unit.name
                );
            }
            if let Some(current) = execution.maneuver_tasks.get(execution.cursor) {
                ensure!(!current.is_finished(), "{}'s cursor rests on a finished task", unit.name);
            }
        }
    }
    Ok(())
}

#[test]
fn world_invariants_hold_after_every_pulse() -> Result<()> {
    let mut world = busy_world();
    check_world(&world)?;
    let pulse = world.clock().pulse;
    for _ in 0..48 {
        world.simulate(pulse);
        check_world(&world)?;
    }
    Ok(())
}

#[test]
fn planning_twice_gives_paths_of_equal_cost() {
    let mut terrain = TerrainMap::uniform(30.0, 30.0, 0.5, TerrainClass::Unrestricted);
    terrain.paint(
        &Polygon::rectangle(Point::new(15.0, 15.0), 4.0, 20.0),
        TerrainClass::SeverelyRestricted,
    );
    terrain.paint(&Polygon::rectangle(Point::new(15.0, 27.0), 2.0, 2.0), TerrainClass::Water);
    let friction = BalanceConfig::builtin().friction("wheeled");
    let config = PlannerConfig::default();

    for (from, to) in [
        (Point::new(2.0, 15.0), Point::new(28.0, 15.0)),
        (Point::new(3.0, 3.0), Point::new(27.0, 28.0)),
    ] {
        let first = plan_path(&terrain, &friction, from, to, &config);
        let second = plan_path(&terrain, &friction, from, to, &config);
        let length = |path: &[Point]| terrain.path_cost(path, &friction, config.sample_km);
        assert!((length(&first.path) - length(&second.path)).abs() < 1e-9);
        assert_eq!(first.path.first(), Some(&from));
        assert_eq!(first.path.last(), Some(&to));
    }
}

fn random_package(rng: &mut SmallRng) -> SupplyPackage {
    SupplyPackage::from_pairs(
        SupplyClass::ALL
            .into_iter()
            .filter_map(|class| rng.gen_bool(0.6).then(|| (class, rng.gen_range(0.0..50.0)))),
    )
}

#[test]
fn adding_then_subtracting_a_package_is_a_no_op() {
    let mut rng = SmallRng::seed_from_u64(0x5eed);
    for _ in 0..500 {
        let p = random_package(&mut rng);
        let q = random_package(&mut rng);
        let back = (p + q) - q;
        for class in SupplyClass::ALL {
            let tolerance = if class == SupplyClass::Unspecified { 1e-6 } else { 1e-9 };
            assert!(
                (back.get(class) - p.get(class)).abs() <= tolerance,
                "{class}: {} != {}",
                back.get(class),
                p.get(class)
            );
        }
    }
}

#[test]
fn rubberband_hull_contains_every_input_point() {
    let mut rng = SmallRng::seed_from_u64(17);
    for round in 0..200 {
        let count = rng.gen_range(1..40);
        let points: Vec<Point> = (0..count)
            .map(|_| Point::new(rng.gen_range(-20.0..20.0), rng.gen_range(-20.0..20.0)))
            .collect();
        let hull = rubberband(&points);
        for p in &points {
            assert!(hull.point_inside(*p), "round {round}: {p:?} outside its hull");
        }
    }
}
