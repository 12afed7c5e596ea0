mod common;

use common::*;
use core_sim::{BalanceConfig, SimWorld, SimulationConfig};
use sim_runtime::Point;

fn open_fixture() -> SimWorld {
    SimWorld::open(
        &fixture_root().join("scenarios"),
        "two_teams",
        SimulationConfig::builtin(),
        BalanceConfig::builtin(),
    )
    .expect("fixture scenario loads")
}

fn mixed_world() -> SimWorld {
    let mut forward = fire_team(3, "FWD TEAM", "blue", Point::new(12.0, 40.0));
    forward.staff.sop.supply.min = 0.3;
    forward.staff.sop.css_unit = Some(core_sim::UnitId(4));
    forward.set_supply(team_store() * 0.25);
    world(vec![
        mech_battalion(1, "1-1 MECH", "blue", Point::new(25.0, 25.0)),
        mech_battalion(2, "2-7 MECH", "red", Point::new(26.0, 25.0)),
        forward,
        css_company(4, "FSC", "blue", Point::new(30.0, 40.0)),
    ])
}

#[test]
fn identical_worlds_hash_identically_every_pulse() {
    let mut a = mixed_world();
    let mut b = mixed_world();
    assert_eq!(a.state_hash().unwrap(), b.state_hash().unwrap());

    let pulse = a.clock().pulse;
    for n in 0..36 {
        a.simulate(pulse);
        b.simulate(pulse);
        assert_eq!(
            a.state_hash().unwrap(),
            b.state_hash().unwrap(),
            "worlds diverged at pulse {}",
            n + 1
        );
    }
}

#[test]
fn splitting_an_interval_does_not_change_the_outcome() {
    let mut whole = mixed_world();
    let mut split = mixed_world();

    whole.simulate(hours(3.0));
    split.simulate(minutes(25));
    split.simulate(minutes(95));
    split.simulate(minutes(60));

    assert_eq!(whole.now(), split.now());
    assert_eq!(whole.state_hash().unwrap(), split.state_hash().unwrap());
}

#[test]
fn fixture_scenario_runs_its_execute_blocks() {
    let world = open_fixture();
    assert_eq!(world.name(), "two_teams");
    assert_eq!(world.seed(), 4242);
    assert_eq!(world.clock().pulse_count, 3);

    let a_team = unit(&world, "A TEAM");
    assert!(a_team.staff.opord.is_some(), "initial order was not processed");
    let b_team = unit(&world, "B TEAM");
    assert_eq!(b_team.staff.inbox.len(), 2, "order and codeword wait for the next staffwork");
    assert!(unit(&world, "RED TEAM").staff.inbox.is_empty());

    let platoon = world.oob().id_by_name("1 PLT").unwrap();
    assert_eq!(a_team.hq(), Some(platoon));
}

#[test]
fn fixture_scenario_replays_identically() {
    let mut a = open_fixture();
    let mut b = open_fixture();
    a.simulate(hours(4.0));
    b.simulate(hours(4.0));
    assert_eq!(a.state_hash().unwrap(), b.state_hash().unwrap());
}

#[test]
fn resumed_world_continues_like_the_original() {
    let dir = std::env::temp_dir().join(format!("opsim-determinism-{}", std::process::id()));
    let _ = std::fs::remove_dir_all(&dir);

    let mut original = mixed_world();
    original.simulate(hours(1.0));
    original.save(&dir).unwrap();
    let mut resumed =
        SimWorld::resume(&dir, SimulationConfig::builtin(), BalanceConfig::builtin()).unwrap();
    assert_eq!(original.state_hash().unwrap(), resumed.state_hash().unwrap());

    original.simulate(hours(2.0));
    resumed.simulate(hours(2.0));
    assert_eq!(original.now(), resumed.now());
    assert_eq!(original.state_hash().unwrap(), resumed.state_hash().unwrap());

    let _ = std::fs::remove_dir_all(&dir);
}
