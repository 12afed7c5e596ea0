mod common;

use std::collections::BTreeSet;

use common::*;
use core_sim::combat::Combatant;
use core_sim::tasks::TaskState;
use core_sim::unit::UnitKind;
use core_sim::{BalanceConfig, OrderSpec, Stance, TaskSpec, UnitId};
use sim_runtime::{Point, SupplyClass, SupplyPackage};

fn rate(balance: &BalanceConfig, kit: &str, code: &str) -> SupplyPackage {
    *balance
        .kit(kit)
        .and_then(|k| k.consumption.get(code))
        .expect("kit rate in builtin balance")
}

#[test]
fn two_fire_teams_out_of_range_only_spend_idle_supply() {
    let mut world = world(vec![
        fire_team(1, "A TEAM", "blue", Point::new(10.0, 10.0)),
        fire_team(2, "B TEAM", "blue", Point::new(50.0, 10.0)),
    ]);
    let balance = BalanceConfig::builtin();
    let idle = rate(&balance, "rifleman", "idle");

    world.simulate(hours(2.0));

    assert!(world.engagements().is_empty());
    for name in ["A TEAM", "B TEAM"] {
        let team = unit(&world, name);
        assert!(team.contacts.is_empty(), "{name} recorded a contact");
        assert!(team.ground_engagements.is_empty());
        for class in [SupplyClass::I, SupplyClass::Water] {
            let spent = team_store().get(class) - team.supply().get(class);
            let expected = idle.get(class) * 2.0 * 4.0;
            assert!((spent - expected).abs() < 1e-9, "{name} {class}: spent {spent}, expected {expected}");
        }
    }
}

fn redeploying_team(world_units: &mut Vec<core_sim::Unit>) {
    world_units.push(
        fire_team(1, "A TEAM", "blue", Point::new(10.0, 10.0)).with_stance(Stance::DeliberateDefense),
    );
}

fn transit_order() -> OrderSpec {
    OrderSpec::with_tasks([TaskSpec::Redeploy {
        stance: Stance::Transit,
    }])
}

#[test]
fn redeploy_finishes_in_the_new_stance() {
    let mut units = Vec::new();
    redeploying_team(&mut units);
    let mut world = world(units);
    world.issue_order(UnitId(1), &transit_order()).unwrap();

    world.simulate(hours(2.0));

    let team = unit(&world, "A TEAM");
    assert_eq!(team.stance(), Stance::Transit);
    assert_eq!(team.readiness(), 0.0);
    let opord = team.staff.opord.as_ref().expect("order kept after completion");
    let task = &opord.tasks()[0];
    assert_eq!(task.state, TaskState::Done);
    assert!(task.end.is_some());
    assert!(opord.is_complete());
}

#[test]
fn cancelled_redeploy_keeps_the_old_stance() {
    let mut units = Vec::new();
    redeploying_team(&mut units);
    let mut world = world(units);
    world.issue_order(UnitId(1), &transit_order()).unwrap();

    // Processed at the first Staffwork, stepped from the second pulse on.
    world.simulate(minutes(40));
    let task_id = {
        let opord = unit(&world, "A TEAM").staff.opord.as_ref().unwrap();
        let task = &opord.tasks()[0];
        assert_eq!(task.state, TaskState::Running);
        task.id
    };
    world.cancel_task(UnitId(1), task_id).unwrap();
    world.simulate(minutes(80));

    let team = unit(&world, "A TEAM");
    assert_eq!(team.stance(), Stance::DeliberateDefense);
    let opord = team.staff.opord.as_ref().unwrap();
    let ended: Vec<_> = opord.tasks().iter().filter(|t| t.end.is_some()).collect();
    assert_eq!(ended.len(), 1);
    assert_eq!(ended[0].state, TaskState::Cancelled);

    let balance = BalanceConfig::builtin();
    let expected = (rate(&balance, "rifleman", "transit") * 0.5
        + rate(&balance, "rifleman", "idle") * 1.5)
        * 4.0;
    for class in [SupplyClass::I, SupplyClass::Water] {
        let spent = team_store().get(class) - team.supply().get(class);
        assert!(
            (spent - expected.get(class)).abs() < 1e-9,
            "{class}: spent {spent}, expected {}",
            expected.get(class)
        );
    }
}

#[test]
fn opposing_teams_at_close_range_acquire_each_other() {
    let mut world = world(vec![
        fire_team(1, "BLUE TEAM", "blue", Point::new(20.0, 20.0)),
        fire_team(2, "RED TEAM", "red", Point::new(20.5, 20.0)),
    ]);

    world.simulate(minutes(10));

    for (observer, target, side) in [("BLUE TEAM", UnitId(2), "red"), ("RED TEAM", UnitId(1), "blue")] {
        let seen = unit(&world, observer);
        let contact = seen
            .contacts
            .values()
            .find(|c| c.target == target)
            .unwrap_or_else(|| panic!("{observer} has no contact"));
        assert!(contact.is_direct());
        assert!(contact.rating >= 1);
        assert_eq!(contact.side(), Some(side));
    }
}

#[test]
fn suppressed_team_loses_sight_of_its_opponent() {
    let mut pinned = fire_team(1, "BLUE TEAM", "blue", Point::new(20.0, 20.0));
    pinned.set_suppression(1.0);
    let mut world = world(vec![pinned, fire_team(2, "RED TEAM", "red", Point::new(20.5, 20.0))]);

    world.simulate(minutes(10));

    let blue = unit(&world, "BLUE TEAM");
    assert!(
        blue.contacts.values().all(|c| !c.is_direct()),
        "suppressed team acquired a contact"
    );
    let red = unit(&world, "RED TEAM");
    let contact = red
        .contacts
        .values()
        .find(|c| c.target == UnitId(1))
        .expect("red team sees the pinned team");
    assert!(contact.is_direct());
}

#[test]
fn convoy_round_trip_restores_the_forward_unit() {
    let mut forward = fire_team(1, "FWD TEAM", "blue", Point::new(10.0, 30.0));
    forward.staff.sop.supply.min = 0.3;
    forward.staff.sop.supply.max = 1.0;
    forward.staff.sop.css_unit = Some(UnitId(2));
    forward.set_supply(team_store() * 0.2);
    let css = css_company(2, "FSC", "blue", Point::new(30.0, 30.0));
    let mut world = world(vec![forward, css]);

    let mut logpacs = BTreeSet::new();
    let mut dropped_on_target = false;
    let mut lowest = f64::MAX;
    pulse_by_pulse(&mut world, 72, |world| {
        let fwd = unit(world, "FWD TEAM");
        lowest = lowest.min(fwd.cargo_level());
        for logpac in world.oob().iter().filter(|u| u.kind == UnitKind::Logpac) {
            logpacs.insert(logpac.id);
            if logpac.footprint().overlaps(fwd.footprint()) {
                dropped_on_target = true;
            }
        }
    });

    assert!(lowest < 0.3);
    assert!(!logpacs.is_empty(), "no LOGPAC was ever spawned");
    assert!(dropped_on_target);
    let counters = world.metrics().counters;
    assert!(counters.convoys_dispatched >= 1);
    assert!(counters.logpacs_spawned >= 1);
    assert!(counters.logpacs_absorbed >= 1);
    // Absorbed LOGPACs are flagged and removed at the end of their pulse.
    let still_out = logpacs.iter().filter(|id| world.oob().contains(**id)).count() as u64;
    assert_eq!(still_out, counters.logpacs_spawned - counters.logpacs_absorbed);
    assert!(unit(&world, "FWD TEAM").cargo_level() > 0.3);
}

#[test]
fn battalions_in_contact_attrit_in_one_engagement() {
    let mut world = world(vec![
        mech_battalion(1, "1-1 MECH", "blue", Point::new(25.0, 25.0)),
        mech_battalion(2, "2-7 MECH", "red", Point::new(26.0, 25.0)),
    ]);
    let balance = BalanceConfig::builtin();
    let initial: Vec<f64> = ["1-1 MECH", "2-7 MECH"]
        .iter()
        .map(|n| unit(&world, n).raw_rcp(&balance))
        .collect();

    let mut history: Vec<[f64; 2]> = Vec::new();
    let mut engaged_ids = BTreeSet::new();
    let mut ended_while_able = false;
    let mut was_active = false;
    pulse_by_pulse(&mut world, 6, |world| {
        let blue = unit(world, "1-1 MECH");
        let red = unit(world, "2-7 MECH");
        history.push([blue.raw_rcp(&balance), red.raw_rcp(&balance)]);
        engaged_ids.extend(blue.ground_engagements.iter().copied());
        engaged_ids.extend(red.ground_engagements.iter().copied());
        assert!(world.engagements().len() <= 1);

        let able = |rcp: f64, start: f64| rcp > 0.0 && rcp >= balance.combat.ineffective_fraction * start;
        let both_able =
            able(blue.raw_rcp(&balance), initial[0]) && able(red.raw_rcp(&balance), initial[1]);
        if was_active && world.engagements().is_empty() && both_able {
            ended_while_able = true;
        }
        if !world.engagements().is_empty() {
            assert!(both_able, "engagement continues with a side unable to fight");
            was_active = true;
        }
    });

    assert!(was_active, "no engagement was spawned");
    assert_eq!(engaged_ids.len(), 1);
    assert!(!ended_while_able);
    for side in 0..2 {
        let mut previous = initial[side];
        for pulse in &history {
            assert!(pulse[side] <= previous + 1e-12, "RCP rose for side {side}");
            previous = pulse[side];
        }
        assert!(previous < initial[side]);
    }
}
