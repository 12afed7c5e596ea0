use core_sim::terrain::{TerrainClass, TerrainMap};
use core_sim::{Oob, SimDuration, SimWorld, Stance, Unit, UnitId, WorldSetup};
use criterion::{criterion_group, criterion_main, BatchSize, BenchmarkId, Criterion};
use sim_runtime::{Point, SupplyClass, SupplyPackage};

/// Alternating blue and red teams on a 2 km grid, so neighbours sit inside
/// each other's sensor range.
fn world(size: u64) -> SimWorld {
    let mut oob = Oob::default();
    let capacity = SupplyPackage::single(SupplyClass::I, 1.0);
    for n in 0..size {
        let side = if n % 2 == 0 { "blue" } else { "red" };
        let at = Point::new(5.0 + (n % 8) as f64 * 2.0, 5.0 + (n / 8) as f64 * 2.0);
        let unit = Unit::new(UnitId(n + 1), format!("TEAM {n}"), side)
            .with_personnel("rifleman", 4)
            .with_stance(Stance::Deployed)
            .with_supply(capacity, 1.0)
            .at(at, 0.2);
        oob.insert(unit).expect("unique ids");
    }
    let terrain = TerrainMap::uniform(40.0, 40.0, 0.5, TerrainClass::Unrestricted);
    SimWorld::new(WorldSetup::new("bench", terrain), oob)
}

fn bench_pulse(c: &mut Criterion) {
    let mut group = c.benchmark_group("pulse");

    for size in [8u64, 16, 32, 48, 64] {
        group.bench_with_input(BenchmarkId::new("one_hour", size), &size, |b, &size| {
            b.iter_batched(
                || world(size),
                |mut world| {
                    world.simulate(SimDuration::from_hours(1.0));
                },
                BatchSize::SmallInput,
            )
        });
    }

    group.finish();
}

criterion_group!(pulse_benches, bench_pulse);
criterion_main!(pulse_benches);
