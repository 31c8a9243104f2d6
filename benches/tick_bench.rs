use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use glam::Vec2;
use horde_sim::config::RateCurve;
use horde_sim::{ArenaConfig, SimConfig, SimWorld};

/// A world that already holds `size` actors closing in on one character.
fn warmed_world(size: u32) -> SimWorld {
    let mut arena = ArenaConfig::default();
    arena.scheduled.clear();
    arena.waves.rate = RateCurve::constant(size as f32);
    arena.waves.cooldown = 0.1;
    arena.waves.total_number = size;
    arena.waves.allow_respawn = true;

    let config = SimConfig {
        max_spawns_per_tick: size as usize,
        ..Default::default()
    };
    let mut sim = SimWorld::new(arena, config).expect("default arena is valid");
    sim.spawn_character(Vec2::ZERO, 1.0e9);
    for _ in 0..10 {
        sim.step(1.0 / 30.0);
    }
    sim
}

fn bench_tick(c: &mut Criterion) {
    let mut group = c.benchmark_group("horde_tick");
    group.sample_size(20);

    for size in [500u32, 2_000, 5_000] {
        group.bench_with_input(BenchmarkId::from_parameter(size), &size, |b, &size| {
            let mut sim = warmed_world(size);
            b.iter(|| {
                sim.step(black_box(1.0 / 30.0));
                sim.drain_events();
            });
        });
    }

    group.finish();
}

fn bench_snapshot(c: &mut Criterion) {
    let mut sim = warmed_world(2_000);
    c.bench_function("snapshot_2000", |b| {
        b.iter(|| black_box(sim.snapshot()));
    });
}

criterion_group!(benches, bench_tick, bench_snapshot);
criterion_main!(benches);
