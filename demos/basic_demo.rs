//! Basic demonstration of the horde simulation.
//!
//! Run with: cargo run --example basic_demo
//! Set `RUST_LOG=horde_sim=debug` for per-system logging.

use glam::Vec2;
use horde_sim::{
    ArenaConfig, FireRequest, SimConfig, SimEvent, SimWorld, SpawnTrigger, Spread, TriggerKind,
};
use tracing_subscriber::EnvFilter;

fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("horde_sim=info")),
        )
        .init();

    println!("=== Horde Arena - Simulation Demo ===\n");

    let mut sim = SimWorld::new(ArenaConfig::default(), SimConfig::default())?;
    let hero = sim.spawn_character(Vec2::ZERO, 5_000.0);
    // Shooting this down drops a turret in the northern region
    sim.spawn_pickup(
        Vec2::new(0.0, 12.0),
        60.0,
        SpawnTrigger {
            kind: TriggerKind::Turret(1),
            region: 0,
        },
    )?;

    // Run simulation for 20 seconds at 30 ticks/sec
    println!("Running simulation for 600 ticks (20 seconds at 30 ticks/sec)...\n");
    let mut kills = 0;
    let mut reused = 0;
    for tick in 0..600 {
        sim.step(1.0 / 30.0);

        // The hero fires a five bullet burst north every half second
        if tick % 15 == 0 {
            sim.fire(FireRequest {
                origin: Vec2::ZERO,
                heading: Vec2::Y,
                bullets_per_shot: 5,
                spread: Spread::Angular { step_deg: 8.0 },
                damage: 35.0,
                speed: 40.0,
            });
        }

        // A pickup at 10s drops a runner in the southern region
        if tick == 300 {
            sim.trigger_spawn(SpawnTrigger {
                kind: TriggerKind::Actor(horde_sim::KindId(2)),
                region: 1,
            })?;
        }

        for event in sim.drain_events() {
            match event {
                SimEvent::HealthChanged { lethal: true, .. } => kills += 1,
                SimEvent::ActorSpawned { reused: true, .. } => reused += 1,
                SimEvent::PickupCollected { position, .. } => {
                    println!("pickup collected at ({:.1}, {:.1})", position.x, position.y)
                }
                SimEvent::TurretExpired { id, .. } => println!("turret {id} expired"),
                _ => {}
            }
        }

        if (tick + 1) % 60 == 0 {
            print_status(&mut sim, kills, reused);
        }
    }

    println!("\nHero alive: {}", sim.is_alive(hero));
    println!("\n=== Pool State (JSON) ===\n");
    println!("{}", serde_json::to_string_pretty(&sim.pool_stats())?);
    Ok(())
}

fn print_status(sim: &mut SimWorld, kills: u32, reused: u32) {
    let snapshot = sim.snapshot();
    let hero = snapshot.characters.first();
    println!(
        "--- Tick {} (t={:.1}s) --- alive={} spawned={} kills={} reused={} bullets={} hero_hp={:.0}",
        snapshot.tick,
        snapshot.time,
        snapshot.population.alive,
        snapshot.population.total_spawned,
        kills,
        reused,
        snapshot.projectiles.len(),
        hero.map(|h| h.health).unwrap_or(0.0),
    );
}
