//! Projectile engine - weapon-fire bursts, swept collision and recycling.
//!
//! ## Per tick
//! 1. `projectile_fire_system` expands queued fire requests into
//!    projectiles, taking parked projectiles from the pool first.
//! 2. `projectile_update_system` sweeps every live projectile from its
//!    position to the next one (plus a forward margin) against horde
//!    bodies. The earliest contact wins. Hits add to the damage ledger;
//!    impacted and expired projectiles are parked and released to the pool.
//!
//! The sweep is a pure function over a sorted snapshot, evaluated in
//! parallel batches. Parking and pool release happen afterwards on the
//! main thread.

use crate::components::*;
use crate::config::{ArenaRules, SimConfig, WeaponConfig};
use crate::context::{batch_rng, DeltaTime, SimClock, SimTick};
use crate::events::{EffectKind, SimEvent};
use crate::geometry::{rotate, sweep_circle};
use crate::pool::{EntityPool, PoolKey, Release};
use crate::spatial::{Side, SpatialGrid};
use crate::systems::combat::PendingDamage;
use bevy_ecs::prelude::*;
use glam::Vec2;
use rand::Rng;
use serde::{Deserialize, Serialize};

#[cfg(feature = "parallel")]
use rayon::prelude::*;

/// How the bullets of one burst fan out.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Spread {
    /// Bullets share the origin and rotate by `step_deg` each.
    Angular { step_deg: f32 },
    /// Bullets share the heading and shift sideways by `spacing` each.
    Parallel { spacing: f32 },
}

impl Default for Spread {
    fn default() -> Self {
        Spread::Angular { step_deg: 10.0 }
    }
}

/// One burst from the external weapon subsystem.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FireRequest {
    pub origin: Vec2,
    pub heading: Vec2,
    pub bullets_per_shot: u32,
    #[serde(default)]
    pub spread: Spread,
    pub damage: f32,
    pub speed: f32,
}

/// Fire requests waiting for the next fire phase.
#[derive(Resource, Debug, Default)]
pub struct FireRequests(pub Vec<FireRequest>);

/// Lateral slot of every bullet in a burst, in units of the spread step.
///
/// Odd counts put one bullet in the centre; even counts straddle it.
pub fn burst_offsets(count: u32) -> Vec<f32> {
    let mut offsets = Vec::with_capacity(count as usize);
    if count % 2 == 1 {
        offsets.push(0.0);
        for k in 1..=(count / 2) {
            offsets.push(k as f32);
            offsets.push(-(k as f32));
        }
    } else {
        for k in 1..=(count / 2) {
            let slot = k as f32 - 0.5;
            offsets.push(slot);
            offsets.push(-slot);
        }
    }
    offsets
}

/// Origin and unit heading of every bullet in a burst.
pub fn expand_burst(request: &FireRequest) -> Vec<(Vec2, Vec2)> {
    let heading = request.heading.normalize_or_zero();
    burst_offsets(request.bullets_per_shot)
        .into_iter()
        .map(|slot| match request.spread {
            Spread::Angular { step_deg } => {
                (request.origin, rotate(heading, (slot * step_deg).to_radians()))
            }
            Spread::Parallel { spacing } => {
                (request.origin + heading.perp() * slot * spacing, heading)
            }
        })
        .collect()
}

/// System that turns fire requests into projectiles.
pub fn projectile_fire_system(
    mut commands: Commands,
    clock: Res<SimClock>,
    rules: Res<ArenaRules>,
    mut requests: ResMut<FireRequests>,
    mut pool: ResMut<EntityPool>,
) {
    if requests.0.is_empty() {
        return;
    }
    let now = clock.elapsed;
    let ratio = rules.weapon.damage_ratio.value_at(now);

    for request in requests.0.drain(..) {
        if request.bullets_per_shot == 0 || request.heading.length_squared() <= f32::EPSILON {
            tracing::warn!(?request, "ignoring empty fire request");
            continue;
        }
        let mut reused = 0usize;
        let bullets = expand_burst(&request);
        let count = bullets.len();
        for (origin, heading) in bullets {
            let bundle = ProjectileBundle {
                projectile: Projectile {
                    damage: request.damage * ratio,
                    speed: request.speed,
                    spawn_time: now,
                },
                position: Position(origin),
                heading: Heading(heading),
            };
            let recycled = pool
                .try_acquire(PoolKey::Projectile)
                .filter(|&entity| commands.get_entity(entity).is_some());
            match recycled {
                Some(entity) => {
                    commands.entity(entity).insert(bundle).remove::<InPool>();
                    reused += 1;
                }
                None => {
                    commands.spawn(bundle);
                }
            }
        }
        tracing::debug!(count, reused, "burst fired");
    }
}

/// Snapshot row for one live projectile.
#[derive(Debug, Clone, Copy)]
struct ProjectileData {
    entity: Entity,
    position: Vec2,
    heading: Vec2,
    projectile: Projectile,
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum ProjectileOutcome {
    Advance(Vec2),
    Hit { target: Entity, point: Vec2 },
    Expire,
}

/// Inputs shared by every projectile of a tick.
#[derive(Debug, Clone, Copy)]
struct SweepParams {
    now: f32,
    dt: f32,
    seed: u64,
    tick: u64,
}

/// Earliest horde body or pickup touched by the segment `start -> end`.
pub fn first_hit(grid: &SpatialGrid, start: Vec2, end: Vec2) -> Option<(Entity, f32)> {
    [Side::Horde, Side::Pickup]
        .into_iter()
        .flat_map(|side| grid.query_segment(start, end, side))
        .filter_map(|entry| {
            sweep_circle(start, end, entry.position, entry.radius).map(|t| (entry.entity, t))
        })
        .min_by(|a, b| a.1.total_cmp(&b.1).then_with(|| a.0.cmp(&b.0)))
}

fn compute_projectile(
    data: &ProjectileData,
    grid: &SpatialGrid,
    weapon: &WeaponConfig,
    params: SweepParams,
) -> ProjectileOutcome {
    if params.now - data.projectile.spawn_time >= weapon.lifetime {
        return ProjectileOutcome::Expire;
    }

    let jitter = weapon.speed_jitter.abs();
    let speed = if jitter > 0.0 {
        let mut rng = batch_rng(params.seed, params.tick, data.entity.to_bits());
        (data.projectile.speed + rng.gen_range(-jitter..=jitter)).max(0.0)
    } else {
        data.projectile.speed
    };

    let next = data.position + data.heading * speed * params.dt;
    let end = next + data.heading * weapon.forward_margin;
    match first_hit(grid, data.position, end) {
        Some((target, t)) => ProjectileOutcome::Hit {
            target,
            point: data.position.lerp(end, t),
        },
        None => ProjectileOutcome::Advance(next),
    }
}

/// System that moves projectiles, resolves hits and recycles spent ones.
///
/// ## Data Access
/// - Reads: DeltaTime, SimClock, SimTick, SimConfig, ArenaRules, SpatialGrid
/// - Writes: Position, PendingDamage, EntityPool, SimEvent
#[allow(clippy::too_many_arguments)]
pub fn projectile_update_system(
    mut commands: Commands,
    dt: Res<DeltaTime>,
    clock: Res<SimClock>,
    tick: Res<SimTick>,
    config: Res<SimConfig>,
    rules: Res<ArenaRules>,
    grid: Res<SpatialGrid>,
    pool: Res<EntityPool>,
    mut pending: ResMut<PendingDamage>,
    mut events: EventWriter<SimEvent>,
    mut projectiles: Query<(Entity, &mut Position, &Heading, &Projectile), Without<InPool>>,
) {
    let params = SweepParams {
        now: clock.elapsed,
        dt: dt.0,
        seed: config.seed,
        tick: tick.0,
    };

    let mut snapshot: Vec<ProjectileData> = projectiles
        .iter()
        .map(|(entity, pos, heading, projectile)| ProjectileData {
            entity,
            position: pos.0,
            heading: heading.0,
            projectile: *projectile,
        })
        .collect();
    if snapshot.is_empty() {
        return;
    }
    snapshot.sort_by_key(|p| p.entity);

    let batch = config.batch_size.max(1);
    let grid: &SpatialGrid = &grid;
    let weapon = &rules.weapon;

    #[cfg(feature = "parallel")]
    let outcomes: Vec<Vec<ProjectileOutcome>> = snapshot
        .par_chunks(batch)
        .map(|chunk| chunk.iter().map(|p| compute_projectile(p, grid, weapon, params)).collect())
        .collect();

    #[cfg(not(feature = "parallel"))]
    let outcomes: Vec<Vec<ProjectileOutcome>> = snapshot
        .chunks(batch)
        .map(|chunk| chunk.iter().map(|p| compute_projectile(p, grid, weapon, params)).collect())
        .collect();

    for (data, outcome) in snapshot.iter().zip(outcomes.into_iter().flatten()) {
        let Ok((entity, mut pos, _, projectile)) = projectiles.get_mut(data.entity) else {
            continue;
        };
        match outcome {
            ProjectileOutcome::Advance(next) => {
                pos.0 = next;
                continue;
            }
            ProjectileOutcome::Hit { target, point } => {
                pending.0.add(target, projectile.damage);
                events.send(SimEvent::HitEffect {
                    position: point,
                    heading: data.heading,
                    effect: EffectKind::ProjectileImpact,
                });
            }
            ProjectileOutcome::Expire => {}
        }

        pos.0 = PARK_POSITION;
        match pool.release(PoolKey::Projectile, entity) {
            Release::Queued => {
                commands.entity(entity).insert(InPool);
            }
            Release::Overflow => {
                commands.entity(entity).despawn();
            }
            Release::Duplicate | Release::UnknownKey => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{ArenaConfig, AttackStyle, RateCurve};
    use crate::spatial::spatial_grid_update_system;

    fn request(count: u32, spread: Spread) -> FireRequest {
        FireRequest {
            origin: Vec2::ZERO,
            heading: Vec2::Y,
            bullets_per_shot: count,
            spread,
            damage: 10.0,
            speed: 20.0,
        }
    }

    #[test]
    fn test_burst_offsets() {
        assert_eq!(burst_offsets(1), vec![0.0]);
        assert_eq!(burst_offsets(3), vec![0.0, 1.0, -1.0]);
        assert_eq!(burst_offsets(4), vec![0.5, -0.5, 1.5, -1.5]);
        assert!(burst_offsets(0).is_empty());
    }

    #[test]
    fn test_angular_spread_fans_symmetrically() {
        let bullets = expand_burst(&request(3, Spread::Angular { step_deg: 10.0 }));
        assert_eq!(bullets.len(), 3);
        assert!((bullets[0].1 - Vec2::Y).length() < 1e-6);
        assert!((bullets[1].1.x + bullets[2].1.x).abs() < 1e-6);
        let angle = bullets[1].1.dot(Vec2::Y).acos().to_degrees();
        assert!((angle - 10.0).abs() < 1e-3);
        assert!(bullets.iter().all(|(o, _)| *o == Vec2::ZERO));
    }

    #[test]
    fn test_parallel_spread_shifts_origins() {
        let bullets = expand_burst(&request(2, Spread::Parallel { spacing: 1.0 }));
        assert_eq!(bullets.len(), 2);
        assert!(bullets.iter().all(|(_, h)| *h == Vec2::Y));
        let mut xs: Vec<f32> = bullets.iter().map(|(o, _)| o.x).collect();
        xs.sort_by(f32::total_cmp);
        assert!((xs[0] + 0.5).abs() < 1e-6 && (xs[1] - 0.5).abs() < 1e-6);
    }

    fn setup(arena: ArenaConfig) -> (World, Schedule) {
        let mut world = World::new();
        world.insert_resource(SimClock { elapsed: 1.0 });
        world.insert_resource(DeltaTime(0.1));
        world.insert_resource(SimTick(3));
        world.insert_resource(SimConfig::default());
        world.insert_resource(ArenaRules::from_config(&arena));
        world.insert_resource(SpatialGrid::new(4.0));
        world.insert_resource(PendingDamage::default());
        world.insert_resource(FireRequests::default());
        world.insert_resource(EntityPool::new([PoolKey::Projectile], 8, 4));
        world.init_resource::<Events<SimEvent>>();

        let mut schedule = Schedule::default();
        schedule.add_systems(
            (
                spatial_grid_update_system,
                projectile_fire_system,
                projectile_update_system,
            )
                .chain(),
        );
        (world, schedule)
    }

    fn steady_weapon() -> ArenaConfig {
        let mut arena = ArenaConfig::default();
        arena.weapon.speed_jitter = 0.0;
        arena
    }

    fn spawn_target(world: &mut World, at: Vec2) -> Entity {
        world
            .spawn((
                Position(at),
                ActorStats {
                    speed: 0.0,
                    damage: 0.0,
                    attack_range: 1.0,
                    chasing_range: 1.0,
                    attack_delay: 1.0,
                    radius: 0.5,
                    radius_for_damage: 1.0,
                    attack_offset: 0.0,
                    strike_delay: 0.0,
                    attack_duration: 1.0,
                    style: AttackStyle::Strike,
                },
                Lifecycle::Active,
            ))
            .id()
    }

    fn live_projectiles(world: &mut World) -> Vec<Vec2> {
        world
            .query_filtered::<&Position, (With<Projectile>, Without<InPool>)>()
            .iter(world)
            .map(|p| p.0)
            .collect()
    }

    #[test]
    fn test_fire_prefers_pool_then_spawns() {
        let (mut world, mut schedule) = setup(steady_weapon());
        let parked = world
            .spawn((
                ProjectileBundle {
                    projectile: Projectile {
                        damage: 0.0,
                        speed: 0.0,
                        spawn_time: 0.0,
                    },
                    position: Position(PARK_POSITION),
                    heading: Heading(Vec2::Y),
                },
                InPool,
            ))
            .id();
        world.resource::<EntityPool>().release(PoolKey::Projectile, parked);

        world
            .resource_mut::<FireRequests>()
            .0
            .push(request(2, Spread::Parallel { spacing: 1.0 }));
        schedule.run(&mut world);

        assert!(world.get::<InPool>(parked).is_none());
        assert_eq!(world.get::<Projectile>(parked).unwrap().spawn_time, 1.0);
        assert_eq!(live_projectiles(&mut world).len(), 2);
        assert!(world.resource::<FireRequests>().0.is_empty());
    }

    #[test]
    fn test_projectile_advances_without_target() {
        let (mut world, mut schedule) = setup(steady_weapon());
        world
            .resource_mut::<FireRequests>()
            .0
            .push(request(1, Spread::default()));
        schedule.run(&mut world);

        let positions = live_projectiles(&mut world);
        assert_eq!(positions.len(), 1);
        // Fired and moved 20 * 0.1 in the same tick.
        assert!((positions[0] - Vec2::new(0.0, 2.0)).length() < 1e-5);
    }

    #[test]
    fn test_hit_damages_and_recycles() {
        let (mut world, mut schedule) = setup(steady_weapon());
        let target = spawn_target(&mut world, Vec2::new(0.0, 1.5));
        world
            .resource_mut::<FireRequests>()
            .0
            .push(request(1, Spread::default()));
        schedule.run(&mut world);

        assert_eq!(world.resource::<PendingDamage>().0.get(target), 10.0);
        assert!(live_projectiles(&mut world).is_empty());
        assert_eq!(world.resource::<EntityPool>().free_count(PoolKey::Projectile), 1);

        let impacts: Vec<SimEvent> = world.resource_mut::<Events<SimEvent>>().drain().collect();
        match impacts.as_slice() {
            [SimEvent::HitEffect {
                position, effect, ..
            }] => {
                assert_eq!(*effect, EffectKind::ProjectileImpact);
                assert!((position.y - 1.0).abs() < 1e-4);
            }
            other => panic!("unexpected events {other:?}"),
        }
    }

    #[test]
    fn test_pickup_in_the_line_of_fire_is_hit_first() {
        use crate::systems::spawn::{SpawnTrigger, TriggerKind};
        let (mut world, mut schedule) = setup(steady_weapon());
        let behind = spawn_target(&mut world, Vec2::new(0.0, 1.8));
        let trigger = SpawnTrigger {
            kind: TriggerKind::Actor(KindId(1)),
            region: 0,
        };
        let pickup = world
            .spawn(PickupBundle::new(Vec2::new(0.0, 1.0), 30.0, 0.4, trigger))
            .id();
        world
            .resource_mut::<FireRequests>()
            .0
            .push(request(1, Spread::default()));
        schedule.run(&mut world);

        let pending = &world.resource::<PendingDamage>().0;
        assert_eq!(pending.get(pickup), 10.0);
        assert_eq!(pending.get(behind), 0.0);
    }

    #[test]
    fn test_earliest_hit_wins() {
        let (mut world, mut schedule) = setup(steady_weapon());
        let near = spawn_target(&mut world, Vec2::new(0.0, 1.0));
        let far = spawn_target(&mut world, Vec2::new(0.0, 1.8));
        world
            .resource_mut::<FireRequests>()
            .0
            .push(request(1, Spread::default()));
        schedule.run(&mut world);

        let pending = &world.resource::<PendingDamage>().0;
        assert_eq!(pending.get(near), 10.0);
        assert_eq!(pending.get(far), 0.0);
    }

    #[test]
    fn test_lifetime_expiry_recycles() {
        let (mut world, mut schedule) = setup(steady_weapon());
        world
            .resource_mut::<FireRequests>()
            .0
            .push(request(1, Spread::default()));
        schedule.run(&mut world);
        assert_eq!(live_projectiles(&mut world).len(), 1);

        world.resource_mut::<SimClock>().elapsed = 3.5;
        schedule.run(&mut world);
        assert!(live_projectiles(&mut world).is_empty());
        assert_eq!(world.resource::<EntityPool>().free_count(PoolKey::Projectile), 1);
    }

    #[test]
    fn test_damage_ratio_scales_new_projectiles() {
        let mut arena = steady_weapon();
        arena.weapon.damage_ratio = RateCurve {
            t0: 0.0,
            t1: 2.0,
            min: 1.0,
            max: 3.0,
        };
        let (mut world, mut schedule) = setup(arena);
        world
            .resource_mut::<FireRequests>()
            .0
            .push(request(1, Spread::default()));
        schedule.run(&mut world);

        let mut q = world.query::<&Projectile>();
        let damage: Vec<f32> = q.iter(&world).map(|p| p.damage).collect();
        assert_eq!(damage, vec![20.0]);
    }
}
