//! Lifecycle transitions after damage: bounds culling, hit-flash and turret
//! expiry, pool reclamation.

use crate::components::*;
use crate::config::{ArenaRules, SimConfig};
use crate::context::SimClock;
use crate::events::SimEvent;
use crate::pool::{EntityPool, PoolKey, Release};
use crate::systems::spawn::Population;
use bevy_ecs::prelude::*;

/// System that kills engaged actors that left the arena bounds.
///
/// Leaving the bounds skips the teardown delay: the actor is reclaimed in
/// the same tick.
pub fn bounds_check_system(
    clock: Res<SimClock>,
    rules: Res<ArenaRules>,
    mut events: EventWriter<SimEvent>,
    mut actors: Query<
        (Entity, &Position, &mut Health, &mut Lifecycle, Option<&Incarnation>),
        Without<InPool>,
    >,
) {
    for (entity, pos, mut health, mut lifecycle, incarnation) in actors.iter_mut() {
        if !lifecycle.is_engaged() || rules.bounds.contains(pos.0) {
            continue;
        }
        tracing::debug!(?entity, position = ?pos.0, "actor left the arena");
        health.current = 0.0;
        *lifecycle = Lifecycle::Dying {
            release_at: clock.elapsed,
        };
        events.send(SimEvent::LifecycleChanged {
            entity,
            incarnation: incarnation.map_or(0, |i| i.0),
            state: LifecycleState::Dying,
        });
    }
}

/// System that strips hit flashes once their interval has passed.
pub fn hit_flash_expiry_system(
    mut commands: Commands,
    clock: Res<SimClock>,
    config: Res<SimConfig>,
    flashes: Query<(Entity, &HitFlash)>,
) {
    for (entity, flash) in flashes.iter() {
        if clock.elapsed - flash.started_at >= config.hit_flash_interval {
            commands.entity(entity).remove::<HitFlash>();
        }
    }
}

/// System that removes turrets whose lifetime ran out.
pub fn turret_expiry_system(
    mut commands: Commands,
    clock: Res<SimClock>,
    mut events: EventWriter<SimEvent>,
    turrets: Query<(Entity, &Turret)>,
) {
    let mut expired: Vec<(Entity, u32)> = turrets
        .iter()
        .filter(|(_, turret)| clock.elapsed >= turret.expires_at)
        .map(|(entity, turret)| (entity, turret.id))
        .collect();
    expired.sort_by_key(|(entity, _)| *entity);
    for (entity, id) in expired {
        tracing::debug!(?entity, id, "turret expired");
        commands.entity(entity).despawn();
        events.send(SimEvent::TurretExpired { entity, id });
    }
}

/// System that parks dead actors and returns them to the pool.
///
/// ## Data Access
/// - Reads: SimClock, KindId
/// - Writes: Position, Lifecycle, Avoidance, EntityPool, Population, SimEvent
/// - Deferred: insert `InPool`, remove `HitFlash`, despawn on pool overflow
pub fn pool_reclaim_system(
    mut commands: Commands,
    clock: Res<SimClock>,
    mut pool: ResMut<EntityPool>,
    mut population: ResMut<Population>,
    mut events: EventWriter<SimEvent>,
    mut actors: Query<
        (Entity, &KindId, &mut Position, &mut Lifecycle, &mut Avoidance),
        Without<InPool>,
    >,
) {
    let now = clock.elapsed;
    let mut due: Vec<(Entity, KindId)> = actors
        .iter()
        .filter(|(_, _, _, lifecycle, _)| {
            matches!(**lifecycle, Lifecycle::Dying { release_at } if now >= release_at)
        })
        .map(|(entity, kind, ..)| (entity, *kind))
        .collect();

    if !due.is_empty() {
        due.sort_by_key(|(entity, _)| *entity);

        for (entity, kind) in due {
            let Ok((_, _, mut pos, mut lifecycle, mut avoidance)) = actors.get_mut(entity) else {
                continue;
            };
            pos.0 = PARK_POSITION;
            *lifecycle = Lifecycle::Pooled;
            *avoidance = Avoidance::default();
            population.alive = population.alive.saturating_sub(1);

            match pool.release(PoolKey::Actor(kind), entity) {
                Release::Queued => {
                    commands.entity(entity).insert(InPool).remove::<HitFlash>();
                    events.send(SimEvent::ActorPooled { entity, kind });
                }
                Release::Overflow => {
                    tracing::debug!(?entity, ?kind, "pool full, destroying actor");
                    commands.entity(entity).despawn();
                }
                Release::Duplicate | Release::UnknownKey => {}
            }
        }

        events.send(SimEvent::PopulationChanged {
            alive: population.alive,
            total_spawned: population.total_spawned,
        });
    }

    pool.close_window();
}
