//! Movement system - steers actors toward their goal and applies the
//! avoidance push.

use crate::components::*;
use crate::config::SimConfig;
use crate::context::DeltaTime;
use crate::events::SimEvent;
use crate::geometry::{remap, rotate};
use crate::systems::avoidance::{desired_heading, ChaseTarget};
use bevy_ecs::prelude::*;
use glam::Vec2;

#[cfg(feature = "parallel")]
use rayon::prelude::*;

/// Rotate `current` toward `desired` by at most `max_angle` radians.
pub fn turn_towards(current: Vec2, desired: Vec2, max_angle: f32) -> Vec2 {
    let current = current.normalize_or(Vec2::Y);
    let Some(desired) = desired.try_normalize() else {
        return current;
    };
    let angle = current.perp_dot(desired).atan2(current.dot(desired));
    if angle.abs() <= max_angle {
        desired
    } else {
        rotate(current, max_angle.copysign(angle)).normalize_or(current)
    }
}

/// Forward speed factor: 1 when the push agrees with where the actor wants
/// to go, 0 when it points straight back.
pub fn alignment(desired: Vec2, push: Vec2) -> f32 {
    match (desired.try_normalize(), push.try_normalize()) {
        (Some(d), Some(p)) => remap(-1.0, 1.0, 0.0, 1.0, d.dot(p)),
        _ => 1.0,
    }
}

/// System that promotes freshly placed actors to `Active`.
///
/// The initial heading points at the destination when the actor has one.
pub fn activation_system(
    mut events: EventWriter<SimEvent>,
    mut query: Query<
        (
            Entity,
            &mut Lifecycle,
            &mut Heading,
            &Position,
            &Navigation,
            Option<&Incarnation>,
        ),
        Without<InPool>,
    >,
) {
    for (entity, mut lifecycle, mut heading, pos, navigation, incarnation) in query.iter_mut() {
        if *lifecycle != Lifecycle::Spawning {
            continue;
        }
        let toward = navigation
            .destination
            .and_then(|d| (d - pos.0).try_normalize())
            .unwrap_or(navigation.default_direction);
        heading.0 = toward.normalize_or(Vec2::Y);
        *lifecycle = Lifecycle::Active;
        events.send(SimEvent::LifecycleChanged {
            entity,
            incarnation: incarnation.map_or(0, |i| i.0),
            state: LifecycleState::Active,
        });
    }
}

/// Per-actor input to the movement pass.
#[derive(Debug, Clone, Copy)]
struct MoverData {
    entity: Entity,
    position: Vec2,
    heading: Vec2,
    stats: ActorStats,
    navigation: Navigation,
    push: Vec2,
}

#[derive(Debug, Clone, Copy)]
struct MoveParams {
    delta: f32,
    max_turn: f32,
    avoidance_speed: f32,
}

/// New position and heading for one actor.
fn compute_move(data: &MoverData, targets: &[ChaseTarget], params: MoveParams) -> (Vec2, Vec2) {
    let goal = desired_heading(data.position, &data.navigation, &data.stats, targets);
    let forward = alignment(goal.desired, data.push);

    let heading = turn_towards(data.heading, goal.desired + data.push, params.max_turn);
    let position = data.position
        + heading * forward * data.stats.speed * goal.desired.length().min(1.0) * params.delta
        + data.push * params.avoidance_speed * params.delta;
    (position, heading)
}

/// System that moves active actors.
///
/// ## Data Access
/// - Reads: DeltaTime, SimConfig, ActorStats, Navigation, Avoidance, Lifecycle
/// - Writes: Position, Heading
///
/// Attacking actors hold position. Steering is evaluated in batches over a
/// snapshot sorted by entity, then written back in order.
#[allow(clippy::type_complexity)]
pub fn movement_system(
    dt: Res<DeltaTime>,
    config: Res<SimConfig>,
    characters: Query<(Entity, &Position), (With<Character>, Without<Defeated>)>,
    mut actors: Query<
        (
            Entity,
            &mut Position,
            &mut Heading,
            &ActorStats,
            &Navigation,
            &Avoidance,
            &Lifecycle,
        ),
        (Without<InPool>, Without<Character>),
    >,
) {
    let params = MoveParams {
        delta: dt.0,
        max_turn: config.turn_rate_deg.to_radians() * dt.0,
        avoidance_speed: config.avoidance_speed,
    };

    let targets: Vec<ChaseTarget> = characters
        .iter()
        .map(|(entity, pos)| ChaseTarget {
            entity,
            position: pos.0,
        })
        .collect();

    let mut movers: Vec<MoverData> = actors
        .iter()
        .filter(|(.., lifecycle)| **lifecycle == Lifecycle::Active)
        .map(|(entity, pos, heading, stats, navigation, avoidance, _)| MoverData {
            entity,
            position: pos.0,
            heading: heading.0,
            stats: *stats,
            navigation: *navigation,
            push: avoidance.total(),
        })
        .collect();
    if movers.is_empty() {
        return;
    }
    movers.sort_by_key(|m| m.entity);

    let batch = config.batch_size.max(1);
    let targets = targets.as_slice();

    #[cfg(feature = "parallel")]
    let moves: Vec<Vec<(Vec2, Vec2)>> = movers
        .par_chunks(batch)
        .map(|chunk| chunk.iter().map(|m| compute_move(m, targets, params)).collect())
        .collect();

    #[cfg(not(feature = "parallel"))]
    let moves: Vec<Vec<(Vec2, Vec2)>> = movers
        .chunks(batch)
        .map(|chunk| chunk.iter().map(|m| compute_move(m, targets, params)).collect())
        .collect();

    for (mover, (position, heading)) in movers.iter().zip(moves.into_iter().flatten()) {
        if let Ok((_, mut pos, mut current, ..)) = actors.get_mut(mover.entity) {
            pos.0 = position;
            current.0 = heading;
        }
    }
}
