//! Avoidance engine - priority-gated separation between actors.
//!
//! ## Algorithm
//!
//! 1. **Goal pass**: every engaged actor picks a desired heading (nearest
//!    character in chasing range, else destination, else default
//!    direction) and a dynamic priority. Hugging an obstacle while being
//!    far from the goal lowers the priority value, so the actors stuck at
//!    an obstacle get precedence and the crowd queues around it.
//! 2. **Snapshot**: rows are sorted by `(priority, entity)`, which gives a
//!    deterministic order independent of archetype storage.
//! 3. **Separation pass**: actor A is pushed away from every B with
//!    `priority(B) <= priority(A)` whose body overlaps (or nearly overlaps)
//!    A's. Pushes are averaged over contributors. Sorting means the
//!    candidate set for A is a prefix of the snapshot.
//!
//! ## Cost Control
//!
//! The separation pass is O(n²) in the worst case, so it only runs every
//! `SimConfig::avoidance_interval` ticks. Movement keeps using the last
//! result in between. With the `parallel` feature both passes evaluate
//! contiguous chunks of the snapshot on rayon workers; each chunk only
//! writes its own output rows and results are applied afterwards.

use crate::components::*;
use crate::config::SimConfig;
use crate::context::SimTick;
use crate::geometry::{pair_jitter, remap};
use bevy_ecs::prelude::*;
use glam::Vec2;

#[cfg(feature = "parallel")]
use rayon::prelude::*;

/// Priority weight of the distance to the goal.
const DISTANCE_WEIGHT: f32 = 1000.0;
/// Priority weight of the static kind key.
const KEY_WEIGHT: f32 = 10_000.0;
/// Obstacle clearance below which an actor counts as hugging it.
const OBSTACLE_NEAR: f32 = 0.5;
/// Obstacle clearance above which the obstacle is ignored.
const OBSTACLE_FAR: f32 = 3.0;
/// Desired heading scale once a target is inside half the attack range.
const ARRIVED_SCALE: f32 = 0.01;
const MIN_PUSH: f32 = 1.0;
const MAX_PUSH: f32 = 3.0;

/// A character actors can chase.
#[derive(Debug, Clone, Copy)]
pub struct ChaseTarget {
    pub entity: Entity,
    pub position: Vec2,
}

/// Where an actor wants to go this tick.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Goal {
    pub desired: Vec2,
    pub target: Option<Entity>,
    /// Distance to the target or destination, zero when walking the
    /// default direction.
    pub distance: f32,
}

/// Pick the desired heading for an actor.
pub fn desired_heading(
    position: Vec2,
    navigation: &Navigation,
    stats: &ActorStats,
    targets: &[ChaseTarget],
) -> Goal {
    let nearest = targets
        .iter()
        .map(|t| (t, t.position.distance(position)))
        .filter(|(_, d)| *d <= stats.chasing_range)
        .min_by(|a, b| a.1.total_cmp(&b.1).then_with(|| a.0.entity.cmp(&b.0.entity)));

    if let Some((target, distance)) = nearest {
        let mut desired = (target.position - position).normalize_or_zero();
        if distance < stats.attack_range * 0.5 {
            desired *= ARRIVED_SCALE;
        }
        return Goal {
            desired,
            target: Some(target.entity),
            distance,
        };
    }

    if let Some(destination) = navigation.destination {
        return Goal {
            desired: (destination - position).normalize_or_zero(),
            target: None,
            distance: destination.distance(position),
        };
    }

    Goal {
        desired: navigation.default_direction,
        target: None,
        distance: 0.0,
    }
}

/// 0 when hugging an obstacle, 1 once clear of it.
#[inline]
pub fn obstacle_ratio(clearance: f32) -> f32 {
    remap(OBSTACLE_NEAR, OBSTACLE_FAR, 0.0, 1.0, clearance).clamp(0.0, 1.0)
}

/// Dynamic avoidance priority. Lower values take precedence.
#[inline]
pub fn priority_value(key: u32, goal_distance: f32, obstacle_ratio: f32) -> f32 {
    goal_distance * DISTANCE_WEIGHT * obstacle_ratio + key as f32 * KEY_WEIGHT
}

/// A yields ground to B when B's priority is numerically not greater.
#[inline]
pub fn yields_to(a_priority: f32, b_priority: f32) -> bool {
    b_priority <= a_priority
}

/// Nearest point over all obstacles.
pub fn nearest_obstacle_point(position: Vec2, obstacles: &[Obstacle]) -> Option<Vec2> {
    obstacles
        .iter()
        .map(|o| o.closest_point(position))
        .min_by(|a, b| a.distance_squared(position).total_cmp(&b.distance_squared(position)))
}

/// One row of the avoidance snapshot.
#[derive(Debug, Clone, Copy)]
pub struct AvoidanceAgent {
    pub entity: Entity,
    pub position: Vec2,
    pub radius: f32,
    pub priority: f32,
}

/// Push on `a` away from `b`, if their bodies overlap or come within
/// `slack` of touching.
pub fn separation_push(a: &AvoidanceAgent, b: &AvoidanceAgent, slack: f32) -> Option<Vec2> {
    let offset = a.position - b.position;
    let distance = offset.length();
    let overlap = a.radius + b.radius - distance;
    if !(overlap > 0.0 || overlap.abs() < slack) {
        return None;
    }
    let strength = remap(slack, 0.0, MIN_PUSH, MAX_PUSH, distance).clamp(MIN_PUSH, MAX_PUSH);
    let direction = if distance > f32::EPSILON {
        offset / distance
    } else {
        pair_jitter(a.entity.to_bits(), b.entity.to_bits()).normalize_or_zero()
    };
    Some(direction * strength)
}

/// Sort rows by `(priority, entity)`.
pub fn sort_snapshot(agents: &mut [AvoidanceAgent]) {
    agents.sort_by(|a, b| {
        a.priority
            .total_cmp(&b.priority)
            .then_with(|| a.entity.cmp(&b.entity))
    });
}

/// Averaged push and contributor count for row `index` of a sorted
/// snapshot.
fn evaluate_agent(index: usize, agents: &[AvoidanceAgent], slack: f32) -> (Vec2, u32) {
    let a = &agents[index];
    let mut sum = Vec2::ZERO;
    let mut count = 0u32;
    for (j, b) in agents.iter().enumerate() {
        if !yields_to(a.priority, b.priority) {
            break;
        }
        if j == index {
            continue;
        }
        let reach = a.radius + b.radius + slack;
        if a.position.distance_squared(b.position) > reach * reach {
            continue;
        }
        if let Some(push) = separation_push(a, b, slack) {
            sum += push;
            count += 1;
        }
    }
    if count == 0 {
        (Vec2::ZERO, 0)
    } else {
        (sum / count as f32, count)
    }
}

/// Separation for every row of a sorted snapshot, in snapshot order.
pub fn separation_pass(agents: &[AvoidanceAgent], slack: f32, batch_size: usize) -> Vec<(Vec2, u32)> {
    let batch = batch_size.max(1);
    let eval_chunk = |chunk_index: usize, len: usize| -> Vec<(Vec2, u32)> {
        let start = chunk_index * batch;
        (start..start + len)
            .map(|i| evaluate_agent(i, agents, slack))
            .collect()
    };

    #[cfg(feature = "parallel")]
    let chunks: Vec<Vec<(Vec2, u32)>> = agents
        .par_chunks(batch)
        .enumerate()
        .map(|(c, chunk)| eval_chunk(c, chunk.len()))
        .collect();

    #[cfg(not(feature = "parallel"))]
    let chunks: Vec<Vec<(Vec2, u32)>> = agents
        .chunks(batch)
        .enumerate()
        .map(|(c, chunk)| eval_chunk(c, chunk.len()))
        .collect();

    chunks.into_iter().flatten().collect()
}

/// Per-actor input to the goal pass.
#[derive(Debug, Clone, Copy)]
struct GoalInput {
    entity: Entity,
    position: Vec2,
    navigation: Navigation,
    stats: ActorStats,
    key: u32,
}

/// Per-actor output of the goal pass.
#[derive(Debug, Clone, Copy)]
struct GoalOutput {
    agent: AvoidanceAgent,
    obstacle_push: Vec2,
}

fn evaluate_goal(input: &GoalInput, targets: &[ChaseTarget], obstacles: &[Obstacle]) -> GoalOutput {
    let goal = desired_heading(input.position, &input.navigation, &input.stats, targets);
    let (ratio, obstacle_push) = match nearest_obstacle_point(input.position, obstacles) {
        Some(point) => {
            let clearance = point.distance(input.position) - input.stats.radius;
            let ratio = obstacle_ratio(clearance);
            (ratio, (input.position - point) * (1.0 - ratio))
        }
        None => (1.0, Vec2::ZERO),
    };
    GoalOutput {
        agent: AvoidanceAgent {
            entity: input.entity,
            position: input.position,
            radius: input.stats.radius,
            priority: priority_value(input.key, goal.distance, ratio),
        },
        obstacle_push,
    }
}

/// System that recomputes priorities and separation pushes.
///
/// ## Data Access
/// - Reads: SimTick, SimConfig, Position, ActorStats, Navigation, Lifecycle, Obstacle
/// - Writes: Priority, Avoidance
pub fn avoidance_system(
    tick: Res<SimTick>,
    config: Res<SimConfig>,
    mut actors: Query<
        (
            Entity,
            &Position,
            &ActorStats,
            &Navigation,
            &Lifecycle,
            &mut Priority,
            &mut Avoidance,
        ),
        Without<InPool>,
    >,
    characters: Query<(Entity, &Position), (With<Character>, Without<Defeated>)>,
    obstacles: Query<&Obstacle>,
) {
    if !tick.every(config.avoidance_interval) {
        return;
    }

    let targets: Vec<ChaseTarget> = characters
        .iter()
        .map(|(entity, pos)| ChaseTarget {
            entity,
            position: pos.0,
        })
        .collect();
    let obstacles: Vec<Obstacle> = obstacles.iter().copied().collect();

    let inputs: Vec<GoalInput> = actors
        .iter()
        .filter(|(_, _, _, _, lifecycle, _, _)| lifecycle.is_engaged())
        .map(|(entity, pos, stats, navigation, _, priority, _)| GoalInput {
            entity,
            position: pos.0,
            navigation: *navigation,
            stats: *stats,
            key: priority.key,
        })
        .collect();

    #[cfg(feature = "parallel")]
    let goals: Vec<GoalOutput> = inputs
        .par_iter()
        .map(|input| evaluate_goal(input, &targets, &obstacles))
        .collect();

    #[cfg(not(feature = "parallel"))]
    let goals: Vec<GoalOutput> = inputs
        .iter()
        .map(|input| evaluate_goal(input, &targets, &obstacles))
        .collect();

    let mut agents: Vec<AvoidanceAgent> = goals.iter().map(|g| g.agent).collect();
    sort_snapshot(&mut agents);
    let pushes = separation_pass(&agents, config.avoidance_slack, config.batch_size);

    for goal in &goals {
        if let Ok((_, _, _, _, _, mut priority, mut avoidance)) = actors.get_mut(goal.agent.entity) {
            priority.value = goal.agent.priority;
            avoidance.obstacle_push = goal.obstacle_push;
        }
    }
    for (agent, (push, neighbors)) in agents.iter().zip(pushes) {
        if let Ok((_, _, _, _, _, _, mut avoidance)) = actors.get_mut(agent.entity) {
            avoidance.push = push;
            avoidance.neighbors = neighbors;
        }
    }
}
