//! Combat system - melee strikes and proximity attacks against characters.
//!
//! ## Complexity Analysis
//!
//! The combat phase has two parts:
//!
//! 1. **Gather** - O(n × k) where n = engaged actors, k = avg defenders per query
//!    - For each actor, query the spatial grid for characters in reach
//!    - Decide the lifecycle transition and the damage it deals
//!    - This is the expensive part and runs in parallel batches
//!
//! 2. **Apply** - O(n + m) where n = transitions, m = damage entries
//!    - Write lifecycle/timer changes back and merge damage into the
//!      per-tick ledger
//!    - Sequential, so no actor is written by two batches
//!
//! Damage is never applied here. Every hit goes into [`PendingDamage`] and
//! the damage phase subtracts the merged total once per target.

use crate::components::*;
use crate::config::{AttackStyle, SimConfig};
use crate::context::SimClock;
use crate::events::{EffectKind, SimEvent};
use crate::spatial::{Side, SpatialGrid};
use bevy_ecs::prelude::*;
use glam::Vec2;
use std::collections::HashMap;

#[cfg(feature = "parallel")]
use rayon::prelude::*;

/// Per-target damage merged over one tick.
///
/// Every damage source of a tick adds into the same ledger; the apply phase
/// drains it in entity order.
#[derive(Debug, Default, Clone)]
pub struct DamageLedger {
    damage: HashMap<Entity, f32>,
    events: usize,
}

impl DamageLedger {
    pub fn add(&mut self, target: Entity, amount: f32) {
        *self.damage.entry(target).or_insert(0.0) += amount;
        self.events += 1;
    }

    /// Merge another ledger into this one.
    pub fn merge(&mut self, other: DamageLedger) {
        for (entity, dmg) in other.damage {
            *self.damage.entry(entity).or_insert(0.0) += dmg;
        }
        self.events += other.events;
    }

    pub fn get(&self, target: Entity) -> f32 {
        self.damage.get(&target).copied().unwrap_or(0.0)
    }

    pub fn total(&self) -> f32 {
        self.damage.values().sum()
    }

    pub fn len(&self) -> usize {
        self.damage.len()
    }

    pub fn is_empty(&self) -> bool {
        self.damage.is_empty()
    }

    /// Number of individual damage events folded in.
    pub fn event_count(&self) -> usize {
        self.events
    }

    /// Take every merged entry, sorted by entity.
    pub fn drain_sorted(&mut self) -> Vec<(Entity, f32)> {
        let mut entries: Vec<(Entity, f32)> = self.damage.drain().collect();
        entries.sort_by_key(|(entity, _)| *entity);
        self.events = 0;
        entries
    }
}

/// Damage waiting for the next damage apply phase.
#[derive(Resource, Debug, Default)]
pub struct PendingDamage(pub DamageLedger);

/// Snapshot row for one engaged actor.
#[derive(Debug, Clone, Copy)]
struct AttackerData {
    entity: Entity,
    position: Vec2,
    heading: Vec2,
    stats: ActorStats,
    lifecycle: Lifecycle,
    ready_at: f32,
}

/// What one actor did this tick.
#[derive(Debug, Default, Clone)]
struct MeleeOutcome {
    lifecycle: Option<Lifecycle>,
    ready_at: Option<f32>,
    hits: Vec<(Entity, f32)>,
    effect: Option<(Vec2, Vec2)>,
}

/// Tuning the gather phase needs from `SimConfig`.
#[derive(Debug, Clone, Copy)]
struct MeleeRules {
    now: f32,
    cone_cos: f32,
    proximity: bool,
    proximity_check_distance: f32,
}

/// True when `target` lies inside the forward cone of an actor.
#[inline]
pub fn in_attack_cone(position: Vec2, heading: Vec2, target: Vec2, cone_cos: f32) -> bool {
    match (target - position).try_normalize() {
        Some(dir) => heading.normalize_or_zero().dot(dir) >= cone_cos,
        // Standing on the target counts as facing it.
        None => true,
    }
}

fn compute_melee(attacker: &AttackerData, grid: &SpatialGrid, rules: MeleeRules) -> MeleeOutcome {
    let mut out = MeleeOutcome::default();
    let stats = &attacker.stats;
    let now = rules.now;

    match attacker.lifecycle {
        Lifecycle::Active => match stats.style {
            AttackStyle::Strike => {
                if now < attacker.ready_at {
                    return out;
                }
                let Some(target) = grid.nearest(attacker.position, stats.attack_range, Side::Defender) else {
                    return out;
                };
                if in_attack_cone(attacker.position, attacker.heading, target.position, rules.cone_cos) {
                    out.lifecycle = Some(Lifecycle::Attacking {
                        started_at: now,
                        struck: false,
                    });
                }
            }
            AttackStyle::Proximity => {
                if !rules.proximity || now < attacker.ready_at {
                    return out;
                }
                if grid
                    .nearest(attacker.position, rules.proximity_check_distance, Side::Defender)
                    .is_none()
                {
                    return out;
                }
                let victims = grid.query_overlapping(attacker.position, stats.attack_range, Side::Defender);
                if victims.is_empty() {
                    return out;
                }
                out.hits = victims.iter().map(|v| (v.entity, stats.damage)).collect();
                out.ready_at = Some(now + stats.attack_delay);
            }
        },
        Lifecycle::Attacking { started_at, struck } => {
            let mut struck = struck;
            if !struck && now >= started_at + stats.strike_delay {
                let point = attacker.position + attacker.heading * stats.attack_offset;
                out.hits = grid
                    .query_overlapping(point, stats.radius_for_damage, Side::Defender)
                    .iter()
                    .map(|v| (v.entity, stats.damage))
                    .collect();
                out.effect = Some((point, attacker.heading));
                struck = true;
            }
            if now >= started_at + stats.attack_duration {
                out.lifecycle = Some(Lifecycle::Active);
                out.ready_at = Some(now + stats.attack_delay);
            } else if struck {
                out.lifecycle = Some(Lifecycle::Attacking { started_at, struck });
            }
        }
        _ => {}
    }
    out
}

/// System that resolves melee for every engaged actor.
///
/// ## Data Access
/// - Reads: SimClock, SimConfig, SpatialGrid, Position, Heading, ActorStats
/// - Writes: Lifecycle, AttackTimer, PendingDamage, SimEvent
pub fn melee_combat_system(
    clock: Res<SimClock>,
    config: Res<SimConfig>,
    grid: Res<SpatialGrid>,
    mut pending: ResMut<PendingDamage>,
    mut events: EventWriter<SimEvent>,
    mut actors: Query<
        (
            Entity,
            &Position,
            &Heading,
            &ActorStats,
            &mut Lifecycle,
            &mut AttackTimer,
            Option<&Incarnation>,
        ),
        Without<InPool>,
    >,
) {
    let rules = MeleeRules {
        now: clock.elapsed,
        cone_cos: config.attack_cone_deg.to_radians().cos(),
        proximity: config.enable_proximity_attacks,
        proximity_check_distance: config.proximity_check_distance,
    };

    let mut attackers: Vec<AttackerData> = actors
        .iter()
        .filter(|(_, _, _, _, lifecycle, ..)| lifecycle.is_engaged())
        .map(|(entity, pos, heading, stats, lifecycle, timer, _)| AttackerData {
            entity,
            position: pos.0,
            heading: heading.0,
            stats: *stats,
            lifecycle: *lifecycle,
            ready_at: timer.ready_at,
        })
        .collect();
    attackers.sort_by_key(|a| a.entity);

    let batch = config.batch_size.max(1);
    let grid: &SpatialGrid = &grid;

    #[cfg(feature = "parallel")]
    let outcomes: Vec<Vec<MeleeOutcome>> = attackers
        .par_chunks(batch)
        .map(|chunk| chunk.iter().map(|a| compute_melee(a, grid, rules)).collect())
        .collect();

    #[cfg(not(feature = "parallel"))]
    let outcomes: Vec<Vec<MeleeOutcome>> = attackers
        .chunks(batch)
        .map(|chunk| chunk.iter().map(|a| compute_melee(a, grid, rules)).collect())
        .collect();

    for (attacker, outcome) in attackers.iter().zip(outcomes.into_iter().flatten()) {
        for (target, amount) in outcome.hits {
            pending.0.add(target, amount);
        }
        if let Some((position, heading)) = outcome.effect {
            events.send(SimEvent::HitEffect {
                position,
                heading,
                effect: EffectKind::StrikeImpact,
            });
        }
        if outcome.lifecycle.is_none() && outcome.ready_at.is_none() {
            continue;
        }
        if let Ok((_, _, _, _, mut lifecycle, mut timer, incarnation)) = actors.get_mut(attacker.entity) {
            if let Some(next) = outcome.lifecycle {
                if next.state() != lifecycle.state() {
                    tracing::debug!(
                        entity = ?attacker.entity,
                        from = lifecycle.name(),
                        to = next.name(),
                        "melee transition"
                    );
                    events.send(SimEvent::LifecycleChanged {
                        entity: attacker.entity,
                        incarnation: incarnation.map_or(0, |i| i.0),
                        state: next.state(),
                    });
                }
                *lifecycle = next;
            }
            if let Some(ready_at) = outcome.ready_at {
                timer.ready_at = ready_at;
            }
        }
    }
}
