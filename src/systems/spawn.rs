//! Spawn scheduler - introduces actors on rate curves, schedules and triggers.
//!
//! Each tick the scheduler:
//! 1. Converts inbound pickup triggers into spawn orders, obstacles or
//!    time-limited turrets.
//! 2. Consumes scheduled spawns whose time has come, through a cursor that
//!    only ever moves forward.
//! 3. Fires a wave batch when the cooldown has elapsed, sized by the rate
//!    curve and clipped to the population cap.
//! 4. Realizes up to `max_spawns_per_tick` pending orders, reusing pooled
//!    entities first. Anything left over waits for the next tick.
//!
//! All structural changes go through `Commands` and land at the next sync
//! point, before activation runs.

use crate::components::*;
use crate::config::{ActorKind, ArenaRules, ScheduledSpawn, SimConfig, WaveConfig};
use crate::context::{SimClock, SimRng};
use crate::error::sim_invariant;
use crate::events::SimEvent;
use crate::pool::{EntityPool, PoolKey};
use bevy_ecs::prelude::*;
use glam::Vec2;
use rand::Rng;
use std::collections::VecDeque;

/// Live and cumulative actor counts.
#[derive(Resource, Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Population {
    pub alive: u32,
    pub total_spawned: u32,
    /// Cumulative wave spawns, compared against the cap without respawn.
    pub wave_spawned: u32,
}

/// Which path produced a spawn order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SpawnClass {
    Wave,
    Scheduled,
    Triggered,
}

/// One actor waiting to be placed.
#[derive(Debug, Clone)]
pub struct SpawnOrder {
    pub kind: KindId,
    pub position: Vec2,
    pub direction: Vec2,
    pub destination: Option<Vec2>,
    pub class: SpawnClass,
}

/// What a collected pickup asks for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TriggerKind {
    Actor(KindId),
    Obstacle(u32),
    /// Turret template id.
    Turret(u32),
}

/// Inbound "collected pickup of kind K at region R".
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SpawnTrigger {
    pub kind: TriggerKind,
    pub region: usize,
}

/// Triggers queued by the host since the last tick.
#[derive(Resource, Debug, Default)]
pub struct SpawnTriggers(pub Vec<SpawnTrigger>);

/// Scheduler state that persists across ticks.
#[derive(Resource, Debug)]
pub struct SpawnScheduler {
    last_wave_time: f32,
    scheduled: Vec<ScheduledSpawn>,
    cursor: usize,
    pending: VecDeque<SpawnOrder>,
    pending_wave: u32,
}

impl SpawnScheduler {
    pub fn new(mut scheduled: Vec<ScheduledSpawn>) -> Self {
        scheduled.sort_by(|a, b| a.time.total_cmp(&b.time));
        Self {
            last_wave_time: 0.0,
            scheduled,
            cursor: 0,
            pending: VecDeque::new(),
            pending_wave: 0,
        }
    }

    /// Scheduled entries due at `elapsed` that were not handed out before.
    pub fn take_due(&mut self, elapsed: f32) -> &[ScheduledSpawn] {
        let start = self.cursor;
        while self
            .scheduled
            .get(self.cursor)
            .is_some_and(|s| s.time <= elapsed)
        {
            self.cursor += 1;
        }
        &self.scheduled[start..self.cursor]
    }

    pub fn cursor(&self) -> usize {
        self.cursor
    }

    #[inline]
    pub fn wave_ready(&self, elapsed: f32, cooldown: f32) -> bool {
        elapsed - self.last_wave_time >= cooldown
    }

    /// Orders deferred to a later tick.
    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }
}

/// How many more wave actors the cap allows. `None` means unlimited.
pub fn wave_allowance(waves: &WaveConfig, population: &Population, pending_wave: u32) -> Option<u32> {
    if waves.spawn_infinity {
        return None;
    }
    let counted = if waves.allow_respawn {
        population.alive
    } else {
        population.wave_spawned
    };
    Some(waves.total_number.saturating_sub(counted + pending_wave))
}

/// Split `count` across `regions`: even shares, remainder to the last
/// region used. Never uses more regions than there are actors.
pub fn distribute(count: u32, regions: usize) -> Vec<u32> {
    let mut shares = vec![0; regions];
    if count == 0 || regions == 0 {
        return shares;
    }
    let used = regions.min(count as usize);
    let per = count / used as u32;
    for share in shares.iter_mut().take(used) {
        *share = per;
    }
    shares[used - 1] = count - per * (used as u32 - 1);
    shares
}

fn jitter<R: Rng + ?Sized>(rng: &mut R, band: (f32, f32)) -> f32 {
    let (lo, hi) = (band.0.min(band.1), band.0.max(band.1));
    lo + (hi - lo) * rng.gen::<f32>()
}

fn unit_or_up(v: Vec2) -> Vec2 {
    let n = v.normalize_or_zero();
    if n == Vec2::ZERO {
        Vec2::Y
    } else {
        n
    }
}

/// Build the component set for one incarnation of an actor.
pub fn actor_bundle<R: Rng + ?Sized>(
    kind: &ActorKind,
    order: &SpawnOrder,
    config: &SimConfig,
    rng: &mut R,
    now: f32,
    incarnation: u32,
) -> ActorBundle {
    let attack_delay = kind.attack_delay * jitter(rng, config.attack_delay_jitter);
    ActorBundle {
        kind: kind.id,
        incarnation: Incarnation(incarnation),
        position: Position(order.position),
        heading: Heading(unit_or_up(order.direction)),
        health: Health::new(kind.health),
        stats: ActorStats {
            speed: kind.speed * jitter(rng, config.speed_jitter),
            damage: kind.damage,
            attack_range: kind.attack_range,
            chasing_range: kind.chasing_range,
            attack_delay,
            radius: kind.radius,
            radius_for_damage: kind.radius_for_damage,
            attack_offset: kind.attack_offset,
            strike_delay: kind.strike_delay,
            attack_duration: kind.attack_duration,
            style: kind.attack_style,
        },
        timer: AttackTimer {
            ready_at: now + attack_delay,
        },
        lifecycle: Lifecycle::Spawning,
        navigation: Navigation {
            default_direction: unit_or_up(order.direction),
            destination: order.destination,
        },
        priority: Priority {
            key: kind.priority_key,
            value: kind.priority_key as f32 * 10_000.0,
        },
        avoidance: Avoidance::default(),
    }
}

/// System that schedules and places new actors.
#[allow(clippy::too_many_arguments)]
pub fn spawn_scheduler_system(
    mut commands: Commands,
    clock: Res<SimClock>,
    config: Res<SimConfig>,
    rules: Res<ArenaRules>,
    mut scheduler: ResMut<SpawnScheduler>,
    mut triggers: ResMut<SpawnTriggers>,
    mut population: ResMut<Population>,
    mut pool: ResMut<EntityPool>,
    mut rng: ResMut<SimRng>,
    mut events: EventWriter<SimEvent>,
    incarnations: Query<&Incarnation>,
) {
    let now = clock.elapsed;
    let rng = &mut rng.0;

    // Pickup triggers
    for trigger in triggers.0.drain(..) {
        let Some(region) = rules.waves.regions.get(trigger.region) else {
            tracing::warn!(?trigger, "spawn trigger references unknown region");
            continue;
        };
        match trigger.kind {
            TriggerKind::Actor(kind) => {
                if rules.kind(kind).is_none() {
                    tracing::warn!(?trigger, "spawn trigger references unknown actor kind");
                    continue;
                }
                scheduler.pending.push_back(SpawnOrder {
                    kind,
                    position: region.sample(rng),
                    direction: region.direction,
                    destination: region.destination,
                    class: SpawnClass::Triggered,
                });
            }
            TriggerKind::Obstacle(template) => {
                let Some(&shape) = rules.templates.get(&template) else {
                    tracing::warn!(?trigger, "spawn trigger references unknown obstacle");
                    continue;
                };
                let center = region.center();
                commands.spawn(Obstacle {
                    shape,
                    center,
                    orientation: 0.0,
                });
                tracing::debug!(template, ?center, "obstacle placed from trigger");
            }
            TriggerKind::Turret(id) => {
                let Some((shape, lifetime)) = rules.turret(id) else {
                    tracing::warn!(?trigger, "spawn trigger references unknown turret");
                    continue;
                };
                let center = region.center();
                commands.spawn((
                    Obstacle {
                        shape,
                        center,
                        orientation: 0.0,
                    },
                    Turret {
                        id,
                        expires_at: now + lifetime,
                    },
                ));
                tracing::debug!(id, ?center, lifetime, "turret placed from trigger");
            }
        }
    }

    // Scheduled spawns
    let due: Vec<SpawnOrder> = scheduler
        .take_due(now)
        .iter()
        .flat_map(|entry| {
            tracing::debug!(kind = entry.kind.0, time = entry.time, count = entry.count, "scheduled spawn due");
            (0..entry.count).map(move |_| SpawnOrder {
                kind: entry.kind,
                position: entry.position,
                direction: entry.direction,
                destination: entry.destination,
                class: SpawnClass::Scheduled,
            })
        })
        .collect();
    scheduler.pending.extend(due);

    // Wave batch
    let waves = &rules.waves;
    if waves.enabled && !waves.regions.is_empty() && !waves.kinds.is_empty() && scheduler.wave_ready(now, waves.cooldown) {
        let mut count = waves.rate.count_at(now);
        if let Some(allowance) = wave_allowance(waves, &population, scheduler.pending_wave) {
            count = count.min(allowance);
        }
        // A capped tick is not a wave; the cooldown runs from the last batch that fired.
        if count > 0 {
            scheduler.last_wave_time = now;
            for (region, share) in waves.regions.iter().zip(distribute(count, waves.regions.len())) {
                for _ in 0..share {
                    let kind = waves.kinds[rng.gen_range(0..waves.kinds.len())];
                    scheduler.pending.push_back(SpawnOrder {
                        kind,
                        position: region.sample(rng),
                        direction: region.direction,
                        destination: region.destination,
                        class: SpawnClass::Wave,
                    });
                }
            }
            scheduler.pending_wave += count;
            tracing::debug!(count, elapsed = now, "wave batch queued");
        }
    }

    // Realize pending orders within the per-tick budget
    let mut placed = 0;
    while placed < config.max_spawns_per_tick {
        let Some(order) = scheduler.pending.pop_front() else {
            break;
        };
        if order.class == SpawnClass::Wave {
            scheduler.pending_wave = scheduler.pending_wave.saturating_sub(1);
        }
        let Some(kind) = rules.kind(order.kind) else {
            sim_invariant!(false, "spawn order for unknown kind {:?}", order.kind);
            continue;
        };

        let recycled = pool
            .try_acquire(PoolKey::Actor(order.kind))
            .filter(|&entity| commands.get_entity(entity).is_some());
        let (entity, incarnation, reused) = match recycled {
            Some(entity) => {
                let incarnation = incarnations.get(entity).map(|i| i.0 + 1).unwrap_or(0);
                let bundle = actor_bundle(kind, &order, &config, rng, now, incarnation);
                let mut entity_commands = commands.entity(entity);
                entity_commands.insert(bundle).remove::<(InPool, HitFlash)>();
                if kind.boss {
                    entity_commands.insert(Boss);
                }
                (entity, incarnation, true)
            }
            None => {
                let bundle = actor_bundle(kind, &order, &config, rng, now, 0);
                let mut entity_commands = commands.spawn(bundle);
                if kind.boss {
                    entity_commands.insert(Boss);
                }
                (entity_commands.id(), 0, false)
            }
        };

        population.alive += 1;
        population.total_spawned += 1;
        if order.class == SpawnClass::Wave {
            population.wave_spawned += 1;
        }
        events.send(SimEvent::ActorSpawned {
            entity,
            kind: order.kind,
            incarnation,
            reused,
        });
        placed += 1;
    }

    if !scheduler.pending.is_empty() {
        tracing::debug!(deferred = scheduler.pending.len(), "spawn overflow deferred to next tick");
    }
    if placed > 0 {
        events.send(SimEvent::PopulationChanged {
            alive: population.alive,
            total_spawned: population.total_spawned,
        });
    }
}
