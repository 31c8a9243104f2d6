//! Public API for the simulation.
//!
//! This module provides the main interface for a host (game loop, renderer,
//! tests) to drive the horde simulation and exchange events with it.
//!
//! ## Fixed Timestep
//!
//! The simulation uses a fixed timestep internally (default 30 Hz). When `step(dt)` is called,
//! the simulation accumulates time and runs fixed updates as needed. Timers (cooldowns,
//! teardown delays, flash intervals) are compared against the elapsed simulation time.
//!
//! ## Tick Phases
//!
//! Every fixed update runs one chained schedule; deferred structural
//! changes of a phase are applied before the next phase starts:
//!
//! 1. spawn
//! 2. activation, avoidance (throttled), movement
//! 3. spatial grid rebuild
//! 4. melee, projectile fire, projectile sweep
//! 5. damage merge and apply
//! 6. bounds check, hit-flash and turret expiry
//! 7. pool reclamation
//!
//! ## Outbound Events
//!
//! Events produced by a tick are moved into an outbox owned by
//! [`SimWorld`] and stay there until [`SimWorld::drain_events`] is called.
//! Hosts are expected to drain once per `step`. The outbox keeps at most
//! [`SimConfig::max_queued_events`] entries; past that the oldest are
//! dropped and counted in [`SimWorld::dropped_events`].

use crate::components::*;
use crate::config::{ArenaConfig, ArenaRules, SimConfig};
use crate::context::{DeltaTime, SimClock, SimRng, SimTick};
use crate::error::{ConfigError, SimError};
use crate::events::SimEvent;
use crate::pool::{EntityPool, PoolKey, PoolStats};
use crate::spatial::{spatial_grid_update_system, SpatialGrid};
use crate::systems::*;
use crate::world::Snapshot;
use bevy_ecs::prelude::*;
use glam::Vec2;
use std::collections::VecDeque;

/// Body radius of characters created through [`SimWorld::spawn_character`].
pub const CHARACTER_RADIUS: f32 = 0.5;

/// Collision radius of pickups created through [`SimWorld::spawn_pickup`].
pub const PICKUP_RADIUS: f32 = 0.5;

/// Stable reference to an actor or character.
///
/// Pooled entities are reused, so the entity alone is not enough: the
/// incarnation changes every time the entity is handed out again.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ActorHandle {
    pub entity: Entity,
    pub incarnation: u32,
}

/// The main simulation world container.
///
/// Holds the ECS world and schedule, providing a clean API for:
/// - Initializing the simulation from an arena config
/// - Stepping the simulation forward
/// - Feeding inbound requests (fire, pickups, external damage)
/// - Draining outbound events and extracting snapshots
pub struct SimWorld {
    world: World,
    schedule: Schedule,
    tick: u64,
    time: f32,
    /// Accumulated time for fixed timestep.
    time_accumulator: f32,
    outbox: VecDeque<SimEvent>,
    dropped_events: u64,
}

impl SimWorld {
    /// Create a simulation world from a validated arena.
    pub fn new(arena: ArenaConfig, config: SimConfig) -> Result<Self, ConfigError> {
        arena.validate()?;
        let rules = ArenaRules::from_config(&arena);

        let mut world = World::new();

        // Core resources
        world.insert_resource(DeltaTime(config.fixed_timestep));
        world.insert_resource(SimTick(0));
        world.insert_resource(SimClock::default());
        world.insert_resource(SimRng::from_seed(config.seed));
        world.insert_resource(SpatialGrid::new(config.cell_size));

        // Pools, one list per kind plus projectiles
        let keys = arena
            .kinds
            .iter()
            .map(|k| PoolKey::Actor(k.id))
            .chain(std::iter::once(PoolKey::Projectile));
        world.insert_resource(EntityPool::new(
            keys,
            config.pool_initial_capacity,
            config.pool_margin,
        ));

        // Phase hand-off resources
        world.insert_resource(SpawnScheduler::new(arena.scheduled.clone()));
        world.init_resource::<SpawnTriggers>();
        world.init_resource::<Population>();
        world.init_resource::<PendingDamage>();
        world.init_resource::<FireRequests>();
        world.init_resource::<Events<SimEvent>>();

        for placement in &arena.obstacles {
            let Some(&shape) = rules.templates.get(&placement.template) else {
                return Err(ConfigError::UnknownObstacle {
                    template: placement.template,
                    context: "obstacle placement".to_string(),
                });
            };
            world.spawn(Obstacle {
                shape,
                center: placement.center,
                orientation: placement.orientation,
            });
        }

        world.insert_resource(rules);
        world.insert_resource(config);

        let mut schedule = Schedule::default();
        schedule.add_systems(
            (
                spawn_scheduler_system,
                activation_system,
                avoidance_system,
                movement_system,
                spatial_grid_update_system,
                melee_combat_system,
                projectile_fire_system,
                projectile_update_system,
                damage_apply_system,
                bounds_check_system,
                hit_flash_expiry_system,
                turret_expiry_system,
                pool_reclaim_system,
            )
                .chain(),
        );

        tracing::info!(
            kinds = arena.kinds.len(),
            obstacles = arena.obstacles.len(),
            "simulation world created"
        );

        Ok(Self {
            world,
            schedule,
            tick: 0,
            time: 0.0,
            time_accumulator: 0.0,
            outbox: VecDeque::new(),
            dropped_events: 0,
        })
    }

    /// Step the simulation forward by `dt` seconds.
    ///
    /// Uses fixed timestep internally - accumulates time and runs fixed updates
    /// as needed.
    pub fn step(&mut self, dt: f32) {
        let fixed_dt = self
            .world
            .get_resource::<SimConfig>()
            .map(|c| c.fixed_timestep)
            .unwrap_or(1.0 / 30.0);

        self.time_accumulator += dt;

        while self.time_accumulator >= fixed_dt {
            self.fixed_update(fixed_dt);
            self.time_accumulator -= fixed_dt;
        }
    }

    /// Run a single fixed timestep update.
    fn fixed_update(&mut self, dt: f32) {
        if let Some(mut dt_res) = self.world.get_resource_mut::<DeltaTime>() {
            dt_res.0 = dt;
        }
        if let Some(mut tick_res) = self.world.get_resource_mut::<SimTick>() {
            tick_res.increment();
        }
        if let Some(mut clock) = self.world.get_resource_mut::<SimClock>() {
            clock.elapsed = self.time + dt;
        }

        self.schedule.run(&mut self.world);
        self.collect_events();

        self.tick += 1;
        self.time += dt;
    }

    /// Move this tick's events into the outbox, dropping the oldest past
    /// the configured cap.
    fn collect_events(&mut self) {
        let cap = self
            .world
            .get_resource::<SimConfig>()
            .map_or(usize::MAX, |c| c.max_queued_events);
        let mut events = self.world.resource_mut::<Events<SimEvent>>();
        self.outbox.extend(events.drain());

        let excess = self.outbox.len().saturating_sub(cap);
        if excess > 0 {
            self.outbox.drain(..excess);
            self.dropped_events += excess as u64;
            tracing::warn!(
                dropped = excess,
                total_dropped = self.dropped_events,
                "event outbox full, oldest events dropped"
            );
        }
    }

    /// Get the current tick number.
    pub fn current_tick(&self) -> u64 {
        self.tick
    }

    /// Get the elapsed simulation time.
    pub fn current_time(&self) -> f32 {
        self.time
    }

    /// Add a player-side character. Characters are aggro targets and melee
    /// victims; they are never pooled.
    pub fn spawn_character(&mut self, position: Vec2, health: f32) -> ActorHandle {
        let entity = self
            .world
            .spawn((
                CharacterBundle::new(position, health, CHARACTER_RADIUS),
                Incarnation(0),
            ))
            .id();
        ActorHandle {
            entity,
            incarnation: 0,
        }
    }

    /// Move a character, e.g. to follow player input.
    pub fn move_character(&mut self, handle: ActorHandle, position: Vec2) -> Result<(), SimError> {
        if !self.is_alive(handle) {
            return Err(SimError::StaleHandle(handle));
        }
        if !self.world_has::<Character>(handle.entity) {
            return Err(SimError::StaleHandle(handle));
        }
        match self.world.get_mut::<Position>(handle.entity) {
            Some(mut pos) => {
                pos.0 = position;
                Ok(())
            }
            None => Err(SimError::StaleHandle(handle)),
        }
    }

    fn world_has<T: Component>(&self, entity: Entity) -> bool {
        self.world.get::<T>(entity).is_some()
    }

    /// Handle of an entity as it is right now.
    pub fn handle_of(&self, entity: Entity) -> Option<ActorHandle> {
        self.world.get::<Incarnation>(entity).map(|inc| ActorHandle {
            entity,
            incarnation: inc.0,
        })
    }

    /// Place a shootable pickup. Projectiles wear it down; at zero health
    /// `trigger` runs as if [`SimWorld::trigger_spawn`] had been called.
    pub fn spawn_pickup(
        &mut self,
        position: Vec2,
        health: f32,
        trigger: SpawnTrigger,
    ) -> Result<ActorHandle, SimError> {
        self.validate_trigger(trigger)?;
        let entity = self
            .world
            .spawn(PickupBundle::new(position, health, PICKUP_RADIUS, trigger))
            .id();
        tracing::debug!(?entity, ?position, ?trigger, "pickup placed");
        Ok(ActorHandle {
            entity,
            incarnation: 0,
        })
    }

    /// True while the handle refers to an actor, character or pickup that
    /// can still take damage.
    pub fn is_alive(&self, handle: ActorHandle) -> bool {
        let entity = handle.entity;
        if self.world.get::<Incarnation>(entity).map(|i| i.0) != Some(handle.incarnation) {
            return false;
        }
        if self.world_has::<InPool>(entity) {
            return false;
        }
        if let Some(lifecycle) = self.world.get::<Lifecycle>(entity) {
            return lifecycle.is_live();
        }
        if self.world_has::<Pickup>(entity) {
            return self.world.get::<Health>(entity).is_some_and(Health::is_alive);
        }
        self.world_has::<Character>(entity) && !self.world_has::<Defeated>(entity)
    }

    /// Queue a weapon burst for the next tick.
    pub fn fire(&mut self, request: FireRequest) {
        self.world.resource_mut::<FireRequests>().0.push(request);
    }

    /// Queue a pickup trigger for the next tick.
    pub fn trigger_spawn(&mut self, trigger: SpawnTrigger) -> Result<(), SimError> {
        self.validate_trigger(trigger)?;
        self.world.resource_mut::<SpawnTriggers>().0.push(trigger);
        Ok(())
    }

    fn validate_trigger(&self, trigger: SpawnTrigger) -> Result<(), SimError> {
        let rules = self.world.resource::<ArenaRules>();
        if trigger.region >= rules.waves.regions.len() {
            return Err(ConfigError::UnknownRegion {
                index: trigger.region,
                context: "spawn trigger".to_string(),
            }
            .into());
        }
        match trigger.kind {
            TriggerKind::Actor(kind) => {
                rules.require_kind(kind, "spawn trigger")?;
            }
            TriggerKind::Obstacle(template) => {
                if !rules.templates.contains_key(&template) {
                    return Err(ConfigError::UnknownObstacle {
                        template,
                        context: "spawn trigger".to_string(),
                    }
                    .into());
                }
            }
            TriggerKind::Turret(id) => {
                if rules.turret(id).is_none() {
                    return Err(ConfigError::UnknownTurret {
                        template: id,
                        context: "spawn trigger".to_string(),
                    }
                    .into());
                }
            }
        }
        Ok(())
    }

    /// Queue external damage. It is merged with the next tick's combat
    /// damage and applied once.
    pub fn apply_damage(&mut self, handle: ActorHandle, amount: f32) -> Result<(), SimError> {
        if !self.is_alive(handle) {
            return Err(SimError::StaleHandle(handle));
        }
        self.world
            .resource_mut::<PendingDamage>()
            .0
            .add(handle.entity, amount.max(0.0));
        Ok(())
    }

    /// Take every outbound event produced since the last drain, oldest
    /// first.
    pub fn drain_events(&mut self) -> Vec<SimEvent> {
        self.outbox.drain(..).collect()
    }

    /// Events discarded because the outbox was full.
    pub fn dropped_events(&self) -> u64 {
        self.dropped_events
    }

    /// Get a snapshot of the current simulation state.
    pub fn snapshot(&mut self) -> Snapshot {
        Snapshot::from_world(&mut self.world, self.tick, self.time)
    }

    /// Get the snapshot as a JSON string.
    pub fn snapshot_json(&mut self) -> String {
        self.snapshot().to_json().unwrap_or_else(|_| "{}".to_string())
    }

    pub fn population(&self) -> Population {
        *self.world.resource::<Population>()
    }

    pub fn pool_stats(&self) -> Vec<PoolStats> {
        self.world.resource::<EntityPool>().stats()
    }

    /// Get the spatial grid reference (for debugging/visualization).
    pub fn spatial_grid(&self) -> Option<&SpatialGrid> {
        self.world.get_resource::<SpatialGrid>()
    }

    /// Get direct access to the ECS world (for advanced usage).
    pub fn world(&self) -> &World {
        &self.world
    }

    /// Get mutable access to the ECS world (for advanced usage).
    pub fn world_mut(&mut self) -> &mut World {
        &mut self.world
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{RateCurve, WaveConfig};
    use crate::events::EffectKind;

    fn quiet_arena() -> ArenaConfig {
        ArenaConfig {
            waves: WaveConfig {
                enabled: false,
                ..ArenaConfig::default().waves
            },
            scheduled: Vec::new(),
            ..Default::default()
        }
    }

    fn first_actor(sim: &mut SimWorld) -> Option<ActorHandle> {
        let entity = sim
            .world_mut()
            .query_filtered::<Entity, (With<KindId>, Without<InPool>)>()
            .iter(sim.world())
            .next()?;
        sim.handle_of(entity)
    }

    #[test]
    fn test_new_world() {
        let sim = SimWorld::new(ArenaConfig::default(), SimConfig::default()).unwrap();
        assert_eq!(sim.current_tick(), 0);
        assert_eq!(sim.population(), Population::default());
    }

    #[test]
    fn test_invalid_arena_is_rejected() {
        let mut arena = ArenaConfig::default();
        arena.waves.kinds.push(KindId(999));
        assert!(matches!(
            SimWorld::new(arena, SimConfig::default()),
            Err(ConfigError::UnknownKind { kind: 999, .. })
        ));
    }

    #[test]
    fn test_step_advances_tick() {
        let mut sim = SimWorld::new(quiet_arena(), SimConfig::default()).unwrap();
        sim.step(0.05);
        assert_eq!(sim.current_tick(), 1);
        sim.step(0.02);
        assert_eq!(sim.current_tick(), 2);
    }

    #[test]
    fn test_obstacles_placed_at_load() {
        let mut sim = SimWorld::new(ArenaConfig::default(), SimConfig::default()).unwrap();
        let snapshot = sim.snapshot();
        assert_eq!(snapshot.obstacles.len(), ArenaConfig::default().obstacles.len());
    }

    #[test]
    fn test_trigger_validation() {
        let mut sim = SimWorld::new(quiet_arena(), SimConfig::default()).unwrap();
        let bad_kind = SpawnTrigger {
            kind: TriggerKind::Actor(KindId(77)),
            region: 0,
        };
        assert!(matches!(
            sim.trigger_spawn(bad_kind),
            Err(SimError::Config(ConfigError::UnknownKind { kind: 77, .. }))
        ));
        let bad_region = SpawnTrigger {
            kind: TriggerKind::Actor(KindId(1)),
            region: 42,
        };
        assert!(matches!(
            sim.trigger_spawn(bad_region),
            Err(SimError::Config(ConfigError::UnknownRegion { index: 42, .. }))
        ));
        let bad_obstacle = SpawnTrigger {
            kind: TriggerKind::Obstacle(9),
            region: 0,
        };
        assert!(sim.trigger_spawn(bad_obstacle).is_err());
        let bad_turret = SpawnTrigger {
            kind: TriggerKind::Turret(9),
            region: 0,
        };
        assert!(matches!(
            sim.trigger_spawn(bad_turret),
            Err(SimError::Config(ConfigError::UnknownTurret { template: 9, .. }))
        ));
        assert!(sim.spawn_pickup(Vec2::ZERO, 10.0, bad_turret).is_err());
        assert!(sim.world().resource::<SpawnTriggers>().0.is_empty());
    }

    #[test]
    fn test_event_outbox_is_bounded() {
        let config = SimConfig {
            max_queued_events: 4,
            ..Default::default()
        };
        let mut sim = SimWorld::new(quiet_arena(), config).unwrap();
        for _ in 0..3 {
            sim.trigger_spawn(SpawnTrigger {
                kind: TriggerKind::Actor(KindId(1)),
                region: 0,
            })
            .unwrap();
        }
        // Three spawns, a population update and three activations.
        sim.step(1.0 / 30.0);
        assert_eq!(sim.dropped_events(), 3);

        let events = sim.drain_events();
        assert_eq!(events.len(), 4);
        assert!(matches!(events[0], SimEvent::PopulationChanged { alive: 3, .. }));
        assert!(events[1..]
            .iter()
            .all(|e| matches!(e, SimEvent::LifecycleChanged { .. })));
        assert!(sim.drain_events().is_empty());

        // Undrained events survive quiet ticks.
        sim.trigger_spawn(SpawnTrigger {
            kind: TriggerKind::Actor(KindId(1)),
            region: 0,
        })
        .unwrap();
        for _ in 0..10 {
            sim.step(1.0 / 30.0);
        }
        assert_eq!(sim.drain_events().len(), 3);
    }

    #[test]
    fn test_pickup_handle_goes_stale_when_collected() {
        let mut sim = SimWorld::new(quiet_arena(), SimConfig::default()).unwrap();
        let trigger = SpawnTrigger {
            kind: TriggerKind::Actor(KindId(2)),
            region: 1,
        };
        let pickup = sim.spawn_pickup(Vec2::new(5.0, 5.0), 20.0, trigger).unwrap();
        assert!(sim.is_alive(pickup));

        sim.apply_damage(pickup, 50.0).unwrap();
        sim.step(1.0 / 30.0);
        assert!(!sim.is_alive(pickup));
        assert!(sim.apply_damage(pickup, 1.0).is_err());

        // The trigger runs on the following tick.
        sim.step(1.0 / 30.0);
        assert_eq!(sim.population().alive, 1);
        let events = sim.drain_events();
        assert!(events.iter().any(|e| matches!(
            e,
            SimEvent::PickupCollected { entity, trigger: t, .. } if *entity == pickup.entity && *t == trigger
        )));
    }

    #[test]
    fn test_trigger_spawns_actor_next_tick() {
        let mut sim = SimWorld::new(quiet_arena(), SimConfig::default()).unwrap();
        sim.trigger_spawn(SpawnTrigger {
            kind: TriggerKind::Actor(KindId(1)),
            region: 0,
        })
        .unwrap();
        sim.step(1.0 / 30.0);

        assert_eq!(sim.population().alive, 1);
        let events = sim.drain_events();
        assert!(events
            .iter()
            .any(|e| matches!(e, SimEvent::ActorSpawned { reused: false, .. })));
        assert_eq!(sim.snapshot().actors[0].state, "Active");
    }

    #[test]
    fn test_external_damage_kills_and_handle_goes_stale() {
        let mut sim = SimWorld::new(quiet_arena(), SimConfig::default()).unwrap();
        sim.trigger_spawn(SpawnTrigger {
            kind: TriggerKind::Actor(KindId(1)),
            region: 0,
        })
        .unwrap();
        sim.step(1.0 / 30.0);
        let handle = first_actor(&mut sim).unwrap();
        sim.drain_events();

        sim.apply_damage(handle, 10_000.0).unwrap();
        sim.step(1.0 / 30.0);
        let events = sim.drain_events();
        assert!(events
            .iter()
            .any(|e| matches!(e, SimEvent::HealthChanged { lethal: true, .. })));

        // Dying actors no longer accept damage.
        assert!(matches!(
            sim.apply_damage(handle, 1.0),
            Err(SimError::StaleHandle(h)) if h == handle
        ));
    }

    #[test]
    fn test_character_targets_and_moves() {
        let mut sim = SimWorld::new(quiet_arena(), SimConfig::default()).unwrap();
        let hero = sim.spawn_character(Vec2::new(1.0, 1.0), 100.0);
        assert!(sim.is_alive(hero));
        sim.move_character(hero, Vec2::new(4.0, -2.0)).unwrap();
        let snapshot = sim.snapshot();
        assert_eq!((snapshot.characters[0].x, snapshot.characters[0].y), (4.0, -2.0));

        sim.apply_damage(hero, 100.0).unwrap();
        sim.step(1.0 / 30.0);
        assert!(!sim.is_alive(hero));
        assert!(sim.move_character(hero, Vec2::ZERO).is_err());
        assert!(sim.snapshot().characters[0].defeated);
    }

    #[test]
    fn test_fire_hits_actor() {
        let mut arena = quiet_arena();
        arena.weapon.speed_jitter = 0.0;
        arena.weapon.damage_ratio = RateCurve::constant(1.0);
        let mut sim = SimWorld::new(arena, SimConfig::default()).unwrap();
        sim.trigger_spawn(SpawnTrigger {
            kind: TriggerKind::Actor(KindId(1)),
            region: 0,
        })
        .unwrap();
        sim.step(1.0 / 30.0);
        let handle = first_actor(&mut sim).unwrap();
        let target = {
            let snapshot = sim.snapshot();
            Vec2::new(snapshot.actors[0].x, snapshot.actors[0].y)
        };
        sim.drain_events();

        sim.fire(FireRequest {
            origin: target - Vec2::new(0.0, 1.5),
            heading: Vec2::Y,
            bullets_per_shot: 1,
            spread: Spread::Angular { step_deg: 5.0 },
            damage: 7.0,
            speed: 30.0,
        });
        sim.step(1.0 / 30.0);

        let events = sim.drain_events();
        assert!(events.iter().any(|e| matches!(
            e,
            SimEvent::HealthChanged { entity, .. } if *entity == handle.entity
        )));
        assert!(events.iter().any(|e| matches!(
            e,
            SimEvent::HitEffect {
                effect: EffectKind::ProjectileImpact,
                ..
            }
        )));
        let projectile_pool = sim
            .pool_stats()
            .into_iter()
            .find(|s| s.key == PoolKey::Projectile)
            .unwrap();
        assert_eq!(projectile_pool.free, 1);
    }

    #[test]
    fn test_snapshot_json() {
        let mut sim = SimWorld::new(ArenaConfig::default(), SimConfig::default()).unwrap();
        sim.spawn_character(Vec2::ZERO, 100.0);
        let json = sim.snapshot_json();
        assert!(json.contains("characters"));
        assert!(json.contains("obstacles"));
    }

    #[test]
    fn test_stress_horde() {
        use std::time::Instant;

        let mut arena = ArenaConfig::default();
        arena.waves.rate = RateCurve::constant(60.0);
        arena.waves.cooldown = 0.5;
        arena.waves.total_number = 1000;
        arena.waves.allow_respawn = false;
        arena.waves.spawn_infinity = false;
        let config = SimConfig {
            fixed_timestep: 1.0 / 20.0,
            ..Default::default()
        };
        let mut sim = SimWorld::new(arena, config).unwrap();
        sim.spawn_character(Vec2::ZERO, 1_000_000.0);

        let start = Instant::now();
        for _ in 0..200 {
            sim.step(0.05);
        }
        let elapsed = start.elapsed();
        let population = sim.population();
        println!(
            "{} alive, {} ticks in {:?}",
            population.alive,
            sim.current_tick(),
            elapsed
        );

        assert!(population.total_spawned <= 1000);
        assert!(population.alive > 0);
        assert!(elapsed.as_secs() < 60, "Simulation too slow: {:?}", elapsed);
    }
}
