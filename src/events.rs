//! Outbound notifications for external collaborators (damage numbers,
//! effects playback, animation state, population counters).
//!
//! Systems write into `Events<SimEvent>`; the host drains them through
//! [`crate::SimWorld::drain_events`].

use crate::components::{KindId, LifecycleState};
use crate::systems::spawn::SpawnTrigger;
use bevy_ecs::prelude::*;
use glam::Vec2;

/// Visual effect requested from the effects player.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EffectKind {
    /// Debounced flash on a damaged actor.
    HitFlash,
    /// A projectile hit something.
    ProjectileImpact,
    /// A melee strike landed (emitted even on a whiff).
    StrikeImpact,
}

/// Everything the simulation tells the outside world.
#[derive(Event, Debug, Clone, PartialEq)]
pub enum SimEvent {
    /// Health changed after the per-tick merge.
    HealthChanged {
        entity: Entity,
        incarnation: u32,
        value: f32,
        lethal: bool,
    },
    HitEffect {
        position: Vec2,
        heading: Vec2,
        effect: EffectKind,
    },
    ActorSpawned {
        entity: Entity,
        kind: KindId,
        incarnation: u32,
        reused: bool,
    },
    /// An actor entered a new lifecycle state.
    LifecycleChanged {
        entity: Entity,
        incarnation: u32,
        state: LifecycleState,
    },
    /// The actor finished its teardown and is parked in the pool.
    ActorPooled {
        entity: Entity,
        kind: KindId,
    },
    PopulationChanged {
        alive: u32,
        total_spawned: u32,
    },
    /// A pickup was shot down; its trigger runs next tick.
    PickupCollected {
        entity: Entity,
        position: Vec2,
        trigger: SpawnTrigger,
    },
    TurretExpired {
        entity: Entity,
        id: u32,
    },
}
