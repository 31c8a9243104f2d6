//! Horde Arena - Simulation Core
//!
//! A fixed-timestep ECS simulation of large, pooled enemy hordes: rate-curve
//! spawning, priority-gated avoidance, melee and projectile combat with a
//! per-tick damage merge, and entity recycling.
//! Uses `bevy_ecs` for the entity-component-system architecture.

pub mod api;
pub mod components;
pub mod config;
pub mod context;
pub mod error;
pub mod events;
pub mod geometry;
pub mod pool;
pub mod spatial;
pub mod systems;
pub mod world;

pub use api::{ActorHandle, SimWorld};
pub use components::*;
pub use config::{ArenaConfig, ArenaRules, AttackStyle, SimConfig};
pub use error::{ConfigError, SimError};
pub use events::{EffectKind, SimEvent};
pub use pool::{EntityPool, PoolKey, PoolStats};
pub use spatial::{SpatialEntry, SpatialGrid};
pub use systems::*;
pub use world::Snapshot;
