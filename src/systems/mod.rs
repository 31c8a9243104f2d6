//! ECS systems for the horde simulation.
//!
//! Systems contain the game logic that operates on components.
//!
//! ## Phase Order
//!
//! Every tick runs one chained schedule (see [`crate::SimWorld`]). Chaining
//! inserts a sync point after each system that issued commands, so spawns,
//! tag changes and pool parking are visible to the next phase only:
//!
//! **Spawn**
//! - `spawn_scheduler_system` - triggers, scheduled spawns, wave batches
//!
//! **Movement**
//! - `activation_system` - Spawning -> Active
//! - `avoidance_system` - priorities and separation (throttled)
//! - `movement_system` - steering and position update
//! - `spatial_grid_update_system` - rebuild for the combat phase
//!
//! **Combat** - gathers in parallel batches, writes the damage ledger:
//! - `melee_combat_system`
//! - `projectile_fire_system`
//! - `projectile_update_system`
//!
//! **Resolution**
//! - `damage_apply_system` - merged damage, death path, hit flashes
//! - `bounds_check_system`
//! - `hit_flash_expiry_system`
//! - `turret_expiry_system`
//! - `pool_reclaim_system` - Dying -> Pooled

pub mod avoidance;
pub mod combat;
pub mod damage;
pub mod lifecycle;
pub mod movement;
pub mod projectile;
pub mod spawn;

pub use avoidance::*;
pub use combat::*;
pub use damage::*;
pub use lifecycle::*;
pub use movement::*;
pub use projectile::*;
pub use spawn::*;
