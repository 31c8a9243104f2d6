//! ECS Components for the horde simulation.
//!
//! Components are pure data containers attached to entities.
//! All game logic lives in systems that query these components.
//!
//! Actors and projectiles are recycled, so a bevy `Entity` alone does not
//! identify one incarnation of an actor. [`Incarnation`] is bumped on every
//! reuse and travels with external handles.

use bevy_ecs::prelude::*;
use glam::Vec2;
use serde::{Deserialize, Serialize};

/// Where pooled entities are parked, far outside any playable arena.
pub const PARK_POSITION: Vec2 = Vec2::new(999.0, 999.0);

// ============================================================================
// SPATIAL COMPONENTS
// ============================================================================

/// 2D position in the arena.
#[derive(Component, Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Position(pub Vec2);

impl Position {
    pub fn new(x: f32, y: f32) -> Self {
        Self(Vec2::new(x, y))
    }

    pub fn distance_to(&self, other: &Position) -> f32 {
        self.0.distance(other.0)
    }
}

/// Unit facing direction.
#[derive(Component, Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Heading(pub Vec2);

impl Default for Heading {
    fn default() -> Self {
        Self(Vec2::Y)
    }
}

// ============================================================================
// IDENTITY COMPONENTS
// ============================================================================

/// Actor kind id, keys the static kind table and the pool free-lists.
#[derive(
    Component, Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
pub struct KindId(pub u32);

/// Reuse counter for a pooled entity.
#[derive(Component, Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Incarnation(pub u32);

/// Marks the entity as sitting in a pool free-list.
#[derive(Component, Debug, Clone, Copy, Default)]
pub struct InPool;

/// Boss-class actor (scheduled spawns).
#[derive(Component, Debug, Clone, Copy, Default)]
pub struct Boss;

// ============================================================================
// COMBAT COMPONENTS
// ============================================================================

/// Health of an actor or character.
#[derive(Component, Debug, Clone, Copy, Serialize, Deserialize)]
pub struct Health {
    pub current: f32,
    pub max: f32,
}

impl Health {
    pub fn new(max: f32) -> Self {
        Self { current: max, max }
    }

    pub fn fraction(&self) -> f32 {
        if self.max <= 0.0 {
            0.0
        } else {
            (self.current / self.max).clamp(0.0, 1.0)
        }
    }

    pub fn is_alive(&self) -> bool {
        self.current > 0.0
    }

    /// Health only ever decreases here; a recycled actor gets a fresh
    /// `Health` instead.
    pub fn damage(&mut self, amount: f32) {
        self.current = (self.current - amount.max(0.0)).max(0.0);
    }
}

impl Default for Health {
    fn default() -> Self {
        Self::new(100.0)
    }
}

/// Per-incarnation actor stats, after spawn jitter.
#[derive(Component, Debug, Clone, Copy)]
pub struct ActorStats {
    pub speed: f32,
    pub damage: f32,
    pub attack_range: f32,
    pub chasing_range: f32,
    pub attack_delay: f32,
    pub radius: f32,
    pub radius_for_damage: f32,
    pub attack_offset: f32,
    pub strike_delay: f32,
    pub attack_duration: f32,
    pub style: crate::config::AttackStyle,
}

/// Earliest time the next attack may start.
#[derive(Component, Debug, Clone, Copy, Default)]
pub struct AttackTimer {
    pub ready_at: f32,
}

/// Transient hit-flash tag. Stripped when the flash interval lapses and
/// when the actor is pooled.
#[derive(Component, Debug, Clone, Copy)]
pub struct HitFlash {
    pub started_at: f32,
}

// ============================================================================
// LIFECYCLE
// ============================================================================

/// Single lifecycle state per actor.
#[derive(Component, Debug, Clone, Copy, PartialEq)]
pub enum Lifecycle {
    /// Placed this tick, heading not initialised yet.
    Spawning,
    Active,
    Attacking {
        started_at: f32,
        struck: bool,
    },
    /// Dead or out of bounds; released to the pool at `release_at`.
    Dying {
        release_at: f32,
    },
    Pooled,
}

impl Lifecycle {
    /// Participates in movement, combat and collision.
    #[inline]
    pub fn is_engaged(&self) -> bool {
        matches!(self, Lifecycle::Active | Lifecycle::Attacking { .. })
    }

    /// Can still receive damage.
    #[inline]
    pub fn is_live(&self) -> bool {
        matches!(
            self,
            Lifecycle::Spawning | Lifecycle::Active | Lifecycle::Attacking { .. }
        )
    }

    pub fn name(&self) -> &'static str {
        match self {
            Lifecycle::Spawning => "Spawning",
            Lifecycle::Active => "Active",
            Lifecycle::Attacking { .. } => "Attacking",
            Lifecycle::Dying { .. } => "Dying",
            Lifecycle::Pooled => "Pooled",
        }
    }

    /// The state without its timers, as reported to animation playback.
    pub fn state(&self) -> LifecycleState {
        match self {
            Lifecycle::Spawning => LifecycleState::Spawning,
            Lifecycle::Active => LifecycleState::Active,
            Lifecycle::Attacking { .. } => LifecycleState::Attacking,
            Lifecycle::Dying { .. } => LifecycleState::Dying,
            Lifecycle::Pooled => LifecycleState::Pooled,
        }
    }
}

/// Data-free mirror of [`Lifecycle`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum LifecycleState {
    Spawning,
    Active,
    Attacking,
    Dying,
    Pooled,
}

// ============================================================================
// NAVIGATION & AVOIDANCE
// ============================================================================

/// Where an actor walks when no target is in range.
#[derive(Component, Debug, Clone, Copy, Default)]
pub struct Navigation {
    pub default_direction: Vec2,
    pub destination: Option<Vec2>,
}

/// Avoidance precedence. Lower `value` never yields to higher.
#[derive(Component, Debug, Clone, Copy, Default)]
pub struct Priority {
    /// Static key from the kind table.
    pub key: u32,
    /// Dynamic value recomputed by the avoidance pass.
    pub value: f32,
}

/// Output of the last avoidance evaluation.
#[derive(Component, Debug, Clone, Copy, Default)]
pub struct Avoidance {
    /// Averaged separation push.
    pub push: Vec2,
    /// Repulsion away from the nearest obstacle.
    pub obstacle_push: Vec2,
    pub neighbors: u32,
}

impl Avoidance {
    #[inline]
    pub fn total(&self) -> Vec2 {
        self.push + self.obstacle_push
    }
}

// ============================================================================
// CHARACTERS, PROJECTILES, OBSTACLES
// ============================================================================

/// Player-side defender. Aggro target and melee victim.
#[derive(Component, Debug, Clone, Copy)]
pub struct Character {
    pub radius: f32,
}

/// Character whose health reached zero.
#[derive(Component, Debug, Clone, Copy, Default)]
pub struct Defeated;

/// Player-fired projectile.
#[derive(Component, Debug, Clone, Copy)]
pub struct Projectile {
    pub damage: f32,
    pub speed: f32,
    pub spawn_time: f32,
}

/// Static obstacle placed in the arena.
#[derive(Component, Debug, Clone, Copy)]
pub struct Obstacle {
    pub shape: crate::geometry::ObstacleShape,
    pub center: Vec2,
    pub orientation: f32,
}

impl Obstacle {
    #[inline]
    pub fn closest_point(&self, point: Vec2) -> Vec2 {
        self.shape.closest_point(self.center, self.orientation, point)
    }
}

/// Time-limited obstacle placed by a pickup. Despawned at `expires_at`.
#[derive(Component, Debug, Clone, Copy, PartialEq)]
pub struct Turret {
    pub id: u32,
    pub expires_at: f32,
}

/// Shootable pickup. Collected when projectiles bring its health to zero,
/// which queues `trigger` for the next spawn phase.
#[derive(Component, Debug, Clone, Copy, PartialEq)]
pub struct Pickup {
    pub trigger: crate::systems::spawn::SpawnTrigger,
    pub radius: f32,
}

// ============================================================================
// BUNDLES
// ============================================================================

/// Everything a (fresh or recycled) actor carries.
#[derive(Bundle)]
pub struct ActorBundle {
    pub kind: KindId,
    pub incarnation: Incarnation,
    pub position: Position,
    pub heading: Heading,
    pub health: Health,
    pub stats: ActorStats,
    pub timer: AttackTimer,
    pub lifecycle: Lifecycle,
    pub navigation: Navigation,
    pub priority: Priority,
    pub avoidance: Avoidance,
}

/// Everything a (fresh or recycled) projectile carries.
#[derive(Bundle)]
pub struct ProjectileBundle {
    pub projectile: Projectile,
    pub position: Position,
    pub heading: Heading,
}

/// Player-side character.
#[derive(Bundle)]
pub struct CharacterBundle {
    pub character: Character,
    pub position: Position,
    pub health: Health,
}

impl CharacterBundle {
    pub fn new(position: Vec2, health: f32, radius: f32) -> Self {
        Self {
            character: Character { radius },
            position: Position(position),
            health: Health::new(health),
        }
    }
}

/// A shootable pickup waiting in the arena.
#[derive(Bundle)]
pub struct PickupBundle {
    pub pickup: Pickup,
    pub position: Position,
    pub health: Health,
    pub incarnation: Incarnation,
}

impl PickupBundle {
    pub fn new(position: Vec2, health: f32, radius: f32, trigger: crate::systems::spawn::SpawnTrigger) -> Self {
        Self {
            pickup: Pickup { trigger, radius },
            position: Position(position),
            health: Health::new(health),
            incarnation: Incarnation(0),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_health_never_increases_through_damage() {
        let mut health = Health::new(50.0);
        health.damage(-10.0);
        assert_eq!(health.current, 50.0);
        health.damage(20.0);
        assert_eq!(health.current, 30.0);
        health.damage(100.0);
        assert_eq!(health.current, 0.0);
        assert!(!health.is_alive());
        assert_eq!(health.fraction(), 0.0);
    }

    #[test]
    fn test_lifecycle_predicates() {
        assert!(Lifecycle::Active.is_engaged());
        assert!(Lifecycle::Attacking {
            started_at: 0.0,
            struck: false
        }
        .is_engaged());
        assert!(!Lifecycle::Spawning.is_engaged());
        assert!(Lifecycle::Spawning.is_live());
        assert!(!Lifecycle::Dying { release_at: 1.0 }.is_live());
        assert!(!Lifecycle::Pooled.is_live());
        assert_eq!(Lifecycle::Pooled.name(), "Pooled");
        assert_eq!(
            Lifecycle::Attacking {
                started_at: 2.0,
                struck: true
            }
            .state(),
            LifecycleState::Attacking
        );
        assert_eq!(Lifecycle::Dying { release_at: 1.0 }.state(), LifecycleState::Dying);
    }
}
