//! Snapshot types.
//!
//! The `Snapshot` struct provides a serializable view of the simulation state
//! that a renderer or UI collaborator can consume without touching the ECS.

use crate::components::*;
use crate::pool::PoolStats;
use crate::systems::spawn::Population;
use bevy_ecs::prelude::*;
use serde::{Deserialize, Serialize};

/// Snapshot of one active (non-pooled) actor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActorSnapshot {
    pub entity: u64,
    pub incarnation: u32,
    pub kind: u32,
    pub x: f32,
    pub y: f32,
    pub heading_x: f32,
    pub heading_y: f32,
    pub health: f32,
    pub health_max: f32,
    pub state: String,
    pub boss: bool,
    pub flashing: bool,
}

/// Snapshot of one live projectile.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProjectileSnapshot {
    pub entity: u64,
    pub x: f32,
    pub y: f32,
    pub heading_x: f32,
    pub heading_y: f32,
    pub damage: f32,
}

/// Snapshot of a player-side character.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CharacterSnapshot {
    pub entity: u64,
    pub x: f32,
    pub y: f32,
    pub health: f32,
    pub health_max: f32,
    pub defeated: bool,
}

/// Snapshot of an obstacle. Turrets carry their expiry time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ObstacleSnapshot {
    pub shape: String,
    pub x: f32,
    pub y: f32,
    pub orientation: f32,
    pub bounding_radius: f32,
    #[serde(default)]
    pub expires_at: Option<f32>,
}

/// Snapshot of a pickup that has not been shot down yet.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PickupSnapshot {
    pub entity: u64,
    pub x: f32,
    pub y: f32,
    pub health: f32,
    pub health_max: f32,
}

/// Population counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct PopulationSnapshot {
    pub alive: u32,
    pub total_spawned: u32,
    pub wave_spawned: u32,
}

impl From<&Population> for PopulationSnapshot {
    fn from(p: &Population) -> Self {
        Self {
            alive: p.alive,
            total_spawned: p.total_spawned,
            wave_spawned: p.wave_spawned,
        }
    }
}

/// Complete simulation state snapshot.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Snapshot {
    /// Current simulation tick.
    pub tick: u64,
    /// Elapsed simulation time in seconds.
    pub time: f32,
    pub population: PopulationSnapshot,
    /// Actors outside the pool, ordered by entity.
    pub actors: Vec<ActorSnapshot>,
    pub projectiles: Vec<ProjectileSnapshot>,
    pub characters: Vec<CharacterSnapshot>,
    pub obstacles: Vec<ObstacleSnapshot>,
    #[serde(default)]
    pub pickups: Vec<PickupSnapshot>,
    /// Parked entities per pool key.
    pub pools: Vec<PoolStats>,
}

impl Snapshot {
    /// Create a snapshot from the ECS world.
    pub fn from_world(world: &mut World, tick: u64, time: f32) -> Self {
        let mut actors = Vec::new();
        let mut query = world.query_filtered::<(
            Entity,
            &KindId,
            &Incarnation,
            &Position,
            &Heading,
            &Health,
            &Lifecycle,
            Has<Boss>,
            Has<HitFlash>,
        ), Without<InPool>>();
        for (entity, kind, incarnation, pos, heading, health, lifecycle, boss, flashing) in query.iter(world) {
            actors.push(ActorSnapshot {
                entity: entity.to_bits(),
                incarnation: incarnation.0,
                kind: kind.0,
                x: pos.0.x,
                y: pos.0.y,
                heading_x: heading.0.x,
                heading_y: heading.0.y,
                health: health.current,
                health_max: health.max,
                state: lifecycle.name().to_string(),
                boss,
                flashing,
            });
        }
        actors.sort_by_key(|a| a.entity);

        let mut projectiles = Vec::new();
        let mut query =
            world.query_filtered::<(Entity, &Projectile, &Position, &Heading), Without<InPool>>();
        for (entity, projectile, pos, heading) in query.iter(world) {
            projectiles.push(ProjectileSnapshot {
                entity: entity.to_bits(),
                x: pos.0.x,
                y: pos.0.y,
                heading_x: heading.0.x,
                heading_y: heading.0.y,
                damage: projectile.damage,
            });
        }
        projectiles.sort_by_key(|p| p.entity);

        let mut characters = Vec::new();
        let mut query = world.query_filtered::<(Entity, &Position, &Health, Has<Defeated>), With<Character>>();
        for (entity, pos, health, defeated) in query.iter(world) {
            characters.push(CharacterSnapshot {
                entity: entity.to_bits(),
                x: pos.0.x,
                y: pos.0.y,
                health: health.current,
                health_max: health.max,
                defeated,
            });
        }
        characters.sort_by_key(|c| c.entity);

        let mut obstacles = Vec::new();
        let mut query = world.query::<(&Obstacle, Option<&Turret>)>();
        for (obstacle, turret) in query.iter(world) {
            obstacles.push(ObstacleSnapshot {
                shape: obstacle.shape.name().to_string(),
                x: obstacle.center.x,
                y: obstacle.center.y,
                orientation: obstacle.orientation,
                bounding_radius: obstacle.shape.bounding_radius(),
                expires_at: turret.map(|t| t.expires_at),
            });
        }

        let mut pickups = Vec::new();
        let mut query = world.query_filtered::<(Entity, &Position, &Health), With<Pickup>>();
        for (entity, pos, health) in query.iter(world) {
            pickups.push(PickupSnapshot {
                entity: entity.to_bits(),
                x: pos.0.x,
                y: pos.0.y,
                health: health.current,
                health_max: health.max,
            });
        }
        pickups.sort_by_key(|p| p.entity);

        let population = world
            .get_resource::<Population>()
            .map(PopulationSnapshot::from)
            .unwrap_or_default();
        let pools = world
            .get_resource::<crate::pool::EntityPool>()
            .map(|pool| pool.stats())
            .unwrap_or_default();

        Self {
            tick,
            time,
            population,
            actors,
            projectiles,
            characters,
            obstacles,
            pickups,
            pools,
        }
    }

    /// Serialize snapshot to JSON string.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    /// Serialize snapshot to pretty JSON string.
    pub fn to_json_pretty(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }

    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geometry::ObstacleShape;
    use glam::Vec2;

    #[test]
    fn test_snapshot_skips_pooled_actors() {
        let mut world = World::new();
        world.insert_resource(Population {
            alive: 1,
            total_spawned: 2,
            wave_spawned: 2,
        });
        world.spawn((
            KindId(1),
            Incarnation(0),
            Position::new(1.0, 2.0),
            Heading::default(),
            Health::new(50.0),
            Lifecycle::Active,
            HitFlash { started_at: 0.0 },
        ));
        world.spawn((
            KindId(1),
            Incarnation(0),
            Position(PARK_POSITION),
            Heading::default(),
            Health::new(50.0),
            Lifecycle::Pooled,
            InPool,
        ));
        world.spawn(CharacterBundle::new(Vec2::ZERO, 100.0, 0.5));
        world.spawn(Obstacle {
            shape: ObstacleShape::Circle { radius: 2.0 },
            center: Vec2::new(5.0, 5.0),
            orientation: 0.0,
        });

        let snapshot = Snapshot::from_world(&mut world, 7, 0.25);
        assert_eq!(snapshot.tick, 7);
        assert_eq!(snapshot.actors.len(), 1);
        assert_eq!(snapshot.actors[0].state, "Active");
        assert!(snapshot.actors[0].flashing);
        assert_eq!(snapshot.characters.len(), 1);
        assert_eq!(snapshot.obstacles[0].shape, "Circle");
        assert_eq!(snapshot.obstacles[0].expires_at, None);
        assert!(snapshot.pickups.is_empty());
        assert_eq!(snapshot.population.total_spawned, 2);
    }

    #[test]
    fn test_snapshot_lists_pickups_and_turrets() {
        use crate::systems::spawn::{SpawnTrigger, TriggerKind};
        let mut world = World::new();
        let trigger = SpawnTrigger {
            kind: TriggerKind::Obstacle(1),
            region: 0,
        };
        world.spawn(PickupBundle::new(Vec2::new(2.0, -1.0), 40.0, 0.5, trigger));
        world.spawn((
            Obstacle {
                shape: ObstacleShape::Circle { radius: 1.0 },
                center: Vec2::ZERO,
                orientation: 0.0,
            },
            Turret {
                id: 1,
                expires_at: 12.5,
            },
        ));

        let snapshot = Snapshot::from_world(&mut world, 3, 0.1);
        assert_eq!(snapshot.obstacles[0].expires_at, Some(12.5));
        assert_eq!(snapshot.pickups.len(), 1);
        assert_eq!((snapshot.pickups[0].x, snapshot.pickups[0].health), (2.0, 40.0));
        assert!(snapshot.characters.is_empty(), "pickups are not characters");
        assert!(snapshot.actors.is_empty());
    }

    #[test]
    fn test_snapshot_json_parses_back() {
        let mut world = World::new();
        world.spawn(CharacterBundle::new(Vec2::new(3.0, 4.0), 80.0, 0.5));
        let snapshot = Snapshot::from_world(&mut world, 1, 0.1);
        let json = snapshot.to_json().unwrap();
        assert!(json.contains("characters"));

        let parsed = Snapshot::from_json(&json).unwrap();
        assert_eq!(parsed.characters, snapshot.characters);
    }
}
