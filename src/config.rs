//! Arena configuration and runtime tuning.
//!
//! [`ArenaConfig`] is the static data table loaded once before the
//! simulation starts (actor kinds, obstacles, spawn regions, rate curves).
//! [`SimConfig`] holds engine tuning knobs that are not part of the authored
//! content. Both are plain serde types; the arena table is validated at load
//! and every id cross-reference must resolve or loading fails.

use crate::components::{KindId, PARK_POSITION};
use crate::error::ConfigError;
use crate::geometry::{remap, ObstacleShape};
use bevy_ecs::prelude::*;
use glam::Vec2;
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};

// ============================================================================
// ACTOR KINDS
// ============================================================================

/// How an actor kind deals damage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AttackStyle {
    /// Cone-gated windup, then a radius strike around an offset point.
    #[default]
    Strike,
    /// Instant damage to every character in range once the cooldown is up.
    /// Only active when [`SimConfig::enable_proximity_attacks`] is set.
    Proximity,
}

/// Static stats for one actor kind.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ActorKind {
    pub id: KindId,
    pub name: String,
    pub health: f32,
    /// Base movement speed before per-spawn jitter.
    pub speed: f32,
    pub damage: f32,
    pub attack_range: f32,
    /// Targets further than this are ignored in favour of the destination.
    pub chasing_range: f32,
    /// Cooldown between attacks before per-spawn jitter.
    pub attack_delay: f32,
    /// Body radius used for avoidance and projectile hits.
    pub radius: f32,
    /// Radius of the strike area.
    pub radius_for_damage: f32,
    /// Forward distance from the actor to the strike centre.
    pub attack_offset: f32,
    /// Lower keys take precedence during avoidance.
    pub priority_key: u32,
    pub attack_style: AttackStyle,
    /// Time from entering `Attacking` to the strike landing.
    pub strike_delay: f32,
    /// Total length of the attack window.
    pub attack_duration: f32,
    pub boss: bool,
}

impl Default for ActorKind {
    fn default() -> Self {
        Self {
            id: KindId(0),
            name: String::new(),
            health: 100.0,
            speed: 3.0,
            damage: 10.0,
            attack_range: 1.5,
            chasing_range: 30.0,
            attack_delay: 2.2,
            radius: 0.5,
            radius_for_damage: 1.0,
            attack_offset: 1.0,
            priority_key: 1,
            attack_style: AttackStyle::Strike,
            strike_delay: 0.6,
            attack_duration: 1.0,
            boss: false,
        }
    }
}

// ============================================================================
// OBSTACLES
// ============================================================================

/// A reusable obstacle outline, referenced by id.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ObstacleTemplate {
    pub id: u32,
    pub shape: ObstacleShape,
}

/// An obstacle instance placed at world load.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ObstaclePlacement {
    pub template: u32,
    pub center: Vec2,
    #[serde(default)]
    pub orientation: f32,
}

/// An obstacle a pickup can drop for a limited time.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TurretTemplate {
    pub id: u32,
    /// Obstacle template giving the turret's outline.
    pub obstacle: u32,
    /// Seconds the turret stands before it is removed.
    pub lifetime: f32,
}

// ============================================================================
// SPAWNING
// ============================================================================

/// Axis-aligned spawn area plus the heading actors leave it with.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SpawnRegion {
    pub min: Vec2,
    pub max: Vec2,
    /// Default walking direction when no target is in range.
    pub direction: Vec2,
    /// Optional programmed destination, used out of aggro range.
    #[serde(default)]
    pub destination: Option<Vec2>,
}

impl SpawnRegion {
    /// Uniformly sample a point inside the region.
    pub fn sample<R: Rng + ?Sized>(&self, rng: &mut R) -> Vec2 {
        let t = Vec2::new(rng.gen::<f32>(), rng.gen::<f32>());
        self.min + (self.max - self.min) * t
    }

    pub fn center(&self) -> Vec2 {
        (self.min + self.max) * 0.5
    }
}

/// Linear curve between two time anchors, clamped outside the window.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RateCurve {
    pub t0: f32,
    pub t1: f32,
    pub min: f32,
    pub max: f32,
}

impl RateCurve {
    pub fn constant(value: f32) -> Self {
        Self {
            t0: 0.0,
            t1: 0.0,
            min: value,
            max: value,
        }
    }

    /// Interpolated value at `elapsed` seconds.
    pub fn value_at(&self, elapsed: f32) -> f32 {
        let t = elapsed.max(self.t0).min(self.t1);
        remap(self.t0, self.t1, self.min, self.max, t)
    }

    /// Whole number of actors to introduce at `elapsed` seconds.
    pub fn count_at(&self, elapsed: f32) -> u32 {
        self.value_at(elapsed).floor().max(0.0) as u32
    }

    fn validate(&self, context: &str) -> Result<(), ConfigError> {
        if self.t1 < self.t0 {
            return Err(ConfigError::InvalidTimeWindow {
                context: context.to_string(),
                t0: self.t0,
                t1: self.t1,
            });
        }
        Ok(())
    }
}

/// Continuous, rate-curve driven spawning.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WaveConfig {
    pub enabled: bool,
    /// Minimum seconds between two wave batches.
    pub cooldown: f32,
    pub rate: RateCurve,
    /// Global cap, ignored when `spawn_infinity` is set.
    pub total_number: u32,
    pub spawn_infinity: bool,
    /// Compare the live population (instead of the cumulative count)
    /// against the cap, so dead actors are replaced.
    pub allow_respawn: bool,
    /// Kinds picked uniformly for each wave actor.
    pub kinds: Vec<KindId>,
    pub regions: Vec<SpawnRegion>,
}

impl Default for WaveConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            cooldown: 1.0,
            rate: RateCurve {
                t0: 0.0,
                t1: 60.0,
                min: 2.0,
                max: 10.0,
            },
            total_number: 500,
            spawn_infinity: false,
            allow_respawn: true,
            kinds: Vec::new(),
            regions: Vec::new(),
        }
    }
}

/// One-shot, time-stamped spawn (bosses, scripted events).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScheduledSpawn {
    pub time: f32,
    pub kind: KindId,
    pub position: Vec2,
    pub direction: Vec2,
    #[serde(default)]
    pub destination: Option<Vec2>,
    #[serde(default = "one")]
    pub count: u32,
}

fn one() -> u32 {
    1
}

// ============================================================================
// WEAPONS & BOUNDS
// ============================================================================

/// Projectile behaviour shared by every weapon-fire request.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WeaponConfig {
    /// Seconds before an unimpacted projectile is recycled.
    pub lifetime: f32,
    /// Extra distance swept past the next position each tick.
    pub forward_margin: f32,
    /// Per-tick speed jitter band (+/-).
    pub speed_jitter: f32,
    /// Damage multiplier over elapsed time.
    pub damage_ratio: RateCurve,
}

impl Default for WeaponConfig {
    fn default() -> Self {
        Self {
            lifetime: 2.0,
            forward_margin: 0.3,
            speed_jitter: 10.0,
            damage_ratio: RateCurve::constant(1.0),
        }
    }
}

/// Axis-aligned volume actors must stay inside.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ArenaBounds {
    pub min: Vec2,
    pub max: Vec2,
}

impl ArenaBounds {
    #[inline]
    pub fn contains(&self, p: Vec2) -> bool {
        p.x >= self.min.x && p.x <= self.max.x && p.y >= self.min.y && p.y <= self.max.y
    }
}

impl Default for ArenaBounds {
    fn default() -> Self {
        Self {
            min: Vec2::splat(-150.0),
            max: Vec2::splat(150.0),
        }
    }
}

// ============================================================================
// ARENA CONFIG
// ============================================================================

/// Complete authored content for one arena.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ArenaConfig {
    pub kinds: Vec<ActorKind>,
    pub obstacle_templates: Vec<ObstacleTemplate>,
    pub obstacles: Vec<ObstaclePlacement>,
    pub turrets: Vec<TurretTemplate>,
    pub waves: WaveConfig,
    pub scheduled: Vec<ScheduledSpawn>,
    pub weapon: WeaponConfig,
    pub bounds: ArenaBounds,
}

impl Default for ArenaConfig {
    /// A small two-kind horde with one boss, used by the demo and tests.
    fn default() -> Self {
        let walker = ActorKind {
            id: KindId(1),
            name: "walker".to_string(),
            attack_style: AttackStyle::Proximity,
            ..Default::default()
        };
        let runner = ActorKind {
            id: KindId(2),
            name: "runner".to_string(),
            health: 60.0,
            speed: 5.0,
            priority_key: 2,
            attack_style: AttackStyle::Proximity,
            ..Default::default()
        };
        let brute = ActorKind {
            id: KindId(10),
            name: "brute".to_string(),
            health: 2000.0,
            speed: 2.0,
            damage: 50.0,
            attack_range: 4.0,
            chasing_range: 60.0,
            radius: 1.5,
            radius_for_damage: 3.0,
            attack_offset: 2.0,
            priority_key: 0,
            boss: true,
            ..Default::default()
        };

        Self {
            kinds: vec![walker, runner, brute],
            obstacle_templates: vec![
                ObstacleTemplate {
                    id: 1,
                    shape: ObstacleShape::Rectangle {
                        half_extents: Vec2::new(4.0, 1.0),
                    },
                },
                ObstacleTemplate {
                    id: 2,
                    shape: ObstacleShape::Circle { radius: 2.0 },
                },
            ],
            obstacles: vec![
                ObstaclePlacement {
                    template: 1,
                    center: Vec2::new(0.0, 20.0),
                    orientation: 0.0,
                },
                ObstaclePlacement {
                    template: 2,
                    center: Vec2::new(-15.0, -10.0),
                    orientation: 0.0,
                },
            ],
            turrets: vec![TurretTemplate {
                id: 1,
                obstacle: 2,
                lifetime: 10.0,
            }],
            waves: WaveConfig {
                kinds: vec![KindId(1), KindId(2)],
                regions: vec![
                    SpawnRegion {
                        min: Vec2::new(-60.0, 80.0),
                        max: Vec2::new(60.0, 90.0),
                        direction: Vec2::new(0.0, -1.0),
                        destination: Some(Vec2::ZERO),
                    },
                    SpawnRegion {
                        min: Vec2::new(-60.0, -90.0),
                        max: Vec2::new(60.0, -80.0),
                        direction: Vec2::new(0.0, 1.0),
                        destination: Some(Vec2::ZERO),
                    },
                ],
                ..Default::default()
            },
            scheduled: vec![ScheduledSpawn {
                time: 60.0,
                kind: KindId(10),
                position: Vec2::new(0.0, 85.0),
                direction: Vec2::new(0.0, -1.0),
                destination: Some(Vec2::ZERO),
                count: 1,
            }],
            weapon: WeaponConfig::default(),
            bounds: ArenaBounds::default(),
        }
    }
}

impl ArenaConfig {
    /// Parse and validate an arena from JSON.
    pub fn from_json(json: &str) -> Result<Self, ConfigError> {
        let config: ArenaConfig = serde_json::from_str(json)?;
        config.validate()?;
        tracing::info!(
            kinds = config.kinds.len(),
            obstacles = config.obstacles.len(),
            regions = config.waves.regions.len(),
            scheduled = config.scheduled.len(),
            "arena config loaded"
        );
        Ok(config)
    }

    pub fn to_json_pretty(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }

    /// Check every cross-reference and numeric window.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let mut kind_ids = HashSet::new();
        for kind in &self.kinds {
            if !kind_ids.insert(kind.id) {
                return Err(ConfigError::DuplicateKind(kind.id.0));
            }
        }
        let template_ids: HashSet<u32> = self.obstacle_templates.iter().map(|t| t.id).collect();

        let require_kind = |kind: KindId, context: &str| {
            if kind_ids.contains(&kind) {
                Ok(())
            } else {
                Err(ConfigError::UnknownKind {
                    kind: kind.0,
                    context: context.to_string(),
                })
            }
        };

        if self.waves.enabled {
            if self.waves.regions.is_empty() {
                return Err(ConfigError::EmptyRegions);
            }
            if self.waves.kinds.is_empty() {
                return Err(ConfigError::EmptyWaveKinds);
            }
        }
        for &kind in &self.waves.kinds {
            require_kind(kind, "wave kinds")?;
        }
        for (i, spawn) in self.scheduled.iter().enumerate() {
            require_kind(spawn.kind, &format!("scheduled spawn #{i}"))?;
        }
        for (i, placement) in self.obstacles.iter().enumerate() {
            if !template_ids.contains(&placement.template) {
                return Err(ConfigError::UnknownObstacle {
                    template: placement.template,
                    context: format!("obstacle placement #{i}"),
                });
            }
        }

        for turret in &self.turrets {
            if !template_ids.contains(&turret.obstacle) {
                return Err(ConfigError::UnknownObstacle {
                    template: turret.obstacle,
                    context: format!("turret {}", turret.id),
                });
            }
        }

        self.waves.rate.validate("wave rate")?;
        self.weapon.damage_ratio.validate("weapon damage ratio")?;

        if self.bounds.min.x >= self.bounds.max.x || self.bounds.min.y >= self.bounds.max.y {
            return Err(ConfigError::InvalidBounds {
                min: self.bounds.min,
                max: self.bounds.max,
            });
        }
        if self.bounds.contains(PARK_POSITION) {
            return Err(ConfigError::ParkInsideBounds {
                park: PARK_POSITION,
                min: self.bounds.min,
                max: self.bounds.max,
            });
        }
        Ok(())
    }
}

/// Lookup tables derived from a validated [`ArenaConfig`].
#[derive(Resource, Debug, Clone)]
pub struct ArenaRules {
    pub kinds: HashMap<KindId, ActorKind>,
    pub templates: HashMap<u32, ObstacleShape>,
    pub turrets: HashMap<u32, TurretTemplate>,
    pub waves: WaveConfig,
    pub weapon: WeaponConfig,
    pub bounds: ArenaBounds,
}

impl ArenaRules {
    pub fn from_config(config: &ArenaConfig) -> Self {
        Self {
            kinds: config.kinds.iter().map(|k| (k.id, k.clone())).collect(),
            templates: config
                .obstacle_templates
                .iter()
                .map(|t| (t.id, t.shape))
                .collect(),
            turrets: config.turrets.iter().map(|t| (t.id, t.clone())).collect(),
            waves: config.waves.clone(),
            weapon: config.weapon.clone(),
            bounds: config.bounds,
        }
    }

    pub fn kind(&self, id: KindId) -> Option<&ActorKind> {
        self.kinds.get(&id)
    }

    /// Outline and lifetime of a turret template.
    pub fn turret(&self, id: u32) -> Option<(ObstacleShape, f32)> {
        let turret = self.turrets.get(&id)?;
        let shape = self.templates.get(&turret.obstacle)?;
        Some((*shape, turret.lifetime))
    }

    pub fn require_kind(&self, id: KindId, context: &str) -> Result<&ActorKind, ConfigError> {
        self.kinds.get(&id).ok_or_else(|| ConfigError::UnknownKind {
            kind: id.0,
            context: context.to_string(),
        })
    }
}

// ============================================================================
// RUNTIME TUNING
// ============================================================================

/// Engine tuning, independent of the authored arena.
#[derive(Resource, Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SimConfig {
    /// Fixed timestep in seconds (e.g., 1/30 = 0.0333 for 30 Hz).
    pub fixed_timestep: f32,
    /// Spatial grid cell size in world units.
    pub cell_size: f32,
    /// Run the separation pass every N ticks.
    pub avoidance_interval: u64,
    /// Actors closer than combined radius plus this slack still push apart.
    pub avoidance_slack: f32,
    /// Scale of the positional separation nudge.
    pub avoidance_speed: f32,
    /// Maximum heading rotation in degrees per second.
    pub turn_rate_deg: f32,
    /// Half-angle of the strike cone in degrees.
    pub attack_cone_deg: f32,
    /// Seconds between death and pool release.
    pub teardown_delay: f32,
    /// Minimum seconds between two hit flashes on the same actor.
    pub hit_flash_interval: f32,
    pub enable_proximity_attacks: bool,
    /// Proximity attackers only engage characters within this distance.
    pub proximity_check_distance: f32,
    /// Items per parallel batch.
    pub batch_size: usize,
    /// Spawns beyond this per tick are deferred to the next tick.
    pub max_spawns_per_tick: usize,
    pub pool_initial_capacity: usize,
    /// Recycle-rate margin for the pool watermark.
    pub pool_margin: usize,
    /// Multiplier band applied to kind speed at spawn.
    pub speed_jitter: (f32, f32),
    /// Multiplier band applied to kind attack delay at spawn.
    pub attack_delay_jitter: (f32, f32),
    pub seed: u64,
    /// Undrained outbound events kept by `SimWorld`; the oldest are dropped
    /// beyond this.
    pub max_queued_events: usize,
}

impl Default for SimConfig {
    fn default() -> Self {
        Self {
            fixed_timestep: 1.0 / 30.0, // 30 Hz
            cell_size: 4.0,
            avoidance_interval: 2,
            avoidance_slack: 0.2,
            avoidance_speed: 1.5,
            turn_rate_deg: 250.0,
            attack_cone_deg: 45.0,
            teardown_delay: 1.2,
            hit_flash_interval: 0.1,
            enable_proximity_attacks: false,
            proximity_check_distance: 10.0,
            batch_size: 256,
            max_spawns_per_tick: 128,
            pool_initial_capacity: 500,
            pool_margin: 300,
            speed_jitter: (0.7, 1.2),
            attack_delay_jitter: (0.8, 1.2),
            seed: 0x5EED,
            max_queued_events: 65_536,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rate_curve_midpoint_and_clamp() {
        let curve = RateCurve {
            t0: 0.0,
            t1: 60.0,
            min: 2.0,
            max: 10.0,
        };
        assert_eq!(curve.count_at(30.0), 6);
        assert_eq!(curve.count_at(90.0), 10);
        assert_eq!(curve.count_at(-5.0), 2);
        assert_eq!(RateCurve::constant(3.0).count_at(100.0), 3);
    }

    #[test]
    fn test_default_arena_is_valid() {
        ArenaConfig::default().validate().unwrap();
    }

    #[test]
    fn test_json_roundtrip_through_loader() {
        let json = ArenaConfig::default().to_json_pretty().unwrap();
        let loaded = ArenaConfig::from_json(&json).unwrap();
        assert_eq!(loaded.kinds.len(), 3);
        assert_eq!(loaded.obstacle_templates.len(), 2);
        assert!(matches!(
            loaded.obstacle_templates[1].shape,
            ObstacleShape::Circle { .. }
        ));
    }

    #[test]
    fn test_unknown_wave_kind_fails_fast() {
        let mut config = ArenaConfig::default();
        config.waves.kinds.push(KindId(99));
        let err = config.validate().unwrap_err();
        assert!(matches!(err, ConfigError::UnknownKind { kind: 99, .. }));
    }

    #[test]
    fn test_unknown_scheduled_kind_and_obstacle() {
        let mut config = ArenaConfig::default();
        config.scheduled[0].kind = KindId(77);
        assert!(matches!(
            config.validate(),
            Err(ConfigError::UnknownKind { kind: 77, .. })
        ));

        let mut config = ArenaConfig::default();
        config.obstacles[0].template = 5;
        assert!(matches!(
            config.validate(),
            Err(ConfigError::UnknownObstacle { template: 5, .. })
        ));
    }

    #[test]
    fn test_structural_errors() {
        let mut config = ArenaConfig::default();
        config.waves.regions.clear();
        assert!(matches!(config.validate(), Err(ConfigError::EmptyRegions)));

        let mut config = ArenaConfig::default();
        config.waves.rate.t0 = 10.0;
        config.waves.rate.t1 = 5.0;
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidTimeWindow { .. })
        ));

        let mut config = ArenaConfig::default();
        config.kinds.push(config.kinds[0].clone());
        assert!(matches!(config.validate(), Err(ConfigError::DuplicateKind(1))));

        let mut config = ArenaConfig::default();
        config.bounds.max = config.bounds.min;
        assert!(matches!(config.validate(), Err(ConfigError::InvalidBounds { .. })));

        let mut config = ArenaConfig::default();
        config.turrets[0].obstacle = 8;
        assert!(matches!(
            config.validate(),
            Err(ConfigError::UnknownObstacle { template: 8, .. })
        ));
    }

    #[test]
    fn test_bounds_must_leave_room_for_parking() {
        let mut config = ArenaConfig::default();
        config.bounds.max = Vec2::splat(2_000.0);
        assert!(matches!(
            config.validate(),
            Err(ConfigError::ParkInsideBounds { park, .. }) if park == PARK_POSITION
        ));

        // Wide but lopsided bounds that stop short of the park point are fine.
        config.bounds.max = Vec2::new(2_000.0, 500.0);
        config.validate().unwrap();
    }

    #[test]
    fn test_turret_lookup_resolves_outline() {
        let rules = ArenaRules::from_config(&ArenaConfig::default());
        let (shape, lifetime) = rules.turret(1).unwrap();
        assert!(matches!(shape, ObstacleShape::Circle { radius } if radius == 2.0));
        assert_eq!(lifetime, 10.0);
        assert!(rules.turret(4).is_none());
    }

    #[test]
    fn test_malformed_json_is_a_parse_error() {
        assert!(matches!(
            ArenaConfig::from_json("{ \"kinds\": 3 }"),
            Err(ConfigError::Parse(_))
        ));
    }

    #[test]
    fn test_region_sample_stays_inside() {
        use rand::SeedableRng;
        let region = SpawnRegion {
            min: Vec2::new(-2.0, 5.0),
            max: Vec2::new(2.0, 6.0),
            direction: Vec2::Y,
            destination: None,
        };
        let mut rng = rand_pcg::Pcg32::seed_from_u64(7);
        for _ in 0..100 {
            let p = region.sample(&mut rng);
            assert!(p.x >= -2.0 && p.x <= 2.0 && p.y >= 5.0 && p.y <= 6.0);
        }
        assert_eq!(region.center(), Vec2::new(0.0, 5.5));
    }
}
