//! Spatial partitioning for efficient neighbor queries.
//!
//! Provides O(1) cell lookup and O(k) neighbor queries where k is the number
//! of entities in nearby cells, rather than O(n) for brute force.
//!
//! The grid is rebuilt once per tick after movement and is read-only for
//! the combat and projectile phases, so parallel batches can share it.

use crate::components::{ActorStats, Character, Defeated, InPool, Lifecycle, Pickup, Position};
use bevy_ecs::prelude::*;
use glam::Vec2;
use std::collections::HashMap;

/// Which side of the fight an entry is on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Side {
    /// Spawned actors.
    Horde,
    /// Player-side characters.
    Defender,
    /// Shootable pickups. Projectiles hit them, melee ignores them.
    Pickup,
}

/// Grid-based spatial partitioning structure.
///
/// Divides the arena into cells and tracks which entities are in each cell.
/// Enables fast neighbor queries by only checking nearby cells.
#[derive(Resource, Debug)]
pub struct SpatialGrid {
    /// Cell size in world units.
    pub cell_size: f32,
    /// Map from cell coordinates to list of entities in that cell.
    cells: HashMap<(i32, i32), Vec<SpatialEntry>>,
    /// Reverse lookup: entity to cell.
    entity_cells: HashMap<Entity, (i32, i32)>,
    /// Largest radius inserted since the last clear.
    max_radius: f32,
}

/// Entry in a spatial cell.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SpatialEntry {
    pub entity: Entity,
    pub position: Vec2,
    pub radius: f32,
    pub side: Side,
}

impl Default for SpatialGrid {
    fn default() -> Self {
        Self::new(4.0)
    }
}

impl SpatialGrid {
    /// Create a new spatial grid with the given cell size.
    pub fn new(cell_size: f32) -> Self {
        Self {
            cell_size,
            cells: HashMap::new(),
            entity_cells: HashMap::new(),
            max_radius: 0.0,
        }
    }

    /// Convert world coordinates to cell coordinates.
    #[inline]
    pub fn world_to_cell(&self, p: Vec2) -> (i32, i32) {
        (
            (p.x / self.cell_size).floor() as i32,
            (p.y / self.cell_size).floor() as i32,
        )
    }

    /// Clear all entries (call at start of each tick before rebuilding).
    pub fn clear(&mut self) {
        self.cells.clear();
        self.entity_cells.clear();
        self.max_radius = 0.0;
    }

    /// Insert an entity at a position.
    pub fn insert(&mut self, entity: Entity, position: Vec2, radius: f32, side: Side) {
        let cell = self.world_to_cell(position);

        if let Some(&old_cell) = self.entity_cells.get(&entity) {
            if let Some(entries) = self.cells.get_mut(&old_cell) {
                entries.retain(|e| e.entity != entity);
            }
        }

        let entry = SpatialEntry {
            entity,
            position,
            radius,
            side,
        };
        self.cells.entry(cell).or_default().push(entry);
        self.entity_cells.insert(entity, cell);
        self.max_radius = self.max_radius.max(radius);
    }

    /// Remove an entity from the grid.
    pub fn remove(&mut self, entity: Entity) {
        if let Some(cell) = self.entity_cells.remove(&entity) {
            if let Some(entries) = self.cells.get_mut(&cell) {
                entries.retain(|e| e.entity != entity);
            }
        }
    }

    /// Query all entities whose centre lies within a radius of a point.
    /// Returns entries sorted by distance (closest first, ties by entity).
    pub fn query_radius(&self, center: Vec2, radius: f32) -> Vec<SpatialEntry> {
        let radius_sq = radius * radius;
        let cells_to_check = (radius / self.cell_size).ceil() as i32 + 1;
        let center_cell = self.world_to_cell(center);

        let mut results = Vec::new();

        for dx in -cells_to_check..=cells_to_check {
            for dy in -cells_to_check..=cells_to_check {
                let cell = (center_cell.0 + dx, center_cell.1 + dy);
                if let Some(entries) = self.cells.get(&cell) {
                    for entry in entries {
                        if entry.position.distance_squared(center) <= radius_sq {
                            results.push(*entry);
                        }
                    }
                }
            }
        }

        results.sort_by(|a, b| {
            let dist_a = a.position.distance_squared(center);
            let dist_b = b.position.distance_squared(center);
            dist_a
                .partial_cmp(&dist_b)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.entity.cmp(&b.entity))
        });

        results
    }

    /// Query entities of one side within radius.
    pub fn query_side(&self, center: Vec2, radius: f32, side: Side) -> Vec<SpatialEntry> {
        let mut results = self.query_radius(center, radius);
        results.retain(|e| e.side == side);
        results
    }

    /// Entities of one side whose body circle overlaps the query circle.
    pub fn query_overlapping(&self, center: Vec2, radius: f32, side: Side) -> Vec<SpatialEntry> {
        let mut results = self.query_side(center, radius + self.max_radius, side);
        results.retain(|e| e.position.distance(center) <= radius + e.radius);
        results
    }

    /// Nearest entity of one side within radius.
    pub fn nearest(&self, center: Vec2, max_radius: f32, side: Side) -> Option<SpatialEntry> {
        self.query_side(center, max_radius, side).into_iter().next()
    }

    /// Candidates for a sweep along `start -> end`: every entity of `side`
    /// whose body could touch the segment.
    pub fn query_segment(&self, start: Vec2, end: Vec2, side: Side) -> Vec<SpatialEntry> {
        let mid = (start + end) * 0.5;
        let reach = start.distance(end) * 0.5 + self.max_radius;
        self.query_side(mid, reach, side)
    }

    /// Get count of entities in a cell.
    pub fn cell_count(&self, cell: (i32, i32)) -> usize {
        self.cells.get(&cell).map(|v| v.len()).unwrap_or(0)
    }

    /// Get total entity count.
    pub fn total_count(&self) -> usize {
        self.entity_cells.len()
    }
}

/// System that rebuilds the spatial grid each tick.
///
/// Only engaged actors, undefeated characters and pickups are collidable.
pub fn spatial_grid_update_system(
    mut grid: ResMut<SpatialGrid>,
    actors: Query<(Entity, &Position, &ActorStats, &Lifecycle), Without<InPool>>,
    characters: Query<(Entity, &Position, &Character), Without<Defeated>>,
    pickups: Query<(Entity, &Position, &Pickup)>,
) {
    grid.clear();

    for (entity, pos, stats, lifecycle) in actors.iter() {
        if lifecycle.is_engaged() {
            grid.insert(entity, pos.0, stats.radius, Side::Horde);
        }
    }

    for (entity, pos, character) in characters.iter() {
        grid.insert(entity, pos.0, character.radius, Side::Defender);
    }

    for (entity, pos, pickup) in pickups.iter() {
        grid.insert(entity, pos.0, pickup.radius, Side::Pickup);
    }
}
