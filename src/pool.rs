//! Per-kind free-lists of recyclable actor and projectile entities.
//!
//! ## Access pattern
//!
//! Producers (death and impact handling) only ever append through
//! [`EntityPool::release`], which takes `&self` and locks a single list.
//! The consumer (spawning) takes through [`EntityPool::try_acquire`], which
//! needs `&mut self` and so cannot overlap with producers.
//!
//! ## Watermark
//!
//! Each list counts releases over a window (one tick). When the observed
//! recycle rate exceeds the margin, the list capacity grows to
//! `observed + margin` and the margin follows the rate; otherwise the
//! capacity stays fixed and the counter is cleared. Releases into a full
//! list are reported as [`Release::Overflow`] and the caller destroys the
//! entity instead of pooling it.

use crate::components::KindId;
use crate::error::sim_invariant;
use bevy_ecs::prelude::*;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::{Mutex, MutexGuard, PoisonError};

/// Which free-list an entity belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum PoolKey {
    Actor(KindId),
    Projectile,
}

/// Outcome of a release.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Release {
    Queued,
    /// The list is at capacity; destroy the entity.
    Overflow,
    /// The entity was already pooled. Nothing changed.
    Duplicate,
    /// No list exists for the key. Nothing changed.
    UnknownKey,
}

/// Recycle-rate tracker for one free-list.
#[derive(Debug, Clone, Copy)]
pub struct Watermark {
    base_margin: usize,
    margin: usize,
    capacity: usize,
    window: usize,
}

impl Watermark {
    pub fn new(initial_capacity: usize, margin: usize) -> Self {
        Self {
            base_margin: margin,
            margin,
            capacity: initial_capacity,
            window: 0,
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn margin(&self) -> usize {
        self.margin
    }

    fn record(&mut self) {
        self.window += 1;
    }

    /// Close the current window. Returns the new capacity if it grew.
    fn close_window(&mut self) -> Option<usize> {
        let observed = std::mem::take(&mut self.window);
        if observed <= self.margin {
            return None;
        }
        let grown = observed + self.margin;
        self.margin = observed + self.base_margin;
        if grown > self.capacity {
            self.capacity = grown;
            Some(grown)
        } else {
            None
        }
    }
}

#[derive(Debug)]
struct FreeList {
    queue: VecDeque<Entity>,
    /// "In pool" guard against double release.
    members: HashSet<Entity>,
    watermark: Watermark,
}

impl FreeList {
    fn new(watermark: Watermark) -> Self {
        Self {
            queue: VecDeque::with_capacity(watermark.capacity()),
            members: HashSet::new(),
            watermark,
        }
    }
}

/// Free-list snapshot for one key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PoolStats {
    pub key: PoolKey,
    pub free: usize,
    pub capacity: usize,
}

/// All free-lists, keyed by archetype.
#[derive(Resource, Debug)]
pub struct EntityPool {
    lists: HashMap<PoolKey, Mutex<FreeList>>,
}

fn lock(list: &Mutex<FreeList>) -> MutexGuard<'_, FreeList> {
    list.lock().unwrap_or_else(PoisonError::into_inner)
}

impl EntityPool {
    /// Create one free-list per key.
    pub fn new(keys: impl IntoIterator<Item = PoolKey>, initial_capacity: usize, margin: usize) -> Self {
        let lists = keys
            .into_iter()
            .map(|key| {
                let list = FreeList::new(Watermark::new(initial_capacity, margin));
                (key, Mutex::new(list))
            })
            .collect();
        Self { lists }
    }

    /// Return an entity to its free-list.
    pub fn release(&self, key: PoolKey, entity: Entity) -> Release {
        let outcome = match self.lists.get(&key) {
            None => Release::UnknownKey,
            Some(list) => {
                let mut list = lock(list);
                if list.members.contains(&entity) {
                    Release::Duplicate
                } else {
                    list.watermark.record();
                    if list.queue.len() >= list.watermark.capacity() {
                        Release::Overflow
                    } else {
                        list.queue.push_back(entity);
                        list.members.insert(entity);
                        Release::Queued
                    }
                }
            }
        };
        sim_invariant!(
            outcome != Release::Duplicate,
            "{:?} released twice into {:?}",
            entity,
            key
        );
        sim_invariant!(
            outcome != Release::UnknownKey,
            "{:?} released into unknown pool {:?}",
            entity,
            key
        );
        outcome
    }

    /// Take the oldest free entity for `key`. An empty list is not an error.
    pub fn try_acquire(&mut self, key: PoolKey) -> Option<Entity> {
        let list = self
            .lists
            .get_mut(&key)?
            .get_mut()
            .unwrap_or_else(PoisonError::into_inner);
        let entity = list.queue.pop_front()?;
        list.members.remove(&entity);
        Some(entity)
    }

    pub fn contains(&self, key: PoolKey, entity: Entity) -> bool {
        self.lists
            .get(&key)
            .map(|list| lock(list).members.contains(&entity))
            .unwrap_or(false)
    }

    pub fn free_count(&self, key: PoolKey) -> usize {
        self.lists.get(&key).map(|list| lock(list).queue.len()).unwrap_or(0)
    }

    pub fn total_free(&self) -> usize {
        self.lists.values().map(|list| lock(list).queue.len()).sum()
    }

    pub fn capacity(&self, key: PoolKey) -> usize {
        self.lists
            .get(&key)
            .map(|list| lock(list).watermark.capacity())
            .unwrap_or(0)
    }

    /// Close the recycle window on every list, growing capacity where the
    /// observed rate exceeded the margin.
    pub fn close_window(&mut self) {
        for (key, list) in self.lists.iter_mut() {
            let list = list.get_mut().unwrap_or_else(PoisonError::into_inner);
            if let Some(capacity) = list.watermark.close_window() {
                let additional = capacity.saturating_sub(list.queue.len());
                list.queue.reserve(additional);
                tracing::debug!(?key, capacity, margin = list.watermark.margin(), "pool capacity grown");
            }
        }
    }

    /// Per-key stats, ordered by key.
    pub fn stats(&self) -> Vec<PoolStats> {
        let mut stats: Vec<PoolStats> = self
            .lists
            .iter()
            .map(|(key, list)| {
                let list = lock(list);
                PoolStats {
                    key: *key,
                    free: list.queue.len(),
                    capacity: list.watermark.capacity(),
                }
            })
            .collect();
        stats.sort_by_key(|s| s.key);
        stats
    }
}
