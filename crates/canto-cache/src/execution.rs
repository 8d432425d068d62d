//! Level 2 execution cache.
//!
//! Holds artifacts derived from Level 1 payloads. An artifact is valid only
//! while the Level 1 entry it was built from is `Fresh` at the same version.
//! The cache is single-owner (`&mut self` everywhere) and lives on the
//! affinity thread, so it needs no locking.

use canto_core::ports::ArtifactBuilder;
use canto_core::{Address, CacheEntry, EntryState, Error, Result};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::debug;

use crate::types::ExecutionStats;

struct Slot<A> {
    artifact: Arc<A>,
    source_version: u64,
    last_used: u64,
}

/// Address-indexed store of derived artifacts with LRU eviction.
pub struct ExecutionCache<A> {
    slots: HashMap<Address, Slot<A>>,
    capacity: usize,
    clock: u64,
    stats: ExecutionStats,
}

impl<A> ExecutionCache<A> {
    pub fn new(capacity: usize) -> Self {
        Self {
            slots: HashMap::new(),
            capacity: capacity.max(1),
            clock: 0,
            stats: ExecutionStats::default(),
        }
    }

    /// The artifact for `source`, if one exists and is still valid.
    pub fn get(&mut self, source: &CacheEntry) -> Option<Arc<A>> {
        if source.state != EntryState::Fresh {
            return None;
        }
        self.clock += 1;
        let clock = self.clock;
        let slot = self.slots.get_mut(&source.address)?;
        if slot.source_version != source.version {
            return None;
        }
        slot.last_used = clock;
        self.stats.hits += 1;
        Some(Arc::clone(&slot.artifact))
    }

    /// Return the valid artifact for `source`, deriving and installing a new
    /// one if needed.
    ///
    /// Fails with [`Error::NotReady`] unless the entry is `Fresh`.
    pub fn get_or_build<B>(&mut self, source: &CacheEntry, builder: &B) -> Result<Arc<A>>
    where
        B: ArtifactBuilder<Artifact = A> + ?Sized,
    {
        if source.state != EntryState::Fresh {
            return Err(Error::NotReady {
                address: source.address.clone(),
                state: source.state,
            });
        }
        if let Some(artifact) = self.get(source) {
            return Ok(artifact);
        }
        let payload = source.payload.as_ref().ok_or_else(|| {
            Error::Internal(format!("fresh entry {} has no payload", source.address))
        })?;

        let artifact = Arc::new(builder.build(&source.address, payload)?);
        self.clock += 1;
        self.slots.insert(
            source.address.clone(),
            Slot {
                artifact: Arc::clone(&artifact),
                source_version: source.version,
                last_used: self.clock,
            },
        );
        self.stats.builds += 1;
        debug!(address = %source.address, version = source.version, "Built artifact");

        if self.slots.len() > self.capacity {
            self.trim(self.capacity);
        }
        Ok(artifact)
    }

    /// The last installed artifact and its source version, valid or not.
    pub fn previous(&self, address: &Address) -> Option<(Arc<A>, u64)> {
        self.slots
            .get(address)
            .map(|slot| (Arc::clone(&slot.artifact), slot.source_version))
    }

    /// Drop the artifact for `address`.
    pub fn invalidate(&mut self, address: &Address) -> bool {
        let removed = self.slots.remove(address).is_some();
        if removed {
            self.stats.invalidations += 1;
        }
        removed
    }

    /// Evict least recently used artifacts until at most `max` remain.
    pub fn trim(&mut self, max: usize) -> usize {
        if self.slots.len() <= max {
            return 0;
        }
        let mut by_age: Vec<(u64, Address)> = self
            .slots
            .iter()
            .map(|(address, slot)| (slot.last_used, address.clone()))
            .collect();
        by_age.sort();
        let excess = self.slots.len() - max;
        for (_, address) in by_age.into_iter().take(excess) {
            self.slots.remove(&address);
        }
        self.stats.evictions += excess as u64;
        excess
    }

    pub fn clear(&mut self) {
        self.slots.clear();
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    pub fn stats(&self) -> ExecutionStats {
        ExecutionStats {
            entries: self.slots.len(),
            ..self.stats.clone()
        }
    }
}
