//! Level 1 cache manager.
//!
//! A concurrent address-indexed map of immutable [`CacheEntry`] values. Every
//! mutation is a compare-and-swap of the whole entry: read the current
//! `Arc`, compute a replacement, and install it only if the slot still holds
//! the same `Arc`. Readers clone an `Arc` and never see a partial entry.
//!
//! Mutators must not run on the affinity thread.

use canto_core::affinity;
use canto_core::{Address, CacheEntry, EntryState, Payload};
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use std::sync::Arc;
use tracing::{debug, trace};

use crate::types::CacheStats;

/// Result of [`CacheManager::mark_stale`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StaleOutcome {
    /// The entry moved into `Stale` at this version.
    Marked { version: u64 },
    /// The entry was already stale; nothing changed.
    AlreadyStale { version: u64 },
}

impl StaleOutcome {
    pub fn version(self) -> u64 {
        match self {
            StaleOutcome::Marked { version } | StaleOutcome::AlreadyStale { version } => version,
        }
    }
}

/// Result of [`CacheManager::update`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpdateOutcome {
    /// The payload was installed as `Fresh` at this version.
    Installed { version: u64 },
    /// A newer invalidation arrived while the fetch was in flight.
    Superseded { current: u64 },
}

enum Step<T> {
    Install(CacheEntry, T),
    Keep(T),
}

type Store = Arc<DashMap<Address, Arc<CacheEntry>>>;

/// Level 1 store. Cheap to clone; clones share the same entries.
#[derive(Clone, Default)]
pub struct CacheManager {
    entries: Store,
}

impl CacheManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Read-only handle for the affinity thread.
    pub fn view(&self) -> CacheView {
        CacheView {
            entries: Arc::clone(&self.entries),
        }
    }

    /// Current entry, or a `Missing` entry if the address was never seen.
    pub fn get(&self, address: &Address) -> Arc<CacheEntry> {
        read(&self.entries, address)
    }

    /// Mark an entry stale, creating it if absent.
    ///
    /// Repeating the call while the entry is still stale changes nothing.
    pub fn mark_stale(&self, address: &Address) -> StaleOutcome {
        guard_mutation("mark_stale");
        self.transition(address, |current| {
            if current.state == EntryState::Stale {
                return Step::Keep(StaleOutcome::AlreadyStale {
                    version: current.version,
                });
            }
            let next = current.to_stale();
            let version = next.version;
            Step::Install(next, StaleOutcome::Marked { version })
        })
    }

    /// Claim a `Missing` or `Stale` entry for a new fetch.
    ///
    /// Returns the claimed version, or `None` when the entry needs no fetch:
    /// it is fresh, in error, or already claimed by another worker.
    pub fn begin_fetch(&self, address: &Address) -> Option<u64> {
        guard_mutation("begin_fetch");
        self.transition(address, |current| match current.state {
            EntryState::Missing | EntryState::Stale => {
                let next = current.with_state(EntryState::Fetching);
                let version = next.version;
                Step::Install(next, Some(version))
            }
            EntryState::Fetching | EntryState::Fresh | EntryState::Error => Step::Keep(None),
        })
    }

    /// Whether a retry may continue the claim taken at `claimed_version`.
    ///
    /// False once the entry has moved on: a newer invalidation, a fresh
    /// install or an error ends every retry scheduled under the old claim.
    pub fn resume_fetch(&self, address: &Address, claimed_version: u64) -> bool {
        let current = self.get(address);
        current.state == EntryState::Fetching && current.version == claimed_version
    }

    /// Install a freshly fetched payload.
    ///
    /// Only succeeds if the entry is still the `Fetching` entry claimed at
    /// `claimed_version`.
    pub fn update(&self, address: &Address, payload: Payload, claimed_version: u64) -> UpdateOutcome {
        guard_mutation("update");
        self.transition(address, |current| {
            if current.state != EntryState::Fetching || current.version != claimed_version {
                return Step::Keep(UpdateOutcome::Superseded {
                    current: current.version,
                });
            }
            let next = current.to_fresh(payload.clone());
            let version = next.version;
            Step::Install(next, UpdateOutcome::Installed { version })
        })
    }

    /// Count a failed attempt on a claimed entry; returns the failures so far
    /// under this claim.
    pub fn record_retry(&self, address: &Address, claimed_version: u64) -> Option<u32> {
        guard_mutation("record_retry");
        self.transition(address, |current| {
            if current.state != EntryState::Fetching || current.version != claimed_version {
                return Step::Keep(None);
            }
            let mut next = current.clone();
            next.retry_count += 1;
            let count = next.retry_count;
            Step::Install(next, Some(count))
        })
    }

    /// Move a claimed entry into `Error`. Returns `true` on the transition.
    pub fn record_error(&self, address: &Address, claimed_version: u64) -> bool {
        guard_mutation("record_error");
        self.transition(address, |current| {
            if current.state != EntryState::Fetching || current.version != claimed_version {
                return Step::Keep(false);
            }
            Step::Install(current.with_state(EntryState::Error), true)
        })
    }

    /// Move an `Error` entry back to `Stale` for an explicit retry.
    pub fn reset_error(&self, address: &Address) -> Option<u64> {
        guard_mutation("reset_error");
        self.transition(address, |current| {
            if current.state != EntryState::Error {
                return Step::Keep(None);
            }
            let next = current.to_stale();
            let version = next.version;
            Step::Install(next, Some(version))
        })
    }

    /// Mark every known entry stale. Returns the entries that changed.
    pub fn mark_all_stale(&self) -> Vec<(Address, u64)> {
        guard_mutation("mark_all_stale");
        let mut changed = Vec::new();
        for address in self.addresses() {
            if let StaleOutcome::Marked { version } = self.mark_stale(&address) {
                changed.push((address, version));
            }
        }
        debug!(count = changed.len(), "Marked all entries stale");
        changed
    }

    /// Known addresses strictly finer than `ancestor`.
    pub fn descendants(&self, ancestor: &Address) -> Vec<Address> {
        let mut found: Vec<Address> = self
            .entries
            .iter()
            .filter(|slot| slot.key().is_descendant_of(ancestor))
            .map(|slot| slot.key().clone())
            .collect();
        found.sort();
        found
    }

    /// Remove one entry.
    pub fn evict(&self, address: &Address) -> Option<Arc<CacheEntry>> {
        guard_mutation("evict");
        self.entries.remove(address).map(|(_, entry)| entry)
    }

    /// Remove every entry.
    pub fn clear(&self) {
        guard_mutation("clear");
        self.entries.clear();
    }

    pub fn addresses(&self) -> Vec<Address> {
        let mut all: Vec<Address> = self.entries.iter().map(|slot| slot.key().clone()).collect();
        all.sort();
        all
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn stats(&self) -> CacheStats {
        let mut stats = CacheStats::default();
        for slot in self.entries.iter() {
            stats.entries += 1;
            match slot.value().state {
                EntryState::Fetching => stats.fetching += 1,
                EntryState::Fresh => stats.fresh += 1,
                EntryState::Stale => stats.stale += 1,
                EntryState::Error => stats.error += 1,
                EntryState::Missing => {}
            }
        }
        stats
    }

    fn transition<T>(&self, address: &Address, mut step: impl FnMut(&CacheEntry) -> Step<T>) -> T {
        loop {
            let current = self.entries.get(address).map(|slot| Arc::clone(slot.value()));
            let observed = match &current {
                Some(entry) => Arc::clone(entry),
                None => Arc::new(CacheEntry::missing(address.clone())),
            };
            match step(&observed) {
                Step::Keep(out) => return out,
                Step::Install(next, out) => {
                    if self.compare_and_swap(address, current.as_ref(), next) {
                        return out;
                    }
                    trace!(%address, "CAS lost, retrying");
                }
            }
        }
    }

    fn compare_and_swap(
        &self,
        address: &Address,
        expected: Option<&Arc<CacheEntry>>,
        next: CacheEntry,
    ) -> bool {
        match (self.entries.entry(address.clone()), expected) {
            (Entry::Occupied(mut slot), Some(expected)) if Arc::ptr_eq(slot.get(), expected) => {
                slot.insert(Arc::new(next));
                true
            }
            (Entry::Vacant(slot), None) => {
                slot.insert(Arc::new(next));
                true
            }
            _ => false,
        }
    }
}

/// Read-only Level 1 handle.
#[derive(Clone)]
pub struct CacheView {
    entries: Store,
}

impl CacheView {
    pub fn get(&self, address: &Address) -> Arc<CacheEntry> {
        read(&self.entries, address)
    }
}

fn read(entries: &Store, address: &Address) -> Arc<CacheEntry> {
    entries
        .get(address)
        .map(|slot| Arc::clone(slot.value()))
        .unwrap_or_else(|| Arc::new(CacheEntry::missing(address.clone())))
}

fn guard_mutation(op: &str) {
    debug_assert!(
        !affinity::is_affinity_thread(),
        "Level 1 {} called on the affinity thread",
        op
    );
}
