//! Level 1 cache entry types.

use crate::address::Address;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::ops::Deref;
use std::sync::Arc;

/// Freshness state of a Level 1 entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntryState {
    Missing,
    Fetching,
    Fresh,
    Stale,
    Error,
}

impl EntryState {
    /// States a derived artifact may never be built from.
    pub fn forbids_derivation(self) -> bool {
        matches!(self, EntryState::Missing | EntryState::Error)
    }
}

/// Opaque payload bytes produced by the remote computation.
#[derive(Clone, PartialEq, Eq, Default)]
pub struct Payload(Arc<[u8]>);

impl Payload {
    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl Deref for Payload {
    type Target = [u8];

    fn deref(&self) -> &[u8] {
        &self.0
    }
}

impl From<Vec<u8>> for Payload {
    fn from(bytes: Vec<u8>) -> Self {
        Self(Arc::from(bytes))
    }
}

impl From<&[u8]> for Payload {
    fn from(bytes: &[u8]) -> Self {
        Self(Arc::from(bytes))
    }
}

impl From<&str> for Payload {
    fn from(text: &str) -> Self {
        Self::from(text.as_bytes())
    }
}

impl fmt::Debug for Payload {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Payload({} bytes)", self.0.len())
    }
}

/// A Level 1 entry.
///
/// Entries are immutable values: every state change installs a whole new
/// entry, so a reader holding one never sees a partial update.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheEntry {
    pub address: Address,
    pub payload: Option<Payload>,
    pub state: EntryState,
    pub version: u64,
    pub retry_count: u32,
}

impl CacheEntry {
    /// The entry reported for an address that has never been referenced.
    pub fn missing(address: Address) -> Self {
        Self {
            address,
            payload: None,
            state: EntryState::Missing,
            version: 0,
            retry_count: 0,
        }
    }

    pub fn is_fresh(&self) -> bool {
        self.state == EntryState::Fresh
    }

    /// Copy of this entry moved into `Stale` at the next version.
    pub fn to_stale(&self) -> Self {
        Self {
            state: EntryState::Stale,
            version: self.version + 1,
            retry_count: 0,
            ..self.clone()
        }
    }

    /// Copy of this entry moved into `Fresh` with a new payload at the next version.
    pub fn to_fresh(&self, payload: Payload) -> Self {
        Self {
            payload: Some(payload),
            state: EntryState::Fresh,
            version: self.version + 1,
            retry_count: 0,
            address: self.address.clone(),
        }
    }

    /// Copy with a different state and unchanged version.
    pub fn with_state(&self, state: EntryState) -> Self {
        Self {
            state,
            ..self.clone()
        }
    }
}
