//! Invalidation events and their batches.

use crate::address::Address;
use crate::{Error, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

/// Largest number of addresses a single range scope may expand to.
pub const MAX_RANGE_LEN: u32 = 4096;

/// Closed classification of events used for routing and batching policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Category {
    /// Cached render data no longer matches the authoritative source.
    CacheInvalidation,
    /// Cursor and selection movement.
    Interaction,
    /// Collaborator presence.
    Presence,
    /// Document structure changes.
    Document,
    /// Session and connection lifecycle; never batched.
    System,
    /// Catch-all for anything unrecognised.
    Notification,
}

impl Category {
    pub const ALL: [Category; 6] = [
        Category::CacheInvalidation,
        Category::Interaction,
        Category::Presence,
        Category::Document,
        Category::System,
        Category::Notification,
    ];

    /// Derive the category of an event type tag.
    ///
    /// Total: unknown tags fall into [`Category::Notification`].
    pub fn from_type_tag(tag: &str) -> Self {
        let prefix = tag.split('.').next().unwrap_or_default();
        match prefix {
            "render" | "cache" => Category::CacheInvalidation,
            "cursor" | "selection" => Category::Interaction,
            "presence" => Category::Presence,
            "document" => Category::Document,
            "session" | "connection" => Category::System,
            _ => Category::Notification,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Category::CacheInvalidation => "cache_invalidation",
            Category::Interaction => "interaction",
            Category::Presence => "presence",
            Category::Document => "document",
            Category::System => "system",
            Category::Notification => "notification",
        }
    }
}

/// Event type tag announcing that the connection was re-established.
pub const RECONNECTED: &str = "connection.reconnected";

/// Contiguous run of children under one parent address.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RangeScope {
    pub parent: Address,
    pub start: u32,
    /// Inclusive.
    pub end: u32,
}

/// The addresses an event refers to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Scope {
    Address { address: Address },
    List { addresses: Vec<Address> },
    Range(RangeScope),
}

impl Scope {
    pub fn single(address: Address) -> Self {
        Scope::Address { address }
    }

    /// Expand the scope into concrete addresses.
    pub fn addresses(&self) -> Result<Vec<Address>> {
        match self {
            Scope::Address { address } => Ok(vec![address.clone()]),
            Scope::List { addresses } => {
                if addresses.is_empty() {
                    return Err(Error::MalformedEvent("empty address list".to_string()));
                }
                Ok(addresses.clone())
            }
            Scope::Range(range) => {
                if range.start > range.end {
                    return Err(Error::MalformedEvent(format!(
                        "range {}..={} under {} is empty",
                        range.start, range.end, range.parent
                    )));
                }
                if range.end - range.start >= MAX_RANGE_LEN {
                    return Err(Error::MalformedEvent(format!(
                        "range under {} exceeds {} children",
                        range.parent, MAX_RANGE_LEN
                    )));
                }
                (range.start..=range.end)
                    .map(|index| {
                        range
                            .parent
                            .child(index)
                            .map_err(|e| Error::MalformedEvent(e.to_string()))
                    })
                    .collect()
            }
        }
    }
}

/// A single notification from the ingress stream.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    /// Type tag, e.g. `render.invalidated`.
    #[serde(rename = "type")]
    pub event_type: String,
    #[serde(default)]
    pub scope: Option<Scope>,
    pub timestamp: DateTime<Utc>,
}

impl Event {
    pub fn new(event_type: impl Into<String>, scope: Option<Scope>) -> Self {
        Self {
            event_type: event_type.into(),
            scope,
            timestamp: Utc::now(),
        }
    }

    /// Convenience constructor for a single-address render invalidation.
    pub fn invalidated(address: Address) -> Self {
        Self::new("render.invalidated", Some(Scope::single(address)))
    }

    pub fn category(&self) -> Category {
        Category::from_type_tag(&self.event_type)
    }

    /// Check the event carries a usable scope.
    ///
    /// System events may be unscoped; everything else must name at least
    /// one address.
    pub fn check_scope(&self) -> Result<()> {
        match &self.scope {
            Some(scope) => scope.addresses().map(|_| ()),
            None if self.category() == Category::System => Ok(()),
            None => Err(Error::MalformedEvent(format!(
                "'{}' event has no scope",
                self.event_type
            ))),
        }
    }
}

/// Events of one category accumulated inside one batch window.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventBatch {
    pub category: Category,
    pub events: Vec<Event>,
    pub window_opened_at: DateTime<Utc>,
    pub window_closed_at: DateTime<Utc>,
}

impl EventBatch {
    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    /// Every address scoped by the batch, deduplicated in first-seen order.
    ///
    /// Events whose scope cannot be expanded are skipped.
    pub fn addresses(&self) -> Vec<Address> {
        let mut seen = HashSet::new();
        let mut out = Vec::new();
        for event in &self.events {
            let Some(scope) = &event.scope else { continue };
            let Ok(addresses) = scope.addresses() else {
                continue;
            };
            for address in addresses {
                if seen.insert(address.clone()) {
                    out.push(address);
                }
            }
        }
        out
    }

    pub fn contains_type(&self, event_type: &str) -> bool {
        self.events.iter().any(|e| e.event_type == event_type)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_category_is_total() {
        assert_eq!(
            Category::from_type_tag("render.invalidated"),
            Category::CacheInvalidation
        );
        assert_eq!(Category::from_type_tag("cursor.moved"), Category::Interaction);
        assert_eq!(Category::from_type_tag("presence.joined"), Category::Presence);
        assert_eq!(Category::from_type_tag(RECONNECTED), Category::System);
        assert_eq!(Category::from_type_tag("weird"), Category::Notification);
        assert_eq!(Category::from_type_tag(""), Category::Notification);
    }

    #[test]
    fn test_range_expansion() {
        let page = Address::root(0).child(1).unwrap();
        let scope = Scope::Range(RangeScope {
            parent: page.clone(),
            start: 2,
            end: 4,
        });
        let addrs = scope.addresses().unwrap();
        assert_eq!(addrs.len(), 3);
        assert_eq!(addrs[0], page.child(2).unwrap());
        assert_eq!(addrs[2], page.child(4).unwrap());
    }

    #[test]
    fn test_malformed_scopes() {
        let empty = Scope::List { addresses: vec![] };
        assert!(empty.addresses().is_err());

        let backwards = Scope::Range(RangeScope {
            parent: Address::root(0),
            start: 5,
            end: 1,
        });
        assert!(backwards.addresses().is_err());

        let leaf = Address::from_indices(&[0, 0, 0, 0, 0]).unwrap();
        let below_leaf = Scope::Range(RangeScope {
            parent: leaf,
            start: 0,
            end: 0,
        });
        assert!(below_leaf.addresses().is_err());

        let unscoped = Event::new("render.invalidated", None);
        assert!(unscoped.check_scope().is_err());
        let system = Event::new(RECONNECTED, None);
        assert!(system.check_scope().is_ok());
    }

    #[test]
    fn test_batch_addresses_dedup() {
        let a = Address::root(0).child(0).unwrap();
        let b = Address::root(0).child(1).unwrap();
        let now = Utc::now();
        let batch = EventBatch {
            category: Category::CacheInvalidation,
            events: vec![
                Event::invalidated(a.clone()),
                Event::new(
                    "render.invalidated",
                    Some(Scope::List {
                        addresses: vec![b.clone(), a.clone()],
                    }),
                ),
            ],
            window_opened_at: now,
            window_closed_at: now,
        };
        assert_eq!(batch.addresses(), vec![a, b]);
    }
}
