//! Canto Core
//!
//! Core domain types, traits, and error handling for the Canto rendering
//! cache. This crate has minimal dependencies and defines the shared
//! vocabulary used across all other crates.

pub mod address;
pub mod affinity;
pub mod entry;
pub mod error;
pub mod events;
pub mod fetch;
pub mod ids;
pub mod ports;

pub use address::{Address, Granularity, Segment};
pub use entry::{CacheEntry, EntryState, Payload};
pub use error::{Error, Result};
pub use events::{Category, Event, EventBatch, Scope};
pub use fetch::{FetchRequest, Priority};
pub use ids::*;
