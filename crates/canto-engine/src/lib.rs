//! Canto engine.
//!
//! Wires the batcher, bus, Level 1 cache, fetch scheduler and the affinity
//! thread into a [`Session`]. A session is the unit of lifecycle: everything
//! it owns is created by [`Session::start`] and torn down by
//! [`Session::close`].

pub mod affinity;
pub mod config;
pub mod coordinator;
pub mod session;
pub mod viewport;

pub use affinity::{AffinityHandle, AffinityThread, Level2, Presenter, StaleCallback};
pub use config::EngineConfig;
pub use coordinator::{CoordinationManager, InvalidationSummary, ReconnectSummary};
pub use session::{Session, SessionStats};
pub use viewport::Viewport;
