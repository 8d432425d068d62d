//! Test infrastructure for Canto.
//!
//! Fixtures for driving a full [`canto_engine::Session`] in-process: a
//! scriptable data source, a presenter that checks Level 2 validity on every
//! repaint, and recorders for notifications and batches.
//!
//! # Usage
//!
//! ```ignore
//! use canto_tests::*;
//!
//! #[tokio::test]
//! async fn test_something() {
//!     let source = ScriptedSource::new();
//!     let presenter = RecordingPresenter::default();
//!     let notifier = RecordingNotifier::new();
//!     let session = start_session(source.clone(), presenter.clone(), notifier.clone()).await;
//! }
//! ```

pub mod fixtures;
pub mod helpers;

pub use fixtures::*;
pub use helpers::*;

/// Initialize test logging (call once per test binary).
pub fn init_test_logging() {
    use tracing_subscriber::{EnvFilter, fmt};

    let _ = fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("warn,canto_tests=debug")),
        )
        .with_test_writer()
        .try_init();
}
