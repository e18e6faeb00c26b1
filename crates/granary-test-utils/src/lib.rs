//! Shared test utilities for granary integration tests.
//!
//! This crate provides:
//! - [`TestStore`]: a temporary backup root with seeded artifacts and
//!   sidecars
//! - [`ScriptedTool`]: a [`granary_core::BackupTool`] double that records
//!   invocations and fails on cue
//! - [`RecordingNotifier`]: a notifier that captures messages for
//!   assertions
//!
//! # Example
//!
//! ```rust,ignore
//! use granary_test_utils::{TestStore, ScriptedTool};
//!
//! #[tokio::test]
//! async fn test_example() {
//!     let store = TestStore::new();
//!     let anchor = store.seed_full("2024-01-08T02:00:00Z", EntryState::Raw);
//!     // ... run test ...
//! }
//! ```

#![forbid(unsafe_code)]
#![deny(missing_docs)]
#![deny(rust_2018_idioms)]
#![warn(clippy::pedantic)]
#![allow(clippy::must_use_candidate)]
// Test utilities use expect/unwrap for cleaner test code - panics are acceptable in tests
#![allow(clippy::expect_used)]
#![allow(clippy::unwrap_used)]
#![allow(clippy::missing_panics_doc)]

pub mod fixtures;
pub mod notify;
pub mod tool;

pub use fixtures::*;
pub use notify::*;
pub use tool::*;

/// Initialize test logging (call once per test module).
pub fn init_test_logging() {
    use tracing_subscriber::{fmt, EnvFilter};

    let _ = fmt()
        .with_env_filter(
            EnvFilter::from_default_env()
                .add_directive("granary=debug".parse().expect("valid directive")),
        )
        .with_test_writer()
        .try_init();
}
