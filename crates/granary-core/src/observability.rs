//! Logging setup.
//!
//! Lifecycle operations emit structured tracing events, including
//! `metric = "..."` fields on operation summaries so log pipelines can
//! derive counters without a separate metrics stack.

use std::sync::Once;

use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter};

static INIT: Once = Once::new();

/// Log output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat {
    /// JSON structured logs, for log pipelines.
    Json,

    /// Human-readable logs, for terminals.
    #[default]
    Pretty,
}

/// Initializes process-wide logging.
///
/// The filter honors `RUST_LOG` and falls back to `default_filter`
/// when the variable is unset. Safe to call more than once; only the
/// first call takes effect.
pub fn init_logging(format: LogFormat, default_filter: &str) {
    INIT.call_once(|| {
        let filter =
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));
        match format {
            LogFormat::Json => {
                tracing_subscriber::registry()
                    .with(filter)
                    .with(fmt::layer().json())
                    .init();
            }
            LogFormat::Pretty => {
                tracing_subscriber::registry()
                    .with(filter)
                    .with(fmt::layer().with_target(false))
                    .init();
            }
        }
    });
}
