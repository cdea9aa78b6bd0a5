//! Logging initialization and configuration.
//!
//! Diagnostics and mirrored command output are written to stderr, so the
//! binary's stdout carries only command output (or the JSON result).

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Filter used when neither `RUST_LOG` nor an explicit filter is given.
pub const DEFAULT_FILTER: &str = "cmdstream=info";

/// Initialize the logging system.
///
/// Uses the `RUST_LOG` environment variable for filtering. If not set,
/// defaults to `cmdstream=info`.
///
/// # Panics
///
/// Panics if called more than once, or if another tracing subscriber
/// has already been set.
pub fn init() {
    subscriber(env_filter()).init();
}

/// Try to initialize the logging system.
///
/// Returns `Ok(())` if successful, or `Err` if logging has already been
/// initialized.
pub fn try_init() -> Result<(), tracing_subscriber::util::TryInitError> {
    subscriber(env_filter()).try_init()
}

/// Try to initialize with an explicit filter.
///
/// A bare level (`debug`) applies to this crate only; anything else is
/// read as an `EnvFilter` directive string. An unparsable filter falls
/// back to the default.
pub fn try_init_with_filter(filter: &str) -> Result<(), tracing_subscriber::util::TryInitError> {
    subscriber(EnvFilter::try_new(directives(filter)).unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER)))
        .try_init()
}

fn env_filter() -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER))
}

fn subscriber(filter: EnvFilter) -> impl SubscriberInitExt {
    tracing_subscriber::registry().with(filter).with(
        tracing_subscriber::fmt::layer()
            .compact()
            .with_writer(std::io::stderr),
    )
}

fn directives(filter: &str) -> String {
    let filter = filter.trim();
    match filter.to_ascii_lowercase().as_str() {
        "error" | "warn" | "info" | "debug" | "trace" | "off" => format!("cmdstream={}", filter),
        _ => filter.to_string(),
    }
}
