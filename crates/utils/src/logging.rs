//! Tracing subscriber setup shared by binaries.

use tracing_subscriber::EnvFilter;

/// Initializes the global subscriber. `RUST_LOG` takes precedence over
/// the provided default directive.
pub fn init(default_directive: &str) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_directive));

    tracing_subscriber::fmt().with_env_filter(filter).init();
}
