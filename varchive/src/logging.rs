//! Logging setup.

use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Default log filter directive.
pub const DEFAULT_LOG_FILTER: &str = "varchive=info,pubsub=info,providers=info,transfer=info";

/// Initialize logging with the default filter (overridable through
/// `RUST_LOG`). Safe to call more than once; later calls are no-ops.
pub fn init() {
    init_with_filter(DEFAULT_LOG_FILTER);
}

/// Initialize logging with an explicit fallback filter directive.
pub fn init_with_filter(directive: &str) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(directive));
    let _ = tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer())
        .try_init();
}
