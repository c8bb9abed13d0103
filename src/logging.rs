//! Logging initialization.

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Filter used when nothing else is configured.
pub const DEFAULT_FILTER: &str = "shell_relay=info";

fn build_filter(directive: Option<&str>) -> EnvFilter {
    let parsed = match directive {
        Some(d) => EnvFilter::try_new(normalize(d)).ok(),
        None => EnvFilter::try_from_default_env().ok(),
    };
    parsed.unwrap_or_else(|| EnvFilter::new(DEFAULT_FILTER))
}

/// A bare level such as `debug` applies to this crate only; anything
/// containing `=` or `,` is taken as a full directive.
fn normalize(directive: &str) -> String {
    if directive.contains('=') || directive.contains(',') {
        directive.to_string()
    } else {
        format!("shell_relay={},tower_http={}", directive, directive)
    }
}

/// Initialize logging with an explicit filter directive.
///
/// # Panics
///
/// Panics if a global tracing subscriber has already been set.
pub fn init_with(directive: &str) {
    tracing_subscriber::registry()
        .with(build_filter(Some(directive)))
        .with(tracing_subscriber::fmt::layer().compact())
        .init();
}

/// Try to initialize logging from `RUST_LOG`.
///
/// Returns `Err` if logging has already been initialized.
pub fn try_init() -> Result<(), tracing_subscriber::util::TryInitError> {
    tracing_subscriber::registry()
        .with(build_filter(None))
        .with(tracing_subscriber::fmt::layer().compact())
        .try_init()
}
