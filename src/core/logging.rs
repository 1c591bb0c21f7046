// Tracing setup shared by the CLI and embedding hosts

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Filter used when RUST_LOG is not set
pub const DEFAULT_FILTER: &str = "videopose=info,videopose_lib=info";

/// Install the global subscriber. Returns false if one was already installed.
pub fn init_logging() -> bool {
    init_logging_with(DEFAULT_FILTER)
}

pub fn init_logging_with(default_filter: &str) -> bool {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(default_filter))
        .unwrap_or_else(|_| EnvFilter::new("info"));

    // Logs go to stderr; stdout carries the JSON result
    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .try_init()
        .is_ok()
}
