//! Logging setup for hosts of the engine.

use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

/// Filter used when `RUST_LOG` is unset. Target matching is by prefix, so
/// this covers both the library and the `ntfs_mount` binary.
pub const DEFAULT_FILTER: &str = "ntfs_mount=info";

/// Installs a stderr subscriber filtered by `RUST_LOG` or [`DEFAULT_FILTER`].
///
/// Does nothing if a global subscriber is already set.
pub fn init_logging() {
    init_logging_with(DEFAULT_FILTER);
}

/// Like [`init_logging`] with a caller-chosen fallback filter.
pub fn init_logging_with(default_filter: &str) {
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));

    let stderr_layer = tracing_subscriber::fmt::layer()
        .with_writer(std::io::stderr)
        .with_target(true);

    let _ = tracing_subscriber::registry()
        .with(env_filter)
        .with(stderr_layer)
        .try_init();
}
