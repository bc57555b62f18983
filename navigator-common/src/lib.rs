pub mod backoff;
pub mod error;
pub mod ids;
pub mod metrics;
pub mod model;
pub mod shutdown;
pub mod wire;

pub use error::{ErrorCode, NavigatorError, RequestError};
pub use ids::{ClusterId, InstanceId, RequestId, ServiceId};

/// Installs the `tracing` subscriber, honoring `RUST_LOG` via `EnvFilter`
/// so Manager/Edge verbosity can be tuned without a rebuild.
pub fn init_tracing() {
    use tracing_subscriber::EnvFilter;

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();
}

/// Default cap on concurrent pending correlated requests per session.
pub const DEFAULT_MAX_PENDING_PER_SESSION: usize = 1024;

/// Default max wire message size, enforced symmetrically on both ends of
/// the stream.
pub const DEFAULT_MAX_MESSAGE_BYTES: usize = 10 * 1024 * 1024;

/// Default snapshot publish interval.
pub const DEFAULT_SNAPSHOT_INTERVAL: std::time::Duration = std::time::Duration::from_secs(30);

/// Default correlator expiry-sweep horizon past a request's deadline.
pub const DEFAULT_EXPIRY_HORIZON: std::time::Duration = std::time::Duration::from_secs(30);
