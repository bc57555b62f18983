use clap::Parser;

/// Runs the Manager: accepts Edge connections, serves read-side queries.
#[derive(Parser, Debug, Clone)]
#[command(author, version, about, long_about = None)]
pub struct Args {
    /// gRPC port Edges connect to.
    #[arg(long, env = "GRPC_PORT", default_value_t = 7443)]
    pub grpc_port: u16,

    /// Prometheus metrics / health port. Unset disables the metrics server.
    #[arg(long, env = "METRICS_PORT")]
    pub metrics_port: Option<u16>,

    /// Max concurrent pending correlated requests per session.
    #[arg(long, env = "MAX_PENDING_PER_SESSION", default_value_t = navigator_common::DEFAULT_MAX_PENDING_PER_SESSION)]
    pub max_pending_per_session: usize,

    /// Max wire message size in bytes, enforced symmetrically on both ends.
    #[arg(long, env = "MAX_MESSAGE_BYTES", default_value_t = navigator_common::DEFAULT_MAX_MESSAGE_BYTES)]
    pub max_message_bytes: usize,

    /// Default deadline for a correlated request issued to an Edge.
    #[arg(long, env = "REQUEST_TIMEOUT_SECS", default_value_t = 30)]
    pub request_timeout_secs: u64,

    /// How far past a request's deadline the expiry sweep waits before
    /// reclaiming a leaked correlator entry.
    #[arg(long, env = "EXPIRY_HORIZON_SECS", default_value_t = navigator_common::DEFAULT_EXPIRY_HORIZON.as_secs())]
    pub expiry_horizon_secs: u64,

    /// How long to drain in-flight correlated requests on shutdown before
    /// forcing session teardown.
    #[arg(long, env = "SHUTDOWN_GRACE_SECS", default_value_t = 5)]
    pub shutdown_grace_secs: u64,
}
