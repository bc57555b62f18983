use clap::Parser;

/// Runs the Edge: observes one Kubernetes cluster, streams snapshots to a
/// Manager, and answers its on-demand requests.
#[derive(Parser, Debug, Clone)]
#[command(author, version, about, long_about = None)]
pub struct Args {
    /// This cluster's globally-unique identifier, chosen from the
    /// discovered mesh identity.
    #[arg(long, env = "CLUSTER_ID")]
    pub cluster_id: String,

    /// `host:port` of the Manager to connect to.
    #[arg(long, env = "MANAGER_ADDR", default_value = "http://127.0.0.1:7443")]
    pub manager_addr: String,

    /// Prometheus metrics / health port. Unset disables the metrics server.
    #[arg(long, env = "METRICS_PORT")]
    pub metrics_port: Option<u16>,

    /// Snapshot publish interval in seconds (default 30, must be at least
    /// 1).
    #[arg(long, env = "SNAPSHOT_INTERVAL_SECS", default_value_t = 30)]
    pub snapshot_interval_secs: u64,

    /// Whether a metrics provider is configured; gates
    /// `capabilities.metrics_enabled` in the handshake.
    #[arg(long, env = "METRICS_ENABLED", default_value_t = false)]
    pub metrics_enabled: bool,

    /// Envoy admin port reachable on each mesh pod, used by the
    /// `AdminClient`.
    #[arg(long, env = "ENVOY_ADMIN_PORT", default_value_t = 15000)]
    pub envoy_admin_port: u16,

    /// Max wire message size in bytes, enforced symmetrically on both ends.
    #[arg(long, env = "MAX_MESSAGE_BYTES", default_value_t = navigator_common::DEFAULT_MAX_MESSAGE_BYTES)]
    pub max_message_bytes: usize,
}
