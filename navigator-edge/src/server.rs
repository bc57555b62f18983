use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use navigator_common::ids::ClusterId;
use navigator_common::shutdown::shutdown_signal;
use tokio_util::sync::CancellationToken;

use crate::admin_client::AdminHttpClient;
use crate::args::Args;
use crate::connect::{self, EdgeConfig, EdgeServices};
use crate::metrics_provider::{MetricsProvider, NullMetricsProvider};
use crate::snapshot::KubeSnapshotProducer;

/// Wires the Kubernetes snapshot producer, the admin client, and the
/// reconnecting `Connect` stream together and runs until shutdown
/// signaled.
pub async fn run_edge(args: Args) -> Result<()> {
    navigator_common::metrics::maybe_spawn_metrics_server(args.metrics_port, "edge");

    let snapshot_producer = Arc::new(
        KubeSnapshotProducer::new(ClusterId::from(args.cluster_id.clone()), "istio-system".to_string()).await?,
    );
    let admin_client = Some(Arc::new(AdminHttpClient::new(args.envoy_admin_port)) as Arc<dyn crate::admin_client::AdminClient>);
    let metrics_provider: Arc<dyn MetricsProvider> = Arc::new(NullMetricsProvider);

    if args.metrics_enabled && !metrics_provider.is_enabled() {
        tracing::warn!("METRICS_ENABLED was set but no real MetricsProvider is wired in this build");
    }

    let services = Arc::new(EdgeServices { snapshot_producer, admin_client, metrics_provider });
    let config = EdgeConfig {
        cluster_id: ClusterId::from(args.cluster_id.clone()),
        manager_addr: args.manager_addr.clone(),
        snapshot_interval: Duration::from_secs(args.snapshot_interval_secs),
        max_message_bytes: args.max_message_bytes,
    };

    let cancel = CancellationToken::new();
    let signal_cancel = cancel.clone();
    tokio::spawn(async move {
        shutdown_signal().await;
        signal_cancel.cancel();
    });

    tracing::info!(cluster_id = %config.cluster_id, manager_addr = %config.manager_addr, "starting Edge");
    connect::run(config, services, cancel).await;

    tracing::info!("Edge stopped gracefully");
    Ok(())
}
