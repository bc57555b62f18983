//! Shared state wiring the Registry, the two per-message-kind Correlators,
//! and runtime configuration together behind one handle every RPC and
//! read-side API call borrows. Constructed once in `server::run_manager`
//! and shut down explicitly, with a well-defined drain phase before
//! process exit.

use std::sync::Arc;
use std::time::Duration;

use navigator_proto::navigator as pb;

use crate::args::Args;
use crate::correlator::RequestCorrelator;
use crate::registry::ConnectionRegistry;

pub struct ManagerConfig {
    pub max_pending_per_session: usize,
    pub max_message_bytes: usize,
    pub request_timeout: Duration,
    pub expiry_horizon: Duration,
    pub shutdown_grace: Duration,
}

impl From<&Args> for ManagerConfig {
    fn from(args: &Args) -> Self {
        Self {
            max_pending_per_session: args.max_pending_per_session,
            max_message_bytes: args.max_message_bytes,
            request_timeout: Duration::from_secs(args.request_timeout_secs),
            expiry_horizon: Duration::from_secs(args.expiry_horizon_secs),
            shutdown_grace: Duration::from_secs(args.shutdown_grace_secs),
        }
    }
}

pub struct ManagerState {
    pub registry: Arc<ConnectionRegistry>,
    pub proxy_correlator: Arc<RequestCorrelator<pb::ProxyConfigResponse>>,
    pub metrics_correlator: Arc<RequestCorrelator<pb::ServiceGraphMetricsResponse>>,
    pub config: ManagerConfig,
}

impl ManagerState {
    pub fn new(config: ManagerConfig) -> Arc<Self> {
        Arc::new(Self {
            registry: Arc::new(ConnectionRegistry::new()),
            proxy_correlator: Arc::new(RequestCorrelator::new()),
            metrics_correlator: Arc::new(RequestCorrelator::new()),
            config,
        })
    }

    /// Drains correlator state for up to `shutdown_grace` before the caller
    /// forces process exit, giving in-flight requests a chance to resolve
    /// through their normal reply path instead of being abruptly cancelled.
    pub async fn drain(&self) {
        let deadline = tokio::time::Instant::now() + self.config.shutdown_grace;
        loop {
            let pending =
                self.proxy_correlator.pending_count().await + self.metrics_correlator.pending_count().await;
            if pending == 0 || tokio::time::Instant::now() >= deadline {
                if pending > 0 {
                    tracing::warn!(pending, "shutdown grace period elapsed with requests still in flight");
                }
                break;
            }
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
    }
}
