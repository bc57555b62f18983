//! Metrics provider capability: the Edge's side of a
//! `ServiceGraphMetricsRequest`. Real providers (Prometheus, a sidecar
//! stats endpoint) are a separate concern; this module defines the trait
//! every future provider implements and the `NullMetricsProvider` the
//! Edge runs when none is configured.

use async_trait::async_trait;
use navigator_common::model::ServicePairMetrics;
use navigator_common::NavigatorError;

pub struct MetricsQuery {
    pub namespace: String,
    pub service_name: String,
    pub start_unix_ms: i64,
    pub end_unix_ms: i64,
    /// Wire `ProxyModeFilter` (`ANY_PROXY_MODE`/`SIDECAR_ONLY`/`GATEWAY_ONLY`/
    /// `ROUTER_ONLY`), passed through unconverted so a provider backed by a
    /// label-based store (Prometheus) can fold it straight into its own
    /// query rather than filtering result rows after the fact.
    pub proxy_mode_filter: i32,
}

#[async_trait]
pub trait MetricsProvider: Send + Sync {
    /// Whether this provider has real data; surfaced in the handshake's
    /// `Capabilities.metrics_enabled`.
    fn is_enabled(&self) -> bool;

    async fn service_graph_metrics(&self, query: &MetricsQuery) -> Result<Vec<ServicePairMetrics>, NavigatorError>;
}

/// Always reports no data and `metrics_enabled = false`. The Manager's
/// aggregator treats an Edge with this provider as contributing nothing to
/// any `ServiceGraphMetrics` query rather than failing the whole fan-out.
pub struct NullMetricsProvider;

#[async_trait]
impl MetricsProvider for NullMetricsProvider {
    fn is_enabled(&self) -> bool {
        false
    }

    async fn service_graph_metrics(&self, _query: &MetricsQuery) -> Result<Vec<ServicePairMetrics>, NavigatorError> {
        Err(NavigatorError::not_found("no metrics data available"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn null_provider_reports_disabled_and_no_data() {
        let provider = NullMetricsProvider;
        assert!(!provider.is_enabled());
        let query = MetricsQuery {
            namespace: "default".into(),
            service_name: "web".into(),
            start_unix_ms: 0,
            end_unix_ms: 1,
            proxy_mode_filter: 0,
        };
        let err = provider.service_graph_metrics(&query).await.unwrap_err();
        assert_eq!(err.error_code(), navigator_common::ErrorCode::NotFound);
    }
}
