//! Domain entities, independent of the wire representation. Conversions
//! to/from `navigator_proto` types live next to their
//! consumer (the Edge encodes a `ClusterSnapshot` before sending; the
//! Manager decodes one on receipt) so this module stays a plain data
//! model with no tonic/prost dependency.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::ids::ClusterId;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ProxyMode {
    None,
    Sidecar,
    Gateway,
    Router,
}

impl ProxyMode {
    /// `envoyPresent = (proxyMode ∈ {SIDECAR, GATEWAY, ROUTER})`.
    pub fn implies_envoy_present(&self) -> bool {
        !matches!(self, ProxyMode::None)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServiceInstance {
    pub ip: String,
    pub pod_name: String,
    pub node_name: String,
    pub created_at: DateTime<Utc>,
    pub labels: BTreeMap<String, String>,
    pub annotations: BTreeMap<String, String>,
    pub containers: Vec<String>,
    pub pod_status: String,
    pub envoy_present: bool,
    pub proxy_mode: ProxyMode,
}

impl ServiceInstance {
    /// Constructs an instance enforcing the envoy_present/proxy_mode
    /// invariant at the single point instances are built, rather than
    /// trusting every call site to keep the two fields in sync.
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        ip: String,
        pod_name: String,
        node_name: String,
        created_at: DateTime<Utc>,
        labels: BTreeMap<String, String>,
        annotations: BTreeMap<String, String>,
        containers: Vec<String>,
        pod_status: String,
        proxy_mode: ProxyMode,
    ) -> Self {
        Self {
            ip,
            pod_name,
            node_name,
            created_at,
            labels,
            annotations,
            containers,
            pod_status,
            envoy_present: proxy_mode.implies_envoy_present(),
            proxy_mode,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Service {
    pub name: String,
    pub namespace: String,
    pub cluster_ip: String,
    pub external_ip: String,
    pub service_type: String,
    pub instances: Vec<ServiceInstance>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IstioObject {
    pub name: String,
    pub namespace: String,
    pub kind: String,
    pub labels: BTreeMap<String, String>,
    pub raw_spec_json: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct IstioControlPlaneConfig {
    pub root_namespace: String,
    pub pilot_scope_gateway_to_namespace: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ClusterSnapshot {
    pub cluster_id: ClusterId,
    pub services: Vec<Service>,
    pub destination_rules: Vec<IstioObject>,
    pub virtual_services: Vec<IstioObject>,
    pub gateways: Vec<IstioObject>,
    pub sidecars: Vec<IstioObject>,
    pub envoy_filters: Vec<IstioObject>,
    pub request_authentications: Vec<IstioObject>,
    pub peer_authentications: Vec<IstioObject>,
    pub authorization_policies: Vec<IstioObject>,
    pub wasm_plugins: Vec<IstioObject>,
    pub service_entries: Vec<IstioObject>,
    pub control_plane: IstioControlPlaneConfig,
}

// `ClusterId::default()` is not semantically meaningful (cluster ids are
// always Edge-provided), but `ClusterSnapshot`'s `#[derive(Default)]`
// (used by tests to build partial snapshots) requires one.
impl Default for ClusterId {
    fn default() -> Self {
        ClusterId(String::new())
    }
}

/// Session lifecycle: `Initializing -> Healthy -> Stale -> Disconnected`.
/// `Disconnected` here means "absent from the registry";
/// sessions never appear in this enum already-Disconnected, but the
/// Manager's read API may synthesize one momentarily while tearing down.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SessionState {
    Initializing,
    Healthy,
    Stale,
    Disconnected,
}

pub const STALE_THRESHOLD: std::time::Duration = std::time::Duration::from_secs(30);
pub const DISCONNECTED_THRESHOLD: std::time::Duration = std::time::Duration::from_secs(5 * 60);

/// Computes sync-status from the age of the last received snapshot. The
/// boundary at exactly 30s is inclusive of Stale (i.e. Healthy is
/// `< 30s`), and exactly 5min is inclusive of Disconnected.
pub fn session_state(
    has_received_snapshot: bool,
    last_snapshot_age: std::time::Duration,
) -> SessionState {
    if !has_received_snapshot {
        return SessionState::Initializing;
    }
    if last_snapshot_age < STALE_THRESHOLD {
        SessionState::Healthy
    } else if last_snapshot_age < DISCONNECTED_THRESHOLD {
        SessionState::Stale
    } else {
        SessionState::Disconnected
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Capabilities {
    pub metrics_enabled: bool,
}

/// Read-optimized view returned by `listSessions` / `ListClusters`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConnectionInfo {
    pub cluster_id: ClusterId,
    pub opened_at: DateTime<Utc>,
    pub last_snapshot_at: Option<DateTime<Utc>>,
    /// Count of Service entries in the latest snapshot, saturating-clamped
    /// to i32.
    pub service_count: i32,
    pub state_received: bool,
    pub capabilities: Capabilities,
    pub sync_status: SessionState,
}

/// Saturating clamp to i32 so an oversized count degrades rather than
/// wrapping or panicking.
pub fn saturating_service_count(count: usize) -> i32 {
    count.min(i32::MAX as usize) as i32
}

/// Union of `Service` entries across all clusters sharing `(namespace,
/// name)`; instances retain their originating `ClusterID`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AggregatedService {
    pub name: String,
    pub namespace: String,
    pub instances_by_cluster: Vec<(ClusterId, Service)>,
}

impl AggregatedService {
    pub fn total_instance_count(&self) -> usize {
        self.instances_by_cluster
            .iter()
            .map(|(_, svc)| svc.instances.len())
            .sum()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AggregatedServiceInstance {
    pub cluster_id: ClusterId,
    pub instance: ServiceInstance,
}

/// A cumulative histogram with provider-chosen bucket boundaries in
/// milliseconds. `buckets` is `(le, cumulative_count)` pairs;
/// callers are not required to keep them sorted, but the merge algorithm
/// in the Metrics Aggregator always produces a sorted result.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LatencyHistogram {
    pub buckets: Vec<(f64, u64)>,
    pub total_count: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceEndpointRef {
    pub cluster_id: ClusterId,
    pub namespace: String,
    pub service: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServicePairMetrics {
    pub source: ServiceEndpointRef,
    pub destination: ServiceEndpointRef,
    pub request_rate: f64,
    pub error_rate: f64,
    pub latency_p99_ms: f64,
    pub latency_distribution: Option<LatencyHistogram>,
}

/// One cluster's contribution to an `AggregatedServicePairMetrics` (spec
/// §3's `clusterPairs[]` breakdown).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClusterPairMetrics {
    pub cluster_id: ClusterId,
    pub request_rate: f64,
    pub error_rate: f64,
    pub latency_p99_ms: f64,
    pub latency_distribution: Option<LatencyHistogram>,
}

/// A service-to-service pair aggregated across `ClusterID`s, retaining the
/// per-cluster breakdown. Unlike `ServicePairMetrics`, the pair key here
/// excludes `ClusterID`, so two clusters reporting the same
/// `(namespace, service)` pair contribute to the same aggregate.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AggregatedServicePairMetrics {
    pub source_namespace: String,
    pub source_service: String,
    pub destination_namespace: String,
    pub destination_service: String,
    pub request_rate: f64,
    pub error_rate: f64,
    pub latency_p99_ms: f64,
    pub latency_distribution: Option<LatencyHistogram>,
    pub cluster_pairs: Vec<ClusterPairMetrics>,
}

// --- Proxy Config Enricher output types ---------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ListenerType {
    Unknown,
    ProxyMetrics,
    ProxyHealthcheck,
    AdminXds,
    AdminWebhook,
    AdminDebug,
    GatewayInbound,
    VirtualOutbound,
    VirtualInbound,
    ServiceOutbound,
    PortOutbound,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RouteType {
    Static,
    PortBased,
    ServiceSpecific,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ListenerMatch {
    pub http_path_prefix: Option<String>,
    pub http_headers: BTreeMap<String, String>,
    pub sni: Option<String>,
    pub alpn: Vec<String>,
    pub tcp_destination_cluster: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WeightedDestination {
    pub cluster_name: String,
    pub service_fqdn: String,
    pub weight: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Destination {
    Cluster {
        cluster_name: String,
        service_fqdn: String,
    },
    StaticIp(String),
    OriginalDst,
    Weighted(Vec<WeightedDestination>),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ListenerRule {
    pub r#match: ListenerMatch,
    pub destination: Destination,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ListenerSummary {
    pub name: String,
    pub address: String,
    pub port: u32,
    pub bind_to_port: bool,
    pub use_original_dst: bool,
    pub listener_type: ListenerType,
    pub rules: Vec<ListenerRule>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClusterSummary {
    pub name: String,
    pub direction: String,
    pub port: String,
    pub subset: String,
    pub service_fqdn: String,
    pub route_type: RouteType,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EndpointSummary {
    pub cluster_name: String,
    pub address: String,
    pub port: u32,
    pub health_status: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RouteSummary {
    pub name: String,
    pub route_type: RouteType,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ProxyConfig {
    pub proxy_mode: ProxyMode,
    pub listeners: Vec<ListenerSummary>,
    pub clusters: Vec<ClusterSummary>,
    pub endpoints: Vec<EndpointSummary>,
    pub routes: Vec<RouteSummary>,
    pub raw_config_dump: Vec<u8>,
    pub raw_clusters: Vec<u8>,
}

impl Default for ProxyMode {
    fn default() -> Self {
        ProxyMode::None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn healthy_is_strictly_less_than_30s() {
        assert_eq!(
            session_state(true, std::time::Duration::from_millis(29_999)),
            SessionState::Healthy
        );
        assert_eq!(
            session_state(true, std::time::Duration::from_secs(30)),
            SessionState::Stale
        );
    }

    #[test]
    fn disconnected_at_exactly_five_minutes() {
        assert_eq!(
            session_state(true, std::time::Duration::from_secs(299)),
            SessionState::Stale
        );
        assert_eq!(
            session_state(true, std::time::Duration::from_secs(300)),
            SessionState::Disconnected
        );
    }

    #[test]
    fn initializing_before_first_snapshot_regardless_of_age() {
        assert_eq!(
            session_state(false, std::time::Duration::from_secs(600)),
            SessionState::Initializing
        );
    }

    #[test]
    fn service_count_saturates_rather_than_wraps() {
        assert_eq!(saturating_service_count(usize::MAX), i32::MAX);
        assert_eq!(saturating_service_count(5), 5);
    }

    #[test]
    fn envoy_present_invariant_tracks_proxy_mode() {
        let sidecar = ServiceInstance::new(
            "10.0.0.1".into(),
            "web-0".into(),
            "node-a".into(),
            Utc::now(),
            BTreeMap::new(),
            BTreeMap::new(),
            vec!["istio-proxy".into()],
            "Running".into(),
            ProxyMode::Sidecar,
        );
        assert!(sidecar.envoy_present);

        let bare = ServiceInstance::new(
            "10.0.0.2".into(),
            "web-1".into(),
            "node-a".into(),
            Utc::now(),
            BTreeMap::new(),
            BTreeMap::new(),
            vec!["web".into()],
            "Running".into(),
            ProxyMode::None,
        );
        assert!(!bare.envoy_present);
    }
}
