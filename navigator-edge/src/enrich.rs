//! Proxy Config Enricher: turns the two raw Envoy admin JSON documents
//! into a `ProxyConfig`. Every classification step is a pure
//! function over `serde_json::Value` so it can fail soft field-by-field:
//! a malformed or absent field degrades the summary for that one listener
//! or cluster rather than the whole enrichment.

use std::collections::BTreeMap;

use navigator_common::model::{
    ClusterSummary, Destination, EndpointSummary, ListenerMatch, ListenerRule, ListenerSummary,
    ListenerType, ProxyConfig, ProxyMode, RouteSummary, RouteType,
};
use serde_json::Value;

const PROXY_METRICS_PORT: u64 = 15090;
const PROXY_HEALTHCHECK_PORT: u64 = 15021;
const ADMIN_XDS_PORT: u64 = 15010;
const ADMIN_WEBHOOK_PORT: u64 = 15012;
const ADMIN_DEBUG_PORT: u64 = 15014;

/// Classifies the node ID prefix into a proxy mode. The model's
/// `ProxyMode` has no UNKNOWN variant (it tracks instance-has-envoy-or-not);
/// an unrecognized prefix here maps to `None` rather than adding a variant
/// only this one call site needs.
pub fn proxy_mode_from_node_id(node_id: &str) -> ProxyMode {
    if node_id.starts_with("sidecar~") {
        ProxyMode::Sidecar
    } else if node_id.starts_with("router~") {
        ProxyMode::Router
    } else {
        ProxyMode::None
    }
}

pub fn enrich(node_id: &str, config_dump: &Value, clusters_dump: &Value) -> ProxyConfig {
    let proxy_mode = proxy_mode_from_node_id(node_id);

    let cluster_table = build_cluster_table(config_dump);
    let clusters: Vec<ClusterSummary> = cluster_table.values().cloned().collect();
    let listeners = parse_listeners(config_dump, proxy_mode, &cluster_table);
    let routes = parse_routes(config_dump);
    let endpoints = parse_endpoints(clusters_dump);

    ProxyConfig {
        proxy_mode,
        listeners,
        clusters,
        endpoints,
        routes,
        raw_config_dump: serde_json::to_vec(config_dump).unwrap_or_default(),
        raw_clusters: serde_json::to_vec(clusters_dump).unwrap_or_default(),
    }
}

/// Finds every `configs[]` entry in a config dump whose `@type` ends with
/// `suffix` (e.g. `ListenersConfigDump`), and returns each entry's
/// `dynamic_*`/`static_*` inner objects flattened into one list of raw
/// resource `Value`s. Envoy nests the actual resource one level deeper
/// (`dynamic_listeners[].active_state.listener`, `static_listeners[].listener`,
/// `dynamic_route_configs[].route_config`, `static_route_configs[].route_config`);
/// callers pass the right set of keys to unwrap.
fn resources_of_type<'a>(config_dump: &'a Value, suffix: &str, unwrap_keys: &[&str]) -> Vec<&'a Value> {
    let mut out = Vec::new();
    let Some(configs) = config_dump.get("configs").and_then(Value::as_array) else {
        return out;
    };
    for entry in configs {
        let is_match = entry
            .get("@type")
            .and_then(Value::as_str)
            .map(|t| t.ends_with(suffix))
            .unwrap_or(false);
        if !is_match {
            continue;
        }
        for key in unwrap_keys {
            if let Some(list) = entry.get(key).and_then(Value::as_array) {
                for item in list {
                    if let Some(resource) = unwrap_resource(item) {
                        out.push(resource);
                    }
                }
            }
        }
    }
    out
}

/// `dynamic_*` entries wrap the resource under `active_state.listener` (or
/// `_route_config` for routes); `static_*` entries hold it directly under
/// `listener`/`route_config`. Try both shapes.
fn unwrap_resource(item: &Value) -> Option<&Value> {
    item.get("active_state")
        .and_then(|s| s.get("listener").or_else(|| s.get("route_config")))
        .or_else(|| item.get("listener"))
        .or_else(|| item.get("route_config"))
}

fn build_cluster_table(config_dump: &Value) -> BTreeMap<String, ClusterSummary> {
    let mut table = BTreeMap::new();
    for cluster in resources_of_type(config_dump, "ClustersConfigDump", &["dynamic_active_clusters", "static_clusters"]) {
        let Some(name) = cluster.get("cluster").and_then(|c| c.get("name")).and_then(Value::as_str) else {
            continue;
        };
        table.insert(name.to_string(), parse_cluster_name(name));
    }
    table
}

/// Parses `direction|port|subset|fqdn`. Missing fields remain empty
/// rather than failing the parse.
fn parse_cluster_name(name: &str) -> ClusterSummary {
    let mut parts = name.splitn(4, '|');
    let direction = parts.next().unwrap_or_default().to_string();
    let port = parts.next().unwrap_or_default().to_string();
    let subset = parts.next().unwrap_or_default().to_string();
    let fqdn = parts.next().unwrap_or_default().to_string();

    let route_type = if name.chars().all(|c| c.is_ascii_digit()) {
        RouteType::PortBased
    } else if fqdn.contains('.') && port.parse::<u32>().is_ok() {
        RouteType::ServiceSpecific
    } else {
        RouteType::Static
    };

    ClusterSummary { name: name.to_string(), direction, port, subset, service_fqdn: fqdn, route_type }
}

fn parse_listeners(
    config_dump: &Value,
    proxy_mode: ProxyMode,
    cluster_table: &BTreeMap<String, ClusterSummary>,
) -> Vec<ListenerSummary> {
    resources_of_type(config_dump, "ListenersConfigDump", &["dynamic_listeners", "static_listeners"])
        .into_iter()
        .map(|listener| parse_listener(listener, proxy_mode, cluster_table))
        .collect()
}

fn parse_listener(
    listener: &Value,
    proxy_mode: ProxyMode,
    cluster_table: &BTreeMap<String, ClusterSummary>,
) -> ListenerSummary {
    let name = listener.get("name").and_then(Value::as_str).unwrap_or_default().to_string();
    let socket = listener.get("address").and_then(|a| a.get("socket_address"));
    let address = socket.and_then(|s| s.get("address")).and_then(Value::as_str).unwrap_or_default().to_string();
    let port = socket
        .and_then(|s| s.get("port_value"))
        .and_then(Value::as_u64)
        .unwrap_or(0) as u32;
    let bind_to_port = listener.get("bind_to_port").and_then(Value::as_bool).unwrap_or(true);
    let use_original_dst = listener
        .get("use_original_dst")
        .and_then(Value::as_bool)
        .unwrap_or(false);

    let listener_type = classify_listener_type(&name, &address, port as u64, use_original_dst, proxy_mode);

    let rules = listener
        .get("filter_chains")
        .and_then(Value::as_array)
        .map(|chains| chains.iter().map(|fc| parse_filter_chain(fc, cluster_table)).collect())
        .unwrap_or_default();

    ListenerSummary { name, address, port, bind_to_port, use_original_dst, listener_type, rules }
}

fn classify_listener_type(
    name: &str,
    address: &str,
    port: u64,
    use_original_dst: bool,
    proxy_mode: ProxyMode,
) -> ListenerType {
    match port {
        PROXY_METRICS_PORT => return ListenerType::ProxyMetrics,
        PROXY_HEALTHCHECK_PORT => return ListenerType::ProxyHealthcheck,
        ADMIN_XDS_PORT => return ListenerType::AdminXds,
        ADMIN_WEBHOOK_PORT => return ListenerType::AdminWebhook,
        ADMIN_DEBUG_PORT => return ListenerType::AdminDebug,
        _ => {}
    }

    let binds_all = address == "0.0.0.0" || address == "::";
    if proxy_mode == ProxyMode::Router && binds_all && !use_original_dst {
        return ListenerType::GatewayInbound;
    }
    if binds_all && use_original_dst {
        return ListenerType::VirtualOutbound;
    }
    if binds_all {
        return ListenerType::VirtualInbound;
    }
    if is_service_fqdn(address) {
        return ListenerType::ServiceOutbound;
    }
    if !name.is_empty() && name.chars().all(|c| c.is_ascii_digit()) {
        return ListenerType::PortOutbound;
    }
    ListenerType::Unknown
}

fn is_service_fqdn(address: &str) -> bool {
    let parts: Vec<&str> = address.split('.').collect();
    parts.len() >= 4 && parts.get(2).map(|s| *s == "svc").unwrap_or(false)
}

/// Resolves one filter chain's match predicate and destination. Precedence
/// within a chain is HTTP match > filter-chain match > TCP-proxy match;
/// since this is a best-effort JSON walk rather than a typed Envoy config
/// model, "HTTP match" here means an `http_connection_manager`
/// filter carrying an inline route with a path prefix, and "filter-chain
/// match" means the chain's own `filter_chain_match` (SNI/ALPN).
fn parse_filter_chain(chain: &Value, cluster_table: &BTreeMap<String, ClusterSummary>) -> ListenerRule {
    let filters = chain.get("filters").and_then(Value::as_array);

    if let Some(http_match) = filters.and_then(|fs| find_http_route(fs)) {
        let (path, cluster_name) = http_match;
        return ListenerRule {
            r#match: ListenerMatch { http_path_prefix: Some(path), ..Default::default() },
            destination: resolve_destination(&cluster_name, cluster_table),
        };
    }

    let fc_match = chain.get("filter_chain_match");
    let sni = fc_match
        .and_then(|m| m.get("server_names"))
        .and_then(Value::as_array)
        .and_then(|names| names.first())
        .and_then(Value::as_str)
        .map(str::to_string);
    let alpn: Vec<String> = fc_match
        .and_then(|m| m.get("application_protocols"))
        .and_then(Value::as_array)
        .map(|protos| protos.iter().filter_map(Value::as_str).map(str::to_string).collect())
        .unwrap_or_default();

    if let Some(tcp_cluster) = filters.and_then(|fs| find_tcp_proxy_cluster(fs)) {
        return ListenerRule {
            r#match: ListenerMatch { sni: sni.clone(), alpn: alpn.clone(), tcp_destination_cluster: Some(tcp_cluster.clone()), ..Default::default() },
            destination: resolve_destination(&tcp_cluster, cluster_table),
        };
    }

    ListenerRule {
        r#match: ListenerMatch { sni, alpn, ..Default::default() },
        destination: Destination::OriginalDst,
    }
}

fn find_http_route(filters: &[Value]) -> Option<(String, String)> {
    for filter in filters {
        let is_hcm = filter
            .get("name")
            .and_then(Value::as_str)
            .map(|n| n.contains("http_connection_manager"))
            .unwrap_or(false);
        if !is_hcm {
            continue;
        }
        let route = filter
            .pointer("/typed_config/route_config/virtual_hosts/0/routes/0")?;
        let path = route.pointer("/match/prefix").and_then(Value::as_str).unwrap_or("/").to_string();
        let cluster = route.pointer("/route/cluster").and_then(Value::as_str)?.to_string();
        return Some((path, cluster));
    }
    None
}

fn find_tcp_proxy_cluster(filters: &[Value]) -> Option<String> {
    for filter in filters {
        let is_tcp = filter
            .get("name")
            .and_then(Value::as_str)
            .map(|n| n.contains("tcp_proxy"))
            .unwrap_or(false);
        if !is_tcp {
            continue;
        }
        if let Some(cluster) = filter.pointer("/typed_config/cluster").and_then(Value::as_str) {
            return Some(cluster.to_string());
        }
        if let Some(members) = filter
            .pointer("/typed_config/weighted_clusters/clusters")
            .and_then(Value::as_array)
        {
            return members.first().and_then(|m| m.get("name")).and_then(Value::as_str).map(str::to_string);
        }
    }
    None
}

fn resolve_destination(cluster_name: &str, cluster_table: &BTreeMap<String, ClusterSummary>) -> Destination {
    if let Some(ip) = cluster_name.strip_prefix("original-dst:") {
        return Destination::StaticIp(ip.to_string());
    }
    let service_fqdn = cluster_table
        .get(cluster_name)
        .map(|c| c.service_fqdn.clone())
        .unwrap_or_default();
    Destination::Cluster { cluster_name: cluster_name.to_string(), service_fqdn }
}

fn parse_routes(config_dump: &Value) -> Vec<RouteSummary> {
    resources_of_type(config_dump, "RoutesConfigDump", &["dynamic_route_configs", "static_route_configs"])
        .into_iter()
        .map(|route| {
            let name = route.get("name").and_then(Value::as_str).unwrap_or_default().to_string();
            let route_type = if name.chars().all(|c| c.is_ascii_digit()) {
                RouteType::PortBased
            } else if name.contains(':') && name.rsplit(':').next().map(|p| p.parse::<u32>().is_ok()).unwrap_or(false) {
                RouteType::ServiceSpecific
            } else {
                RouteType::Static
            };
            RouteSummary { name, route_type }
        })
        .collect()
}

fn parse_endpoints(clusters_dump: &Value) -> Vec<EndpointSummary> {
    let Some(statuses) = clusters_dump.get("cluster_statuses").and_then(Value::as_array) else {
        return Vec::new();
    };
    let mut out = Vec::new();
    for cluster in statuses {
        let Some(cluster_name) = cluster.get("name").and_then(Value::as_str) else { continue };
        let Some(hosts) = cluster.get("host_statuses").and_then(Value::as_array) else { continue };
        for host in hosts {
            let socket = host.get("address").and_then(|a| a.get("socket_address"));
            let address = socket.and_then(|s| s.get("address")).and_then(Value::as_str).unwrap_or_default().to_string();
            let port = socket.and_then(|s| s.get("port_value")).and_then(Value::as_u64).unwrap_or(0) as u32;
            let health_status = host
                .pointer("/health_status/eds_health_status")
                .and_then(Value::as_str)
                .unwrap_or("UNKNOWN")
                .to_string();
            out.push(EndpointSummary { cluster_name: cluster_name.to_string(), address, port, health_status });
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn node_id_prefix_drives_proxy_mode() {
        assert_eq!(proxy_mode_from_node_id("sidecar~10.0.0.1~web-0.default~default.svc.cluster.local"), ProxyMode::Sidecar);
        assert_eq!(proxy_mode_from_node_id("router~10.0.0.1~gw-0~istio-system.svc.cluster.local"), ProxyMode::Router);
        assert_eq!(proxy_mode_from_node_id("unknown~whatever"), ProxyMode::None);
    }

    #[test]
    fn cluster_name_parses_istio_convention() {
        let summary = parse_cluster_name("outbound|8080|v1|web.default.svc.cluster.local");
        assert_eq!(summary.direction, "outbound");
        assert_eq!(summary.port, "8080");
        assert_eq!(summary.subset, "v1");
        assert_eq!(summary.service_fqdn, "web.default.svc.cluster.local");
        assert_eq!(summary.route_type, RouteType::ServiceSpecific);
    }

    #[test]
    fn static_istio_internal_cluster_name_has_no_fqdn() {
        let summary = parse_cluster_name("InboundPassthroughCluster");
        assert_eq!(summary.service_fqdn, "");
        assert_eq!(summary.route_type, RouteType::Static);
    }

    #[test]
    fn listener_type_classification_follows_precedence_order() {
        assert_eq!(
            classify_listener_type("", "0.0.0.0", PROXY_METRICS_PORT, false, ProxyMode::Sidecar),
            ListenerType::ProxyMetrics,
        );
        assert_eq!(
            classify_listener_type("0.0.0.0_80", "0.0.0.0", 80, false, ProxyMode::Router),
            ListenerType::GatewayInbound,
        );
        assert_eq!(
            classify_listener_type("virtualOutbound", "0.0.0.0", 15001, true, ProxyMode::Sidecar),
            ListenerType::VirtualOutbound,
        );
        assert_eq!(
            classify_listener_type("virtualInbound", "0.0.0.0", 15006, false, ProxyMode::Sidecar),
            ListenerType::VirtualInbound,
        );
        assert_eq!(
            classify_listener_type(
                "web.default.svc.cluster.local_8080",
                "web.default.svc.cluster.local",
                8080,
                false,
                ProxyMode::Sidecar,
            ),
            ListenerType::ServiceOutbound,
        );
    }

    #[test]
    fn purely_numeric_listener_name_is_port_outbound() {
        assert_eq!(
            classify_listener_type("15006", "10.244.0.5", 15006, false, ProxyMode::Sidecar),
            ListenerType::PortOutbound,
        );
    }

    #[test]
    fn numeric_bind_address_without_a_numeric_name_is_not_port_outbound() {
        assert_eq!(
            classify_listener_type("outbound_15006", "10.244.0.5", 15006, false, ProxyMode::Sidecar),
            ListenerType::Unknown,
        );
    }

    #[test]
    fn malformed_config_dump_enriches_to_an_empty_but_valid_proxy_config() {
        let config = enrich("sidecar~10.0.0.1~web-0~default.svc.cluster.local", &json!({}), &json!({}));
        assert!(config.listeners.is_empty());
        assert!(config.clusters.is_empty());
        assert_eq!(config.proxy_mode, ProxyMode::Sidecar);
    }
}
