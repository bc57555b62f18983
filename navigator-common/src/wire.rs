//! Conversions between the domain model (`crate::model`) and the
//! generated wire types (`navigator_proto::navigator`). Kept in one place
//! so the Edge (encoding outbound) and the Manager (decoding inbound)
//! share exactly one mapping.

use std::collections::BTreeMap;

use navigator_proto::navigator as pb;

use crate::ids::ClusterId;
use crate::model::*;

fn millis_to_datetime(ms: i64) -> chrono::DateTime<chrono::Utc> {
    chrono::DateTime::from_timestamp_millis(ms).unwrap_or_default()
}

impl From<ProxyMode> for pb::ProxyMode {
    fn from(value: ProxyMode) -> Self {
        match value {
            ProxyMode::None => pb::ProxyMode::None,
            ProxyMode::Sidecar => pb::ProxyMode::Sidecar,
            ProxyMode::Gateway => pb::ProxyMode::Gateway,
            ProxyMode::Router => pb::ProxyMode::Router,
        }
    }
}

impl From<pb::ProxyMode> for ProxyMode {
    fn from(value: pb::ProxyMode) -> Self {
        match value {
            pb::ProxyMode::None => ProxyMode::None,
            pb::ProxyMode::Sidecar => ProxyMode::Sidecar,
            pb::ProxyMode::Gateway => ProxyMode::Gateway,
            pb::ProxyMode::Router => ProxyMode::Router,
        }
    }
}

fn proxy_mode_from_i32(raw: i32) -> ProxyMode {
    pb::ProxyMode::try_from(raw).unwrap_or(pb::ProxyMode::None).into()
}

impl From<&ServiceInstance> for pb::ServiceInstance {
    fn from(value: &ServiceInstance) -> Self {
        pb::ServiceInstance {
            ip: value.ip.clone(),
            pod_name: value.pod_name.clone(),
            node_name: value.node_name.clone(),
            created_at_unix_ms: value.created_at.timestamp_millis(),
            labels: value.labels.clone().into_iter().collect(),
            annotations: value.annotations.clone().into_iter().collect(),
            containers: value.containers.clone(),
            pod_status: value.pod_status.clone(),
            envoy_present: value.envoy_present,
            proxy_mode: pb::ProxyMode::from(value.proxy_mode) as i32,
        }
    }
}

impl From<pb::ServiceInstance> for ServiceInstance {
    fn from(value: pb::ServiceInstance) -> Self {
        let proxy_mode = proxy_mode_from_i32(value.proxy_mode);
        ServiceInstance {
            ip: value.ip,
            pod_name: value.pod_name,
            node_name: value.node_name,
            created_at: millis_to_datetime(value.created_at_unix_ms),
            labels: BTreeMap::from_iter(value.labels),
            annotations: BTreeMap::from_iter(value.annotations),
            containers: value.containers,
            pod_status: value.pod_status,
            // Recomputed from proxy_mode rather than trusted from the
            // wire, so a misbehaving Edge can't desync the invariant.
            envoy_present: proxy_mode.implies_envoy_present(),
            proxy_mode,
        }
    }
}

impl From<&Service> for pb::Service {
    fn from(value: &Service) -> Self {
        pb::Service {
            name: value.name.clone(),
            namespace: value.namespace.clone(),
            cluster_ip: value.cluster_ip.clone(),
            external_ip: value.external_ip.clone(),
            service_type: value.service_type.clone(),
            instances: value.instances.iter().map(pb::ServiceInstance::from).collect(),
        }
    }
}

impl From<pb::Service> for Service {
    fn from(value: pb::Service) -> Self {
        Service {
            name: value.name,
            namespace: value.namespace,
            cluster_ip: value.cluster_ip,
            external_ip: value.external_ip,
            service_type: value.service_type,
            instances: value.instances.into_iter().map(ServiceInstance::from).collect(),
        }
    }
}

impl From<&IstioObject> for pb::IstioObject {
    fn from(value: &IstioObject) -> Self {
        pb::IstioObject {
            name: value.name.clone(),
            namespace: value.namespace.clone(),
            kind: value.kind.clone(),
            labels: value.labels.clone().into_iter().collect(),
            raw_spec_json: value.raw_spec_json.clone(),
        }
    }
}

impl From<pb::IstioObject> for IstioObject {
    fn from(value: pb::IstioObject) -> Self {
        IstioObject {
            name: value.name,
            namespace: value.namespace,
            kind: value.kind,
            labels: BTreeMap::from_iter(value.labels),
            raw_spec_json: value.raw_spec_json,
        }
    }
}

impl From<&IstioControlPlaneConfig> for pb::IstioControlPlaneConfig {
    fn from(value: &IstioControlPlaneConfig) -> Self {
        pb::IstioControlPlaneConfig {
            root_namespace: value.root_namespace.clone(),
            pilot_scope_gateway_to_namespace: value.pilot_scope_gateway_to_namespace,
        }
    }
}

impl From<pb::IstioControlPlaneConfig> for IstioControlPlaneConfig {
    fn from(value: pb::IstioControlPlaneConfig) -> Self {
        IstioControlPlaneConfig {
            root_namespace: value.root_namespace,
            pilot_scope_gateway_to_namespace: value.pilot_scope_gateway_to_namespace,
        }
    }
}

fn istio_objects(values: &[IstioObject]) -> Vec<pb::IstioObject> {
    values.iter().map(pb::IstioObject::from).collect()
}

fn istio_objects_from_wire(values: Vec<pb::IstioObject>) -> Vec<IstioObject> {
    values.into_iter().map(IstioObject::from).collect()
}

impl From<&ClusterSnapshot> for pb::ClusterSnapshot {
    fn from(value: &ClusterSnapshot) -> Self {
        pb::ClusterSnapshot {
            cluster_id: value.cluster_id.0.clone(),
            services: value.services.iter().map(pb::Service::from).collect(),
            destination_rules: istio_objects(&value.destination_rules),
            virtual_services: istio_objects(&value.virtual_services),
            gateways: istio_objects(&value.gateways),
            sidecars: istio_objects(&value.sidecars),
            envoy_filters: istio_objects(&value.envoy_filters),
            request_authentications: istio_objects(&value.request_authentications),
            peer_authentications: istio_objects(&value.peer_authentications),
            authorization_policies: istio_objects(&value.authorization_policies),
            wasm_plugins: istio_objects(&value.wasm_plugins),
            service_entries: istio_objects(&value.service_entries),
            control_plane: Some(pb::IstioControlPlaneConfig::from(&value.control_plane)),
        }
    }
}

impl From<pb::ClusterSnapshot> for ClusterSnapshot {
    fn from(value: pb::ClusterSnapshot) -> Self {
        ClusterSnapshot {
            cluster_id: ClusterId(value.cluster_id),
            services: value.services.into_iter().map(Service::from).collect(),
            destination_rules: istio_objects_from_wire(value.destination_rules),
            virtual_services: istio_objects_from_wire(value.virtual_services),
            gateways: istio_objects_from_wire(value.gateways),
            sidecars: istio_objects_from_wire(value.sidecars),
            envoy_filters: istio_objects_from_wire(value.envoy_filters),
            request_authentications: istio_objects_from_wire(value.request_authentications),
            peer_authentications: istio_objects_from_wire(value.peer_authentications),
            authorization_policies: istio_objects_from_wire(value.authorization_policies),
            wasm_plugins: istio_objects_from_wire(value.wasm_plugins),
            service_entries: istio_objects_from_wire(value.service_entries),
            control_plane: value.control_plane.map(IstioControlPlaneConfig::from).unwrap_or_default(),
        }
    }
}

impl From<Capabilities> for pb::Capabilities {
    fn from(value: Capabilities) -> Self {
        pb::Capabilities {
            metrics_enabled: value.metrics_enabled,
        }
    }
}

impl From<pb::Capabilities> for Capabilities {
    fn from(value: pb::Capabilities) -> Self {
        Capabilities {
            metrics_enabled: value.metrics_enabled,
        }
    }
}

// --- Proxy config -------------------------------------------------------

impl From<ListenerType> for pb::listener_summary::Type {
    fn from(value: ListenerType) -> Self {
        use pb::listener_summary::Type;
        match value {
            ListenerType::Unknown => Type::Unknown,
            ListenerType::ProxyMetrics => Type::ProxyMetrics,
            ListenerType::ProxyHealthcheck => Type::ProxyHealthcheck,
            ListenerType::AdminXds => Type::AdminXds,
            ListenerType::AdminWebhook => Type::AdminWebhook,
            ListenerType::AdminDebug => Type::AdminDebug,
            ListenerType::GatewayInbound => Type::GatewayInbound,
            ListenerType::VirtualOutbound => Type::VirtualOutbound,
            ListenerType::VirtualInbound => Type::VirtualInbound,
            ListenerType::ServiceOutbound => Type::ServiceOutbound,
            ListenerType::PortOutbound => Type::PortOutbound,
        }
    }
}

impl From<pb::listener_summary::Type> for ListenerType {
    fn from(value: pb::listener_summary::Type) -> Self {
        use pb::listener_summary::Type;
        match value {
            Type::Unknown => ListenerType::Unknown,
            Type::ProxyMetrics => ListenerType::ProxyMetrics,
            Type::ProxyHealthcheck => ListenerType::ProxyHealthcheck,
            Type::AdminXds => ListenerType::AdminXds,
            Type::AdminWebhook => ListenerType::AdminWebhook,
            Type::AdminDebug => ListenerType::AdminDebug,
            Type::GatewayInbound => ListenerType::GatewayInbound,
            Type::VirtualOutbound => ListenerType::VirtualOutbound,
            Type::VirtualInbound => ListenerType::VirtualInbound,
            Type::ServiceOutbound => ListenerType::ServiceOutbound,
            Type::PortOutbound => ListenerType::PortOutbound,
        }
    }
}

impl From<RouteType> for pb::cluster_summary::RouteType {
    fn from(value: RouteType) -> Self {
        use pb::cluster_summary::RouteType as W;
        match value {
            RouteType::Static => W::Static,
            RouteType::PortBased => W::PortBased,
            RouteType::ServiceSpecific => W::ServiceSpecific,
        }
    }
}

impl From<pb::cluster_summary::RouteType> for RouteType {
    fn from(value: pb::cluster_summary::RouteType) -> Self {
        use pb::cluster_summary::RouteType as W;
        match value {
            W::Static => RouteType::Static,
            W::PortBased => RouteType::PortBased,
            W::ServiceSpecific => RouteType::ServiceSpecific,
        }
    }
}

impl From<&ListenerMatch> for pb::ListenerMatch {
    fn from(value: &ListenerMatch) -> Self {
        pb::ListenerMatch {
            http_path_prefix: value.http_path_prefix.clone().unwrap_or_default(),
            http_headers: value.http_headers.clone().into_iter().collect(),
            sni: value.sni.clone().unwrap_or_default(),
            alpn: value.alpn.clone(),
            tcp_destination_cluster: value.tcp_destination_cluster.clone().unwrap_or_default(),
        }
    }
}

impl From<pb::ListenerMatch> for ListenerMatch {
    fn from(value: pb::ListenerMatch) -> Self {
        ListenerMatch {
            http_path_prefix: non_empty(value.http_path_prefix),
            http_headers: BTreeMap::from_iter(value.http_headers),
            sni: non_empty(value.sni),
            alpn: value.alpn,
            tcp_destination_cluster: non_empty(value.tcp_destination_cluster),
        }
    }
}

fn non_empty(s: String) -> Option<String> {
    if s.is_empty() { None } else { Some(s) }
}

impl From<&Destination> for pb::Destination {
    fn from(value: &Destination) -> Self {
        use pb::destination::Kind;
        match value {
            Destination::Cluster { cluster_name, service_fqdn } => pb::Destination {
                kind: Kind::Cluster as i32,
                cluster_name: cluster_name.clone(),
                service_fqdn: service_fqdn.clone(),
                static_ip: String::new(),
                weighted: vec![],
            },
            Destination::StaticIp(ip) => pb::Destination {
                kind: Kind::StaticIp as i32,
                cluster_name: String::new(),
                service_fqdn: String::new(),
                static_ip: ip.clone(),
                weighted: vec![],
            },
            Destination::OriginalDst => pb::Destination {
                kind: Kind::OriginalDst as i32,
                cluster_name: String::new(),
                service_fqdn: String::new(),
                static_ip: String::new(),
                weighted: vec![],
            },
            Destination::Weighted(members) => pb::Destination {
                kind: Kind::Weighted as i32,
                cluster_name: String::new(),
                service_fqdn: String::new(),
                static_ip: String::new(),
                weighted: members
                    .iter()
                    .map(|m| pb::WeightedDestination {
                        cluster_name: m.cluster_name.clone(),
                        service_fqdn: m.service_fqdn.clone(),
                        weight: m.weight,
                    })
                    .collect(),
            },
        }
    }
}

impl From<pb::Destination> for Destination {
    fn from(value: pb::Destination) -> Self {
        use pb::destination::Kind;
        match Kind::try_from(value.kind).unwrap_or(Kind::Cluster) {
            Kind::Cluster => Destination::Cluster {
                cluster_name: value.cluster_name,
                service_fqdn: value.service_fqdn,
            },
            Kind::StaticIp => Destination::StaticIp(value.static_ip),
            Kind::OriginalDst => Destination::OriginalDst,
            Kind::Weighted => Destination::Weighted(
                value
                    .weighted
                    .into_iter()
                    .map(|m| WeightedDestination {
                        cluster_name: m.cluster_name,
                        service_fqdn: m.service_fqdn,
                        weight: m.weight,
                    })
                    .collect(),
            ),
        }
    }
}

impl From<&ListenerRule> for pb::ListenerRule {
    fn from(value: &ListenerRule) -> Self {
        pb::ListenerRule {
            r#match: Some(pb::ListenerMatch::from(&value.r#match)),
            destination: Some(pb::Destination::from(&value.destination)),
        }
    }
}

impl TryFrom<pb::ListenerRule> for ListenerRule {
    type Error = ();

    fn try_from(value: pb::ListenerRule) -> Result<Self, Self::Error> {
        Ok(ListenerRule {
            r#match: value.r#match.map(ListenerMatch::from).unwrap_or_default(),
            destination: value.destination.map(Destination::from).ok_or(())?,
        })
    }
}

impl From<&ListenerSummary> for pb::ListenerSummary {
    fn from(value: &ListenerSummary) -> Self {
        pb::ListenerSummary {
            name: value.name.clone(),
            address: value.address.clone(),
            port: value.port,
            bind_to_port: value.bind_to_port,
            use_original_dst: value.use_original_dst,
            listener_type: pb::listener_summary::Type::from(value.listener_type) as i32,
            rules: value.rules.iter().map(pb::ListenerRule::from).collect(),
        }
    }
}

impl From<pb::ListenerSummary> for ListenerSummary {
    fn from(value: pb::ListenerSummary) -> Self {
        let listener_type = pb::listener_summary::Type::try_from(value.listener_type)
            .unwrap_or(pb::listener_summary::Type::Unknown)
            .into();
        ListenerSummary {
            name: value.name,
            address: value.address,
            port: value.port,
            bind_to_port: value.bind_to_port,
            use_original_dst: value.use_original_dst,
            listener_type,
            rules: value.rules.into_iter().filter_map(|r| r.try_into().ok()).collect(),
        }
    }
}

impl From<&ClusterSummary> for pb::ClusterSummary {
    fn from(value: &ClusterSummary) -> Self {
        pb::ClusterSummary {
            name: value.name.clone(),
            direction: value.direction.clone(),
            port: value.port.clone(),
            subset: value.subset.clone(),
            service_fqdn: value.service_fqdn.clone(),
            route_type: pb::cluster_summary::RouteType::from(value.route_type) as i32,
        }
    }
}

impl From<pb::ClusterSummary> for ClusterSummary {
    fn from(value: pb::ClusterSummary) -> Self {
        let route_type = pb::cluster_summary::RouteType::try_from(value.route_type)
            .unwrap_or(pb::cluster_summary::RouteType::Static)
            .into();
        ClusterSummary {
            name: value.name,
            direction: value.direction,
            port: value.port,
            subset: value.subset,
            service_fqdn: value.service_fqdn,
            route_type,
        }
    }
}

impl From<&EndpointSummary> for pb::EndpointSummary {
    fn from(value: &EndpointSummary) -> Self {
        pb::EndpointSummary {
            cluster_name: value.cluster_name.clone(),
            address: value.address.clone(),
            port: value.port,
            health_status: value.health_status.clone(),
        }
    }
}

impl From<pb::EndpointSummary> for EndpointSummary {
    fn from(value: pb::EndpointSummary) -> Self {
        EndpointSummary {
            cluster_name: value.cluster_name,
            address: value.address,
            port: value.port,
            health_status: value.health_status,
        }
    }
}

impl From<&RouteSummary> for pb::RouteSummary {
    fn from(value: &RouteSummary) -> Self {
        pb::RouteSummary {
            name: value.name.clone(),
            route_type: pb::cluster_summary::RouteType::from(value.route_type) as i32,
        }
    }
}

impl From<pb::RouteSummary> for RouteSummary {
    fn from(value: pb::RouteSummary) -> Self {
        let route_type = pb::cluster_summary::RouteType::try_from(value.route_type)
            .unwrap_or(pb::cluster_summary::RouteType::Static)
            .into();
        RouteSummary {
            name: value.name,
            route_type,
        }
    }
}

impl From<&ProxyConfig> for pb::ProxyConfig {
    fn from(value: &ProxyConfig) -> Self {
        pb::ProxyConfig {
            proxy_mode: pb::ProxyMode::from(value.proxy_mode) as i32,
            listeners: value.listeners.iter().map(pb::ListenerSummary::from).collect(),
            clusters: value.clusters.iter().map(pb::ClusterSummary::from).collect(),
            endpoints: value.endpoints.iter().map(pb::EndpointSummary::from).collect(),
            routes: value.routes.iter().map(pb::RouteSummary::from).collect(),
            raw_config_dump: value.raw_config_dump.clone().into(),
            raw_clusters: value.raw_clusters.clone().into(),
        }
    }
}

impl From<pb::ProxyConfig> for ProxyConfig {
    fn from(value: pb::ProxyConfig) -> Self {
        ProxyConfig {
            proxy_mode: proxy_mode_from_i32(value.proxy_mode),
            listeners: value.listeners.into_iter().map(ListenerSummary::from).collect(),
            clusters: value.clusters.into_iter().map(ClusterSummary::from).collect(),
            endpoints: value.endpoints.into_iter().map(EndpointSummary::from).collect(),
            routes: value.routes.into_iter().map(RouteSummary::from).collect(),
            raw_config_dump: value.raw_config_dump.to_vec(),
            raw_clusters: value.raw_clusters.to_vec(),
        }
    }
}

// --- Metrics --------------------------------------------------------------

impl From<&LatencyHistogram> for pb::LatencyHistogram {
    fn from(value: &LatencyHistogram) -> Self {
        pb::LatencyHistogram {
            buckets: value
                .buckets
                .iter()
                .map(|(le, count)| pb::HistogramBucket {
                    le: *le,
                    cumulative_count: *count,
                })
                .collect(),
            total_count: value.total_count,
        }
    }
}

impl From<pb::LatencyHistogram> for LatencyHistogram {
    fn from(value: pb::LatencyHistogram) -> Self {
        LatencyHistogram {
            buckets: value.buckets.into_iter().map(|b| (b.le, b.cumulative_count)).collect(),
            total_count: value.total_count,
        }
    }
}

impl From<&ServiceEndpointRef> for pb::ServiceEndpointRef {
    fn from(value: &ServiceEndpointRef) -> Self {
        pb::ServiceEndpointRef {
            cluster_id: value.cluster_id.0.clone(),
            namespace: value.namespace.clone(),
            service: value.service.clone(),
        }
    }
}

impl From<pb::ServiceEndpointRef> for ServiceEndpointRef {
    fn from(value: pb::ServiceEndpointRef) -> Self {
        ServiceEndpointRef {
            cluster_id: ClusterId(value.cluster_id),
            namespace: value.namespace,
            service: value.service,
        }
    }
}

impl From<&ServicePairMetrics> for pb::ServicePairMetrics {
    fn from(value: &ServicePairMetrics) -> Self {
        pb::ServicePairMetrics {
            source: Some(pb::ServiceEndpointRef::from(&value.source)),
            destination: Some(pb::ServiceEndpointRef::from(&value.destination)),
            request_rate: value.request_rate,
            error_rate: value.error_rate,
            latency_p99_ms: value.latency_p99_ms,
            latency_distribution: value.latency_distribution.as_ref().map(pb::LatencyHistogram::from),
        }
    }
}

impl TryFrom<pb::ServicePairMetrics> for ServicePairMetrics {
    type Error = ();

    fn try_from(value: pb::ServicePairMetrics) -> Result<Self, Self::Error> {
        Ok(ServicePairMetrics {
            source: value.source.map(ServiceEndpointRef::from).ok_or(())?,
            destination: value.destination.map(ServiceEndpointRef::from).ok_or(())?,
            request_rate: value.request_rate,
            error_rate: value.error_rate,
            latency_p99_ms: value.latency_p99_ms,
            latency_distribution: value.latency_distribution.map(LatencyHistogram::from),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    #[test]
    fn service_instance_round_trips_through_wire() {
        let instance = ServiceInstance::new(
            "10.0.0.5".into(),
            "web-0".into(),
            "node-a".into(),
            chrono::Utc::now(),
            BTreeMap::from([("istio.io/rev".into(), "stable".into())]),
            BTreeMap::new(),
            vec!["istio-proxy".into()],
            "Running".into(),
            ProxyMode::Sidecar,
        );
        let wire = pb::ServiceInstance::from(&instance);
        let back = ServiceInstance::from(wire);
        assert_eq!(back.pod_name, instance.pod_name);
        assert_eq!(back.proxy_mode, ProxyMode::Sidecar);
        assert!(back.envoy_present);
    }

    #[test]
    fn cluster_snapshot_round_trips_through_wire() {
        let snapshot = ClusterSnapshot {
            cluster_id: ClusterId::from("prod-eu"),
            services: vec![Service {
                name: "web".into(),
                namespace: "default".into(),
                cluster_ip: "10.0.0.1".into(),
                external_ip: String::new(),
                service_type: "ClusterIP".into(),
                instances: vec![],
            }],
            ..Default::default()
        };
        let wire = pb::ClusterSnapshot::from(&snapshot);
        let back = ClusterSnapshot::from(wire);
        assert_eq!(back.cluster_id, snapshot.cluster_id);
        assert_eq!(back.services.len(), 1);
        assert_eq!(back.services[0].name, "web");
    }
}
