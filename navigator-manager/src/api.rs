//! Read-side library API exposed to whatever outer surface (REST gateway,
//! UI backend) embeds the Manager. That outer surface is someone else's
//! concern, so this module is the library boundary rather than a set of
//! HTTP handlers.

use std::sync::Arc;
use std::time::Duration;

use navigator_common::ids::{InstanceId, RequestId, ServiceId};
use navigator_common::model::{
    AggregatedService, AggregatedServiceInstance, AggregatedServicePairMetrics, ConnectionInfo, IstioObject,
    ProxyConfig, ServicePairMetrics,
};
use navigator_common::{NavigatorError, RequestError};
use navigator_proto::navigator as pb;
use tokio_util::sync::CancellationToken;

use crate::metrics_aggregator::{self, ServiceGraphQuery};
use crate::state::ManagerState;

pub struct ServiceConnectionsQuery {
    pub namespace: String,
    pub service_name: String,
    pub start_unix_ms: i64,
    pub end_unix_ms: i64,
    pub proxy_mode_filter: i32,
}

pub struct ServiceConnections {
    pub aggregated_inbound: Vec<AggregatedServicePairMetrics>,
    pub aggregated_outbound: Vec<AggregatedServicePairMetrics>,
    pub detailed_inbound: Vec<ServicePairMetrics>,
    pub detailed_outbound: Vec<ServicePairMetrics>,
    pub clusters_queried: Vec<String>,
}

/// `{optional namespace, optional clusterID} -> [Service across clusters]`.
pub async fn list_services(
    state: &Arc<ManagerState>,
    namespace: Option<&str>,
    cluster_id: Option<&navigator_common::ClusterId>,
) -> Vec<AggregatedService> {
    state.registry.list_aggregated_services(namespace, cluster_id).await
}

pub async fn get_service(
    state: &Arc<ManagerState>,
    service_id: &ServiceId,
) -> Result<AggregatedService, NavigatorError> {
    state
        .registry
        .get_aggregated_service(service_id)
        .await
        .ok_or_else(|| NavigatorError::not_found(format!("service {service_id} not found")))
}

pub async fn get_service_instance(
    state: &Arc<ManagerState>,
    instance_id: &InstanceId,
) -> Result<AggregatedServiceInstance, NavigatorError> {
    state
        .registry
        .get_aggregated_service_instance(instance_id)
        .await
        .ok_or_else(|| NavigatorError::not_found(format!("instance {instance_id} not found")))
}

pub async fn list_clusters(state: &Arc<ManagerState>) -> Vec<ConnectionInfo> {
    state.registry.list_sessions().await
}

/// Issues a correlated `ProxyConfigRequest` to the Edge owning `instanceID`
/// and waits for its reply.
pub async fn get_proxy_config(
    state: &Arc<ManagerState>,
    instance_id: &InstanceId,
    cancel: CancellationToken,
) -> Result<ProxyConfig, NavigatorError> {
    if !state.registry.is_registered(&instance_id.cluster_id).await {
        return Err(RequestError::Disconnected.into());
    }

    let request_id = RequestId::generate();
    let request = pb::ManagerMessage {
        payload: Some(pb::manager_message::Payload::ProxyConfigRequest(
            pb::ProxyConfigRequest {
                request_id: request_id.0.clone(),
                namespace: instance_id.namespace.clone(),
                pod_name: instance_id.pod_name.clone(),
            },
        )),
    };
    state
        .registry
        .send_to_cluster(&instance_id.cluster_id, request)
        .await?;

    let response = state
        .proxy_correlator
        .issue(
            instance_id.cluster_id.clone(),
            request_id,
            state.config.request_timeout,
            state.config.max_pending_per_session,
            cancel,
        )
        .await?;

    if let Some(err) = response.error {
        return Err(NavigatorError::Protocol {
            code: error_code_from_wire(&err.code),
            message: err.message,
        });
    }
    response
        .proxy_config
        .map(ProxyConfig::from)
        .ok_or_else(|| NavigatorError::not_found("Edge returned no proxy config"))
}

/// Istio resources applicable to a pod live in the owning cluster's
/// snapshot already, so no Edge round trip is needed. Filters the
/// snapshot's Istio objects to those whose namespace matches the pod's.
pub async fn get_istio_resources(
    state: &Arc<ManagerState>,
    instance_id: &InstanceId,
) -> Result<Vec<IstioObject>, NavigatorError> {
    let snapshot = state
        .registry
        .get_snapshot(&instance_id.cluster_id)
        .await
        .ok_or_else(|| NavigatorError::not_found("no snapshot for cluster"))?;

    let in_namespace = |obj: &IstioObject| obj.namespace == instance_id.namespace;
    let mut resources = Vec::new();
    for group in [
        &snapshot.destination_rules,
        &snapshot.virtual_services,
        &snapshot.gateways,
        &snapshot.sidecars,
        &snapshot.envoy_filters,
        &snapshot.request_authentications,
        &snapshot.peer_authentications,
        &snapshot.authorization_policies,
        &snapshot.wasm_plugins,
        &snapshot.service_entries,
    ] {
        resources.extend(group.iter().filter(|o| in_namespace(o)).cloned());
    }
    Ok(resources)
}

/// `GetServiceConnections`: fans out a single
/// `ServiceGraphMetricsRequest` per active session, then splits the
/// returned pairs into inbound (pair destination matches the query) and
/// outbound (pair source matches the query), aggregating each half across
/// clusters while also retaining the per-cluster detail.
pub async fn get_service_connections(
    state: &Arc<ManagerState>,
    query: ServiceConnectionsQuery,
    cancel: CancellationToken,
) -> Result<ServiceConnections, RequestError> {
    let result = metrics_aggregator::get_service_graph_metrics(
        state,
        ServiceGraphQuery {
            namespace: query.namespace.clone(),
            service_name: query.service_name.clone(),
            start_unix_ms: query.start_unix_ms,
            end_unix_ms: query.end_unix_ms,
            proxy_mode_filter: query.proxy_mode_filter,
        },
        cancel,
    )
    .await?;

    let (detailed_inbound, detailed_outbound): (Vec<_>, Vec<_>) =
        result.detailed.into_iter().partition(|pair| {
            pair.destination.namespace == query.namespace && pair.destination.service == query.service_name
        });

    Ok(ServiceConnections {
        aggregated_inbound: metrics_aggregator::aggregate(&detailed_inbound),
        aggregated_outbound: metrics_aggregator::aggregate(&detailed_outbound),
        detailed_inbound,
        detailed_outbound,
        clusters_queried: result.clusters_queried,
    })
}

fn error_code_from_wire(code: &str) -> navigator_common::ErrorCode {
    use navigator_common::ErrorCode::*;
    match code {
        "DUPLICATE_CLUSTER" => DuplicateCluster,
        "UNSUPPORTED_CAPABILITY" => UnsupportedCapability,
        "UPSTREAM_UNAVAILABLE" => UpstreamUnavailable,
        "NOT_FOUND" => NotFound,
        _ => InvalidRequest,
    }
}

#[allow(dead_code)]
pub const DEFAULT_SERVICE_GRAPH_TIMEOUT: Duration = Duration::from_secs(10);
