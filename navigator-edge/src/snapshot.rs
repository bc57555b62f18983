//! Kubernetes snapshot producer: a thin `SnapshotProducer` trait plus one
//! `kube`-backed implementation. Istio CRDs are read generically via
//! `DynamicObject` rather than a typed `kube::CustomResource` for each
//! kind, since the Enricher and Registry only need an object's
//! namespace/labels/raw spec, and pulling in the full istio-api proto tree
//! buys nothing beyond that.

use std::collections::BTreeMap;

use async_trait::async_trait;
use k8s_openapi::api::core::v1::{Pod, Service as K8sService};
use kube::api::{ApiResource, DynamicObject, ListParams};
use kube::{Api, Client, ResourceExt};
use navigator_common::ids::ClusterId;
use navigator_common::model::{
    ClusterSnapshot, IstioControlPlaneConfig, IstioObject, ProxyMode, Service, ServiceInstance,
};
use navigator_common::NavigatorError;

#[async_trait]
pub trait SnapshotProducer: Send + Sync {
    async fn snapshot(&self) -> Result<ClusterSnapshot, NavigatorError>;

    /// Resolves `(namespace, podName)` to the pod's IP, so a
    /// `ProxyConfigRequest` naming a pod can reach its Envoy admin port.
    async fn resolve_pod_ip(&self, namespace: &str, pod_name: &str) -> Result<String, NavigatorError>;
}

/// One Istio CRD kind this Edge observes, identified by its GVK. `field`
/// selects which `ClusterSnapshot` vector the resulting `IstioObject`s land
/// in.
struct IstioCrd {
    group: &'static str,
    version: &'static str,
    kind: &'static str,
    plural: &'static str,
}

const ISTIO_CRDS: &[(IstioCrd, fn(&mut ClusterSnapshot) -> &mut Vec<IstioObject>)] = &[
    (
        IstioCrd { group: "networking.istio.io", version: "v1", kind: "DestinationRule", plural: "destinationrules" },
        |s| &mut s.destination_rules,
    ),
    (
        IstioCrd { group: "networking.istio.io", version: "v1", kind: "VirtualService", plural: "virtualservices" },
        |s| &mut s.virtual_services,
    ),
    (
        IstioCrd { group: "networking.istio.io", version: "v1", kind: "Gateway", plural: "gateways" },
        |s| &mut s.gateways,
    ),
    (
        IstioCrd { group: "networking.istio.io", version: "v1", kind: "Sidecar", plural: "sidecars" },
        |s| &mut s.sidecars,
    ),
    (
        IstioCrd { group: "networking.istio.io", version: "v1alpha3", kind: "EnvoyFilter", plural: "envoyfilters" },
        |s| &mut s.envoy_filters,
    ),
    (
        IstioCrd {
            group: "security.istio.io",
            version: "v1",
            kind: "RequestAuthentication",
            plural: "requestauthentications",
        },
        |s| &mut s.request_authentications,
    ),
    (
        IstioCrd { group: "security.istio.io", version: "v1", kind: "PeerAuthentication", plural: "peerauthentications" },
        |s| &mut s.peer_authentications,
    ),
    (
        IstioCrd {
            group: "security.istio.io",
            version: "v1",
            kind: "AuthorizationPolicy",
            plural: "authorizationpolicies",
        },
        |s| &mut s.authorization_policies,
    ),
    (
        IstioCrd { group: "extensions.istio.io", version: "v1alpha1", kind: "WasmPlugin", plural: "wasmplugins" },
        |s| &mut s.wasm_plugins,
    ),
    (
        IstioCrd { group: "networking.istio.io", version: "v1", kind: "ServiceEntry", plural: "serviceentries" },
        |s| &mut s.service_entries,
    ),
];

pub struct KubeSnapshotProducer {
    client: Client,
    cluster_id: ClusterId,
    root_namespace: String,
}

impl KubeSnapshotProducer {
    pub async fn new(cluster_id: ClusterId, root_namespace: String) -> Result<Self, NavigatorError> {
        let client = Client::try_default()
            .await
            .map_err(|e| NavigatorError::upstream_unavailable(format!("kube client init: {e}")))?;
        Ok(Self { client, cluster_id, root_namespace })
    }

    async fn list_istio_objects(&self, crd: &IstioCrd) -> Vec<IstioObject> {
        let resource = ApiResource::from_gvk_with_plural(
            &kube::core::GroupVersionKind::gvk(crd.group, crd.version, crd.kind),
            crd.plural,
        );
        let api: Api<DynamicObject> = Api::all_with(self.client.clone(), &resource);
        match api.list(&ListParams::default()).await {
            Ok(list) => list
                .items
                .into_iter()
                .map(|obj| IstioObject {
                    name: obj.name_any(),
                    namespace: obj.namespace().unwrap_or_default(),
                    kind: crd.kind.to_string(),
                    labels: BTreeMap::from_iter(obj.labels().clone()),
                    raw_spec_json: obj
                        .data
                        .get("spec")
                        .map(|v| v.to_string())
                        .unwrap_or_default(),
                })
                .collect(),
            Err(e) => {
                // CRD not installed / not reachable is routine (not every
                // cluster runs every Istio feature); fail soft.
                tracing::debug!(kind = crd.kind, error = %e, "failed to list Istio resource, skipping");
                Vec::new()
            }
        }
    }
}

#[async_trait]
impl SnapshotProducer for KubeSnapshotProducer {
    async fn snapshot(&self) -> Result<ClusterSnapshot, NavigatorError> {
        let pods_api: Api<Pod> = Api::all(self.client.clone());
        let services_api: Api<K8sService> = Api::all(self.client.clone());

        let pods = pods_api
            .list(&ListParams::default())
            .await
            .map_err(|e| NavigatorError::upstream_unavailable(format!("list pods: {e}")))?;
        let services = services_api
            .list(&ListParams::default())
            .await
            .map_err(|e| NavigatorError::upstream_unavailable(format!("list services: {e}")))?;

        let mut snapshot = ClusterSnapshot {
            cluster_id: self.cluster_id.clone(),
            control_plane: IstioControlPlaneConfig {
                root_namespace: self.root_namespace.clone(),
                pilot_scope_gateway_to_namespace: false,
            },
            ..Default::default()
        };

        for (crd, field) in ISTIO_CRDS {
            let objects = self.list_istio_objects(crd).await;
            field(&mut snapshot).extend(objects);
        }

        for svc in services.items {
            let namespace = svc.namespace().unwrap_or_default();
            let name = svc.name_any();
            let selector = svc
                .spec
                .as_ref()
                .and_then(|s| s.selector.clone())
                .unwrap_or_default();

            let instances = if selector.is_empty() {
                Vec::new()
            } else {
                pods.items
                    .iter()
                    .filter(|pod| {
                        pod.namespace().unwrap_or_default() == namespace
                            && selector.iter().all(|(k, v)| pod.labels().get(k) == Some(v))
                    })
                    .map(pod_to_instance)
                    .collect()
            };

            let spec = svc.spec.as_ref();
            snapshot.services.push(Service {
                name,
                namespace,
                cluster_ip: spec.and_then(|s| s.cluster_ip.clone()).unwrap_or_default(),
                external_ip: spec
                    .and_then(|s| s.external_ips.as_ref())
                    .and_then(|ips| ips.first().cloned())
                    .unwrap_or_default(),
                service_type: spec.and_then(|s| s.type_.clone()).unwrap_or_default(),
                instances,
            });
        }

        Ok(snapshot)
    }

    async fn resolve_pod_ip(&self, namespace: &str, pod_name: &str) -> Result<String, NavigatorError> {
        let pods: Api<Pod> = Api::namespaced(self.client.clone(), namespace);
        let pod = pods
            .get(pod_name)
            .await
            .map_err(|e| NavigatorError::not_found(format!("pod {namespace}/{pod_name} not found: {e}")))?;
        pod.status
            .as_ref()
            .and_then(|s| s.pod_ip.clone())
            .ok_or_else(|| NavigatorError::upstream_unavailable(format!("pod {namespace}/{pod_name} has no IP yet")))
    }
}

/// Derives `envoyPresent`/`proxyMode` from the pod's containers and
/// labels. `envoyPresent` is always recomputed from `proxyMode` by
/// `ServiceInstance::new`, so the only real decision here is which
/// `ProxyMode` this pod represents.
fn pod_to_instance(pod: &Pod) -> ServiceInstance {
    const SIDECAR_CONTAINER: &str = "istio-proxy";

    let has_sidecar_container = pod
        .spec
        .as_ref()
        .map(|s| s.containers.iter().any(|c| c.name == SIDECAR_CONTAINER))
        .unwrap_or(false);

    let labels = pod.labels().clone();
    let is_gateway = labels
        .get("operator.istio.io/component")
        .map(|c| c == "IngressGateways" || c == "EgressGateways")
        .unwrap_or(false)
        || labels.contains_key("istio");
    let is_router = labels.contains_key("gateway.networking.k8s.io/gateway-name");

    let proxy_mode = if !has_sidecar_container {
        ProxyMode::None
    } else if is_router {
        ProxyMode::Router
    } else if is_gateway {
        ProxyMode::Gateway
    } else {
        ProxyMode::Sidecar
    };

    let containers = pod
        .spec
        .as_ref()
        .map(|s| s.containers.iter().map(|c| c.name.clone()).collect())
        .unwrap_or_default();

    let created_at = pod
        .metadata
        .creation_timestamp
        .as_ref()
        .and_then(|t| chrono::DateTime::from_timestamp(t.0.as_second(), t.0.subsec_nanosecond() as u32))
        .unwrap_or_else(chrono::Utc::now);

    ServiceInstance::new(
        pod.status
            .as_ref()
            .and_then(|s| s.pod_ip.clone())
            .unwrap_or_default(),
        pod.name_any(),
        pod.spec.as_ref().and_then(|s| s.node_name.clone()).unwrap_or_default(),
        created_at,
        BTreeMap::from_iter(labels),
        BTreeMap::from_iter(pod.annotations().clone()),
        containers,
        pod.status
            .as_ref()
            .and_then(|s| s.phase.clone())
            .unwrap_or_default(),
        proxy_mode,
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use k8s_openapi::api::core::v1::{Container, PodSpec, PodStatus};
    use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;

    fn pod_with(containers: Vec<&str>, labels: BTreeMap<String, String>) -> Pod {
        Pod {
            metadata: ObjectMeta {
                name: Some("web-0".into()),
                labels: Some(labels.into_iter().collect()),
                ..Default::default()
            },
            spec: Some(PodSpec {
                containers: containers
                    .into_iter()
                    .map(|name| Container { name: name.to_string(), ..Default::default() })
                    .collect(),
                ..Default::default()
            }),
            status: Some(PodStatus { phase: Some("Running".into()), ..Default::default() }),
        }
    }

    /// Seed scenario S6: a sidecar-injected pod reports
    /// envoyPresent=true/proxyMode=SIDECAR; removing the sidecar container
    /// flips both fields.
    #[test]
    fn seed_scenario_s6_sidecar_presence_drives_proxy_mode() {
        let mut labels = BTreeMap::new();
        labels.insert("istio.io/rev".to_string(), "stable".to_string());

        let with_sidecar = pod_with(vec!["web", "istio-proxy"], labels.clone());
        let instance = pod_to_instance(&with_sidecar);
        assert_eq!(instance.proxy_mode, ProxyMode::Sidecar);
        assert!(instance.envoy_present);

        let without_sidecar = pod_with(vec!["web"], labels);
        let instance = pod_to_instance(&without_sidecar);
        assert_eq!(instance.proxy_mode, ProxyMode::None);
        assert!(!instance.envoy_present);
    }

    #[test]
    fn gateway_label_is_classified_as_gateway_mode() {
        let mut labels = BTreeMap::new();
        labels.insert("istio".to_string(), "ingressgateway".to_string());
        let pod = pod_with(vec!["istio-proxy"], labels);
        assert_eq!(pod_to_instance(&pod).proxy_mode, ProxyMode::Gateway);
    }
}
