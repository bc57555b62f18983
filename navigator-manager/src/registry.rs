//! Connection Registry: the Manager's single source of truth for active
//! sessions and their latest snapshots. Two-level locking: an outer
//! `RwLock` over the cluster map, and a finer lock per cluster entry so
//! replacing one cluster's snapshot never blocks a read of any other
//! cluster.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use navigator_common::ids::{ClusterId, InstanceId, ServiceId};
use navigator_common::model::{
    AggregatedService, AggregatedServiceInstance, Capabilities, ClusterSnapshot, ConnectionInfo,
    saturating_service_count, session_state,
};
use navigator_common::{NavigatorError, RequestError};
use tokio::sync::{RwLock, mpsc};

use navigator_proto::navigator as pb;

pub type OutboundSender = mpsc::Sender<pb::ManagerMessage>;

struct ClusterEntry {
    opened_at: DateTime<Utc>,
    capabilities: Capabilities,
    send: OutboundSender,
    snapshot: Option<Arc<ClusterSnapshot>>,
    last_snapshot_at: Option<DateTime<Utc>>,
}

/// Manager-side store of active sessions and the most recent snapshot per
/// `ClusterID`, with read-optimized aggregated views derived on demand.
pub struct ConnectionRegistry {
    clusters: RwLock<HashMap<ClusterId, Arc<RwLock<ClusterEntry>>>>,
}

impl Default for ConnectionRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self {
            clusters: RwLock::new(HashMap::new()),
        }
    }

    /// Accepts a new session iff no session is already registered for this
    /// `ClusterID`. A misbehaving Edge reconnecting under an already-served
    /// ID never evicts the incumbent.
    pub async fn register_session(
        &self,
        cluster_id: ClusterId,
        capabilities: Capabilities,
        send: OutboundSender,
    ) -> Result<(), NavigatorError> {
        let mut clusters = self.clusters.write().await;
        if clusters.contains_key(&cluster_id) {
            return Err(NavigatorError::duplicate_cluster(&cluster_id.0));
        }
        clusters.insert(
            cluster_id,
            Arc::new(RwLock::new(ClusterEntry {
                opened_at: Utc::now(),
                capabilities,
                send,
                snapshot: None,
                last_snapshot_at: None,
            })),
        );
        navigator_common::metrics::set_active_sessions(clusters.len());
        Ok(())
    }

    /// Idempotent: removing a cluster that isn't registered is a no-op.
    pub async fn unregister_session(&self, cluster_id: &ClusterId) {
        let mut clusters = self.clusters.write().await;
        clusters.remove(cluster_id);
        navigator_common::metrics::set_active_sessions(clusters.len());
    }

    /// Atomic whole-snapshot replace. Fails if the cluster has no active
    /// session (a late snapshot arriving after teardown is discarded by the
    /// caller rather than resurrecting a registry entry).
    pub async fn replace_snapshot(
        &self,
        cluster_id: &ClusterId,
        snapshot: ClusterSnapshot,
    ) -> Result<(), NavigatorError> {
        let entry = self.entry(cluster_id).await.ok_or(RequestError::Disconnected)?;
        let mut guard = entry.write().await;
        guard.snapshot = Some(Arc::new(snapshot));
        guard.last_snapshot_at = Some(Utc::now());
        Ok(())
    }

    /// Sends on the session's bounded outbound queue. A full queue is fatal
    /// to the session rather than a silent drop: this tears
    /// the session down and reports it as disconnected to the caller,
    /// exactly as if the stream itself had broken.
    pub async fn send_to_cluster(
        &self,
        cluster_id: &ClusterId,
        msg: pb::ManagerMessage,
    ) -> Result<(), RequestError> {
        let entry = self.entry(cluster_id).await.ok_or(RequestError::Disconnected)?;
        let sender = entry.read().await.send.clone();
        match sender.try_send(msg) {
            Ok(()) => Ok(()),
            Err(mpsc::error::TrySendError::Closed(_)) => Err(RequestError::Disconnected),
            Err(mpsc::error::TrySendError::Full(_)) => {
                tracing::error!(%cluster_id, "outbound queue full, terminating session");
                self.unregister_session(cluster_id).await;
                Err(RequestError::Disconnected)
            }
        }
    }

    async fn entry(&self, cluster_id: &ClusterId) -> Option<Arc<RwLock<ClusterEntry>>> {
        self.clusters.read().await.get(cluster_id).cloned()
    }

    pub async fn list_sessions(&self) -> Vec<ConnectionInfo> {
        let clusters = self.clusters.read().await;
        let mut out = Vec::with_capacity(clusters.len());
        for (cluster_id, entry) in clusters.iter() {
            let guard = entry.read().await;
            let has_snapshot = guard.snapshot.is_some();
            let age = guard
                .last_snapshot_at
                .map(|t| (Utc::now() - t).to_std().unwrap_or_default())
                .unwrap_or_default();
            out.push(ConnectionInfo {
                cluster_id: cluster_id.clone(),
                opened_at: guard.opened_at,
                last_snapshot_at: guard.last_snapshot_at,
                service_count: saturating_service_count(
                    guard.snapshot.as_ref().map(|s| s.services.len()).unwrap_or(0),
                ),
                state_received: has_snapshot,
                capabilities: guard.capabilities,
                sync_status: session_state(has_snapshot, age),
            });
        }
        out
    }

    /// Every cluster currently sharing `(namespace, name)`, unioned into one
    /// `AggregatedService`: instances retain their originating `ClusterID`.
    pub async fn list_aggregated_services(
        &self,
        namespace: Option<&str>,
        cluster_id: Option<&ClusterId>,
    ) -> Vec<AggregatedService> {
        let mut by_key: HashMap<(String, String), Vec<(ClusterId, navigator_common::model::Service)>> =
            HashMap::new();

        let clusters = self.clusters.read().await;
        for (id, entry) in clusters.iter() {
            if let Some(filter) = cluster_id
                && filter != id
            {
                continue;
            }
            let guard = entry.read().await;
            let Some(snapshot) = guard.snapshot.as_ref() else {
                continue;
            };
            for svc in &snapshot.services {
                if let Some(ns) = namespace
                    && ns != svc.namespace
                {
                    continue;
                }
                by_key
                    .entry((svc.namespace.clone(), svc.name.clone()))
                    .or_default()
                    .push((id.clone(), svc.clone()));
            }
        }

        by_key
            .into_iter()
            .map(|((namespace, name), instances_by_cluster)| AggregatedService {
                name,
                namespace,
                instances_by_cluster,
            })
            .collect()
    }

    pub async fn get_aggregated_service(&self, service_id: &ServiceId) -> Option<AggregatedService> {
        let clusters = self.clusters.read().await;
        let mut instances_by_cluster = Vec::new();
        for (cluster_id, entry) in clusters.iter() {
            let guard = entry.read().await;
            let Some(snapshot) = guard.snapshot.as_ref() else {
                continue;
            };
            for svc in &snapshot.services {
                if svc.namespace == service_id.namespace && svc.name == service_id.name {
                    instances_by_cluster.push((cluster_id.clone(), svc.clone()));
                }
            }
        }
        if instances_by_cluster.is_empty() {
            return None;
        }
        Some(AggregatedService {
            name: service_id.name.clone(),
            namespace: service_id.namespace.clone(),
            instances_by_cluster,
        })
    }

    pub async fn get_aggregated_service_instance(
        &self,
        instance_id: &InstanceId,
    ) -> Option<AggregatedServiceInstance> {
        let entry = self.entry(&instance_id.cluster_id).await?;
        let guard = entry.read().await;
        let snapshot = guard.snapshot.as_ref()?;
        for svc in &snapshot.services {
            if svc.namespace != instance_id.namespace {
                continue;
            }
            for instance in &svc.instances {
                if instance.pod_name == instance_id.pod_name {
                    return Some(AggregatedServiceInstance {
                        cluster_id: instance_id.cluster_id.clone(),
                        instance: instance.clone(),
                    });
                }
            }
        }
        None
    }

    /// The Istio resources applicable to a pod are already present in the
    /// owning cluster's snapshot; no request to the Edge needed.
    pub async fn get_snapshot(&self, cluster_id: &ClusterId) -> Option<Arc<ClusterSnapshot>> {
        let entry = self.entry(cluster_id).await?;
        entry.read().await.snapshot.clone()
    }

    pub async fn active_cluster_ids(&self) -> Vec<ClusterId> {
        self.clusters.read().await.keys().cloned().collect()
    }

    pub async fn is_registered(&self, cluster_id: &ClusterId) -> bool {
        self.clusters.read().await.contains_key(cluster_id)
    }

    pub async fn active_session_count(&self) -> usize {
        self.clusters.read().await.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use navigator_common::model::{Service, ServiceInstance};

    fn instance(pod_name: &str) -> ServiceInstance {
        ServiceInstance::new(
            "10.0.0.1".into(),
            pod_name.into(),
            "node-a".into(),
            Utc::now(),
            Default::default(),
            Default::default(),
            vec!["istio-proxy".into()],
            "Running".into(),
            navigator_common::model::ProxyMode::Sidecar,
        )
    }

    #[tokio::test]
    async fn duplicate_cluster_registration_is_rejected_and_incumbent_untouched() {
        let registry = ConnectionRegistry::new();
        let (tx, _rx) = mpsc::channel(8);
        registry
            .register_session(ClusterId::from("prod-eu"), Capabilities::default(), tx)
            .await
            .unwrap();

        let (tx2, _rx2) = mpsc::channel(8);
        let err = registry
            .register_session(ClusterId::from("prod-eu"), Capabilities::default(), tx2)
            .await
            .unwrap_err();
        assert_eq!(err.error_code(), navigator_common::ErrorCode::DuplicateCluster);
        assert_eq!(registry.active_session_count().await, 1);
    }

    #[tokio::test]
    async fn unregister_is_idempotent() {
        let registry = ConnectionRegistry::new();
        registry.unregister_session(&ClusterId::from("nope")).await;
        registry.unregister_session(&ClusterId::from("nope")).await;
    }

    #[tokio::test]
    async fn replace_snapshot_fails_without_a_session() {
        let registry = ConnectionRegistry::new();
        let err = registry
            .replace_snapshot(&ClusterId::from("ghost"), ClusterSnapshot::default())
            .await
            .unwrap_err();
        assert_eq!(err.error_code(), navigator_common::ErrorCode::UpstreamUnavailable);
    }

    #[tokio::test]
    async fn list_sessions_reports_service_count_from_latest_snapshot() {
        let registry = ConnectionRegistry::new();
        let (tx, _rx) = mpsc::channel(8);
        registry
            .register_session(ClusterId::from("prod-eu"), Capabilities::default(), tx)
            .await
            .unwrap();
        registry
            .replace_snapshot(
                &ClusterId::from("prod-eu"),
                ClusterSnapshot {
                    cluster_id: ClusterId::from("prod-eu"),
                    services: vec![Service {
                        name: "web".into(),
                        namespace: "default".into(),
                        cluster_ip: "10.0.0.1".into(),
                        external_ip: String::new(),
                        service_type: "ClusterIP".into(),
                        instances: vec![instance("web-0")],
                    }],
                    ..Default::default()
                },
            )
            .await
            .unwrap();

        let sessions = registry.list_sessions().await;
        assert_eq!(sessions.len(), 1);
        assert_eq!(sessions[0].service_count, 1);
        assert!(sessions[0].state_received);
    }

    #[tokio::test]
    async fn aggregated_service_unions_instances_across_clusters() {
        let registry = ConnectionRegistry::new();
        for cluster in ["prod-eu", "prod-us"] {
            let (tx, _rx) = mpsc::channel(8);
            registry
                .register_session(ClusterId::from(cluster), Capabilities::default(), tx)
                .await
                .unwrap();
            registry
                .replace_snapshot(
                    &ClusterId::from(cluster),
                    ClusterSnapshot {
                        cluster_id: ClusterId::from(cluster),
                        services: vec![Service {
                            name: "web".into(),
                            namespace: "default".into(),
                            cluster_ip: "10.0.0.1".into(),
                            external_ip: String::new(),
                            service_type: "ClusterIP".into(),
                            instances: vec![instance("web-0")],
                        }],
                        ..Default::default()
                    },
                )
                .await
                .unwrap();
        }

        let aggregated = registry
            .get_aggregated_service(&ServiceId::new("default", "web"))
            .await
            .unwrap();
        assert_eq!(aggregated.instances_by_cluster.len(), 2);
        assert_eq!(aggregated.total_instance_count(), 2);
    }
}
