//! Edge-side half of the `Connect` stream: handshake, periodic snapshot
//! publish, reconnect-with-backoff, and on-demand request handling
//! (`ProxyConfigRequest`, `ServiceGraphMetricsRequest`).

use std::sync::Arc;
use std::time::Duration;

use navigator_common::backoff::Backoff;
use navigator_common::ids::ClusterId;
use navigator_common::model::Capabilities;
use navigator_proto::navigator::{self as pb, navigator_client::NavigatorClient};
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tokio_util::sync::CancellationToken;
use tonic::transport::Channel;

use crate::admin_client::AdminClient;
use crate::enrich;
use crate::metrics_provider::{MetricsProvider, MetricsQuery};
use crate::snapshot::SnapshotProducer;

pub struct EdgeConfig {
    pub cluster_id: ClusterId,
    pub manager_addr: String,
    pub snapshot_interval: Duration,
    pub max_message_bytes: usize,
}

pub struct EdgeServices {
    pub snapshot_producer: Arc<dyn SnapshotProducer>,
    pub admin_client: Option<Arc<dyn AdminClient>>,
    pub metrics_provider: Arc<dyn MetricsProvider>,
}

/// Reconnects forever with full-jitter backoff until `cancel` fires. Each
/// iteration is one stream lifetime; a clean handshake resets the backoff
/// counter so a long-lived session isn't penalized for an earlier outage.
pub async fn run(config: EdgeConfig, services: Arc<EdgeServices>, cancel: CancellationToken) {
    let mut backoff = Backoff::new();

    while !cancel.is_cancelled() {
        match connect_once(&config, &services, &cancel).await {
            Ok(handshake_succeeded) => {
                if handshake_succeeded {
                    backoff.reset();
                }
            }
            Err(e) => tracing::warn!(cluster_id = %config.cluster_id, error = %e, "connect attempt failed"),
        }

        if cancel.is_cancelled() {
            break;
        }
        let delay = backoff.next_delay();
        tracing::info!(cluster_id = %config.cluster_id, delay_ms = delay.as_millis() as u64, "reconnecting");
        tokio::select! {
            _ = tokio::time::sleep(delay) => {}
            _ = cancel.cancelled() => break,
        }
    }
}

/// Runs one stream lifetime to completion. Returns `Ok(true)` if the
/// Manager accepted the handshake (even if the stream later dropped),
/// `Ok(false)` if it was rejected, `Err` on a transport-level failure
/// before a handshake outcome was known.
async fn connect_once(
    config: &EdgeConfig,
    services: &Arc<EdgeServices>,
    cancel: &CancellationToken,
) -> anyhow::Result<bool> {
    let channel = Channel::from_shared(config.manager_addr.clone())?.connect().await?;
    let mut client = NavigatorClient::new(channel)
        .max_decoding_message_size(config.max_message_bytes)
        .max_encoding_message_size(config.max_message_bytes);

    let (outbound_tx, outbound_rx) = mpsc::channel::<pb::EdgeMessage>(64);

    outbound_tx
        .send(pb::EdgeMessage {
            payload: Some(pb::edge_message::Payload::Identification(pb::ClusterIdentification {
                cluster_id: config.cluster_id.0.clone(),
                capabilities: Some(pb::Capabilities::from(Capabilities {
                    metrics_enabled: services.metrics_provider.is_enabled(),
                })),
            })),
        })
        .await
        .ok();

    let mut inbound = client
        .connect(ReceiverStream::new(outbound_rx))
        .await?
        .into_inner();

    let first = match inbound.message().await? {
        Some(msg) => msg,
        None => anyhow::bail!("stream closed before handshake ack"),
    };
    let Some(pb::manager_message::Payload::Ack(ack)) = first.payload else {
        anyhow::bail!("first message from Manager was not a ConnectionAck");
    };
    if !ack.accepted {
        let reason = ack.error.map(|e| e.message).unwrap_or_default();
        tracing::error!(cluster_id = %config.cluster_id, reason, "handshake rejected");
        return Ok(false);
    }
    tracing::info!(cluster_id = %config.cluster_id, "session established");

    let publish_handle = tokio::spawn(publish_loop(
        config.cluster_id.clone(),
        services.snapshot_producer.clone(),
        outbound_tx.clone(),
        config.snapshot_interval,
        cancel.clone(),
    ));

    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            next = inbound.message() => {
                match next {
                    Ok(Some(msg)) => handle_manager_message(msg, services.clone(), outbound_tx.clone(), cancel.clone()),
                    Ok(None) => {
                        tracing::info!(cluster_id = %config.cluster_id, "stream closed by Manager");
                        break;
                    }
                    Err(status) => {
                        tracing::warn!(cluster_id = %config.cluster_id, error = %status, "stream error");
                        break;
                    }
                }
            }
        }
    }

    publish_handle.abort();
    Ok(true)
}

async fn publish_loop(
    cluster_id: ClusterId,
    producer: Arc<dyn SnapshotProducer>,
    outbound: mpsc::Sender<pb::EdgeMessage>,
    interval: Duration,
    cancel: CancellationToken,
) {
    let mut ticker = tokio::time::interval(interval);
    loop {
        tokio::select! {
            _ = cancel.cancelled() => return,
            _ = ticker.tick() => {}
        }
        let snapshot = match producer.snapshot().await {
            Ok(s) => s,
            Err(e) => {
                tracing::warn!(%cluster_id, error = %e, "snapshot collection failed, skipping this cycle");
                continue;
            }
        };
        let msg = pb::EdgeMessage {
            payload: Some(pb::edge_message::Payload::State(pb::ClusterSnapshot::from(&snapshot))),
        };
        // The session may have closed underneath us; a full/closed queue
        // means this snapshot is simply dropped, not retried.
        if outbound.try_send(msg).is_err() {
            tracing::debug!(%cluster_id, "dropped snapshot, outbound queue unavailable");
            navigator_common::metrics::record_snapshot_dropped();
        } else {
            navigator_common::metrics::record_snapshot_published();
        }
    }
}

fn handle_manager_message(
    msg: pb::ManagerMessage,
    services: Arc<EdgeServices>,
    outbound: mpsc::Sender<pb::EdgeMessage>,
    cancel: CancellationToken,
) {
    match msg.payload {
        Some(pb::manager_message::Payload::ProxyConfigRequest(req)) => {
            tokio::spawn(async move {
                let response = handle_proxy_config_request(req, services, cancel).await;
                let _ = outbound
                    .send(pb::EdgeMessage {
                        payload: Some(pb::edge_message::Payload::ProxyConfigResponse(response)),
                    })
                    .await;
            });
        }
        Some(pb::manager_message::Payload::MetricsRequest(req)) => {
            tokio::spawn(async move {
                let response = handle_metrics_request(req, services).await;
                let _ = outbound
                    .send(pb::EdgeMessage {
                        payload: Some(pb::edge_message::Payload::MetricsResponse(response)),
                    })
                    .await;
            });
        }
        Some(pb::manager_message::Payload::Ack(_)) => {
            tracing::warn!("received a second ConnectionAck mid-session, ignoring");
        }
        Some(pb::manager_message::Payload::Error(err)) => {
            tracing::warn!(code = %err.code, message = %err.message, "received ErrorMessage from Manager");
        }
        None => tracing::warn!("received ManagerMessage with no payload"),
    }
}

async fn handle_proxy_config_request(
    req: pb::ProxyConfigRequest,
    services: Arc<EdgeServices>,
    cancel: CancellationToken,
) -> pb::ProxyConfigResponse {
    let request_id = req.request_id.clone();

    let Some(admin_client) = &services.admin_client else {
        return error_response(request_id, "UPSTREAM_UNAVAILABLE", "no AdminClient configured on this Edge");
    };

    let resolve = services.snapshot_producer.resolve_pod_ip(&req.namespace, &req.pod_name);
    let pod_ip = tokio::select! {
        result = resolve => result,
        _ = cancel.cancelled() => return error_response(request_id, "INVALID_REQUEST", "canceled"),
    };
    let pod_ip = match pod_ip {
        Ok(ip) => ip,
        Err(e) => return error_response(request_id, e.error_code().as_str(), &e.to_string()),
    };

    let fetch = admin_client.fetch(&pod_ip);
    let dumps = tokio::select! {
        result = fetch => result,
        _ = cancel.cancelled() => return error_response(request_id, "INVALID_REQUEST", "canceled"),
    };

    let dumps = match dumps {
        Ok(d) => d,
        Err(e) => return error_response(request_id, "UPSTREAM_UNAVAILABLE", &e.to_string()),
    };

    let node_id = dumps
        .config_dump
        .pointer("/configs/0/bootstrap/node/id")
        .and_then(|v| v.as_str())
        .unwrap_or_default();
    let proxy_config = enrich::enrich(node_id, &dumps.config_dump, &dumps.clusters_dump);
    if proxy_config.listeners.iter().any(|l| l.listener_type == navigator_common::model::ListenerType::Unknown) {
        navigator_common::metrics::record_enrichment_soft_failure("listener_type");
    }

    pb::ProxyConfigResponse {
        request_id,
        proxy_config: Some(pb::ProxyConfig::from(&proxy_config)),
        error: None,
    }
}

async fn handle_metrics_request(
    req: pb::ServiceGraphMetricsRequest,
    services: Arc<EdgeServices>,
) -> pb::ServiceGraphMetricsResponse {
    let request_id = req.request_id.clone();
    let time_range = req.time_range.unwrap_or_default();
    let query = MetricsQuery {
        namespace: req.namespace,
        service_name: req.service_name,
        start_unix_ms: time_range.start_unix_ms,
        end_unix_ms: time_range.end_unix_ms,
        proxy_mode_filter: req.proxy_mode,
    };

    match services.metrics_provider.service_graph_metrics(&query).await {
        Ok(pairs) => pb::ServiceGraphMetricsResponse {
            request_id,
            pairs: pairs.iter().map(pb::ServicePairMetrics::from).collect(),
            error: None,
        },
        Err(e) => error_metrics_response(request_id, e.error_code().as_str(), &e.to_string()),
    }
}

fn error_response(request_id: String, code: &str, message: &str) -> pb::ProxyConfigResponse {
    pb::ProxyConfigResponse {
        request_id: request_id.clone(),
        proxy_config: None,
        error: Some(pb::ErrorMessage { code: code.to_string(), message: message.to_string(), request_id }),
    }
}

fn error_metrics_response(request_id: String, code: &str, message: &str) -> pb::ServiceGraphMetricsResponse {
    pb::ServiceGraphMetricsResponse {
        request_id: request_id.clone(),
        pairs: vec![],
        error: Some(pb::ErrorMessage { code: code.to_string(), message: message.to_string(), request_id }),
    }
}
