//! The `Connect` bidirectional-streaming RPC: handshake, demultiplexing of
//! the four Edge->Manager message kinds, and session teardown.

use std::pin::Pin;
use std::sync::Arc;

use futures_util::StreamExt;
use navigator_common::ids::{ClusterId, RequestId};
use navigator_common::model::Capabilities;
use navigator_proto::navigator::{self as pb, navigator_server};
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tonic::{Request, Response, Status, Streaming};

use crate::state::ManagerState;

pub struct NavigatorGrpc {
    state: Arc<ManagerState>,
}

impl NavigatorGrpc {
    pub fn new(state: Arc<ManagerState>) -> Self {
        Self { state }
    }
}

type ConnectStream = Pin<Box<dyn futures_util::Stream<Item = Result<pb::ManagerMessage, Status>> + Send>>;

#[tonic::async_trait]
impl navigator_server::Navigator for NavigatorGrpc {
    type ConnectStream = ConnectStream;

    async fn connect(
        &self,
        request: Request<Streaming<pb::EdgeMessage>>,
    ) -> Result<Response<Self::ConnectStream>, Status> {
        let mut inbound = request.into_inner();

        // Handshake invariant 1: the first message MUST be ClusterIdentification.
        let first = inbound
            .message()
            .await?
            .ok_or_else(|| Status::invalid_argument("stream closed before handshake"))?;
        let Some(pb::edge_message::Payload::Identification(ident)) = first.payload else {
            return Err(Status::invalid_argument(
                "first message on a new stream must be ClusterIdentification",
            ));
        };
        let cluster_id = ClusterId::from(ident.cluster_id.clone());
        let capabilities: Capabilities = ident.capabilities.unwrap_or_default().into();

        let (outbound_tx, outbound_rx) =
            mpsc::channel::<pb::ManagerMessage>(self.state.config.max_pending_per_session);

        let registration = self
            .state
            .registry
            .register_session(cluster_id.clone(), capabilities, outbound_tx.clone())
            .await;

        match registration {
            Err(e) => {
                // Handshake invariant 3: duplicate ClusterID is rejected, the
                // incumbent session is left untouched. accepted=false is
                // always followed by session closure, so we send the ack
                // and end the stream without spawning a reader task.
                let ack = pb::ManagerMessage {
                    payload: Some(pb::manager_message::Payload::Ack(pb::ConnectionAck {
                        accepted: false,
                        error: Some(pb::ErrorMessage {
                            code: e.error_code().as_str().to_string(),
                            message: e.to_string(),
                            request_id: String::new(),
                        }),
                    })),
                };
                let (tx, rx) = mpsc::channel(1);
                let _ = tx.send(Ok(ack)).await;
                return Ok(Response::new(Box::pin(ReceiverStream::new(rx))));
            }
            Ok(()) => {
                let ack = pb::ManagerMessage {
                    payload: Some(pb::manager_message::Payload::Ack(pb::ConnectionAck {
                        accepted: true,
                        error: None,
                    })),
                };
                if outbound_tx.send(ack).await.is_err() {
                    // Receiver half dropped before we even registered the ack;
                    // tear the just-created session back down.
                    self.state.registry.unregister_session(&cluster_id).await;
                    return Err(Status::internal("failed to queue handshake ack"));
                }
            }
        }

        tracing::info!(%cluster_id, "session established");

        let state = self.state.clone();
        let reader_cluster_id = cluster_id.clone();
        tokio::spawn(async move {
            read_loop(state.clone(), reader_cluster_id.clone(), inbound).await;
            // Session teardown: drop from registry, cancel every pending
            // waiter for this cluster across both correlators.
            state.registry.unregister_session(&reader_cluster_id).await;
            state.proxy_correlator.cancel_all(&reader_cluster_id).await;
            state.metrics_correlator.cancel_all(&reader_cluster_id).await;
            tracing::info!(cluster_id = %reader_cluster_id, "session torn down");
        });

        Ok(Response::new(Box::pin(ReceiverStream::new(outbound_rx).map(Ok))))
    }
}

async fn read_loop(state: Arc<ManagerState>, cluster_id: ClusterId, mut inbound: Streaming<pb::EdgeMessage>) {
    loop {
        let next = match inbound.message().await {
            Ok(Some(msg)) => msg,
            Ok(None) => {
                tracing::info!(%cluster_id, "stream closed by Edge");
                break;
            }
            Err(status) => {
                tracing::warn!(%cluster_id, error = %status, "stream error");
                break;
            }
        };

        match next.payload {
            Some(pb::edge_message::Payload::Identification(_)) => {
                // Handshake already completed; a second identification is a
                // protocol violation. Log and drop rather than killing the
                // session outright.
                tracing::warn!(%cluster_id, "received duplicate ClusterIdentification mid-session");
            }
            Some(pb::edge_message::Payload::State(snapshot)) => {
                let domain_snapshot = navigator_common::model::ClusterSnapshot::from(snapshot);
                if let Err(e) = state.registry.replace_snapshot(&cluster_id, domain_snapshot).await {
                    tracing::warn!(%cluster_id, error = %e, "snapshot arrived for a session no longer registered");
                }
            }
            Some(pb::edge_message::Payload::ProxyConfigResponse(resp)) => {
                let request_id = RequestId::from(resp.request_id.clone());
                state.proxy_correlator.deliver(&request_id, resp).await;
            }
            Some(pb::edge_message::Payload::MetricsResponse(resp)) => {
                let request_id = RequestId::from(resp.request_id.clone());
                state.metrics_correlator.deliver(&request_id, resp).await;
            }
            None => {
                tracing::warn!(%cluster_id, "received EdgeMessage with no payload");
            }
        }
    }
}
