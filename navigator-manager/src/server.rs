use std::net::SocketAddr;

use anyhow::Result;
use navigator_common::shutdown::shutdown_signal;
use navigator_proto::navigator::navigator_server::NavigatorServer;
use tokio_util::sync::CancellationToken;
use tonic::transport::Server;

use crate::args::Args;
use crate::correlator::spawn_expiry_sweep;
use crate::grpc::NavigatorGrpc;
use crate::state::{ManagerConfig, ManagerState};

/// Wires the Registry, both Correlators, and the `Connect` gRPC service
/// together and runs until shutdown signaled.
pub async fn run_manager(args: Args) -> Result<()> {
    let state = ManagerState::new(ManagerConfig::from(&args));

    navigator_common::metrics::maybe_spawn_metrics_server(args.metrics_port, "manager");

    let proxy_sweep = spawn_expiry_sweep(state.proxy_correlator.clone(), state.config.expiry_horizon);
    let metrics_sweep = spawn_expiry_sweep(state.metrics_correlator.clone(), state.config.expiry_horizon);

    let grpc_addr: SocketAddr = format!("0.0.0.0:{}", args.grpc_port).parse()?;
    tracing::info!(%grpc_addr, "starting Manager gRPC server");

    let cancel = CancellationToken::new();
    let signal_cancel = cancel.clone();
    tokio::spawn(async move {
        shutdown_signal().await;
        signal_cancel.cancel();
    });

    let service = NavigatorGrpc::new(state.clone());
    let navigator_server = NavigatorServer::new(service)
        .max_decoding_message_size(state.config.max_message_bytes)
        .max_encoding_message_size(state.config.max_message_bytes);
    let server_cancel = cancel.clone();
    let result = Server::builder()
        .add_service(navigator_server)
        .serve_with_shutdown(grpc_addr, async move {
            server_cancel.cancelled().await;
        })
        .await;

    proxy_sweep.abort();
    metrics_sweep.abort();

    state.drain().await;

    if let Err(e) = &result {
        tracing::error!(?e, "Manager gRPC server exited with error");
    }
    result?;

    tracing::info!("Manager stopped gracefully");
    Ok(())
}
