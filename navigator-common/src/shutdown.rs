use owo_colors::OwoColorize;

/// Resolves once the process receives SIGINT or SIGTERM (K8s sends the
/// latter). Used to trigger a `CancellationToken` that every long-running
/// loop in the Manager and Edge selects on.
pub async fn shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{SignalKind, signal};

        let mut sigint = signal(SignalKind::interrupt()).expect("install SIGINT handler");
        let mut sigterm = signal(SignalKind::terminate()).expect("install SIGTERM handler");

        tokio::select! {
            _ = sigint.recv()  => tracing::warn!("{}", "received SIGINT".red()),
            _ = sigterm.recv() => tracing::warn!("{}", "received SIGTERM".red()),
        }
    }

    #[cfg(not(unix))]
    {
        tokio::signal::ctrl_c()
            .await
            .expect("install Ctrl+C handler");
    }
}
