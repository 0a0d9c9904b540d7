use tokio::sync::broadcast;
use tracing::{error, info};

#[cfg(unix)]
use tokio::signal::unix::{signal, SignalKind};

/// Shutdown signal types
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShutdownSignal {
    /// Stop accepting requests, drain telemetry, exit
    Graceful,
}

/// Setup signal handlers for the host
///
/// Returns a broadcast sender for shutdown signals and a join handle for the
/// signal task. SIGTERM and SIGINT both trigger a graceful shutdown.
#[cfg(unix)]
pub fn setup_signal_handlers() -> (
    broadcast::Sender<ShutdownSignal>,
    tokio::task::JoinHandle<()>,
) {
    let (shutdown_tx, _) = broadcast::channel(16);
    let tx_clone = shutdown_tx.clone();

    let handle = tokio::spawn(async move {
        let (mut sigterm, mut sigint) =
            match (signal(SignalKind::terminate()), signal(SignalKind::interrupt())) {
                (Ok(sigterm), Ok(sigint)) => (sigterm, sigint),
                (Err(e), _) | (_, Err(e)) => {
                    error!(error = %e, "Failed to install signal handlers");
                    return;
                }
            };

        tokio::select! {
            _ = sigterm.recv() => info!("SIGTERM received, initiating graceful shutdown"),
            _ = sigint.recv() => info!("SIGINT received, initiating graceful shutdown"),
        }
        let _ = tx_clone.send(ShutdownSignal::Graceful);
    });

    (shutdown_tx, handle)
}

/// Windows placeholder - only Ctrl+C is supported
#[cfg(not(unix))]
pub fn setup_signal_handlers() -> (
    broadcast::Sender<ShutdownSignal>,
    tokio::task::JoinHandle<()>,
) {
    let (shutdown_tx, _) = broadcast::channel(16);
    let tx_clone = shutdown_tx.clone();

    let handle = tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                info!("Ctrl+C received, initiating shutdown");
                let _ = tx_clone.send(ShutdownSignal::Graceful);
            }
            Err(e) => {
                error!(error = %e, "Failed to listen for Ctrl+C");
            }
        }
    });

    (shutdown_tx, handle)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_setup_signal_handlers() {
        let (shutdown_tx, handle) = setup_signal_handlers();
        let mut rx = shutdown_tx.subscribe();

        shutdown_tx.send(ShutdownSignal::Graceful).unwrap();

        assert_eq!(rx.recv().await.unwrap(), ShutdownSignal::Graceful);
        handle.abort();
    }
}
