use anyhow::Result;
use tokio::signal;

/// Which signal ended the wait.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShutdownSignal {
    CtrlC,
    Terminate,
}

/// Wait for termination signals (Ctrl+C, SIGTERM)
pub async fn wait_for_shutdown() -> Result<ShutdownSignal> {
    #[cfg(unix)]
    let mut terminate = signal::unix::signal(signal::unix::SignalKind::terminate()).map_err(|e| {
        tracing::error!(%e, "Failed to install SIGTERM handler");
        e
    })?;

    #[cfg(unix)]
    let terminated = async move {
        terminate.recv().await;
    };

    #[cfg(not(unix))]
    let terminated = std::future::pending::<()>();

    let received = tokio::select! {
        result = signal::ctrl_c() => {
            if let Err(e) = result {
                tracing::error!(%e, "Error handling Ctrl+C signal");
                return Err(e.into());
            }
            ShutdownSignal::CtrlC
        },
        _ = terminated => ShutdownSignal::Terminate,
    };

    tracing::info!(signal = ?received, "Shutdown signal received, initiating graceful shutdown");
    Ok(received)
}
