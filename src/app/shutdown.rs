use tokio::signal;
#[cfg(unix)]
use tokio::signal::unix::{SignalKind, signal as unix_signal};
use tracing::{error, info};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShutdownReason {
    EndOfInput,
    Interrupt,
    Terminate,
}

/// Resolve on SIGINT or (on unix) SIGTERM.
///
/// If a handler cannot be installed the corresponding branch never
/// resolves, so the process still stops on end of input.
pub async fn wait_for_signal() -> ShutdownReason {
    let interrupt = async {
        match signal::ctrl_c().await {
            Ok(()) => info!("Received SIGINT (Ctrl+C), initiating graceful shutdown"),
            Err(err) => {
                error!("Failed to listen for SIGINT: {err}");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match unix_signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
                info!("Received SIGTERM, initiating graceful shutdown");
            }
            Err(err) => {
                error!("Failed to create SIGTERM handler: {err}");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = interrupt => ShutdownReason::Interrupt,
        () = terminate => ShutdownReason::Terminate,
    }
}
