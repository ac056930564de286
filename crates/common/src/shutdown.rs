//! OS signal wiring for graceful shutdown.

use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// Cancel `token` on the first SIGINT or SIGTERM (Ctrl+C only on
/// non-unix targets). Returns the name of the signal received.
pub async fn cancel_on_signal(token: CancellationToken) -> &'static str {
    let signal = wait_for_signal().await;
    info!(signal, "shutdown requested");
    token.cancel();
    signal
}

/// Spawn [`cancel_on_signal`] in the background and hand back the token.
pub fn install_shutdown_handler() -> CancellationToken {
    let token = CancellationToken::new();
    let child = token.clone();
    tokio::spawn(async move {
        tokio::select! {
            _ = child.cancelled() => {}
            _ = cancel_on_signal(child.clone()) => {}
        }
    });
    token
}

#[cfg(unix)]
async fn wait_for_signal() -> &'static str {
    use tokio::signal::unix::{SignalKind, signal};

    let mut term = match signal(SignalKind::terminate()) {
        Ok(s) => s,
        Err(e) => {
            warn!(error = %e, "SIGTERM handler unavailable; only Ctrl+C will stop the relay");
            return ctrl_c().await;
        }
    };

    tokio::select! {
        s = ctrl_c() => s,
        _ = term.recv() => "SIGTERM",
    }
}

#[cfg(not(unix))]
async fn wait_for_signal() -> &'static str {
    ctrl_c().await
}

async fn ctrl_c() -> &'static str {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!(error = %e, "Ctrl+C handler failed");
        std::future::pending::<()>().await;
    }
    "SIGINT"
}
