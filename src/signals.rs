//! SIGINT / SIGTERM handling.

use crate::transport::Context;
use tokio_util::sync::CancellationToken;

/// Resolves on the first SIGINT (Ctrl+C) or, on unix, SIGTERM.
pub async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => tracing::info!("SIGINT received"),
        _ = terminate => tracing::info!("SIGTERM received"),
    }
}

/// Cancel `token` when a shutdown signal arrives. The watcher ends quietly if the token
/// is cancelled first.
pub fn cancel_on_signal(ctx: &Context, token: CancellationToken) {
    ctx.handle().spawn(async move {
        tokio::select! {
            _ = shutdown_signal() => {
                tracing::info!("shutdown requested");
                token.cancel();
            }
            _ = token.cancelled() => {}
        }
    });
}
