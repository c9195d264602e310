//! Startup plumbing shared by the ingest binaries

use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// Exit code for fatal startup or run errors
pub const EXIT_FATAL: i32 = 1;

/// Build identification line, logged right after tracing init
pub fn build_info(binary: &str) -> String {
    format!(
        "{} v{} [{}] built {} ({})",
        binary,
        env!("CARGO_PKG_VERSION"),
        env!("GIT_HASH"),
        env!("BUILD_TIMESTAMP"),
        env!("BUILD_PROFILE")
    )
}

/// Cancel `token` on Ctrl+C or SIGTERM
///
/// In-flight work finishes; nothing new starts once the token fires.
pub fn cancel_on_shutdown(token: CancellationToken) {
    tokio::spawn(async move {
        shutdown_signal().await;
        info!("Shutdown requested, finishing in-flight work");
        token.cancel();
    });
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            warn!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                warn!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Received Ctrl+C"),
        _ = terminate => info!("Received terminate signal"),
    }
}
