use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// Cancels `cancellation` on Ctrl-C. Returns early if something else cancels it first.
pub async fn detect_shutdown(cancellation: CancellationToken) {
    tokio::select! {
        result = tokio::signal::ctrl_c() => {
            match result {
                Ok(()) => info!("Received Ctrl-C, shutting down"),
                Err(e) => warn!("Failed to listen for Ctrl-C, shutting down {e:?}"),
            }
            cancellation.cancel();
        },
        _ = cancellation.cancelled() => {},
    };
}
