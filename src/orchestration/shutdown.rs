//! Graceful shutdown handler.
//!
//! First Ctrl+C requests an orderly stop: the run loop notices the signal,
//! flushes its checkpoint and trace, and closes the browser. Second Ctrl+C
//! exits immediately.

use tracing::warn;

/// Install the two-stage Ctrl+C handler. The returned receiver flips to
/// `true` on the first signal.
pub fn setup_shutdown_handler() -> tokio::sync::watch::Receiver<bool> {
    let (shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(false);

    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            println!("\nReceived Ctrl+C, finishing current job and saving state...");
            println!("Press Ctrl+C again to force quit");
            let _ = shutdown_tx.send(true);

            // Second Ctrl+C skips the grace period.
            if tokio::signal::ctrl_c().await.is_ok() {
                warn!("force quit requested, exiting immediately");
                std::process::exit(1);
            }
        }
    });

    shutdown_rx
}
