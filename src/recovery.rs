//! Error-driven recovery: after enough network/auth errors, force a full page
//! reload to discard accumulated bad client-side state.
//!
//! Best-effort self-healing only. Reload failures are logged, never
//! escalated.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

use crate::browser::PageDriver;
use crate::config::Config;

pub struct RecoveryManager {
    errors: AtomicU32,
    threshold: u32,
    settle: Duration,
}

impl RecoveryManager {
    pub fn new() -> Self {
        Self {
            errors: AtomicU32::new(0),
            threshold: Config::RECOVERY_ERROR_THRESHOLD,
            settle: Duration::from_secs(Config::RECOVERY_SETTLE_SECS),
        }
    }

    pub fn with_threshold(mut self, threshold: u32) -> Self {
        self.threshold = threshold;
        self
    }

    pub fn with_settle(mut self, settle: Duration) -> Self {
        self.settle = settle;
        self
    }

    pub fn error_count(&self) -> u32 {
        self.errors.load(Ordering::SeqCst)
    }

    /// Record one error response. Returns true when the threshold fired and a
    /// reload was attempted.
    pub async fn on_error(&self, driver: &Arc<dyn PageDriver>) -> bool {
        let count = self.errors.fetch_add(1, Ordering::SeqCst) + 1;
        if count < self.threshold {
            return false;
        }

        info!(
            "{} consecutive error responses, forcing page reload to clear client state",
            count
        );

        if let Err(e) = driver.reload().await {
            warn!("recovery reload failed: {}", e);
        }
        tokio::time::sleep(self.settle).await;

        // Counter resets regardless of reload outcome
        self.errors.store(0, Ordering::SeqCst);
        true
    }

    /// A clean response resets nothing here: the counter only resets when a
    /// reload fires. Exposed for run-trace diagnostics.
    pub fn reset(&self) {
        self.errors.store(0, Ordering::SeqCst);
    }
}

impl Default for RecoveryManager {
    fn default() -> Self {
        Self::new()
    }
}
