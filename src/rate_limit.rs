//! Global rate-limit backoff coordinator.
//!
//! Observes outbound response status codes and, on repeated 429s, stalls all
//! further requests for a tiered exponential window. Recovery is contingent
//! on sustained application traffic succeeding, not merely asset loads.

use parking_lot::Mutex;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::clock::Clock;
use crate::config::Config;

/// Process-wide backoff window state.
#[derive(Debug, Clone, Default)]
pub struct RateLimitWindow {
    pub until_ms: u64,
    pub consecutive_429: u32,
    pub consecutive_success: u32,
}

pub struct RateLimitCoordinator {
    window: Mutex<RateLimitWindow>,
    clock: Clock,
    base_delay_ms: u64,
    max_delay_ms: u64,
    deep_sleep_after: u32,
    recovery_successes: u32,
}

impl RateLimitCoordinator {
    pub fn new() -> Self {
        Self::with_clock(Clock::system())
    }

    pub fn with_clock(clock: Clock) -> Self {
        Self {
            window: Mutex::new(RateLimitWindow::default()),
            clock,
            base_delay_ms: Config::RATE_LIMIT_BASE_DELAY_SECS * 1_000,
            max_delay_ms: Config::RATE_LIMIT_MAX_DELAY_SECS * 1_000,
            deep_sleep_after: Config::RATE_LIMIT_DEEP_SLEEP_AFTER,
            recovery_successes: Config::RATE_LIMIT_RECOVERY_SUCCESSES,
        }
    }

    pub fn with_recovery_threshold(mut self, successes: u32) -> Self {
        self.recovery_successes = successes;
        self
    }

    /// Stall until the backoff window has elapsed. Yields in fixed slices
    /// rather than hot-spinning so the event loop stays responsive.
    pub async fn wait_if_limited(&self) {
        loop {
            let until = self.window.lock().until_ms;
            let now = self.clock.now_ms();
            if now >= until {
                return;
            }
            let remaining = until - now;
            let slice = remaining.min(Config::RATE_LIMIT_POLL_MS);
            tokio::time::sleep(Duration::from_millis(slice)).await;
        }
    }

    /// True when a backoff window is currently active.
    pub fn is_limited(&self) -> bool {
        self.clock.now_ms() < self.window.lock().until_ms
    }

    /// Feed one observed response into the coordinator.
    pub fn record_response(&self, status: u16, url: &str) {
        if status == 429 {
            self.record_rate_limited(url);
        } else if (200..400).contains(&status) && !is_static_asset(url) {
            self.record_success();
        }
    }

    fn record_rate_limited(&self, url: &str) {
        let mut window = self.window.lock();
        window.consecutive_429 += 1;
        window.consecutive_success = 0;

        let count = window.consecutive_429;
        let delay_ms = if count >= self.deep_sleep_after {
            // Deep sleep: fixed maximum, no further growth
            self.max_delay_ms
        } else {
            self.base_delay_ms
                .saturating_mul(2u64.saturating_pow(count.saturating_sub(1).min(20)))
                .min(self.max_delay_ms)
        };

        window.until_ms = self.clock.now_ms() + delay_ms;
        warn!(
            "429 from {} ({} consecutive), stalling all requests for {}s",
            url,
            count,
            delay_ms / 1_000
        );
    }

    fn record_success(&self) {
        let mut window = self.window.lock();
        if window.consecutive_429 == 0 {
            return;
        }
        window.consecutive_success += 1;
        if window.consecutive_success >= self.recovery_successes {
            info!(
                "rate limit recovered after {} clean responses",
                window.consecutive_success
            );
            *window = RateLimitWindow::default();
        } else {
            debug!(
                "rate limit recovery progress: {}/{}",
                window.consecutive_success, self.recovery_successes
            );
        }
    }

    /// Snapshot for diagnostics and the trace artifact.
    pub fn window(&self) -> RateLimitWindow {
        self.window.lock().clone()
    }

    /// Current delay the next 429 would produce, useful for logging.
    pub fn next_delay(&self) -> Duration {
        let count = self.window.lock().consecutive_429 + 1;
        let delay_ms = if count >= self.deep_sleep_after {
            self.max_delay_ms
        } else {
            self.base_delay_ms
                .saturating_mul(2u64.saturating_pow(count.saturating_sub(1).min(20)))
                .min(self.max_delay_ms)
        };
        Duration::from_millis(delay_ms)
    }
}

impl Default for RateLimitCoordinator {
    fn default() -> Self {
        Self::new()
    }
}

/// Static assets do not count toward rate-limit recovery: only API-like
/// traffic proves the window has lifted.
pub fn is_static_asset(url: &str) -> bool {
    const STATIC_EXTENSIONS: &[&str] = &[
        ".js", ".css", ".map", ".png", ".jpg", ".jpeg", ".gif", ".svg", ".ico", ".webp",
        ".woff", ".woff2", ".ttf", ".otf", ".eot", ".mp4", ".webm",
    ];
    let path = url.split(['?', '#']).next().unwrap_or(url).to_lowercase();
    STATIC_EXTENSIONS.iter().any(|ext| path.ends_with(ext))
}
