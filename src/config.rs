// Global configuration constants - single source of truth

use std::time::Duration;

pub struct Config;

impl Config {
    // Session/token handling
    pub const TOKEN_REFRESH_THRESHOLD_SECS: u64 = 60;
    pub const REFRESH_MAX_ATTEMPTS: u32 = 3;
    pub const REFRESH_BACKOFF_BASE_MS: u64 = 1_000;
    pub const LOCK_POLL_INTERVAL_MS: u64 = 200;
    pub const LOCK_WAIT_TIMEOUT_SECS: u64 = 60;

    // Rate limiting
    pub const RATE_LIMIT_BASE_DELAY_SECS: u64 = 30;
    pub const RATE_LIMIT_MAX_DELAY_SECS: u64 = 1_800;
    pub const RATE_LIMIT_DEEP_SLEEP_AFTER: u32 = 8;
    pub const RATE_LIMIT_RECOVERY_SUCCESSES: u32 = 20;
    pub const RATE_LIMIT_POLL_MS: u64 = 250;

    // Recovery manager
    pub const RECOVERY_ERROR_THRESHOLD: u32 = 5;
    pub const RECOVERY_SETTLE_SECS: u64 = 3;

    // Exploration timing
    pub const NAVIGATION_TIMEOUT_SECS: u64 = 60;
    pub const STABILITY_MAX_WAIT_SECS: u64 = 10;
    pub const STABILITY_QUIET_MS: u64 = 750;
    pub const CLICK_POLL_ATTEMPTS: u32 = 8;
    pub const CLICK_POLL_INTERVAL_MS: u64 = 500;
    pub const MENU_NAVIGATION_CAP: usize = 5;
    pub const GLOBAL_ACTION_TEST_CAP: usize = 3;

    // Login
    pub const LOGIN_FIELD_WAIT_SECS: u64 = 10;
    pub const LOGIN_SETTLE_MS: u64 = 2_000;
    pub const LOGIN_VERIFY_ATTEMPTS: u32 = 10;
    pub const MANUAL_LOGIN_WAIT_SECS: u64 = 180;

    // Checkpoint/artifacts
    pub const CHECKPOINT_EVERY_JOBS: usize = 10;
}

/// Heuristic knobs that are deliberately configurable rather than burned-in
/// constants: the defaults are inherited behavior, not load-tested optima.
#[derive(Debug, Clone)]
pub struct CrawlerTuning {
    /// Minimum captured element count for a prior record to count as healthy.
    pub healthy_element_threshold: usize,
    /// Max sampled links per UUID-shaped path pattern.
    pub uuid_sample_limit: usize,
    /// Clean non-static successes required before the 429 window resets.
    pub rate_limit_recovery_successes: u32,
}

impl Default for CrawlerTuning {
    fn default() -> Self {
        Self {
            healthy_element_threshold: 10,
            uuid_sample_limit: 2,
            rate_limit_recovery_successes: Config::RATE_LIMIT_RECOVERY_SUCCESSES,
        }
    }
}

/// Credentials resolved from the environment for one target environment.
#[derive(Debug, Clone)]
pub struct Credentials {
    pub email: String,
    pub password: String,
}

/// Feature toggles for temporary workarounds, driven by environment variables.
#[derive(Debug, Clone, Default)]
pub struct WorkaroundFlags {
    /// Block requests to a refresh endpoint known to wedge the app.
    pub block_broken_refresh: bool,
    /// Inject a tenant header on outbound requests.
    pub tenant_header: Option<String>,
    /// Clear the login fields again after submit (some forms re-populate).
    pub clear_fields_after_submit: bool,
}

impl WorkaroundFlags {
    pub fn from_env() -> Self {
        Self {
            block_broken_refresh: env_flag("UISCOUT_BLOCK_BROKEN_REFRESH"),
            tenant_header: std::env::var("UISCOUT_TENANT_HEADER").ok().filter(|v| !v.is_empty()),
            clear_fields_after_submit: env_flag("UISCOUT_CLEAR_LOGIN_FIELDS"),
        }
    }
}

/// Read credentials for an environment name, e.g. `staging` looks for
/// `UISCOUT_STAGING_EMAIL` / `UISCOUT_STAGING_PASSWORD`, falling back to the
/// unprefixed pair.
pub fn credentials_from_env(environment: Option<&str>) -> Option<Credentials> {
    let (email_var, password_var) = match environment {
        Some(env) => {
            let upper = env.to_uppercase().replace('-', "_");
            (
                format!("UISCOUT_{}_EMAIL", upper),
                format!("UISCOUT_{}_PASSWORD", upper),
            )
        }
        None => ("UISCOUT_EMAIL".to_string(), "UISCOUT_PASSWORD".to_string()),
    };

    let email = std::env::var(&email_var)
        .or_else(|_| std::env::var("UISCOUT_EMAIL"))
        .ok()?;
    let password = std::env::var(&password_var)
        .or_else(|_| std::env::var("UISCOUT_PASSWORD"))
        .ok()?;

    if email.is_empty() || password.is_empty() {
        return None;
    }
    Some(Credentials { email, password })
}

fn env_flag(name: &str) -> bool {
    std::env::var(name)
        .map(|v| matches!(v.as_str(), "1" | "true" | "yes"))
        .unwrap_or(false)
}

/// Full run configuration assembled from CLI args and the environment.
#[derive(Debug, Clone)]
pub struct CrawlConfig {
    pub start_url: String,
    pub max_depth: u32,
    pub page_limit: usize,
    pub concurrency: usize,
    pub headless: bool,
    pub force_rescan: bool,
    pub resume: bool,
    pub epochs: u32,
    pub output_dir: String,
    pub weights_path: Option<String>,
    pub credentials: Option<Credentials>,
    pub workarounds: WorkaroundFlags,
    pub tuning: CrawlerTuning,
}

impl CrawlConfig {
    pub fn navigation_timeout(&self) -> Duration {
        Duration::from_secs(Config::NAVIGATION_TIMEOUT_SECS)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tuning_defaults() {
        let tuning = CrawlerTuning::default();
        assert_eq!(tuning.healthy_element_threshold, 10);
        assert_eq!(tuning.uuid_sample_limit, 2);
        assert_eq!(tuning.rate_limit_recovery_successes, 20);
    }

    #[test]
    fn test_env_flag_parsing() {
        std::env::set_var("UISCOUT_TEST_FLAG_A", "1");
        std::env::set_var("UISCOUT_TEST_FLAG_B", "false");
        assert!(env_flag("UISCOUT_TEST_FLAG_A"));
        assert!(!env_flag("UISCOUT_TEST_FLAG_B"));
        assert!(!env_flag("UISCOUT_TEST_FLAG_MISSING"));
        std::env::remove_var("UISCOUT_TEST_FLAG_A");
        std::env::remove_var("UISCOUT_TEST_FLAG_B");
    }
}
