//! Authenticated-session lifecycle: token storage, expiry-window refresh, and
//! refresh de-duplication both in-process and across OS processes.
//!
//! Login and the actual refresh network call are delegated to an injected
//! [`RefreshHandler`]; this module owns only the coordination rules.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::clock::Clock;
use crate::config::Config;
use crate::json_utils;
use crate::lock::{DistributedLock, LockError};

#[derive(Error, Debug)]
pub enum SessionError {
    #[error("no tokens have been set on this session")]
    NoTokens,

    #[error("cross-process lock timeout after {}s", .0.as_secs())]
    LockTimeout(Duration),

    #[error("token refresh failed after {attempts} attempts: {last_error}")]
    RefreshFailed { attempts: u32, last_error: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("lock error: {0}")]
    Lock(LockError),
}

impl From<LockError> for SessionError {
    fn from(e: LockError) -> Self {
        match e {
            LockError::Timeout(d) => SessionError::LockTimeout(d),
            other => SessionError::Lock(other),
        }
    }
}

/// Durable token triple. `expires_at_ms` is computed once at update time from
/// `now + expires_in`, never re-derived later.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TokenState {
    pub access_token: String,
    pub refresh_token: String,
    pub expires_at_ms: u64,
}

/// New tokens produced by the embedding application's refresh call.
#[derive(Debug, Clone)]
pub struct TokenRefresh {
    pub access_token: String,
    pub refresh_token: String,
    pub expires_in_secs: u64,
}

/// Performs the actual token refresh against the target application.
#[async_trait::async_trait]
pub trait RefreshHandler: Send + Sync {
    async fn refresh(&self, refresh_token: &str) -> Result<TokenRefresh, String>;
}

/// Optional cross-process mirror: token state lives in a shared JSON file
/// guarded by a [`DistributedLock`], so multiple crawler processes coordinate
/// on a single external session.
pub struct SharedSessionFile {
    pub state_path: PathBuf,
    pub lock: Arc<dyn DistributedLock>,
}

impl SharedSessionFile {
    fn read_state(&self) -> Option<TokenState> {
        let raw = std::fs::read_to_string(&self.state_path).ok()?;
        json_utils::deserialize_with_logging(&raw, "shared session state")
    }

    fn write_state(&self, state: &TokenState) {
        if let Some(parent) = self.state_path.parent() {
            if let Err(e) = std::fs::create_dir_all(parent) {
                warn!("failed to create session state dir: {}", e);
                return;
            }
        }
        if let Some(json) = json_utils::serialize_with_logging(state, "shared session state") {
            if let Err(e) = std::fs::write(&self.state_path, json) {
                warn!("failed to persist session state: {}", e);
            }
        }
    }
}

/// Token store with automatic refresh inside a threshold window of expiry.
pub struct TokenStore {
    state: parking_lot::Mutex<Option<TokenState>>,
    /// Single-flight gate: concurrent refreshers queue here, then re-check
    /// expiry, so only the first caller invokes the handler.
    refresh_gate: tokio::sync::Mutex<()>,
    handler: Arc<dyn RefreshHandler>,
    shared: Option<SharedSessionFile>,
    clock: Clock,
    threshold_ms: u64,
}

impl TokenStore {
    pub fn new(handler: Arc<dyn RefreshHandler>) -> Self {
        Self::with_clock(handler, Clock::system())
    }

    pub fn with_clock(handler: Arc<dyn RefreshHandler>, clock: Clock) -> Self {
        Self {
            state: parking_lot::Mutex::new(None),
            refresh_gate: tokio::sync::Mutex::new(()),
            handler,
            shared: None,
            clock,
            threshold_ms: Config::TOKEN_REFRESH_THRESHOLD_SECS * 1_000,
        }
    }

    /// Enable cross-process coordination through a shared state file.
    pub fn with_shared_file(mut self, shared: SharedSessionFile) -> Self {
        // Adopt pre-existing state from a sibling process, if any.
        if let Some(existing) = shared.read_state() {
            *self.state.lock() = Some(existing);
        }
        self.shared = Some(shared);
        self
    }

    /// Record new tokens. `expires_at` is computed here, at the moment of
    /// update. Mirrors to the shared file when cross-process mode is on.
    pub fn set_tokens(&self, access: &str, refresh: &str, expires_in_secs: u64) {
        let state = TokenState {
            access_token: access.to_string(),
            refresh_token: refresh.to_string(),
            expires_at_ms: self.clock.now_ms() + expires_in_secs * 1_000,
        };
        if let Some(shared) = &self.shared {
            shared.write_state(&state);
        }
        *self.state.lock() = Some(state);
    }

    pub fn is_expiring_soon(&self) -> bool {
        match self.state.lock().as_ref() {
            Some(state) => self.clock.now_ms() + self.threshold_ms >= state.expires_at_ms,
            None => true,
        }
    }

    fn current_access_token(&self) -> Option<String> {
        self.state.lock().as_ref().map(|s| s.access_token.clone())
    }

    /// Get a valid access token, refreshing first when within the expiry
    /// threshold window.
    pub async fn access_token(&self) -> Result<String, SessionError> {
        if !self.is_expiring_soon() {
            return self.current_access_token().ok_or(SessionError::NoTokens);
        }
        self.refresh().await?;
        self.current_access_token().ok_or(SessionError::NoTokens)
    }

    /// Refresh the session. Concurrent in-process callers share one refresh;
    /// concurrent processes are serialized by the shared-file lock, and a
    /// refresh already done by a sibling process is adopted instead of
    /// repeated.
    pub async fn refresh(&self) -> Result<(), SessionError> {
        let _gate = self.refresh_gate.lock().await;

        // Another in-process caller may have finished while we queued.
        if !self.is_expiring_soon() {
            return Ok(());
        }

        let _lock_guard = match &self.shared {
            Some(shared) => {
                let guard = shared
                    .lock
                    .acquire(Duration::from_secs(Config::LOCK_WAIT_TIMEOUT_SECS))
                    .await?;

                // Reload: a sibling process may have refreshed while we waited.
                if let Some(fresh) = shared.read_state() {
                    let still_expiring =
                        self.clock.now_ms() + self.threshold_ms >= fresh.expires_at_ms;
                    if !still_expiring {
                        debug!("adopting token refreshed by another process");
                        *self.state.lock() = Some(fresh);
                        return Ok(());
                    }
                }
                Some(guard)
            }
            None => None,
        };

        let refresh_token = self
            .state
            .lock()
            .as_ref()
            .map(|s| s.refresh_token.clone())
            .ok_or(SessionError::NoTokens)?;

        let refreshed = self.call_handler_with_retry(&refresh_token).await?;
        self.set_tokens(
            &refreshed.access_token,
            &refreshed.refresh_token,
            refreshed.expires_in_secs,
        );
        info!("session tokens refreshed");
        Ok(())
        // _lock_guard drops here, after the shared file was rewritten
    }

    async fn call_handler_with_retry(
        &self,
        refresh_token: &str,
    ) -> Result<TokenRefresh, SessionError> {
        let mut last_error = String::new();

        for attempt in 0..Config::REFRESH_MAX_ATTEMPTS {
            if attempt > 0 {
                // 1s, 2s between attempts
                let backoff_ms = Config::REFRESH_BACKOFF_BASE_MS * (1 << (attempt - 1));
                tokio::time::sleep(Duration::from_millis(backoff_ms)).await;
            }

            match self.handler.refresh(refresh_token).await {
                Ok(tokens) => return Ok(tokens),
                Err(e) => {
                    warn!("token refresh attempt {} failed: {}", attempt + 1, e);
                    last_error = e;
                }
            }
        }

        Err(SessionError::RefreshFailed {
            attempts: Config::REFRESH_MAX_ATTEMPTS,
            last_error,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lock::FileLock;
    use std::sync::atomic::{AtomicU32, Ordering};
    use tempfile::TempDir;

    struct CountingHandler {
        calls: AtomicU32,
        fail_first: u32,
    }

    impl CountingHandler {
        fn new() -> Arc<Self> {
            Arc::new(Self {
                calls: AtomicU32::new(0),
                fail_first: 0,
            })
        }

        fn failing_first(n: u32) -> Arc<Self> {
            Arc::new(Self {
                calls: AtomicU32::new(0),
                fail_first: n,
            })
        }
    }

    #[async_trait::async_trait]
    impl RefreshHandler for CountingHandler {
        async fn refresh(&self, _refresh_token: &str) -> Result<TokenRefresh, String> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst);
            if call < self.fail_first {
                return Err("simulated refresh failure".to_string());
            }
            Ok(TokenRefresh {
                access_token: format!("access-{}", call),
                refresh_token: format!("refresh-{}", call),
                expires_in_secs: 3_600,
            })
        }
    }

    #[test]
    fn test_lock_timeout_error_reports_seconds() {
        let err = SessionError::LockTimeout(Duration::from_secs(60));
        assert_eq!(err.to_string(), "cross-process lock timeout after 60s");
    }

    #[tokio::test]
    async fn test_fresh_token_skips_refresh() {
        let handler = CountingHandler::new();
        let store = TokenStore::with_clock(handler.clone(), Clock::manual(0));
        store.set_tokens("a", "r", 3_600);

        assert!(!store.is_expiring_soon());
        let token = store.access_token().await.unwrap();
        assert_eq!(token, "a");
        assert_eq!(handler.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_expiry_window_with_simulated_time() {
        let handler = CountingHandler::new();
        let clock = Clock::manual(0);
        let store = TokenStore::with_clock(handler, clock.clone());
        store.set_tokens("a", "r", 3_600);

        assert!(!store.is_expiring_soon());

        // Advance to within 60s of expiry
        clock.advance_ms(3_600_000 - 30_000);
        assert!(store.is_expiring_soon());
    }

    #[tokio::test]
    async fn test_concurrent_callers_share_one_refresh() {
        let handler = CountingHandler::new();
        let clock = Clock::manual(0);
        let store = Arc::new(TokenStore::with_clock(handler.clone(), clock.clone()));
        store.set_tokens("stale", "r", 3_600);
        clock.advance_ms(3_600_000); // fully expired

        let mut tasks = Vec::new();
        for _ in 0..8 {
            let store = Arc::clone(&store);
            tasks.push(tokio::spawn(async move { store.access_token().await }));
        }

        let mut tokens = Vec::new();
        for task in tasks {
            tokens.push(task.await.unwrap().unwrap());
        }

        assert_eq!(handler.calls.load(Ordering::SeqCst), 1);
        assert!(tokens.iter().all(|t| t == &tokens[0]));
        assert_eq!(tokens[0], "access-0");
    }

    #[tokio::test]
    async fn test_handler_retry_then_success() {
        tokio::time::pause();
        let handler = CountingHandler::failing_first(2);
        let clock = Clock::manual(0);
        let store = TokenStore::with_clock(handler.clone(), clock.clone());
        store.set_tokens("stale", "r", 3_600);
        clock.advance_ms(3_600_000);

        store.refresh().await.unwrap();
        assert_eq!(handler.calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_handler_exhausted_surfaces_last_error() {
        tokio::time::pause();
        let handler = CountingHandler::failing_first(10);
        let clock = Clock::manual(0);
        let store = TokenStore::with_clock(handler.clone(), clock.clone());
        store.set_tokens("stale", "r", 3_600);
        clock.advance_ms(3_600_000);

        let err = store.refresh().await.unwrap_err();
        match err {
            SessionError::RefreshFailed { attempts, last_error } => {
                assert_eq!(attempts, 3);
                assert!(last_error.contains("simulated"));
            }
            other => panic!("unexpected error: {:?}", other),
        }
        assert_eq!(handler.calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_shared_file_round_trip_and_adoption() {
        let dir = TempDir::new().unwrap();
        let state_path = dir.path().join("session.json");
        let lock_path = dir.path().join("session.lock");

        let handler_a = CountingHandler::new();
        let clock = Clock::manual(0);
        let store_a = TokenStore::with_clock(handler_a, clock.clone()).with_shared_file(
            SharedSessionFile {
                state_path: state_path.clone(),
                lock: Arc::new(FileLock::new(&lock_path)),
            },
        );
        store_a.set_tokens("shared-access", "shared-refresh", 3_600);

        // A second store (as another process would) adopts the persisted state
        let handler_b = CountingHandler::new();
        let store_b = TokenStore::with_clock(handler_b.clone(), clock.clone()).with_shared_file(
            SharedSessionFile {
                state_path,
                lock: Arc::new(FileLock::new(&lock_path)),
            },
        );
        let token = store_b.access_token().await.unwrap();
        assert_eq!(token, "shared-access");
        assert_eq!(handler_b.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_no_tokens_error() {
        let store = TokenStore::with_clock(CountingHandler::new(), Clock::manual(0));
        let err = store.access_token().await.unwrap_err();
        assert!(matches!(
            err,
            SessionError::NoTokens | SessionError::RefreshFailed { .. }
        ));
    }
}
