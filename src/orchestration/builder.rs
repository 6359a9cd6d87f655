//! Wires configuration into a runnable crawl: browser, response monitoring,
//! rate limiting, recovery, frontier, and the orchestrator itself.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tracing::{info, warn};

use crate::browser::{launch_browser, CdpDriver, PageDriver, ResponseMonitor, Subscription};
use crate::capture::CaptureWriter;
use crate::config::CrawlConfig;
use crate::crawler::{CrawlOrchestrator, CrawlRunResult, OrchestratorError, PageSupplier};
use crate::explore::ExploreCaches;
use crate::queue::CrawlQueue;
use crate::rate_limit::RateLimitCoordinator;
use crate::recovery::RecoveryManager;
use crate::session::TokenStore;
use crate::url_norm::{extract_host, UrlNormalizer};
use crate::weights::WeightMap;

use super::login::{perform_login, LoginOutcome};
use super::shutdown::setup_shutdown_handler;

const TENANT_HEADER_NAME: &str = "X-Tenant-Id";
const AUTHORIZATION_HEADER_NAME: &str = "Authorization";
const BROKEN_REFRESH_PATTERN: &str = "*/auth/refresh*";

/// Headers every request from a fresh page carries: the tenant workaround and
/// the session's bearer token when one is available.
fn page_headers(tenant: Option<&str>, access_token: Option<&str>) -> Vec<(String, String)> {
    let mut headers = Vec::new();
    if let Some(tenant) = tenant {
        headers.push((TENANT_HEADER_NAME.to_string(), tenant.to_string()));
    }
    if let Some(token) = access_token {
        headers.push((
            AUTHORIZATION_HEADER_NAME.to_string(),
            format!("Bearer {}", token),
        ));
    }
    headers
}

/// [`PageSupplier`] backed by one chromiumoxide browser. Every page it opens
/// gets the response monitor, the configured workarounds, and a login pass.
pub struct CdpSupplier {
    browser: tokio::sync::Mutex<chromiumoxide::Browser>,
    handler_task: tokio::task::JoinHandle<()>,
    monitor: ResponseMonitor,
    config: CrawlConfig,
    /// Current shared page, read by the recovery task when a reload is due.
    current: Arc<parking_lot::Mutex<Option<Arc<dyn PageDriver>>>>,
    monitor_tasks: parking_lot::Mutex<Vec<tokio::task::JoinHandle<()>>>,
    /// Optional external session; refreshed before each page is opened.
    session: Option<Arc<TokenStore>>,
}

impl CdpSupplier {
    pub async fn launch(
        config: CrawlConfig,
        monitor: ResponseMonitor,
        current: Arc<parking_lot::Mutex<Option<Arc<dyn PageDriver>>>>,
        session: Option<Arc<TokenStore>>,
    ) -> Result<Self, OrchestratorError> {
        let (browser, handler_task) = launch_browser(config.headless)
            .await
            .map_err(|e| OrchestratorError::Browser(e.to_string()))?;
        Ok(Self {
            browser: tokio::sync::Mutex::new(browser),
            handler_task,
            monitor,
            config,
            current,
            monitor_tasks: parking_lot::Mutex::new(Vec::new()),
            session,
        })
    }

    /// Close the browser and stop every background task this supplier owns.
    pub async fn shutdown(&self) {
        for task in self.monitor_tasks.lock().drain(..) {
            task.abort();
        }
        if let Err(e) = self.browser.lock().await.close().await {
            warn!("browser close failed: {}", e);
        }
        self.handler_task.abort();
    }
}

#[async_trait::async_trait]
impl PageSupplier for CdpSupplier {
    async fn fresh_authenticated_page(&self) -> Result<Arc<dyn PageDriver>, OrchestratorError> {
        // Embedding applications can hand us a token store; fetch a fresh
        // access token (refreshing if it is near expiry) so every request
        // from this page carries it. Zombie recovery re-runs this, so a new
        // page always picks up the current token.
        let access_token = match &self.session {
            Some(session) => match session.access_token().await {
                Ok(token) => Some(token),
                Err(e) => {
                    warn!("session token unavailable before page open: {}", e);
                    None
                }
            },
            None => None,
        };

        let page = self
            .browser
            .lock()
            .await
            .new_page("about:blank")
            .await
            .map_err(|e| OrchestratorError::Browser(e.to_string()))?;
        let driver = CdpDriver::new(page);

        // Monitor before login so the first responses are observed
        let monitor_task = driver
            .attach_response_monitor(self.monitor.clone())
            .await
            .map_err(|e| OrchestratorError::Browser(e.to_string()))?;
        self.monitor_tasks.lock().push(monitor_task);

        if self.config.workarounds.block_broken_refresh {
            if let Err(e) = driver
                .block_urls(vec![BROKEN_REFRESH_PATTERN.to_string()])
                .await
            {
                warn!("failed to block refresh endpoint: {}", e);
            }
        }
        let headers = page_headers(
            self.config.workarounds.tenant_header.as_deref(),
            access_token.as_deref(),
        );
        if !headers.is_empty() {
            if let Err(e) = driver.set_extra_headers(&headers).await {
                warn!("failed to inject request headers: {}", e);
            }
        }

        driver
            .navigate(&self.config.start_url)
            .await
            .map_err(|e| OrchestratorError::Browser(e.to_string()))?;

        let outcome = perform_login(
            &driver,
            self.config.credentials.as_ref(),
            &self.config.workarounds,
            self.config.headless,
        )
        .await
        .map_err(|e| OrchestratorError::Auth(e.to_string()))?;
        match outcome {
            LoginOutcome::Authenticated => info!("authenticated session established"),
            LoginOutcome::NoLoginForm => info!("no login form; continuing"),
            LoginOutcome::Unauthenticated => warn!("continuing without a session"),
        }

        let driver: Arc<dyn PageDriver> = Arc::new(driver);
        *self.current.lock() = Some(Arc::clone(&driver));
        Ok(driver)
    }
}

/// Everything a run needs, with background tasks kept alive for its
/// duration.
pub struct CrawlRuntime {
    pub orchestrator: CrawlOrchestrator,
    pub supplier: Arc<CdpSupplier>,
    _response_subscription: Subscription,
    recovery_task: tokio::task::JoinHandle<()>,
}

impl CrawlRuntime {
    pub async fn stop(self) {
        self.recovery_task.abort();
        self.supplier.shutdown().await;
    }
}

/// Build the full crawl runtime from configuration. An optional external
/// token store plugs in cross-process session coordination.
pub async fn build_crawl(
    config: CrawlConfig,
    session: Option<Arc<TokenStore>>,
) -> Result<CrawlRuntime, Box<dyn std::error::Error>> {
    let domain = extract_host(&config.start_url)
        .ok_or_else(|| OrchestratorError::InvalidStartUrl(config.start_url.clone()))?;

    let normalizer = Arc::new(UrlNormalizer::new());
    let capture = Arc::new(CaptureWriter::new(&config.output_dir, &domain));

    let mut queue = CrawlQueue::new(&domain, &config.output_dir, Arc::clone(&normalizer));
    if config.resume {
        match queue.load_checkpoint() {
            Ok(true) => {}
            Ok(false) => info!("resume requested but no checkpoint found; starting fresh"),
            Err(e) => warn!("checkpoint unreadable, starting fresh: {}", e),
        }
    }
    if !config.force_rescan {
        queue.load_healthy_visited(
            capture.records_dir().to_path_buf(),
            config.tuning.healthy_element_threshold,
        );
    }

    let weights = Arc::new(match &config.weights_path {
        Some(path) => WeightMap::load(path),
        None => WeightMap::empty(),
    });

    let rate_limit = Arc::new(
        RateLimitCoordinator::new()
            .with_recovery_threshold(config.tuning.rate_limit_recovery_successes),
    );
    let broken_responses = Arc::new(AtomicUsize::new(0));
    let recovery = Arc::new(RecoveryManager::new());
    let current_page: Arc<parking_lot::Mutex<Option<Arc<dyn PageDriver>>>> =
        Arc::new(parking_lot::Mutex::new(None));

    // Response fan-out: rate limiting is synchronous, recovery reloads go
    // through a channel so the async reload never runs inside the callback.
    let monitor = ResponseMonitor::new();
    let (error_tx, mut error_rx) = tokio::sync::mpsc::unbounded_channel::<()>();
    let subscription = monitor.subscribe({
        let rate_limit = Arc::clone(&rate_limit);
        let broken_responses = Arc::clone(&broken_responses);
        move |event| {
            rate_limit.record_response(event.status, &event.url);
            if event.status >= 400 && event.status != 429 {
                broken_responses.fetch_add(1, Ordering::SeqCst);
                let _ = error_tx.send(());
            }
        }
    });
    let recovery_task = tokio::spawn({
        let current_page = Arc::clone(&current_page);
        async move {
            while error_rx.recv().await.is_some() {
                let driver = current_page.lock().clone();
                if let Some(driver) = driver {
                    recovery.on_error(&driver).await;
                }
            }
        }
    });

    let supplier = Arc::new(
        CdpSupplier::launch(
            config.clone(),
            monitor,
            Arc::clone(&current_page),
            session,
        )
        .await?,
    );

    let orchestrator = CrawlOrchestrator::new(
        config,
        queue,
        Arc::clone(&supplier) as Arc<dyn PageSupplier>,
        Arc::new(ExploreCaches::new()),
        weights,
        rate_limit,
        capture,
        normalizer,
        broken_responses,
    )?;

    Ok(CrawlRuntime {
        orchestrator,
        supplier,
        _response_subscription: subscription,
        recovery_task,
    })
}

/// Build and run one crawl to completion, honoring Ctrl+C.
pub async fn run_crawl(
    config: CrawlConfig,
    session: Option<Arc<TokenStore>>,
) -> Result<CrawlRunResult, Box<dyn std::error::Error>> {
    let mut runtime = build_crawl(config, session).await?;
    let stop_rx = setup_shutdown_handler();

    let result = runtime.orchestrator.run(stop_rx).await?;
    runtime.stop().await;
    Ok(result)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_page_headers_carry_bearer_token() {
        let headers = page_headers(None, Some("tok-123"));
        assert_eq!(
            headers,
            vec![("Authorization".to_string(), "Bearer tok-123".to_string())]
        );
    }

    #[test]
    fn test_page_headers_combine_tenant_and_token() {
        let headers = page_headers(Some("acme"), Some("tok-123"));
        assert_eq!(headers.len(), 2);
        assert_eq!(headers[0], ("X-Tenant-Id".to_string(), "acme".to_string()));
        assert_eq!(
            headers[1],
            ("Authorization".to_string(), "Bearer tok-123".to_string())
        );
    }

    #[test]
    fn test_page_headers_empty_without_session_or_tenant() {
        assert!(page_headers(None, None).is_empty());
    }
}
