//! Browser seam: a [`PageDriver`] trait the exploration engine talks to, a
//! chromiumoxide-backed implementation, and the response-event subscription
//! used by the rate-limit coordinator and session recovery.
//!
//! Everything above this module is browser-agnostic; everything CDP-specific
//! lives here.

use async_trait::async_trait;
use chromiumoxide::browser::{Browser, BrowserConfig};
use chromiumoxide::cdp::browser_protocol::network::{
    EnableParams, EventResponseReceived, Headers, SetBlockedUrLsParams, SetExtraHttpHeadersParams,
};
use chromiumoxide::cdp::browser_protocol::page::CaptureScreenshotFormat;
use chromiumoxide::page::ScreenshotParams;
use chromiumoxide::Page;
use futures::StreamExt;
use parking_lot::Mutex;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, warn};

use crate::config::Config;

#[derive(Error, Debug)]
pub enum DriverError {
    #[error("navigation failed: {0}")]
    Navigation(String),

    #[error("page is closed")]
    Closed,

    #[error("script evaluation failed: {0}")]
    Evaluate(String),

    #[error("screenshot failed: {0}")]
    Screenshot(String),

    #[error("browser protocol error: {0}")]
    Protocol(String),
}

/// The surface the exploration engine needs from a live page. Kept small so
/// tests can script a fake instead of a real browser.
#[async_trait]
pub trait PageDriver: Send + Sync {
    async fn navigate(&self, url: &str) -> Result<(), DriverError>;
    async fn current_url(&self) -> Result<String, DriverError>;
    async fn reload(&self) -> Result<(), DriverError>;
    /// Evaluate a JS expression, returning its JSON result.
    async fn evaluate(&self, js: &str) -> Result<Value, DriverError>;
    async fn click(&self, selector: &str) -> Result<(), DriverError>;
    async fn fill(&self, selector: &str, value: &str) -> Result<(), DriverError>;
    async fn screenshot(&self) -> Result<Vec<u8>, DriverError>;
    async fn is_closed(&self) -> bool;
}

// ============================================================================
// RESPONSE SUBSCRIPTION
// ============================================================================

/// One observed network response.
#[derive(Debug, Clone)]
pub struct ResponseEvent {
    pub status: u16,
    pub url: String,
}

type ResponseCallback = Box<dyn Fn(&ResponseEvent) + Send + Sync>;

/// Fan-out for response events. Listeners must be registered before login
/// begins, since rate-limit tracking depends on seeing every response.
#[derive(Clone, Default)]
pub struct ResponseMonitor {
    inner: Arc<MonitorInner>,
}

#[derive(Default)]
struct MonitorInner {
    subscribers: Mutex<HashMap<u64, ResponseCallback>>,
    next_id: AtomicU64,
}

/// Subscription handle; dropping it unsubscribes.
pub struct Subscription {
    id: u64,
    inner: Arc<MonitorInner>,
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.inner.subscribers.lock().remove(&self.id);
    }
}

impl ResponseMonitor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe<F>(&self, callback: F) -> Subscription
    where
        F: Fn(&ResponseEvent) + Send + Sync + 'static,
    {
        let id = self.inner.next_id.fetch_add(1, Ordering::SeqCst);
        self.inner.subscribers.lock().insert(id, Box::new(callback));
        Subscription {
            id,
            inner: Arc::clone(&self.inner),
        }
    }

    pub fn publish(&self, event: &ResponseEvent) {
        for callback in self.inner.subscribers.lock().values() {
            callback(event);
        }
    }

    pub fn subscriber_count(&self) -> usize {
        self.inner.subscribers.lock().len()
    }
}

// ============================================================================
// CHROMIUMOXIDE IMPLEMENTATION
// ============================================================================

/// Launch one browser and spawn its CDP handler loop. The returned task must
/// be aborted when the run ends or the connection leaks.
pub async fn launch_browser(
    headless: bool,
) -> Result<(Browser, tokio::task::JoinHandle<()>), DriverError> {
    let mut builder = BrowserConfig::builder().window_size(1440, 900);
    if !headless {
        builder = builder.with_head();
    }
    let config = builder
        .build()
        .map_err(DriverError::Protocol)?;

    let (browser, mut handler) = Browser::launch(config)
        .await
        .map_err(|e| DriverError::Protocol(e.to_string()))?;

    let handler_task = tokio::spawn(async move {
        while let Some(event) = handler.next().await {
            if let Err(e) = event {
                debug!("browser handler event error: {}", e);
            }
        }
    });

    Ok((browser, handler_task))
}

/// [`PageDriver`] backed by a chromiumoxide page.
pub struct CdpDriver {
    page: Page,
}

impl CdpDriver {
    pub fn new(page: Page) -> Self {
        Self { page }
    }

    pub fn page(&self) -> &Page {
        &self.page
    }

    /// Enable network events and forward response statuses into the monitor.
    /// Must run before login so the first responses are observed.
    pub async fn attach_response_monitor(
        &self,
        monitor: ResponseMonitor,
    ) -> Result<tokio::task::JoinHandle<()>, DriverError> {
        self.page
            .execute(EnableParams::default())
            .await
            .map_err(|e| DriverError::Protocol(e.to_string()))?;

        let mut events = self
            .page
            .event_listener::<EventResponseReceived>()
            .await
            .map_err(|e| DriverError::Protocol(e.to_string()))?;

        Ok(tokio::spawn(async move {
            while let Some(event) = events.next().await {
                monitor.publish(&ResponseEvent {
                    status: event.response.status as u16,
                    url: event.response.url.clone(),
                });
            }
        }))
    }

    /// Block requests matching the given URL patterns (temporary workaround
    /// for a refresh endpoint known to wedge the app).
    pub async fn block_urls(&self, patterns: Vec<String>) -> Result<(), DriverError> {
        self.page
            .execute(SetBlockedUrLsParams::new(patterns))
            .await
            .map(|_| ())
            .map_err(|e| DriverError::Protocol(e.to_string()))
    }

    /// Inject headers on every outbound request from this page. The CDP call
    /// replaces the whole extra-header map, so all headers go in one call.
    pub async fn set_extra_headers(&self, headers: &[(String, String)]) -> Result<(), DriverError> {
        let map: serde_json::Map<String, serde_json::Value> = headers
            .iter()
            .map(|(name, value)| (name.clone(), serde_json::Value::String(value.clone())))
            .collect();
        self.page
            .execute(SetExtraHttpHeadersParams::new(Headers::new(
                serde_json::Value::Object(map),
            )))
            .await
            .map(|_| ())
            .map_err(|e| DriverError::Protocol(e.to_string()))
    }
}

#[async_trait]
impl PageDriver for CdpDriver {
    async fn navigate(&self, url: &str) -> Result<(), DriverError> {
        let goto = self.page.goto(url);
        match tokio::time::timeout(Duration::from_secs(Config::NAVIGATION_TIMEOUT_SECS), goto).await
        {
            Ok(Ok(_)) => Ok(()),
            Ok(Err(e)) => Err(DriverError::Navigation(e.to_string())),
            Err(_) => Err(DriverError::Navigation(format!(
                "timeout after {}s: {}",
                Config::NAVIGATION_TIMEOUT_SECS,
                url
            ))),
        }
    }

    async fn current_url(&self) -> Result<String, DriverError> {
        self.page
            .url()
            .await
            .map_err(|e| DriverError::Protocol(e.to_string()))?
            .ok_or_else(|| DriverError::Protocol("page has no URL".to_string()))
    }

    async fn reload(&self) -> Result<(), DriverError> {
        self.page
            .reload()
            .await
            .map(|_| ())
            .map_err(|e| DriverError::Navigation(e.to_string()))
    }

    async fn evaluate(&self, js: &str) -> Result<Value, DriverError> {
        let result = self
            .page
            .evaluate(js)
            .await
            .map_err(|e| DriverError::Evaluate(e.to_string()))?;
        Ok(result.into_value().unwrap_or(Value::Null))
    }

    async fn click(&self, selector: &str) -> Result<(), DriverError> {
        let element = self
            .page
            .find_element(selector)
            .await
            .map_err(|e| DriverError::Evaluate(e.to_string()))?;
        element
            .click()
            .await
            .map(|_| ())
            .map_err(|e| DriverError::Evaluate(e.to_string()))
    }

    async fn fill(&self, selector: &str, value: &str) -> Result<(), DriverError> {
        let element = self
            .page
            .find_element(selector)
            .await
            .map_err(|e| DriverError::Evaluate(e.to_string()))?;
        element
            .click()
            .await
            .map_err(|e| DriverError::Evaluate(e.to_string()))?;
        element
            .type_str(value)
            .await
            .map(|_| ())
            .map_err(|e| DriverError::Evaluate(e.to_string()))
    }

    async fn screenshot(&self) -> Result<Vec<u8>, DriverError> {
        self.page
            .screenshot(
                ScreenshotParams::builder()
                    .format(CaptureScreenshotFormat::Png)
                    .build(),
            )
            .await
            .map_err(|e| DriverError::Screenshot(e.to_string()))
    }

    async fn is_closed(&self) -> bool {
        // A zombie page fails even the cheapest round-trip.
        self.page.url().await.is_err()
    }
}

/// Close a page, logging rather than escalating on failure: the browser will
/// reap it eventually, but the attempt is recorded.
pub async fn close_page_quietly(page: Page, context: &str) {
    if let Err(e) = page.close().await {
        warn!("failed to close page ({}): {}", context, e);
    }
}

// ============================================================================
// SCRIPTED FAKE FOR TESTS
// ============================================================================

#[cfg(test)]
pub mod fake {
    use super::*;
    use std::collections::VecDeque;
    use std::sync::atomic::AtomicBool;

    /// Scripted [`PageDriver`]: evaluate responses are keyed by a probe tag
    /// substring and consumed front-to-back.
    #[derive(Default)]
    pub struct FakeDriver {
        pub url: Mutex<String>,
        pub nav_log: Mutex<Vec<String>>,
        pub clicks: Mutex<Vec<String>>,
        pub fills: Mutex<Vec<(String, String)>>,
        pub reloads: AtomicU64,
        pub eval_scripts: Mutex<HashMap<String, VecDeque<Value>>>,
        pub screenshot_bytes: Mutex<Vec<u8>>,
        pub closed: AtomicBool,
        pub fail_navigation: AtomicBool,
        /// URL the page "ends up on" after the next click, simulating a
        /// click that navigates away.
        pub click_navigates_to: Mutex<VecDeque<String>>,
    }

    impl FakeDriver {
        pub fn at(url: &str) -> Self {
            let fake = Self::default();
            *fake.url.lock() = url.to_string();
            fake
        }

        /// Queue an evaluate response for scripts containing `tag`.
        pub fn script(&self, tag: &str, value: Value) {
            self.eval_scripts
                .lock()
                .entry(tag.to_string())
                .or_default()
                .push_back(value);
        }
    }

    #[async_trait]
    impl PageDriver for FakeDriver {
        async fn navigate(&self, url: &str) -> Result<(), DriverError> {
            if self.fail_navigation.load(Ordering::SeqCst) {
                return Err(DriverError::Navigation("scripted failure".to_string()));
            }
            self.nav_log.lock().push(url.to_string());
            *self.url.lock() = url.to_string();
            Ok(())
        }

        async fn current_url(&self) -> Result<String, DriverError> {
            if self.closed.load(Ordering::SeqCst) {
                return Err(DriverError::Closed);
            }
            Ok(self.url.lock().clone())
        }

        async fn reload(&self) -> Result<(), DriverError> {
            self.reloads.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }

        async fn evaluate(&self, js: &str) -> Result<Value, DriverError> {
            let mut scripts = self.eval_scripts.lock();
            for (tag, queue) in scripts.iter_mut() {
                if js.contains(tag.as_str()) {
                    if let Some(value) = queue.pop_front() {
                        return Ok(value);
                    }
                }
            }
            Ok(Value::Null)
        }

        async fn click(&self, selector: &str) -> Result<(), DriverError> {
            self.clicks.lock().push(selector.to_string());
            if let Some(target) = self.click_navigates_to.lock().pop_front() {
                *self.url.lock() = target;
            }
            Ok(())
        }

        async fn fill(&self, selector: &str, value: &str) -> Result<(), DriverError> {
            self.fills
                .lock()
                .push((selector.to_string(), value.to_string()));
            Ok(())
        }

        async fn screenshot(&self) -> Result<Vec<u8>, DriverError> {
            Ok(self.screenshot_bytes.lock().clone())
        }

        async fn is_closed(&self) -> bool {
            self.closed.load(Ordering::SeqCst)
        }
    }
}
