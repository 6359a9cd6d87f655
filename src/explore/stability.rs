//! Phase 3/6 helpers: wait for the page to settle, then trigger lazy content.
//!
//! Stability means no known loading-indicator selector is visible and the DOM
//! has been mutation-quiet for a short window, all bounded by a maximum total
//! wait after which the page is taken as-is.

use std::time::Duration;
use tracing::debug;

use crate::browser::PageDriver;
use crate::config::Config;
use crate::explore::probe;

const LOADING_PROBE_JS: &str = r#"
(() => { /* uiscoutLoadingProbe */
  const selectors = [
    '.spinner', '.loading', '.loader', '[data-loading="true"]',
    '.MuiCircularProgress-root', '[class*="skeleton"]', '[aria-busy="true"]',
  ];
  let visible = 0;
  for (const sel of selectors) {
    for (const el of document.querySelectorAll(sel)) {
      const rect = el.getBoundingClientRect();
      if (rect.width > 0 && rect.height > 0) visible++;
    }
  }
  return visible;
})()
"#;

const QUIET_PROBE_JS: &str = r#"
(() => { /* uiscoutQuietProbe */
  if (!window.__uiscout_mutation) {
    window.__uiscout_mutation = { last: Date.now() };
    new MutationObserver(() => {
      window.__uiscout_mutation.last = Date.now();
    }).observe(document.documentElement, {
      childList: true, subtree: true, attributes: true,
    });
  }
  return Date.now() - window.__uiscout_mutation.last;
})()
"#;

const SCROLL_DOWN_JS: &str = r#"
(() => { /* uiscoutAutoScroll */
  window.scrollTo(0, document.body.scrollHeight);
  return document.body.scrollHeight;
})()
"#;

const SCROLL_TOP_JS: &str = r#"
(() => { /* uiscoutScrollTop */ window.scrollTo(0, 0); return 0; })()
"#;

#[derive(Debug, Default)]
pub struct StabilityReport {
    /// Loading indicators still visible when the wait gave up (0 when the
    /// page settled).
    pub loading_indicators: usize,
    pub waited_ms: u64,
}

/// Poll until loaders are gone and the DOM has been quiet, or the budget
/// runs out. Never fails; a page that won't settle is reported, not retried.
pub async fn wait_for_stability(driver: &dyn PageDriver) -> StabilityReport {
    const POLL_MS: u64 = 250;
    let budget_ms = Config::STABILITY_MAX_WAIT_SECS * 1_000;
    let mut waited_ms = 0u64;

    loop {
        let loaders = match probe(driver, LOADING_PROBE_JS, "loading-indicator").await {
            Some(value) => value.as_u64().unwrap_or(0) as usize,
            // Probe unsupported: nothing to wait on
            None => 0,
        };
        let report = StabilityReport {
            loading_indicators: loaders,
            waited_ms,
        };

        if loaders == 0 {
            let quiet_ms = match probe(driver, QUIET_PROBE_JS, "dom-quiet").await {
                Some(value) => value.as_u64(),
                None => None,
            };
            match quiet_ms {
                // Observer not installable: take the page as settled
                None => return report,
                Some(ms) if ms >= Config::STABILITY_QUIET_MS => return report,
                Some(_) => {}
            }
        }

        if waited_ms >= budget_ms {
            debug!(
                "stability budget exhausted after {}ms ({} loaders still visible)",
                waited_ms, loaders
            );
            return report;
        }
        tokio::time::sleep(Duration::from_millis(POLL_MS)).await;
        waited_ms += POLL_MS;
    }
}

/// Scroll to the bottom and back to trigger lazy-loaded content, with a brief
/// pause for fetches to start.
pub async fn auto_scroll(driver: &dyn PageDriver) {
    if probe(driver, SCROLL_DOWN_JS, "auto-scroll").await.is_some() {
        tokio::time::sleep(Duration::from_millis(500)).await;
        let _ = probe(driver, SCROLL_TOP_JS, "scroll-top").await;
    }
}
