//! Phase 2: client-side route capture.
//!
//! SPAs change URL through `history.pushState`/`replaceState` without a
//! navigation the browser would report. The hook records every such target
//! into an in-page set which phase 12 collects and merges into the link list.

use tracing::debug;

use crate::browser::PageDriver;
use crate::explore::probe;

const ROUTE_HOOK_JS: &str = r#"
(() => { /* uiscoutRouteHook */
  if (window.__uiscout_routes) return true;
  window.__uiscout_routes = [];
  const record = (url) => {
    try {
      const abs = new URL(url, window.location.href).href;
      if (!window.__uiscout_routes.includes(abs)) {
        window.__uiscout_routes.push(abs);
      }
    } catch (e) {}
  };
  const origPush = history.pushState.bind(history);
  const origReplace = history.replaceState.bind(history);
  history.pushState = (state, title, url) => {
    if (url != null) record(url);
    return origPush(state, title, url);
  };
  history.replaceState = (state, title, url) => {
    if (url != null) record(url);
    return origReplace(state, title, url);
  };
  return true;
})()
"#;

const COLLECT_ROUTES_JS: &str = r#"
(() => { /* uiscoutRouteCollect */ return window.__uiscout_routes || []; })()
"#;

/// Install the pushState/replaceState hook. Idempotent in-page; failure only
/// means route changes go unobserved for this job.
pub async fn install_route_hook(driver: &dyn PageDriver) {
    if probe(driver, ROUTE_HOOK_JS, "route-hook").await.is_none() {
        debug!("route hook not installed; client-side routes will be missed");
    }
}

/// Read back every route the hook saw since installation.
pub async fn collect_routes(driver: &dyn PageDriver) -> Vec<String> {
    match probe(driver, COLLECT_ROUTES_JS, "route-collect").await {
        Some(value) => serde_json::from_value(value).unwrap_or_default(),
        None => Vec::new(),
    }
}
