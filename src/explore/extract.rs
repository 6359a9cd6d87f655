//! Phase 12: full DOM extraction and link filtering.
//!
//! One traversal pulls every interactive element (tag, type, label, geometry,
//! state, key attributes) and every anchor, partitioned into sidebar vs
//! content by DOM ancestry. Links are kept only when they stay on the crawl
//! host and avoid a keyword blocklist; links whose path contains an ID-shaped
//! segment are sampled per structural pattern so a 500-row collection yields
//! a couple of representative detail jobs rather than 500. Links matching an
//! action path (`/new`, `/edit`, `/history`) or coming from the sidebar
//! bypass sampling entirely.

use regex::Regex;
use serde::Deserialize;
use std::collections::HashMap;
use std::sync::OnceLock;
use tracing::debug;

use crate::browser::PageDriver;
use crate::explore::routes;
use crate::explore::{probe, DiscoveredLink, ExtractedElement, Explorer};
use crate::queue::CrawlJob;
use crate::url_norm::{is_same_host, to_absolute_url};

const EXTRACT_PROBE_JS: &str = r#"
(() => { /* uiscoutExtractProbe */
  const elements = [];
  const seen = new Set();
  for (const el of document.querySelectorAll(
    'a, button, input, select, textarea, [role="button"], [onclick]'
  )) {
    if (seen.has(el)) continue;
    seen.add(el);
    const rect = el.getBoundingClientRect();
    elements.push({
      tag: el.tagName.toLowerCase(),
      el_type: el.getAttribute('type'),
      label: (el.getAttribute('aria-label') || el.textContent ||
              el.getAttribute('placeholder') || el.getAttribute('name') || '')
        .trim().slice(0, 80),
      x: rect.x, y: rect.y, width: rect.width, height: rect.height,
      visible: rect.width > 0 && rect.height > 0,
      enabled: !el.disabled,
      in_sidebar: el.closest('nav, aside, [class*="sidebar"]') !== null,
      attributes: {
        id: el.id || '',
        class: el.className && el.className.slice ? el.className.slice(0, 120) : '',
        href: el.getAttribute('href') || '',
        name: el.getAttribute('name') || '',
      },
    });
  }
  const links = [];
  for (const a of document.querySelectorAll('a[href]')) {
    links.push({
      href: a.getAttribute('href'),
      text: (a.textContent || '').trim().slice(0, 80),
      in_sidebar: a.closest('nav, aside, [class*="sidebar"]') !== null,
    });
  }
  return {
    elements, links,
    text: (document.body ? document.body.innerText : '').slice(0, 20000),
  };
})()
"#;

const ERROR_PROBE_JS: &str = r#"
(() => { /* uiscoutErrorProbe */
  let count = 0;
  for (const el of document.querySelectorAll(
    '[role="alert"], [class*="error"], [class*="Error"]'
  )) {
    const rect = el.getBoundingClientRect();
    if (rect.width > 0 && rect.height > 0 && (el.textContent || '').trim()) count++;
  }
  if (/something went wrong|failed to load|an error occurred/i.test(
    document.body ? document.body.innerText : '')) count++;
  return count;
})()
"#;

/// URL substrings that never become crawl jobs.
const LINK_BLOCKLIST: &[&str] = &[
    "logout",
    "signout",
    "sign-out",
    "login",
    "signin",
    "password",
    "mailto:",
    "tel:",
    "javascript:",
    "download",
    "export",
];

#[derive(Debug, Deserialize)]
struct RawLink {
    #[serde(default)]
    href: String,
    #[serde(default)]
    text: String,
    #[serde(default)]
    in_sidebar: bool,
}

#[derive(Debug, Default)]
pub(crate) struct ExtractionResult {
    pub elements: Vec<ExtractedElement>,
    pub links: Vec<DiscoveredLink>,
    pub content_text: String,
}

fn id_segment_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        // UUIDs, Mongo-style 24-hex IDs, long numeric IDs
        Regex::new(
            r"(?i)^([0-9a-f]{8}-[0-9a-f]{4}-[0-9a-f]{4}-[0-9a-f]{4}-[0-9a-f]{12}|[0-9a-f]{24}|\d{5,})$",
        )
        .expect("id segment regex")
    })
}

fn action_path_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"/(new|edit|create|history)(/|$)").expect("action path regex"))
}

/// Caps how many detail links survive per structurally-equivalent path
/// pattern (the path with ID segments replaced by a placeholder).
pub(crate) struct LinkSampler {
    counts: HashMap<String, usize>,
    limit: usize,
}

impl LinkSampler {
    pub fn new(limit: usize) -> Self {
        Self {
            counts: HashMap::new(),
            limit,
        }
    }

    /// The sampling pattern for a URL path, or None when the path carries no
    /// ID-shaped segment and is never sampled.
    pub fn pattern_for(path: &str) -> Option<String> {
        let mut replaced = false;
        let pattern: Vec<String> = path
            .split('/')
            .map(|segment| {
                if id_segment_re().is_match(segment) {
                    replaced = true;
                    ":id".to_string()
                } else {
                    segment.to_string()
                }
            })
            .collect();
        replaced.then(|| pattern.join("/"))
    }

    /// Whether this URL should be kept. Action paths and sidebar links bypass
    /// sampling entirely.
    pub fn admit(&mut self, url: &str, from_sidebar: bool) -> bool {
        let path = match url::Url::parse(url) {
            Ok(parsed) => parsed.path().to_string(),
            Err(_) => return true,
        };
        if from_sidebar || action_path_re().is_match(&path) {
            return true;
        }
        match Self::pattern_for(&path) {
            Some(pattern) => {
                let count = self.counts.entry(pattern).or_insert(0);
                *count += 1;
                *count <= self.limit
            }
            None => true,
        }
    }
}

fn blocklisted(url: &str) -> bool {
    let lower = url.to_lowercase();
    LINK_BLOCKLIST.iter().any(|kw| lower.contains(kw))
}

/// Run the DOM traversal and merge in the routes the phase-2 hook observed.
pub(crate) async fn extract_page(explorer: &Explorer, job: &CrawlJob) -> ExtractionResult {
    let mut result = ExtractionResult::default();

    let value = match probe(explorer.driver(), EXTRACT_PROBE_JS, "extract").await {
        Some(value) => value,
        None => return result,
    };

    result.elements = serde_json::from_value(value["elements"].clone()).unwrap_or_default();
    result.content_text = value["text"].as_str().unwrap_or("").to_string();

    let raw_links: Vec<RawLink> =
        serde_json::from_value(value["links"].clone()).unwrap_or_default();

    let mut sampler = LinkSampler::new(explorer.tuning().uuid_sample_limit);
    for raw in raw_links {
        if raw.href.is_empty() || blocklisted(&raw.href) {
            continue;
        }
        let url = match to_absolute_url(&raw.href, &job.url) {
            Ok(url) => url,
            Err(e) => {
                debug!("unresolvable href {}: {}", raw.href, e);
                continue;
            }
        };
        if blocklisted(&url) || !is_same_host(&url, explorer.base_host()) {
            continue;
        }
        if !sampler.admit(&url, raw.in_sidebar) {
            continue;
        }
        let mut path = job.functional_path.clone();
        if !raw.text.is_empty() {
            path.push(raw.text);
        }
        result.links.push(DiscoveredLink { url, path });
    }

    // Client-side route changes the hook saw get the same filtering, minus
    // sampling bypass (they never come from the sidebar)
    for route in routes::collect_routes(explorer.driver()).await {
        if blocklisted(&route) || !is_same_host(&route, explorer.base_host()) {
            continue;
        }
        if !sampler.admit(&route, false) {
            continue;
        }
        result.links.push(DiscoveredLink {
            url: route,
            path: job.functional_path.clone(),
        });
    }

    result
}

/// Count visible error UI for the scoring phase.
pub(crate) async fn count_error_indicators(driver: &dyn PageDriver) -> usize {
    match probe(driver, ERROR_PROBE_JS, "error-indicator").await {
        Some(value) => value.as_u64().unwrap_or(0) as usize,
        None => 0,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::browser::fake::FakeDriver;
    use crate::capture::CaptureWriter;
    use crate::clock::Clock;
    use crate::config::CrawlerTuning;
    use crate::explore::ExploreCaches;
    use crate::rate_limit::RateLimitCoordinator;
    use crate::url_norm::UrlNormalizer;
    use crate::weights::WeightMap;
    use serde_json::json;
    use std::sync::Arc;
    use tempfile::TempDir;

    fn explorer(driver: Arc<FakeDriver>, dir: &TempDir) -> Explorer {
        Explorer::new(
            driver,
            Arc::new(ExploreCaches::new()),
            Arc::new(WeightMap::empty()),
            Arc::new(RateLimitCoordinator::with_clock(Clock::manual(0))),
            Arc::new(CaptureWriter::new(dir.path(), "x.test")),
            Arc::new(UrlNormalizer::new()),
            "x.test".to_string(),
            CrawlerTuning::default(),
        )
    }

    const UUID_A: &str = "0b9fe887-68ec-4b23-a837-8a9e4a6c1111";
    const UUID_B: &str = "1c8fe887-68ec-4b23-a837-8a9e4a6c2222";
    const UUID_C: &str = "2d7fe887-68ec-4b23-a837-8a9e4a6c3333";

    #[test]
    fn test_pattern_for_replaces_id_segments() {
        assert_eq!(
            LinkSampler::pattern_for(&format!("/app/users/{}", UUID_A)),
            Some("/app/users/:id".to_string())
        );
        assert_eq!(
            LinkSampler::pattern_for("/app/orders/123456/items"),
            Some("/app/orders/:id/items".to_string())
        );
        assert_eq!(LinkSampler::pattern_for("/app/users"), None);
        // Short numbers (years, pages) are not IDs
        assert_eq!(LinkSampler::pattern_for("/app/reports/2024"), None);
    }

    #[test]
    fn test_sampler_caps_per_pattern() {
        let mut sampler = LinkSampler::new(2);
        assert!(sampler.admit(&format!("https://x.test/app/users/{}", UUID_A), false));
        assert!(sampler.admit(&format!("https://x.test/app/users/{}", UUID_B), false));
        assert!(!sampler.admit(&format!("https://x.test/app/users/{}", UUID_C), false));
        // Different pattern starts its own count
        assert!(sampler.admit(&format!("https://x.test/app/orders/{}", UUID_A), false));
    }

    #[test]
    fn test_sampler_bypasses_action_paths_and_sidebar() {
        let mut sampler = LinkSampler::new(1);
        assert!(sampler.admit(&format!("https://x.test/app/users/{}", UUID_A), false));
        // Over the limit, but /edit bypasses sampling
        assert!(sampler.admit(&format!("https://x.test/app/users/{}/edit", UUID_B), false));
        // Over the limit, but sidebar origin bypasses sampling
        assert!(sampler.admit(&format!("https://x.test/app/users/{}", UUID_C), true));
        // Same non-action URL without the bypass is still rejected
        assert!(!sampler.admit(&format!("https://x.test/app/users/{}", UUID_B), false));
    }

    #[tokio::test]
    async fn test_extract_filters_offsite_and_blocklisted_links() {
        let dir = TempDir::new().unwrap();
        let driver = Arc::new(FakeDriver::at("https://x.test/app"));
        driver.script(
            "uiscoutExtractProbe",
            json!({
                "elements": [],
                "links": [
                    {"href": "/app/users", "text": "Users", "in_sidebar": true},
                    {"href": "https://other.example/", "text": "Partner", "in_sidebar": false},
                    {"href": "/logout", "text": "Log out", "in_sidebar": true},
                    {"href": "mailto:team@x.test", "text": "Contact", "in_sidebar": false},
                ],
                "text": "content"
            }),
        );

        let explorer = explorer(Arc::clone(&driver), &dir);
        let result = extract_page(&explorer, &CrawlJob::seed("https://x.test/app")).await;

        assert_eq!(result.links.len(), 1);
        assert_eq!(result.links[0].url, "https://x.test/app/users");
        assert_eq!(result.links[0].path, vec!["Users"]);
    }

    #[tokio::test]
    async fn test_extract_samples_uuid_links() {
        let dir = TempDir::new().unwrap();
        let driver = Arc::new(FakeDriver::at("https://x.test/app"));
        let links: Vec<_> = [UUID_A, UUID_B, UUID_C]
            .iter()
            .map(|id| json!({"href": format!("/app/users/{}", id), "text": "row", "in_sidebar": false}))
            .collect();
        driver.script(
            "uiscoutExtractProbe",
            json!({"elements": [], "links": links, "text": ""}),
        );

        let explorer = explorer(Arc::clone(&driver), &dir);
        let result = extract_page(&explorer, &CrawlJob::seed("https://x.test/app")).await;

        // Default limit is 2 per pattern
        assert_eq!(result.links.len(), 2);
    }

    #[tokio::test]
    async fn test_hooked_routes_merged_into_links() {
        let dir = TempDir::new().unwrap();
        let driver = Arc::new(FakeDriver::at("https://x.test/app"));
        driver.script(
            "uiscoutExtractProbe",
            json!({"elements": [], "links": [], "text": ""}),
        );
        driver.script(
            "uiscoutRouteCollect",
            json!(["https://x.test/app/settings", "https://other.example/escape"]),
        );

        let explorer = explorer(Arc::clone(&driver), &dir);
        let result = extract_page(&explorer, &CrawlJob::seed("https://x.test/app")).await;

        assert_eq!(result.links.len(), 1);
        assert_eq!(result.links[0].url, "https://x.test/app/settings");
    }

    #[tokio::test]
    async fn test_elements_parsed_with_geometry_and_state() {
        let dir = TempDir::new().unwrap();
        let driver = Arc::new(FakeDriver::at("https://x.test/app"));
        driver.script(
            "uiscoutExtractProbe",
            json!({
                "elements": [{
                    "tag": "button", "el_type": "submit", "label": "Save",
                    "x": 10.0, "y": 20.0, "width": 80.0, "height": 32.0,
                    "visible": true, "enabled": false, "in_sidebar": false,
                    "attributes": {"id": "save-btn"}
                }],
                "links": [],
                "text": ""
            }),
        );

        let explorer = explorer(Arc::clone(&driver), &dir);
        let result = extract_page(&explorer, &CrawlJob::seed("https://x.test/app")).await;

        assert_eq!(result.elements.len(), 1);
        let el = &result.elements[0];
        assert_eq!(el.tag, "button");
        assert_eq!(el.el_type.as_deref(), Some("submit"));
        assert!(!el.enabled);
        assert_eq!(el.attributes.get("id").map(String::as_str), Some("save-btn"));
    }

    #[tokio::test]
    async fn test_error_indicator_count() {
        let driver = FakeDriver::at("https://x.test/app");
        driver.script("uiscoutErrorProbe", json!(2));
        assert_eq!(count_error_indicators(&driver).await, 2);

        let bare = FakeDriver::at("https://x.test/app");
        assert_eq!(count_error_indicators(&bare).await, 0);
    }
}
