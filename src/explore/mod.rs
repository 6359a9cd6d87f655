//! Multi-phase page exploration engine.
//!
//! One call to [`Explorer::explore`] runs the ordered discovery phases
//! against the live page for a single job: navigate, hook client-side route
//! changes, settle, capture, expand menus, scroll, walk the sidebar, probe
//! view-all triggers, click representative table rows, find pagination, test
//! global create/edit actions, extract the full DOM, and score the result.
//! Each phase restores the job URL before the next phase runs.
//!
//! Failures inside a phase are logged and treated as "feature not present";
//! only the initial navigation can fail the whole job.

pub mod actions;
pub mod extract;
pub mod menus;
pub mod pagination;
pub mod routes;
pub mod sidebar;
pub mod stability;
pub mod tables;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{HashMap, HashSet};
use std::path::PathBuf;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::browser::PageDriver;
use crate::capture::CaptureWriter;
use crate::config::CrawlerTuning;
use crate::queue::{ActionKind, ActionRecord, CrawlJob};
use crate::rate_limit::RateLimitCoordinator;
use crate::scoring::{screenshot_looks_blank, CaptureSignals, GoldenPathInfo};
use crate::url_norm::UrlNormalizer;
use crate::weights::WeightMap;

#[derive(Error, Debug)]
pub enum ExploreError {
    #[error("navigation failed: {0}")]
    Navigation(String),
}

/// A link found during exploration, tagged with the breadcrumb path active
/// when it was discovered.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DiscoveredLink {
    pub url: String,
    pub path: Vec<String>,
}

/// A modal surfaced by a click, extracted in place and dismissed.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModalDiscovery {
    pub trigger_label: String,
    pub title: String,
    pub elements: Vec<ExtractedElement>,
    pub links: Vec<String>,
}

/// One interactive element pulled from the DOM.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ExtractedElement {
    pub tag: String,
    #[serde(default)]
    pub el_type: Option<String>,
    #[serde(default)]
    pub label: String,
    #[serde(default)]
    pub x: f64,
    #[serde(default)]
    pub y: f64,
    #[serde(default)]
    pub width: f64,
    #[serde(default)]
    pub height: f64,
    #[serde(default)]
    pub visible: bool,
    #[serde(default)]
    pub enabled: bool,
    #[serde(default)]
    pub in_sidebar: bool,
    #[serde(default)]
    pub attributes: HashMap<String, String>,
}

/// Links and modals one phase produced.
#[derive(Debug, Default)]
pub(crate) struct PhaseFindings {
    pub links: Vec<DiscoveredLink>,
    pub modals: Vec<ModalDiscovery>,
}

/// A clickable candidate reported by an in-page probe.
#[derive(Debug, Clone, Deserialize)]
pub(crate) struct Candidate {
    pub selector: String,
    #[serde(default)]
    pub label: String,
    #[serde(default)]
    pub href: Option<String>,
}

/// Everything one job's exploration produced.
#[derive(Debug)]
pub struct ExploreOutcome {
    pub url: String,
    pub final_url: String,
    pub elements: Vec<ExtractedElement>,
    pub links: Vec<DiscoveredLink>,
    pub modals: Vec<ModalDiscovery>,
    pub action_chain: Vec<ActionRecord>,
    pub golden_path: GoldenPathInfo,
    pub signals: CaptureSignals,
    pub content_hash: String,
    pub screenshot_path: Option<PathBuf>,
}

/// Session-scoped caches so repeat visits do not re-click known controls.
/// Owned by the run context, never module-level state; two runs in one
/// process share nothing unless they share this object.
#[derive(Default)]
pub struct ExploreCaches {
    expanded_menus: Mutex<HashSet<String>>,
    clicked_sidebar: Mutex<HashSet<String>>,
}

impl ExploreCaches {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn already_expanded(&self, label: &str) -> bool {
        self.expanded_menus.lock().contains(label)
    }

    pub fn mark_expanded(&self, label: &str) {
        self.expanded_menus.lock().insert(label.to_string());
    }

    pub fn already_clicked(&self, label: &str) -> bool {
        self.clicked_sidebar.lock().contains(label)
    }

    pub fn mark_clicked(&self, label: &str) {
        self.clicked_sidebar.lock().insert(label.to_string());
    }
}

pub struct Explorer {
    driver: Arc<dyn PageDriver>,
    caches: Arc<ExploreCaches>,
    weights: Arc<WeightMap>,
    rate_limit: Arc<RateLimitCoordinator>,
    capture: Arc<CaptureWriter>,
    normalizer: Arc<UrlNormalizer>,
    base_host: String,
    tuning: CrawlerTuning,
}

impl Explorer {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        driver: Arc<dyn PageDriver>,
        caches: Arc<ExploreCaches>,
        weights: Arc<WeightMap>,
        rate_limit: Arc<RateLimitCoordinator>,
        capture: Arc<CaptureWriter>,
        normalizer: Arc<UrlNormalizer>,
        base_host: String,
        tuning: CrawlerTuning,
    ) -> Self {
        Self {
            driver,
            caches,
            weights,
            rate_limit,
            capture,
            normalizer,
            base_host,
            tuning,
        }
    }

    pub(crate) fn driver(&self) -> &dyn PageDriver {
        self.driver.as_ref()
    }

    pub(crate) fn caches(&self) -> &ExploreCaches {
        &self.caches
    }

    pub(crate) fn weights(&self) -> &WeightMap {
        &self.weights
    }

    pub(crate) fn capture(&self) -> &CaptureWriter {
        &self.capture
    }

    pub(crate) fn base_host(&self) -> &str {
        &self.base_host
    }

    pub(crate) fn tuning(&self) -> &CrawlerTuning {
        &self.tuning
    }

    /// Run all phases for one job.
    pub async fn explore(&self, job: &CrawlJob) -> Result<ExploreOutcome, ExploreError> {
        let target = job.url.clone();

        // Phase 1: navigate. The only phase allowed to fail the job.
        self.rate_limit.wait_if_limited().await;
        self.driver
            .navigate(&target)
            .await
            .map_err(|e| ExploreError::Navigation(e.to_string()))?;

        let mut chain = job.action_chain.clone();
        chain.push(nav_record(&target));

        // Phase 2: hook client-side route changes before anything mutates
        routes::install_route_hook(self.driver()).await;

        // Phase 3: settle
        let stability = stability::wait_for_stability(self.driver()).await;

        // Phase 4: early capture of the settled state
        let (screenshot_path, blank) = match self.driver.screenshot().await {
            Ok(png) => {
                let blank = screenshot_looks_blank(&png);
                let path = self.capture.write_screenshot(&target, "early", &png);
                (path, blank)
            }
            Err(e) => {
                warn!("early screenshot failed for {}: {}", target, e);
                (None, true)
            }
        };

        let mut links: Vec<DiscoveredLink> = Vec::new();
        let mut modals: Vec<ModalDiscovery> = Vec::new();

        // Phase 5: expand collapsed menus
        let menu = menus::expand_menus(self, job, &mut chain).await;
        links.extend(menu);
        self.ensure_on(&target).await;

        // Phase 6: trigger lazy-loaded content
        stability::auto_scroll(self.driver()).await;

        // Phase 7: sidebar leaves
        let side = sidebar::discover_sidebar(self, job, &mut chain).await;
        links.extend(side.links);
        modals.extend(side.modals);
        self.ensure_on(&target).await;

        // Phase 8: view-all / load-more triggers
        let view_all = sidebar::discover_view_all(self, job, &mut chain).await;
        links.extend(view_all);
        self.ensure_on(&target).await;

        // Phase 9: representative table rows
        let table = tables::explore_tables(self, job, &mut chain).await;
        links.extend(table.links);
        modals.extend(table.modals);
        self.ensure_on(&target).await;

        // Phase 10: pagination target, recorded without navigating
        if let Some(url) = pagination::discover_pagination(self.driver(), &target).await {
            let mut path = job.functional_path.clone();
            path.push("Pagination".to_string());
            links.push(DiscoveredLink { url, path });
        }

        // Phase 11: global create/edit actions
        let global = actions::test_global_actions(self, job, &mut chain).await;
        links.extend(global.links);
        modals.extend(global.modals);
        self.ensure_on(&target).await;

        // Phase 12: full DOM extraction, including hooked routes
        let extraction = extract::extract_page(self, job).await;
        links.extend(extraction.links);

        let links = dedup_links(links, &self.normalizer);

        // Phase 13: score
        let error_indicators = extract::count_error_indicators(self.driver()).await;
        let has_actionable = extraction
            .elements
            .iter()
            .any(|e| e.visible && e.enabled && !e.label.trim().is_empty());
        let signals = CaptureSignals {
            blank_screenshot: blank,
            loading_indicators: stability.loading_indicators,
            error_indicators,
            broken_resources: 0,
            element_count: extraction.elements.len(),
            has_actionable_content: has_actionable,
        };
        let golden_path = GoldenPathInfo::evaluate(&signals);

        let content_hash = CaptureWriter::content_hash(&extraction.content_text);
        let final_url = self
            .driver
            .current_url()
            .await
            .unwrap_or_else(|_| target.clone());

        info!(
            "explored {} ({} elements, {} links, {} modals, confidence {:.2})",
            target,
            extraction.elements.len(),
            links.len(),
            modals.len(),
            golden_path.confidence
        );

        Ok(ExploreOutcome {
            url: target,
            final_url,
            elements: extraction.elements,
            links,
            modals,
            action_chain: chain,
            golden_path,
            signals,
            content_hash,
            screenshot_path,
        })
    }

    /// Navigate back to the job URL if a phase wandered off it.
    pub(crate) async fn ensure_on(&self, target: &str) {
        let current = match self.driver.current_url().await {
            Ok(url) => url,
            Err(e) => {
                debug!("cannot read current URL: {}", e);
                return;
            }
        };
        if self.normalizer.normalize(&current) == self.normalizer.normalize(target) {
            return;
        }
        self.rate_limit.wait_if_limited().await;
        if let Err(e) = self.driver.navigate(target).await {
            warn!("failed to restore {} after phase: {}", target, e);
        }
    }
}

// ============================================================================
// SHARED PHASE HELPERS
// ============================================================================

/// Evaluate a probe; any failure or null result means "feature not present".
pub(crate) async fn probe(driver: &dyn PageDriver, js: &str, context: &str) -> Option<Value> {
    match driver.evaluate(js).await {
        Ok(Value::Null) => None,
        Ok(value) => Some(value),
        Err(e) => {
            debug!("{} probe failed: {}", context, e);
            None
        }
    }
}

/// Parse a probe result into candidates, tolerating malformed entries.
pub(crate) fn parse_candidates(value: Value) -> Vec<Candidate> {
    serde_json::from_value(value).unwrap_or_default()
}

pub(crate) fn now_ms() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

pub(crate) fn nav_record(url: &str) -> ActionRecord {
    ActionRecord {
        kind: ActionKind::Nav,
        selector: String::new(),
        label: "navigate".to_string(),
        timestamp_ms: now_ms(),
        url: url.to_string(),
    }
}

pub(crate) fn click_record(selector: &str, label: &str, url: &str) -> ActionRecord {
    ActionRecord {
        kind: ActionKind::Click,
        selector: selector.to_string(),
        label: label.to_string(),
        timestamp_ms: now_ms(),
        url: url.to_string(),
    }
}

fn dedup_links(links: Vec<DiscoveredLink>, normalizer: &UrlNormalizer) -> Vec<DiscoveredLink> {
    let mut seen = HashSet::new();
    let mut out = Vec::with_capacity(links.len());
    for link in links {
        // First provenance wins
        if seen.insert(normalizer.normalize(&link.url)) {
            out.push(link);
        }
    }
    out
}
