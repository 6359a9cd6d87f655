//! Phase 11: global create/edit action buttons.
//!
//! Page-level action buttons (not row actions) are ranked so creation
//! keywords come before edit keywords, with the learned weight map breaking
//! ties, and a bounded number are actually clicked to see whether they open a
//! modal or navigate to a form.

use tracing::debug;

use crate::config::Config;
use crate::explore::tables::{capture_and_close_modal, poll_click_outcome, ClickOutcome};
use crate::explore::{
    click_record, parse_candidates, probe, Candidate, DiscoveredLink, Explorer, PhaseFindings,
};
use crate::queue::{ActionRecord, CrawlJob};

const ACTION_PROBE_JS: &str = r#"
(() => { /* uiscoutActionProbe */
  const cssPath = (el) => {
    const parts = [];
    while (el && el.nodeType === 1 && parts.length < 8) {
      let part = el.tagName.toLowerCase();
      if (el.id) { parts.unshift(part + '#' + CSS.escape(el.id)); break; }
      const siblings = el.parentNode
        ? Array.from(el.parentNode.children).filter(c => c.tagName === el.tagName)
        : [];
      if (siblings.length > 1) {
        part += ':nth-of-type(' + (siblings.indexOf(el) + 1) + ')';
      }
      parts.unshift(part);
      el = el.parentNode;
    }
    return parts.join(' > ');
  };
  const out = [];
  for (const el of document.querySelectorAll('button, a, [role="button"]')) {
    // Row-level actions belong to the table phase
    if (el.closest('tr, [role="row"]')) continue;
    const text = (el.textContent || el.getAttribute('aria-label') || '').trim();
    if (!/\b(create|add|new|edit|update|manage)\b/i.test(text)) continue;
    const rect = el.getBoundingClientRect();
    if (rect.width === 0 || rect.height === 0) continue;
    out.push({ selector: cssPath(el), label: text.slice(0, 80) });
  }
  return out;
})()
"#;

const CREATE_KEYWORDS: &[&str] = &["create", "add", "new"];
const EDIT_KEYWORDS: &[&str] = &["edit", "update", "manage"];

/// Lower rank sorts first: creation actions, then edit actions, then the
/// rest.
pub(crate) fn keyword_rank(label: &str) -> u8 {
    let lower = label.to_lowercase();
    if CREATE_KEYWORDS.iter().any(|kw| lower.contains(kw)) {
        0
    } else if EDIT_KEYWORDS.iter().any(|kw| lower.contains(kw)) {
        1
    } else {
        2
    }
}

pub(crate) fn rank_actions(explorer: &Explorer, candidates: &mut [Candidate]) {
    candidates.sort_by(|a, b| {
        keyword_rank(&a.label).cmp(&keyword_rank(&b.label)).then(
            explorer
                .weights()
                .weight_for(&b.label)
                .partial_cmp(&explorer.weights().weight_for(&a.label))
                .unwrap_or(std::cmp::Ordering::Equal),
        )
    });
}

/// Test a bounded number of global actions for a modal or a navigation.
pub(crate) async fn test_global_actions(
    explorer: &Explorer,
    job: &CrawlJob,
    chain: &mut Vec<ActionRecord>,
) -> PhaseFindings {
    let mut findings = PhaseFindings::default();
    let value = match probe(explorer.driver(), ACTION_PROBE_JS, "global-action").await {
        Some(value) => value,
        None => return findings,
    };
    let mut candidates = parse_candidates(value);
    rank_actions(explorer, &mut candidates);

    for candidate in candidates.into_iter().take(Config::GLOBAL_ACTION_TEST_CAP) {
        if let Err(e) = explorer.driver().click(&candidate.selector).await {
            debug!("action click failed ({}): {}", candidate.label, e);
            continue;
        }
        chain.push(click_record(&candidate.selector, &candidate.label, &job.url));

        match poll_click_outcome(explorer, &job.url).await {
            ClickOutcome::Modal { .. } => {
                if let Some(modal) =
                    capture_and_close_modal(explorer, &candidate.label, &job.url).await
                {
                    findings.modals.push(modal);
                }
            }
            ClickOutcome::Navigated(url) => {
                let mut path = job.functional_path.clone();
                path.push(candidate.label.clone());
                findings.links.push(DiscoveredLink { url, path });
                explorer.ensure_on(&job.url).await;
            }
            ClickOutcome::NoEffect => {}
        }
    }

    findings
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

    fn explorer(driver: Arc<FakeDriver>, weights: WeightMap, dir: &TempDir) -> Explorer {
        Explorer::new(
            driver,
            Arc::new(ExploreCaches::new()),
            Arc::new(weights),
            Arc::new(RateLimitCoordinator::with_clock(Clock::manual(0))),
            Arc::new(CaptureWriter::new(dir.path(), "x.test")),
            Arc::new(UrlNormalizer::new()),
            "x.test".to_string(),
            CrawlerTuning::default(),
        )
    }

    #[test]
    fn test_keyword_rank_orders_create_before_edit() {
        assert_eq!(keyword_rank("Create User"), 0);
        assert_eq!(keyword_rank("Add Member"), 0);
        assert_eq!(keyword_rank("New Invoice"), 0);
        assert_eq!(keyword_rank("Edit Profile"), 1);
        assert_eq!(keyword_rank("Manage Team"), 1);
        assert_eq!(keyword_rank("Something Else"), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_creation_actions_tested_first_and_capped() {
        let dir = TempDir::new().unwrap();
        let driver = Arc::new(FakeDriver::at("https://x.test/app"));
        driver.script(
            "uiscoutActionProbe",
            json!([
                {"selector": "main > button:nth-of-type(1)", "label": "Edit Settings"},
                {"selector": "main > button:nth-of-type(2)", "label": "Create User"},
                {"selector": "main > button:nth-of-type(3)", "label": "Manage Roles"},
                {"selector": "main > button:nth-of-type(4)", "label": "Add Team"},
            ]),
        );

        let explorer = explorer(Arc::clone(&driver), WeightMap::empty(), &dir);
        let mut chain = Vec::new();
        test_global_actions(&explorer, &CrawlJob::seed("https://x.test/app"), &mut chain).await;

        let clicks = driver.clicks.lock().clone();
        assert_eq!(clicks.len(), Config::GLOBAL_ACTION_TEST_CAP);
        // Both creation actions come before any edit action
        assert_eq!(clicks[0], "main > button:nth-of-type(2)");
        assert_eq!(clicks[1], "main > button:nth-of-type(4)");
    }

    #[tokio::test(start_paused = true)]
    async fn test_action_opening_modal_is_captured() {
        let dir = TempDir::new().unwrap();
        let driver = Arc::new(FakeDriver::at("https://x.test/app"));
        driver.script(
            "uiscoutActionProbe",
            json!([{"selector": "main > button", "label": "Create User"}]),
        );
        driver.script("uiscoutModalProbe", json!({"open": true, "title": "New User"}));
        driver.script(
            "uiscoutModalExtract",
            json!({"title": "New User", "elements": [], "links": []}),
        );

        let explorer = explorer(Arc::clone(&driver), WeightMap::empty(), &dir);
        let mut chain = Vec::new();
        let findings =
            test_global_actions(&explorer, &CrawlJob::seed("https://x.test/app"), &mut chain).await;

        assert_eq!(findings.modals.len(), 1);
        assert_eq!(findings.modals[0].title, "New User");
        assert_eq!(findings.modals[0].trigger_label, "Create User");
    }

    #[tokio::test(start_paused = true)]
    async fn test_action_navigating_records_link_and_returns() {
        let dir = TempDir::new().unwrap();
        let driver = Arc::new(FakeDriver::at("https://x.test/app"));
        driver.script(
            "uiscoutActionProbe",
            json!([{"selector": "main > a", "label": "New Invoice"}]),
        );
        driver
            .click_navigates_to
            .lock()
            .push_back("https://x.test/app/invoices/new".to_string());

        let explorer = explorer(Arc::clone(&driver), WeightMap::empty(), &dir);
        let mut chain = Vec::new();
        let findings =
            test_global_actions(&explorer, &CrawlJob::seed("https://x.test/app"), &mut chain).await;

        assert_eq!(findings.links.len(), 1);
        assert_eq!(findings.links[0].url, "https://x.test/app/invoices/new");
        assert_eq!(findings.links[0].path, vec!["New Invoice"]);
        assert_eq!(driver.nav_log.lock().last().unwrap(), "https://x.test/app");
    }
}
