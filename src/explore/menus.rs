//! Phase 5: expand collapsed menu controls.
//!
//! Clicking a collapsed menu either reveals sub-items in place (picked up by
//! later phases) or navigates away, in which case the landing URL is recorded
//! with the menu label as its breadcrumb and the page returns to the job URL.
//! A session-scoped cache of expanded labels keeps repeat visits from
//! re-clicking known menus, and a cap bounds how many navigations this phase
//! may trigger.

use std::time::Duration;
use tracing::debug;

use crate::config::Config;
use crate::explore::{click_record, parse_candidates, probe, DiscoveredLink, Explorer};
use crate::queue::{ActionRecord, CrawlJob};

const MENU_PROBE_JS: &str = r#"
(() => { /* uiscoutMenuProbe */
  const cssPath = (el) => {
    const parts = [];
    while (el && el.nodeType === 1 && parts.length < 6) {
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
  const candidates = document.querySelectorAll(
    '[aria-expanded="false"], [aria-haspopup="menu"], [aria-haspopup="true"]'
  );
  for (const el of candidates) {
    const rect = el.getBoundingClientRect();
    if (rect.width === 0 || rect.height === 0) continue;
    const label = (el.getAttribute('aria-label') || el.textContent || '')
      .trim().slice(0, 80);
    if (!label) continue;
    out.push({ selector: cssPath(el), label });
  }
  return out;
})()
"#;

/// Expand not-yet-expanded menus, bounded by the navigation cap.
pub async fn expand_menus(
    explorer: &Explorer,
    job: &CrawlJob,
    chain: &mut Vec<ActionRecord>,
) -> Vec<DiscoveredLink> {
    let value = match probe(explorer.driver(), MENU_PROBE_JS, "menu").await {
        Some(value) => value,
        None => return Vec::new(),
    };
    let mut candidates = parse_candidates(value);
    explorer
        .weights()
        .rank_candidates(&mut candidates, |c| c.label.clone());

    let mut links = Vec::new();
    let mut navigations = 0usize;

    for candidate in candidates {
        if explorer.caches().already_expanded(&candidate.label) {
            continue;
        }
        explorer.caches().mark_expanded(&candidate.label);

        if let Err(e) = explorer.driver().click(&candidate.selector).await {
            debug!("menu click failed ({}): {}", candidate.label, e);
            continue;
        }
        chain.push(click_record(&candidate.selector, &candidate.label, &job.url));
        tokio::time::sleep(Duration::from_millis(300)).await;

        let current = match explorer.driver().current_url().await {
            Ok(url) => url,
            Err(_) => continue,
        };
        if current != job.url {
            let mut path = job.functional_path.clone();
            path.push(candidate.label.clone());
            links.push(DiscoveredLink { url: current, path });
            explorer.ensure_on(&job.url).await;

            navigations += 1;
            if navigations >= Config::MENU_NAVIGATION_CAP {
                debug!("menu navigation cap reached, stopping menu expansion");
                break;
            }
        }
    }

    links
}
