//! Phases 7 and 8: sidebar leaf discovery and "view all" triggers.
//!
//! Sidebar anchors carry their target directly; buttons have to be clicked
//! and monitored, since they either navigate (captured as a link), open a
//! modal (extracted in place), or reveal links that phase 12 will pick up.
//! A session-scoped clicked-label cache keeps repeat visits cheap.

use tracing::debug;

use crate::explore::tables::{capture_and_close_modal, poll_click_outcome, ClickOutcome};
use crate::explore::{
    click_record, parse_candidates, probe, DiscoveredLink, Explorer, PhaseFindings,
};
use crate::queue::{ActionRecord, CrawlJob};
use crate::url_norm::to_absolute_url;

const SIDEBAR_PROBE_JS: &str = r#"
(() => { /* uiscoutSidebarProbe */
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
  const containers = document.querySelectorAll('nav, aside, [class*="sidebar"], [class*="side-nav"]');
  for (const container of containers) {
    for (const el of container.querySelectorAll('a, button, [role="button"]')) {
      // Leaves only: expandable group headers belong to the menu phase
      if (el.hasAttribute('aria-expanded') || el.getAttribute('aria-haspopup')) continue;
      const rect = el.getBoundingClientRect();
      if (rect.width === 0 || rect.height === 0) continue;
      const label = (el.getAttribute('aria-label') || el.textContent || '')
        .trim().slice(0, 80);
      if (!label) continue;
      out.push({
        selector: cssPath(el),
        label,
        href: el.tagName === 'A' ? el.getAttribute('href') : null,
      });
    }
  }
  return out;
})()
"#;

const VIEW_ALL_PROBE_JS: &str = r#"
(() => { /* uiscoutViewAllProbe */
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
  for (const el of document.querySelectorAll('a, button, [role="button"]')) {
    const text = (el.textContent || el.getAttribute('aria-label') || '').trim();
    if (!/^(view|see|show)\s+all\b|^(load|view|show)\s+more\b/i.test(text)) continue;
    const rect = el.getBoundingClientRect();
    if (rect.width === 0 || rect.height === 0) continue;
    out.push({
      selector: cssPath(el),
      label: text.slice(0, 80),
      href: el.tagName === 'A' ? el.getAttribute('href') : null,
    });
  }
  return out;
})()
"#;

/// Walk sidebar leaves not clicked before in this session.
pub(crate) async fn discover_sidebar(
    explorer: &Explorer,
    job: &CrawlJob,
    chain: &mut Vec<ActionRecord>,
) -> PhaseFindings {
    let mut findings = PhaseFindings::default();
    let value = match probe(explorer.driver(), SIDEBAR_PROBE_JS, "sidebar").await {
        Some(value) => value,
        None => return findings,
    };
    let mut candidates = parse_candidates(value);
    explorer
        .weights()
        .rank_candidates(&mut candidates, |c| c.label.clone());

    for candidate in candidates {
        if explorer.caches().already_clicked(&candidate.label) {
            continue;
        }
        explorer.caches().mark_clicked(&candidate.label);

        let mut path = job.functional_path.clone();
        path.push(candidate.label.clone());

        // Anchors carry their destination; no click needed
        if let Some(href) = candidate.href.as_deref().filter(|h| !h.is_empty()) {
            match to_absolute_url(href, &job.url) {
                Ok(url) => findings.links.push(DiscoveredLink { url, path }),
                Err(e) => debug!("unresolvable sidebar href {}: {}", href, e),
            }
            continue;
        }

        if let Err(e) = explorer.driver().click(&candidate.selector).await {
            debug!("sidebar click failed ({}): {}", candidate.label, e);
            continue;
        }
        chain.push(click_record(&candidate.selector, &candidate.label, &job.url));

        match poll_click_outcome(explorer, &job.url).await {
            ClickOutcome::Navigated(url) => {
                findings.links.push(DiscoveredLink { url, path });
                explorer.ensure_on(&job.url).await;
            }
            ClickOutcome::Modal { .. } => {
                if let Some(modal) =
                    capture_and_close_modal(explorer, &candidate.label, &job.url).await
                {
                    findings.modals.push(modal);
                }
            }
            // Revealed in-place content is extracted in the DOM pass
            ClickOutcome::NoEffect => {}
        }
    }

    findings
}

/// Probe "view all"/"load more" style triggers that enter a dedicated list
/// view.
pub(crate) async fn discover_view_all(
    explorer: &Explorer,
    job: &CrawlJob,
    chain: &mut Vec<ActionRecord>,
) -> Vec<DiscoveredLink> {
    let mut links = Vec::new();
    let value = match probe(explorer.driver(), VIEW_ALL_PROBE_JS, "view-all").await {
        Some(value) => value,
        None => return links,
    };

    for candidate in parse_candidates(value) {
        let mut path = job.functional_path.clone();
        path.push(candidate.label.clone());

        if let Some(href) = candidate.href.as_deref().filter(|h| !h.is_empty()) {
            if let Ok(url) = to_absolute_url(href, &job.url) {
                links.push(DiscoveredLink { url, path });
            }
            continue;
        }

        if let Err(e) = explorer.driver().click(&candidate.selector).await {
            debug!("view-all click failed ({}): {}", candidate.label, e);
            continue;
        }
        chain.push(click_record(&candidate.selector, &candidate.label, &job.url));

        if let ClickOutcome::Navigated(url) = poll_click_outcome(explorer, &job.url).await {
            links.push(DiscoveredLink { url, path });
            explorer.ensure_on(&job.url).await;
        }
    }

    links
}
