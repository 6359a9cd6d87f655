//! Phase 9: representative table-row clicks, plus the shared click-outcome
//! polling and modal extraction used by the sidebar and global-action phases.
//!
//! For each table/grid/list the probe picks one non-header row and a target
//! inside it by priority: a real link, then an explicit view/edit/detail
//! action button, then a secondary cell, then the row itself. The click is
//! monitored for either a modal (extracted and dismissed) or a URL change
//! (captured as a detail snapshot, then return), bounded by a fixed number of
//! polling attempts after which the click is treated as having no effect.

use std::collections::HashSet;
use std::time::Duration;
use tracing::debug;

use crate::config::Config;
use crate::explore::{
    click_record, parse_candidates, probe, DiscoveredLink, Explorer, ModalDiscovery, PhaseFindings,
};
use crate::queue::{ActionRecord, CrawlJob};

const TABLE_PROBE_JS: &str = r#"
(() => { /* uiscoutTableProbe */
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
  const isHeaderish = (row) =>
    row.querySelector('th') !== null ||
    row.closest('thead') !== null ||
    (row.getAttribute('role') || '') === 'columnheader';

  const out = [];
  const containers = document.querySelectorAll(
    'table, [role="grid"], [role="table"], ul[class*="list"], div[class*="data-grid"]'
  );
  for (const container of containers) {
    const rows = container.querySelectorAll('tr, [role="row"], li');
    for (const row of rows) {
      if (isHeaderish(row)) continue;
      const rect = row.getBoundingClientRect();
      if (rect.width === 0 || rect.height === 0) continue;
      const text = (row.textContent || '').trim().slice(0, 80);
      if (!text) continue;

      // In-row target priority: link > action button > secondary cell > row
      let target = row.querySelector('a[href]');
      if (!target) {
        target = Array.from(row.querySelectorAll('button, [role="button"]')).find(b =>
          /view|edit|detail|open|show/i.test(b.textContent || b.getAttribute('aria-label') || ''));
      }
      if (!target) {
        const cells = row.querySelectorAll('td, [role="cell"], [role="gridcell"]');
        if (cells.length > 1) target = cells[1];
      }
      if (!target) target = row;

      out.push({ selector: cssPath(target), label: text });
      break; // one representative row per container
    }
  }
  return out;
})()
"#;

const MODAL_PROBE_JS: &str = r#"
(() => { /* uiscoutModalProbe */
  const modal = document.querySelector(
    '[role="dialog"], [aria-modal="true"], .modal.show, .MuiDialog-root'
  );
  if (!modal) return { open: false, title: '' };
  const rect = modal.getBoundingClientRect();
  if (rect.width === 0 || rect.height === 0) return { open: false, title: '' };
  const heading = modal.querySelector('h1, h2, h3, [class*="title"]');
  return { open: true, title: (heading ? heading.textContent : '').trim().slice(0, 120) };
})()
"#;

const MODAL_EXTRACT_JS: &str = r#"
(() => { /* uiscoutModalExtract */
  const modal = document.querySelector(
    '[role="dialog"], [aria-modal="true"], .modal.show, .MuiDialog-root'
  );
  if (!modal) return null;
  const heading = modal.querySelector('h1, h2, h3, [class*="title"]');
  const elements = [];
  for (const el of modal.querySelectorAll('a, button, input, select, textarea, [role="button"]')) {
    const rect = el.getBoundingClientRect();
    elements.push({
      tag: el.tagName.toLowerCase(),
      el_type: el.getAttribute('type'),
      label: (el.getAttribute('aria-label') || el.textContent || el.getAttribute('placeholder') || '')
        .trim().slice(0, 80),
      x: rect.x, y: rect.y, width: rect.width, height: rect.height,
      visible: rect.width > 0 && rect.height > 0,
      enabled: !el.disabled,
      in_sidebar: false,
      attributes: {},
    });
  }
  const links = [];
  for (const a of modal.querySelectorAll('a[href]')) {
    links.push(a.href);
  }
  return {
    title: (heading ? heading.textContent : '').trim().slice(0, 120),
    elements, links,
  };
})()
"#;

const MODAL_CLOSE_JS: &str = r#"
(() => { /* uiscoutModalClose */
  const modal = document.querySelector(
    '[role="dialog"], [aria-modal="true"], .modal.show, .MuiDialog-root'
  );
  if (!modal) return true;
  const close = modal.querySelector(
    '[aria-label="Close"], [aria-label="close"], .close, [class*="close"]'
  );
  if (close) { close.click(); return true; }
  document.dispatchEvent(new KeyboardEvent('keydown', { key: 'Escape', bubbles: true }));
  return true;
})()
"#;

/// What a monitored click resolved to.
#[derive(Debug, PartialEq)]
pub(crate) enum ClickOutcome {
    Modal { title: String },
    Navigated(String),
    NoEffect,
}

/// Poll for a modal or a URL change after a click, giving up after a fixed
/// number of attempts.
pub(crate) async fn poll_click_outcome(explorer: &Explorer, original_url: &str) -> ClickOutcome {
    for _ in 0..Config::CLICK_POLL_ATTEMPTS {
        if let Some(value) = probe(explorer.driver(), MODAL_PROBE_JS, "modal").await {
            if value["open"].as_bool().unwrap_or(false) {
                return ClickOutcome::Modal {
                    title: value["title"].as_str().unwrap_or("").to_string(),
                };
            }
        }
        if let Ok(current) = explorer.driver().current_url().await {
            if current != original_url {
                return ClickOutcome::Navigated(current);
            }
        }
        tokio::time::sleep(Duration::from_millis(Config::CLICK_POLL_INTERVAL_MS)).await;
    }
    ClickOutcome::NoEffect
}

/// Extract the open modal's title, elements, and links, screenshot it, and
/// dismiss it.
pub(crate) async fn capture_and_close_modal(
    explorer: &Explorer,
    trigger_label: &str,
    page_url: &str,
) -> Option<ModalDiscovery> {
    let value = probe(explorer.driver(), MODAL_EXTRACT_JS, "modal-extract").await?;

    if let Ok(png) = explorer.driver().screenshot().await {
        explorer.capture().write_screenshot(page_url, "modal", &png);
    }

    let title = value["title"].as_str().unwrap_or("").to_string();
    let elements = serde_json::from_value(value["elements"].clone()).unwrap_or_default();
    let links = serde_json::from_value(value["links"].clone()).unwrap_or_default();

    let _ = probe(explorer.driver(), MODAL_CLOSE_JS, "modal-close").await;

    Some(ModalDiscovery {
        trigger_label: trigger_label.to_string(),
        title,
        elements,
        links,
    })
}

/// Click one representative row per table, capturing whatever it opens.
pub(crate) async fn explore_tables(
    explorer: &Explorer,
    job: &CrawlJob,
    chain: &mut Vec<ActionRecord>,
) -> PhaseFindings {
    let mut findings = PhaseFindings::default();
    let value = match probe(explorer.driver(), TABLE_PROBE_JS, "table").await {
        Some(value) => value,
        None => return findings,
    };

    // Row texts clicked within this job, so identical rows across tables are
    // not clicked twice
    let mut clicked_texts: HashSet<String> = HashSet::new();

    for candidate in parse_candidates(value) {
        if !clicked_texts.insert(candidate.label.clone()) {
            continue;
        }

        if let Err(e) = explorer.driver().click(&candidate.selector).await {
            debug!("row click failed ({}): {}", candidate.label, e);
            continue;
        }
        chain.push(click_record(&candidate.selector, &candidate.label, &job.url));

        match poll_click_outcome(explorer, &job.url).await {
            ClickOutcome::Modal { title } => {
                if let Some(mut modal) =
                    capture_and_close_modal(explorer, &candidate.label, &job.url).await
                {
                    if modal.title.is_empty() {
                        modal.title = title;
                    }
                    findings.modals.push(modal);
                }
            }
            ClickOutcome::Navigated(url) => {
                // Full detail-page snapshot before returning
                if let Ok(png) = explorer.driver().screenshot().await {
                    explorer.capture().write_screenshot(&url, "detail", &png);
                }
                let mut path = job.functional_path.clone();
                path.push(candidate.label.clone());
                findings.links.push(DiscoveredLink { url, path });
                explorer.ensure_on(&job.url).await;
            }
            ClickOutcome::NoEffect => {
                debug!("row click had no observable effect: {}", candidate.label);
            }
        }
    }

    findings
}
