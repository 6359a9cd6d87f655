//! Phase 10: pagination discovery.
//!
//! Finds a "next page" control inside a pagination container, either a next
//! button/anchor or a literal "2" page link. The target URL is recorded
//! without navigating; the second page becomes its own job. A bare "2" is
//! only trusted inside a pagination container so numeric content (years,
//! counts) is not mistaken for a page link.

use tracing::debug;

use crate::browser::PageDriver;
use crate::explore::probe;
use crate::url_norm::to_absolute_url;

const PAGINATION_PROBE_JS: &str = r#"
(() => { /* uiscoutPaginationProbe */
  const containers = document.querySelectorAll(
    'nav[aria-label*="agination" i], [class*="pagination"], [class*="pager"], [role="navigation"]'
  );
  for (const container of containers) {
    const next = container.querySelector(
      'a[rel="next"], a[aria-label*="next" i], button[aria-label*="next" i]'
    );
    if (next) {
      const href = next.getAttribute('href');
      if (href) return href;
    }
    for (const a of container.querySelectorAll('a[href]')) {
      // A literal "2" is a page link only here; a four-digit number is a year
      if ((a.textContent || '').trim() === '2') return a.getAttribute('href');
    }
  }
  return null;
})()
"#;

/// Resolve the next-page URL, if the page paginates at all.
pub async fn discover_pagination(driver: &dyn PageDriver, base_url: &str) -> Option<String> {
    let value = probe(driver, PAGINATION_PROBE_JS, "pagination").await?;
    let href = value.as_str()?;
    if href.is_empty() {
        return None;
    }
    match to_absolute_url(href, base_url) {
        Ok(url) => Some(url),
        Err(e) => {
            debug!("unresolvable pagination href {}: {}", href, e);
            None
        }
    }
}
