//! URL canonicalization for consistent dedup behavior across modules.
//!
//! The normalized form is the sole dedup key for both the job queue and the
//! visited set, so two URLs that differ only by fragment, alias path, or a
//! trailing slash must normalize identically.

use parking_lot::Mutex;
use std::collections::HashMap;
use url::Url;

/// Canonicalizes URLs and memoizes results per raw input string.
pub struct UrlNormalizer {
    /// Alias paths collapsed to one canonical path (e.g. transitional landing
    /// routes that all redirect to the app root).
    aliases: Vec<(String, String)>,
    memo: Mutex<HashMap<String, String>>,
}

impl UrlNormalizer {
    pub fn new() -> Self {
        Self::with_aliases(vec![
            ("/app/home".to_string(), "/app".to_string()),
            ("/app/landing".to_string(), "/app".to_string()),
        ])
    }

    pub fn with_aliases(aliases: Vec<(String, String)>) -> Self {
        Self {
            aliases,
            memo: Mutex::new(HashMap::new()),
        }
    }

    /// Canonicalize a raw URL. Fail-open: unparseable input is returned
    /// unchanged so a bad link never aborts a crawl.
    pub fn normalize(&self, raw: &str) -> String {
        if let Some(cached) = self.memo.lock().get(raw) {
            return cached.clone();
        }

        let normalized = self.normalize_uncached(raw);
        self.memo.lock().insert(raw.to_string(), normalized.clone());
        normalized
    }

    fn normalize_uncached(&self, raw: &str) -> String {
        let mut parsed = match Url::parse(raw) {
            Ok(u) => u,
            Err(_) => return raw.to_string(),
        };

        parsed.set_fragment(None);

        // Strip one trailing slash unless the path is just "/". This must
        // precede the alias lookup so "/app/home/" hits the "/app/home" alias.
        let path = parsed.path().to_string();
        if path.len() > 1 && path.ends_with('/') {
            parsed.set_path(path.trim_end_matches('/'));
        }

        let path = parsed.path().to_string();
        for (alias, canonical) in &self.aliases {
            if path == *alias {
                parsed.set_path(canonical);
                break;
            }
        }

        parsed.to_string()
    }
}

impl Default for UrlNormalizer {
    fn default() -> Self {
        Self::new()
    }
}

/// Extract the host of a URL, if it parses.
pub fn extract_host(url: &str) -> Option<String> {
    Url::parse(url)
        .ok()
        .and_then(|u| u.host_str().map(|s| s.to_string()))
}

/// True when `url` is on `base_host` (exact host match).
pub fn is_same_host(url: &str, base_host: &str) -> bool {
    extract_host(url).is_some_and(|h| h == base_host)
}

/// Resolve a possibly-relative link against a base URL.
pub fn to_absolute_url(link: &str, base_url: &str) -> Result<String, String> {
    let base = Url::parse(base_url).map_err(|e| e.to_string())?;
    let absolute = base.join(link).map_err(|e| e.to_string())?;
    Ok(absolute.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_strips_fragment() {
        let norm = UrlNormalizer::new();
        assert_eq!(
            norm.normalize("https://x.test/app/users#section"),
            norm.normalize("https://x.test/app/users")
        );
    }

    #[test]
    fn test_idempotent() {
        let norm = UrlNormalizer::new();
        let once = norm.normalize("https://x.test/app/home/#frag");
        let twice = norm.normalize(&once);
        assert_eq!(once, twice);
    }

    #[test]
    fn test_alias_with_trailing_slash_collapses_in_one_pass() {
        let norm = UrlNormalizer::new();
        let once = norm.normalize("https://x.test/app/home/");
        assert_eq!(once, norm.normalize("https://x.test/app"));
        assert_eq!(norm.normalize(&once), once);
    }

    #[test]
    fn test_alias_collapse() {
        let norm = UrlNormalizer::new();
        assert_eq!(
            norm.normalize("https://x.test/app/home"),
            norm.normalize("https://x.test/app")
        );
        assert_eq!(
            norm.normalize("https://x.test/app/landing"),
            norm.normalize("https://x.test/app")
        );
    }

    #[test]
    fn test_trailing_slash() {
        let norm = UrlNormalizer::new();
        assert_eq!(
            norm.normalize("https://x.test/app/"),
            norm.normalize("https://x.test/app")
        );
        // Root path keeps its slash
        assert_eq!(norm.normalize("https://x.test/"), "https://x.test/");
    }

    #[test]
    fn test_alias_and_slash_and_fragment_converge() {
        let norm = UrlNormalizer::new();
        let a = norm.normalize("https://x.test/app/");
        let b = norm.normalize("https://x.test/app");
        let c = norm.normalize("https://x.test/app/home");
        let d = norm.normalize("https://x.test/app#top");
        assert_eq!(a, b);
        assert_eq!(b, c);
        assert_eq!(c, d);
    }

    #[test]
    fn test_unparseable_input_passes_through() {
        let norm = UrlNormalizer::new();
        assert_eq!(norm.normalize("not a url"), "not a url");
    }

    #[test]
    fn test_memo_returns_same_result() {
        let norm = UrlNormalizer::new();
        let first = norm.normalize("https://x.test/app/home");
        let second = norm.normalize("https://x.test/app/home");
        assert_eq!(first, second);
    }

    #[test]
    fn test_extract_host() {
        assert_eq!(
            extract_host("https://example.com/path"),
            Some("example.com".to_string())
        );
        assert_eq!(extract_host("invalid"), None);
    }

    #[test]
    fn test_is_same_host() {
        assert!(is_same_host("https://x.test/a", "x.test"));
        assert!(!is_same_host("https://other.test/a", "x.test"));
        assert!(!is_same_host("garbage", "x.test"));
    }

    #[test]
    fn test_to_absolute_url() {
        assert_eq!(
            to_absolute_url("/page1", "https://x.test/foo").unwrap(),
            "https://x.test/page1"
        );
        assert_eq!(
            to_absolute_url("page1", "https://x.test/foo/").unwrap(),
            "https://x.test/foo/page1"
        );
    }
}
