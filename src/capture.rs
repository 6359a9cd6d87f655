//! Per-page artifacts: screenshots and the JSON record downstream tooling
//! (regression baselines, dashboard) reads.
//!
//! Artifact I/O failures are logged and skipped; they never abort a run.

use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

use crate::queue::ActionRecord;
use crate::scoring::ReliabilityScore;

/// Collaborator-facing record, one per capture.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PageRecord {
    pub url: String,
    pub timestamp: String,
    pub hash: String,
    pub functional_path: Vec<String>,
    pub reliability_score: f64,
    pub contamination_reasons: Vec<String>,
    pub action_chain: Vec<ActionRecord>,
    pub element_count: usize,
}

pub struct CaptureWriter {
    screens_dir: PathBuf,
    records_dir: PathBuf,
    counter: std::sync::atomic::AtomicU64,
}

impl CaptureWriter {
    /// Artifacts land under `<output>/<domain>/screens` and
    /// `<output>/<domain>/records`.
    pub fn new<P: AsRef<Path>>(output_dir: P, domain: &str) -> Self {
        let safe_domain = domain.replace(['/', ':'], "_");
        let base = output_dir.as_ref().join(safe_domain);
        Self {
            screens_dir: base.join("screens"),
            records_dir: base.join("records"),
            counter: std::sync::atomic::AtomicU64::new(0),
        }
    }

    pub fn records_dir(&self) -> &Path {
        &self.records_dir
    }

    /// Hash of the capture's extracted content, used for change detection by
    /// the regression pipeline.
    pub fn content_hash(content: &str) -> String {
        blake3::hash(content.as_bytes()).to_hex().to_string()
    }

    fn slug_for(url: &str) -> String {
        let trimmed = url
            .trim_start_matches("https://")
            .trim_start_matches("http://");
        let mut slug: String = trimmed
            .chars()
            .map(|c| if c.is_ascii_alphanumeric() { c } else { '_' })
            .collect();
        slug.truncate(80);
        slug
    }

    /// Write a screenshot; returns the path or None on failure (logged).
    pub fn write_screenshot(&self, url: &str, label: &str, png: &[u8]) -> Option<PathBuf> {
        if let Err(e) = std::fs::create_dir_all(&self.screens_dir) {
            warn!("cannot create screenshot dir: {}", e);
            return None;
        }
        let seq = self
            .counter
            .fetch_add(1, std::sync::atomic::Ordering::SeqCst);
        let path = self
            .screens_dir
            .join(format!("{:05}-{}-{}.png", seq, Self::slug_for(url), label));
        match std::fs::write(&path, png) {
            Ok(()) => {
                debug!("screenshot saved: {}", path.display());
                Some(path)
            }
            Err(e) => {
                warn!("failed to write screenshot {}: {}", path.display(), e);
                None
            }
        }
    }

    /// Write the per-page JSON record; returns the path or None on failure.
    pub fn write_record(&self, record: &PageRecord) -> Option<PathBuf> {
        if let Err(e) = std::fs::create_dir_all(&self.records_dir) {
            warn!("cannot create records dir: {}", e);
            return None;
        }
        let path = self
            .records_dir
            .join(format!("{}.json", Self::slug_for(&record.url)));
        let json = match serde_json::to_string_pretty(record) {
            Ok(json) => json,
            Err(e) => {
                warn!("failed to serialize record for {}: {}", record.url, e);
                return None;
            }
        };
        match std::fs::write(&path, json) {
            Ok(()) => Some(path),
            Err(e) => {
                warn!("failed to write record {}: {}", path.display(), e);
                None
            }
        }
    }

    pub fn build_record(
        url: &str,
        content_hash: &str,
        functional_path: &[String],
        reliability: &ReliabilityScore,
        action_chain: &[ActionRecord],
        element_count: usize,
    ) -> PageRecord {
        PageRecord {
            url: url.to_string(),
            timestamp: Utc::now().to_rfc3339(),
            hash: content_hash.to_string(),
            functional_path: functional_path.to_vec(),
            reliability_score: reliability.score,
            contamination_reasons: reliability.reasons.clone(),
            action_chain: action_chain.to_vec(),
            element_count,
        }
    }
}

/// Run-level trace artifact, flushed on stop regardless of how the run ended.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct RunTrace {
    pub start_url: String,
    pub started_at: String,
    pub finished_at: String,
    pub pages_processed: usize,
    pub pages_failed: usize,
    pub urls_discovered: usize,
    pub stop_reason: String,
    pub job_log: Vec<TraceEntry>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TraceEntry {
    pub url: String,
    pub depth: u32,
    pub outcome: String,
    pub duration_ms: u64,
}

impl RunTrace {
    pub fn write<P: AsRef<Path>>(&self, output_dir: P) -> Option<PathBuf> {
        let dir = output_dir.as_ref();
        if let Err(e) = std::fs::create_dir_all(dir) {
            warn!("cannot create trace dir: {}", e);
            return None;
        }
        let path = dir.join(format!(
            "trace-{}.json",
            Utc::now().format("%Y%m%dT%H%M%S")
        ));
        let json = match serde_json::to_string_pretty(self) {
            Ok(json) => json,
            Err(e) => {
                warn!("failed to serialize run trace: {}", e);
                return None;
            }
        };
        match std::fs::write(&path, json) {
            Ok(()) => Some(path),
            Err(e) => {
                warn!("failed to write trace {}: {}", path.display(), e);
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_record_round_trip_feeds_prescan_fields() {
        let dir = TempDir::new().unwrap();
        let writer = CaptureWriter::new(dir.path(), "x.test");

        let reliability = ReliabilityScore {
            score: 0.9,
            reasons: vec![],
        };
        let record = CaptureWriter::build_record(
            "https://x.test/app/users",
            "abc123",
            &["Dashboard".to_string(), "Users".to_string()],
            &reliability,
            &[],
            17,
        );
        let path = writer.write_record(&record).unwrap();

        let raw = std::fs::read_to_string(path).unwrap();
        let parsed: PageRecord = serde_json::from_str(&raw).unwrap();
        assert_eq!(parsed.url, "https://x.test/app/users");
        assert_eq!(parsed.element_count, 17);
        assert_eq!(parsed.functional_path, vec!["Dashboard", "Users"]);
    }

    #[test]
    fn test_screenshot_written_with_sequence() {
        let dir = TempDir::new().unwrap();
        let writer = CaptureWriter::new(dir.path(), "x.test");

        let a = writer
            .write_screenshot("https://x.test/app", "early", &[1, 2, 3])
            .unwrap();
        let b = writer
            .write_screenshot("https://x.test/app", "detail", &[4, 5, 6])
            .unwrap();
        assert_ne!(a, b);
        assert!(a.file_name().unwrap().to_str().unwrap().starts_with("00000"));
    }

    #[test]
    fn test_content_hash_stable() {
        assert_eq!(
            CaptureWriter::content_hash("hello"),
            CaptureWriter::content_hash("hello")
        );
        assert_ne!(
            CaptureWriter::content_hash("hello"),
            CaptureWriter::content_hash("world")
        );
    }

    #[test]
    fn test_trace_written() {
        let dir = TempDir::new().unwrap();
        let trace = RunTrace {
            start_url: "https://x.test/app".to_string(),
            stop_reason: "queue-exhausted".to_string(),
            ..Default::default()
        };
        let path = trace.write(dir.path()).unwrap();
        assert!(path.exists());
    }
}
