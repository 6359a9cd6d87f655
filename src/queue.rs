//! Frontier for the crawl: FIFO job queue plus visited set, with a per-domain
//! JSON checkpoint and a pre-scan that seeds the visited set from a prior
//! run's healthy captures.

use serde::{Deserialize, Serialize};
use std::collections::{HashSet, VecDeque};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::json_utils;
use crate::url_norm::UrlNormalizer;

#[derive(Error, Debug)]
pub enum QueueError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("checkpoint serialization error: {0}")]
    Serialization(String),
}

/// One interaction step on the way to a URL. Append-only; array order is
/// chronological order.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ActionRecord {
    #[serde(rename = "type")]
    pub kind: ActionKind,
    pub selector: String,
    pub label: String,
    pub timestamp_ms: u64,
    pub url: String,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ActionKind {
    Click,
    Nav,
    Input,
}

/// A unit of crawl work. Consumed exactly once; successors are new jobs with
/// copied (never shared) history.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CrawlJob {
    pub url: String,
    pub depth: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_url: Option<String>,
    #[serde(default)]
    pub action_chain: Vec<ActionRecord>,
    #[serde(default)]
    pub functional_path: Vec<String>,
}

impl CrawlJob {
    pub fn seed(url: &str) -> Self {
        Self {
            url: url.to_string(),
            depth: 0,
            source_url: None,
            action_chain: Vec::new(),
            functional_path: Vec::new(),
        }
    }

    /// Descendant job one level deeper, inheriting this job's action history
    /// and carrying the breadcrumb path the link was discovered under.
    pub fn descend(&self, url: &str, functional_path: Vec<String>) -> Self {
        Self {
            url: url.to_string(),
            depth: self.depth + 1,
            source_url: Some(self.url.clone()),
            action_chain: self.action_chain.clone(),
            functional_path,
        }
    }
}

/// Durable snapshot of the frontier, one per target domain. Loading replaces
/// in-memory state wholesale; it is never merged.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Checkpoint {
    pub domain: String,
    pub timestamp_ms: u64,
    pub queue: Vec<CrawlJob>,
    pub visited_urls: Vec<String>,
}

pub struct CrawlQueue {
    domain: String,
    queue: VecDeque<CrawlJob>,
    visited: HashSet<String>,
    normalizer: Arc<UrlNormalizer>,
    checkpoint_dir: PathBuf,
}

impl CrawlQueue {
    pub fn new<P: AsRef<Path>>(
        domain: &str,
        checkpoint_dir: P,
        normalizer: Arc<UrlNormalizer>,
    ) -> Self {
        Self {
            domain: domain.to_string(),
            queue: VecDeque::new(),
            visited: HashSet::new(),
            normalizer,
            checkpoint_dir: checkpoint_dir.as_ref().to_path_buf(),
        }
    }

    pub fn len(&self) -> usize {
        self.queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    pub fn visited_count(&self) -> usize {
        self.visited.len()
    }

    /// FIFO pop.
    pub fn next_job(&mut self) -> Option<CrawlJob> {
        self.queue.pop_front()
    }

    /// Enqueue candidates, skipping anything already visited or already
    /// queued (normalized comparison). Returns how many were added.
    pub fn add_jobs(&mut self, jobs: Vec<CrawlJob>) -> usize {
        let mut added = 0;
        for job in jobs {
            let key = self.normalizer.normalize(&job.url);
            if self.visited.contains(&key) {
                continue;
            }
            // Linear scan is fine at crawl scale
            let already_queued = self
                .queue
                .iter()
                .any(|queued| self.normalizer.normalize(&queued.url) == key);
            if already_queued {
                continue;
            }
            self.queue.push_back(job);
            added += 1;
        }
        added
    }

    pub fn mark_visited(&mut self, url: &str) {
        self.visited.insert(self.normalizer.normalize(url));
    }

    pub fn is_visited(&self, url: &str) -> bool {
        self.visited.contains(&self.normalizer.normalize(url))
    }

    // ========================================================================
    // HEALTHY-CAPTURE PRE-SCAN
    // ========================================================================

    /// Seed the visited set from a prior run's per-page records. Records with
    /// enough captured elements mark their URL visited so coverage
    /// accumulates across runs; unhealthy records *remove* the URL so zombie
    /// pages get re-explored. This is the only path that removes a visited
    /// entry.
    pub fn load_healthy_visited<P: AsRef<Path>>(
        &mut self,
        records_dir: P,
        min_elements: usize,
    ) -> (usize, usize) {
        #[derive(Deserialize)]
        struct ScannedRecord {
            url: String,
            #[serde(default)]
            element_count: usize,
        }

        let mut healthy = 0;
        let mut demoted = 0;

        let entries = match std::fs::read_dir(records_dir.as_ref()) {
            Ok(entries) => entries,
            Err(e) => {
                debug!("no prior records to scan: {}", e);
                return (0, 0);
            }
        };

        for entry in entries.flatten() {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            let raw = match std::fs::read_to_string(&path) {
                Ok(raw) => raw,
                Err(e) => {
                    warn!("skipping unreadable record {}: {}", path.display(), e);
                    continue;
                }
            };
            let record: ScannedRecord = match json_utils::deserialize_with_logging(
                &raw,
                &format!("page record {}", path.display()),
            ) {
                Some(record) => record,
                None => continue,
            };

            let key = self.normalizer.normalize(&record.url);
            if record.element_count > min_elements {
                self.visited.insert(key);
                healthy += 1;
            } else if self.visited.remove(&key) {
                debug!(
                    "demoting {} ({} elements, below healthy threshold)",
                    record.url, record.element_count
                );
                demoted += 1;
            }
        }

        if healthy > 0 || demoted > 0 {
            info!(
                "pre-scan: {} healthy URLs skipped, {} zombies demoted for retry",
                healthy, demoted
            );
        }
        (healthy, demoted)
    }

    // ========================================================================
    // CHECKPOINT
    // ========================================================================

    fn checkpoint_path(&self) -> PathBuf {
        let safe_domain = self.domain.replace(['/', ':'], "_");
        self.checkpoint_dir
            .join(format!("checkpoint-{}.json", safe_domain))
    }

    pub fn save_checkpoint(&self) -> Result<(), QueueError> {
        std::fs::create_dir_all(&self.checkpoint_dir)?;
        let checkpoint = Checkpoint {
            domain: self.domain.clone(),
            timestamp_ms: std::time::SystemTime::now()
                .duration_since(std::time::UNIX_EPOCH)
                .unwrap_or_default()
                .as_millis() as u64,
            queue: self.queue.iter().cloned().collect(),
            visited_urls: {
                let mut urls: Vec<String> = self.visited.iter().cloned().collect();
                urls.sort();
                urls
            },
        };
        let json = serde_json::to_string_pretty(&checkpoint)
            .map_err(|e| QueueError::Serialization(e.to_string()))?;
        std::fs::write(self.checkpoint_path(), json)?;
        debug!(
            "checkpoint saved: {} queued, {} visited",
            checkpoint.queue.len(),
            checkpoint.visited_urls.len()
        );
        Ok(())
    }

    /// Restore from the domain's checkpoint. Replaces queue and visited set
    /// entirely. Returns false when no checkpoint exists.
    pub fn load_checkpoint(&mut self) -> Result<bool, QueueError> {
        let path = self.checkpoint_path();
        let raw = match std::fs::read_to_string(&path) {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(false),
            Err(e) => return Err(e.into()),
        };
        let checkpoint: Checkpoint = serde_json::from_str(&raw)
            .map_err(|e| QueueError::Serialization(e.to_string()))?;

        self.queue = checkpoint.queue.into();
        self.visited = checkpoint.visited_urls.into_iter().collect();
        info!(
            "resumed from checkpoint: {} queued, {} visited",
            self.queue.len(),
            self.visited.len()
        );
        Ok(true)
    }

    /// Remove the checkpoint after an explicit successful full pass.
    pub fn clear_checkpoint(&self) -> Result<(), QueueError> {
        match std::fs::remove_file(self.checkpoint_path()) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}
