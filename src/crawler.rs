//! Crawl run loop: drives the frontier against one shared authenticated page.
//!
//! One page carries the login session, so jobs are effectively serialized
//! through it; the configured concurrency is a bookkeeping bound on dispatch,
//! not parallel pages. The loop honors the page budget and an external stop
//! signal, checkpoints periodically, recovers once from a zombie page per
//! incident, and always flushes the checkpoint and trace artifact on the way
//! out.

use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::{watch, Semaphore};
use tracing::{error, info, warn};

use crate::browser::PageDriver;
use crate::capture::{CaptureWriter, RunTrace, TraceEntry};
use crate::config::CrawlConfig;
use crate::explore::{ExploreCaches, Explorer};
use crate::queue::{CrawlJob, CrawlQueue};
use crate::rate_limit::RateLimitCoordinator;
use crate::scoring::ReliabilityScore;
use crate::url_norm::{extract_host, UrlNormalizer};
use crate::weights::WeightMap;
use crate::config::Config;

#[derive(Error, Debug)]
pub enum OrchestratorError {
    #[error("authentication failed: {0}")]
    Auth(String),

    #[error("browser setup failed: {0}")]
    Browser(String),

    #[error("invalid start URL: {0}")]
    InvalidStartUrl(String),
}

/// Supplies fresh authenticated pages: once at startup and again when the
/// shared page turns out to be a zombie.
#[async_trait]
pub trait PageSupplier: Send + Sync {
    async fn fresh_authenticated_page(&self) -> Result<Arc<dyn PageDriver>, OrchestratorError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    QueueExhausted,
    PageBudget,
    Interrupted,
}

impl StopReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            StopReason::QueueExhausted => "queue-exhausted",
            StopReason::PageBudget => "page-budget",
            StopReason::Interrupted => "interrupted",
        }
    }
}

#[derive(Debug)]
pub struct CrawlRunResult {
    pub pages_processed: usize,
    pub pages_failed: usize,
    pub urls_discovered: usize,
    pub stop_reason: StopReason,
}

pub struct CrawlOrchestrator {
    config: CrawlConfig,
    queue: CrawlQueue,
    supplier: Arc<dyn PageSupplier>,
    caches: Arc<ExploreCaches>,
    weights: Arc<WeightMap>,
    rate_limit: Arc<RateLimitCoordinator>,
    capture: Arc<CaptureWriter>,
    normalizer: Arc<UrlNormalizer>,
    /// 4xx/5xx responses observed during the current job, fed by the response
    /// monitor subscription.
    broken_responses: Arc<AtomicUsize>,
    base_host: String,
}

impl CrawlOrchestrator {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        config: CrawlConfig,
        queue: CrawlQueue,
        supplier: Arc<dyn PageSupplier>,
        caches: Arc<ExploreCaches>,
        weights: Arc<WeightMap>,
        rate_limit: Arc<RateLimitCoordinator>,
        capture: Arc<CaptureWriter>,
        normalizer: Arc<UrlNormalizer>,
        broken_responses: Arc<AtomicUsize>,
    ) -> Result<Self, OrchestratorError> {
        let base_host = extract_host(&config.start_url)
            .ok_or_else(|| OrchestratorError::InvalidStartUrl(config.start_url.clone()))?;
        Ok(Self {
            config,
            queue,
            supplier,
            caches,
            weights,
            rate_limit,
            capture,
            normalizer,
            broken_responses,
            base_host,
        })
    }

    pub fn base_host(&self) -> &str {
        &self.base_host
    }

    fn make_explorer(&self, driver: Arc<dyn PageDriver>) -> Explorer {
        Explorer::new(
            driver,
            Arc::clone(&self.caches),
            Arc::clone(&self.weights),
            Arc::clone(&self.rate_limit),
            Arc::clone(&self.capture),
            Arc::clone(&self.normalizer),
            self.base_host.clone(),
            self.config.tuning.clone(),
        )
    }

    fn trace_dir(&self) -> PathBuf {
        Path::new(&self.config.output_dir).join(self.base_host.replace(['/', ':'], "_"))
    }

    /// Run every epoch to completion. The initial page must authenticate or
    /// the run fails; later zombie recoveries only abandon the current job.
    pub async fn run(
        &mut self,
        stop_rx: watch::Receiver<bool>,
    ) -> Result<CrawlRunResult, OrchestratorError> {
        let mut driver = self.supplier.fresh_authenticated_page().await?;
        let mut explorer = self.make_explorer(Arc::clone(&driver));

        let dispatch_permits = Arc::new(Semaphore::new(self.config.concurrency.max(1)));

        let mut trace = RunTrace {
            start_url: self.config.start_url.clone(),
            started_at: chrono::Utc::now().to_rfc3339(),
            ..Default::default()
        };
        let mut result = CrawlRunResult {
            pages_processed: 0,
            pages_failed: 0,
            urls_discovered: 0,
            stop_reason: StopReason::QueueExhausted,
        };

        'epochs: for epoch in 0..self.config.epochs.max(1) {
            // Each epoch re-scans prior records so demoted zombie pages get
            // retried, then re-seeds the start URL.
            if epoch > 0 {
                self.queue.load_healthy_visited(
                    self.capture.records_dir().to_path_buf(),
                    self.config.tuning.healthy_element_threshold,
                );
            }
            let seeded = self
                .queue
                .add_jobs(vec![CrawlJob::seed(&self.config.start_url)]);
            if epoch > 0 && seeded == 0 && self.queue.is_empty() {
                info!("epoch {}: nothing left to retry", epoch);
                break;
            }
            info!(
                "epoch {} starting: {} queued, {} visited",
                epoch,
                self.queue.len(),
                self.queue.visited_count()
            );

            loop {
                if *stop_rx.borrow() {
                    result.stop_reason = StopReason::Interrupted;
                    break 'epochs;
                }
                if result.pages_processed >= self.config.page_limit {
                    result.stop_reason = StopReason::PageBudget;
                    break 'epochs;
                }
                let job = match self.queue.next_job() {
                    Some(job) => job,
                    None => break,
                };

                // Bookkeeping bound; exploration itself is serialized through
                // the one shared page.
                let _permit = dispatch_permits.acquire().await;

                self.queue.mark_visited(&job.url);
                self.broken_responses.store(0, Ordering::SeqCst);

                // Zombie page: exactly one re-login attempt, then give up on
                // this job only.
                if driver.is_closed().await {
                    warn!("shared page is closed, attempting one re-login");
                    match self.supplier.fresh_authenticated_page().await {
                        Ok(fresh) => {
                            driver = fresh;
                            explorer = self.make_explorer(Arc::clone(&driver));
                        }
                        Err(e) => {
                            warn!("re-login failed, abandoning job {}: {}", job.url, e);
                            result.pages_failed += 1;
                            trace.job_log.push(TraceEntry {
                                url: job.url.clone(),
                                depth: job.depth,
                                outcome: "zombie-abandoned".to_string(),
                                duration_ms: 0,
                            });
                            continue;
                        }
                    }
                }

                let started = std::time::Instant::now();
                match explorer.explore(&job).await {
                    Ok(outcome) => {
                        let mut signals = outcome.signals.clone();
                        signals.broken_resources = self.broken_responses.load(Ordering::SeqCst);
                        let reliability = ReliabilityScore::from_signals(&signals);

                        let record = CaptureWriter::build_record(
                            &outcome.url,
                            &outcome.content_hash,
                            &job.functional_path,
                            &reliability,
                            &outcome.action_chain,
                            outcome.elements.len(),
                        );
                        self.capture.write_record(&record);

                        let discovered = self.enqueue_links(&job, &outcome.links);
                        result.urls_discovered += discovered;
                        result.pages_processed += 1;

                        trace.job_log.push(TraceEntry {
                            url: job.url.clone(),
                            depth: job.depth,
                            outcome: "ok".to_string(),
                            duration_ms: started.elapsed().as_millis() as u64,
                        });
                    }
                    Err(e) => {
                        warn!("job failed, continuing with next: {} ({})", job.url, e);
                        result.pages_failed += 1;
                        trace.job_log.push(TraceEntry {
                            url: job.url.clone(),
                            depth: job.depth,
                            outcome: format!("error: {}", e),
                            duration_ms: started.elapsed().as_millis() as u64,
                        });
                    }
                }

                let handled = result.pages_processed + result.pages_failed;
                if handled % Config::CHECKPOINT_EVERY_JOBS == 0 {
                    if let Err(e) = self.queue.save_checkpoint() {
                        warn!("periodic checkpoint failed: {}", e);
                    }
                }
            }
        }

        self.finish(&mut trace, &result);
        Ok(result)
    }

    /// Filter one job's discovered links to the crawl domain and depth bound
    /// and enqueue them with inherited history.
    fn enqueue_links(&mut self, job: &CrawlJob, links: &[crate::explore::DiscoveredLink]) -> usize {
        if job.depth >= self.config.max_depth {
            return 0;
        }
        let jobs: Vec<CrawlJob> = links
            .iter()
            .filter(|link| crate::url_norm::is_same_host(&link.url, &self.base_host))
            .map(|link| job.descend(&link.url, link.path.clone()))
            .collect();
        self.queue.add_jobs(jobs)
    }

    /// Flush state regardless of how the run ended: a full clean pass clears
    /// the checkpoint, anything else saves it for resume.
    fn finish(&mut self, trace: &mut RunTrace, result: &CrawlRunResult) {
        trace.finished_at = chrono::Utc::now().to_rfc3339();
        trace.pages_processed = result.pages_processed;
        trace.pages_failed = result.pages_failed;
        trace.urls_discovered = result.urls_discovered;
        trace.stop_reason = result.stop_reason.as_str().to_string();

        match result.stop_reason {
            StopReason::QueueExhausted => {
                if let Err(e) = self.queue.clear_checkpoint() {
                    warn!("failed to clear checkpoint: {}", e);
                }
            }
            _ => {
                if let Err(e) = self.queue.save_checkpoint() {
                    error!("failed to save checkpoint on stop: {}", e);
                }
            }
        }
        trace.write(self.trace_dir());

        info!(
            "crawl finished ({}): {} processed, {} failed, {} discovered",
            trace.stop_reason, result.pages_processed, result.pages_failed, result.urls_discovered
        );
    }
}
