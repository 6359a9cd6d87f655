pub mod browser;
pub mod capture;
pub mod cli;
pub mod clock;
pub mod config;
pub mod crawler;
pub mod explore;
pub mod json_utils;
pub mod lock;
pub mod logging;
pub mod orchestration;
pub mod queue;
pub mod rate_limit;
pub mod recovery;
pub mod scoring;
pub mod session;
pub mod url_norm;
pub mod weights;

// Re-export main types for library usage
pub use browser::{DriverError, PageDriver, ResponseEvent, ResponseMonitor};
pub use capture::{CaptureWriter, PageRecord};
pub use config::{CrawlConfig, CrawlerTuning};
pub use crawler::{CrawlOrchestrator, CrawlRunResult, PageSupplier, StopReason};
pub use explore::{ExploreCaches, ExploreOutcome, Explorer};
pub use queue::{ActionRecord, CrawlJob, CrawlQueue};
pub use rate_limit::RateLimitCoordinator;
pub use scoring::{GoldenPathInfo, ReliabilityScore};
pub use session::{RefreshHandler, SessionError, TokenStore};
pub use url_norm::UrlNormalizer;
pub use weights::WeightMap;
