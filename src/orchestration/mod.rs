//! High-level orchestration: browser/session wiring, login, and shutdown.

pub mod builder;
pub mod login;
pub mod shutdown;

pub use builder::{build_crawl, run_crawl, CdpSupplier, CrawlRuntime};
pub use login::{perform_login, LoginError, LoginOutcome};
pub use shutdown::setup_shutdown_handler;
