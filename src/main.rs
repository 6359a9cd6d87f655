use std::sync::Arc;
use thiserror::Error;

use uiscout::cli::{build_crawl_config, Cli, Commands};
use uiscout::orchestration::run_crawl;
use uiscout::queue::CrawlQueue;
use uiscout::url_norm::{extract_host, UrlNormalizer};

#[derive(Error, Debug)]
enum MainError {
    #[error("Crawl error: {0}")]
    Crawl(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<Box<dyn std::error::Error>> for MainError {
    fn from(err: Box<dyn std::error::Error>) -> Self {
        MainError::Crawl(err.to_string())
    }
}

#[tokio::main]
async fn main() -> Result<(), MainError> {
    let cli = Cli::parse_args();

    match cli.command {
        Commands::Crawl { args } => {
            let config = build_crawl_config(args, false);
            uiscout::logging::init_logging_in_output_dir(&config.output_dir)?;
            run(config).await?;
        }
        Commands::Resume { args } => {
            let config = build_crawl_config(args, true);
            uiscout::logging::init_logging_in_output_dir(&config.output_dir)?;
            run(config).await?;
        }
        Commands::ClearCheckpoint { target, output_dir } => {
            let domain = extract_host(&target).unwrap_or(target);
            let queue = CrawlQueue::new(&domain, &output_dir, Arc::new(UrlNormalizer::new()));
            queue
                .clear_checkpoint()
                .map_err(|e| MainError::Crawl(e.to_string()))?;
            println!("Checkpoint cleared for {}", domain);
        }
    }

    Ok(())
}

async fn run(config: uiscout::config::CrawlConfig) -> Result<(), MainError> {
    println!("Starting crawl of {}", config.start_url);
    if config.credentials.is_none() {
        println!("No credentials in environment; crawling unauthenticated");
    }

    let result = run_crawl(config, None).await?;

    println!("\nCrawl finished ({})", result.stop_reason.as_str());
    println!("  Pages explored:  {}", result.pages_processed);
    println!("  Pages failed:    {}", result.pages_failed);
    println!("  URLs discovered: {}", result.urls_discovered);
    Ok(())
}
