//! CLI surface for the crawler.
//! Exit codes: 0=success, 2=invalid arguments, 3=I/O or config error, 4=crawl error

use clap::{Args, Parser, Subcommand};

use crate::config::{credentials_from_env, CrawlConfig, CrawlerTuning, WorkaroundFlags};

#[derive(Parser, Debug)]
#[command(name = "uiscout")]
#[command(about = "Autonomous explorer for authenticated single-page applications")]
#[command(version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

impl Cli {
    pub fn parse_args() -> Self {
        Self::parse()
    }
}

#[derive(Args, Debug, Clone)]
pub struct CrawlArgs {
    #[arg(help = "The app URL to start exploring from")]
    pub start_url: String,

    #[arg(
        long,
        default_value = "3",
        help = "Maximum link depth from the start URL"
    )]
    pub max_depth: u32,

    #[arg(
        long,
        default_value = "50",
        help = "Stop after this many pages have been explored"
    )]
    pub page_limit: usize,

    #[arg(
        long,
        default_value = "1",
        help = "Logical dispatch bound; exploration shares one login session"
    )]
    pub concurrency: usize,

    #[arg(
        long,
        default_value = "true",
        action = clap::ArgAction::Set,
        help = "Run the browser without a window; pass --headless false to watch"
    )]
    pub headless: bool,

    #[arg(
        long,
        help = "Ignore prior-run records and re-explore every page from scratch"
    )]
    pub force_rescan: bool,

    #[arg(
        long,
        default_value = "1",
        help = "Full crawl passes; later passes retry pages whose captures were unhealthy"
    )]
    pub epochs: u32,

    #[arg(
        short,
        long,
        default_value = "./scout-data",
        help = "Directory for screenshots, records, checkpoints, and logs"
    )]
    pub output_dir: String,

    #[arg(long, help = "JSON file of learned action weights for click ordering")]
    pub weights: Option<String>,

    #[arg(
        long,
        help = "Environment name for credential lookup (e.g. staging reads UISCOUT_STAGING_EMAIL)"
    )]
    pub environment: Option<String>,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Start a fresh crawl from the given URL.
    Crawl {
        #[command(flatten)]
        args: CrawlArgs,
    },

    /// Continue a crawl from its checkpoint.
    Resume {
        #[command(flatten)]
        args: CrawlArgs,
    },

    /// Delete the checkpoint for a domain so the next crawl starts clean.
    ClearCheckpoint {
        #[arg(help = "Domain or start URL whose checkpoint to remove")]
        target: String,

        #[arg(short, long, default_value = "./scout-data")]
        output_dir: String,
    },
}

/// Resolve CLI arguments plus the environment into a full run configuration.
pub fn build_crawl_config(args: CrawlArgs, resume: bool) -> CrawlConfig {
    let credentials = credentials_from_env(args.environment.as_deref());
    CrawlConfig {
        start_url: args.start_url,
        max_depth: args.max_depth,
        page_limit: args.page_limit,
        concurrency: args.concurrency,
        headless: args.headless,
        force_rescan: args.force_rescan,
        resume,
        epochs: args.epochs,
        output_dir: args.output_dir,
        weights_path: args.weights,
        credentials,
        workarounds: WorkaroundFlags::from_env(),
        tuning: CrawlerTuning::default(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_crawl_defaults() {
        let cli = Cli::try_parse_from(["uiscout", "crawl", "https://x.test/app"]).unwrap();
        let Commands::Crawl { args } = cli.command else {
            panic!("expected crawl command");
        };
        assert_eq!(args.start_url, "https://x.test/app");
        assert_eq!(args.max_depth, 3);
        assert_eq!(args.page_limit, 50);
        assert_eq!(args.concurrency, 1);
        assert!(args.headless);
        assert!(!args.force_rescan);
        assert_eq!(args.epochs, 1);
        assert_eq!(args.output_dir, "./scout-data");
    }

    #[test]
    fn test_resume_and_flags() {
        let cli = Cli::try_parse_from([
            "uiscout",
            "resume",
            "https://x.test/app",
            "--page-limit",
            "200",
            "--headless",
            "false",
            "--force-rescan",
        ])
        .unwrap();
        let Commands::Resume { args } = cli.command else {
            panic!("expected resume command");
        };
        let config = build_crawl_config(args, true);
        assert!(config.resume);
        assert_eq!(config.page_limit, 200);
        assert!(!config.headless);
        assert!(config.force_rescan);
    }

    #[test]
    fn test_clear_checkpoint_command() {
        let cli =
            Cli::try_parse_from(["uiscout", "clear-checkpoint", "x.test", "-o", "/tmp/out"])
                .unwrap();
        let Commands::ClearCheckpoint { target, output_dir } = cli.command else {
            panic!("expected clear-checkpoint command");
        };
        assert_eq!(target, "x.test");
        assert_eq!(output_dir, "/tmp/out");
    }

    #[test]
    fn test_missing_start_url_rejected() {
        assert!(Cli::try_parse_from(["uiscout", "crawl"]).is_err());
    }
}
