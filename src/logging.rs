//! Multi-layer tracing setup with background file rotation.
//!
//! Three outputs: a compact text log and a structured JSON log, both rotated
//! daily under `<output>/logs/`, plus a quieter stdout layer for watching a
//! run live. `RUST_LOG` controls filtering (default "info"), e.g.
//! `RUST_LOG=uiscout=debug,chromiumoxide=warn`.

use std::path::Path;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

/// Initialize the global subscriber. Errors if the log directory cannot be
/// created or a subscriber is already installed.
pub fn init_logging<P: AsRef<Path>>(log_dir: P) -> Result<(), Box<dyn std::error::Error>> {
    let log_path = log_dir.as_ref();
    std::fs::create_dir_all(log_path)?;

    // EnvFilter is not Clone; build one per layer
    let env_filter =
        || EnvFilter::try_from_default_env().or_else(|_| EnvFilter::try_new("info"));

    let text_file_appender = tracing_appender::rolling::daily(log_path, "crawl.log");
    let (text_writer, text_guard) = tracing_appender::non_blocking(text_file_appender);

    let json_file_appender = tracing_appender::rolling::daily(log_path, "crawl.json.log");
    let (json_writer, json_guard) = tracing_appender::non_blocking(json_file_appender);

    let text_layer = fmt::layer()
        .with_writer(text_writer)
        .with_target(true)
        .with_thread_ids(true)
        .with_line_number(true)
        .with_ansi(false)
        .compact()
        .with_filter(env_filter()?);

    let json_layer = fmt::layer()
        .json()
        .with_writer(json_writer)
        .with_target(true)
        .with_current_span(true)
        .with_span_list(true)
        .with_filter(env_filter()?);

    let stdout_layer = fmt::layer()
        .with_target(false)
        .with_line_number(false)
        .compact()
        .with_filter(env_filter()?);

    tracing_subscriber::registry()
        .with(text_layer)
        .with(json_layer)
        .with(stdout_layer)
        .init();

    // Non-blocking guards must outlive the program or buffered lines are lost
    Box::leak(Box::new(text_guard));
    Box::leak(Box::new(json_guard));

    tracing::info!("logging initialized, files under {}", log_path.display());
    Ok(())
}

/// Convenience wrapper placing logs in `<output_dir>/logs/`.
pub fn init_logging_in_output_dir<P: AsRef<Path>>(
    output_dir: P,
) -> Result<(), Box<dyn std::error::Error>> {
    init_logging(output_dir.as_ref().join("logs"))
}
