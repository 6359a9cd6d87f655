//! Cross-module flows exercised through the public API: checkpoint
//! round-trips, the healthy-capture pre-scan against real record files, and
//! the capture/scoring pipeline.

use std::sync::Arc;
use tempfile::TempDir;

use uiscout::queue::{CrawlJob, CrawlQueue};
use uiscout::scoring::CaptureSignals;
use uiscout::url_norm::UrlNormalizer;
use uiscout::{CaptureWriter, ReliabilityScore};

fn queue_in(dir: &TempDir) -> CrawlQueue {
    CrawlQueue::new("app.example.com", dir.path(), Arc::new(UrlNormalizer::new()))
}

#[test]
fn test_checkpoint_round_trip_across_instances() {
    let dir = TempDir::new().unwrap();

    let mut queue = queue_in(&dir);
    let seed = CrawlJob::seed("https://app.example.com/dash");
    queue.add_jobs(vec![
        seed.clone(),
        seed.descend("https://app.example.com/users", vec!["Users".to_string()]),
    ]);
    queue.mark_visited("https://app.example.com/login");
    queue.save_checkpoint().unwrap();

    let mut restored = queue_in(&dir);
    assert!(restored.load_checkpoint().unwrap());
    assert_eq!(restored.len(), 2);
    assert!(restored.is_visited("https://app.example.com/login"));

    let first = restored.next_job().unwrap();
    assert_eq!(first.url, "https://app.example.com/dash");
    let second = restored.next_job().unwrap();
    assert_eq!(second.depth, 1);
    assert_eq!(second.functional_path, vec!["Users".to_string()]);
}

#[test]
fn test_clear_checkpoint_leaves_next_run_fresh() {
    let dir = TempDir::new().unwrap();

    let mut queue = queue_in(&dir);
    queue.add_jobs(vec![CrawlJob::seed("https://app.example.com/dash")]);
    queue.save_checkpoint().unwrap();
    queue.clear_checkpoint().unwrap();

    let mut restored = queue_in(&dir);
    assert!(!restored.load_checkpoint().unwrap());
    assert!(restored.is_empty());
}

#[test]
fn test_prescan_reads_written_records() {
    let dir = TempDir::new().unwrap();
    let writer = CaptureWriter::new(dir.path(), "app.example.com");

    let healthy = ReliabilityScore::from_signals(&CaptureSignals {
        blank_screenshot: false,
        loading_indicators: 0,
        error_indicators: 0,
        broken_resources: 0,
        element_count: 40,
        has_actionable_content: true,
    });
    writer
        .write_record(&CaptureWriter::build_record(
            "https://app.example.com/users",
            "abc",
            &[],
            &healthy,
            &[],
            40,
        ))
        .unwrap();
    writer
        .write_record(&CaptureWriter::build_record(
            "https://app.example.com/ghost",
            "def",
            &[],
            &healthy,
            &[],
            2,
        ))
        .unwrap();

    let mut queue = queue_in(&dir);
    // Simulate a checkpoint that considered the zombie page done.
    queue.mark_visited("https://app.example.com/ghost");

    let (healthy_count, demoted) = queue.load_healthy_visited(writer.records_dir(), 10);
    assert_eq!(healthy_count, 1);
    assert_eq!(demoted, 1);

    // The healthy page stays skipped; the zombie is eligible again.
    assert_eq!(
        queue.add_jobs(vec![CrawlJob::seed("https://app.example.com/users")]),
        0
    );
    assert_eq!(
        queue.add_jobs(vec![CrawlJob::seed("https://app.example.com/ghost")]),
        1
    );
}

#[test]
fn test_record_carries_score_and_reasons() {
    let dir = TempDir::new().unwrap();
    let writer = CaptureWriter::new(dir.path(), "app.example.com");

    let score = ReliabilityScore::from_signals(&CaptureSignals {
        blank_screenshot: false,
        loading_indicators: 2,
        error_indicators: 0,
        broken_resources: 1,
        element_count: 15,
        has_actionable_content: true,
    });
    assert!(score.score < 1.0);

    let path = writer
        .write_record(&CaptureWriter::build_record(
            "https://app.example.com/orders",
            "hash-1",
            &["Sidebar".to_string(), "Orders".to_string()],
            &score,
            &[],
            15,
        ))
        .unwrap();

    let raw = std::fs::read_to_string(path).unwrap();
    let parsed: serde_json::Value = serde_json::from_str(&raw).unwrap();
    assert_eq!(parsed["url"], "https://app.example.com/orders");
    assert_eq!(parsed["element_count"], 15);
    assert_eq!(parsed["functional_path"][1], "Orders");
    assert!(parsed["reliability_score"].as_f64().unwrap() < 1.0);
    assert!(!parsed["contamination_reasons"]
        .as_array()
        .unwrap()
        .is_empty());
}

#[test]
fn test_normalized_duplicates_collapse_in_frontier() {
    let dir = TempDir::new().unwrap();
    let mut queue = queue_in(&dir);

    let added = queue.add_jobs(vec![
        CrawlJob::seed("https://app.example.com/users"),
        CrawlJob::seed("https://app.example.com/users/"),
        CrawlJob::seed("https://app.example.com/users#tab"),
    ]);
    assert_eq!(added, 1);
}
