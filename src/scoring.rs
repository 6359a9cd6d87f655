//! Capture trustworthiness scoring.
//!
//! Two independent scores are derived per capture and recomputed every time,
//! never persisted as primary state: a reliability score judging whether the
//! screenshot/extraction pair is usable at all, and a golden-path confidence
//! judging whether the page is stable enough to promote into a test case.

use serde::{Deserialize, Serialize};

/// Raw signals observed on a just-captured page.
#[derive(Debug, Clone, Default)]
pub struct CaptureSignals {
    /// Screenshot was visually blank (uniform pixels / trivially small).
    pub blank_screenshot: bool,
    /// Loading spinners/skeletons still visible.
    pub loading_indicators: usize,
    /// Explicit error UI (error banners, "something went wrong" text).
    pub error_indicators: usize,
    /// Resources that failed to load (4xx/5xx on page assets).
    pub broken_resources: usize,
    /// Interactive elements extracted from the DOM.
    pub element_count: usize,
    /// Any actionable content found (buttons, links, inputs with labels).
    pub has_actionable_content: bool,
}

/// Reliability of a capture in [0.0, 1.0] with human-readable reasons.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ReliabilityScore {
    pub score: f64,
    pub reasons: Vec<String>,
}

impl ReliabilityScore {
    /// A blank screenshot forces 0.0 regardless of every other signal;
    /// otherwise fixed penalties accumulate from 1.0, clamped to [0, 1].
    pub fn from_signals(signals: &CaptureSignals) -> Self {
        let mut reasons = Vec::new();

        if signals.blank_screenshot {
            reasons.push("blank screenshot".to_string());
            return Self { score: 0.0, reasons };
        }

        let mut score = 1.0_f64;

        if signals.loading_indicators > 0 {
            score -= 0.3;
            reasons.push(format!(
                "{} loading indicator(s) visible",
                signals.loading_indicators
            ));
        }
        if signals.error_indicators > 0 {
            score -= 0.4;
            reasons.push(format!("{} error indicator(s)", signals.error_indicators));
        }
        if signals.broken_resources > 0 {
            // 0.1 per broken resource, capped so one noisy page cannot zero out
            let penalty = (signals.broken_resources as f64 * 0.1).min(0.3);
            score -= penalty;
            reasons.push(format!("{} broken resource(s)", signals.broken_resources));
        }

        Self {
            score: score.clamp(0.0, 1.0),
            reasons,
        }
    }
}

/// Golden-path judgment: whether the discovered navigation state is stable
/// and testable enough to promote into a generated test case.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct GoldenPathInfo {
    pub is_stable: bool,
    pub confidence: f64,
    pub reasons: Vec<String>,
}

impl GoldenPathInfo {
    /// Confidence starts at 1.0 and decreases monotonically with each
    /// negative signal; `is_stable` depends only on loaders and errors, not
    /// on the numeric confidence.
    pub fn evaluate(signals: &CaptureSignals) -> Self {
        let mut confidence = 1.0_f64;
        let mut reasons = Vec::new();

        let has_loaders = signals.loading_indicators > 0;
        let has_errors = signals.error_indicators > 0;

        if has_loaders {
            confidence -= 0.4;
            reasons.push("loading indicators present".to_string());
        }
        if has_errors {
            confidence -= 0.5;
            reasons.push("error UI present".to_string());
        }
        if signals.element_count < 3 {
            confidence -= 0.3;
            reasons.push(format!(
                "only {} testable element(s)",
                signals.element_count
            ));
        }
        if !signals.has_actionable_content {
            confidence -= 0.2;
            reasons.push("no actionable content".to_string());
        }

        Self {
            is_stable: !has_loaders && !has_errors,
            confidence: confidence.clamp(0.0, 1.0),
            reasons,
        }
    }
}

/// Heuristic blankness check on raw PNG bytes: an empty or implausibly tiny
/// capture is treated as blank. Pixel-level analysis belongs to the visual
/// regression pipeline, not this crate.
pub fn screenshot_looks_blank(png_bytes: &[u8]) -> bool {
    const MIN_PLAUSIBLE_PNG_BYTES: usize = 2_048;
    png_bytes.len() < MIN_PLAUSIBLE_PNG_BYTES
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_clean_capture_scores_full() {
        let signals = CaptureSignals {
            element_count: 12,
            has_actionable_content: true,
            ..Default::default()
        };
        let score = ReliabilityScore::from_signals(&signals);
        assert_eq!(score.score, 1.0);
        assert!(score.reasons.is_empty());

        let golden = GoldenPathInfo::evaluate(&signals);
        assert!(golden.is_stable);
        assert_eq!(golden.confidence, 1.0);
    }

    #[test]
    fn test_blank_screenshot_forces_zero() {
        let signals = CaptureSignals {
            blank_screenshot: true,
            element_count: 50,
            has_actionable_content: true,
            ..Default::default()
        };
        let score = ReliabilityScore::from_signals(&signals);
        assert_eq!(score.score, 0.0);
        assert_eq!(score.reasons, vec!["blank screenshot".to_string()]);
    }

    #[test]
    fn test_reliability_always_clamped() {
        let signals = CaptureSignals {
            loading_indicators: 3,
            error_indicators: 2,
            broken_resources: 20,
            ..Default::default()
        };
        let score = ReliabilityScore::from_signals(&signals);
        assert!((0.0..=1.0).contains(&score.score));
    }

    #[test]
    fn test_golden_path_penalties() {
        let base = CaptureSignals {
            element_count: 10,
            has_actionable_content: true,
            ..Default::default()
        };

        let loaders = CaptureSignals {
            loading_indicators: 1,
            ..base.clone()
        };
        let golden = GoldenPathInfo::evaluate(&loaders);
        assert!((golden.confidence - 0.6).abs() < 1e-9);
        assert!(!golden.is_stable);

        let errors = CaptureSignals {
            error_indicators: 1,
            ..base.clone()
        };
        let golden = GoldenPathInfo::evaluate(&errors);
        assert!((golden.confidence - 0.5).abs() < 1e-9);
        assert!(!golden.is_stable);

        let sparse = CaptureSignals {
            element_count: 2,
            ..base.clone()
        };
        let golden = GoldenPathInfo::evaluate(&sparse);
        assert!((golden.confidence - 0.7).abs() < 1e-9);
        assert!(golden.is_stable);

        let inert = CaptureSignals {
            has_actionable_content: false,
            ..base
        };
        let golden = GoldenPathInfo::evaluate(&inert);
        assert!((golden.confidence - 0.8).abs() < 1e-9);
        assert!(golden.is_stable);
    }

    #[test]
    fn test_golden_path_monotonic_decrease_and_clamp() {
        let worst = CaptureSignals {
            loading_indicators: 2,
            error_indicators: 1,
            element_count: 0,
            has_actionable_content: false,
            ..Default::default()
        };
        let golden = GoldenPathInfo::evaluate(&worst);
        // 1.0 - 0.4 - 0.5 - 0.3 - 0.2 clamps at 0
        assert_eq!(golden.confidence, 0.0);
        assert!(!golden.is_stable);
        assert_eq!(golden.reasons.len(), 4);
    }

    #[test]
    fn test_stability_independent_of_confidence() {
        // Low confidence from sparseness alone still counts as stable
        let signals = CaptureSignals {
            element_count: 1,
            has_actionable_content: false,
            ..Default::default()
        };
        let golden = GoldenPathInfo::evaluate(&signals);
        assert!(golden.is_stable);
        assert!(golden.confidence < 0.6);
    }

    #[test]
    fn test_screenshot_blank_heuristic() {
        assert!(screenshot_looks_blank(&[]));
        assert!(screenshot_looks_blank(&vec![0u8; 100]));
        assert!(!screenshot_looks_blank(&vec![1u8; 100_000]));
    }
}
