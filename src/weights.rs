//! Priority-weight input: an opaque `label -> weight` map produced by the
//! imitation-learning tooling, consumed here only to reorder candidate
//! elements during exploration.

use std::collections::HashMap;
use std::path::Path;
use tracing::{info, warn};

use crate::json_utils;

pub const DEFAULT_WEIGHT: f64 = 0.01;

#[derive(Debug, Clone, Default)]
pub struct WeightMap {
    weights: HashMap<String, f64>,
}

impl WeightMap {
    pub fn empty() -> Self {
        Self::default()
    }

    /// Load from a JSON object of `"action:click:<label>" -> number`. A
    /// missing or unreadable file yields an empty map; weights are a hint,
    /// never a requirement.
    pub fn load<P: AsRef<Path>>(path: P) -> Self {
        let raw = match std::fs::read_to_string(path.as_ref()) {
            Ok(raw) => raw,
            Err(e) => {
                warn!(
                    "weight map {} not loaded ({}), using defaults",
                    path.as_ref().display(),
                    e
                );
                return Self::default();
            }
        };

        match json_utils::deserialize_with_logging::<HashMap<String, f64>>(&raw, "weight map") {
            Some(weights) => {
                info!("loaded {} action weights", weights.len());
                Self { weights }
            }
            None => Self::default(),
        }
    }

    /// Weight for a click label; unknown labels get the small default so
    /// learned actions sort first without suppressing anything.
    pub fn weight_for(&self, label: &str) -> f64 {
        let key = format!("action:click:{}", label);
        self.weights.get(&key).copied().unwrap_or(DEFAULT_WEIGHT)
    }

    /// Sort labels by descending weight, preserving order among ties so the
    /// page's own ordering remains a stable fallback.
    pub fn rank_candidates<T, F>(&self, candidates: &mut [T], label_of: F)
    where
        F: Fn(&T) -> String,
    {
        candidates.sort_by(|a, b| {
            let wa = self.weight_for(&label_of(a));
            let wb = self.weight_for(&label_of(b));
            wb.partial_cmp(&wa).unwrap_or(std::cmp::Ordering::Equal)
        });
    }
}
