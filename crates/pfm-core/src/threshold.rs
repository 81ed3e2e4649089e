//! Relevance cutoffs derived from the candidate scores themselves.
//!
//! [`ThresholdManager::calculate_dynamic_threshold`] computes four statistics
//! over the sorted scores (low percentile, two-cluster split, max-entropy split,
//! mean minus deviation) and picks one per search mode.
//! [`quick_threshold`] is the cheap variant for call sites without query
//! context.

use std::str::FromStr;

use serde::{Deserialize, Serialize};
use tracing::trace;

use crate::constants::MIN_SMALL_SET_THRESHOLD;
use crate::error::{CoreError, Result};

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SearchMode {
    Precision,
    Discovery,
    Creative,
    #[default]
    Balanced,
}

impl FromStr for SearchMode {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "precision" => Ok(Self::Precision),
            "discovery" => Ok(Self::Discovery),
            "creative" => Ok(Self::Creative),
            "balanced" => Ok(Self::Balanced),
            _ => Err(CoreError::invalid("search mode", s)),
        }
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct QueryContext {
    pub search_mode: SearchMode,
    pub complexity: f64,
    pub historical_success: f64,
}

impl QueryContext {
    pub fn new(search_mode: SearchMode) -> Self {
        Self {
            search_mode,
            complexity: 0.5,
            historical_success: 0.5,
        }
    }
}

/// Engine load at the time of the query. `density` and `pressure` are ratios in [0, 1].
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct SystemState {
    pub density: f64,
    pub pressure: f64,
    pub recent_latency_ms: f64,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum QuickMode {
    Permissive,
    Balanced,
    Strict,
}

/// The four candidate cutoffs for a set of at least five scores.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct ThresholdStatistics {
    pub percentile: f64,
    pub cluster: f64,
    pub entropy: f64,
    pub std_dev: f64,
}

impl ThresholdStatistics {
    /// `sorted` must be ascending and hold at least one value.
    pub fn compute(sorted: &[f64]) -> Self {
        Self {
            percentile: percentile(sorted, 0.05),
            cluster: cluster_split(sorted),
            entropy: entropy_split(sorted),
            std_dev: std_dev_cutoff(sorted),
        }
    }

    pub fn select(&self, mode: SearchMode) -> f64 {
        match mode {
            SearchMode::Precision => self.cluster.max(self.percentile),
            SearchMode::Discovery => self.entropy.min(self.std_dev),
            SearchMode::Creative => self.percentile * 0.5,
            SearchMode::Balanced => self.cluster,
        }
    }
}

#[derive(Clone, Copy, Debug, Default)]
pub struct ThresholdManager;

impl ThresholdManager {
    pub fn new() -> Self {
        Self
    }

    /// Cutoff for a candidate set. For a non-empty set the result always
    /// lies in `[0, max(scores)]`.
    pub fn calculate_dynamic_threshold(
        &self,
        scores: &[f64],
        query: &QueryContext,
        system: &SystemState,
    ) -> f64 {
        let sorted = sorted_finite(scores);

        let threshold = match sorted.len() {
            0 => return adaptive_default(query.search_mode, system),
            1..=4 => (sorted[0] * 0.3).max(MIN_SMALL_SET_THRESHOLD),
            _ => ThresholdStatistics::compute(&sorted).select(query.search_mode),
        };

        let max = sorted[sorted.len() - 1];
        let clamped = threshold.min(max).max(0.0);
        trace!(
            n = sorted.len(),
            mode = ?query.search_mode,
            complexity = query.complexity,
            historical_success = query.historical_success,
            threshold = clamped,
            "dynamic threshold"
        );
        clamped
    }
}

/// Default cutoff when there is nothing to measure, scaled up under load.
fn adaptive_default(mode: SearchMode, system: &SystemState) -> f64 {
    let mut t = match mode {
        SearchMode::Precision => 0.005,
        SearchMode::Discovery => 0.001,
        SearchMode::Creative => 0.0005,
        SearchMode::Balanced => 0.002,
    };
    if system.density > 0.8 {
        t *= 1.5;
    }
    if system.pressure > 0.9 {
        t *= 2.0;
    }
    t
}

/// Fast estimate without statistical context.
pub fn quick_threshold(scores: &[f64], mode: QuickMode) -> f64 {
    let (empty, factor, pct) = match mode {
        QuickMode::Permissive => (0.001, 0.1, 0.05),
        QuickMode::Balanced => (0.005, 0.3, 0.1),
        QuickMode::Strict => (0.01, 0.5, 0.25),
    };
    match scores.len() {
        0 => empty,
        1 | 2 => scores[0] * factor,
        _ => percentile(&sorted_finite(scores), pct),
    }
}

fn sorted_finite(scores: &[f64]) -> Vec<f64> {
    let mut v: Vec<f64> = scores.iter().copied().filter(|s| s.is_finite()).collect();
    v.sort_by(f64::total_cmp);
    v
}

fn percentile(sorted: &[f64], p: f64) -> f64 {
    if sorted.is_empty() {
        return 0.0;
    }
    let idx = ((sorted.len() as f64 * p).floor() as usize).min(sorted.len() - 1);
    sorted[idx]
}

/// One assignment pass of 2-means; midpoint between the clusters' facing edges.
fn cluster_split(sorted: &[f64]) -> f64 {
    let n = sorted.len();
    let mid = n / 2;
    let low_seed = sorted[mid / 2];
    let high_seed = sorted[(mid + (n - mid) / 2).min(n - 1)];

    let mut low_max: Option<f64> = None;
    let mut high_min: Option<f64> = None;
    for &s in sorted {
        if (s - low_seed).abs() <= (s - high_seed).abs() {
            low_max = Some(low_max.map_or(s, |m| m.max(s)));
        } else {
            high_min = Some(high_min.map_or(s, |m| m.min(s)));
        }
    }

    match (low_max, high_min) {
        (Some(lo), Some(hi)) => (lo + hi) / 2.0,
        _ => sorted[mid],
    }
}

/// Split value maximizing binary entropy of the ≤ / > partition sizes.
/// Ties keep the first (lowest) split.
fn entropy_split(sorted: &[f64]) -> f64 {
    let n = sorted.len();
    if n < 3 {
        return sorted[0];
    }
    let mut best_value = sorted[1];
    let mut best_entropy = f64::NEG_INFINITY;
    for &candidate in &sorted[1..n - 1] {
        let left = sorted.iter().filter(|&&s| s <= candidate).count();
        let h = binary_entropy(left as f64 / n as f64);
        if h > best_entropy {
            best_entropy = h;
            best_value = candidate;
        }
    }
    best_value
}

fn binary_entropy(p: f64) -> f64 {
    if p <= 0.0 || p >= 1.0 {
        return 0.0;
    }
    -(p * p.log2() + (1.0 - p) * (1.0 - p).log2())
}

fn std_dev_cutoff(sorted: &[f64]) -> f64 {
    let n = sorted.len() as f64;
    let mean = sorted.iter().sum::<f64>() / n;
    let var = sorted.iter().map(|s| (s - mean).powi(2)).sum::<f64>() / n;
    (mean - 1.5 * var.sqrt()).max(0.0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn ladder() -> Vec<f64> {
        (1..=10).map(|i| i as f64 / 100.0).collect()
    }

    fn threshold(scores: &[f64], mode: SearchMode) -> f64 {
        ThresholdManager::new().calculate_dynamic_threshold(
            scores,
            &QueryContext::new(mode),
            &SystemState::default(),
        )
    }

    #[test]
    fn test_balanced_is_cluster_midpoint() {
        let t = threshold(&ladder(), SearchMode::Balanced);
        assert_relative_eq!(t, 0.055, epsilon = 1e-12);
        assert!(t > 0.01 && t < 0.10);
    }

    #[test]
    fn test_empty_defaults_scale_with_load() {
        assert_eq!(threshold(&[], SearchMode::Precision), 0.005);
        assert_eq!(threshold(&[], SearchMode::Creative), 0.0005);
        let loaded = SystemState {
            density: 0.85,
            pressure: 0.95,
            recent_latency_ms: 0.0,
        };
        let t = ThresholdManager::new().calculate_dynamic_threshold(
            &[],
            &QueryContext::new(SearchMode::Balanced),
            &loaded,
        );
        assert_relative_eq!(t, 0.002 * 1.5 * 2.0, epsilon = 1e-15);
    }

    #[test]
    fn test_small_sets() {
        let t = threshold(&[0.5, 0.2, 0.9], SearchMode::Discovery);
        assert_relative_eq!(t, 0.06, epsilon = 1e-12);
        // floor never exceeds the largest score
        assert_eq!(threshold(&[0.00005], SearchMode::Precision), 0.00005);
    }

    #[test]
    fn test_mode_selection() {
        let s = ladder();
        let stats = ThresholdStatistics::compute(&s);
        assert_eq!(stats.percentile, 0.01);
        assert_relative_eq!(stats.cluster, 0.055, epsilon = 1e-12);
        // left share 5/10 maximizes entropy at the fifth value
        assert_eq!(stats.entropy, 0.05);
        assert_eq!(threshold(&s, SearchMode::Precision), stats.cluster.max(stats.percentile));
        assert_eq!(threshold(&s, SearchMode::Discovery), stats.entropy.min(stats.std_dev));
        assert_relative_eq!(threshold(&s, SearchMode::Creative), 0.005, epsilon = 1e-15);
    }

    #[test]
    fn test_std_dev_floored_at_zero() {
        let s = [0.0, 0.0, 0.0, 0.0, 1.0];
        assert_eq!(std_dev_cutoff(&s), 0.0);
    }

    #[test]
    fn test_identical_scores() {
        let t = threshold(&[0.3; 8], SearchMode::Balanced);
        assert_eq!(t, 0.3);
    }

    #[test]
    fn test_non_finite_scores_ignored() {
        let t = threshold(&[f64::NAN, 0.4], SearchMode::Balanced);
        assert_relative_eq!(t, 0.12, epsilon = 1e-12);
    }

    #[test]
    fn test_quick_threshold() {
        assert_eq!(quick_threshold(&[], QuickMode::Strict), 0.01);
        let t = quick_threshold(&[0.8, 0.1], QuickMode::Balanced);
        assert_relative_eq!(t, 0.24, epsilon = 1e-12);
        let s = ladder();
        assert_eq!(quick_threshold(&s, QuickMode::Permissive), 0.01);
        assert_eq!(quick_threshold(&s, QuickMode::Balanced), 0.02);
        assert_eq!(quick_threshold(&s, QuickMode::Strict), 0.03);
    }
}
