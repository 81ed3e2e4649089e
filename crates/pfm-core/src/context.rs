use std::collections::{BTreeSet, VecDeque};

use serde::{Deserialize, Serialize};

use crate::constants::RECENT_QUERY_CAPACITY;

/// Exponentially smoothed engine health.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct PerformanceMetrics {
    pub avg_response_time_ms: f64,
    pub hit_rate: f64,
    pub emergence_frequency: f64,
}

impl Default for PerformanceMetrics {
    fn default() -> Self {
        Self {
            avg_response_time_ms: 0.0,
            hit_rate: 0.5,
            emergence_frequency: 0.0,
        }
    }
}

/// Smoothing factors: the weight given to each new observation.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct Smoothing {
    pub response: f64,
    pub hit: f64,
    pub emergence: f64,
}

impl Default for Smoothing {
    fn default() -> Self {
        Self {
            response: 0.1,
            hit: 0.1,
            emergence: 0.05,
        }
    }
}

/// Outcome of one query, folded into the context afterwards.
#[derive(Clone, Debug)]
pub struct QueryObservation {
    pub query: String,
    pub categories: Vec<String>,
    pub response_time_ms: f64,
    /// Fraction of returned memories with confidence > 0.7. `None` when
    /// nothing was returned.
    pub hit_fraction: Option<f64>,
    pub emerged: bool,
}

/// Process-lifetime state shared by every query.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct SystemContext {
    pub recent_queries: VecDeque<String>,
    pub active_categories: BTreeSet<String>,
    pub metrics: PerformanceMetrics,
}

impl SystemContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&mut self, obs: QueryObservation, smoothing: &Smoothing) {
        if self.recent_queries.len() >= RECENT_QUERY_CAPACITY {
            self.recent_queries.pop_front();
        }
        self.recent_queries.push_back(obs.query);
        self.active_categories
            .extend(obs.categories.into_iter().map(|c| c.to_uppercase()));

        let m = &mut self.metrics;
        m.avg_response_time_ms =
            blend(m.avg_response_time_ms, obs.response_time_ms, smoothing.response);
        let hit = obs.hit_fraction.unwrap_or(0.0);
        m.hit_rate = blend(m.hit_rate, hit, smoothing.hit);
        let emerged = if obs.emerged { 1.0 } else { 0.0 };
        m.emergence_frequency = blend(m.emergence_frequency, emerged, smoothing.emergence);
    }
}

fn blend(old: f64, new: f64, alpha: f64) -> f64 {
    (1.0 - alpha) * old + alpha * new
}

#[cfg(test)]
mod tests {
    use super::*;

    fn obs(q: &str, ms: f64) -> QueryObservation {
        QueryObservation {
            query: q.to_string(),
            categories: vec!["observer".to_string()],
            response_time_ms: ms,
            hit_fraction: Some(1.0),
            emerged: true,
        }
    }

    #[test]
    fn test_ring_buffer_evicts_oldest() {
        let mut ctx = SystemContext::new();
        for i in 0..12 {
            ctx.record(obs(&format!("q{i}"), 1.0), &Smoothing::default());
        }
        assert_eq!(ctx.recent_queries.len(), RECENT_QUERY_CAPACITY);
        assert_eq!(ctx.recent_queries.front().map(String::as_str), Some("q2"));
        assert_eq!(ctx.recent_queries.back().map(String::as_str), Some("q11"));
    }

    #[test]
    fn test_smoothed_metrics() {
        let mut ctx = SystemContext::new();
        ctx.record(obs("q", 100.0), &Smoothing::default());
        assert!((ctx.metrics.avg_response_time_ms - 10.0).abs() < 1e-9);
        assert!((ctx.metrics.hit_rate - 0.55).abs() < 1e-9);
        assert!((ctx.metrics.emergence_frequency - 0.05).abs() < 1e-9);
        assert!(ctx.active_categories.contains("OBSERVER"));
    }
}
