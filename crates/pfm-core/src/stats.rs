use std::collections::HashMap;

use serde::{Deserialize, Serialize};

/// Count-weighted running mean of one category's harmonic profile.
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct CategoryStats {
    pub count: u64,
    pub avg_strength: f64,
    pub avg_complexity: f64,
    pub avg_occurrences: f64,
}

impl CategoryStats {
    /// Fold one sample into the mean. Each step moves the mean by
    /// `(sample - mean) / (count + 1)`; there is no decay.
    pub fn update(&mut self, strength: f64, complexity: f64, occurrences: f64) {
        let n = self.count as f64 + 1.0;
        self.avg_strength += (strength - self.avg_strength) / n;
        self.avg_complexity += (complexity - self.avg_complexity) / n;
        self.avg_occurrences += (occurrences - self.avg_occurrences) / n;
        self.count += 1;
    }
}

/// Category statistics keyed by upper-cased category tag.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct CategoryStatsTable {
    stats: HashMap<String, CategoryStats>,
}

impl CategoryStatsTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn update(&mut self, category: &str, strength: f64, complexity: f64, occurrences: f64) {
        self.stats
            .entry(category.to_uppercase())
            .or_default()
            .update(strength, complexity, occurrences);
    }

    /// Stats for a category, `None` until at least one sample exists.
    pub fn get(&self, category: &str) -> Option<&CategoryStats> {
        self.stats
            .get(&category.to_uppercase())
            .filter(|s| s.count > 0)
    }

    pub fn contains(&self, category: &str) -> bool {
        self.get(category).is_some()
    }

    pub fn len(&self) -> usize {
        self.stats.len()
    }

    pub fn is_empty(&self) -> bool {
        self.stats.is_empty()
    }

    pub fn categories(&self) -> impl Iterator<Item = &str> {
        self.stats.keys().map(String::as_str)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_first_sample_is_mean() {
        let mut s = CategoryStats::default();
        s.update(0.8, 0.4, 10.0);
        assert_eq!(s.count, 1);
        assert_eq!(s.avg_strength, 0.8);
        assert_eq!(s.avg_occurrences, 10.0);
    }

    #[test]
    fn test_running_mean() {
        let mut s = CategoryStats::default();
        s.update(0.2, 0.0, 1.0);
        s.update(0.6, 1.0, 3.0);
        assert!((s.avg_strength - 0.4).abs() < 1e-12);
        assert!((s.avg_complexity - 0.5).abs() < 1e-12);
        assert!((s.avg_occurrences - 2.0).abs() < 1e-12);
    }

    #[test]
    fn test_table_is_case_insensitive() {
        let mut t = CategoryStatsTable::new();
        t.update("observer", 0.5, 0.5, 5.0);
        t.update("OBSERVER", 0.7, 0.5, 5.0);
        assert_eq!(t.len(), 1);
        assert_eq!(t.get("Observer").map(|s| s.count), Some(2));
        assert!(!t.contains("factory"));
    }
}
