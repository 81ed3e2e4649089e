use serde::{Deserialize, Serialize};

use crate::coords::Coordinates;
use crate::harmonic::{HarmonicWeights, harmonic_score};
use crate::record::MemoryRecord;

/// A stored record plus the derived state the field engine scores against.
///
/// Nodes are owned by the engine's node table. Readers work on shared
/// snapshots; the only mutation after creation is access bookkeeping, which
/// the table applies copy-on-write.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct QuantumNode {
    pub record: MemoryRecord,
    pub resting_activation: f64,
    pub current_activation: f64,
    pub significance_threshold: f64,
    /// Record confidence × harmonic score.
    pub confidence_score: f64,
    pub resonance_strength: f64,
    pub access_count: u32,
    /// Unix millis of the last access, 0 if never accessed.
    pub last_accessed: u64,
}

impl QuantumNode {
    pub fn from_record(record: MemoryRecord, weights: &HarmonicWeights) -> Self {
        let record = record.normalized();
        let h = &record.harmonic;
        let harmonic = harmonic_score(h, weights);
        let resting = 0.1 + 0.4 * h.strength;

        Self {
            resting_activation: resting,
            current_activation: resting,
            significance_threshold: (0.5 * (1.0 - h.confidence)).max(0.05),
            confidence_score: h.confidence * harmonic,
            resonance_strength: (0.6 * h.strength + 0.4 * harmonic).clamp(0.0, 1.0),
            access_count: 0,
            last_accessed: 0,
            record,
        }
    }

    pub fn id(&self) -> &str {
        &self.record.id
    }

    pub fn coordinates(&self) -> Coordinates {
        self.record.coordinates
    }

    pub fn category(&self) -> &str {
        &self.record.harmonic.category
    }

    /// Mark the node as returned to a caller. Activation rises toward 1.0
    /// with diminishing steps.
    pub fn record_access(&mut self, now_ms: u64) {
        self.access_count = self.access_count.saturating_add(1);
        self.last_accessed = now_ms;
        self.current_activation += (1.0 - self.current_activation) * 0.1;
    }

    /// Novelty falls with repeated access: 1 / (1 + ln(1 + accesses)).
    pub fn novelty(&self) -> f64 {
        1.0 / (1.0 + (1.0 + self.access_count as f64).ln())
    }

    /// Content similarity in [0, 1]: same category, shared tags, spatial proximity.
    pub fn content_similarity(&self, other: &QuantumNode) -> f64 {
        let same_category = if self.category().eq_ignore_ascii_case(other.category()) {
            1.0
        } else {
            0.0
        };

        let a = &self.record.content.tags;
        let b = &other.record.content.tags;
        let tag_overlap = if a.is_empty() && b.is_empty() {
            same_category
        } else {
            let shared = a.iter().filter(|t| b.contains(t)).count() as f64;
            let union = (a.len() + b.len()) as f64 - shared;
            if union > 0.0 { shared / union } else { 0.0 }
        };

        let proximity = 1.0 / (1.0 + self.coordinates().distance(other.coordinates()) * 4.0);

        (same_category + tag_overlap + proximity) / 3.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::{HarmonicProperties, PatternContent};

    fn node(category: &str, tags: &[&str], strength: f64) -> QuantumNode {
        let record = MemoryRecord::new(
            format!("{category}-{strength}"),
            PatternContent {
                tags: tags.iter().map(|t| t.to_string()).collect(),
                ..PatternContent::default()
            },
            HarmonicProperties {
                category: category.to_string(),
                strength,
                occurrences: 8,
                confidence: 0.9,
                complexity: 0.6,
            },
        );
        QuantumNode::from_record(record, &HarmonicWeights::default())
    }

    #[test]
    fn test_derived_fields_in_range() {
        let n = node("observer", &[], 0.8);
        assert!(n.confidence_score > 0.0 && n.confidence_score <= 0.9);
        assert!((0.0..=1.0).contains(&n.resonance_strength));
        assert_eq!(n.current_activation, n.resting_activation);
        assert!(!n.coordinates().is_unset());
    }

    #[test]
    fn test_record_access_raises_activation() {
        let mut n = node("observer", &[], 0.5);
        let before = n.current_activation;
        n.record_access(1234);
        assert!(n.current_activation > before);
        assert_eq!(n.access_count, 1);
        assert_eq!(n.last_accessed, 1234);
    }

    #[test]
    fn test_novelty_decreases_with_access() {
        let mut n = node("observer", &[], 0.5);
        let fresh = n.novelty();
        n.record_access(1);
        n.record_access(2);
        assert_eq!(fresh, 1.0);
        assert!(n.novelty() < fresh);
    }

    #[test]
    fn test_content_similarity_prefers_same_category() {
        let a = node("observer", &["events"], 0.8);
        let b = node("observer", &["events"], 0.7);
        let c = node("factory", &["creation"], 0.7);
        assert!(a.content_similarity(&b) > a.content_similarity(&c));
        assert!(a.content_similarity(&b) <= 1.0);
    }
}
