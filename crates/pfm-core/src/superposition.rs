//! Weighted candidate sets evaluated against one probability field.
//!
//! Each candidate is scored with [`node_probability`]: the field value at its
//! coordinates scaled by `0.5 + 0.5 * quality`. Survivors are ranked, and the
//! dynamic threshold over their scores picks the dominant states. Pairs whose
//! content similarity clears the interference threshold are reported as
//! constructive or destructive interference. Coherence is the
//! probability-weighted mean pairwise similarity of the dominant states.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::field::{ProbabilityField, calculate_probability};
use crate::node::QuantumNode;
use crate::threshold::{QueryContext, SystemState, ThresholdManager};

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SuperpositionConfig {
    /// Candidates scoring below this are pruned before ranking.
    pub min_probability: f64,
    /// Content similarity and probability alignment needed to call a pair interfering.
    pub interference_threshold: f64,
    pub max_interference: usize,
    pub max_size: usize,
}

impl Default for SuperpositionConfig {
    fn default() -> Self {
        Self {
            min_probability: 0.01,
            interference_threshold: 0.6,
            max_interference: 10,
            max_size: 500,
        }
    }
}

#[derive(Clone, Debug)]
pub struct WeightedNode {
    pub node: Arc<QuantumNode>,
    pub probability: f64,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InterferenceKind {
    Constructive,
    Destructive,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct InterferencePattern {
    pub node_a: String,
    pub node_b: String,
    pub kind: InterferenceKind,
    pub strength: f64,
}

#[derive(Clone, Debug, Default)]
pub struct SuperpositionState {
    /// Every surviving candidate, probability descending.
    pub states: Vec<WeightedNode>,
    pub interference: Vec<InterferencePattern>,
    pub coherence: f64,
    /// Candidates at or above `significance`, probability descending.
    pub dominant: Vec<WeightedNode>,
    pub significance: f64,
}

impl SuperpositionState {
    pub fn is_empty(&self) -> bool {
        self.states.is_empty()
    }

    pub fn probability_of(&self, id: &str) -> Option<f64> {
        self.states
            .iter()
            .find(|w| w.node.id() == id)
            .map(|w| w.probability)
    }
}

#[derive(Clone, Debug, Default)]
pub struct SuperpositionEngine {
    config: SuperpositionConfig,
    thresholds: ThresholdManager,
}

impl SuperpositionEngine {
    pub fn new(config: SuperpositionConfig) -> Self {
        Self {
            config,
            thresholds: ThresholdManager::new(),
        }
    }

    pub fn config(&self) -> &SuperpositionConfig {
        &self.config
    }

    /// Score every candidate against the field and rank the survivors.
    pub fn create_superposition(
        &self,
        field: &ProbabilityField,
        candidates: &[Arc<QuantumNode>],
        query: &QueryContext,
        system: &SystemState,
    ) -> SuperpositionState {
        let mut states: Vec<WeightedNode> = candidates
            .iter()
            .map(|node| WeightedNode {
                probability: node_probability(node, field),
                node: Arc::clone(node),
            })
            .filter(|w| w.probability >= self.config.min_probability)
            .collect();

        states.sort_by(|a, b| {
            b.probability
                .total_cmp(&a.probability)
                .then_with(|| a.node.id().cmp(b.node.id()))
        });
        states.truncate(self.config.max_size);

        if states.is_empty() {
            debug!(candidates = candidates.len(), "superposition empty");
            return SuperpositionState::default();
        }

        let probabilities: Vec<f64> = states.iter().map(|w| w.probability).collect();
        let significance = self
            .thresholds
            .calculate_dynamic_threshold(&probabilities, query, system);

        let dominant: Vec<WeightedNode> = states
            .iter()
            .filter(|w| w.probability >= significance)
            .cloned()
            .collect();

        let interference = self.interference(&states);
        let coherence = coherence(&dominant);

        SuperpositionState {
            states,
            interference,
            coherence,
            dominant,
            significance,
        }
    }

    fn interference(&self, states: &[WeightedNode]) -> Vec<InterferencePattern> {
        let thr = self.config.interference_threshold;
        let mut out = Vec::new();

        for (i, a) in states.iter().enumerate() {
            for b in &states[i + 1..] {
                let similarity = a.node.content_similarity(&b.node);
                if similarity < thr {
                    continue;
                }
                let high = a.probability.max(b.probability);
                let alignment = if high > 0.0 {
                    1.0 - (a.probability - b.probability).abs() / high
                } else {
                    1.0
                };

                let (kind, strength) = if alignment >= thr {
                    (InterferenceKind::Constructive, similarity * alignment)
                } else if alignment < 1.0 - thr {
                    (InterferenceKind::Destructive, similarity * (1.0 - alignment))
                } else {
                    continue;
                };

                out.push(InterferencePattern {
                    node_a: a.node.id().to_string(),
                    node_b: b.node.id().to_string(),
                    kind,
                    strength,
                });
            }
        }

        out.sort_by(|x, y| y.strength.total_cmp(&x.strength));
        out.truncate(self.config.max_interference);
        out
    }
}

/// Field probability scaled by node quality. Non-decreasing in both.
pub fn node_probability(node: &QuantumNode, field: &ProbabilityField) -> f64 {
    let p = calculate_probability(node.coordinates(), field);
    let quality =
        0.5 * node.confidence_score.clamp(0.0, 1.0) + 0.5 * node.resonance_strength.clamp(0.0, 1.0);
    (p * (0.5 + 0.5 * quality)).clamp(0.0, 1.0)
}

/// Probability-weighted mean pairwise similarity. One node is fully
/// coherent; an empty set has no coherence.
fn coherence(dominant: &[WeightedNode]) -> f64 {
    match dominant.len() {
        0 => return 0.0,
        1 => return 1.0,
        _ => {}
    }
    let mut weighted = 0.0;
    let mut weights = 0.0;
    for (i, a) in dominant.iter().enumerate() {
        for b in &dominant[i + 1..] {
            let w = a.probability * b.probability;
            weighted += w * a.node.content_similarity(&b.node);
            weights += w;
        }
    }
    if weights > 0.0 {
        (weighted / weights).clamp(0.0, 1.0)
    } else {
        0.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::coords::Coordinates;
    use crate::field::Falloff;
    use crate::harmonic::HarmonicWeights;
    use crate::record::{HarmonicProperties, MemoryRecord, PatternContent};
    use crate::threshold::SearchMode;

    fn node(id: &str, category: &str, at: Coordinates, tags: &[&str]) -> Arc<QuantumNode> {
        let mut record = MemoryRecord::new(
            id,
            PatternContent {
                tags: tags.iter().map(|t| t.to_string()).collect(),
                ..PatternContent::default()
            },
            HarmonicProperties {
                category: category.to_string(),
                strength: 0.8,
                occurrences: 13,
                confidence: 0.9,
                complexity: 0.6,
            },
        );
        record.coordinates = at;
        Arc::new(QuantumNode::from_record(record, &HarmonicWeights::default()))
    }

    fn field() -> ProbabilityField {
        ProbabilityField::new(Coordinates::new(0.5, 0.5, 0.5), 0.3, Falloff::Gaussian, 1.0, 2.0)
    }

    fn create(candidates: &[Arc<QuantumNode>]) -> SuperpositionState {
        SuperpositionEngine::default().create_superposition(
            &field(),
            candidates,
            &QueryContext::new(SearchMode::Balanced),
            &SystemState::default(),
        )
    }

    #[test]
    fn test_empty_candidates() {
        let s = create(&[]);
        assert!(s.is_empty());
        assert!(s.dominant.is_empty());
        assert_eq!(s.coherence, 0.0);
    }

    #[test]
    fn test_ranked_descending_and_pruned() {
        let nodes = vec![
            node("far", "observer", Coordinates::new(3.0, 3.0, 3.0), &[]),
            node("mid", "observer", Coordinates::new(0.6, 0.5, 0.5), &[]),
            node("near", "observer", Coordinates::new(0.5, 0.5, 0.51), &[]),
        ];
        let s = create(&nodes);
        let ids: Vec<&str> = s.states.iter().map(|w| w.node.id()).collect();
        assert_eq!(ids, vec!["near", "mid"]);
        assert!(s.probability_of("far").is_none());
    }

    #[test]
    fn test_single_dominant_is_fully_coherent() {
        let nodes = vec![node("only", "observer", Coordinates::new(0.5, 0.5, 0.5), &[])];
        let s = create(&nodes);
        assert_eq!(s.dominant.len(), 1);
        assert_eq!(s.coherence, 1.0);
    }

    #[test]
    fn test_constructive_interference_between_similar_neighbors() {
        let nodes = vec![
            node("a", "observer", Coordinates::new(0.5, 0.5, 0.5), &["events"]),
            node("b", "observer", Coordinates::new(0.5, 0.5, 0.52), &["events"]),
        ];
        let s = create(&nodes);
        assert_eq!(s.interference.len(), 1);
        assert_eq!(s.interference[0].kind, InterferenceKind::Constructive);
        assert!(s.coherence > 0.9);
    }

    #[test]
    fn test_interference_is_capped() {
        let nodes: Vec<_> = (0..8)
            .map(|i| {
                node(
                    &format!("n{i}"),
                    "observer",
                    Coordinates::new(0.5, 0.5, 0.5 + i as f64 * 0.001),
                    &["events"],
                )
            })
            .collect();
        let engine = SuperpositionEngine::new(SuperpositionConfig {
            max_interference: 3,
            ..SuperpositionConfig::default()
        });
        let s = engine.create_superposition(
            &field(),
            &nodes,
            &QueryContext::new(SearchMode::Balanced),
            &SystemState::default(),
        );
        assert_eq!(s.interference.len(), 3);
    }

    #[test]
    fn test_probability_monotone_in_quality() {
        let f = field();
        let at = Coordinates::new(0.55, 0.5, 0.5);
        let strong = node("s", "observer", at, &[]);
        let mut weak = (*strong).clone();
        weak.confidence_score *= 0.5;
        weak.resonance_strength *= 0.5;
        assert!(node_probability(&strong, &f) > node_probability(&weak, &f));
    }
}
