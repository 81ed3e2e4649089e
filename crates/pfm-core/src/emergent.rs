//! Insights surfaced from a superposition beyond the literal query.
//!
//! Four behaviors are recognized:
//! - synthesis: several mutually similar dominant nodes, ideally across categories
//! - flashback: one node whose probability far exceeds its own significance threshold
//! - deja_vu: a dominant node that has been returned many times before
//! - dream: low-activation nodes from categories outside the active context
//!
//! [`EmergentBehaviorEngine::detect`] scans a live superposition.
//! [`EmergentBehaviorEngine::trigger_behavior`] forces one behavior over the
//! whole node population.

use std::collections::{BTreeSet, HashSet};
use std::fmt;
use std::sync::Arc;

use rand::Rng;
use rand::seq::SliceRandom;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::coords::Coordinates;
use crate::context::SystemContext;
use crate::field::{Falloff, ProbabilityField, calculate_probability};
use crate::node::QuantumNode;
use crate::superposition::SuperpositionState;

/// Radius of the widened field used by a forced deja_vu scan.
const DEJA_VU_SCAN_RADIUS: f64 = 0.6;
/// Minimum similarity for one flashback hop.
const ASSOCIATION_SIMILARITY: f64 = 0.5;
/// Activation below which a node counts as dormant.
const DORMANT_ACTIVATION: f64 = 0.3;
/// Most node ids carried on one insight.
const MAX_INSIGHT_NODES: usize = 10;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BehaviorKind {
    Dream,
    Flashback,
    DejaVu,
    Synthesis,
}

impl fmt::Display for BehaviorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Dream => "dream",
            Self::Flashback => "flashback",
            Self::DejaVu => "deja_vu",
            Self::Synthesis => "synthesis",
        };
        f.write_str(s)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BehaviorToggle {
    pub enabled: bool,
    pub threshold: f64,
}

impl Default for BehaviorToggle {
    fn default() -> Self {
        Self {
            enabled: true,
            threshold: 0.6,
        }
    }
}

impl BehaviorToggle {
    pub fn new(enabled: bool, threshold: f64) -> Self {
        Self { enabled, threshold }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EmergentConfig {
    pub dream: BehaviorToggle,
    pub flashback: BehaviorToggle,
    pub deja_vu: BehaviorToggle,
    pub synthesis: BehaviorToggle,
    pub cascade_depth: usize,
    pub synthesis_min_nodes: usize,
    pub dream_sample: usize,
    pub novelty_threshold: f64,
    /// Uncertainty (1 − hit rate) above which a forced deja_vu rescans.
    pub uncertainty_threshold: f64,
}

impl Default for EmergentConfig {
    fn default() -> Self {
        Self {
            dream: BehaviorToggle::new(true, 0.8),
            flashback: BehaviorToggle::new(true, 0.5),
            deja_vu: BehaviorToggle::new(true, 0.7),
            synthesis: BehaviorToggle::new(true, 0.6),
            cascade_depth: 3,
            synthesis_min_nodes: 3,
            dream_sample: 5,
            novelty_threshold: 0.5,
            uncertainty_threshold: 0.4,
        }
    }
}

impl EmergentConfig {
    pub fn toggle(&self, kind: BehaviorKind) -> BehaviorToggle {
        match kind {
            BehaviorKind::Dream => self.dream,
            BehaviorKind::Flashback => self.flashback,
            BehaviorKind::DejaVu => self.deja_vu,
            BehaviorKind::Synthesis => self.synthesis,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct EmergentInsight {
    pub kind: BehaviorKind,
    pub description: String,
    pub node_ids: Vec<String>,
    pub significance: f64,
}

/// Per-call overrides.
#[derive(Clone, Copy, Debug, Default)]
pub struct DetectOptions {
    /// Replaces every behavior's configured threshold when set.
    pub threshold: Option<f64>,
}

#[derive(Clone, Debug, Default)]
pub struct EmergentBehaviorEngine {
    config: EmergentConfig,
}

impl EmergentBehaviorEngine {
    pub fn new(config: EmergentConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &EmergentConfig {
        &self.config
    }

    /// Scan the dominant states of a live superposition.
    pub fn detect(
        &self,
        superposition: &SuperpositionState,
        context: &SystemContext,
        options: &DetectOptions,
    ) -> Vec<EmergentInsight> {
        if superposition.dominant.is_empty() {
            return Vec::new();
        }
        let threshold_for =
            |kind: BehaviorKind| options.threshold.unwrap_or(self.config.toggle(kind).threshold);

        let passes = |kind: BehaviorKind, insight: &EmergentInsight| {
            self.config.toggle(kind).enabled && insight.significance >= threshold_for(kind)
        };

        let insights: Vec<EmergentInsight> = [
            self.scan_synthesis(superposition),
            scan_flashback(superposition),
            scan_deja_vu(superposition),
            scan_dream(superposition, context),
        ]
        .into_iter()
        .flatten()
        .filter(|i| passes(i.kind, i))
        .collect();

        if !insights.is_empty() {
            debug!(count = insights.len(), "emergent insights detected");
        }
        insights
    }

    fn scan_synthesis(&self, sp: &SuperpositionState) -> Option<EmergentInsight> {
        if sp.dominant.len() < self.config.synthesis_min_nodes.max(2) {
            return None;
        }
        let categories: BTreeSet<String> = sp
            .dominant
            .iter()
            .map(|w| w.node.record.category_key())
            .collect();
        let spread = if categories.len() > 1 { 1.0 } else { 0.8 };
        Some(EmergentInsight {
            kind: BehaviorKind::Synthesis,
            description: format!(
                "{} mutually similar patterns converge across {}",
                sp.dominant.len(),
                join_categories(&categories)
            ),
            node_ids: ids(sp.dominant.iter().map(|w| &w.node)),
            significance: sp.coherence * spread,
        })
    }

    /// Run one behavior over the whole node population, independent of any query.
    /// Enable flags are ignored; the behavior's own preconditions still apply.
    pub fn trigger_behavior(
        &self,
        kind: BehaviorKind,
        nodes: &[Arc<QuantumNode>],
        context: &SystemContext,
        rng: &mut impl Rng,
    ) -> Vec<EmergentInsight> {
        if nodes.is_empty() {
            return Vec::new();
        }
        let insight = match kind {
            BehaviorKind::Dream => self.force_dream(nodes, rng),
            BehaviorKind::Flashback => self.force_flashback(nodes),
            BehaviorKind::DejaVu => self.force_deja_vu(nodes, context),
            BehaviorKind::Synthesis => self.force_synthesis(nodes),
        };
        insight.into_iter().collect()
    }

    fn force_dream(
        &self,
        nodes: &[Arc<QuantumNode>],
        rng: &mut impl Rng,
    ) -> Option<EmergentInsight> {
        let mut pool: Vec<&Arc<QuantumNode>> = nodes.iter().collect();
        pool.sort_by(|a, b| a.current_activation.total_cmp(&b.current_activation));
        pool.truncate(self.config.dream_sample.max(1) * 2);
        pool.shuffle(rng);
        pool.truncate(self.config.dream_sample.max(1));

        let mean_activation =
            pool.iter().map(|n| n.current_activation).sum::<f64>() / pool.len() as f64;
        let categories: BTreeSet<String> = pool.iter().map(|n| n.record.category_key()).collect();
        Some(EmergentInsight {
            kind: BehaviorKind::Dream,
            description: format!(
                "dormant patterns resurfaced from {}",
                join_categories(&categories)
            ),
            node_ids: ids(pool.into_iter()),
            significance: (1.0 - mean_activation).clamp(0.0, 1.0),
        })
    }

    fn force_flashback(&self, nodes: &[Arc<QuantumNode>]) -> Option<EmergentInsight> {
        let seed = nodes
            .iter()
            .max_by(|a, b| a.resonance_strength.total_cmp(&b.resonance_strength))?;

        let mut chain = vec![Arc::clone(seed)];
        let mut visited: HashSet<&str> = HashSet::from([seed.id()]);
        let mut hop_similarity = Vec::new();

        for _ in 0..self.config.cascade_depth {
            let Some(current) = chain.last().cloned() else {
                break;
            };
            let next = nodes
                .iter()
                .filter(|n| !visited.contains(n.id()))
                .map(|n| (n, current.content_similarity(n)))
                .filter(|(_, s)| *s >= ASSOCIATION_SIMILARITY)
                .max_by(|a, b| a.1.total_cmp(&b.1));
            let Some((node, sim)) = next else {
                break;
            };
            visited.insert(node.id());
            hop_similarity.push(sim);
            chain.push(Arc::clone(node));
        }

        let significance = if hop_similarity.is_empty() {
            seed.resonance_strength
        } else {
            hop_similarity.iter().sum::<f64>() / hop_similarity.len() as f64
        };
        Some(EmergentInsight {
            kind: BehaviorKind::Flashback,
            description: format!(
                "association cascade of {} hops from '{}'",
                hop_similarity.len(),
                seed.record.content.title
            ),
            node_ids: ids(chain.iter()),
            significance,
        })
    }

    fn force_deja_vu(
        &self,
        nodes: &[Arc<QuantumNode>],
        context: &SystemContext,
    ) -> Option<EmergentInsight> {
        let uncertainty = 1.0 - context.metrics.hit_rate;
        if uncertainty < self.config.uncertainty_threshold {
            return None;
        }

        let focus: Vec<Coordinates> = nodes
            .iter()
            .filter(|n| context.active_categories.contains(&n.record.category_key()))
            .map(|n| n.coordinates())
            .collect();
        let center = Coordinates::centroid(focus.iter())
            .or_else(|| Coordinates::centroid(nodes.iter().map(|n| &n.record.coordinates)))?;

        let wide = ProbabilityField::new(center, DEJA_VU_SCAN_RADIUS, Falloff::Gaussian, 1.0, 2.0);
        let mut hits: Vec<(&Arc<QuantumNode>, f64)> = nodes
            .iter()
            .map(|n| (n, calculate_probability(n.coordinates(), &wide)))
            .filter(|(_, p)| *p >= 0.5)
            .collect();
        if hits.is_empty() {
            return None;
        }
        hits.sort_by(|a, b| b.1.total_cmp(&a.1));

        Some(EmergentInsight {
            kind: BehaviorKind::DejaVu,
            description: format!("{} familiar patterns near the recent focus", hits.len()),
            node_ids: ids(hits.iter().map(|(n, _)| *n)),
            significance: uncertainty,
        })
    }

    fn force_synthesis(&self, nodes: &[Arc<QuantumNode>]) -> Option<EmergentInsight> {
        let novel: Vec<&Arc<QuantumNode>> = nodes
            .iter()
            .filter(|n| n.novelty() >= self.config.novelty_threshold)
            .collect();
        let categories: BTreeSet<String> = novel.iter().map(|n| n.record.category_key()).collect();
        if novel.len() < self.config.synthesis_min_nodes || categories.len() < 2 {
            return None;
        }

        let mean_novelty = novel.iter().map(|n| n.novelty()).sum::<f64>() / novel.len() as f64;
        Some(EmergentInsight {
            kind: BehaviorKind::Synthesis,
            description: format!(
                "{} novel patterns could combine across {}",
                novel.len(),
                join_categories(&categories)
            ),
            node_ids: ids(novel.into_iter()),
            significance: mean_novelty,
        })
    }
}

fn scan_flashback(sp: &SuperpositionState) -> Option<EmergentInsight> {
    let (w, margin) = sp
        .dominant
        .iter()
        .map(|w| {
            let thr = w.node.significance_threshold.clamp(0.0, 0.99);
            (w, ((w.probability - thr) / (1.0 - thr)).clamp(0.0, 1.0))
        })
        .max_by(|a, b| a.1.total_cmp(&b.1))?;
    Some(EmergentInsight {
        kind: BehaviorKind::Flashback,
        description: format!("'{}' resonates far above its threshold", w.node.record.content.title),
        node_ids: vec![w.node.id().to_string()],
        significance: margin,
    })
}

fn scan_deja_vu(sp: &SuperpositionState) -> Option<EmergentInsight> {
    let w = sp
        .dominant
        .iter()
        .filter(|w| w.node.access_count > 0)
        .min_by(|a, b| a.node.novelty().total_cmp(&b.node.novelty()))?;
    Some(EmergentInsight {
        kind: BehaviorKind::DejaVu,
        description: format!(
            "'{}' has surfaced {} times before",
            w.node.record.content.title, w.node.access_count
        ),
        node_ids: vec![w.node.id().to_string()],
        significance: 1.0 - w.node.novelty(),
    })
}

fn scan_dream(sp: &SuperpositionState, context: &SystemContext) -> Option<EmergentInsight> {
    let dormant: Vec<_> = sp
        .dominant
        .iter()
        .filter(|w| w.node.current_activation < DORMANT_ACTIVATION)
        .filter(|w| !context.active_categories.contains(&w.node.record.category_key()))
        .collect();
    if dormant.is_empty() {
        return None;
    }
    Some(EmergentInsight {
        kind: BehaviorKind::Dream,
        description: format!("{} dormant patterns from outside the current focus", dormant.len()),
        node_ids: ids(dormant.iter().map(|w| &w.node)),
        significance: dormant.len() as f64 / sp.dominant.len() as f64,
    })
}

fn ids<'a>(nodes: impl Iterator<Item = &'a Arc<QuantumNode>>) -> Vec<String> {
    nodes.take(MAX_INSIGHT_NODES).map(|n| n.id().to_string()).collect()
}

fn join_categories(categories: &BTreeSet<String>) -> String {
    categories.iter().cloned().collect::<Vec<_>>().join(", ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::harmonic::HarmonicWeights;
    use crate::record::{HarmonicProperties, MemoryRecord, PatternContent};
    use crate::superposition::WeightedNode;
    use rand::SeedableRng;
    use rand::rngs::SmallRng;

    fn node(id: &str, category: &str, strength: f64, at: Coordinates) -> Arc<QuantumNode> {
        let mut record = MemoryRecord::new(
            id,
            PatternContent {
                title: id.to_string(),
                tags: vec!["shared".to_string()],
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
        record.coordinates = at;
        Arc::new(QuantumNode::from_record(record, &HarmonicWeights::default()))
    }

    fn state(nodes: &[Arc<QuantumNode>], probability: f64, coherence: f64) -> SuperpositionState {
        let weighted: Vec<WeightedNode> = nodes
            .iter()
            .map(|n| WeightedNode {
                node: Arc::clone(n),
                probability,
            })
            .collect();
        SuperpositionState {
            states: weighted.clone(),
            interference: Vec::new(),
            coherence,
            dominant: weighted,
            significance: 0.1,
        }
    }

    fn at(v: f64) -> Coordinates {
        Coordinates::new(v, v, v)
    }

    #[test]
    fn test_empty_superposition_has_no_insights() {
        let engine = EmergentBehaviorEngine::default();
        let insights = engine.detect(
            &SuperpositionState::default(),
            &SystemContext::new(),
            &DetectOptions::default(),
        );
        assert!(insights.is_empty());
    }

    #[test]
    fn test_synthesis_from_coherent_dominant_set() {
        let nodes = vec![
            node("a", "observer", 0.8, at(0.5)),
            node("b", "factory", 0.8, at(0.51)),
            node("c", "builder", 0.8, at(0.52)),
        ];
        let engine = EmergentBehaviorEngine::default();
        let insights = engine.detect(
            &state(&nodes, 0.9, 0.9),
            &SystemContext::new(),
            &DetectOptions::default(),
        );
        let synthesis = insights.iter().find(|i| i.kind == BehaviorKind::Synthesis).unwrap();
        assert_eq!(synthesis.node_ids.len(), 3);
    }

    #[test]
    fn test_disabled_behavior_is_skipped() {
        let nodes = vec![
            node("a", "observer", 0.8, at(0.5)),
            node("b", "factory", 0.8, at(0.51)),
            node("c", "builder", 0.8, at(0.52)),
        ];
        let engine = EmergentBehaviorEngine::new(EmergentConfig {
            synthesis: BehaviorToggle::new(false, 0.0),
            flashback: BehaviorToggle::new(false, 0.0),
            ..EmergentConfig::default()
        });
        let insights = engine.detect(
            &state(&nodes, 0.9, 0.9),
            &SystemContext::new(),
            &DetectOptions::default(),
        );
        assert!(insights.iter().all(|i| i.kind != BehaviorKind::Synthesis));
        assert!(insights.iter().all(|i| i.kind != BehaviorKind::Flashback));
    }

    #[test]
    fn test_flashback_when_probability_far_exceeds_threshold() {
        let nodes = vec![node("hero", "observer", 0.9, at(0.5))];
        let engine = EmergentBehaviorEngine::default();
        let insights = engine.detect(
            &state(&nodes, 0.95, 1.0),
            &SystemContext::new(),
            &DetectOptions::default(),
        );
        assert!(insights.iter().any(|i| i.kind == BehaviorKind::Flashback));

        let quiet = engine.detect(
            &state(&nodes, 0.06, 1.0),
            &SystemContext::new(),
            &DetectOptions::default(),
        );
        assert!(quiet.iter().all(|i| i.kind != BehaviorKind::Flashback));
    }

    #[test]
    fn test_threshold_override() {
        let nodes = vec![node("hero", "observer", 0.9, at(0.5))];
        let engine = EmergentBehaviorEngine::default();
        let strict = DetectOptions { threshold: Some(1.01) };
        let insights = engine.detect(&state(&nodes, 0.95, 1.0), &SystemContext::new(), &strict);
        assert!(insights.is_empty());
    }

    #[test]
    fn test_forced_dream_samples_low_activation() {
        let nodes: Vec<_> = (0..12)
            .map(|i| node(&format!("n{i}"), "observer", i as f64 / 12.0, at(0.1 + i as f64 * 0.05)))
            .collect();
        let engine = EmergentBehaviorEngine::default();
        let mut rng = SmallRng::seed_from_u64(42);
        let insights =
            engine.trigger_behavior(BehaviorKind::Dream, &nodes, &SystemContext::new(), &mut rng);
        assert_eq!(insights.len(), 1);
        assert_eq!(insights[0].node_ids.len(), 5);
        for id in &insights[0].node_ids {
            let idx: usize = id[1..].parse().unwrap();
            assert!(idx < 10, "sampled a high-activation node: {id}");
        }
    }

    #[test]
    fn test_forced_flashback_cascades_within_depth() {
        let nodes: Vec<_> = (0..6)
            .map(|i| {
                let step = i as f64;
                node(&format!("n{i}"), "observer", 0.5 + step * 0.05, at(0.5 + step * 0.01))
            })
            .collect();
        let engine = EmergentBehaviorEngine::default();
        let mut rng = SmallRng::seed_from_u64(42);
        let insights = engine.trigger_behavior(
            BehaviorKind::Flashback,
            &nodes,
            &SystemContext::new(),
            &mut rng,
        );
        assert_eq!(insights.len(), 1);
        assert_eq!(insights[0].node_ids[0], "n5");
        assert_eq!(insights[0].node_ids.len(), 1 + 3);
    }

    #[test]
    fn test_forced_synthesis_needs_cross_category_nodes() {
        let engine = EmergentBehaviorEngine::default();
        let mut rng = SmallRng::seed_from_u64(42);
        let same: Vec<_> = (0..4)
            .map(|i| node(&format!("s{i}"), "observer", 0.7, at(0.5)))
            .collect();
        assert!(
            engine
                .trigger_behavior(BehaviorKind::Synthesis, &same, &SystemContext::new(), &mut rng)
                .is_empty()
        );

        let mixed = vec![
            node("a", "observer", 0.7, at(0.5)),
            node("b", "factory", 0.7, at(0.5)),
            node("c", "builder", 0.7, at(0.5)),
        ];
        let insights = engine.trigger_behavior(
            BehaviorKind::Synthesis,
            &mixed,
            &SystemContext::new(),
            &mut rng,
        );
        assert_eq!(insights.len(), 1);
    }

    #[test]
    fn test_forced_deja_vu_requires_uncertainty() {
        let nodes = vec![node("a", "observer", 0.7, at(0.5)), node("b", "observer", 0.7, at(0.52))];
        let engine = EmergentBehaviorEngine::default();
        let mut rng = SmallRng::seed_from_u64(42);

        let mut confident = SystemContext::new();
        confident.metrics.hit_rate = 0.95;
        assert!(
            engine
                .trigger_behavior(BehaviorKind::DejaVu, &nodes, &confident, &mut rng)
                .is_empty()
        );

        let insights =
            engine.trigger_behavior(BehaviorKind::DejaVu, &nodes, &SystemContext::new(), &mut rng);
        assert_eq!(insights.len(), 1);
        assert_eq!(insights[0].node_ids.len(), 2);
    }
}
