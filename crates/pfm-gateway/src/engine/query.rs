use std::collections::BTreeSet;
use std::sync::Arc;

use pfm_core::superposition::node_probability;
use pfm_core::{
    DetectOptions, EmergentInsight, Falloff, FieldKind, FieldQuery, InterferencePattern,
    ProbabilityField, QuantumNode, QueryContext, QueryObservation, QuickMode, SearchMode,
    SuperpositionState, SystemContext, SystemState, WeightedNode, morph_field, quick_threshold,
};
use pfm_store::QueryOptions;
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::collapse::{PhaseClock, PhaseTimings, RetrievedMemory, collapse};
use super::request::{CanonicalQuery, DEFAULT_MAX_RESULTS, QueryRequest, normalize};
use super::{NodeTable, RetrievalEngine};
use crate::error::{GatewayError, Result};

/// Candidate cap for the hybrid pre-filter.
const HYBRID_PREFILTER: usize = 100;
/// Emergent threshold used on the hybrid path.
const HYBRID_EMERGENT_THRESHOLD: f64 = 0.5;
/// Exploration above which discovery fields are morphed before use.
const MORPH_EXPLORATION: f64 = 0.7;
/// Record confidence counted as a hit in the smoothed hit rate.
const HIT_CONFIDENCE: f64 = 0.7;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Strategy {
    Precision,
    Discovery,
    Hybrid,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Thresholds {
    pub confidence: f64,
    pub exploration: f64,
}

#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct QueryResult {
    pub strategy: Strategy,
    pub memories: Vec<RetrievedMemory>,
    pub insights: Vec<EmergentInsight>,
    pub interference: Vec<InterferencePattern>,
    pub coherence: f64,
    pub field: ProbabilityField,
    pub thresholds: Thresholds,
    pub timings: PhaseTimings,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct SimilarOptions {
    pub min_similarity: Option<f64>,
    pub max_results: Option<usize>,
}

/// What a strategy path hands back before bookkeeping.
struct PathOutcome {
    field: ProbabilityField,
    chosen: Vec<WeightedNode>,
    superposition: SuperpositionState,
    insights: Vec<EmergentInsight>,
}

fn search_mode(kind: FieldKind) -> SearchMode {
    match kind {
        FieldKind::Precision => SearchMode::Precision,
        FieldKind::Discovery => SearchMode::Discovery,
        FieldKind::Creative => SearchMode::Creative,
    }
}

pub(super) fn choose_strategy(q: &CanonicalQuery, t: &Thresholds) -> Strategy {
    if q.kind == FieldKind::Precision && q.confidence > t.confidence {
        Strategy::Precision
    } else if q.kind == FieldKind::Discovery || q.exploration > t.exploration {
        Strategy::Discovery
    } else {
        Strategy::Hybrid
    }
}

impl RetrievalEngine {
    pub async fn query(&self, request: impl Into<QueryRequest>) -> Result<QueryResult> {
        let request = request.into();
        let mut clock = PhaseClock::start();
        let mut timings = PhaseTimings::floored();

        let snapshot = self.snapshot().await;
        let context = self.context.lock().await.clone();
        let q = normalize(&request, self.generator.read().await.stats());
        timings.normalize_ms = clock.lap();

        let system = self.system_state(snapshot.len(), &context);
        let thresholds = self.thresholds_for(&snapshot, &context, &system);
        let strategy = choose_strategy(&q, &thresholds);
        debug!(
            ?strategy,
            kind = ?q.kind,
            confidence = q.confidence,
            exploration = q.exploration,
            confidence_threshold = thresholds.confidence,
            exploration_threshold = thresholds.exploration,
            "strategy selected"
        );

        let outcome = match strategy {
            Strategy::Precision => {
                self.precision_path(&q, &context, &system, &mut clock, &mut timings)
                    .await?
            }
            Strategy::Discovery => {
                self.discovery_path(&q, &snapshot, &context, &system, &mut clock, &mut timings)
                    .await?
            }
            Strategy::Hybrid => {
                self.hybrid_path(&q, &context, &system, &mut clock, &mut timings)
                    .await?
            }
        };

        let memories: Vec<RetrievedMemory> =
            outcome.chosen.iter().map(RetrievedMemory::from_weighted).collect();
        let ids: Vec<String> = memories.iter().map(|m| m.id.clone()).collect();
        drop(snapshot);
        self.touch(&ids).await;

        timings.total_ms = clock.total();
        self.observe(&q, &memories, !outcome.insights.is_empty(), timings.total_ms)
            .await;

        Ok(QueryResult {
            strategy,
            memories,
            insights: outcome.insights,
            interference: outcome.superposition.interference,
            coherence: outcome.superposition.coherence,
            field: outcome.field,
            thresholds,
            timings,
        })
    }

    /// Memories near an existing one, most similar first. Unknown ids are
    /// [`GatewayError::NotFound`].
    pub async fn find_similar(
        &self,
        id: &str,
        options: SimilarOptions,
    ) -> Result<Vec<RetrievedMemory>> {
        let source = self
            .resolve_node(id)
            .await?
            .ok_or_else(|| GatewayError::NotFound(id.to_string()))?;
        let snapshot = self.snapshot().await;
        let context = self.context.lock().await.clone();

        let field = ProbabilityField::new(
            source.coordinates(),
            self.field_config.similarity_radius,
            Falloff::Gaussian,
            1.0,
            2.0,
        );
        field.validate()?;

        let mut others: Vec<Arc<QuantumNode>> = snapshot
            .values()
            .filter(|n| n.id() != id)
            .cloned()
            .collect();
        others.sort_by(|a, b| a.id().cmp(b.id()));

        let system = self.system_state(snapshot.len(), &context);
        let sp = self.superposition.create_superposition(
            &field,
            &others,
            &QueryContext::new(SearchMode::Discovery),
            &system,
        );

        let scores: Vec<f64> = sp.states.iter().map(|w| w.probability).collect();
        let cut = options
            .min_similarity
            .unwrap_or_else(|| quick_threshold(&scores, QuickMode::Permissive));
        let similar: Vec<RetrievedMemory> = sp
            .states
            .iter()
            .filter(|w| w.probability >= cut)
            .take(options.max_results.unwrap_or(DEFAULT_MAX_RESULTS))
            .map(RetrievedMemory::from_weighted)
            .collect();

        debug!(id, candidates = others.len(), returned = similar.len(), cut, "find_similar");
        let ids: Vec<String> = similar.iter().map(|m| m.id.clone()).collect();
        drop(snapshot);
        self.touch(&ids).await;
        Ok(similar)
    }

    fn thresholds_for(
        &self,
        snapshot: &NodeTable,
        context: &SystemContext,
        system: &SystemState,
    ) -> Thresholds {
        let confidence_scores: Vec<f64> = snapshot.values().map(|n| n.confidence_score).collect();
        let resonance: Vec<f64> = snapshot.values().map(|n| n.resonance_strength).collect();
        let history = context.metrics.hit_rate;
        let ctx = |mode| QueryContext {
            historical_success: history,
            ..QueryContext::new(mode)
        };
        Thresholds {
            confidence: self.thresholds.calculate_dynamic_threshold(
                &confidence_scores,
                &ctx(SearchMode::Precision),
                system,
            ),
            exploration: self
                .thresholds
                .calculate_dynamic_threshold(&resonance, &ctx(SearchMode::Discovery), system),
        }
    }

    async fn build_field(
        &self,
        q: &CanonicalQuery,
        kind: FieldKind,
        context: &SystemContext,
        morph: bool,
    ) -> Result<ProbabilityField> {
        let generator = self.generator.read().await;
        let mut rng = self.rng.lock().await;
        let query = FieldQuery {
            kind,
            category: q.category.clone(),
            signature: q.signature,
            confidence: q.confidence,
            exploration: q.exploration,
            time_budget_ms: q.time_budget_ms,
        };
        let operations = (!q.operations.is_empty()).then_some(q.operations.as_slice());
        let pattern = q.pattern.as_deref();
        let field = generator.generate_field(&query, context, pattern, operations, &mut *rng)?;
        if morph {
            return Ok(morph_field(&field, 0.0, &mut *rng));
        }
        Ok(field)
    }

    async fn precision_path(
        &self,
        q: &CanonicalQuery,
        context: &SystemContext,
        system: &SystemState,
        clock: &mut PhaseClock,
        timings: &mut PhaseTimings,
    ) -> Result<PathOutcome> {
        let field = self.build_field(q, FieldKind::Precision, context, false).await?;
        timings.field_ms = clock.lap();

        let opts = QueryOptions {
            radius: self.index_config.radius * 1.5,
            quality_threshold: self.index_config.quality_threshold,
            limit: None,
            center: Some(field.center),
        };
        let hits = match &q.category {
            Some(category) => self.index.query_by_category(category, &opts).await?,
            None => self.index.query(q.lookup_text(), &q.operations, &opts).await?,
        };
        let nodes = self.nodes_for(hits).await;
        timings.lookup_ms = clock.lap();

        let superposition = self.light_superposition.create_superposition(
            &field,
            &nodes,
            &QueryContext::new(SearchMode::Precision),
            system,
        );
        timings.superposition_ms = clock.lap();

        // Every lookup hit is a result here; the field only orders them.
        let mut chosen: Vec<WeightedNode> = nodes
            .into_iter()
            .map(|node| WeightedNode {
                probability: node_probability(&node, &field),
                node,
            })
            .collect();
        chosen.sort_by(|a, b| b.probability.total_cmp(&a.probability));
        chosen.truncate(q.max_results);

        Ok(PathOutcome {
            field,
            chosen,
            superposition,
            insights: Vec::new(),
        })
    }

    async fn discovery_path(
        &self,
        q: &CanonicalQuery,
        snapshot: &NodeTable,
        context: &SystemContext,
        system: &SystemState,
        clock: &mut PhaseClock,
        timings: &mut PhaseTimings,
    ) -> Result<PathOutcome> {
        let kind = match q.kind {
            FieldKind::Creative => FieldKind::Creative,
            _ => FieldKind::Discovery,
        };
        let field = self
            .build_field(q, kind, context, q.exploration > MORPH_EXPLORATION)
            .await?;
        timings.field_ms = clock.lap();

        let reach = field.radius * 1.5;
        let mut candidates: Vec<Arc<QuantumNode>> = snapshot
            .values()
            .filter(|n| n.coordinates().distance(field.center) <= reach)
            .cloned()
            .collect();
        candidates.sort_by(|a, b| a.id().cmp(b.id()));
        if candidates.is_empty() {
            debug!(radius = field.radius, "no candidates in range");
        }
        timings.lookup_ms = clock.lap();

        let superposition = self.superposition.create_superposition(
            &field,
            &candidates,
            &QueryContext::new(search_mode(kind)),
            system,
        );
        timings.superposition_ms = clock.lap();

        let insights = self
            .emergent
            .detect(&superposition, context, &DetectOptions::default());
        timings.emergent_ms = clock.lap();

        Ok(PathOutcome {
            field,
            chosen: collapse(&superposition, q.max_results),
            superposition,
            insights,
        })
    }

    async fn hybrid_path(
        &self,
        q: &CanonicalQuery,
        context: &SystemContext,
        system: &SystemState,
        clock: &mut PhaseClock,
        timings: &mut PhaseTimings,
    ) -> Result<PathOutcome> {
        let field = self.build_field(q, q.kind, context, false).await?;
        timings.field_ms = clock.lap();

        let opts = QueryOptions {
            radius: self.index_config.radius * 1.5,
            quality_threshold: self.index_config.quality_threshold,
            limit: Some(HYBRID_PREFILTER),
            center: Some(field.center),
        };
        let hits = self.index.query(q.lookup_text(), &q.operations, &opts).await?;
        let candidates = self.nodes_for(hits).await;
        if candidates.is_empty() {
            debug!("hybrid pre-filter found nothing");
        }
        timings.lookup_ms = clock.lap();

        let superposition = self.superposition.create_superposition(
            &field,
            &candidates,
            &QueryContext::new(SearchMode::Balanced),
            system,
        );
        timings.superposition_ms = clock.lap();

        let insights = self.emergent.detect(
            &superposition,
            context,
            &DetectOptions {
                threshold: Some(HYBRID_EMERGENT_THRESHOLD),
            },
        );
        timings.emergent_ms = clock.lap();

        Ok(PathOutcome {
            field,
            chosen: collapse(&superposition, q.max_results),
            superposition,
            insights,
        })
    }

    async fn observe(
        &self,
        q: &CanonicalQuery,
        memories: &[RetrievedMemory],
        emerged: bool,
        elapsed_ms: f64,
    ) {
        let mut categories: BTreeSet<String> =
            memories.iter().map(|m| m.category.clone()).collect();
        categories.extend(q.category.clone());
        let hit_fraction = (!memories.is_empty()).then(|| {
            let hits = memories.iter().filter(|m| m.confidence > HIT_CONFIDENCE).count();
            hits as f64 / memories.len() as f64
        });
        let observation = QueryObservation {
            query: q.pattern.clone().unwrap_or_else(|| format!("<{:?}>", q.kind).to_lowercase()),
            categories: categories.into_iter().collect(),
            response_time_ms: elapsed_ms,
            hit_fraction,
            emerged,
        };
        self.context.lock().await.record(observation, &self.smoothing);
    }
}
