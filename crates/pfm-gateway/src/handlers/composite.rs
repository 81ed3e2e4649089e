//! Handlers that combine several backends into one answer.

use async_trait::async_trait;
use futures_util::FutureExt;
use serde_json::{Value, json};

use super::analytics::{Trend, historical};
use super::field::{page, rows, similarity};
use super::graph::{COUPLING_WARNING, relationship};
use super::{Backends, Branch, QueryHandler, fan_out, merge};
use crate::engine::QueryRequest;
use crate::error::Result;
use crate::types::{GatewayQuery, HandlerOutput, QueryType};

const LOW_PATTERN_SCORE: f64 = 0.3;
const LOW_QUALITY: f64 = 0.5;

/// Similarity, relationships and history side by side.
pub struct ComprehensiveHandler;

#[async_trait]
impl QueryHandler for ComprehensiveHandler {
    fn query_type(&self) -> QueryType {
        QueryType::Comprehensive
    }

    async fn handle(&self, query: &GatewayQuery, backends: &Backends) -> Result<HandlerOutput> {
        comprehensive(query, backends).await
    }
}

async fn comprehensive(query: &GatewayQuery, backends: &Backends) -> Result<HandlerOutput> {
    let branches: Vec<Branch<'_>> = vec![
        ("similarity", similarity(query, backends).boxed()),
        ("relationships", relationship(query, backends).boxed()),
        ("history", historical(query, backends).boxed()),
    ];
    let (merged, failures) = merge(fan_out(branches).await);
    if merged.sources.is_empty()
        && let Some(first) = failures.into_iter().next()
    {
        return Err(first);
    }
    Ok(merged)
}

/// Components of a composite quality score. Each is in `[0, 1]`; a missing
/// component had no data behind it.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
struct QualityScore {
    pub pattern: Option<f64>,
    pub trend: Option<f64>,
    pub relationship_complexity: Option<f64>,
    pub similarity: Option<f64>,
}

impl QualityScore {
    fn from_analysis(data: &Value) -> Self {
        let results = data["similarity"]["results"].as_array();
        let pattern = results.filter(|r| !r.is_empty()).map(|r| {
            r.iter().filter_map(|m| m["probability"].as_f64()).sum::<f64>() / r.len() as f64
        });
        let trend = serde_json::from_value::<Trend>(data["history"]["trend"].clone())
            .ok()
            .and_then(Trend::score);
        let relationship_complexity = data["relationships"]["related"]
            .as_array()
            .map(|r| (r.len() as f64 / COUPLING_WARNING as f64).min(1.0));
        let similarity = data["similarity"]["coherence"]
            .as_f64()
            .or_else(|| data["similarity"]["score"].as_f64());
        Self {
            pattern,
            trend,
            relationship_complexity,
            similarity,
        }
    }

    /// Mean of the present components, with complexity counting against.
    fn overall(&self) -> Option<f64> {
        let parts: Vec<f64> = [
            self.pattern,
            self.trend,
            self.relationship_complexity.map(|c| 1.0 - c),
            self.similarity,
        ]
        .into_iter()
        .flatten()
        .collect();
        if parts.is_empty() {
            None
        } else {
            Some(parts.iter().sum::<f64>() / parts.len() as f64)
        }
    }
}

pub struct QualityHandler;

#[async_trait]
impl QueryHandler for QualityHandler {
    fn query_type(&self) -> QueryType {
        QueryType::QualityAssessment
    }

    async fn handle(&self, query: &GatewayQuery, backends: &Backends) -> Result<HandlerOutput> {
        let analysis = comprehensive(query, backends).await?;
        let score = QualityScore::from_analysis(&analysis.data);
        let overall = score.overall();

        let mut out = HandlerOutput {
            data: json!({
                "qualityScore": overall,
                "components": {
                    "patternScore": score.pattern,
                    "trendScore": score.trend,
                    "relationshipComplexity": score.relationship_complexity,
                    "similarityScore": score.similarity,
                },
                "analysis": analysis.data,
            }),
            sources: analysis.sources,
            insights: analysis.insights,
            recommendations: analysis.recommendations,
        };
        if score.pattern.is_some_and(|p| p < LOW_PATTERN_SCORE) {
            out = out.recommend("matches are weak; the pattern may be applied inconsistently");
        }
        if score.trend == Trend::Decreasing.score() {
            out = out.recommend("pattern strength is declining over the window");
        }
        if score.relationship_complexity.is_some_and(|c| c >= 1.0) {
            out = out.recommend("high coupling; reduce the number of dependents");
        }
        if let Some(q) = overall {
            out = out.insight(format!("quality score {q:.2}"));
            if q < LOW_QUALITY {
                out = out.recommend("overall quality is below 0.5; review this area first");
            }
        }
        Ok(out)
    }
}

/// Every backend at once. A failing backend is dropped from the answer and
/// from the reported sources; the call itself still succeeds.
pub struct UnifiedHandler;

#[async_trait]
impl QueryHandler for UnifiedHandler {
    fn query_type(&self) -> QueryType {
        QueryType::Unified
    }

    async fn handle(&self, query: &GatewayQuery, backends: &Backends) -> Result<HandlerOutput> {
        let branches: Vec<Branch<'_>> = vec![
            ("field", field_branch(query, backends).boxed()),
            ("graph", graph_branch(query, backends).boxed()),
            ("analytics", analytics_branch(backends).boxed()),
        ];
        let (mut merged, failures) = merge(fan_out(branches).await);
        if !failures.is_empty() {
            merged = merged.insight(format!("{} of 3 backends unavailable", failures.len()));
        }
        Ok(merged)
    }
}

async fn field_branch(query: &GatewayQuery, backends: &Backends) -> Result<HandlerOutput> {
    if query.target.as_deref().is_some_and(|t| !t.trim().is_empty()) {
        return similarity(query, backends).await;
    }
    let offset = query.offset();
    let mut request = QueryRequest::default();
    if let Some(limit) = query.limit() {
        request = request.max_results(offset.saturating_add(limit));
    }
    let result = backends.engine.query(request).await?;
    let memories = page(result.memories, offset, query.limit().unwrap_or(usize::MAX));
    let data = json!({
        "strategy": result.strategy,
        "coherence": result.coherence,
        "results": rows(&memories),
    });
    Ok(HandlerOutput::new(data, backends.engine.index().name()))
}

async fn graph_branch(query: &GatewayQuery, backends: &Backends) -> Result<HandlerOutput> {
    let graph = &backends.graph;
    let Some(target) = query.target.as_deref() else {
        return Ok(HandlerOutput::new(json!({ "entity": null }), graph.name()));
    };
    let data = match graph.lookup(target).await? {
        Some(entity) => {
            let traversal = graph.traverse(&entity.id, 1).await?;
            json!({
                "entity": entity,
                "neighbours": traversal.related.iter().map(|r| &r.entity).collect::<Vec<_>>(),
            })
        }
        None => json!({ "entity": null }),
    };
    Ok(HandlerOutput::new(data, graph.name()))
}

async fn analytics_branch(backends: &Backends) -> Result<HandlerOutput> {
    let analytics = &backends.analytics;
    let summary = analytics.summary().await?;
    let distribution = analytics.pattern_distribution(None).await?;
    Ok(HandlerOutput::new(
        json!({ "summary": summary, "distribution": distribution }),
        analytics.name(),
    ))
}
