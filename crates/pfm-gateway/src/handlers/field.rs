use async_trait::async_trait;
use serde_json::{Value, json};

use super::{Backends, QueryHandler, require_target};
use crate::engine::{DEFAULT_MAX_RESULTS, QueryRequest, RetrievedMemory, SimilarOptions};
use crate::error::{GatewayError, Result};
use crate::types::{GatewayQuery, HandlerOutput, QueryType};

/// Similarity over the probability field. A target naming a stored record
/// finds its neighbours; any other target is run as a retrieval query.
pub struct SimilarityHandler;

#[async_trait]
impl QueryHandler for SimilarityHandler {
    fn query_type(&self) -> QueryType {
        QueryType::Similarity
    }

    async fn handle(&self, query: &GatewayQuery, backends: &Backends) -> Result<HandlerOutput> {
        similarity(query, backends).await
    }
}

pub(super) fn rows(memories: &[RetrievedMemory]) -> Value {
    memories
        .iter()
        .map(|m| {
            json!({
                "id": m.id,
                "probability": m.probability,
                "confidence": m.confidence,
                "category": m.category,
                "title": m.record.content.title,
            })
        })
        .collect()
}

/// The `limit` rows after the first `offset`.
pub(super) fn page(
    memories: Vec<RetrievedMemory>,
    offset: usize,
    limit: usize,
) -> Vec<RetrievedMemory> {
    memories.into_iter().skip(offset).take(limit).collect()
}

pub(super) async fn similarity(query: &GatewayQuery, backends: &Backends) -> Result<HandlerOutput> {
    let target = require_target(query)?;
    let engine = &backends.engine;
    let limit = query.limit().unwrap_or(DEFAULT_MAX_RESULTS);
    let offset = query.offset();
    let window = offset.saturating_add(limit);
    let min_score = query.param_f64("minScore");
    let source = engine.index().name().to_string();

    if engine.index().get(target).await?.is_some() {
        let similar = engine
            .find_similar(
                target,
                SimilarOptions {
                    min_similarity: min_score,
                    max_results: Some(window),
                },
            )
            .await?;
        let similar = page(similar, offset, limit);
        let top = similar.first().map(|m| m.probability);
        let data = json!({ "source": target, "results": rows(&similar), "score": top });
        return Ok(HandlerOutput::new(data, source));
    }

    let mut request = QueryRequest::text(target).max_results(window);
    if let Some(mode) = query.param_str("mode") {
        request.kind = Some(
            mode.parse()
                .map_err(|_| GatewayError::InvalidRequest(format!("unknown mode {mode:?}")))?,
        );
    }
    let result = engine.query(request).await?;

    let matching: Vec<RetrievedMemory> = result
        .memories
        .into_iter()
        .filter(|m| min_score.is_none_or(|s| m.probability >= s))
        .collect();
    let none_matched = matching.is_empty();
    let memories = page(matching, offset, limit);
    let data = json!({
        "strategy": result.strategy,
        "coherence": result.coherence,
        "results": rows(&memories),
    });

    let mut out = HandlerOutput::new(data, source);
    out.insights = result.insights.into_iter().map(|i| i.description).collect();
    if none_matched {
        out = out.recommend(format!(
            "no stored pattern is close to {target:?}; try a discovery query"
        ));
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::super::tests::seeded;
    use super::*;

    #[tokio::test]
    async fn test_similar_to_stored_record() {
        let b = seeded().await;
        let q = GatewayQuery::new(QueryType::Similarity).target("o1").param("minScore", 0.0);
        let out = SimilarityHandler.handle(&q, &b).await.unwrap();
        assert_eq!(out.sources, vec!["memory"]);
        let ids: Vec<&str> = out.data["results"]
            .as_array()
            .unwrap()
            .iter()
            .filter_map(|r| r["id"].as_str())
            .collect();
        assert!(!ids.contains(&"o1"));
        assert!(!ids.is_empty());
    }

    #[tokio::test]
    async fn test_offset_pages_past_earlier_rows() {
        let b = seeded().await;
        let q = GatewayQuery::new(QueryType::Similarity)
            .target("o1")
            .param("minScore", 0.0);
        let all = SimilarityHandler.handle(&q, &b).await.unwrap();
        let all = all.data["results"].as_array().unwrap().clone();
        assert!(!all.is_empty());

        let q = GatewayQuery::new(QueryType::Similarity)
            .target("o1")
            .param("minScore", 0.0)
            .param("offset", 1)
            .param("limit", 1);
        let second = SimilarityHandler.handle(&q, &b).await.unwrap();
        let expected: Vec<Value> = all.iter().skip(1).take(1).cloned().collect();
        assert_eq!(second.data["results"], Value::Array(expected));

        let q = GatewayQuery::new(QueryType::Similarity)
            .target("o1")
            .param("offset", 100);
        let past = SimilarityHandler.handle(&q, &b).await.unwrap();
        assert_eq!(past.data["results"], json!([]));
    }

    #[tokio::test]
    async fn test_category_text_runs_query() {
        let b = seeded().await;
        let q = GatewayQuery::new(QueryType::Similarity).target("observer");
        let out = SimilarityHandler.handle(&q, &b).await.unwrap();
        assert!(out.data.get("strategy").is_some());
        assert!(out.data["results"].is_array());
    }

    #[tokio::test]
    async fn test_missing_target_and_bad_mode() {
        let b = seeded().await;
        let q = GatewayQuery::new(QueryType::Similarity);
        assert!(matches!(
            SimilarityHandler.handle(&q, &b).await,
            Err(GatewayError::InvalidRequest(_))
        ));
        let q = GatewayQuery::new(QueryType::Similarity).target("x").param("mode", "psychic");
        assert!(matches!(
            SimilarityHandler.handle(&q, &b).await,
            Err(GatewayError::InvalidRequest(_))
        ));
    }
}
