//! Route selection for gateway requests.
//!
//! [`QueryRouter::analyze`] is a pure function of the request, the routing
//! strategy and the per-type performance profile. Rules are tried in order
//! and the first match wins.

use std::fmt;
use std::sync::LazyLock;

use dashmap::DashMap;
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::debug;

use crate::cache::cache_key;
use crate::config::RoutingStrategy;
use crate::types::{GatewayQuery, QueryType};

static TIME_INTENT: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(concat!(
        r"(?i)\b(last|past|recent(ly)?|since|between|timeline|trend(s|ing)?",
        r"|yesterday|today|hours?|days?|weeks?|months?)\b",
    ))
    .unwrap()
});
static SIMILARITY_INTENT: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\b(similar|like|resembl\w*|related\s+to|same\s+as|close\s+to)\b").unwrap()
});

/// Parameters that name an explicit time range.
const TIME_RANGE_KEYS: [&str; 4] = ["timeRange", "startTime", "endTime", "hours"];
/// Parameters that ask for relational depth.
const DEPTH_KEYS: [&str; 2] = ["depth", "maxDepth"];

/// Result throughput of a batched field lookup.
pub const RESULTS_PER_MS: f64 = 526.0;
/// Latency budget one batch is sized to fill.
pub const BATCH_LATENCY_BUDGET_MS: f64 = 10.0;
/// Expected cost per requested result on the batch path.
pub const BATCH_MS_PER_RESULT: f64 = 0.04;
/// Estimate for a type with no recorded profile.
pub const FALLBACK_ESTIMATE_MS: f64 = 50.0;
/// Advisory ceiling for unified cache-first routes.
pub const UNIFIED_SLA_MS: f64 = 100.0;

const SIMILARITY_EXPECTED_MS: f64 = 5.0;
const FAST_PATH_EXPECTED_MS: f64 = 1.0;
const GRAPH_EXPECTED_MS: f64 = 20.0;
const BATCH_THRESHOLD: usize = 10;
const DEFAULT_BATCH_COUNT: usize = 10;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Backend {
    FieldStore,
    GraphStore,
    AnalyticsStore,
    Unified,
    All,
}

impl fmt::Display for Backend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::FieldStore => "field_store",
            Self::GraphStore => "graph_store",
            Self::AnalyticsStore => "analytics_store",
            Self::Unified => "unified",
            Self::All => "all",
        };
        f.write_str(s)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionStrategy {
    Direct,
    Batch,
    CacheFirst,
    Parallel,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RouteDecision {
    pub backend: Backend,
    /// Handler the gateway dispatches to. Differs from the request type when
    /// an untyped request is recognized by its wording.
    pub handler: QueryType,
    pub strategy: ExecutionStrategy,
    /// Advisory only; nothing enforces it.
    pub expected_time_ms: f64,
    pub fallback: Option<String>,
    pub sla_ms: Option<f64>,
    pub fast_path: bool,
    pub requires_join: bool,
    pub batch_size: Option<usize>,
    pub cache_key: String,
}

impl RouteDecision {
    fn new(
        query: &GatewayQuery,
        backend: Backend,
        handler: QueryType,
        strategy: ExecutionStrategy,
    ) -> Self {
        Self {
            backend,
            handler,
            strategy,
            expected_time_ms: FALLBACK_ESTIMATE_MS,
            fallback: None,
            sla_ms: None,
            fast_path: false,
            requires_join: false,
            batch_size: None,
            cache_key: cache_key(query),
        }
    }

    fn expected(mut self, ms: f64) -> Self {
        self.expected_time_ms = ms;
        self
    }

    fn fallback(mut self, fallback: &str) -> Self {
        self.fallback = Some(fallback.to_string());
        self
    }

    /// Cache-first routes are looked up before dispatch; others still cache
    /// their result but skip nothing.
    pub fn cache_first(&self) -> bool {
        self.strategy == ExecutionStrategy::CacheFirst
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PerformanceProfile {
    pub avg_time_ms: f64,
    pub success_rate: f64,
    pub samples: u64,
}

impl Default for PerformanceProfile {
    fn default() -> Self {
        Self {
            avg_time_ms: FALLBACK_ESTIMATE_MS,
            success_rate: 1.0,
            samples: 0,
        }
    }
}

pub struct QueryRouter {
    strategy: RoutingStrategy,
    /// Weight of the newest sample.
    smoothing: f64,
    profiles: DashMap<QueryType, PerformanceProfile>,
}

impl QueryRouter {
    pub fn new(strategy: RoutingStrategy, smoothing: f64) -> Self {
        Self {
            strategy,
            smoothing: smoothing.clamp(0.0, 1.0),
            profiles: DashMap::new(),
        }
    }

    pub fn strategy(&self) -> RoutingStrategy {
        self.strategy
    }

    pub fn analyze(&self, query: &GatewayQuery) -> RouteDecision {
        let decision = self.decide(query);
        debug!(
            query_type = %query.query_type,
            backend = %decision.backend,
            handler = %decision.handler,
            strategy = ?decision.strategy,
            expected_ms = decision.expected_time_ms,
            "route decided"
        );
        decision
    }

    fn decide(&self, query: &GatewayQuery) -> RouteDecision {
        let qt = query.query_type;

        if qt == QueryType::Similarity {
            return similarity_route(query);
        }

        if qt == QueryType::TimeSeries || has_time_intent(query) {
            let mut d = RouteDecision::new(
                query,
                Backend::AnalyticsStore,
                QueryType::TimeSeries,
                ExecutionStrategy::Direct,
            )
            .expected(FAST_PATH_EXPECTED_MS);
            d.fast_path = true;
            return d;
        }

        let unified_batches =
            qt == QueryType::Unified && self.strategy != RoutingStrategy::Comprehensive;
        let requested = query.limit();
        if query.param_bool("concurrent")
            || requested.is_some_and(|n| n > BATCH_THRESHOLD)
            || unified_batches
        {
            let count = requested.unwrap_or(DEFAULT_BATCH_COUNT);
            let backend = if qt == QueryType::Unified {
                Backend::Unified
            } else {
                Backend::FieldStore
            };
            let handler = if qt == QueryType::General {
                QueryType::Similarity
            } else {
                qt
            };
            let mut d = RouteDecision::new(query, backend, handler, ExecutionStrategy::Batch)
                .expected(BATCH_MS_PER_RESULT * count as f64);
            d.batch_size = Some(self.get_optimal_batch_size(query));
            return d;
        }

        if qt == QueryType::General
            && query.target.as_deref().is_some_and(|t| SIMILARITY_INTENT.is_match(t))
        {
            return similarity_route(query);
        }

        if qt == QueryType::Relationship
            || DEPTH_KEYS.iter().any(|k| query.parameters.contains_key(*k))
        {
            let mut d = RouteDecision::new(
                query,
                Backend::GraphStore,
                QueryType::Relationship,
                ExecutionStrategy::Direct,
            )
            .expected(self.profile_estimate(QueryType::Relationship, GRAPH_EXPECTED_MS));
            d.requires_join = true;
            return d;
        }

        if qt == QueryType::Unified {
            let mut d = RouteDecision::new(
                query,
                Backend::Unified,
                QueryType::Unified,
                ExecutionStrategy::CacheFirst,
            )
            .expected(self.profile_estimate(qt, FALLBACK_ESTIMATE_MS))
            .fallback("parallel_query");
            d.sla_ms = Some(UNIFIED_SLA_MS);
            return d;
        }

        let handler = if qt == QueryType::General {
            QueryType::Comprehensive
        } else {
            qt
        };
        let expected = self.profile_estimate(qt, FALLBACK_ESTIMATE_MS);
        match self.strategy {
            RoutingStrategy::Fast => {
                let handler = if qt == QueryType::General {
                    QueryType::Similarity
                } else {
                    qt
                };
                RouteDecision::new(query, Backend::FieldStore, handler, ExecutionStrategy::Direct)
                    .expected(expected)
            }
            RoutingStrategy::Optimal | RoutingStrategy::Comprehensive => {
                RouteDecision::new(query, Backend::All, handler, ExecutionStrategy::Parallel)
                    .expected(expected)
                    .fallback("sequential_query")
            }
        }
    }

    /// Results one batch should carry: throughput times the latency budget.
    pub fn get_optimal_batch_size(&self, _query: &GatewayQuery) -> usize {
        (RESULTS_PER_MS * BATCH_LATENCY_BUDGET_MS) as usize
    }

    /// Fold one observed execution into the type's profile.
    pub fn update_profile(&self, query_type: QueryType, actual_ms: f64, success: bool) {
        let a = self.smoothing;
        let mut entry = self.profiles.entry(query_type).or_default();
        let p = entry.value_mut();
        p.avg_time_ms = (1.0 - a) * p.avg_time_ms + a * actual_ms;
        p.success_rate = (1.0 - a) * p.success_rate + a * if success { 1.0 } else { 0.0 };
        p.samples += 1;
    }

    pub fn profile(&self, query_type: QueryType) -> Option<PerformanceProfile> {
        self.profiles.get(&query_type).map(|p| *p)
    }

    fn profile_estimate(&self, query_type: QueryType, fallback: f64) -> f64 {
        self.profile(query_type).map_or(fallback, |p| p.avg_time_ms)
    }
}

fn similarity_route(query: &GatewayQuery) -> RouteDecision {
    RouteDecision::new(
        query,
        Backend::FieldStore,
        QueryType::Similarity,
        ExecutionStrategy::CacheFirst,
    )
    .expected(SIMILARITY_EXPECTED_MS)
        .fallback("quantum_search")
}

/// Time words anywhere in the type, target or parameters, or an explicit
/// range parameter. Request context is not inspected.
fn has_time_intent(query: &GatewayQuery) -> bool {
    if TIME_RANGE_KEYS.iter().any(|k| query.parameters.contains_key(*k)) {
        return true;
    }
    let serialized = json!({
        "type": query.query_type,
        "target": query.target,
        "parameters": query.parameters,
    })
    .to_string();
    TIME_INTENT.is_match(&serialized)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn router() -> QueryRouter {
        QueryRouter::new(RoutingStrategy::Optimal, 0.1)
    }

    #[test]
    fn test_similarity_type_is_cache_first() {
        let q = GatewayQuery::new(QueryType::Similarity).target("observer").param("limit", 50);
        let d = router().analyze(&q);
        assert_eq!(d.backend, Backend::FieldStore);
        assert_eq!(d.strategy, ExecutionStrategy::CacheFirst);
        assert_eq!(d.fallback.as_deref(), Some("quantum_search"));
    }

    #[test]
    fn test_time_series_fast_path() {
        let d = router().analyze(&GatewayQuery::new(QueryType::TimeSeries));
        assert!(d.fast_path);
        assert_eq!(d.strategy, ExecutionStrategy::Direct);
        assert_eq!(d.backend, Backend::AnalyticsStore);

        let q = GatewayQuery::new(QueryType::Comprehensive).target("changes in the last week");
        let worded = router().analyze(&q);
        assert!(worded.fast_path);

        let q = GatewayQuery::new(QueryType::CrossCutting).param("timeRange", "24h");
        let ranged = router().analyze(&q);
        assert!(ranged.fast_path);
    }

    #[test]
    fn test_batch_rule() {
        let r = router();
        let q = GatewayQuery::new(QueryType::General).target("factory").param("limit", 50);
        let d = r.analyze(&q);
        assert_eq!(d.strategy, ExecutionStrategy::Batch);
        assert!((d.expected_time_ms - 2.0).abs() < 1e-9);
        assert_eq!(d.batch_size, Some(5260));

        let d = r.analyze(&GatewayQuery::new(QueryType::CrossCutting).param("concurrent", true));
        assert_eq!(d.strategy, ExecutionStrategy::Batch);
        assert_eq!(d.handler, QueryType::CrossCutting);

        let d = r.analyze(&GatewayQuery::new(QueryType::Unified).target("observer"));
        assert_eq!(d.strategy, ExecutionStrategy::Batch);
        assert_eq!(d.backend, Backend::Unified);
    }

    #[test]
    fn test_similarity_wording_for_untyped() {
        let q = GatewayQuery::new(QueryType::General).target("patterns similar to observer");
        let d = router().analyze(&q);
        assert_eq!(d.handler, QueryType::Similarity);
        assert_eq!(d.strategy, ExecutionStrategy::CacheFirst);

        let typed = router().analyze(&GatewayQuery::new(QueryType::CrossCutting).target("similar"));
        assert_eq!(typed.handler, QueryType::CrossCutting);
    }

    #[test]
    fn test_relationship_requires_join() {
        let d = router().analyze(&GatewayQuery::new(QueryType::Relationship).target("EventBus"));
        assert_eq!(d.backend, Backend::GraphStore);
        assert!(d.requires_join);

        let q = GatewayQuery::new(QueryType::General).target("EventBus").param("depth", 2);
        let hinted = router().analyze(&q);
        assert_eq!(hinted.handler, QueryType::Relationship);
    }

    #[test]
    fn test_unified_under_comprehensive_strategy() {
        let r = QueryRouter::new(RoutingStrategy::Comprehensive, 0.1);
        let d = r.analyze(&GatewayQuery::new(QueryType::Unified).target("observer"));
        assert_eq!(d.strategy, ExecutionStrategy::CacheFirst);
        assert_eq!(d.sla_ms, Some(UNIFIED_SLA_MS));
        assert_eq!(d.fallback.as_deref(), Some("parallel_query"));
    }

    #[test]
    fn test_default_route_uses_profile() {
        let r = router();
        let q = GatewayQuery::new(QueryType::QualityAssessment).target("observer");
        let d = r.analyze(&q);
        assert_eq!(d.backend, Backend::All);
        assert_eq!(d.strategy, ExecutionStrategy::Parallel);
        assert_eq!(d.expected_time_ms, FALLBACK_ESTIMATE_MS);

        r.update_profile(QueryType::QualityAssessment, 150.0, true);
        assert!((r.analyze(&q).expected_time_ms - 60.0).abs() < 1e-9);
    }

    #[test]
    fn test_fast_strategy_default_is_direct() {
        let r = QueryRouter::new(RoutingStrategy::Fast, 0.1);
        let d = r.analyze(&GatewayQuery::new(QueryType::General).target("observer"));
        assert_eq!(d.backend, Backend::FieldStore);
        assert_eq!(d.strategy, ExecutionStrategy::Direct);
        assert_eq!(d.handler, QueryType::Similarity);
    }

    #[test]
    fn test_update_profile_smoothing() {
        let r = router();
        assert!(r.profile(QueryType::Evolution).is_none());
        r.update_profile(QueryType::Evolution, 10.0, false);
        let p = r.profile(QueryType::Evolution).unwrap();
        assert!((p.avg_time_ms - 46.0).abs() < 1e-9);
        assert!((p.success_rate - 0.9).abs() < 1e-9);
        assert_eq!(p.samples, 1);
    }

    #[test]
    fn test_cache_key_in_decision_is_stable() {
        let q = GatewayQuery::new(QueryType::Similarity).target("observer");
        assert_eq!(router().analyze(&q).cache_key, router().analyze(&q.clone()).cache_key);
    }
}
