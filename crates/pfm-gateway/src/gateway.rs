//! Request entry point: route, serve from cache, dispatch, record, publish.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Instant;

use dashmap::DashMap;
use futures_util::future::join_all;
use pfm_core::MemoryRecord;
use pfm_store::{AnalyticsStore, MemoryAnalytics, MemoryGraph, PatternRow, RelationshipStore};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, error, info, warn};

use crate::cache::{CacheStats, ResponseCache};
use crate::config::GatewayConfig;
use crate::engine::{RetrievalEngine, floor_ms};
use crate::error::{GatewayError, Result};
use crate::handlers::{Backends, HandlerRegistry, QueryHandler};
use crate::router::{ExecutionStrategy, QueryRouter, RouteDecision};
use crate::stream::{StreamFilter, StreamRegistry, Subscription, SubscriptionId};
use crate::types::{GatewayQuery, GatewayResponse, HandlerOutput, QueryType, ResponseMetadata};

/// Rolling per-type request metrics.
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TypeMetrics {
    pub count: u64,
    pub avg_time_ms: f64,
}

pub struct GatewayBuilder {
    config: GatewayConfig,
    engine: Option<Arc<RetrievalEngine>>,
    graph: Option<Arc<dyn RelationshipStore>>,
    analytics: Option<Arc<dyn AnalyticsStore>>,
    registry: Option<HandlerRegistry>,
}

impl GatewayBuilder {
    pub fn engine(mut self, engine: Arc<RetrievalEngine>) -> Self {
        self.engine = Some(engine);
        self
    }

    pub fn graph(mut self, graph: Arc<dyn RelationshipStore>) -> Self {
        self.graph = Some(graph);
        self
    }

    pub fn analytics(mut self, analytics: Arc<dyn AnalyticsStore>) -> Self {
        self.analytics = Some(analytics);
        self
    }

    pub fn registry(mut self, registry: HandlerRegistry) -> Self {
        self.registry = Some(registry);
        self
    }

    /// Unset backends default to a fresh engine built from the config and
    /// empty in-memory graph and analytics stores.
    pub fn build(self) -> Result<Gateway> {
        let engine = match self.engine {
            Some(engine) => engine,
            None => Arc::new(RetrievalEngine::builder(&self.config).build()?),
        };
        let backends = Backends {
            engine,
            graph: self.graph.unwrap_or_else(|| Arc::new(MemoryGraph::new())),
            analytics: self.analytics.unwrap_or_else(|| Arc::new(MemoryAnalytics::new())),
        };
        Ok(Gateway {
            router: QueryRouter::new(
                self.config.routing.strategy,
                self.config.learning.profile_smoothing,
            ),
            cache: ResponseCache::new(&self.config.cache),
            stream: StreamRegistry::new(),
            registry: self.registry.unwrap_or_else(HandlerRegistry::with_defaults),
            metrics: DashMap::new(),
            backends,
            config: self.config,
        })
    }
}

pub struct Gateway {
    config: GatewayConfig,
    router: QueryRouter,
    cache: ResponseCache,
    stream: StreamRegistry,
    registry: HandlerRegistry,
    backends: Backends,
    metrics: DashMap<QueryType, TypeMetrics>,
}

impl Gateway {
    pub fn builder(config: GatewayConfig) -> GatewayBuilder {
        GatewayBuilder {
            config,
            engine: None,
            graph: None,
            analytics: None,
            registry: None,
        }
    }

    pub fn engine(&self) -> &Arc<RetrievalEngine> {
        &self.backends.engine
    }

    pub fn config(&self) -> &GatewayConfig {
        &self.config
    }

    pub fn route(&self, query: &GatewayQuery) -> RouteDecision {
        self.router.analyze(query)
    }

    /// Answer one request. Handler and backend failures come back as a
    /// `success: false` response; only configuration errors are returned as
    /// `Err`.
    pub async fn handle_request(&self, query: GatewayQuery) -> Result<GatewayResponse> {
        let started = Instant::now();
        let decision = self.router.analyze(&query);

        if let Some(mut cached) = self.cache.get(&decision.cache_key) {
            debug!(query_type = %query.query_type, key = %decision.cache_key, "cache hit");
            cached.metadata.cache_hit = true;
            self.publish(&query, &cached);
            return Ok(cached);
        }
        debug!(query_type = %query.query_type, "cache miss");

        let outcome = self.dispatch(&query, &decision).await;
        let elapsed = floor_ms(started.elapsed());
        let response = match outcome {
            Ok(out) => GatewayResponse {
                success: true,
                data: out.data,
                metadata: ResponseMetadata {
                    query_type: query.query_type,
                    execution_time_ms: elapsed,
                    source_systems: out.sources,
                    cache_hit: false,
                },
                insights: out.insights,
                recommendations: out.recommendations,
            },
            Err(e) if e.is_fatal() => {
                error!(
                    query_type = %query.query_type,
                    error = %e,
                    "request failed on configuration"
                );
                return Err(e);
            }
            Err(e) => {
                warn!(query_type = %query.query_type, error = %e, "request failed");
                let mut failed = GatewayResponse::failure(query.query_type, e.to_string());
                failed.metadata.execution_time_ms = elapsed;
                failed
            }
        };

        if self.cache.should_cache(&response) {
            self.cache.insert(decision.cache_key.clone(), response.clone());
        }
        self.router
            .update_profile(query.query_type, elapsed, response.success);
        self.record_metrics(query.query_type, elapsed);
        self.publish(&query, &response);
        Ok(response)
    }

    async fn dispatch(
        &self,
        query: &GatewayQuery,
        decision: &RouteDecision,
    ) -> Result<HandlerOutput> {
        let handler = self
            .registry
            .get(decision.handler)
            .ok_or_else(|| {
                GatewayError::InvalidRequest(format!("no handler for {}", decision.handler))
            })?;
        match (decision.strategy, decision.batch_size) {
            (ExecutionStrategy::Batch, Some(batch_size)) => {
                self.dispatch_batch(handler.as_ref(), query, batch_size).await
            }
            _ => handler.handle(query, &self.backends).await,
        }
    }

    /// Split into `ceil(limit / batch_size)` pages, run them together and
    /// concatenate their `results`. The limit is clamped so at most
    /// `capacity.max_batch_chunks` pages are issued.
    async fn dispatch_batch(
        &self,
        handler: &dyn QueryHandler,
        query: &GatewayQuery,
        batch_size: usize,
    ) -> Result<HandlerOutput> {
        let batch_size = batch_size.max(1);
        let requested = query.limit().unwrap_or(batch_size);
        let max_chunks = self.config.capacity.max_batch_chunks.max(1);
        let limit = requested.min(batch_size.saturating_mul(max_chunks));
        if limit < requested {
            warn!(requested, limit, "batch limit clamped");
        }
        let chunks = limit.div_ceil(batch_size);
        if chunks <= 1 && limit == requested {
            return handler.handle(query, &self.backends).await;
        }
        debug!(limit, batch_size, chunks, "batch dispatch");

        let base = query.offset();
        let subqueries: Vec<GatewayQuery> = (0..chunks)
            .map(|i| {
                let skip = i * batch_size;
                let mut sub = query.clone();
                sub.parameters.remove("maxResults");
                sub.parameters.remove("concurrent");
                sub.parameters.insert("limit".into(), batch_size.min(limit - skip).into());
                sub.parameters.insert("offset".into(), base.saturating_add(skip).into());
                sub
            })
            .collect();
        let parts = join_all(subqueries.iter().map(|q| handler.handle(q, &self.backends))).await;

        let mut merged = HandlerOutput::default();
        let mut results: Vec<Value> = Vec::new();
        let mut seen: HashSet<String> = HashSet::new();
        let mut first_error = None;
        for part in parts {
            match part {
                Ok(part) => {
                    if let Some(rows) = part.data.get("results").and_then(Value::as_array) {
                        for row in rows {
                            let fresh = match row.get("id").and_then(Value::as_str) {
                                Some(id) => seen.insert(id.to_string()),
                                None => true,
                            };
                            if fresh {
                                results.push(row.clone());
                            }
                        }
                    }
                    if merged.data.is_null() {
                        merged.data = part.data;
                    }
                    for source in part.sources {
                        if !merged.sources.contains(&source) {
                            merged.sources.push(source);
                        }
                    }
                    merged.insights.extend(part.insights);
                    merged.recommendations.extend(part.recommendations);
                }
                Err(e) => {
                    warn!(error = %e, "batch part failed");
                    first_error.get_or_insert(e);
                }
            }
        }
        if merged.sources.is_empty()
            && let Some(e) = first_error
        {
            return Err(e);
        }
        results.truncate(limit);
        if let Some(obj) = merged.data.as_object_mut() {
            obj.insert("results".into(), Value::Array(results));
        }
        let mut noted = HashSet::new();
        merged.insights.retain(|i| noted.insert(i.clone()));
        noted.clear();
        merged.recommendations.retain(|r| noted.insert(r.clone()));
        Ok(merged)
    }

    fn record_metrics(&self, query_type: QueryType, elapsed_ms: f64) {
        let a = self.config.learning.profile_smoothing;
        let mut entry = self.metrics.entry(query_type).or_default();
        let m = entry.value_mut();
        m.avg_time_ms = if m.count == 0 {
            elapsed_ms
        } else {
            (1.0 - a) * m.avg_time_ms + a * elapsed_ms
        };
        m.count += 1;
    }

    fn publish(&self, query: &GatewayQuery, response: &GatewayResponse) {
        if self.config.streaming.enabled {
            let delivered = self.stream.publish(query, response);
            if delivered > 0 {
                debug!(delivered, "completion event published");
            }
        }
    }

    /// Write records through the engine and mirror them into analytics.
    pub async fn store_records(&self, records: &[MemoryRecord]) -> Result<Vec<MemoryRecord>> {
        let stored = self.backends.engine.bulk_store(records).await?;
        let rows: Vec<PatternRow> = stored.iter().map(PatternRow::from_record).collect();
        let mirrored = self.backends.analytics.insert_batch(&rows).await?;
        info!(stored = stored.len(), mirrored, "records stored");
        Ok(stored)
    }

    pub async fn retrieve(&self, id: &str) -> Result<Option<MemoryRecord>> {
        self.backends.engine.retrieve(id).await
    }

    /// Per-type counts and smoothed latency, sorted by type.
    pub fn metrics(&self) -> Vec<(QueryType, TypeMetrics)> {
        let mut all: Vec<_> = self.metrics.iter().map(|e| (*e.key(), *e.value())).collect();
        all.sort_by_key(|(qt, _)| *qt);
        all
    }

    pub fn cache_stats(&self) -> CacheStats {
        self.cache.stats()
    }

    pub fn clear_cache(&self) {
        self.cache.clear();
    }

    pub fn subscribe(&self, filter: StreamFilter) -> Result<Subscription> {
        if !self.config.streaming.enabled {
            return Err(GatewayError::StreamingDisabled);
        }
        Ok(self.stream.subscribe(filter))
    }

    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        self.stream.unsubscribe(id)
    }
}
