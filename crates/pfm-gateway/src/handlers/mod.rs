//! Query handlers, one per query type, looked up by tag.

mod analytics;
mod composite;
mod field;
mod graph;

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use futures_util::future::{BoxFuture, join_all};
use pfm_store::{AnalyticsStore, RelationshipStore};
use serde_json::{Map, Value};
use tracing::warn;

use crate::engine::RetrievalEngine;
use crate::error::{GatewayError, Result};
use crate::types::{GatewayQuery, HandlerOutput, QueryType};

pub use analytics::{
    CrossCuttingHandler, EvolutionHandler, HistoricalHandler, TimeSeriesHandler, Trend, trend,
};
pub use composite::{ComprehensiveHandler, QualityHandler, UnifiedHandler};
pub use field::SimilarityHandler;
pub use graph::RelationshipHandler;

/// Everything a handler may call.
#[derive(Clone)]
pub struct Backends {
    pub engine: Arc<RetrievalEngine>,
    pub graph: Arc<dyn RelationshipStore>,
    pub analytics: Arc<dyn AnalyticsStore>,
}

#[async_trait]
pub trait QueryHandler: Send + Sync {
    fn query_type(&self) -> QueryType;

    async fn handle(&self, query: &GatewayQuery, backends: &Backends) -> Result<HandlerOutput>;
}

#[derive(Clone, Default)]
pub struct HandlerRegistry {
    handlers: HashMap<QueryType, Arc<dyn QueryHandler>>,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// One handler for every concrete query type.
    pub fn with_defaults() -> Self {
        let mut registry = Self::new();
        registry.register(Arc::new(SimilarityHandler));
        registry.register(Arc::new(RelationshipHandler));
        registry.register(Arc::new(HistoricalHandler));
        registry.register(Arc::new(ComprehensiveHandler));
        registry.register(Arc::new(EvolutionHandler));
        registry.register(Arc::new(CrossCuttingHandler));
        registry.register(Arc::new(QualityHandler));
        registry.register(Arc::new(UnifiedHandler));
        registry.register(Arc::new(TimeSeriesHandler));
        registry
    }

    /// Replaces any handler already registered for the same type.
    pub fn register(&mut self, handler: Arc<dyn QueryHandler>) {
        self.handlers.insert(handler.query_type(), handler);
    }

    pub fn get(&self, query_type: QueryType) -> Option<Arc<dyn QueryHandler>> {
        self.handlers.get(&query_type).cloned()
    }
}

/// One branch of a fan-out, labelled by what it contributes.
pub type Branch<'a> = (&'static str, BoxFuture<'a, Result<HandlerOutput>>);

/// Run every branch concurrently and wait for all of them.
pub async fn fan_out(branches: Vec<Branch<'_>>) -> Vec<(&'static str, Result<HandlerOutput>)> {
    let (labels, futures): (Vec<_>, Vec<_>) = branches.into_iter().unzip();
    labels.into_iter().zip(join_all(futures).await).collect()
}

/// Fold branch results into one output. Failed branches contribute nothing
/// and are returned separately.
pub fn merge(
    parts: Vec<(&'static str, Result<HandlerOutput>)>,
) -> (HandlerOutput, Vec<GatewayError>) {
    let mut data = Map::new();
    let mut merged = HandlerOutput::default();
    let mut failures = Vec::new();

    for (label, result) in parts {
        match result {
            Ok(part) => {
                data.insert(label.to_string(), part.data);
                for source in part.sources {
                    if !merged.sources.contains(&source) {
                        merged.sources.push(source);
                    }
                }
                merged.insights.extend(part.insights);
                merged.recommendations.extend(part.recommendations);
            }
            Err(e) => {
                warn!(branch = label, error = %e, "fan-out branch failed");
                failures.push(e);
            }
        }
    }
    merged.data = Value::Object(data);
    (merged, failures)
}

fn require_target(query: &GatewayQuery) -> Result<&str> {
    query
        .target
        .as_deref()
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .ok_or_else(|| {
            GatewayError::InvalidRequest(format!("{} query needs a target", query.query_type))
        })
}
