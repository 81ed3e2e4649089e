//! Async service layer over the probability-field engine.
//!
//! [`RetrievalEngine`] owns the node table and answers field queries.
//! [`Gateway`] sits in front of it and the relationship and analytics
//! stores: it routes each request, serves repeats from a TTL cache,
//! dispatches to a per-type handler, and publishes completions to stream
//! subscribers.

pub mod cache;
pub mod config;
pub mod engine;
pub mod error;
pub mod gateway;
pub mod handlers;
pub mod router;
pub mod stream;
pub mod types;

pub use cache::{CacheStats, ResponseCache, cache_key};
pub use config::{GatewayConfig, RoutingStrategy};
pub use engine::{
    EngineBuilder, EngineStats, LearningSink, QueryRequest, QueryResult, RetrievalEngine,
    RetrievedMemory, SimilarOptions, Strategy,
};
pub use error::{GatewayError, Result};
pub use gateway::{Gateway, GatewayBuilder, TypeMetrics};
pub use handlers::{Backends, HandlerRegistry, QueryHandler};
pub use router::{Backend, ExecutionStrategy, QueryRouter, RouteDecision};
pub use stream::{StreamEvent, StreamFilter, StreamRegistry, Subscription, SubscriptionId};
pub use types::{
    GatewayQuery, GatewayResponse, HandlerOutput, QueryType, RequestContext, ResponseMetadata,
};
