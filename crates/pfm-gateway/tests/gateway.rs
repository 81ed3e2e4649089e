//! End-to-end behavior of the gateway over in-process backends.

use std::collections::BTreeSet;
use std::sync::Arc;

use async_trait::async_trait;
use pfm_core::{HarmonicProperties, MemoryRecord, PatternContent};
use pfm_gateway::{
    ExecutionStrategy, Gateway, GatewayConfig, GatewayQuery, QueryRequest, QueryType,
    RetrievalEngine, Strategy, StreamFilter, cache_key,
};
use pfm_store::{Entity, RelationshipStore, StoreError, Traversal};

fn record(id: &str, category: &str, strength: f64) -> MemoryRecord {
    MemoryRecord::new(
        id,
        PatternContent {
            title: format!("{category} {id}"),
            description: format!("{category} pattern seen in module {id}"),
            tags: vec![category.to_lowercase()],
            file_locations: vec![format!("src/{id}.rs")],
            ..PatternContent::default()
        },
        HarmonicProperties {
            category: category.to_string(),
            strength,
            occurrences: 13,
            confidence: 0.95,
            complexity: 0.5,
        },
    )
}

fn world() -> Vec<MemoryRecord> {
    vec![
        record("o1", "observer", 0.9),
        record("o2", "observer", 0.8),
        record("o3", "observer", 0.7),
        record("f1", "factory", 0.6),
        record("s1", "strategy", 0.5),
    ]
}

fn gateway_with(config: GatewayConfig) -> Gateway {
    let engine = RetrievalEngine::builder(&config).seed(42).build().unwrap();
    Gateway::builder(config).engine(Arc::new(engine)).build().unwrap()
}

struct UnreachableGraph;

#[async_trait]
impl RelationshipStore for UnreachableGraph {
    fn name(&self) -> &str {
        "graph"
    }

    async fn lookup(&self, _target: &str) -> pfm_store::Result<Option<Entity>> {
        Err(StoreError::unavailable("graph", "timed out"))
    }

    async fn traverse(&self, _target: &str, _max_depth: usize) -> pfm_store::Result<Traversal> {
        Err(StoreError::unavailable("graph", "timed out"))
    }
}

#[tokio::test]
async fn test_empty_store_answers_with_nothing() {
    let gateway = gateway_with(GatewayConfig::default());

    let result = gateway.engine().query("anything").await.unwrap();
    assert!(result.memories.is_empty());
    assert!(result.insights.is_empty());

    let response = gateway
        .handle_request(GatewayQuery::new(QueryType::Similarity).target("anything"))
        .await
        .unwrap();
    assert!(response.success);
    assert_eq!(response.data["results"].as_array().map(Vec::len), Some(0));
    assert!(response.insights.is_empty());
}

#[tokio::test]
async fn test_unified_survives_one_backend_down() {
    let config = GatewayConfig::default();
    let engine = RetrievalEngine::builder(&config).seed(42).build().unwrap();
    let gateway = Gateway::builder(config)
        .engine(Arc::new(engine))
        .graph(Arc::new(UnreachableGraph))
        .build()
        .unwrap();
    gateway.store_records(&world()).await.unwrap();

    let response = gateway
        .handle_request(GatewayQuery::new(QueryType::Unified).target("observer"))
        .await
        .unwrap();
    assert!(response.success);
    assert_eq!(response.metadata.source_systems, vec!["memory", "analytics"]);
    assert!(response.data.get("graph").is_none());
}

#[tokio::test]
async fn test_precision_queries_carry_no_insights() {
    let gateway = gateway_with(GatewayConfig::default());
    gateway.store_records(&world()).await.unwrap();

    for category in ["observer", "Factory", "STRATEGY"] {
        let result = gateway
            .engine()
            .query(QueryRequest::text(category).confidence(1.0))
            .await
            .unwrap();
        assert_eq!(result.strategy, Strategy::Precision, "{category}");
        assert!(result.insights.is_empty(), "{category}");
        assert!(!result.memories.is_empty(), "{category}");
    }
}

#[tokio::test]
async fn test_repeat_request_served_from_cache() {
    let mut config = GatewayConfig::default();
    config.cache.min_cacheable_ms = 0.0;
    let gateway = gateway_with(config);
    gateway.store_records(&world()).await.unwrap();

    let query = GatewayQuery::new(QueryType::Similarity)
        .target("observer")
        .param("limit", 3);
    let twin = GatewayQuery::new(QueryType::Similarity)
        .param("limit", 3)
        .target("observer");
    assert_eq!(cache_key(&query), cache_key(&twin));

    let first = gateway.handle_request(query).await.unwrap();
    let second = gateway.handle_request(twin).await.unwrap();
    assert!(first.success);
    assert!(!first.metadata.cache_hit);
    assert!(second.metadata.cache_hit);
    assert_eq!(first.metadata.source_systems, second.metadata.source_systems);
    assert_eq!(first.data, second.data);

    let stats = gateway.cache_stats();
    assert_eq!(stats.hits, 1);
    assert_eq!(stats.misses, 1);

    gateway.clear_cache();
    assert_eq!(gateway.cache_stats().entries, 0);
}

#[tokio::test]
async fn test_store_then_retrieve_round_trip() {
    let gateway = gateway_with(GatewayConfig::default());
    let original = world();
    gateway.store_records(&original).await.unwrap();

    for r in &original {
        let back = gateway.retrieve(&r.id).await.unwrap().unwrap();
        assert_eq!(back.content, r.content);
        assert!(!back.coordinates.is_unset());
    }
    assert!(gateway.retrieve("missing").await.unwrap().is_none());
}

#[tokio::test]
async fn test_subscribers_receive_matching_completions() {
    let gateway = gateway_with(GatewayConfig::default());
    gateway.store_records(&world()).await.unwrap();
    let mut observers = gateway.subscribe(StreamFilter::categories(["OBSERVER"])).unwrap();
    let mut everything = gateway.subscribe(StreamFilter::default()).unwrap();

    gateway
        .handle_request(GatewayQuery::new(QueryType::Similarity).target("observer"))
        .await
        .unwrap();
    gateway
        .handle_request(GatewayQuery::new(QueryType::Similarity).target("factory"))
        .await
        .unwrap();

    let event = observers.events.recv().await.unwrap();
    assert_eq!(event.query.target.as_deref(), Some("observer"));
    assert!(observers.events.try_recv().is_err());
    assert!(everything.events.recv().await.is_some());
    assert!(everything.events.recv().await.is_some());

    assert!(gateway.unsubscribe(observers.id));
    assert!(!gateway.unsubscribe(observers.id));
}

#[tokio::test]
async fn test_oversized_request_is_batched() {
    let gateway = gateway_with(GatewayConfig::default());
    gateway.store_records(&world()).await.unwrap();

    let query = GatewayQuery::new(QueryType::General)
        .target("observer")
        .param("limit", 6000);
    let decision = gateway.route(&query);
    assert_eq!(decision.strategy, ExecutionStrategy::Batch);
    assert_eq!(decision.handler, QueryType::Similarity);

    let response = gateway.handle_request(query).await.unwrap();
    assert!(response.success);
    let rows = response.data["results"].as_array().unwrap();
    let ids: BTreeSet<&str> = rows.iter().filter_map(|r| r["id"].as_str()).collect();
    assert_eq!(ids.len(), rows.len());
    assert!(rows.len() <= world().len());
}

#[tokio::test]
async fn test_routing_strategy_from_toml() {
    let config = GatewayConfig::from_toml_str("[routing]\nstrategy = \"fast\"\n").unwrap();
    let gateway = gateway_with(config);
    let query = GatewayQuery::new(QueryType::QualityAssessment).target("observer");
    let decision = gateway.route(&query);
    assert_eq!(decision.strategy, ExecutionStrategy::Direct);
}

#[tokio::test]
async fn test_oversized_time_window_is_answered() {
    let gateway = gateway_with(GatewayConfig::default());
    gateway.store_records(&world()).await.unwrap();

    for query in [
        GatewayQuery::new(QueryType::TimeSeries).param("hours", u64::MAX / 1000),
        GatewayQuery::new(QueryType::HistoricalAnalysis).param("window", u64::MAX),
    ] {
        let response = gateway.handle_request(query).await.unwrap();
        assert!(response.success);
    }
}
