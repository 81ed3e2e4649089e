//! Collaborator interfaces consumed by the retrieval engine and gateway.
//!
//! Every backend is shared behind `Arc<dyn Trait>` and called from many
//! in-flight requests at once, so implementations take `&self` and do their
//! own locking.

use std::collections::BTreeMap;

use async_trait::async_trait;
use pfm_core::{Coordinates, LogicOperation, MemoryRecord, encode_operations, pattern_coordinates};
use pfm_core::constants::{TYPICAL_COMPLEXITY, TYPICAL_OCCURRENCES, TYPICAL_STRENGTH};
use serde::{Deserialize, Serialize};

use crate::analytics::{
    AnalyticsSummary, CategoryAggregate, Hotspot, PatternRow, Snapshot, TimeRange,
};
use crate::error::Result;
use crate::graph::{Entity, Traversal};

/// Deterministic lookup parameters.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct QueryOptions {
    /// Records farther than this from the lookup center are skipped.
    pub radius: f64,
    /// Minimum record confidence.
    pub quality_threshold: f64,
    pub limit: Option<usize>,
    /// Explicit lookup center. When absent, pattern lookups hash the pattern
    /// with typical profile values and category lookups skip the radius check.
    pub center: Option<Coordinates>,
}

impl Default for QueryOptions {
    fn default() -> Self {
        Self {
            radius: 0.3,
            quality_threshold: 0.0,
            limit: None,
            center: None,
        }
    }
}

impl QueryOptions {
    pub fn with_radius(radius: f64) -> Self {
        Self {
            radius,
            ..Self::default()
        }
    }

    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn center(mut self, center: Coordinates) -> Self {
        self.center = Some(center);
        self
    }
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct IndexStats {
    pub records: usize,
    pub categories: usize,
    pub per_category: BTreeMap<String, usize>,
}

#[async_trait]
pub trait CategoryIndexedStore: Send + Sync {
    fn name(&self) -> &str;

    /// Insert or replace by id.
    async fn store(&self, record: &MemoryRecord) -> Result<()>;

    async fn bulk_store(&self, records: &[MemoryRecord]) -> Result<usize>;

    /// Records whose category equals `pattern` or that sit within
    /// `opts.radius` of the pattern's hashed center, nearest first.
    async fn query(
        &self,
        pattern: &str,
        operations: &[LogicOperation],
        opts: &QueryOptions,
    ) -> Result<Vec<MemoryRecord>>;

    async fn query_by_category(
        &self,
        category: &str,
        opts: &QueryOptions,
    ) -> Result<Vec<MemoryRecord>>;

    async fn get(&self, id: &str) -> Result<Option<MemoryRecord>>;

    async fn clear(&self) -> Result<()>;

    async fn stats(&self) -> Result<IndexStats>;
}

#[async_trait]
pub trait RelationshipStore: Send + Sync {
    fn name(&self) -> &str;

    /// Find an entity by id, name or file path.
    async fn lookup(&self, target: &str) -> Result<Option<Entity>>;

    /// Breadth-first walk from `target`, at most `max_depth` hops.
    async fn traverse(&self, target: &str, max_depth: usize) -> Result<Traversal>;
}

#[async_trait]
pub trait AnalyticsStore: Send + Sync {
    fn name(&self) -> &str;

    async fn insert_batch(&self, rows: &[PatternRow]) -> Result<usize>;

    async fn time_range(&self, range: TimeRange, category: Option<&str>) -> Result<Vec<PatternRow>>;

    /// Per-category aggregation, optionally restricted to a time range.
    async fn pattern_distribution(
        &self,
        range: Option<TimeRange>,
    ) -> Result<Vec<CategoryAggregate>>;

    /// Files carrying at least `min_patterns` patterns, busiest first.
    async fn hotspots(&self, min_patterns: usize) -> Result<Vec<Hotspot>>;

    /// Capture the current distribution under `name`, replacing any earlier one.
    async fn snapshot(&self, name: &str) -> Result<Snapshot>;

    async fn get_snapshot(&self, name: &str) -> Result<Option<Snapshot>>;

    async fn summary(&self) -> Result<AnalyticsSummary>;
}

/// Remote or durable record source consulted after the index misses.
#[async_trait]
pub trait PersistentStore: Send + Sync {
    fn name(&self) -> &str;

    async fn fetch(&self, id: &str) -> Result<Option<MemoryRecord>>;

    async fn put(&self, record: &MemoryRecord) -> Result<()>;
}

/// Center used by pattern lookups when the caller did not supply one.
pub fn lookup_center(
    pattern: &str,
    operations: &[LogicOperation],
    opts: &QueryOptions,
) -> Coordinates {
    opts.center.unwrap_or_else(|| {
        pattern_coordinates(
            pattern,
            &encode_operations(operations),
            TYPICAL_STRENGTH,
            TYPICAL_COMPLEXITY,
            TYPICAL_OCCURRENCES,
        )
    })
}

/// Shared selection rule for pattern lookups over an in-memory candidate set.
pub fn select_by_pattern<'a>(
    records: impl IntoIterator<Item = &'a MemoryRecord>,
    pattern: &str,
    operations: &[LogicOperation],
    opts: &QueryOptions,
) -> Vec<MemoryRecord> {
    let center = lookup_center(pattern, operations, opts);
    let key = pattern.to_uppercase();
    let hits = records
        .into_iter()
        .filter(|r| r.harmonic.confidence >= opts.quality_threshold)
        .filter(|r| r.category_key() == key || r.coordinates.distance(center) <= opts.radius);
    rank(hits, Some(center), opts.limit)
}

/// Shared selection rule for category lookups.
pub fn select_by_category<'a>(
    records: impl IntoIterator<Item = &'a MemoryRecord>,
    category: &str,
    opts: &QueryOptions,
) -> Vec<MemoryRecord> {
    let key = category.to_uppercase();
    let hits = records
        .into_iter()
        .filter(|r| r.category_key() == key)
        .filter(|r| r.harmonic.confidence >= opts.quality_threshold)
        .filter(|r| opts.center.is_none_or(|c| r.coordinates.distance(c) <= opts.radius));
    rank(hits, opts.center, opts.limit)
}

/// Nearest first when a center is known, else strongest first. Ties by id.
fn rank<'a>(
    hits: impl Iterator<Item = &'a MemoryRecord>,
    center: Option<Coordinates>,
    limit: Option<usize>,
) -> Vec<MemoryRecord> {
    let mut out: Vec<&MemoryRecord> = hits.collect();
    match center {
        Some(c) => out.sort_by(|a, b| {
            a.coordinates
                .distance(c)
                .total_cmp(&b.coordinates.distance(c))
                .then_with(|| a.id.cmp(&b.id))
        }),
        None => out.sort_by(|a, b| {
            b.harmonic
                .strength
                .total_cmp(&a.harmonic.strength)
                .then_with(|| a.id.cmp(&b.id))
        }),
    }
    if let Some(limit) = limit {
        out.truncate(limit);
    }
    out.into_iter().cloned().collect()
}

/// Per-category counts for [`IndexStats`].
pub fn index_stats<'a>(records: impl IntoIterator<Item = &'a MemoryRecord>) -> IndexStats {
    let mut per_category = BTreeMap::new();
    let mut total = 0;
    for r in records {
        *per_category.entry(r.category_key()).or_insert(0) += 1;
        total += 1;
    }
    IndexStats {
        records: total,
        categories: per_category.len(),
        per_category,
    }
}
