use std::collections::HashMap;

use async_trait::async_trait;
use pfm_core::{LogicOperation, MemoryRecord};
use tokio::sync::RwLock;

use crate::backend::{
    CategoryIndexedStore, IndexStats, PersistentStore, QueryOptions, index_stats,
    select_by_category, select_by_pattern,
};
use crate::error::Result;

/// In-process category index. Used when no durable index is configured.
#[derive(Debug)]
pub struct MemoryIndex {
    name: String,
    records: RwLock<HashMap<String, MemoryRecord>>,
}

impl Default for MemoryIndex {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryIndex {
    pub fn new() -> Self {
        Self::named("memory")
    }

    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            records: RwLock::new(HashMap::new()),
        }
    }

    pub async fn len(&self) -> usize {
        self.records.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.records.read().await.is_empty()
    }

    pub async fn all(&self) -> Vec<MemoryRecord> {
        self.records.read().await.values().cloned().collect()
    }
}

#[async_trait]
impl CategoryIndexedStore for MemoryIndex {
    fn name(&self) -> &str {
        &self.name
    }

    async fn store(&self, record: &MemoryRecord) -> Result<()> {
        let record = record.clone().normalized();
        self.records.write().await.insert(record.id.clone(), record);
        Ok(())
    }

    async fn bulk_store(&self, records: &[MemoryRecord]) -> Result<usize> {
        let mut guard = self.records.write().await;
        for r in records {
            let r = r.clone().normalized();
            guard.insert(r.id.clone(), r);
        }
        Ok(records.len())
    }

    async fn query(
        &self,
        pattern: &str,
        operations: &[LogicOperation],
        opts: &QueryOptions,
    ) -> Result<Vec<MemoryRecord>> {
        let guard = self.records.read().await;
        Ok(select_by_pattern(guard.values(), pattern, operations, opts))
    }

    async fn query_by_category(
        &self,
        category: &str,
        opts: &QueryOptions,
    ) -> Result<Vec<MemoryRecord>> {
        let guard = self.records.read().await;
        Ok(select_by_category(guard.values(), category, opts))
    }

    async fn get(&self, id: &str) -> Result<Option<MemoryRecord>> {
        Ok(self.records.read().await.get(id).cloned())
    }

    async fn clear(&self) -> Result<()> {
        self.records.write().await.clear();
        Ok(())
    }

    async fn stats(&self) -> Result<IndexStats> {
        Ok(index_stats(self.records.read().await.values()))
    }
}

#[async_trait]
impl PersistentStore for MemoryIndex {
    fn name(&self) -> &str {
        &self.name
    }

    async fn fetch(&self, id: &str) -> Result<Option<MemoryRecord>> {
        CategoryIndexedStore::get(self, id).await
    }

    async fn put(&self, record: &MemoryRecord) -> Result<()> {
        CategoryIndexedStore::store(self, record).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pfm_core::{Coordinates, HarmonicProperties, PatternContent};

    fn record(id: &str, category: &str, strength: f64, confidence: f64) -> MemoryRecord {
        MemoryRecord::new(
            id,
            PatternContent {
                title: id.to_string(),
                ..PatternContent::default()
            },
            HarmonicProperties {
                category: category.to_string(),
                strength,
                occurrences: 50,
                confidence,
                complexity: 0.6,
            },
        )
    }

    #[tokio::test]
    async fn test_store_and_get() {
        let index = MemoryIndex::new();
        index.store(&record("a", "observer", 0.8, 0.9)).await.unwrap();
        let got = index.get("a").await.unwrap().unwrap();
        assert!(!got.coordinates.is_unset());
        assert!(index.get("missing").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_restore_replaces_by_id() {
        let index = MemoryIndex::new();
        index.store(&record("a", "observer", 0.8, 0.9)).await.unwrap();
        index.store(&record("a", "factory", 0.8, 0.9)).await.unwrap();
        assert_eq!(index.len().await, 1);
        assert_eq!(index.get("a").await.unwrap().unwrap().harmonic.category, "factory");
    }

    #[tokio::test]
    async fn test_query_by_category_case_insensitive() {
        let index = MemoryIndex::new();
        index
            .bulk_store(&[
                record("a", "observer", 0.5, 0.9),
                record("b", "OBSERVER", 0.9, 0.9),
                record("c", "factory", 0.9, 0.9),
            ])
            .await
            .unwrap();
        let hits = index
            .query_by_category("Observer", &QueryOptions::default())
            .await
            .unwrap();
        let ids: Vec<&str> = hits.iter().map(|r| r.id.as_str()).collect();
        assert_eq!(ids, vec!["b", "a"]);
    }

    #[tokio::test]
    async fn test_quality_threshold_and_limit() {
        let index = MemoryIndex::new();
        index
            .bulk_store(&[
                record("a", "observer", 0.5, 0.2),
                record("b", "observer", 0.6, 0.9),
                record("c", "observer", 0.7, 0.9),
            ])
            .await
            .unwrap();
        let opts = QueryOptions {
            quality_threshold: 0.5,
            ..QueryOptions::default()
        }
        .limit(1);
        let hits = index.query_by_category("observer", &opts).await.unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].id, "c");
    }

    #[tokio::test]
    async fn test_pattern_query_uses_radius() {
        let index = MemoryIndex::new();
        let mut near = record("near", "factory", 0.5, 0.9);
        near.coordinates = Coordinates::new(0.5, 0.5, 0.5);
        let mut far = record("far", "builder", 0.5, 0.9);
        far.coordinates = Coordinates::new(0.9, 0.9, 0.9);
        index.bulk_store(&[near, far]).await.unwrap();

        let opts = QueryOptions::with_radius(0.1).center(Coordinates::new(0.52, 0.5, 0.5));
        let hits = index.query("anything", &[], &opts).await.unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].id, "near");

        // category match wins regardless of distance
        let hits = index.query("builder", &[], &opts).await.unwrap();
        assert_eq!(hits.len(), 2);
    }

    #[tokio::test]
    async fn test_stats_and_clear() {
        let index = MemoryIndex::new();
        index
            .bulk_store(&[record("a", "observer", 0.5, 0.9), record("b", "factory", 0.5, 0.9)])
            .await
            .unwrap();
        let stats = index.stats().await.unwrap();
        assert_eq!(stats.records, 2);
        assert_eq!(stats.categories, 2);
        assert_eq!(stats.per_category.get("OBSERVER"), Some(&1));

        index.clear().await.unwrap();
        assert!(index.is_empty().await);
    }
}
