//! Time-series view of stored patterns: range reads, per-category
//! distribution, file hotspots and named snapshots for evolution diffs.

use std::collections::{BTreeMap, BTreeSet, HashMap};

use async_trait::async_trait;
use pfm_core::{MemoryRecord, now_millis};
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;

use crate::backend::AnalyticsStore;
use crate::error::Result;

/// One analytics row per stored pattern observation.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PatternRow {
    pub record_id: String,
    pub category: String,
    pub strength: f64,
    pub confidence: f64,
    pub complexity: f64,
    pub occurrences: u64,
    #[serde(default)]
    pub files: Vec<String>,
    pub timestamp_ms: u64,
}

impl PatternRow {
    pub fn from_record(record: &MemoryRecord) -> Self {
        let h = &record.harmonic;
        Self {
            record_id: record.id.clone(),
            category: record.category_key(),
            strength: h.strength,
            confidence: h.confidence,
            complexity: h.complexity,
            occurrences: h.occurrences,
            files: record.content.file_locations.clone(),
            timestamp_ms: if record.stored_at > 0 { record.stored_at } else { now_millis() },
        }
    }
}

/// Inclusive millisecond range.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeRange {
    pub start_ms: u64,
    pub end_ms: u64,
}

impl TimeRange {
    pub fn new(start_ms: u64, end_ms: u64) -> Self {
        Self { start_ms, end_ms }
    }

    /// The `hours` leading up to `now_ms`.
    pub fn last_hours(now_ms: u64, hours: u64) -> Self {
        Self {
            start_ms: now_ms.saturating_sub(hours.saturating_mul(3_600_000)),
            end_ms: now_ms,
        }
    }

    pub fn contains(&self, ms: u64) -> bool {
        ms >= self.start_ms && ms <= self.end_ms
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CategoryAggregate {
    pub category: String,
    pub count: usize,
    pub mean_strength: f64,
    pub total_occurrences: u64,
    pub mean_complexity: f64,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Hotspot {
    pub file: String,
    pub pattern_count: usize,
    pub categories: Vec<String>,
    pub mean_strength: f64,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Snapshot {
    pub name: String,
    pub taken_at_ms: u64,
    pub distribution: Vec<CategoryAggregate>,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct AnalyticsSummary {
    pub rows: usize,
    pub categories: usize,
    pub files: usize,
    pub first_ms: Option<u64>,
    pub last_ms: Option<u64>,
}

#[derive(Debug, Default)]
struct AnalyticsInner {
    rows: Vec<PatternRow>,
    snapshots: HashMap<String, Snapshot>,
}

/// In-process analytics store.
#[derive(Debug, Default)]
pub struct MemoryAnalytics {
    inner: RwLock<AnalyticsInner>,
}

impl MemoryAnalytics {
    pub fn new() -> Self {
        Self::default()
    }
}

pub fn distribution<'a>(rows: impl IntoIterator<Item = &'a PatternRow>) -> Vec<CategoryAggregate> {
    let mut groups: BTreeMap<&str, (usize, f64, u64, f64)> = BTreeMap::new();
    for r in rows {
        let g = groups.entry(r.category.as_str()).or_default();
        g.0 += 1;
        g.1 += r.strength;
        g.2 += r.occurrences;
        g.3 += r.complexity;
    }
    groups
        .into_iter()
        .map(|(category, (count, strength, occurrences, complexity))| CategoryAggregate {
            category: category.to_string(),
            count,
            mean_strength: strength / count as f64,
            total_occurrences: occurrences,
            mean_complexity: complexity / count as f64,
        })
        .collect()
}

#[async_trait]
impl AnalyticsStore for MemoryAnalytics {
    fn name(&self) -> &str {
        "analytics"
    }

    async fn insert_batch(&self, rows: &[PatternRow]) -> Result<usize> {
        self.inner.write().await.rows.extend_from_slice(rows);
        Ok(rows.len())
    }

    async fn time_range(
        &self,
        range: TimeRange,
        category: Option<&str>,
    ) -> Result<Vec<PatternRow>> {
        let inner = self.inner.read().await;
        let mut rows: Vec<PatternRow> = inner
            .rows
            .iter()
            .filter(|r| range.contains(r.timestamp_ms))
            .filter(|r| category.is_none_or(|c| r.category.eq_ignore_ascii_case(c)))
            .cloned()
            .collect();
        rows.sort_by_key(|r| r.timestamp_ms);
        Ok(rows)
    }

    async fn pattern_distribution(
        &self,
        range: Option<TimeRange>,
    ) -> Result<Vec<CategoryAggregate>> {
        let inner = self.inner.read().await;
        Ok(distribution(
            inner
                .rows
                .iter()
                .filter(|r| range.is_none_or(|t| t.contains(r.timestamp_ms))),
        ))
    }

    async fn hotspots(&self, min_patterns: usize) -> Result<Vec<Hotspot>> {
        let inner = self.inner.read().await;
        let mut by_file: BTreeMap<&str, Vec<&PatternRow>> = BTreeMap::new();
        for r in &inner.rows {
            for f in &r.files {
                by_file.entry(f.as_str()).or_default().push(r);
            }
        }

        let mut spots: Vec<Hotspot> = by_file
            .into_iter()
            .filter(|(_, rows)| rows.len() >= min_patterns.max(1))
            .map(|(file, rows)| {
                let categories: BTreeSet<&str> = rows.iter().map(|r| r.category.as_str()).collect();
                Hotspot {
                    file: file.to_string(),
                    pattern_count: rows.len(),
                    categories: categories.into_iter().map(str::to_string).collect(),
                    mean_strength: rows.iter().map(|r| r.strength).sum::<f64>() / rows.len() as f64,
                }
            })
            .collect();
        spots.sort_by(|a, b| {
            b.pattern_count
                .cmp(&a.pattern_count)
                .then_with(|| a.file.cmp(&b.file))
        });
        Ok(spots)
    }

    async fn snapshot(&self, name: &str) -> Result<Snapshot> {
        let mut inner = self.inner.write().await;
        let snapshot = Snapshot {
            name: name.to_string(),
            taken_at_ms: now_millis(),
            distribution: distribution(inner.rows.iter()),
        };
        inner.snapshots.insert(name.to_string(), snapshot.clone());
        Ok(snapshot)
    }

    async fn get_snapshot(&self, name: &str) -> Result<Option<Snapshot>> {
        Ok(self.inner.read().await.snapshots.get(name).cloned())
    }

    async fn summary(&self) -> Result<AnalyticsSummary> {
        let inner = self.inner.read().await;
        let categories: BTreeSet<&str> = inner.rows.iter().map(|r| r.category.as_str()).collect();
        let files: BTreeSet<&str> = inner
            .rows
            .iter()
            .flat_map(|r| r.files.iter().map(String::as_str))
            .collect();
        Ok(AnalyticsSummary {
            rows: inner.rows.len(),
            categories: categories.len(),
            files: files.len(),
            first_ms: inner.rows.iter().map(|r| r.timestamp_ms).min(),
            last_ms: inner.rows.iter().map(|r| r.timestamp_ms).max(),
        })
    }
}
