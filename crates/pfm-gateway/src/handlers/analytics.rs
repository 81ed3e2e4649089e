use std::collections::{BTreeMap, BTreeSet};

use async_trait::async_trait;
use pfm_core::now_millis;
use pfm_store::{CategoryAggregate, PatternRow, TimeRange};
use serde::{Deserialize, Serialize};
use serde_json::json;

use super::{Backends, QueryHandler};
use crate::error::{GatewayError, Result};
use crate::types::{GatewayQuery, HandlerOutput, QueryType};

const DEFAULT_WINDOW_HOURS: u64 = 24 * 30;
const DEFAULT_SERIES_HOURS: u64 = 24;
/// Change in mean strength between window halves that counts as a trend.
const TREND_EPSILON: f64 = 0.05;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Trend {
    Increasing,
    Stable,
    Decreasing,
    Insufficient,
}

impl Trend {
    /// Contribution to a composite quality score. `None` when there is no data.
    pub fn score(self) -> Option<f64> {
        match self {
            Self::Increasing => Some(1.0),
            Self::Stable => Some(0.5),
            Self::Decreasing => Some(0.0),
            Self::Insufficient => None,
        }
    }
}

/// Compare mean strength of the older and newer halves of time-ordered rows.
pub fn trend(rows: &[PatternRow]) -> Trend {
    if rows.len() < 2 {
        return Trend::Insufficient;
    }
    let (older, newer) = rows.split_at(rows.len() / 2);
    let mean = |rs: &[PatternRow]| rs.iter().map(|r| r.strength).sum::<f64>() / rs.len() as f64;
    let delta = mean(newer) - mean(older);
    if delta > TREND_EPSILON {
        Trend::Increasing
    } else if delta < -TREND_EPSILON {
        Trend::Decreasing
    } else {
        Trend::Stable
    }
}

pub struct HistoricalHandler;

#[async_trait]
impl QueryHandler for HistoricalHandler {
    fn query_type(&self) -> QueryType {
        QueryType::HistoricalAnalysis
    }

    async fn handle(&self, query: &GatewayQuery, backends: &Backends) -> Result<HandlerOutput> {
        historical(query, backends).await
    }
}

pub(super) async fn historical(query: &GatewayQuery, backends: &Backends) -> Result<HandlerOutput> {
    let window = query.param_u64("window").unwrap_or(DEFAULT_WINDOW_HOURS);
    let range = TimeRange::last_hours(now_millis(), window);
    let category = query.category();

    let rows = backends.analytics.time_range(range, category).await?;
    let distribution = backends.analytics.pattern_distribution(Some(range)).await?;
    let trend = trend(&rows);
    let mean_strength = if rows.is_empty() {
        None
    } else {
        Some(rows.iter().map(|r| r.strength).sum::<f64>() / rows.len() as f64)
    };

    let data = json!({
        "windowHours": window,
        "category": category,
        "observations": rows.len(),
        "meanStrength": mean_strength,
        "trend": trend,
        "distribution": distribution,
    });
    let subject = category.unwrap_or("all patterns");
    let mut out = HandlerOutput::new(data, backends.analytics.name())
        .insight(format!("{} observations of {subject} in the last {window}h", rows.len()));
    if trend == Trend::Decreasing {
        out = out.recommend(format!("{subject} is weakening; review recent changes"));
    }
    Ok(out)
}

/// Direct range read.
pub struct TimeSeriesHandler;

#[async_trait]
impl QueryHandler for TimeSeriesHandler {
    fn query_type(&self) -> QueryType {
        QueryType::TimeSeries
    }

    async fn handle(&self, query: &GatewayQuery, backends: &Backends) -> Result<HandlerOutput> {
        let now = now_millis();
        let range = match (query.param_u64("startTime"), query.param_u64("endTime")) {
            (Some(start), end) => TimeRange::new(start, end.unwrap_or(now)),
            (None, Some(end)) => TimeRange::new(0, end),
            (None, None) => {
                let hours = query.param_u64("hours").unwrap_or(DEFAULT_SERIES_HOURS);
                TimeRange::last_hours(now, hours)
            }
        };
        if range.start_ms > range.end_ms {
            return Err(GatewayError::InvalidRequest("time range ends before it starts".into()));
        }
        let rows = backends
            .analytics
            .time_range(range, query.param_str("category"))
            .await?;
        let data = json!({
            "start": range.start_ms,
            "end": range.end_ms,
            "count": rows.len(),
            "rows": rows,
        });
        Ok(HandlerOutput::new(data, backends.analytics.name()))
    }
}

/// Diff of two named snapshots; without both names, a historical analysis.
pub struct EvolutionHandler;

#[async_trait]
impl QueryHandler for EvolutionHandler {
    fn query_type(&self) -> QueryType {
        QueryType::Evolution
    }

    async fn handle(&self, query: &GatewayQuery, backends: &Backends) -> Result<HandlerOutput> {
        let (Some(from), Some(to)) = (query.param_str("from"), query.param_str("to")) else {
            return historical(query, backends).await;
        };
        let analytics = &backends.analytics;
        let before = analytics
            .get_snapshot(from)
            .await?
            .ok_or_else(|| GatewayError::NotFound(format!("snapshot {from}")))?;
        let after = analytics
            .get_snapshot(to)
            .await?
            .ok_or_else(|| GatewayError::NotFound(format!("snapshot {to}")))?;

        let diff = diff_distributions(&before.distribution, &after.distribution);
        let added = diff.iter().filter(|d| d.before == 0).count();
        let removed = diff.iter().filter(|d| d.after == 0).count();
        let data = json!({ "from": from, "to": to, "changes": diff });
        Ok(HandlerOutput::new(data, analytics.name()).insight(format!(
            "{added} categories appeared and {removed} vanished between {from} and {to}"
        )))
    }
}

#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub(super) struct CategoryChange {
    category: String,
    before: usize,
    after: usize,
    strength_delta: f64,
}

fn diff_distributions(
    before: &[CategoryAggregate],
    after: &[CategoryAggregate],
) -> Vec<CategoryChange> {
    let index = |d: &[CategoryAggregate]| -> BTreeMap<String, (usize, f64)> {
        d.iter()
            .map(|c| (c.category.clone(), (c.count, c.mean_strength)))
            .collect()
    };
    let (b, a) = (index(before), index(after));
    let categories: BTreeSet<&String> = b.keys().chain(a.keys()).collect();
    categories
        .into_iter()
        .map(|c| {
            let (bc, bs) = b.get(c).copied().unwrap_or((0, 0.0));
            let (ac, as_) = a.get(c).copied().unwrap_or((0, 0.0));
            CategoryChange {
                category: c.clone(),
                before: bc,
                after: ac,
                strength_delta: as_ - bs,
            }
        })
        .filter(|d| d.before != d.after || d.strength_delta.abs() > f64::EPSILON)
        .collect()
}

/// Patterns that co-occur in the same files.
pub struct CrossCuttingHandler;

#[async_trait]
impl QueryHandler for CrossCuttingHandler {
    fn query_type(&self) -> QueryType {
        QueryType::CrossCutting
    }

    async fn handle(&self, query: &GatewayQuery, backends: &Backends) -> Result<HandlerOutput> {
        let min_patterns = query.param_u64("minPatterns").unwrap_or(2) as usize;
        let min_score = query.param_f64("minScore").unwrap_or(0.0);
        let focus = query.target.as_deref().map(str::to_uppercase);

        let spots: Vec<_> = backends
            .analytics
            .hotspots(min_patterns)
            .await?
            .into_iter()
            .filter(|h| h.mean_strength >= min_score)
            .filter(|h| focus.as_ref().is_none_or(|f| h.categories.contains(f)))
            .collect();

        let mut pairs: BTreeMap<(String, String), usize> = BTreeMap::new();
        for spot in &spots {
            for (i, a) in spot.categories.iter().enumerate() {
                for b in &spot.categories[i + 1..] {
                    *pairs.entry((a.clone(), b.clone())).or_default() += 1;
                }
            }
        }
        let mut cooccurrence: Vec<_> = pairs.into_iter().collect();
        cooccurrence.sort_by(|x, y| y.1.cmp(&x.1).then_with(|| x.0.cmp(&y.0)));

        let mut out = HandlerOutput::new(json!({}), backends.analytics.name());
        if let Some(((a, b), files)) = cooccurrence.first() {
            out = out.insight(format!("{a} and {b} share {files} files"));
        }
        out.data = json!({
            "hotspots": spots,
            "cooccurrence": cooccurrence
                .iter()
                .map(|((a, b), files)| json!({ "categories": [a, b], "files": files }))
                .collect::<Vec<_>>(),
        });
        Ok(out)
    }
}
