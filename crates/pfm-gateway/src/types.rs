//! Inbound request and outbound response shapes.

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QueryType {
    Similarity,
    Relationship,
    HistoricalAnalysis,
    Comprehensive,
    Evolution,
    CrossCutting,
    QualityAssessment,
    Unified,
    TimeSeries,
    #[serde(other)]
    General,
}

impl QueryType {
    pub const ALL: [QueryType; 10] = [
        QueryType::Similarity,
        QueryType::Relationship,
        QueryType::HistoricalAnalysis,
        QueryType::Comprehensive,
        QueryType::Evolution,
        QueryType::CrossCutting,
        QueryType::QualityAssessment,
        QueryType::Unified,
        QueryType::TimeSeries,
        QueryType::General,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Similarity => "similarity",
            Self::Relationship => "relationship",
            Self::HistoricalAnalysis => "historical_analysis",
            Self::Comprehensive => "comprehensive",
            Self::Evolution => "evolution",
            Self::CrossCutting => "cross_cutting",
            Self::QualityAssessment => "quality_assessment",
            Self::Unified => "unified",
            Self::TimeSeries => "time_series",
            Self::General => "general",
        }
    }
}

impl fmt::Display for QueryType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RequestContext {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub agent_id: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub previous_queries: Vec<String>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct GatewayQuery {
    #[serde(rename = "type")]
    pub query_type: QueryType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target: Option<String>,
    #[serde(default)]
    pub parameters: Map<String, Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub context: Option<RequestContext>,
}

impl GatewayQuery {
    pub fn new(query_type: QueryType) -> Self {
        Self {
            query_type,
            target: None,
            parameters: Map::new(),
            context: None,
        }
    }

    pub fn target(mut self, target: impl Into<String>) -> Self {
        self.target = Some(target.into());
        self
    }

    pub fn param(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.parameters.insert(key.to_string(), value.into());
        self
    }

    pub fn param_f64(&self, key: &str) -> Option<f64> {
        self.parameters.get(key).and_then(Value::as_f64)
    }

    pub fn param_u64(&self, key: &str) -> Option<u64> {
        self.parameters.get(key).and_then(Value::as_u64)
    }

    pub fn param_str(&self, key: &str) -> Option<&str> {
        self.parameters.get(key).and_then(Value::as_str)
    }

    pub fn param_bool(&self, key: &str) -> bool {
        self.parameters.get(key).and_then(Value::as_bool).unwrap_or(false)
    }

    /// Requested result count, from `limit` or `maxResults`.
    pub fn limit(&self) -> Option<usize> {
        self.param_u64("limit")
            .or_else(|| self.param_u64("maxResults"))
            .map(|n| n as usize)
    }

    /// Rows to skip before the first one returned, from `offset`.
    pub fn offset(&self) -> usize {
        self.param_u64("offset").map_or(0, |n| n as usize)
    }

    /// Category filter for streaming subscribers: the `category` parameter,
    /// else the target.
    pub fn category(&self) -> Option<&str> {
        self.param_str("category").or(self.target.as_deref())
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResponseMetadata {
    pub query_type: QueryType,
    #[serde(rename = "executionTime")]
    pub execution_time_ms: f64,
    pub source_systems: Vec<String>,
    pub cache_hit: bool,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct GatewayResponse {
    pub success: bool,
    pub data: Value,
    pub metadata: ResponseMetadata,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub insights: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub recommendations: Vec<String>,
}

impl GatewayResponse {
    pub fn failure(query_type: QueryType, insight: impl Into<String>) -> Self {
        Self {
            success: false,
            data: Value::Null,
            metadata: ResponseMetadata {
                query_type,
                execution_time_ms: 0.0,
                source_systems: Vec::new(),
                cache_hit: false,
            },
            insights: vec![insight.into()],
            recommendations: Vec::new(),
        }
    }

    /// Highest `score`-like number in the payload, used by streaming filters.
    pub fn score(&self) -> Option<f64> {
        ["score", "similarity", "qualityScore"]
            .iter()
            .find_map(|k| self.data.get(k).and_then(Value::as_f64))
            .or_else(|| {
                self.data
                    .get("results")
                    .and_then(Value::as_array)
                    .and_then(|rows| {
                        rows.iter()
                            .filter_map(|r| r.get("probability").or_else(|| r.get("score")))
                            .filter_map(Value::as_f64)
                            .max_by(f64::total_cmp)
                    })
            })
    }
}

/// What a handler produces before the gateway stamps metadata on it.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct HandlerOutput {
    pub data: Value,
    pub sources: Vec<String>,
    pub insights: Vec<String>,
    pub recommendations: Vec<String>,
}

impl HandlerOutput {
    pub fn new(data: Value, source: impl Into<String>) -> Self {
        Self {
            data,
            sources: vec![source.into()],
            ..Self::default()
        }
    }

    pub fn insight(mut self, insight: impl Into<String>) -> Self {
        self.insights.push(insight.into());
        self
    }

    pub fn recommend(mut self, recommendation: impl Into<String>) -> Self {
        self.recommendations.push(recommendation.into());
        self
    }
}
