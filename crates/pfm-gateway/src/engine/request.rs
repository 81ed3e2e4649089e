use pfm_core::{CategoryStatsTable, FieldKind, HarmonicSignature, LogicOperation};
use serde::{Deserialize, Serialize};

pub const DEFAULT_MAX_RESULTS: usize = 10;

/// A retrieval request as callers write it. Every field is optional; a bare
/// string converts into a request carrying only `pattern`.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct QueryRequest {
    pub pattern: Option<String>,
    #[serde(rename = "type")]
    pub kind: Option<FieldKind>,
    pub confidence: Option<f64>,
    pub exploration: Option<f64>,
    pub harmonic_signature: Option<HarmonicSignature>,
    pub max_results: Option<usize>,
    pub operations: Vec<LogicOperation>,
    pub time_budget_ms: Option<f64>,
}

impl QueryRequest {
    pub fn text(pattern: impl Into<String>) -> Self {
        Self {
            pattern: Some(pattern.into()),
            ..Self::default()
        }
    }

    pub fn kind(mut self, kind: FieldKind) -> Self {
        self.kind = Some(kind);
        self
    }

    pub fn confidence(mut self, confidence: f64) -> Self {
        self.confidence = Some(confidence);
        self
    }

    pub fn exploration(mut self, exploration: f64) -> Self {
        self.exploration = Some(exploration);
        self
    }

    pub fn max_results(mut self, n: usize) -> Self {
        self.max_results = Some(n);
        self
    }

    pub fn operations(mut self, operations: Vec<LogicOperation>) -> Self {
        self.operations = operations;
        self
    }
}

impl From<&str> for QueryRequest {
    fn from(s: &str) -> Self {
        Self::text(s)
    }
}

impl From<String> for QueryRequest {
    fn from(s: String) -> Self {
        Self::text(s)
    }
}

/// Request after normalization. Every knob has a value.
#[derive(Clone, Debug, PartialEq)]
pub struct CanonicalQuery {
    pub kind: FieldKind,
    pub pattern: Option<String>,
    /// Set when `pattern` names a stored category (case-insensitive).
    pub category: Option<String>,
    pub confidence: f64,
    pub exploration: f64,
    pub signature: Option<HarmonicSignature>,
    pub max_results: usize,
    pub operations: Vec<LogicOperation>,
    pub time_budget_ms: Option<f64>,
}

impl CanonicalQuery {
    /// Text used for index lookups and the recent-query ring.
    pub fn lookup_text(&self) -> &str {
        self.category
            .as_deref()
            .or(self.pattern.as_deref())
            .unwrap_or("")
    }
}

fn kind_defaults(kind: FieldKind) -> (f64, f64) {
    match kind {
        FieldKind::Precision => (0.85, 0.15),
        FieldKind::Discovery => (0.5, 0.5),
        FieldKind::Creative => (0.3, 0.8),
    }
}

pub fn normalize(request: &QueryRequest, stats: &CategoryStatsTable) -> CanonicalQuery {
    let pattern = request
        .pattern
        .as_deref()
        .map(str::trim)
        .filter(|p| !p.is_empty())
        .map(str::to_string);
    let category = pattern
        .as_deref()
        .filter(|p| stats.contains(p))
        .map(str::to_uppercase);

    let kind = request.kind.unwrap_or(if category.is_some() {
        FieldKind::Precision
    } else {
        FieldKind::Discovery
    });
    let (mut confidence, mut exploration) = kind_defaults(kind);

    let ops = request.operations.len() as f64;
    if ops > 0.0 {
        confidence = (confidence + 0.1 * ops).min(0.9);
        exploration = (exploration - 0.1 * ops).max(0.1);
    }

    CanonicalQuery {
        kind,
        pattern,
        category,
        confidence: request.confidence.unwrap_or(confidence).clamp(0.0, 1.0),
        exploration: request.exploration.unwrap_or(exploration).clamp(0.0, 1.0),
        signature: request.harmonic_signature,
        max_results: request.max_results.unwrap_or(DEFAULT_MAX_RESULTS).max(1),
        operations: request.operations.clone(),
        time_budget_ms: request.time_budget_ms,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn stats() -> CategoryStatsTable {
        let mut t = CategoryStatsTable::new();
        t.update("Observer", 0.8, 0.6, 12.0);
        t
    }

    #[test]
    fn test_known_category_is_precision() {
        let q = normalize(&QueryRequest::text("OBSERVER"), &stats());
        assert_eq!(q.kind, FieldKind::Precision);
        assert_eq!(q.category.as_deref(), Some("OBSERVER"));
        assert_eq!((q.confidence, q.exploration), (0.85, 0.15));
        assert_eq!(q.max_results, DEFAULT_MAX_RESULTS);
    }

    #[test]
    fn test_unknown_text_is_discovery() {
        let q = normalize(&"event plumbing".into(), &stats());
        assert_eq!(q.kind, FieldKind::Discovery);
        assert!(q.category.is_none());
        assert_eq!((q.confidence, q.exploration), (0.5, 0.5));
    }

    #[test]
    fn test_operations_push_toward_precision() {
        let ops = vec![
            LogicOperation::new("AND", &["factory"], 0.5, 1.0),
            LogicOperation::new("NOT", &["singleton"], 0.5, 1.0),
        ];
        let q = normalize(&QueryRequest::text("anything").operations(ops.clone()), &stats());
        assert!((q.confidence - 0.7).abs() < 1e-12);
        assert!((q.exploration - 0.3).abs() < 1e-12);

        let many: Vec<_> = std::iter::repeat_n(ops[0].clone(), 6).collect();
        let q = normalize(&QueryRequest::text("observer").operations(many), &stats());
        assert_eq!(q.confidence, 0.9);
        assert_eq!(q.exploration, 0.1);
    }

    #[test]
    fn test_explicit_values_win_and_clamp() {
        let req = QueryRequest::text("x")
            .kind(FieldKind::Creative)
            .confidence(1.4)
            .max_results(0);
        let q = normalize(&req, &stats());
        assert_eq!(q.kind, FieldKind::Creative);
        assert_eq!(q.confidence, 1.0);
        assert_eq!(q.exploration, 0.8);
        assert_eq!(q.max_results, 1);
    }

    #[test]
    fn test_blank_pattern_dropped() {
        let q = normalize(&QueryRequest::text("   "), &stats());
        assert!(q.pattern.is_none());
        assert_eq!(q.lookup_text(), "");
    }

    #[test]
    fn test_structured_request_from_json() {
        let req: QueryRequest = serde_json::from_str(
            r#"{"pattern": "observer", "type": "discovery", "maxResults": 3}"#,
        )
        .unwrap();
        assert_eq!(req.kind, Some(FieldKind::Discovery));
        assert_eq!(req.max_results, Some(3));
    }
}
