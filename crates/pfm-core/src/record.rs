use serde::{Deserialize, Serialize};

use crate::coords::{Coordinates, record_coordinates};

/// Human-facing payload of a stored pattern.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct PatternContent {
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub description: String,
    #[serde(rename = "type", default)]
    pub pattern_type: String,
    #[serde(default)]
    pub tags: Vec<String>,
    /// Files the pattern was observed in. Used by cross-cutting analysis.
    #[serde(default)]
    pub file_locations: Vec<String>,
    /// Opaque caller data, carried through untouched.
    #[serde(default)]
    pub data: serde_json::Value,
}

/// Category tag plus the numeric profile that places a record in space.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct HarmonicProperties {
    pub category: String,
    pub strength: f64,
    pub occurrences: u64,
    pub confidence: f64,
    pub complexity: f64,
}

impl Default for HarmonicProperties {
    fn default() -> Self {
        Self {
            category: String::new(),
            strength: 0.5,
            occurrences: 1,
            confidence: 0.5,
            complexity: 0.0,
        }
    }
}

/// A stored pattern. Immutable once stored; re-storing the same id replaces it.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct MemoryRecord {
    pub id: String,
    #[serde(default)]
    pub coordinates: Coordinates,
    #[serde(default)]
    pub content: PatternContent,
    #[serde(rename = "harmonicProperties", alias = "harmonic")]
    pub harmonic: HarmonicProperties,
    /// Store time in Unix milliseconds. Zero until stored.
    #[serde(default)]
    pub stored_at: u64,
}

impl MemoryRecord {
    pub fn new(
        id: impl Into<String>,
        content: PatternContent,
        harmonic: HarmonicProperties,
    ) -> Self {
        Self {
            id: id.into(),
            coordinates: Coordinates::origin(),
            content,
            harmonic,
            stored_at: 0,
        }
    }

    /// Coordinates derived from the harmonic profile, ignoring any override.
    pub fn derived_coordinates(&self) -> Coordinates {
        let h = &self.harmonic;
        record_coordinates(&h.category, h.strength, h.complexity, h.occurrences as f64)
    }

    /// Clamp the profile into its legal ranges and fill unset coordinates.
    ///
    /// Backend-supplied coordinates are kept as long as they are non-zero.
    pub fn normalized(mut self) -> Self {
        let h = &mut self.harmonic;
        h.strength = h.strength.clamp(0.0, 1.0);
        h.confidence = h.confidence.clamp(0.0, 1.0);
        h.complexity = h.complexity.max(0.0);
        h.occurrences = h.occurrences.max(1);
        if self.coordinates.is_unset() {
            self.coordinates = self.derived_coordinates();
        }
        self
    }

    /// Upper-cased category, the key used by CategoryStats and the index.
    pub fn category_key(&self) -> String {
        self.harmonic.category.to_uppercase()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(category: &str) -> MemoryRecord {
        MemoryRecord::new(
            "r1",
            PatternContent {
                title: "Observer".to_string(),
                ..PatternContent::default()
            },
            HarmonicProperties {
                category: category.to_string(),
                strength: 1.4,
                occurrences: 0,
                confidence: -0.2,
                complexity: -3.0,
            },
        )
    }

    #[test]
    fn test_normalized_clamps_profile() {
        let r = record("observer").normalized();
        assert_eq!(r.harmonic.strength, 1.0);
        assert_eq!(r.harmonic.confidence, 0.0);
        assert_eq!(r.harmonic.complexity, 0.0);
        assert_eq!(r.harmonic.occurrences, 1);
    }

    #[test]
    fn test_unset_coordinates_are_derived() {
        let r = record("observer").normalized();
        assert!(!r.coordinates.is_unset());
        assert_eq!(r.coordinates, r.derived_coordinates());
    }

    #[test]
    fn test_backend_coordinates_are_kept() {
        let mut r = record("observer");
        r.coordinates = Coordinates::new(0.1, 0.2, 0.3);
        let r = r.normalized();
        assert_eq!(r.coordinates, Coordinates::new(0.1, 0.2, 0.3));
    }

    #[test]
    fn test_json_shape() {
        let json = serde_json::json!({
            "id": "p-1",
            "content": {"title": "Factory", "type": "creational", "tags": ["gof"]},
            "harmonicProperties": {
                "category": "factory", "strength": 0.7, "occurrences": 3,
                "confidence": 0.9, "complexity": 0.4
            }
        });
        let r: MemoryRecord = serde_json::from_value(json).unwrap();
        assert_eq!(r.content.pattern_type, "creational");
        assert!(r.coordinates.is_unset());
        assert_eq!(r.category_key(), "FACTORY");
    }
}
