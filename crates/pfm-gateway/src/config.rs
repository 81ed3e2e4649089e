//! Gateway configuration, loaded from TOML.
//!
//! Every table and every key is optional. Geometry tags inside
//! `[field.templates.*]` are kept as strings here and validated when the
//! engine is built, so a typo fails startup with an `InvalidConfiguration`.

use std::collections::BTreeMap;
use std::path::Path;
use std::time::Duration;

use pfm_core::{
    EmergentConfig, FieldGenerator, FieldKind, HarmonicWeights, Smoothing, SuperpositionConfig,
};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::error::Result;

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GatewayConfig {
    pub cache: CacheConfig,
    pub streaming: StreamingConfig,
    pub routing: RoutingConfig,
    pub index: IndexConfig,
    pub field: FieldConfig,
    pub emergent: EmergentConfig,
    pub learning: LearningConfig,
    pub capacity: CapacityConfig,
    pub harmonic: HarmonicWeights,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    pub max_entries: u64,
    pub ttl_secs: u64,
    /// Responses that finish faster than this are not worth caching.
    pub min_cacheable_ms: f64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            max_entries: 1000,
            ttl_secs: 300,
            min_cacheable_ms: 10.0,
        }
    }
}

impl CacheConfig {
    pub fn ttl(&self) -> Duration {
        Duration::from_secs(self.ttl_secs)
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StreamingConfig {
    pub enabled: bool,
}

impl Default for StreamingConfig {
    fn default() -> Self {
        Self { enabled: true }
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RoutingStrategy {
    #[default]
    Optimal,
    Comprehensive,
    Fast,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RoutingConfig {
    pub strategy: RoutingStrategy,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct IndexConfig {
    pub radius: f64,
    pub quality_threshold: f64,
}

impl Default for IndexConfig {
    fn default() -> Self {
        Self {
            radius: 0.3,
            quality_threshold: 0.0,
        }
    }
}

/// Partial template row. Unset keys keep the built-in value.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TemplateOverride {
    pub radius: Option<f64>,
    pub shape: Option<String>,
    pub falloff: Option<String>,
    pub amplitude: Option<f64>,
    pub steepness: Option<f64>,
    pub morphing_rate: Option<f64>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FieldConfig {
    pub radius: f64,
    pub min_probability: f64,
    pub interference_threshold: f64,
    /// Radius of the field built around a source node by `find_similar`.
    pub similarity_radius: f64,
    /// Keyed by `precision`, `discovery` or `creative`.
    pub templates: BTreeMap<String, TemplateOverride>,
}

impl Default for FieldConfig {
    fn default() -> Self {
        Self {
            radius: 0.35,
            min_probability: 0.01,
            interference_threshold: 0.6,
            similarity_radius: 0.6,
            templates: BTreeMap::new(),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LearningConfig {
    pub response_smoothing: f64,
    pub hit_smoothing: f64,
    pub emergence_smoothing: f64,
    /// Weight of the newest sample in router profiles and per-type metrics.
    pub profile_smoothing: f64,
}

impl Default for LearningConfig {
    fn default() -> Self {
        Self {
            response_smoothing: 0.1,
            hit_smoothing: 0.1,
            emergence_smoothing: 0.05,
            profile_smoothing: 0.1,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CapacityConfig {
    /// Node-table size. Past it the least-accessed nodes are evicted.
    pub max_records: usize,
    pub max_superposition_size: usize,
    pub max_interference: usize,
    /// Upper bound on sub-requests for one batched request. Larger limits
    /// are clamped to `max_batch_chunks * batch_size` rows.
    pub max_batch_chunks: usize,
}

impl Default for CapacityConfig {
    fn default() -> Self {
        Self {
            max_records: 10_000,
            max_superposition_size: 500,
            max_interference: 10,
            max_batch_chunks: 16,
        }
    }
}

impl GatewayConfig {
    pub fn from_toml_str(s: &str) -> Result<Self> {
        Ok(toml::from_str(s)?)
    }

    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config = Self::from_toml_str(&content)?;
        info!(path = %path.display(), strategy = ?config.routing.strategy, "configuration loaded");
        Ok(config)
    }

    /// Template table with overrides applied. Unknown kinds, shapes and
    /// falloffs are configuration errors.
    pub fn field_generator(&self) -> pfm_core::Result<FieldGenerator> {
        let mut generator = FieldGenerator::new();
        for (name, over) in &self.field.templates {
            let kind: FieldKind = name.parse()?;
            let mut t = generator.template(kind);
            if let Some(r) = over.radius {
                t.radius = r;
            }
            if let Some(shape) = &over.shape {
                t.shape = shape.parse()?;
            }
            if let Some(falloff) = &over.falloff {
                t.falloff = falloff.parse()?;
            }
            if let Some(a) = over.amplitude {
                t.amplitude = a;
            }
            if let Some(s) = over.steepness {
                t.steepness = s;
            }
            if let Some(m) = over.morphing_rate {
                t.morphing_rate = m;
            }
            generator.set_template(kind, t)?;
        }
        Ok(generator)
    }

    pub fn superposition_config(&self) -> SuperpositionConfig {
        SuperpositionConfig {
            min_probability: self.field.min_probability,
            interference_threshold: self.field.interference_threshold,
            max_interference: self.capacity.max_interference,
            max_size: self.capacity.max_superposition_size,
        }
    }

    pub fn smoothing(&self) -> Smoothing {
        Smoothing {
            response: self.learning.response_smoothing,
            hit: self.learning.hit_smoothing,
            emergence: self.learning.emergence_smoothing,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pfm_core::{CoreError, Falloff, FieldShape};

    #[test]
    fn test_empty_document_is_all_defaults() {
        let config = GatewayConfig::from_toml_str("").unwrap();
        assert_eq!(config, GatewayConfig::default());
        assert_eq!(config.cache.max_entries, 1000);
        assert_eq!(config.routing.strategy, RoutingStrategy::Optimal);
        assert!(config.streaming.enabled);
    }

    #[test]
    fn test_partial_tables() {
        let config = GatewayConfig::from_toml_str(
            r#"
            [cache]
            ttl_secs = 5

            [routing]
            strategy = "fast"

            [emergent.dream]
            enabled = false

            [capacity]
            max_batch_chunks = 4

            [field.templates.precision]
            radius = 0.25
            falloff = "polynomial"
            "#,
        )
        .unwrap();
        assert_eq!(config.cache.ttl(), Duration::from_secs(5));
        assert_eq!(config.cache.max_entries, 1000);
        assert_eq!(config.routing.strategy, RoutingStrategy::Fast);
        assert!(!config.emergent.dream.enabled);
        assert!(config.emergent.synthesis.enabled);
        assert_eq!(config.capacity.max_batch_chunks, 4);
        assert_eq!(config.capacity.max_records, 10_000);

        let generator = config.field_generator().unwrap();
        let t = generator.template(FieldKind::Precision);
        assert_eq!(t.radius, 0.25);
        assert_eq!(t.falloff, Falloff::Polynomial);
        assert_eq!(t.shape, FieldShape::Spherical);
    }

    #[test]
    fn test_unknown_falloff_is_invalid_configuration() {
        let config = GatewayConfig::from_toml_str(
            r#"
            [field.templates.discovery]
            falloff = "wobbly"
            "#,
        )
        .unwrap();
        assert!(matches!(
            config.field_generator(),
            Err(CoreError::InvalidConfiguration { .. })
        ));
    }

    #[test]
    fn test_non_positive_radius_rejected() {
        let config = GatewayConfig::from_toml_str(
            r#"
            [field.templates.creative]
            radius = 0.0
            "#,
        )
        .unwrap();
        assert!(config.field_generator().is_err());
    }

    #[test]
    fn test_unknown_strategy_fails_parse() {
        let err = GatewayConfig::from_toml_str("[routing]\nstrategy = \"random\"").unwrap_err();
        assert!(err.is_fatal());
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("pfm.toml");
        std::fs::write(&path, "[index]\nradius = 0.5\n").unwrap();
        let config = GatewayConfig::load(&path).unwrap();
        assert_eq!(config.index.radius, 0.5);
    }
}
