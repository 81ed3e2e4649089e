//! Probability fields over the 3-D coordinate space.
//!
//! A field is a scoring function: a center, a radius, a falloff curve and a
//! shape modifier. [`FieldGenerator`] builds one per query from a template
//! table, the caller's confidence and the engine's recent hit rate, and
//! [`calculate_probability`] evaluates it at a point.

use std::collections::HashMap;
use std::f64::consts::PI;
use std::fmt;
use std::str::FromStr;

use rand::Rng;
use serde::{Deserialize, Serialize};
use tracing::trace;

use crate::constants::{TYPICAL_COMPLEXITY, TYPICAL_OCCURRENCES, TYPICAL_STRENGTH};
use crate::context::SystemContext;
use crate::coords::{Coordinates, LogicOperation, encode_operations, pattern_coordinates};
use crate::error::{CoreError, Result};
use crate::stats::{CategoryStats, CategoryStatsTable};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FieldShape {
    Spherical,
    Elliptical,
    Adaptive,
    Fractal,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Falloff {
    Exponential,
    Polynomial,
    Gaussian,
    Sigmoid,
}

/// Which template row a field is built from.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FieldKind {
    Precision,
    Discovery,
    Creative,
}

impl FromStr for FieldShape {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "spherical" => Ok(Self::Spherical),
            "elliptical" => Ok(Self::Elliptical),
            "adaptive" => Ok(Self::Adaptive),
            "fractal" => Ok(Self::Fractal),
            _ => Err(CoreError::invalid("field shape", s)),
        }
    }
}

impl FromStr for Falloff {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "exponential" => Ok(Self::Exponential),
            "polynomial" => Ok(Self::Polynomial),
            "gaussian" => Ok(Self::Gaussian),
            "sigmoid" => Ok(Self::Sigmoid),
            _ => Err(CoreError::invalid("falloff", s)),
        }
    }
}

impl FromStr for FieldKind {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "precision" => Ok(Self::Precision),
            "discovery" => Ok(Self::Discovery),
            "creative" => Ok(Self::Creative),
            _ => Err(CoreError::invalid("field kind", s)),
        }
    }
}

impl fmt::Display for FieldShape {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Spherical => "spherical",
            Self::Elliptical => "elliptical",
            Self::Adaptive => "adaptive",
            Self::Fractal => "fractal",
        };
        f.write_str(s)
    }
}

impl fmt::Display for Falloff {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Exponential => "exponential",
            Self::Polynomial => "polynomial",
            Self::Gaussian => "gaussian",
            Self::Sigmoid => "sigmoid",
        };
        f.write_str(s)
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ProbabilityField {
    pub center: Coordinates,
    pub radius: f64,
    pub shape: FieldShape,
    pub falloff: Falloff,
    pub amplitude: f64,
    pub steepness: f64,
    pub morphing_rate: f64,
    pub context_sensitivity: f64,
    pub exploration_bias: f64,
}

impl ProbabilityField {
    /// Plain spherical field with neutral modifiers.
    pub fn new(
        center: Coordinates,
        radius: f64,
        falloff: Falloff,
        amplitude: f64,
        steepness: f64,
    ) -> Self {
        Self {
            center,
            radius,
            shape: FieldShape::Spherical,
            falloff,
            amplitude,
            steepness,
            morphing_rate: 0.1,
            context_sensitivity: 0.5,
            exploration_bias: 0.0,
        }
    }

    /// Reject parameters that would make evaluation meaningless.
    pub fn validate(&self) -> Result<()> {
        if !self.radius.is_finite() || self.radius <= 0.0 {
            return Err(CoreError::invalid("field radius", self.radius));
        }
        if !self.steepness.is_finite() || self.steepness <= 0.0 {
            return Err(CoreError::invalid("field steepness", self.steepness));
        }
        if !self.amplitude.is_finite() || self.amplitude < 0.0 {
            return Err(CoreError::invalid("field amplitude", self.amplitude));
        }
        Ok(())
    }

    pub fn with_radius(&self, radius: f64) -> Self {
        Self {
            radius,
            ..self.clone()
        }
    }

    pub fn with_center(&self, center: Coordinates) -> Self {
        Self {
            center,
            ..self.clone()
        }
    }
}

/// Evaluate a field at a point. Always in [0, 1].
///
/// There is no hard radius cutoff; the falloff curve alone decides how fast
/// probability decays with distance.
pub fn calculate_probability(point: Coordinates, field: &ProbabilityField) -> f64 {
    let d = point.distance(field.center);
    let base = falloff_value(d, field);

    let modifier = match field.shape {
        FieldShape::Spherical => 1.0,
        FieldShape::Elliptical => 1.0 + 0.3 * (point.x - field.center.x).abs(),
        FieldShape::Fractal => 0.7 + 0.3 * fractal_noise(point, 3),
        FieldShape::Adaptive => 0.8 + 0.2 * field.context_sensitivity.clamp(0.0, 1.0),
    };

    let p = base * modifier;
    if p.is_finite() { p.clamp(0.0, 1.0) } else { 0.0 }
}

fn falloff_value(d: f64, field: &ProbabilityField) -> f64 {
    let a = field.amplitude;
    let k = field.steepness;
    let r = field.radius;
    match field.falloff {
        Falloff::Exponential => a * (-k * d).exp(),
        Falloff::Polynomial => a * (1.0 - (d / r).min(1.0)).powf(k),
        Falloff::Gaussian => {
            // σ = r / k puts the value at d = r on e^(-k²/2)
            let sigma = r / k;
            a * (-(d * d) / (2.0 * sigma * sigma)).exp()
        }
        Falloff::Sigmoid => a / (1.0 + ((d - r / 2.0) * k).exp()),
    }
}

/// Deterministic multi-octave value noise in [0, 1].
pub fn fractal_noise(point: Coordinates, octaves: u32) -> f64 {
    let mut total = 0.0;
    let mut weight_sum = 0.0;
    let mut amplitude = 1.0;
    let mut frequency = 1.0;
    for _ in 0..octaves.max(1) {
        let v = point.x * frequency * 12.9898
            + point.y * frequency * 78.233
            + point.z * frequency * 37.719;
        let v = v.sin();
        total += amplitude * (0.5 + 0.5 * v);
        weight_sum += amplitude;
        amplitude *= 0.5;
        frequency *= 2.0;
    }
    (total / weight_sum).clamp(0.0, 1.0)
}

/// One row of the geometry table.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct FieldTemplate {
    pub radius: f64,
    pub shape: FieldShape,
    pub falloff: Falloff,
    pub amplitude: f64,
    pub steepness: f64,
    pub morphing_rate: f64,
}

impl FieldTemplate {
    pub fn default_for(kind: FieldKind) -> Self {
        match kind {
            FieldKind::Precision => Self {
                radius: 0.2,
                shape: FieldShape::Spherical,
                falloff: Falloff::Gaussian,
                amplitude: 1.0,
                steepness: 2.0,
                morphing_rate: 0.1,
            },
            FieldKind::Discovery => Self {
                radius: 0.5,
                shape: FieldShape::Adaptive,
                falloff: Falloff::Sigmoid,
                amplitude: 0.9,
                steepness: 8.0,
                morphing_rate: 0.3,
            },
            FieldKind::Creative => Self {
                radius: 0.7,
                shape: FieldShape::Fractal,
                falloff: Falloff::Exponential,
                amplitude: 0.8,
                steepness: 1.2,
                morphing_rate: 0.5,
            },
        }
    }
}

/// Harmonic profile supplied with a query to steer the field center.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct HarmonicSignature {
    pub strength: f64,
    pub complexity: f64,
    pub occurrences: f64,
}

/// What the generator needs to know about the query.
#[derive(Clone, Debug)]
pub struct FieldQuery {
    pub kind: FieldKind,
    pub category: Option<String>,
    pub signature: Option<HarmonicSignature>,
    pub confidence: f64,
    pub exploration: f64,
    pub time_budget_ms: Option<f64>,
}

impl FieldQuery {
    pub fn new(kind: FieldKind) -> Self {
        Self {
            kind,
            category: None,
            signature: None,
            confidence: 0.5,
            exploration: 0.5,
            time_budget_ms: None,
        }
    }
}

/// Builds fields and owns the per-category statistics that center them.
#[derive(Clone, Debug)]
pub struct FieldGenerator {
    templates: HashMap<FieldKind, FieldTemplate>,
    stats: CategoryStatsTable,
}

impl Default for FieldGenerator {
    fn default() -> Self {
        Self::new()
    }
}

impl FieldGenerator {
    pub fn new() -> Self {
        let templates = [FieldKind::Precision, FieldKind::Discovery, FieldKind::Creative]
            .into_iter()
            .map(|k| (k, FieldTemplate::default_for(k)))
            .collect();
        Self {
            templates,
            stats: CategoryStatsTable::new(),
        }
    }

    /// Replace one template row. Rejects non-positive radius or steepness.
    pub fn set_template(&mut self, kind: FieldKind, template: FieldTemplate) -> Result<()> {
        let candidate = ProbabilityField {
            center: Coordinates::origin(),
            radius: template.radius,
            shape: template.shape,
            falloff: template.falloff,
            amplitude: template.amplitude,
            steepness: template.steepness,
            morphing_rate: template.morphing_rate,
            context_sensitivity: 0.5,
            exploration_bias: 0.0,
        };
        candidate.validate()?;
        self.templates.insert(kind, template);
        Ok(())
    }

    pub fn template(&self, kind: FieldKind) -> FieldTemplate {
        self.templates
            .get(&kind)
            .copied()
            .unwrap_or_else(|| FieldTemplate::default_for(kind))
    }

    pub fn stats(&self) -> &CategoryStatsTable {
        &self.stats
    }

    pub fn update_category_stats(
        &mut self,
        category: &str,
        strength: f64,
        complexity: f64,
        occurrences: f64,
    ) {
        self.stats.update(category, strength, complexity, occurrences);
    }

    /// Build the field for one query.
    ///
    /// Center resolution: operations hash first, then category statistics,
    /// then a signature blended with statistics, else a random point.
    pub fn generate_field(
        &self,
        query: &FieldQuery,
        context: &SystemContext,
        base_pattern: Option<&str>,
        operations: Option<&[LogicOperation]>,
        rng: &mut impl Rng,
    ) -> Result<ProbabilityField> {
        let center = self.resolve_center(query, base_pattern, operations, rng);
        let template = self.template(query.kind);

        let mut radius = template.radius;
        let mut amplitude = template.amplitude;
        let mut steepness = template.steepness;

        if query.confidence < 0.3 {
            radius *= 1.5;
            amplitude *= 0.8;
        } else if query.confidence > 0.8 {
            radius *= 0.7;
            amplitude *= 1.2;
        }

        if query.time_budget_ms.is_some_and(|t| t < 100.0) {
            radius *= 0.8;
            steepness *= 1.2;
        }

        let hit_rate = context.metrics.hit_rate;
        if hit_rate < 0.5 {
            radius *= 1.2;
        } else if hit_rate > 0.9 {
            radius *= 0.9;
        }

        let field = ProbabilityField {
            center,
            radius,
            shape: template.shape,
            falloff: template.falloff,
            amplitude,
            steepness,
            morphing_rate: template.morphing_rate,
            context_sensitivity: (context.active_categories.len() as f64 / 10.0).min(1.0),
            exploration_bias: query.exploration.clamp(0.0, 1.0),
        };
        field.validate()?;

        trace!(
            kind = ?query.kind,
            radius,
            shape = %field.shape,
            falloff = %field.falloff,
            "field generated"
        );
        Ok(field)
    }

    fn resolve_center(
        &self,
        query: &FieldQuery,
        base_pattern: Option<&str>,
        operations: Option<&[LogicOperation]>,
        rng: &mut impl Rng,
    ) -> Coordinates {
        let pattern = base_pattern.or(query.category.as_deref());

        if let Some(ops) = operations {
            let (s, c, o) = self.profile(pattern.and_then(|p| self.stats.get(p)));
            return pattern_coordinates(pattern.unwrap_or(""), &encode_operations(ops), s, c, o);
        }

        let Some(pattern) = pattern else {
            return Coordinates::random(rng);
        };
        let stats = self.stats.get(pattern);

        let (s, c, o) = match query.signature {
            None => self.profile(stats),
            Some(sig) => match stats {
                Some(st) => (
                    (sig.strength + st.avg_strength) / 2.0,
                    (sig.complexity + st.avg_complexity) / 2.0,
                    (sig.occurrences + st.avg_occurrences) / 2.0,
                ),
                None => (sig.strength, sig.complexity, sig.occurrences),
            },
        };
        pattern_coordinates(pattern, "", s, c, o)
    }

    fn profile(&self, stats: Option<&CategoryStats>) -> (f64, f64, f64) {
        match stats {
            Some(s) => (s.avg_strength, s.avg_complexity, s.avg_occurrences),
            None => (TYPICAL_STRENGTH, TYPICAL_COMPLEXITY, TYPICAL_OCCURRENCES),
        }
    }
}

/// Random drift of radius and center, scaled by the field's morphing rate and
/// by how long the field has been alive.
pub fn morph_field(
    field: &ProbabilityField,
    elapsed_ms: f64,
    rng: &mut impl Rng,
) -> ProbabilityField {
    let rate = field.morphing_rate.clamp(0.0, 1.0);
    let age = (elapsed_ms.max(0.0) / 1000.0).min(1.0);
    let scale = rate * (0.5 + 0.5 * age);

    let center = Coordinates::new(
        field.center.x + jitter(rng, 0.05 * scale),
        field.center.y + jitter(rng, 0.05 * scale),
        field.center.z + jitter(rng, 0.05 * scale),
    );
    let radius = field.radius * (1.0 + (rng.random::<f64>() * 0.2 - 0.1) * scale);

    ProbabilityField {
        center,
        radius: radius.max(f64::MIN_POSITIVE),
        ..field.clone()
    }
}

fn jitter(rng: &mut impl Rng, span: f64) -> f64 {
    (rng.random::<f64>() * 2.0 - 1.0) * span
}

/// Slow sinusoidal radius oscillation (4 s period).
pub fn apply_breathing(field: &ProbabilityField, elapsed_ms: f64) -> ProbabilityField {
    let t = elapsed_ms / 1000.0;
    let phase = (2.0 * PI * t / 4.0).sin();
    ProbabilityField {
        radius: field.radius * (1.0 + 0.1 * field.morphing_rate * phase),
        ..field.clone()
    }
}

/// Faster amplitude and steepness oscillation (1 Hz), out of phase.
pub fn apply_pulsing(field: &ProbabilityField, elapsed_ms: f64) -> ProbabilityField {
    let t = elapsed_ms / 1000.0;
    let s = (2.0 * PI * t).sin();
    let c = (2.0 * PI * t).cos();
    ProbabilityField {
        amplitude: (field.amplitude * (1.0 + 0.1 * field.morphing_rate * s)).max(0.0),
        steepness: field.steepness * (1.0 + 0.1 * field.morphing_rate * c),
        ..field.clone()
    }
}
