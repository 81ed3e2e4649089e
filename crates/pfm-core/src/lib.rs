//! Probability-field memory engine.
//!
//! Stored pattern records live at deterministic points in a 3-D similarity
//! space. A query becomes a probability field over that space; candidates
//! are scored against the field, cut at a threshold derived from their own
//! score distribution, and scanned for emergent cross-cutting insights.
//!
//! Zero I/O. Persistence, routing and caching live in the store and gateway crates.

pub mod constants;
pub mod context;
pub mod coords;
pub mod emergent;
pub mod error;
pub mod field;
pub mod harmonic;
pub mod node;
pub mod record;
pub mod stats;
pub mod superposition;
pub mod threshold;
pub mod time;

pub use constants::{EPSILON, MIN_PHASE_DURATION_MS, PHI};
pub use context::{PerformanceMetrics, QueryObservation, Smoothing, SystemContext};
pub use coords::{
    Coordinates, LogicOperation, encode_operations, pattern_coordinates, record_coordinates,
};
pub use emergent::{
    BehaviorKind, BehaviorToggle, DetectOptions, EmergentBehaviorEngine, EmergentConfig,
    EmergentInsight,
};
pub use error::{CoreError, Result};
pub use field::{
    Falloff, FieldGenerator, FieldKind, FieldQuery, FieldShape, FieldTemplate, HarmonicSignature,
    ProbabilityField, apply_breathing, apply_pulsing, calculate_probability, morph_field,
};
pub use harmonic::{HarmonicWeights, harmonic_score};
pub use node::QuantumNode;
pub use record::{HarmonicProperties, MemoryRecord, PatternContent};
pub use stats::{CategoryStats, CategoryStatsTable};
pub use superposition::{
    InterferenceKind, InterferencePattern, SuperpositionConfig, SuperpositionEngine,
    SuperpositionState, WeightedNode,
};
pub use threshold::{
    QueryContext, QuickMode, SearchMode, SystemState, ThresholdManager, quick_threshold,
};
pub use time::{millis_to_iso8601, now_millis};
