/// Golden ratio: (1 + √5) / 2
pub const PHI: f64 = 1.618_033_988_749_895;

/// Numerical epsilon for near-zero comparisons
pub const EPSILON: f64 = 1e-10;

/// Floor applied to every recorded phase duration (milliseconds).
/// Keeps downstream rate and ratio computations away from zero.
pub const MIN_PHASE_DURATION_MS: f64 = 0.001;

/// Fallback category profile when no statistics exist yet.
pub const TYPICAL_STRENGTH: f64 = 0.8;
pub const TYPICAL_COMPLEXITY: f64 = 0.6;
pub const TYPICAL_OCCURRENCES: f64 = 50.0;

/// Occurrence count that maps to the top of the z axis.
pub const OCCURRENCE_SCALE_MAX: f64 = 1000.0;

/// Capacity of the recent-query ring buffer in `SystemContext`.
pub const RECENT_QUERY_CAPACITY: usize = 10;

/// Lower bound for thresholds derived from small candidate sets.
pub const MIN_SMALL_SET_THRESHOLD: f64 = 0.0001;
