//! Composite "harmonic" quality score for a pattern record.
//!
//! Blends strength, closeness of complexity to an optimum, golden-ratio
//! resonance of the strength value and Fibonacci proximity of the occurrence
//! count. Every coefficient is configurable; none of them is load-bearing for
//! ranking beyond being monotone in strength.

use serde::{Deserialize, Serialize};

use crate::constants::{EPSILON, PHI};
use crate::record::HarmonicProperties;

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HarmonicWeights {
    pub strength_weight: f64,
    pub complexity_weight: f64,
    pub resonance_weight: f64,
    pub fibonacci_weight: f64,
    /// Complexity value that scores highest on the complexity term.
    pub complexity_optimum: f64,
}

impl Default for HarmonicWeights {
    fn default() -> Self {
        Self {
            strength_weight: 0.4,
            complexity_weight: 0.2,
            resonance_weight: 0.2,
            fibonacci_weight: 0.2,
            complexity_optimum: 0.6,
        }
    }
}

/// Harmonic score in [0, 1].
pub fn harmonic_score(props: &HarmonicProperties, weights: &HarmonicWeights) -> f64 {
    let total = weights.strength_weight
        + weights.complexity_weight
        + weights.resonance_weight
        + weights.fibonacci_weight;
    let strength = props.strength.clamp(0.0, 1.0);
    if total < EPSILON {
        return strength;
    }

    let complexity_term = (-(props.complexity - weights.complexity_optimum).abs()).exp();
    let score = weights.strength_weight * strength
        + weights.complexity_weight * complexity_term
        + weights.resonance_weight * golden_resonance(strength)
        + weights.fibonacci_weight * fibonacci_proximity(props.occurrences);

    (score / total).clamp(0.0, 1.0)
}

/// 1.0 when the fractional part of `value · φ` sits on φ − 1, falling
/// linearly to 0.0 at the far end of the unit interval.
pub fn golden_resonance(value: f64) -> f64 {
    let inv_phi = PHI - 1.0;
    let frac = (value * PHI).fract().abs();
    (1.0 - (frac - inv_phi).abs() / inv_phi).clamp(0.0, 1.0)
}

/// 1.0 on a Fibonacci number, decaying with relative distance to the nearest one.
pub fn fibonacci_proximity(occurrences: u64) -> f64 {
    if occurrences == 0 {
        return 0.0;
    }
    let (mut a, mut b) = (1u64, 2u64);
    while b < occurrences {
        let next = a.saturating_add(b);
        a = b;
        b = next;
    }
    let nearest = if occurrences - a <= b - occurrences { a } else { b };
    let diff = nearest.abs_diff(occurrences) as f64;
    (1.0 - diff / occurrences as f64).clamp(0.0, 1.0)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn props(strength: f64, complexity: f64, occurrences: u64) -> HarmonicProperties {
        HarmonicProperties {
            category: "TEST".to_string(),
            strength,
            occurrences,
            confidence: 1.0,
            complexity,
        }
    }

    #[test]
    fn test_fibonacci_proximity() {
        assert_eq!(fibonacci_proximity(13), 1.0);
        assert_eq!(fibonacci_proximity(1), 1.0);
        assert_eq!(fibonacci_proximity(0), 0.0);
        assert!(fibonacci_proximity(17) < 1.0);
        assert!(fibonacci_proximity(17) > 0.5);
    }

    #[test]
    fn test_golden_resonance_bounds() {
        for i in 0..=100 {
            let r = golden_resonance(i as f64 / 100.0);
            assert!((0.0..=1.0).contains(&r));
        }
    }

    #[test]
    fn test_score_bounded_and_monotone_in_strength() {
        let w = HarmonicWeights {
            resonance_weight: 0.0,
            ..HarmonicWeights::default()
        };
        let low = harmonic_score(&props(0.2, 0.6, 13), &w);
        let high = harmonic_score(&props(0.9, 0.6, 13), &w);
        assert!(high > low);
        assert!((0.0..=1.0).contains(&low));
        assert!((0.0..=1.0).contains(&high));
    }

    #[test]
    fn test_zero_weights_fall_back_to_strength() {
        let w = HarmonicWeights {
            strength_weight: 0.0,
            complexity_weight: 0.0,
            resonance_weight: 0.0,
            fibonacci_weight: 0.0,
            complexity_optimum: 0.6,
        };
        assert_eq!(harmonic_score(&props(0.3, 5.0, 7), &w), 0.3);
    }
}
