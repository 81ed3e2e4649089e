use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::constants::{EPSILON, OCCURRENCE_SCALE_MAX};

/// A point in the shared 3-D similarity space.
///
/// Stored records live inside the unit cube. Field centers may drift slightly
/// outside it after morphing; distances are plain Euclidean either way.
#[derive(Clone, Copy, Debug, Default, Serialize, Deserialize)]
pub struct Coordinates {
    pub x: f64,
    pub y: f64,
    pub z: f64,
}

impl PartialEq for Coordinates {
    fn eq(&self, other: &Self) -> bool {
        (self.x - other.x).abs() < EPSILON
            && (self.y - other.y).abs() < EPSILON
            && (self.z - other.z).abs() < EPSILON
    }
}

impl Coordinates {
    pub fn new(x: f64, y: f64, z: f64) -> Self {
        Self { x, y, z }
    }

    pub fn origin() -> Self {
        Self::default()
    }

    /// Zero vectors are treated as "never assigned".
    pub fn is_unset(&self) -> bool {
        self.x.abs() < EPSILON && self.y.abs() < EPSILON && self.z.abs() < EPSILON
    }

    pub fn distance(self, other: Self) -> f64 {
        let dx = self.x - other.x;
        let dy = self.y - other.y;
        let dz = self.z - other.z;
        (dx * dx + dy * dy + dz * dz).sqrt()
    }

    /// Uniform random point in the unit cube.
    pub fn random(rng: &mut impl Rng) -> Self {
        Self {
            x: rng.random(),
            y: rng.random(),
            z: rng.random(),
        }
    }

    /// Component-wise mean of a set of points. `None` for an empty set.
    pub fn centroid<'a>(points: impl IntoIterator<Item = &'a Coordinates>) -> Option<Self> {
        let mut sum = Self::origin();
        let mut count = 0usize;
        for p in points {
            sum.x += p.x;
            sum.y += p.y;
            sum.z += p.z;
            count += 1;
        }
        if count == 0 {
            return None;
        }
        let n = count as f64;
        Some(Self::new(sum.x / n, sum.y / n, sum.z / n))
    }

    pub fn to_array(self) -> [f64; 3] {
        [self.x, self.y, self.z]
    }

    pub fn from_array(arr: [f64; 3]) -> Self {
        Self::new(arr[0], arr[1], arr[2])
    }
}

/// A boolean/weighted operation attached to a pattern lookup.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct LogicOperation {
    #[serde(rename = "type")]
    pub op_type: String,
    #[serde(default)]
    pub params: Vec<String>,
    #[serde(default)]
    pub threshold: f64,
    #[serde(default = "default_weight")]
    pub weight: f64,
}

fn default_weight() -> f64 {
    1.0
}

impl LogicOperation {
    pub fn new(op_type: &str, params: &[&str], threshold: f64, weight: f64) -> Self {
        Self {
            op_type: op_type.to_string(),
            params: params.iter().map(|p| p.to_string()).collect(),
            threshold,
            weight,
        }
    }
}

/// Serialize operations for coordinate hashing.
///
/// An empty list encodes to the empty string, which is also the encoding used
/// when records are stored. Changing one without the other makes query
/// centers drift away from stored coordinates.
pub fn encode_operations(ops: &[LogicOperation]) -> String {
    ops.iter()
        .map(|op| {
            format!(
                "{}:{}:threshold={}:weight={}",
                op.op_type,
                op.params.join(","),
                op.threshold,
                op.weight
            )
        })
        .collect::<Vec<_>>()
        .join("|")
}

/// Deterministic placement of a pattern in coordinate space.
///
/// The hash of `UPPER(pattern) | ops_encoding` picks a per-pattern offset on
/// each axis; strength, complexity and occurrences spread records of the same
/// pattern around that offset.
pub fn pattern_coordinates(
    pattern: &str,
    ops_encoding: &str,
    strength: f64,
    complexity: f64,
    occurrences: f64,
) -> Coordinates {
    let key = format!("{}|{}", pattern.to_uppercase(), ops_encoding);
    let hash = blake3::hash(key.as_bytes());
    let bytes = hash.as_bytes();
    let hx = unit_from_bytes(&bytes[0..8]);
    let hy = unit_from_bytes(&bytes[8..16]);
    let hz = unit_from_bytes(&bytes[16..24]);

    Coordinates {
        x: 0.5 * hx + 0.5 * strength.clamp(0.0, 1.0),
        y: 0.5 * hy + 0.5 * squash_complexity(complexity),
        z: 0.5 * hz + 0.5 * scale_occurrences(occurrences),
    }
}

/// Coordinates of a stored record: the empty-operations case.
pub fn record_coordinates(
    category: &str,
    strength: f64,
    complexity: f64,
    occurrences: f64,
) -> Coordinates {
    pattern_coordinates(category, "", strength, complexity, occurrences)
}

fn unit_from_bytes(bytes: &[u8]) -> f64 {
    let mut buf = [0u8; 8];
    buf.copy_from_slice(bytes);
    // 53 bits of mantissa
    (u64::from_le_bytes(buf) >> 11) as f64 / (1u64 << 53) as f64
}

/// Map complexity in [0, ∞) onto [0, 1).
fn squash_complexity(complexity: f64) -> f64 {
    let c = complexity.max(0.0);
    c / (1.0 + c)
}

/// Log-scale occurrences onto [0, 1].
fn scale_occurrences(occurrences: f64) -> f64 {
    let o = occurrences.max(0.0);
    ((1.0 + o).ln() / (1.0 + OCCURRENCE_SCALE_MAX).ln()).min(1.0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_distance() {
        let a = Coordinates::new(0.0, 0.0, 0.0);
        let b = Coordinates::new(1.0, 2.0, 2.0);
        assert!((a.distance(b) - 3.0).abs() < 1e-12);
    }

    #[test]
    fn test_zero_is_unset() {
        assert!(Coordinates::origin().is_unset());
        assert!(!Coordinates::new(0.0, 0.1, 0.0).is_unset());
    }

    #[test]
    fn test_record_coordinates_deterministic() {
        let a = record_coordinates("singleton", 0.7, 0.4, 12.0);
        let b = record_coordinates("SINGLETON", 0.7, 0.4, 12.0);
        assert_eq!(a, b, "category hashing must be case-insensitive");
    }

    #[test]
    fn test_empty_operations_match_record_encoding() {
        assert_eq!(encode_operations(&[]), "");
        let stored = record_coordinates("observer", 0.8, 0.6, 50.0);
        let queried = pattern_coordinates("observer", &encode_operations(&[]), 0.8, 0.6, 50.0);
        assert_eq!(stored, queried);
    }

    #[test]
    fn test_operations_shift_center() {
        let ops = vec![LogicOperation::new("AND", &["factory", "builder"], 0.5, 1.0)];
        let plain = pattern_coordinates("factory", "", 0.8, 0.6, 50.0);
        let with_ops = pattern_coordinates("factory", &encode_operations(&ops), 0.8, 0.6, 50.0);
        assert_ne!(plain, with_ops);
    }

    #[test]
    fn test_encode_operations_format() {
        let ops = vec![
            LogicOperation::new("AND", &["a", "b"], 0.5, 1.0),
            LogicOperation::new("NOT", &["c"], 0.25, 0.5),
        ];
        assert_eq!(
            encode_operations(&ops),
            "AND:a,b:threshold=0.5:weight=1|NOT:c:threshold=0.25:weight=0.5"
        );
    }

    #[test]
    fn test_coordinates_in_unit_cube() {
        let samples = [("a", 0.0, 0.0, 1.0), ("b", 1.0, 100.0, 1e6), ("c", 2.0, -1.0, 0.0)];
        for (cat, s, c, o) in samples {
            let p = record_coordinates(cat, s, c, o);
            for v in p.to_array() {
                assert!((0.0..=1.0).contains(&v), "{cat}: component out of range: {v}");
            }
        }
    }

    #[test]
    fn test_centroid() {
        let pts = [Coordinates::new(0.0, 0.0, 0.0), Coordinates::new(1.0, 1.0, 1.0)];
        let c = Coordinates::centroid(pts.iter()).unwrap();
        assert_eq!(c, Coordinates::new(0.5, 0.5, 0.5));
        assert!(Coordinates::centroid(std::iter::empty()).is_none());
    }
}
