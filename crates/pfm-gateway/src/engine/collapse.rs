use std::collections::HashSet;
use std::time::{Duration, Instant};

use pfm_core::{MIN_PHASE_DURATION_MS, MemoryRecord, SuperpositionState, WeightedNode};
use serde::{Deserialize, Serialize};

/// A memory as returned to callers.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RetrievedMemory {
    pub id: String,
    pub probability: f64,
    /// Stored confidence of the record, not the node's blended score.
    pub confidence: f64,
    pub category: String,
    pub record: MemoryRecord,
}

impl RetrievedMemory {
    pub fn from_weighted(w: &WeightedNode) -> Self {
        Self {
            id: w.node.id().to_string(),
            probability: w.probability,
            confidence: w.node.record.harmonic.confidence,
            category: w.node.record.category_key(),
            record: w.node.record.clone(),
        }
    }
}

/// Bounded result set: dominant states first, then the most probable of the rest.
pub fn collapse(superposition: &SuperpositionState, max_results: usize) -> Vec<WeightedNode> {
    let mut out: Vec<WeightedNode> =
        superposition.dominant.iter().take(max_results).cloned().collect();
    if out.len() < max_results {
        let taken: HashSet<String> = out.iter().map(|w| w.node.id().to_string()).collect();
        let fill: Vec<WeightedNode> = superposition
            .states
            .iter()
            .filter(|w| !taken.contains(w.node.id()))
            .take(max_results - out.len())
            .cloned()
            .collect();
        out.extend(fill);
    }
    out
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PhaseTimings {
    pub normalize_ms: f64,
    pub field_ms: f64,
    pub lookup_ms: f64,
    pub superposition_ms: f64,
    pub emergent_ms: f64,
    pub total_ms: f64,
}

impl PhaseTimings {
    /// Every phase at the floor until measured. Phases a path skips keep it.
    pub fn floored() -> Self {
        Self {
            normalize_ms: MIN_PHASE_DURATION_MS,
            field_ms: MIN_PHASE_DURATION_MS,
            lookup_ms: MIN_PHASE_DURATION_MS,
            superposition_ms: MIN_PHASE_DURATION_MS,
            emergent_ms: MIN_PHASE_DURATION_MS,
            total_ms: MIN_PHASE_DURATION_MS,
        }
    }
}

/// Every timing leaves the engine through here, never below the floor.
pub fn floor_ms(elapsed: Duration) -> f64 {
    (elapsed.as_secs_f64() * 1000.0).max(MIN_PHASE_DURATION_MS)
}

pub(crate) struct PhaseClock {
    started: Instant,
    mark: Instant,
}

impl PhaseClock {
    pub fn start() -> Self {
        let now = Instant::now();
        Self { started: now, mark: now }
    }

    /// Time since the previous lap.
    pub fn lap(&mut self) -> f64 {
        let now = Instant::now();
        let ms = floor_ms(now - self.mark);
        self.mark = now;
        ms
    }

    pub fn total(&self) -> f64 {
        floor_ms(self.started.elapsed())
    }
}
