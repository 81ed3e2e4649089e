//! Unified retrieval over the category index and the probability-field model.
//!
//! The engine owns the in-memory node table and the field generator's
//! category statistics. Both change only in the store paths. Queries take a
//! snapshot of the node table (an `Arc` clone) and never see a half-applied
//! store; the one write a query performs, access bookkeeping on returned
//! nodes, goes through the same copy-on-write path.

mod collapse;
mod query;
mod request;

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use async_trait::async_trait;
use pfm_core::{
    BehaviorKind, EmergentBehaviorEngine, EmergentInsight, FieldGenerator, HarmonicWeights,
    MemoryRecord, PerformanceMetrics, QuantumNode, Smoothing, SuperpositionEngine, SystemContext,
    SystemState, ThresholdManager, now_millis,
};
use pfm_store::{CategoryIndexedStore, MemoryIndex, PersistentStore};
use rand::SeedableRng;
use rand::rngs::SmallRng;
use serde::{Deserialize, Serialize};
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, info};

use crate::config::{FieldConfig, GatewayConfig, IndexConfig};
use crate::error::Result;

pub use collapse::{PhaseTimings, RetrievedMemory, collapse, floor_ms};
pub use query::{QueryResult, SimilarOptions, Strategy, Thresholds};
pub use request::{CanonicalQuery, DEFAULT_MAX_RESULTS, QueryRequest, normalize};

type NodeTable = HashMap<String, Arc<QuantumNode>>;

/// Receives every record the engine accepts. Stands in for the external
/// learning subsystem.
#[async_trait]
pub trait LearningSink: Send + Sync {
    async fn on_stored(&self, records: &[MemoryRecord]);
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EngineStats {
    pub nodes: usize,
    /// Node count over the configured record capacity, in [0, 1].
    pub occupancy: f64,
    pub categories: usize,
    pub metrics: PerformanceMetrics,
    pub recent_queries: Vec<String>,
    pub active_categories: Vec<String>,
    pub index_backend: String,
}

/// Wires an engine. Every collaborator is named here; anything left unset
/// falls back to an in-process default.
pub struct EngineBuilder {
    config: GatewayConfig,
    index: Option<Arc<dyn CategoryIndexedStore>>,
    persistent: Option<Arc<dyn PersistentStore>>,
    learning: Option<Arc<dyn LearningSink>>,
    seed: Option<u64>,
}

impl EngineBuilder {
    pub fn index(mut self, index: Arc<dyn CategoryIndexedStore>) -> Self {
        self.index = Some(index);
        self
    }

    pub fn persistent(mut self, persistent: Arc<dyn PersistentStore>) -> Self {
        self.persistent = Some(persistent);
        self
    }

    pub fn learning(mut self, sink: Arc<dyn LearningSink>) -> Self {
        self.learning = Some(sink);
        self
    }

    /// Fix the random source used for field centers and morphing.
    pub fn seed(mut self, seed: u64) -> Self {
        self.seed = Some(seed);
        self
    }

    /// Fails only on invalid field templates.
    pub fn build(self) -> Result<RetrievalEngine> {
        let generator = self.config.field_generator()?;
        let superposition_config = self.config.superposition_config();
        let mut light = superposition_config.clone();
        light.max_interference = light.max_interference.min(3);

        let rng = match self.seed {
            Some(seed) => SmallRng::seed_from_u64(seed),
            None => SmallRng::from_os_rng(),
        };

        Ok(RetrievalEngine {
            index: self.index.unwrap_or_else(|| Arc::new(MemoryIndex::new())),
            persistent: self.persistent,
            learning: self.learning,
            nodes: RwLock::new(Arc::new(HashMap::new())),
            generator: RwLock::new(generator),
            context: Mutex::new(SystemContext::new()),
            superposition: SuperpositionEngine::new(superposition_config),
            light_superposition: SuperpositionEngine::new(light),
            emergent: EmergentBehaviorEngine::new(self.config.emergent.clone()),
            thresholds: ThresholdManager::new(),
            weights: self.config.harmonic.clone(),
            smoothing: self.config.smoothing(),
            index_config: self.config.index.clone(),
            field_config: self.config.field.clone(),
            max_records: self.config.capacity.max_records.max(1),
            rng: Mutex::new(rng),
        })
    }
}

pub struct RetrievalEngine {
    index: Arc<dyn CategoryIndexedStore>,
    persistent: Option<Arc<dyn PersistentStore>>,
    learning: Option<Arc<dyn LearningSink>>,
    nodes: RwLock<Arc<NodeTable>>,
    generator: RwLock<FieldGenerator>,
    context: Mutex<SystemContext>,
    superposition: SuperpositionEngine,
    /// Same pruning, fewer interference pairs. Used for precision reporting.
    light_superposition: SuperpositionEngine,
    emergent: EmergentBehaviorEngine,
    thresholds: ThresholdManager,
    weights: HarmonicWeights,
    smoothing: Smoothing,
    index_config: IndexConfig,
    field_config: FieldConfig,
    max_records: usize,
    rng: Mutex<SmallRng>,
}

impl RetrievalEngine {
    pub fn builder(config: &GatewayConfig) -> EngineBuilder {
        EngineBuilder {
            config: config.clone(),
            index: None,
            persistent: None,
            learning: None,
            seed: None,
        }
    }

    pub fn index(&self) -> &Arc<dyn CategoryIndexedStore> {
        &self.index
    }

    /// Write one record through to the index and refresh its node.
    /// Returns the record as stored, with coordinates filled in.
    pub async fn store(&self, record: &MemoryRecord) -> Result<MemoryRecord> {
        let record = record.clone().normalized();
        self.index.store(&record).await?;
        self.materialize(std::slice::from_ref(&record)).await;
        if let Some(sink) = &self.learning {
            sink.on_stored(std::slice::from_ref(&record)).await;
        }
        info!(id = %record.id, category = %record.category_key(), "record stored");
        Ok(record)
    }

    pub async fn bulk_store(&self, records: &[MemoryRecord]) -> Result<Vec<MemoryRecord>> {
        let records: Vec<MemoryRecord> =
            records.iter().cloned().map(MemoryRecord::normalized).collect();
        let written = self.index.bulk_store(&records).await?;
        self.materialize(&records).await;
        if let Some(sink) = &self.learning {
            sink.on_stored(&records).await;
        }
        info!(count = written, backend = self.index.name(), "bulk store complete");
        Ok(records)
    }

    /// Build nodes and statistics for records already held by a backend.
    /// Nothing is written back.
    pub async fn hydrate(&self, records: &[MemoryRecord]) -> usize {
        let records: Vec<MemoryRecord> =
            records.iter().cloned().map(MemoryRecord::normalized).collect();
        self.materialize(&records).await;
        info!(count = records.len(), "engine hydrated");
        records.len()
    }

    /// Node table, then the category index, then the persistent backend.
    /// Hits from either backend are promoted into the node table.
    pub async fn retrieve(&self, id: &str) -> Result<Option<MemoryRecord>> {
        let Some(node) = self.resolve_node(id).await? else {
            debug!(id, "retrieve miss");
            return Ok(None);
        };
        self.touch(&[id.to_string()]).await;
        Ok(Some(node.record.clone()))
    }

    /// Run one emergent behavior over the whole node population.
    pub async fn trigger_behavior(&self, kind: BehaviorKind) -> Vec<EmergentInsight> {
        let snapshot = self.snapshot().await;
        let mut nodes: Vec<Arc<QuantumNode>> = snapshot.values().cloned().collect();
        nodes.sort_by(|a, b| a.id().cmp(b.id()));
        let context = self.context.lock().await.clone();
        let mut rng = self.rng.lock().await;
        self.emergent.trigger_behavior(kind, &nodes, &context, &mut *rng)
    }

    pub async fn stats(&self) -> EngineStats {
        let nodes = self.snapshot().await.len();
        let categories = self.generator.read().await.stats().len();
        let context = self.context.lock().await.clone();
        EngineStats {
            nodes,
            occupancy: self.occupancy(nodes),
            categories,
            metrics: context.metrics,
            recent_queries: context.recent_queries.into_iter().collect(),
            active_categories: context.active_categories.into_iter().collect(),
            index_backend: self.index.name().to_string(),
        }
    }

    pub async fn context(&self) -> SystemContext {
        self.context.lock().await.clone()
    }

    async fn snapshot(&self) -> Arc<NodeTable> {
        Arc::clone(&*self.nodes.read().await)
    }

    async fn materialize(&self, records: &[MemoryRecord]) {
        if records.is_empty() {
            return;
        }
        let mut nodes = self.nodes.write().await;
        let mut generator = self.generator.write().await;
        let table = Arc::make_mut(&mut *nodes);
        for r in records {
            let h = &r.harmonic;
            let occurrences = h.occurrences as f64;
            generator.update_category_stats(&h.category, h.strength, h.complexity, occurrences);
            let node = QuantumNode::from_record(r.clone(), &self.weights);
            table.insert(r.id.clone(), Arc::new(node));
        }
        evict(table, records, self.max_records);
    }

    /// Node for `id`, pulling it in from a backend when the table misses.
    async fn resolve_node(&self, id: &str) -> Result<Option<Arc<QuantumNode>>> {
        if let Some(node) = self.snapshot().await.get(id) {
            return Ok(Some(Arc::clone(node)));
        }

        let mut found = self.index.get(id).await?;
        if found.is_none()
            && let Some(remote) = &self.persistent
        {
            found = remote.fetch(id).await?;
            if found.is_some() {
                debug!(id, backend = remote.name(), "promoted remote record");
            }
        }

        let Some(record) = found else {
            return Ok(None);
        };
        self.materialize(std::slice::from_ref(&record)).await;
        Ok(self.snapshot().await.get(id).cloned())
    }

    /// Nodes for backend hits, materializing any the table has not seen.
    async fn nodes_for(&self, records: Vec<MemoryRecord>) -> Vec<Arc<QuantumNode>> {
        let snapshot = self.snapshot().await;
        let unseen: Vec<MemoryRecord> = records
            .iter()
            .filter(|r| !snapshot.contains_key(&r.id))
            .cloned()
            .collect();
        let snapshot = if unseen.is_empty() {
            snapshot
        } else {
            self.materialize(&unseen).await;
            self.snapshot().await
        };
        records
            .iter()
            .filter_map(|r| snapshot.get(&r.id).cloned())
            .collect()
    }

    /// Access bookkeeping for returned nodes.
    async fn touch(&self, ids: &[String]) {
        if ids.is_empty() {
            return;
        }
        let now = now_millis();
        let mut nodes = self.nodes.write().await;
        let table = Arc::make_mut(&mut *nodes);
        for id in ids {
            if let Some(node) = table.get_mut(id) {
                Arc::make_mut(node).record_access(now);
            }
        }
    }

    fn occupancy(&self, nodes: usize) -> f64 {
        (nodes as f64 / self.max_records as f64).min(1.0)
    }

    fn system_state(&self, nodes: usize, context: &SystemContext) -> SystemState {
        let occupancy = self.occupancy(nodes);
        SystemState {
            density: occupancy,
            pressure: occupancy,
            recent_latency_ms: context.metrics.avg_response_time_ms,
        }
    }
}

/// Drop nodes past `max_records`. Nodes outside `incoming` go first, then
/// the least accessed, then the least recently touched. Evicted records stay
/// in the backends and are promoted again on the next lookup.
fn evict(table: &mut NodeTable, incoming: &[MemoryRecord], max_records: usize) {
    let excess = table.len().saturating_sub(max_records);
    if excess == 0 {
        return;
    }
    let fresh: HashSet<&str> = incoming.iter().map(|r| r.id.as_str()).collect();
    let mut ranked: Vec<(bool, u32, u64, &String)> = table
        .iter()
        .map(|(id, n)| {
            let seen = n.last_accessed.max(n.record.stored_at);
            (fresh.contains(id.as_str()), n.access_count, seen, id)
        })
        .collect();
    ranked.sort();
    let victims: Vec<String> = ranked.into_iter().take(excess).map(|(.., id)| id.clone()).collect();
    for id in &victims {
        table.remove(id);
    }
    debug!(evicted = victims.len(), max_records, "node table over capacity");
}
