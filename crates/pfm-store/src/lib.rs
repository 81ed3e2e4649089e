//! Backend collaborators for the probability-field memory engine.
//!
//! Defines the narrow interfaces the engine and gateway consume (category
//! index, relationship graph, analytics, persistent fallback) together with
//! in-process implementations and a SQLite-backed index.

pub mod analytics;
pub mod backend;
pub mod error;
pub mod graph;
pub mod memory;
pub mod schema;
pub mod sqlite;

pub use analytics::{
    AnalyticsSummary, CategoryAggregate, Hotspot, MemoryAnalytics, PatternRow, Snapshot, TimeRange,
};
pub use backend::{
    AnalyticsStore, CategoryIndexedStore, IndexStats, PersistentStore, QueryOptions,
    RelationshipStore,
};
pub use error::{Result, StoreError};
pub use graph::{Entity, EntityKind, MemoryGraph, RelatedEntity, Traversal};
pub use memory::MemoryIndex;
pub use sqlite::SqliteStore;
