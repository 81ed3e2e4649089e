use std::collections::{HashMap, HashSet, VecDeque};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;

use crate::backend::RelationshipStore;
use crate::error::{Result, StoreError};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntityKind {
    Symbol,
    File,
}

/// A symbol or file plus the pattern categories it participates in.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Entity {
    pub id: String,
    pub kind: EntityKind,
    pub name: String,
    #[serde(default)]
    pub file: Option<String>,
    #[serde(default)]
    pub patterns: Vec<String>,
}

impl Entity {
    pub fn symbol(id: &str, name: &str, file: &str, patterns: &[&str]) -> Self {
        Self {
            id: id.to_string(),
            kind: EntityKind::Symbol,
            name: name.to_string(),
            file: Some(file.to_string()),
            patterns: patterns.iter().map(|p| p.to_string()).collect(),
        }
    }

    pub fn file(path: &str, patterns: &[&str]) -> Self {
        Self {
            id: path.to_string(),
            kind: EntityKind::File,
            name: path.to_string(),
            file: Some(path.to_string()),
            patterns: patterns.iter().map(|p| p.to_string()).collect(),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RelatedEntity {
    pub entity: Entity,
    pub depth: usize,
    /// Relation label on the edge that reached this entity.
    pub via: String,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Traversal {
    pub root: Entity,
    pub related: Vec<RelatedEntity>,
}

impl Traversal {
    /// Distinct pattern categories across the root and everything reached.
    pub fn pattern_set(&self) -> Vec<String> {
        let mut seen = HashSet::new();
        std::iter::once(&self.root)
            .chain(self.related.iter().map(|r| &r.entity))
            .flat_map(|e| e.patterns.iter())
            .filter(|p| seen.insert(p.to_uppercase()))
            .cloned()
            .collect()
    }

    pub fn max_depth(&self) -> usize {
        self.related.iter().map(|r| r.depth).max().unwrap_or(0)
    }
}

#[derive(Debug, Default)]
struct GraphInner {
    entities: HashMap<String, Entity>,
    /// Undirected adjacency: entity id → (neighbor id, relation label).
    edges: HashMap<String, Vec<(String, String)>>,
}

/// In-process relationship graph.
#[derive(Debug, Default)]
pub struct MemoryGraph {
    inner: RwLock<GraphInner>,
}

impl MemoryGraph {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn add_entity(&self, entity: Entity) {
        self.inner.write().await.entities.insert(entity.id.clone(), entity);
    }

    /// Connect two known entities. Unknown ids are rejected.
    pub async fn relate(&self, from: &str, to: &str, label: &str) -> Result<()> {
        let mut inner = self.inner.write().await;
        for id in [from, to] {
            if !inner.entities.contains_key(id) {
                return Err(StoreError::NotFound(id.to_string()));
            }
        }
        inner
            .edges
            .entry(from.to_string())
            .or_default()
            .push((to.to_string(), label.to_string()));
        inner
            .edges
            .entry(to.to_string())
            .or_default()
            .push((from.to_string(), label.to_string()));
        Ok(())
    }

    pub async fn len(&self) -> usize {
        self.inner.read().await.entities.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.inner.read().await.entities.is_empty()
    }
}

fn find<'a>(inner: &'a GraphInner, target: &str) -> Option<&'a Entity> {
    inner.entities.get(target).or_else(|| {
        let mut matches: Vec<&Entity> = inner
            .entities
            .values()
            .filter(|e| e.name.eq_ignore_ascii_case(target) || e.file.as_deref() == Some(target))
            .collect();
        // files before symbols, then by id, so lookups are stable
        matches.sort_by(|a, b| {
            (a.kind != EntityKind::File)
                .cmp(&(b.kind != EntityKind::File))
                .then_with(|| a.id.cmp(&b.id))
        });
        matches.into_iter().next()
    })
}

#[async_trait]
impl RelationshipStore for MemoryGraph {
    fn name(&self) -> &str {
        "graph"
    }

    async fn lookup(&self, target: &str) -> Result<Option<Entity>> {
        let inner = self.inner.read().await;
        Ok(find(&inner, target).cloned())
    }

    async fn traverse(&self, target: &str, max_depth: usize) -> Result<Traversal> {
        let inner = self.inner.read().await;
        let root = find(&inner, target).ok_or_else(|| StoreError::NotFound(target.to_string()))?;

        let mut visited: HashSet<&str> = HashSet::from([root.id.as_str()]);
        let mut queue: VecDeque<(&str, usize)> = VecDeque::from([(root.id.as_str(), 0)]);
        let mut related = Vec::new();

        while let Some((id, depth)) = queue.pop_front() {
            if depth >= max_depth {
                continue;
            }
            let Some(neighbors) = inner.edges.get(id) else {
                continue;
            };
            for (next, label) in neighbors {
                if !visited.insert(next.as_str()) {
                    continue;
                }
                if let Some(entity) = inner.entities.get(next) {
                    related.push(RelatedEntity {
                        entity: entity.clone(),
                        depth: depth + 1,
                        via: label.clone(),
                    });
                    queue.push_back((next.as_str(), depth + 1));
                }
            }
        }

        Ok(Traversal {
            root: root.clone(),
            related,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn chain() -> MemoryGraph {
        let g = MemoryGraph::new();
        g.add_entity(Entity::file("src/events.rs", &["observer"])).await;
        g.add_entity(Entity::symbol("s1", "EventBus", "src/events.rs", &["observer", "singleton"]))
            .await;
        g.add_entity(Entity::symbol("s2", "Listener", "src/listen.rs", &["observer"]))
            .await;
        g.add_entity(Entity::symbol("s3", "Registry", "src/registry.rs", &["factory"]))
            .await;
        g.relate("src/events.rs", "s1", "defines").await.unwrap();
        g.relate("s1", "s2", "calls").await.unwrap();
        g.relate("s2", "s3", "uses").await.unwrap();
        g
    }

    #[tokio::test]
    async fn test_lookup_by_name_and_file() {
        let g = chain().await;
        assert_eq!(g.lookup("eventbus").await.unwrap().unwrap().id, "s1");
        assert_eq!(
            g.lookup("src/events.rs").await.unwrap().unwrap().kind,
            EntityKind::File
        );
        assert!(g.lookup("nothing").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_traverse_respects_depth() {
        let g = chain().await;
        let t = g.traverse("s1", 1).await.unwrap();
        let mut ids: Vec<&str> = t.related.iter().map(|r| r.entity.id.as_str()).collect();
        ids.sort();
        assert_eq!(ids, vec!["s2", "src/events.rs"]);
        assert_eq!(t.max_depth(), 1);

        let deep = g.traverse("s1", 5).await.unwrap();
        assert_eq!(deep.related.len(), 3);
        assert_eq!(deep.max_depth(), 2);
    }

    #[tokio::test]
    async fn test_pattern_set_is_distinct() {
        let g = chain().await;
        let t = g.traverse("s1", 5).await.unwrap();
        let mut patterns = t.pattern_set();
        patterns.sort();
        assert_eq!(patterns, vec!["factory", "observer", "singleton"]);
    }

    #[tokio::test]
    async fn test_unknown_target() {
        let g = chain().await;
        assert!(matches!(g.traverse("ghost", 2).await, Err(StoreError::NotFound(_))));
        assert!(g.relate("s1", "ghost", "calls").await.is_err());
    }
}
