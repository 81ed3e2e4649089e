use async_trait::async_trait;
use pfm_store::StoreError;
use serde_json::json;

use super::{Backends, QueryHandler, require_target};
use crate::error::{GatewayError, Result};
use crate::types::{GatewayQuery, HandlerOutput, QueryType};

const DEFAULT_DEPTH: usize = 2;
/// Reached entities beyond which a target reads as tightly coupled.
pub(super) const COUPLING_WARNING: usize = 10;

pub struct RelationshipHandler;

#[async_trait]
impl QueryHandler for RelationshipHandler {
    fn query_type(&self) -> QueryType {
        QueryType::Relationship
    }

    async fn handle(&self, query: &GatewayQuery, backends: &Backends) -> Result<HandlerOutput> {
        relationship(query, backends).await
    }
}

pub(super) async fn relationship(
    query: &GatewayQuery,
    backends: &Backends,
) -> Result<HandlerOutput> {
    let target = require_target(query)?;
    let depth = query
        .param_u64("depth")
        .or_else(|| query.param_u64("maxDepth"))
        .map_or(DEFAULT_DEPTH, |d| d as usize);

    let traversal = backends
        .graph
        .traverse(target, depth)
        .await
        .map_err(|e| match e {
            StoreError::NotFound(id) => GatewayError::NotFound(id),
            other => other.into(),
        })?;

    let patterns = traversal.pattern_set();
    let related: Vec<_> = traversal
        .related
        .iter()
        .map(|r| {
            json!({
                "id": r.entity.id,
                "name": r.entity.name,
                "kind": r.entity.kind,
                "depth": r.depth,
                "via": r.via,
                "patterns": r.entity.patterns,
            })
        })
        .collect();

    let data = json!({
        "root": traversal.root,
        "related": related,
        "patterns": patterns,
        "maxDepth": traversal.max_depth(),
    });
    let mut out = HandlerOutput::new(data, backends.graph.name()).insight(format!(
        "{} reaches {} entities across {} patterns",
        traversal.root.name,
        traversal.related.len(),
        patterns.len()
    ));
    if traversal.related.len() > COUPLING_WARNING {
        out = out.recommend(format!(
            "{} is tightly coupled; consider splitting it",
            traversal.root.name
        ));
    }
    Ok(out)
}
