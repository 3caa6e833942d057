//! Link-type attribute edges can form cycles (supply request ↔ engine ↔
//! parts). Per the design notes (§9), links are never embedded — they are
//! plain `(entity_id, attribute_def_id) -> target_entity_id` edges stored in
//! `AttributeValue` rows whose attribute has `data_type == Link`. Traversal
//! here is cycle-safe via an explicit visited set; it never recurses without
//! checking membership first.

use serde_json::Value;
use std::collections::HashSet;

/// One outgoing link edge from a source entity.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LinkEdge {
    pub attribute_def_id: String,
    pub target_entity_id: String,
}

/// Parse a link attribute's `value_json` into its target entity id. Per §6,
/// `value_json` is a JSON string; for a link attribute its decoded value is
/// itself a JSON string holding the target entity's id.
pub fn parse_link_target(value_json: &str) -> Option<String> {
    let decoded: Value = serde_json::from_str(value_json).ok()?;
    decoded.as_str().map(str::to_owned)
}

/// Walk the link graph breadth-first from `start`, calling `edges_of` to
/// fetch each entity's outgoing edges, and returning every entity id reached
/// (including `start`). Safe against cycles of any length: each entity id is
/// visited at most once.
pub fn reachable_entities<F>(start: &str, mut edges_of: F) -> HashSet<String>
where
    F: FnMut(&str) -> Vec<LinkEdge>,
{
    let mut visited: HashSet<String> = HashSet::new();
    let mut queue: Vec<String> = vec![start.to_owned()];
    visited.insert(start.to_owned());

    while let Some(current) = queue.pop() {
        for edge in edges_of(&current) {
            if visited.insert(edge.target_entity_id.clone()) {
                queue.push(edge.target_entity_id);
            }
        }
    }

    visited
}
