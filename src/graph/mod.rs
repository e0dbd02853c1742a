//! Dependency validation for a spec's chunk graph.
//!
//! Chunks within a spec form a directed graph via their `dependencies`
//! sets. The graph must stay acyclic under mutation: before a chunk's
//! dependency set is changed (or a fix-chunk is inserted), the proposed
//! change is validated here. The check is a pure synchronous predicate
//! over an in-memory edge map; callers build the map from a single spec's
//! chunks, so an id belonging to another spec is simply unknown here.

use std::collections::{HashMap, HashSet};

use crate::errors::GraphError;

/// Validate a proposed dependency set for one chunk against its spec's
/// current edge map.
///
/// `edges` maps every chunk id in the spec to its current dependency set;
/// an id is known iff it appears as a key. Checks run in order:
///
/// 1. Self-reference is rejected outright.
/// 2. Every proposed id must be a known chunk.
/// 3. DFS from the target over the edge map with the target's entry
///    replaced by `proposed`; revisiting a node still on the DFS stack is
///    a cycle.
pub fn validate_dependencies(
    chunk_id: i64,
    proposed: &HashSet<i64>,
    edges: &HashMap<i64, HashSet<i64>>,
) -> Result<(), GraphError> {
    if proposed.contains(&chunk_id) {
        return Err(GraphError::SelfDependency { id: chunk_id });
    }

    for dep in proposed {
        if !edges.contains_key(dep) {
            return Err(GraphError::UnknownDependency {
                id: chunk_id,
                dependency: *dep,
            });
        }
    }

    // Patched view: the target's entry replaced by the proposed set.
    let mut patched: HashMap<i64, &HashSet<i64>> =
        edges.iter().map(|(id, deps)| (*id, deps)).collect();
    patched.insert(chunk_id, proposed);

    let mut visited: HashSet<i64> = HashSet::new();
    let mut on_stack: Vec<i64> = Vec::new();
    dfs(chunk_id, &patched, &mut visited, &mut on_stack)
}

fn dfs(
    node: i64,
    edges: &HashMap<i64, &HashSet<i64>>,
    visited: &mut HashSet<i64>,
    on_stack: &mut Vec<i64>,
) -> Result<(), GraphError> {
    if on_stack.contains(&node) {
        // The cycle is the stack suffix starting at the revisited node.
        let start = on_stack.iter().position(|&n| n == node).unwrap_or(0);
        let mut members: Vec<i64> = on_stack[start..].to_vec();
        members.push(node);
        return Err(GraphError::CycleDetected {
            id: on_stack.first().copied().unwrap_or(node),
            members,
        });
    }
    if !visited.insert(node) {
        return Ok(());
    }

    on_stack.push(node);
    if let Some(deps) = edges.get(&node) {
        for &dep in deps.iter() {
            dfs(dep, edges, visited, on_stack)?;
        }
    }
    on_stack.pop();
    Ok(())
}

/// Build the edge map for [`validate_dependencies`] from a spec's chunks.
pub fn edge_map(chunks: &[crate::store::models::Chunk]) -> HashMap<i64, HashSet<i64>> {
    chunks
        .iter()
        .map(|c| (c.id, c.dependencies.iter().copied().collect()))
        .collect()
}
