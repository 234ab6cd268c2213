use std::collections::VecDeque;

use ahash::{AHashMap, AHashSet};

use crate::{
    errors::CascadeError,
    schema::{JoinPath, Relation, SchemaRegistry},
};

/// Breadth-first search over belongs-to edges from `start` to `end`.
///
/// Edges are expanded in registration order, so among equally short paths the
/// first one discovered wins.
pub fn shortest_join_path(
    registry: &SchemaRegistry,
    start: &str,
    end: &str,
) -> Result<Option<JoinPath>, CascadeError> {
    registry.entity(start)?;
    registry.entity(end)?;
    if start == end {
        return Ok(Some(JoinPath::default()));
    }
    let mut queue = VecDeque::new();
    let mut parents: AHashMap<&str, &Relation> = AHashMap::new();
    let mut seen = AHashSet::new();
    queue.push_back(start);
    seen.insert(start);
    let mut found = false;
    while let Some(node) = queue.pop_front() {
        for rel in registry.outgoing(node) {
            let next = rel.target.as_str();
            if seen.insert(next) {
                parents.insert(next, rel);
                if next == end {
                    found = true;
                    break;
                }
                queue.push_back(next);
            }
        }
        if found {
            break;
        }
    }
    if !found {
        return Ok(None);
    }
    let mut hops = Vec::new();
    let mut current = end;
    while let Some(&rel) = parents.get(current) {
        hops.push(rel.clone());
        if rel.source == start {
            break;
        }
        current = rel.source.as_str();
    }
    hops.reverse();
    Ok(Some(JoinPath::new(hops)))
}

/// Entities depending on `root` (transitively), ordered so that every entity
/// comes before the entities it references. `root` is always last.
///
/// Self references are ignored. Cycles are broken by registration order; the
/// planner later moves entities that others join through behind them.
pub fn bottom_up_order(registry: &SchemaRegistry, root: &str) -> Result<Vec<String>, CascadeError> {
    registry.entity(root)?;
    let mut members = AHashSet::new();
    let mut queue = VecDeque::new();
    members.insert(root);
    queue.push_back(root);
    while let Some(node) = queue.pop_front() {
        for rel in registry.incoming(node) {
            let prev = rel.source.as_str();
            if members.insert(prev) {
                queue.push_back(prev);
            }
        }
    }

    // referrers[x] = members other than root holding a foreign key into x
    let mut referrers: AHashMap<&str, AHashSet<&str>> = AHashMap::new();
    for &member in &members {
        let entry = referrers.entry(member).or_default();
        for rel in registry.incoming(member) {
            if rel.source != member && rel.source != root && members.contains(rel.source.as_str()) {
                entry.insert(rel.source.as_str());
            }
        }
    }

    let mut pending: Vec<&str> = members.iter().copied().filter(|m| *m != root).collect();
    pending.sort_by_key(|name| registry.position(name));
    let mut emitted: AHashSet<&str> = AHashSet::new();
    let mut ordered = Vec::with_capacity(members.len());
    while !pending.is_empty() {
        let ready = pending.iter().position(|name| {
            referrers
                .get(name)
                .map(|refs| refs.iter().all(|r| emitted.contains(r)))
                .unwrap_or(true)
        });
        // no candidate is free of pending referrers: a cycle, take the earliest registered
        let idx = ready.unwrap_or(0);
        let next = pending.remove(idx);
        emitted.insert(next);
        ordered.push(next.to_string());
    }
    ordered.push(root.to_string());
    Ok(ordered)
}
