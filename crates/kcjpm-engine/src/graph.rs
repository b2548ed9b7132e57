//! Kahn topological sort and level grouping, shared by the dependency
//! resolver and the package discoverer.

use std::collections::{BTreeMap, BTreeSet};

/// A cycle found during topological sorting.
#[derive(Debug)]
pub(crate) struct CycleError {
    /// The node names on the cycle, formatted `a -> b -> a`.
    pub(crate) path: String,
}

/// Sort `nodes` so that every dependency precedes its dependents
/// (leaves first). Edges map a node to the nodes it depends on; edges
/// pointing outside `nodes` are ignored. Ties break alphabetically so the
/// order is deterministic.
pub(crate) fn topo_sort(
    nodes: &[String],
    edges: &BTreeMap<String, Vec<String>>,
) -> Result<Vec<String>, CycleError> {
    let node_set: BTreeSet<&str> = nodes.iter().map(String::as_str).collect();

    let mut remaining_deps: BTreeMap<&str, BTreeSet<&str>> = BTreeMap::new();
    let mut dependents: BTreeMap<&str, Vec<&str>> = BTreeMap::new();
    for &node in &node_set {
        let deps: BTreeSet<&str> = edges
            .get(node)
            .map(|deps| {
                deps.iter()
                    .map(String::as_str)
                    .filter(|d| node_set.contains(d) && *d != node)
                    .collect()
            })
            .unwrap_or_default();
        for &dep in &deps {
            dependents.entry(dep).or_default().push(node);
        }
        remaining_deps.insert(node, deps);
    }

    let mut ready: BTreeSet<&str> = remaining_deps
        .iter()
        .filter(|(_, deps)| deps.is_empty())
        .map(|(node, _)| *node)
        .collect();

    let mut order = Vec::with_capacity(node_set.len());
    while let Some(&node) = ready.iter().next() {
        ready.remove(node);
        order.push(node.to_owned());
        for dependent in dependents.get(node).into_iter().flatten() {
            if let Some(deps) = remaining_deps.get_mut(dependent) {
                deps.remove(node);
                if deps.is_empty() {
                    ready.insert(dependent);
                }
            }
        }
        remaining_deps.remove(node);
    }

    if order.len() == node_set.len() {
        Ok(order)
    } else {
        Err(CycleError {
            path: extract_cycle(&remaining_deps),
        })
    }
}

/// Walk the leftover subgraph until a node repeats, then format the loop.
fn extract_cycle(remaining: &BTreeMap<&str, BTreeSet<&str>>) -> String {
    let Some((&start, _)) = remaining.iter().next() else {
        return String::new(); // unreachable: only called with leftovers
    };

    let mut walk: Vec<&str> = vec![start];
    let mut current = start;
    loop {
        let Some(&next) = remaining
            .get(current)
            .and_then(|deps| deps.iter().find(|d| remaining.contains_key(*d)))
        else {
            break;
        };
        if let Some(pos) = walk.iter().position(|n| *n == next) {
            let mut cycle: Vec<&str> = walk.get(pos..).unwrap_or_default().to_vec();
            cycle.push(next);
            return cycle.join(" -> ");
        }
        walk.push(next);
        current = next;
    }
    walk.join(" -> ")
}

/// Group a topological order into levels: every node's dependencies live in
/// a strictly earlier level, so nodes within one level can build in parallel.
pub(crate) fn levels(
    order: &[String],
    edges: &BTreeMap<String, Vec<String>>,
) -> Vec<Vec<String>> {
    let node_set: BTreeSet<&str> = order.iter().map(String::as_str).collect();
    let mut level_of: BTreeMap<&str, usize> = BTreeMap::new();
    let mut grouped: Vec<Vec<String>> = Vec::new();

    for node in order {
        let level = edges
            .get(node)
            .into_iter()
            .flatten()
            .filter(|d| node_set.contains(d.as_str()) && d.as_str() != node.as_str())
            .filter_map(|d| level_of.get(d.as_str()))
            .max()
            .map_or(0, |max| max + 1);
        level_of.insert(node.as_str(), level);
        if grouped.len() <= level {
            grouped.resize_with(level + 1, Vec::new);
        }
        if let Some(bucket) = grouped.get_mut(level) {
            bucket.push(node.clone());
        }
    }

    grouped
}
