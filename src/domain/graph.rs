//! Dependency graph for work items
//!
//! Cycle detection for proposed dependency edges and a layered (Kahn)
//! topological ordering with a priority tie-break inside each wave.
//! Uses petgraph for graph operations.
//!
//! Edge direction is `item -> dependency`: an item points at the items it
//! depends on.

use petgraph::algo::has_path_connecting;
use petgraph::graph::{DiGraph, NodeIndex};
use petgraph::Direction;
use std::collections::HashMap;
use thiserror::Error;

use super::id::ItemId;
use super::item::WorkItem;

#[derive(Debug, Error, PartialEq)]
pub enum GraphError {
    #[error("Adding dependency would create a cycle: {0} -> {1}")]
    CycleDetected(ItemId, ItemId),

    #[error("Item not found: {0}")]
    ItemNotFound(ItemId),

    #[error("Self-dependency not allowed: {0}")]
    SelfDependency(ItemId),
}

/// A dependency graph over a snapshot of items
#[derive(Debug, Default)]
pub struct DependencyGraph {
    graph: DiGraph<ItemId, ()>,
    node_map: HashMap<ItemId, NodeIndex>,
}

impl DependencyGraph {
    /// Builds a graph from a snapshot. Dependencies on items outside the
    /// snapshot produce no edge.
    pub fn from_items<'a>(items: impl IntoIterator<Item = &'a WorkItem>) -> Self {
        let items: Vec<_> = items.into_iter().collect();
        let mut graph = DiGraph::with_capacity(items.len(), items.len());
        let mut node_map = HashMap::with_capacity(items.len());

        for item in &items {
            node_map
                .entry(item.id.clone())
                .or_insert_with(|| graph.add_node(item.id.clone()));
        }

        for item in &items {
            let from = node_map[&item.id];
            for dep in &item.depends_on {
                if let Some(&to) = node_map.get(dep) {
                    if graph.find_edge(from, to).is_none() {
                        graph.add_edge(from, to, ());
                    }
                }
            }
        }

        Self { graph, node_map }
    }

    pub fn contains(&self, id: &ItemId) -> bool {
        self.node_map.contains_key(id)
    }

    /// True if adding "`from` depends on `to`" would close a cycle
    pub fn would_create_cycle(&self, from: &ItemId, to: &ItemId) -> bool {
        if from == to {
            return true;
        }
        let (Some(&from_idx), Some(&to_idx)) = (self.node_map.get(from), self.node_map.get(to))
        else {
            return false;
        };
        has_path_connecting(&self.graph, to_idx, from_idx, None)
    }

    /// Validates a proposed edge, rejecting self-loops, unknown items and cycles
    pub fn check_dependency(&self, from: &ItemId, to: &ItemId) -> Result<(), GraphError> {
        if from == to {
            return Err(GraphError::SelfDependency(from.clone()));
        }
        for id in [from, to] {
            if !self.contains(id) {
                return Err(GraphError::ItemNotFound(id.clone()));
            }
        }
        if self.would_create_cycle(from, to) {
            return Err(GraphError::CycleDetected(from.clone(), to.clone()));
        }
        Ok(())
    }
}

/// Convenience form of [`DependencyGraph::would_create_cycle`] over a snapshot
pub fn would_create_cycle(items: &[WorkItem], from: &ItemId, to: &ItemId) -> bool {
    DependencyGraph::from_items(items).would_create_cycle(from, to)
}

/// Result of [`topo_order`]
#[derive(Debug, Clone)]
pub struct TopoOrder {
    /// Items in dependency order; partial when `acyclic` is false
    pub items: Vec<WorkItem>,
    /// False when a cycle stopped the ordering early
    pub acyclic: bool,
}

/// Layered topological sort.
///
/// Each wave holds every not-yet-emitted item whose in-snapshot dependencies
/// are all emitted. Within a wave, items sort by effective priority, then by
/// ID. If some wave is empty while items remain, the partial order is
/// returned with `acyclic = false`.
pub fn topo_order(items: &[WorkItem]) -> TopoOrder {
    let graph = DependencyGraph::from_items(items);
    let g = &graph.graph;

    let mut by_id: HashMap<&ItemId, &WorkItem> = HashMap::with_capacity(items.len());
    for item in items {
        by_id.entry(&item.id).or_insert(item);
    }

    let mut pending: HashMap<NodeIndex, usize> = g
        .node_indices()
        .map(|idx| (idx, g.neighbors_directed(idx, Direction::Outgoing).count()))
        .collect();

    let mut wave: Vec<NodeIndex> = pending
        .iter()
        .filter(|&(_, &count)| count == 0)
        .map(|(&idx, _)| idx)
        .collect();

    let mut ordered = Vec::with_capacity(g.node_count());

    while !wave.is_empty() {
        let mut members: Vec<&WorkItem> = wave
            .iter()
            .filter_map(|idx| g.node_weight(*idx))
            .filter_map(|id| by_id.get(id).copied())
            .collect();
        members.sort_by(|a, b| {
            a.effective_priority()
                .cmp(&b.effective_priority())
                .then_with(|| a.id.cmp(&b.id))
        });
        ordered.extend(members.into_iter().cloned());

        let mut next = Vec::new();
        for idx in wave.drain(..) {
            pending.remove(&idx);
            for dependent in g.neighbors_directed(idx, Direction::Incoming) {
                if let Some(count) = pending.get_mut(&dependent) {
                    *count -= 1;
                    if *count == 0 {
                        next.push(dependent);
                    }
                }
            }
        }
        wave = next;
    }

    TopoOrder {
        acyclic: pending.is_empty(),
        items: ordered,
    }
}
