//! # Weighted Graph
//!
//! Generic node/edge container used for every tier of the field hierarchy.
//!
//! Nodes are identified by handle (`NodeId`), never by payload equality, so
//! two nodes may carry identical payloads. Directedness is fixed at
//! construction:
//!
//! - **Directed**: an edge `a → b` says nothing about `b → a`; both may exist.
//! - **Undirected**: at most one edge per unordered pair, stored in whichever
//!   direction it was first added.
//!
//! Iteration over nodes and edges is in handle order, so every algorithm
//! built on top is deterministic for a given RNG.

pub mod simplifier;
pub mod hierarchy;

use std::collections::BTreeMap;

use hashbrown::{HashMap, HashSet};
use serde::{Deserialize, Serialize};
use smallvec::SmallVec;

use crate::{Error, Result};

pub use simplifier::{GraphSimplifier, MergeFns, MergeStrategy, SeedSelection, TierMapping};
pub use hierarchy::{Hierarchy, HierarchyLimits};

/// Opaque node handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct NodeId(pub u64);

impl std::fmt::Display for NodeId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Opaque edge handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct EdgeId(pub u64);

impl std::fmt::Display for EdgeId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// An edge owned by a graph.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Edge<E> {
    pub id: EdgeId,
    pub from: NodeId,
    pub to: NodeId,
    pub data: E,
}

impl<E> Edge<E> {
    /// The "other" end of the edge from the given node.
    pub fn other_node(&self, from: NodeId) -> Option<NodeId> {
        if from == self.from { Some(self.to) }
        else if from == self.to { Some(self.from) }
        else { None }
    }

    /// Lower and higher endpoint handles.
    pub fn ordered_endpoints(&self) -> (NodeId, NodeId) {
        if self.from <= self.to { (self.from, self.to) } else { (self.to, self.from) }
    }
}

type Adjacency = SmallVec<[EdgeId; 8]>;

// ============================================================================
// WeightedGraph
// ============================================================================

/// Node/edge container with duplicate-edge suppression and cascading removal.
#[derive(Debug, Clone)]
pub struct WeightedGraph<N, E> {
    directed: bool,
    nodes: BTreeMap<NodeId, N>,
    edges: BTreeMap<EdgeId, Edge<E>>,
    /// node → incident edge handles, in insertion order
    adjacency: HashMap<NodeId, Adjacency>,
    next_node_id: u64,
    next_edge_id: u64,
}

impl<N, E> WeightedGraph<N, E> {
    pub fn new(directed: bool) -> Self {
        Self {
            directed,
            nodes: BTreeMap::new(),
            edges: BTreeMap::new(),
            adjacency: HashMap::new(),
            next_node_id: 1,
            next_edge_id: 1,
        }
    }

    pub fn directed() -> Self {
        Self::new(true)
    }

    pub fn undirected() -> Self {
        Self::new(false)
    }

    pub fn is_directed(&self) -> bool {
        self.directed
    }

    // ========================================================================
    // Nodes
    // ========================================================================

    /// Add a node, returning its fresh handle.
    pub fn add_node(&mut self, payload: N) -> NodeId {
        let mut id = NodeId(self.next_node_id);
        if self.nodes.contains_key(&id) {
            // handle space above the highest handle is used up
            id = (0..=u64::MAX).map(NodeId).find(|c| !self.nodes.contains_key(c)).unwrap_or(id);
        }
        self.next_node_id = self.next_node_id.max(id.0.saturating_add(1));
        self.nodes.insert(id, payload);
        self.adjacency.insert(id, Adjacency::new());
        id
    }

    /// Add a node under a caller-chosen handle.
    ///
    /// Idempotent: if the handle is already present the graph is unchanged and
    /// `payload` is dropped.
    pub fn insert_node(&mut self, id: NodeId, payload: N) -> NodeId {
        if self.nodes.contains_key(&id) {
            return id;
        }
        self.next_node_id = self.next_node_id.max(id.0.saturating_add(1));
        self.nodes.insert(id, payload);
        self.adjacency.insert(id, Adjacency::new());
        id
    }

    pub fn contains_node(&self, id: NodeId) -> bool {
        self.nodes.contains_key(&id)
    }

    pub fn node(&self, id: NodeId) -> Option<&N> {
        self.nodes.get(&id)
    }

    pub fn node_mut(&mut self, id: NodeId) -> Option<&mut N> {
        self.nodes.get_mut(&id)
    }

    pub fn nodes(&self) -> impl Iterator<Item = (NodeId, &N)> {
        self.nodes.iter().map(|(id, n)| (*id, n))
    }

    pub fn node_ids(&self) -> Vec<NodeId> {
        self.nodes.keys().copied().collect()
    }

    /// Remove a node and every edge incident to it.
    pub fn remove_node(&mut self, id: NodeId) -> Option<N> {
        let payload = self.nodes.remove(&id)?;
        let incident = self.adjacency.remove(&id).unwrap_or_default();
        for eid in incident {
            if let Some(edge) = self.edges.remove(&eid) {
                if let Some(other) = edge.other_node(id) {
                    if let Some(adj) = self.adjacency.get_mut(&other) {
                        adj.retain(|e| *e != eid);
                    }
                }
            }
        }
        Some(payload)
    }

    pub fn num_nodes(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    // ========================================================================
    // Edges
    // ========================================================================

    /// Add an edge `from → to`.
    ///
    /// Returns `Ok(None)` without touching the graph if an edge already joins
    /// the pair (ordered for directed graphs, unordered otherwise). Unknown
    /// handles and self-loops are rejected.
    pub fn add_edge(&mut self, from: NodeId, to: NodeId, data: E) -> Result<Option<EdgeId>> {
        if !self.nodes.contains_key(&from) {
            return Err(Error::NotFound(format!("Source node {from}")));
        }
        if !self.nodes.contains_key(&to) {
            return Err(Error::NotFound(format!("Target node {to}")));
        }
        if from == to {
            return Err(Error::InvalidArgument(format!("Self-loop on node {from}")));
        }
        if self.edge_between(from, to).is_some() {
            return Ok(None);
        }

        let id = EdgeId(self.next_edge_id);
        self.next_edge_id += 1;
        self.edges.insert(id, Edge { id, from, to, data });
        self.adjacency.entry(from).or_default().push(id);
        self.adjacency.entry(to).or_default().push(id);
        Ok(Some(id))
    }

    /// Handle of the edge joining `a` and `b`, honouring directedness.
    pub fn edge_between(&self, a: NodeId, b: NodeId) -> Option<EdgeId> {
        let adj = self.adjacency.get(&a)?;
        adj.iter().copied().find(|eid| {
            self.edges.get(eid).is_some_and(|e| {
                (e.from == a && e.to == b) || (!self.directed && e.from == b && e.to == a)
            })
        })
    }

    pub fn has_edge(&self, a: NodeId, b: NodeId) -> bool {
        self.edge_between(a, b).is_some()
    }

    pub fn edge(&self, id: EdgeId) -> Option<&Edge<E>> {
        self.edges.get(&id)
    }

    pub fn edge_mut(&mut self, id: EdgeId) -> Option<&mut Edge<E>> {
        self.edges.get_mut(&id)
    }

    pub fn edges(&self) -> impl Iterator<Item = &Edge<E>> {
        self.edges.values()
    }

    pub fn edge_ids(&self) -> Vec<EdgeId> {
        self.edges.keys().copied().collect()
    }

    /// Every edge touching `node`, in either direction.
    pub fn edges_of(&self, node: NodeId) -> Result<Vec<EdgeId>> {
        self.adjacency
            .get(&node)
            .map(|adj| adj.to_vec())
            .ok_or_else(|| Error::NotFound(format!("Node {node}")))
    }

    pub fn remove_edge(&mut self, id: EdgeId) -> Option<E> {
        let edge = self.edges.remove(&id)?;
        for end in [edge.from, edge.to] {
            if let Some(adj) = self.adjacency.get_mut(&end) {
                adj.retain(|e| *e != id);
            }
        }
        Some(edge.data)
    }

    pub fn num_edges(&self) -> usize {
        self.edges.len()
    }

    // ========================================================================
    // Traversal
    // ========================================================================

    /// Nodes reachable over one outgoing edge, in increasing handle order.
    ///
    /// For undirected graphs edges stored in either direction count.
    pub fn neighbours(&self, node: NodeId) -> Result<Vec<NodeId>> {
        let adj = self
            .adjacency
            .get(&node)
            .ok_or_else(|| Error::NotFound(format!("Node {node}")))?;

        let mut result = Vec::with_capacity(adj.len());
        for eid in adj {
            let Some(edge) = self.edges.get(eid) else { continue };
            let next = if self.directed {
                if edge.from != node { continue; }
                edge.to
            } else {
                match edge.other_node(node) {
                    Some(other) => other,
                    None => continue,
                }
            };
            result.push(next);
        }
        result.sort_unstable();
        result.dedup();
        Ok(result)
    }

    // ========================================================================
    // Collapse
    // ========================================================================

    /// Replace `members` with a single node carrying `payload`.
    ///
    /// Edges internal to the collapsed set are dropped. Edges leaving the set
    /// are grouped by their external endpoint (and direction, for directed
    /// graphs) and each group becomes one edge whose data is
    /// `merge_edges(group)`. Returns the new node's handle.
    pub fn collapse<F>(&mut self, members: &[NodeId], payload: N, mut merge_edges: F) -> Result<NodeId>
    where
        F: FnMut(&[&E]) -> E,
    {
        if members.is_empty() {
            return Err(Error::InvalidArgument("Cannot collapse an empty node set".into()));
        }
        let mut set: HashSet<NodeId> = HashSet::with_capacity(members.len());
        let mut ordered: Vec<NodeId> = Vec::with_capacity(members.len());
        for id in members {
            if !self.nodes.contains_key(id) {
                return Err(Error::NotFound(format!("Node {id}")));
            }
            if set.insert(*id) {
                ordered.push(*id);
            }
        }

        // external endpoint → edges, split by direction relative to the set
        let mut outgoing: BTreeMap<NodeId, Vec<EdgeId>> = BTreeMap::new();
        let mut incoming: BTreeMap<NodeId, Vec<EdgeId>> = BTreeMap::new();
        for id in &ordered {
            for eid in self.adjacency.get(id).into_iter().flatten() {
                let Some(edge) = self.edges.get(eid) else { continue };
                let from_inside = set.contains(&edge.from);
                let to_inside = set.contains(&edge.to);
                match (from_inside, to_inside) {
                    (true, false) => outgoing.entry(edge.to).or_default().push(*eid),
                    (false, true) if self.directed => incoming.entry(edge.from).or_default().push(*eid),
                    (false, true) => outgoing.entry(edge.from).or_default().push(*eid),
                    _ => {}
                }
            }
        }

        let mut merged = Vec::with_capacity(outgoing.len() + incoming.len());
        for (groups, is_outgoing) in [(&outgoing, true), (&incoming, false)] {
            for (external, eids) in groups {
                let group: Vec<&E> = eids
                    .iter()
                    .filter_map(|eid| self.edges.get(eid).map(|e| &e.data))
                    .collect();
                merged.push((*external, is_outgoing, merge_edges(group.as_slice())));
            }
        }

        for id in &ordered {
            self.remove_node(*id);
        }
        let merged_node = self.add_node(payload);
        for (external, is_outgoing, data) in merged {
            if is_outgoing {
                self.add_edge(merged_node, external, data)?;
            } else {
                self.add_edge(external, merged_node, data)?;
            }
        }
        Ok(merged_node)
    }
}

impl<N, E> Default for WeightedGraph<N, E> {
    fn default() -> Self {
        Self::undirected()
    }
}

// ============================================================================
// Tests
// ============================================================================
