//! Graph simplification: one tier of neighbourhood collapse.
//!
//! Each step picks an eligible seed, collapses it together with its still
//! eligible neighbours into one node, and retires the collapsed set. When no
//! eligible node remains the working graph holds only merged nodes and is the
//! next coarser tier. Every fine node is recorded against exactly one coarse
//! node in the returned `TierMapping`.

use std::collections::BTreeMap;

use hashbrown::HashMap;
use rand::Rng;
use serde::{Deserialize, Serialize};
use smallvec::SmallVec;

use super::{NodeId, WeightedGraph};
use crate::{Error, Result};

// ============================================================================
// Merge strategy
// ============================================================================

/// How collapsed nodes and parallel edges are combined.
///
/// Both functions receive a non-empty slice; for nodes the first element is
/// the seed of the collapse.
pub trait MergeStrategy<N, E> {
    fn merge_nodes(&self, nodes: &[&N]) -> N;
    fn merge_edges(&self, edges: &[&E]) -> E;
}

/// A `MergeStrategy` built from two closures.
#[derive(Debug, Clone, Copy)]
pub struct MergeFns<FN, FE> {
    pub nodes: FN,
    pub edges: FE,
}

impl<FN, FE> MergeFns<FN, FE> {
    pub fn new(nodes: FN, edges: FE) -> Self {
        Self { nodes, edges }
    }
}

impl<N, E, FN, FE> MergeStrategy<N, E> for MergeFns<FN, FE>
where
    FN: Fn(&[&N]) -> N,
    FE: Fn(&[&E]) -> E,
{
    fn merge_nodes(&self, nodes: &[&N]) -> N {
        (self.nodes)(nodes)
    }

    fn merge_edges(&self, edges: &[&E]) -> E {
        (self.edges)(edges)
    }
}

// ============================================================================
// Seed selection
// ============================================================================

/// Policy for choosing the next collapse seed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SeedSelection {
    /// Uniformly random among eligible nodes.
    #[default]
    Random,
    /// Farthest-point seeding: the eligible node whose distance to the
    /// nearest previous seed is largest. The first seed is random.
    Furthest,
}

// ============================================================================
// Tier mapping
// ============================================================================

/// Fine-to-coarse assignment produced by one simplification.
#[derive(Debug, Clone, Default)]
pub struct TierMapping {
    fine_to_coarse: HashMap<NodeId, NodeId>,
    coarse_to_fine: BTreeMap<NodeId, SmallVec<[NodeId; 8]>>,
}

impl TierMapping {
    fn record(&mut self, coarse: NodeId, members: &[NodeId]) {
        for fine in members {
            self.fine_to_coarse.insert(*fine, coarse);
        }
        self.coarse_to_fine.entry(coarse).or_default().extend(members.iter().copied());
    }

    /// Coarse node a fine node collapsed into.
    pub fn coarse_of(&self, fine: NodeId) -> Option<NodeId> {
        self.fine_to_coarse.get(&fine).copied()
    }

    /// Fine nodes that collapsed into `coarse`, seed first.
    pub fn fine_of(&self, coarse: NodeId) -> &[NodeId] {
        self.coarse_to_fine.get(&coarse).map_or(&[], |v| v.as_slice())
    }

    /// `(fine, coarse)` pairs in coarse-handle order.
    pub fn iter(&self) -> impl Iterator<Item = (NodeId, NodeId)> + '_ {
        self.coarse_to_fine
            .iter()
            .flat_map(|(coarse, fines)| fines.iter().map(move |fine| (*fine, *coarse)))
    }

    /// Number of fine nodes mapped.
    pub fn len(&self) -> usize {
        self.fine_to_coarse.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fine_to_coarse.is_empty()
    }

    pub fn num_coarse(&self) -> usize {
        self.coarse_to_fine.len()
    }
}

// ============================================================================
// GraphSimplifier
// ============================================================================

type Distance<N> = Box<dyn Fn(&N, &N) -> f32>;

/// Collapses a graph into a coarser one with a caller-supplied merge strategy.
pub struct GraphSimplifier<S, N> {
    strategy: S,
    seed_selection: SeedSelection,
    distance: Option<Distance<N>>,
}

impl<S, N> GraphSimplifier<S, N> {
    /// Random seeding.
    pub fn new(strategy: S) -> Self {
        Self { strategy, seed_selection: SeedSelection::Random, distance: None }
    }

    /// Farthest-point seeding under `distance`.
    pub fn with_furthest_seeds(mut self, distance: impl Fn(&N, &N) -> f32 + 'static) -> Self {
        self.seed_selection = SeedSelection::Furthest;
        self.distance = Some(Box::new(distance));
        self
    }

    /// Set the policy directly. `Furthest` needs a distance function; see
    /// [`GraphSimplifier::with_furthest_seeds`].
    pub fn with_seed_selection(mut self, seed_selection: SeedSelection) -> Self {
        self.seed_selection = seed_selection;
        self
    }

    pub fn seed_selection(&self) -> SeedSelection {
        self.seed_selection
    }

    pub fn strategy(&self) -> &S {
        &self.strategy
    }

    /// Collapse `graph` into the next coarser tier.
    pub fn simplify<E, R>(
        &self,
        graph: &WeightedGraph<N, E>,
        rng: &mut R,
    ) -> Result<(WeightedGraph<N, E>, TierMapping)>
    where
        S: MergeStrategy<N, E>,
        N: Clone,
        E: Clone,
        R: Rng,
    {
        let distance = match (self.seed_selection, &self.distance) {
            (SeedSelection::Furthest, None) => {
                return Err(Error::InvalidArgument(
                    "Furthest seed selection requires a distance function".into(),
                ));
            }
            (SeedSelection::Furthest, Some(d)) => Some(d),
            (SeedSelection::Random, _) => None,
        };

        let mut work = graph.clone();
        let mut eligible: Vec<NodeId> = work.node_ids();
        // position of each eligible node in `eligible`
        let mut slot: HashMap<NodeId, usize> = eligible.iter().enumerate().map(|(i, id)| (*id, i)).collect();
        // distance from each eligible node to its nearest seed so far
        let mut seed_distance: HashMap<NodeId, f32> = HashMap::new();
        let mut mapping = TierMapping::default();

        while !eligible.is_empty() {
            let seed = match distance {
                Some(_) if !seed_distance.is_empty() => furthest(&eligible, &seed_distance),
                _ => eligible[rng.gen_range(0..eligible.len())],
            };

            let mut members = vec![seed];
            for nb in work.neighbours(seed)? {
                if slot.contains_key(&nb) && !members.contains(&nb) {
                    members.push(nb);
                }
            }

            if let Some(d) = distance {
                if let Some(seed_payload) = graph.node(seed) {
                    for id in &eligible {
                        if let Some(payload) = graph.node(*id) {
                            let dist = d(seed_payload, payload);
                            let entry = seed_distance.entry(*id).or_insert(f32::INFINITY);
                            *entry = entry.min(dist);
                        }
                    }
                }
            }

            let payloads: Vec<&N> = members.iter().filter_map(|id| work.node(*id)).collect();
            let merged = self.strategy.merge_nodes(&payloads);
            let strategy = &self.strategy;
            let coarse = work.collapse(&members, merged, |edges| strategy.merge_edges(edges))?;

            for id in &members {
                if let Some(at) = slot.remove(id) {
                    eligible.swap_remove(at);
                    if let Some(moved) = eligible.get(at) {
                        slot.insert(*moved, at);
                    }
                }
                seed_distance.remove(id);
            }
            mapping.record(coarse, &members);
        }

        Ok((work, mapping))
    }
}

/// Eligible node farthest from every previous seed; lowest handle on ties.
fn furthest(eligible: &[NodeId], seed_distance: &HashMap<NodeId, f32>) -> NodeId {
    let mut best = eligible[0];
    let mut best_distance = f32::NEG_INFINITY;
    for id in eligible {
        let dist = seed_distance.get(id).copied().unwrap_or(f32::INFINITY);
        if dist > best_distance || (dist == best_distance && *id < best) {
            best = *id;
            best_distance = dist;
        }
    }
    best
}

// ============================================================================
// Tests
// ============================================================================
