//! Resolution hierarchy: an arena of tiers plus the mappings between them.
//!
//! Tier 0 is the original graph, tier `N` the coarsest. `mapping(t)` maps the
//! nodes of tier `t` onto tier `t + 1`.

use std::ops::{Index, IndexMut};

use rand::Rng;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use super::simplifier::{GraphSimplifier, MergeStrategy, TierMapping};
use super::WeightedGraph;
use crate::{Error, Result};

/// Terminating thresholds for hierarchy generation. Generation stops as soon
/// as any threshold that is set is met; at least one must be set.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct HierarchyLimits {
    /// Stop once the coarsest tier has fewer than this many nodes.
    pub max_nodes: Option<usize>,
    /// Stop once the coarsest tier has fewer than this many edges.
    pub max_edges: Option<usize>,
    /// Stop once this many tiers (including tier 0) exist.
    pub max_tiers: Option<usize>,
}

impl HierarchyLimits {
    pub fn tiers(max_tiers: usize) -> Self {
        Self { max_tiers: Some(max_tiers), ..Self::default() }
    }

    pub fn nodes(max_nodes: usize) -> Self {
        Self { max_nodes: Some(max_nodes), ..Self::default() }
    }

    pub fn edges(max_edges: usize) -> Self {
        Self { max_edges: Some(max_edges), ..Self::default() }
    }

    pub fn validate(&self) -> Result<()> {
        if self.max_nodes.is_none() && self.max_edges.is_none() && self.max_tiers.is_none() {
            return Err(Error::InvalidArgument(
                "Hierarchy generation needs at least one of max_nodes, max_edges or max_tiers".into(),
            ));
        }
        if self.max_tiers == Some(0) {
            return Err(Error::InvalidArgument("max_tiers must be at least 1".into()));
        }
        Ok(())
    }

    /// Whether a hierarchy with `tiers` tiers whose coarsest tier has
    /// `nodes` nodes and `edges` edges is complete.
    pub fn reached(&self, tiers: usize, nodes: usize, edges: usize) -> bool {
        self.max_tiers.is_some_and(|max| tiers >= max)
            || self.max_nodes.is_some_and(|max| nodes < max)
            || self.max_edges.is_some_and(|max| edges < max)
    }
}

/// Ordered tiers of a graph, finest first.
#[derive(Debug, Clone)]
pub struct Hierarchy<N, E> {
    tiers: Vec<WeightedGraph<N, E>>,
    mappings: Vec<TierMapping>,
    built: bool,
}

impl<N, E> Hierarchy<N, E> {
    /// A hierarchy holding only tier 0.
    pub fn new(base: WeightedGraph<N, E>) -> Self {
        Self { tiers: vec![base], mappings: Vec::new(), built: false }
    }

    /// Simplify repeatedly until `limits` are met.
    ///
    /// Fails with `InvalidArgument` when no threshold is set and with
    /// `InvalidState` when called on an already generated hierarchy. A
    /// simplification that does not reduce the node count ends generation
    /// early.
    pub fn generate_hierarchy<S, R>(
        &mut self,
        limits: &HierarchyLimits,
        simplifier: &GraphSimplifier<S, N>,
        rng: &mut R,
    ) -> Result<()>
    where
        S: MergeStrategy<N, E>,
        N: Clone,
        E: Clone,
        R: Rng,
    {
        if self.built {
            return Err(Error::InvalidState("Hierarchy has already been generated".into()));
        }
        limits.validate()?;

        loop {
            let top = self.coarsest();
            if limits.reached(self.tiers.len(), top.num_nodes(), top.num_edges()) {
                break;
            }
            if top.is_empty() {
                warn!(tiers = self.tiers.len(), "Coarsest tier is empty; stopping");
                break;
            }

            let (coarse, mapping) = simplifier.simplify(top, rng)?;
            if coarse.num_nodes() >= top.num_nodes() {
                warn!(
                    tiers = self.tiers.len(),
                    nodes = top.num_nodes(),
                    "Simplification made no progress; stopping before limits were met"
                );
                break;
            }
            debug!(
                tier = self.tiers.len(),
                nodes = coarse.num_nodes(),
                edges = coarse.num_edges(),
                "Generated tier"
            );
            self.tiers.push(coarse);
            self.mappings.push(mapping);
        }

        self.built = true;
        info!(
            tiers = self.tiers.len(),
            coarsest_nodes = self.coarsest().num_nodes(),
            "Hierarchy generated"
        );
        Ok(())
    }

    pub fn is_built(&self) -> bool {
        self.built
    }

    pub fn num_tiers(&self) -> usize {
        self.tiers.len()
    }

    pub fn tier(&self, tier: usize) -> Option<&WeightedGraph<N, E>> {
        self.tiers.get(tier)
    }

    pub fn tier_mut(&mut self, tier: usize) -> Option<&mut WeightedGraph<N, E>> {
        self.tiers.get_mut(tier)
    }

    pub fn coarsest(&self) -> &WeightedGraph<N, E> {
        // tiers always holds at least tier 0
        &self.tiers[self.tiers.len() - 1]
    }

    /// Mapping from tier `tier` onto tier `tier + 1`.
    pub fn mapping(&self, tier: usize) -> Option<&TierMapping> {
        self.mappings.get(tier)
    }

    /// `(fine, coarse)` = `(tier - 1, tier)`, borrowed together.
    pub fn adjacent_tiers_mut(
        &mut self,
        coarse: usize,
    ) -> Option<(&mut WeightedGraph<N, E>, &WeightedGraph<N, E>)> {
        if coarse == 0 || coarse >= self.tiers.len() {
            return None;
        }
        let (fine, rest) = self.tiers.split_at_mut(coarse);
        Some((&mut fine[coarse - 1], &rest[0]))
    }

    pub fn tiers(&self) -> impl Iterator<Item = &WeightedGraph<N, E>> {
        self.tiers.iter()
    }

    /// Give back tier 0, dropping every coarser tier.
    pub fn into_base(self) -> WeightedGraph<N, E> {
        let mut tiers = self.tiers;
        tiers.truncate(1);
        tiers.pop().unwrap_or_default()
    }
}

impl<N, E> Index<usize> for Hierarchy<N, E> {
    type Output = WeightedGraph<N, E>;

    fn index(&self, tier: usize) -> &Self::Output {
        &self.tiers[tier]
    }
}

impl<N, E> IndexMut<usize> for Hierarchy<N, E> {
    fn index_mut(&mut self, tier: usize) -> &mut Self::Output {
        &mut self.tiers[tier]
    }
}
