//! # Field Optimiser
//!
//! Stateful controller that builds the tier hierarchy and drives the
//! per-tier iterate/converge loop:
//!
//! ```text
//! set_data(graph)
//!   └─ optimise_do_one_step()            one smoothing pass per call
//!        ├─ Initialised   → build hierarchy, start at the coarsest tier
//!        ├─ StartingTier  → reset counters, measure the starting error
//!        ├─ Optimising    → smooth nodes in shuffled order, re-measure error
//!        └─ on convergence → propagate into the next finer tier, or finish
//! ```
//!
//! A tier converges when a pass improves the error by less than
//! `convergence_threshold` percent, when the error is zero, or after
//! `max_iterations_per_tier` passes. Smoothing is Gauss–Seidel: each node
//! sees the values already written by earlier nodes in the same pass.

pub mod config;
pub mod state;

pub use config::{NodeSelection, OptimiserConfig};
pub use state::{FieldPhase, OptimisationState, Schedule, Stage, StateEvent};

use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use tracing::{debug, info};

use crate::field::{posy, rosy, MultiResolutionFieldGraph, SurfelGraph};
use crate::graph::NodeId;
use crate::{Error, Result};

/// Errors at or below this are treated as fully converged.
const ERROR_FLOOR: f32 = 1e-12;

pub struct FieldOptimiser<R = StdRng> {
    config: OptimiserConfig,
    rng: R,
    state: OptimisationState,
    field_graph: Option<MultiResolutionFieldGraph>,
    iterations: usize,
    current_error: f32,
}

impl FieldOptimiser<StdRng> {
    /// Optimiser whose randomness is seeded from `config.seed`.
    pub fn from_config(config: OptimiserConfig) -> Result<Self> {
        let rng = StdRng::seed_from_u64(config.seed);
        Self::new(config, rng)
    }
}

impl<R: Rng> FieldOptimiser<R> {
    pub fn new(config: OptimiserConfig, rng: R) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            config,
            rng,
            state: OptimisationState::Uninitialised,
            field_graph: None,
            iterations: 0,
            current_error: 0.0,
        })
    }

    /// Attach the graph to optimise, discarding any previous run.
    pub fn set_data(&mut self, graph: SurfelGraph) -> Result<()> {
        if graph.is_empty() {
            return Err(Error::InvalidArgument("Cannot optimise an empty graph".into()));
        }
        info!(nodes = graph.num_nodes(), edges = graph.num_edges(), "Data attached");
        self.field_graph = Some(MultiResolutionFieldGraph::new(graph, self.config.rho)?);
        self.iterations = 0;
        self.current_error = 0.0;
        self.apply(StateEvent::DataAttached)
    }

    // ========================================================================
    // Stepping
    // ========================================================================

    /// Run one smoothing pass. Returns `true` once every phase has converged
    /// at tier 0; further calls then return `true` without doing anything.
    pub fn optimise_do_one_step(&mut self) -> Result<bool> {
        match self.state {
            OptimisationState::Uninitialised => {
                return Err(Error::InvalidState("optimise_do_one_step called before set_data".into()));
            }
            OptimisationState::Done => return Ok(true),
            OptimisationState::Initialised => self.begin()?,
            _ => {}
        }

        if let OptimisationState::StartingTier(stage) = self.state {
            self.start_tier(stage)?;
        }
        let OptimisationState::Optimising(stage) = self.state else {
            return Err(Error::InvalidState(format!("Cannot run a pass in state {:?}", self.state)));
        };

        let previous_error = self.current_error;
        self.run_pass(stage)?;
        self.iterations += 1;

        if self.has_converged(previous_error) {
            self.apply(StateEvent::TierConverged)?;
            self.end_tier(stage)?;
        }
        Ok(self.state.is_done())
    }

    /// Step until done.
    pub fn optimise(&mut self) -> Result<()> {
        while !self.optimise_do_one_step()? {}
        Ok(())
    }

    fn begin(&mut self) -> Result<()> {
        let field_graph = self.field_graph.as_mut().ok_or_else(no_data)?;
        field_graph.generate_with_limits(&self.config.hierarchy, self.config.seed_selection, &mut self.rng)?;
        info!(tiers = field_graph.num_tiers(), phases = ?self.config.phases, "Optimisation started");
        self.apply(StateEvent::Begin)
    }

    fn start_tier(&mut self, stage: Stage) -> Result<()> {
        self.iterations = 0;
        self.current_error = self.tier_error(stage)?;
        info!(
            phase = %stage.phase,
            tier = stage.tier,
            nodes = self.num_nodes_in_tier(stage.tier).unwrap_or(0),
            error = self.current_error,
            "Starting tier"
        );
        self.apply(StateEvent::TierStarted)
    }

    fn end_tier(&mut self, stage: Stage) -> Result<()> {
        info!(
            phase = %stage.phase,
            tier = stage.tier,
            iterations = self.iterations,
            error = self.current_error,
            "Tier converged"
        );
        if stage.tier > 0 {
            let field_graph = self.field_graph.as_mut().ok_or_else(no_data)?;
            match stage.phase {
                FieldPhase::Rosy => field_graph.propagate_orientation(stage.tier)?,
                FieldPhase::Posy => field_graph.propagate_position(stage.tier)?,
            }
        }
        self.apply(StateEvent::TierEnded)
    }

    /// Smooth the selected nodes of the stage's tier and refresh the error.
    fn run_pass(&mut self, stage: Stage) -> Result<()> {
        let order = self.pass_order(stage)?;
        let rho = self.config.rho;
        let graph = self.tier_graph_mut(stage.tier)?;

        for node in order {
            match stage.phase {
                FieldPhase::Rosy => rosy::smooth_node(graph, node)?,
                FieldPhase::Posy => posy::smooth_node(graph, node, rho)?,
            }
        }
        let error = match stage.phase {
            FieldPhase::Rosy => rosy::tier_error(graph)?,
            FieldPhase::Posy => posy::label_edges(graph, rho)?,
        };
        self.current_error = error;
        debug!(
            phase = %stage.phase,
            tier = stage.tier,
            iteration = self.iterations + 1,
            error = self.current_error,
            "Pass complete"
        );
        Ok(())
    }

    fn pass_order(&mut self, stage: Stage) -> Result<Vec<NodeId>> {
        let rho = self.config.rho;
        let selection = self.config.node_selection;
        let graph = self.tier_graph(stage.tier)?;

        match selection {
            NodeSelection::AllInRandomOrder => {
                let mut order = graph.node_ids();
                order.shuffle(&mut self.rng);
                Ok(order)
            }
            NodeSelection::WorstFirst { count } => {
                let mut scored = Vec::with_capacity(graph.num_nodes());
                for id in graph.node_ids() {
                    let error = match stage.phase {
                        FieldPhase::Rosy => rosy::node_error(graph, id)?,
                        FieldPhase::Posy => posy::node_error(graph, id, rho)?,
                    };
                    scored.push((id, error));
                }
                // stable: equal errors keep handle order
                scored.sort_by(|a, b| b.1.total_cmp(&a.1));
                Ok(scored.into_iter().take(count).map(|(id, _)| id).collect())
            }
        }
    }

    fn has_converged(&self, previous_error: f32) -> bool {
        if self.iterations >= self.config.max_iterations_per_tier {
            return true;
        }
        if self.current_error <= ERROR_FLOOR || previous_error <= ERROR_FLOOR {
            return true;
        }
        let improvement = (previous_error - self.current_error) / previous_error * 100.0;
        improvement < self.config.convergence_threshold
    }

    fn tier_error(&self, stage: Stage) -> Result<f32> {
        let graph = self.tier_graph(stage.tier)?;
        match stage.phase {
            FieldPhase::Rosy => rosy::tier_error(graph),
            FieldPhase::Posy => posy::tier_error(graph, self.config.rho),
        }
    }

    fn apply(&mut self, event: StateEvent) -> Result<()> {
        let top_tier = self.num_tiers().saturating_sub(1);
        let schedule = Schedule { phases: &self.config.phases, top_tier };
        self.state = self.state.transition(event, &schedule)?;
        Ok(())
    }

    fn tier_graph(&self, tier: usize) -> Result<&SurfelGraph> {
        self.field_graph
            .as_ref()
            .ok_or_else(no_data)?
            .tier(tier)
            .ok_or_else(|| Error::InvalidState(format!("Tier {tier} does not exist")))
    }

    fn tier_graph_mut(&mut self, tier: usize) -> Result<&mut SurfelGraph> {
        self.field_graph
            .as_mut()
            .ok_or_else(no_data)?
            .tier_mut(tier)
            .ok_or_else(|| Error::InvalidState(format!("Tier {tier} does not exist")))
    }

    // ========================================================================
    // Accessors
    // ========================================================================

    pub fn config(&self) -> &OptimiserConfig {
        &self.config
    }

    pub fn state(&self) -> OptimisationState {
        self.state
    }

    pub fn is_done(&self) -> bool {
        self.state.is_done()
    }

    /// Tier being optimised; 0 once done.
    pub fn current_tier(&self) -> Option<usize> {
        match self.state {
            OptimisationState::Done => Some(0),
            state => state.stage().map(|s| s.tier),
        }
    }

    pub fn current_phase(&self) -> Option<FieldPhase> {
        self.state.stage().map(|s| s.phase)
    }

    /// Passes run on the current tier.
    pub fn iterations(&self) -> usize {
        self.iterations
    }

    /// Total field error of the current tier after the last pass.
    pub fn current_error(&self) -> f32 {
        self.current_error
    }

    /// Tiers in the hierarchy; 1 before it is built, 0 without data.
    pub fn num_tiers(&self) -> usize {
        self.field_graph.as_ref().map_or(0, MultiResolutionFieldGraph::num_tiers)
    }

    pub fn num_nodes_in_tier(&self, tier: usize) -> Option<usize> {
        self.field_graph.as_ref()?.tier(tier).map(SurfelGraph::num_nodes)
    }

    pub fn num_edges_in_tier(&self, tier: usize) -> Option<usize> {
        self.field_graph.as_ref()?.tier(tier).map(SurfelGraph::num_edges)
    }

    pub fn field_graph(&self) -> Option<&MultiResolutionFieldGraph> {
        self.field_graph.as_ref()
    }

    /// The full-resolution graph.
    pub fn graph(&self) -> Option<&SurfelGraph> {
        self.field_graph.as_ref()?.tier(0)
    }

    /// Take back the full-resolution graph, leaving the optimiser without data.
    pub fn take_graph(&mut self) -> Option<SurfelGraph> {
        let graph = self.field_graph.take()?.into_base();
        self.state = OptimisationState::Uninitialised;
        Some(graph)
    }
}

fn no_data() -> Error {
    Error::InvalidState("No data attached".into())
}
