//! # surfel-fields: Multi-Resolution Cross-Field Optimisation
//!
//! Computes smooth 4-fold rotationally symmetric orientation fields (RoSy)
//! and lattice-aligned position fields (PoSy) over graphs of oriented point
//! samples (surfels), as the first stage of quad-dominant remeshing of
//! multi-frame 3-D reconstructions.
//!
//! ## Design Principles
//!
//! 1. **Generic graph core**: `WeightedGraph` knows nothing about surfels; the
//!    simplifier takes merge behaviour as a `MergeStrategy`.
//! 2. **Arena of tiers**: a `Hierarchy` is a `Vec` of graphs plus a `Vec` of
//!    fine-to-coarse mappings indexed by tier, never back-pointers.
//! 3. **Stateless algebra**: `field::rosy` and `field::posy` are pure functions
//!    over vectors; smoothing passes are thin loops around them.
//! 4. **Explicit state machine**: `FieldOptimiser` advances through
//!    `OptimisationState` with one transition function.
//! 5. **Injected randomness**: every shuffle and seed pick takes a caller RNG.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use surfel_fields::{FieldOptimiser, OptimiserConfig, SurfelGraph};
//!
//! # fn example(graph: SurfelGraph) -> surfel_fields::Result<()> {
//! let mut optimiser = FieldOptimiser::from_config(OptimiserConfig::default())?;
//! optimiser.set_data(graph)?;
//! optimiser.optimise()?;
//!
//! println!("final error: {}", optimiser.current_error());
//! # Ok(())
//! # }
//! ```
//!
//! ## Field Phases
//!
//! | Phase | Per-pass work | Error |
//! |-------|---------------|-------|
//! | RoSy | re-average every tangent against its neighbours | Σ squared matched angle |
//! | PoSy | re-average every lattice offset, relabel every edge | Σ squared lattice gap / ρ² |

// ============================================================================
// Modules
// ============================================================================

pub mod model;
pub mod graph;
pub mod field;
pub mod optimiser;

#[cfg(test)]
mod test_helpers;

// ============================================================================
// Re-exports: Model
// ============================================================================

pub use model::{
    FieldEdge, FrameData, FrameLatticeOffsets, PixelInFrame, Surfel, SurfelBuilder,
    LatticeCoord, Matrix3, Vector2, Vector3,
};

// ============================================================================
// Re-exports: Graph
// ============================================================================

pub use graph::{
    Edge, EdgeId, NodeId, WeightedGraph,
    GraphSimplifier, MergeFns, MergeStrategy, SeedSelection, TierMapping,
    Hierarchy, HierarchyLimits,
};

// ============================================================================
// Re-exports: Fields
// ============================================================================

pub use field::{
    MultiResolutionFieldGraph, SurfelGraph, SurfelMerge, TierTransform,
    RosyMatch, EdgeLattice, LatticePair,
};

// ============================================================================
// Re-exports: Optimiser
// ============================================================================

pub use optimiser::{
    FieldOptimiser, FieldPhase, NodeSelection, OptimisationState, OptimiserConfig,
    Schedule, StateEvent,
};

// ============================================================================
// Error Types
// ============================================================================

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Invalid state: {0}")]
    InvalidState(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, Error>;
