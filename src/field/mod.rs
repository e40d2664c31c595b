//! # Field Layer
//!
//! Orientation (RoSy) and position (PoSy) field algebra, and the
//! multi-resolution surfel graph the optimiser runs them on.
//!
//! | Module | Role |
//! |--------|------|
//! | `rosy` | quarter-turn matching, averaging, tangent smoothing, angle error |
//! | `posy` | lattice snapping, closest-pair search, offset smoothing, edge labels |
//! | `multi_resolution` | surfel merge, tier hierarchy, cached inter-tier transforms |
//!
//! The algebra functions are pure; the `smooth_node` / `label_*` functions
//! write straight into the graph they are given.

pub mod rosy;
pub mod posy;
pub mod multi_resolution;

pub use rosy::{average_rosy_vectors, best_rosy_vector_pair, RosyMatch};
pub use posy::{
    compute_closest_lattice_points, compute_lattice_neighbours, compute_qij, compute_tij_tji,
    floor_4, round_4, EdgeLabels, EdgeLattice, LatticePair, LatticeVertex,
};
pub use multi_resolution::{MultiResolutionFieldGraph, SurfelGraph, SurfelMerge, TierTransform};
