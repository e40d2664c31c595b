//! # Surfel Model
//!
//! Plain data carried by the field graph: surfels with their per-frame
//! geometry, field-carrying edges, and the vector aliases they are built from.
//!
//! Design rule: no graph types and no optimiser state here.
//! No I/O happens here. The only randomness is the caller-supplied RNG
//! in `SurfelBuilder`.

pub mod geometry;
pub mod surfel;
pub mod edge;

pub use geometry::{LatticeCoord, Matrix3, Vector2, Vector3};
pub use surfel::{FrameData, PixelInFrame, Surfel, SurfelBuilder};
pub use edge::{FieldEdge, FrameLatticeOffsets};
