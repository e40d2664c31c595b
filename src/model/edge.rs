//! Field-carrying edge payload.

use serde::{Deserialize, Serialize};
use smallvec::SmallVec;

use super::geometry::LatticeCoord;

/// Integer lattice labels of one edge in one frame.
///
/// `t_ij` is the lower-handle endpoint's displacement, `t_ji` the higher one's.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FrameLatticeOffsets {
    pub frame: u32,
    pub t_ij: LatticeCoord,
    pub t_ji: LatticeCoord,
}

/// Payload of an edge between two surfels.
///
/// `k_low` / `k_high` count the quarter turns applied to the lower-handle and
/// higher-handle endpoint's tangent to match them; both stay in `[0, 4)`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldEdge {
    weight: f32,
    k_low: u8,
    k_high: u8,
    lattice_offsets: SmallVec<[FrameLatticeOffsets; 2]>,
}

impl FieldEdge {
    pub fn new(weight: f32) -> Self {
        Self {
            weight,
            k_low: 0,
            k_high: 0,
            lattice_offsets: SmallVec::new(),
        }
    }

    #[inline]
    pub fn weight(&self) -> f32 {
        self.weight
    }

    #[inline]
    pub fn k_low(&self) -> u8 {
        self.k_low
    }

    #[inline]
    pub fn k_high(&self) -> u8 {
        self.k_high
    }

    /// Store the quarter-turn labels, reduced mod 4.
    pub fn set_rosy_labels(&mut self, k_low: u8, k_high: u8) {
        self.k_low = k_low % 4;
        self.k_high = k_high % 4;
    }

    pub fn lattice_offsets(&self) -> &[FrameLatticeOffsets] {
        &self.lattice_offsets
    }

    pub fn lattice_offsets_for(&self, frame: u32) -> Option<&FrameLatticeOffsets> {
        self.lattice_offsets.iter().find(|o| o.frame == frame)
    }

    pub fn set_lattice_offsets(&mut self, offsets: impl IntoIterator<Item = FrameLatticeOffsets>) {
        self.lattice_offsets = offsets.into_iter().collect();
    }
}

impl Default for FieldEdge {
    fn default() -> Self {
        Self::new(1.0)
    }
}
