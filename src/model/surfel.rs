//! Surfels: oriented point samples observed across one or more frames.

use std::f32::consts::TAU;

use rand::Rng;
use serde::{Deserialize, Serialize};
use smallvec::SmallVec;

use super::geometry::{
    check_non_zero, check_unit, local_normal, project_vector_to_plane, rotation_to_normal,
    Matrix3, Vector2, Vector3, ZERO_TOLERANCE,
};
use crate::{Error, Result};

/// Pixel a surfel was sampled from, in a given frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PixelInFrame {
    pub x: u32,
    pub y: u32,
    pub frame: u32,
}

impl PixelInFrame {
    pub fn new(x: u32, y: u32, frame: u32) -> Self {
        Self { x, y, frame }
    }
}

/// Geometry of one surfel as seen in one frame.
///
/// `transform` is a rotation taking surfel-local coordinates (normal on +Y)
/// into the frame's coordinates, so `transform * (0, 1, 0) == normal`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FrameData {
    pub pixel_in_frame: PixelInFrame,
    pub depth: f32,
    pub transform: Matrix3,
    pub normal: Vector3,
    pub position: Vector3,
}

impl FrameData {
    /// Build frame data, deriving the transform from a unit normal.
    pub fn from_normal(
        pixel_in_frame: PixelInFrame,
        depth: f32,
        normal: Vector3,
        position: Vector3,
    ) -> Result<Self> {
        check_unit(&normal, "normal")?;
        Ok(Self {
            pixel_in_frame,
            depth,
            transform: rotation_to_normal(&normal),
            normal,
            position,
        })
    }

    #[inline]
    pub fn frame(&self) -> u32 {
        self.pixel_in_frame.frame
    }

    /// Frame coordinates -> surfel-local coordinates.
    #[inline]
    pub fn to_local(&self, v: &Vector3) -> Vector3 {
        self.transform.transpose() * v
    }

    /// Surfel-local coordinates -> frame coordinates.
    #[inline]
    pub fn to_frame(&self, v: &Vector3) -> Vector3 {
        self.transform * v
    }
}

/// A vertex of the working graph.
///
/// The tangent is stored in surfel-local coordinates and is shared by every
/// frame; the reference lattice offset is `(u, v)` in units of ρ along the
/// local basis `(tangent, normal × tangent)`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Surfel {
    pub id: String,
    pub frame_data: Vec<FrameData>,
    tangent: Vector3,
    reference_lattice_offset: Vector2,
}

impl Surfel {
    /// Create a surfel with an explicit local tangent and lattice offset.
    pub fn new(
        id: impl Into<String>,
        frame_data: Vec<FrameData>,
        tangent: Vector3,
        reference_lattice_offset: Vector2,
    ) -> Result<Self> {
        let id = id.into();
        if frame_data.is_empty() {
            return Err(Error::InvalidArgument(format!("surfel {id} has no frame data")));
        }
        for fd in &frame_data {
            check_unit(&fd.normal, "normal")?;
        }
        let mut surfel = Self {
            id,
            frame_data,
            tangent: Vector3::x(),
            reference_lattice_offset,
        };
        surfel.set_tangent(tangent)?;
        Ok(surfel)
    }

    /// Assemble a surfel whose frames and local tangent are already valid.
    pub(crate) fn from_parts(
        id: String,
        frame_data: Vec<FrameData>,
        tangent: Vector3,
        reference_lattice_offset: Vector2,
    ) -> Self {
        Self { id, frame_data, tangent, reference_lattice_offset }
    }

    /// Local unit tangent (always orthogonal to local +Y).
    #[inline]
    pub fn tangent(&self) -> Vector3 {
        self.tangent
    }

    /// Local orthogonal tangent, `normal × tangent`.
    #[inline]
    pub fn orthogonal_tangent(&self) -> Vector3 {
        local_normal().cross(&self.tangent)
    }

    /// Replace the local tangent. The value is projected into the local
    /// tangent plane and normalised.
    pub fn set_tangent(&mut self, tangent: Vector3) -> Result<()> {
        let projected = project_vector_to_plane(&tangent, &local_normal());
        check_non_zero(&projected, "tangent")?;
        self.tangent = projected.normalize();
        Ok(())
    }

    #[inline]
    pub fn reference_lattice_offset(&self) -> Vector2 {
        self.reference_lattice_offset
    }

    #[inline]
    pub fn set_reference_lattice_offset(&mut self, offset: Vector2) {
        self.reference_lattice_offset = offset;
    }

    /// Frame data for `frame`, if this surfel was observed in it.
    pub fn frame_data_for(&self, frame: u32) -> Option<&FrameData> {
        self.frame_data.iter().find(|fd| fd.frame() == frame)
    }

    pub fn frames(&self) -> impl Iterator<Item = u32> + '_ {
        self.frame_data.iter().map(FrameData::frame)
    }

    /// Index pairs `(mine, theirs)` of frames both surfels were observed in.
    pub fn shared_frames(&self, other: &Surfel) -> SmallVec<[(usize, usize); 4]> {
        let mut shared = SmallVec::new();
        for (i, fd) in self.frame_data.iter().enumerate() {
            if let Some(j) = other.frame_data.iter().position(|o| o.frame() == fd.frame()) {
                shared.push((i, j));
            }
        }
        shared
    }

    /// Tangent expressed in the coordinates of `fd`'s frame.
    #[inline]
    pub fn tangent_in_frame(&self, fd: &FrameData) -> Vector3 {
        fd.to_frame(&self.tangent)
    }

    /// Reference lattice vertex relative to the surfel, in local coordinates.
    pub fn lattice_vertex_local(&self, rho: f32) -> Vector3 {
        let offset = self.reference_lattice_offset;
        (self.tangent * offset.x + self.orthogonal_tangent() * offset.y) * rho
    }

    /// Reference lattice vertex in the coordinates of `fd`'s frame.
    pub fn lattice_vertex_in_frame(&self, fd: &FrameData, rho: f32) -> Vector3 {
        fd.position + fd.to_frame(&self.lattice_vertex_local(rho))
    }

    /// Express a local vector as `(u, v)` lattice coordinates in units of ρ.
    pub fn local_to_lattice(&self, local: &Vector3, rho: f32) -> Vector2 {
        Vector2::new(
            local.dot(&self.tangent) / rho,
            local.dot(&self.orthogonal_tangent()) / rho,
        )
    }
}

/// Builds surfels with a randomly initialised tangent and lattice offset.
pub struct SurfelBuilder<'r, R: Rng> {
    rng: &'r mut R,
    id: String,
    frames: Vec<FrameData>,
}

impl<'r, R: Rng> SurfelBuilder<'r, R> {
    pub fn new(id: impl Into<String>, rng: &'r mut R) -> Self {
        Self { rng, id: id.into(), frames: Vec::new() }
    }

    pub fn with_frame(mut self, frame_data: FrameData) -> Self {
        self.frames.push(frame_data);
        self
    }

    pub fn with_frames(mut self, frames: impl IntoIterator<Item = FrameData>) -> Self {
        self.frames.extend(frames);
        self
    }

    pub fn build(self) -> Result<Surfel> {
        let theta = self.rng.gen_range(0.0..TAU);
        let tangent = Vector3::new(theta.cos(), 0.0, theta.sin());
        let offset = Vector2::new(self.rng.gen_range(-0.5..0.5), self.rng.gen_range(-0.5..0.5));
        Surfel::new(self.id, self.frames, tangent, offset)
    }
}

/// Best-effort map of `tangent` (frame coordinates) into a surfel-local
/// tangent under `fd`; falls back to local +X when it lies along the normal.
pub(crate) fn local_tangent_from_frame(fd: &FrameData, tangent: &Vector3) -> Vector3 {
    let local = project_vector_to_plane(&fd.to_local(tangent), &local_normal());
    if local.norm() < ZERO_TOLERANCE {
        Vector3::x()
    } else {
        local.normalize()
    }
}
