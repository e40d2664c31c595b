//! Multi-resolution surfel graph.
//!
//! Wraps a `Hierarchy<Surfel, FieldEdge>` and the per-node transforms that
//! carry field values from a coarse surfel into the local frame of every
//! fine surfel that collapsed into it. The transforms are computed once, when
//! the hierarchy is generated, and reused by every propagation.

use std::ops::{Index, IndexMut};

use hashbrown::HashMap;
use rand::Rng;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use super::posy::settle_offset;
use crate::graph::{
    GraphSimplifier, Hierarchy, HierarchyLimits, MergeStrategy, NodeId, SeedSelection,
    TierMapping, WeightedGraph,
};
use crate::model::geometry::{check_spacing, project_vector_to_plane, rotation_to_normal, local_normal};
use crate::model::surfel::local_tangent_from_frame;
use crate::model::{FieldEdge, FrameData, Surfel, Vector2, Vector3, Matrix3};
use crate::{Error, Result};

/// Graph of surfels joined by field-carrying edges.
pub type SurfelGraph = WeightedGraph<Surfel, FieldEdge>;

// ============================================================================
// SurfelMerge
// ============================================================================

/// Merge strategy for surfel graphs.
///
/// A merged surfel keeps the seed's identifier. Its frames are the union of
/// the members' frames; per frame, position and depth are averaged, the
/// normal is the normalised sum of normals and the pixel is the first
/// member's. The tangent is the seed's, carried through the first shared
/// frame. The lattice offset starts at zero. Edge weights add up.
#[derive(Debug, Clone, Copy, Default)]
pub struct SurfelMerge;

impl MergeStrategy<Surfel, FieldEdge> for SurfelMerge {
    fn merge_nodes(&self, nodes: &[&Surfel]) -> Surfel {
        // (frame data of the first member, position sum, normal sum, depth sum, count)
        let mut merged: Vec<(FrameData, Vector3, Vector3, f32, f32)> = Vec::new();
        for surfel in nodes {
            for fd in &surfel.frame_data {
                match merged.iter_mut().find(|m| m.0.frame() == fd.frame()) {
                    Some(m) => {
                        m.1 += fd.position;
                        m.2 += fd.normal;
                        m.3 += fd.depth;
                        m.4 += 1.0;
                    }
                    None => merged.push((fd.clone(), fd.position, fd.normal, fd.depth, 1.0)),
                }
            }
        }

        let frame_data: Vec<FrameData> = merged
            .into_iter()
            .map(|(first, position_sum, normal_sum, depth_sum, count)| {
                let normal = if normal_sum.norm() > 1e-6 { normal_sum.normalize() } else { first.normal };
                FrameData {
                    pixel_in_frame: first.pixel_in_frame,
                    depth: depth_sum / count,
                    transform: rotation_to_normal(&normal),
                    normal,
                    position: position_sum / count,
                }
            })
            .collect();

        let Some(seed) = nodes.first() else {
            return Surfel::from_parts(String::new(), frame_data, Vector3::x(), Vector2::zeros());
        };
        let tangent = seed
            .frame_data
            .first()
            .and_then(|seed_fd| {
                frame_data
                    .iter()
                    .find(|fd| fd.frame() == seed_fd.frame())
                    .map(|fd| local_tangent_from_frame(fd, &seed.tangent_in_frame(seed_fd)))
            })
            .unwrap_or_else(Vector3::x);

        Surfel::from_parts(seed.id.clone(), frame_data, tangent, Vector2::zeros())
    }

    fn merge_edges(&self, edges: &[&FieldEdge]) -> FieldEdge {
        FieldEdge::new(edges.iter().map(|e| e.weight()).sum())
    }
}

// ============================================================================
// TierTransform
// ============================================================================

/// Cached mapping from a coarse surfel's local frame into the local frame of
/// one fine surfel that collapsed into it.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TierTransform {
    /// Coarse node the fine node maps to.
    pub coarse: NodeId,
    /// Frame both local frames were related through.
    pub frame: u32,
    /// Coarse local -> fine local.
    pub rotation: Matrix3,
    /// Coarse surfel position in fine local coordinates.
    pub translation: Vector3,
}

impl TierTransform {
    /// Relate `coarse` to `fine` through the fine surfel's first frame.
    pub fn between(coarse_id: NodeId, fine: &Surfel, coarse: &Surfel) -> Result<Self> {
        let fd_f = fine
            .frame_data
            .first()
            .ok_or_else(|| Error::InvalidArgument(format!("surfel {} has no frame data", fine.id)))?;
        let fd_c = coarse
            .frame_data_for(fd_f.frame())
            .or_else(|| coarse.frame_data.first())
            .ok_or_else(|| Error::InvalidArgument(format!("surfel {} has no frame data", coarse.id)))?;
        if fd_c.frame() != fd_f.frame() {
            warn!(fine = %fine.id, coarse = %coarse.id, "No shared frame between tiers; relating first frames");
        }

        Ok(Self {
            coarse: coarse_id,
            frame: fd_f.frame(),
            rotation: fd_f.transform.transpose() * fd_c.transform,
            translation: fd_f.to_local(&(fd_c.position - fd_f.position)),
        })
    }

    /// Coarse local direction -> fine local direction.
    #[inline]
    pub fn direction_to_fine(&self, v: &Vector3) -> Vector3 {
        self.rotation * v
    }

    /// Coarse local point (relative to the coarse surfel) -> fine local point
    /// (relative to the fine surfel).
    #[inline]
    pub fn point_to_fine(&self, p: &Vector3) -> Vector3 {
        self.rotation * p + self.translation
    }
}

// ============================================================================
// MultiResolutionFieldGraph
// ============================================================================

/// Tier hierarchy of a surfel graph plus the cached inter-tier transforms.
#[derive(Debug, Clone)]
pub struct MultiResolutionFieldGraph {
    hierarchy: Hierarchy<Surfel, FieldEdge>,
    /// `transforms[t]` relates tier `t + 1` to tier `t`, keyed by fine node.
    transforms: Vec<HashMap<NodeId, TierTransform>>,
    rho: f32,
}

impl MultiResolutionFieldGraph {
    pub fn new(graph: SurfelGraph, rho: f32) -> Result<Self> {
        check_spacing(rho)?;
        Ok(Self { hierarchy: Hierarchy::new(graph), transforms: Vec::new(), rho })
    }

    pub fn rho(&self) -> f32 {
        self.rho
    }

    /// Build up to `levels` tiers (tier 0 included) with random seeding.
    pub fn generate_levels<R: Rng>(&mut self, levels: usize, rng: &mut R) -> Result<()> {
        if levels == 0 {
            return Err(Error::InvalidArgument("At least one level must be requested".into()));
        }
        self.generate_with_limits(&HierarchyLimits::tiers(levels), SeedSelection::Random, rng)
    }

    /// Build tiers until `limits` are met. `Furthest` seeding measures
    /// distance between the surfels' first-frame positions.
    pub fn generate_with_limits<R: Rng>(
        &mut self,
        limits: &HierarchyLimits,
        seed_selection: SeedSelection,
        rng: &mut R,
    ) -> Result<()> {
        let simplifier = match seed_selection {
            SeedSelection::Random => GraphSimplifier::new(SurfelMerge),
            SeedSelection::Furthest => {
                GraphSimplifier::new(SurfelMerge).with_furthest_seeds(first_frame_distance)
            }
        };
        self.hierarchy.generate_hierarchy(limits, &simplifier, rng)?;
        self.cache_transforms()
    }

    fn cache_transforms(&mut self) -> Result<()> {
        self.transforms.clear();
        for t in 0..self.hierarchy.num_tiers().saturating_sub(1) {
            let (fine, coarse) = (&self.hierarchy[t], &self.hierarchy[t + 1]);
            let mapping = self.hierarchy.mapping(t).ok_or_else(|| missing_mapping(t))?;

            let mut tier_transforms = HashMap::with_capacity(mapping.len());
            for (f, c) in mapping.iter() {
                let fine_surfel = fine.node(f).ok_or_else(|| Error::NotFound(format!("Node {f} in tier {t}")))?;
                let coarse_surfel =
                    coarse.node(c).ok_or_else(|| Error::NotFound(format!("Node {c} in tier {}", t + 1)))?;
                tier_transforms.insert(f, TierTransform::between(c, fine_surfel, coarse_surfel)?);
            }
            self.transforms.push(tier_transforms);
        }
        debug!(tiers = self.hierarchy.num_tiers(), "Cached inter-tier transforms");
        Ok(())
    }

    pub fn is_built(&self) -> bool {
        self.hierarchy.is_built()
    }

    pub fn num_tiers(&self) -> usize {
        self.hierarchy.num_tiers()
    }

    pub fn tier(&self, tier: usize) -> Option<&SurfelGraph> {
        self.hierarchy.tier(tier)
    }

    pub fn tier_mut(&mut self, tier: usize) -> Option<&mut SurfelGraph> {
        self.hierarchy.tier_mut(tier)
    }

    /// Mapping from tier `tier` onto tier `tier + 1`.
    pub fn mapping(&self, tier: usize) -> Option<&TierMapping> {
        self.hierarchy.mapping(tier)
    }

    /// Cached transform of fine node `node` in tier `tier`.
    pub fn transform(&self, tier: usize, node: NodeId) -> Option<&TierTransform> {
        self.transforms.get(tier).and_then(|m| m.get(&node))
    }

    pub fn hierarchy(&self) -> &Hierarchy<Surfel, FieldEdge> {
        &self.hierarchy
    }

    /// Give back tier 0, dropping every coarser tier.
    pub fn into_base(self) -> SurfelGraph {
        self.hierarchy.into_base()
    }

    /// Push tangents and lattice offsets from `tier` down into `tier - 1`.
    pub fn propagate(&mut self, tier: usize) -> Result<()> {
        self.propagate_orientation(tier)?;
        self.propagate_position(tier)
    }

    /// Push tangents only. Every fine node takes its coarse node's tangent,
    /// rotated into its own local frame.
    pub fn propagate_orientation(&mut self, tier: usize) -> Result<()> {
        let transforms = self.transforms_into(tier)?;
        let (fine, coarse) = self.hierarchy.adjacent_tiers_mut(tier).ok_or_else(|| bad_tier(tier))?;

        for (f, tf) in transforms {
            let Some(coarse_surfel) = coarse.node(tf.coarse) else { continue };
            let tangent = tf.direction_to_fine(&coarse_surfel.tangent());
            let Some(fine_surfel) = fine.node_mut(f) else { continue };
            if fine_surfel.set_tangent(tangent).is_err() {
                warn!(node = %f, tier = tier - 1, "Propagated tangent is parallel to the normal; keeping the old one");
            }
        }
        Ok(())
    }

    /// Push lattice offsets only. The coarse reference lattice vertex is
    /// carried into the fine local frame, dropped onto the fine tangent
    /// plane and re-expressed in the fine tangent basis.
    pub fn propagate_position(&mut self, tier: usize) -> Result<()> {
        let rho = self.rho;
        let transforms = self.transforms_into(tier)?;
        let (fine, coarse) = self.hierarchy.adjacent_tiers_mut(tier).ok_or_else(|| bad_tier(tier))?;

        for (f, tf) in transforms {
            let Some(coarse_surfel) = coarse.node(tf.coarse) else { continue };
            let vertex = tf.point_to_fine(&coarse_surfel.lattice_vertex_local(rho));
            let vertex = project_vector_to_plane(&vertex, &local_normal());
            let Some(fine_surfel) = fine.node_mut(f) else { continue };
            if let Some(offset) = settle_offset(f, fine_surfel.local_to_lattice(&vertex, rho)) {
                fine_surfel.set_reference_lattice_offset(offset);
            }
        }
        Ok(())
    }

    /// Transforms used when propagating from `tier` into `tier - 1`.
    fn transforms_into(&self, tier: usize) -> Result<Vec<(NodeId, TierTransform)>> {
        if tier == 0 || tier >= self.num_tiers() {
            return Err(bad_tier(tier));
        }
        let map = self.transforms.get(tier - 1).ok_or_else(|| missing_mapping(tier - 1))?;
        let mut pairs: Vec<(NodeId, TierTransform)> = map.iter().map(|(f, tf)| (*f, *tf)).collect();
        pairs.sort_by_key(|(f, _)| *f);
        Ok(pairs)
    }
}

impl Index<usize> for MultiResolutionFieldGraph {
    type Output = SurfelGraph;

    fn index(&self, tier: usize) -> &Self::Output {
        &self.hierarchy[tier]
    }
}

impl IndexMut<usize> for MultiResolutionFieldGraph {
    fn index_mut(&mut self, tier: usize) -> &mut Self::Output {
        &mut self.hierarchy[tier]
    }
}

fn first_frame_distance(a: &Surfel, b: &Surfel) -> f32 {
    match (a.frame_data.first(), b.frame_data.first()) {
        (Some(fa), Some(fb)) => (fa.position - fb.position).norm(),
        _ => f32::INFINITY,
    }
}

fn bad_tier(tier: usize) -> Error {
    Error::InvalidState(format!("Cannot propagate from tier {tier}"))
}

fn missing_mapping(tier: usize) -> Error {
    Error::InvalidState(format!("No mapping recorded for tier {tier}"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::PixelInFrame;
    use crate::test_helpers::planar_grid;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn surfel(id: &str, frame: u32, normal: Vector3, position: Vector3, tangent: Vector3) -> Surfel {
        let fd = FrameData::from_normal(PixelInFrame::new(0, 0, frame), 2.0, normal, position).unwrap();
        Surfel::new(id, vec![fd], tangent, Vector2::new(0.1, -0.2)).unwrap()
    }

    #[test]
    fn test_merge_averages_shared_frames() {
        let a = surfel("a", 0, Vector3::z(), Vector3::zeros(), Vector3::x());
        let b = surfel("b", 0, Vector3::new(0.0, 0.6, 0.8), Vector3::new(2.0, 0.0, 0.0), Vector3::x());
        let c = surfel("c", 3, Vector3::z(), Vector3::new(0.0, 4.0, 0.0), Vector3::x());

        let m = SurfelMerge.merge_nodes(&[&a, &b, &c]);
        assert_eq!(m.id, "a");
        assert_eq!(m.frames().collect::<Vec<_>>(), vec![0, 3]);
        let fd0 = m.frame_data_for(0).unwrap();
        assert!((fd0.position - Vector3::new(1.0, 0.0, 0.0)).norm() < 1e-5);
        assert!((fd0.normal.norm() - 1.0).abs() < 1e-5);
        assert!((fd0.transform * local_normal() - fd0.normal).norm() < 1e-5);
        assert_eq!(m.reference_lattice_offset(), Vector2::zeros());
        assert!(m.tangent().y.abs() < 1e-6);
    }

    #[test]
    fn test_merge_keeps_seed_tangent_direction() {
        let a = surfel("a", 0, Vector3::z(), Vector3::zeros(), Vector3::x());
        let b = surfel("b", 0, Vector3::z(), Vector3::x(), Vector3::z());
        let t_a = a.tangent_in_frame(&a.frame_data[0]);

        let m = SurfelMerge.merge_nodes(&[&a, &b]);
        let t_m = m.tangent_in_frame(&m.frame_data[0]);
        assert!((t_m - t_a).norm() < 1e-5);
    }

    #[test]
    fn test_merge_edges_adds_weights() {
        let merged = SurfelMerge.merge_edges(&[&FieldEdge::new(1.5), &FieldEdge::new(2.0)]);
        assert_eq!(merged.weight(), 3.5);
    }

    #[test]
    fn test_zero_levels_rejected() {
        let mut rng = StdRng::seed_from_u64(0);
        let mut g = MultiResolutionFieldGraph::new(planar_grid(3, 1.0, &mut rng), 1.0).unwrap();
        assert!(matches!(g.generate_levels(0, &mut rng), Err(Error::InvalidArgument(_))));
        assert!(matches!(MultiResolutionFieldGraph::new(SurfelGraph::default(), 0.0), Err(Error::InvalidArgument(_))));
    }

    #[test]
    fn test_transforms_cached_for_every_fine_node() {
        let mut rng = StdRng::seed_from_u64(3);
        let mut g = MultiResolutionFieldGraph::new(planar_grid(4, 1.0, &mut rng), 1.0).unwrap();
        g.generate_levels(3, &mut rng).unwrap();

        assert!(g.num_tiers() >= 2);
        for t in 0..g.num_tiers() - 1 {
            for id in g[t].node_ids() {
                let tf = g.transform(t, id).unwrap();
                assert_eq!(Some(tf.coarse), g.mapping(t).unwrap().coarse_of(id));
            }
        }
    }

    #[test]
    fn test_propagate_copies_coarse_field_on_planar_grid() {
        let mut rng = StdRng::seed_from_u64(11);
        let mut g = MultiResolutionFieldGraph::new(planar_grid(4, 1.0, &mut rng), 1.0).unwrap();
        g.generate_levels(2, &mut rng).unwrap();
        assert_eq!(g.num_tiers(), 2);

        for id in g[1].node_ids() {
            g[1].node_mut(id).unwrap().set_tangent(Vector3::new(1.0, 0.0, 1.0)).unwrap();
        }
        g.propagate(1).unwrap();

        // identical normals, so the tangent carries over unchanged in the frame
        for (id, s) in g[0].nodes() {
            let coarse_id = g.mapping(0).unwrap().coarse_of(id).unwrap();
            let coarse = g[1].node(coarse_id).unwrap();
            let t_f = s.tangent_in_frame(&s.frame_data[0]);
            let t_c = coarse.tangent_in_frame(&coarse.frame_data[0]);
            assert!((t_f - t_c).norm() < 1e-4);

            // both reference vertices lie on the same lattice
            let v_f = s.lattice_vertex_in_frame(&s.frame_data[0], 1.0);
            let v_c = coarse.lattice_vertex_in_frame(&coarse.frame_data[0], 1.0);
            let d = coarse.frame_data[0].to_local(&(v_f - v_c));
            let (u, v) = (d.dot(&coarse.tangent()), d.dot(&coarse.orthogonal_tangent()));
            assert!((u - u.round()).abs() < 1e-3 && (v - v.round()).abs() < 1e-3);
        }
    }

    #[test]
    fn test_propagate_rejects_out_of_range_tier() {
        let mut rng = StdRng::seed_from_u64(1);
        let mut g = MultiResolutionFieldGraph::new(planar_grid(3, 1.0, &mut rng), 1.0).unwrap();
        assert!(matches!(g.propagate(1), Err(Error::InvalidState(_))));
        g.generate_levels(2, &mut rng).unwrap();
        assert!(matches!(g.propagate(0), Err(Error::InvalidState(_))));
        assert!(matches!(g.propagate(g.num_tiers()), Err(Error::InvalidState(_))));
    }

    #[test]
    fn test_furthest_seeding_builds_hierarchy() {
        let mut rng = StdRng::seed_from_u64(2);
        let mut g = MultiResolutionFieldGraph::new(planar_grid(5, 1.0, &mut rng), 1.0).unwrap();
        g.generate_with_limits(&HierarchyLimits::nodes(4), SeedSelection::Furthest, &mut rng).unwrap();
        assert!(g[g.num_tiers() - 1].num_nodes() < 4);
    }
}
