//! # Position Field Algebra (4-PoSy)
//!
//! Every surfel carries a square lattice of spacing ρ in its tangent plane,
//! spanned by `(t, n × t)` and anchored at its reference lattice vertex.
//! Across an edge the two lattices are compared near `q_ij`, the point on
//! the intersection of both tangent planes closest to the endpoints'
//! midpoint:
//!
//! ```text
//! q_ij        = compute_qij(p_i, n_i, p_j, n_j)
//! cell_i      = floor_4(origin_i, t_i, n_i, q_ij)    4 corners around q_ij
//! cell_j      = floor_4(origin_j, t_j, n_j, q_ij)
//! (a, b)      = argmin |cell_i[a] - cell_j[b]|²
//! t_ij, t_ji  = integer coordinates of a, b relative to each origin
//! ```
//!
//! The integer labels are only meaningful once the orientation field has
//! settled; the tangents are quarter-turn matched before the basis is built.

use serde::{Deserialize, Serialize};
use tracing::warn;

use super::rosy::best_rosy_vector_pair;
use crate::graph::{EdgeId, NodeId, WeightedGraph};
use crate::model::geometry::{
    check_non_zero, check_spacing, check_unit, local_normal, project_vector_to_plane, round_coord,
    LatticeCoord, Vector2, Vector3,
};
use crate::model::{FieldEdge, FrameData, FrameLatticeOffsets, Surfel};
use crate::{Error, Result};

/// Below this `1 - (n_i · n_j)²` the tangent planes count as parallel.
const PARALLEL_EPSILON: f32 = 1e-4;

/// One endpoint of an edge as seen in one frame.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LatticeVertex {
    pub position: Vector3,
    pub normal: Vector3,
    pub tangent: Vector3,
    /// A vertex of the lattice, normally the reference lattice vertex.
    pub origin: Vector3,
}

impl LatticeVertex {
    /// The surfel's lattice in `fd`'s frame, anchored at its reference vertex.
    pub fn from_surfel(surfel: &Surfel, fd: &FrameData, rho: f32) -> Self {
        Self {
            position: fd.position,
            normal: fd.normal,
            tangent: surfel.tangent_in_frame(fd),
            origin: surfel.lattice_vertex_in_frame(fd, rho),
        }
    }

    #[inline]
    pub fn orthogonal_tangent(&self) -> Vector3 {
        self.normal.cross(&self.tangent)
    }

    fn check(&self) -> Result<()> {
        check_unit(&self.normal, "normal")?;
        check_non_zero(&self.tangent, "tangent")
    }

    fn with_tangent(self, tangent: Vector3) -> Self {
        Self { tangent, ..self }
    }
}

/// Closest pair of lattice points found for an edge.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LatticePair {
    pub p_i: Vector3,
    pub p_j: Vector3,
    pub distance_sq: f32,
}

/// Full labelling of an edge in one frame.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct EdgeLattice {
    pub k_ij: u8,
    pub k_ji: u8,
    pub t_ij: LatticeCoord,
    pub t_ji: LatticeCoord,
    pub closest: LatticePair,
}

/// Labels computed for one edge across all shared frames.
#[derive(Debug, Clone, PartialEq)]
pub struct EdgeLabels {
    /// `(k_low, k_high)` from the first shared frame; `None` without one.
    pub k: Option<(u8, u8)>,
    pub offsets: Vec<FrameLatticeOffsets>,
    pub error: f32,
}

// ============================================================================
// Lattice algebra
// ============================================================================

/// Point on the intersection line of the two tangent planes nearest to the
/// midpoint of `p_i` and `p_j`; the plain midpoint when the planes are parallel.
pub fn compute_qij(p_i: &Vector3, n_i: &Vector3, p_j: &Vector3, n_j: &Vector3) -> Vector3 {
    let midpoint = (p_i + p_j) * 0.5;
    let n_ij = n_i.dot(n_j);
    let denom = 1.0 - n_ij * n_ij;
    if denom < PARALLEL_EPSILON {
        return midpoint;
    }

    let ni_pi = n_i.dot(p_i);
    let ni_pj = n_i.dot(p_j);
    let nj_pi = n_j.dot(p_i);
    let nj_pj = n_j.dot(p_j);

    let lambda_i = 2.0 * (ni_pj - ni_pi - n_ij * (nj_pi - nj_pj)) / denom;
    let lambda_j = 2.0 * (nj_pi - nj_pj - n_ij * (ni_pj - ni_pi)) / denom;
    midpoint - (n_i * lambda_i + n_j * lambda_j) * 0.25
}

/// Tangent-space coordinates of `p` relative to `anchor`, in units of ρ.
#[inline]
fn lattice_coords(anchor: &Vector3, t: &Vector3, n: &Vector3, p: &Vector3, rho: f32) -> Vector2 {
    let d = p - anchor;
    Vector2::new(t.dot(&d) / rho, n.cross(t).dot(&d) / rho)
}

#[inline]
fn lattice_point(anchor: &Vector3, t: &Vector3, n: &Vector3, coords: Vector2, rho: f32) -> Vector3 {
    anchor + (t * coords.x + n.cross(t) * coords.y) * rho
}

/// Lattice vertex at the lower-left corner of the cell containing `p`.
pub fn floor_4(anchor: &Vector3, t: &Vector3, n: &Vector3, p: &Vector3, rho: f32) -> Vector3 {
    let c = lattice_coords(anchor, t, n, p, rho);
    lattice_point(anchor, t, n, Vector2::new(c.x.floor(), c.y.floor()), rho)
}

/// Lattice vertex nearest to `p`. Ties round away from zero.
pub fn round_4(anchor: &Vector3, t: &Vector3, n: &Vector3, p: &Vector3, rho: f32) -> Vector3 {
    let c = lattice_coords(anchor, t, n, p, rho);
    lattice_point(anchor, t, n, Vector2::new(c.x.round(), c.y.round()), rho)
}

/// The four corners of the lattice cell containing `p`.
pub fn compute_lattice_neighbours(
    anchor: &Vector3,
    t: &Vector3,
    n: &Vector3,
    p: &Vector3,
    rho: f32,
) -> [Vector3; 4] {
    let base = floor_4(anchor, t, n, p, rho);
    let du = t * rho;
    let dv = n.cross(t) * rho;
    [base, base + du, base + dv, base + du + dv]
}

/// Closest pair between the cells of both lattices around `q_ij`.
///
/// Ties keep the first pair in `(i corner, j corner)` order.
pub fn compute_closest_lattice_points(
    v_i: &LatticeVertex,
    v_j: &LatticeVertex,
    rho: f32,
) -> Result<LatticePair> {
    check_spacing(rho)?;
    v_i.check()?;
    v_j.check()?;

    let q = compute_qij(&v_i.position, &v_i.normal, &v_j.position, &v_j.normal);
    let cell_i = compute_lattice_neighbours(&v_i.origin, &v_i.tangent, &v_i.normal, &q, rho);
    let cell_j = compute_lattice_neighbours(&v_j.origin, &v_j.tangent, &v_j.normal, &q, rho);

    let mut best = LatticePair { p_i: cell_i[0], p_j: cell_j[0], distance_sq: f32::INFINITY };
    for p_i in &cell_i {
        for p_j in &cell_j {
            let distance_sq = (p_i - p_j).norm_squared();
            if distance_sq < best.distance_sq {
                best = LatticePair { p_i: *p_i, p_j: *p_j, distance_sq };
            }
        }
    }
    Ok(best)
}

/// Quarter-turn match the tangents, find the closest lattice pair and label
/// it with integer displacements from each endpoint's origin, measured in the
/// matched basis.
pub fn compute_tij_tji(v_i: &LatticeVertex, v_j: &LatticeVertex, rho: f32) -> Result<EdgeLattice> {
    let matched = best_rosy_vector_pair(&v_i.tangent, &v_i.normal, &v_j.tangent, &v_j.normal)?;
    let v_i = v_i.with_tangent(matched.o_i);
    let v_j = v_j.with_tangent(matched.o_j);

    let closest = compute_closest_lattice_points(&v_i, &v_j, rho)?;
    let c_i = lattice_coords(&v_i.origin, &v_i.tangent, &v_i.normal, &closest.p_i, rho);
    let c_j = lattice_coords(&v_j.origin, &v_j.tangent, &v_j.normal, &closest.p_j, rho);

    Ok(EdgeLattice {
        k_ij: matched.k_ij,
        k_ji: matched.k_ji,
        t_ij: LatticeCoord::new(round_coord(c_i.x), round_coord(c_i.y)),
        t_ji: LatticeCoord::new(round_coord(c_j.x), round_coord(c_j.y)),
        closest,
    })
}

/// Wrap lattice coordinates into the cell `[-0.5, 0.5]` around the surfel.
#[inline]
pub fn wrap_offset(offset: Vector2) -> Vector2 {
    Vector2::new(offset.x - offset.x.round(), offset.y - offset.y.round())
}

/// Wrapped offset for `node`, or `None` when the computed lattice
/// coordinates are not finite. The caller keeps the previous offset then.
pub fn settle_offset(node: NodeId, raw: Vector2) -> Option<Vector2> {
    if !(raw.x.is_finite() && raw.y.is_finite()) {
        warn!(node = %node, u = raw.x, v = raw.y, "Lattice offset is not finite, keeping the previous one");
        return None;
    }
    Some(wrap_offset(raw))
}

// ============================================================================
// Graph-level operations
// ============================================================================

fn surfel<'g>(graph: &'g WeightedGraph<Surfel, FieldEdge>, id: NodeId) -> Result<&'g Surfel> {
    graph.node(id).ok_or_else(|| Error::NotFound(format!("Node {id}")))
}

/// One Gauss–Seidel PoSy update of `node`.
///
/// Against every neighbour in every shared frame the closest lattice pair is
/// found, and the reference lattice vertex moves to the weighted blend of the
/// node's point (weighted by everything folded in so far) and the neighbour's
/// point, projected back into the node's tangent plane. The result is stored
/// as an offset wrapped into the cell around the surfel.
pub fn smooth_node(graph: &mut WeightedGraph<Surfel, FieldEdge>, node: NodeId, rho: f32) -> Result<()> {
    check_spacing(rho)?;
    let me = surfel(graph, node)?;
    let mut sum = me.lattice_vertex_local(rho);
    let mut weight_sum = 0.0_f32;

    for nb in graph.neighbours(node)? {
        let other = surfel(graph, nb)?;
        let weight = graph
            .edge_between(node, nb)
            .and_then(|eid| graph.edge(eid))
            .map_or(1.0, |e| e.data.weight());

        for (fi, fj) in me.shared_frames(other) {
            let fd_i = &me.frame_data[fi];
            let fd_j = &other.frame_data[fj];
            let v_i = LatticeVertex {
                position: fd_i.position,
                normal: fd_i.normal,
                tangent: me.tangent_in_frame(fd_i),
                origin: fd_i.position + fd_i.to_frame(&sum),
            };
            let v_j = LatticeVertex::from_surfel(other, fd_j, rho);
            let matched = best_rosy_vector_pair(&v_i.tangent, &v_i.normal, &v_j.tangent, &v_j.normal)?;
            let closest = compute_closest_lattice_points(&v_i, &v_j.with_tangent(matched.o_j), rho)?;

            let p_i = fd_i.to_local(&(closest.p_i - fd_i.position));
            let p_j = fd_i.to_local(&(closest.p_j - fd_i.position));
            sum = (p_i * weight_sum + p_j * weight) / (weight_sum + weight);
            sum = project_vector_to_plane(&sum, &local_normal());
            weight_sum += weight;
        }
    }

    let me = surfel(graph, node)?;
    let Some(offset) = settle_offset(node, me.local_to_lattice(&sum, rho)) else { return Ok(()) };
    if let Some(me) = graph.node_mut(node) {
        me.set_reference_lattice_offset(offset);
    }
    Ok(())
}

/// Labels and error of one edge without touching the graph.
///
/// `i` is always the lower handle. The error is the squared closest-pair
/// distance over every shared frame, in units of ρ².
pub fn edge_labels(
    graph: &WeightedGraph<Surfel, FieldEdge>,
    edge: EdgeId,
    rho: f32,
) -> Result<EdgeLabels> {
    let e = graph.edge(edge).ok_or_else(|| Error::NotFound(format!("Edge {edge}")))?;
    let (low, high) = e.ordered_endpoints();
    let s_low = surfel(graph, low)?;
    let s_high = surfel(graph, high)?;

    let mut k = None;
    let mut offsets = Vec::new();
    let mut error = 0.0;
    for (fi, fj) in s_low.shared_frames(s_high) {
        let fd_i = &s_low.frame_data[fi];
        let v_i = LatticeVertex::from_surfel(s_low, fd_i, rho);
        let v_j = LatticeVertex::from_surfel(s_high, &s_high.frame_data[fj], rho);
        let labelled = compute_tij_tji(&v_i, &v_j, rho)?;

        k.get_or_insert((labelled.k_ij, labelled.k_ji));
        offsets.push(FrameLatticeOffsets { frame: fd_i.frame(), t_ij: labelled.t_ij, t_ji: labelled.t_ji });
        error += labelled.closest.distance_sq / (rho * rho);
    }
    Ok(EdgeLabels { k, offsets, error })
}

/// Relabel one edge in place and return its error.
pub fn label_edge(graph: &mut WeightedGraph<Surfel, FieldEdge>, edge: EdgeId, rho: f32) -> Result<f32> {
    let labels = edge_labels(graph, edge, rho)?;
    if let Some(e) = graph.edge_mut(edge) {
        if let Some((k_ij, k_ji)) = labels.k {
            e.data.set_rosy_labels(k_ij, k_ji);
        }
        e.data.set_lattice_offsets(labels.offsets);
    }
    Ok(labels.error)
}

/// Relabel every edge of a tier; returns the tier's total PoSy error.
pub fn label_edges(graph: &mut WeightedGraph<Surfel, FieldEdge>, rho: f32) -> Result<f32> {
    let mut total = 0.0;
    for eid in graph.edge_ids() {
        total += label_edge(graph, eid, rho)?;
    }
    Ok(total)
}

/// Total PoSy error of a tier, without relabelling.
pub fn tier_error(graph: &WeightedGraph<Surfel, FieldEdge>, rho: f32) -> Result<f32> {
    let mut total = 0.0;
    for eid in graph.edge_ids() {
        total += edge_labels(graph, eid, rho)?.error;
    }
    Ok(total)
}

/// Sum of the errors of every edge incident to `node`.
pub fn node_error(graph: &WeightedGraph<Surfel, FieldEdge>, node: NodeId, rho: f32) -> Result<f32> {
    let mut total = 0.0;
    for eid in graph.edges_of(node)? {
        total += edge_labels(graph, eid, rho)?.error;
    }
    Ok(total)
}
