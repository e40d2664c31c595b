//! # Orientation Field Algebra (4-RoSy)
//!
//! A tangent is only defined up to a quarter turn about its normal. Matching
//! two tangents means picking the quarter turn on each side that makes them
//! as parallel as possible:
//!
//! ```text
//! A = { o_i, n_i × o_i }      B = { o_j, n_j × o_j }
//! (a, b) = argmax |A[a] · B[b]|
//! k_ij = a,  k_ji = b + 2 if A[a] · B[b] < 0
//! ```
//!
//! Smoothing folds every neighbour into a running weighted average, working
//! in the node's own local frame so the result is shared by all frames.

use serde::{Deserialize, Serialize};

use crate::graph::{NodeId, WeightedGraph};
use crate::model::geometry::{
    angle_between, check_non_zero, check_unit, local_normal, project_vector_to_plane,
    vector_by_rotating_around_n, Vector3, ZERO_TOLERANCE,
};
use crate::model::{FieldEdge, Surfel};
use crate::{Error, Result};

/// Result of matching two tangents under 4-fold symmetry.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RosyMatch {
    /// `o_i` rotated by `k_ij` quarter turns about `n_i`.
    pub o_i: Vector3,
    /// `o_j` rotated by `k_ji` quarter turns about `n_j`.
    pub o_j: Vector3,
    pub k_ij: u8,
    pub k_ji: u8,
    /// `|o_i · o_j|` of the chosen representatives.
    pub score: f32,
}

/// Find the quarter-turn representatives of `o_i` and `o_j` that best agree.
///
/// Normals must be unit length and tangents non-zero.
pub fn best_rosy_vector_pair(
    o_i: &Vector3,
    n_i: &Vector3,
    o_j: &Vector3,
    n_j: &Vector3,
) -> Result<RosyMatch> {
    check_unit(n_i, "n_i")?;
    check_unit(n_j, "n_j")?;
    check_non_zero(o_i, "o_i")?;
    check_non_zero(o_j, "o_j")?;

    let a = [*o_i, n_i.cross(o_i)];
    let b = [*o_j, n_j.cross(o_j)];

    let mut best_score = f32::NEG_INFINITY;
    let (mut best_a, mut best_b) = (0usize, 0usize);
    for (ia, va) in a.iter().enumerate() {
        for (ib, vb) in b.iter().enumerate() {
            let score = va.dot(vb).abs();
            if score > best_score {
                best_score = score;
                best_a = ia;
                best_b = ib;
            }
        }
    }

    let dp = a[best_a].dot(&b[best_b]);
    let k_ij = best_a as u8;
    let k_ji = if dp < 0.0 { best_b as u8 + 2 } else { best_b as u8 };

    Ok(RosyMatch {
        o_i: a[best_a],
        o_j: vector_by_rotating_around_n(o_j, n_j, k_ji as u32),
        k_ij,
        k_ji,
        score: best_score,
    })
}

/// Weighted combination of two tangents after quarter-turn matching,
/// re-projected into the plane of `n_i`. The result is not normalised.
pub fn average_rosy_vectors(
    o_i: &Vector3,
    n_i: &Vector3,
    w_i: f32,
    o_j: &Vector3,
    n_j: &Vector3,
    w_j: f32,
) -> Result<Vector3> {
    let matched = best_rosy_vector_pair(o_i, n_i, o_j, n_j)?;
    let sum = matched.o_i * w_i + matched.o_j * w_j;
    Ok(project_vector_to_plane(&sum, n_i))
}

/// Squared angle, in radians², between the best-matched representatives.
pub fn rosy_edge_error(o_i: &Vector3, n_i: &Vector3, o_j: &Vector3, n_j: &Vector3) -> Result<f32> {
    let matched = best_rosy_vector_pair(o_i, n_i, o_j, n_j)?;
    let theta = angle_between(&matched.o_i, &matched.o_j);
    Ok(theta * theta)
}

// ============================================================================
// Graph-level operations
// ============================================================================

/// Neighbour tangent and normal carried into `surfel`'s local frame, once per
/// frame both surfels were observed in.
fn neighbour_in_local_frame(surfel: &Surfel, other: &Surfel) -> Vec<(Vector3, Vector3)> {
    surfel
        .shared_frames(other)
        .into_iter()
        .map(|(fi, fj)| {
            let fd_i = &surfel.frame_data[fi];
            let fd_j = &other.frame_data[fj];
            let o_j = fd_i.to_local(&other.tangent_in_frame(fd_j));
            let n_j = fd_i.to_local(&fd_j.normal);
            (o_j, n_j)
        })
        .collect()
}

/// One Gauss–Seidel RoSy update of `node`: its tangent becomes the running
/// weighted average of itself and every neighbour, in neighbour order.
pub fn smooth_node(graph: &mut WeightedGraph<Surfel, FieldEdge>, node: NodeId) -> Result<()> {
    let surfel = graph.node(node).ok_or_else(|| Error::NotFound(format!("Node {node}")))?;
    let normal = local_normal();
    let mut tangent = surfel.tangent();
    let mut weight_sum = 1.0_f32;

    for nb in graph.neighbours(node)? {
        let Some(other) = graph.node(nb) else { continue };
        let weight = graph
            .edge_between(node, nb)
            .and_then(|eid| graph.edge(eid))
            .map_or(1.0, |e| e.data.weight());

        for (o_j, n_j) in neighbour_in_local_frame(surfel, other) {
            let averaged = average_rosy_vectors(&tangent, &normal, weight_sum, &o_j, &n_j, weight)?;
            if averaged.norm() > ZERO_TOLERANCE {
                tangent = averaged.normalize();
            }
            weight_sum += weight;
        }
    }

    let surfel = graph.node_mut(node).ok_or_else(|| Error::NotFound(format!("Node {node}")))?;
    surfel.set_tangent(tangent)
}

/// Error of one edge, measured in the first frame both endpoints share.
/// Edges without a shared frame contribute nothing.
pub fn edge_error(graph: &WeightedGraph<Surfel, FieldEdge>, a: NodeId, b: NodeId) -> Result<f32> {
    let sa = graph.node(a).ok_or_else(|| Error::NotFound(format!("Node {a}")))?;
    let sb = graph.node(b).ok_or_else(|| Error::NotFound(format!("Node {b}")))?;
    match neighbour_in_local_frame(sa, sb).first() {
        Some((o_j, n_j)) => rosy_edge_error(&sa.tangent(), &local_normal(), o_j, n_j),
        None => Ok(0.0),
    }
}

/// Sum of the errors of every edge incident to `node`.
pub fn node_error(graph: &WeightedGraph<Surfel, FieldEdge>, node: NodeId) -> Result<f32> {
    let mut total = 0.0;
    for nb in graph.neighbours(node)? {
        total += edge_error(graph, node, nb)?;
    }
    Ok(total)
}

/// Total RoSy error of a tier: the sum of every edge's error.
pub fn tier_error(graph: &WeightedGraph<Surfel, FieldEdge>) -> Result<f32> {
    let mut total = 0.0;
    for edge in graph.edges() {
        total += edge_error(graph, edge.from, edge.to)?;
    }
    Ok(total)
}

/// Store the quarter-turn labels of every edge, oriented lower handle first.
pub fn label_edges(graph: &mut WeightedGraph<Surfel, FieldEdge>) -> Result<()> {
    for eid in graph.edge_ids() {
        let Some(edge) = graph.edge(eid) else { continue };
        let (low, high) = edge.ordered_endpoints();
        let sl = graph.node(low).ok_or_else(|| Error::NotFound(format!("Node {low}")))?;
        let sh = graph.node(high).ok_or_else(|| Error::NotFound(format!("Node {high}")))?;
        let Some((o_j, n_j)) = neighbour_in_local_frame(sl, sh).first().copied() else {
            continue;
        };
        let matched = best_rosy_vector_pair(&sl.tangent(), &local_normal(), &o_j, &n_j)?;
        if let Some(edge) = graph.edge_mut(eid) {
            edge.data.set_rosy_labels(matched.k_ij, matched.k_ji);
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Vector2;
    use crate::test_helpers::{planar_grid, star};
    use proptest::prelude::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    const EPS: f32 = 1e-5;

    fn in_plane(theta: f32) -> Vector3 {
        Vector3::new(theta.cos(), theta.sin(), 0.0)
    }

    #[test]
    fn test_self_match_is_identity() {
        let n = Vector3::z();
        let o = in_plane(0.3);
        let m = best_rosy_vector_pair(&o, &n, &o, &n).unwrap();
        assert_eq!((m.k_ij, m.k_ji), (0, 0));
        assert!((m.score - 1.0).abs() < EPS);
    }

    #[test]
    fn test_quarter_turn_is_matched() {
        let n = Vector3::z();
        let o_i = in_plane(0.0);
        let o_j = in_plane(std::f32::consts::FRAC_PI_2);
        let m = best_rosy_vector_pair(&o_i, &n, &o_j, &n).unwrap();

        assert!((m.score - 1.0).abs() < EPS);
        assert!(m.o_i.dot(&m.o_j) > 0.999);
        assert!(rosy_edge_error(&o_i, &n, &o_j, &n).unwrap() < 1e-5);
    }

    #[test]
    fn test_opposite_vector_adds_half_turn_to_second() {
        let n = Vector3::z();
        let o = in_plane(0.0);
        let m = best_rosy_vector_pair(&o, &n, &(-o), &n).unwrap();
        assert_eq!((m.k_ij, m.k_ji), (0, 2));
        assert!((m.o_j - o).norm() < EPS);
    }

    #[test]
    fn test_preconditions() {
        let n = Vector3::z();
        let o = in_plane(0.0);
        assert!(matches!(
            best_rosy_vector_pair(&o, &(n * 2.0), &o, &n),
            Err(Error::InvalidArgument(_))
        ));
        assert!(matches!(
            best_rosy_vector_pair(&Vector3::zeros(), &n, &o, &n),
            Err(Error::InvalidArgument(_))
        ));
    }

    #[test]
    fn test_average_stays_in_first_plane() {
        let n_i = Vector3::z();
        let n_j = Vector3::new(0.0, 0.6, 0.8);
        let o_i = in_plane(0.2);
        let o_j = n_j.cross(&Vector3::x()).normalize();
        let avg = average_rosy_vectors(&o_i, &n_i, 1.0, &o_j, &n_j, 1.0).unwrap();
        assert!(avg.dot(&n_i).abs() < EPS);
        assert!(avg.norm() > 0.5);
    }

    #[test]
    fn test_average_with_zero_weight_keeps_first() {
        let n = Vector3::z();
        let avg = average_rosy_vectors(&in_plane(0.1), &n, 1.0, &in_plane(0.5), &n, 0.0).unwrap();
        assert!((avg - in_plane(0.1)).norm() < EPS);
    }

    #[test]
    fn test_smoothing_reduces_grid_error() {
        let mut rng = StdRng::seed_from_u64(21);
        let mut graph = planar_grid(5, 1.0, &mut rng);
        let before = tier_error(&graph).unwrap();

        for _ in 0..10 {
            for id in graph.node_ids() {
                smooth_node(&mut graph, id).unwrap();
            }
        }
        let after = tier_error(&graph).unwrap();
        assert!(after < before, "before {before}, after {after}");
    }

    #[test]
    fn test_smoothing_ignores_edge_insertion_order() {
        let leaves = [(0.6, Vector2::zeros()), (-0.35, Vector2::zeros()), (0.2, Vector2::zeros())];
        let (mut forward, centre) = star(&leaves, false);
        let (mut reversed, _) = star(&leaves, true);
        assert_eq!(forward.neighbours(centre).unwrap(), reversed.neighbours(centre).unwrap());

        smooth_node(&mut forward, centre).unwrap();
        smooth_node(&mut reversed, centre).unwrap();
        let (a, b) = (forward.node(centre).unwrap().tangent(), reversed.node(centre).unwrap().tangent());
        assert!((a - b).norm() < 1e-6, "{a:?} vs {b:?}");
    }

    #[test]
    fn test_label_edges_on_aligned_grid() {
        let mut rng = StdRng::seed_from_u64(2);
        let mut graph = planar_grid(3, 1.0, &mut rng);
        for id in graph.node_ids() {
            graph.node_mut(id).unwrap().set_tangent(Vector3::x()).unwrap();
        }
        label_edges(&mut graph).unwrap();
        for edge in graph.edges() {
            assert_eq!((edge.data.k_low(), edge.data.k_high()), (0, 0));
        }
        assert!(tier_error(&graph).unwrap() < 1e-4);
    }

    proptest! {
        /// The matched pair always points the same way, and the labels
        /// reproduce the returned representatives.
        #[test]
        fn prop_labels_reproduce_matched_vectors(
            ti in 0.0f32..std::f32::consts::TAU,
            tj in 0.0f32..std::f32::consts::TAU,
            tilt in -0.5f32..0.5,
        ) {
            let n_i = Vector3::z();
            let n_j = Vector3::new(0.0, tilt.sin(), tilt.cos());
            let o_i = in_plane(ti);
            let o_j = project_vector_to_plane(&in_plane(tj), &n_j).normalize();

            let m = best_rosy_vector_pair(&o_i, &n_i, &o_j, &n_j).unwrap();
            prop_assert!(m.k_ij < 4 && m.k_ji < 4);
            prop_assert!(m.o_i.dot(&m.o_j) >= 0.0);
            prop_assert!((m.o_i.dot(&m.o_j) - m.score).abs() < 1e-5);
            let ri = vector_by_rotating_around_n(&o_i, &n_i, m.k_ij as u32);
            let rj = vector_by_rotating_around_n(&o_j, &n_j, m.k_ji as u32);
            prop_assert!((ri - m.o_i).norm() < 1e-5);
            prop_assert!((rj - m.o_j).norm() < 1e-5);
        }

        /// Swapping the endpoints inverts the relative quarter turn, so the
        /// forward and backward labels of an edge describe the same rotation.
        #[test]
        fn prop_swapped_labels_are_inverse(
            ti in 0.0f32..std::f32::consts::TAU,
            delta in 0.05f32..1.5,
            quarter in 0u32..4,
        ) {
            let n = Vector3::z();
            let o_i = in_plane(ti);
            // stay away from the 45° ties where both matches score equally
            prop_assume!((delta - std::f32::consts::FRAC_PI_4).abs() > 0.05);
            let o_j = in_plane(ti + delta + quarter as f32 * std::f32::consts::FRAC_PI_2);

            let fwd = best_rosy_vector_pair(&o_i, &n, &o_j, &n).unwrap();
            let bwd = best_rosy_vector_pair(&o_j, &n, &o_i, &n).unwrap();
            let rel_fwd = (4 + fwd.k_ji as i32 - fwd.k_ij as i32) % 4;
            let rel_bwd = (4 + bwd.k_ji as i32 - bwd.k_ij as i32) % 4;
            prop_assert_eq!((rel_fwd + rel_bwd) % 4, 0);
        }
    }
}
