//! Fixtures shared by unit tests.

use rand::Rng;

use crate::field::SurfelGraph;
use crate::graph::NodeId;
use crate::model::{FieldEdge, FrameData, PixelInFrame, Surfel, SurfelBuilder, Vector2, Vector3};

/// `n × n` grid of surfels in the z = 0 plane of frame 0, normals on +Z,
/// 4-connected, with random tangents and lattice offsets.
pub fn planar_grid<R: Rng>(n: u32, spacing: f32, rng: &mut R) -> SurfelGraph {
    let mut graph = SurfelGraph::undirected();
    let mut ids: Vec<NodeId> = Vec::new();
    for y in 0..n {
        for x in 0..n {
            let position = Vector3::new(x as f32 * spacing, y as f32 * spacing, 0.0);
            let fd = FrameData::from_normal(PixelInFrame::new(x, y, 0), 1.0, Vector3::z(), position)
                .expect("unit normal");
            let surfel = SurfelBuilder::new(format!("s{x}_{y}"), rng)
                .with_frame(fd)
                .build()
                .expect("valid surfel");
            ids.push(graph.add_node(surfel));
        }
    }
    let at = |x: u32, y: u32| ids[(y * n + x) as usize];
    for y in 0..n {
        for x in 0..n {
            if x + 1 < n {
                graph.add_edge(at(x, y), at(x + 1, y), FieldEdge::default()).expect("grid edge");
            }
            if y + 1 < n {
                graph.add_edge(at(x, y), at(x, y + 1), FieldEdge::default()).expect("grid edge");
            }
        }
    }
    graph
}

/// Centre surfel with a leaf per entry of `leaves` (local tangent angle,
/// lattice offset), leaves on a ring of radius 1.1 in frame 0. Nodes are
/// always added centre first; `reverse_edges` flips the edge insertion order.
pub fn star(leaves: &[(f32, Vector2)], reverse_edges: bool) -> (SurfelGraph, NodeId) {
    let make = |i: usize, position: Vector3, angle: f32, offset: Vector2| {
        let fd = FrameData::from_normal(PixelInFrame::new(i as u32, 0, 0), 1.0, Vector3::z(), position)
            .expect("unit normal");
        Surfel::new(format!("s{i}"), vec![fd], Vector3::new(angle.cos(), 0.0, angle.sin()), offset)
            .expect("valid surfel")
    };
    let mut graph = SurfelGraph::undirected();
    let centre = graph.add_node(make(0, Vector3::zeros(), 0.0, Vector2::new(0.1, -0.1)));
    let mut ids: Vec<NodeId> = Vec::new();
    for (i, (angle, offset)) in leaves.iter().enumerate() {
        let theta = i as f32 * std::f32::consts::TAU / leaves.len() as f32;
        let position = Vector3::new(theta.cos(), theta.sin(), 0.0) * 1.1;
        ids.push(graph.add_node(make(i + 1, position, *angle, *offset)));
    }
    if reverse_edges {
        ids.reverse();
    }
    for id in ids {
        graph.add_edge(centre, id, FieldEdge::default()).expect("star edge");
    }
    (graph, centre)
}
