//! Shared fixtures for the end-to-end tests.
#![allow(dead_code)]

use rand::rngs::StdRng;
use rand::SeedableRng;
use surfel_fields::{
    FieldEdge, FrameData, NodeId, PixelInFrame, SurfelBuilder, SurfelGraph, Vector3,
};

pub fn rng(seed: u64) -> StdRng {
    StdRng::seed_from_u64(seed)
}

/// Surfel grid over `(x, y) -> (position, normal)`, 4-connected, observed in
/// every frame of `frames` (positions shifted by the frame index along z).
pub fn grid_with<F>(n: u32, frames: &[u32], rng: &mut StdRng, sample: F) -> SurfelGraph
where
    F: Fn(u32, u32) -> (Vector3, Vector3),
{
    let mut graph = SurfelGraph::undirected();
    let mut ids: Vec<NodeId> = Vec::new();
    for y in 0..n {
        for x in 0..n {
            let (position, normal) = sample(x, y);
            let frame_data = frames.iter().map(|f| {
                let shifted = position + Vector3::new(0.0, 0.0, *f as f32);
                FrameData::from_normal(PixelInFrame::new(x, y, *f), 1.0 + *f as f32, normal, shifted)
                    .unwrap()
            });
            let surfel = SurfelBuilder::new(format!("s{x}_{y}"), &mut *rng)
                .with_frames(frame_data)
                .build()
                .unwrap();
            ids.push(graph.add_node(surfel));
        }
    }
    for y in 0..n {
        for x in 0..n {
            let here = ids[(y * n + x) as usize];
            if x + 1 < n {
                graph.add_edge(here, ids[(y * n + x + 1) as usize], FieldEdge::default()).unwrap();
            }
            if y + 1 < n {
                graph.add_edge(here, ids[((y + 1) * n + x) as usize], FieldEdge::default()).unwrap();
            }
        }
    }
    graph
}

/// `n × n` grid in the z = 0 plane of frame 0, normals on +Z.
pub fn planar_grid(n: u32, spacing: f32, rng: &mut StdRng) -> SurfelGraph {
    grid_with(n, &[0], rng, |x, y| {
        (Vector3::new(x as f32 * spacing, y as f32 * spacing, 0.0), Vector3::z())
    })
}

/// Grid folded along `x = n / 2`: the right half tilts up by `angle` radians.
pub fn folded_grid(n: u32, angle: f32, rng: &mut StdRng) -> SurfelGraph {
    let hinge = (n / 2) as f32;
    grid_with(n, &[0], rng, move |x, y| {
        let x = x as f32;
        if x <= hinge {
            (Vector3::new(x, y as f32, 0.0), Vector3::z())
        } else {
            let d = x - hinge;
            let position = Vector3::new(hinge + d * angle.cos(), y as f32, d * angle.sin());
            let normal = Vector3::new(-angle.sin(), 0.0, angle.cos());
            (position, normal)
        }
    })
}

/// Path a-b-c-...; returns the graph and its handles in order.
pub fn path(len: usize) -> (surfel_fields::WeightedGraph<String, f32>, Vec<NodeId>) {
    let mut graph = surfel_fields::WeightedGraph::undirected();
    let ids: Vec<NodeId> = (0..len).map(|i| graph.add_node(((b'a' + i as u8) as char).to_string())).collect();
    for pair in ids.windows(2) {
        graph.add_edge(pair[0], pair[1], 1.0).unwrap();
    }
    (graph, ids)
}
