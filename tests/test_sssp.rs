use dsi_progress_logger::no_logging;
use rand::{rngs::SmallRng, Rng, SeedableRng};
use sparsegraph_algo::prelude::*;
use std::cmp::Reverse;
use std::collections::BinaryHeap;

fn dijkstra(graph: &Csr<u32>, source: NodeId) -> Vec<u32> {
    let mut dist = vec![u32::MAX; graph.num_nodes()];
    let mut heap = BinaryHeap::new();
    dist[source as usize] = 0;
    heap.push(Reverse((0u32, source)));
    while let Some(Reverse((d, u))) = heap.pop() {
        if d > dist[u as usize] {
            continue;
        }
        for e in graph.out_neighbors(u) {
            let nd = d + e.w;
            if nd < dist[e.v as usize] {
                dist[e.v as usize] = nd;
                heap.push(Reverse((nd, e.v)));
            }
        }
    }
    dist
}

fn random_weighted_graph(n: u32, arcs: usize, symmetric: bool, seed: u64) -> Csr<u32> {
    let mut rng = SmallRng::seed_from_u64(seed);
    let arcs: Vec<(NodeId, NodeId, u32)> = (0..arcs)
        .map(|_| (rng.gen_range(0..n), rng.gen_range(0..n), rng.gen_range(1..100)))
        .filter(|&(u, v, _)| u != v)
        .collect();
    if symmetric {
        Csr::from_undirected_weighted_arcs(n as usize, &arcs)
    } else {
        Csr::from_weighted_arcs(n as usize, &arcs, false)
    }
}

#[test]
fn test_weighted_five_cycle() {
    let graph = Csr::from_undirected_weighted_arcs(
        5,
        &[(0, 1, 1), (1, 2, 2), (2, 3, 3), (3, 4, 4), (4, 0, 5)],
    );
    for dists in [
        Sssp::new(&graph, RhoStepping::default()).sssp(0, no_logging![]),
        Sssp::new(&graph, DeltaStepping::default()).sssp(0, no_logging![]),
        Sssp::new(&graph, BellmanFord).sssp(0, no_logging![]),
    ] {
        assert_eq!(dists, vec![0, 1, 3, 5, 5]);
    }
}

#[test]
fn test_rho_stepping_matches_dijkstra() {
    for seed in 0..4 {
        let graph = random_weighted_graph(250, 1200, true, seed);
        let mut solver = Sssp::new(&graph, RhoStepping::new(64));
        for source in [0, 99] {
            assert_eq!(
                solver.sssp(source, no_logging![]),
                dijkstra(&graph, source),
                "seed {}",
                seed
            );
        }
    }
}

#[test]
fn test_delta_stepping_matches_dijkstra() {
    for seed in 4..8 {
        let graph = random_weighted_graph(250, 1200, true, seed);
        let mut solver = Sssp::new(&graph, DeltaStepping::new(16));
        for source in [3, 200] {
            assert_eq!(
                solver.sssp(source, no_logging![]),
                dijkstra(&graph, source),
                "seed {}",
                seed
            );
        }
    }
}

#[test]
fn test_bellman_ford_matches_dijkstra_directed() {
    for seed in 8..12 {
        let graph = random_weighted_graph(200, 800, false, seed);
        let mut solver = Sssp::new(&graph, BellmanFord);
        assert_eq!(solver.sssp(0, no_logging![]), dijkstra(&graph, 0), "seed {}", seed);
    }
}

#[test]
fn test_policies_agree_on_directed_graph() {
    let graph = random_weighted_graph(150, 600, false, 99);
    let rho = Sssp::new(&graph, RhoStepping::new(32)).sssp(5, no_logging![]);
    let delta = Sssp::new(&graph, DeltaStepping::new(8)).sssp(5, no_logging![]);
    let bf = Sssp::new(&graph, BellmanFord).sssp(5, no_logging![]);
    assert_eq!(rho, delta);
    assert_eq!(delta, bf);
}

#[test]
fn test_generated_weights_roundtrip() {
    // Deterministically weighted graph: both stepping runs see the
    // exact same inputs and must agree.
    let base = Csr::from_undirected_arcs(64, &(0..63).map(|i| (i, i + 1)).collect::<Vec<_>>());
    let graph = base.with_random_weights(1, 16);
    let a = Sssp::new(&graph, DeltaStepping::new(4)).sssp(0, no_logging![]);
    assert_eq!(a, dijkstra(&graph, 0));
}
