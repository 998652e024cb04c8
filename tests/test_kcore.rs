use dsi_progress_logger::no_logging;
use rand::{rngs::SmallRng, Rng, SeedableRng};
use sparsegraph_algo::prelude::*;

/// Sequential peeling: repeatedly remove a minimum-degree vertex.
fn peel_oracle(graph: &Csr<()>) -> Vec<u32> {
    let n = graph.num_nodes();
    let mut degree: Vec<u32> = (0..n).map(|u| graph.degree(u as NodeId) as u32).collect();
    let mut coreness = vec![0u32; n];
    let mut removed = vec![false; n];
    let mut level = 0u32;
    for _ in 0..n {
        let u = (0..n)
            .filter(|&u| !removed[u])
            .min_by_key(|&u| degree[u])
            .unwrap();
        level = level.max(degree[u]);
        coreness[u] = level;
        removed[u] = true;
        for e in graph.out_neighbors(u as NodeId) {
            if !removed[e.v as usize] {
                degree[e.v as usize] -= 1;
            }
        }
    }
    coreness
}

fn random_symmetric_graph(n: u32, arcs: usize, seed: u64) -> Csr<()> {
    let mut rng = SmallRng::seed_from_u64(seed);
    let arcs: Vec<(NodeId, NodeId)> = (0..arcs)
        .map(|_| (rng.gen_range(0..n), rng.gen_range(0..n)))
        .filter(|(u, v)| u != v)
        .collect();
    Csr::from_undirected_arcs(n as usize, &arcs)
}

#[test]
fn test_clique_of_four() {
    let graph = Csr::from_undirected_arcs(4, &[(0, 1), (0, 2), (0, 3), (1, 2), (1, 3), (2, 3)]);
    let mut solver = KCore::new(&graph);
    assert_eq!(solver.kcore(no_logging![]), vec![3, 3, 3, 3]);
}

#[test]
fn test_clique_with_pendant() {
    let graph = Csr::from_undirected_arcs(
        5,
        &[(0, 1), (0, 2), (0, 3), (1, 2), (1, 3), (2, 3), (0, 4)],
    );
    let mut solver = KCore::new(&graph);
    assert_eq!(solver.kcore(no_logging![]), vec![3, 3, 3, 3, 1]);
    assert_eq!(solver.max_core(), 3);
}

#[test]
fn test_random_graphs_against_peeling() {
    for seed in 0..5 {
        let graph = random_symmetric_graph(120, 500, seed);
        let mut solver = KCore::new(&graph);
        assert_eq!(solver.kcore(no_logging![]), peel_oracle(&graph), "seed {}", seed);
    }
}

#[test]
fn test_core_levels_spanning_a_stride() {
    // A clique of 30 plus a long path: coreness 29 forces the k-core
    // engine through several single-bucket windows.
    let mut arcs = Vec::new();
    for u in 0..30u32 {
        for v in (u + 1)..30 {
            arcs.push((u, v));
        }
    }
    for u in 30..300u32 {
        arcs.push((u - 1, u));
    }
    let graph = Csr::from_undirected_arcs(300, &arcs);
    let mut solver = KCore::new(&graph);
    let coreness = solver.kcore(no_logging![]);
    assert!(coreness[..30].iter().all(|&c| c == 29));
    assert!(coreness[31..].iter().all(|&c| c == 1));
    assert_eq!(solver.max_core(), 29);
}

#[test]
fn test_huge_star_takes_the_sampling_path() {
    // A hub of degree 20001 crosses the sample-mode threshold: its edge
    // removals are counted by the sampler and corrected by an exact
    // recount, never by 20001 individual decrements.
    let n = 20_002u32;
    let arcs: Vec<(NodeId, NodeId)> = (1..n).map(|v| (0, v)).collect();
    let graph = Csr::from_undirected_arcs(n as usize, &arcs);
    let mut solver = KCore::new(&graph);
    let coreness = solver.kcore(no_logging![]);
    assert!(coreness.iter().all(|&c| c == 1));
    assert_eq!(solver.max_core(), 1);
}

#[test]
fn test_every_vertex_keeps_its_core_membership() {
    // coreness[u] = max k such that u survives in the k-core: check by
    // re-peeling the subgraph induced by {v : coreness[v] >= k}.
    let graph = random_symmetric_graph(80, 300, 7);
    let mut solver = KCore::new(&graph);
    let coreness = solver.kcore(no_logging![]);
    let max_core = solver.max_core();
    for k in 1..=max_core {
        let members: Vec<bool> = coreness.iter().map(|&c| c >= k).collect();
        // Inside the k-core every member has at least k member-neighbours.
        for u in 0..graph.num_nodes() {
            if members[u] {
                let inside = graph
                    .out_neighbors(u as NodeId)
                    .iter()
                    .filter(|e| members[e.v as usize])
                    .count();
                assert!(
                    inside >= k as usize,
                    "vertex {} has {} neighbours in the {}-core",
                    u,
                    inside,
                    k
                );
            }
        }
    }
}
