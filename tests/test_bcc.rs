use dsi_progress_logger::no_logging;
use rand::{rngs::SmallRng, Rng, SeedableRng};
use sparsegraph_algo::prelude::*;
use std::collections::{BTreeMap, BTreeSet};

type VertexSets = BTreeSet<BTreeSet<NodeId>>;

/// Sequential Hopcroft-Tarjan biconnected components (vertex sets per
/// component, via the edge stack).
fn bcc_oracle(graph: &Csr<()>) -> VertexSets {
    fn dfs(
        graph: &Csr<()>,
        u: NodeId,
        parent: NodeId,
        time: &mut usize,
        disc: &mut [usize],
        low: &mut [usize],
        edge_stack: &mut Vec<(NodeId, NodeId)>,
        out: &mut VertexSets,
    ) {
        *time += 1;
        disc[u as usize] = *time;
        low[u as usize] = *time;
        for e in graph.out_neighbors(u) {
            let v = e.v;
            if v == parent {
                continue;
            }
            if disc[v as usize] == 0 {
                edge_stack.push((u, v));
                dfs(graph, v, u, time, disc, low, edge_stack, out);
                low[u as usize] = low[u as usize].min(low[v as usize]);
                if low[v as usize] >= disc[u as usize] {
                    let mut set = BTreeSet::new();
                    loop {
                        let (a, b) = edge_stack.pop().unwrap();
                        set.insert(a);
                        set.insert(b);
                        if (a, b) == (u, v) {
                            break;
                        }
                    }
                    out.insert(set);
                }
            } else if disc[v as usize] < disc[u as usize] {
                edge_stack.push((u, v));
                low[u as usize] = low[u as usize].min(disc[v as usize]);
            }
        }
    }

    let n = graph.num_nodes();
    let mut disc = vec![0; n];
    let mut low = vec![0; n];
    let mut time = 0;
    let mut edge_stack = Vec::new();
    let mut out = BTreeSet::new();
    for root in 0..n as NodeId {
        if disc[root as usize] == 0 {
            dfs(
                graph,
                root,
                NodeId::MAX,
                &mut time,
                &mut disc,
                &mut low,
                &mut edge_stack,
                &mut out,
            );
        }
    }
    out
}

/// Reconstructs the BCC vertex sets from cluster labels and heads.
fn bcc_sets(labels: &[NodeId], heads: &[NodeId]) -> VertexSets {
    let mut clusters: BTreeMap<NodeId, BTreeSet<NodeId>> = BTreeMap::new();
    for (v, &l) in labels.iter().enumerate() {
        clusters.entry(l).or_default().insert(v as NodeId);
    }
    clusters
        .into_iter()
        .filter(|(l, _)| heads[*l as usize] != NodeId::MAX)
        .map(|(l, mut set)| {
            set.insert(heads[l as usize]);
            set
        })
        .collect()
}

fn run_fast_bcc(graph: &Csr<()>) -> VertexSets {
    let mut bcc = FastBcc::new(graph);
    let labels = bcc.biconnectivity(no_logging![]);
    let heads = bcc.component_heads(&labels);
    bcc_sets(&labels, &heads)
}

fn random_simple_graph(n: u32, arcs: usize, seed: u64) -> Csr<()> {
    let mut rng = SmallRng::seed_from_u64(seed);
    let mut arcs: Vec<(NodeId, NodeId)> = (0..arcs)
        .map(|_| (rng.gen_range(0..n), rng.gen_range(0..n)))
        .filter(|(u, v)| u != v)
        .map(|(u, v)| (u.min(v), u.max(v)))
        .collect();
    arcs.sort_unstable();
    arcs.dedup();
    Csr::from_undirected_arcs(n as usize, &arcs)
}

#[test]
fn test_triangle_with_pendant() {
    let graph = Csr::from_undirected_arcs(4, &[(0, 1), (1, 2), (2, 0), (2, 3)]);
    let sets = run_fast_bcc(&graph);
    assert_eq!(sets.len(), 2);
    assert_eq!(sets, bcc_oracle(&graph));
}

#[test]
fn test_grid_is_one_bcc() {
    let side = 10u32;
    let mut arcs = Vec::new();
    for r in 0..side {
        for c in 0..side {
            let u = r * side + c;
            if c + 1 < side {
                arcs.push((u, u + 1));
            }
            if r + 1 < side {
                arcs.push((u, u + side));
            }
        }
    }
    let graph = Csr::from_undirected_arcs((side * side) as usize, &arcs);
    let sets = run_fast_bcc(&graph);
    assert_eq!(sets.len(), 1);
    assert_eq!(sets.iter().next().unwrap().len(), (side * side) as usize);
}

#[test]
fn test_random_graphs_against_hopcroft_tarjan() {
    for seed in 0..6 {
        let graph = random_simple_graph(60, 75, seed);
        assert_eq!(run_fast_bcc(&graph), bcc_oracle(&graph), "seed {}", seed);
    }
}

#[test]
fn test_chain_of_cycles() {
    // Cycles joined by bridges: every cycle and every bridge is a BCC.
    let mut arcs = Vec::new();
    for c in 0..5u32 {
        let base = c * 4;
        for i in 0..4 {
            arcs.push((base + i, base + (i + 1) % 4));
        }
        if c > 0 {
            arcs.push((base - 4, base));
        }
    }
    let graph = Csr::from_undirected_arcs(20, &arcs);
    let sets = run_fast_bcc(&graph);
    assert_eq!(sets.len(), 9);
    assert_eq!(sets, bcc_oracle(&graph));
}
