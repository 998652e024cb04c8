use anyhow::Result;
use dsi_progress_logger::no_logging;
use rand::{rngs::SmallRng, Rng, SeedableRng};
use sparsegraph_algo::prelude::*;

struct Dsu(Vec<usize>);

impl Dsu {
    fn new(n: usize) -> Self {
        Dsu((0..n).collect())
    }

    fn find(&mut self, i: usize) -> usize {
        if self.0[i] == i {
            i
        } else {
            let r = self.find(self.0[i]);
            self.0[i] = r;
            r
        }
    }

    fn union(&mut self, a: usize, b: usize) {
        let (a, b) = (self.find(a), self.find(b));
        self.0[a] = b;
    }
}

fn random_symmetric_graph(n: u32, arcs: usize, seed: u64) -> Csr<()> {
    let mut rng = SmallRng::seed_from_u64(seed);
    let arcs: Vec<(NodeId, NodeId)> = (0..arcs)
        .map(|_| (rng.gen_range(0..n), rng.gen_range(0..n)))
        .filter(|(u, v)| u != v)
        .collect();
    Csr::from_undirected_arcs(n as usize, &arcs)
}

fn check_against_dsu(graph: &Csr<()>, labels: &[NodeId]) {
    let n = graph.num_nodes();
    let mut dsu = Dsu::new(n);
    for u in 0..n as NodeId {
        for e in graph.out_neighbors(u) {
            dsu.union(u as usize, e.v as usize);
        }
    }
    for u in 0..n {
        for v in 0..n {
            assert_eq!(
                labels[u] == labels[v],
                dsu.find(u) == dsu.find(v),
                "vertices {} and {}",
                u,
                v
            );
        }
    }
}

#[test]
fn test_random_graphs_against_dsu() -> Result<()> {
    for seed in 0..6 {
        // Sparse enough to leave several components.
        let graph = random_symmetric_graph(200, 150, seed);
        graph.validate()?;
        let labels = connectivity(&graph, 0.5, |_, _| true, no_logging![]);
        check_against_dsu(&graph, &labels);
    }
    Ok(())
}

#[test]
fn test_single_big_component() {
    let n = 500u32;
    let mut arcs: Vec<(NodeId, NodeId)> = (0..n - 1).map(|i| (i, i + 1)).collect();
    arcs.extend((0..n).step_by(7).map(|i| (0, i)));
    let graph = Csr::from_undirected_arcs(n as usize, &arcs);
    let labels = connectivity(&graph, 0.5, |_, _| true, no_logging![]);
    assert!(labels.iter().all(|&l| l == labels[0]));
}

#[test]
fn test_forest_spans_every_component() {
    for seed in 10..14 {
        let graph = random_symmetric_graph(150, 120, seed);
        let n = graph.num_nodes();
        let (labels, edges) = connectivity_with_forest(&graph, 0.5, |_, _| true, no_logging![]);

        // The tree edges alone must reproduce the same partition, with
        // exactly (n - #components) edges: a spanning forest.
        let mut dsu = Dsu::new(n);
        for &(u, v) in &edges {
            assert_eq!(labels[u as usize], labels[v as usize]);
            assert_ne!(
                dsu.find(u as usize),
                dsu.find(v as usize),
                "cycle in spanning forest (seed {})",
                seed
            );
            dsu.union(u as usize, v as usize);
        }
        let components = {
            let mut roots: Vec<usize> = (0..n).map(|i| dsu.find(i)).collect();
            roots.sort_unstable();
            roots.dedup();
            roots.len()
        };
        let mut label_roots = labels.clone();
        label_roots.sort_unstable();
        label_roots.dedup();
        assert_eq!(components, label_roots.len());
        assert_eq!(edges.len(), n - components);
    }
}

#[test]
fn test_forest_structure_matches_labels() {
    let graph = random_symmetric_graph(100, 80, 42);
    let forest = spanning_forest(&graph, 0.5, no_logging![]);
    let n = graph.num_nodes();
    assert_eq!(forest.vertex.len(), n);
    assert_eq!(forest.tree_offsets.len(), forest.num_trees + 1);
    assert_eq!(forest.tree_offsets[forest.num_trees] as usize, n);
    // Each tree holds one fewer edge than vertices.
    let mut total_edges = 0;
    for t in 0..forest.num_trees {
        let lo = forest.tree_offsets[t] as usize;
        let hi = forest.tree_offsets[t + 1] as usize;
        let tree_edges = (lo..hi)
            .map(|i| forest.graph.degree(i as NodeId))
            .sum::<usize>();
        assert_eq!(tree_edges, hi - lo - 1);
        total_edges += tree_edges;
    }
    assert_eq!(forest.graph.num_edges(), total_edges);
}
