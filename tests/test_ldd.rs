use dsi_progress_logger::no_logging;
use sparsegraph_algo::prelude::*;
use std::collections::VecDeque;
use std::sync::atomic::Ordering;

fn grid(side: u32) -> Csr<()> {
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
    Csr::from_undirected_arcs((side * side) as usize, &arcs)
}

fn cluster_diameter(graph: &Csr<()>, labels: &[NodeId], cluster: NodeId) -> usize {
    let members: Vec<NodeId> = (0..graph.num_nodes() as NodeId)
        .filter(|&v| labels[v as usize] == cluster)
        .collect();
    let mut diameter = 0;
    for &s in &members {
        // BFS restricted to the cluster.
        let mut dist = vec![usize::MAX; graph.num_nodes()];
        let mut queue = VecDeque::new();
        dist[s as usize] = 0;
        queue.push_back(s);
        while let Some(u) = queue.pop_front() {
            for e in graph.out_neighbors(u) {
                if labels[e.v as usize] == cluster && dist[e.v as usize] == usize::MAX {
                    dist[e.v as usize] = dist[u as usize] + 1;
                    diameter = diameter.max(dist[e.v as usize]);
                    queue.push_back(e.v);
                }
            }
        }
    }
    diameter
}

#[test]
fn test_grid_clusters_are_centre_balls() {
    let graph = grid(10);
    let n = graph.num_nodes();
    let mut ldd = Ldd::new(&graph, |_, _| true);
    let (label, _) = ldd.ldd(0.5, false, no_logging![]);
    let labels: Vec<NodeId> = label.iter().map(|l| l.load(Ordering::Relaxed)).collect();

    let mut clusters = labels.clone();
    clusters.sort_unstable();
    clusters.dedup();
    assert!(!clusters.is_empty());
    assert!(clusters.len() <= n);
    for &c in &clusters {
        // Every cluster label names one of its own members, and the
        // cluster is connected: a restricted BFS from any member must
        // cover it, so its diameter is finite and below n.
        assert_eq!(labels[c as usize], c);
        let members = labels.iter().filter(|&&l| l == c).count();
        let d = cluster_diameter(&graph, &labels, c);
        assert!(d < members, "cluster {} has diameter {}", c, d);
        let mut reached = vec![false; n];
        let mut queue = VecDeque::from([c]);
        reached[c as usize] = true;
        let mut count = 1;
        while let Some(u) = queue.pop_front() {
            for e in graph.out_neighbors(u) {
                if labels[e.v as usize] == c && !reached[e.v as usize] {
                    reached[e.v as usize] = true;
                    count += 1;
                    queue.push_back(e.v);
                }
            }
        }
        assert_eq!(count, members, "cluster {} is disconnected", c);
    }
}

#[test]
fn test_clusters_are_connected() {
    let graph = grid(8);
    let mut ldd = Ldd::new(&graph, |_, _| true);
    let (label, parent) = ldd.ldd(1.0, true, no_logging![]);
    let labels: Vec<NodeId> = label.iter().map(|l| l.load(Ordering::Relaxed)).collect();
    let parent = parent.unwrap();

    // Parent chains are monotone within a cluster and end at a centre.
    for v in 0..graph.num_nodes() as NodeId {
        let mut cur = v;
        let mut steps = 0;
        while parent[cur as usize] != cur {
            assert_eq!(labels[cur as usize], labels[parent[cur as usize] as usize]);
            cur = parent[cur as usize];
            steps += 1;
            assert!(steps <= graph.num_nodes(), "parent cycle at vertex {}", v);
        }
        assert_eq!(labels[v as usize], labels[cur as usize]);
    }
}
