use super::frontier;
use crate::graph::{Csr, NodeId};
use crate::utils::atomic::write_min;
use crate::utils::HashBag;
use dsi_progress_logger::ProgressLog;
use rayon::prelude::*;
use std::sync::atomic::{AtomicU32, Ordering};
use sux::bits::AtomicBitVec;

/// Distance of an unreached vertex.
pub const DIST_MAX: u32 = u32::MAX;

/// Direction-switching parallel breadth-first search.
///
/// Rounds are level-synchronous: the frontier of round `r` holds exactly
/// the vertices at hop distance `r`. A sparse round pushes along the
/// frontier's out-edges into the hash-bag; a dense round pulls over
/// in-neighbours of still-unreached vertices. On an asymmetric graph the
/// inverse representation must be materialised before visiting.
pub struct Bfs<'a, W: Copy> {
    graph: &'a Csr<W>,
    bag: HashBag,
    frontier: Vec<NodeId>,
    dist: Vec<AtomicU32>,
    in_frontier: AtomicBitVec,
    in_next_frontier: AtomicBitVec,
}

pub const BLOCK_SIZE: usize = 1024;
/// A sparse round switches to dense when the frontier plus its out-edges
/// exceed `m / DENSE_EDGE_FRACTION`.
pub const DENSE_EDGE_FRACTION: usize = 10;
/// A dense round switches back to sparse below `n / SPARSE_FRACTION`
/// active vertices.
pub const SPARSE_FRACTION: usize = 20;

impl<'a, W: Copy + Send + Sync + Ord> Bfs<'a, W> {
    pub fn new(graph: &'a Csr<W>) -> Self {
        let n = graph.num_nodes();
        assert!(
            graph.has_inverse(),
            "BFS needs in-neighbors: symmetric input or make_inverse first"
        );
        Self {
            graph,
            bag: HashBag::new(n),
            frontier: vec![0; n],
            dist: (0..n).map(|_| AtomicU32::new(DIST_MAX)).collect(),
            in_frontier: AtomicBitVec::new(n),
            in_next_frontier: AtomicBitVec::new(n),
        }
    }

    /// Computes hop distances from `source`; `DIST_MAX` marks
    /// unreachable vertices.
    pub fn bfs(&mut self, source: NodeId, pl: &mut impl ProgressLog) -> Vec<u32> {
        let n = self.graph.num_nodes();
        let m = self.graph.num_edges();
        pl.expected_updates(Some(n));
        pl.start("Visiting graph with direction-switching BFS...");

        self.dist
            .par_iter()
            .for_each(|d| d.store(DIST_MAX, Ordering::Relaxed));
        self.dist[source as usize].store(0, Ordering::Relaxed);
        self.frontier[0] = source;
        let mut frontier_size = 1usize;
        let mut sparse = true;
        let mut round = 0u32;

        while frontier_size > 0 {
            let next_sparse = if sparse {
                let out_edges = frontier::out_degree_sum(self.graph, &self.frontier[..frontier_size]);
                if frontier_size + out_edges > m / DENSE_EDGE_FRACTION {
                    frontier::sparse_to_dense(
                        &self.frontier[..frontier_size],
                        &mut self.in_frontier,
                    );
                    false
                } else {
                    true
                }
            } else if frontier_size > n / SPARSE_FRACTION {
                false
            } else {
                frontier_size =
                    frontier::dense_to_sparse(&self.in_frontier, n, &mut self.frontier);
                true
            };

            pl.update_with_count(frontier_size);
            frontier_size = if next_sparse {
                self.sparse_relax(frontier_size)
            } else {
                self.dense_relax(round)
            };
            sparse = next_sparse;
            round += 1;
        }

        pl.done();
        self.dist.iter().map(|d| d.load(Ordering::Relaxed)).collect()
    }

    // Claimed vertices go straight to the bag: a round must expand one
    // distance level only, or the pull direction cannot tell frontier
    // members apart by distance.
    fn visit_neighbors_sequential(&self, u: NodeId) {
        let next = self.dist[u as usize].load(Ordering::Relaxed) + 1;
        for e in self.graph.out_neighbors(u) {
            if write_min(&self.dist[e.v as usize], next) {
                self.bag.insert(e.v);
            }
        }
    }

    fn visit_neighbors_parallel(&self, u: NodeId) {
        let next = self.dist[u as usize].load(Ordering::Relaxed) + 1;
        self.graph
            .out_neighbors(u)
            .par_iter()
            .with_min_len(BLOCK_SIZE)
            .for_each(|e| {
                if write_min(&self.dist[e.v as usize], next) {
                    self.bag.insert(e.v);
                }
            });
    }

    fn sparse_relax(&mut self, frontier_size: usize) -> usize {
        let this = &*self;
        this.frontier[..frontier_size]
            .par_iter()
            .with_min_len(1)
            .for_each(|&f| {
                if this.graph.degree(f) < BLOCK_SIZE {
                    this.visit_neighbors_sequential(f);
                } else {
                    this.visit_neighbors_parallel(f);
                }
            });
        self.bag.pack_into(&mut self.frontier)
    }

    fn dense_relax(&mut self, round: u32) -> usize {
        let n = self.graph.num_nodes();
        self.in_next_frontier.fill(false, Ordering::Relaxed);
        let dist = &self.dist;
        let in_next = &self.in_next_frontier;
        let graph = self.graph;
        (0..n as NodeId)
            .into_par_iter()
            .with_min_len(BLOCK_SIZE)
            .for_each(|u| {
                if dist[u as usize].load(Ordering::Relaxed) == DIST_MAX {
                    for e in graph.in_neighbors(u) {
                        if dist[e.v as usize].load(Ordering::Relaxed) == round {
                            dist[u as usize].store(round + 1, Ordering::Relaxed);
                            in_next.set(u as usize, true, Ordering::Relaxed);
                            break;
                        }
                    }
                }
            });
        std::mem::swap(&mut self.in_frontier, &mut self.in_next_frontier);
        frontier::count_set(&self.in_frontier, n)
    }
}
