use super::frontier::{self, LocalQueue};
use crate::graph::{Csr, NodeId};
use crate::utils::atomic::hash32;
use crate::utils::HashBag;
use dsi_progress_logger::ProgressLog;
use rayon::prelude::*;
use std::sync::atomic::{AtomicU32, Ordering};
use sux::bits::AtomicBitVec;

/// Label of a vertex not yet claimed by any cluster.
pub const NODE_MAX: u32 = u32::MAX;

pub const LOCAL_QUEUE_SIZE: usize = 1024;
pub const BLOCK_SIZE: usize = 1024;
/// Number of potential cluster centres drawn up front.
pub const NUM_SAMPLES: usize = 1024;
/// Sparse rounds switch to dense above `m / DENSE_EDGE_FRACTION` active
/// out-edges.
pub const DENSE_EDGE_FRACTION: usize = 20;
/// Probes used to estimate the dense frontier's out-degree.
const DENSE_SAMPLE_HITS: usize = 50;
/// Below this size a dense frontier is packed and measured exactly.
const EXACT_MEASURE_SIZE: usize = 1 << 14;

/// Low-diameter decomposition.
///
/// Centres are activated in exponentially growing waves `⌊e^{kβ}⌋`; each
/// labelled vertex claims unlabelled neighbours with a CAS on the label,
/// so every cluster has expected radius `O(log n / β)`. In
/// spanning-forest mode the claiming edge is recorded as the vertex's
/// parent.
pub struct Ldd<'a, W: Copy, P> {
    graph: &'a Csr<W>,
    pred: P,
    bag: HashBag,
    frontier: Vec<NodeId>,
    in_frontier: AtomicBitVec,
    in_next_frontier: AtomicBitVec,
    frontier_size: usize,
    sparse: bool,
    threshold: usize,
}

impl<'a, W, P> Ldd<'a, W, P>
where
    W: Copy + Send + Sync + Ord,
    P: Fn(NodeId, NodeId) -> bool + Sync,
{
    /// `pred` filters the edge set: only edges it accepts are traversed.
    pub fn new(graph: &'a Csr<W>, pred: P) -> Self {
        let n = graph.num_nodes();
        Self {
            graph,
            pred,
            bag: HashBag::new(n),
            // Slack for duplicate centres drawn in one wave.
            frontier: vec![0; n + NUM_SAMPLES],
            in_frontier: AtomicBitVec::new(n),
            in_next_frontier: AtomicBitVec::new(n),
            frontier_size: 0,
            sparse: true,
            threshold: graph.num_edges() / DENSE_EDGE_FRACTION,
        }
    }

    /// Decomposes the graph. Returns per-vertex cluster labels and, in
    /// spanning-forest mode, the parent of every vertex (centres and
    /// unreached vertices are their own parent).
    pub fn ldd(
        &mut self,
        beta: f64,
        spanning_forest: bool,
        pl: &mut impl ProgressLog,
    ) -> (Vec<AtomicU32>, Option<Vec<NodeId>>) {
        let n = self.graph.num_nodes();
        pl.start(format!("Decomposing with beta = {}...", beta));
        let label: Vec<AtomicU32> = (0..n).map(|_| AtomicU32::new(NODE_MAX)).collect();
        let parent: Option<Vec<AtomicU32>> =
            spanning_forest.then(|| (0..n as NodeId).map(AtomicU32::new).collect());

        let perm: Vec<NodeId> = (0..NUM_SAMPLES)
            .map(|i| hash32((NUM_SAMPLES + i) as u32) % n as u32)
            .collect();
        let mut num_sampled = 0usize;
        let mut round = 0u32;
        self.frontier_size = 0;
        self.sparse = true;

        while self.frontier_size > 0 || num_sampled < NUM_SAMPLES {
            round += 1;
            let step_size = (f64::from(round) * beta).exp().floor() as usize;
            let work_size = step_size.min(NUM_SAMPLES - num_sampled);
            let wave = &perm[num_sampled..num_sampled + work_size];
            let mut num_new_centers = 0;
            if work_size > 0 {
                if self.sparse {
                    let centers: Vec<NodeId> = wave
                        .iter()
                        .copied()
                        .filter(|&u| label[u as usize].load(Ordering::Relaxed) == NODE_MAX)
                        .collect();
                    num_new_centers = centers.len();
                    self.frontier[self.frontier_size..self.frontier_size + num_new_centers]
                        .copy_from_slice(&centers);
                    centers
                        .par_iter()
                        .for_each(|&c| label[c as usize].store(c, Ordering::Relaxed));
                } else {
                    num_new_centers = wave
                        .par_iter()
                        .filter(|&&u| label[u as usize].load(Ordering::Relaxed) == NODE_MAX)
                        .count();
                    let in_frontier = &self.in_frontier;
                    wave.par_iter().for_each(|&u| {
                        if label[u as usize].load(Ordering::Relaxed) == NODE_MAX {
                            label[u as usize].store(u, Ordering::Relaxed);
                            in_frontier.set(u as usize, true, Ordering::Relaxed);
                        }
                    });
                }
            }
            self.frontier_size += num_new_centers;
            num_sampled += work_size;

            let next_sparse = self.judge(round);
            self.frontier_size = if next_sparse {
                self.sparse_update(&label, parent.as_deref())
            } else {
                self.dense_update(&label, parent.as_deref())
            };
            self.sparse = next_sparse;
            pl.update_with_count(self.frontier_size);
        }

        label.par_iter().enumerate().for_each(|(i, l)| {
            if l.load(Ordering::Relaxed) == NODE_MAX {
                l.store(i as NodeId, Ordering::Relaxed);
            }
        });
        pl.done();
        (
            label,
            parent.map(|p| p.into_iter().map(AtomicU32::into_inner).collect()),
        )
    }

    /// Picks the next round's direction, converting the frontier
    /// representation when the mode flips. Small dense frontiers are
    /// packed and measured exactly; larger ones are estimated from
    /// sampled members.
    fn judge(&mut self, round: u32) -> bool {
        let n = self.graph.num_nodes();
        let mut measured_exactly = false;
        if !self.sparse && self.frontier_size < EXACT_MEASURE_SIZE {
            self.frontier_size =
                frontier::dense_to_sparse(&self.in_frontier, n, &mut self.frontier);
            measured_exactly = true;
        }
        let front_out_edges = if self.sparse || measured_exactly {
            frontier::out_degree_sum(self.graph, &self.frontier[..self.frontier_size])
        } else {
            self.dense_sample(hash32(round))
        };
        let sparse_now = self.frontier_size + front_out_edges < self.threshold;
        if !measured_exactly && self.sparse != sparse_now {
            if sparse_now {
                self.frontier_size =
                    frontier::dense_to_sparse(&self.in_frontier, n, &mut self.frontier);
            } else {
                frontier::sparse_to_dense(
                    &self.frontier[..self.frontier_size],
                    &mut self.in_frontier,
                );
            }
        }
        sparse_now
    }

    fn dense_sample(&self, seed: u32) -> usize {
        let n = self.graph.num_nodes();
        let mut hits = 0usize;
        let mut out_edges = 0usize;
        let mut i = 0u32;
        while hits < DENSE_SAMPLE_HITS && (i as usize) < 16 * n {
            i += 1;
            let u = hash32(seed.wrapping_add(i)) % n as u32;
            if self.in_frontier.get(u as usize, Ordering::Relaxed) {
                hits += 1;
                out_edges += self.graph.degree(u);
            }
        }
        if hits == 0 {
            return 0;
        }
        self.frontier_size * (out_edges / hits)
    }

    fn sparse_update(&mut self, label: &[AtomicU32], parent: Option<&[AtomicU32]>) -> usize {
        let g = self.graph;
        let pred = &self.pred;
        let bag = &self.bag;
        let claim = |u: NodeId, v: NodeId, label_u: NodeId| -> bool {
            if pred(u, v)
                && label[v as usize]
                    .compare_exchange(NODE_MAX, label_u, Ordering::Relaxed, Ordering::Relaxed)
                    .is_ok()
            {
                if let Some(parent) = parent {
                    parent[v as usize].store(u, Ordering::Relaxed);
                }
                true
            } else {
                false
            }
        };
        self.frontier[..self.frontier_size]
            .par_iter()
            .with_min_len(1)
            .for_each(|&f| {
                if g.degree(f) > BLOCK_SIZE {
                    let label_f = label[f as usize].load(Ordering::Relaxed);
                    g.out_neighbors(f)
                        .par_iter()
                        .with_min_len(BLOCK_SIZE)
                        .for_each(|e| {
                            if claim(f, e.v, label_f) {
                                bag.insert(e.v);
                            }
                        });
                } else {
                    let mut queue: LocalQueue<LOCAL_QUEUE_SIZE> = LocalQueue::new();
                    queue.push(f);
                    while !queue.is_full() {
                        let Some(u) = queue.pop() else { break };
                        if g.degree(u) > BLOCK_SIZE {
                            bag.insert(u);
                            continue;
                        }
                        let label_u = label[u as usize].load(Ordering::Relaxed);
                        for e in g.out_neighbors(u) {
                            if claim(u, e.v, label_u) && !queue.push(e.v) {
                                bag.insert(e.v);
                            }
                        }
                    }
                    for &v in queue.leftovers() {
                        bag.insert(v);
                    }
                }
            });
        self.bag.pack_into(&mut self.frontier)
    }

    fn dense_update(&mut self, label: &[AtomicU32], parent: Option<&[AtomicU32]>) -> usize {
        let n = self.graph.num_nodes();
        let g = self.graph;
        let pred = &self.pred;
        let in_frontier = &self.in_frontier;
        let in_next_frontier = &self.in_next_frontier;
        (0..n as NodeId)
            .into_par_iter()
            .with_min_len(BLOCK_SIZE)
            .for_each(|u| {
                in_next_frontier.set(u as usize, false, Ordering::Relaxed);
                if label[u as usize].load(Ordering::Relaxed) == NODE_MAX {
                    for e in g.in_neighbors(u) {
                        if pred(u, e.v) && in_frontier.get(e.v as usize, Ordering::Relaxed) {
                            if let Some(parent) = parent {
                                parent[u as usize].store(e.v, Ordering::Relaxed);
                            }
                            label[u as usize]
                                .store(label[e.v as usize].load(Ordering::Relaxed), Ordering::Relaxed);
                            in_frontier.set(u as usize, true, Ordering::Relaxed);
                            in_next_frontier.set(u as usize, true, Ordering::Relaxed);
                            break;
                        }
                    }
                }
            });
        std::mem::swap(&mut self.in_frontier, &mut self.in_next_frontier);
        frontier::count_set(&self.in_frontier, n)
    }
}
