use super::frontier::{self, LocalQueue};
use crate::graph::{Csr, NodeId};
use crate::utils::atomic::{hash32, write_min};
use crate::utils::HashBag;
use dsi_progress_logger::ProgressLog;
use rayon::prelude::*;
use std::sync::atomic::{AtomicU32, Ordering};
use sux::bits::AtomicBitVec;

/// Distance of an unreached vertex.
pub const DIST_MAX: u32 = u32::MAX;

pub const LOCAL_QUEUE_SIZE: usize = 128;
pub const BLOCK_SIZE: usize = 1024;
pub const NUM_SAMPLES: usize = 1024;
/// The frontier is sparse below `n / SPARSE_FRACTION` members.
pub const SPARSE_FRACTION: usize = 100;
/// Degree above which one vertex's relaxation forks.
const SEQ_DEGREE_LIMIT: usize = 10 * BLOCK_SIZE;

/// The live state a stepping policy may inspect to pick a threshold.
pub struct ThresholdContext<'a> {
    pub frontier: &'a [NodeId],
    pub frontier_size: usize,
    pub dist: &'a [AtomicU32],
    pub in_frontier: &'a AtomicBitVec,
    pub sparse: bool,
    pub num_nodes: usize,
}

/// The distance threshold rule is the only difference among the stepping
/// variants; everything else is the shared scaffold in [`Sssp`].
pub trait SteppingPolicy {
    /// Called once per run before the first round.
    fn reset(&mut self) {}

    /// The distance bound for the coming round; vertices above it are
    /// deferred to a later round.
    fn get_threshold(&mut self, ctx: ThresholdContext<'_>) -> u32;
}

/// Targets roughly `rho` units of work per round by picking a sampled
/// quantile of the frontier's distances.
pub struct RhoStepping {
    rho: usize,
    seed: u32,
}

impl RhoStepping {
    pub fn new(rho: usize) -> Self {
        Self { rho, seed: 0 }
    }
}

impl Default for RhoStepping {
    fn default() -> Self {
        Self::new(1 << 20)
    }
}

impl SteppingPolicy for RhoStepping {
    fn reset(&mut self) {
        self.seed = 0;
    }

    fn get_threshold(&mut self, ctx: ThresholdContext<'_>) -> u32 {
        if ctx.frontier_size <= self.rho {
            return if ctx.sparse {
                ctx.frontier
                    .par_iter()
                    .map(|&v| ctx.dist[v as usize].load(Ordering::Relaxed))
                    .max()
                    .unwrap_or(DIST_MAX)
            } else {
                DIST_MAX
            };
        }
        let mut sample_dist = [DIST_MAX; NUM_SAMPLES + 1];
        for (i, slot) in sample_dist.iter_mut().enumerate() {
            let h = hash32(self.seed.wrapping_add(i as u32));
            if ctx.sparse {
                let v = ctx.frontier[(h % ctx.frontier_size as u32) as usize];
                *slot = ctx.dist[v as usize].load(Ordering::Relaxed);
            } else {
                let v = h % ctx.num_nodes as u32;
                if ctx.in_frontier.get(v as usize, Ordering::Relaxed) {
                    *slot = ctx.dist[v as usize].load(Ordering::Relaxed);
                }
            }
        }
        self.seed = self.seed.wrapping_add(NUM_SAMPLES as u32 + 1);
        let id = (self.rho as f64 / ctx.frontier_size as f64 * NUM_SAMPLES as f64) as usize;
        sample_dist.sort_unstable();
        sample_dist[id.min(NUM_SAMPLES)]
    }
}

/// A monotone threshold advancing by a fixed `delta` per round.
pub struct DeltaStepping {
    delta: u32,
    thres: u32,
}

impl DeltaStepping {
    pub fn new(delta: u32) -> Self {
        Self { delta, thres: 0 }
    }
}

impl Default for DeltaStepping {
    fn default() -> Self {
        Self::new(1 << 15)
    }
}

impl SteppingPolicy for DeltaStepping {
    fn reset(&mut self) {
        self.thres = 0;
    }

    fn get_threshold(&mut self, _ctx: ThresholdContext<'_>) -> u32 {
        self.thres = self.thres.saturating_add(self.delta);
        self.thres
    }
}

/// Relaxes everything every round.
#[derive(Default)]
pub struct BellmanFord;

impl SteppingPolicy for BellmanFord {
    fn get_threshold(&mut self, _ctx: ThresholdContext<'_>) -> u32 {
        DIST_MAX
    }
}

/// Relaxation context shared by every task of one round.
struct RelaxCtx<'a> {
    graph: &'a Csr<u32>,
    dist: &'a [AtomicU32],
    bag: &'a HashBag,
    in_frontier: &'a AtomicBitVec,
    in_next_frontier: &'a AtomicBitVec,
    sparse: bool,
}

impl RelaxCtx<'_> {
    fn add_to_frontier(&self, v: NodeId) {
        let v = v as usize;
        if self.sparse {
            if !self.in_frontier.get(v, Ordering::Relaxed)
                && !self.in_next_frontier.swap(v, true, Ordering::Relaxed)
            {
                self.bag.insert(v as NodeId);
            }
        } else if !self.in_frontier.get(v, Ordering::Relaxed)
            && !self.in_next_frontier.get(v, Ordering::Relaxed)
        {
            self.in_next_frontier.set(v, true, Ordering::Relaxed);
        }
    }

    fn visit_neighbors_sequential(&self, u: NodeId, queue: &mut LocalQueue<LOCAL_QUEUE_SIZE>) {
        let neighbors = self.graph.out_neighbors(u);
        if self.graph.is_symmetric() {
            let mut min_dist = self.dist[u as usize].load(Ordering::Relaxed);
            for e in neighbors {
                let dv = self.dist[e.v as usize].load(Ordering::Relaxed);
                if dv != DIST_MAX {
                    min_dist = min_dist.min(dv.saturating_add(e.w));
                }
            }
            write_min(&self.dist[u as usize], min_dist);
        }
        let du = self.dist[u as usize].load(Ordering::Relaxed);
        for e in neighbors {
            if write_min(&self.dist[e.v as usize], du.saturating_add(e.w)) && !queue.push(e.v) {
                self.add_to_frontier(e.v);
            }
        }
    }

    fn visit_neighbors_parallel(&self, u: NodeId) {
        self.graph
            .out_neighbors(u)
            .par_chunks(BLOCK_SIZE)
            .for_each(|chunk| {
                if self.graph.is_symmetric() {
                    let mut min_dist = self.dist[u as usize].load(Ordering::Relaxed);
                    for e in chunk {
                        let dv = self.dist[e.v as usize].load(Ordering::Relaxed);
                        if dv != DIST_MAX {
                            min_dist = min_dist.min(dv.saturating_add(e.w));
                        }
                    }
                    if write_min(&self.dist[u as usize], min_dist) {
                        self.add_to_frontier(u);
                    }
                }
                let du = self.dist[u as usize].load(Ordering::Relaxed);
                for e in chunk {
                    if write_min(&self.dist[e.v as usize], du.saturating_add(e.w)) {
                        self.add_to_frontier(e.v);
                    }
                }
            });
    }
}

/// Single-source shortest paths by threshold-guarded rounds of edge
/// relaxation, switching between a sparse frontier in the hash-bag and a
/// dense membership bitmap.
pub struct Sssp<'a, P: SteppingPolicy> {
    graph: &'a Csr<u32>,
    policy: P,
    bag: HashBag,
    dist: Vec<AtomicU32>,
    frontier: Vec<NodeId>,
    in_frontier: AtomicBitVec,
    in_next_frontier: AtomicBitVec,
    frontier_size: usize,
    sparse: bool,
    sample_seed: u32,
}

impl<'a, P: SteppingPolicy> Sssp<'a, P> {
    pub fn new(graph: &'a Csr<u32>, policy: P) -> Self {
        let n = graph.num_nodes();
        Self {
            graph,
            policy,
            bag: HashBag::new(n),
            dist: (0..n).map(|_| AtomicU32::new(DIST_MAX)).collect(),
            frontier: vec![0; n],
            in_frontier: AtomicBitVec::new(n),
            in_next_frontier: AtomicBitVec::new(n),
            frontier_size: 0,
            sparse: true,
            sample_seed: n as u32,
        }
    }

    /// Computes shortest distances from `source`; `DIST_MAX` marks
    /// unreachable vertices.
    pub fn sssp(&mut self, source: NodeId, pl: &mut impl ProgressLog) -> Vec<u32> {
        let n = self.graph.num_nodes();
        pl.start("Relaxing in threshold-guarded rounds...");
        self.policy.reset();
        self.dist
            .par_iter()
            .for_each(|d| d.store(DIST_MAX, Ordering::Relaxed));
        self.in_frontier.fill(false, Ordering::Relaxed);
        self.in_next_frontier.fill(false, Ordering::Relaxed);

        self.dist[source as usize].store(0, Ordering::Relaxed);
        self.frontier[0] = source;
        self.frontier_size = 1;
        self.in_frontier.set(source as usize, true, Ordering::Relaxed);
        self.sparse = true;
        let sparse_limit = (n / SPARSE_FRACTION).max(1);

        while self.frontier_size > 0 {
            pl.update_with_count(self.frontier_size);
            self.frontier_size = if self.sparse {
                self.sparse_relax()
            } else {
                self.dense_relax(sparse_limit)
            };
            let next_sparse = self.frontier_size < sparse_limit;
            if !self.sparse && next_sparse {
                self.frontier_size =
                    frontier::dense_to_sparse(&self.in_frontier, n, &mut self.frontier);
            }
            // Sparse rounds leave the bitmap in sync, so sparse-to-dense
            // needs no conversion.
            self.sparse = next_sparse;
        }

        pl.done();
        self.dist.iter().map(|d| d.load(Ordering::Relaxed)).collect()
    }

    fn threshold(&mut self) -> u32 {
        let Self {
            policy,
            frontier,
            frontier_size,
            dist,
            in_frontier,
            sparse,
            graph,
            ..
        } = self;
        policy.get_threshold(ThresholdContext {
            frontier: &frontier[..*frontier_size],
            frontier_size: *frontier_size,
            dist,
            in_frontier,
            sparse: *sparse,
            num_nodes: graph.num_nodes(),
        })
    }

    fn relax_ctx(&self) -> RelaxCtx<'_> {
        RelaxCtx {
            graph: self.graph,
            dist: &self.dist,
            bag: &self.bag,
            in_frontier: &self.in_frontier,
            in_next_frontier: &self.in_next_frontier,
            sparse: self.sparse,
        }
    }

    fn sparse_relax(&mut self) -> usize {
        let threshold = self.threshold();
        {
            let ctx = self.relax_ctx();
            self.frontier[..self.frontier_size]
                .par_iter()
                .with_min_len(1)
                .for_each(|&f| {
                    ctx.in_frontier.set(f as usize, false, Ordering::Relaxed);
                    if ctx.dist[f as usize].load(Ordering::Relaxed) > threshold {
                        ctx.add_to_frontier(f);
                        return;
                    }
                    let mut queue: LocalQueue<LOCAL_QUEUE_SIZE> = LocalQueue::new();
                    queue.push(f);
                    while let Some(u) = queue.pop() {
                        if ctx.dist[u as usize].load(Ordering::Relaxed) > threshold {
                            ctx.add_to_frontier(u);
                            continue;
                        }
                        if ctx.graph.degree(u) < SEQ_DEGREE_LIMIT {
                            ctx.visit_neighbors_sequential(u, &mut queue);
                        } else {
                            ctx.visit_neighbors_parallel(u);
                        }
                    }
                });
        }
        std::mem::swap(&mut self.in_frontier, &mut self.in_next_frontier);
        self.bag.pack_into(&mut self.frontier)
    }

    fn dense_relax(&mut self, sparse_limit: usize) -> usize {
        let n = self.graph.num_nodes();
        loop {
            let in_frontier = &self.in_frontier;
            let estimate = frontier::estimate_active(n, NUM_SAMPLES, &mut self.sample_seed, |u| {
                in_frontier.get(u as usize, Ordering::Relaxed)
            });
            if estimate < sparse_limit {
                break;
            }
            let threshold = self.threshold();
            let ctx = self.relax_ctx();
            (0..n as NodeId)
                .into_par_iter()
                .with_min_len(1)
                .for_each(|u| {
                    if ctx.in_frontier.get(u as usize, Ordering::Relaxed) {
                        ctx.in_frontier.set(u as usize, false, Ordering::Relaxed);
                        if ctx.dist[u as usize].load(Ordering::Relaxed) > threshold {
                            ctx.add_to_frontier(u);
                        } else {
                            ctx.visit_neighbors_parallel(u);
                        }
                    }
                });
            std::mem::swap(&mut self.in_frontier, &mut self.in_next_frontier);
        }
        frontier::count_set(&self.in_frontier, n)
    }
}
