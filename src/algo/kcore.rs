use super::frontier::LocalQueue;
use crate::graph::{Csr, NodeId};
use crate::utils::atomic::{fetch_and_add_bounded, hash64, log2_up, write_max};
use crate::utils::{HashBag, Sampler};
use dsi_progress_logger::ProgressLog;
use rayon::prelude::*;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use sux::bits::AtomicBitVec;

const LOG2_SINGLE_BUCKETS: u32 = 3;
const NUM_SINGLE_BUCKETS: u32 = 1 << LOG2_SINGLE_BUCKETS;
const NUM_INTERMEDIATE_BUCKETS: u32 = 6;
const BUCKET_MASK: u32 = NUM_SINGLE_BUCKETS - 1;
/// Degree levels covered by one pass over the bucket hierarchy.
pub const STRIDE: u32 = NUM_SINGLE_BUCKETS << NUM_INTERMEDIATE_BUCKETS;
/// Minimum expected degree reduction for a vertex to enter sample mode.
const SAMPLE_THRESHOLD: f64 = 2000.0;
const BLOCK_SIZE: usize = 1024;
const INIT_REDUCE_RATIO: f64 = 0.1;
const LOG2_ERROR_FACTOR: u32 = 32;
const LOCAL_QUEUE_SIZE: usize = 128;
const BIAS_FACTOR: f64 = 0.5;
const ERROR_RATE_TOLERANCE: f64 = 1e-10;
/// Baseline hit target: `LOG2_ERROR_FACTOR / INIT_REDUCE_RATIO^2`.
const EXP_HITS: u32 = 3200;

/// K-core decomposition by parallel peeling over hierarchical degree
/// buckets.
///
/// Remaining degrees are tracked in `coreness` and decremented with the
/// bounded fetch-and-add, which cannot drag a vertex below the level
/// currently being peeled. Very-high-degree vertices go into sample
/// mode: instead of counting every removed edge they count a Bernoulli
/// sample of them, and are recounted exactly once their sampler
/// saturates or the Chernoff bound on the estimate becomes too weak.
pub struct KCore<'a, W: Copy> {
    graph: &'a Csr<W>,
    buckets: Vec<HashBag>,
    counting_bag: HashBag,
    frontier: Vec<NodeId>,
    coreness: Vec<AtomicU32>,
    alive: AtomicBitVec,
    sample_mode: AtomicBitVec,
    samplers: Vec<Sampler>,
    max_core: AtomicU32,
    sampling: bool,
}

impl<'a, W: Copy + Send + Sync + Ord> KCore<'a, W> {
    pub fn new(graph: &'a Csr<W>) -> Self {
        let n = graph.num_nodes();
        Self {
            graph,
            buckets: (0..NUM_SINGLE_BUCKETS + NUM_INTERMEDIATE_BUCKETS)
                .map(|_| HashBag::new(n))
                .collect(),
            counting_bag: HashBag::new(n),
            frontier: vec![0; n],
            coreness: (0..n).map(|_| AtomicU32::new(0)).collect(),
            alive: AtomicBitVec::new(n),
            sample_mode: AtomicBitVec::new(n),
            samplers: (0..n).map(|_| Sampler::new(0, 0)).collect(),
            max_core: AtomicU32::new(0),
            sampling: false,
        }
    }

    /// The largest coreness seen by the last run.
    pub fn max_core(&self) -> u32 {
        self.max_core.load(Ordering::Relaxed)
    }

    /// Arms or disarms `v`'s sampler for peeling levels starting at `k`.
    /// `coreness[v]` must hold the exact remaining degree.
    fn set_sampler(&self, v: NodeId, k: u32) {
        let deg = self.coreness[v as usize].load(Ordering::Relaxed);
        let degf = deg as f64;
        if degf * INIT_REDUCE_RATIO >= SAMPLE_THRESHOLD
            && (k as f64) < degf * INIT_REDUCE_RATIO * BIAS_FACTOR
            && (EXP_HITS as f64) < (degf - k as f64) * (1.0 - INIT_REDUCE_RATIO)
        {
            self.sample_mode.set(v as usize, true, Ordering::Relaxed);
            let log_gap = log2_up((deg - k) as usize);
            let exp_hits = LOG2_ERROR_FACTOR * log_gap * log_gap / 2;
            let sample_rate = exp_hits as f64 / ((1.0 - INIT_REDUCE_RATIO) * degf);
            self.samplers[v as usize].reset_with(exp_hits, sample_rate);
        } else {
            self.sample_mode.set(v as usize, false, Ordering::Relaxed);
        }
    }

    /// Inserts `u` with remaining degree `d` into the hierarchy based at
    /// `base_k`: the matching single bucket for the first eight levels,
    /// otherwise the intermediate bucket of its top differing bit.
    fn add_to_bucket(&self, u: NodeId, d: u32, base_k: u32) {
        if d < base_k || d > (base_k | (STRIDE - 1)) {
            return;
        }
        if d < base_k + NUM_SINGLE_BUCKETS {
            self.buckets[(d & BUCKET_MASK) as usize].insert(u);
        } else {
            let diff_bit = 31 - (d ^ base_k).leading_zeros();
            self.buckets[(diff_bit - LOG2_SINGLE_BUCKETS + NUM_SINGLE_BUCKETS) as usize].insert(u);
        }
    }

    /// Re-buckets `u` after a decrement from `d + 1` to `d`, skipping
    /// the insert when both degrees map to the same intermediate bucket.
    fn move_bucket(&self, u: NodeId, d: u32, base_k: u32) {
        if d < base_k || d > (base_k | (STRIDE - 1)) {
            return;
        }
        if d < base_k + NUM_SINGLE_BUCKETS {
            self.buckets[(d & BUCKET_MASK) as usize].insert(u);
            return;
        }
        let diff_bit = 31 - (d ^ base_k).leading_zeros();
        let previous_diff_bit = 31 - ((d + 1) ^ base_k).leading_zeros();
        if diff_bit != previous_diff_bit {
            self.buckets[(diff_bit - LOG2_SINGLE_BUCKETS + NUM_SINGLE_BUCKETS) as usize].insert(u);
        }
    }

    /// Offers the removal of edge `(u, v)` to `v`'s sampler; on the
    /// saturation transition `v` is queued for an exact recount.
    fn sample_vertex(&self, u: NodeId, v: NodeId, counting_flag: &AtomicBool) {
        let n = self.graph.num_nodes() as u64;
        let h = hash64(u as u64 * n + v as u64) as u32;
        let mut callback = false;
        self.samplers[v as usize].sample(h, &mut callback);
        if callback {
            counting_flag.store(true, Ordering::Relaxed);
            self.counting_bag.insert(v);
        }
    }

    fn map_neighbors_sequential(
        &self,
        u: NodeId,
        base_k: u32,
        k: u32,
        counting_flag: &AtomicBool,
        queue: &mut LocalQueue<LOCAL_QUEUE_SIZE>,
    ) {
        for e in self.graph.out_neighbors(u) {
            let v = e.v;
            if self.coreness[v as usize].load(Ordering::Relaxed) > k {
                if self.sampling && self.sample_mode.get(v as usize, Ordering::Relaxed) {
                    self.sample_vertex(u, v, counting_flag);
                } else {
                    let (old, committed) = fetch_and_add_bounded(&self.coreness[v as usize], -1, k);
                    let d = old - 1;
                    if committed {
                        if d == k && queue.push(v) {
                        } else {
                            self.move_bucket(v, d, base_k);
                        }
                    }
                }
            }
        }
    }

    fn map_neighbors_parallel(&self, u: NodeId, base_k: u32, k: u32, counting_flag: &AtomicBool) {
        self.graph
            .out_neighbors(u)
            .par_iter()
            .with_min_len(BLOCK_SIZE)
            .for_each(|e| {
                let v = e.v;
                if self.coreness[v as usize].load(Ordering::Relaxed) > k {
                    if self.sampling && self.sample_mode.get(v as usize, Ordering::Relaxed) {
                        self.sample_vertex(u, v, counting_flag);
                    } else {
                        let (old, committed) =
                            fetch_and_add_bounded(&self.coreness[v as usize], -1, k);
                        if committed {
                            self.move_bucket(v, old - 1, base_k);
                        }
                    }
                }
            });
    }

    fn count_alive_neighbors(&self, u: NodeId) -> u32 {
        self.graph
            .out_neighbors(u)
            .par_iter()
            .with_min_len(BLOCK_SIZE)
            .filter(|e| self.alive.get(e.v as usize, Ordering::Relaxed))
            .count() as u32
    }

    /// The sampling-correction path: replaces `v`'s sampled estimate
    /// with an exact recount, re-buckets it and re-arms its sampler.
    fn count_vertex(&self, u: NodeId, k: u32, base_k: u32) {
        let was = self.coreness[u as usize].load(Ordering::Relaxed);
        let exact = self.count_alive_neighbors(u);
        self.coreness[u as usize].store(exact, Ordering::Relaxed);
        if exact < k {
            // The sampled estimate ran behind; the vertex may belong to
            // the level being peeled right now, but never to a lower one.
            let alive_last_round = self
                .graph
                .out_neighbors(u)
                .par_iter()
                .with_min_len(BLOCK_SIZE)
                .filter(|e| {
                    self.alive.get(e.v as usize, Ordering::Relaxed)
                        || self.coreness[e.v as usize].load(Ordering::Relaxed) == k
                })
                .count() as u32;
            if alive_last_round >= k {
                self.coreness[u as usize].store(k, Ordering::Relaxed);
                self.buckets[(k & BUCKET_MASK) as usize].insert(u);
            } else {
                panic!(
                    "k-core invariant violated at vertex {}: recount {} (was {}) \
                     at level {} with {} neighbours alive last round",
                    u, exact, was, k, alive_last_round
                );
            }
        } else {
            self.add_to_bucket(u, exact, base_k);
        }
        self.set_sampler(u, k);
    }

    /// Chernoff-style bound on the probability that `v`'s sampled degree
    /// estimate hides a drop below level `k`.
    fn check_sample_security(&self, v: NodeId, k: u32, sample_rate: f64) -> f64 {
        let deg = self.coreness[v as usize].load(Ordering::Relaxed) as f64;
        if deg * INIT_REDUCE_RATIO * BIAS_FACTOR < k as f64 {
            return 1.0;
        }
        let n_star = deg - k as f64;
        let hits = self.samplers[v as usize].num_hits().max(1) as f64;
        (-n_star * sample_rate + 2.0 * hits - hits * hits / (n_star * sample_rate)).exp()
    }

    /// Computes the coreness of every vertex.
    pub fn kcore(&mut self, pl: &mut impl ProgressLog) -> Vec<u32> {
        let n = self.graph.num_nodes();
        pl.expected_updates(Some(n));
        pl.start("Peeling vertices by degree level...");
        self.max_core.store(0, Ordering::Relaxed);
        self.alive.fill(true, Ordering::Relaxed);
        let graph = self.graph;
        self.coreness
            .par_iter()
            .enumerate()
            .for_each(|(i, c)| c.store(graph.degree(i as NodeId) as u32, Ordering::Relaxed));
        self.sampling = (0..n as NodeId)
            .into_par_iter()
            .any(|i| graph.degree(i) as f64 * INIT_REDUCE_RATIO >= SAMPLE_THRESHOLD);
        if self.sampling {
            let this = &*self;
            (0..n as NodeId).into_par_iter().for_each(|i| this.set_sampler(i, 0));
        }

        let mut remaining: Vec<NodeId> = (0..n as NodeId).collect();
        let mut base_k = 0u32;
        while !remaining.is_empty() {
            {
                let this = &*self;
                remaining.par_iter().for_each(|&v| {
                    this.add_to_bucket(
                        v,
                        this.coreness[v as usize].load(Ordering::Relaxed),
                        base_k,
                    );
                    if this.sampling && this.sample_mode.get(v as usize, Ordering::Relaxed) {
                        let rate = this.samplers[v as usize].exp_hits() as f64
                            / ((1.0 - INIT_REDUCE_RATIO)
                                * this.coreness[v as usize].load(Ordering::Relaxed) as f64);
                        if this.check_sample_security(v, base_k + STRIDE, rate)
                            >= ERROR_RATE_TOLERANCE
                        {
                            this.count_vertex(v, base_k, base_k);
                        }
                    }
                });
            }

            let mut offset_k = 0u32;
            for k in base_k..base_k + STRIDE {
                if k != base_k {
                    // Dump one intermediate bucket into the single tier
                    // when k crosses its power-of-two boundary.
                    for i in (0..NUM_INTERMEDIATE_BUCKETS).rev() {
                        let mask = (NUM_SINGLE_BUCKETS << i) - 1;
                        if k & mask == 0 {
                            offset_k += NUM_SINGLE_BUCKETS;
                            let bucket = (NUM_SINGLE_BUCKETS + i) as usize;
                            let size = {
                                let (buckets, frontier) = (&mut self.buckets, &mut self.frontier);
                                buckets[bucket].pack_into(frontier)
                            };
                            let this = &*self;
                            let window_base = base_k + offset_k;
                            this.frontier[..size].par_iter().for_each(|&u| {
                                this.add_to_bucket(
                                    u,
                                    this.coreness[u as usize].load(Ordering::Relaxed),
                                    window_base,
                                );
                            });
                            break;
                        }
                    }
                }
                let window_base = base_k + offset_k;
                loop {
                    let size = {
                        let coreness = &self.coreness;
                        let (buckets, frontier) = (&mut self.buckets, &mut self.frontier);
                        buckets[(k & BUCKET_MASK) as usize].pack_into_pred(frontier, |v| {
                            coreness[v as usize].load(Ordering::Relaxed) == k
                        })
                    };
                    if size == 0 {
                        break;
                    }
                    pl.update_with_count(size);
                    let counting_flag = AtomicBool::new(false);
                    {
                        let this = &*self;
                        this.frontier[..size].par_iter().with_min_len(1).for_each(|&f| {
                            let mut queue: LocalQueue<LOCAL_QUEUE_SIZE> = LocalQueue::new();
                            queue.push(f);
                            while let Some(u) = queue.pop() {
                                this.alive.set(u as usize, false, Ordering::Relaxed);
                                write_max(
                                    &this.max_core,
                                    this.coreness[u as usize].load(Ordering::Relaxed),
                                );
                                if this.graph.degree(u) < BLOCK_SIZE {
                                    this.map_neighbors_sequential(
                                        u,
                                        window_base,
                                        k,
                                        &counting_flag,
                                        &mut queue,
                                    );
                                } else {
                                    this.map_neighbors_parallel(u, window_base, k, &counting_flag);
                                }
                            }
                        });
                    }
                    if counting_flag.load(Ordering::Relaxed) {
                        let counting = self.counting_bag.pack();
                        let this = &*self;
                        counting
                            .par_iter()
                            .for_each(|&u| this.count_vertex(u, k, window_base));
                    }
                }
            }

            let alive = &self.alive;
            remaining = remaining
                .into_par_iter()
                .filter(|&v| alive.get(v as usize, Ordering::Relaxed))
                .collect();
            base_k += STRIDE;
        }

        pl.done();
        self.coreness
            .iter()
            .map(|c| c.load(Ordering::Relaxed))
            .collect()
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use dsi_progress_logger::no_logging;

    #[test]
    fn test_k4() {
        let g = Csr::from_undirected_arcs(4, &[(0, 1), (0, 2), (0, 3), (1, 2), (1, 3), (2, 3)]);
        let mut solver = KCore::new(&g);
        assert_eq!(solver.kcore(no_logging![]), vec![3, 3, 3, 3]);
        assert_eq!(solver.max_core(), 3);
    }

    #[test]
    fn test_k4_with_pendant() {
        let g = Csr::from_undirected_arcs(
            5,
            &[(0, 1), (0, 2), (0, 3), (1, 2), (1, 3), (2, 3), (0, 4)],
        );
        let mut solver = KCore::new(&g);
        assert_eq!(solver.kcore(no_logging![]), vec![3, 3, 3, 3, 1]);
        assert_eq!(solver.max_core(), 3);
    }

    #[test]
    fn test_path_peels_to_one() {
        let g = Csr::from_undirected_arcs(5, &[(0, 1), (1, 2), (2, 3), (3, 4)]);
        let mut solver = KCore::new(&g);
        assert_eq!(solver.kcore(no_logging![]), vec![1, 1, 1, 1, 1]);
    }

    #[test]
    fn test_isolated_vertices() {
        let g = Csr::from_undirected_arcs(4, &[(1, 2)]);
        let mut solver = KCore::new(&g);
        assert_eq!(solver.kcore(no_logging![]), vec![0, 1, 1, 0]);
    }

    #[test]
    fn test_two_triangles_with_bridge() {
        let g = Csr::from_undirected_arcs(
            6,
            &[(0, 1), (1, 2), (0, 2), (3, 4), (4, 5), (3, 5), (2, 3)],
        );
        let mut solver = KCore::new(&g);
        assert_eq!(solver.kcore(no_logging![]), vec![2; 6]);
        assert_eq!(solver.max_core(), 2);
    }
}
