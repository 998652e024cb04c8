use super::reach::{MultiReach, Reach};
use crate::graph::{Csr, NodeId};
use crate::utils::atomic::write_max;
use crate::utils::{par, ResizableTable};
use dsi_progress_logger::ProgressLog;
use rand::{rngs::SmallRng, seq::SliceRandom, Rng, SeedableRng};
use rayon::prelude::*;
use std::sync::atomic::{AtomicU64, Ordering};
use sux::bits::AtomicBitVec;

/// Settled flag: once set, a vertex's SCC label is final.
pub const TOP_BIT: u64 = 1 << 63;
/// Growth rate of the doubling multi-search.
const BETA: f64 = 1.5;
/// The first reach is retried once when its SCC is smaller than
/// `n / FIRST_SCC_FRACTION`.
const FIRST_SCC_FRACTION: usize = 100_000;
/// Cap on the fresh-capacity term of the per-round table sizing.
const TABLE_CAP_LIMIT: usize = 6_000_000;

/// Strongly connected components over a graph and its transpose.
///
/// Vertices with equal settled labels (top bit set) form one SCC. The
/// driver trims trivial vertices, peels the largest SCC with a forward
/// and backward reach, then finishes with rounds of multi-source
/// searches whose source count doubles geometrically; each round's
/// forward/backward reachability sets are intersected through two hash
/// multimaps.
pub struct Scc<'a, W: Copy> {
    g: &'a Csr<W>,
    gt: &'a Csr<W>,
    label_offset: u64,
}

impl<'a, W: Copy + Send + Sync + Ord> Scc<'a, W> {
    /// `gt` must be the transpose of `g`.
    pub fn new(g: &'a Csr<W>, gt: &'a Csr<W>) -> Self {
        assert_eq!(g.num_nodes(), gt.num_nodes());
        assert_eq!(g.num_edges(), gt.num_edges());
        Self {
            g,
            gt,
            label_offset: 0,
        }
    }

    /// Settles every vertex with zero in- or out-degree as a singleton.
    fn trim1(&self, label: &[AtomicU64]) -> u64 {
        let zeros = par::pack(self.g.num_nodes(), |i| {
            (self.g.degree(i as NodeId) == 0 || self.gt.degree(i as NodeId) == 0)
                .then_some(i as NodeId)
        });
        zeros.par_iter().enumerate().for_each(|(i, &v)| {
            label[v as usize].store(i as u64 | TOP_BIT, Ordering::Relaxed);
        });
        zeros.len() as u64
    }

    /// Peels the SCC of one random non-trivial vertex; vertices reached
    /// in only one direction get an unsettled refinement label.
    fn first_reach(
        &self,
        label: &[AtomicU64],
        rng: &mut SmallRng,
        pl: &mut impl ProgressLog,
    ) -> usize {
        let n = self.g.num_nodes();
        let candidates = par::pack(n, |i| {
            (label[i].load(Ordering::Relaxed) & TOP_BIT == 0).then_some(i as NodeId)
        });
        if candidates.is_empty() {
            return 0;
        }
        let source = candidates[rng.gen_range(0..candidates.len())];
        pl.info(format_args!("first reach from source {}", source));
        let mut solver = Reach::new(n);
        let mut forward = AtomicBitVec::new(n);
        let mut backward = AtomicBitVec::new(n);
        solver.reach(source, self.g, self.gt, &mut forward);
        solver.reach(source, self.gt, self.g, &mut backward);
        let offset = self.label_offset;
        (0..n)
            .into_par_iter()
            .map(|i| {
                let fwd = forward.get(i, Ordering::Relaxed);
                let bwd = backward.get(i, Ordering::Relaxed);
                if fwd && bwd {
                    label[i].store(offset | TOP_BIT, Ordering::Relaxed);
                    1
                } else {
                    if label[i].load(Ordering::Relaxed) & TOP_BIT == 0 && (fwd || bwd) {
                        label[i].store(offset, Ordering::Relaxed);
                    }
                    0
                }
            })
            .sum()
    }

    /// Computes the SCC labels of every vertex.
    pub fn scc(&mut self, pl: &mut impl ProgressLog) -> Vec<u64> {
        let n = self.g.num_nodes();
        pl.start("Computing strongly connected components...");
        let label: Vec<AtomicU64> = (0..n).map(|_| AtomicU64::new(0)).collect();
        self.label_offset = 0;

        let n_trimmed = self.trim1(&label);
        self.label_offset += n_trimmed;
        pl.info(format_args!("trimmed {} trivial vertices", n_trimmed));

        let mut rng = SmallRng::seed_from_u64(n as u64);
        let n_first = self.first_reach(&label, &mut rng, pl);
        self.label_offset += 1;
        if n_first < n / FIRST_SCC_FRACTION {
            self.first_reach(&label, &mut rng, pl);
            self.label_offset += 1;
        }

        let mut perm: Vec<NodeId> = (0..n as NodeId).collect();
        perm.shuffle(&mut rng);
        let vertices: Vec<NodeId> = perm
            .into_iter()
            .filter(|&v| label[v as usize].load(Ordering::Relaxed) & TOP_BIT == 0)
            .collect();
        let n_remain = vertices.len();
        pl.info(format_args!("{} vertices remain unsettled", n_remain));

        let mut multi = MultiReach::new(n);
        let mut fwd_m = 1usize;
        let mut bwd_m = 1usize;
        let mut step = 2usize;
        let mut start = 0usize;
        while start < n_remain {
            let end = (start + step).min(n_remain);
            let sources: Vec<NodeId> = vertices[start..end]
                .iter()
                .copied()
                .filter(|&v| label[v as usize].load(Ordering::Relaxed) & TOP_BIT == 0)
                .collect();
            let fresh = (0.3 * n_remain as f64).ceil() as usize;
            let floor = sources.len() + 1;
            fwd_m = 2 * fresh
                .min(TABLE_CAP_LIMIT)
                .max((BETA * fwd_m as f64) as usize)
                .max(floor);
            bwd_m = 2 * fresh
                .min(TABLE_CAP_LIMIT)
                .max((BETA * bwd_m as f64) as usize)
                .max(floor);
            let mut fwd_table = ResizableTable::new(fwd_m);
            let mut bwd_table = ResizableTable::new(bwd_m);

            let same_group = |u: NodeId, v: NodeId| {
                label[u as usize].load(Ordering::Relaxed)
                    == label[v as usize].load(Ordering::Relaxed)
            };
            multi.multi_reach_safe(self.g, same_group, &sources, &mut fwd_table);
            multi.multi_reach_safe(self.gt, same_group, &sources, &mut bwd_table);
            fwd_m = fwd_table.size();
            bwd_m = bwd_table.size();

            // Membership-test the smaller side against the larger: a
            // vertex reached both ways from a source is in its SCC.
            let (smaller, larger) = if fwd_m <= bwd_m {
                (&fwd_table, &bwd_table)
            } else {
                (&bwd_table, &fwd_table)
            };
            let offset = self.label_offset;
            smaller.map(|k, v| {
                let value = offset + v as u64;
                if larger.contains(k, v) {
                    write_max(&label[k as usize], value | TOP_BIT);
                } else {
                    write_max(&label[k as usize], value);
                }
            });
            larger.map(|k, v| {
                write_max(&label[k as usize], offset + v as u64);
            });

            self.label_offset += sources.len() as u64;
            pl.update_with_count(end - start);
            start = end;
            step = (BETA * step as f64).floor() as usize;
        }

        pl.done();
        label.into_iter().map(AtomicU64::into_inner).collect()
    }
}

/// Number of strongly connected components given final labels.
pub fn num_sccs(labels: &[u64]) -> usize {
    let mut sorted = labels.to_vec();
    sorted.par_sort_unstable();
    sorted
        .par_iter()
        .enumerate()
        .filter(|&(i, &l)| i == 0 || sorted[i - 1] != l)
        .count()
}
