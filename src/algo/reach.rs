use super::frontier::{self, LocalQueue};
use crate::graph::{Csr, NodeId};
use crate::utils::{HashBag, ResizableTable};
use rayon::prelude::*;
use std::sync::atomic::Ordering;
use sux::bits::AtomicBitVec;

pub const LOCAL_QUEUE_SIZE: usize = 512;
pub const BLOCK_SIZE: usize = 1024;
/// Sparse rounds switch to dense above `m / DENSE_EDGE_FRACTION` active
/// out-edges; dense rounds switch back below `n / SPARSE_FRACTION`
/// active vertices.
pub const DENSE_EDGE_FRACTION: usize = 10;
pub const SPARSE_FRACTION: usize = 20;

/// Single-source reachability with direction switching.
///
/// The solver owns its scratch state and can be reused across calls; the
/// result is a caller-provided visited bitmap.
pub struct Reach {
    bag: HashBag,
    frontier: Vec<NodeId>,
    dense_frontier: AtomicBitVec,
    pub num_rounds: usize,
}

impl Reach {
    pub fn new(n: usize) -> Self {
        Self {
            bag: HashBag::new(n),
            frontier: vec![0; n],
            dense_frontier: AtomicBitVec::new(n),
            num_rounds: 0,
        }
    }

    /// Fills `visited` with the vertices reachable from `source` in `g`.
    /// Dense (pull) rounds scan `gt`, the transpose of `g`; pass `g`
    /// itself for a symmetric graph.
    pub fn reach<W: Copy + Send + Sync + Ord>(
        &mut self,
        source: NodeId,
        g: &Csr<W>,
        gt: &Csr<W>,
        visited: &mut AtomicBitVec,
    ) {
        let n = g.num_nodes();
        let m = g.num_edges();
        visited.fill(false, Ordering::Relaxed);
        visited.set(source as usize, true, Ordering::Relaxed);
        self.frontier[0] = source;
        let mut frontier_size = 1usize;
        let mut sparse = true;
        self.num_rounds = 0;

        while frontier_size > 0 {
            self.num_rounds += 1;
            if sparse {
                let out_edges = frontier::out_degree_sum(g, &self.frontier[..frontier_size]);
                if frontier_size + out_edges > m / DENSE_EDGE_FRACTION {
                    frontier::sparse_to_dense(
                        &self.frontier[..frontier_size],
                        &mut self.dense_frontier,
                    );
                    sparse = false;
                }
            } else if frontier_size <= n / SPARSE_FRACTION {
                frontier_size =
                    frontier::dense_to_sparse(&self.dense_frontier, n, &mut self.frontier);
                sparse = true;
            }
            frontier_size = if sparse {
                self.sparse_visit(g, visited, frontier_size)
            } else {
                self.dense_visit(gt, visited)
            };
        }
    }

    fn sparse_visit<W: Copy + Send + Sync + Ord>(
        &mut self,
        g: &Csr<W>,
        visited: &AtomicBitVec,
        frontier_size: usize,
    ) -> usize {
        let bag = &self.bag;
        self.frontier[..frontier_size]
            .par_iter()
            .with_min_len(1)
            .for_each(|&f| {
                let deg_f = g.degree(f);
                if deg_f == 0 {
                    return;
                }
                if deg_f < LOCAL_QUEUE_SIZE {
                    let mut queue: LocalQueue<LOCAL_QUEUE_SIZE> = LocalQueue::new();
                    queue.push(f);
                    while let Some(u) = queue.pop() {
                        if g.degree(u) > LOCAL_QUEUE_SIZE {
                            // Too heavy to drain locally.
                            bag.insert(u);
                            break;
                        }
                        for e in g.out_neighbors(u) {
                            if !visited.swap(e.v as usize, true, Ordering::Relaxed)
                                && !queue.push(e.v)
                            {
                                bag.insert(e.v);
                            }
                        }
                    }
                    for &v in queue.leftovers() {
                        bag.insert(v);
                    }
                } else {
                    g.out_neighbors(f)
                        .par_iter()
                        .with_min_len(BLOCK_SIZE)
                        .for_each(|e| {
                            if !visited.swap(e.v as usize, true, Ordering::Relaxed) {
                                bag.insert(e.v);
                            }
                        });
                }
            });
        self.bag.pack_into(&mut self.frontier)
    }

    fn dense_visit<W: Copy + Send + Sync + Ord>(
        &mut self,
        gt: &Csr<W>,
        visited: &AtomicBitVec,
    ) -> usize {
        let n = gt.num_nodes();
        let dense_frontier = &self.dense_frontier;
        (0..n as NodeId)
            .into_par_iter()
            .with_min_len(BLOCK_SIZE)
            .for_each(|u| {
                if !visited.get(u as usize, Ordering::Relaxed) {
                    dense_frontier.set(u as usize, false, Ordering::Relaxed);
                    for e in gt.out_neighbors(u) {
                        if visited.get(e.v as usize, Ordering::Relaxed) {
                            visited.set(u as usize, true, Ordering::Relaxed);
                            dense_frontier.set(u as usize, true, Ordering::Relaxed);
                            break;
                        }
                    }
                } else {
                    dense_frontier.set(u as usize, false, Ordering::Relaxed);
                }
            });
        frontier::count_set(&self.dense_frontier, n)
    }
}

/// Multi-source reachability: each source propagates its own label, but
/// only along edges whose endpoints agree on an outer grouping relation.
///
/// Per-vertex label sets live in a [`ResizableTable`] keyed by vertex,
/// holding the *round-local* index of every source that reaches it. When
/// the table saturates mid-round the attempt is abandoned; the caller
/// grows the table and redrives from the original sources.
pub struct MultiReach {
    bag: HashBag,
    frontier: Vec<NodeId>,
    bits: AtomicBitVec,
    pub num_rounds: usize,
}

impl MultiReach {
    pub fn new(n: usize) -> Self {
        Self {
            bag: HashBag::new(n),
            frontier: vec![0; n],
            bits: AtomicBitVec::new(n),
            num_rounds: 0,
        }
    }

    /// Copies every label of `u` onto `v`. Returns whether any label was
    /// new, and how many pairs were visited (saturated to the local
    /// budget on overflow so callers stop draining).
    fn propagate(table: &ResizableTable, u: NodeId, v: NodeId) -> (bool, usize) {
        let mut changed = false;
        let mut num_pairs = 0;
        for u_label in table.values(u) {
            changed |= table.insert(v, u_label);
            if table.is_overfull() {
                return (false, LOCAL_QUEUE_SIZE);
            }
            num_pairs += 1;
        }
        (changed, num_pairs)
    }

    /// One attempt at the propagation. Returns `false` when the table
    /// overflowed; the table content is then unusable and the whole
    /// attempt must be redone after a resize.
    pub fn multi_reach<W, G>(
        &mut self,
        g: &Csr<W>,
        same_group: G,
        sources: &[NodeId],
        table: &ResizableTable,
    ) -> bool
    where
        W: Copy + Send + Sync + Ord,
        G: Fn(NodeId, NodeId) -> bool + Sync,
    {
        let mut frontier_size = sources.len();
        if frontier_size == 0 {
            return true;
        }
        assert!(table.capacity() > frontier_size);
        self.frontier[..frontier_size].copy_from_slice(sources);
        sources.par_iter().enumerate().for_each(|(i, &s)| {
            table.insert(s, i as u32);
        });
        self.num_rounds = 0;

        while frontier_size > 0 {
            self.num_rounds += 1;
            let round = self.num_rounds;
            {
                let bag = &self.bag;
                let bits = &self.bits;
                let spill = |v: NodeId| {
                    if !bits.swap(v as usize, true, Ordering::Relaxed) {
                        bag.insert(v);
                    }
                };
                self.frontier[..frontier_size]
                    .par_iter()
                    .enumerate()
                    .with_min_len(1)
                    .for_each(|(i, &f)| {
                        if g.degree(f) > LOCAL_QUEUE_SIZE {
                            g.out_neighbors(f).par_iter().for_each(|e| {
                                if same_group(f, e.v) {
                                    let suc = if round == 1 {
                                        table.insert(e.v, i as u32)
                                    } else {
                                        Self::propagate(table, f, e.v).0
                                    };
                                    if suc {
                                        spill(e.v);
                                    }
                                }
                            });
                        } else {
                            let mut queue: LocalQueue<LOCAL_QUEUE_SIZE> = LocalQueue::new();
                            queue.push(f);
                            let mut visited_pairs = 0usize;
                            while visited_pairs < LOCAL_QUEUE_SIZE {
                                let Some(u) = queue.peek() else { break };
                                if g.degree(u) > LOCAL_QUEUE_SIZE {
                                    // Leave it queued; the flush below
                                    // hands it to the bag.
                                    break;
                                }
                                queue.pop();
                                for e in g.out_neighbors(u) {
                                    if !same_group(u, e.v) {
                                        continue;
                                    }
                                    let suc = if round == 1 {
                                        visited_pairs += 1;
                                        table.insert(e.v, i as u32)
                                    } else {
                                        let (suc, pairs) = Self::propagate(table, u, e.v);
                                        visited_pairs += pairs;
                                        suc
                                    };
                                    if suc
                                        && (visited_pairs >= LOCAL_QUEUE_SIZE
                                            || !queue.push(e.v))
                                    {
                                        spill(e.v);
                                    }
                                }
                            }
                            for &v in queue.leftovers() {
                                spill(v);
                            }
                        }
                    });
            }
            if table.is_overfull() {
                return false;
            }
            frontier_size = self.bag.pack_into(&mut self.frontier);
            let bits = &self.bits;
            self.frontier[..frontier_size]
                .par_iter()
                .for_each(|&v| bits.set(v as usize, false, Ordering::Relaxed));
        }
        true
    }

    /// Runs [`multi_reach`](MultiReach::multi_reach) to completion,
    /// doubling the table and redriving from the original sources on
    /// every overflow. Returns the number of resizes.
    pub fn multi_reach_safe<W, G>(
        &mut self,
        g: &Csr<W>,
        same_group: G,
        sources: &[NodeId],
        table: &mut ResizableTable,
    ) -> usize
    where
        W: Copy + Send + Sync + Ord,
        G: Fn(NodeId, NodeId) -> bool + Sync,
    {
        let mut resizes = 0;
        while !self.multi_reach(g, &same_group, sources, table) {
            log::info!(
                "multi-reach table overflowed; growing {} -> {} and redriving",
                table.capacity(),
                table.capacity() * 4
            );
            // Discard the in-flight frontier along with the table content.
            self.bag.clear();
            self.bits.fill(false, Ordering::Relaxed);
            table.double_size();
            resizes += 1;
        }
        resizes
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_reach_directed() {
        let mut g = Csr::from_arcs(6, &[(0, 1), (1, 2), (2, 0), (2, 3), (4, 5)], false);
        g.make_inverse();
        let gt = g.transpose();
        let mut solver = Reach::new(6);
        let mut visited = AtomicBitVec::new(6);
        solver.reach(0, &g, &gt, &mut visited);
        let reached: Vec<bool> = (0..6).map(|i| visited.get(i, Ordering::Relaxed)).collect();
        assert_eq!(reached, vec![true, true, true, true, false, false]);
    }

    #[test]
    fn test_reach_reverse_direction() {
        let g = Csr::from_arcs(4, &[(0, 1), (1, 2), (3, 2)], false);
        let gt = g.transpose();
        let mut solver = Reach::new(4);
        let mut visited = AtomicBitVec::new(4);
        // Backward reachability: run on the transpose.
        solver.reach(2, &gt, &g, &mut visited);
        let reached: Vec<bool> = (0..4).map(|i| visited.get(i, Ordering::Relaxed)).collect();
        assert_eq!(reached, vec![true, true, true, true]);
    }

    #[test]
    fn test_multi_reach_labels_every_reachable_vertex() {
        // Two chains: 0 -> 1 -> 2 and 3 -> 4, all in one group.
        let g = Csr::from_arcs(5, &[(0, 1), (1, 2), (3, 4)], false);
        let mut solver = MultiReach::new(5);
        let table = ResizableTable::new(64);
        let sources = vec![0, 3];
        assert!(solver.multi_reach(&g, |_, _| true, &sources, &table));
        let s0: Vec<u32> = table.values(2).collect();
        assert_eq!(s0, vec![0]);
        let s1: Vec<u32> = table.values(4).collect();
        assert_eq!(s1, vec![1]);
        let mut s_both: Vec<u32> = table.values(0).collect();
        s_both.sort_unstable();
        assert_eq!(s_both, vec![0]);
    }

    #[test]
    fn test_multi_reach_respects_grouping() {
        let groups = [7u64, 7, 9];
        let g = Csr::from_arcs(3, &[(0, 1), (1, 2)], false);
        let mut solver = MultiReach::new(3);
        let table = ResizableTable::new(64);
        assert!(solver.multi_reach(
            &g,
            |u, v| groups[u as usize] == groups[v as usize],
            &[0],
            &table
        ));
        assert_eq!(table.values(1).count(), 1);
        assert_eq!(table.values(2).count(), 0);
    }

    #[test]
    fn test_multi_reach_safe_recovers_from_overflow() {
        // A complete bipartite-ish blob so every source reaches everyone.
        let n = 64u32;
        let arcs: Vec<(NodeId, NodeId)> = (0..n - 1).map(|i| (i, i + 1)).collect();
        let g = Csr::from_arcs(n as usize, &arcs, false);
        let mut solver = MultiReach::new(n as usize);
        // Deliberately undersized: 32 sources reaching ~64 vertices each.
        let mut table = ResizableTable::new(70);
        let sources: Vec<NodeId> = (0..32).collect();
        let resizes = solver.multi_reach_safe(&g, |_, _| true, &sources, &mut table);
        assert!(resizes >= 1);
        // Vertex n-1 is reached by every source.
        let mut labels: Vec<u32> = table.values(n - 1).collect();
        labels.sort_unstable();
        assert_eq!(labels, (0..32).collect::<Vec<_>>());
    }

    #[test]
    fn test_reach_num_rounds_recorded() {
        let g = Csr::from_undirected_arcs(3, &[(0, 1), (1, 2)]);
        let mut solver = Reach::new(3);
        let mut visited = AtomicBitVec::new(3);
        solver.reach(0, &g, &g, &mut visited);
        assert!(solver.num_rounds >= 2);
    }
}

