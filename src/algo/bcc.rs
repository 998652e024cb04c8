use super::connectivity::{connectivity, spanning_forest};
use crate::graph::{Csr, Forest, NodeId};
use crate::utils::atomic::{hash64, write_max, write_min};
use crate::utils::SparseTable;
use dsi_progress_logger::ProgressLog;
use rayon::prelude::*;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use sync_cell_slice::SyncSlice;

pub const NODE_MAX: NodeId = NodeId::MAX;
const TAG_MAX: u64 = u64::MAX;
const BLOCK_SIZE: usize = 1024;
/// Decomposition parameter of the underlying connectivity passes.
pub const BETA: f64 = 0.2;

/// Euler-tour tags: tour window `[first, last]` per vertex, the extreme
/// tour positions reachable from its subtree through non-tree edges, and
/// the tree parent.
pub struct TourTags {
    pub first: Vec<u64>,
    pub last: Vec<u64>,
    pub low: Vec<u64>,
    pub high: Vec<u64>,
    pub parent: Vec<NodeId>,
}

/// Builds the Euler-tour vertex order of a spanning forest.
///
/// Every tree edge becomes a paired couple of directed tour edges at
/// indices `2j` and `2j + 1`; each tour edge's successor is the reverse
/// of its predecessor in the source vertex's (stably sorted) adjacency.
/// The resulting circular lists are linearised with ~sqrt(tour) sampled
/// positions per tree: each sample walks to the next sample, the walk
/// lengths are scanned into positions, and the segments are emitted in
/// parallel. The final slot of every tree repeats its first vertex.
pub fn euler_tour(n: usize, forest: &Forest) -> Vec<NodeId> {
    let num_trees = forest.num_trees;
    let f = &forest.graph;
    let m = f.num_edges();

    let mut edgelist = vec![(0 as NodeId, 0 as NodeId); m * 2];
    let mut perms = vec![(0 as NodeId, 0u64); m * 2];
    {
        let edgelist_sync = edgelist.as_sync_slice();
        let perms_sync = perms.as_sync_slice();
        (0..f.num_nodes() as NodeId).into_par_iter().for_each(|i| {
            let u = forest.vertex[i as usize];
            let lo = f.offsets[i as usize];
            for (j, e) in f.out_neighbors(i).iter().enumerate() {
                let j = lo + j;
                // SAFETY: edge ranges are disjoint across sources.
                unsafe {
                    edgelist_sync[j * 2].set((u, e.v));
                    edgelist_sync[j * 2 + 1].set((e.v, u));
                    perms_sync[j * 2].set((u, (j * 2) as u64));
                    perms_sync[j * 2 + 1].set((e.v, (j * 2 + 1) as u64));
                }
            }
        });
    }
    // Stable: tour edges of one source keep their creation order.
    perms.par_sort_by_key(|p| p.0);

    let mut first_edge = vec![0u64; n];
    {
        let first_edge_sync = first_edge.as_sync_slice();
        perms.par_iter().enumerate().for_each(|(i, p)| {
            if i == 0 || perms[i - 1].0 != p.0 {
                // SAFETY: one writer per source vertex.
                unsafe { first_edge_sync[p.0 as usize].set(p.1) };
            }
        });
    }
    let mut link = vec![0u64; m * 2];
    {
        let link_sync = link.as_sync_slice();
        perms.par_iter().enumerate().for_each(|(i, p)| {
            let next = if i + 1 < m * 2 && p.0 == perms[i + 1].0 {
                perms[i + 1].1
            } else {
                first_edge[p.0 as usize]
            };
            // SAFETY: every tour edge has a unique reverse, so the
            // written indices are distinct.
            unsafe { link_sync[(p.1 ^ 1) as usize].set(next) };
        });
    }

    let tree_edge_range = |t: usize| {
        let lo = f.offsets[forest.tree_offsets[t] as usize];
        let hi = f.offsets[forest.tree_offsets[t + 1] as usize];
        (lo, hi)
    };

    let mut samples_offsets = vec![0usize; num_trees + 1];
    for t in 0..num_trees {
        let (lo, hi) = tree_edge_range(t);
        let edges_size = 2 * (hi - lo);
        samples_offsets[t + 1] = samples_offsets[t] + (edges_size as f64).sqrt() as usize;
    }
    let num_samples = samples_offsets[num_trees];

    let mut samples = vec![0u64; num_samples];
    let mut idx = vec![TAG_MAX; m * 2];
    {
        let samples_sync = samples.as_sync_slice();
        let idx_sync = idx.as_sync_slice();
        (0..num_trees).into_par_iter().for_each(|t| {
            let (lo, hi) = tree_edge_range(t);
            let edges_size = (2 * (hi - lo)) as u64;
            let base_edge = 2 * lo as u64;
            for j in samples_offsets[t]..samples_offsets[t + 1] {
                let position = if j == samples_offsets[t] {
                    base_edge
                } else {
                    let mut pos = hash64(j as u64) % edges_size;
                    // SAFETY (reads and writes): each tree touches only
                    // its own edge range and sample range.
                    while unsafe { idx_sync[(base_edge + pos) as usize].get() } != TAG_MAX {
                        pos = (pos + 1) % edges_size;
                    }
                    base_edge + pos
                };
                unsafe {
                    samples_sync[j].set(position);
                    idx_sync[position as usize].set(j as u64);
                }
            }
        });
    }

    // Each sample walks to the next one; the walk lengths become the
    // sample's offset inside its tree's final tour.
    let skip_to: Vec<(u64, u64)> = (0..num_samples)
        .into_par_iter()
        .map(|j| {
            let mut node = samples[j];
            let mut steps = 0u64;
            loop {
                node = link[node as usize];
                steps += 1;
                if idx[node as usize] != TAG_MAX {
                    return (idx[node as usize], steps);
                }
            }
        })
        .collect();

    let mut sample_positions = vec![0u64; num_samples];
    {
        let positions_sync = sample_positions.as_sync_slice();
        (0..num_trees).into_par_iter().for_each(|t| {
            let mut sum = 0u64;
            let mut cur = samples_offsets[t] as u64;
            for _ in samples_offsets[t]..samples_offsets[t + 1] {
                // SAFETY: the skip chain stays within this tree's range.
                unsafe { positions_sync[cur as usize].set(sum) };
                sum += skip_to[cur as usize].1;
                cur = skip_to[cur as usize].0;
            }
        });
    }

    let mut sizes = vec![0usize; num_trees + 1];
    for t in 0..num_trees {
        let (lo, hi) = tree_edge_range(t);
        sizes[t + 1] = sizes[t] + 2 * (hi - lo) + 1;
    }
    let mut order = vec![0 as NodeId; sizes[num_trees]];
    {
        let order_sync = order.as_sync_slice();
        (0..num_trees).into_par_iter().for_each(|t| {
            (samples_offsets[t]..samples_offsets[t + 1])
                .into_par_iter()
                .for_each(|j| {
                    let mut node = samples[j];
                    let mut cur = sample_positions[idx[node as usize] as usize];
                    loop {
                        // SAFETY: segments partition the tree's slice of
                        // `order`, the sentinel slot excluded.
                        unsafe {
                            order_sync[sizes[t] + cur as usize].set(edgelist[node as usize].0)
                        };
                        cur += 1;
                        node = link[node as usize];
                        if idx[node as usize] != TAG_MAX {
                            break;
                        }
                    }
                });
            let closing = if samples_offsets[t] != samples_offsets[t + 1] {
                edgelist[samples[samples_offsets[t]] as usize].0
            } else {
                forest.vertex[forest.tree_offsets[t] as usize]
            };
            unsafe { order_sync[sizes[t + 1] - 1].set(closing) };
        });
    }
    order
}

/// Tags every vertex with its tour window and reach bounds.
pub fn tagging<W: Copy + Send + Sync + Ord>(
    g: &Csr<W>,
    forest: &Forest,
    order: &[NodeId],
) -> TourTags {
    let n = g.num_nodes();
    let first: Vec<AtomicU64> = (0..n).map(|_| AtomicU64::new(TAG_MAX)).collect();
    let last: Vec<AtomicU64> = (0..n).map(|_| AtomicU64::new(0)).collect();
    let parent: Vec<AtomicU32> = (0..n as NodeId).map(AtomicU32::new).collect();

    order.par_iter().enumerate().for_each(|(i, &v)| {
        write_min(&first[v as usize], i as u64);
        write_max(&last[v as usize], i as u64);
    });

    let f = &forest.graph;
    (0..f.num_nodes() as NodeId).into_par_iter().for_each(|i| {
        let u = forest.vertex[i as usize];
        for e in f.out_neighbors(i) {
            let v = e.v;
            // The endpoint seen first on the tour is the parent.
            if first[u as usize].load(Ordering::Relaxed) < first[v as usize].load(Ordering::Relaxed)
            {
                parent[v as usize].store(u, Ordering::Relaxed);
            } else {
                parent[u as usize].store(v, Ordering::Relaxed);
            }
        }
    });

    let bounds: Vec<(AtomicU64, AtomicU64)> = (0..n)
        .map(|i| {
            let fi = first[i].load(Ordering::Relaxed);
            (AtomicU64::new(fi), AtomicU64::new(fi))
        })
        .collect();
    (0..n as NodeId).into_par_iter().for_each(|u| {
        g.out_neighbors(u)
            .par_iter()
            .with_min_len(BLOCK_SIZE)
            .for_each(|e| {
                let v = e.v;
                if u < v
                    && parent[u as usize].load(Ordering::Relaxed) != v
                    && parent[v as usize].load(Ordering::Relaxed) != u
                {
                    let fu = first[u as usize].load(Ordering::Relaxed);
                    let fv = first[v as usize].load(Ordering::Relaxed);
                    if fu < fv {
                        write_min(&bounds[v as usize].0, fu);
                        write_max(&bounds[u as usize].1, fv);
                    } else {
                        write_min(&bounds[u as usize].0, fv);
                        write_max(&bounds[v as usize].1, fu);
                    }
                }
            });
    });

    let window: Vec<(u64, u64)> = order
        .par_iter()
        .map(|&v| {
            (
                bounds[v as usize].0.load(Ordering::Relaxed),
                bounds[v as usize].1.load(Ordering::Relaxed),
            )
        })
        .collect();
    let st = SparseTable::new(window, (TAG_MAX, 0u64), |a, b| (a.0.min(b.0), a.1.max(b.1)));

    let lowhigh: Vec<(u64, u64)> = (0..n)
        .into_par_iter()
        .map(|i| {
            let fi = first[i].load(Ordering::Relaxed) as usize;
            let li = last[i].load(Ordering::Relaxed) as usize;
            st.query(fi, li + 1)
        })
        .collect();

    let unpack = |v: Vec<AtomicU64>| v.into_iter().map(AtomicU64::into_inner).collect();
    TourTags {
        first: unpack(first),
        last: unpack(last),
        low: lowhigh.iter().map(|p| p.0).collect(),
        high: lowhigh.iter().map(|p| p.1).collect(),
        parent: parent.into_iter().map(AtomicU32::into_inner).collect(),
    }
}

/// Fast biconnected components.
///
/// A spanning forest is Euler-toured and tagged; an edge survives the
/// skeleton filter unless it is a critical parent edge or a backward
/// non-tree edge, and connectivity over the filtered graph yields one
/// cluster per biconnected component. A component's full vertex set is
/// its cluster plus the cluster's head (see
/// [`component_heads`](FastBcc::component_heads)); the tree root of each
/// component always forms a root cluster that is not itself a BCC.
pub struct FastBcc<'a, W: Copy> {
    graph: &'a Csr<W>,
    tags: Option<TourTags>,
}

impl<'a, W: Copy + Send + Sync + Ord> FastBcc<'a, W> {
    pub fn new(graph: &'a Csr<W>) -> Self {
        assert!(graph.is_symmetric(), "biconnectivity expects a symmetric graph");
        Self { graph, tags: None }
    }

    /// Computes the cluster label of every vertex.
    pub fn biconnectivity(&mut self, pl: &mut impl ProgressLog) -> Vec<NodeId> {
        let forest = spanning_forest(self.graph, BETA, pl);
        pl.start("Building the Euler tour...");
        let order = euler_tour(self.graph.num_nodes(), &forest);
        pl.done();
        pl.start("Tagging tour windows...");
        let tags = tagging(self.graph, &forest, &order);
        pl.done();

        let critical = |u: NodeId, v: NodeId| {
            tags.first[u as usize] <= tags.low[v as usize]
                && tags.last[u as usize] >= tags.high[v as usize]
        };
        let backward = |u: NodeId, v: NodeId| {
            tags.first[u as usize] <= tags.first[v as usize]
                && tags.last[u as usize] >= tags.first[v as usize]
        };
        let parent = &tags.parent;
        let pred = |u: NodeId, v: NodeId| {
            if parent[v as usize] == u {
                !critical(u, v)
            } else if parent[u as usize] == v {
                !critical(v, u)
            } else {
                !backward(u, v) && !backward(v, u)
            }
        };
        let labels = connectivity(self.graph, BETA, pred, pl);
        self.tags = Some(tags);
        labels
    }

    /// For every cluster label, the cut vertex heading it (`NODE_MAX`
    /// for root clusters, which head their component instead).
    pub fn component_heads(&self, labels: &[NodeId]) -> Vec<NodeId> {
        let tags = self
            .tags
            .as_ref()
            .expect("component_heads comes after biconnectivity");
        let n = labels.len();
        let heads: Vec<AtomicU32> = (0..n).map(|_| AtomicU32::new(NODE_MAX)).collect();
        (0..n).into_par_iter().for_each(|i| {
            let p = tags.parent[i] as usize;
            if labels[p] != labels[i] {
                heads[labels[i] as usize].store(p as NodeId, Ordering::Relaxed);
            }
        });
        heads.into_iter().map(AtomicU32::into_inner).collect()
    }

    /// Number of biconnected components: distinct clusters minus the one
    /// root cluster each connected component contributes.
    pub fn num_bccs(&self, labels: &[NodeId], pl: &mut impl ProgressLog) -> usize {
        let cc = connectivity(self.graph, BETA, |_, _| true, pl);
        distinct(labels) - distinct(&cc)
    }
}

fn distinct(labels: &[NodeId]) -> usize {
    let mut sorted = labels.to_vec();
    sorted.par_sort_unstable();
    sorted
        .par_iter()
        .enumerate()
        .filter(|&(i, &l)| i == 0 || sorted[i - 1] != l)
        .count()
}

#[cfg(test)]
mod test {
    use super::*;
    use dsi_progress_logger::no_logging;
    use std::collections::BTreeSet;

    /// Reconstructs the BCC vertex sets from cluster labels and heads.
    fn bcc_sets(labels: &[NodeId], heads: &[NodeId]) -> BTreeSet<BTreeSet<NodeId>> {
        let mut clusters: std::collections::BTreeMap<NodeId, BTreeSet<NodeId>> = Default::default();
        for (v, &l) in labels.iter().enumerate() {
            clusters.entry(l).or_default().insert(v as NodeId);
        }
        clusters
            .into_iter()
            .filter(|(l, _)| heads[*l as usize] != NODE_MAX)
            .map(|(l, mut set)| {
                set.insert(heads[l as usize]);
                set
            })
            .collect()
    }

    fn sets(groups: &[&[NodeId]]) -> BTreeSet<BTreeSet<NodeId>> {
        groups.iter().map(|g| g.iter().copied().collect()).collect()
    }

    #[test]
    fn test_triangle_with_pendant() {
        let g = Csr::from_undirected_arcs(4, &[(0, 1), (1, 2), (2, 0), (2, 3)]);
        let mut bcc = FastBcc::new(&g);
        let labels = bcc.biconnectivity(no_logging![]);
        assert_eq!(bcc.num_bccs(&labels, no_logging![]), 2);
        let heads = bcc.component_heads(&labels);
        assert_eq!(
            bcc_sets(&labels, &heads),
            sets(&[&[0, 1, 2], &[2, 3]])
        );
    }

    #[test]
    fn test_path_every_edge_is_a_bcc() {
        let g = Csr::from_undirected_arcs(3, &[(0, 1), (1, 2)]);
        let mut bcc = FastBcc::new(&g);
        let labels = bcc.biconnectivity(no_logging![]);
        assert_eq!(bcc.num_bccs(&labels, no_logging![]), 2);
        let heads = bcc.component_heads(&labels);
        assert_eq!(bcc_sets(&labels, &heads), sets(&[&[0, 1], &[1, 2]]));
    }

    #[test]
    fn test_cycle_is_one_bcc() {
        let g = Csr::from_undirected_arcs(5, &[(0, 1), (1, 2), (2, 3), (3, 4), (4, 0)]);
        let mut bcc = FastBcc::new(&g);
        let labels = bcc.biconnectivity(no_logging![]);
        assert_eq!(bcc.num_bccs(&labels, no_logging![]), 1);
        let heads = bcc.component_heads(&labels);
        assert_eq!(bcc_sets(&labels, &heads), sets(&[&[0, 1, 2, 3, 4]]));
    }

    #[test]
    fn test_two_triangles_sharing_a_cut_vertex() {
        let g = Csr::from_undirected_arcs(
            5,
            &[(0, 1), (1, 2), (2, 0), (2, 3), (3, 4), (4, 2)],
        );
        let mut bcc = FastBcc::new(&g);
        let labels = bcc.biconnectivity(no_logging![]);
        assert_eq!(bcc.num_bccs(&labels, no_logging![]), 2);
        let heads = bcc.component_heads(&labels);
        assert_eq!(
            bcc_sets(&labels, &heads),
            sets(&[&[0, 1, 2], &[2, 3, 4]])
        );
    }

    #[test]
    fn test_k4_is_one_bcc() {
        let g = Csr::from_undirected_arcs(4, &[(0, 1), (0, 2), (0, 3), (1, 2), (1, 3), (2, 3)]);
        let mut bcc = FastBcc::new(&g);
        let labels = bcc.biconnectivity(no_logging![]);
        assert_eq!(bcc.num_bccs(&labels, no_logging![]), 1);
    }

    #[test]
    fn test_euler_tour_covers_every_tree_twice() {
        let g = Csr::from_undirected_arcs(4, &[(0, 1), (1, 2), (1, 3)]);
        let forest = spanning_forest(&g, BETA, no_logging![]);
        let order = euler_tour(4, &forest);
        // One tree of 4 vertices: 3 edges, tour length 2*3 + 1.
        assert_eq!(order.len(), 7);
        // Every vertex appears, and the tour closes on its first vertex.
        let distinct: BTreeSet<NodeId> = order.iter().copied().collect();
        assert_eq!(distinct, (0..4).collect());
        assert_eq!(order[0], order[6]);
        // Each vertex appears once per incident tree edge, plus one for
        // the closing sentinel.
        let tree_degree = [1usize, 3, 1, 1];
        for v in 0..4u32 {
            let expected = tree_degree[v as usize] + (order[0] == v) as usize;
            assert_eq!(order.iter().filter(|&&x| x == v).count(), expected);
        }
    }

    #[test]
    fn test_disconnected_components_stay_apart() {
        let g = Csr::from_undirected_arcs(6, &[(0, 1), (1, 2), (2, 0), (3, 4), (4, 5), (5, 3)]);
        let mut bcc = FastBcc::new(&g);
        let labels = bcc.biconnectivity(no_logging![]);
        assert_eq!(bcc.num_bccs(&labels, no_logging![]), 2);
        let heads = bcc.component_heads(&labels);
        assert_eq!(
            bcc_sets(&labels, &heads),
            sets(&[&[0, 1, 2], &[3, 4, 5]])
        );
    }
}
