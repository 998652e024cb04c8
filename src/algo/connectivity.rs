use super::ldd::Ldd;
use crate::graph::{Csr, Forest, NodeId, WEdge};
use crate::utils::atomic::hash32;
use crate::utils::union_find::{Find, FindCompress, SpliceAtomicSplit, Unite, UniteRemCas};
use crate::utils::ResizableTable;
use dsi_progress_logger::ProgressLog;
use rayon::prelude::*;
use std::sync::atomic::{AtomicU32, Ordering};
use sync_cell_slice::SyncSlice;

const BLOCK_SIZE: usize = 1024;
const MODE_SAMPLES: usize = 10_000;

/// Estimates the most frequent label from a fixed number of hashed
/// probes. Connectivity skips the edges of this majority class: the LDD
/// pass has already collapsed it.
fn sample_max_label(label: &[AtomicU32]) -> NodeId {
    let n = label.len();
    let seed = hash32(n as u32 + 1);
    let mut samples: Vec<NodeId> = (0..MODE_SAMPLES)
        .map(|i| label[(hash32(seed.wrapping_add(i as u32)) % n as u32) as usize]
            .load(Ordering::Relaxed))
        .collect();
    samples.sort_unstable();
    let mut max_label = 0;
    let mut max_count = 0;
    let mut i = 0;
    while i < samples.len() {
        let mut j = 1;
        while i + j < samples.len() && samples[i + j] == samples[i] {
            j += 1;
        }
        if j > max_count {
            max_count = j;
            max_label = samples[i];
        }
        i += j;
    }
    max_label
}

fn connectivity_impl<W, P>(
    g: &Csr<W>,
    beta: f64,
    pred: P,
    want_forest: bool,
    pl: &mut impl ProgressLog,
) -> (Vec<NodeId>, Option<Vec<(NodeId, NodeId)>>)
where
    W: Copy + Send + Sync + Ord,
    P: Fn(NodeId, NodeId) -> bool + Sync,
{
    let n = g.num_nodes();
    let mut ldd = Ldd::new(g, &pred);
    let (label, ldd_parent) = ldd.ldd(beta, want_forest, pl);
    drop(ldd);

    pl.start("Uniting the remaining edges...");
    let max_label = sample_max_label(&label);
    let find = FindCompress;
    let unite = UniteRemCas::new(SpliceAtomicSplit, Some(FindCompress));
    let table = want_forest.then(|| ResizableTable::new(n.max(2)));

    (0..n as NodeId)
        .into_par_iter()
        .with_min_len(1)
        .for_each(|i| {
            if find.find(label[i as usize].load(Ordering::Relaxed), &label)
                != find.find(max_label, &label)
            {
                g.out_neighbors(i)
                    .par_iter()
                    .with_min_len(BLOCK_SIZE)
                    .for_each(|e| {
                        if pred(i, e.v) && unite.unite(i, e.v, &label).is_some() {
                            if let Some(table) = &table {
                                table.insert(i, e.v);
                            }
                        }
                    });
            }
        });

    label.par_iter().for_each(|l| {
        l.store(find.find(l.load(Ordering::Relaxed), &label), Ordering::Relaxed);
    });
    pl.done();

    let forest_edges = want_forest.then(|| {
        let ldd_parent = ldd_parent.expect("forest mode runs LDD with parents");
        let mut edges: Vec<(NodeId, NodeId)> = ldd_parent
            .par_iter()
            .enumerate()
            .filter(|&(i, &p)| p != i as NodeId)
            .map(|(i, &p)| (i as NodeId, p))
            .collect();
        edges.extend(table.expect("forest mode allocates the edge table").entries());
        edges
    });
    let labels = label
        .into_iter()
        .map(AtomicU32::into_inner)
        .collect();
    (labels, forest_edges)
}

/// Connected components of the (optionally edge-filtered) graph: a
/// low-diameter decomposition collapses most of the graph, a Rem-CAS
/// union-find pass finishes the rest. Vertices share a final label iff
/// they are connected through edges accepted by `pred`.
pub fn connectivity<W, P>(
    g: &Csr<W>,
    beta: f64,
    pred: P,
    pl: &mut impl ProgressLog,
) -> Vec<NodeId>
where
    W: Copy + Send + Sync + Ord,
    P: Fn(NodeId, NodeId) -> bool + Sync,
{
    connectivity_impl(g, beta, pred, false, pl).0
}

/// Like [`connectivity`], also returning one spanning-tree edge set:
/// the LDD parent edges plus the edges whose unite calls won.
pub fn connectivity_with_forest<W, P>(
    g: &Csr<W>,
    beta: f64,
    pred: P,
    pl: &mut impl ProgressLog,
) -> (Vec<NodeId>, Vec<(NodeId, NodeId)>)
where
    W: Copy + Send + Sync + Ord,
    P: Fn(NodeId, NodeId) -> bool + Sync,
{
    let (labels, edges) = connectivity_impl(g, beta, pred, true, pl);
    (labels, edges.unwrap())
}

/// Builds a spanning forest with vertices rebound to tree-local indices,
/// the shape the Euler-tour construction consumes.
pub fn spanning_forest<W>(g: &Csr<W>, beta: f64, pl: &mut impl ProgressLog) -> Forest
where
    W: Copy + Send + Sync + Ord,
{
    let n = g.num_nodes();
    let (labels, edges) = connectivity_with_forest(g, beta, |_, _| true, pl);

    let mut vertex: Vec<NodeId> = (0..n as NodeId).collect();
    vertex.par_sort_unstable_by_key(|&v| (labels[v as usize], v));
    let mut tree_offsets: Vec<NodeId> = (0..n)
        .into_par_iter()
        .filter(|&i| i == 0 || labels[vertex[i] as usize] != labels[vertex[i - 1] as usize])
        .map(|i| i as NodeId)
        .collect();
    let num_trees = tree_offsets.len();
    tree_offsets.push(n as NodeId);

    let mut rank = vec![0 as NodeId; n];
    {
        let rank_sync = rank.as_sync_slice();
        vertex.par_iter().enumerate().for_each(|(i, &v)| {
            // SAFETY: `vertex` is a permutation, all targets distinct.
            unsafe { rank_sync[v as usize].set(i as NodeId) };
        });
    }

    let edgelist = edges
        .par_iter()
        .map(|&(u, v)| (rank[u as usize], WEdge::to(v)))
        .collect();
    let graph = Csr::from_edge_list(n, edgelist, false);

    Forest {
        num_trees,
        graph,
        vertex,
        tree_offsets,
    }
}
