//! CSR construction from edge lists.

use super::{Csr, EdgeId, NodeId, WEdge};
use crate::utils::par;
use rayon::prelude::*;
use sync_cell_slice::SyncSlice;

/// An edge list keyed by source vertex.
pub type EdgeList<W> = Vec<(NodeId, WEdge<W>)>;

/// Sorts the edge list by (source, destination) and materialises the CSR
/// arrays: boundary indices seed the offsets, a reverse inclusive
/// min-scan fills the gaps left by empty vertices.
pub(crate) fn edgelist_to_csr<W: Copy + Send + Sync + Ord>(
    n: usize,
    mut edgelist: EdgeList<W>,
) -> (Vec<EdgeId>, Vec<WEdge<W>>) {
    let m = edgelist.len();
    edgelist.par_sort_unstable_by(|a, b| (a.0, a.1.v).cmp(&(b.0, b.1.v)));
    let edges: Vec<WEdge<W>> = edgelist.par_iter().map(|(_, e)| *e).collect();
    let mut offsets = vec![m; n + 1];
    {
        let offsets_sync = offsets.as_sync_slice();
        edgelist.par_iter().enumerate().for_each(|(i, (src, _))| {
            if i == 0 || edgelist[i - 1].0 != *src {
                // SAFETY: only the first edge of each source key writes,
                // so all written indices are distinct.
                unsafe { offsets_sync[*src as usize].set(i) };
            }
        });
    }
    par::suffix_min_inplace(&mut offsets);
    (offsets, edges)
}

impl<W: Copy + Send + Sync + Ord> Csr<W> {
    /// Builds a graph from an edge list. Parallel edges are kept;
    /// `symmetric` is a claim checked by [`validate`](Csr::validate), not
    /// enforced here.
    pub fn from_edge_list(n: usize, edgelist: EdgeList<W>, symmetric: bool) -> Self {
        let m = edgelist.len();
        let (offsets, edges) = edgelist_to_csr(n, edgelist);
        Self {
            n,
            m,
            symmetric,
            offsets,
            edges,
            in_offsets: Vec::new(),
            in_edges: Vec::new(),
        }
    }
}

impl Csr<()> {
    /// Convenience constructor from unweighted arcs.
    pub fn from_arcs(n: usize, arcs: &[(NodeId, NodeId)], symmetric: bool) -> Self {
        let edgelist = arcs.iter().map(|&(u, v)| (u, WEdge::to(v))).collect();
        Self::from_edge_list(n, edgelist, symmetric)
    }

    /// Builds the symmetric closure of an undirected arc list given with
    /// one arc per edge.
    pub fn from_undirected_arcs(n: usize, arcs: &[(NodeId, NodeId)]) -> Self {
        let edgelist = arcs
            .iter()
            .flat_map(|&(u, v)| [(u, WEdge::to(v)), (v, WEdge::to(u))])
            .collect();
        Self::from_edge_list(n, edgelist, true)
    }
}

impl Csr<u32> {
    /// Convenience constructor from weighted arcs.
    pub fn from_weighted_arcs(n: usize, arcs: &[(NodeId, NodeId, u32)], symmetric: bool) -> Self {
        let edgelist = arcs.iter().map(|&(u, v, w)| (u, WEdge::new(v, w))).collect();
        Self::from_edge_list(n, edgelist, symmetric)
    }

    /// Builds the symmetric closure of weighted undirected arcs.
    pub fn from_undirected_weighted_arcs(n: usize, arcs: &[(NodeId, NodeId, u32)]) -> Self {
        let edgelist = arcs
            .iter()
            .flat_map(|&(u, v, w)| [(u, WEdge::new(v, w)), (v, WEdge::new(u, w))])
            .collect();
        Self::from_edge_list(n, edgelist, true)
    }
}
