//! The static graph representation: a build-once, read-many CSR with an
//! optional materialised inverse for pull-direction traversals.

mod build;

pub use build::EdgeList;

use crate::utils::atomic::hash32;
use anyhow::{ensure, Result};
use rayon::prelude::*;

pub type NodeId = u32;
pub type EdgeId = usize;

/// A destination vertex together with its edge payload.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub struct WEdge<W: Copy> {
    pub v: NodeId,
    pub w: W,
}

impl WEdge<()> {
    pub fn to(v: NodeId) -> Self {
        Self { v, w: () }
    }
}

impl<W: Copy> WEdge<W> {
    pub fn new(v: NodeId, w: W) -> Self {
        Self { v, w }
    }
}

/// A compressed-sparse-row graph, immutable after construction.
///
/// `offsets` has `n + 1` monotone entries with `offsets[0] == 0` and
/// `offsets[n] == m`; `edges[offsets[u]..offsets[u + 1]]` are `u`'s
/// out-edges, sorted by destination. When the graph is not symmetric an
/// inverse representation can be materialised for pull-direction
/// traversals with [`make_inverse`](Csr::make_inverse).
pub struct Csr<W: Copy = ()> {
    n: usize,
    m: usize,
    symmetric: bool,
    pub(crate) offsets: Vec<EdgeId>,
    pub(crate) edges: Vec<WEdge<W>>,
    in_offsets: Vec<EdgeId>,
    in_edges: Vec<WEdge<W>>,
}

impl<W: Copy + Send + Sync + Ord> Csr<W> {
    pub fn num_nodes(&self) -> usize {
        self.n
    }

    pub fn num_edges(&self) -> usize {
        self.m
    }

    pub fn is_symmetric(&self) -> bool {
        self.symmetric
    }

    #[inline(always)]
    pub fn degree(&self, u: NodeId) -> usize {
        self.offsets[u as usize + 1] - self.offsets[u as usize]
    }

    #[inline(always)]
    pub fn out_neighbors(&self, u: NodeId) -> &[WEdge<W>] {
        &self.edges[self.offsets[u as usize]..self.offsets[u as usize + 1]]
    }

    /// In-neighbours of `u`: the forward slice on a symmetric graph, the
    /// materialised inverse otherwise.
    #[inline(always)]
    pub fn in_neighbors(&self, u: NodeId) -> &[WEdge<W>] {
        if self.symmetric {
            self.out_neighbors(u)
        } else {
            debug_assert!(
                !self.in_offsets.is_empty(),
                "in_neighbors on an asymmetric graph without make_inverse"
            );
            &self.in_edges[self.in_offsets[u as usize]..self.in_offsets[u as usize + 1]]
        }
    }

    pub fn in_degree(&self, u: NodeId) -> usize {
        if self.symmetric {
            self.degree(u)
        } else {
            self.in_offsets[u as usize + 1] - self.in_offsets[u as usize]
        }
    }

    pub fn has_inverse(&self) -> bool {
        self.symmetric || !self.in_offsets.is_empty()
    }

    /// Materialises the inverse representation used by pull-direction
    /// traversals on asymmetric graphs.
    pub fn make_inverse(&mut self) {
        if self.symmetric || !self.in_offsets.is_empty() {
            return;
        }
        let edgelist = self.reversed_edge_list();
        let (in_offsets, in_edges) = build::edgelist_to_csr(self.n, edgelist);
        self.in_offsets = in_offsets;
        self.in_edges = in_edges;
    }

    fn reversed_edge_list(&self) -> EdgeList<W> {
        (0..self.n as NodeId)
            .into_par_iter()
            .flat_map_iter(|u| {
                self.out_neighbors(u)
                    .iter()
                    .map(move |e| (e.v, WEdge::new(u, e.w)))
            })
            .collect()
    }

    /// Produces the graph with every edge reversed.
    pub fn transpose(&self) -> Csr<W> {
        Csr::from_edge_list(self.n, self.reversed_edge_list(), false)
    }

    /// Produces the symmetric closure, dropping self-loops and duplicate
    /// edges.
    pub fn symmetrized(&self) -> Csr<W> {
        let mut edgelist: EdgeList<W> = (0..self.n as NodeId)
            .into_par_iter()
            .flat_map_iter(|u| {
                self.out_neighbors(u)
                    .iter()
                    .flat_map(move |e| [(u, *e), (e.v, WEdge::new(u, e.w))])
            })
            .collect();
        edgelist.par_sort_unstable_by(|a, b| (a.0, a.1.v).cmp(&(b.0, b.1.v)));
        edgelist.dedup_by(|a, b| a.0 == b.0 && a.1.v == b.1.v);
        edgelist.retain(|(u, e)| *u != e.v);
        let m = edgelist.len();
        let (offsets, edges) = build::edgelist_to_csr(self.n, edgelist);
        Csr {
            n: self.n,
            m,
            symmetric: true,
            offsets,
            edges,
            in_offsets: Vec::new(),
            in_edges: Vec::new(),
        }
    }

    /// Sanity checks of the CSR invariants; fails on a malformed shape,
    /// an out-of-range destination, or a broken symmetry claim.
    pub fn validate(&self) -> Result<()> {
        ensure!(self.offsets.len() == self.n + 1, "offsets length mismatch");
        ensure!(self.offsets[0] == 0, "offsets[0] must be 0");
        ensure!(self.offsets[self.n] == self.m, "offsets[n] must be m");
        ensure!(
            self.offsets.par_windows(2).all(|w| w[0] <= w[1]),
            "offsets must be monotone"
        );
        ensure!(
            self.edges.par_iter().all(|e| (e.v as usize) < self.n),
            "edge destination out of range"
        );
        let sorted = (0..self.n).into_par_iter().all(|u| {
            self.edges[self.offsets[u]..self.offsets[u + 1]]
                .windows(2)
                .all(|w| w[0].v <= w[1].v)
        });
        if !sorted {
            log::warn!("edges are not sorted within vertices");
        }
        if self.symmetric {
            let ok = (0..self.n as NodeId).into_par_iter().all(|u| {
                self.out_neighbors(u).iter().all(|e| {
                    self.out_neighbors(e.v)
                        .binary_search_by_key(&u, |r| r.v)
                        .is_ok()
                })
            });
            ensure!(ok, "graph claims symmetry but an edge has no reverse");
        }
        Ok(())
    }
}

impl Csr<()> {
    /// Derives a weighted copy with a deterministic weight in `[l, r)`
    /// hashed from each edge's endpoints.
    pub fn with_random_weights(&self, l: u32, r: u32) -> Csr<u32> {
        assert!(l < r);
        let range = r - l;
        let edges: Vec<WEdge<u32>> = (0..self.n as NodeId)
            .into_par_iter()
            .flat_map_iter(|u| {
                self.out_neighbors(u)
                    .iter()
                    .map(move |e| WEdge::new(e.v, (hash32(u) ^ hash32(e.v)) % range + l))
            })
            .collect();
        let mut g = Csr {
            n: self.n,
            m: self.m,
            symmetric: self.symmetric,
            offsets: self.offsets.clone(),
            edges,
            in_offsets: Vec::new(),
            in_edges: Vec::new(),
        };
        if !self.in_offsets.is_empty() {
            g.make_inverse();
        }
        g
    }
}

/// A spanning forest, one tree per connected component.
///
/// Vertices are rebound to local indices grouped by tree: `vertex[i]` is
/// the global id of local vertex `i`, and tree `t` spans the local range
/// `tree_offsets[t]..tree_offsets[t + 1]`. `graph` holds each tree edge
/// once, keyed by the *local* index of its source, with the destination
/// kept as a *global* id.
pub struct Forest {
    pub num_trees: usize,
    pub graph: Csr<()>,
    pub vertex: Vec<NodeId>,
    pub tree_offsets: Vec<NodeId>,
}
