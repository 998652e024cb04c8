//! A lock-free union-find family parameterised by a find policy and a
//! unite policy.
//!
//! Parents are a shared slice of atomic vertex ids; a root points to
//! itself. Every successful link strictly lowers the maximum index along
//! any root path, so linking terminates and path compression can never
//! introduce a cycle: a vertex's parent only ever decreases.

use crate::graph::NodeId;
use std::sync::atomic::{AtomicU32, Ordering};

/// Root lookup over a shared parent array.
pub trait Find {
    fn find(&self, i: NodeId, parents: &[AtomicU32]) -> NodeId;
}

/// The local path-compression step used inside Rem-CAS unites.
pub trait Splice {
    fn splice(&self, u: NodeId, v: NodeId, parents: &[AtomicU32]) -> NodeId;
}

/// Merges two equivalence classes.
pub trait Unite {
    /// Links the classes of `u` and `v`. Returns the root that lost its
    /// root status, or `None` if the two were already merged.
    fn unite(&self, u: NodeId, v: NodeId, parents: &[AtomicU32]) -> Option<NodeId>;
}

#[inline(always)]
fn parent(parents: &[AtomicU32], i: NodeId) -> NodeId {
    parents[i as usize].load(Ordering::Relaxed)
}

#[inline(always)]
fn cas_parent(parents: &[AtomicU32], i: NodeId, old: NodeId, new: NodeId) -> bool {
    parents[i as usize].load(Ordering::Relaxed) == old
        && parents[i as usize]
            .compare_exchange(old, new, Ordering::Relaxed, Ordering::Relaxed)
            .is_ok()
}

/// Walks to the root without touching the structure.
#[derive(Clone, Copy, Default)]
pub struct FindNaive;

impl Find for FindNaive {
    fn find(&self, mut i: NodeId, parents: &[AtomicU32]) -> NodeId {
        while i != parent(parents, i) {
            i = parent(parents, i);
        }
        i
    }
}

/// Two-pass find: walk to the root, then re-point the path at it.
///
/// The second pass writes unconditionally but only ever replaces a parent
/// with a smaller index, so concurrent out-of-date writes stay acyclic.
#[derive(Clone, Copy, Default)]
pub struct FindCompress;

impl Find for FindCompress {
    fn find(&self, mut i: NodeId, parents: &[AtomicU32]) -> NodeId {
        let mut j = i;
        if parent(parents, j) == j {
            return j;
        }
        loop {
            j = parent(parents, j);
            if parent(parents, j) == j {
                break;
            }
        }
        loop {
            let tmp = parent(parents, i);
            if tmp <= j {
                break;
            }
            parents[i as usize].store(j, Ordering::Relaxed);
            i = tmp;
        }
        j
    }
}

/// Path splitting: each step CASes the parent to the grandparent and
/// advances to the old parent.
#[derive(Clone, Copy, Default)]
pub struct FindAtomicSplit;

impl Find for FindAtomicSplit {
    fn find(&self, mut i: NodeId, parents: &[AtomicU32]) -> NodeId {
        loop {
            let v = parent(parents, i);
            let w = parent(parents, v);
            if v == w {
                return v;
            }
            cas_parent(parents, i, v, w);
            i = v;
        }
    }
}

/// Path halving: like splitting but advances to the grandparent.
#[derive(Clone, Copy, Default)]
pub struct FindAtomicHalve;

impl Find for FindAtomicHalve {
    fn find(&self, mut i: NodeId, parents: &[AtomicU32]) -> NodeId {
        loop {
            let v = parent(parents, i);
            let w = parent(parents, v);
            if v == w {
                return v;
            }
            cas_parent(parents, i, v, w);
            i = parent(parents, i);
        }
    }
}

/// One atomic split step.
#[derive(Clone, Copy, Default)]
pub struct SpliceAtomicSplit;

impl Splice for SpliceAtomicSplit {
    fn splice(&self, u: NodeId, _v: NodeId, parents: &[AtomicU32]) -> NodeId {
        let v = parent(parents, u);
        let w = parent(parents, v);
        if v == w {
            v
        } else {
            cas_parent(parents, u, v, w);
            v
        }
    }
}

/// One atomic halve step.
#[derive(Clone, Copy, Default)]
pub struct SpliceAtomicHalve;

impl Splice for SpliceAtomicHalve {
    fn splice(&self, u: NodeId, _v: NodeId, parents: &[AtomicU32]) -> NodeId {
        let v = parent(parents, u);
        let w = parent(parents, v);
        if v == w {
            v
        } else {
            cas_parent(parents, u, v, w);
            w
        }
    }
}

/// Replaces `parents[u]` with the other argument's parent.
#[derive(Clone, Copy, Default)]
pub struct SpliceAtomic;

impl Splice for SpliceAtomic {
    fn splice(&self, u: NodeId, v: NodeId, parents: &[AtomicU32]) -> NodeId {
        let z = parent(parents, u);
        cas_parent(parents, u, z, parent(parents, v));
        z
    }
}

/// Find both roots, link the higher-index root to the lower with a CAS,
/// retry from the new roots on failure.
pub struct UniteBasic<F: Find> {
    find: F,
}

impl<F: Find> UniteBasic<F> {
    pub fn new(find: F) -> Self {
        Self { find }
    }
}

impl<F: Find> Unite for UniteBasic<F> {
    fn unite(&self, u_orig: NodeId, v_orig: NodeId, parents: &[AtomicU32]) -> Option<NodeId> {
        let mut u = u_orig;
        let mut v = v_orig;
        loop {
            u = self.find.find(u, parents);
            v = self.find.find(v, parents);
            if u == v {
                return None;
            } else if u > v && parent(parents, u) == u && cas_parent(parents, u, u, v) {
                return Some(u);
            } else if v > u && parent(parents, v) == v && cas_parent(parents, v, v, u) {
                return Some(v);
            }
        }
    }
}

/// Links eagerly from the higher argument, doing one split step and
/// retrying on CAS failure, then forces a find on the originals.
pub struct UniteEarly<F: Find> {
    find: F,
}

impl<F: Find> UniteEarly<F> {
    pub fn new(find: F) -> Self {
        Self { find }
    }
}

impl<F: Find> Unite for UniteEarly<F> {
    fn unite(&self, u_orig: NodeId, v_orig: NodeId, parents: &[AtomicU32]) -> Option<NodeId> {
        let mut u = u_orig;
        let mut v = v_orig;
        let mut ret = None;
        while u != v {
            // link high to low
            if v > u {
                std::mem::swap(&mut u, &mut v);
            }
            if parent(parents, u) == u && cas_parent(parents, u, u, v) {
                ret = Some(u);
                break;
            }
            let z = parent(parents, u);
            let w = parent(parents, z);
            cas_parent(parents, u, z, w);
            u = w;
        }
        self.find.find(u_orig, parents);
        self.find.find(v_orig, parents);
        ret
    }
}

/// Rem's algorithm with CAS linking: follow the parents of both
/// arguments, link high to low when a root is reached, and splice to
/// compress locally when the CAS loses.
pub struct UniteRemCas<S: Splice, F: Find> {
    splice: S,
    compress: Option<F>,
}

impl<S: Splice, F: Find> UniteRemCas<S, F> {
    pub fn new(splice: S, compress: Option<F>) -> Self {
        Self { splice, compress }
    }
}

impl<S: Splice, F: Find> Unite for UniteRemCas<S, F> {
    fn unite(&self, x: NodeId, y: NodeId, parents: &[AtomicU32]) -> Option<NodeId> {
        let mut rx = x;
        let mut ry = y;
        while parent(parents, rx) != parent(parents, ry) {
            // link high to low
            let mut p_rx = parent(parents, rx);
            let mut p_ry = parent(parents, ry);
            if p_rx < p_ry {
                std::mem::swap(&mut rx, &mut ry);
                std::mem::swap(&mut p_rx, &mut p_ry);
            }
            if parent(parents, rx) == rx && cas_parent(parents, rx, rx, p_ry) {
                if let Some(compress) = &self.compress {
                    compress.find(x, parents);
                    compress.find(y, parents);
                }
                return Some(rx);
            }
            rx = self.splice.splice(rx, ry, parents);
        }
        None
    }
}

/// Allocates a fresh parent array where every vertex is its own root.
pub fn init_parents(n: usize) -> Vec<AtomicU32> {
    (0..n as u32).map(AtomicU32::new).collect()
}
