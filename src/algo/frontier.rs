//! Shared pieces of the sparse/dense direction-switching frontier engine:
//! the compact-frontier/bitmap conversions, sampled size estimation and
//! the bounded local FIFO used by sparse relaxation.
//!
//! Each traversal keeps a compact `frontier` array while sparse and a
//! membership bitmap while dense. The switch direction is decided before
//! a round starts: sparse rounds scan the frontier's out-edges (push),
//! dense rounds scan all vertices for in-neighbours in the frontier
//! (pull).

use crate::graph::{Csr, NodeId};
use crate::utils::atomic::hash32;
use crate::utils::par;
use rayon::prelude::*;
use std::sync::atomic::Ordering;
use sux::bits::AtomicBitVec;

/// A bounded per-task FIFO. Sparse relaxation drains small-degree work
/// locally and spills to the shared hash-bag only when the queue fills.
pub struct LocalQueue<const N: usize> {
    buf: [NodeId; N],
    head: usize,
    tail: usize,
}

impl<const N: usize> LocalQueue<N> {
    #[inline(always)]
    pub fn new() -> Self {
        Self {
            buf: [0; N],
            head: 0,
            tail: 0,
        }
    }

    /// Appends `v`; returns `false` when the queue has no room left.
    #[inline(always)]
    pub fn push(&mut self, v: NodeId) -> bool {
        if self.tail < N {
            self.buf[self.tail] = v;
            self.tail += 1;
            true
        } else {
            false
        }
    }

    #[inline(always)]
    pub fn peek(&self) -> Option<NodeId> {
        (self.head < self.tail).then(|| self.buf[self.head])
    }

    #[inline(always)]
    pub fn pop(&mut self) -> Option<NodeId> {
        if self.head < self.tail {
            let v = self.buf[self.head];
            self.head += 1;
            Some(v)
        } else {
            None
        }
    }

    #[inline(always)]
    pub fn len(&self) -> usize {
        self.tail - self.head
    }

    #[inline(always)]
    pub fn is_empty(&self) -> bool {
        self.head == self.tail
    }

    /// Whether the queue has run out of room to push.
    #[inline(always)]
    pub fn is_full(&self) -> bool {
        self.tail == N
    }

    /// The elements that were queued but never popped; a task flushes
    /// these into the hash-bag when it stops draining locally.
    #[inline(always)]
    pub fn leftovers(&self) -> &[NodeId] {
        &self.buf[self.head..self.tail]
    }
}

impl<const N: usize> Default for LocalQueue<N> {
    fn default() -> Self {
        Self::new()
    }
}

/// Estimates how many of the `n` vertices satisfy `active` by probing
/// `num_samples` hashed positions. The seed advances so repeated
/// estimates probe fresh positions.
pub fn estimate_active<P>(n: usize, num_samples: usize, seed: &mut u32, active: P) -> usize
where
    P: Fn(NodeId) -> bool,
{
    let mut hits = 0usize;
    for _ in 0..num_samples {
        let u = hash32(*seed) % n as u32;
        if active(u) {
            hits += 1;
        }
        *seed = seed.wrapping_add(1);
    }
    hits * n / num_samples
}

/// Rasterises a compact frontier into a membership bitmap.
pub fn sparse_to_dense(frontier: &[NodeId], bits: &mut AtomicBitVec) {
    bits.fill(false, Ordering::Relaxed);
    frontier
        .par_iter()
        .for_each(|&v| bits.set(v as usize, true, Ordering::Relaxed));
}

/// Packs the set bits of a membership bitmap into a compact frontier,
/// in increasing vertex order. Returns the frontier size.
pub fn dense_to_sparse(bits: &AtomicBitVec, n: usize, out: &mut [NodeId]) -> usize {
    par::pack_index_into(n, |i| bits.get(i, Ordering::Relaxed), out)
}

/// Counts the set bits of a membership bitmap.
pub fn count_set(bits: &AtomicBitVec, n: usize) -> usize {
    (0..n)
        .into_par_iter()
        .filter(|&i| bits.get(i, Ordering::Relaxed))
        .count()
}

/// Sums the out-degrees of the frontier's members.
pub fn out_degree_sum<W: Copy + Send + Sync + Ord>(g: &Csr<W>, frontier: &[NodeId]) -> usize {
    frontier.par_iter().map(|&u| g.degree(u)).sum()
}
