use super::atomic::hash64;
use crossbeam_utils::CachePadded;
use rayon::prelude::*;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};

/// An open-addressed concurrent multimap from vertex keys to 32-bit
/// values, with a saturation flag and a serial grow-and-retry protocol.
///
/// A key may be inserted with many distinct values; re-inserting an
/// existing `(key, value)` pair is a no-op. Probing stops after a hard cap
/// and raises the shared `overfull` flag instead; the calling contract is
/// that the whole round of insertions is redone after
/// [`double_size`](ResizableTable::double_size) — values inserted during a
/// failed round are discarded, never migrated.
///
/// Entries pack the `(key, value)` pair into one 64-bit word so the empty
/// sentinel and the claiming CAS cover the pair atomically.
pub struct ResizableTable {
    m: usize,
    mask: usize,
    slots: Vec<AtomicU64>,
    counts: Vec<CachePadded<AtomicUsize>>,
    num_entries: usize,
    overfull: AtomicBool,
}

const EMPTY: u64 = u64::MAX;
const PROBE_LIMIT: usize = 2000;

#[inline(always)]
fn pack_kv(k: u32, v: u32) -> u64 {
    ((k as u64) << 32) | v as u64
}

#[inline(always)]
fn unpack_kv(e: u64) -> (u32, u32) {
    ((e >> 32) as u32, e as u32)
}

#[inline]
fn worker_index(num_workers: usize) -> usize {
    // Threads outside the pool (e.g. the caller) share the last counter.
    rayon::current_thread_index().unwrap_or(num_workers)
}

impl ResizableTable {
    /// Creates a table with capacity `size` rounded up to a power of two.
    pub fn new(size: usize) -> Self {
        let m = (size.max(2)).next_power_of_two();
        let num_workers = rayon::current_num_threads();
        Self {
            m,
            mask: m - 1,
            slots: (0..m).map(|_| AtomicU64::new(EMPTY)).collect(),
            counts: (0..num_workers + 1)
                .map(|_| CachePadded::new(AtomicUsize::new(0)))
                .collect(),
            num_entries: 0,
            overfull: AtomicBool::new(false),
        }
    }

    pub fn capacity(&self) -> usize {
        self.m
    }

    pub fn is_overfull(&self) -> bool {
        self.overfull.load(Ordering::Relaxed)
    }

    #[inline(always)]
    fn first_index(&self, k: u32) -> usize {
        (hash64(k as u64) as usize) & self.mask
    }

    #[inline(always)]
    fn next_index(&self, i: usize) -> usize {
        (i + 1) & self.mask
    }

    /// Inserts the pair, returning `true` if it was new.
    ///
    /// Returns `false` both for an exact duplicate and for a probe-limit
    /// overflow; the latter also raises the `overfull` flag.
    pub fn insert(&self, k: u32, v: u32) -> bool {
        let kv = pack_kv(k, v);
        let mut i = self.first_index(k);
        for _ in 0..PROBE_LIMIT {
            let slot = &self.slots[i];
            if slot.load(Ordering::Relaxed) == EMPTY
                && slot
                    .compare_exchange(EMPTY, kv, Ordering::Relaxed, Ordering::Relaxed)
                    .is_ok()
            {
                self.counts[worker_index(self.counts.len() - 1)]
                    .fetch_add(1, Ordering::Relaxed);
                return true;
            }
            if slot.load(Ordering::Relaxed) == kv {
                return false;
            }
            i = self.next_index(i);
        }
        self.overfull.store(true, Ordering::Relaxed);
        false
    }

    /// Exact membership test for a `(key, value)` pair.
    pub fn contains(&self, k: u32, v: u32) -> bool {
        let kv = pack_kv(k, v);
        let mut i = self.first_index(k);
        loop {
            let e = self.slots[i].load(Ordering::Relaxed);
            if e == EMPTY {
                return false;
            }
            if e == kv {
                return true;
            }
            i = self.next_index(i);
        }
    }

    /// Iterates over every value stored under `k`.
    pub fn values(&self, k: u32) -> ValueIter<'_> {
        ValueIter {
            table: self,
            key: k,
            i: self.first_index(k),
            probes: 0,
        }
    }

    /// Accumulates the per-worker insert counters.
    ///
    /// Raises `overfull` when the table holds at least as many entries as
    /// slots, so the owner can trigger a resize before probes start
    /// failing en masse.
    pub fn size(&mut self) -> usize {
        for count in &self.counts {
            self.num_entries += count.swap(0, Ordering::Relaxed);
        }
        if self.num_entries >= self.m {
            self.overfull.store(true, Ordering::Relaxed);
        }
        self.num_entries
    }

    /// Quadruples the capacity and empties the table.
    ///
    /// Serial. Entries inserted before the call are discarded; the caller
    /// re-drives the whole round of insertions.
    pub fn double_size(&mut self) {
        self.m *= 4;
        self.mask = self.m - 1;
        for count in &self.counts {
            count.store(0, Ordering::Relaxed);
        }
        self.num_entries = 0;
        self.slots = (0..self.m).map(|_| AtomicU64::new(EMPTY)).collect();
        self.overfull.store(false, Ordering::Relaxed);
    }

    /// Applies `f` to every live `(key, value)` pair in parallel.
    pub fn map<F>(&self, f: F)
    where
        F: Fn(u32, u32) + Sync,
    {
        self.slots.par_iter().for_each(|slot| {
            let e = slot.load(Ordering::Relaxed);
            if e != EMPTY {
                let (k, v) = unpack_kv(e);
                f(k, v);
            }
        });
    }

    /// Collects every live `(key, value)` pair.
    pub fn entries(&self) -> Vec<(u32, u32)> {
        let slots = &self.slots;
        super::par::pack(self.m, |i| {
            let e = slots[i].load(Ordering::Relaxed);
            (e != EMPTY).then(|| unpack_kv(e))
        })
    }
}

/// Iterator over the values of one key; see
/// [`values`](ResizableTable::values).
pub struct ValueIter<'a> {
    table: &'a ResizableTable,
    key: u32,
    i: usize,
    probes: usize,
}

impl Iterator for ValueIter<'_> {
    type Item = u32;

    fn next(&mut self) -> Option<u32> {
        while self.probes < self.table.m {
            let e = self.table.slots[self.i].load(Ordering::Relaxed);
            if e == EMPTY {
                return None;
            }
            self.i = self.table.next_index(self.i);
            self.probes += 1;
            let (k, v) = unpack_kv(e);
            if k == self.key {
                return Some(v);
            }
        }
        None
    }
}
