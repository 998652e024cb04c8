use super::atomic::{hash32, log2_up};
use super::par;
use super::sampler::Sampler;
use rayon::prelude::*;
use std::sync::atomic::{AtomicU32, Ordering};

/// An unbounded, lock-free, insert-only bag of vertex ids, used as the
/// frontier buffer of the traversal algorithms.
///
/// The bag is a sequence of fixed-capacity open-addressed buckets with
/// geometrically growing sizes. Inserters claim empty slots in the active
/// bucket with a CAS; a [`Sampler`] per bucket watches the stream of
/// hashes and promotes the bag to the next bucket once the active one is
/// probably near its load target, replacing a global fullness check with
/// an O(1) amortised probabilistic test per insert.
///
/// Many threads may [`insert`](HashBag::insert) concurrently. Draining
/// takes `&mut self`: packing and clearing are serial with respect to
/// inserts by construction.
pub struct HashBag {
    empty: u32,
    bag_id: AtomicU32,
    bag_sizes: Vec<usize>,
    offsets: Vec<usize>,
    samplers: Vec<Sampler>,
    pool: Vec<AtomicU32>,
}

const MIN_BAG_SIZE: usize = 1 << 6;
const OVER_SAMPLING: usize = 4;
const CLEAR_BLOCK: usize = 1 << 10;

impl HashBag {
    /// Creates a bag able to hold `n` elements at the default load factor.
    pub fn new(n: usize) -> Self {
        Self::with_load_factor(n, 0.5)
    }

    pub fn with_load_factor(n: usize, load_factor: f64) -> Self {
        let n = n.max(1);
        let mut bag_sizes = Vec::new();
        let mut offsets = Vec::new();
        let mut samplers = Vec::new();
        let mut cur_size = MIN_BAG_SIZE;
        let mut total_size = 0usize;
        while (total_size as f64) * load_factor < n as f64 {
            let exp_samples = (OVER_SAMPLING as u32) * log2_up(cur_size);
            let threshold =
                (exp_samples as f64 / (cur_size as f64 * load_factor) * u32::MAX as f64) as u64;
            bag_sizes.push(cur_size);
            offsets.push(total_size);
            samplers.push(Sampler::new(exp_samples, threshold));
            total_size += cur_size;
            cur_size *= 2;
        }
        let pool = (0..total_size).map(|_| AtomicU32::new(u32::MAX)).collect();
        Self {
            empty: u32::MAX,
            bag_id: AtomicU32::new(0),
            bag_sizes,
            offsets,
            samplers,
            pool,
        }
    }

    /// Inserts `u`. The same key offered twice may occupy two slots.
    ///
    /// Panics if every bucket is exhausted; the construction contract is
    /// that `n` covers the true number of inserts between drains.
    pub fn insert(&self, u: u32) {
        let mut local_id = self.active_bucket();
        let h = hash32(u);
        let mut callback = false;
        while local_id + 1 < self.bag_sizes.len()
            && !self.samplers[local_id].sample(h, &mut callback)
        {
            local_id += 1;
        }
        if callback {
            self.bag_id.fetch_add(1, Ordering::Relaxed);
        }
        let mut idx = (h as usize) & (self.bag_sizes[local_id] - 1);
        let mut num_probes = 0;
        loop {
            let slot = &self.pool[self.offsets[local_id] + idx];
            if slot.load(Ordering::Relaxed) == self.empty
                && slot
                    .compare_exchange(self.empty, u, Ordering::Relaxed, Ordering::Relaxed)
                    .is_ok()
            {
                return;
            }
            idx += 1;
            if idx == self.bag_sizes[local_id] {
                idx = 0;
            }
            num_probes += 1;
            if num_probes == self.bag_sizes[local_id] {
                local_id += 1;
                assert!(
                    local_id < self.bag_sizes.len(),
                    "hash bag is full; construct it with a larger capacity"
                );
                // Promote: the drain must cover every written bucket
                // even when the sampler lagged behind the fill.
                self.bag_id.fetch_max(local_id as u32, Ordering::Relaxed);
                idx = (h as usize) & (self.bag_sizes[local_id] - 1);
            }
        }
    }

    fn active_bucket(&self) -> usize {
        (self.bag_id.load(Ordering::Relaxed) as usize).min(self.bag_sizes.len() - 1)
    }

    fn live_len(&self) -> usize {
        let id = self.active_bucket();
        self.offsets[id] + self.bag_sizes[id]
    }

    /// Resets the bag to empty. Serial with respect to inserts.
    pub fn clear(&mut self) {
        let live = self.live_len();
        for sampler in &self.samplers[..=self.active_bucket()] {
            sampler.reset();
        }
        let empty = self.empty;
        self.pool[..live]
            .par_iter()
            .with_min_len(CLEAR_BLOCK)
            .for_each(|slot| slot.store(empty, Ordering::Relaxed));
        self.bag_id.store(0, Ordering::Relaxed);
    }

    /// Drains the bag into the front of `out`, returning the element count.
    pub fn pack_into(&mut self, out: &mut [u32]) -> usize {
        let live = self.live_len();
        let empty = self.empty;
        let pool = &self.pool;
        let num = par::pack_into_slice(
            live,
            |i| {
                let v = pool[i].load(Ordering::Relaxed);
                (v != empty).then_some(v)
            },
            out,
        );
        self.clear();
        num
    }

    /// Drains the bag into the front of `out`, keeping only elements that
    /// satisfy `pred`. Elements failing the predicate are dropped.
    pub fn pack_into_pred<P>(&mut self, out: &mut [u32], pred: P) -> usize
    where
        P: Fn(u32) -> bool + Sync,
    {
        let live = self.live_len();
        let empty = self.empty;
        let pool = &self.pool;
        let num = par::pack_into_slice(
            live,
            |i| {
                let v = pool[i].load(Ordering::Relaxed);
                (v != empty && pred(v)).then_some(v)
            },
            out,
        );
        self.clear();
        num
    }

    /// Drains the bag into a freshly allocated vector.
    pub fn pack(&mut self) -> Vec<u32> {
        let live = self.live_len();
        let empty = self.empty;
        let pool = &self.pool;
        let out = par::pack(live, |i| {
            let v = pool[i].load(Ordering::Relaxed);
            (v != empty).then_some(v)
        });
        self.clear();
        out
    }
}
