//! Parallel pack and scan helpers shared by the containers and the
//! frontier engine.

use rayon::prelude::*;
use sync_cell_slice::SyncSlice;

const CHUNK: usize = 4096;

/// Packs the `Some` values of `get(0..len)` into the front of `out`,
/// preserving index order, and returns how many were written.
///
/// `get` is evaluated twice per index (count pass, then write pass), so it
/// must be cheap and yield the same answer both times; callers hold the
/// underlying data exclusively while packing.
pub fn pack_into_slice<T, G>(len: usize, get: G, out: &mut [T]) -> usize
where
    T: Copy + Send + Sync,
    G: Fn(usize) -> Option<T> + Sync,
{
    let num_chunks = len.div_ceil(CHUNK);
    let counts: Vec<usize> = (0..num_chunks)
        .into_par_iter()
        .map(|c| {
            let end = ((c + 1) * CHUNK).min(len);
            (c * CHUNK..end).filter(|&i| get(i).is_some()).count()
        })
        .collect();
    let mut offsets = Vec::with_capacity(num_chunks + 1);
    let mut sum = 0;
    for &c in &counts {
        offsets.push(sum);
        sum += c;
    }
    offsets.push(sum);
    let total = sum;
    assert!(
        total <= out.len(),
        "pack_into_slice: output slice too small ({} < {})",
        out.len(),
        total
    );

    let out_sync = out.as_sync_slice();
    (0..num_chunks).into_par_iter().for_each(|c| {
        let mut pos = offsets[c];
        let end = ((c + 1) * CHUNK).min(len);
        for i in c * CHUNK..end {
            if let Some(v) = get(i) {
                // SAFETY: chunks write the disjoint ranges
                // [offsets[c], offsets[c + 1]).
                unsafe { out_sync[pos].set(v) };
                pos += 1;
            }
        }
    });
    total
}

/// Like [`pack_into_slice`] but allocates the exactly-sized output.
pub fn pack<T, G>(len: usize, get: G) -> Vec<T>
where
    T: Copy + Default + Send + Sync,
    G: Fn(usize) -> Option<T> + Sync,
{
    let total = (0..len)
        .into_par_iter()
        .filter(|&i| get(i).is_some())
        .count();
    let mut out = vec![T::default(); total];
    pack_into_slice(len, get, &mut out);
    out
}

/// Packs the indices where `pred` holds into `out`, in increasing order.
pub fn pack_index_into<P>(len: usize, pred: P, out: &mut [u32]) -> usize
where
    P: Fn(usize) -> bool + Sync,
{
    pack_into_slice(len, |i| pred(i).then_some(i as u32), out)
}

/// Replaces every element with the minimum of the suffix starting at it.
pub fn suffix_min_inplace(xs: &mut [usize]) {
    let num_chunks = xs.len().div_ceil(CHUNK);
    if num_chunks == 0 {
        return;
    }
    let chunk_mins: Vec<usize> = xs
        .par_chunks(CHUNK)
        .map(|chunk| chunk.iter().copied().min().unwrap_or(usize::MAX))
        .collect();
    // carry[c] = min over all chunks strictly after c
    let mut carry = vec![usize::MAX; num_chunks];
    for c in (0..num_chunks - 1).rev() {
        carry[c] = carry[c + 1].min(chunk_mins[c + 1]);
    }
    xs.par_chunks_mut(CHUNK)
        .zip(carry.par_iter())
        .for_each(|(chunk, &carry)| {
            let mut cur = carry;
            for x in chunk.iter_mut().rev() {
                cur = cur.min(*x);
                *x = cur;
            }
        });
}
