use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};

/// A bounded Bernoulli counter.
///
/// A sampler accepts hash values and counts a hit whenever the value falls
/// below its threshold, up to `exp_hits` hits in total. Once the expected
/// number of hits has been observed the sampler is saturated and
/// [`sample`](Sampler::sample) returns `false` forever (until a reset).
///
/// Exactly one call across all threads observes the transition into
/// saturation; that call gets `callback` set to `true`. The transition is
/// detected on the value returned by the hit-counter `fetch_add`, so two
/// racing callers cannot both claim it.
pub struct Sampler {
    num_hits: AtomicU32,
    exp_hits: AtomicU32,
    // Threshold in the 32-bit hash codomain; stored wider so that an
    // always-hit threshold is representable.
    threshold: AtomicU64,
}

impl Sampler {
    pub fn new(exp_hits: u32, threshold: u64) -> Self {
        Self {
            num_hits: AtomicU32::new(0),
            exp_hits: AtomicU32::new(exp_hits),
            threshold: AtomicU64::new(threshold),
        }
    }

    /// Offers a hash value to the sampler.
    ///
    /// Returns `false` iff the sampler was saturated on entry or this call
    /// lost the race past the saturation point. `callback` is set to `true`
    /// exactly when this call is the one that saturated the counter.
    pub fn sample(&self, h: u32, callback: &mut bool) -> bool {
        *callback = false;
        let exp_hits = self.exp_hits.load(Ordering::Relaxed);
        if self.num_hits.load(Ordering::Relaxed) >= exp_hits {
            return false;
        }
        if (h as u64) < self.threshold.load(Ordering::Relaxed) {
            let prev = self.num_hits.fetch_add(1, Ordering::Relaxed);
            if prev >= exp_hits {
                return false;
            } else if prev + 1 == exp_hits {
                *callback = true;
            }
        }
        true
    }

    /// Puts the sampler back into the unsaturated state.
    ///
    /// Must not race with concurrent [`sample`](Sampler::sample) calls.
    pub fn reset(&self) {
        self.num_hits.store(0, Ordering::Relaxed);
    }

    /// Re-arms the sampler with a new target and a hit probability.
    ///
    /// `sample_rate` is the probability that a uniform 32-bit hash counts
    /// as a hit. Must not race with concurrent `sample` calls.
    pub fn reset_with(&self, exp_hits: u32, sample_rate: f64) {
        self.threshold
            .store((sample_rate * u32::MAX as f64) as u64, Ordering::Relaxed);
        self.exp_hits.store(exp_hits, Ordering::Relaxed);
        self.num_hits.store(0, Ordering::Relaxed);
    }

    pub fn num_hits(&self) -> u32 {
        self.num_hits.load(Ordering::Relaxed)
    }

    pub fn exp_hits(&self) -> u32 {
        self.exp_hits.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use rayon::prelude::*;
    use std::sync::atomic::AtomicUsize;

    #[test]
    fn test_saturates_after_exp_hits() {
        // Threshold above the codomain: every offer is a hit.
        let sampler = Sampler::new(3, u64::MAX);
        let mut cb = false;
        assert!(sampler.sample(0, &mut cb));
        assert!(!cb);
        assert!(sampler.sample(1, &mut cb));
        assert!(!cb);
        assert!(sampler.sample(2, &mut cb));
        assert!(cb);
        for h in 0..100 {
            assert!(!sampler.sample(h, &mut cb));
            assert!(!cb);
        }
    }

    #[test]
    fn test_misses_do_not_count() {
        let sampler = Sampler::new(1, 0);
        let mut cb = false;
        for h in 1..100 {
            assert!(sampler.sample(h, &mut cb));
            assert!(!cb);
        }
        assert_eq!(sampler.num_hits(), 0);
    }

    #[test]
    fn test_single_callback_across_threads() {
        let sampler = Sampler::new(64, u64::MAX);
        let callbacks = AtomicUsize::new(0);
        (0..4096u32).into_par_iter().for_each(|h| {
            let mut cb = false;
            sampler.sample(h, &mut cb);
            if cb {
                callbacks.fetch_add(1, Ordering::Relaxed);
            }
        });
        assert_eq!(callbacks.load(Ordering::Relaxed), 1);
        let mut cb = false;
        assert!(!sampler.sample(0, &mut cb));
    }

    #[test]
    fn test_reset_rearms() {
        let sampler = Sampler::new(1, u64::MAX);
        let mut cb = false;
        assert!(sampler.sample(0, &mut cb));
        assert!(cb);
        assert!(!sampler.sample(0, &mut cb));
        sampler.reset();
        assert!(sampler.sample(0, &mut cb));
        assert!(cb);
    }
}
