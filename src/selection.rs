//! OutcomeSelector: uniform draws without replacement.
//!
//! Eligibility is entirely the caller's business; every candidate that
//! reaches the selector has the same chance.

use rand::Rng;
use rand::seq::SliceRandom;

/// Draw up to `k` members of `pool` using the thread RNG.
///
/// When `pool.len() <= k` the whole pool is returned in its original order.
#[must_use]
pub fn select<T: Clone>(pool: &[T], k: usize) -> Vec<T> {
    select_with(pool, k, &mut rand::thread_rng())
}

/// [`select`] with a caller-supplied RNG.
pub fn select_with<T: Clone, R: Rng + ?Sized>(pool: &[T], k: usize, rng: &mut R) -> Vec<T> {
    if pool.len() <= k {
        return pool.to_vec();
    }
    pool.choose_multiple(rng, k).cloned().collect()
}
