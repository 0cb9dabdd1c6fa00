//! Sampling utilities
//!
//! Per-row Bernoulli sampling with a Chernoff-derived acceptance
//! probability, used wherever the engine needs "at least s rows" out of n
//! without an exact count.

use rand::rngs::StdRng;
use rand::Rng;

/// Acceptance probability such that a Bernoulli filter over `n` rows
/// yields at least `s` rows with probability >= 1 - 1e-6, capped at 1.
pub fn row_keep_probability(s: usize, n: usize) -> f64 {
    if n == 0 {
        return 1.0;
    }
    let s = s as f64;
    let p = (s + 14.0 + (196.0 + 28.0 * s).sqrt()) / n as f64;
    p.min(1.0)
}

/// Draw `target` rows by independent per-row coin flips, then cap at
/// `target` (the LIMIT step). The acceptance bound undershoots with
/// probability <= 1e-6; in that case the coins are simply flipped again.
pub fn sample_rows<T: Clone>(rows: &[T], target: usize, rng: &mut StdRng) -> Vec<T> {
    if target >= rows.len() {
        return rows.to_vec();
    }
    let p = row_keep_probability(target, rows.len());
    loop {
        let picked: Vec<T> = rows
            .iter()
            .filter(|_| rng.gen::<f64>() < p)
            .take(target)
            .cloned()
            .collect();
        if picked.len() == target {
            return picked;
        }
    }
}
