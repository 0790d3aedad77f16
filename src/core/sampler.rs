use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use rand_distr::{Distribution, Normal};

use super::types::StochasticValue;

/// Random stream owned by exactly one trial.
pub type TrialRng = ChaCha8Rng;

pub fn trial_rng(seed: u64) -> TrialRng {
    ChaCha8Rng::seed_from_u64(seed)
}

/// Mixes the batch seed with the trial id so trials draw independent streams.
pub fn derive_seed(base_seed: u64, trial_id: u32) -> u64 {
    let mixed = base_seed ^ ((trial_id as u64) << 32) ^ trial_id as u64;
    splitmix64(mixed)
}

fn splitmix64(mut x: u64) -> u64 {
    x = x.wrapping_add(0x9E3779B97F4A7C15);
    let mut z = x;
    z = (z ^ (z >> 30)).wrapping_mul(0xBF58476D1CE4E5B9);
    z = (z ^ (z >> 27)).wrapping_mul(0x94D049BB133111EB);
    z ^ (z >> 31)
}

/// Draws one value. The result is in the units implied by the value type;
/// callers decide whether it is a rate or a delta.
pub fn sample<R: Rng + ?Sized>(value: &StochasticValue, rng: &mut R) -> f64 {
    match *value {
        StochasticValue::Fixed { value, .. } => value,
        StochasticValue::Normal { mean, std_dev, .. } => normal(mean, std_dev, rng),
        StochasticValue::Uniform { min, max, .. } => uniform(min, max, rng),
    }
}

pub fn normal<R: Rng + ?Sized>(mean: f64, std_dev: f64, rng: &mut R) -> f64 {
    if std_dev.is_nan() || std_dev <= 0.0 {
        return mean;
    }
    match Normal::new(mean, std_dev) {
        Ok(dist) => dist.sample(rng),
        Err(_) => mean,
    }
}

/// Uniform draw in `[min, max)`; a degenerate range returns `min`.
pub fn uniform<R: Rng + ?Sized>(min: f64, max: f64, rng: &mut R) -> f64 {
    if max > min {
        rng.gen_range(min..max)
    } else {
        min
    }
}

/// Rounds a sampled year count to a whole number of years in `0..=max`.
pub fn whole_years(sampled: f64, max: u32) -> u32 {
    if sampled.is_finite() && sampled > 0.0 {
        sampled.round().min(max as f64) as u32
    } else {
        0
    }
}
