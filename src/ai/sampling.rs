use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rand_distr::StandardNormal;

/// Seeded generator when `seed` is set, OS entropy otherwise.
pub fn make_rng(seed: Option<u64>) -> StdRng {
    match seed {
        Some(seed) => StdRng::seed_from_u64(seed),
        None => StdRng::from_os_rng(),
    }
}

/// Gaussian sample with mean `mu` and deviation `std`.
pub fn randn<R: Rng + ?Sized>(rng: &mut R, mu: f64, std: f64) -> f64 {
    let z: f64 = rng.sample(StandardNormal);
    mu + std * z
}

/// Draw an index with probability proportional to `probs`, which should sum
/// to one. Rounding shortfalls fall through to the last positive entry.
pub fn sample_weighted<R: Rng + ?Sized>(rng: &mut R, probs: &[f64]) -> usize {
    assert!(!probs.is_empty(), "cannot sample from an empty action set");
    let r: f64 = rng.random();
    let mut c = 0.0;
    for (i, &p) in probs.iter().enumerate() {
        c += p;
        if c >= r {
            return i;
        }
    }
    probs
        .iter()
        .rposition(|&p| p > 0.0)
        .unwrap_or(probs.len() - 1)
}

/// Index of the first maximum.
pub fn argmax(values: &[f64]) -> usize {
    assert!(!values.is_empty(), "argmax of an empty slice");
    let mut best = 0;
    for (i, &v) in values.iter().enumerate().skip(1) {
        if v > values[best] {
            best = i;
        }
    }
    best
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sample_weighted_respects_zero_mass() {
        let mut rng = StdRng::seed_from_u64(0);
        for _ in 0..200 {
            let i = sample_weighted(&mut rng, &[0.0, 1.0, 0.0]);
            assert_eq!(i, 1);
        }
    }

    #[test]
    fn test_sample_weighted_frequencies() {
        let mut rng = StdRng::seed_from_u64(1);
        let mut counts = [0usize; 2];
        for _ in 0..10_000 {
            counts[sample_weighted(&mut rng, &[0.25, 0.75])] += 1;
        }
        let frac = counts[1] as f64 / 10_000.0;
        assert!((frac - 0.75).abs() < 0.03, "got {}", frac);
    }

    #[test]
    #[should_panic(expected = "empty action set")]
    fn test_sample_weighted_empty_panics() {
        let mut rng = StdRng::seed_from_u64(2);
        sample_weighted(&mut rng, &[]);
    }

    #[test]
    fn test_argmax_first_of_ties() {
        assert_eq!(argmax(&[1.0, 3.0, 3.0, 2.0]), 1);
        assert_eq!(argmax(&[-1.0]), 0);
    }

    #[test]
    fn test_randn_moments() {
        let mut rng = StdRng::seed_from_u64(3);
        let n = 20_000;
        let xs: Vec<f64> = (0..n).map(|_| randn(&mut rng, 2.0, 0.5)).collect();
        let mean = xs.iter().sum::<f64>() / n as f64;
        let var = xs.iter().map(|x| (x - mean).powi(2)).sum::<f64>() / n as f64;
        assert!((mean - 2.0).abs() < 0.02);
        assert!((var.sqrt() - 0.5).abs() < 0.02);
    }
}
