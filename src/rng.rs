use rand::prelude::*;
use rand_distr::{Poisson, StandardNormal};

/// Multiplier used to derive independent worker streams from a base seed.
const STREAM_DERIVATION_PRIME: u64 = 0x9E37_79B9_7F4A_7C15;

/// Per-thread source of uniform, gaussian and poisson draws.
///
/// Each worker thread owns its own instance; the world keeps one host-side
/// instance for serial operations (placement, region mutation). Distribution
/// parameters are adjustable and sticky until changed again.
#[derive(Debug, Clone)]
pub struct KineticsRng {
    rng: StdRng,
    uniform_lo: f64,
    uniform_hi: f64,
    gaussian_mean: f64,
    gaussian_std: f64,
    poisson_mean: f64,
}

impl KineticsRng {
    /// Creates a generator from an explicit seed.
    pub fn seeded(seed: u64) -> Self {
        KineticsRng {
            rng: StdRng::seed_from_u64(seed),
            uniform_lo: 0.0,
            uniform_hi: 1.0,
            gaussian_mean: 0.0,
            gaussian_std: 1.0,
            poisson_mean: 1.0,
        }
    }

    /// Derives an independent generator for the given stream index.
    ///
    /// Used to hand each worker thread its own RNG so the parallel step never
    /// shares generator state across threads.
    pub fn fork(&self, stream: u64) -> Self {
        let seed = self
            .rng
            .clone()
            .next_u64()
            .wrapping_add(stream.wrapping_mul(STREAM_DERIVATION_PRIME));
        KineticsRng::seeded(seed)
    }

    /// Sets the range of subsequent `uniform()` draws.
    pub fn set_uniform_range(&mut self, lo: f64, hi: f64) {
        self.uniform_lo = lo.min(hi);
        self.uniform_hi = hi.max(lo);
    }

    /// Draws from the configured uniform range (default [0, 1)).
    pub fn uniform(&mut self) -> f64 {
        if self.uniform_hi - self.uniform_lo <= f64::EPSILON {
            return self.uniform_lo;
        }
        self.rng.random_range(self.uniform_lo..self.uniform_hi)
    }

    /// Draws uniformly from an explicit range, ignoring the configured one.
    pub fn uniform_in(&mut self, lo: f64, hi: f64) -> f64 {
        if hi - lo <= f64::EPSILON {
            return lo;
        }
        self.rng.random_range(lo..hi)
    }

    /// Sets the parameters of subsequent `gaussian()` draws.
    pub fn set_gaussian(&mut self, mean: f64, std: f64) {
        self.gaussian_mean = mean;
        self.gaussian_std = std.abs();
    }

    /// Draws from the configured gaussian distribution.
    pub fn gaussian(&mut self) -> f64 {
        let z: f64 = self.rng.sample(StandardNormal);
        self.gaussian_mean + self.gaussian_std * z
    }

    /// Draws a zero-mean gaussian with the given standard deviation.
    ///
    /// Fast path for the isotropic diffusion step, which changes sigma with
    /// every particle's current diffusion coefficient.
    pub fn gaussian_step(&mut self, std: f64) -> f64 {
        let z: f64 = self.rng.sample(StandardNormal);
        std * z
    }

    /// Sets the mean of subsequent `poisson()` draws.
    pub fn set_poisson(&mut self, mean: f64) {
        self.poisson_mean = mean.max(0.0);
    }

    /// Draws from the configured poisson distribution.
    pub fn poisson(&mut self) -> f64 {
        self.poisson_with_mean(self.poisson_mean)
    }

    /// Draws a poisson variate with the given mean.
    pub fn poisson_with_mean(&mut self, mean: f64) -> f64 {
        match Poisson::new(mean) {
            Ok(dist) => self.rng.sample(dist),
            // Poisson::new rejects non-positive and non-finite means; a zero
            // mean degenerates to a constant zero draw.
            Err(_) => 0.0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn uniform_respects_range() {
        let mut rng = KineticsRng::seeded(7);
        rng.set_uniform_range(2.0, 5.0);
        for _ in 0..1000 {
            let u = rng.uniform();
            assert!((2.0..5.0).contains(&u));
        }
    }

    #[test]
    fn gaussian_moments_are_plausible() {
        let mut rng = KineticsRng::seeded(11);
        rng.set_gaussian(3.0, 2.0);
        let n = 20_000;
        let draws: Vec<f64> = (0..n).map(|_| rng.gaussian()).collect();
        let mean = draws.iter().sum::<f64>() / n as f64;
        let var = draws.iter().map(|x| (x - mean).powi(2)).sum::<f64>() / n as f64;
        assert!((mean - 3.0).abs() < 0.1, "mean = {mean}");
        assert!((var - 4.0).abs() < 0.3, "var = {var}");
    }

    #[test]
    fn poisson_mean_is_plausible() {
        let mut rng = KineticsRng::seeded(13);
        rng.set_poisson(6.0);
        let n = 20_000;
        let mean = (0..n).map(|_| rng.poisson()).sum::<f64>() / n as f64;
        assert!((mean - 6.0).abs() < 0.2, "mean = {mean}");
        // Degenerate mean draws zero instead of failing.
        assert_eq!(rng.poisson_with_mean(0.0), 0.0);
    }

    #[test]
    fn forked_streams_diverge() {
        let base = KineticsRng::seeded(42);
        let mut a = base.fork(0);
        let mut b = base.fork(1);
        let same = (0..64).filter(|_| (a.uniform() - b.uniform()).abs() < 1e-15).count();
        assert!(same < 4, "forked streams should be independent");
    }
}
