use rand::Rng;
use rand::distributions::Standard;
use std::f64::consts::PI;
use std::time::Duration;

/// Timing of a producer stream: a mean pause plus normally distributed jitter.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Pacing {
    /// Mean pause between two events, in milliseconds.
    pub avg_delay_ms: f64,
    /// Standard deviation of the jitter added to each pause, in milliseconds.
    pub delay_jitter_ms: f64,
}

impl Pacing {
    pub fn new(avg_delay_ms: f64, delay_jitter_ms: f64) -> Self {
        Self {
            avg_delay_ms,
            delay_jitter_ms,
        }
    }

    /// Draw one jitter offset in milliseconds.
    ///
    /// Nothing is drawn from `rng` when the jitter is disabled.
    pub fn jitter<R: Rng>(&self, rng: &mut R) -> f64 {
        if self.delay_jitter_ms <= 0.0 {
            return 0.0;
        }
        // `Standard` yields [0, 1); flip it so the logarithm never sees zero.
        let u1 = 1.0 - rng.sample::<f64, _>(Standard);
        let u2 = rng.sample::<f64, _>(Standard);
        normal_sample(u1, u2) * self.delay_jitter_ms
    }

    /// The pause to take before the next event, never negative.
    pub fn next_delay<R: Rng>(&self, rng: &mut R) -> Duration {
        let ms = (self.avg_delay_ms + self.jitter(rng)).max(0.0);
        if ms.is_finite() {
            Duration::from_micros((ms * 1000.0).round() as u64)
        } else {
            Duration::ZERO
        }
    }
}

/// Standard normal sample from two uniform draws (Box–Muller).
///
/// `u1` must lie in `(0, 1]`, `u2` in `[0, 1)`.
pub fn normal_sample(u1: f64, u2: f64) -> f64 {
    (-2.0 * u1.ln()).sqrt() * (2.0 * PI * u2).cos()
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;
    use rand::rngs::StdRng;
    use rand::rngs::mock::StepRng;

    #[test]
    fn zero_jitter_is_exact_and_draws_nothing() {
        let pacing = Pacing::new(30.0, 0.0);
        let mut rng = StepRng::new(7, 1);
        assert_eq!(pacing.next_delay(&mut rng), Duration::from_millis(30));
        // Generator untouched: the next value is still the seed.
        assert_eq!(rand::RngCore::next_u64(&mut rng), 7);
    }

    #[test]
    fn box_muller_known_points() {
        assert_eq!(normal_sample(1.0, 0.0), 0.0);
        let z = normal_sample((-0.5f64).exp(), 0.0);
        assert!((z - 1.0).abs() < 1e-12);
        let z = normal_sample((-0.5f64).exp(), 0.5);
        assert!((z + 1.0).abs() < 1e-12);
    }

    #[test]
    fn negative_draw_clamps_to_zero() {
        // First draw near 1 makes u1 tiny (large magnitude), second draw is
        // exactly one half so the cosine is -1.
        let rng = StepRng::new(u64::MAX, (1u64 << 63).wrapping_add(1));
        let pacing = Pacing::new(10.0, 5.0);
        assert!(pacing.jitter(&mut rng.clone()) < -10.0);
        assert_eq!(pacing.next_delay(&mut rng.clone()), Duration::ZERO);
    }

    #[test]
    fn zero_draws_give_the_mean() {
        let mut rng = StepRng::new(0, 0);
        let pacing = Pacing::new(25.0, 10.0);
        assert_eq!(pacing.next_delay(&mut rng), Duration::from_millis(25));
    }

    #[test]
    fn samples_center_on_the_mean() {
        let mut rng = StdRng::seed_from_u64(42);
        let pacing = Pacing::new(100.0, 10.0);
        let n = 20_000;
        let samples: Vec<f64> = (0..n).map(|_| pacing.jitter(&mut rng)).collect();
        let mean = samples.iter().sum::<f64>() / n as f64;
        let var = samples.iter().map(|s| (s - mean).powi(2)).sum::<f64>() / n as f64;
        assert!(mean.abs() < 0.5, "mean {mean}");
        assert!((var.sqrt() - 10.0).abs() < 0.5, "std dev {}", var.sqrt());
        let within_one = samples.iter().filter(|s| s.abs() <= 10.0).count() as f64 / n as f64;
        assert!((within_one - 0.6827).abs() < 0.02, "within one sigma {within_one}");
    }
}
