//! Local cost approximation used when no real trial is run.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::f64::consts::PI;

use lb_types::{CostReport, MockConfig, MockModelKind};

/// Synthetic response curve of the first parameter with optional uniform
/// noise. Peaks at 1.0 for `x = 0`, so it is usually paired with
/// `direction: maximize`.
#[derive(Debug, Clone)]
pub struct MockCostModel {
    kind: MockModelKind,
    noise: f64,
    rng: StdRng,
}

impl MockCostModel {
    pub fn new(config: &MockConfig) -> Self {
        Self::with_rng(config, StdRng::from_os_rng())
    }

    pub fn with_seed(config: &MockConfig, seed: u64) -> Self {
        Self::with_rng(config, StdRng::seed_from_u64(seed))
    }

    fn with_rng(config: &MockConfig, rng: StdRng) -> Self {
        Self {
            kind: config.model,
            noise: config.noise.abs(),
            rng,
        }
    }

    /// Noise-free model value at `x`.
    pub fn curve(&self, x: f64) -> f64 {
        match self.kind {
            MockModelKind::Lorentzian => 1.0 / (1.0 + x * x),
            MockModelKind::Sinc2 => {
                if x == 0.0 {
                    1.0
                } else {
                    let arg = PI * x;
                    (arg.sin() / arg).powi(2)
                }
            }
        }
    }

    pub fn cost(&mut self, parameters: &[f64]) -> CostReport {
        let Some(&x) = parameters.first() else {
            return CostReport::bad();
        };
        let mut value = self.curve(x);
        if self.noise > 0.0 {
            value += self.rng.random_range(-self.noise..=self.noise);
        }
        let report = CostReport::new(value);
        if self.noise > 0.0 {
            report.with_uncertainty(self.noise)
        } else {
            report
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn model(kind: MockModelKind, noise: f64) -> MockCostModel {
        MockCostModel::with_seed(&MockConfig { model: kind, noise }, 9)
    }

    #[test]
    fn test_lorentzian_values() {
        let mut m = model(MockModelKind::Lorentzian, 0.0);
        assert_eq!(m.cost(&[0.0]).cost, 1.0);
        assert_eq!(m.cost(&[1.0, 5.0]).cost, 0.5);
        assert_eq!(m.cost(&[2.0]).uncertainty, None);
    }

    #[test]
    fn test_sinc2_zeros_at_integers() {
        let m = model(MockModelKind::Sinc2, 0.0);
        assert_eq!(m.curve(0.0), 1.0);
        assert!(m.curve(1.0) < 1e-20);
        assert!((m.curve(0.5) - 4.0 / (PI * PI)).abs() < 1e-12);
    }

    #[test]
    fn test_noise_is_bounded() {
        let mut m = model(MockModelKind::Lorentzian, 0.05);
        for _ in 0..100 {
            let report = m.cost(&[0.0]);
            assert!((report.cost - 1.0).abs() <= 0.05 + 1e-12);
            assert_eq!(report.uncertainty, Some(0.05));
        }
    }

    #[test]
    fn test_empty_vector_is_bad() {
        let mut m = model(MockModelKind::Lorentzian, 0.0);
        assert!(m.cost(&[]).bad);
    }
}
