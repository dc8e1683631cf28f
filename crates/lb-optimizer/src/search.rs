//! Reference search strategies.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use lb_types::{ControllerConfig, ControllerKind};

use crate::controller::{Controller, SearchBounds, StoppingRules, StrategyController};

/// Proposes the next point to evaluate.
pub trait SearchStrategy: Send {
    /// Next parameter vector (clamped to the bounds by the caller).
    fn suggest(&mut self, bounds: &SearchBounds) -> Vec<f64>;

    /// Report a completed trial so adaptive strategies can learn.
    /// `cost` is `None` for a bad trial.
    fn report(&mut self, _parameters: &[f64], _cost: Option<f64>) {}

    /// Human-readable strategy name.
    fn name(&self) -> &str;
}

fn sample_uniform(rng: &mut StdRng, bounds: &SearchBounds) -> Vec<f64> {
    bounds
        .lower
        .iter()
        .zip(&bounds.upper)
        .map(|(lo, hi)| {
            if lo < hi {
                rng.random_range(*lo..=*hi)
            } else {
                *lo
            }
        })
        .collect()
}

// ---- Random search ----

/// Independent uniform sampling across the box.
#[derive(Debug, Clone)]
pub struct RandomSearch {
    rng: StdRng,
}

impl RandomSearch {
    pub fn new() -> Self {
        Self {
            rng: StdRng::from_os_rng(),
        }
    }

    pub fn with_seed(seed: u64) -> Self {
        Self {
            rng: StdRng::seed_from_u64(seed),
        }
    }
}

impl Default for RandomSearch {
    fn default() -> Self {
        Self::new()
    }
}

impl SearchStrategy for RandomSearch {
    fn suggest(&mut self, bounds: &SearchBounds) -> Vec<f64> {
        sample_uniform(&mut self.rng, bounds)
    }

    fn name(&self) -> &str {
        "random"
    }
}

// ---- Perturbation search ----

/// Explores uniformly with probability `exploration_weight`, otherwise
/// perturbs the best point seen so far by up to `trust_region` of each
/// parameter's range.
#[derive(Debug, Clone)]
pub struct PerturbationSearch {
    rng: StdRng,
    exploration_weight: f64,
    trust_region: f64,
    best: Option<(Vec<f64>, f64)>,
}

impl PerturbationSearch {
    pub fn new(exploration_weight: f64, trust_region: f64) -> Self {
        Self::with_rng(StdRng::from_os_rng(), exploration_weight, trust_region)
    }

    pub fn with_seed(seed: u64, exploration_weight: f64, trust_region: f64) -> Self {
        Self::with_rng(StdRng::seed_from_u64(seed), exploration_weight, trust_region)
    }

    fn with_rng(rng: StdRng, exploration_weight: f64, trust_region: f64) -> Self {
        Self {
            rng,
            exploration_weight,
            trust_region,
            best: None,
        }
    }

    fn exploit(&mut self, base: &[f64], bounds: &SearchBounds) -> Vec<f64> {
        base.iter()
            .zip(bounds.lower.iter().zip(&bounds.upper))
            .map(|(v, (lo, hi))| {
                let range = hi - lo;
                if range <= 0.0 || self.trust_region <= 0.0 {
                    return *v;
                }
                let noise = self.rng.random_range(-self.trust_region..self.trust_region) * range;
                (v + noise).clamp(*lo, *hi)
            })
            .collect()
    }
}

impl SearchStrategy for PerturbationSearch {
    fn suggest(&mut self, bounds: &SearchBounds) -> Vec<f64> {
        let explore = self.rng.random::<f64>() < self.exploration_weight;
        match self.best.clone() {
            Some((base, _)) if !explore => self.exploit(&base, bounds),
            _ => sample_uniform(&mut self.rng, bounds),
        }
    }

    fn report(&mut self, parameters: &[f64], cost: Option<f64>) {
        let Some(cost) = cost else {
            return;
        };
        let better = self.best.as_ref().map_or(true, |(_, best)| cost < *best);
        if better {
            self.best = Some((parameters.to_vec(), cost));
        }
    }

    fn name(&self) -> &str {
        "perturbation"
    }
}

/// Build the configured reference controller over the given bounds.
pub fn controller_from_config(config: &ControllerConfig, bounds: SearchBounds) -> Box<dyn Controller> {
    let rules = StoppingRules {
        max_runs: config.max_runs,
        max_runs_without_better: config.max_runs_without_better,
        target_cost: config.target_cost,
    };
    match config.kind {
        ControllerKind::Random => Box::new(StrategyController::new(RandomSearch::new(), bounds, rules)),
        ControllerKind::Perturbation => Box::new(StrategyController::new(
            PerturbationSearch::new(config.exploration_weight, config.trust_region),
            bounds,
            rules,
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use lb_types::{BridgeError, BridgeResult, CostReport, TerminationReason};

    fn bounds() -> SearchBounds {
        SearchBounds::new(vec![-2.0, 0.0], vec![2.0, 1.0], vec![1.0, 0.5])
    }

    #[test]
    fn test_random_search_respects_bounds() {
        let mut rs = RandomSearch::with_seed(7);
        let b = bounds();
        for _ in 0..100 {
            let p = rs.suggest(&b);
            assert!(p[0] >= -2.0 && p[0] <= 2.0);
            assert!(p[1] >= 0.0 && p[1] <= 1.0);
        }
    }

    #[test]
    fn test_degenerate_dimension_is_fixed() {
        let mut rs = RandomSearch::with_seed(1);
        let b = SearchBounds::new(vec![0.3], vec![0.3], vec![0.3]);
        assert_eq!(rs.suggest(&b), vec![0.3]);
    }

    #[test]
    fn test_perturbation_stays_near_best() {
        let mut ps = PerturbationSearch::with_seed(3, 0.0, 0.1);
        let b = bounds();
        ps.report(&[0.0, 0.5], Some(1.0));
        ps.report(&[1.0, 1.0], None);
        for _ in 0..50 {
            let p = ps.suggest(&b);
            assert!((p[0] - 0.0).abs() <= 0.4 + 1e-12);
            assert!((p[1] - 0.5).abs() <= 0.1 + 1e-12);
        }
    }

    #[test]
    fn test_first_trial_uses_start_vector() {
        let mut seen = Vec::new();
        let mut cost_fn = |p: &[f64]| -> BridgeResult<CostReport> {
            seen.push(p.to_vec());
            Ok(CostReport::new(p[0] * p[0]))
        };
        let mut controller = StrategyController::new(
            RandomSearch::with_seed(11),
            bounds(),
            StoppingRules::max_runs(3),
        );
        let outcome = controller.optimize(&mut cost_fn).unwrap();
        assert_eq!(seen.len(), 3);
        assert_eq!(seen[0], vec![1.0, 0.5]);
        assert_eq!(outcome.runs, 3);
        assert_eq!(outcome.termination, TerminationReason::MaxRuns);
        assert!(outcome.best_cost.unwrap() <= 1.0);
    }

    #[test]
    fn test_controller_stops_without_improvement() {
        let mut cost_fn = |_: &[f64]| -> BridgeResult<CostReport> { Ok(CostReport::new(1.0)) };
        let config = ControllerConfig {
            max_runs: 100,
            max_runs_without_better: Some(4),
            ..ControllerConfig::default()
        };
        let mut controller = controller_from_config(&config, bounds());
        let outcome = controller.optimize(&mut cost_fn).unwrap();
        assert_eq!(outcome.termination, TerminationReason::NoImprovement);
        assert_eq!(outcome.runs, 5);
        assert_eq!(outcome.best_index, Some(0));
    }

    #[test]
    fn test_cost_function_error_stops_controller() {
        let mut calls = 0;
        let mut cost_fn = |_: &[f64]| -> BridgeResult<CostReport> {
            calls += 1;
            if calls == 2 {
                Err(BridgeError::HandoffClosed)
            } else {
                Ok(CostReport::new(0.0))
            }
        };
        let mut controller = controller_from_config(&ControllerConfig::default(), bounds());
        let err = controller.optimize(&mut cost_fn).unwrap_err();
        assert_eq!(err, BridgeError::HandoffClosed);
    }

    #[test]
    fn test_all_bad_trials_report_no_best() {
        let mut cost_fn = |_: &[f64]| -> BridgeResult<CostReport> { Ok(CostReport::bad()) };
        let mut controller = StrategyController::new(
            PerturbationSearch::with_seed(5, 0.3, 0.1),
            bounds(),
            StoppingRules::max_runs(4),
        );
        let outcome = controller.optimize(&mut cost_fn).unwrap();
        assert_eq!(outcome.best_cost, None);
        assert_eq!(outcome.best_index, None);
        assert_eq!(outcome.runs, 4);
    }
}
