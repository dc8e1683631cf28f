//! Controller seam, stopping rules and best-trial tracking.

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use lb_types::{BridgeResult, CostReport, OptimizationOutcome, TerminationReason};

use crate::search::SearchStrategy;

/// Blocking cost evaluation as seen by a controller.
///
/// Costs are always in the minimizing convention; a bad trial comes back with
/// `bad = true` and must not be learned from.
pub trait CostFunction {
    fn get_cost(&mut self, parameters: &[f64]) -> BridgeResult<CostReport>;
}

impl<F> CostFunction for F
where
    F: FnMut(&[f64]) -> BridgeResult<CostReport>,
{
    fn get_cost(&mut self, parameters: &[f64]) -> BridgeResult<CostReport> {
        self(parameters)
    }
}

/// An optimization controller: owns the run loop, calls the cost function
/// sequentially, returns when it decides to stop.
pub trait Controller: Send {
    fn optimize(&mut self, cost_fn: &mut dyn CostFunction) -> BridgeResult<OptimizationOutcome>;

    /// Human-readable controller name.
    fn name(&self) -> &str;
}

/// Box bounds of the search space, aligned to parameter order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchBounds {
    pub lower: Vec<f64>,
    pub upper: Vec<f64>,
    pub start: Vec<f64>,
}

impl SearchBounds {
    pub fn new(lower: Vec<f64>, upper: Vec<f64>, start: Vec<f64>) -> Self {
        Self {
            lower,
            upper,
            start,
        }
    }

    pub fn dimension(&self) -> usize {
        self.start.len()
    }

    pub fn clamp(&self, point: &mut [f64]) {
        for ((v, lo), hi) in point.iter_mut().zip(&self.lower).zip(&self.upper) {
            *v = v.clamp(*lo, *hi);
        }
    }
}

/// When a controller's run loop exits.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoppingRules {
    pub max_runs: u64,
    pub max_runs_without_better: Option<u64>,
    pub target_cost: Option<f64>,
}

impl StoppingRules {
    pub fn max_runs(max_runs: u64) -> Self {
        Self {
            max_runs,
            max_runs_without_better: None,
            target_cost: None,
        }
    }

    fn check(&self, tracker: &BestTracker) -> Option<TerminationReason> {
        if let (Some(target), Some(best)) = (self.target_cost, tracker.best_cost) {
            if best <= target {
                return Some(TerminationReason::TargetCostReached);
            }
        }
        if tracker.runs >= self.max_runs {
            return Some(TerminationReason::MaxRuns);
        }
        match self.max_runs_without_better {
            Some(limit) if tracker.runs_without_better >= limit => {
                Some(TerminationReason::NoImprovement)
            }
            _ => None,
        }
    }
}

/// Tracks the best trial seen so far (lowest cost wins).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BestTracker {
    pub best_parameters: Vec<f64>,
    pub best_cost: Option<f64>,
    pub best_uncertainty: Option<f64>,
    pub best_index: Option<u64>,
    pub runs: u64,
    pub runs_without_better: u64,
}

impl BestTracker {
    /// Record one trial. Returns `true` if it became the new best.
    pub fn record(&mut self, parameters: &[f64], report: &CostReport) -> bool {
        let index = self.runs;
        self.runs += 1;

        let improved = match (report.objective(), self.best_cost) {
            (None, _) => false,
            (Some(_), None) => true,
            (Some(cost), Some(best)) => cost < best,
        };

        if improved {
            self.best_parameters = parameters.to_vec();
            self.best_cost = report.objective();
            self.best_uncertainty = report.uncertainty;
            self.best_index = Some(index);
            self.runs_without_better = 0;
        } else {
            self.runs_without_better += 1;
        }
        improved
    }

    pub fn outcome(&self, termination: TerminationReason) -> OptimizationOutcome {
        OptimizationOutcome {
            best_parameters: self.best_parameters.clone(),
            best_cost: self.best_cost,
            best_uncertainty: self.best_uncertainty,
            best_index: self.best_index,
            runs: self.runs,
            termination,
        }
    }
}

/// Runs a [`SearchStrategy`] against a cost function until the stopping
/// rules fire. The first trial always evaluates the start vector.
pub struct StrategyController<S: SearchStrategy> {
    strategy: S,
    bounds: SearchBounds,
    rules: StoppingRules,
    tracker: BestTracker,
}

impl<S: SearchStrategy> StrategyController<S> {
    pub fn new(strategy: S, bounds: SearchBounds, rules: StoppingRules) -> Self {
        Self {
            strategy,
            bounds,
            rules,
            tracker: BestTracker::default(),
        }
    }

    pub fn tracker(&self) -> &BestTracker {
        &self.tracker
    }
}

impl<S: SearchStrategy> Controller for StrategyController<S> {
    fn optimize(&mut self, cost_fn: &mut dyn CostFunction) -> BridgeResult<OptimizationOutcome> {
        self.tracker = BestTracker::default();
        info!(
            strategy = self.strategy.name(),
            dimension = self.bounds.dimension(),
            max_runs = self.rules.max_runs,
            "controller starting"
        );

        loop {
            let mut point = if self.tracker.runs == 0 {
                self.bounds.start.clone()
            } else {
                self.strategy.suggest(&self.bounds)
            };
            self.bounds.clamp(&mut point);

            let report = cost_fn.get_cost(&point)?;
            let improved = self.tracker.record(&point, &report);
            self.strategy.report(&point, report.objective());
            debug!(
                run = self.tracker.runs,
                cost = ?report.objective(),
                improved,
                "trial recorded"
            );

            if let Some(reason) = self.rules.check(&self.tracker) {
                info!(
                    runs = self.tracker.runs,
                    best_cost = ?self.tracker.best_cost,
                    reason = ?reason,
                    "controller finished"
                );
                return Ok(self.tracker.outcome(reason));
            }
        }
    }

    fn name(&self) -> &str {
        self.strategy.name()
    }
}
