//! Trial requests, cost reports and optimization outcomes.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Whether the external objective is maximized or minimized.
///
/// Controllers always minimize; a maximized objective is negated on the way
/// in and un-negated when best results are reported back out.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ObjectiveDirection {
    Maximize,
    #[default]
    Minimize,
}

impl ObjectiveDirection {
    /// Map an externally measured cost into the controller's convention.
    pub fn to_optimizer(self, cost: f64) -> f64 {
        match self {
            Self::Maximize => -cost,
            Self::Minimize => cost,
        }
    }

    /// Map a controller-side cost back to the external objective.
    pub fn from_optimizer(self, cost: f64) -> f64 {
        // negation is its own inverse
        self.to_optimizer(cost)
    }
}

/// One request for a cost, created each time the controller asks.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrialRequest {
    pub id: Uuid,
    pub session_id: String,
    /// 1-based sequence number within the session.
    pub trial_number: u64,
    /// Values aligned to parameter declaration order.
    pub parameters: Vec<f64>,
    pub created_at: DateTime<Utc>,
}

impl TrialRequest {
    pub fn new(session_id: impl Into<String>, trial_number: u64, parameters: Vec<f64>) -> Self {
        Self {
            id: Uuid::new_v4(),
            session_id: session_id.into(),
            trial_number,
            parameters,
            created_at: Utc::now(),
        }
    }
}

/// Cost measured for one completed trial.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CostReport {
    pub cost: f64,
    #[serde(default)]
    pub uncertainty: Option<f64>,
    /// The trial must not influence the search.
    #[serde(default)]
    pub bad: bool,
}

impl CostReport {
    pub fn new(cost: f64) -> Self {
        Self {
            cost,
            uncertainty: None,
            bad: false,
        }
    }

    pub fn with_uncertainty(mut self, uncertainty: f64) -> Self {
        self.uncertainty = Some(uncertainty);
        self
    }

    /// A report flagged bad with no usable cost.
    pub fn bad() -> Self {
        Self {
            cost: f64::NAN,
            uncertainty: None,
            bad: true,
        }
    }

    /// Treat non-finite costs exactly like an explicit bad flag and fill in a
    /// default uncertainty when none was reported.
    pub fn normalized(self, default_uncertainty: Option<f64>) -> Self {
        if self.bad || !self.cost.is_finite() {
            return Self::bad();
        }
        Self {
            cost: self.cost,
            uncertainty: self.uncertainty.or(default_uncertainty),
            bad: false,
        }
    }

    /// Convert into the controller's minimizing convention.
    pub fn oriented(self, direction: ObjectiveDirection) -> Self {
        if self.bad {
            return self;
        }
        Self {
            cost: direction.to_optimizer(self.cost),
            ..self
        }
    }

    /// The cost a controller may learn from, or `None` for a bad trial.
    pub fn objective(&self) -> Option<f64> {
        if self.bad || !self.cost.is_finite() {
            None
        } else {
            Some(self.cost)
        }
    }
}

/// Cost as delivered by the analysis stage: either a structured report or a
/// bare scalar.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum CostSource {
    Scalar(f64),
    Report(CostReport),
}

impl CostSource {
    pub fn into_report(self) -> CostReport {
        match self {
            Self::Scalar(cost) => CostReport::new(cost),
            Self::Report(report) => report,
        }
    }
}

impl From<f64> for CostSource {
    fn from(cost: f64) -> Self {
        Self::Scalar(cost)
    }
}

impl From<CostReport> for CostSource {
    fn from(report: CostReport) -> Self {
        Self::Report(report)
    }
}

/// Why a controller's run loop exited.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TerminationReason {
    MaxRuns,
    NoImprovement,
    TargetCostReached,
}

/// Best result of one optimization run, in the controller's convention.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OptimizationOutcome {
    pub best_parameters: Vec<f64>,
    pub best_cost: Option<f64>,
    pub best_uncertainty: Option<f64>,
    /// 0-based index of the run that produced the best cost.
    pub best_index: Option<u64>,
    pub runs: u64,
    pub termination: TerminationReason,
}

impl OptimizationOutcome {
    /// Best cost in the external objective's sign convention.
    pub fn reported_best_cost(&self, direction: ObjectiveDirection) -> Option<f64> {
        self.best_cost.map(|cost| direction.from_optimizer(cost))
    }
}
