//! The execution bridge: a blocking cost function backed by the handoff.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{debug, warn};

use lb_binding::BindingGraph;
use lb_optimizer::CostFunction;
use lb_types::{BridgeResult, CostReport, ObjectiveDirection, OptimizationOutcome, TrialRequest};

use crate::dispatch::TrialDispatcher;
use crate::handoff::WorkerEnd;

/// Runs inside the session worker. Each `get_cost` announces a trial,
/// dispatches it and blocks until the tick handler delivers its cost.
pub struct ExecutionBridge {
    session_id: String,
    graph: Arc<BindingGraph>,
    iteration: Arc<AtomicU64>,
    handoff: WorkerEnd,
    dispatcher: Box<dyn TrialDispatcher>,
    direction: ObjectiveDirection,
    default_uncertainty: Option<f64>,
}

impl ExecutionBridge {
    pub fn new(
        session_id: impl Into<String>,
        graph: Arc<BindingGraph>,
        iteration: Arc<AtomicU64>,
        handoff: WorkerEnd,
        dispatcher: Box<dyn TrialDispatcher>,
    ) -> Self {
        Self {
            session_id: session_id.into(),
            graph,
            iteration,
            handoff,
            dispatcher,
            direction: ObjectiveDirection::Minimize,
            default_uncertainty: None,
        }
    }

    pub fn with_direction(mut self, direction: ObjectiveDirection) -> Self {
        self.direction = direction;
        self
    }

    pub fn with_default_uncertainty(mut self, uncertainty: Option<f64>) -> Self {
        self.default_uncertainty = uncertainty;
        self
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    pub fn start(&mut self) {
        self.dispatcher.session_started(&self.session_id);
    }

    /// Report the end of the run, with the best parameters resolved to
    /// targets when any trial succeeded.
    pub fn finish(&mut self, outcome: &OptimizationOutcome) {
        let best_targets = if outcome.best_parameters.is_empty() {
            Vec::new()
        } else {
            self.graph
                .resolve(&outcome.best_parameters)
                .unwrap_or_else(|e| {
                    warn!(session = %self.session_id, error = %e, "best parameters do not resolve");
                    Vec::new()
                })
        };
        self.dispatcher
            .session_finished(&self.session_id, outcome, &best_targets);
    }
}

impl CostFunction for ExecutionBridge {
    fn get_cost(&mut self, parameters: &[f64]) -> BridgeResult<CostReport> {
        let trial_number = self.iteration.fetch_add(1, Ordering::SeqCst) + 1;
        let targets = self.graph.resolve(parameters)?;
        let request = TrialRequest::new(self.session_id.clone(), trial_number, parameters.to_vec());
        debug!(
            session = %self.session_id,
            trial = trial_number,
            parameters = ?parameters,
            "trial requested"
        );

        self.handoff.announce(request.clone())?;
        self.dispatcher.dispatch(&request, &targets)?;

        let report = self
            .handoff
            .await_cost()?
            .normalized(self.default_uncertainty)
            .oriented(self.direction);
        debug!(
            session = %self.session_id,
            trial = trial_number,
            cost = ?report.objective(),
            "trial answered"
        );
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dispatch::MockDispatcher;
    use crate::handoff::handoff;
    use lb_types::{BridgeError, OptimizerParameter, ResolvedTarget, TargetBinding, Transform};
    use parking_lot::Mutex;
    use std::time::Duration;

    fn graph() -> Arc<BindingGraph> {
        Arc::new(
            lb_binding::validate(
                vec![
                    OptimizerParameter::new("x", -2.0, 2.0, 0.0),
                    OptimizerParameter::new("y", 0.0, 4.0, 1.0),
                ],
                vec![
                    TargetBinding::identity("x_global", "cooling", "x"),
                    TargetBinding::derived(
                        "ratio",
                        "cooling",
                        Transform::Quotient,
                        vec!["x".into(), "y".into()],
                    ),
                ],
            )
            .unwrap(),
        )
    }

    struct Recording(Arc<Mutex<Vec<Vec<ResolvedTarget>>>>);

    impl TrialDispatcher for Recording {
        fn dispatch(&mut self, _request: &TrialRequest, targets: &[ResolvedTarget]) -> BridgeResult<()> {
            self.0.lock().push(targets.to_vec());
            Ok(())
        }

        fn name(&self) -> &str {
            "recording"
        }
    }

    #[test]
    fn test_second_call_blocks_until_next_delivery() {
        let (coordinator, worker) = handoff();
        let iteration = Arc::new(AtomicU64::new(0));
        let mut bridge = ExecutionBridge::new(
            "s",
            graph(),
            Arc::clone(&iteration),
            worker,
            Box::new(MockDispatcher),
        );

        let handle = std::thread::spawn(move || {
            let first = bridge.get_cost(&[1.0, 2.0])?;
            let second = bridge.get_cost(&[0.5, 2.0])?;
            Ok::<_, BridgeError>((first, second))
        });

        let first = coordinator
            .next_request(Duration::from_secs(2))
            .unwrap()
            .unwrap();
        assert_eq!(first.trial_number, 1);
        coordinator.deliver(CostReport::new(0.25)).unwrap();

        let second = coordinator
            .next_request(Duration::from_secs(2))
            .unwrap()
            .unwrap();
        assert_eq!(second.trial_number, 2);
        assert_eq!(second.parameters, vec![0.5, 2.0]);

        // no tick yet: the worker is parked on the empty slot
        std::thread::sleep(Duration::from_millis(50));
        assert!(!handle.is_finished());
        assert_eq!(coordinator.pending_costs(), 0);

        coordinator.deliver(CostReport::new(0.5)).unwrap();
        let (a, b) = handle.join().unwrap().unwrap();
        assert_eq!(a.cost, 0.25);
        assert_eq!(b.cost, 0.5);
        assert_eq!(iteration.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_maximize_is_negated_and_bad_passes_through() {
        let (coordinator, worker) = handoff();
        let mut bridge = ExecutionBridge::new(
            "s",
            graph(),
            Arc::new(AtomicU64::new(0)),
            worker,
            Box::new(MockDispatcher),
        )
        .with_direction(ObjectiveDirection::Maximize)
        .with_default_uncertainty(Some(0.1));

        coordinator.deliver(CostReport::new(0.8)).unwrap();
        let report = bridge.get_cost(&[0.0, 1.0]).unwrap();
        assert_eq!(report.cost, -0.8);
        assert_eq!(report.uncertainty, Some(0.1));
        assert_eq!(
            ObjectiveDirection::Maximize.from_optimizer(report.cost),
            0.8
        );
        coordinator.next_request(Duration::from_millis(10)).unwrap();

        coordinator.deliver(CostReport::new(f64::NAN)).unwrap();
        let report = bridge.get_cost(&[0.0, 1.0]).unwrap();
        assert!(report.bad);
        assert_eq!(report.objective(), None);
    }

    #[test]
    fn test_dispatch_sees_resolved_targets() {
        let (coordinator, worker) = handoff();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let mut bridge = ExecutionBridge::new(
            "s",
            graph(),
            Arc::new(AtomicU64::new(0)),
            worker,
            Box::new(Recording(Arc::clone(&seen))),
        );
        coordinator.deliver(CostReport::new(1.0)).unwrap();
        bridge.get_cost(&[1.0, 4.0]).unwrap();

        let seen = seen.lock();
        assert_eq!(seen[0][0].value, 1.0);
        assert_eq!(seen[0][1].variable, "ratio");
        assert_eq!(seen[0][1].value, 0.25);
    }

    #[test]
    fn test_closed_handoff_ends_worker() {
        let (coordinator, worker) = handoff();
        let mut bridge = ExecutionBridge::new(
            "s",
            graph(),
            Arc::new(AtomicU64::new(0)),
            worker,
            Box::new(MockDispatcher),
        );
        drop(coordinator);
        assert_eq!(bridge.get_cost(&[0.0, 1.0]), Err(BridgeError::HandoffClosed));
    }
}
