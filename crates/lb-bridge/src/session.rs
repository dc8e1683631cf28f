//! One optimization run: a worker thread plus its handoff and counter.

use chrono::{DateTime, Local};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use tracing::{error, info};

use lb_binding::BindingGraph;
use lb_optimizer::Controller;
use lb_types::{BridgeError, BridgeResult, LbResult, ObjectiveDirection, OptimizationOutcome, TrialRequest};

use crate::bridge::ExecutionBridge;
use crate::dispatch::TrialDispatcher;
use crate::handoff::{handoff, CoordinatorEnd};

/// `%Y%m%dT%H%M%S` plus a random suffix so same-second sessions differ.
pub fn session_id(started_at: DateTime<Local>) -> String {
    format!(
        "{}-{:04x}",
        started_at.format("%Y%m%dT%H%M%S"),
        rand::random::<u16>()
    )
}

/// Per-session settings copied out of the config.
#[derive(Debug, Clone, Copy, Default)]
pub struct SessionSettings {
    pub direction: ObjectiveDirection,
    pub default_uncertainty: Option<f64>,
}

pub struct Session {
    id: String,
    started_at: DateTime<Local>,
    graph: Arc<BindingGraph>,
    iteration: Arc<AtomicU64>,
    handoff: CoordinatorEnd,
    worker: JoinHandle<BridgeResult<OptimizationOutcome>>,
    /// Request announced by the worker and not yet answered.
    pub(crate) outstanding: Option<TrialRequest>,
}

impl Session {
    /// Start the worker thread running `controller` against a fresh bridge.
    pub fn spawn(
        graph: Arc<BindingGraph>,
        mut controller: Box<dyn Controller>,
        dispatcher: Box<dyn TrialDispatcher>,
        settings: SessionSettings,
    ) -> LbResult<Self> {
        let started_at = Local::now();
        let id = session_id(started_at);
        let iteration = Arc::new(AtomicU64::new(0));
        let (coordinator_end, worker_end) = handoff();

        let mut bridge = ExecutionBridge::new(
            id.clone(),
            Arc::clone(&graph),
            Arc::clone(&iteration),
            worker_end,
            dispatcher,
        )
        .with_direction(settings.direction)
        .with_default_uncertainty(settings.default_uncertainty);

        let worker = thread::Builder::new()
            .name(format!("lb-session-{id}"))
            .spawn(move || {
                bridge.start();
                let result = controller.optimize(&mut bridge);
                match &result {
                    Ok(outcome) => bridge.finish(outcome),
                    Err(e) => error!(session = %bridge.session_id(), error = %e, "session worker stopped"),
                }
                result
            })?;

        info!(session = %id, parameters = graph.dimension(), "session started");
        Ok(Self {
            id,
            started_at,
            graph,
            iteration,
            handoff: coordinator_end,
            worker,
            outstanding: None,
        })
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn started_at(&self) -> DateTime<Local> {
        self.started_at
    }

    pub fn graph(&self) -> &BindingGraph {
        &self.graph
    }

    /// Trials requested so far in this session.
    pub fn iteration(&self) -> u64 {
        self.iteration.load(Ordering::SeqCst)
    }

    pub fn handoff(&self) -> &CoordinatorEnd {
        &self.handoff
    }

    pub fn outstanding(&self) -> Option<&TrialRequest> {
        self.outstanding.as_ref()
    }

    pub fn is_alive(&self) -> bool {
        !self.worker.is_finished()
    }

    /// Drop the handoff and join the worker. A worker blocked on a cost
    /// wakes with `HandoffClosed`.
    pub fn close(self) -> BridgeResult<OptimizationOutcome> {
        let Self {
            id, handoff, worker, ..
        } = self;
        drop(handoff);
        match worker.join() {
            Ok(result) => result,
            Err(_) => Err(BridgeError::WorkerPanicked { session: id }),
        }
    }
}
