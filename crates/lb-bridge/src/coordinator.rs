//! Session lifecycle driven by external ticks.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info, warn};

use lb_optimizer::{controller_from_config, SearchBounds};
use lb_types::{
    internal_error, BridgeError, BridgeResult, Config, CostReport, CostSource, LbError, LbResult,
    OptimizationOutcome, RunMode,
};

use crate::dispatch::{dispatcher_from_config, TrialDispatcher};
use crate::mock::MockCostModel;
use crate::session::{Session, SessionSettings};

/// Builds the dispatcher for each new session.
pub type DispatcherFactory = Box<dyn Fn(&Config) -> LbResult<Box<dyn TrialDispatcher>> + Send>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LifecycleState {
    NoSession,
    SessionActive,
    SessionDead,
}

/// One external re-invocation, normally once per completed trial.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Tick {
    /// Parameter values the completed trial actually ran with.
    #[serde(default)]
    pub observed: Option<HashMap<String, f64>>,
    #[serde(default)]
    pub cost: Option<CostSource>,
}

impl Tick {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn observed<I, S>(mut self, values: I) -> Self
    where
        I: IntoIterator<Item = (S, f64)>,
        S: Into<String>,
    {
        self.observed = Some(values.into_iter().map(|(k, v)| (k.into(), v)).collect());
        self
    }

    pub fn cost(mut self, cost: impl Into<CostSource>) -> Self {
        self.cost = Some(cost.into());
        self
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum TickOutcome {
    SessionStarted {
        session_id: String,
    },
    CostDelivered {
        session_id: String,
        trial_number: u64,
        report: CostReport,
    },
    /// Bad trial dropped under `ignore_bad`; the worker keeps waiting.
    BadTrialIgnored {
        session_id: String,
        trial_number: u64,
    },
    SessionEnded {
        session_id: String,
        result: BridgeResult<OptimizationOutcome>,
    },
}

/// Routes each tick to "start a session" or "feed the live session".
pub struct Coordinator {
    config: Config,
    state: LifecycleState,
    session: Option<Session>,
    mock: MockCostModel,
    dispatchers: DispatcherFactory,
}

impl Coordinator {
    pub fn new(config: Config) -> Self {
        let mock = MockCostModel::new(&config.mock);
        Self {
            config,
            state: LifecycleState::NoSession,
            session: None,
            mock,
            dispatchers: Box::new(dispatcher_from_config),
        }
    }

    pub fn with_dispatcher_factory(mut self, factory: DispatcherFactory) -> Self {
        self.dispatchers = factory;
        self
    }

    pub fn with_mock_model(mut self, mock: MockCostModel) -> Self {
        self.mock = mock;
        self
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn state(&self) -> LifecycleState {
        self.state
    }

    pub fn session(&self) -> Option<&Session> {
        self.session.as_ref()
    }

    pub fn on_tick(&mut self, tick: Tick) -> LbResult<TickOutcome> {
        match self.session.take() {
            None => self.start_session(),
            Some(session) if !session.is_alive() => Ok(self.reap(session)),
            Some(session) => {
                self.session = Some(session);
                match self.feed(tick) {
                    Err(LbError::Bridge(BridgeError::HandoffClosed)) => match self.session.take() {
                        Some(session) => Ok(self.reap(session)),
                        None => Err(BridgeError::HandoffClosed.into()),
                    },
                    other => other,
                }
            }
        }
    }

    /// Close the active session, if any, and return how its worker ended.
    pub fn shutdown(&mut self) -> Option<BridgeResult<OptimizationOutcome>> {
        let session = self.session.take()?;
        let id = session.id().to_string();
        let result = session.close();
        self.state = LifecycleState::NoSession;
        info!(session = %id, ok = result.is_ok(), "session shut down");
        Some(result)
    }

    fn start_session(&mut self) -> LbResult<TickOutcome> {
        self.config.validate()?;
        let graph = self
            .config
            .declared_bindings()
            .and_then(|bindings| lb_binding::validate(self.config.declared_parameters(), bindings))
            .map_err(|e| {
                warn!(error = %e, "binding validation failed, no session started");
                e
            })?;
        let graph = Arc::new(graph);

        let bounds = SearchBounds::new(graph.lower_bounds(), graph.upper_bounds(), graph.start_vector());
        let controller = controller_from_config(&self.config.controller, bounds);
        let dispatcher = (self.dispatchers)(&self.config)?;
        let settings = SessionSettings {
            direction: self.config.analysis.direction,
            default_uncertainty: self.config.analysis.default_uncertainty,
        };

        let session = Session::spawn(graph, controller, dispatcher, settings)?;
        let session_id = session.id().to_string();
        self.session = Some(session);
        self.state = LifecycleState::SessionActive;
        Ok(TickOutcome::SessionStarted { session_id })
    }

    fn reap(&mut self, session: Session) -> TickOutcome {
        let session_id = session.id().to_string();
        let trials = session.iteration();
        let result = session.close();
        self.state = LifecycleState::SessionDead;

        match &result {
            Ok(outcome) => info!(
                session = %session_id,
                trials,
                runs = outcome.runs,
                best_cost = ?outcome.reported_best_cost(self.config.analysis.direction),
                termination = ?outcome.termination,
                "session ended"
            ),
            Err(e) => warn!(session = %session_id, trials, error = %e, "session ended with error"),
        }
        TickOutcome::SessionEnded { session_id, result }
    }

    fn feed(&mut self, tick: Tick) -> LbResult<TickOutcome> {
        let mode = self.config.compilation.mode;
        let grace = self.config.analysis.request_grace();
        let ignore_bad = self.config.analysis.ignore_bad;
        let Some(session) = self.session.as_mut() else {
            return Err(internal_error!("tick fed without an active session"));
        };

        if session.outstanding.is_none() {
            session.outstanding = session.handoff().next_request(grace)?;
        }
        let Some(request) = session.outstanding.as_ref() else {
            warn!(session = %session.id(), "tick arrived with no trial outstanding");
            return Err(BridgeError::NoOutstandingRequest.into());
        };
        let session_id = session.id().to_string();
        let trial_number = request.trial_number;

        let report = match mode {
            RunMode::Live => {
                let observed = observed_vector(session, tick.observed.as_ref())?;
                if observed != request.parameters {
                    warn!(
                        session = %session_id,
                        trial = trial_number,
                        expected = ?request.parameters,
                        observed = ?observed,
                        "tick does not match the requested trial"
                    );
                    return Err(BridgeError::Integrity {
                        expected: request.parameters.clone(),
                        observed,
                    }
                    .into());
                }
                tick.cost
                    .map(CostSource::into_report)
                    .unwrap_or_else(CostReport::bad)
            }
            RunMode::Mock => self.mock.cost(&request.parameters),
        };

        if ignore_bad && report.normalized(None).bad {
            debug!(session = %session_id, trial = trial_number, "bad trial ignored");
            return Ok(TickOutcome::BadTrialIgnored {
                session_id,
                trial_number,
            });
        }

        session.handoff().deliver(report)?;
        session.outstanding = None;
        debug!(session = %session_id, trial = trial_number, cost = report.cost, "cost delivered");
        Ok(TickOutcome::CostDelivered {
            session_id,
            trial_number,
            report,
        })
    }
}

impl Drop for Coordinator {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// Align observed values to parameter order.
fn observed_vector(session: &Session, observed: Option<&HashMap<String, f64>>) -> BridgeResult<Vec<f64>> {
    session
        .graph()
        .parameter_names()
        .map(|name| {
            observed
                .and_then(|values| values.get(name))
                .copied()
                .ok_or_else(|| BridgeError::MissingObservation {
                    parameter: name.to_string(),
                })
        })
        .collect()
}
