//! Where trial requests go once their targets are resolved.

use tracing::{debug, info, warn};

use lb_shot::{RequestKind, ShotClient, ShotRequest};
use lb_types::{
    BridgeError, BridgeResult, CompilationConfig, Config, LbResult, OptimizationOutcome,
    ResolvedTarget, RunMode, TrialRequest,
};

/// Sends trials out for execution.
pub trait TrialDispatcher: Send {
    fn session_started(&mut self, _session_id: &str) {}

    /// Hand off one trial; must not wait for the trial's cost.
    fn dispatch(&mut self, request: &TrialRequest, targets: &[ResolvedTarget]) -> BridgeResult<()>;

    /// `best_targets` are the targets resolved from the best parameters.
    fn session_finished(
        &mut self,
        _session_id: &str,
        _outcome: &OptimizationOutcome,
        _best_targets: &[ResolvedTarget],
    ) {
    }

    fn name(&self) -> &str;
}

/// Nothing leaves the process; costs come from the mock model.
#[derive(Debug, Default)]
pub struct MockDispatcher;

impl TrialDispatcher for MockDispatcher {
    fn dispatch(&mut self, request: &TrialRequest, _targets: &[ResolvedTarget]) -> BridgeResult<()> {
        debug!(trial = request.trial_number, "mock trial, nothing dispatched");
        Ok(())
    }

    fn name(&self) -> &str {
        "mock"
    }
}

/// Forwards each trial to the remote shot service.
pub struct RemoteShotDispatcher {
    runtime: tokio::runtime::Runtime,
    client: ShotClient,
    template: String,
    output_folder: String,
}

impl RemoteShotDispatcher {
    pub fn new(config: &CompilationConfig) -> LbResult<Self> {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()?;
        Ok(Self {
            runtime,
            client: ShotClient::new(config.service_address.clone(), config.reply_timeout()),
            template: config.template.clone(),
            output_folder: config.output_folder.clone(),
        })
    }

    fn shot(&self, kind: RequestKind, session_id: &str, trial_number: u64, targets: &[ResolvedTarget]) -> ShotRequest {
        ShotRequest {
            kind,
            template: self.template.clone(),
            output_folder: self.output_folder.clone(),
            substitutions: targets.iter().cloned().map(Into::into).collect(),
            trial_number,
            session_id: Some(session_id.to_string()),
        }
    }
}

impl TrialDispatcher for RemoteShotDispatcher {
    fn session_started(&mut self, session_id: &str) {
        info!(
            session = session_id,
            service = self.client.address(),
            template = %self.template,
            "remote session started"
        );
    }

    fn dispatch(&mut self, request: &TrialRequest, targets: &[ResolvedTarget]) -> BridgeResult<()> {
        let shot = self.shot(RequestKind::Trial, &request.session_id, request.trial_number, targets);
        let artifact = self
            .runtime
            .block_on(self.client.send(&shot))
            .map_err(|e| BridgeError::Dispatch {
                message: e.to_string(),
            })?;
        info!(trial = request.trial_number, artifact = %artifact, "trial dispatched");
        Ok(())
    }

    fn session_finished(
        &mut self,
        session_id: &str,
        outcome: &OptimizationOutcome,
        best_targets: &[ResolvedTarget],
    ) {
        for target in best_targets {
            info!(
                session = session_id,
                group = %target.group,
                variable = %target.variable,
                value = target.value,
                "best value"
            );
        }
        info!(
            session = session_id,
            runs = outcome.runs,
            termination = ?outcome.termination,
            "remote session finished"
        );
        if best_targets.is_empty() {
            return;
        }

        // best values go out as their own artifact
        let best_trial = outcome.best_index.map_or(0, |i| i + 1);
        let shot = self.shot(RequestKind::Best, session_id, best_trial, best_targets);
        match self.runtime.block_on(self.client.send(&shot)) {
            Ok(artifact) => info!(session = session_id, artifact = %artifact, "best values written"),
            Err(e) => warn!(session = session_id, error = %e, "failed to write best values"),
        }
    }

    fn name(&self) -> &str {
        "remote"
    }
}

/// Pick the dispatcher for the configured run mode.
pub fn dispatcher_from_config(config: &Config) -> LbResult<Box<dyn TrialDispatcher>> {
    Ok(match config.compilation.mode {
        RunMode::Live => Box::new(RemoteShotDispatcher::new(&config.compilation)?),
        RunMode::Mock => Box::new(MockDispatcher),
    })
}
