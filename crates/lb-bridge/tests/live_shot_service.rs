//! Live mode against an in-process shot service: the coordinator dispatches
//! through TCP, and each tick reads the parameters back out of the compiled
//! artifact the way the analysis stage would.

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use lb_bridge::{Coordinator, LifecycleState, Tick, TickOutcome};
use lb_shot::{JsonArtifactStore, LoggingSubmitter, ShotService, TRIAL_GROUP};
use lb_types::{Config, ControllerKind, ParameterDecl, RunMode};

/// Submission happens only once the artifact is fully written.
fn wait_for_submission(submitter: &LoggingSubmitter, count: usize) -> PathBuf {
    for _ in 0..200 {
        let submitted = submitter.submitted();
        if submitted.len() >= count {
            return submitted[count - 1].clone();
        }
        std::thread::sleep(Duration::from_millis(10));
    }
    panic!("artifact {count} was never submitted");
}

fn read_doc(artifact: &Path) -> serde_json::Value {
    serde_json::from_str(&fs::read_to_string(artifact).unwrap()).unwrap()
}

/// Parameter values as recorded in the artifact (identity targets only).
fn observed_from(artifact: &Path) -> HashMap<String, f64> {
    let doc = read_doc(artifact);
    let mut observed = HashMap::new();
    observed.insert("x".to_string(), doc["cooling"]["x_global"].as_f64().unwrap());
    observed.insert("y".to_string(), doc["cooling"]["y_global"].as_f64().unwrap());
    observed
}

#[test]
fn test_live_session_round_trips_through_shot_service() {
    let dir = tempfile::TempDir::new().unwrap();
    let template = dir.path().join("template.json");
    fs::write(&template, r#"{"cooling": {"x_global": 0.0, "y_global": 0.0}}"#).unwrap();
    let out = dir.path().join("out");

    let server = tokio::runtime::Runtime::new().unwrap();
    let submitter = Arc::new(LoggingSubmitter::new());
    let service = server
        .block_on(ShotService::bind(
            "127.0.0.1:0",
            Duration::from_secs(30),
            Arc::new(JsonArtifactStore::new()),
            submitter.clone(),
        ))
        .unwrap();
    let addr = service.local_addr().unwrap();
    let (stop_tx, stop_rx) = tokio::sync::oneshot::channel::<()>();
    let running = server.spawn(service.run(async {
        let _ = stop_rx.await;
    }));

    let yaml = format!(
        r#"
compilation:
  mode: live
  service_address: "{addr}"
  template: "{template}"
  output_folder: "{out}"
analysis:
  direction: minimize
  request_grace_ms: 2000
controller:
  kind: random
  max_runs: 3
  max_runs_without_better: null
parameters:
  - {{ name: x, group: cooling, min: -1.0, max: 1.0, start: 0.25, target: x_global }}
  - {{ name: y, group: cooling, min: 0.0, max: 2.0, start: 1.0, target: y_global }}
"#,
        template = template.display(),
        out = out.display(),
    );
    let config = Config::from_yaml_str(&yaml).unwrap();
    assert_eq!(config.compilation.mode, RunMode::Live);
    assert_eq!(config.controller.kind, ControllerKind::Random);
    assert_eq!(config.parameters.len(), 2);
    assert!(config.parameters.iter().all(|p: &ParameterDecl| p.enable));

    let mut coordinator = Coordinator::new(config);
    let session_id = match coordinator.on_tick(Tick::new()).unwrap() {
        TickOutcome::SessionStarted { session_id } => session_id,
        other => panic!("unexpected outcome {other:?}"),
    };

    for trial in 1..=3u64 {
        let artifact = wait_for_submission(&submitter, trial as usize);
        assert!(artifact.starts_with(&out));
        let observed = observed_from(&artifact);
        let doc = read_doc(&artifact);
        assert_eq!(doc[TRIAL_GROUP]["session"], session_id.as_str());
        assert_eq!(doc[TRIAL_GROUP]["iteration"], trial);
        if trial == 1 {
            assert_eq!(observed["x"], 0.25);
            assert_eq!(observed["y"], 1.0);
        }
        let cost = observed["x"] * observed["x"] + observed["y"];
        let tick = Tick {
            observed: Some(observed),
            cost: Some(cost.into()),
        };
        match coordinator.on_tick(tick).unwrap() {
            TickOutcome::CostDelivered { trial_number, .. } => assert_eq!(trial_number, trial),
            other => panic!("unexpected outcome {other:?}"),
        }
    }

    let outcome = match coordinator.on_tick(Tick::new()).unwrap() {
        TickOutcome::SessionEnded { result, .. } => result.unwrap(),
        other => panic!("unexpected outcome {other:?}"),
    };
    assert_eq!(outcome.runs, 3);
    assert!(outcome.best_cost.unwrap() <= 1.0625);
    assert_eq!(coordinator.state(), LifecycleState::SessionDead);

    // the finished session leaves its best values behind
    let best = fs::read_dir(&out)
        .unwrap()
        .map(|entry| entry.unwrap().path())
        .find(|path| path.display().to_string().contains("_best_"))
        .expect("best values artifact");
    let doc = read_doc(&best);
    assert_eq!(doc["cooling"]["x_global"].as_f64(), Some(outcome.best_parameters[0]));
    assert_eq!(doc["cooling"]["y_global"].as_f64(), Some(outcome.best_parameters[1]));
    assert_eq!(doc[TRIAL_GROUP]["session"], session_id.as_str());

    stop_tx.send(()).unwrap();
    let stats = server.block_on(running).unwrap();
    assert_eq!(stats.handled, 4);
    assert_eq!(stats.failed, 0);
    assert_eq!(submitter.submitted().len(), 3);
}
