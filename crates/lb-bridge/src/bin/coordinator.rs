use std::io::{self, BufRead};
use std::path::PathBuf;

use anyhow::Context;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use lb_bridge::{Coordinator, Tick, TickOutcome};
use lb_types::{Config, LbError};

/// Each stdin line is one tick, as JSON.
fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(io::stderr)
        .init();

    let config_path = std::env::args().nth(1).map(PathBuf::from);
    let config = Config::load(config_path.as_deref()).context("Failed to load configuration")?;
    info!(
        mode = ?config.compilation.mode,
        direction = ?config.analysis.direction,
        controller = ?config.controller.kind,
        "coordinator ready, reading ticks from stdin"
    );

    let mut coordinator = Coordinator::new(config);
    let direction = coordinator.config().analysis.direction;

    for line in io::stdin().lock().lines() {
        let line = line.context("Failed to read tick")?;
        if line.trim().is_empty() {
            continue;
        }
        let tick: Tick = match serde_json::from_str(&line) {
            Ok(tick) => tick,
            Err(e) => {
                warn!(error = %e, "undecodable tick skipped");
                continue;
            }
        };

        match coordinator.on_tick(tick) {
            Ok(TickOutcome::SessionEnded {
                session_id,
                result: Ok(outcome),
            }) => info!(
                session = %session_id,
                best_parameters = ?outcome.best_parameters,
                best_cost = ?outcome.reported_best_cost(direction),
                runs = outcome.runs,
                "optimization finished"
            ),
            Ok(outcome) => info!(outcome = ?outcome, "tick handled"),
            Err(e @ LbError::Binding(_)) => {
                error!(error = %e, "invalid parameter bindings");
                return Err(e.into());
            }
            Err(e) => warn!(error = %e, "tick rejected"),
        }
    }

    if let Some(result) = coordinator.shutdown() {
        info!(ok = result.is_ok(), "open session closed at end of input");
    }
    Ok(())
}
