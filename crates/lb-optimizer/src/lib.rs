//! # lb-optimizer
//!
//! The seam an external optimization controller plugs into: a controller
//! repeatedly calls a blocking [`CostFunction`] and returns an
//! [`OptimizationOutcome`](lb_types::OptimizationOutcome) when its run loop
//! exits.
//!
//! Two reference strategies (random and best-point perturbation) are
//! provided so the bridge can be driven end to end without an external
//! controller library.

mod controller;
mod search;

pub use controller::{
    BestTracker, Controller, CostFunction, SearchBounds, StoppingRules, StrategyController,
};
pub use search::{controller_from_config, PerturbationSearch, RandomSearch, SearchStrategy};
