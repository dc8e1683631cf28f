//! # lb-bridge
//!
//! Makes an externally re-invoked, stateless tick look like a blocking cost
//! function to an optimization controller.
//!
//! A [`Coordinator`] owns at most one [`Session`]. The session's worker
//! thread runs the controller against an [`ExecutionBridge`], which
//! announces each trial, dispatches it and parks on a single-slot handoff
//! until the next tick delivers that trial's cost.

pub mod bridge;
pub mod coordinator;
pub mod dispatch;
pub mod handoff;
pub mod mock;
pub mod session;

pub use bridge::ExecutionBridge;
pub use coordinator::{Coordinator, DispatcherFactory, LifecycleState, Tick, TickOutcome};
pub use dispatch::{dispatcher_from_config, MockDispatcher, RemoteShotDispatcher, TrialDispatcher};
pub use handoff::{handoff, CoordinatorEnd, WorkerEnd};
pub use mock::MockCostModel;
pub use session::{session_id, Session, SessionSettings};
