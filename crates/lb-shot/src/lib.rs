//! # lb-shot
//!
//! Request/reply service that receives a trial's parameter substitutions,
//! derives a uniquely named artifact from a template, applies the
//! substitutions, hands the artifact to a downstream submitter and
//! acknowledges immediately. The service shuts itself down after a
//! configurable idle period or on SIGINT/SIGTERM.

pub mod artifact;
pub mod client;
pub mod protocol;
pub mod service;
pub mod submit;

pub use artifact::{artifact_name, best_artifact_name, ArtifactStore, JsonArtifactStore, TRIAL_GROUP};
pub use client::ShotClient;
pub use protocol::{request_line, RequestKind, ShotReply, ShotRequest, Substitution, MAX_REQUEST_BYTES};
pub use service::{ServiceState, ServiceStats, ShotService, ShutdownReason};
pub use submit::{submitter_from_config, LoggingSubmitter, Submitter, TcpSubmitter};
