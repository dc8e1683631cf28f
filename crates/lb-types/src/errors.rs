use thiserror::Error;

/// Main error type for the LoopBridge system
#[derive(Error, Debug)]
pub enum LbError {
    #[error("Binding error: {0}")]
    Binding(#[from] BindingError),

    #[error("Bridge error: {0}")]
    Bridge(#[from] BridgeError),

    #[error("Shot service error: {0}")]
    Shot(#[from] ShotError),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("Internal error: {0}")]
    Internal(String),
}

/// Configuration errors raised while wiring optimizer parameters to targets.
///
/// Every variant is fatal: a session must not start when one is produced.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum BindingError {
    #[error("Parameter {name} is not bound to any target")]
    UnboundParameter { name: String },

    #[error("Argument {argument} of target {target} is not a declared parameter")]
    UndeclaredSource { target: String, argument: String },

    #[error("Argument {argument} of target {target} has no value")]
    ArgumentMissing { target: String, argument: String },

    #[error("Parameter {name} is declared more than once")]
    DuplicateParameter { name: String },

    #[error("Target {name} is declared more than once")]
    DuplicateTarget { name: String },

    #[error("Parameter {name} has invalid bounds: min {min}, start {start}, max {max}")]
    InvalidBounds {
        name: String,
        min: f64,
        max: f64,
        start: f64,
    },

    #[error("Target {target} has no transform and must take exactly one argument, got {count}")]
    IdentityArity { target: String, count: usize },

    #[error("Transform {transform} of target {target} expects {expected} argument(s), got {actual}")]
    TransformArity {
        target: String,
        transform: String,
        expected: String,
        actual: usize,
    },

    #[error("Parameter vector has {actual} values but {expected} parameters are declared")]
    VectorLength { expected: usize, actual: usize },
}

/// Errors surfaced by the execution bridge and the session coordinator.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum BridgeError {
    #[error("Handoff channel closed")]
    HandoffClosed,

    #[error("Handoff slot already holds an unread cost report")]
    HandoffOccupied,

    #[error("Trial dispatch failed: {message}")]
    Dispatch { message: String },

    #[error("Binding resolution failed: {0}")]
    Binding(#[from] BindingError),

    #[error("Trial values {observed:?} do not match requested parameters {expected:?}")]
    Integrity {
        expected: Vec<f64>,
        observed: Vec<f64>,
    },

    #[error("Trial record has no value for parameter {parameter}")]
    MissingObservation { parameter: String },

    #[error("No trial request is outstanding")]
    NoOutstandingRequest,

    #[error("Session {session} worker panicked")]
    WorkerPanicked { session: String },
}

/// Errors surfaced by the remote shot service, its client and its collaborators.
#[derive(Error, Debug)]
pub enum ShotError {
    #[error("Malformed request: {message}")]
    Malformed { message: String },

    #[error("Target {group}/{variable} is not set in the template")]
    UnsetTarget { group: String, variable: String },

    #[error("Artifact {path} failed: {message}")]
    Artifact { path: String, message: String },

    #[error("Transport error: {message}")]
    Transport { message: String },

    #[error("No reply within {timeout_ms} ms")]
    ReplyTimeout { timeout_ms: u64 },

    #[error("Service rejected request: {message}")]
    Rejected { message: String },

    #[error("Submission failed: {message}")]
    Submit { message: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type alias for LoopBridge operations
pub type LbResult<T> = Result<T, LbError>;

/// Result alias for binding validation and resolution.
pub type BindingResult<T> = Result<T, BindingError>;

/// Result alias for bridge and coordinator operations.
pub type BridgeResult<T> = Result<T, BridgeError>;

/// Result alias for shot service operations.
pub type ShotResult<T> = Result<T, ShotError>;

/// Macro for creating internal errors
#[macro_export]
macro_rules! internal_error {
    ($($arg:tt)*) => {
        $crate::LbError::Internal(format!($($arg)*))
    };
}

/// Macro for creating configuration errors
#[macro_export]
macro_rules! config_error {
    ($($arg:tt)*) => {
        $crate::LbError::Config(format!($($arg)*))
    };
}
