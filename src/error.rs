use std::io;

use thiserror::Error;

/// Errors raised at the boundary between the decision loop and the simulator
///
/// Faults that originate in the simulator (malformed snapshots, failed steps, shape
/// mismatches) are normally absorbed by [`CloudSimEnv`](crate::gym::CloudSimEnv) and only
/// surface here when a caller talks to a transport directly. Faults that originate in
/// static configuration are always returned to the caller.
#[derive(Debug, Error)]
pub enum GatewayError {
    #[error("could not reach the simulator after {attempts} attempts: {reason}")]
    ConnectionFailure { attempts: u32, reason: String },

    #[error("simulator rejected configuration: {0}")]
    ConfigurationRejected(String),

    #[error("invalid configuration value for `{key}`: {reason}")]
    InvalidConfig { key: String, reason: String },

    #[error("simulator returned no snapshot")]
    MalformedSnapshot,

    #[error("simulation step failed: {0}")]
    StepFailure(String),

    #[error("field `{field}` has length {actual}, expected {expected}")]
    ShapeMismatch {
        field: &'static str,
        expected: usize,
        actual: usize,
    },

    #[error("failed to persist telemetry: {0}")]
    TelemetryPersistence(#[source] io::Error),

    #[error("invalid action selection: {0}")]
    InvalidSelection(String),

    #[error("transport is closed")]
    Closed,

    #[error("simulator error: {0}")]
    Remote(String),

    #[error(transparent)]
    Io(#[from] io::Error),

    #[error("malformed simulator message: {0}")]
    Protocol(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, GatewayError>;
