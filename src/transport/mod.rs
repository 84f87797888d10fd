mod fake;
mod retry;
mod tcp;

pub use fake::{InMemorySimulator, RewardCoefficients};
pub use retry::{connect_with_retry, RetryPolicy};
pub use tcp::{serve, TcpTransport};

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::config::Params;
use crate::error::Result;
use crate::snapshot::{ExternalActionPayload, RawSnapshot};

/// Auxiliary per-step information reported by the simulator
pub type Info = serde_json::Map<String, Value>;

/// Simulator answer to `reset`
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ResetResponse {
    /// `None` when the simulator sent a null snapshot
    #[serde(default)]
    pub observation: Option<RawSnapshot>,
    #[serde(default)]
    pub info: Info,
}

/// Simulator answer to `step`
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StepResponse {
    /// `None` when the simulator sent a null snapshot
    #[serde(default)]
    pub observation: Option<RawSnapshot>,
    pub reward: f64,
    pub terminated: bool,
    pub truncated: bool,
    #[serde(default)]
    pub info: Info,
}

/// A connection to the external simulator
///
/// Strictly request/response: one call is in flight at a time and `step` completes
/// before the next `step` or `reset` is issued. `configure` is called exactly once
/// before the first `reset`.
pub trait SimulatorTransport {
    /// Send the infrastructure parameters
    fn configure(&mut self, params: &Params) -> Result<()>;

    /// Reinitialize simulated state deterministically from `seed`
    fn reset(&mut self, seed: u64) -> Result<ResetResponse>;

    /// Apply one action and advance the simulation by one decision step
    fn step(&mut self, action: &ExternalActionPayload) -> Result<StepResponse>;

    /// Point-in-time diagnostic view; must not change simulator state
    fn render(&mut self) -> Result<Value>;

    /// Release the connection
    ///
    /// Calling this on a closed transport is a no-op.
    fn close(&mut self) -> Result<()>;
}
