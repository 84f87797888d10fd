use std::thread;
use std::time::Duration;

use log::{info, warn};

use crate::error::{GatewayError, Result};

/// Bounded, fixed-delay retry of the initial connection handshake
///
/// Only connecting is retried. Once connected, a failed step ends the episode instead.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total connection attempts, the first included
    pub attempts: u32,
    /// Pause between two attempts
    pub delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            attempts: 5,
            delay: Duration::from_secs(5),
        }
    }
}

impl RetryPolicy {
    pub fn new(attempts: u32, delay: Duration) -> Self {
        Self { attempts, delay }
    }
}

/// Run `connect` until it succeeds or the policy's attempts are used up
///
/// **Returns** [`GatewayError::ConnectionFailure`] carrying the last error if no attempt succeeds
pub fn connect_with_retry<T, F>(policy: RetryPolicy, mut connect: F) -> Result<T>
where
    F: FnMut() -> Result<T>,
{
    let attempts = policy.attempts.max(1);
    let mut attempt = 0;
    loop {
        attempt += 1;
        match connect() {
            Ok(conn) => {
                info!("Connected to simulator on attempt {}", attempt);
                return Ok(conn);
            }
            Err(e) if attempt < attempts => {
                warn!(
                    "Connection attempt {}/{} failed: {}. Retrying in {:?}",
                    attempt, attempts, e, policy.delay
                );
                thread::sleep(policy.delay);
            }
            Err(e) => {
                return Err(GatewayError::ConnectionFailure {
                    attempts,
                    reason: e.to_string(),
                })
            }
        }
    }
}
