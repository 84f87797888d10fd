use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::{GatewayError, Result};

/// A single configuration value as it crosses the simulator boundary
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Scalar {
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
}

impl fmt::Display for Scalar {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Scalar::Bool(b) => write!(f, "{b}"),
            Scalar::Int(i) => write!(f, "{i}"),
            Scalar::Float(x) => write!(f, "{x}"),
            Scalar::Text(s) => f.write_str(s),
        }
    }
}

impl From<bool> for Scalar {
    fn from(value: bool) -> Self {
        Self::Bool(value)
    }
}

impl From<i64> for Scalar {
    fn from(value: i64) -> Self {
        Self::Int(value)
    }
}

impl From<u32> for Scalar {
    fn from(value: u32) -> Self {
        Self::Int(value.into())
    }
}

impl From<f64> for Scalar {
    fn from(value: f64) -> Self {
        Self::Float(value)
    }
}

impl From<&str> for Scalar {
    fn from(value: &str) -> Self {
        Self::Text(value.to_owned())
    }
}

/// The `mapping<string, scalar>` handed to the simulator's `configure` call
pub type Params = BTreeMap<String, Scalar>;

fn invalid(key: &str, reason: impl Into<String>) -> GatewayError {
    GatewayError::InvalidConfig {
        key: key.to_owned(),
        reason: reason.into(),
    }
}

/// Read an integer parameter, accepting integral floats and numeric text
fn int_param(params: &Params, key: &str) -> Result<Option<i64>> {
    let value = match params.get(key) {
        None => return Ok(None),
        Some(Scalar::Int(i)) => *i,
        Some(Scalar::Float(x)) if x.fract() == 0.0 => *x as i64,
        Some(Scalar::Text(s)) => s
            .trim()
            .parse::<i64>()
            .map_err(|_| invalid(key, format!("`{s}` is not an integer")))?,
        Some(other) => return Err(invalid(key, format!("`{other}` is not an integer"))),
    };
    Ok(Some(value))
}

/// Read a non-negative integer parameter, falling back to `default` when absent
pub(crate) fn count_param(params: &Params, key: &str, default: u32) -> Result<u32> {
    match int_param(params, key)? {
        None => Ok(default),
        Some(value) => u32::try_from(value)
            .map_err(|_| invalid(key, format!("{value} is not a non-negative count"))),
    }
}

pub(crate) fn float_param(params: &Params, key: &str, default: f64) -> Result<f64> {
    match params.get(key) {
        None => Ok(default),
        Some(Scalar::Int(i)) => Ok(*i as f64),
        Some(Scalar::Float(x)) if x.is_finite() => Ok(*x),
        Some(Scalar::Text(s)) => s
            .trim()
            .parse::<f64>()
            .map_err(|_| invalid(key, format!("`{s}` is not a number"))),
        Some(other) => Err(invalid(key, format!("`{other}` is not a finite number"))),
    }
}

const KNOWN_KEYS: [&str; 13] = [
    "hosts_count",
    "host_pes",
    "small_vm_pes",
    "medium_vm_multiplier",
    "large_vm_multiplier",
    "initial_s_vm_count",
    "initial_m_vm_count",
    "initial_l_vm_count",
    "min_job_pes",
    "max_job_pes",
    "max_queue_norm",
    "seed",
    "max_episode_length",
];

/// Static description of the simulated datacenter
///
/// Set once before the first reset. Every fixed-size space the agent sees is derived
/// from this through [`compute_shape`](crate::space::compute_shape). Keys the decision
/// interface does not interpret (reward coefficients, workload settings, ...) are kept
/// in `extra` and forwarded to the simulator untouched.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct InfrastructureConfig {
    pub hosts_count: u32,
    pub host_pes: u32,
    pub small_vm_pes: u32,
    pub medium_vm_multiplier: u32,
    pub large_vm_multiplier: u32,
    pub initial_s_vm_count: u32,
    pub initial_m_vm_count: u32,
    pub initial_l_vm_count: u32,
    /// Smallest PE requirement a cloudlet can have
    pub min_job_pes: u32,
    /// Largest PE requirement a cloudlet can have
    pub max_job_pes: u32,
    /// Queue length that normalizes to 1.0
    pub max_queue_norm: f64,
    pub seed: u64,
    pub max_episode_length: u32,
    #[serde(flatten)]
    pub extra: Params,
}

impl Default for InfrastructureConfig {
    fn default() -> Self {
        Self {
            hosts_count: 10,
            host_pes: 16,
            small_vm_pes: 2,
            medium_vm_multiplier: 2,
            large_vm_multiplier: 4,
            initial_s_vm_count: 2,
            initial_m_vm_count: 1,
            initial_l_vm_count: 1,
            min_job_pes: 1,
            max_job_pes: 8,
            max_queue_norm: 100.0,
            seed: 42,
            max_episode_length: 1000,
            extra: Params::new(),
        }
    }
}

impl InfrastructureConfig {
    /// Parse the wire form of the configuration
    ///
    /// Missing keys take their defaults. Negative or fractional counts are rejected.
    pub fn from_params(params: &Params) -> Result<Self> {
        let d = Self::default();
        let config = Self {
            hosts_count: count_param(params, "hosts_count", d.hosts_count)?,
            host_pes: count_param(params, "host_pes", d.host_pes)?,
            small_vm_pes: count_param(params, "small_vm_pes", d.small_vm_pes)?,
            medium_vm_multiplier: count_param(params, "medium_vm_multiplier", d.medium_vm_multiplier)?,
            large_vm_multiplier: count_param(params, "large_vm_multiplier", d.large_vm_multiplier)?,
            initial_s_vm_count: count_param(params, "initial_s_vm_count", d.initial_s_vm_count)?,
            initial_m_vm_count: count_param(params, "initial_m_vm_count", d.initial_m_vm_count)?,
            initial_l_vm_count: count_param(params, "initial_l_vm_count", d.initial_l_vm_count)?,
            min_job_pes: count_param(params, "min_job_pes", d.min_job_pes)?,
            max_job_pes: count_param(params, "max_job_pes", d.max_job_pes)?,
            max_queue_norm: float_param(params, "max_queue_norm", d.max_queue_norm)?,
            seed: match int_param(params, "seed")? {
                None => d.seed,
                Some(seed) => u64::try_from(seed)
                    .map_err(|_| invalid("seed", format!("{seed} is negative")))?,
            },
            max_episode_length: count_param(params, "max_episode_length", d.max_episode_length)?,
            extra: params
                .iter()
                .filter(|(k, _)| !KNOWN_KEYS.contains(&k.as_str()))
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect(),
        };
        Ok(config)
    }

    /// Produce the parameter map sent to the simulator's `configure` call
    pub fn to_params(&self) -> Params {
        let mut params = self.extra.clone();
        let counts = [
            ("hosts_count", self.hosts_count),
            ("host_pes", self.host_pes),
            ("small_vm_pes", self.small_vm_pes),
            ("medium_vm_multiplier", self.medium_vm_multiplier),
            ("large_vm_multiplier", self.large_vm_multiplier),
            ("initial_s_vm_count", self.initial_s_vm_count),
            ("initial_m_vm_count", self.initial_m_vm_count),
            ("initial_l_vm_count", self.initial_l_vm_count),
            ("min_job_pes", self.min_job_pes),
            ("max_job_pes", self.max_job_pes),
            ("max_episode_length", self.max_episode_length),
        ];
        for (key, value) in counts {
            params.insert(key.to_owned(), value.into());
        }
        params.insert("max_queue_norm".to_owned(), self.max_queue_norm.into());
        params.insert("seed".to_owned(), Scalar::Int(self.seed as i64));
        params
    }

    /// Total PEs across all hosts
    pub fn datacenter_pes(&self) -> u64 {
        u64::from(self.hosts_count) * u64::from(self.host_pes)
    }

    pub fn medium_vm_pes(&self) -> u32 {
        self.small_vm_pes * self.medium_vm_multiplier
    }

    pub fn large_vm_pes(&self) -> u32 {
        self.small_vm_pes * self.large_vm_multiplier
    }

    pub fn initial_vm_count(&self) -> u32 {
        self.initial_s_vm_count + self.initial_m_vm_count + self.initial_l_vm_count
    }
}

/// Ceilings used to squash the snapshot's scalar counters into `[0, 1]`
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct NormalizationConfig {
    pub max_queue: f64,
    pub max_pes: f64,
}

impl NormalizationConfig {
    /// The queue ceiling, or 1.0 when configured as zero or negative
    pub fn queue_ceiling(&self) -> f64 {
        if self.max_queue > 0.0 {
            self.max_queue
        } else {
            1.0
        }
    }

    /// The PE ceiling, or 1.0 when configured as zero or negative
    pub fn pes_ceiling(&self) -> f64 {
        if self.max_pes > 0.0 {
            self.max_pes
        } else {
            1.0
        }
    }
}

impl From<&InfrastructureConfig> for NormalizationConfig {
    fn from(config: &InfrastructureConfig) -> Self {
        Self {
            max_queue: config.max_queue_norm,
            max_pes: f64::from(config.max_job_pes.max(config.large_vm_pes())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn params(pairs: &[(&str, Scalar)]) -> Params {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.clone()))
            .collect()
    }

    #[test]
    fn from_params_defaults_and_passthrough() {
        let p = params(&[
            ("hosts_count", Scalar::Int(8)),
            ("host_pes", Scalar::Float(16.0)),
            ("small_vm_pes", Scalar::Text("2".into())),
            ("reward_cost_coef", Scalar::Float(0.5)),
        ]);
        let config = InfrastructureConfig::from_params(&p).unwrap();
        assert_eq!(config.hosts_count, 8, "int parsed");
        assert_eq!(config.host_pes, 16, "integral float parsed");
        assert_eq!(config.small_vm_pes, 2, "numeric text parsed");
        assert_eq!(config.large_vm_multiplier, 4, "default applied");
        assert_eq!(config.seed, 42, "default seed applied");
        assert_eq!(
            config.extra.get("reward_cost_coef"),
            Some(&Scalar::Float(0.5)),
            "unknown keys kept"
        );

        let sent = config.to_params();
        assert_eq!(sent.get("hosts_count"), Some(&Scalar::Int(8)));
        assert_eq!(sent.get("reward_cost_coef"), Some(&Scalar::Float(0.5)));
    }

    #[test]
    fn from_params_rejects_bad_counts() {
        for bad in [
            Scalar::Int(-1),
            Scalar::Float(2.5),
            Scalar::Bool(true),
            Scalar::Text("many".into()),
        ] {
            let p = params(&[("hosts_count", bad.clone())]);
            let err = InfrastructureConfig::from_params(&p).unwrap_err();
            assert!(
                matches!(err, GatewayError::InvalidConfig { ref key, .. } if key == "hosts_count"),
                "{bad:?} rejected"
            );
        }
    }

    #[test]
    fn normalization_ceilings() {
        let config = InfrastructureConfig {
            max_job_pes: 4,
            small_vm_pes: 2,
            large_vm_multiplier: 4,
            ..Default::default()
        };
        let norm = NormalizationConfig::from(&config);
        assert_eq!(norm.max_pes, 8.0, "large VM size dominates max_job_pes");
        assert_eq!(norm.queue_ceiling(), 100.0);

        let degenerate = NormalizationConfig {
            max_queue: 0.0,
            max_pes: -3.0,
        };
        assert_eq!(degenerate.queue_ceiling(), 1.0, "zero ceiling falls back to 1");
        assert_eq!(degenerate.pes_ceiling(), 1.0, "negative ceiling falls back to 1");
    }
}
