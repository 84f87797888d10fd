use std::path::PathBuf;

use log::{debug, error, info, warn};
use rand::thread_rng;
use serde_json::Value;

use crate::config::{InfrastructureConfig, NormalizationConfig};
use crate::env::{Environment, MaskedActionSpace};
use crate::error::{GatewayError, Result};
use crate::mask::{compute_mask, ActionMask};
use crate::snapshot::{decode, encode_action, RawSnapshot, Selection, Snapshot};
use crate::space::{compute_shape_logged, ActionSpaceVariant, SpaceShape};
use crate::telemetry::{BestEpisodeStore, EpisodeCallback, EpisodeTelemetry, PolicySaver};
use crate::transport::{connect_with_retry, Info, RetryPolicy, SimulatorTransport};

/// The fixed space cardinalities an agent must be built for
pub fn get_action_space_shape(config: &InfrastructureConfig) -> SpaceShape {
    compute_shape_logged(config)
}

/// Outcome of one applied action
#[derive(Debug, Clone, PartialEq)]
pub struct Transition {
    pub snapshot: Snapshot,
    pub reward: f64,
    pub terminated: bool,
    pub truncated: bool,
    pub info: Info,
}

impl Transition {
    pub fn done(&self) -> bool {
        self.terminated || self.truncated
    }
}

/// The decision loop between an agent and an external cloud simulator
///
/// Owns the transport, the last observed snapshot and the episode telemetry. Faults
/// coming from the simulator never escape: a null snapshot becomes a zeroed one, a
/// failed step ends the episode with zero reward, and both are flagged in the step's
/// info under `error`. Faults in static configuration are returned to the caller.
pub struct CloudSimEnv<T: SimulatorTransport> {
    transport: T,
    config: InfrastructureConfig,
    variant: ActionSpaceVariant,
    shape: SpaceShape,
    norm: NormalizationConfig,
    last: Option<Snapshot>,
    telemetry: EpisodeTelemetry,
    episodes: u64,
    closed: bool,
}

impl<T: SimulatorTransport> CloudSimEnv<T> {
    /// Configure the simulator behind `transport`
    ///
    /// The transport is closed if the simulator rejects the configuration.
    pub fn new(mut transport: T, config: InfrastructureConfig, variant: ActionSpaceVariant) -> Result<Self> {
        let shape = compute_shape_logged(&config);

        if let Err(e) = transport.configure(&config.to_params()) {
            error!("Simulator rejected configuration: {}", e);
            if let Err(close_err) = transport.close() {
                error!("Failed to close simulator connection: {}", close_err);
            }
            return Err(match e {
                GatewayError::ConfigurationRejected(_) => e,
                other => GatewayError::ConfigurationRejected(other.to_string()),
            });
        }
        info!("Simulator configured for the {} action space", variant);

        Ok(Self {
            norm: NormalizationConfig::from(&config),
            telemetry: EpisodeTelemetry::new(variant),
            transport,
            config,
            variant,
            shape,
            last: None,
            episodes: 0,
            closed: false,
        })
    }

    /// Connect with `connect`, retrying per `policy`, then configure the simulator
    pub fn connect<F>(
        policy: RetryPolicy,
        connect: F,
        config: InfrastructureConfig,
        variant: ActionSpaceVariant,
    ) -> Result<Self>
    where
        F: FnMut() -> Result<T>,
    {
        let transport = connect_with_retry(policy, connect)?;
        Self::new(transport, config, variant)
    }

    /// Persist best episodes and, if given, the best policy into `log_dir`
    pub fn with_log_dir(mut self, log_dir: impl Into<PathBuf>, policy_saver: Option<PolicySaver>) -> Self {
        let mut store = BestEpisodeStore::new(log_dir);
        if let Some(saver) = policy_saver {
            store = store.with_policy_saver(saver);
        }
        self.telemetry.set_store(store);
        self
    }

    pub fn shape(&self) -> &SpaceShape {
        &self.shape
    }

    pub fn variant(&self) -> ActionSpaceVariant {
        self.variant
    }

    pub fn config(&self) -> &InfrastructureConfig {
        &self.config
    }

    pub fn telemetry(&self) -> &EpisodeTelemetry {
        &self.telemetry
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    /// The last observed snapshot, or a zeroed one before the first reset
    pub fn observe(&self) -> Snapshot {
        self.last
            .clone()
            .unwrap_or_else(|| Snapshot::zeroed(&self.shape))
    }

    /// Legal actions for the next decision
    ///
    /// Before the first reset only NoOp / skip is legal.
    pub fn action_mask(&self) -> ActionMask {
        match &self.last {
            Some(snapshot) => compute_mask(snapshot, self.variant),
            None => {
                warn!("Action mask requested before the first observation, only NoOp is legal");
                ActionMask::noop_only(&self.shape, self.variant)
            }
        }
    }

    /// Register a callback run with the summary of every finished episode
    pub fn on_episode_end(&mut self, callback: EpisodeCallback) {
        self.telemetry.on_episode_end(callback);
    }

    fn ensure_open(&self) -> Result<()> {
        if self.closed {
            Err(GatewayError::Closed)
        } else {
            Ok(())
        }
    }

    /// Decode a simulator snapshot and record it as the latest observation
    fn absorb(&mut self, raw: Option<&RawSnapshot>, info: &mut Info) -> Snapshot {
        let decoded = decode(raw, &self.shape, &self.norm);
        if decoded.malformed {
            info.insert("error".to_owned(), "Malformed snapshot".into());
        }
        self.absorb_decoded(decoded.snapshot, info)
    }

    fn absorb_decoded(&mut self, snapshot: Snapshot, info: &mut Info) -> Snapshot {
        info.insert("actual_vm_count".to_owned(), snapshot.actual_vm_count.into());
        info.insert("actual_host_count".to_owned(), snapshot.actual_host_count.into());
        self.last = Some(snapshot.clone());
        snapshot
    }

    /// Start a new episode with the simulator seeded by `seed`
    ///
    /// A failed reset yields a zeroed snapshot with `error` set in the info.
    pub fn reset(&mut self, seed: u64) -> Result<(Snapshot, Info)> {
        self.ensure_open()?;
        if self.telemetry.steps() > 0 {
            debug!("Discarding {} steps of an unfinished episode", self.telemetry.steps());
            self.telemetry.clear();
        }
        info!("Resetting simulator with seed {}", seed);

        let (snapshot, info) = match self.transport.reset(seed) {
            Ok(response) => {
                let mut info = response.info;
                let snapshot = self.absorb(response.observation.as_ref(), &mut info);
                (snapshot, info)
            }
            Err(e) => {
                error!("Reset failed: {}", e);
                let mut info = Info::new();
                info.insert("error".to_owned(), "Reset failed".into());
                let snapshot = self.absorb_decoded(Snapshot::zeroed(&self.shape), &mut info);
                (snapshot, info)
            }
        };
        Ok((snapshot, info))
    }

    /// Encode `selection`, run one simulator step and decode its answer
    ///
    /// **Returns** an error only for a selection that does not belong to this action
    /// space or when the environment is closed
    pub fn apply(&mut self, selection: &Selection) -> Result<Transition> {
        self.ensure_open()?;
        let payload = encode_action(selection, self.variant)?;
        if self.last.is_some() && !self.action_mask().allows(selection) {
            debug!("Selection {:?} is masked out, the simulator will judge it", selection);
        }

        let transition = match self.transport.step(&payload) {
            Ok(response) => {
                let mut info = response.info;
                let snapshot = self.absorb(response.observation.as_ref(), &mut info);
                Transition {
                    snapshot,
                    reward: response.reward,
                    terminated: response.terminated,
                    truncated: response.truncated,
                    info,
                }
            }
            Err(e) => {
                error!("{}", GatewayError::StepFailure(e.to_string()));
                let mut info = Info::new();
                info.insert("error".to_owned(), "Step failed".into());
                let snapshot = self.absorb_decoded(Snapshot::zeroed(&self.shape), &mut info);
                Transition {
                    snapshot,
                    reward: 0.0,
                    terminated: true,
                    truncated: false,
                    info,
                }
            }
        };
        debug!(
            "Applied {:?}: reward {:.4}, terminated {}, truncated {}",
            payload, transition.reward, transition.terminated, transition.truncated
        );

        let done = transition.done();
        self.telemetry
            .record(&payload, transition.reward, &transition.info, done);
        if done {
            self.episodes += 1;
        }
        Ok(transition)
    }

    /// Point-in-time diagnostic view from the simulator
    pub fn render(&mut self) -> Result<Value> {
        self.ensure_open()?;
        self.transport.render()
    }

    /// Release the simulator connection
    ///
    /// Calling this on a closed environment is a no-op.
    pub fn close(&mut self) -> Result<()> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;
        info!("Closing simulator connection");
        self.transport.close()
    }
}

impl<T: SimulatorTransport> Drop for CloudSimEnv<T> {
    fn drop(&mut self) {
        if let Err(e) = self.close() {
            error!("Failed to close simulator connection: {}", e);
        }
    }
}

impl<T: SimulatorTransport> Environment for CloudSimEnv<T> {
    type State = Snapshot;
    type Action = Selection;

    fn random_action(&self) -> Self::Action {
        CloudSimEnv::action_mask(self).sample(&mut thread_rng())
    }

    fn step(&mut self, action: Self::Action) -> (Option<Self::State>, f32) {
        match self.apply(&action) {
            Ok(t) => {
                let reward = t.reward as f32;
                let next_state = if t.done() { None } else { Some(t.snapshot) };
                (next_state, reward)
            }
            Err(e) => {
                error!("Could not apply {:?}: {}", action, e);
                (None, 0.0)
            }
        }
    }

    fn reset(&mut self) -> Self::State {
        let seed = self.config.seed.wrapping_add(self.episodes);
        match CloudSimEnv::reset(self, seed) {
            Ok((snapshot, _)) => snapshot,
            Err(e) => {
                error!("Could not reset: {}", e);
                self.observe()
            }
        }
    }
}

impl<T: SimulatorTransport> MaskedActionSpace for CloudSimEnv<T> {
    type Mask = ActionMask;

    fn action_mask(&self) -> Self::Mask {
        CloudSimEnv::action_mask(self)
    }
}

#[cfg(test)]
mod tests {
    use std::{cell::RefCell, io, rc::Rc, time::Duration};

    use rand::{rngs::StdRng, SeedableRng};

    use super::*;
    use crate::config::Scalar;
    use crate::space::{ActionType, VmType};
    use crate::telemetry::EpisodeSummary;
    use crate::transport::InMemorySimulator;

    fn config() -> InfrastructureConfig {
        InfrastructureConfig {
            hosts_count: 4,
            host_pes: 8,
            max_episode_length: 20,
            ..Default::default()
        }
    }

    fn env(sim: InMemorySimulator) -> CloudSimEnv<InMemorySimulator> {
        CloudSimEnv::new(sim, config(), ActionSpaceVariant::Scaling).unwrap()
    }

    fn summaries(env: &mut CloudSimEnv<InMemorySimulator>) -> Rc<RefCell<Vec<EpisodeSummary>>> {
        let seen = Rc::new(RefCell::new(Vec::new()));
        let sink = seen.clone();
        env.on_episode_end(Box::new(move |s: &EpisodeSummary| sink.borrow_mut().push(s.clone())));
        seen
    }

    const NOOP: Selection = Selection::Scaling {
        action_type: ActionType::NoOp,
        vm_id: 0,
        host_id: 0,
        vm_type: VmType::Small,
    };

    #[test]
    fn mask_before_first_reset() {
        let env = env(InMemorySimulator::new());
        assert_eq!(
            env.action_mask(),
            ActionMask::noop_only(env.shape(), ActionSpaceVariant::Scaling),
            "only NoOp before any observation"
        );
        assert_eq!(env.observe(), Snapshot::zeroed(env.shape()));
    }

    #[test]
    fn rejected_configuration_is_fatal() {
        let result = CloudSimEnv::new(
            InMemorySimulator::new().with_rejected_configuration(),
            config(),
            ActionSpaceVariant::Scaling,
        );
        assert!(matches!(result, Err(GatewayError::ConfigurationRejected(_))));
    }

    #[test]
    fn reset_decodes_and_enriches_info() {
        let mut env = env(InMemorySimulator::new());
        let (snapshot, info) = env.reset(42).unwrap();
        assert_eq!(snapshot.host_loads.len(), 4);
        assert_eq!(snapshot.vm_types.len(), env.shape().max_potential_vms);
        assert_eq!(snapshot.actual_vm_count, 4, "initial fleet of 2 + 1 + 1");
        assert_eq!(info["actual_vm_count"], 4);
        assert_eq!(info["actual_host_count"], 4);
        assert_eq!(env.observe(), snapshot, "latest observation kept");
    }

    #[test]
    fn masked_rollout_runs_to_truncation() {
        let mut env = env(InMemorySimulator::new());
        let seen = summaries(&mut env);
        let mut rng = StdRng::seed_from_u64(3);
        env.reset(1).unwrap();

        let mut steps = 0;
        loop {
            let mask = env.action_mask();
            assert!(mask.dims().iter().all(|d| d.contains(&true)), "no empty dimension");
            let selection = mask.sample(&mut rng);
            assert!(mask.allows(&selection), "sampled selection is legal");
            let t = env.apply(&selection).unwrap();
            steps += 1;
            if t.done() {
                break;
            }
        }

        assert_eq!(steps, 20);
        let seen = seen.borrow();
        assert_eq!(seen.len(), 1, "one finished episode");
        assert_eq!(seen[0].table.len(), 20);
        assert_eq!(env.telemetry().steps(), 0);
    }

    #[test]
    fn failed_step_ends_the_episode() {
        let mut env = env(InMemorySimulator::new().with_failing_step(2));
        let seen = summaries(&mut env);
        env.reset(0).unwrap();

        let t = env.apply(&NOOP).unwrap();
        assert!(!t.done());
        let t = env.apply(&NOOP).unwrap();
        assert!(t.terminated && !t.truncated, "synthesized terminal step");
        assert_eq!(t.reward, 0.0);
        assert_eq!(t.info["error"], "Step failed");
        assert_eq!(t.snapshot, Snapshot::zeroed(env.shape()));
        assert_eq!(seen.borrow()[0].length, 2, "episode closed in telemetry");
    }

    #[test]
    fn null_snapshot_keeps_the_episode_going() {
        let mut env = env(InMemorySimulator::new().with_null_snapshot_at(1));
        env.reset(0).unwrap();
        let t = env.apply(&NOOP).unwrap();
        assert!(!t.done(), "episode continues");
        assert_eq!(t.info["error"], "Malformed snapshot");
        assert_eq!(t.snapshot.actual_vm_count, 0, "zeroed observation");
        assert_eq!(
            env.action_mask(),
            ActionMask::noop_only(env.shape(), ActionSpaceVariant::Scaling),
            "nothing to act on in a zeroed snapshot"
        );
    }

    #[test]
    fn failed_reset_yields_a_zeroed_snapshot() {
        let mut env = env(InMemorySimulator::new().with_failing_reset());
        let (snapshot, info) = env.reset(0).unwrap();
        assert_eq!(snapshot, Snapshot::zeroed(env.shape()));
        assert_eq!(info["error"], "Reset failed");
        assert_eq!(info["actual_vm_count"], 0);
        assert_eq!(env.observe(), snapshot);
        assert_eq!(
            env.action_mask(),
            ActionMask::noop_only(env.shape(), ActionSpaceVariant::Scaling),
            "only NoOp after a failed reset"
        );
    }

    #[test]
    fn load_balancing_skip() {
        let mut config = config();
        config.extra.insert("arrival_rate".into(), Scalar::Float(0.0));
        let mut env = CloudSimEnv::new(InMemorySimulator::new(), config, ActionSpaceVariant::LoadBalancing).unwrap();
        env.reset(0).unwrap();

        let mask = env.action_mask();
        assert_eq!(mask.flatten().iter().filter(|&&b| b).count(), 1, "empty queue: skip only");
        let t = env.apply(&Selection::LoadBalancing(0)).unwrap();
        assert_eq!(t.info["assignment_success"], false);
        assert_eq!(t.info["invalid_action_taken"], false, "skip is valid");

        assert!(
            matches!(env.apply(&NOOP), Err(GatewayError::InvalidSelection(_))),
            "scaling selection rejected"
        );
    }

    #[test]
    fn environment_trait_rollout() {
        let mut env = env(InMemorySimulator::new());
        let mut state = Some(Environment::reset(&mut env));
        let mut steps = 0;
        while state.is_some() {
            let action = env.random_action();
            let (next, _reward) = Environment::step(&mut env, action);
            state = next;
            steps += 1;
        }
        assert_eq!(steps, 20, "None at the end of the episode");
        assert_eq!(MaskedActionSpace::action_mask(&env), env.action_mask());
    }

    #[test]
    fn close_is_idempotent() {
        let mut env = env(InMemorySimulator::new());
        env.close().unwrap();
        env.close().unwrap();
        assert!(env.is_closed());
        assert!(matches!(env.apply(&NOOP), Err(GatewayError::Closed)));
        assert!(matches!(env.reset(0), Err(GatewayError::Closed)));
    }

    #[test]
    fn connect_retries_until_the_simulator_is_up() {
        let mut attempts = 0;
        let env = CloudSimEnv::connect(
            RetryPolicy::new(3, Duration::ZERO),
            || {
                attempts += 1;
                if attempts < 3 {
                    Err(io::Error::new(io::ErrorKind::ConnectionRefused, "down").into())
                } else {
                    Ok(InMemorySimulator::new())
                }
            },
            config(),
            ActionSpaceVariant::Scaling,
        );
        assert!(env.is_ok());

        let env = CloudSimEnv::<InMemorySimulator>::connect(
            RetryPolicy::new(2, Duration::ZERO),
            || Err(GatewayError::Remote("down".into())),
            config(),
            ActionSpaceVariant::Scaling,
        );
        assert!(matches!(env, Err(GatewayError::ConnectionFailure { attempts: 2, .. })));
    }

    #[test]
    fn best_episode_persisted_to_log_dir() {
        let dir = tempfile::tempdir().unwrap();
        let mut env = env(InMemorySimulator::new().with_failing_step(1)).with_log_dir(dir.path(), None);
        env.reset(0).unwrap();
        env.apply(&NOOP).unwrap();
        assert!(dir.path().join("best_episode_details_1.csv").exists());
    }
}
