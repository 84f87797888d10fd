use std::collections::VecDeque;

use log::{debug, info, warn};
use rand::{rngs::StdRng, Rng, SeedableRng};
use rand_distr::{Distribution, Poisson};
use serde_json::{json, Value};

use super::{Info, ResetResponse, SimulatorTransport, StepResponse};
use crate::config::{count_param, float_param, InfrastructureConfig, Params};
use crate::error::{GatewayError, Result};
use crate::snapshot::{ExternalActionPayload, RawSnapshot, SKIP_ASSIGNMENT, VM_HOST_ABSENT, VM_TYPE_OFF};
use crate::space::{compute_shape, ActionType, VmType};

/// Longest run time of a cloudlet, in decision steps
const MAX_CLOUDLET_STEPS: u32 = 10;

/// Weights of the reward components, read from the `reward_*_coef` parameters
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RewardCoefficients {
    pub wait_time: f64,
    pub unutilization: f64,
    pub cost: f64,
    pub queue_penalty: f64,
    pub invalid_action: f64,
}

impl Default for RewardCoefficients {
    fn default() -> Self {
        Self {
            wait_time: 0.1,
            unutilization: 0.85,
            cost: 0.5,
            queue_penalty: 0.05,
            invalid_action: 1.0,
        }
    }
}

impl RewardCoefficients {
    pub fn from_params(params: &Params) -> Result<Self> {
        let d = Self::default();
        Ok(Self {
            wait_time: float_param(params, "reward_wait_time_coef", d.wait_time)?,
            unutilization: float_param(params, "reward_unutilization_coef", d.unutilization)?,
            cost: float_param(params, "reward_cost_coef", d.cost)?,
            queue_penalty: float_param(params, "reward_queue_penalty_coef", d.queue_penalty)?,
            invalid_action: float_param(params, "reward_invalid_action_coef", d.invalid_action)?,
        })
    }
}

/// Everything `configure` fixes for later episodes
#[derive(Debug, Clone)]
struct Settings {
    infra: InfrastructureConfig,
    coefs: RewardCoefficients,
    /// Mean cloudlet arrivals per step
    arrival_rate: f64,
    /// Cloudlets submitted over a whole episode
    workload_size: u32,
    /// Simulated seconds per decision step
    timestep: f64,
}

impl Settings {
    fn from_params(params: &Params) -> Result<Self> {
        let infra = InfrastructureConfig::from_params(params)?;
        Ok(Self {
            coefs: RewardCoefficients::from_params(&infra.extra)?,
            arrival_rate: float_param(&infra.extra, "arrival_rate", 1.0)?,
            workload_size: count_param(&infra.extra, "workload_size", 200)?,
            timestep: float_param(&infra.extra, "simulation_timestep", 1.0)?,
            infra,
        })
    }
}

#[derive(Debug, Clone)]
struct Cloudlet {
    pes: u32,
    remaining: u32,
    arrived_at: f64,
    started_at: f64,
}

#[derive(Debug, Clone)]
struct Vm {
    vm_type: VmType,
    host: usize,
    pes: u32,
    running: Vec<Cloudlet>,
}

impl Vm {
    fn used_pes(&self) -> u32 {
        self.running.iter().map(|c| c.pes).sum()
    }

    fn available_pes(&self) -> u32 {
        self.pes.saturating_sub(self.used_pes())
    }

    fn load(&self) -> f64 {
        if self.pes == 0 {
            0.0
        } else {
            f64::from(self.used_pes()) / f64::from(self.pes)
        }
    }
}

/// Outcome flags of one applied action
#[derive(Debug, Clone, Copy, Default)]
struct Outcome {
    assignment_success: bool,
    create_vm_attempted: bool,
    create_vm_success: bool,
    destroy_vm_attempted: bool,
    destroy_vm_success: bool,
    invalid_action_taken: bool,
    host_affected_id: i64,
    cores_changed: i64,
}

/// One episode of simulated datacenter state
struct Simulation {
    settings: Settings,
    rng: StdRng,
    arrivals: Option<Poisson<f64>>,
    hosts: Vec<u32>,
    vms: Vec<Option<Vm>>,
    queue: VecDeque<Cloudlet>,
    clock: f64,
    step: u32,
    arrived: u32,
    finished_waits: Vec<f64>,
}

impl Simulation {
    fn new(settings: Settings, seed: u64) -> Self {
        let shape = compute_shape(&settings.infra);
        let arrivals = Poisson::new(settings.arrival_rate).ok();
        if arrivals.is_none() {
            warn!("Arrival rate {} is not positive, no cloudlets will arrive", settings.arrival_rate);
        }
        let mut sim = Self {
            rng: StdRng::seed_from_u64(seed),
            arrivals,
            hosts: vec![settings.infra.host_pes; settings.infra.hosts_count as usize],
            vms: (0..shape.max_potential_vms).map(|_| None).collect(),
            queue: VecDeque::new(),
            clock: 0.0,
            step: 0,
            arrived: 0,
            finished_waits: Vec::new(),
            settings,
        };

        let infra = &sim.settings.infra;
        let initial = [
            (VmType::Small, infra.initial_s_vm_count),
            (VmType::Medium, infra.initial_m_vm_count),
            (VmType::Large, infra.initial_l_vm_count),
        ];
        for (vm_type, count) in initial {
            for _ in 0..count {
                let placed = (0..sim.hosts.len()).find_map(|host| sim.create_vm(vm_type, host));
                if placed.is_none() {
                    warn!("No room for initial {} VM", vm_type);
                }
            }
        }
        sim.arrive();
        sim
    }

    fn allocated_pes(&self, host: usize) -> u32 {
        self.vms.iter().flatten().filter(|vm| vm.host == host).map(|vm| vm.pes).sum()
    }

    fn create_vm(&mut self, vm_type: VmType, host: usize) -> Option<usize> {
        let pes = vm_type.pes(&self.settings.infra);
        let capacity = *self.hosts.get(host)?;
        if self.allocated_pes(host) + pes > capacity {
            return None;
        }
        let slot = self.vms.iter().position(Option::is_none)?;
        self.vms[slot] = Some(Vm {
            vm_type,
            host,
            pes,
            running: Vec::new(),
        });
        Some(slot)
    }

    /// Remove a VM, putting its running cloudlets back at the head of the queue
    fn destroy_vm(&mut self, id: usize) -> Option<Vm> {
        let vm = self.vms.get_mut(id)?.take()?;
        for cloudlet in vm.running.iter().rev() {
            self.queue.push_front(cloudlet.clone());
        }
        Some(vm)
    }

    fn assign(&mut self, id: usize) -> bool {
        let Some(next_pes) = self.queue.front().map(|c| c.pes) else {
            return false;
        };
        let Some(Some(vm)) = self.vms.get_mut(id) else {
            return false;
        };
        if vm.available_pes() < next_pes {
            return false;
        }
        if let Some(mut cloudlet) = self.queue.pop_front() {
            cloudlet.started_at = self.clock;
            vm.running.push(cloudlet);
        }
        true
    }

    fn arrive(&mut self) {
        let Some(arrivals) = self.arrivals.as_ref() else {
            return;
        };
        let budget = self.settings.workload_size.saturating_sub(self.arrived);
        let n = (arrivals.sample(&mut self.rng) as u32).min(budget);
        let min = self.settings.infra.min_job_pes.max(1);
        let max = self.settings.infra.max_job_pes.max(min);
        for _ in 0..n {
            let cloudlet = Cloudlet {
                pes: self.rng.gen_range(min..=max),
                remaining: self.rng.gen_range(1..=MAX_CLOUDLET_STEPS),
                arrived_at: self.clock,
                started_at: self.clock,
            };
            self.queue.push_back(cloudlet);
        }
        self.arrived += n;
    }

    /// Run every VM for one timestep, then admit new arrivals
    fn advance(&mut self) {
        self.clock += self.settings.timestep;
        self.finished_waits.clear();
        for vm in self.vms.iter_mut().flatten() {
            for cloudlet in vm.running.iter_mut() {
                cloudlet.remaining = cloudlet.remaining.saturating_sub(1);
            }
            let (done, running): (Vec<_>, Vec<_>) = vm.running.drain(..).partition(|c| c.remaining == 0);
            vm.running = running;
            self.finished_waits
                .extend(done.iter().map(|c| c.started_at - c.arrived_at));
        }
        self.arrive();
    }

    fn is_running(&self) -> bool {
        (self.arrivals.is_some() && self.arrived < self.settings.workload_size)
            || !self.queue.is_empty()
            || self.vms.iter().flatten().any(|vm| !vm.running.is_empty())
    }

    fn apply(&mut self, action: &ExternalActionPayload) -> Outcome {
        let mut outcome = Outcome {
            host_affected_id: -1,
            ..Default::default()
        };
        let index = |x: i64| usize::try_from(x).ok();

        match *action {
            ExternalActionPayload::Assign(SKIP_ASSIGNMENT) => {}
            ExternalActionPayload::Assign(target) => {
                outcome.assignment_success = index(target).is_some_and(|id| self.assign(id));
                outcome.invalid_action_taken = !outcome.assignment_success;
            }
            ExternalActionPayload::Scaling([action_type, vm_id, host_id, vm_type]) => {
                match index(action_type).and_then(ActionType::from_repr) {
                    Some(ActionType::NoOp) => {}
                    Some(ActionType::AssignCloudlet) => {
                        outcome.assignment_success = index(vm_id).is_some_and(|id| self.assign(id));
                        outcome.invalid_action_taken = !outcome.assignment_success;
                    }
                    Some(ActionType::CreateVm) => {
                        outcome.create_vm_attempted = true;
                        let created = index(vm_type)
                            .and_then(VmType::from_repr)
                            .zip(index(host_id))
                            .and_then(|(t, host)| self.create_vm(t, host).map(|_| (t, host)));
                        match created {
                            Some((t, host)) => {
                                outcome.create_vm_success = true;
                                outcome.host_affected_id = host as i64;
                                outcome.cores_changed = i64::from(t.pes(&self.settings.infra));
                            }
                            None => outcome.invalid_action_taken = true,
                        }
                    }
                    Some(ActionType::DestroyVm) => {
                        outcome.destroy_vm_attempted = true;
                        match index(vm_id).and_then(|id| self.destroy_vm(id)) {
                            Some(vm) => {
                                outcome.destroy_vm_success = true;
                                outcome.host_affected_id = vm.host as i64;
                                outcome.cores_changed = -i64::from(vm.pes);
                            }
                            None => outcome.invalid_action_taken = true,
                        }
                    }
                    None => outcome.invalid_action_taken = true,
                }
            }
        }
        if outcome.invalid_action_taken {
            debug!("Invalid action {:?} at step {}", action, self.step);
        }
        outcome
    }

    fn rewards(&self, invalid: bool) -> [f64; 5] {
        fn mean(xs: impl Iterator<Item = f64>) -> f64 {
            let (sum, n) = xs.fold((0.0, 0usize), |(s, n), x| (s + x, n + 1));
            if n == 0 {
                0.0
            } else {
                sum / n as f64
            }
        }

        let c = &self.settings.coefs;
        let wait = mean(self.finished_waits.iter().copied());
        let unutilization = mean(self.vms.iter().flatten().map(|vm| 1.0 - vm.load()));
        let total_pes: u32 = self.hosts.iter().sum();
        let allocated: u32 = (0..self.hosts.len()).map(|h| self.allocated_pes(h)).sum();
        let cost = if total_pes == 0 {
            0.0
        } else {
            f64::from(allocated) / f64::from(total_pes)
        };
        let queue = if self.arrived == 0 {
            0.0
        } else {
            self.queue.len() as f64 / f64::from(self.arrived)
        };

        [
            -c.wait_time * wait,
            -c.unutilization * unutilization,
            -c.cost * cost,
            -c.queue_penalty * queue,
            -c.invalid_action * f64::from(u8::from(invalid)),
        ]
    }

    fn observe(&self) -> RawSnapshot {
        let vms = self.vms.iter().flatten();

        let mut host_running = vec![0u32; self.hosts.len()];
        let mut host_allocated = vec![0u32; self.hosts.len()];
        let mut host_vms = vec![0i32; self.hosts.len()];
        for vm in vms.clone() {
            host_running[vm.host] += vm.used_pes();
            host_allocated[vm.host] += vm.pes;
            host_vms[vm.host] += 1;
        }
        let ratio = |x: u32, of: u32| if of == 0 { 0.0 } else { f64::from(x) / f64::from(of) };

        let datacenter_pes: u32 = self.hosts.iter().sum();
        let mut tree = vec![datacenter_pes as i32, self.hosts.len() as i32];
        for (pes, vm_count) in self.hosts.iter().zip(&host_vms) {
            tree.extend([*pes as i32, *vm_count]);
        }
        for vm in vms.clone() {
            tree.extend([vm.pes as i32, vm.running.len() as i32]);
        }
        for cloudlet in vms.clone().flat_map(|vm| vm.running.iter()) {
            tree.extend([cloudlet.pes as i32, 0]);
        }

        RawSnapshot {
            host_loads: host_running.iter().zip(&self.hosts).map(|(&r, &p)| ratio(r, p)).collect(),
            host_ram_usage_ratio: host_allocated.iter().zip(&self.hosts).map(|(&a, &p)| ratio(a, p)).collect(),
            vm_loads: self.vms.iter().map(|vm| vm.as_ref().map_or(0.0, Vm::load)).collect(),
            vm_types: self
                .vms
                .iter()
                .map(|vm| vm.as_ref().map_or(VM_TYPE_OFF, |vm| vm.vm_type.tag()))
                .collect(),
            vm_host_map: self
                .vms
                .iter()
                .map(|vm| vm.as_ref().map_or(VM_HOST_ABSENT, |vm| vm.host as i32))
                .collect(),
            infrastructure_observation: tree,
            waiting_cloudlets: self.queue.len() as u32,
            next_cloudlet_pes: self.queue.front().map_or(0, |c| c.pes),
            vm_available_pes: self
                .vms
                .iter()
                .map(|vm| vm.as_ref().map_or(0, |vm| vm.available_pes() as i32))
                .collect(),
            actual_vm_count: vms.count() as u32,
            actual_host_count: self.hosts.len() as u32,
        }
    }

    fn render(&self) -> Value {
        json!({
            "clock": self.clock,
            "step": self.step,
            "waiting_cloudlets": self.queue.len(),
            "arrived_cloudlets": self.arrived,
            "hosts": self.hosts.iter().enumerate().map(|(id, pes)| json!({
                "id": id,
                "pes": pes,
                "allocated_pes": self.allocated_pes(id),
            })).collect::<Vec<_>>(),
            "vms": self.vms.iter().enumerate().filter_map(|(id, vm)| vm.as_ref().map(|vm| json!({
                "id": id,
                "type": vm.vm_type.to_string(),
                "host": vm.host,
                "pes": vm.pes,
                "running_cloudlets": vm.running.len(),
            }))).collect::<Vec<_>>(),
        })
    }
}

/// A deterministic, seeded stand-in for the external simulator
///
/// Hosts carry VMs in fixed slots, cloudlets arrive in a Poisson stream and queue until
/// assigned, and every step reports the same outcome flags and reward components the
/// real simulator does. Faults can be injected to exercise the decision loop's recovery
/// paths.
pub struct InMemorySimulator {
    settings: Option<Settings>,
    sim: Option<Simulation>,
    reject_configure: bool,
    fail_reset: bool,
    null_snapshot_at: Option<u32>,
    fail_step_at: Option<u32>,
    closed: bool,
}

impl Default for InMemorySimulator {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemorySimulator {
    pub fn new() -> Self {
        Self {
            settings: None,
            sim: None,
            reject_configure: false,
            fail_reset: false,
            null_snapshot_at: None,
            fail_step_at: None,
            closed: false,
        }
    }

    /// Reject every `configure` call
    pub fn with_rejected_configuration(mut self) -> Self {
        self.reject_configure = true;
        self
    }

    /// Fail every `reset` call
    pub fn with_failing_reset(mut self) -> Self {
        self.fail_reset = true;
        self
    }

    /// Send a null snapshot on the given 1-based step of every episode
    pub fn with_null_snapshot_at(mut self, step: u32) -> Self {
        self.null_snapshot_at = Some(step);
        self
    }

    /// Fail the given 1-based step of every episode
    pub fn with_failing_step(mut self, step: u32) -> Self {
        self.fail_step_at = Some(step);
        self
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    fn ensure_open(&self) -> Result<()> {
        if self.closed {
            Err(GatewayError::Closed)
        } else {
            Ok(())
        }
    }
}

impl SimulatorTransport for InMemorySimulator {
    fn configure(&mut self, params: &Params) -> Result<()> {
        self.ensure_open()?;
        if self.reject_configure {
            return Err(GatewayError::ConfigurationRejected(
                "simulator refused the parameters".to_owned(),
            ));
        }
        let settings =
            Settings::from_params(params).map_err(|e| GatewayError::ConfigurationRejected(e.to_string()))?;
        info!(
            "Configured in-memory simulator: {} hosts x {} PEs",
            settings.infra.hosts_count, settings.infra.host_pes
        );
        self.settings = Some(settings);
        Ok(())
    }

    fn reset(&mut self, seed: u64) -> Result<ResetResponse> {
        self.ensure_open()?;
        let settings = self
            .settings
            .clone()
            .ok_or_else(|| GatewayError::Remote("simulation not configured".to_owned()))?;
        if self.fail_reset {
            return Err(GatewayError::Remote("injected reset failure".to_owned()));
        }
        let sim = Simulation::new(settings, seed);
        let response = ResetResponse {
            observation: Some(sim.observe()),
            info: json!({ "current_clock": sim.clock })
                .as_object()
                .cloned()
                .unwrap_or_default(),
        };
        self.sim = Some(sim);
        Ok(response)
    }

    fn step(&mut self, action: &ExternalActionPayload) -> Result<StepResponse> {
        self.ensure_open()?;
        let sim = self
            .sim
            .as_mut()
            .ok_or_else(|| GatewayError::StepFailure("simulation not reset".to_owned()))?;
        sim.step += 1;
        if self.fail_step_at == Some(sim.step) {
            return Err(GatewayError::StepFailure(format!("injected failure at step {}", sim.step)));
        }

        let outcome = sim.apply(action);
        sim.advance();
        let rewards = sim.rewards(outcome.invalid_action_taken);

        let terminated = !sim.is_running();
        let truncated = !terminated && sim.step >= sim.settings.infra.max_episode_length;

        let mut info = Info::new();
        let flags = [
            ("assignment_success", outcome.assignment_success),
            ("create_vm_attempted", outcome.create_vm_attempted),
            ("create_vm_success", outcome.create_vm_success),
            ("destroy_vm_attempted", outcome.destroy_vm_attempted),
            ("destroy_vm_success", outcome.destroy_vm_success),
            ("invalid_action_taken", outcome.invalid_action_taken),
        ];
        for (key, flag) in flags {
            info.insert(key.to_owned(), flag.into());
        }
        info.insert("host_affected_id".to_owned(), outcome.host_affected_id.into());
        info.insert("cores_changed".to_owned(), outcome.cores_changed.into());
        info.insert("current_clock".to_owned(), sim.clock.into());
        let components = [
            "reward_wait_time",
            "reward_unutilization",
            "reward_cost",
            "reward_queue_penalty",
            "reward_invalid_action",
        ];
        for (key, value) in components.into_iter().zip(rewards) {
            info.insert(key.to_owned(), value.into());
        }

        let observation = (self.null_snapshot_at != Some(sim.step)).then(|| sim.observe());

        Ok(StepResponse {
            observation,
            reward: rewards.iter().sum(),
            terminated,
            truncated,
            info,
        })
    }

    fn render(&mut self) -> Result<Value> {
        self.ensure_open()?;
        Ok(self.sim.as_ref().map_or(Value::Null, Simulation::render))
    }

    fn close(&mut self) -> Result<()> {
        if !self.closed {
            self.closed = true;
            self.sim = None;
            info!("In-memory simulator closed");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{NormalizationConfig, Scalar};
    use crate::snapshot::decode;

    fn configured(extra: &[(&str, Scalar)]) -> InMemorySimulator {
        let mut config = InfrastructureConfig {
            hosts_count: 2,
            host_pes: 8,
            initial_s_vm_count: 1,
            initial_m_vm_count: 1,
            initial_l_vm_count: 0,
            max_episode_length: 50,
            ..Default::default()
        };
        for (k, v) in extra {
            config.extra.insert(k.to_string(), v.clone());
        }
        let mut sim = InMemorySimulator::new();
        sim.configure(&config.to_params()).unwrap();
        sim
    }

    fn create(vm_type: i64, host: i64) -> ExternalActionPayload {
        ExternalActionPayload::Scaling([ActionType::CreateVm as i64, 0, host, vm_type])
    }

    #[test]
    fn deterministic_for_a_seed() {
        let run = || {
            let mut sim = configured(&[]);
            let mut out = vec![serde_json::to_value(sim.reset(7).unwrap()).unwrap()];
            for i in 0..10 {
                let action = ExternalActionPayload::Scaling([1, i % 2, 0, 0]);
                out.push(serde_json::to_value(sim.step(&action).unwrap()).unwrap());
            }
            out
        };
        assert_eq!(run(), run(), "same seed, same trajectory");
    }

    #[test]
    fn observation_fits_the_computed_shape() {
        let mut sim = configured(&[]);
        let reset = sim.reset(1).unwrap();
        let raw = reset.observation.expect("snapshot on reset");
        assert_eq!(raw.actual_vm_count, 2, "initial fleet placed");
        assert_eq!(raw.actual_host_count, 2);
        assert_eq!(raw.vm_types[..2], [VmType::Small.tag(), VmType::Medium.tag()]);

        let config = sim.settings.as_ref().unwrap().infra.clone();
        let shape = compute_shape(&config);
        let decoded = decode(Some(&raw), &shape, &NormalizationConfig::from(&config));
        assert!(decoded.truncations.is_empty(), "nothing truncated: {:?}", decoded.truncations);
    }

    #[test]
    fn scaling_outcomes() {
        let mut sim = configured(&[("arrival_rate", Scalar::Float(0.0))]);
        sim.reset(3).unwrap();

        // Host 0 holds 2 + 4 PEs of 8, so a large VM (8 PEs) only fits on host 1
        let step = sim.step(&create(VmType::Large as i64, 0)).unwrap();
        assert_eq!(step.info["create_vm_success"], false);
        assert_eq!(step.info["invalid_action_taken"], true);
        assert_eq!(step.info["reward_invalid_action"], -1.0, "invalid action penalized");

        let step = sim.step(&create(VmType::Large as i64, 1)).unwrap();
        assert_eq!(step.info["create_vm_success"], true);
        assert_eq!(step.info["host_affected_id"], 1);
        assert_eq!(step.info["cores_changed"], 8);
        assert_eq!(step.observation.unwrap().actual_vm_count, 3);

        let destroy = ExternalActionPayload::Scaling([ActionType::DestroyVm as i64, 0, 0, 0]);
        let step = sim.step(&destroy).unwrap();
        assert_eq!(step.info["destroy_vm_success"], true);
        assert_eq!(step.info["cores_changed"], -2);
        let step = sim.step(&destroy).unwrap();
        assert_eq!(step.info["destroy_vm_success"], false, "slot already empty");
    }

    #[test]
    fn assignment_respects_capacity() {
        let mut sim = configured(&[("arrival_rate", Scalar::Float(20.0))]);
        let raw = sim.reset(11).unwrap().observation.unwrap();
        assert!(raw.waiting_cloudlets > 0, "work queued on reset");

        let fits = raw.vm_available_pes[1] >= raw.next_cloudlet_pes as i32;
        let step = sim.step(&ExternalActionPayload::Assign(1)).unwrap();
        assert_eq!(step.info["assignment_success"], fits);

        let step = sim.step(&ExternalActionPayload::Assign(SKIP_ASSIGNMENT)).unwrap();
        assert_eq!(step.info["invalid_action_taken"], false, "skipping is always valid");
    }

    #[test]
    fn episode_ends() {
        let mut sim = configured(&[("arrival_rate", Scalar::Float(0.0))]);
        sim.reset(0).unwrap();
        let noop = ExternalActionPayload::Scaling([0; 4]);
        let step = sim.step(&noop).unwrap();
        assert!(step.terminated, "no workload, nothing left to run");

        let mut sim = configured(&[]);
        sim.reset(0).unwrap();
        let last = (0..50).map(|_| sim.step(&noop).unwrap()).last().unwrap();
        assert!(last.truncated && !last.terminated, "truncated at max episode length");
    }

    #[test]
    fn injected_faults() {
        let mut sim = InMemorySimulator::new().with_rejected_configuration();
        assert!(matches!(
            sim.configure(&Params::new()),
            Err(GatewayError::ConfigurationRejected(_))
        ));

        let mut sim = InMemorySimulator::new().with_null_snapshot_at(2).with_failing_step(3);
        sim.configure(&InfrastructureConfig::default().to_params()).unwrap();
        sim.reset(0).unwrap();
        let noop = ExternalActionPayload::Scaling([0; 4]);
        assert!(sim.step(&noop).unwrap().observation.is_some());
        assert!(sim.step(&noop).unwrap().observation.is_none(), "null snapshot");
        assert!(matches!(sim.step(&noop), Err(GatewayError::StepFailure(_))));

        let mut sim = InMemorySimulator::new().with_failing_reset();
        sim.configure(&Params::new()).unwrap();
        assert!(matches!(sim.reset(0), Err(GatewayError::Remote(_))));
        assert!(sim.step(&noop).is_err(), "no episode after a failed reset");
    }

    #[test]
    fn protocol_order_and_close() {
        let mut sim = InMemorySimulator::new();
        assert!(sim.reset(0).is_err(), "reset before configure");
        sim.configure(&Params::new()).unwrap();
        assert!(sim.step(&ExternalActionPayload::Assign(-1)).is_err(), "step before reset");
        assert_eq!(sim.render().unwrap(), Value::Null);

        sim.close().unwrap();
        sim.close().unwrap();
        assert!(sim.is_closed());
        assert!(matches!(sim.reset(0), Err(GatewayError::Closed)));
    }

    #[test]
    fn bad_parameters_rejected() {
        let mut sim = InMemorySimulator::new();
        let params = Params::from([("hosts_count".to_owned(), Scalar::Int(-2))]);
        assert!(matches!(
            sim.configure(&params),
            Err(GatewayError::ConfigurationRejected(_))
        ));
    }
}
