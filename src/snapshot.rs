use log::{error, warn};
use serde::{Deserialize, Serialize};

use crate::config::NormalizationConfig;
use crate::error::{GatewayError, Result};
use crate::space::{ActionSpaceVariant, ActionType, SpaceShape, VmType};

/// Tag of an empty VM slot in [`Snapshot::vm_types`]
pub const VM_TYPE_OFF: i32 = 0;

/// Host id of an empty VM slot in [`Snapshot::vm_host_map`]
pub const VM_HOST_ABSENT: i32 = -1;

/// Target the simulator reads as "leave the cloudlet queued"
pub const SKIP_ASSIGNMENT: i64 = -1;

/// Simulator state exactly as it arrives over the wire
///
/// Array lengths follow the simulator's current population and are not trusted; use
/// [`decode`] to obtain a fixed-size [`Snapshot`].
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RawSnapshot {
    pub host_loads: Vec<f64>,
    pub host_ram_usage_ratio: Vec<f64>,
    pub vm_loads: Vec<f64>,
    /// 0 = off, 1 = small, 2 = medium, 3 = large
    pub vm_types: Vec<i32>,
    pub vm_host_map: Vec<i32>,
    pub infrastructure_observation: Vec<i32>,
    pub waiting_cloudlets: u32,
    pub next_cloudlet_pes: u32,
    pub vm_available_pes: Vec<i32>,
    pub actual_vm_count: u32,
    pub actual_host_count: u32,
}

/// Fixed-size view of the simulator state at one decision point
///
/// Every array has the length dictated by the [`SpaceShape`] it was decoded with,
/// regardless of how many hosts or VMs currently exist. `actual_vm_count` and
/// `actual_host_count` say how much of the padded arrays is real.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Snapshot {
    pub host_loads: Vec<f32>,
    pub host_ram_usage_ratio: Vec<f32>,
    pub vm_loads: Vec<f32>,
    pub vm_types: Vec<i32>,
    pub vm_host_map: Vec<i32>,
    pub vm_available_pes: Vec<i32>,
    pub infrastructure_observation: Vec<i32>,
    /// Queue length divided by the queue ceiling, clamped to `[0, 1]`
    pub waiting_cloudlets: f32,
    /// Next cloudlet's PEs divided by the PE ceiling, clamped to `[0, 1]`
    pub next_cloudlet_pes: f32,
    pub waiting_cloudlets_raw: u32,
    pub next_cloudlet_pes_raw: u32,
    pub actual_vm_count: usize,
    pub actual_host_count: usize,
}

impl Snapshot {
    /// A correctly shaped snapshot with every field at its fill value
    pub fn zeroed(shape: &SpaceShape) -> Self {
        Self {
            host_loads: vec![0.0; shape.host_count],
            host_ram_usage_ratio: vec![0.0; shape.host_count],
            vm_loads: vec![0.0; shape.max_potential_vms],
            vm_types: vec![VM_TYPE_OFF; shape.max_potential_vms],
            vm_host_map: vec![VM_HOST_ABSENT; shape.max_potential_vms],
            vm_available_pes: vec![0; shape.max_potential_vms],
            infrastructure_observation: vec![0; shape.tree_array_len],
            waiting_cloudlets: 0.0,
            next_cloudlet_pes: 0.0,
            waiting_cloudlets_raw: 0,
            next_cloudlet_pes_raw: 0,
            actual_vm_count: 0,
            actual_host_count: 0,
        }
    }

    /// Whether the VM slot holds a running VM
    pub fn is_vm_on(&self, vm_id: usize) -> bool {
        self.vm_types.get(vm_id).is_some_and(|&t| t != VM_TYPE_OFF)
    }

    /// Ids of every slot holding a running VM
    pub fn active_vms(&self) -> impl Iterator<Item = usize> + '_ {
        (0..self.vm_types.len()).filter(|&id| self.is_vm_on(id))
    }

    /// Flatten the observation into one vector
    ///
    /// Order: host loads, host RAM ratios, VM loads, VM types, VM host map, tree array,
    /// waiting cloudlets, next cloudlet PEs. Length is [`SpaceShape::observation_len`].
    pub fn features(&self) -> Vec<f32> {
        let ints = |v: &[i32]| v.iter().map(|&x| x as f32).collect::<Vec<_>>();
        let mut out = Vec::with_capacity(
            self.host_loads.len() * 2
                + self.vm_loads.len() * 3
                + self.infrastructure_observation.len()
                + 2,
        );
        out.extend_from_slice(&self.host_loads);
        out.extend_from_slice(&self.host_ram_usage_ratio);
        out.extend_from_slice(&self.vm_loads);
        out.extend(ints(&self.vm_types));
        out.extend(ints(&self.vm_host_map));
        out.extend(ints(&self.infrastructure_observation));
        out.push(self.waiting_cloudlets);
        out.push(self.next_cloudlet_pes);
        out
    }
}

/// A raw array that did not fit its fixed-size container
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Truncation {
    pub field: &'static str,
    pub from: usize,
    pub to: usize,
}

impl From<Truncation> for GatewayError {
    fn from(t: Truncation) -> Self {
        GatewayError::ShapeMismatch {
            field: t.field,
            expected: t.to,
            actual: t.from,
        }
    }
}

/// Result of [`decode`]
#[derive(Debug, Clone, PartialEq)]
pub struct Decoded {
    pub snapshot: Snapshot,
    /// One entry per field that was cut down to its target length
    pub truncations: Vec<Truncation>,
    /// The simulator sent no snapshot and `snapshot` is all fill values
    pub malformed: bool,
}

/// Copy `src` into `dst`, converting elements, and report if `src` did not fit
fn fit<S: Copy, D>(
    field: &'static str,
    src: &[S],
    dst: &mut [D],
    convert: impl Fn(S) -> D,
    truncations: &mut Vec<Truncation>,
) {
    let n = src.len().min(dst.len());
    for (d, &s) in dst.iter_mut().zip(&src[..n]) {
        *d = convert(s);
    }
    if src.len() > dst.len() {
        let truncation = Truncation {
            field,
            from: src.len(),
            to: dst.len(),
        };
        warn!("Snapshot truncated: {}", GatewayError::from(truncation.clone()));
        truncations.push(truncation);
    }
}

fn normalize(value: u32, ceiling: f64) -> f32 {
    (f64::from(value) / ceiling).clamp(0.0, 1.0) as f32
}

/// Convert a simulator snapshot into the fixed-size containers described by `shape`
///
/// Longer arrays are truncated (one [`Truncation`] per field), shorter ones keep their
/// fill value in the remaining slots. A missing snapshot decodes to
/// [`Snapshot::zeroed`] with `malformed` set, so the decision loop always has a
/// well-shaped observation.
pub fn decode(raw: Option<&RawSnapshot>, shape: &SpaceShape, norm: &NormalizationConfig) -> Decoded {
    let mut snapshot = Snapshot::zeroed(shape);

    let Some(raw) = raw else {
        error!("{}", GatewayError::MalformedSnapshot);
        return Decoded {
            snapshot,
            truncations: Vec::new(),
            malformed: true,
        };
    };

    let mut truncations = Vec::new();
    let t = &mut truncations;
    let as_f32 = |x: f64| x as f32;
    let same = |x: i32| x;

    fit("host_loads", &raw.host_loads, &mut snapshot.host_loads, as_f32, t);
    fit(
        "host_ram_usage_ratio",
        &raw.host_ram_usage_ratio,
        &mut snapshot.host_ram_usage_ratio,
        as_f32,
        t,
    );
    fit("vm_loads", &raw.vm_loads, &mut snapshot.vm_loads, as_f32, t);
    fit("vm_types", &raw.vm_types, &mut snapshot.vm_types, same, t);
    fit("vm_host_map", &raw.vm_host_map, &mut snapshot.vm_host_map, same, t);
    fit(
        "vm_available_pes",
        &raw.vm_available_pes,
        &mut snapshot.vm_available_pes,
        same,
        t,
    );
    fit(
        "infrastructure_observation",
        &raw.infrastructure_observation,
        &mut snapshot.infrastructure_observation,
        same,
        t,
    );

    snapshot.waiting_cloudlets = normalize(raw.waiting_cloudlets, norm.queue_ceiling());
    snapshot.next_cloudlet_pes = normalize(raw.next_cloudlet_pes, norm.pes_ceiling());
    snapshot.waiting_cloudlets_raw = raw.waiting_cloudlets;
    snapshot.next_cloudlet_pes_raw = raw.next_cloudlet_pes;
    snapshot.actual_vm_count = (raw.actual_vm_count as usize).min(shape.max_potential_vms);
    snapshot.actual_host_count = (raw.actual_host_count as usize).min(shape.host_count);

    Decoded {
        snapshot,
        truncations,
        malformed: false,
    }
}

/// An action chosen by the agent, typed per action space
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Selection {
    Scaling {
        action_type: ActionType,
        vm_id: usize,
        host_id: usize,
        vm_type: VmType,
    },
    /// 0 skips, `n >= 1` targets VM `n - 1`
    LoadBalancing(usize),
}

impl Selection {
    pub fn variant(&self) -> ActionSpaceVariant {
        match self {
            Selection::Scaling { .. } => ActionSpaceVariant::Scaling,
            Selection::LoadBalancing(_) => ActionSpaceVariant::LoadBalancing,
        }
    }

    /// Per-dimension indices, the inverse of [`decode_selection`]
    pub fn indices(&self) -> Vec<usize> {
        match *self {
            Selection::Scaling {
                action_type,
                vm_id,
                host_id,
                vm_type,
            } => vec![action_type as usize, vm_id, host_id, vm_type as usize],
            Selection::LoadBalancing(ix) => vec![ix],
        }
    }
}

/// Build a typed [`Selection`] from the agent's raw per-dimension indices
pub fn decode_selection(indices: &[usize], variant: ActionSpaceVariant) -> Result<Selection> {
    match (variant, indices) {
        (ActionSpaceVariant::Scaling, &[action_type, vm_id, host_id, vm_type]) => {
            Ok(Selection::Scaling {
                action_type: ActionType::from_repr(action_type).ok_or_else(|| {
                    GatewayError::InvalidSelection(format!("unknown action type {action_type}"))
                })?,
                vm_id,
                host_id,
                vm_type: VmType::from_repr(vm_type).ok_or_else(|| {
                    GatewayError::InvalidSelection(format!("unknown VM type {vm_type}"))
                })?,
            })
        }
        (ActionSpaceVariant::LoadBalancing, &[ix]) => Ok(Selection::LoadBalancing(ix)),
        (variant, indices) => Err(GatewayError::InvalidSelection(format!(
            "{} indices do not fit the {variant} action space",
            indices.len()
        ))),
    }
}

/// An action in the form the simulator's `step` expects
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ExternalActionPayload {
    /// `[action_type, vm_id, host_id, vm_type]`
    Scaling([i64; 4]),
    /// Target VM id, or [`SKIP_ASSIGNMENT`]
    Assign(i64),
}

impl ExternalActionPayload {
    /// The payload as a flat integer list, as recorded in episode telemetry
    pub fn to_vec(&self) -> Vec<i64> {
        match self {
            Self::Scaling(a) => a.to_vec(),
            Self::Assign(target) => vec![*target],
        }
    }
}

/// Convert a [`Selection`] into the simulator's action payload
///
/// Scaling selections pass through unchanged as a 4-tuple. Load-balancing index 0 maps
/// to [`SKIP_ASSIGNMENT`] and index `n` to VM id `n - 1`; the mask engine applies the
/// same shift.
pub fn encode_action(selection: &Selection, variant: ActionSpaceVariant) -> Result<ExternalActionPayload> {
    if selection.variant() != variant {
        return Err(GatewayError::InvalidSelection(format!(
            "{} selection given to the {variant} action space",
            selection.variant()
        )));
    }
    let payload = match *selection {
        Selection::Scaling {
            action_type,
            vm_id,
            host_id,
            vm_type,
        } => ExternalActionPayload::Scaling([
            action_type as i64,
            vm_id as i64,
            host_id as i64,
            vm_type as i64,
        ]),
        Selection::LoadBalancing(0) => ExternalActionPayload::Assign(SKIP_ASSIGNMENT),
        Selection::LoadBalancing(n) => ExternalActionPayload::Assign(n as i64 - 1),
    };
    Ok(payload)
}
