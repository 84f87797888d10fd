use log::warn;
use rand::{seq::IteratorRandom, Rng};
use serde::{Deserialize, Serialize};
use strum::VariantArray;

use crate::snapshot::{Selection, Snapshot};
use crate::space::{ActionSpaceVariant, ActionType, SpaceShape, VmType};

/// Load or RAM ratio at and above which a host is considered saturated
pub const HOST_SATURATION: f32 = 0.99;

/// Waiting-cloudlet counts at or below this are treated as an empty queue
const QUEUE_EPSILON: f32 = 1e-6;

/// Per-dimension legality of the scaling action space
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScalingMask {
    pub action_type: Vec<bool>,
    pub vm_id: Vec<bool>,
    pub host_id: Vec<bool>,
    pub vm_type: Vec<bool>,
}

impl ScalingMask {
    fn noop_only(vm_slots: usize, hosts: usize) -> Self {
        let first = |n: usize| (0..n.max(1)).map(|i| i == 0).collect::<Vec<_>>();
        Self {
            action_type: first(ActionType::VARIANTS.len()),
            vm_id: first(vm_slots),
            host_id: first(hosts),
            vm_type: first(VmType::VARIANTS.len()),
        }
    }

    fn allows_type(&self, action_type: ActionType) -> bool {
        self.action_type[action_type as usize]
    }
}

/// Which actions may be sampled at the current decision point
///
/// Each dimension is sampled independently downstream, so every dimension always has
/// at least one legal entry. When a dimension is irrelevant to the legal action types,
/// index 0 stands in as a dummy value.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ActionMask {
    Scaling(ScalingMask),
    /// Index 0 is "skip", index `n` assigns to VM `n - 1`
    LoadBalancing(Vec<bool>),
}

impl ActionMask {
    /// The mask used before any snapshot exists: only NoOp / skip
    pub fn noop_only(shape: &SpaceShape, variant: ActionSpaceVariant) -> Self {
        match variant {
            ActionSpaceVariant::Scaling => {
                Self::Scaling(ScalingMask::noop_only(shape.max_potential_vms, shape.host_count))
            }
            ActionSpaceVariant::LoadBalancing => {
                let mut mask = vec![false; shape.max_potential_vms + 1];
                mask[0] = true;
                Self::LoadBalancing(mask)
            }
        }
    }

    pub fn variant(&self) -> ActionSpaceVariant {
        match self {
            Self::Scaling(_) => ActionSpaceVariant::Scaling,
            Self::LoadBalancing(_) => ActionSpaceVariant::LoadBalancing,
        }
    }

    /// Per-dimension masks in action-space order
    pub fn dims(&self) -> Vec<&[bool]> {
        match self {
            Self::Scaling(m) => vec![
                m.action_type.as_slice(),
                m.vm_id.as_slice(),
                m.host_id.as_slice(),
                m.vm_type.as_slice(),
            ],
            Self::LoadBalancing(m) => vec![m.as_slice()],
        }
    }

    /// All dimensions concatenated into one vector
    pub fn flatten(&self) -> Vec<bool> {
        self.dims().concat()
    }

    /// Whether every index of `selection` is legal
    pub fn allows(&self, selection: &Selection) -> bool {
        selection.variant() == self.variant()
            && self
                .dims()
                .iter()
                .zip(selection.indices())
                .all(|(dim, ix)| dim.get(ix).copied().unwrap_or(false))
    }

    /// Draw a uniformly random legal index in every dimension
    pub fn sample<R: Rng + ?Sized>(&self, rng: &mut R) -> Selection {
        let ix: Vec<usize> = self
            .dims()
            .into_iter()
            .map(|dim| {
                dim.iter()
                    .enumerate()
                    .filter_map(|(i, &legal)| legal.then_some(i))
                    .choose(&mut *rng)
                    .unwrap_or(0)
            })
            .collect();

        match self {
            Self::Scaling(_) => Selection::Scaling {
                action_type: ActionType::from_repr(ix[0]).unwrap_or(ActionType::NoOp),
                vm_id: ix[1],
                host_id: ix[2],
                vm_type: VmType::from_repr(ix[3]).unwrap_or(VmType::Small),
            },
            Self::LoadBalancing(_) => Selection::LoadBalancing(ix[0]),
        }
    }
}

/// Compute the action mask for a snapshot
///
/// Pure: depends only on `snapshot` and `variant`, never on the simulator. Padding
/// slots (VM slots tagged off, hosts beyond `actual_host_count`) are never legal
/// targets.
pub fn compute_mask(snapshot: &Snapshot, variant: ActionSpaceVariant) -> ActionMask {
    match variant {
        ActionSpaceVariant::Scaling => ActionMask::Scaling(scaling_mask(snapshot)),
        ActionSpaceVariant::LoadBalancing => ActionMask::LoadBalancing(load_balancing_mask(snapshot)),
    }
}

fn scaling_mask(s: &Snapshot) -> ScalingMask {
    let vm_slots = s.vm_types.len();
    let hosts = s.host_loads.len();

    let mut m = ScalingMask::noop_only(vm_slots, hosts);
    m.vm_id[0] = false;
    m.host_id[0] = false;
    m.vm_type[0] = false;

    let active: Vec<usize> = s.active_vms().collect();

    // Assign
    if s.waiting_cloudlets_raw as f32 > QUEUE_EPSILON && !active.is_empty() {
        m.action_type[ActionType::AssignCloudlet as usize] = true;
        for &id in &active {
            m.vm_id[id] = true;
        }
        m.host_id[0] = true;
        m.vm_type[0] = true;
    }

    // Create
    if s.actual_vm_count < vm_slots {
        let open_hosts: Vec<usize> = (0..hosts.min(s.actual_host_count))
            .filter(|&h| {
                s.host_loads[h] < HOST_SATURATION
                    && s.host_ram_usage_ratio.get(h).is_some_and(|&r| r < HOST_SATURATION)
            })
            .collect();
        if !open_hosts.is_empty() {
            m.action_type[ActionType::CreateVm as usize] = true;
            for h in open_hosts {
                m.host_id[h] = true;
            }
            m.vm_type.fill(true);
            m.vm_id[0] = true;
        }
    }

    // Destroy
    if s.actual_vm_count > 0 && !active.is_empty() {
        m.action_type[ActionType::DestroyVm as usize] = true;
        for &id in &active {
            m.vm_id[id] = true;
        }
        m.host_id[0] = true;
        m.vm_type[0] = true;
    }

    let any_action = [
        ActionType::AssignCloudlet,
        ActionType::CreateVm,
        ActionType::DestroyVm,
    ]
    .into_iter()
    .any(|t| m.allows_type(t));

    if any_action {
        for dim in [&mut m.vm_id, &mut m.host_id, &mut m.vm_type] {
            if !dim.contains(&true) {
                dim[0] = true;
            }
        }
    } else {
        m = ScalingMask::noop_only(vm_slots, hosts);
    }

    m
}

fn load_balancing_mask(s: &Snapshot) -> Vec<bool> {
    let mut mask = vec![false; s.vm_available_pes.len() + 1];

    if s.waiting_cloudlets_raw == 0 || s.next_cloudlet_pes_raw == 0 {
        mask[0] = true;
        return mask;
    }

    let needed = i64::from(s.next_cloudlet_pes_raw);
    for (vm_id, &available) in s.vm_available_pes.iter().enumerate() {
        mask[vm_id + 1] = i64::from(available) >= needed;
    }

    // TODO: confirm with the simulator owners whether infeasible placements should be
    // offered here or whether skip should be re-enabled instead.
    if !mask.contains(&true) {
        warn!(
            "No VM has {} free PEs, enabling every running VM",
            s.next_cloudlet_pes_raw
        );
        for vm_id in s.active_vms() {
            if let Some(slot) = mask.get_mut(vm_id + 1) {
                *slot = true;
            }
        }
        // No running VM: only skip remains
        if !mask.contains(&true) {
            mask[0] = true;
        }
    }

    mask
}
