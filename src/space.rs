use log::info;
use serde::{Deserialize, Serialize};
use strum::{Display, EnumIter, EnumString, FromRepr, VariantArray};

use crate::config::InfrastructureConfig;

/// Potential VM count used when the capacity-based formula is undefined
pub const MIN_POTENTIAL_VMS: usize = 10;

/// Headroom factor applied to the number of small VMs the datacenter could host
const VM_HEADROOM: f64 = 1.1;

/// The kind of decision taken in the scaling action space (dimension 0)
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, FromRepr, EnumIter, VariantArray, Display, Serialize, Deserialize,
)]
#[repr(usize)]
pub enum ActionType {
    NoOp = 0,
    AssignCloudlet = 1,
    CreateVm = 2,
    DestroyVm = 3,
}

/// VM sizes selectable in the scaling action space (dimension 3)
///
/// Indices here are action indices; the snapshot tags VM slots with `index + 1` and
/// reserves 0 for an empty slot.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, FromRepr, EnumIter, VariantArray, Display, Serialize, Deserialize,
)]
#[repr(usize)]
pub enum VmType {
    Small = 0,
    Medium = 1,
    Large = 2,
}

impl VmType {
    /// PEs a VM of this type occupies on its host
    pub fn pes(self, config: &InfrastructureConfig) -> u32 {
        match self {
            Self::Small => config.small_vm_pes,
            Self::Medium => config.medium_vm_pes(),
            Self::Large => config.large_vm_pes(),
        }
    }

    /// The tag this type carries in [`Snapshot::vm_types`](crate::snapshot::Snapshot::vm_types)
    pub fn tag(self) -> i32 {
        self as i32 + 1
    }

    pub fn from_tag(tag: i32) -> Option<Self> {
        usize::try_from(tag - 1).ok().and_then(Self::from_repr)
    }
}

/// Which action space the agent acts in
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Hash, EnumString, Display, Serialize, Deserialize,
)]
#[strum(serialize_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum ActionSpaceVariant {
    /// `(action_type, vm_id, host_id, vm_type)`: assign work and scale the VM fleet
    #[default]
    Scaling,
    /// A single index: 0 skips, `n` assigns the next cloudlet to VM `n - 1`
    LoadBalancing,
}

/// Fixed cardinalities of every observation and action dimension
///
/// Derived once from an [`InfrastructureConfig`]; every padded container in a
/// [`Snapshot`](crate::snapshot::Snapshot) is sized from here.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SpaceShape {
    pub host_count: usize,
    pub max_potential_vms: usize,
    pub max_potential_jobs: usize,
    /// Two slots per tree node: resource capacity and child count
    pub tree_array_len: usize,
}

impl SpaceShape {
    /// Cardinality of each action dimension, in the order the agent samples them
    pub fn action_dims(&self, variant: ActionSpaceVariant) -> Vec<usize> {
        match variant {
            ActionSpaceVariant::Scaling => vec![
                ActionType::VARIANTS.len(),
                self.max_potential_vms.max(1),
                self.host_count.max(1),
                VmType::VARIANTS.len(),
            ],
            ActionSpaceVariant::LoadBalancing => vec![self.max_potential_vms + 1],
        }
    }

    /// Length of the flattened observation vector produced by
    /// [`Snapshot::features`](crate::snapshot::Snapshot::features)
    pub fn observation_len(&self) -> usize {
        2 * self.host_count + 3 * self.max_potential_vms + self.tree_array_len + 2
    }
}

/// Compute the fixed space cardinalities for a datacenter configuration
///
/// `max_potential_vms` is the number of small VMs the datacenter could host, plus 10%
/// headroom. When hosts, host PEs or small-VM PEs are zero that formula is undefined and
/// the initial fleet size (at least [`MIN_POTENTIAL_VMS`]) is used instead.
pub fn compute_shape(config: &InfrastructureConfig) -> SpaceShape {
    let datacenter_pes = config.datacenter_pes();

    let max_potential_vms = if datacenter_pes == 0 || config.small_vm_pes == 0 {
        MIN_POTENTIAL_VMS.max(config.initial_vm_count() as usize)
    } else {
        ((datacenter_pes as f64 / f64::from(config.small_vm_pes)) * VM_HEADROOM).ceil() as usize
    };

    let max_potential_jobs = (datacenter_pes / u64::from(config.min_job_pes.max(1))) as usize;
    let host_count = config.hosts_count as usize;
    let tree_array_len = 2 + 2 * host_count + 2 * max_potential_vms + 2 * max_potential_jobs;

    SpaceShape {
        host_count,
        max_potential_vms,
        max_potential_jobs,
        tree_array_len,
    }
}

/// [`compute_shape`] with the derived sizes logged, as done once per environment
pub(crate) fn compute_shape_logged(config: &InfrastructureConfig) -> SpaceShape {
    let shape = compute_shape(config);
    info!(
        "Calculated tree array length {} (from {} hosts, {} potential VMs, {} potential jobs)",
        shape.tree_array_len, shape.host_count, shape.max_potential_vms, shape.max_potential_jobs
    );
    shape
}
