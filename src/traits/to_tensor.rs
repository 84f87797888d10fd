use burn::prelude::*;

use crate::mask::ActionMask;
use crate::snapshot::{Selection, Snapshot};

/// A trait for converting items to tensors
///
/// Implemented for batches (`Vec<T>`) of the values an agent exchanges with
/// [`CloudSimEnv`](crate::gym::CloudSimEnv), one row per item.
pub trait ToTensor<B: Backend, const D: usize, K: burn::tensor::BasicOps<B>> {
    fn to_tensor(self, device: &B::Device) -> Tensor<B, D, K>;
}

/// Row count and row width of a flattened batch
fn batch_dims<T>(flat: &[T], rows: usize) -> [usize; 2] {
    let width = if rows == 0 { 0 } else { flat.len() / rows };
    [rows, width]
}

/// One row of [`Snapshot::features`] per snapshot
///
/// Every snapshot in the batch must come from the same [`SpaceShape`](crate::space::SpaceShape).
impl<B: Backend> ToTensor<B, 2, Float> for Vec<Snapshot> {
    fn to_tensor(self, device: &B::Device) -> Tensor<B, 2, Float> {
        let rows = self.len();
        let flat = self.iter().flat_map(Snapshot::features).collect::<Vec<_>>();
        let dims = batch_dims(&flat, rows);
        let len = flat.len();
        Tensor::<B, 1>::from_floats(Data::new(flat, [len].into()), device).reshape(dims)
    }
}

/// One row of [`ActionMask::flatten`] per mask
impl<B: Backend> ToTensor<B, 2, Bool> for Vec<ActionMask> {
    fn to_tensor(self, device: &B::Device) -> Tensor<B, 2, Bool> {
        let rows = self.len();
        let flat = self.iter().flat_map(ActionMask::flatten).collect::<Vec<_>>();
        let dims = batch_dims(&flat, rows);
        let len = flat.len();
        Tensor::<B, 1, Bool>::from_bool(Data::new(flat, [len].into()), device).reshape(dims)
    }
}

/// One row of per-dimension indices per selection
impl<B: Backend> ToTensor<B, 2, Int> for Vec<Selection> {
    fn to_tensor(self, device: &B::Device) -> Tensor<B, 2, Int> {
        let rows = self.len();
        let flat = self
            .iter()
            .flat_map(Selection::indices)
            .map(|ix| ix as i32)
            .collect::<Vec<_>>();
        let dims = batch_dims(&flat, rows);
        let len = flat.len();
        Tensor::<B, 1, Int>::from_ints(Data::new(flat, [len].into()), device).reshape(dims)
    }
}
