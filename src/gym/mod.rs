pub mod cloudsim;

pub use cloudsim::{get_action_space_shape, CloudSimEnv, Transition};
