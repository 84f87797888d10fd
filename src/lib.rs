/// Static datacenter configuration and the simulator's parameter map
pub mod config;

/// Data structures
pub mod ds;

/// Environment
pub mod env;

/// Errors raised at the simulator boundary
pub mod error;

/// Cloud simulator environments
pub mod gym;

/// Action legality masks
pub mod mask;

/// Snapshot decoding and action encoding
pub mod snapshot;

/// Observation and action space sizing
pub mod space;

/// Per-episode records and best-episode tracking
pub mod telemetry;

/// Conversions into `burn` tensors
pub mod traits;

/// Connections to the external simulator
pub mod transport;

mod util;
