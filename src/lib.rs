//! Distribution of per-replica control parameters and states between the master and
//! the workers of a replica exchange run.
//!
//! Rank 0 is the master and owns one value per replica, every other rank is a worker
//! running the replica with its own index. A [`Communicator`] bound to a
//! [`ProcessGroup`] moves the data:
//!
//! * alphas are scattered, rank `i` receives the `i`-th value only;
//! * states for energy evaluation are broadcasted, every rank receives all of them;
//! * states and energy rows can be scattered and gathered around each round.

pub mod communicator;
pub mod config;
pub mod error;
pub mod group;
pub mod local;
mod protocol;
pub mod tcp;
pub mod topology;

pub use comms::{ShapeErr, SystemState};
pub use communicator::Communicator;
pub use config::{CommConfig, LaunchConfig};
pub use error::{CommErr, Result};
pub use group::{Link, ProcessGroup};
pub use topology::{Role, Topology};
