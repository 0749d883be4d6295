use std::{error::Error, fmt, io};

use comms::ShapeErr;

/// The communication layer's result type.
pub type Result<T> = std::result::Result<T, CommErr>;

/// Failures of the replica communication layer.
///
/// Every variant but `Io` and `Remote` is a broken calling contract, detected before
/// any data leaves the process.
#[derive(Debug)]
pub enum CommErr {
    TopologyMismatch {
        expected: usize,
        actual: usize,
    },
    InvalidRank {
        rank: usize,
        world_size: usize,
    },
    DuplicateRank {
        rank: usize,
    },
    CountMismatch {
        what: &'static str,
        got: usize,
        expected: usize,
    },
    ShapeMismatch {
        index: usize,
        got: usize,
        expected: usize,
    },
    RoleViolation {
        op: &'static str,
        rank: usize,
    },
    NotInitialized {
        op: &'static str,
    },
    AlreadyInitialized,
    InvalidState(ShapeErr),
    UnexpectedMessage {
        rank: usize,
        got: &'static str,
    },
    Remote {
        rank: usize,
        detail: String,
    },
    Io(io::Error),
}

impl fmt::Display for CommErr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CommErr::TopologyMismatch { expected, actual } => write!(
                f,
                "topology mismatch: configured for {expected} replicas but the process group has {actual} ranks"
            ),
            CommErr::InvalidRank { rank, world_size } => {
                write!(f, "rank {rank} is out of range for a group of {world_size}")
            }
            CommErr::DuplicateRank { rank } => write!(f, "rank {rank} joined the group twice"),
            CommErr::CountMismatch {
                what,
                got,
                expected,
            } => write!(f, "count mismatch for {what}: got {got}, expected {expected}"),
            CommErr::ShapeMismatch {
                index,
                got,
                expected,
            } => write!(
                f,
                "state {index} has {got} atoms, expected {expected}"
            ),
            CommErr::RoleViolation { op, rank } => {
                write!(f, "role violation: {op} is not allowed at rank {rank}")
            }
            CommErr::NotInitialized { op } => {
                write!(f, "{op} called before the communicator was initialized")
            }
            CommErr::AlreadyInitialized => f.write_str("communicator already initialized"),
            CommErr::InvalidState(e) => write!(f, "{e}"),
            CommErr::UnexpectedMessage { rank, got } => {
                write!(f, "unexpected message from rank {rank}: got {got}")
            }
            CommErr::Remote { rank, detail } => write!(f, "rank {rank} failed: {detail}"),
            CommErr::Io(e) => write!(f, "io error: {e}"),
        }
    }
}

impl Error for CommErr {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            CommErr::Io(e) => Some(e),
            CommErr::InvalidState(e) => Some(e),
            _ => None,
        }
    }
}

impl From<io::Error> for CommErr {
    fn from(value: io::Error) -> Self {
        Self::Io(value)
    }
}

impl From<ShapeErr> for CommErr {
    fn from(value: ShapeErr) -> Self {
        Self::InvalidState(value)
    }
}

/// Boundary conversion for binaries / I/O APIs.
impl From<CommErr> for io::Error {
    fn from(value: CommErr) -> Self {
        match value {
            CommErr::Io(e) => e,
            other => io::Error::new(io::ErrorKind::InvalidData, other),
        }
    }
}
