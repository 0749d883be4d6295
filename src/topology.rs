use std::ops::Range;

use crate::{CommErr, Result};

/// The rank of the master process.
pub const MASTER_RANK: usize = 0;

/// The fixed role of a process within the group.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Master,
    Worker,
}

/// The mapping between replica indices and process ranks.
///
/// Replica `i` lives at rank `i`, rank 0 is the master. The value is fixed once bound
/// and carried explicitly by whoever needs it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Topology {
    rank: usize,
    n_replicas: usize,
}

impl Topology {
    /// Binds a process to its rank.
    ///
    /// # Arguments
    /// * `rank` - The rank of the calling process.
    /// * `world_size` - The amount of processes in the group.
    /// * `n_replicas` - The configured amount of replicas.
    ///
    /// # Returns
    /// The topology, or `TopologyMismatch` if `world_size != n_replicas`.
    pub fn bind(rank: usize, world_size: usize, n_replicas: usize) -> Result<Self> {
        if world_size != n_replicas {
            return Err(CommErr::TopologyMismatch {
                expected: n_replicas,
                actual: world_size,
            });
        }

        if rank >= world_size {
            return Err(CommErr::InvalidRank { rank, world_size });
        }

        Ok(Self { rank, n_replicas })
    }

    pub fn rank(&self) -> usize {
        self.rank
    }

    pub fn n_replicas(&self) -> usize {
        self.n_replicas
    }

    pub fn is_master(&self) -> bool {
        self.rank == MASTER_RANK
    }

    pub fn role(&self) -> Role {
        if self.is_master() {
            Role::Master
        } else {
            Role::Worker
        }
    }

    /// The ranks of every worker in the group.
    pub fn workers(&self) -> Range<usize> {
        MASTER_RANK + 1..self.n_replicas
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn master_is_rank_zero() {
        let topology = Topology::bind(0, 4, 4).unwrap();
        assert!(topology.is_master());
        assert_eq!(topology.role(), Role::Master);
        assert_eq!(topology.workers(), 1..4);
    }

    #[test]
    fn every_other_rank_is_a_worker() {
        for rank in 1..4 {
            let topology = Topology::bind(rank, 4, 4).unwrap();
            assert!(!topology.is_master());
            assert_eq!(topology.role(), Role::Worker);
            assert_eq!(topology.rank(), rank);
        }
    }

    #[test]
    fn world_size_must_match_replicas() {
        let err = Topology::bind(0, 3, 4).unwrap_err();
        assert!(matches!(
            err,
            CommErr::TopologyMismatch {
                expected: 4,
                actual: 3
            }
        ));
    }

    #[test]
    fn rank_must_be_in_group() {
        let err = Topology::bind(4, 4, 4).unwrap_err();
        assert!(matches!(err, CommErr::InvalidRank { rank: 4, .. }));
    }

    #[test]
    fn single_replica_has_no_workers() {
        let topology = Topology::bind(0, 1, 1).unwrap();
        assert!(topology.workers().is_empty());
    }
}
