//! An in-process process group, every rank is connected through in-memory pipes.
//!
//! Useful to drive a whole multi-rank run from a single test process: each returned
//! group is handed to its own `Communicator` and the ranks are polled together.

use tokio::io::{self, DuplexStream, ReadHalf, WriteHalf};

use crate::{
    CommErr, Result,
    group::{Link, ProcessGroup},
    topology::MASTER_RANK,
};

/// Capacity of each in-memory pipe.
const PIPE_SIZE: usize = 64 * 1024;

pub type LocalGroup = ProcessGroup<ReadHalf<DuplexStream>, WriteHalf<DuplexStream>>;

/// Creates the process groups of a `world_size` ranks run.
///
/// # Arguments
/// * `world_size` - The amount of simulated processes.
///
/// # Returns
/// One group per rank, ordered by rank.
pub fn group(world_size: usize) -> Result<Vec<LocalGroup>> {
    if world_size == 0 {
        return Err(CommErr::InvalidRank {
            rank: MASTER_RANK,
            world_size,
        });
    }

    let mut master_links = Vec::with_capacity(world_size.saturating_sub(1));
    let mut workers = Vec::with_capacity(world_size.saturating_sub(1));

    for rank in MASTER_RANK + 1..world_size {
        let (master_end, worker_end) = io::duplex(PIPE_SIZE);

        let (rx, tx) = io::split(master_end);
        let (rx, tx) = comms::channel(rx, tx);
        master_links.push(Link::new(rank, rx, tx));

        let (rx, tx) = io::split(worker_end);
        let (rx, tx) = comms::channel(rx, tx);
        let link = Link::new(MASTER_RANK, rx, tx);
        workers.push(ProcessGroup::worker(rank, world_size, link)?);
    }

    let mut groups = Vec::with_capacity(world_size);
    groups.push(ProcessGroup::master(master_links)?);
    groups.extend(workers);
    Ok(groups)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn groups_are_ordered_by_rank() {
        let groups = group(4).unwrap();
        assert_eq!(groups.len(), 4);

        for (rank, group) in groups.iter().enumerate() {
            assert_eq!(group.rank(), rank);
            assert_eq!(group.world_size(), 4);
        }
    }

    #[test]
    fn empty_group_is_rejected() {
        assert!(matches!(group(0), Err(CommErr::InvalidRank { world_size: 0, .. })));
    }

    #[test]
    fn master_links_every_worker() {
        let mut groups = group(3).unwrap();
        let peers: Vec<_> = groups[0].workers_mut().iter().map(Link::peer).collect();
        assert_eq!(peers, vec![1, 2]);
        assert!(groups[0].master_mut().is_none());
        assert_eq!(groups[2].master_mut().map(|link| link.peer()), Some(0));
    }
}
