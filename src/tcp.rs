//! Process group bootstrap over TCP.
//!
//! The master listens and waits for every worker to introduce itself with its rank,
//! workers connect and learn the world size from the master's reply.

use std::borrow::Cow;

use comms::msg::{Command, Msg};
use log::{debug, info, warn};
use tokio::net::{
    TcpListener, TcpStream, ToSocketAddrs,
    tcp::{OwnedReadHalf, OwnedWriteHalf},
};

use crate::{
    CommErr, Result,
    group::{Link, ProcessGroup, unexpected},
    topology::MASTER_RANK,
};

pub type TcpGroup = ProcessGroup<OwnedReadHalf, OwnedWriteHalf>;

fn link(stream: TcpStream, peer: usize) -> Link<OwnedReadHalf, OwnedWriteHalf> {
    let (rx, tx) = stream.into_split();
    let (rx, tx) = comms::channel(rx, tx);
    Link::new(peer, rx, tx)
}

/// Accepts the `world_size - 1` workers of the group.
///
/// # Arguments
/// * `listener` - A bound listener.
/// * `world_size` - The amount of processes in the group, the master included.
///
/// # Returns
/// The master's process group once every worker has joined.
///
/// # Errors
/// `InvalidRank` or `DuplicateRank` when a worker announces a rank that can't be
/// placed, the offending worker is told why before failing.
pub async fn listen(listener: &TcpListener, world_size: usize) -> Result<TcpGroup> {
    let n_workers = world_size.saturating_sub(1);
    let mut slots: Vec<Option<Link<_, _>>> = (0..n_workers).map(|_| None).collect();
    let mut joined = 0;

    while joined < n_workers {
        let (stream, addr) = listener.accept().await?;
        let mut link = link(stream, MASTER_RANK);
        debug!("connection from {addr}");

        let rank = match link.recv().await? {
            Msg::Control(Command::Join { rank }) => rank,
            other => return Err(unexpected(MASTER_RANK, &other)),
        };

        let err = match slots.get(rank.wrapping_sub(1)) {
            None => Some(CommErr::InvalidRank { rank, world_size }),
            Some(Some(_)) => Some(CommErr::DuplicateRank { rank }),
            Some(None) => None,
        };

        if let Some(err) = err {
            warn!(rank = rank; "rejecting worker from {addr}: {err}");
            let detail = err.to_string();
            link.send(&Msg::Err(Cow::Borrowed(&detail))).await?;
            return Err(err);
        }

        link.set_peer(rank);
        link.send(&Msg::Control(Command::Welcome { world_size }))
            .await?;

        info!(rank = rank; "worker joined from {addr}");
        slots[rank - 1] = Some(link);
        joined += 1;
    }

    let links = slots.into_iter().flatten().collect();
    ProcessGroup::master(links)
}

/// Joins the group whose master listens at `addr`.
///
/// # Arguments
/// * `addr` - The master's address.
/// * `rank` - This worker's rank, must not be the master's.
///
/// # Returns
/// The worker's process group sized as announced by the master.
pub async fn connect<A: ToSocketAddrs>(addr: A, rank: usize) -> Result<TcpGroup> {
    if rank == MASTER_RANK {
        return Err(CommErr::RoleViolation {
            op: "tcp::connect",
            rank,
        });
    }

    let stream = TcpStream::connect(addr).await?;
    let mut link = link(stream, MASTER_RANK);
    link.send(&Msg::Control(Command::Join { rank })).await?;

    let world_size = match link.recv().await? {
        Msg::Control(Command::Welcome { world_size }) => world_size,
        other => return Err(unexpected(MASTER_RANK, &other)),
    };

    info!(rank = rank, world_size = world_size; "joined the group");
    ProcessGroup::worker(rank, world_size, link)
}
