//! The process group substrate the collectives run on top of.

use comms::{
    OnoReceiver, OnoSender, SystemState,
    msg::{Command, Msg, Payload},
};
use tokio::io::{AsyncRead, AsyncWrite};

use crate::{CommErr, Result, topology::MASTER_RANK};

/// A bidirectional connection to a single peer rank.
pub struct Link<R, W>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    peer: usize,
    rx: OnoReceiver<R>,
    tx: OnoSender<W>,
    buf: Vec<u8>,
}

impl<R, W> Link<R, W>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    /// Creates a new `Link` instance.
    ///
    /// # Arguments
    /// * `peer` - The rank at the other end of the link.
    /// * `rx` - The receiving end of the communication.
    /// * `tx` - The sending end of the communication.
    pub fn new(peer: usize, rx: OnoReceiver<R>, tx: OnoSender<W>) -> Self {
        Self {
            peer,
            rx,
            tx,
            buf: Vec::new(),
        }
    }

    /// The rank at the other end of this link.
    pub fn peer(&self) -> usize {
        self.peer
    }

    pub(crate) fn set_peer(&mut self, peer: usize) {
        self.peer = peer;
    }

    pub(crate) async fn send(&mut self, msg: &Msg<'_>) -> Result<()> {
        self.tx.send(msg).await?;
        Ok(())
    }

    /// Waits for the next message, turning an error report from the peer into `Remote`.
    pub(crate) async fn recv(&mut self) -> Result<Msg<'_>> {
        match self.rx.recv_into(&mut self.buf).await? {
            Msg::Err(detail) => Err(CommErr::Remote {
                rank: self.peer,
                detail: detail.into_owned(),
            }),
            msg => Ok(msg),
        }
    }

    pub(crate) async fn expect(&mut self, cmd: Command) -> Result<()> {
        let peer = self.peer;
        match self.recv().await? {
            Msg::Control(got) if got == cmd => Ok(()),
            other => Err(unexpected(peer, &other)),
        }
    }

    pub(crate) async fn recv_alpha(&mut self) -> Result<f64> {
        let peer = self.peer;
        match self.recv().await? {
            Msg::Data(Payload::Alpha(alpha)) => Ok(alpha),
            other => Err(unexpected(peer, &other)),
        }
    }

    pub(crate) async fn recv_states(&mut self) -> Result<Vec<SystemState>> {
        let peer = self.peer;
        match self.recv().await? {
            Msg::Data(Payload::States(states)) => Ok(states.into_owned()),
            other => Err(unexpected(peer, &other)),
        }
    }

    pub(crate) async fn recv_energies(&mut self) -> Result<Vec<f64>> {
        let peer = self.peer;
        match self.recv().await? {
            Msg::Data(Payload::Energies(energies)) => Ok(energies.into_owned()),
            other => Err(unexpected(peer, &other)),
        }
    }
}

pub(crate) fn unexpected(rank: usize, msg: &Msg<'_>) -> CommErr {
    CommErr::UnexpectedMessage {
        rank,
        got: msg.kind(),
    }
}

/// The connections of one process to the rest of the group.
///
/// The master holds one link per worker ordered by rank, a worker holds a single link
/// to the master.
pub struct ProcessGroup<R, W>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    rank: usize,
    world_size: usize,
    links: Vec<Link<R, W>>,
}

impl<R, W> ProcessGroup<R, W>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    /// Creates the master's side of the group.
    ///
    /// # Arguments
    /// * `links` - One link per worker, the i-th link connects to rank `i + 1`.
    pub fn master(links: Vec<Link<R, W>>) -> Result<Self> {
        let world_size = links.len() + 1;

        for (i, link) in links.iter().enumerate() {
            if link.peer() != i + 1 {
                return Err(CommErr::InvalidRank {
                    rank: link.peer(),
                    world_size,
                });
            }
        }

        Ok(Self {
            rank: MASTER_RANK,
            world_size,
            links,
        })
    }

    /// Creates a worker's side of the group.
    ///
    /// # Arguments
    /// * `rank` - The worker's own rank.
    /// * `world_size` - The amount of processes in the group.
    /// * `master` - The link to the master.
    pub fn worker(rank: usize, world_size: usize, master: Link<R, W>) -> Result<Self> {
        if rank == MASTER_RANK || master.peer() != MASTER_RANK {
            return Err(CommErr::InvalidRank { rank, world_size });
        }

        Ok(Self {
            rank,
            world_size,
            links: vec![master],
        })
    }

    pub fn rank(&self) -> usize {
        self.rank
    }

    pub fn world_size(&self) -> usize {
        self.world_size
    }

    /// The links to every worker, empty on workers.
    pub(crate) fn workers_mut(&mut self) -> &mut [Link<R, W>] {
        if self.rank == MASTER_RANK {
            &mut self.links
        } else {
            &mut []
        }
    }

    /// The link to the master, `None` on the master itself.
    pub(crate) fn master_mut(&mut self) -> Option<&mut Link<R, W>> {
        if self.rank == MASTER_RANK {
            None
        } else {
            self.links.first_mut()
        }
    }
}
