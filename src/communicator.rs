use std::num::NonZeroUsize;

use comms::SystemState;
use log::info;
use ndarray::Array2;
use tokio::io::{AsyncRead, AsyncWrite};

use crate::{
    CommConfig, CommErr, Result,
    group::{Link, ProcessGroup},
    protocol,
    topology::Topology,
};

struct Bound<R, W>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    topology: Topology,
    group: ProcessGroup<R, W>,
}

/// The object every rank of a replica exchange run talks through.
///
/// Binds the rank topology to the collective operations. Master only operations fail
/// with `RoleViolation` on workers and the other way around, every operation fails
/// with `NotInitialized` until `initialize` succeeded.
pub struct Communicator<R, W>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    config: CommConfig,
    bound: Option<Bound<R, W>>,
}

impl<R, W> Communicator<R, W>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    /// Creates a new, uninitialized, `Communicator`.
    ///
    /// # Arguments
    /// * `n_atoms` - Atoms per replica.
    /// * `n_replicas` - Replicas in the run, must match the size of the process group.
    /// * `n_springs` - Springs of the coupling subsystem.
    pub fn new(n_atoms: NonZeroUsize, n_replicas: NonZeroUsize, n_springs: NonZeroUsize) -> Self {
        Self::from_config(CommConfig {
            n_atoms,
            n_replicas,
            n_springs,
        })
    }

    pub fn from_config(config: CommConfig) -> Self {
        Self {
            config,
            bound: None,
        }
    }

    pub fn config(&self) -> &CommConfig {
        &self.config
    }

    pub fn n_atoms(&self) -> usize {
        self.config.n_atoms.get()
    }

    pub fn n_replicas(&self) -> usize {
        self.config.n_replicas.get()
    }

    pub fn n_springs(&self) -> usize {
        self.config.n_springs.get()
    }

    /// Binds this communicator to its process group.
    ///
    /// # Arguments
    /// * `group` - This process's connections to the rest of the run.
    ///
    /// # Errors
    /// `TopologyMismatch` if the group size differs from the configured amount of
    /// replicas, `AlreadyInitialized` on a second call.
    pub fn initialize(&mut self, group: ProcessGroup<R, W>) -> Result<()> {
        if self.bound.is_some() {
            return Err(CommErr::AlreadyInitialized);
        }

        let topology = Topology::bind(group.rank(), group.world_size(), self.n_replicas())?;
        info!(
            rank = topology.rank(),
            n_replicas = topology.n_replicas(),
            n_atoms = self.n_atoms();
            "communicator initialized"
        );

        self.bound = Some(Bound { topology, group });
        Ok(())
    }

    /// The topology this process was bound to.
    pub fn topology(&self) -> Result<Topology> {
        self.bound
            .as_ref()
            .map(|bound| bound.topology)
            .ok_or(CommErr::NotInitialized { op: "topology" })
    }

    pub fn rank(&self) -> Result<usize> {
        self.topology().map(|topology| topology.rank())
    }

    pub fn is_master(&self) -> Result<bool> {
        self.topology().map(|topology| topology.is_master())
    }

    fn bound(&mut self, op: &'static str) -> Result<&mut Bound<R, W>> {
        self.bound.as_mut().ok_or(CommErr::NotInitialized { op })
    }

    fn as_master(&mut self, op: &'static str) -> Result<&mut [Link<R, W>]> {
        let Bound { topology, group } = self.bound(op)?;

        if !topology.is_master() {
            return Err(CommErr::RoleViolation {
                op,
                rank: topology.rank(),
            });
        }

        Ok(group.workers_mut())
    }

    fn as_worker(&mut self, op: &'static str) -> Result<(usize, &mut Link<R, W>)> {
        let Bound { topology, group } = self.bound(op)?;
        let rank = topology.rank();

        group
            .master_mut()
            .map(|master| (rank, master))
            .ok_or(CommErr::RoleViolation { op, rank })
    }

    /// Scatters one alpha per replica, the worker at rank `i` receives `values[i]`.
    ///
    /// # Arguments
    /// * `values` - One alpha per replica, ordered by rank.
    ///
    /// # Returns
    /// The master's own alpha, `values[0]`.
    pub async fn broadcast_alphas_to_workers(&mut self, values: &[f64]) -> Result<f64> {
        const OP: &str = "broadcast_alphas_to_workers";
        let n_replicas = self.n_replicas();

        let workers = self.as_master(OP)?;
        protocol::check_count("alphas", values.len(), n_replicas)?;

        protocol::scatter_alphas(workers, values).await?;
        Ok(values[0])
    }

    /// Waits for this worker's alpha from the master's scatter.
    pub async fn receive_alpha_from_master(&mut self) -> Result<f64> {
        let (_, master) = self.as_worker("receive_alpha_from_master")?;
        protocol::recv_alpha(master).await
    }

    /// Sends the complete ordered collection of states to every worker so each rank
    /// can evaluate the energy of every replica.
    ///
    /// # Arguments
    /// * `states` - One state per replica, ordered by rank.
    pub async fn broadcast_states_to_workers(&mut self, states: &[SystemState]) -> Result<()> {
        const OP: &str = "broadcast_states_to_workers";
        let (n_replicas, n_atoms) = (self.n_replicas(), self.n_atoms());

        let workers = self.as_master(OP)?;
        protocol::check_states("states", states, n_replicas, n_atoms)?;

        protocol::broadcast_states(workers, states).await
    }

    /// Waits for the master's broadcast of every replica's state.
    ///
    /// # Returns
    /// Private copies of all the states, ordered by rank.
    pub async fn receive_states_from_master(&mut self) -> Result<Vec<SystemState>> {
        let (n_replicas, n_atoms) = (self.n_replicas(), self.n_atoms());
        let (_, master) = self.as_worker("receive_states_from_master")?;
        protocol::recv_all_states(master, n_replicas, n_atoms).await
    }

    /// Scatters one state per replica, the worker at rank `i` receives `states[i]`.
    ///
    /// # Returns
    /// A copy of the master's own state, `states[0]`.
    pub async fn scatter_states_to_workers(&mut self, states: &[SystemState]) -> Result<SystemState> {
        const OP: &str = "scatter_states_to_workers";
        let (n_replicas, n_atoms) = (self.n_replicas(), self.n_atoms());

        let workers = self.as_master(OP)?;
        protocol::check_states("states", states, n_replicas, n_atoms)?;

        protocol::scatter_states(workers, states).await?;
        Ok(states[0].clone())
    }

    /// Waits for this worker's state from the master's scatter.
    pub async fn receive_state_from_master(&mut self) -> Result<SystemState> {
        let n_atoms = self.n_atoms();
        let (rank, master) = self.as_worker("receive_state_from_master")?;
        protocol::recv_state(master, rank, n_atoms).await
    }

    /// Collects every replica's state at the master.
    ///
    /// # Arguments
    /// * `own` - The master's own state.
    ///
    /// # Returns
    /// One state per replica, ordered by rank.
    pub async fn gather_states_from_workers(&mut self, own: SystemState) -> Result<Vec<SystemState>> {
        const OP: &str = "gather_states_from_workers";
        let n_atoms = self.n_atoms();

        let workers = self.as_master(OP)?;
        protocol::check_atoms(0, &own, n_atoms)?;

        protocol::gather_states(workers, own, n_atoms).await
    }

    /// Sends this worker's state to the master's gather.
    pub async fn send_state_to_master(&mut self, state: &SystemState) -> Result<()> {
        let n_atoms = self.n_atoms();
        let (rank, master) = self.as_worker("send_state_to_master")?;
        protocol::check_atoms(rank, state, n_atoms)?;

        protocol::send_state(master, state).await
    }

    /// Collects the energies every rank evaluated for every replica.
    ///
    /// # Arguments
    /// * `own_row` - The energies the master evaluated, one per replica.
    ///
    /// # Returns
    /// An `n_replicas x n_replicas` matrix, row `i` was evaluated by rank `i` and
    /// column `j` belongs to replica `j`.
    pub async fn gather_energies_from_workers(&mut self, own_row: &[f64]) -> Result<Array2<f64>> {
        const OP: &str = "gather_energies_from_workers";
        let n_replicas = self.n_replicas();

        let workers = self.as_master(OP)?;
        protocol::check_count("energies", own_row.len(), n_replicas)?;

        protocol::gather_energies(workers, own_row).await
    }

    /// Sends the energies this worker evaluated, one per replica, to the master.
    pub async fn send_energies_to_master(&mut self, row: &[f64]) -> Result<()> {
        let n_replicas = self.n_replicas();
        let (_, master) = self.as_worker("send_energies_to_master")?;
        protocol::check_count("energies", row.len(), n_replicas)?;

        protocol::send_energies(master, row).await
    }

    /// Ends the run, the master tells every worker to disconnect and workers wait
    /// for it.
    pub async fn shutdown(mut self) -> Result<()> {
        const OP: &str = "shutdown";

        if self.bound(OP)?.topology.is_master() {
            let workers = self.as_master(OP)?;
            protocol::disconnect(workers).await
        } else {
            let (_, master) = self.as_worker(OP)?;
            protocol::await_disconnect(master).await
        }
    }
}

#[cfg(test)]
mod tests {
    use crate::local::{self, LocalGroup};

    use super::*;

    type LocalComm = Communicator<
        tokio::io::ReadHalf<tokio::io::DuplexStream>,
        tokio::io::WriteHalf<tokio::io::DuplexStream>,
    >;

    fn comm(n_replicas: usize) -> LocalComm {
        let n = |x| NonZeroUsize::new(x).unwrap();
        Communicator::new(n(10), n(n_replicas), n(5))
    }

    fn groups(n: usize) -> Vec<LocalGroup> {
        local::group(n).unwrap()
    }

    #[test]
    fn identity_requires_initialization() {
        let comm = comm(2);
        assert!(matches!(comm.rank(), Err(CommErr::NotInitialized { .. })));
        assert!(matches!(comm.is_master(), Err(CommErr::NotInitialized { .. })));
    }

    #[test]
    fn identity_is_stable() {
        let mut groups = groups(3);
        let mut comm = comm(3);
        comm.initialize(groups.remove(1)).unwrap();

        for _ in 0..3 {
            assert_eq!(comm.rank().unwrap(), 1);
            assert!(!comm.is_master().unwrap());
        }
    }

    #[test]
    fn initialize_once() {
        let mut groups = groups(2);
        let mut comm = comm(2);
        comm.initialize(groups.remove(0)).unwrap();

        let err = comm.initialize(groups.remove(0)).unwrap_err();
        assert!(matches!(err, CommErr::AlreadyInitialized));
        assert_eq!(comm.rank().unwrap(), 0);
    }

    #[test]
    fn initialize_checks_topology() {
        let mut groups = groups(3);
        let mut comm = comm(4);

        let err = comm.initialize(groups.remove(0)).unwrap_err();
        assert!(matches!(
            err,
            CommErr::TopologyMismatch {
                expected: 4,
                actual: 3
            }
        ));
        assert!(comm.rank().is_err());
    }

    #[test]
    fn springs_are_carried_along() {
        let comm = comm(2);
        assert_eq!(comm.n_springs(), 5);
        assert_eq!(comm.n_atoms(), 10);
    }

    #[tokio::test]
    async fn operations_require_initialization() {
        let mut comm = comm(2);

        let err = comm.broadcast_alphas_to_workers(&[0.0, 0.1]).await.unwrap_err();
        assert!(matches!(
            err,
            CommErr::NotInitialized {
                op: "broadcast_alphas_to_workers"
            }
        ));

        let err = comm.receive_alpha_from_master().await.unwrap_err();
        assert!(matches!(err, CommErr::NotInitialized { .. }));
    }
}
