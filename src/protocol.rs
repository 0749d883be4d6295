//! The collective operations moving per-replica data between the master and its workers.
//!
//! Every collective is a rendezvous: once the data has moved, the receiving side
//! answers with an `Ack` to every sender, and nobody returns before that exchange
//! completed. Callers validate their inputs with the `check_*` functions before
//! entering a collective so that a broken contract never leaves a round half sent.

use std::{borrow::Cow, slice};

use comms::{
    SystemState,
    msg::{Command, Msg, Payload},
};
use futures::future::try_join_all;
use log::debug;
use ndarray::{Array2, ArrayView1};
use tokio::io::{AsyncRead, AsyncWrite};

use crate::{CommErr, Result, group::Link, topology::MASTER_RANK};

const ACK: Msg<'static> = Msg::Control(Command::Ack);

pub(crate) fn check_count(what: &'static str, got: usize, expected: usize) -> Result<()> {
    if got != expected {
        return Err(CommErr::CountMismatch {
            what,
            got,
            expected,
        });
    }

    Ok(())
}

pub(crate) fn check_atoms(index: usize, state: &SystemState, n_atoms: usize) -> Result<()> {
    if state.n_atoms() != n_atoms {
        return Err(CommErr::ShapeMismatch {
            index,
            got: state.n_atoms(),
            expected: n_atoms,
        });
    }

    Ok(())
}

pub(crate) fn check_states(
    what: &'static str,
    states: &[SystemState],
    n_replicas: usize,
    n_atoms: usize,
) -> Result<()> {
    check_count(what, states.len(), n_replicas)?;
    states
        .iter()
        .enumerate()
        .try_for_each(|(index, state)| check_atoms(index, state, n_atoms))
}

/// Tells the peer at the other end of `link` why its message was refused, then fails
/// with `err`.
async fn refuse<R, W, T>(link: &mut Link<R, W>, err: CommErr) -> Result<T>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let detail = err.to_string();
    debug!(peer = link.peer(); "refusing message: {detail}");
    link.send(&Msg::Err(Cow::Borrowed(&detail))).await?;
    Err(err)
}

async fn await_acks<R, W>(workers: &mut [Link<R, W>]) -> Result<()>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    try_join_all(workers.iter_mut().map(|link| link.expect(Command::Ack))).await?;
    Ok(())
}

async fn ack_all<R, W>(workers: &mut [Link<R, W>]) -> Result<()>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    for link in workers {
        link.send(&ACK).await?;
    }

    Ok(())
}

/// Sends `values[i]` to the worker at rank `i`.
pub(crate) async fn scatter_alphas<R, W>(workers: &mut [Link<R, W>], values: &[f64]) -> Result<()>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    for link in workers.iter_mut() {
        let alpha = values[link.peer()];
        link.send(&Msg::Data(Payload::Alpha(alpha))).await?;
    }

    await_acks(workers).await?;
    debug!(replicas = values.len(); "scattered alphas");
    Ok(())
}

pub(crate) async fn recv_alpha<R, W>(master: &mut Link<R, W>) -> Result<f64>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let alpha = master.recv_alpha().await?;
    master.send(&ACK).await?;
    Ok(alpha)
}

/// Sends the whole ordered collection of `states` to every worker.
pub(crate) async fn broadcast_states<R, W>(
    workers: &mut [Link<R, W>],
    states: &[SystemState],
) -> Result<()>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let msg = Msg::Data(Payload::States(Cow::Borrowed(states)));

    for link in workers.iter_mut() {
        link.send(&msg).await?;
    }

    await_acks(workers).await?;
    debug!(replicas = states.len(); "broadcasted states");
    Ok(())
}

pub(crate) async fn recv_all_states<R, W>(
    master: &mut Link<R, W>,
    n_replicas: usize,
    n_atoms: usize,
) -> Result<Vec<SystemState>>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let states = master.recv_states().await?;
    if let Err(err) = check_states("broadcasted states", &states, n_replicas, n_atoms) {
        return refuse(master, err).await;
    }

    master.send(&ACK).await?;
    Ok(states)
}

/// Sends `states[i]` to the worker at rank `i`.
pub(crate) async fn scatter_states<R, W>(
    workers: &mut [Link<R, W>],
    states: &[SystemState],
) -> Result<()>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    for link in workers.iter_mut() {
        let state = slice::from_ref(&states[link.peer()]);
        link.send(&Msg::Data(Payload::States(Cow::Borrowed(state))))
            .await?;
    }

    await_acks(workers).await?;
    debug!(replicas = states.len(); "scattered states");
    Ok(())
}

async fn recv_single_state<R, W>(
    link: &mut Link<R, W>,
    index: usize,
    n_atoms: usize,
) -> Result<SystemState>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut states = link.recv_states().await?;
    if let Err(err) = check_count("states in a single state message", states.len(), 1) {
        return refuse(link, err).await;
    }

    let state = states.remove(0);
    if let Err(err) = check_atoms(index, &state, n_atoms) {
        return refuse(link, err).await;
    }

    Ok(state)
}

pub(crate) async fn recv_state<R, W>(
    master: &mut Link<R, W>,
    rank: usize,
    n_atoms: usize,
) -> Result<SystemState>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let state = recv_single_state(master, rank, n_atoms).await?;
    master.send(&ACK).await?;
    Ok(state)
}

/// Collects one state per rank, the master's own being `own`.
///
/// # Returns
/// The states ordered by rank.
pub(crate) async fn gather_states<R, W>(
    workers: &mut [Link<R, W>],
    own: SystemState,
    n_atoms: usize,
) -> Result<Vec<SystemState>>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let received = try_join_all(
        workers
            .iter_mut()
            .map(|link| {
                let index = link.peer();
                recv_single_state(link, index, n_atoms)
            }),
    )
    .await?;

    ack_all(workers).await?;

    let mut states = Vec::with_capacity(received.len() + 1);
    states.push(own);
    states.extend(received);

    debug!(replicas = states.len(); "gathered states");
    Ok(states)
}

pub(crate) async fn send_state<R, W>(master: &mut Link<R, W>, state: &SystemState) -> Result<()>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let state = slice::from_ref(state);
    master
        .send(&Msg::Data(Payload::States(Cow::Borrowed(state))))
        .await?;

    master.expect(Command::Ack).await
}

async fn recv_row<R, W>(link: &mut Link<R, W>, n_replicas: usize) -> Result<Vec<f64>>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let row = link.recv_energies().await?;
    if let Err(err) = check_count("energies", row.len(), n_replicas) {
        return refuse(link, err).await;
    }

    Ok(row)
}

/// Collects one row of energies per rank into an `n x n` matrix.
///
/// Row `i` holds the energies evaluated by rank `i`, column `j` is replica `j`.
pub(crate) async fn gather_energies<R, W>(
    workers: &mut [Link<R, W>],
    own_row: &[f64],
) -> Result<Array2<f64>>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let n_replicas = own_row.len();
    let ranks: Vec<_> = workers.iter().map(Link::peer).collect();
    let rows = try_join_all(workers.iter_mut().map(|link| recv_row(link, n_replicas))).await?;

    ack_all(workers).await?;

    let mut energies = Array2::zeros((n_replicas, n_replicas));
    energies
        .row_mut(MASTER_RANK)
        .assign(&ArrayView1::from(own_row));

    for (rank, row) in ranks.into_iter().zip(rows) {
        energies.row_mut(rank).assign(&ArrayView1::from(&row));
    }

    debug!(replicas = n_replicas; "gathered energies");
    Ok(energies)
}

pub(crate) async fn send_energies<R, W>(master: &mut Link<R, W>, row: &[f64]) -> Result<()>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    master
        .send(&Msg::Data(Payload::Energies(Cow::Borrowed(row))))
        .await?;

    master.expect(Command::Ack).await
}

pub(crate) async fn disconnect<R, W>(workers: &mut [Link<R, W>]) -> Result<()>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    for link in workers {
        link.send(&Msg::Control(Command::Disconnect)).await?;
    }

    Ok(())
}

pub(crate) async fn await_disconnect<R, W>(master: &mut Link<R, W>) -> Result<()>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    master.expect(Command::Disconnect).await
}

#[cfg(test)]
mod tests {
    use ndarray::Array2;

    use super::*;

    fn state(n_atoms: usize) -> SystemState {
        SystemState::new(
            Array2::zeros((n_atoms, 3)),
            Array2::zeros((n_atoms, 3)),
            0.0,
            None,
        )
        .unwrap()
    }

    #[test]
    fn count_must_match() {
        assert!(check_count("alphas", 4, 4).is_ok());
        assert!(matches!(
            check_count("alphas", 3, 4),
            Err(CommErr::CountMismatch {
                what: "alphas",
                got: 3,
                expected: 4
            })
        ));
    }

    #[test]
    fn states_must_share_atom_count() {
        let states = vec![state(5), state(5), state(4)];
        let err = check_states("states", &states, 3, 5).unwrap_err();
        assert!(matches!(
            err,
            CommErr::ShapeMismatch {
                index: 2,
                got: 4,
                expected: 5
            }
        ));
    }

    #[test]
    fn states_count_is_checked_first() {
        let states = vec![state(4)];
        let err = check_states("states", &states, 2, 5).unwrap_err();
        assert!(matches!(err, CommErr::CountMismatch { .. }));
    }
}
