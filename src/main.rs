use anyhow::{Context, ensure};
use log::info;
use ndarray::Array2;
use remd_comm::{
    Communicator, LaunchConfig, SystemState, tcp,
    topology::MASTER_RANK,
};
use tokio::{
    io::{AsyncRead, AsyncWrite},
    net::TcpListener,
    signal,
};

/// The synthetic state of replica `index`: every coordinate and velocity equals the
/// index, alpha is a tenth of it and the energy the index itself.
fn synthetic_state(index: usize, n_atoms: usize) -> anyhow::Result<SystemState> {
    let value = index as f64;
    let state = SystemState::new(
        Array2::from_elem((n_atoms, 3), value),
        Array2::from_elem((n_atoms, 3), value),
        value / 10.0,
        Some(value),
    )?;

    Ok(state)
}

fn check_state(state: &SystemState, index: usize) -> anyhow::Result<()> {
    let value = index as f64;
    ensure!(state.positions()[[0, 0]] == value, "bad positions for replica {index}");
    ensure!(state.velocities()[[0, 0]] == value, "bad velocities for replica {index}");
    ensure!(state.alpha() == value / 10.0, "bad alpha for replica {index}");
    ensure!(state.energy() == Some(value), "bad energy for replica {index}");
    Ok(())
}

/// Runs one round of every collective and checks what each rank received.
async fn run_round<R, W>(comm: &mut Communicator<R, W>) -> anyhow::Result<()>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let n_replicas = comm.n_replicas();
    let n_atoms = comm.n_atoms();
    let rank = comm.rank()?;

    let alphas: Vec<f64> = (0..n_replicas).map(|k| k as f64 / 10.0).collect();
    let alpha = if comm.is_master()? {
        comm.broadcast_alphas_to_workers(&alphas).await?
    } else {
        comm.receive_alpha_from_master().await?
    };
    ensure!(alpha == alphas[rank], "rank {rank} received alpha {alpha}");
    info!(rank = rank, alpha = alpha; "alpha received");

    let states = if comm.is_master()? {
        let states = (0..n_replicas)
            .map(|k| synthetic_state(k, n_atoms))
            .collect::<anyhow::Result<Vec<_>>>()?;

        comm.broadcast_states_to_workers(&states).await?;
        states
    } else {
        comm.receive_states_from_master().await?
    };

    for (k, state) in states.iter().enumerate() {
        check_state(state, k).with_context(|| format!("checking states at rank {rank}"))?;
    }
    info!(rank = rank; "states for energy evaluation received");

    // The energies carried by the states stand in for a real evaluation.
    let row: Vec<f64> = states
        .iter()
        .map(|state| state.energy().unwrap_or_default())
        .collect();

    if comm.is_master()? {
        let energies = comm.gather_energies_from_workers(&row).await?;
        info!("gathered energies:\n{energies}");
    } else {
        comm.send_energies_to_master(&row).await?;
    }

    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    env_logger::init();

    let config = LaunchConfig::from_env().context("reading the launch configuration")?;
    let addr = config.addr();

    let group = if config.rank == MASTER_RANK {
        let listener = TcpListener::bind(&addr).await?;
        info!("listening at {addr}, waiting for {} workers", config.world_size.saturating_sub(1));
        tcp::listen(&listener, config.world_size).await?
    } else {
        tcp::connect(&addr, config.rank).await?
    };

    let mut comm = Communicator::from_config(config.comm);
    comm.initialize(group)?;

    tokio::select! {
        ret = run_round(&mut comm) => ret?,
        _ = signal::ctrl_c() => {
            info!("received SIGINT");
            return Ok(());
        }
    }

    info!("wrapping up, disconnecting...");
    comm.shutdown().await?;
    Ok(())
}
