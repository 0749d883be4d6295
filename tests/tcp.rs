use std::num::NonZeroUsize;

use futures::future::try_join_all;
use remd_comm::{CommErr, Communicator, tcp};
use tokio::net::TcpListener;

const N_REPLICAS: usize = 3;

fn n(x: usize) -> NonZeroUsize {
    NonZeroUsize::new(x).unwrap()
}

#[tokio::test]
async fn alphas_travel_over_tcp() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let alphas = [0.25, 0.5, 0.75];

    let master = async {
        let group = tcp::listen(&listener, N_REPLICAS).await?;
        let mut comm = Communicator::new(n(8), n(N_REPLICAS), n(1));
        comm.initialize(group)?;

        let own = comm.broadcast_alphas_to_workers(&alphas).await?;
        comm.shutdown().await?;
        Ok::<_, CommErr>(own)
    };

    let workers = try_join_all((1..N_REPLICAS).map(|rank| async move {
        let group = tcp::connect(addr, rank).await?;
        let mut comm = Communicator::new(n(8), n(N_REPLICAS), n(1));
        comm.initialize(group)?;

        let alpha = comm.receive_alpha_from_master().await?;
        comm.shutdown().await?;
        Ok::<_, CommErr>(alpha)
    }));

    let (own, received) = tokio::try_join!(master, workers).unwrap();
    assert_eq!(own, 0.25);
    assert_eq!(received, vec![0.5, 0.75]);
}

#[tokio::test]
async fn replica_count_must_match_the_group() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    let (master, worker) = tokio::join!(tcp::listen(&listener, 2), tcp::connect(addr, 1));

    let mut comm = Communicator::new(n(8), n(3), n(1));
    let err = comm.initialize(master.unwrap()).unwrap_err();
    assert!(matches!(err, CommErr::TopologyMismatch { expected: 3, actual: 2 }));

    let mut comm = Communicator::new(n(8), n(3), n(1));
    let err = comm.initialize(worker.unwrap()).unwrap_err();
    assert!(matches!(err, CommErr::TopologyMismatch { expected: 3, actual: 2 }));
}
