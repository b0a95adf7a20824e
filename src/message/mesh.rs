use super::comm::Communicator;
use std::sync::atomic::{AtomicU64, Ordering};

/// A full mesh of in-process channels: one [`Communicator`] per rank, all
/// living in one address space. Used to run genuinely multi-rank exchanges
/// (bridging, schedule execution, collectives) inside a single test process,
/// with each rank driven by its own thread.
pub struct ChannelMesh;

pub struct MeshCommunicator {
    rank: usize,
    size: usize,
    tag: AtomicU64,
    peers: Vec<crossbeam_channel::Sender<Vec<u8>>>,
    inbox_sink: crossbeam_channel::Sender<Vec<u8>>,
    inbox: crossbeam_channel::Receiver<Vec<u8>>,
}

impl ChannelMesh {
    /// Create communicators for `size` ranks. Each returned communicator is
    /// intended to move onto its own thread.
    pub fn new(size: usize) -> Vec<MeshCommunicator> {
        let channels: Vec<_> = (0..size).map(|_| crossbeam_channel::unbounded()).collect();
        let senders: Vec<_> = channels.iter().map(|(s, _)| s.clone()).collect();

        channels
            .into_iter()
            .enumerate()
            .map(|(rank, (inbox_sink, inbox))| MeshCommunicator {
                rank,
                size,
                tag: AtomicU64::new(1),
                peers: senders.clone(),
                inbox_sink,
                inbox,
            })
            .collect()
    }
}

impl Communicator for MeshCommunicator {
    fn rank(&self) -> usize {
        self.rank
    }

    fn size(&self) -> usize {
        self.size
    }

    fn send(&self, rank: usize, message: Vec<u8>) {
        self.peers[rank].send(message).unwrap()
    }

    fn recv(&self) -> Vec<u8> {
        self.inbox.recv().unwrap()
    }

    fn requeue_recv(&self, bytes: Vec<u8>) {
        self.inbox_sink.send(bytes).unwrap()
    }

    fn next_operation_tag(&self) -> u64 {
        self.tag.fetch_add(1, Ordering::SeqCst)
    }
}

// ============================================================================
#[cfg(test)]
mod test {

    use super::ChannelMesh;
    use crate::message::comm::{Communicator, Reduce};

    #[test]
    fn all_reduce_and_gather_work_on_four_ranks() {
        let comms = ChannelMesh::new(4);
        let handles: Vec<_> = comms
            .into_iter()
            .map(|comm| {
                std::thread::spawn(move || {
                    let value = comm.rank() as f64 + 1.0;
                    let total = comm.all_reduce_f64(Reduce::Sum, value);
                    let least = comm.all_reduce_f64(Reduce::Min, value);
                    let gathered = comm.all_gather(vec![comm.rank() as u8]);
                    comm.barrier();
                    (total, least, gathered)
                })
            })
            .collect();

        for handle in handles {
            let (total, least, gathered) = handle.join().unwrap();
            assert_eq!(total, 10.0);
            assert_eq!(least, 1.0);
            assert_eq!(gathered, vec![vec![0], vec![1], vec![2], vec![3]]);
        }
    }
}
