/// Which reduction to apply in [`Communicator::all_reduce_f64`].
#[derive(Clone, Copy, Debug)]
pub enum Reduce {
    Min,
    Max,
    Sum,
}

impl Reduce {
    fn apply(&self, a: f64, b: f64) -> f64 {
        match self {
            Reduce::Min => a.min(b),
            Reduce::Max => a.max(b),
            Reduce::Sum => a + b,
        }
    }
}

/// Every message carries an operation tag so that traffic from consecutive
/// collective operations cannot interfere: a rank may race ahead into the
/// next operation and its messages must not be mistaken for the current one.
/// Tags are drawn from a per-communicator counter which stays synchronized
/// across ranks because all operations here are collective.
#[derive(serde::Serialize, serde::Deserialize)]
struct Envelope {
    tag: u64,
    src: u32,
    data: Vec<u8>,
}

/// Interface for a group of processes that can exchange messages over a
/// network. The underlying transport can in principle be TCP, UDP, or a
/// higher level abstraction like MPI. Implementors provide the raw
/// `send`/`recv`/`requeue_recv` operations and a tag counter; the trait
/// supplies tagged point-to-point messaging and binomial-tree broadcast,
/// reduce, and all-reduce on top.
///
pub trait Communicator: Send + Sync {
    /// Must be implemented to return the rank of this process within the
    /// communicator.
    fn rank(&self) -> usize;

    /// Must be implemented to return the number of peer processes in this
    /// communicator.
    fn size(&self) -> usize;

    /// Must be implemented to send a message to a peer. This method must
    /// return immediately, in other words it is not allowed to block until a
    /// matching receive is posted.
    fn send(&self, rank: usize, message: Vec<u8>);

    /// Must be implemented to receive a message from any of the peers. This
    /// method is allowed to block until a message is ready to be received.
    fn recv(&self) -> Vec<u8>;

    /// Requeue a received message which is not yet needed.
    fn requeue_recv(&self, bytes: Vec<u8>);

    /// Must be implemented to return the next operation tag, advancing the
    /// counter. Ranks must call this the same number of times in the same
    /// order, which holds because every operation that consumes a tag is
    /// collective.
    fn next_operation_tag(&self) -> u64;

    /// Send a message belonging to the operation identified by `tag`.
    fn send_tagged(&self, rank: usize, tag: u64, data: Vec<u8>) {
        let envelope = Envelope {
            tag,
            src: self.rank() as u32,
            data,
        };
        self.send(rank, rmp_serde::to_vec(&envelope).unwrap());
    }

    /// Receive the next message belonging to the operation identified by
    /// `tag`, requeueing any message that belongs to a different operation.
    /// Returns the sending rank along with the payload.
    fn recv_tagged(&self, tag: u64) -> (usize, Vec<u8>) {
        loop {
            let bytes = self.recv();
            let envelope: Envelope = rmp_serde::from_slice(&bytes).unwrap();
            if envelope.tag == tag {
                return (envelope.src as usize, envelope.data);
            }
            self.requeue_recv(bytes);
            std::thread::yield_now();
        }
    }

    /// Implements a binomial tree broadcast from rank zero. The message
    /// buffer must be `Some` on rank zero and `None` everywhere else.
    ///
    fn broadcast(&self, value: Option<Vec<u8>>) -> Vec<u8> {
        let r = self.rank();
        let p = self.size();
        let tag = self.next_operation_tag();

        let value = match value {
            Some(value) => value,
            None => self.recv_tagged(tag).1,
        };
        for level in (0..tree_rounds(p)).rev() {
            let one = 1usize << level;
            let two = 1usize << (level + 1);

            if r % two == 0 && r + one < p {
                self.send_tagged(r + one, tag, value.clone())
            }
        }
        value
    }

    /// Implements a binomial tree reduce onto rank zero. All ranks return
    /// `None` except for the root.
    ///
    fn reduce(
        &self,
        f: &dyn Fn(Vec<u8>, Vec<u8>) -> Vec<u8>,
        mut value: Vec<u8>,
    ) -> Option<Vec<u8>> {
        let r = self.rank();
        let p = self.size();
        let tag = self.next_operation_tag();

        for level in 0..tree_rounds(p) {
            let one = 1usize << level;
            let two = 1usize << (level + 1);

            if r % two == 0 {
                if r + one < p {
                    value = f(value, self.recv_tagged(tag).1)
                }
            } else {
                self.send_tagged(r - one, tag, value);
                return None;
            }
        }
        Some(value)
    }

    /// Implements an all-reduce (symmetric fold) operation over a commutative
    /// binary operator.
    ///
    fn all_reduce(&self, f: &dyn Fn(Vec<u8>, Vec<u8>) -> Vec<u8>, value: Vec<u8>) -> Vec<u8> {
        self.broadcast(self.reduce(f, value))
    }

    /// All-reduce a single floating point value. Reductions that need a
    /// complex result reduce real and imaginary parts separately with two
    /// calls.
    fn all_reduce_f64(&self, op: Reduce, value: f64) -> f64 {
        if self.size() == 1 {
            return value;
        }
        let combined = self.all_reduce(
            &|a, b| {
                let x = f64::from_le_bytes(a.try_into().unwrap());
                let y = f64::from_le_bytes(b.try_into().unwrap());
                op.apply(x, y).to_le_bytes().to_vec()
            },
            value.to_le_bytes().to_vec(),
        );
        f64::from_le_bytes(combined.try_into().unwrap())
    }

    /// All-reduce an unsigned count by summation.
    fn all_reduce_sum_usize(&self, value: usize) -> usize {
        if self.size() == 1 {
            return value;
        }
        let combined = self.all_reduce(
            &|a, b| {
                let x = u64::from_le_bytes(a.try_into().unwrap());
                let y = u64::from_le_bytes(b.try_into().unwrap());
                (x + y).to_le_bytes().to_vec()
            },
            (value as u64).to_le_bytes().to_vec(),
        );
        u64::from_le_bytes(combined.try_into().unwrap()) as usize
    }

    /// Gather one buffer from every rank onto every rank, returned in rank
    /// order. Built from reduce + broadcast, so it costs two tree sweeps.
    fn all_gather(&self, mine: Vec<u8>) -> Vec<Vec<u8>> {
        if self.size() == 1 {
            return vec![mine];
        }
        let tagged: Vec<(u32, Vec<u8>)> = vec![(self.rank() as u32, mine)];
        let encoded = rmp_serde::to_vec(&tagged).unwrap();
        let combined = self.all_reduce(
            &|a, b| {
                let mut x: Vec<(u32, Vec<u8>)> = rmp_serde::from_slice(&a).unwrap();
                let y: Vec<(u32, Vec<u8>)> = rmp_serde::from_slice(&b).unwrap();
                x.extend(y);
                rmp_serde::to_vec(&x).unwrap()
            },
            encoded,
        );
        let mut gathered: Vec<(u32, Vec<u8>)> = rmp_serde::from_slice(&combined).unwrap();
        gathered.sort_by_key(|(rank, _)| *rank);
        assert_eq!(gathered.len(), self.size());
        gathered.into_iter().map(|(_, bytes)| bytes).collect()
    }

    /// Exchange one buffer with each of a known set of peers: `outgoing`
    /// holds (rank, payload) pairs, `incoming` names the ranks a message is
    /// expected from. Returns the received payloads keyed by source rank.
    /// Both sides must agree on who talks to whom; that knowledge comes from
    /// the neighbor graphs of the calling algorithm.
    fn exchange(
        &self,
        outgoing: Vec<(usize, Vec<u8>)>,
        incoming: &std::collections::BTreeSet<usize>,
    ) -> std::collections::BTreeMap<usize, Vec<u8>> {
        let tag = self.next_operation_tag();
        for (rank, payload) in outgoing {
            assert!(rank != self.rank(), "exchange does not loop back");
            self.send_tagged(rank, tag, payload);
        }
        let mut received = std::collections::BTreeMap::new();
        while received.len() < incoming.len() {
            let (src, data) = self.recv_tagged(tag);
            assert!(
                incoming.contains(&src),
                "unexpected message from rank {}",
                src
            );
            let previous = received.insert(src, data);
            assert!(previous.is_none(), "duplicate message from rank {}", src);
        }
        received
    }

    /// A synchronization point: no rank proceeds until every rank arrives.
    fn barrier(&self) {
        if self.size() > 1 {
            self.all_reduce(&|a, _| a, vec![0]);
        }
    }
}

/// The number of rounds a binomial tree needs to span `size` ranks: the
/// smallest n with 2^n covering every rank.
fn tree_rounds(size: usize) -> u32 {
    usize::BITS - size.saturating_sub(1).leading_zeros()
}

/// The trivial communicator for a single-process run. Sends and receives are
/// programming errors; every collective is the identity.
pub struct SerialCommunicator;

impl Communicator for SerialCommunicator {
    fn rank(&self) -> usize {
        0
    }

    fn size(&self) -> usize {
        1
    }

    fn send(&self, rank: usize, _message: Vec<u8>) {
        panic!("serial communicator cannot send (to rank {})", rank)
    }

    fn recv(&self) -> Vec<u8> {
        panic!("serial communicator cannot recv")
    }

    fn requeue_recv(&self, _bytes: Vec<u8>) {
        panic!("serial communicator cannot requeue")
    }

    fn next_operation_tag(&self) -> u64 {
        0
    }
}

// ============================================================================
#[cfg(test)]
mod test {

    use super::tree_rounds;

    #[test]
    fn tree_rounds_cover_every_group_size() {
        assert_eq!(tree_rounds(1), 0);
        assert_eq!(tree_rounds(2), 1);
        assert_eq!(tree_rounds(3), 2);
        assert_eq!(tree_rounds(8), 3);
        assert_eq!(tree_rounds(9), 4);
    }
}
