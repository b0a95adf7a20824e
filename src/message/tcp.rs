use log::{error, info};

use super::comm::Communicator;
use std::io::prelude::*;
use std::net::{SocketAddr, TcpListener, TcpStream};
use std::sync::atomic::{AtomicU64, Ordering};
use std::thread;
use std::time::Duration;

type Sender = crossbeam_channel::Sender<(usize, Vec<u8>)>;
type Receiver = crossbeam_channel::Receiver<Vec<u8>>;

const RETRY_START: Duration = Duration::from_millis(250);
const RETRY_CEILING: Duration = Duration::from_secs(5);

/// Owns the sender and listener threads for one process in a TCP process
/// group. Construction returns the host together with the channel endpoints a
/// [`TcpCommunicator`] needs. Messages travel as length-prefixed frames; a
/// send to a peer whose listener is not up yet retries with a doubling
/// delay.
pub struct TcpHost {
    listen_thread: Option<thread::JoinHandle<()>>,
    send_thread: Option<thread::JoinHandle<()>>,
}

impl TcpHost {
    pub fn new(
        rank: usize,
        peers: Vec<SocketAddr>,
    ) -> (Self, Sender, crossbeam_channel::Sender<Vec<u8>>, Receiver) {
        let (send_sink, send_src): (Sender, _) = crossbeam_channel::unbounded();
        let send_thread = Self::start_sender(peers.clone(), send_src);

        let (recv_sink, recv_src) = crossbeam_channel::unbounded();
        let listen_thread = Self::start_listener(peers[rank], recv_sink.clone());

        (
            TcpHost {
                send_thread: Some(send_thread),
                listen_thread: Some(listen_thread),
            },
            send_sink,
            recv_sink,
            recv_src,
        )
    }

    pub fn join(&mut self) {
        self.send_thread.take().unwrap().join().unwrap();
        drop(self.listen_thread.take());
    }

    fn start_sender(
        peers: Vec<SocketAddr>,
        send_src: crossbeam_channel::Receiver<(usize, Vec<u8>)>,
    ) -> thread::JoinHandle<()> {
        thread::spawn(move || {
            for (rank, message) in send_src {
                let mut wait = RETRY_START;
                let mut stream = loop {
                    match TcpStream::connect(peers[rank]) {
                        Ok(stream) => break stream,
                        Err(reason) => {
                            error!("connect to rank {} failed: {}", rank, reason);
                            info!("retrying in {}ms", wait.as_millis());
                            thread::sleep(wait);
                            wait = (wait * 2).min(RETRY_CEILING);
                        }
                    }
                };
                stream
                    .write_all(&(message.len() as u64).to_le_bytes())
                    .unwrap();
                stream.write_all(&message).unwrap();
            }
        })
    }

    fn start_listener(
        addr: SocketAddr,
        recv_sink: crossbeam_channel::Sender<Vec<u8>>,
    ) -> thread::JoinHandle<()> {
        thread::spawn(move || {
            info!("listening on {}", addr);
            let listener = TcpListener::bind(addr).unwrap();
            loop {
                let (mut stream, _) = listener.accept().unwrap();
                if !Self::drain_connection(&mut stream, recv_sink.clone()) {
                    break;
                }
            }
        })
    }

    /// Forward every frame on one connection into the receive channel.
    /// Returns false once the channel is gone and the listener should stop.
    fn drain_connection(
        stream: &mut TcpStream,
        recv_sink: crossbeam_channel::Sender<Vec<u8>>,
    ) -> bool {
        while let Some(bytes) = read_frame(stream) {
            if let Err(reason) = recv_sink.send(bytes) {
                error!("connection closed: {}", reason);
                return false;
            }
        }
        true
    }
}

/// Read one length-prefixed frame from the stream, or `None` at a clean
/// end-of-stream between frames. A peer disappearing mid-frame is fatal,
/// like every other transport failure.
fn read_frame(stream: &mut TcpStream) -> Option<Vec<u8>> {
    let mut header = [0u8; 8];
    if !fill_from(stream, &mut header, true) {
        return None;
    }
    let size = u64::from_le_bytes(header) as usize;

    let mut payload = vec![0u8; size];
    fill_from(stream, &mut payload, false);
    Some(payload)
}

/// Fill the buffer from the stream; false means the stream closed cleanly
/// before the first byte, which is only tolerated at a frame boundary.
fn fill_from(stream: &mut TcpStream, buffer: &mut [u8], at_frame_start: bool) -> bool {
    let mut at = 0;
    while at < buffer.len() {
        match stream.read(&mut buffer[at..]) {
            Ok(0) if at == 0 && at_frame_start => return false,
            Ok(0) => panic!("peer closed the stream mid-frame"),
            Ok(n) => at += n,
            Err(reason) => panic!("socket read failed: {}", reason),
        }
    }
    true
}

/// A [`Communicator`] whose transport is the channel pair plumbed through a
/// [`TcpHost`].
pub struct TcpCommunicator {
    rank: usize,
    num_peers: usize,
    tag: AtomicU64,
    send_sink: Option<crossbeam_channel::Sender<(usize, Vec<u8>)>>,
    recv_sink: Option<crossbeam_channel::Sender<Vec<u8>>>,
    recv_src: Option<crossbeam_channel::Receiver<Vec<u8>>>,
}

impl TcpCommunicator {
    pub fn new(
        rank: usize,
        peers: Vec<SocketAddr>,
        send_sink: crossbeam_channel::Sender<(usize, Vec<u8>)>,
        recv_sink: crossbeam_channel::Sender<Vec<u8>>,
        recv_src: crossbeam_channel::Receiver<Vec<u8>>,
    ) -> Self {
        let num_peers = peers.len();
        Self {
            rank,
            num_peers,
            tag: AtomicU64::new(1),
            send_sink: Some(send_sink),
            recv_sink: Some(recv_sink),
            recv_src: Some(recv_src),
        }
    }
}

impl Communicator for TcpCommunicator {
    fn rank(&self) -> usize {
        self.rank
    }

    fn size(&self) -> usize {
        self.num_peers
    }

    fn send(&self, rank: usize, message: Vec<u8>) {
        self.send_sink
            .as_ref()
            .unwrap()
            .send((rank, message))
            .unwrap()
    }

    fn recv(&self) -> Vec<u8> {
        self.recv_src.as_ref().unwrap().recv().unwrap()
    }

    fn requeue_recv(&self, bytes: Vec<u8>) {
        self.recv_sink.as_ref().unwrap().send(bytes).unwrap();
    }

    fn next_operation_tag(&self) -> u64 {
        self.tag.fetch_add(1, Ordering::SeqCst)
    }
}

impl Drop for TcpCommunicator {
    fn drop(&mut self) {
        self.send_sink.take().unwrap();
        self.recv_src.take().unwrap();
    }
}
