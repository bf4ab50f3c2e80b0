//! One accepted socket.
//!
//! The read half belongs to the multiplexer's reader task. The write half is
//! owned by a writer task fed through a bounded channel, so any number of
//! tasks can send through a cloned [`Connection`] and every frame reaches the
//! socket whole and in queue order.
//!
//! Sends never wait. A peer that stops reading fills its queue; the next send
//! then fails and the connection is dropped without flushing.

use std::{fmt, future::Future, net::SocketAddr, sync::Arc};

use bytes::Bytes;
use tokio::{
    io::AsyncWriteExt,
    net::tcp::OwnedWriteHalf,
    sync::{
        mpsc::{self, error::TrySendError},
        Notify,
    },
    task::JoinHandle,
};
use tracing::{debug, error, warn};
use unisim_shared::{
    codec,
    message::Message,
    net::{self, ConnId},
};

/// Frames a connection may have queued before it counts as stalled.
pub const OUTBOUND_CAPACITY: usize = 4096;

enum Outbound {
    Frame(Bytes),
    Close,
}

/// Returned when the writer task has exited or the peer fell too far behind.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConnectionClosed(pub ConnId);

impl fmt::Display for ConnectionClosed {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} is closed", self.0)
    }
}

impl std::error::Error for ConnectionClosed {}

/// Cheap, cloneable send handle for one socket.
#[derive(Clone)]
pub struct Connection {
    id: ConnId,
    peer: SocketAddr,
    tx: mpsc::Sender<Outbound>,
    kill: Arc<Notify>,
}

impl fmt::Debug for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connection")
            .field("id", &self.id)
            .field("peer", &self.peer)
            .finish()
    }
}

impl Connection {
    /// Starts the writer task for `wr`.
    pub fn spawn(id: ConnId, peer: SocketAddr, wr: OwnedWriteHalf) -> (Self, JoinHandle<()>) {
        Self::spawn_with_capacity(id, peer, wr, OUTBOUND_CAPACITY)
    }

    pub fn spawn_with_capacity(
        id: ConnId,
        peer: SocketAddr,
        wr: OwnedWriteHalf,
        capacity: usize,
    ) -> (Self, JoinHandle<()>) {
        let (conn, writer) = Self::new(id, peer, wr, capacity);
        (conn, tokio::spawn(writer))
    }

    /// Builds the send handle and the writer future without spawning it.
    pub fn new(
        id: ConnId,
        peer: SocketAddr,
        wr: OwnedWriteHalf,
        capacity: usize,
    ) -> (Self, impl Future<Output = ()> + Send + 'static) {
        let (tx, rx) = mpsc::channel(capacity);
        let kill = Arc::new(Notify::new());
        let writer = write_loop(id, wr, rx, kill.clone());
        (Self { id, peer, tx, kill }, writer)
    }

    pub fn id(&self) -> ConnId {
        self.id
    }

    pub fn peer(&self) -> SocketAddr {
        self.peer
    }

    /// Queues one message. Never blocks.
    pub fn send(&self, msg: &Message) -> Result<(), ConnectionClosed> {
        debug!(conn = %self.id, kind = ?msg.kind(), "send");
        self.send_frame(codec::encode(msg))
    }

    /// Queues an already encoded frame. A full queue drops the connection.
    pub fn send_frame(&self, frame: Bytes) -> Result<(), ConnectionClosed> {
        match self.tx.try_send(Outbound::Frame(frame)) {
            Ok(()) => Ok(()),
            Err(TrySendError::Full(_)) => {
                warn!(
                    conn = %self.id,
                    peer = %self.peer,
                    queued = self.queued(),
                    "peer not reading, dropping connection"
                );
                self.kill.notify_one();
                Err(ConnectionClosed(self.id))
            }
            Err(TrySendError::Closed(_)) => Err(ConnectionClosed(self.id)),
        }
    }

    /// Flushes what is queued, then shuts the socket's write side. With the
    /// queue already full the socket is shut without flushing.
    pub fn close(&self) {
        if let Err(TrySendError::Full(_)) = self.tx.try_send(Outbound::Close) {
            self.kill.notify_one();
        }
    }

    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }

    /// Frames waiting for the writer.
    pub fn queued(&self) -> usize {
        self.tx.max_capacity() - self.tx.capacity()
    }
}

async fn write_loop(
    id: ConnId,
    mut wr: OwnedWriteHalf,
    mut rx: mpsc::Receiver<Outbound>,
    kill: Arc<Notify>,
) {
    let drain = async {
        while let Some(out) = rx.recv().await {
            match out {
                Outbound::Frame(frame) => {
                    if let Err(e) = net::write_frame(&mut wr, &frame).await {
                        if net::is_peer_reset(&e) {
                            debug!(conn = %id, error = %e, "peer went away during write");
                        } else {
                            error!(conn = %id, error = %e, "socket write failed");
                        }
                        break;
                    }
                }
                Outbound::Close => break,
            }
        }
    };
    tokio::select! {
        _ = drain => {}
        _ = kill.notified() => debug!(conn = %id, "writer abandoned its queue"),
    }
    rx.close();
    let _ = wr.shutdown().await;
    debug!(conn = %id, "writer finished");
}

#[cfg(test)]
mod tests {
    use tokio::net::{TcpListener, TcpStream};
    use unisim_shared::message::MessageBody;

    use super::*;

    #[tokio::test]
    async fn close_flushes_then_shuts_down() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let client = tokio::spawn(async move { TcpStream::connect(addr).await.unwrap() });
        let (server_side, peer) = listener.accept().await.unwrap();
        let mut client = client.await.unwrap();

        let (_rd, wr) = server_side.into_split();
        let (conn, writer) = Connection::spawn(ConnId::new_unique(), peer, wr);
        conn.send(&Message::new(MessageBody::Hello).with_client_id(9)).unwrap();
        conn.close();
        writer.await.unwrap();

        let msg = net::read_message(&mut client, 1024).await.unwrap();
        assert_eq!(msg.client_id, Some(9));
        assert!(matches!(
            net::read_message(&mut client, 1024).await,
            Err(net::RecvError::Closed)
        ));
        assert!(conn.is_closed());
        assert!(conn.send(&Message::new(MessageBody::Goodbye)).is_err());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn stalled_reader_is_dropped_at_capacity() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        // Connected but never read from.
        let _client = TcpStream::connect(addr).await.unwrap();
        let (server_side, peer) = listener.accept().await.unwrap();

        let (_rd, wr) = server_side.into_split();
        let (conn, writer) = Connection::spawn_with_capacity(ConnId::new_unique(), peer, wr, 8);
        let frame = Bytes::from(vec![0u8; 256 * 1024]);

        let mut sent = 0;
        while conn.send_frame(frame.clone()).is_ok() {
            assert!(conn.queued() <= 8);
            sent += 1;
            assert!(sent < 10_000, "queue never filled");
            tokio::task::yield_now().await;
        }

        tokio::time::timeout(std::time::Duration::from_secs(2), writer)
            .await
            .expect("writer stopped")
            .unwrap();
        assert!(conn.is_closed());
        assert!(conn.send_frame(frame).is_err());
    }
}
