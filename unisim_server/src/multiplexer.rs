//! Connection multiplexer.
//!
//! Accepts sockets and gives each exactly one reader task. Decoded messages
//! go to a single [`MessageHandler`]; when a reader ends, for whatever
//! reason, the handler's `hangup` runs once for that connection.

use std::{
    collections::HashMap,
    net::SocketAddr,
    sync::{Arc, Mutex, PoisonError},
    time::Duration,
};

use anyhow::Context;
use async_trait::async_trait;
use tokio::{
    net::{tcp::OwnedReadHalf, TcpListener},
    sync::watch,
    task::{JoinError, JoinHandle, JoinSet},
};
use tracing::{debug, error, info, warn};
use unisim_shared::{
    message::Message,
    net::{self, ConnId},
};

use crate::connection::{Connection, OUTBOUND_CAPACITY};

/// Receives everything the multiplexer reads.
#[async_trait]
pub trait MessageHandler: Send + Sync + 'static {
    async fn handle(&self, conn: &Connection, msg: Message);

    /// Called once per connection after its reader stops.
    async fn hangup(&self, conn: &Connection);
}

type LiveSet = Arc<Mutex<HashMap<ConnId, Connection>>>;

/// How long `stop` waits for writers to flush before aborting them.
const WRITER_GRACE: Duration = Duration::from_secs(1);

pub struct Multiplexer {
    local_addr: SocketAddr,
    shutdown: watch::Sender<bool>,
    accept_task: Option<JoinHandle<()>>,
    live: LiveSet,
}

impl Multiplexer {
    pub async fn bind(
        addr: &str,
        handler: Arc<dyn MessageHandler>,
        max_frame_len: usize,
    ) -> anyhow::Result<Self> {
        let listener = TcpListener::bind(addr).await.context("tcp bind")?;
        let local_addr = listener.local_addr().context("local addr")?;
        let (shutdown, shutdown_rx) = watch::channel(false);
        let live: LiveSet = Arc::default();

        let accept_task = tokio::spawn(accept_loop(
            listener,
            handler,
            max_frame_len,
            shutdown_rx,
            live.clone(),
        ));
        info!(%local_addr, "listening");

        Ok(Self {
            local_addr,
            shutdown,
            accept_task: Some(accept_task),
            live,
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn connection_count(&self) -> usize {
        self.live.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    /// Closes the listener, ends every reader and waits for them.
    pub async fn stop(&mut self) {
        let _ = self.shutdown.send(true);
        if let Some(task) = self.accept_task.take() {
            if let Err(e) = task.await {
                error!(error = %e, "accept loop panicked");
            }
        }
    }
}

async fn accept_loop(
    listener: TcpListener,
    handler: Arc<dyn MessageHandler>,
    max_frame_len: usize,
    mut shutdown: watch::Receiver<bool>,
    live: LiveSet,
) {
    let mut readers = JoinSet::new();
    let mut writers = JoinSet::new();
    loop {
        tokio::select! {
            _ = shutdown.changed() => break,
            Some(done) = readers.join_next(), if !readers.is_empty() => reap("reader", done),
            Some(done) = writers.join_next(), if !writers.is_empty() => reap("writer", done),
            accepted = listener.accept() => match accepted {
                Ok((stream, peer)) => {
                    let _ = stream.set_nodelay(true);
                    let id = ConnId::new_unique();
                    let (rd, wr) = stream.into_split();
                    let (conn, writer) = Connection::new(id, peer, wr, OUTBOUND_CAPACITY);
                    writers.spawn(writer);
                    live.lock()
                        .unwrap_or_else(PoisonError::into_inner)
                        .insert(id, conn.clone());
                    info!(conn = %id, %peer, "connection accepted");
                    readers.spawn(read_loop(
                        conn,
                        rd,
                        handler.clone(),
                        max_frame_len,
                        shutdown.clone(),
                        live.clone(),
                    ));
                }
                Err(e) => warn!(error = %e, "accept failed"),
            },
        }
    }

    drop(listener);
    debug!(readers = readers.len(), "listener closed, joining readers");
    while let Some(done) = readers.join_next().await {
        reap("reader", done);
    }
    let flushed = tokio::time::timeout(WRITER_GRACE, async {
        while let Some(done) = writers.join_next().await {
            reap("writer", done);
        }
    })
    .await;
    if flushed.is_err() {
        warn!(writers = writers.len(), "writers still blocked, aborting");
        writers.shutdown().await;
    }
}

fn reap(task: &str, done: Result<(), JoinError>) {
    if let Err(e) = done {
        error!(task, error = %e, "connection task failed");
    }
}

async fn read_loop(
    conn: Connection,
    mut rd: OwnedReadHalf,
    handler: Arc<dyn MessageHandler>,
    max_frame_len: usize,
    mut shutdown: watch::Receiver<bool>,
    live: LiveSet,
) {
    let id = conn.id();
    while !*shutdown.borrow() {
        let read = tokio::select! {
            _ = shutdown.changed() => break,
            read = net::read_message(&mut rd, max_frame_len) => read,
        };
        match read {
            Ok(msg) => {
                debug!(conn = %id, kind = ?msg.kind(), server_id = ?msg.server_id, "recv");
                handler.handle(&conn, msg).await;
            }
            Err(e) if e.is_recoverable() => {
                warn!(conn = %id, error = %e, "dropping frame");
            }
            Err(e) if e.is_peer_reset() => {
                debug!(conn = %id, error = %e, "peer closed");
                break;
            }
            Err(e) => {
                error!(conn = %id, error = %e, "read failed");
                break;
            }
        }
    }

    handler.hangup(&conn).await;
    live.lock().unwrap_or_else(PoisonError::into_inner).remove(&id);
    conn.close();
    info!(conn = %id, peer = %conn.peer(), "connection hung up");
}
