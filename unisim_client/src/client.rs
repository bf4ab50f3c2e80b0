//! Client implementation.
//!
//! A thin, single-task client over one TCP stream. It is meant for tools
//! and tests: every call either sends one message or waits for one, and
//! messages that arrive while waiting for something else are kept in a
//! backlog rather than dropped.

use std::{collections::VecDeque, net::SocketAddr, time::Duration};

use anyhow::{bail, Context};
use tokio::{net::TcpStream, time::Instant};
use tracing::{debug, info, warn};
use unisim_shared::{
    body::PhysId,
    config::UniverseConfig,
    math::{Basis, Vec3},
    message::{
        BeamFire, BeamKind, BodyProperties, Message, MessageBody, ScanResponse, Spawn,
        VisualDataEnable,
    },
    net::{self, RecvError},
};

/// Properties for a new body with default orientation and no thrust.
pub fn body_props(obj_type: &str, mass: f64, radius: f64, position: Vec3, velocity: Vec3) -> BodyProperties {
    BodyProperties {
        obj_type: Some(obj_type.to_string()),
        mass: Some(mass),
        position: Some(position),
        velocity: Some(velocity),
        orientation: Some(Basis::default().to_wire()),
        thrust: Some(Vec3::ZERO),
        radius: Some(radius),
        spectrum: None,
    }
}

/// A beam fired along `direction` at the default speed of light.
pub fn beam_along(kind: BeamKind, origin: Vec3, direction: Vec3, up: Vec3, spread: f64, energy: f64) -> BeamFire {
    BeamFire {
        origin: Some(origin),
        velocity: Some(direction.normalized() * UniverseConfig::default().speed_of_light),
        up: Some(up),
        spread_h: Some(spread),
        spread_v: Some(spread),
        energy: Some(energy),
        kind: Some(kind),
        comm_msg: None,
        spectrum: None,
    }
}

pub struct UniverseClient {
    stream: TcpStream,
    peer: SocketAddr,
    max_frame_len: usize,
    backlog: VecDeque<Message>,
    next_client_id: i64,
}

impl UniverseClient {
    pub async fn connect(addr: &str) -> anyhow::Result<Self> {
        let stream = TcpStream::connect(addr)
            .await
            .with_context(|| format!("tcp connect {addr}"))?;
        stream.set_nodelay(true).context("set nodelay")?;
        let peer = stream.peer_addr().context("peer addr")?;
        info!(server = %peer, "connected");
        Ok(Self {
            stream,
            peer,
            max_frame_len: UniverseConfig::default().max_frame_len,
            backlog: VecDeque::new(),
            next_client_id: 1,
        })
    }

    pub fn server_peer(&self) -> SocketAddr {
        self.peer
    }

    /// A client-side id not used before by this client.
    pub fn fresh_client_id(&mut self) -> i64 {
        let id = self.next_client_id;
        self.next_client_id += 1;
        id
    }

    pub async fn send(&mut self, msg: &Message) -> anyhow::Result<()> {
        debug!(kind = ?msg.kind(), server_id = ?msg.server_id, "send");
        net::write_message(&mut self.stream, msg).await.context("send message")
    }

    /// Sends raw bytes, e.g. deliberately broken frames.
    pub async fn send_raw(&mut self, bytes: &[u8]) -> anyhow::Result<()> {
        net::write_frame(&mut self.stream, bytes).await.context("send raw bytes")
    }

    /// Next message, backlog first. `Ok(None)` on timeout.
    ///
    /// Undecodable frames are skipped. A closed stream is an error.
    pub async fn recv(&mut self, timeout: Duration) -> anyhow::Result<Option<Message>> {
        if let Some(msg) = self.backlog.pop_front() {
            return Ok(Some(msg));
        }
        self.recv_wire(Instant::now() + timeout).await
    }

    async fn recv_wire(&mut self, deadline: Instant) -> anyhow::Result<Option<Message>> {
        loop {
            let read = tokio::time::timeout_at(deadline, net::read_message(&mut self.stream, self.max_frame_len)).await;
            match read {
                Err(_) => return Ok(None),
                Ok(Ok(msg)) => return Ok(Some(msg)),
                Ok(Err(e)) if e.is_recoverable() => warn!(error = %e, "skipping frame"),
                Ok(Err(RecvError::Closed)) => bail!("server closed the connection"),
                Ok(Err(e)) => return Err(e).context("receive message"),
            }
        }
    }

    /// Waits for the first message matching `pred`. Others are kept for later.
    pub async fn recv_where<F>(&mut self, timeout: Duration, mut pred: F) -> anyhow::Result<Option<Message>>
    where
        F: FnMut(&Message) -> bool,
    {
        if let Some(i) = self.backlog.iter().position(&mut pred) {
            return Ok(self.backlog.remove(i));
        }
        let deadline = Instant::now() + timeout;
        while let Some(msg) = self.recv_wire(deadline).await? {
            if pred(&msg) {
                return Ok(Some(msg));
            }
            self.backlog.push_back(msg);
        }
        Ok(None)
    }

    /// Asks the server for a fresh physics id.
    pub async fn hello(&mut self, timeout: Duration) -> anyhow::Result<PhysId> {
        let client_id = self.fresh_client_id();
        self.send(&Message::new(MessageBody::Hello).with_client_id(client_id))
            .await?;
        let reply = self
            .recv_where(timeout, |m| matches!(m.body, MessageBody::Hello) && m.client_id == Some(client_id))
            .await?
            .context("no hello reply")?;
        reply.server_id.context("hello reply without server_id")
    }

    /// Spawns a dumb body. `parent` makes position and velocity relative to
    /// one of this client's smart bodies.
    pub async fn spawn_dumb(&mut self, props: BodyProperties, parent: Option<PhysId>) -> anyhow::Result<()> {
        let mut msg = Message::new(MessageBody::Spawn(Spawn {
            is_smart: Some(false),
            props,
        }));
        msg.server_id = parent;
        self.send(&msg).await
    }

    /// Spawns a smart body owned by this connection and returns its id.
    pub async fn spawn_smart(&mut self, props: BodyProperties, timeout: Duration) -> anyhow::Result<PhysId> {
        let client_id = self.fresh_client_id();
        let msg = Message::new(MessageBody::Spawn(Spawn {
            is_smart: Some(true),
            props,
        }))
        .with_client_id(client_id);
        self.send(&msg).await?;
        let ack = self
            .recv_where(timeout, |m| matches!(m.body, MessageBody::Hello) && m.client_id == Some(client_id))
            .await?
            .context("no spawn acknowledgement")?;
        let id = ack.server_id.context("spawn acknowledgement without server_id")?;
        info!(id, client_id, "smart body spawned");
        Ok(id)
    }

    pub async fn update(&mut self, id: PhysId, props: BodyProperties) -> anyhow::Result<()> {
        self.send(&Message::new(MessageBody::PhysicalProperties(props)).with_server_id(id))
            .await
    }

    /// Fires a beam. With `from`, origin and velocity are relative to that body.
    pub async fn fire_beam(&mut self, from: Option<PhysId>, fire: BeamFire) -> anyhow::Result<()> {
        let mut msg = Message::new(MessageBody::Beam(fire));
        msg.server_id = from;
        self.send(&msg).await
    }

    pub async fn enable_vis(&mut self, relative_to: Option<PhysId>, enabled: bool) -> anyhow::Result<()> {
        let mut msg = Message::new(MessageBody::VisualDataEnable(VisualDataEnable {
            enabled: Some(enabled),
        }));
        msg.server_id = relative_to;
        self.send(&msg).await
    }

    pub async fn passive_scan(&mut self, id: PhysId) -> anyhow::Result<()> {
        self.send(&Message::new(MessageBody::ScanQuery(Default::default())).with_server_id(id))
            .await
    }

    pub async fn goodbye(&mut self, id: PhysId) -> anyhow::Result<()> {
        self.send(&Message::new(MessageBody::Goodbye).with_server_id(id)).await
    }

    /// Answers every scan query that arrives within `window`, building each
    /// reply with `make_scan_response(query_energy)`. Everything else is kept
    /// for later. Returns how many queries were answered.
    pub async fn answer_scan_queries<F>(&mut self, window: Duration, mut make_scan_response: F) -> anyhow::Result<usize>
    where
        F: FnMut(f64) -> String,
    {
        let mut answered = 0;
        let deadline = Instant::now() + window;
        loop {
            let query = self
                .recv_where(deadline.saturating_duration_since(Instant::now()), |m| {
                    matches!(&m.body, MessageBody::ScanQuery(q) if q.scan_id.is_some())
                })
                .await?;
            let Some(query) = query else {
                return Ok(answered);
            };
            let MessageBody::ScanQuery(q) = &query.body else {
                continue;
            };
            let data = make_scan_response(q.energy.unwrap_or(0.0));
            let reply = Message::new(MessageBody::ScanResponse(ScanResponse {
                scan_id: q.scan_id,
                data: Some(data),
            }))
            .addressed_like(&query);
            self.send(&reply).await?;
            answered += 1;
        }
    }
}
