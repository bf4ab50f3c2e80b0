//! Inbound message dispatch.
//!
//! Turns what clients send into queued lifecycle changes, direct mutations
//! of smart bodies and replies. Rejected requests are logged and dropped;
//! they never close the connection.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, info, warn};
use unisim_shared::{
    beam::{Beam, BeamSpec},
    body::{PhysicsBody, NO_BODY},
    message::{BeamFire, BodyProperties, Message, MessageBody, ScanResponse, Spawn, VisualDataEnable},
};

use crate::{
    connection::Connection,
    lifecycle::RemoteLink,
    multiplexer::MessageHandler,
    server::Shared,
};

pub struct UniverseProxy {
    shared: Arc<Shared>,
}

fn reply(conn: &Connection, msg: Message) {
    if conn.send(&msg).is_err() {
        debug!(conn = %conn.id(), "reply dropped, connection closed");
    }
}

impl UniverseProxy {
    pub fn new(shared: Arc<Shared>) -> Self {
        Self { shared }
    }

    /// Routes one message. Every kind is handled here or explicitly ignored.
    pub fn dispatch(&self, conn: &Connection, msg: &Message) {
        match &msg.body {
            MessageBody::Hello => self.on_hello(conn, msg),
            MessageBody::Spawn(spawn) => self.on_spawn(conn, msg, spawn),
            MessageBody::PhysicalProperties(props) => self.on_update(conn, msg, props),
            MessageBody::Beam(fire) => self.on_beam(conn, msg, fire),
            MessageBody::ScanQuery(_) => self.on_passive_scan(conn, msg),
            MessageBody::ScanResponse(resp) => self.on_scan_response(conn, msg, resp),
            MessageBody::Goodbye => self.on_goodbye(conn, msg),
            MessageBody::VisualDataEnable(v) => self.on_vis_enable(conn, msg, v),
            MessageBody::Directory(_) => {
                debug!(conn = %conn.id(), "directory request ignored");
            }
            MessageBody::VisualData(_) | MessageBody::Collision(_) | MessageBody::ScanResult(_) => {
                warn!(conn = %conn.id(), kind = ?msg.kind(), "server-bound message of a client-bound kind");
            }
        }
    }

    fn on_hello(&self, conn: &Connection, msg: &Message) {
        match (msg.server_id, msg.client_id) {
            (None, Some(client_id)) => {
                let server_id = self.shared.ids.next_id();
                debug!(conn = %conn.id(), client_id, server_id, "hello");
                reply(
                    conn,
                    Message::new(MessageBody::Hello)
                        .with_server_id(server_id)
                        .with_client_id(client_id),
                );
            }
            _ => debug!(conn = %conn.id(), "hello without a fresh client id ignored"),
        }
    }

    fn on_spawn(&self, conn: &Connection, msg: &Message, spawn: &Spawn) {
        let Some(is_smart) = spawn.is_smart else {
            warn!(conn = %conn.id(), "spawn rejected: missing is_smart");
            return;
        };

        let mut props = spawn.props.clone();
        {
            let world = self.shared.world();
            if let Some(parent) = world.owned_body(msg.server_id, conn.id()) {
                props.position = props.position.map(|p| p + parent.position);
                props.velocity = props.velocity.map(|v| v + parent.velocity);
            }
        }

        let id = self.shared.ids.next_id();
        let mut body = match PhysicsBody::from_props(id, &props, &self.shared.cfg, &mut rand::thread_rng()) {
            Ok(body) => body,
            Err(e) => {
                warn!(conn = %conn.id(), error = %e, "spawn rejected");
                return;
            }
        };

        if is_smart {
            body.make_invulnerable();
            info!(conn = %conn.id(), id, obj_type = %body.obj_type, "smart body spawned");
            self.shared.queue.add_body(
                body,
                Some(RemoteLink {
                    conn: conn.clone(),
                    client_id: msg.client_id,
                }),
            );
            let mut ack = Message::new(MessageBody::Hello).with_server_id(id);
            ack.client_id = msg.client_id;
            reply(conn, ack);
        } else {
            debug!(conn = %conn.id(), id, obj_type = %body.obj_type, "body spawned");
            self.shared.queue.add_body(body, None);
        }
    }

    fn on_update(&self, conn: &Connection, msg: &Message, props: &BodyProperties) {
        let Some(id) = msg.server_id else {
            warn!(conn = %conn.id(), "update rejected: no server_id");
            return;
        };
        match self.shared.world().update_owned(id, conn.id(), props) {
            Some(changed) => debug!(conn = %conn.id(), id, ?changed, "body updated"),
            None => warn!(conn = %conn.id(), id, "update rejected: not a smart body of this connection"),
        }
    }

    fn on_beam(&self, conn: &Connection, msg: &Message, fire: &BeamFire) {
        let spec = {
            let world = self.shared.world();
            BeamSpec::from_request(fire, world.owned_body(msg.server_id, conn.id()))
        };
        match spec {
            Ok(spec) => {
                let beam = Beam::new(self.shared.ids.next_id(), spec, &self.shared.cfg, &mut rand::thread_rng());
                debug!(conn = %conn.id(), id = beam.id, kind = ?beam.kind, energy = beam.energy, "beam fired");
                self.shared.queue.add_beam(beam);
            }
            Err(e) => warn!(conn = %conn.id(), error = %e, "beam rejected"),
        }
    }

    fn on_passive_scan(&self, conn: &Connection, msg: &Message) {
        let world = self.shared.world();
        let Some(me) = world.owned_body(msg.server_id, conn.id()) else {
            warn!(conn = %conn.id(), "passive scan rejected: not a smart body of this connection");
            return;
        };
        let results = world.passive_scan(me.id);
        debug!(conn = %conn.id(), id = me.id, results = results.len(), "passive scan");
        for result in results {
            reply(conn, Message::new(MessageBody::ScanResult(result)).addressed_like(msg));
        }
    }

    fn on_scan_response(&self, conn: &Connection, msg: &Message, resp: &ScanResponse) {
        let (Some(scan_id), Some(data)) = (resp.scan_id, resp.data.clone()) else {
            warn!(conn = %conn.id(), "scan response rejected: missing fields");
            return;
        };
        let mut world = self.shared.world();
        if world.owned_body(msg.server_id, conn.id()).is_none() {
            warn!(conn = %conn.id(), scan_id, "scan response rejected: not a smart body of this connection");
            return;
        }
        match world.answer_scan(scan_id, msg.server_id, data) {
            Some(beam) => {
                debug!(conn = %conn.id(), scan_id, beam = beam.id, "scan answered");
                self.shared.queue.add_beam(beam);
            }
            None => warn!(conn = %conn.id(), scan_id, "scan response for an unknown query"),
        }
    }

    fn on_goodbye(&self, conn: &Connection, msg: &Message) {
        let owned = self
            .shared
            .world()
            .owned_body(msg.server_id, conn.id())
            .map(|b| b.id);
        match owned {
            Some(id) => {
                info!(conn = %conn.id(), id, "goodbye");
                self.shared.queue.expire(id);
            }
            None => warn!(conn = %conn.id(), server_id = ?msg.server_id, "goodbye for a body this connection does not own"),
        }
    }

    fn on_vis_enable(&self, conn: &Connection, msg: &Message, v: &VisualDataEnable) {
        let Some(enabled) = v.enabled else {
            warn!(conn = %conn.id(), "vis enable rejected: missing enabled");
            return;
        };
        let phys_id = msg.server_id.unwrap_or(NO_BODY);
        let mut world = self.shared.world();
        if enabled {
            world.vis.enable(conn, phys_id, msg.client_id);
        } else {
            world.vis.disable(conn.id(), phys_id, msg.client_id);
        }
    }
}

#[async_trait]
impl MessageHandler for UniverseProxy {
    async fn handle(&self, conn: &Connection, msg: Message) {
        self.dispatch(conn, &msg);
    }

    async fn hangup(&self, conn: &Connection) {
        self.shared.queue.expire_owned_by(conn.id());
        self.shared.world().vis.remove_connection(conn.id());
    }
}
