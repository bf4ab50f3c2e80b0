//! Visual data subscribers.

use std::collections::BTreeMap;

use tracing::{debug, info};
use unisim_shared::{
    body::{PhysId, PhysicsBody, NO_BODY},
    math::Vec3,
    message::{Message, MessageBody, VisualData},
    net::ConnId,
};

use crate::connection::Connection;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
struct VisKey {
    conn: ConnId,
    phys_id: PhysId,
    client_id: Option<i64>,
}

/// Connections that asked for periodic VisualData frames.
#[derive(Debug, Default)]
pub struct VisRegistry {
    clients: BTreeMap<VisKey, Connection>,
}

impl VisRegistry {
    /// `phys_id` is the body positions are reported relative to, or
    /// [`NO_BODY`] for world coordinates.
    pub fn enable(&mut self, conn: &Connection, phys_id: PhysId, client_id: Option<i64>) {
        let key = VisKey {
            conn: conn.id(),
            phys_id,
            client_id,
        };
        self.clients.insert(key, conn.clone());
        info!(conn = %conn.id(), phys_id, "vis client registered");
    }

    pub fn disable(&mut self, conn: ConnId, phys_id: PhysId, client_id: Option<i64>) {
        let key = VisKey {
            conn,
            phys_id,
            client_id,
        };
        if self.clients.remove(&key).is_some() {
            info!(%conn, phys_id, "vis client unregistered");
        }
    }

    pub fn remove_connection(&mut self, conn: ConnId) {
        self.clients.retain(|k, _| k.conn != conn);
    }

    pub fn len(&self) -> usize {
        self.clients.len()
    }

    pub fn is_empty(&self) -> bool {
        self.clients.is_empty()
    }

    /// Sends one frame to every subscriber. Returns the number of frames sent.
    ///
    /// A subscriber whose reference body is gone gets no frame this time. One
    /// whose connection is closed is dropped.
    pub fn broadcast(&mut self, bodies: &BTreeMap<PhysId, PhysicsBody>, visual_acuity: f64) -> usize {
        let mut sent = 0;
        self.clients.retain(|key, conn| {
            let origin = if key.phys_id == NO_BODY {
                Vec3::ZERO
            } else {
                match bodies.get(&key.phys_id) {
                    Some(b) => b.position,
                    None => return true,
                }
            };

            for body in bodies.values() {
                let pos = body.position - origin;
                let d2 = pos.len_sq();
                if d2 > 0.0 && 4.0 * body.radius * body.radius / d2 < visual_acuity {
                    continue;
                }
                let msg = address(
                    Message::new(MessageBody::VisualData(VisualData {
                        phys_id: Some(body.id),
                        radius: Some(body.radius),
                        position: Some(pos),
                        orientation: Some(body.basis.to_wire()),
                    })),
                    key.phys_id,
                    key.client_id,
                );
                if conn.send(&msg).is_err() {
                    debug!(conn = %key.conn, "vis client gone");
                    return false;
                }
            }

            let end = address(
                Message::new(MessageBody::VisualData(VisualData::default())),
                NO_BODY,
                key.client_id,
            );
            if conn.send(&end).is_err() {
                return false;
            }
            sent += 1;
            true
        });
        sent
    }
}

fn address(msg: Message, server_id: PhysId, client_id: Option<i64>) -> Message {
    let msg = msg.with_server_id(server_id);
    match client_id {
        Some(c) => msg.with_client_id(c),
        None => msg,
    }
}
