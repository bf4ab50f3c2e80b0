//! Queued adds and expiries.
//!
//! Connection tasks never touch the live collections. They queue changes
//! here under a small lock of its own, and the tick drains the queues once
//! per tick, after integration.

use std::sync::{Mutex, MutexGuard, PoisonError};

use unisim_shared::{beam::Beam, body::PhysicsBody, body::PhysId, net::ConnId};

use crate::connection::Connection;

/// Network side of a smart body.
#[derive(Debug, Clone)]
pub struct RemoteLink {
    pub conn: Connection,
    /// Id the owner uses for this body.
    pub client_id: Option<i64>,
}

#[derive(Debug)]
pub enum Pending {
    Body {
        body: Box<PhysicsBody>,
        remote: Option<RemoteLink>,
    },
    Beam(Box<Beam>),
}

impl Pending {
    pub fn id(&self) -> PhysId {
        match self {
            Pending::Body { body, .. } => body.id,
            Pending::Beam(beam) => beam.id,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Expiry {
    /// A body or beam.
    Id(PhysId),
    /// Every smart body owned by a connection.
    OwnedBy(ConnId),
}

#[derive(Debug, Default)]
pub struct Drained {
    pub adds: Vec<Pending>,
    pub expires: Vec<Expiry>,
}

#[derive(Debug, Default)]
pub struct LifecycleQueue {
    adds: Mutex<Vec<Pending>>,
    expires: Mutex<Vec<Expiry>>,
}

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

impl LifecycleQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_body(&self, body: PhysicsBody, remote: Option<RemoteLink>) {
        lock(&self.adds).push(Pending::Body {
            body: Box::new(body),
            remote,
        });
    }

    pub fn add_beam(&self, beam: Beam) {
        lock(&self.adds).push(Pending::Beam(Box::new(beam)));
    }

    pub fn expire(&self, id: PhysId) {
        lock(&self.expires).push(Expiry::Id(id));
    }

    pub fn expire_owned_by(&self, conn: ConnId) {
        lock(&self.expires).push(Expiry::OwnedBy(conn));
    }

    pub fn is_empty(&self) -> bool {
        lock(&self.adds).is_empty() && lock(&self.expires).is_empty()
    }

    /// Takes everything queued so far.
    pub fn drain(&self) -> Drained {
        Drained {
            adds: std::mem::take(&mut *lock(&self.adds)),
            expires: std::mem::take(&mut *lock(&self.expires)),
        }
    }
}

#[cfg(test)]
mod tests {
    use unisim_shared::config::UniverseConfig;

    use super::*;

    #[test]
    fn drain_empties_both_queues() {
        let cfg = UniverseConfig::default();
        let q = LifecycleQueue::new();
        q.add_body(PhysicsBody::new(4, "Rock", 1.0, 1.0, &cfg), None);
        q.expire(2);
        q.expire_owned_by(ConnId(7));
        assert!(!q.is_empty());

        let d = q.drain();
        assert_eq!(d.adds.iter().map(Pending::id).collect::<Vec<_>>(), vec![4]);
        assert_eq!(d.expires, vec![Expiry::Id(2), Expiry::OwnedBy(ConnId(7))]);
        assert!(q.is_empty());
        assert!(q.drain().adds.is_empty());
    }

    #[test]
    fn queues_accept_from_many_threads() {
        let q = std::sync::Arc::new(LifecycleQueue::new());
        let handles: Vec<_> = (0..4)
            .map(|t| {
                let q = q.clone();
                std::thread::spawn(move || {
                    for i in 0..100 {
                        q.expire(t * 1000 + i);
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }
        assert_eq!(q.drain().expires.len(), 400);
    }
}
