//! `unisim_server`
//!
//! Server-side systems:
//! - Connection multiplexer with one reader task per socket
//! - Serialized per-socket writers
//! - Variable-step world tick: beams, collisions, radiation, gravity
//! - Queued add/expire lifecycle, reconciled at tick boundaries
//! - Smart-body proxies and visual data broadcast
//!
//! Locking model:
//! - One coarse lock around the [`world::World`], held per tick
//! - A separate small lock around the lifecycle queues
//! - Socket writes never take either lock

pub mod connection;
pub mod lifecycle;
pub mod multiplexer;
pub mod proxy;
pub mod server;
pub mod vis;
pub mod world;

pub use server::{bind_ephemeral, UniverseServer};
