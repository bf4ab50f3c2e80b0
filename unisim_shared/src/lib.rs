//! `unisim_shared`
//!
//! Types and physics shared by the universe server and its clients.
//!
//! Design goals:
//! - One wire codec for both sides of the socket.
//! - Pure, synchronous physics: collision, gravity and beams never touch I/O.
//! - Fallible inputs return typed errors; nothing panics on bad peer data.
//! - No `unsafe`.

pub mod beam;
pub mod body;
pub mod codec;
pub mod collision;
pub mod config;
pub mod gravity;
pub mod math;
pub mod message;
pub mod net;
pub mod spectrum;

pub mod prelude {
    //! Commonly used exports.

    pub use crate::body::{PhysId, PhysicsBody, NO_BODY};
    pub use crate::config::*;
    pub use crate::math::*;
    pub use crate::message::*;
    pub use crate::net::*;
    pub use crate::spectrum::*;
}
