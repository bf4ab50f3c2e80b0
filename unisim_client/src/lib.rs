//! `unisim_client`
//!
//! Client-side pieces for tools and tests:
//! - A request/response client over the universe wire protocol
//! - Scan query answering with a caller-supplied response builder
//! - Assembly of visual data messages into frames, with interpolation

pub mod client;
pub mod vis;

pub use client::UniverseClient;
