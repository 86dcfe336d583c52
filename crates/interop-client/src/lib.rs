//! Client-side implementation for the desktop interop hub.
//!
//! [`Client`] speaks the hub's JSON-over-WebSocket protocol: each call is a
//! request correlated by `req_id`, and everything the hub pushes unprompted
//! arrives on the [`Events`] receiver returned from [`Client::connect`].

mod client;
mod error;

pub use client::{Client, Events};
pub use error::ClientError;
