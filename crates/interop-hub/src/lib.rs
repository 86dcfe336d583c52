//! Context and intent routing hub.
//!
//! Applications connect over WebSocket, join channels, broadcast contexts
//! and raise intents. The hub keeps every registry in one [`HubState`]
//! guarded by the [`Hub`] handle; [`serve`] puts a socket in front of it.
//!
//! ```no_run
//! # async fn run() -> anyhow::Result<()> {
//! use interop_core::StaticDirectory;
//! use interop_hub::{Hub, HubConfig, serve};
//! use std::sync::Arc;
//!
//! let hub = Hub::start(HubConfig::default(), Arc::new(StaticDirectory::default()));
//! let listener = tokio::net::TcpListener::bind("127.0.0.1:4475").await?;
//! serve(listener, hub).await
//! # }
//! ```

mod channel;
mod config;
mod connection;
mod hub;
mod listener;
mod resolver;
mod router;
mod server;
mod state;
mod timer;

pub use config::HubConfig;
pub use connection::{Inbox, Outbox};
pub use hub::Hub;
pub use server::serve;
pub use state::HubState;
pub use timer::{Fired, TimerKey};
