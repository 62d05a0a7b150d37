//! # PicoBroker Core
//!
//! Runtime-independent MQTT 3.1.1 broker core.
//!
//! This crate holds the protocol codec, topic matching, sessions, the
//! retained store, the router and the per-connection state machine. It does
//! no I/O and spawns nothing; a runtime crate such as `picobroker-tokio`
//! feeds it decoded packets and writes out what it queues.
//!
//! ## Features
//!
//! - **MQTT 3.1.1** with QoS 0, 1 and 2
//! - **Wildcards** `+` and `#`, with `$`-topics hidden from leading wildcards
//! - **Retained messages** and **Last Will**
//! - **Persistent sessions** with offline queueing and optional expiry
//! - **Pluggable authorization** through [`Authorizer`]

pub mod broker;
pub mod client;
pub mod config;
pub mod error;
pub mod message;
pub mod protocol;
pub mod retained;
pub mod router;
pub mod server;
pub mod session;
pub mod session_store;
pub mod topics;
pub mod traits;

#[cfg(test)]
mod test_support;

pub use broker::{Broker, ConnectOutcome, DisconnectReason, SessionKey};
pub use client::ClientId;
pub use config::BrokerConfig;
pub use error::BrokerError;
pub use message::Message;
pub use protocol::packets::Packet;
pub use protocol::{PacketType, ProtocolError, QoS};
pub use retained::{RetainedMessage, RetainedStore};
pub use server::{CloseReason, Connection, ConnectionState, Step};
pub use session_store::SessionStore;
pub use traits::{Access, AllowAll, Authorizer, ClientLink, TimeSource};

pub type Result<T, E = BrokerError> = core::result::Result<T, E>;
