//! Server-side protocol handling
//!
//! Runtime-independent part of a client connection: the MQTT state machine a
//! transport task feeds with decoded packets.

pub mod connection;

pub use connection::{CloseReason, Connection, ConnectionState, Step};
