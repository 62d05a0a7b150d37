//! Error types for the Tokio server

use std::io;

use picobroker_core::{BrokerError, ProtocolError};
use thiserror::Error;
use tokio_tungstenite::tungstenite;

#[derive(Debug, Error)]
pub enum ServerError {
    #[error("failed to bind {addr}: {source}")]
    Bind {
        addr: String,
        #[source]
        source: io::Error,
    },

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    #[error(transparent)]
    Broker(#[from] BrokerError),

    #[error("websocket error: {0}")]
    WebSocket(#[from] tungstenite::Error),

    /// MQTT over WebSocket is carried in binary frames only.
    #[error("text frame received on an MQTT websocket")]
    UnexpectedTextFrame,

    #[error("connection closed in the middle of a packet ({buffered} bytes buffered)")]
    TruncatedPacket { buffered: usize },

    #[error("websocket handshake timed out")]
    HandshakeTimeout,
}

pub type Result<T, E = ServerError> = std::result::Result<T, E>;
