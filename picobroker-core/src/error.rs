//! Error types for PicoBroker

use thiserror::Error;

use crate::client::ClientId;
use crate::protocol::{PacketType, ProtocolError};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BrokerError {
    /// The peer broke the wire format.
    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    /// A well-formed packet arrived in a state where it is not allowed.
    #[error("unexpected {packet_type} while {state}")]
    UnexpectedPacket {
        packet_type: PacketType,
        state: &'static str,
    },

    #[error("session {client_id} not found")]
    SessionNotFound { client_id: ClientId },

    /// The session is now attached to a newer connection.
    #[error("session {client_id} was taken over by another connection")]
    SessionTakenOver { client_id: ClientId },

    /// The connection is not draining its outbound queue fast enough.
    #[error("outbound queue of {client_id} is full ({capacity} packets)")]
    OutboundQueueFull { client_id: ClientId, capacity: usize },
}
