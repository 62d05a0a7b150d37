use thiserror::Error;

use crate::topics::TopicError;

/// Errors raised while decoding or encoding MQTT control packets.
///
/// Every variant is a protocol violation: the connection that produced the
/// bytes is closed without a response.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProtocolError {
    #[error("invalid packet type: {packet_type}")]
    InvalidPacketType { packet_type: u8 },

    #[error("invalid fixed header flags for {packet_type}: expected {expected:#06b}, got {actual:#06b}")]
    InvalidFixedHeaderFlags {
        packet_type: &'static str,
        expected: u8,
        actual: u8,
    },

    #[error("invalid remaining length encoding")]
    InvalidLengthEncoding,

    #[error("packet too large: {actual_size} bytes exceeds the limit of {max_size}")]
    PacketTooLarge { max_size: usize, actual_size: usize },

    #[error("invalid packet length: expected {expected}, got {actual}")]
    InvalidPacketLength { expected: usize, actual: usize },

    #[error("packet ended while reading {field}")]
    UnexpectedEof { field: &'static str },

    #[error("{0} bytes left over after the packet payload")]
    TrailingBytes(usize),

    #[error("invalid UTF-8 string")]
    InvalidUtf8String,

    #[error("string of {0} bytes does not fit a two-byte length prefix")]
    StringTooLong(usize),

    #[error("invalid protocol name in CONNECT")]
    InvalidProtocolName,

    #[error("invalid connect flags: {flags:#010b}")]
    InvalidConnectFlags { flags: u8 },

    #[error("invalid connect return code: {return_code}")]
    InvalidConnectReturnCode { return_code: u8 },

    #[error("invalid session present flag: {flag:#04x}")]
    InvalidSessionPresentFlag { flag: u8 },

    #[error("invalid QoS level: {level}")]
    InvalidQosLevel { level: u8 },

    #[error("DUP flag set on a QoS 0 PUBLISH")]
    DupOnQos0,

    #[error("packet identifier must be non-zero")]
    MissingPacketId,

    #[error("invalid topic: {0}")]
    InvalidTopic(#[from] TopicError),

    #[error("SUBSCRIBE or UNSUBSCRIBE without any topic filter")]
    EmptySubscription,

    #[error("invalid SUBACK return code: {code:#04x}")]
    InvalidSubAckReturnCode { code: u8 },
}
