mod connack;
mod connect;
mod disconnect;
mod pingreq;
mod pingresp;
mod puback;
mod pubcomp;
mod publish;
mod pubrec;
mod pubrel;
mod suback;
mod subscribe;
mod unsuback;
mod unsubscribe;

pub use crate::protocol::packets::connack::{ConnAckPacket, ConnectReturnCode};
pub use crate::protocol::packets::connect::{ConnectFlags, ConnectPacket, LastWill, PROTOCOL_LEVEL, PROTOCOL_NAME};
pub use crate::protocol::packets::disconnect::DisconnectPacket;
pub use crate::protocol::packets::pingreq::PingReqPacket;
pub use crate::protocol::packets::pingresp::PingRespPacket;
pub use crate::protocol::packets::puback::PubAckPacket;
pub use crate::protocol::packets::pubcomp::PubCompPacket;
pub use crate::protocol::packets::publish::PublishPacket;
pub use crate::protocol::packets::pubrec::PubRecPacket;
pub use crate::protocol::packets::pubrel::PubRelPacket;
pub use crate::protocol::packets::suback::{SubAckPacket, SubAckReturnCode};
pub use crate::protocol::packets::subscribe::{SubscribePacket, SubscriptionRequest};
pub use crate::protocol::packets::unsuback::UnsubAckPacket;
pub use crate::protocol::packets::unsubscribe::UnsubscribePacket;

use bytes::{BufMut, BytesMut};

use crate::protocol::utils::{read_packet_id, read_variable_length, variable_length_length, write_variable_length};
use crate::protocol::{PacketType, ProtocolError};

pub trait PacketTypeConst {
    const PACKET_TYPE: PacketType;
}

/// Wire codec of a single control packet.
///
/// Implementors only deal with the variable header and payload; the fixed
/// header is produced by [`PacketEncoder::encode`] and consumed by
/// [`Packet::decode`].
pub trait PacketEncoder: PacketTypeConst + Sized {
    fn fixed_flags(&self) -> u8 {
        Self::PACKET_TYPE.fixed_flags().unwrap_or(0)
    }

    fn header_first_byte(&self) -> u8 {
        (Self::PACKET_TYPE as u8) << 4 | (self.fixed_flags() & 0x0F)
    }

    fn encode_body(&self, buffer: &mut BytesMut) -> Result<(), ProtocolError>;

    /// `flags` is the low nibble of the fixed header, already validated for
    /// every packet type except PUBLISH.
    fn decode_body(body: &[u8], flags: u8) -> Result<Self, ProtocolError>;

    fn encode(&self, buffer: &mut BytesMut) -> Result<(), ProtocolError> {
        let mut body = BytesMut::new();
        self.encode_body(&mut body)?;
        buffer.reserve(1 + variable_length_length(body.len()) + body.len());
        buffer.put_u8(self.header_first_byte());
        write_variable_length(body.len(), buffer)?;
        buffer.extend_from_slice(&body);
        Ok(())
    }
}

/// Decodes a body made of exactly one packet identifier (the PUBACK family).
pub(crate) fn decode_packet_id_body(body: &[u8]) -> Result<u16, ProtocolError> {
    if body.len() != 2 {
        return Err(ProtocolError::InvalidPacketLength {
            expected: 2,
            actual: body.len(),
        });
    }
    let mut offset = 0;
    read_packet_id(body, &mut offset)
}

pub(crate) fn decode_empty_body(body: &[u8]) -> Result<(), ProtocolError> {
    if !body.is_empty() {
        return Err(ProtocolError::InvalidPacketLength {
            expected: 0,
            actual: body.len(),
        });
    }
    Ok(())
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Packet {
    Connect(ConnectPacket),
    ConnAck(ConnAckPacket),
    Publish(PublishPacket),
    PubAck(PubAckPacket),
    PubRec(PubRecPacket),
    PubRel(PubRelPacket),
    PubComp(PubCompPacket),
    Subscribe(SubscribePacket),
    SubAck(SubAckPacket),
    Unsubscribe(UnsubscribePacket),
    UnsubAck(UnsubAckPacket),
    PingReq(PingReqPacket),
    PingResp(PingRespPacket),
    Disconnect(DisconnectPacket),
}

macro_rules! impl_from_packet {
    ($($variant:ident($packet:ty)),* $(,)?) => {
        $(
            impl From<$packet> for Packet {
                fn from(packet: $packet) -> Self {
                    Packet::$variant(packet)
                }
            }
        )*
    };
}

impl_from_packet!(
    Connect(ConnectPacket),
    ConnAck(ConnAckPacket),
    Publish(PublishPacket),
    PubAck(PubAckPacket),
    PubRec(PubRecPacket),
    PubRel(PubRelPacket),
    PubComp(PubCompPacket),
    Subscribe(SubscribePacket),
    SubAck(SubAckPacket),
    Unsubscribe(UnsubscribePacket),
    UnsubAck(UnsubAckPacket),
    PingReq(PingReqPacket),
    PingResp(PingRespPacket),
    Disconnect(DisconnectPacket),
);

impl Packet {
    pub fn packet_type(&self) -> PacketType {
        match self {
            Packet::Connect(_) => PacketType::Connect,
            Packet::ConnAck(_) => PacketType::ConnAck,
            Packet::Publish(_) => PacketType::Publish,
            Packet::PubAck(_) => PacketType::PubAck,
            Packet::PubRec(_) => PacketType::PubRec,
            Packet::PubRel(_) => PacketType::PubRel,
            Packet::PubComp(_) => PacketType::PubComp,
            Packet::Subscribe(_) => PacketType::Subscribe,
            Packet::SubAck(_) => PacketType::SubAck,
            Packet::Unsubscribe(_) => PacketType::Unsubscribe,
            Packet::UnsubAck(_) => PacketType::UnsubAck,
            Packet::PingReq(_) => PacketType::PingReq,
            Packet::PingResp(_) => PacketType::PingResp,
            Packet::Disconnect(_) => PacketType::Disconnect,
        }
    }

    /// Attempts to decode one packet from the front of `bytes`.
    ///
    /// Returns `Ok(None)` when more bytes are needed, or the packet together
    /// with the number of bytes it consumed. A packet whose announced size
    /// exceeds `max_packet_size` is rejected as soon as its fixed header is
    /// readable, without waiting for the body.
    pub fn decode(bytes: &[u8], max_packet_size: usize) -> Result<Option<(Packet, usize)>, ProtocolError> {
        let Some(&first_byte) = bytes.first() else {
            return Ok(None);
        };
        let packet_type = match PacketType::from_u8(first_byte) {
            Some(PacketType::Reserved) | Some(PacketType::Reserved2) | None => {
                return Err(ProtocolError::InvalidPacketType {
                    packet_type: first_byte >> 4,
                })
            }
            Some(packet_type) => packet_type,
        };
        let flags = first_byte & 0x0F;
        if let Some(expected) = packet_type.fixed_flags() {
            if flags != expected {
                return Err(ProtocolError::InvalidFixedHeaderFlags {
                    packet_type: packet_type.name(),
                    expected,
                    actual: flags,
                });
            }
        }

        let Some((remaining_length, length_bytes)) = read_variable_length(&bytes[1..])? else {
            return Ok(None);
        };
        let header_len = 1 + length_bytes;
        let total_len = header_len + remaining_length;
        if total_len > max_packet_size {
            return Err(ProtocolError::PacketTooLarge {
                max_size: max_packet_size,
                actual_size: total_len,
            });
        }
        if bytes.len() < total_len {
            return Ok(None);
        }

        let body = &bytes[header_len..total_len];
        let packet = match packet_type {
            PacketType::Connect => Packet::Connect(ConnectPacket::decode_body(body, flags)?),
            PacketType::ConnAck => Packet::ConnAck(ConnAckPacket::decode_body(body, flags)?),
            PacketType::Publish => Packet::Publish(PublishPacket::decode_body(body, flags)?),
            PacketType::PubAck => Packet::PubAck(PubAckPacket::decode_body(body, flags)?),
            PacketType::PubRec => Packet::PubRec(PubRecPacket::decode_body(body, flags)?),
            PacketType::PubRel => Packet::PubRel(PubRelPacket::decode_body(body, flags)?),
            PacketType::PubComp => Packet::PubComp(PubCompPacket::decode_body(body, flags)?),
            PacketType::Subscribe => Packet::Subscribe(SubscribePacket::decode_body(body, flags)?),
            PacketType::SubAck => Packet::SubAck(SubAckPacket::decode_body(body, flags)?),
            PacketType::Unsubscribe => Packet::Unsubscribe(UnsubscribePacket::decode_body(body, flags)?),
            PacketType::UnsubAck => Packet::UnsubAck(UnsubAckPacket::decode_body(body, flags)?),
            PacketType::PingReq => Packet::PingReq(PingReqPacket::decode_body(body, flags)?),
            PacketType::PingResp => Packet::PingResp(PingRespPacket::decode_body(body, flags)?),
            PacketType::Disconnect => Packet::Disconnect(DisconnectPacket::decode_body(body, flags)?),
            PacketType::Reserved | PacketType::Reserved2 => {
                return Err(ProtocolError::InvalidPacketType {
                    packet_type: packet_type as u8,
                })
            }
        };
        Ok(Some((packet, total_len)))
    }

    pub fn encode(&self, buffer: &mut BytesMut) -> Result<(), ProtocolError> {
        match self {
            Packet::Connect(packet) => packet.encode(buffer),
            Packet::ConnAck(packet) => packet.encode(buffer),
            Packet::Publish(packet) => packet.encode(buffer),
            Packet::PubAck(packet) => packet.encode(buffer),
            Packet::PubRec(packet) => packet.encode(buffer),
            Packet::PubRel(packet) => packet.encode(buffer),
            Packet::PubComp(packet) => packet.encode(buffer),
            Packet::Subscribe(packet) => packet.encode(buffer),
            Packet::SubAck(packet) => packet.encode(buffer),
            Packet::Unsubscribe(packet) => packet.encode(buffer),
            Packet::UnsubAck(packet) => packet.encode(buffer),
            Packet::PingReq(packet) => packet.encode(buffer),
            Packet::PingResp(packet) => packet.encode(buffer),
            Packet::Disconnect(packet) => packet.encode(buffer),
        }
    }

    /// Encodes into a fresh buffer.
    pub fn to_bytes(&self) -> Result<bytes::Bytes, ProtocolError> {
        let mut buffer = BytesMut::new();
        self.encode(&mut buffer)?;
        Ok(buffer.freeze())
    }
}
