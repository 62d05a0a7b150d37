use bytes::{BufMut, Bytes, BytesMut};

use crate::protocol::packets::{PacketEncoder, PacketTypeConst};
use crate::protocol::qos::QoS;
use crate::protocol::utils::{read_packet_id, read_string, write_string};
use crate::protocol::{PacketType, ProtocolError};
use crate::topics::validate_topic_name;

#[derive(Debug, Copy, Clone, Eq, PartialEq)]
struct PublishFlags {
    pub dup: bool,
    pub qos: QoS,
    pub retain: bool,
}

impl PublishFlags {
    pub const fn to_nibble(self) -> u8 {
        let dup = if self.dup { 1u8 } else { 0u8 };
        let retain = if self.retain { 1u8 } else { 0u8 };
        (dup << 3) | ((self.qos as u8) << 1) | retain
    }

    pub fn from_nibble(nibble: u8) -> Result<Self, ProtocolError> {
        let flags = PublishFlags {
            dup: (nibble & 0b1000) != 0,
            qos: QoS::from_u8((nibble >> 1) & 0b11)?,
            retain: (nibble & 0b0001) != 0,
        };
        if flags.dup && flags.qos == QoS::AtMostOnce {
            return Err(ProtocolError::DupOnQos0);
        }
        Ok(flags)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PublishPacket {
    pub topic: String,
    /// Present exactly when `qos` is above [`QoS::AtMostOnce`].
    pub packet_id: Option<u16>,
    pub payload: Bytes,
    pub qos: QoS,
    pub dup: bool,
    pub retain: bool,
}

impl PacketTypeConst for PublishPacket {
    const PACKET_TYPE: PacketType = PacketType::Publish;
}

impl PacketEncoder for PublishPacket {
    fn fixed_flags(&self) -> u8 {
        PublishFlags {
            dup: self.dup,
            qos: self.qos,
            retain: self.retain,
        }
        .to_nibble()
    }

    fn encode_body(&self, buffer: &mut BytesMut) -> Result<(), ProtocolError> {
        write_string(&self.topic, buffer)?;
        if self.qos != QoS::AtMostOnce {
            let packet_id = self.packet_id.filter(|id| *id != 0).ok_or(ProtocolError::MissingPacketId)?;
            buffer.put_u16(packet_id);
        }
        buffer.extend_from_slice(&self.payload);
        Ok(())
    }

    fn decode_body(body: &[u8], flags: u8) -> Result<Self, ProtocolError> {
        let flags = PublishFlags::from_nibble(flags)?;
        let mut offset = 0;

        let topic = read_string(body, &mut offset, "topic name")?;
        validate_topic_name(&topic)?;

        let packet_id = if flags.qos != QoS::AtMostOnce {
            Some(read_packet_id(body, &mut offset)?)
        } else {
            None
        };

        Ok(Self {
            topic,
            packet_id,
            payload: Bytes::copy_from_slice(&body[offset..]),
            qos: flags.qos,
            dup: flags.dup,
            retain: flags.retain,
        })
    }
}

impl core::fmt::Display for PublishPacket {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(
            f,
            "PUBLISH topic={} packet_id={:?} qos={} dup={} retain={} payload={}B",
            self.topic,
            self.packet_id,
            self.qos,
            self.dup,
            self.retain,
            self.payload.len()
        )
    }
}
