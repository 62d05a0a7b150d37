use bytes::{BufMut, BytesMut};

use crate::protocol::packets::{decode_packet_id_body, PacketEncoder, PacketTypeConst};
use crate::protocol::{PacketType, ProtocolError};

/// Acknowledges a QoS 1 PUBLISH.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct PubAckPacket {
    pub packet_id: u16,
}

impl PacketTypeConst for PubAckPacket {
    const PACKET_TYPE: PacketType = PacketType::PubAck;
}

impl PacketEncoder for PubAckPacket {
    fn encode_body(&self, buffer: &mut BytesMut) -> Result<(), ProtocolError> {
        buffer.put_u16(self.packet_id);
        Ok(())
    }

    fn decode_body(body: &[u8], _flags: u8) -> Result<Self, ProtocolError> {
        Ok(Self {
            packet_id: decode_packet_id_body(body)?,
        })
    }
}
