use bytes::BytesMut;

use crate::protocol::packets::{decode_empty_body, PacketEncoder, PacketTypeConst};
use crate::protocol::{PacketType, ProtocolError};

/// Server answer to PINGREQ.
#[derive(Debug, Copy, Clone, Default, PartialEq, Eq)]
pub struct PingRespPacket;

impl PacketTypeConst for PingRespPacket {
    const PACKET_TYPE: PacketType = PacketType::PingResp;
}

impl PacketEncoder for PingRespPacket {
    fn encode_body(&self, _buffer: &mut BytesMut) -> Result<(), ProtocolError> {
        Ok(())
    }

    fn decode_body(body: &[u8], _flags: u8) -> Result<Self, ProtocolError> {
        decode_empty_body(body)?;
        Ok(Self)
    }
}
