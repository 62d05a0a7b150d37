use bytes::BytesMut;

use crate::protocol::packets::{decode_empty_body, PacketEncoder, PacketTypeConst};
use crate::protocol::{PacketType, ProtocolError};

/// Keep-alive probe from the client.
#[derive(Debug, Copy, Clone, Default, PartialEq, Eq)]
pub struct PingReqPacket;

impl PacketTypeConst for PingReqPacket {
    const PACKET_TYPE: PacketType = PacketType::PingReq;
}

impl PacketEncoder for PingReqPacket {
    fn encode_body(&self, _buffer: &mut BytesMut) -> Result<(), ProtocolError> {
        Ok(())
    }

    fn decode_body(body: &[u8], _flags: u8) -> Result<Self, ProtocolError> {
        decode_empty_body(body)?;
        Ok(Self)
    }
}
