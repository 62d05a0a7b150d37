use bytes::BytesMut;

use crate::protocol::packets::{decode_empty_body, PacketEncoder, PacketTypeConst};
use crate::protocol::{PacketType, ProtocolError};

/// Graceful close. A client that sends it gives up its Last Will.
#[derive(Debug, Copy, Clone, Default, PartialEq, Eq)]
pub struct DisconnectPacket;

impl PacketTypeConst for DisconnectPacket {
    const PACKET_TYPE: PacketType = PacketType::Disconnect;
}

impl PacketEncoder for DisconnectPacket {
    fn encode_body(&self, _buffer: &mut BytesMut) -> Result<(), ProtocolError> {
        Ok(())
    }

    fn decode_body(body: &[u8], _flags: u8) -> Result<Self, ProtocolError> {
        decode_empty_body(body)?;
        Ok(Self)
    }
}
