use bytes::{BufMut, BytesMut};

use crate::protocol::packets::{PacketEncoder, PacketTypeConst};
use crate::protocol::utils::{read_packet_id, read_string, write_string};
use crate::protocol::{PacketType, ProtocolError};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnsubscribePacket {
    pub packet_id: u16,
    pub filters: Vec<String>,
}

impl PacketTypeConst for UnsubscribePacket {
    const PACKET_TYPE: PacketType = PacketType::Unsubscribe;
}

impl PacketEncoder for UnsubscribePacket {
    fn encode_body(&self, buffer: &mut BytesMut) -> Result<(), ProtocolError> {
        buffer.put_u16(self.packet_id);
        for filter in &self.filters {
            write_string(filter, buffer)?;
        }
        Ok(())
    }

    fn decode_body(body: &[u8], _flags: u8) -> Result<Self, ProtocolError> {
        let mut offset = 0;
        let packet_id = read_packet_id(body, &mut offset)?;
        let mut filters = Vec::new();
        while offset < body.len() {
            filters.push(read_string(body, &mut offset, "topic filter")?);
        }
        if filters.is_empty() {
            return Err(ProtocolError::EmptySubscription);
        }
        Ok(Self { packet_id, filters })
    }
}
