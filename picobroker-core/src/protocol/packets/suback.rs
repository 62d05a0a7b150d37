use bytes::{BufMut, BytesMut};

use crate::protocol::packets::{PacketEncoder, PacketTypeConst};
use crate::protocol::qos::QoS;
use crate::protocol::utils::read_packet_id;
use crate::protocol::{PacketType, ProtocolError};

pub const SUBACK_FAILURE: u8 = 0x80;

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum SubAckReturnCode {
    /// Maximum QoS granted for the filter.
    Success(QoS),
    Failure,
}

impl SubAckReturnCode {
    pub const fn to_u8(self) -> u8 {
        match self {
            SubAckReturnCode::Success(qos) => qos as u8,
            SubAckReturnCode::Failure => SUBACK_FAILURE,
        }
    }

    pub fn from_u8(code: u8) -> Result<Self, ProtocolError> {
        match code {
            SUBACK_FAILURE => Ok(SubAckReturnCode::Failure),
            0..=2 => Ok(SubAckReturnCode::Success(QoS::from_u8(code)?)),
            _ => Err(ProtocolError::InvalidSubAckReturnCode { code }),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubAckPacket {
    pub packet_id: u16,
    /// One entry per filter of the SUBSCRIBE, in the same order.
    pub return_codes: Vec<SubAckReturnCode>,
}

impl PacketTypeConst for SubAckPacket {
    const PACKET_TYPE: PacketType = PacketType::SubAck;
}

impl PacketEncoder for SubAckPacket {
    fn encode_body(&self, buffer: &mut BytesMut) -> Result<(), ProtocolError> {
        buffer.put_u16(self.packet_id);
        for code in &self.return_codes {
            buffer.put_u8(code.to_u8());
        }
        Ok(())
    }

    fn decode_body(body: &[u8], _flags: u8) -> Result<Self, ProtocolError> {
        let mut offset = 0;
        let packet_id = read_packet_id(body, &mut offset)?;
        let return_codes = body[offset..]
            .iter()
            .map(|code| SubAckReturnCode::from_u8(*code))
            .collect::<Result<Vec<_>, _>>()?;
        if return_codes.is_empty() {
            return Err(ProtocolError::EmptySubscription);
        }
        Ok(Self {
            packet_id,
            return_codes,
        })
    }
}
