use bytes::{BufMut, BytesMut};

use crate::protocol::packets::{PacketEncoder, PacketTypeConst};
use crate::protocol::{PacketType, ProtocolError};

#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectReturnCode {
    Accepted = 0,
    UnacceptableProtocolVersion = 1,
    IdentifierRejected = 2,
    ServerUnavailable = 3,
    BadUserNameOrPassword = 4,
    NotAuthorized = 5,
}

impl TryFrom<u8> for ConnectReturnCode {
    type Error = ProtocolError;

    fn try_from(code: u8) -> Result<Self, Self::Error> {
        match code {
            0 => Ok(ConnectReturnCode::Accepted),
            1 => Ok(ConnectReturnCode::UnacceptableProtocolVersion),
            2 => Ok(ConnectReturnCode::IdentifierRejected),
            3 => Ok(ConnectReturnCode::ServerUnavailable),
            4 => Ok(ConnectReturnCode::BadUserNameOrPassword),
            5 => Ok(ConnectReturnCode::NotAuthorized),
            _ => Err(ProtocolError::InvalidConnectReturnCode { return_code: code }),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnAckPacket {
    pub session_present: bool,
    pub return_code: ConnectReturnCode,
}

impl PacketTypeConst for ConnAckPacket {
    const PACKET_TYPE: PacketType = PacketType::ConnAck;
}

impl PacketEncoder for ConnAckPacket {
    fn encode_body(&self, buffer: &mut BytesMut) -> Result<(), ProtocolError> {
        buffer.put_u8(u8::from(self.session_present));
        buffer.put_u8(self.return_code as u8);
        Ok(())
    }

    fn decode_body(body: &[u8], _flags: u8) -> Result<Self, ProtocolError> {
        if body.len() != 2 {
            return Err(ProtocolError::InvalidPacketLength {
                expected: 2,
                actual: body.len(),
            });
        }
        let session_present = match body[0] {
            0 => false,
            1 => true,
            flag => return Err(ProtocolError::InvalidSessionPresentFlag { flag }),
        };
        Ok(Self {
            session_present,
            return_code: ConnectReturnCode::try_from(body[1])?,
        })
    }
}
