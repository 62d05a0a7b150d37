use bytes::{BufMut, Bytes, BytesMut};

use crate::protocol::packets::{PacketEncoder, PacketTypeConst};
use crate::protocol::qos::QoS;
use crate::protocol::utils::{copy_bytes, read_binary, read_string, read_u16, read_u8, write_binary, write_string};
use crate::protocol::{PacketType, ProtocolError};
use crate::topics::validate_topic_name;

pub const PROTOCOL_NAME: &str = "MQTT";
/// MQTT 3.1.1
pub const PROTOCOL_LEVEL: u8 = 4;
/// Protocol name used by MQTT 3.1 clients. Decoded so the broker can answer
/// with "unacceptable protocol version" instead of dropping the socket.
const LEGACY_PROTOCOL_NAME: &str = "MQIsdp";

#[derive(Clone, Copy, PartialEq, Eq, Debug, Default)]
pub struct ConnectFlags(u8);

impl ConnectFlags {
    pub const RESERVED: Self = Self(0b_0000_0001);
    pub const CLEAN_SESSION: Self = Self(0b_0000_0010);
    pub const WILL_FLAG: Self = Self(0b_0000_0100);
    pub const WILL_QOS_1: Self = Self(0b_0000_1000);
    pub const WILL_QOS_2: Self = Self(0b_0001_0000);
    pub const WILL_RETAIN: Self = Self(0b_0010_0000);
    pub const PASSWORD: Self = Self(0b_0100_0000);
    pub const USERNAME: Self = Self(0b_1000_0000);

    pub const fn empty() -> Self {
        Self(0)
    }
    pub const fn from_bits(bits: u8) -> Self {
        Self(bits)
    }
    pub const fn bits(self) -> u8 {
        self.0
    }
    pub const fn contains(self, other: Self) -> bool {
        (self.0 & other.0) == other.0
    }
    pub fn insert(&mut self, other: Self) {
        self.0 |= other.0;
    }
    pub const fn will_qos_bits(self) -> u8 {
        (self.0 >> 3) & 0b11
    }
}

/// Message the broker publishes on behalf of a client whose connection ends
/// without a DISCONNECT.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LastWill {
    pub topic: String,
    pub payload: Bytes,
    pub qos: QoS,
    pub retain: bool,
}

/// Fixed Header
///   byte 1:  0x10                      (type=1, flags=0000)
///   bytes :  Remaining Length (var-int)
///
/// Variable Header
///   Protocol Name      ("MQTT" as UTF-8 string)
///   Protocol Level     (0x04 for MQTT 3.1.1)
///   Connect Flags      (bitfield)
///   Keep Alive         (2 bytes)
///
/// Payload (order matters, some fields optional)
///   Client Identifier  (UTF-8 string)
///   Will Topic         (UTF-8 string)   [if Will Flag = 1]
///   Will Payload       (binary data)    [if Will Flag = 1]
///   User Name          (UTF-8 string)   [if User Name Flag = 1]
///   Password           (binary data)    [if Password Flag = 1]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectPacket {
    pub protocol_name: String,
    pub protocol_level: u8,
    pub clean_session: bool,
    pub keep_alive: u16,
    pub client_id: String,
    pub will: Option<LastWill>,
    pub username: Option<String>,
    pub password: Option<Bytes>,
}

impl ConnectPacket {
    /// A clean-session MQTT 3.1.1 CONNECT with no will or credentials.
    pub fn new(client_id: impl Into<String>, keep_alive: u16) -> Self {
        Self {
            protocol_name: PROTOCOL_NAME.to_owned(),
            protocol_level: PROTOCOL_LEVEL,
            clean_session: true,
            keep_alive,
            client_id: client_id.into(),
            will: None,
            username: None,
            password: None,
        }
    }

    pub fn flags(&self) -> ConnectFlags {
        let mut flags = ConnectFlags::empty();
        if self.clean_session {
            flags.insert(ConnectFlags::CLEAN_SESSION);
        }
        if let Some(will) = &self.will {
            flags.insert(ConnectFlags::WILL_FLAG);
            flags.insert(ConnectFlags::from_bits((will.qos as u8) << 3));
            if will.retain {
                flags.insert(ConnectFlags::WILL_RETAIN);
            }
        }
        if self.username.is_some() {
            flags.insert(ConnectFlags::USERNAME);
        }
        if self.password.is_some() {
            flags.insert(ConnectFlags::PASSWORD);
        }
        flags
    }
}

impl PacketTypeConst for ConnectPacket {
    const PACKET_TYPE: PacketType = PacketType::Connect;
}

impl PacketEncoder for ConnectPacket {
    fn encode_body(&self, buffer: &mut BytesMut) -> Result<(), ProtocolError> {
        write_string(&self.protocol_name, buffer)?;
        buffer.put_u8(self.protocol_level);
        buffer.put_u8(self.flags().bits());
        buffer.put_u16(self.keep_alive);

        write_string(&self.client_id, buffer)?;
        if let Some(will) = &self.will {
            write_string(&will.topic, buffer)?;
            write_binary(&will.payload, buffer)?;
        }
        if let Some(username) = &self.username {
            write_string(username, buffer)?;
        }
        if let Some(password) = &self.password {
            write_binary(password, buffer)?;
        }
        Ok(())
    }

    fn decode_body(body: &[u8], _flags: u8) -> Result<Self, ProtocolError> {
        let mut offset = 0;

        let protocol_name = read_string(body, &mut offset, "protocol name")?;
        if protocol_name != PROTOCOL_NAME && protocol_name != LEGACY_PROTOCOL_NAME {
            return Err(ProtocolError::InvalidProtocolName);
        }
        let protocol_level = read_u8(body, &mut offset, "protocol level")?;

        let flags = ConnectFlags::from_bits(read_u8(body, &mut offset, "connect flags")?);
        let invalid_flags = ProtocolError::InvalidConnectFlags { flags: flags.bits() };
        if flags.contains(ConnectFlags::RESERVED) {
            return Err(invalid_flags);
        }
        let will_flag = flags.contains(ConnectFlags::WILL_FLAG);
        if !will_flag && (flags.will_qos_bits() != 0 || flags.contains(ConnectFlags::WILL_RETAIN)) {
            return Err(invalid_flags);
        }
        if flags.contains(ConnectFlags::PASSWORD) && !flags.contains(ConnectFlags::USERNAME) {
            return Err(invalid_flags);
        }
        let will_qos = QoS::from_u8(flags.will_qos_bits()).map_err(|_| invalid_flags.clone())?;

        let keep_alive = read_u16(body, &mut offset, "keep alive")?;
        let client_id = read_string(body, &mut offset, "client identifier")?;

        let will = if will_flag {
            let topic = read_string(body, &mut offset, "will topic")?;
            validate_topic_name(&topic)?;
            let payload = copy_bytes(read_binary(body, &mut offset, "will payload")?);
            Some(LastWill {
                topic,
                payload,
                qos: will_qos,
                retain: flags.contains(ConnectFlags::WILL_RETAIN),
            })
        } else {
            None
        };

        let username = if flags.contains(ConnectFlags::USERNAME) {
            Some(read_string(body, &mut offset, "user name")?)
        } else {
            None
        };
        let password = if flags.contains(ConnectFlags::PASSWORD) {
            Some(copy_bytes(read_binary(body, &mut offset, "password")?))
        } else {
            None
        };

        if offset != body.len() {
            return Err(ProtocolError::TrailingBytes(body.len() - offset));
        }

        Ok(Self {
            protocol_name,
            protocol_level,
            clean_session: flags.contains(ConnectFlags::CLEAN_SESSION),
            keep_alive,
            client_id,
            will,
            username,
            password,
        })
    }
}
