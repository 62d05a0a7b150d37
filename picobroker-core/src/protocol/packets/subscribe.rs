use bytes::{BufMut, BytesMut};

use crate::protocol::packets::{PacketEncoder, PacketTypeConst};
use crate::protocol::qos::QoS;
use crate::protocol::utils::{read_packet_id, read_string, read_u8, write_string};
use crate::protocol::{PacketType, ProtocolError};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubscriptionRequest {
    pub filter: String,
    pub qos: QoS,
}

/// Filters are kept as sent; their syntax is checked per filter by the
/// broker so that one bad filter only fails its own SUBACK slot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubscribePacket {
    pub packet_id: u16,
    pub subscriptions: Vec<SubscriptionRequest>,
}

impl PacketTypeConst for SubscribePacket {
    const PACKET_TYPE: PacketType = PacketType::Subscribe;
}

impl PacketEncoder for SubscribePacket {
    fn encode_body(&self, buffer: &mut BytesMut) -> Result<(), ProtocolError> {
        buffer.put_u16(self.packet_id);
        for subscription in &self.subscriptions {
            write_string(&subscription.filter, buffer)?;
            buffer.put_u8(subscription.qos as u8);
        }
        Ok(())
    }

    fn decode_body(body: &[u8], _flags: u8) -> Result<Self, ProtocolError> {
        let mut offset = 0;
        let packet_id = read_packet_id(body, &mut offset)?;

        let mut subscriptions = Vec::new();
        while offset < body.len() {
            let filter = read_string(body, &mut offset, "topic filter")?;
            let options = read_u8(body, &mut offset, "requested QoS")?;
            // Upper six bits are reserved.
            if options & 0b1111_1100 != 0 {
                return Err(ProtocolError::InvalidQosLevel { level: options });
            }
            subscriptions.push(SubscriptionRequest {
                filter,
                qos: QoS::from_u8(options)?,
            });
        }
        if subscriptions.is_empty() {
            return Err(ProtocolError::EmptySubscription);
        }

        Ok(Self {
            packet_id,
            subscriptions,
        })
    }
}
