use bytes::Bytes;

use crate::protocol::packets::{LastWill, PublishPacket};
use crate::protocol::qos::QoS;

/// An application message travelling through the broker, detached from the
/// packet it arrived in.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    pub topic: String,
    pub payload: Bytes,
    pub qos: QoS,
    pub retain: bool,
}

impl Message {
    pub fn new(topic: impl Into<String>, payload: impl Into<Bytes>, qos: QoS, retain: bool) -> Self {
        Self {
            topic: topic.into(),
            payload: payload.into(),
            qos,
            retain,
        }
    }

    /// Copy of this message as delivered to one subscriber.
    pub fn for_delivery(&self, qos: QoS, retain: bool) -> Self {
        Self {
            topic: self.topic.clone(),
            payload: self.payload.clone(),
            qos,
            retain,
        }
    }

    pub fn to_publish(&self, packet_id: Option<u16>, dup: bool) -> PublishPacket {
        PublishPacket {
            topic: self.topic.clone(),
            packet_id,
            payload: self.payload.clone(),
            qos: self.qos,
            dup,
            retain: self.retain,
        }
    }
}

impl From<PublishPacket> for Message {
    fn from(publish: PublishPacket) -> Self {
        Self {
            topic: publish.topic,
            payload: publish.payload,
            qos: publish.qos,
            retain: publish.retain,
        }
    }
}

impl From<LastWill> for Message {
    fn from(will: LastWill) -> Self {
        Self {
            topic: will.topic,
            payload: will.payload,
            qos: will.qos,
            retain: will.retain,
        }
    }
}
