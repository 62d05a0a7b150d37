use std::collections::HashMap;

use bytes::Bytes;
use log::debug;
use parking_lot::RwLock;

use crate::message::Message;
use crate::protocol::qos::QoS;
use crate::topics;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetainedMessage {
    pub topic: String,
    pub payload: Bytes,
    pub qos: QoS,
}

impl RetainedMessage {
    /// The message as sent to a new subscriber granted `granted`.
    pub fn to_message(&self, granted: QoS) -> Message {
        Message {
            topic: self.topic.clone(),
            payload: self.payload.clone(),
            qos: self.qos.min(granted),
            retain: true,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetainUpdate {
    Stored,
    Cleared,
    /// Empty payload for a topic with nothing retained.
    Unchanged,
}

/// Last retained message per exact topic, behind one reader-writer lock.
#[derive(Debug, Default)]
pub struct RetainedStore {
    messages: RwLock<HashMap<String, RetainedMessage>>,
}

impl RetainedStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Applies a PUBLISH carrying the retain flag: an empty payload clears the
    /// topic, anything else replaces what was there.
    pub fn apply(&self, message: &Message) -> RetainUpdate {
        let mut messages = self.messages.write();
        if message.payload.is_empty() {
            return match messages.remove(&message.topic) {
                Some(_) => {
                    debug!("Cleared retained message on {}", message.topic);
                    RetainUpdate::Cleared
                }
                None => RetainUpdate::Unchanged,
            };
        }
        messages.insert(
            message.topic.clone(),
            RetainedMessage {
                topic: message.topic.clone(),
                payload: message.payload.clone(),
                qos: message.qos,
            },
        );
        RetainUpdate::Stored
    }

    pub fn get(&self, topic: &str) -> Option<RetainedMessage> {
        self.messages.read().get(topic).cloned()
    }

    /// Retained messages whose topic matches `filter`, wildcards included.
    pub fn matching(&self, filter: &str) -> Vec<RetainedMessage> {
        self.messages
            .read()
            .values()
            .filter(|retained| topics::matches(filter, &retained.topic))
            .cloned()
            .collect()
    }

    pub fn len(&self) -> usize {
        self.messages.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.read().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn retained(topic: &str, payload: &'static [u8], qos: QoS) -> Message {
        Message::new(topic, payload, qos, true)
    }

    #[test]
    fn test_latest_message_wins() {
        let store = RetainedStore::new();
        assert_eq!(store.apply(&retained("a", b"1", QoS::AtMostOnce)), RetainUpdate::Stored);
        assert_eq!(store.apply(&retained("a", b"2", QoS::AtLeastOnce)), RetainUpdate::Stored);
        let message = store.get("a").unwrap();
        assert_eq!(&message.payload[..], b"2");
        assert_eq!(message.qos, QoS::AtLeastOnce);
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn test_empty_payload_clears() {
        let store = RetainedStore::new();
        store.apply(&retained("a", b"1", QoS::AtMostOnce));
        assert_eq!(store.apply(&retained("a", b"", QoS::AtMostOnce)), RetainUpdate::Cleared);
        assert_eq!(store.apply(&retained("a", b"", QoS::AtMostOnce)), RetainUpdate::Unchanged);
        assert!(store.is_empty());
    }

    #[test]
    fn test_matching_uses_wildcards() {
        let store = RetainedStore::new();
        store.apply(&retained("home/kitchen/temp", b"21", QoS::AtLeastOnce));
        store.apply(&retained("home/bedroom/temp", b"19", QoS::AtMostOnce));
        store.apply(&retained("office/temp", b"23", QoS::AtMostOnce));

        let mut topics: Vec<String> = store.matching("home/+/temp").into_iter().map(|m| m.topic).collect();
        topics.sort();
        assert_eq!(topics, vec!["home/bedroom/temp", "home/kitchen/temp"]);
        assert_eq!(store.matching("#").len(), 3);
        assert!(store.matching("garage/#").is_empty());
    }

    #[test]
    fn test_delivery_qos_is_downgraded() {
        let store = RetainedStore::new();
        store.apply(&retained("a", b"1", QoS::ExactlyOnce));
        let message = store.get("a").unwrap().to_message(QoS::AtLeastOnce);
        assert_eq!(message.qos, QoS::AtLeastOnce);
        assert!(message.retain);
    }
}
