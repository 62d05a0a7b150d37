use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;

use log::debug;

use crate::client::ClientId;
use crate::config::BrokerConfig;
use crate::error::BrokerError;
use crate::message::Message;
use crate::protocol::packets::{LastWill, Packet, PubRelPacket};
use crate::protocol::qos::QoS;
use crate::topics;
use crate::traits::ClientLink;

/// Where a QoS 1/2 exchange currently stands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InFlightState {
    /// Outgoing QoS 1, PUBLISH sent.
    AwaitingPuback,
    /// Outgoing QoS 2, PUBLISH sent.
    AwaitingPubrec,
    /// Outgoing QoS 2, PUBREL sent.
    AwaitingPubcomp,
    /// Incoming QoS 2, PUBREC sent.
    AwaitingPubrel,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InFlightMessage {
    pub packet_id: u16,
    pub message: Message,
    pub state: InFlightState,
}

/// What happened to a message handed to [`ClientSession::deliver`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
    /// Queued for the live connection.
    Sent,
    /// Held until the client reconnects or the in-flight window frees up.
    Queued,
    /// QoS 0 for an offline client, or nowhere to keep it.
    Dropped,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionLimits {
    pub max_inflight: usize,
    pub max_queued_messages: usize,
    pub max_outbound_packets: usize,
}

impl From<&BrokerConfig> for SessionLimits {
    fn from(config: &BrokerConfig) -> Self {
        Self {
            max_inflight: config.max_inflight,
            max_queued_messages: config.max_queued_messages,
            max_outbound_packets: config.max_outbound_packets,
        }
    }
}

struct Attachment {
    connection_id: u64,
    link: Arc<dyn ClientLink>,
}

impl core::fmt::Debug for Attachment {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Attachment")
            .field("connection_id", &self.connection_id)
            .finish_non_exhaustive()
    }
}

/// Broker-side state of one client id.
///
/// A session outlives its connections when `clean_session` is false. It is
/// always accessed under its own lock; see [`crate::session_store::SessionStore`].
#[derive(Debug)]
pub struct ClientSession {
    client_id: ClientId,
    clean_session: bool,
    keep_alive_secs: u16,
    subscriptions: HashMap<String, QoS>,
    /// Outgoing QoS 1/2 messages in send order.
    pending_deliveries: VecDeque<InFlightMessage>,
    /// Incoming QoS 2 messages keyed by the client's packet id.
    incoming_qos2: HashMap<u16, InFlightMessage>,
    queued_messages: VecDeque<Message>,
    outbound: VecDeque<Packet>,
    last_will: Option<LastWill>,
    attachment: Option<Attachment>,
    next_packet_id: u16,
    disconnected_at: Option<u64>,
    limits: SessionLimits,
}

impl ClientSession {
    pub fn new(client_id: ClientId, clean_session: bool, limits: SessionLimits) -> Self {
        Self {
            client_id,
            clean_session,
            keep_alive_secs: 0,
            subscriptions: HashMap::new(),
            pending_deliveries: VecDeque::new(),
            incoming_qos2: HashMap::new(),
            queued_messages: VecDeque::new(),
            outbound: VecDeque::new(),
            last_will: None,
            attachment: None,
            next_packet_id: 1,
            disconnected_at: None,
            limits,
        }
    }

    pub fn client_id(&self) -> &ClientId {
        &self.client_id
    }

    pub fn clean_session(&self) -> bool {
        self.clean_session
    }

    pub fn keep_alive_secs(&self) -> u16 {
        self.keep_alive_secs
    }

    pub fn disconnected_at(&self) -> Option<u64> {
        self.disconnected_at
    }

    // ===== CONNECTION LIFECYCLE =====

    pub fn attach(&mut self, connection_id: u64, link: Arc<dyn ClientLink>, keep_alive_secs: u16, will: Option<LastWill>) {
        self.attachment = Some(Attachment { connection_id, link });
        self.keep_alive_secs = keep_alive_secs;
        self.last_will = will;
        self.disconnected_at = None;
    }

    /// Detaches the current connection, if any, and returns its link.
    /// Packets not yet written are discarded; in-flight state is kept for
    /// retransmission.
    pub fn detach(&mut self, now_secs: u64) -> Option<Arc<dyn ClientLink>> {
        let attachment = self.attachment.take()?;
        self.outbound.clear();
        self.disconnected_at = Some(now_secs);
        Some(attachment.link)
    }

    pub fn is_connected(&self) -> bool {
        self.attachment.is_some()
    }

    pub fn is_attached_to(&self, connection_id: u64) -> bool {
        self.attachment
            .as_ref()
            .is_some_and(|attachment| attachment.connection_id == connection_id)
    }

    pub fn link(&self) -> Option<Arc<dyn ClientLink>> {
        self.attachment.as_ref().map(|attachment| attachment.link.clone())
    }

    pub fn take_will(&mut self) -> Option<LastWill> {
        self.last_will.take()
    }

    pub fn clear_will(&mut self) {
        self.last_will = None;
    }

    /// Offline for at least `expiry`.
    pub fn is_expired(&self, now_secs: u64, expiry: Duration) -> bool {
        !self.is_connected()
            && self
                .disconnected_at
                .is_some_and(|at| now_secs.saturating_sub(at) >= expiry.as_secs())
    }

    /// Re-sends every unacknowledged outgoing exchange after a reconnect,
    /// then releases queued messages into the freed window.
    ///
    /// Retransmissions are at most `max_inflight` packets and bypass the
    /// outbound bound, so a large in-flight set cannot overflow the queue of
    /// the connection that is resuming it.
    pub fn resume(&mut self) {
        let retransmissions: Vec<Packet> = self
            .pending_deliveries
            .iter()
            .map(|inflight| match inflight.state {
                InFlightState::AwaitingPubcomp => Packet::PubRel(PubRelPacket {
                    packet_id: inflight.packet_id,
                }),
                _ => Packet::Publish(inflight.message.to_publish(Some(inflight.packet_id), true)),
            })
            .collect();
        if !retransmissions.is_empty() {
            debug!("Retransmitting {} in-flight packets to {}", retransmissions.len(), self.client_id);
        }
        self.outbound.extend(retransmissions);
        self.release_queued();
    }

    // ===== SUBSCRIPTIONS =====

    /// Adds or replaces a subscription, returning the previously granted QoS.
    pub fn subscribe(&mut self, filter: &str, qos: QoS) -> Option<QoS> {
        self.subscriptions.insert(filter.to_owned(), qos)
    }

    pub fn unsubscribe(&mut self, filter: &str) -> bool {
        self.subscriptions.remove(filter).is_some()
    }

    pub fn subscriptions(&self) -> &HashMap<String, QoS> {
        &self.subscriptions
    }

    /// Highest QoS granted by any subscription matching `topic`.
    pub fn matching_qos(&self, topic: &str) -> Option<QoS> {
        self.subscriptions
            .iter()
            .filter(|(filter, _)| topics::matches(filter, topic))
            .map(|(_, qos)| *qos)
            .max()
    }

    // ===== OUTGOING MESSAGES =====

    pub fn push_outbound(&mut self, packet: Packet) -> Result<(), BrokerError> {
        if !self.has_outbound_room() {
            return Err(BrokerError::OutboundQueueFull {
                client_id: self.client_id.clone(),
                capacity: self.limits.max_outbound_packets,
            });
        }
        self.outbound.push_back(packet);
        Ok(())
    }

    pub fn has_outbound(&self) -> bool {
        !self.outbound.is_empty()
    }

    fn has_outbound_room(&self) -> bool {
        self.outbound.len() < self.limits.max_outbound_packets
    }

    /// Takes every packet waiting for the connection. Queued messages held
    /// back by a full outbound queue are released into the freed space.
    pub fn drain_outbound(&mut self) -> Vec<Packet> {
        let mut packets: Vec<Packet> = self.outbound.drain(..).collect();
        self.release_queued();
        packets.extend(self.outbound.drain(..));
        packets
    }

    /// Hands a message, already downgraded to its effective QoS, to this session.
    pub fn deliver(&mut self, message: Message) -> Result<Delivery, BrokerError> {
        if !self.is_connected() {
            if self.clean_session || message.qos == QoS::AtMostOnce {
                return Ok(Delivery::Dropped);
            }
            return Ok(self.enqueue(message));
        }

        if message.qos == QoS::AtMostOnce {
            self.push_outbound(Packet::Publish(message.to_publish(None, false)))?;
            return Ok(Delivery::Sent);
        }

        // Anything already waiting goes first.
        if !self.queued_messages.is_empty() || !self.has_inflight_room() {
            return Ok(self.enqueue(message));
        }
        match self.allocate_packet_id() {
            Some(packet_id) => {
                self.send_inflight(packet_id, message)?;
                Ok(Delivery::Sent)
            }
            None => Ok(self.enqueue(message)),
        }
    }

    fn enqueue(&mut self, message: Message) -> Delivery {
        if self.limits.max_queued_messages == 0 {
            return Delivery::Dropped;
        }
        if self.queued_messages.len() >= self.limits.max_queued_messages {
            if let Some(dropped) = self.queued_messages.pop_front() {
                debug!(
                    "Queue of {} is full, dropping oldest message on {}",
                    self.client_id, dropped.topic
                );
            }
        }
        self.queued_messages.push_back(message);
        Delivery::Queued
    }

    fn has_inflight_room(&self) -> bool {
        self.pending_deliveries.len() < self.limits.max_inflight
    }

    /// Next identifier not used by an outgoing exchange, or `None` when all
    /// 65535 are taken.
    fn allocate_packet_id(&mut self) -> Option<u16> {
        for _ in 0..u16::MAX {
            let candidate = self.next_packet_id;
            self.next_packet_id = if candidate == u16::MAX { 1 } else { candidate + 1 };
            if !self.pending_deliveries.iter().any(|inflight| inflight.packet_id == candidate) {
                return Some(candidate);
            }
        }
        None
    }

    /// Opens an outgoing exchange and returns the PUBLISH that starts it.
    fn record_inflight(&mut self, packet_id: u16, message: Message) -> Packet {
        let state = match message.qos {
            QoS::ExactlyOnce => InFlightState::AwaitingPubrec,
            _ => InFlightState::AwaitingPuback,
        };
        let publish = Packet::Publish(message.to_publish(Some(packet_id), false));
        self.pending_deliveries.push_back(InFlightMessage {
            packet_id,
            message,
            state,
        });
        publish
    }

    /// The exchange is recorded before its PUBLISH is queued. When the queue
    /// is full the error closes the connection, and the recorded exchange is
    /// retransmitted once the client resumes the session.
    fn send_inflight(&mut self, packet_id: u16, message: Message) -> Result<(), BrokerError> {
        let publish = self.record_inflight(packet_id, message);
        self.push_outbound(publish)
    }

    /// Moves queued messages to the connection while the in-flight window and
    /// the outbound queue have room. Whatever does not fit stays queued.
    fn release_queued(&mut self) {
        while self.is_connected() && self.has_outbound_room() {
            let Some(qos) = self.queued_messages.front().map(|message| message.qos) else {
                break;
            };
            let packet_id = if qos == QoS::AtMostOnce {
                None
            } else if !self.has_inflight_room() {
                break;
            } else {
                match self.allocate_packet_id() {
                    Some(packet_id) => Some(packet_id),
                    None => break,
                }
            };
            let Some(message) = self.queued_messages.pop_front() else {
                break;
            };
            let packet = match packet_id {
                Some(packet_id) => self.record_inflight(packet_id, message),
                None => Packet::Publish(message.to_publish(None, false)),
            };
            self.outbound.push_back(packet);
        }
    }

    pub fn pending_deliveries(&self) -> impl Iterator<Item = &InFlightMessage> {
        self.pending_deliveries.iter()
    }

    pub fn queued_messages(&self) -> impl Iterator<Item = &Message> {
        self.queued_messages.iter()
    }

    fn position(&self, packet_id: u16) -> Option<usize> {
        self.pending_deliveries
            .iter()
            .position(|inflight| inflight.packet_id == packet_id)
    }

    /// Completes an outgoing QoS 1 exchange. Unknown or duplicate acks are
    /// ignored and return `false`.
    pub fn acknowledge_puback(&mut self, packet_id: u16) -> Result<bool, BrokerError> {
        match self.position(packet_id) {
            Some(index) if self.pending_deliveries[index].state == InFlightState::AwaitingPuback => {
                self.pending_deliveries.remove(index);
                self.release_queued();
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    /// Moves an outgoing QoS 2 exchange to its second half and queues the
    /// PUBREL. A repeated PUBREC gets the PUBREL again.
    pub fn acknowledge_pubrec(&mut self, packet_id: u16) -> Result<bool, BrokerError> {
        let Some(index) = self.position(packet_id) else {
            return Ok(false);
        };
        match self.pending_deliveries[index].state {
            InFlightState::AwaitingPubrec | InFlightState::AwaitingPubcomp => {
                self.pending_deliveries[index].state = InFlightState::AwaitingPubcomp;
                self.push_outbound(Packet::PubRel(PubRelPacket { packet_id }))?;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    pub fn acknowledge_pubcomp(&mut self, packet_id: u16) -> Result<bool, BrokerError> {
        match self.position(packet_id) {
            Some(index) if self.pending_deliveries[index].state == InFlightState::AwaitingPubcomp => {
                self.pending_deliveries.remove(index);
                self.release_queued();
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    // ===== INCOMING QOS 2 =====

    /// Holds an inbound QoS 2 message until its PUBREL. Returns `false` for a
    /// duplicate PUBLISH of an id already held.
    pub fn store_incoming_qos2(&mut self, packet_id: u16, message: Message) -> bool {
        if self.incoming_qos2.contains_key(&packet_id) {
            return false;
        }
        self.incoming_qos2.insert(
            packet_id,
            InFlightMessage {
                packet_id,
                message,
                state: InFlightState::AwaitingPubrel,
            },
        );
        true
    }

    pub fn release_incoming_qos2(&mut self, packet_id: u16) -> Option<Message> {
        self.incoming_qos2.remove(&packet_id).map(|inflight| inflight.message)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::packets::PublishPacket;
    use crate::test_support::RecordingLink;

    fn limits(max_inflight: usize, max_queued_messages: usize) -> SessionLimits {
        SessionLimits {
            max_inflight,
            max_queued_messages,
            max_outbound_packets: 16,
        }
    }

    fn connected(clean_session: bool, limits: SessionLimits) -> ClientSession {
        let mut session = ClientSession::new(ClientId::from("client"), clean_session, limits);
        session.attach(1, RecordingLink::new(), 60, None);
        session
    }

    fn message(topic: &str, qos: QoS) -> Message {
        Message::new(topic, &b"payload"[..], qos, false)
    }

    fn published(packets: &[Packet]) -> Vec<&PublishPacket> {
        packets
            .iter()
            .filter_map(|packet| match packet {
                Packet::Publish(publish) => Some(publish),
                _ => None,
            })
            .collect()
    }

    #[test]
    fn test_qos0_to_offline_session_dropped() {
        let mut session = ClientSession::new(ClientId::from("c"), false, limits(4, 4));
        assert_eq!(session.deliver(message("t", QoS::AtMostOnce)).unwrap(), Delivery::Dropped);
        assert_eq!(session.deliver(message("t", QoS::AtLeastOnce)).unwrap(), Delivery::Queued);
        assert_eq!(session.queued_messages().count(), 1);
    }

    #[test]
    fn test_offline_queue_drops_oldest() {
        let mut session = ClientSession::new(ClientId::from("c"), false, limits(4, 2));
        for topic in ["a", "b", "c"] {
            session.deliver(message(topic, QoS::AtLeastOnce)).unwrap();
        }
        let topics: Vec<&str> = session.queued_messages().map(|m| m.topic.as_str()).collect();
        assert_eq!(topics, vec!["b", "c"]);
    }

    #[test]
    fn test_packet_ids_skip_inflight_and_zero() {
        let mut session = connected(true, limits(8, 8));
        session.next_packet_id = u16::MAX;
        session.deliver(message("a", QoS::AtLeastOnce)).unwrap();
        session.deliver(message("b", QoS::AtLeastOnce)).unwrap();
        let ids: Vec<u16> = session.pending_deliveries().map(|m| m.packet_id).collect();
        assert_eq!(ids, vec![u16::MAX, 1]);

        // Wrap around again while 1 is still in flight.
        session.next_packet_id = 1;
        session.deliver(message("c", QoS::AtLeastOnce)).unwrap();
        assert_eq!(session.pending_deliveries().last().unwrap().packet_id, 2);
    }

    #[test]
    fn test_inflight_window_releases_in_order() {
        let mut session = connected(false, limits(1, 8));
        assert_eq!(session.deliver(message("a", QoS::AtLeastOnce)).unwrap(), Delivery::Sent);
        assert_eq!(session.deliver(message("b", QoS::AtLeastOnce)).unwrap(), Delivery::Queued);
        assert_eq!(session.deliver(message("c", QoS::AtLeastOnce)).unwrap(), Delivery::Queued);

        let first = session.drain_outbound();
        assert_eq!(published(&first)[0].topic, "a");

        assert!(session.acknowledge_puback(1).unwrap());
        let second = session.drain_outbound();
        assert_eq!(published(&second)[0].topic, "b");
        assert_eq!(published(&second)[0].packet_id, Some(2));

        // Duplicate ack changes nothing.
        assert!(!session.acknowledge_puback(1).unwrap());
        assert!(session.drain_outbound().is_empty());
    }

    #[test]
    fn test_qos2_outgoing_flow() {
        let mut session = connected(true, limits(4, 4));
        session.deliver(message("t", QoS::ExactlyOnce)).unwrap();
        session.drain_outbound();

        assert!(!session.acknowledge_puback(1).unwrap());
        assert!(session.acknowledge_pubrec(1).unwrap());
        assert_eq!(session.drain_outbound(), vec![Packet::PubRel(PubRelPacket { packet_id: 1 })]);

        // Retransmitted PUBREC is answered again.
        assert!(session.acknowledge_pubrec(1).unwrap());
        assert_eq!(session.drain_outbound(), vec![Packet::PubRel(PubRelPacket { packet_id: 1 })]);

        assert!(session.acknowledge_pubcomp(1).unwrap());
        assert_eq!(session.pending_deliveries().count(), 0);
        assert!(!session.acknowledge_pubcomp(1).unwrap());
    }

    #[test]
    fn test_resume_retransmits_with_dup() {
        let mut session = connected(false, limits(4, 4));
        session.deliver(message("one", QoS::AtLeastOnce)).unwrap();
        session.deliver(message("two", QoS::ExactlyOnce)).unwrap();
        session.acknowledge_pubrec(2).unwrap();
        session.detach(100);
        assert!(!session.has_outbound());
        session.deliver(message("three", QoS::AtLeastOnce)).unwrap();

        session.attach(2, RecordingLink::new(), 60, None);
        session.resume();
        let packets = session.drain_outbound();
        assert_eq!(packets.len(), 3);
        match &packets[0] {
            Packet::Publish(publish) => {
                assert_eq!(publish.topic, "one");
                assert!(publish.dup);
                assert_eq!(publish.packet_id, Some(1));
            }
            other => panic!("unexpected {:?}", other),
        }
        assert_eq!(packets[1], Packet::PubRel(PubRelPacket { packet_id: 2 }));
        match &packets[2] {
            Packet::Publish(publish) => {
                assert_eq!(publish.topic, "three");
                assert!(!publish.dup);
                assert_eq!(publish.packet_id, Some(3));
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_outbound_overflow_reported() {
        let mut session = ClientSession::new(
            ClientId::from("c"),
            true,
            SessionLimits {
                max_inflight: 4,
                max_queued_messages: 4,
                max_outbound_packets: 2,
            },
        );
        session.attach(1, RecordingLink::new(), 0, None);
        session.deliver(message("t", QoS::AtMostOnce)).unwrap();
        session.deliver(message("t", QoS::AtMostOnce)).unwrap();
        assert!(matches!(
            session.deliver(message("t", QoS::AtMostOnce)),
            Err(BrokerError::OutboundQueueFull { capacity: 2, .. })
        ));
    }

    #[test]
    fn test_matching_qos_takes_highest() {
        let mut session = connected(true, limits(4, 4));
        session.subscribe("home/#", QoS::AtMostOnce);
        session.subscribe("home/+/temp", QoS::ExactlyOnce);
        assert_eq!(session.matching_qos("home/kitchen/temp"), Some(QoS::ExactlyOnce));
        assert_eq!(session.matching_qos("home/kitchen"), Some(QoS::AtMostOnce));
        assert_eq!(session.matching_qos("office"), None);
    }

    #[test]
    fn test_resubscribe_replaces_qos() {
        let mut session = connected(true, limits(4, 4));
        assert_eq!(session.subscribe("a", QoS::AtMostOnce), None);
        assert_eq!(session.subscribe("a", QoS::AtLeastOnce), Some(QoS::AtMostOnce));
        assert_eq!(session.subscriptions().len(), 1);
        assert!(session.unsubscribe("a"));
        assert!(!session.unsubscribe("a"));
    }

    #[test]
    fn test_incoming_qos2_deduplicated() {
        let mut session = connected(true, limits(4, 4));
        assert!(session.store_incoming_qos2(7, message("t", QoS::ExactlyOnce)));
        assert!(!session.store_incoming_qos2(7, message("t", QoS::ExactlyOnce)));
        assert_eq!(session.release_incoming_qos2(7).unwrap().topic, "t");
        assert_eq!(session.release_incoming_qos2(7), None);
    }

    #[test]
    fn test_expiry_only_while_offline() {
        let mut session = connected(false, limits(4, 4));
        assert!(!session.is_expired(1_000, Duration::from_secs(10)));
        session.detach(100);
        assert!(!session.is_expired(105, Duration::from_secs(10)));
        assert!(session.is_expired(110, Duration::from_secs(10)));
    }
}
