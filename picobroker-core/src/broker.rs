//! Broker core: owns the session store, the retained store and the router,
//! and exposes the operations a connection performs on them.
//!
//! Nothing here does I/O. Packets for a client are queued on its session and
//! the connection is poked through its [`ClientLink`].

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use log::{debug, info, trace, warn};
use parking_lot::Mutex;

use crate::client::ClientId;
use crate::config::BrokerConfig;
use crate::error::BrokerError;
use crate::message::Message;
use crate::protocol::packets::{
    ConnAckPacket, ConnectPacket, ConnectReturnCode, LastWill, Packet, SubAckReturnCode, PROTOCOL_LEVEL,
    PROTOCOL_NAME,
};
use crate::protocol::qos::QoS;
use crate::retained::{RetainUpdate, RetainedStore};
use crate::router::Router;
use crate::session::{ClientSession, Delivery, SessionLimits};
use crate::session_store::SessionStore;
use crate::topics::validate_topic_filter;
use crate::traits::{Access, AllowAll, Authorizer, ClientLink, TimeSource};

/// Identifies one connection's claim on a session. Operations made with a
/// key whose connection has been taken over fail with
/// [`BrokerError::SessionTakenOver`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionKey {
    pub client_id: ClientId,
    pub connection_id: u64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectOutcome {
    /// The CONNACK is already queued on the session.
    Accepted { key: SessionKey, session_present: bool },
    /// Send a CONNACK with this code and close.
    Rejected(ConnectReturnCode),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DisconnectReason {
    /// The client sent DISCONNECT; its Last Will is discarded.
    Graceful,
    /// Anything else; the Last Will is published.
    Abnormal,
}

pub struct Broker<T: TimeSource> {
    config: BrokerConfig,
    sessions: Arc<SessionStore>,
    retained: Arc<RetainedStore>,
    router: Router,
    authorizer: Arc<dyn Authorizer>,
    time_source: T,
    next_connection_id: AtomicU64,
    next_assigned_id: AtomicU64,
}

impl<T: TimeSource> Broker<T> {
    pub fn new(config: BrokerConfig, time_source: T) -> Self {
        Self::with_stores(
            config,
            time_source,
            Arc::new(SessionStore::new()),
            Arc::new(RetainedStore::new()),
        )
    }

    /// Builds a broker over existing stores.
    pub fn with_stores(
        config: BrokerConfig,
        time_source: T,
        sessions: Arc<SessionStore>,
        retained: Arc<RetainedStore>,
    ) -> Self {
        Self {
            config,
            router: Router::new(sessions.clone()),
            sessions,
            retained,
            authorizer: Arc::new(AllowAll),
            time_source,
            next_connection_id: AtomicU64::new(1),
            next_assigned_id: AtomicU64::new(1),
        }
    }

    pub fn with_authorizer(mut self, authorizer: Arc<dyn Authorizer>) -> Self {
        self.authorizer = authorizer;
        self
    }

    pub fn config(&self) -> &BrokerConfig {
        &self.config
    }

    pub fn sessions(&self) -> &Arc<SessionStore> {
        &self.sessions
    }

    pub fn retained(&self) -> &Arc<RetainedStore> {
        &self.retained
    }

    pub fn session_count(&self) -> usize {
        self.sessions.len()
    }

    pub fn authorize_publish(&self, client_id: &ClientId, topic: &str) -> Access {
        self.authorizer.authorize_publish(client_id.as_str(), topic)
    }

    fn assign_client_id(&self) -> ClientId {
        loop {
            let client_id = ClientId::generate(self.next_assigned_id.fetch_add(1, Ordering::Relaxed));
            if !self.sessions.contains(client_id.as_str()) {
                return client_id;
            }
        }
    }

    /// Creates or resumes the session for a CONNECT and attaches `link` to it.
    ///
    /// A live connection already holding the client id is closed through its
    /// link and its Last Will is published.
    pub fn connect(&self, connect: &ConnectPacket, link: Arc<dyn ClientLink>) -> ConnectOutcome {
        if connect.protocol_name != PROTOCOL_NAME || connect.protocol_level != PROTOCOL_LEVEL {
            info!(
                "Rejecting {} protocol level {} from '{}'",
                connect.protocol_name, connect.protocol_level, connect.client_id
            );
            return ConnectOutcome::Rejected(ConnectReturnCode::UnacceptableProtocolVersion);
        }

        let client_id = if connect.client_id.is_empty() {
            if !connect.clean_session {
                info!("Rejecting empty client id for a persistent session");
                return ConnectOutcome::Rejected(ConnectReturnCode::IdentifierRejected);
            }
            self.assign_client_id()
        } else {
            ClientId::from(connect.client_id.as_str())
        };

        let access = self.authorizer.authorize(
            client_id.as_str(),
            connect.username.as_deref(),
            connect.password.as_deref(),
        );
        if access == Access::Deny {
            let code = if connect.username.is_some() || connect.password.is_some() {
                ConnectReturnCode::BadUserNameOrPassword
            } else {
                ConnectReturnCode::NotAuthorized
            };
            info!("Client {} not authorized ({:?})", client_id, code);
            return ConnectOutcome::Rejected(code);
        }

        let connection_id = self.next_connection_id.fetch_add(1, Ordering::Relaxed);
        let now = self.time_source.now_secs();
        let limits = SessionLimits::from(&self.config);

        let (session_present, displaced, queued) = self.sessions.with_entry(&client_id, |slot| {
            let mut displaced: Option<(Arc<dyn ClientLink>, Option<LastWill>)> = None;
            let mut resumable = false;
            if let Some(existing) = slot.as_ref() {
                let mut session = existing.lock();
                if let Some(old_link) = session.detach(now) {
                    displaced = Some((old_link, session.take_will()));
                }
                resumable = !connect.clean_session && !session.clean_session();
            }

            let session = match slot.as_ref() {
                Some(existing) if resumable => existing.clone(),
                _ => {
                    let fresh = Arc::new(Mutex::new(ClientSession::new(
                        client_id.clone(),
                        connect.clean_session,
                        limits,
                    )));
                    *slot = Some(fresh.clone());
                    fresh
                }
            };

            let mut session = session.lock();
            session.attach(connection_id, link.clone(), connect.keep_alive, connect.will.clone());
            let queued = session.push_outbound(Packet::ConnAck(ConnAckPacket {
                session_present: resumable,
                return_code: ConnectReturnCode::Accepted,
            }));
            if resumable {
                session.resume();
            }
            (resumable, displaced, queued)
        });

        if let Some((old_link, will)) = displaced {
            info!("Client {} reconnected, closing its previous connection", client_id);
            old_link.close();
            if let Some(will) = will {
                self.publish_will(&client_id, will);
            }
        }
        if let Err(error) = queued {
            warn!("{}", error);
            link.close();
        }
        link.wake();

        info!(
            "Client {} connected (clean_session={}, session_present={}, keep_alive={}s)",
            client_id, connect.clean_session, session_present, connect.keep_alive
        );
        ConnectOutcome::Accepted {
            key: SessionKey {
                client_id,
                connection_id,
            },
            session_present,
        }
    }

    fn publish_will(&self, client_id: &ClientId, will: LastWill) {
        debug!("Publishing last will of {} on {}", client_id, will.topic);
        self.publish(Message::from(will));
    }

    /// Routes a message to every matching subscriber, updating the retained
    /// store first when the retain flag is set. Returns the number of
    /// sessions that accepted the message.
    pub fn publish(&self, message: Message) -> usize {
        if message.retain {
            match self.retained.apply(&message) {
                RetainUpdate::Stored => trace!("Retained message stored on {}", message.topic),
                RetainUpdate::Cleared | RetainUpdate::Unchanged => {}
            }
        }

        let routes = self.router.route(&message);
        let mut accepted = 0;
        for route in routes {
            let Some(session) = self.sessions.get(route.client_id.as_str()) else {
                continue;
            };
            let (result, link) = {
                let mut session = session.lock();
                let result = session.deliver(message.for_delivery(route.qos, false));
                (result, session.link())
            };
            match result {
                Ok(Delivery::Sent) => {
                    accepted += 1;
                    if let Some(link) = link {
                        link.wake();
                    }
                }
                Ok(Delivery::Queued) => accepted += 1,
                Ok(Delivery::Dropped) => {}
                Err(error) => {
                    warn!("{}, disconnecting slow client", error);
                    if let Some(link) = link {
                        link.close();
                    }
                }
            }
        }
        trace!("Message on {} accepted by {} sessions", message.topic, accepted);
        accepted
    }

    /// Runs `f` on the session held by `key`, then wakes or closes the
    /// connection depending on what `f` left behind.
    fn with_session<R>(
        &self,
        key: &SessionKey,
        f: impl FnOnce(&mut ClientSession) -> Result<R, BrokerError>,
    ) -> Result<R, BrokerError> {
        let session = self
            .sessions
            .get(key.client_id.as_str())
            .ok_or_else(|| BrokerError::SessionNotFound {
                client_id: key.client_id.clone(),
            })?;
        let (result, pending, link) = {
            let mut session = session.lock();
            if !session.is_attached_to(key.connection_id) {
                return Err(BrokerError::SessionTakenOver {
                    client_id: key.client_id.clone(),
                });
            }
            let result = f(&mut session);
            (result, session.has_outbound(), session.link())
        };
        if let Some(link) = link {
            match &result {
                Err(BrokerError::OutboundQueueFull { .. }) => link.close(),
                _ if pending => link.wake(),
                _ => {}
            }
        }
        result
    }

    /// Queues a packet for the connection holding `key`.
    pub fn send(&self, key: &SessionKey, packet: Packet) -> Result<(), BrokerError> {
        self.with_session(key, |session| session.push_outbound(packet))
    }

    /// Adds a subscription. Invalid or unauthorized filters yield a failure
    /// code rather than an error.
    pub fn subscribe(&self, key: &SessionKey, filter: &str, qos: QoS) -> Result<SubAckReturnCode, BrokerError> {
        if let Err(error) = validate_topic_filter(filter) {
            debug!("Client {} sent invalid filter '{}': {}", key.client_id, filter, error);
            return Ok(SubAckReturnCode::Failure);
        }
        if self.authorizer.authorize_subscribe(key.client_id.as_str(), filter) == Access::Deny {
            info!("Client {} not allowed to subscribe to {}", key.client_id, filter);
            return Ok(SubAckReturnCode::Failure);
        }
        let granted = qos.min(self.config.max_qos);
        self.with_session(key, |session| {
            session.subscribe(filter, granted);
            Ok(())
        })?;
        debug!("Client {} subscribed to {} (QoS {})", key.client_id, filter, granted);
        Ok(SubAckReturnCode::Success(granted))
    }

    /// Sends the retained messages matching a just-granted subscription.
    pub fn deliver_retained(&self, key: &SessionKey, filter: &str, granted: QoS) -> Result<usize, BrokerError> {
        let retained = self.retained.matching(filter);
        if retained.is_empty() {
            return Ok(0);
        }
        self.with_session(key, |session| {
            for message in &retained {
                session.deliver(message.to_message(granted))?;
            }
            Ok(retained.len())
        })
    }

    pub fn unsubscribe(&self, key: &SessionKey, filter: &str) -> Result<bool, BrokerError> {
        let removed = self.with_session(key, |session| Ok(session.unsubscribe(filter)))?;
        debug!("Client {} unsubscribed from {} (existed={})", key.client_id, filter, removed);
        Ok(removed)
    }

    pub fn puback(&self, key: &SessionKey, packet_id: u16) -> Result<bool, BrokerError> {
        self.with_session(key, |session| session.acknowledge_puback(packet_id))
    }

    pub fn pubrec(&self, key: &SessionKey, packet_id: u16) -> Result<bool, BrokerError> {
        self.with_session(key, |session| session.acknowledge_pubrec(packet_id))
    }

    pub fn pubcomp(&self, key: &SessionKey, packet_id: u16) -> Result<bool, BrokerError> {
        self.with_session(key, |session| session.acknowledge_pubcomp(packet_id))
    }

    /// Holds an inbound QoS 2 message until PUBREL. `false` for a duplicate.
    pub fn receive_qos2(&self, key: &SessionKey, packet_id: u16, message: Message) -> Result<bool, BrokerError> {
        self.with_session(key, |session| Ok(session.store_incoming_qos2(packet_id, message)))
    }

    pub fn release_qos2(&self, key: &SessionKey, packet_id: u16) -> Result<Option<Message>, BrokerError> {
        self.with_session(key, |session| Ok(session.release_incoming_qos2(packet_id)))
    }

    pub fn drain_outbound(&self, key: &SessionKey) -> Result<Vec<Packet>, BrokerError> {
        self.with_session(key, |session| Ok(session.drain_outbound()))
    }

    /// Ends the connection identified by `key`. A no-op when the session has
    /// since been taken over by another connection.
    pub fn disconnect(&self, key: &SessionKey, reason: DisconnectReason) {
        let Some(session) = self.sessions.get(key.client_id.as_str()) else {
            return;
        };
        let (will, clean_session) = {
            let mut session = session.lock();
            if !session.is_attached_to(key.connection_id) {
                return;
            }
            session.detach(self.time_source.now_secs());
            let will = match reason {
                DisconnectReason::Graceful => {
                    session.clear_will();
                    None
                }
                DisconnectReason::Abnormal => session.take_will(),
            };
            (will, session.clean_session())
        };

        if clean_session {
            self.sessions
                .remove_if(key.client_id.as_str(), |session| session.clean_session() && !session.is_connected());
        }
        info!(
            "Client {} disconnected ({:?}, session {})",
            key.client_id,
            reason,
            if clean_session { "discarded" } else { "kept" }
        );
        if let Some(will) = will {
            self.publish_will(&key.client_id, will);
        }
    }

    /// Drops persistent sessions that have been offline longer than
    /// [`BrokerConfig::session_expiry`]. Returns how many were removed.
    pub fn expire_sessions(&self) -> usize {
        let Some(expiry) = self.config.session_expiry else {
            return 0;
        };
        let now = self.time_source.now_secs();
        let mut expired = 0;
        for (client_id, _) in self.sessions.snapshot() {
            if self
                .sessions
                .remove_if(client_id.as_str(), |session| session.is_expired(now, expiry))
                .is_some()
            {
                debug!("Session {} expired", client_id);
                expired += 1;
            }
        }
        expired
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::packets::{PubAckPacket, PublishPacket};
    use crate::test_support::{ManualClock, RecordingLink};
    use bytes::Bytes;
    use std::time::Duration;

    fn broker() -> Broker<ManualClock> {
        Broker::new(BrokerConfig::default(), ManualClock::default())
    }

    fn connect_packet(client_id: &str, clean_session: bool) -> ConnectPacket {
        let mut connect = ConnectPacket::new(client_id, 60);
        connect.clean_session = clean_session;
        connect
    }

    fn connect<T: TimeSource>(broker: &Broker<T>, connect: ConnectPacket) -> (SessionKey, Arc<RecordingLink>) {
        let link = RecordingLink::new();
        match broker.connect(&connect, link.clone()) {
            ConnectOutcome::Accepted { key, .. } => {
                broker.drain_outbound(&key).unwrap();
                (key, link)
            }
            other => panic!("connect rejected: {:?}", other),
        }
    }

    fn publishes(packets: Vec<Packet>) -> Vec<PublishPacket> {
        packets
            .into_iter()
            .filter_map(|packet| match packet {
                Packet::Publish(publish) => Some(publish),
                _ => None,
            })
            .collect()
    }

    #[test]
    fn test_connack_queued_on_accept() {
        let broker = broker();
        let link = RecordingLink::new();
        let outcome = broker.connect(&connect_packet("a", true), link.clone());
        let ConnectOutcome::Accepted { key, session_present } = outcome else {
            panic!("rejected");
        };
        assert!(!session_present);
        assert_eq!(
            broker.drain_outbound(&key).unwrap(),
            vec![Packet::ConnAck(ConnAckPacket {
                session_present: false,
                return_code: ConnectReturnCode::Accepted
            })]
        );
        assert_eq!(link.wakes(), 1);
    }

    #[test]
    fn test_protocol_level_rejected() {
        let broker = broker();
        let mut packet = connect_packet("a", true);
        packet.protocol_level = 3;
        assert_eq!(
            broker.connect(&packet, RecordingLink::new()),
            ConnectOutcome::Rejected(ConnectReturnCode::UnacceptableProtocolVersion)
        );
        assert_eq!(broker.session_count(), 0);
    }

    #[test]
    fn test_empty_client_id() {
        let broker = broker();
        assert_eq!(
            broker.connect(&connect_packet("", false), RecordingLink::new()),
            ConnectOutcome::Rejected(ConnectReturnCode::IdentifierRejected)
        );
        let (first, _) = connect(&broker, connect_packet("", true));
        let (second, _) = connect(&broker, connect_packet("", true));
        assert!(first.client_id.as_str().starts_with("auto-"));
        assert_ne!(first.client_id, second.client_id);
    }

    struct DenyAll;

    impl Authorizer for DenyAll {
        fn authorize(&self, _: &str, _: Option<&str>, _: Option<&[u8]>) -> Access {
            Access::Deny
        }
    }

    #[test]
    fn test_authorizer_denial_codes() {
        let broker = broker().with_authorizer(Arc::new(DenyAll));
        assert_eq!(
            broker.connect(&connect_packet("a", true), RecordingLink::new()),
            ConnectOutcome::Rejected(ConnectReturnCode::NotAuthorized)
        );
        let mut with_credentials = connect_packet("a", true);
        with_credentials.username = Some("user".to_owned());
        with_credentials.password = Some(Bytes::from_static(b"pw"));
        assert_eq!(
            broker.connect(&with_credentials, RecordingLink::new()),
            ConnectOutcome::Rejected(ConnectReturnCode::BadUserNameOrPassword)
        );
    }

    struct ReadOnly;

    impl Authorizer for ReadOnly {
        fn authorize_subscribe(&self, _: &str, filter: &str) -> Access {
            if filter.starts_with("secret") {
                Access::Deny
            } else {
                Access::Allow
            }
        }
    }

    #[test]
    fn test_subscribe_failures_are_codes() {
        let broker = broker().with_authorizer(Arc::new(ReadOnly));
        let (key, _) = connect(&broker, connect_packet("a", true));
        assert_eq!(broker.subscribe(&key, "a/#/b", QoS::AtMostOnce).unwrap(), SubAckReturnCode::Failure);
        assert_eq!(broker.subscribe(&key, "secret/x", QoS::AtMostOnce).unwrap(), SubAckReturnCode::Failure);
        assert_eq!(
            broker.subscribe(&key, "open/x", QoS::ExactlyOnce).unwrap(),
            SubAckReturnCode::Success(QoS::ExactlyOnce)
        );
    }

    #[test]
    fn test_granted_qos_capped_by_config() {
        let config = BrokerConfig {
            max_qos: QoS::AtLeastOnce,
            ..BrokerConfig::default()
        };
        let broker = Broker::new(config, ManualClock::default());
        let (key, _) = connect(&broker, connect_packet("a", true));
        assert_eq!(
            broker.subscribe(&key, "t", QoS::ExactlyOnce).unwrap(),
            SubAckReturnCode::Success(QoS::AtLeastOnce)
        );
    }

    #[test]
    fn test_takeover_closes_old_link_and_publishes_will() {
        let broker = broker();
        let (watcher, _) = connect(&broker, connect_packet("watcher", true));
        broker.subscribe(&watcher, "status/#", QoS::AtMostOnce).unwrap();

        let mut first = connect_packet("device", true);
        first.will = Some(LastWill {
            topic: "status/device".to_owned(),
            payload: Bytes::from_static(b"gone"),
            qos: QoS::AtMostOnce,
            retain: false,
        });
        let (old_key, old_link) = connect(&broker, first);
        let (new_key, _) = connect(&broker, connect_packet("device", true));

        assert_eq!(old_link.closes(), 1);
        assert_ne!(old_key.connection_id, new_key.connection_id);
        assert!(matches!(
            broker.send(&old_key, Packet::PubAck(PubAckPacket { packet_id: 1 })),
            Err(BrokerError::SessionTakenOver { .. })
        ));
        let received = publishes(broker.drain_outbound(&watcher).unwrap());
        assert_eq!(received.len(), 1);
        assert_eq!(&received[0].payload[..], b"gone");

        // The stale connection going away must not end the new one.
        broker.disconnect(&old_key, DisconnectReason::Abnormal);
        assert!(broker.sessions().get("device").unwrap().lock().is_attached_to(new_key.connection_id));
    }

    #[test]
    fn test_clean_session_discarded_persistent_kept() {
        let broker = broker();
        let (clean, _) = connect(&broker, connect_packet("clean", true));
        let (persistent, _) = connect(&broker, connect_packet("persistent", false));
        broker.disconnect(&clean, DisconnectReason::Graceful);
        broker.disconnect(&persistent, DisconnectReason::Graceful);
        assert!(broker.sessions().get("clean").is_none());
        assert!(broker.sessions().get("persistent").is_some());
    }

    #[test]
    fn test_session_present_only_for_persistent_resume() {
        let broker = broker();
        let (key, _) = connect(&broker, connect_packet("p", false));
        broker.disconnect(&key, DisconnectReason::Abnormal);

        match broker.connect(&connect_packet("p", false), RecordingLink::new()) {
            ConnectOutcome::Accepted { key, session_present } => {
                assert!(session_present);
                broker.disconnect(&key, DisconnectReason::Graceful);
            }
            other => panic!("{:?}", other),
        }
        // A clean reconnect discards the stored session.
        match broker.connect(&connect_packet("p", true), RecordingLink::new()) {
            ConnectOutcome::Accepted { session_present, .. } => assert!(!session_present),
            other => panic!("{:?}", other),
        }
    }

    #[test]
    fn test_offline_queue_delivered_on_reconnect() {
        let broker = broker();
        let (subscriber, _) = connect(&broker, connect_packet("sub", false));
        broker.subscribe(&subscriber, "jobs/#", QoS::AtLeastOnce).unwrap();
        broker.disconnect(&subscriber, DisconnectReason::Graceful);

        broker.publish(Message::new("jobs/1", &b"one"[..], QoS::AtLeastOnce, false));
        broker.publish(Message::new("jobs/2", &b"two"[..], QoS::AtMostOnce, false));
        broker.publish(Message::new("jobs/3", &b"three"[..], QoS::ExactlyOnce, false));

        let link = RecordingLink::new();
        let ConnectOutcome::Accepted { key, session_present } = broker.connect(&connect_packet("sub", false), link)
        else {
            panic!("rejected");
        };
        assert!(session_present);
        let packets = broker.drain_outbound(&key).unwrap();
        assert!(matches!(packets[0], Packet::ConnAck(_)));
        let received = publishes(packets);
        let topics: Vec<&str> = received.iter().map(|p| p.topic.as_str()).collect();
        assert_eq!(topics, vec!["jobs/1", "jobs/3"]);
        assert_eq!(received[1].qos, QoS::AtLeastOnce);
    }

    #[test]
    fn test_retained_replay_on_subscribe() {
        let broker = broker();
        broker.publish(Message::new("a/b", &b"hello"[..], QoS::AtLeastOnce, true));
        let (key, _) = connect(&broker, connect_packet("late", true));
        let granted = broker.subscribe(&key, "a/+", QoS::AtMostOnce).unwrap();
        assert_eq!(granted, SubAckReturnCode::Success(QoS::AtMostOnce));
        assert_eq!(broker.deliver_retained(&key, "a/+", QoS::AtMostOnce).unwrap(), 1);

        let received = publishes(broker.drain_outbound(&key).unwrap());
        assert_eq!(received.len(), 1);
        assert!(received[0].retain);
        assert_eq!(received[0].qos, QoS::AtMostOnce);

        // Live delivery of a retained publish clears the flag.
        broker.publish(Message::new("a/b", &b"again"[..], QoS::AtMostOnce, true));
        let received = publishes(broker.drain_outbound(&key).unwrap());
        assert!(!received[0].retain);
    }

    #[test]
    fn test_slow_consumer_closed() {
        let config = BrokerConfig {
            max_outbound_packets: 2,
            ..BrokerConfig::default()
        };
        let broker = Broker::new(config, ManualClock::default());
        let (key, link) = connect(&broker, connect_packet("slow", true));
        broker.subscribe(&key, "#", QoS::AtMostOnce).unwrap();
        for _ in 0..3 {
            broker.publish(Message::new("t", &b"x"[..], QoS::AtMostOnce, false));
        }
        assert_eq!(link.closes(), 1);
    }

    #[test]
    fn test_overflow_close_keeps_qos1_for_persistent_session() {
        let config = BrokerConfig {
            max_outbound_packets: 2,
            ..BrokerConfig::default()
        };
        let broker = Broker::new(config, ManualClock::default());
        let (key, link) = connect(&broker, connect_packet("slow", false));
        broker.subscribe(&key, "t/#", QoS::AtLeastOnce).unwrap();
        for topic in ["t/0", "t/1", "t/2"] {
            broker.publish(Message::new(topic, &b"x"[..], QoS::AtLeastOnce, false));
        }
        assert_eq!(link.closes(), 1);
        broker.disconnect(&key, DisconnectReason::Abnormal);

        let ConnectOutcome::Accepted { key, session_present } =
            broker.connect(&connect_packet("slow", false), RecordingLink::new())
        else {
            panic!("rejected");
        };
        assert!(session_present);
        let packets = broker.drain_outbound(&key).unwrap();
        assert!(matches!(packets[0], Packet::ConnAck(_)));
        let redelivered = publishes(packets);
        let topics: Vec<&str> = redelivered.iter().map(|p| p.topic.as_str()).collect();
        assert_eq!(topics, vec!["t/0", "t/1", "t/2"]);
        assert!(redelivered.iter().all(|p| p.dup));
    }

    #[test]
    fn test_queued_backlog_released_as_outbound_drains() {
        let config = BrokerConfig {
            max_outbound_packets: 2,
            ..BrokerConfig::default()
        };
        let broker = Broker::new(config, ManualClock::default());
        let (key, _) = connect(&broker, connect_packet("backlog", false));
        broker.subscribe(&key, "jobs/#", QoS::AtLeastOnce).unwrap();
        broker.disconnect(&key, DisconnectReason::Graceful);
        for n in 0..5 {
            broker.publish(Message::new(format!("jobs/{}", n), &b"x"[..], QoS::AtLeastOnce, false));
        }

        let link = RecordingLink::new();
        let ConnectOutcome::Accepted { key, .. } = broker.connect(&connect_packet("backlog", false), link.clone())
        else {
            panic!("rejected");
        };
        let mut topics = Vec::new();
        loop {
            let received = publishes(broker.drain_outbound(&key).unwrap());
            if received.is_empty() {
                break;
            }
            topics.extend(received.into_iter().map(|p| p.topic));
        }
        assert_eq!(topics, vec!["jobs/0", "jobs/1", "jobs/2", "jobs/3", "jobs/4"]);
        assert_eq!(link.closes(), 0);
    }

    #[test]
    fn test_expire_sessions() {
        let clock = ManualClock::default();
        let config = BrokerConfig {
            session_expiry: Some(Duration::from_secs(60)),
            ..BrokerConfig::default()
        };
        let broker = Broker::new(config, clock.clone());
        let (offline, _) = connect(&broker, connect_packet("offline", false));
        let _online = connect(&broker, connect_packet("online", false));
        broker.disconnect(&offline, DisconnectReason::Graceful);

        clock.advance(30);
        assert_eq!(broker.expire_sessions(), 0);
        clock.advance(30);
        assert_eq!(broker.expire_sessions(), 1);
        assert!(broker.sessions().get("offline").is_none());
        assert!(broker.sessions().get("online").is_some());
    }

    #[test]
    fn test_independent_brokers() {
        let a = broker();
        let b = broker();
        connect(&a, connect_packet("x", true));
        assert_eq!(a.session_count(), 1);
        assert_eq!(b.session_count(), 0);
    }
}
