use std::sync::Arc;
use std::time::Duration;

use log::{debug, info, trace, warn};

use crate::broker::{Broker, ConnectOutcome, DisconnectReason, SessionKey};
use crate::client::ClientId;
use crate::error::BrokerError;
use crate::message::Message;
use crate::protocol::packets::{
    ConnAckPacket, ConnectPacket, Packet, PingRespPacket, PubAckPacket, PubCompPacket, PubRecPacket,
    PublishPacket, SubAckPacket, SubAckReturnCode, SubscribePacket, UnsubAckPacket, UnsubscribePacket,
};
use crate::protocol::qos::QoS;
use crate::protocol::ProtocolError;
use crate::traits::{Access, ClientLink, TimeSource};

/// Lifecycle of one connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// Only CONNECT is acceptable.
    AwaitingConnect,
    Connected,
    /// DISCONNECT received, transport about to close.
    Disconnecting,
    Closed,
}

impl ConnectionState {
    const fn describe(self) -> &'static str {
        match self {
            ConnectionState::AwaitingConnect => "awaiting CONNECT",
            ConnectionState::Connected => "connected",
            ConnectionState::Disconnecting => "disconnecting",
            ConnectionState::Closed => "closed",
        }
    }
}

/// What the transport should do after a packet was handled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Step {
    Continue,
    /// Flush [`Connection::outbound`] and close the transport.
    Close,
}

/// Why a transport went away, for logging and Last Will decisions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseReason {
    ClientDisconnect,
    ConnectRejected,
    ProtocolViolation,
    KeepAliveTimeout,
    ConnectTimeout,
    TransportClosed,
    TransportError,
    /// Taken over by a newer connection or disconnected as a slow consumer.
    ClosedByBroker,
}

impl core::fmt::Display for CloseReason {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        let reason = match self {
            CloseReason::ClientDisconnect => "client sent DISCONNECT",
            CloseReason::ConnectRejected => "CONNECT rejected",
            CloseReason::ProtocolViolation => "protocol violation",
            CloseReason::KeepAliveTimeout => "keep-alive timeout",
            CloseReason::ConnectTimeout => "no CONNECT in time",
            CloseReason::TransportClosed => "connection closed by peer",
            CloseReason::TransportError => "transport error",
            CloseReason::ClosedByBroker => "closed by broker",
        };
        f.write_str(reason)
    }
}

/// MQTT state machine of a single client connection.
///
/// The owner feeds it decoded packets with [`Connection::handle_packet`],
/// writes whatever [`Connection::outbound`] returns after each call and
/// whenever the link is woken, and calls [`Connection::close`] exactly once
/// when the transport goes away.
pub struct Connection<T: TimeSource> {
    broker: Arc<Broker<T>>,
    link: Arc<dyn ClientLink>,
    state: ConnectionState,
    session: Option<SessionKey>,
    keep_alive: u16,
    /// Packets produced without a session, i.e. a rejecting CONNACK.
    pending: Vec<Packet>,
}

impl<T: TimeSource> Connection<T> {
    pub fn new(broker: Arc<Broker<T>>, link: Arc<dyn ClientLink>) -> Self {
        Self {
            broker,
            link,
            state: ConnectionState::AwaitingConnect,
            session: None,
            keep_alive: 0,
            pending: Vec::new(),
        }
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    pub fn client_id(&self) -> Option<&ClientId> {
        self.session.as_ref().map(|key| &key.client_id)
    }

    /// Longest silence tolerated from the client: one and a half times its
    /// keep-alive. `None` when keep-alive is disabled or not yet negotiated.
    pub fn keep_alive_timeout(&self) -> Option<Duration> {
        if self.state != ConnectionState::Connected || self.keep_alive == 0 {
            return None;
        }
        Some(Duration::from_millis(u64::from(self.keep_alive) * 1500))
    }

    /// Handles one inbound packet. An error is a protocol violation or a lost
    /// session; either way the caller closes the transport.
    pub fn handle_packet(&mut self, packet: Packet) -> Result<Step, BrokerError> {
        if !packet.packet_type().is_client_to_server() {
            return Err(self.unexpected(&packet));
        }
        match self.state {
            ConnectionState::AwaitingConnect => match packet {
                Packet::Connect(connect) => Ok(self.handle_connect(connect)),
                other => Err(self.unexpected(&other)),
            },
            ConnectionState::Connected => {
                let key = self.session.clone().ok_or(BrokerError::UnexpectedPacket {
                    packet_type: packet.packet_type(),
                    state: "connected without a session",
                })?;
                self.handle_connected(&key, packet)
            }
            ConnectionState::Disconnecting | ConnectionState::Closed => Err(self.unexpected(&packet)),
        }
    }

    fn unexpected(&self, packet: &Packet) -> BrokerError {
        BrokerError::UnexpectedPacket {
            packet_type: packet.packet_type(),
            state: self.state.describe(),
        }
    }

    fn handle_connect(&mut self, connect: ConnectPacket) -> Step {
        match self.broker.connect(&connect, self.link.clone()) {
            ConnectOutcome::Accepted { key, .. } => {
                self.keep_alive = connect.keep_alive;
                self.session = Some(key);
                self.state = ConnectionState::Connected;
                Step::Continue
            }
            ConnectOutcome::Rejected(return_code) => {
                self.pending.push(Packet::ConnAck(ConnAckPacket {
                    session_present: false,
                    return_code,
                }));
                self.state = ConnectionState::Closed;
                Step::Close
            }
        }
    }

    fn handle_connected(&mut self, key: &SessionKey, packet: Packet) -> Result<Step, BrokerError> {
        match packet {
            Packet::Publish(publish) => self.handle_publish(key, publish)?,
            Packet::PubAck(ack) => {
                if !self.broker.puback(key, ack.packet_id)? {
                    debug!("[{}] PUBACK for unknown packet id {}", key.client_id, ack.packet_id);
                }
            }
            Packet::PubRec(ack) => {
                if !self.broker.pubrec(key, ack.packet_id)? {
                    debug!("[{}] PUBREC for unknown packet id {}", key.client_id, ack.packet_id);
                }
            }
            Packet::PubRel(release) => {
                if let Some(message) = self.broker.release_qos2(key, release.packet_id)? {
                    self.broker.publish(message);
                }
                self.broker.send(
                    key,
                    Packet::PubComp(PubCompPacket {
                        packet_id: release.packet_id,
                    }),
                )?;
            }
            Packet::PubComp(ack) => {
                if !self.broker.pubcomp(key, ack.packet_id)? {
                    debug!("[{}] PUBCOMP for unknown packet id {}", key.client_id, ack.packet_id);
                }
            }
            Packet::Subscribe(subscribe) => self.handle_subscribe(key, subscribe)?,
            Packet::Unsubscribe(unsubscribe) => self.handle_unsubscribe(key, unsubscribe)?,
            Packet::PingReq(_) => self.broker.send(key, Packet::PingResp(PingRespPacket))?,
            Packet::Disconnect(_) => {
                self.state = ConnectionState::Disconnecting;
                self.broker.disconnect(key, DisconnectReason::Graceful);
                return Ok(Step::Close);
            }
            // A second CONNECT.
            other => return Err(self.unexpected(&other)),
        }
        Ok(Step::Continue)
    }

    fn handle_publish(&mut self, key: &SessionKey, publish: PublishPacket) -> Result<(), BrokerError> {
        trace!("[{}] {}", key.client_id, publish);
        let allowed = self.broker.authorize_publish(&key.client_id, &publish.topic) == Access::Allow;
        if !allowed {
            warn!("[{}] not allowed to publish to {}", key.client_id, publish.topic);
        }

        let qos = publish.qos;
        let packet_id = publish.packet_id;
        match (qos, packet_id) {
            (QoS::AtMostOnce, _) => {
                if allowed {
                    self.broker.publish(Message::from(publish));
                }
            }
            (QoS::AtLeastOnce, Some(packet_id)) => {
                if allowed {
                    self.broker.publish(Message::from(publish));
                }
                self.broker.send(key, Packet::PubAck(PubAckPacket { packet_id }))?;
            }
            (QoS::ExactlyOnce, Some(packet_id)) => {
                if allowed && !self.broker.receive_qos2(key, packet_id, Message::from(publish))? {
                    debug!("[{}] duplicate QoS 2 PUBLISH {}", key.client_id, packet_id);
                }
                self.broker.send(key, Packet::PubRec(PubRecPacket { packet_id }))?;
            }
            (_, None) => return Err(ProtocolError::MissingPacketId.into()),
        }
        Ok(())
    }

    fn handle_subscribe(&mut self, key: &SessionKey, subscribe: SubscribePacket) -> Result<(), BrokerError> {
        let mut return_codes = Vec::with_capacity(subscribe.subscriptions.len());
        for request in &subscribe.subscriptions {
            return_codes.push(self.broker.subscribe(key, &request.filter, request.qos)?);
        }
        self.broker.send(
            key,
            Packet::SubAck(SubAckPacket {
                packet_id: subscribe.packet_id,
                return_codes: return_codes.clone(),
            }),
        )?;
        for (request, code) in subscribe.subscriptions.iter().zip(return_codes) {
            if let SubAckReturnCode::Success(granted) = code {
                self.broker.deliver_retained(key, &request.filter, granted)?;
            }
        }
        Ok(())
    }

    fn handle_unsubscribe(&mut self, key: &SessionKey, unsubscribe: UnsubscribePacket) -> Result<(), BrokerError> {
        for filter in &unsubscribe.filters {
            self.broker.unsubscribe(key, filter)?;
        }
        self.broker.send(
            key,
            Packet::UnsubAck(UnsubAckPacket {
                packet_id: unsubscribe.packet_id,
            }),
        )
    }

    /// Packets to write to the transport, in order.
    pub fn outbound(&mut self) -> Result<Vec<Packet>, BrokerError> {
        let mut packets = std::mem::take(&mut self.pending);
        if self.state == ConnectionState::Connected {
            if let Some(key) = &self.session {
                packets.extend(self.broker.drain_outbound(key)?);
            }
        }
        Ok(packets)
    }

    /// Marks the connection closed. Unless the client said DISCONNECT first,
    /// this is an abnormal termination and the Last Will is published.
    pub fn close(&mut self, reason: CloseReason) {
        if self.state == ConnectionState::Connected {
            if let Some(key) = &self.session {
                self.broker.disconnect(key, DisconnectReason::Abnormal);
            }
        }
        if self.state != ConnectionState::Closed {
            match self.client_id() {
                Some(client_id) => info!("[{}] connection closed: {}", client_id, reason),
                None => debug!("connection closed before CONNECT: {}", reason),
            }
        }
        self.state = ConnectionState::Closed;
    }
}
