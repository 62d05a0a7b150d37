use std::time::Duration;

use crate::protocol::qos::QoS;

/// Runtime-independent broker limits.
#[derive(Debug, Clone)]
pub struct BrokerConfig {
    /// Largest accepted control packet, fixed header included.
    pub max_packet_size: usize,
    /// QoS 1/2 deliveries that may be awaiting acknowledgement per session.
    /// Further deliveries wait in the session queue.
    pub max_inflight: usize,
    /// Messages kept per session while it is offline or its in-flight window
    /// is full. The oldest message is dropped on overflow.
    pub max_queued_messages: usize,
    /// Encoded packets waiting to be written to a live connection. A client
    /// that lets this fill up is disconnected.
    pub max_outbound_packets: usize,
    /// Highest QoS the broker grants on SUBSCRIBE.
    pub max_qos: QoS,
    /// How long a persistent session survives without a connection.
    /// `None` keeps it until the client reconnects with a clean session.
    pub session_expiry: Option<Duration>,
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            max_packet_size: 1024 * 1024,
            max_inflight: 32,
            max_queued_messages: 1000,
            max_outbound_packets: 1024,
            max_qos: QoS::ExactlyOnce,
            session_expiry: None,
        }
    }
}
