use std::net::SocketAddr;
use std::sync::Arc;

use bytes::BytesMut;
use log::{debug, info, trace, warn};
use picobroker_core::{BrokerError, CloseReason, Connection, ConnectionState, Packet, Step};
use tokio::sync::mpsc;
use tokio::time::{sleep_until, Duration, Instant};

use crate::broker::TokioBroker;
use crate::error::{Result, ServerError};
use crate::io::{encode_frame, read_packet, TransportReader, TransportWriter};
use crate::state::{ServerState, TokioClientLink, Transport};
use crate::time::StdTimeSource;

/// Upper bound on a graceful transport close. Closing a WebSocket sends a
/// close frame, which blocks on a peer that stopped reading.
const CLOSE_TIMEOUT: Duration = Duration::from_secs(1);

/// Server configuration for connection handling
#[derive(Debug, Clone)]
pub struct HandlerConfig {
    /// How long a new connection may stay silent before sending CONNECT.
    pub connect_timeout: Duration,
    /// Decoded packets buffered between the reader task and the connection task.
    pub packet_channel_capacity: usize,
    pub max_packet_size: usize,
}

impl Default for HandlerConfig {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(20),
            packet_channel_capacity: 32,
            max_packet_size: picobroker_core::BrokerConfig::default().max_packet_size,
        }
    }
}

/// Get detailed packet info for logging
fn packet_details(packet: &Packet) -> String {
    match packet {
        Packet::Connect(c) => format!(
            "client_id={}, clean_session={}, keep_alive={}",
            c.client_id, c.clean_session, c.keep_alive
        ),
        Packet::ConnAck(c) => format!("rc={}, session_present={}", c.return_code as u8, c.session_present),
        Packet::Publish(p) => format!(
            "topic={}, qos={}, retain={}, dup={}, payload_len={}",
            p.topic,
            p.qos,
            p.retain,
            p.dup,
            p.payload.len()
        ),
        Packet::PubAck(p) => format!("packet_id={}", p.packet_id),
        Packet::PubRec(p) => format!("packet_id={}", p.packet_id),
        Packet::PubRel(p) => format!("packet_id={}", p.packet_id),
        Packet::PubComp(p) => format!("packet_id={}", p.packet_id),
        Packet::Subscribe(s) => format!("packet_id={}, topics={}", s.packet_id, s.subscriptions.len()),
        Packet::SubAck(s) => format!("packet_id={}, codes={}", s.packet_id, s.return_codes.len()),
        Packet::Unsubscribe(u) => format!("packet_id={}, topics={}", u.packet_id, u.filters.len()),
        Packet::UnsubAck(u) => format!("packet_id={}", u.packet_id),
        Packet::PingReq(_) | Packet::PingResp(_) | Packet::Disconnect(_) => String::new(),
    }
}

fn log_packet(label: &str, direction: &str, packet: &Packet) {
    let details = packet_details(packet);
    if details.is_empty() {
        debug!("[{}] {} {}", label, direction, packet.packet_type());
    } else {
        debug!("[{}] {} {} ({})", label, direction, packet.packet_type(), details);
    }
}

/// Client id once connected, peer address before that.
fn connection_label(connection: &Connection<StdTimeSource>, peer_addr: SocketAddr) -> String {
    connection
        .client_id()
        .map(|client_id| client_id.to_string())
        .unwrap_or_else(|| peer_addr.to_string())
}

fn close_reason(error: &ServerError) -> CloseReason {
    match error {
        ServerError::Io(_) | ServerError::WebSocket(_) | ServerError::Bind { .. } => CloseReason::TransportError,
        ServerError::Broker(
            BrokerError::SessionTakenOver { .. }
            | BrokerError::SessionNotFound { .. }
            | BrokerError::OutboundQueueFull { .. },
        ) => CloseReason::ClosedByBroker,
        ServerError::HandshakeTimeout => CloseReason::ConnectTimeout,
        ServerError::Protocol(_)
        | ServerError::Broker(_)
        | ServerError::UnexpectedTextFrame
        | ServerError::TruncatedPacket { .. } => CloseReason::ProtocolViolation,
    }
}

/// Reads packets off the transport until it closes or breaks. Runs in its
/// own task so the connection task can select over inbound packets and
/// broker wake-ups.
async fn read_loop<R>(mut reader: R, packets: mpsc::Sender<Result<Packet>>, max_packet_size: usize)
where
    R: TransportReader,
{
    let mut buffer = BytesMut::with_capacity(4096);
    loop {
        match read_packet(&mut reader, &mut buffer, max_packet_size).await {
            Ok(Some(packet)) => {
                if packets.send(Ok(packet)).await.is_err() {
                    break;
                }
            }
            Ok(None) => break,
            Err(error) => {
                let _ = packets.send(Err(error)).await;
                break;
            }
        }
    }
}

/// Writes everything the connection has queued.
async fn flush<W>(connection: &mut Connection<StdTimeSource>, writer: &mut W, label: &str) -> Result<()>
where
    W: TransportWriter,
{
    let packets = connection.outbound()?;
    if packets.is_empty() {
        return Ok(());
    }
    for packet in &packets {
        log_packet(label, "Sending", packet);
    }
    let frame = encode_frame(&packets)?;
    trace!("[{}] Writing {} bytes", label, frame.len());
    writer.write_frame(frame).await
}

/// Flushes the connection unless the broker closes the link or the deadline
/// passes first. A peer that stops reading leaves the write pending forever,
/// so it must never be awaited on its own.
async fn flush_until<W>(
    connection: &mut Connection<StdTimeSource>,
    writer: &mut W,
    label: &str,
    link: &TokioClientLink,
    deadline: Option<Instant>,
) -> std::result::Result<(), CloseReason>
where
    W: TransportWriter,
{
    let expired = timeout_reason(connection);
    tokio::select! {
        result = flush(connection, writer, label) => result.map_err(|error| {
            warn!("[{}] {}", label, error);
            close_reason(&error)
        }),
        _ = link.closed() => {
            debug!("[{}] Closed by broker while writing", label);
            Err(CloseReason::ClosedByBroker)
        }
        _ = sleep_until(deadline.unwrap_or_else(Instant::now)), if deadline.is_some() => {
            debug!("[{}] Deadline passed while writing", label);
            Err(expired)
        }
    }
}

fn timeout_reason(connection: &Connection<StdTimeSource>) -> CloseReason {
    match connection.state() {
        ConnectionState::AwaitingConnect => CloseReason::ConnectTimeout,
        _ => CloseReason::KeepAliveTimeout,
    }
}

fn next_deadline(connection: &Connection<StdTimeSource>, config: &HandlerConfig) -> Option<Instant> {
    match connection.state() {
        ConnectionState::AwaitingConnect => Some(Instant::now() + config.connect_timeout),
        _ => connection.keep_alive_timeout().map(|timeout| Instant::now() + timeout),
    }
}

/// Handle a single MQTT client connection
///
/// Drives one [`Connection`] until the transport closes, the client
/// disconnects, a protocol violation occurs, a timer fires or the broker asks
/// for the connection to go away.
pub async fn handle_connection<R, W>(
    reader: R,
    mut writer: W,
    peer_addr: SocketAddr,
    transport: Transport,
    broker: Arc<TokioBroker>,
    state: Arc<ServerState>,
    config: HandlerConfig,
) where
    R: TransportReader,
    W: TransportWriter,
{
    let link = Arc::new(TokioClientLink::new());
    let connection_id = state.register(peer_addr, transport, link.clone());
    let mut connection = Connection::new(broker, link.clone());
    debug!("[{}] New {} connection {}", peer_addr, transport, connection_id);

    let (packet_tx, mut packet_rx) = mpsc::channel(config.packet_channel_capacity.max(1));
    let reader_task = tokio::spawn(read_loop(reader, packet_tx, config.max_packet_size));

    let mut deadline = next_deadline(&connection, &config);

    let reason = loop {
        tokio::select! {
            received = packet_rx.recv() => {
                let packet = match received {
                    Some(Ok(packet)) => packet,
                    Some(Err(error)) => {
                        warn!("[{}] {}", connection_label(&connection, peer_addr), error);
                        break close_reason(&error);
                    }
                    None => break CloseReason::TransportClosed,
                };

                log_packet(&connection_label(&connection, peer_addr), "Received", &packet);
                let step = connection.handle_packet(packet);
                let label = connection_label(&connection, peer_addr);
                if let Err(reason) = flush_until(&mut connection, &mut writer, &label, &link, deadline).await {
                    break reason;
                }
                match step {
                    Ok(Step::Continue) => deadline = next_deadline(&connection, &config),
                    Ok(Step::Close) if connection.state() == ConnectionState::Disconnecting => {
                        break CloseReason::ClientDisconnect;
                    }
                    Ok(Step::Close) => break CloseReason::ConnectRejected,
                    Err(error) => {
                        let error = ServerError::from(error);
                        warn!("[{}] {}", label, error);
                        break close_reason(&error);
                    }
                }
            }

            _ = link.outbound_ready() => {
                let label = connection_label(&connection, peer_addr);
                if let Err(reason) = flush_until(&mut connection, &mut writer, &label, &link, deadline).await {
                    break reason;
                }
            }

            _ = link.closed() => break CloseReason::ClosedByBroker,

            _ = sleep_until(deadline.unwrap_or_else(Instant::now)), if deadline.is_some() => {
                break timeout_reason(&connection);
            }
        }
    };

    connection.close(reason);
    reader_task.abort();
    match tokio::time::timeout(CLOSE_TIMEOUT, writer.close()).await {
        Ok(Ok(())) => {}
        Ok(Err(error)) => trace!("[{}] Error while closing transport: {}", peer_addr, error),
        Err(_) => trace!("[{}] Peer did not take the close in time", peer_addr),
    }
    state.remove(connection_id);
    info!("[{}] {} connection {} ended: {}", peer_addr, transport, connection_id, reason);
}
