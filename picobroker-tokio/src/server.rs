//! TCP and WebSocket listeners around a shared broker.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use log::{debug, error, info, warn};
use picobroker_core::{Authorizer, BrokerConfig};
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinHandle;

use crate::broker::{TokioBroker, TokioBrokerExt};
use crate::error::{Result, ServerError};
use crate::handler::{handle_connection, HandlerConfig};
use crate::io::{StreamReader, StreamWriter, TransportReader, TransportWriter};
use crate::state::{ServerState, Transport};
use crate::websocket;

pub type SharedBroker = Arc<TokioBroker>;

/// Server configuration
#[derive(Debug, Clone)]
pub struct MqttServerConfig {
    pub tcp_addr: String,
    /// WebSocket listener, disabled when `None`.
    pub websocket_addr: Option<String>,
    pub connect_timeout: Duration,
    pub packet_channel_capacity: usize,
    /// Period of the session expiry sweep. Only used when
    /// `broker.session_expiry` is set.
    pub cleanup_interval: Duration,
    pub broker: BrokerConfig,
}

impl Default for MqttServerConfig {
    fn default() -> Self {
        Self {
            tcp_addr: "0.0.0.0:1883".to_owned(),
            websocket_addr: None,
            connect_timeout: Duration::from_secs(20),
            packet_channel_capacity: 32,
            cleanup_interval: Duration::from_secs(5),
            broker: BrokerConfig::default(),
        }
    }
}

impl MqttServerConfig {
    fn handler_config(&self) -> HandlerConfig {
        HandlerConfig {
            connect_timeout: self.connect_timeout,
            packet_channel_capacity: self.packet_channel_capacity,
            max_packet_size: self.broker.max_packet_size,
        }
    }
}

/// MQTT broker server
///
/// Cheap to clone; clones share the broker and the connection table.
#[derive(Clone)]
pub struct MqttServer {
    config: Arc<MqttServerConfig>,
    broker: SharedBroker,
    state: Arc<ServerState>,
}

impl Default for MqttServer {
    fn default() -> Self {
        Self::new()
    }
}

impl MqttServer {
    pub fn new() -> Self {
        Self::with_config(MqttServerConfig::default())
    }

    pub fn with_config(config: MqttServerConfig) -> Self {
        let broker = TokioBroker::new_tokio(config.broker.clone());
        Self::with_broker(config, Arc::new(broker))
    }

    pub fn with_authorizer(config: MqttServerConfig, authorizer: Arc<dyn Authorizer>) -> Self {
        let broker = TokioBroker::new_tokio(config.broker.clone()).with_authorizer(authorizer);
        Self::with_broker(config, Arc::new(broker))
    }

    /// Serves an existing broker, e.g. one shared with in-process publishers.
    pub fn with_broker(config: MqttServerConfig, broker: SharedBroker) -> Self {
        Self {
            config: Arc::new(config),
            broker,
            state: Arc::new(ServerState::new()),
        }
    }

    pub fn config(&self) -> &MqttServerConfig {
        &self.config
    }

    pub fn broker(&self) -> &SharedBroker {
        &self.broker
    }

    /// Open transport connections, including ones still before CONNECT.
    pub fn connection_count(&self) -> usize {
        self.state.connection_count()
    }

    /// Closes every open connection. Listeners keep running.
    pub fn disconnect_all(&self) {
        self.state.close_all();
    }

    /// Spawns the task serving one freshly accepted transport.
    pub fn on_connection_established<R, W>(
        &self,
        reader: R,
        writer: W,
        peer_addr: SocketAddr,
        transport: Transport,
    ) -> JoinHandle<()>
    where
        R: TransportReader,
        W: TransportWriter,
    {
        tokio::spawn(handle_connection(
            reader,
            writer,
            peer_addr,
            transport,
            self.broker.clone(),
            self.state.clone(),
            self.config.handler_config(),
        ))
    }

    /// Binds the configured addresses and serves until a listener fails.
    pub async fn run(&self) -> Result<()> {
        let tcp = bind(&self.config.tcp_addr).await?;
        let websocket = match &self.config.websocket_addr {
            Some(addr) => Some(bind(addr).await?),
            None => None,
        };
        self.serve(tcp, websocket).await
    }

    /// Serves on already bound listeners.
    pub async fn serve(&self, tcp: TcpListener, websocket: Option<TcpListener>) -> Result<()> {
        info!("MQTT server listening on {}", tcp.local_addr()?);
        if let Some(listener) = &websocket {
            info!("MQTT over WebSocket listening on {}", listener.local_addr()?);
        }

        let cleanup = self.spawn_session_cleanup();
        let result = match websocket {
            Some(websocket) => tokio::try_join!(self.accept_tcp(tcp), self.accept_websocket(websocket)).map(|_| ()),
            None => self.accept_tcp(tcp).await,
        };
        if let Some(cleanup) = cleanup {
            cleanup.abort();
        }
        result
    }

    async fn accept_tcp(&self, listener: TcpListener) -> Result<()> {
        loop {
            let (stream, peer_addr) = match listener.accept().await {
                Ok(accepted) => accepted,
                Err(e) => {
                    error!("Failed to accept TCP connection: {}", e);
                    tokio::time::sleep(Duration::from_millis(100)).await;
                    continue;
                }
            };
            debug!("Accepted TCP connection from {}", peer_addr);
            if let Err(e) = stream.set_nodelay(true) {
                debug!("[{}] Could not set TCP_NODELAY: {}", peer_addr, e);
            }
            let (reader, writer) = stream.into_split();
            self.on_connection_established(
                StreamReader::new(reader),
                StreamWriter::new(writer),
                peer_addr,
                Transport::Tcp,
            );
        }
    }

    async fn accept_websocket(&self, listener: TcpListener) -> Result<()> {
        loop {
            let (stream, peer_addr) = match listener.accept().await {
                Ok(accepted) => accepted,
                Err(e) => {
                    error!("Failed to accept WebSocket connection: {}", e);
                    tokio::time::sleep(Duration::from_millis(100)).await;
                    continue;
                }
            };
            debug!("Accepted WebSocket connection from {}", peer_addr);
            let server = self.clone();
            tokio::spawn(async move {
                match server.upgrade(stream).await {
                    Ok((reader, writer)) => {
                        server.on_connection_established(reader, writer, peer_addr, Transport::WebSocket);
                    }
                    Err(e) => warn!("[{}] WebSocket upgrade failed: {}", peer_addr, e),
                }
            });
        }
    }

    async fn upgrade(
        &self,
        stream: TcpStream,
    ) -> Result<(websocket::WebSocketReader<TcpStream>, websocket::WebSocketWriter<TcpStream>)> {
        tokio::time::timeout(self.config.connect_timeout, websocket::accept(stream))
            .await
            .map_err(|_| ServerError::HandshakeTimeout)?
    }

    fn spawn_session_cleanup(&self) -> Option<JoinHandle<()>> {
        let expiry = self.broker.config().session_expiry?;
        let broker = self.broker.clone();
        let period = self.config.cleanup_interval;
        info!("Expiring offline sessions after {:?}, checking every {:?}", expiry, period);
        Some(tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);
            loop {
                interval.tick().await;
                let expired = broker.expire_sessions();
                if expired > 0 {
                    info!("Expired {} offline sessions", expired);
                }
            }
        }))
    }
}

async fn bind(addr: &str) -> Result<TcpListener> {
    TcpListener::bind(addr).await.map_err(|source| ServerError::Bind {
        addr: addr.to_owned(),
        source,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = MqttServerConfig::default();
        assert_eq!(config.tcp_addr, "0.0.0.0:1883");
        assert!(config.websocket_addr.is_none());
        assert_eq!(config.connect_timeout, Duration::from_secs(20));
        assert_eq!(config.handler_config().max_packet_size, config.broker.max_packet_size);
    }

    #[tokio::test]
    async fn test_bind_error_names_address() {
        let taken = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = taken.local_addr().unwrap().to_string();
        match bind(&addr).await {
            Err(ServerError::Bind { addr: reported, .. }) => assert_eq!(reported, addr),
            other => panic!("expected bind error, got {:?}", other.map(|_| ())),
        }
    }
}
