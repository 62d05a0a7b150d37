//! # picobroker-tokio
//!
//! A Tokio-based MQTT 3.1.1 broker server.
//!
//! Built on top of `picobroker-core` for protocol handling and broker logic.
//! Serves plain TCP and, optionally, MQTT over WebSocket.
//!
//! ## Example
//!
//! ```no_run
//! use picobroker_tokio::{MqttServer, MqttServerConfig};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = MqttServerConfig {
//!         websocket_addr: Some("0.0.0.0:8083".to_owned()),
//!         ..MqttServerConfig::default()
//!     };
//!     MqttServer::with_config(config).run().await?;
//!     Ok(())
//! }
//! ```

// Re-export core types for convenience
pub use picobroker_core::{
    protocol::packets, Access, AllowAll, Authorizer, Broker, BrokerConfig, BrokerError, ClientId, Message, Packet,
    ProtocolError, QoS,
};

pub mod broker;
pub mod error;
pub mod handler;
pub mod io;
pub mod server;
pub mod state;
pub mod time;
pub mod websocket;

pub use broker::{TokioBroker, TokioBrokerExt};
pub use error::{Result, ServerError};
pub use handler::HandlerConfig;
pub use server::{MqttServer, MqttServerConfig, SharedBroker};
pub use state::Transport;
pub use time::StdTimeSource;
