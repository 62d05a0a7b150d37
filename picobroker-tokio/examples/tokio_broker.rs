//! Standalone MQTT broker (Tokio)
//!
//! Listens for MQTT on TCP and, when `PICOBROKER_WS_ADDR` is set, on
//! WebSocket too. Test with any MQTT client:
//!
//! ```text
//! mosquitto_sub -h localhost -t 'test/#' -q 1
//! mosquitto_pub -h localhost -t test/topic -m "Hello, MQTT!" -q 1
//! ```

use std::env;
use std::time::Duration;

use picobroker_tokio::{BrokerConfig, MqttServer, MqttServerConfig};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let config = MqttServerConfig {
        tcp_addr: env::var("PICOBROKER_TCP_ADDR").unwrap_or_else(|_| "0.0.0.0:1883".to_owned()),
        websocket_addr: env::var("PICOBROKER_WS_ADDR").ok(),
        broker: BrokerConfig {
            session_expiry: Some(Duration::from_secs(3600)),
            ..BrokerConfig::default()
        },
        ..MqttServerConfig::default()
    };

    log::info!(
        "Starting PicoBroker on {} (websocket: {})",
        config.tcp_addr,
        config.websocket_addr.as_deref().unwrap_or("disabled")
    );

    let server = MqttServer::with_config(config);
    tokio::select! {
        result = server.run() => result?,
        _ = tokio::signal::ctrl_c() => {
            log::info!("Shutting down, closing {} connections", server.connection_count());
            server.disconnect_all();
        }
    }
    Ok(())
}
