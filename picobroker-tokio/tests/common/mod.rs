#![allow(dead_code)]

use std::net::SocketAddr;
use std::time::Duration;

use bytes::{Buf, Bytes, BytesMut};
use picobroker_tokio::packets::{
    ConnAckPacket, ConnectPacket, PublishPacket, SubAckPacket, SubscribePacket, SubscriptionRequest,
};
use picobroker_tokio::{MqttServer, MqttServerConfig, Packet, QoS};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinHandle;
use tokio::time::timeout;

pub const RECV_TIMEOUT: Duration = Duration::from_secs(5);
const CLIENT_MAX_PACKET: usize = 1 << 20;

pub struct TestServer {
    pub server: MqttServer,
    pub tcp_addr: SocketAddr,
    pub ws_addr: SocketAddr,
    task: JoinHandle<()>,
}

impl Drop for TestServer {
    fn drop(&mut self) {
        self.task.abort();
        self.server.disconnect_all();
    }
}

pub async fn start_server(config: MqttServerConfig) -> TestServer {
    let _ = env_logger::builder().is_test(true).try_init();

    let tcp = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let ws = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let tcp_addr = tcp.local_addr().unwrap();
    let ws_addr = ws.local_addr().unwrap();

    let server = MqttServer::with_config(config);
    let task = tokio::spawn({
        let server = server.clone();
        async move {
            if let Err(e) = server.serve(tcp, Some(ws)).await {
                panic!("server stopped: {}", e);
            }
        }
    });
    TestServer {
        server,
        tcp_addr,
        ws_addr,
        task,
    }
}

pub async fn start_default_server() -> TestServer {
    start_server(MqttServerConfig::default()).await
}

/// Hand-driven MQTT client over TCP.
pub struct TestClient {
    stream: TcpStream,
    buffer: BytesMut,
}

impl TestClient {
    pub async fn open(addr: SocketAddr) -> Self {
        Self {
            stream: TcpStream::connect(addr).await.unwrap(),
            buffer: BytesMut::new(),
        }
    }

    pub async fn connect(addr: SocketAddr, connect: ConnectPacket) -> (Self, ConnAckPacket) {
        let mut client = Self::open(addr).await;
        client.send(Packet::Connect(connect)).await;
        match client.recv().await {
            Packet::ConnAck(connack) => (client, connack),
            other => panic!("expected CONNACK, got {:?}", other),
        }
    }

    pub async fn connected(addr: SocketAddr, client_id: &str) -> Self {
        let (client, connack) = Self::connect(addr, ConnectPacket::new(client_id, 60)).await;
        assert_eq!(connack.return_code as u8, 0);
        client
    }

    pub async fn send(&mut self, packet: Packet) {
        let bytes = packet.to_bytes().unwrap();
        self.send_raw(&bytes).await;
    }

    pub async fn send_raw(&mut self, bytes: &[u8]) {
        self.stream.write_all(bytes).await.unwrap();
    }

    async fn next(&mut self) -> Option<Packet> {
        loop {
            if let Some((packet, consumed)) = Packet::decode(&self.buffer[..], CLIENT_MAX_PACKET).unwrap() {
                self.buffer.advance(consumed);
                return Some(packet);
            }
            match self.stream.read_buf(&mut self.buffer).await {
                Ok(0) | Err(_) => return None,
                Ok(_) => {}
            }
        }
    }

    pub async fn recv(&mut self) -> Packet {
        timeout(RECV_TIMEOUT, self.next())
            .await
            .expect("timed out waiting for a packet")
            .expect("connection closed")
    }

    pub async fn recv_publish(&mut self) -> PublishPacket {
        match self.recv().await {
            Packet::Publish(publish) => publish,
            other => panic!("expected PUBLISH, got {:?}", other),
        }
    }

    pub async fn subscribe(&mut self, filter: &str, qos: QoS) -> SubAckPacket {
        self.send(subscribe(1, filter, qos)).await;
        match self.recv().await {
            Packet::SubAck(suback) => suback,
            other => panic!("expected SUBACK, got {:?}", other),
        }
    }

    pub async fn expect_closed(&mut self) {
        let next = timeout(RECV_TIMEOUT, self.next())
            .await
            .expect("connection still open");
        assert!(next.is_none(), "expected the connection to close, got {:?}", next);
    }

    pub async fn expect_nothing(&mut self, wait: Duration) {
        if let Ok(next) = timeout(wait, self.next()).await {
            panic!("expected silence, got {:?}", next);
        }
    }
}

pub fn publish(topic: &str, payload: &'static [u8], qos: QoS, packet_id: Option<u16>, retain: bool) -> Packet {
    Packet::Publish(PublishPacket {
        topic: topic.to_owned(),
        packet_id,
        payload: Bytes::from_static(payload),
        qos,
        dup: false,
        retain,
    })
}

pub fn subscribe(packet_id: u16, filter: &str, qos: QoS) -> Packet {
    Packet::Subscribe(SubscribePacket {
        packet_id,
        subscriptions: vec![SubscriptionRequest {
            filter: filter.to_owned(),
            qos,
        }],
    })
}
