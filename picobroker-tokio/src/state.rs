use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use dashmap::DashMap;
use picobroker_core::ClientLink;
use tokio::sync::Notify;

/// [`ClientLink`] of a connection task.
///
/// `Notify` keeps a permit when nobody is waiting yet, so a wake-up issued
/// while the task is busy writing is not lost.
#[derive(Debug, Default)]
pub struct TokioClientLink {
    outbound: Notify,
    shutdown: Notify,
    closing: AtomicBool,
}

impl TokioClientLink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Resolves once the broker has queued packets for this connection.
    pub async fn outbound_ready(&self) {
        self.outbound.notified().await
    }

    /// Resolves once the broker asked for this connection to be closed.
    pub async fn closed(&self) {
        if self.is_closing() {
            return;
        }
        self.shutdown.notified().await
    }

    pub fn is_closing(&self) -> bool {
        self.closing.load(Ordering::Acquire)
    }
}

impl ClientLink for TokioClientLink {
    fn wake(&self) {
        self.outbound.notify_one();
    }

    fn close(&self) {
        self.closing.store(true, Ordering::Release);
        self.shutdown.notify_one();
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transport {
    Tcp,
    WebSocket,
}

impl core::fmt::Display for Transport {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            Transport::Tcp => f.write_str("tcp"),
            Transport::WebSocket => f.write_str("ws"),
        }
    }
}

/// Lightweight connection metadata
#[derive(Debug)]
pub struct ConnectionHandle {
    pub peer_addr: SocketAddr,
    pub transport: Transport,
    pub link: Arc<TokioClientLink>,
}

/// Live transport connections, whether or not they completed CONNECT.
#[derive(Debug, Default)]
pub struct ServerState {
    connections: DashMap<u64, ConnectionHandle>,
    next_connection_id: AtomicU64,
}

impl ServerState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, peer_addr: SocketAddr, transport: Transport, link: Arc<TokioClientLink>) -> u64 {
        let id = self.next_connection_id.fetch_add(1, Ordering::Relaxed);
        self.connections.insert(
            id,
            ConnectionHandle {
                peer_addr,
                transport,
                link,
            },
        );
        id
    }

    pub fn remove(&self, id: u64) -> Option<ConnectionHandle> {
        self.connections.remove(&id).map(|(_, handle)| handle)
    }

    pub fn connection_count(&self) -> usize {
        self.connections.len()
    }

    /// Asks every connection task to close.
    pub fn close_all(&self) {
        for entry in self.connections.iter() {
            entry.link.close();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn peer() -> SocketAddr {
        SocketAddr::from(([127, 0, 0, 1], 40000))
    }

    #[test]
    fn test_register_and_remove() {
        let state = ServerState::new();
        let a = state.register(peer(), Transport::Tcp, Arc::new(TokioClientLink::new()));
        let b = state.register(peer(), Transport::WebSocket, Arc::new(TokioClientLink::new()));
        assert_ne!(a, b);
        assert_eq!(state.connection_count(), 2);
        assert_eq!(state.remove(a).map(|handle| handle.transport), Some(Transport::Tcp));
        assert!(state.remove(a).is_none());
        assert_eq!(state.connection_count(), 1);
    }

    #[tokio::test]
    async fn test_wake_before_wait_is_kept() {
        let link = TokioClientLink::new();
        link.wake();
        tokio::time::timeout(Duration::from_millis(100), link.outbound_ready())
            .await
            .expect("stored permit");
    }

    #[tokio::test]
    async fn test_close_is_sticky() {
        let link = TokioClientLink::new();
        link.close();
        tokio::time::timeout(Duration::from_millis(100), link.closed()).await.unwrap();
        tokio::time::timeout(Duration::from_millis(100), link.closed()).await.unwrap();
        assert!(link.is_closing());
    }

    #[test]
    fn test_close_all() {
        let state = ServerState::new();
        let link = Arc::new(TokioClientLink::new());
        state.register(peer(), Transport::Tcp, link.clone());
        state.close_all();
        assert!(link.is_closing());
    }
}
