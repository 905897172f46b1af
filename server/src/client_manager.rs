//! Transport connection tracking for the game server
//!
//! This module owns the server's view of live websocket connections:
//! - Connection lifecycle (accept, close) and the global capacity limit
//! - Outbound routing through each connection's writer channel
//! - Activity timestamps for logging
//!
//! A connection is not a player. Which room and seat a connection speaks for
//! is tracked by the session manager; this module only knows how to reach it.

use log::{debug, info};
use shared::ServerMessage;
use std::collections::HashMap;
use std::net::SocketAddr;
use std::time::{Duration, Instant};
use tokio::sync::mpsc;

pub type ConnectionId = u64;

/// A live transport connection
///
/// Each connection holds:
/// - Its identity and remote address
/// - The sending half of the writer task's channel
/// - Activity timestamps
#[derive(Debug)]
pub struct Connection {
    /// Unique identifier assigned by the server
    pub id: ConnectionId,
    /// Remote address of the peer
    pub addr: SocketAddr,
    pub connected_at: Instant,
    /// Last time we received a frame from this peer
    pub last_seen: Instant,
    /// Messages queued to this connection so far
    pub messages_sent: u64,
    sender: mpsc::UnboundedSender<ServerMessage>,
}

impl Connection {
    pub fn new(
        id: ConnectionId,
        addr: SocketAddr,
        sender: mpsc::UnboundedSender<ServerMessage>,
    ) -> Self {
        let now = Instant::now();
        Self {
            id,
            addr,
            connected_at: now,
            last_seen: now,
            messages_sent: 0,
            sender,
        }
    }

    /// Queues a message for the connection's writer task
    ///
    /// Returns false if the writer has already gone away. Delivery order
    /// matches call order.
    pub fn send(&mut self, message: ServerMessage) -> bool {
        if self.sender.send(message).is_ok() {
            self.messages_sent += 1;
            true
        } else {
            false
        }
    }

    pub fn touch(&mut self) {
        self.last_seen = Instant::now();
    }

    /// Time since the last frame from the peer
    pub fn idle_for(&self) -> Duration {
        self.last_seen.elapsed()
    }
}

/// Registry of all live connections
///
/// Enforces the server-wide connection cap and hands out connection ids.
/// Ids are never reused within a process.
pub struct ClientManager {
    /// Live connections indexed by id
    connections: HashMap<ConnectionId, Connection>,
    /// Next id to hand out
    next_connection_id: ConnectionId,
    /// Maximum number of concurrent connections
    max_connections: usize,
}

impl ClientManager {
    pub fn new(max_connections: usize) -> Self {
        Self {
            connections: HashMap::new(),
            next_connection_id: 1,
            max_connections,
        }
    }

    /// Registers a new connection
    ///
    /// Returns None when the server is at capacity; the caller should tell
    /// the peer and close the socket.
    pub fn add_connection(
        &mut self,
        addr: SocketAddr,
        sender: mpsc::UnboundedSender<ServerMessage>,
    ) -> Option<ConnectionId> {
        if self.connections.len() >= self.max_connections {
            return None;
        }

        let id = self.next_connection_id;
        self.next_connection_id += 1;

        info!("Connection {} opened from {}", id, addr);
        self.connections.insert(id, Connection::new(id, addr, sender));
        Some(id)
    }

    /// Forgets a connection. Returns false if it was already gone.
    pub fn remove_connection(&mut self, id: &ConnectionId) -> bool {
        if let Some(connection) = self.connections.remove(id) {
            info!(
                "Connection {} from {} closed after {:.1}s ({} messages sent, idle {:.1}s)",
                connection.id,
                connection.addr,
                connection.connected_at.elapsed().as_secs_f32(),
                connection.messages_sent,
                connection.idle_for().as_secs_f32()
            );
            true
        } else {
            false
        }
    }

    /// Queues a message for one connection
    ///
    /// Unknown or closed connections are skipped; a closed writer is logged
    /// and left for the reader side to clean up.
    pub fn send(&mut self, id: ConnectionId, message: ServerMessage) -> bool {
        match self.connections.get_mut(&id) {
            Some(connection) => {
                let delivered = connection.send(message);
                if !delivered {
                    debug!("Connection {} writer closed, dropping message", id);
                }
                delivered
            }
            None => false,
        }
    }

    /// Delivers a batch of messages in order
    pub fn deliver(&mut self, deliveries: Vec<(ConnectionId, ServerMessage)>) {
        for (id, message) in deliveries {
            self.send(id, message);
        }
    }

    pub fn touch(&mut self, id: ConnectionId) {
        if let Some(connection) = self.connections.get_mut(&id) {
            connection.touch();
        }
    }

    pub fn addr(&self, id: ConnectionId) -> Option<SocketAddr> {
        self.connections.get(&id).map(|c| c.addr)
    }

    pub fn contains(&self, id: ConnectionId) -> bool {
        self.connections.contains_key(&id)
    }

    pub fn len(&self) -> usize {
        self.connections.len()
    }

    pub fn is_empty(&self) -> bool {
        self.connections.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use shared::GameError;

    fn test_addr() -> SocketAddr {
        "127.0.0.1:8080".parse().unwrap()
    }

    fn test_addr2() -> SocketAddr {
        "127.0.0.1:8081".parse().unwrap()
    }

    fn error_message() -> ServerMessage {
        ServerMessage::Error {
            error: GameError::RoomNotFound,
        }
    }

    #[test]
    fn test_connection_creation() {
        let (tx, _rx) = mpsc::unbounded_channel();
        let connection = Connection::new(1, test_addr(), tx);

        assert_eq!(connection.id, 1);
        assert_eq!(connection.addr, test_addr());
        assert_eq!(connection.messages_sent, 0);
        assert!(connection.idle_for() < Duration::from_secs(1));
    }

    #[test]
    fn test_connection_touch() {
        let (tx, _rx) = mpsc::unbounded_channel();
        let mut connection = Connection::new(1, test_addr(), tx);

        connection.last_seen = Instant::now() - Duration::from_secs(2);
        assert!(connection.idle_for() >= Duration::from_secs(2));

        connection.touch();
        assert!(connection.idle_for() < Duration::from_secs(1));
    }

    #[test]
    fn test_manager_creation() {
        let manager = ClientManager::new(5);
        assert_eq!(manager.max_connections, 5);
        assert!(manager.is_empty());
        assert_eq!(manager.len(), 0);
    }

    #[test]
    fn test_add_multiple_connections() {
        let mut manager = ClientManager::new(3);
        let (tx, _rx) = mpsc::unbounded_channel();

        let id1 = manager.add_connection(test_addr(), tx.clone()).unwrap();
        let id2 = manager.add_connection(test_addr2(), tx).unwrap();

        assert_eq!(id1, 1);
        assert_eq!(id2, 2);
        assert_eq!(manager.len(), 2);
        assert_eq!(manager.addr(id2), Some(test_addr2()));
    }

    #[test]
    fn test_add_connection_max_capacity() {
        let mut manager = ClientManager::new(1);
        let (tx, _rx) = mpsc::unbounded_channel();

        assert!(manager.add_connection(test_addr(), tx.clone()).is_some());
        assert!(manager.add_connection(test_addr2(), tx).is_none());
        assert_eq!(manager.len(), 1);
    }

    #[test]
    fn test_ids_are_not_reused() {
        let mut manager = ClientManager::new(1);
        let (tx, _rx) = mpsc::unbounded_channel();

        let first = manager.add_connection(test_addr(), tx.clone()).unwrap();
        assert!(manager.remove_connection(&first));
        let second = manager.add_connection(test_addr(), tx).unwrap();

        assert_ne!(first, second);
    }

    #[test]
    fn test_remove_nonexistent_connection() {
        let mut manager = ClientManager::new(2);
        assert!(!manager.remove_connection(&999));
    }

    #[test]
    fn test_send_preserves_order() {
        let mut manager = ClientManager::new(2);
        let (tx, mut rx) = mpsc::unbounded_channel();
        let id = manager.add_connection(test_addr(), tx).unwrap();

        manager.deliver(vec![
            (id, error_message()),
            (
                id,
                ServerMessage::RoomReset {
                    message: "reset".to_string(),
                },
            ),
        ]);

        assert_eq!(rx.try_recv().unwrap(), error_message());
        assert!(matches!(rx.try_recv().unwrap(), ServerMessage::RoomReset { .. }));
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_send_to_closed_writer() {
        let mut manager = ClientManager::new(2);
        let (tx, rx) = mpsc::unbounded_channel();
        let id = manager.add_connection(test_addr(), tx).unwrap();
        drop(rx);

        assert!(!manager.send(id, error_message()));
        assert!(!manager.send(42, error_message()));
        assert!(manager.contains(id));
    }
}
