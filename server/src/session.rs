//! Session bookkeeping: which connection speaks for which seat
//!
//! A session is created when a join succeeds and is keyed by the player's
//! token. It outlives its transport: closing a connection only marks the
//! session disconnected, and the sweep task removes the seat once the grace
//! period has run out without a reconnect.

use crate::client_manager::ConnectionId;
use crate::room::PlayerId;
use log::debug;
use std::collections::HashMap;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionEntry {
    pub token: String,
    pub room_id: String,
    pub player_id: PlayerId,
    pub player_name: String,
    pub connection: Option<ConnectionId>,
    pub disconnected_at: Option<u64>,
}

#[derive(Debug, Default)]
pub struct SessionManager {
    by_token: HashMap<String, SessionEntry>,
    by_connection: HashMap<ConnectionId, String>,
}

impl SessionManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Binds `connection` to the seat behind `token`.
    ///
    /// Any session the connection held before is dropped from the connection
    /// index. Returns the connection that held `token` before, if it differs.
    pub fn bind(
        &mut self,
        connection: ConnectionId,
        token: &str,
        room_id: &str,
        player_id: PlayerId,
        player_name: &str,
    ) -> Option<ConnectionId> {
        if let Some(old_token) = self.by_connection.remove(&connection) {
            if old_token != token {
                if let Some(entry) = self.by_token.get_mut(&old_token) {
                    entry.connection = None;
                }
            }
        }

        let previous = self
            .by_token
            .get(token)
            .and_then(|entry| entry.connection)
            .filter(|c| *c != connection);
        if let Some(previous) = previous {
            self.by_connection.remove(&previous);
        }

        self.by_token.insert(
            token.to_string(),
            SessionEntry {
                token: token.to_string(),
                room_id: room_id.to_string(),
                player_id,
                player_name: player_name.to_string(),
                connection: Some(connection),
                disconnected_at: None,
            },
        );
        self.by_connection.insert(connection, token.to_string());
        debug!("Session for {} bound to connection {}", player_name, connection);
        previous
    }

    pub fn for_connection(&self, connection: ConnectionId) -> Option<&SessionEntry> {
        self.by_connection
            .get(&connection)
            .and_then(|token| self.by_token.get(token))
    }

    pub fn for_token(&self, token: &str) -> Option<&SessionEntry> {
        self.by_token.get(token)
    }

    /// The transport went away. The seat stays reserved.
    pub fn detach(&mut self, connection: ConnectionId, now: u64) -> Option<SessionEntry> {
        let token = self.by_connection.remove(&connection)?;
        let entry = self.by_token.get_mut(&token)?;
        entry.connection = None;
        entry.disconnected_at = Some(now);
        Some(entry.clone())
    }

    /// Forgets the session entirely, e.g. after an explicit leave.
    pub fn remove(&mut self, token: &str) -> Option<SessionEntry> {
        let entry = self.by_token.remove(token)?;
        if let Some(connection) = entry.connection {
            self.by_connection.remove(&connection);
        }
        Some(entry)
    }

    /// Disconnected sessions whose grace period has elapsed.
    pub fn expired(&self, now: u64, grace_ms: u64) -> Vec<SessionEntry> {
        self.by_token
            .values()
            .filter(|entry| match entry.disconnected_at {
                Some(since) => now.saturating_sub(since) >= grace_ms,
                None => false,
            })
            .cloned()
            .collect()
    }

    pub fn len(&self) -> usize {
        self.by_token.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_token.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bind_and_lookup() {
        let mut sessions = SessionManager::new();
        assert!(sessions.bind(1, "tok-a", "ROOM1", 7, "Alice").is_none());

        let entry = sessions.for_connection(1).unwrap();
        assert_eq!(entry.room_id, "ROOM1");
        assert_eq!(entry.player_id, 7);
        assert_eq!(sessions.for_token("tok-a").unwrap().connection, Some(1));
        assert!(sessions.for_connection(2).is_none());
    }

    #[test]
    fn test_detach_keeps_session() {
        let mut sessions = SessionManager::new();
        sessions.bind(1, "tok-a", "ROOM1", 7, "Alice");

        let entry = sessions.detach(1, 5_000).unwrap();
        assert_eq!(entry.disconnected_at, Some(5_000));
        assert!(sessions.for_connection(1).is_none());
        assert_eq!(sessions.len(), 1);
        assert!(sessions.detach(1, 6_000).is_none());
    }

    #[test]
    fn test_rebind_from_new_connection() {
        let mut sessions = SessionManager::new();
        sessions.bind(1, "tok-a", "ROOM1", 7, "Alice");
        sessions.detach(1, 5_000);

        assert!(sessions.bind(2, "tok-a", "ROOM1", 7, "Alice").is_none());
        let entry = sessions.for_connection(2).unwrap();
        assert_eq!(entry.disconnected_at, None);
        assert!(sessions.expired(100_000, 60_000).is_empty());
    }

    #[test]
    fn test_takeover_reports_previous_connection() {
        let mut sessions = SessionManager::new();
        sessions.bind(1, "tok-a", "ROOM1", 7, "Alice");

        assert_eq!(sessions.bind(2, "tok-a", "ROOM1", 7, "Alice"), Some(1));
        assert!(sessions.for_connection(1).is_none());
        assert_eq!(sessions.for_connection(2).unwrap().player_id, 7);
    }

    #[test]
    fn test_switching_rooms_releases_old_binding() {
        let mut sessions = SessionManager::new();
        sessions.bind(1, "tok-a", "ROOM1", 7, "Alice");
        sessions.bind(1, "tok-b", "ROOM2", 3, "Alice");

        assert_eq!(sessions.for_connection(1).unwrap().room_id, "ROOM2");
        assert_eq!(sessions.for_token("tok-a").unwrap().connection, None);
    }

    #[test]
    fn test_expired_after_grace() {
        let mut sessions = SessionManager::new();
        sessions.bind(1, "tok-a", "ROOM1", 7, "Alice");
        sessions.bind(2, "tok-b", "ROOM1", 8, "Bob");
        sessions.detach(1, 10_000);

        assert!(sessions.expired(69_999, 60_000).is_empty());
        let expired = sessions.expired(70_000, 60_000);
        assert_eq!(expired.len(), 1);
        assert_eq!(expired[0].token, "tok-a");

        sessions.remove("tok-a");
        assert!(sessions.expired(70_000, 60_000).is_empty());
        assert_eq!(sessions.len(), 1);
    }

    #[test]
    fn test_remove_clears_connection_index() {
        let mut sessions = SessionManager::new();
        sessions.bind(1, "tok-a", "ROOM1", 7, "Alice");

        assert!(sessions.remove("tok-a").is_some());
        assert!(sessions.for_connection(1).is_none());
        assert!(sessions.is_empty());
        assert!(sessions.remove("tok-a").is_none());
    }
}
