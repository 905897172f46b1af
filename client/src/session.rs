//! Client-side view of "who am I and where am I"
//!
//! `ClientSession` is updated from every server event and request the user
//! sends, and mirrors its room membership into the session cache.

use crate::cache::SessionCache;
use log::warn;
use shared::{timestamp_ms, ClientMessage, GameError, ServerMessage};
use std::path::PathBuf;

#[derive(Debug, Clone)]
pub struct ClientSession {
    pub player_name: String,
    pub room_id: Option<String>,
    pub session_token: Option<String>,
    cache_path: Option<PathBuf>,
    /// Room we asked to join and have not heard back about
    pending_join: Option<String>,
}

impl ClientSession {
    pub fn new(player_name: &str, cache_path: Option<PathBuf>) -> Self {
        Self {
            player_name: player_name.to_string(),
            room_id: None,
            session_token: None,
            cache_path,
            pending_join: None,
        }
    }

    /// A join request for the cached room, if the cache belongs to this
    /// player and is still fresh.
    pub fn resume_request(&self, now: u64) -> Option<ClientMessage> {
        let path = self.cache_path.as_ref()?;
        let cache = SessionCache::load_valid(path, now)?;
        if cache.player_name != self.player_name {
            return None;
        }
        Some(ClientMessage::JoinRoom {
            room_id: cache.room_id,
            player_name: cache.player_name,
            password: None,
            session_token: cache.session_token,
        })
    }

    /// Tracks requests that change membership.
    pub fn on_request(&mut self, message: &ClientMessage) {
        match message {
            ClientMessage::JoinRoom { room_id, .. } => self.pending_join = Some(room_id.clone()),
            ClientMessage::LeaveRoom => {
                self.room_id = None;
                self.session_token = None;
                self.clear_cache();
            }
            _ => {}
        }
    }

    /// Applies a server event to the local state.
    pub fn on_event(&mut self, message: &ServerMessage) {
        match message {
            ServerMessage::RoomJoined {
                room_id,
                session_token,
                ..
            } => {
                self.pending_join = None;
                self.room_id = Some(room_id.clone());
                self.session_token = Some(session_token.clone());
                self.save_cache();
            }
            ServerMessage::JoinError { error } => {
                let failed = self.pending_join.take();
                // A cached seat that no longer exists is not worth retrying.
                if matches!(error, GameError::RoomNotFound | GameError::InvalidPassword)
                    && failed.is_some()
                    && self.room_id.is_none()
                {
                    self.clear_cache();
                }
            }
            _ => {}
        }
    }

    fn save_cache(&self) {
        let (Some(path), Some(room_id)) = (&self.cache_path, &self.room_id) else {
            return;
        };
        let cache = SessionCache::new(
            &self.player_name,
            room_id,
            self.session_token.clone(),
            timestamp_ms(),
        );
        if let Err(e) = cache.save(path) {
            warn!("Could not write session cache {}: {}", path.display(), e);
        }
    }

    fn clear_cache(&self) {
        if let Some(path) = &self.cache_path {
            SessionCache::clear(path);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use shared::RoomInfo;
    use std::collections::BTreeMap;
    use tempfile::tempdir;

    fn joined(room_id: &str, token: &str) -> ServerMessage {
        ServerMessage::RoomJoined {
            room_id: room_id.to_string(),
            room_name: "Room".to_string(),
            session_token: token.to_string(),
            room_info: RoomInfo {
                room_id: room_id.to_string(),
                room_name: "Room".to_string(),
                scores: BTreeMap::new(),
                current_round: None,
                round_number: 0,
                players: Vec::new(),
                current_players: 1,
                max_players: 4,
                recent_rounds: Vec::new(),
            },
        }
    }

    #[test]
    fn test_join_is_cached_and_resumable() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("session.json");
        let mut session = ClientSession::new("Alice", Some(path.clone()));

        session.on_event(&joined("lobby", "tok-1"));
        assert_eq!(session.room_id.as_deref(), Some("lobby"));

        let restarted = ClientSession::new("Alice", Some(path));
        assert_eq!(
            restarted.resume_request(timestamp_ms()),
            Some(ClientMessage::JoinRoom {
                room_id: "lobby".to_string(),
                player_name: "Alice".to_string(),
                password: None,
                session_token: Some("tok-1".to_string()),
            })
        );
    }

    #[test]
    fn test_cache_of_other_player_is_ignored() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("session.json");
        let mut session = ClientSession::new("Alice", Some(path.clone()));
        session.on_event(&joined("lobby", "tok-1"));

        let other = ClientSession::new("Bob", Some(path));
        assert!(other.resume_request(timestamp_ms()).is_none());
    }

    #[test]
    fn test_leave_clears_cache() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("session.json");
        let mut session = ClientSession::new("Alice", Some(path.clone()));
        session.on_event(&joined("lobby", "tok-1"));

        session.on_request(&ClientMessage::LeaveRoom);
        assert!(session.room_id.is_none());
        assert!(!path.exists());
    }

    #[test]
    fn test_failed_resume_clears_cache() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("session.json");
        SessionCache::new("Alice", "gone", Some("tok".to_string()), timestamp_ms())
            .save(&path)
            .unwrap();

        let mut session = ClientSession::new("Alice", Some(path.clone()));
        let request = session.resume_request(timestamp_ms()).unwrap();
        session.on_request(&request);
        session.on_event(&ServerMessage::JoinError {
            error: GameError::RoomNotFound,
        });

        assert!(!path.exists());
        assert!(session.room_id.is_none());
    }

    #[test]
    fn test_without_cache_path() {
        let mut session = ClientSession::new("Alice", None);
        session.on_event(&joined("lobby", "tok-1"));
        assert_eq!(session.session_token.as_deref(), Some("tok-1"));
        assert!(session.resume_request(timestamp_ms()).is_none());
    }
}
