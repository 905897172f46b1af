//! Process-wide room registry
//!
//! The map itself sits behind an `RwLock` and each room behind its own
//! `Mutex`, so traffic in one room never waits on another. Locks are always
//! taken registry first, then room. A room removed by the idle sweep is
//! marked closed under its own lock, so a handler that fetched it just before
//! removal sees `RoomNotFound` instead of acting on an orphan.

use crate::config::GameConfig;
use crate::room::{Room, RoomSettings};
use log::info;
use rand::distributions::Alphanumeric;
use rand::Rng;
use shared::{GameError, RoomSummary, MAX_ROOM_ID_LEN, MIN_ROOM_ID_LEN};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard, RwLock};

const GENERATED_ID_LEN: usize = 6;

pub type RoomHandle = Arc<Mutex<RoomSlot>>;

/// A registered room plus its removal flag.
pub struct RoomSlot {
    pub room: Room,
    closed: bool,
}

impl std::ops::Deref for RoomSlot {
    type Target = Room;

    fn deref(&self) -> &Room {
        &self.room
    }
}

impl std::ops::DerefMut for RoomSlot {
    fn deref_mut(&mut self) -> &mut Room {
        &mut self.room
    }
}

pub struct RoomRegistry {
    rooms: RwLock<HashMap<String, RoomHandle>>,
    next_seq: AtomicU64,
    config: Arc<GameConfig>,
}

impl RoomRegistry {
    pub fn new(config: Arc<GameConfig>) -> Self {
        Self {
            rooms: RwLock::new(HashMap::new()),
            next_seq: AtomicU64::new(1),
            config,
        }
    }

    /// Creates and registers a room. Without `room_id` a short code is generated.
    pub async fn create(
        &self,
        room_id: Option<String>,
        settings: RoomSettings,
        now: u64,
    ) -> Result<String, GameError> {
        if let Some(id) = room_id.as_deref() {
            validate_room_id(id)?;
        }

        let mut rooms = self.rooms.write().await;
        if rooms.len() >= self.config.max_rooms {
            return Err(GameError::TooManyRooms);
        }

        let id = match room_id {
            Some(id) if rooms.contains_key(&id) => return Err(GameError::DuplicateRoomId),
            Some(id) => id,
            None => loop {
                let candidate = generate_room_id(&mut rand::thread_rng());
                if !rooms.contains_key(&candidate) {
                    break candidate;
                }
            },
        };

        let seq = self.next_seq.fetch_add(1, Ordering::Relaxed);
        let room = Room::new(id.clone(), settings, now, seq, Arc::clone(&self.config))?;
        info!(
            "Room {} ({}) created, capacity {}{}",
            id,
            room.name,
            room.max_players,
            if room.has_password() { ", password protected" } else { "" }
        );
        rooms.insert(
            id.clone(),
            Arc::new(Mutex::new(RoomSlot {
                room,
                closed: false,
            })),
        );
        Ok(id)
    }

    pub async fn get(&self, room_id: &str) -> Result<RoomHandle, GameError> {
        self.rooms
            .read()
            .await
            .get(room_id)
            .cloned()
            .ok_or(GameError::RoomNotFound)
    }

    /// Fetches and locks a room. Fails if the room is gone or was closed
    /// while we waited for the lock.
    pub async fn lock(&self, room_id: &str) -> Result<OwnedMutexGuard<RoomSlot>, GameError> {
        let handle = self.get(room_id).await?;
        let slot = handle.lock_owned().await;
        if slot.closed {
            return Err(GameError::RoomNotFound);
        }
        Ok(slot)
    }

    /// Public rooms in creation order.
    pub async fn list(&self) -> Vec<RoomSummary> {
        let handles: Vec<RoomHandle> = self.rooms.read().await.values().cloned().collect();

        let mut listed = Vec::with_capacity(handles.len());
        for handle in handles {
            let slot = handle.lock().await;
            if !slot.closed && !slot.is_private {
                listed.push((slot.created_seq, slot.summary()));
            }
        }
        listed.sort_by_key(|(seq, _)| *seq);
        listed.into_iter().map(|(_, summary)| summary).collect()
    }

    /// Removes rooms that have been empty for at least `idle_ms`.
    ///
    /// Rooms busy with a handler are skipped and looked at on the next pass.
    pub async fn remove_idle(&self, now: u64, idle_ms: u64) -> Vec<String> {
        let mut rooms = self.rooms.write().await;
        let mut removed = Vec::new();

        rooms.retain(|id, handle| {
            let mut slot = match handle.try_lock() {
                Ok(slot) => slot,
                Err(_) => return true,
            };
            let idle = slot.is_empty()
                && slot
                    .emptied_at
                    .map_or(false, |since| now.saturating_sub(since) >= idle_ms);
            if idle {
                slot.closed = true;
                removed.push(id.clone());
            }
            !idle
        });

        for id in &removed {
            info!("Room {} removed after being empty", id);
        }
        removed
    }

    pub async fn len(&self) -> usize {
        self.rooms.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.rooms.read().await.is_empty()
    }
}

pub fn validate_room_id(id: &str) -> Result<(), GameError> {
    let len = id.chars().count();
    let allowed = id
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-');
    if (MIN_ROOM_ID_LEN..=MAX_ROOM_ID_LEN).contains(&len) && allowed {
        Ok(())
    } else {
        Err(GameError::InvalidRoomId)
    }
}

fn generate_room_id<R: Rng>(rng: &mut R) -> String {
    rng.sample_iter(&Alphanumeric)
        .take(GENERATED_ID_LEN)
        .map(|b| (b as char).to_ascii_uppercase())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn settings(name: &str) -> RoomSettings {
        RoomSettings {
            name: name.to_string(),
            max_players: 4,
            password: None,
            is_private: false,
        }
    }

    fn registry() -> RoomRegistry {
        RoomRegistry::new(Arc::new(GameConfig::default()))
    }

    #[tokio::test]
    async fn test_create_and_get() {
        let registry = registry();
        let id = registry
            .create(Some("lobby".to_string()), settings("Lobby"), 0)
            .await
            .unwrap();

        assert_eq!(id, "lobby");
        let handle = registry.get("lobby").await.unwrap();
        assert_eq!(handle.lock().await.name, "Lobby");
        assert!(matches!(
            registry.get("nope").await,
            Err(GameError::RoomNotFound)
        ));
    }

    #[tokio::test]
    async fn test_duplicate_id_rejected() {
        let registry = registry();
        registry
            .create(Some("lobby".to_string()), settings("Lobby"), 0)
            .await
            .unwrap();

        let again = registry
            .create(Some("lobby".to_string()), settings("Other"), 0)
            .await;
        assert_eq!(again, Err(GameError::DuplicateRoomId));
        assert_eq!(registry.len().await, 1);
    }

    #[test]
    fn test_room_limit_blocking() {
        let registry = RoomRegistry::new(Arc::new(GameConfig {
            max_rooms: 1,
            ..GameConfig::default()
        }));

        tokio_test::assert_ok!(tokio_test::block_on(registry.create(
            None,
            settings("First"),
            0
        )));
        tokio_test::assert_err!(tokio_test::block_on(registry.create(
            None,
            settings("Second"),
            0
        )));
        assert_eq!(tokio_test::block_on(registry.len()), 1);
    }

    #[tokio::test]
    async fn test_generated_ids() {
        let registry = registry();
        let a = registry.create(None, settings("A"), 0).await.unwrap();
        let b = registry.create(None, settings("B"), 0).await.unwrap();

        assert_ne!(a, b);
        for id in [&a, &b] {
            assert_eq!(id.len(), GENERATED_ID_LEN);
            assert!(id
                .chars()
                .all(|c| c.is_ascii_uppercase() || c.is_ascii_digit()));
        }
    }

    #[tokio::test]
    async fn test_invalid_input() {
        let registry = registry();

        for bad in ["ab", "has space", "way_too_long_for_a_room_id_really"] {
            assert_eq!(
                registry.create(Some(bad.to_string()), settings("X"), 0).await,
                Err(GameError::InvalidRoomId)
            );
        }

        let mut zero = settings("X");
        zero.max_players = 0;
        assert_eq!(
            registry.create(None, zero, 0).await,
            Err(GameError::InvalidCapacity)
        );
        assert!(registry.is_empty().await);
    }

    #[tokio::test]
    async fn test_room_limit() {
        let registry = RoomRegistry::new(Arc::new(GameConfig {
            max_rooms: 2,
            ..GameConfig::default()
        }));
        registry.create(None, settings("A"), 0).await.unwrap();
        registry.create(None, settings("B"), 0).await.unwrap();

        assert_eq!(
            registry.create(None, settings("C"), 0).await,
            Err(GameError::TooManyRooms)
        );
    }

    #[tokio::test]
    async fn test_list_in_creation_order_without_private() {
        let registry = registry();
        for name in ["first", "second", "third"] {
            registry
                .create(Some(name.to_string()), settings(name), 0)
                .await
                .unwrap();
        }
        let mut hidden = settings("hidden");
        hidden.is_private = true;
        registry
            .create(Some("hidden".to_string()), hidden, 0)
            .await
            .unwrap();

        let ids: Vec<String> = registry.list().await.into_iter().map(|r| r.id).collect();
        assert_eq!(ids, vec!["first", "second", "third"]);
        assert!(registry.get("hidden").await.is_ok());
    }

    #[tokio::test]
    async fn test_idle_rooms_are_removed_and_closed() {
        let registry = registry();
        registry
            .create(Some("old".to_string()), settings("Old"), 0)
            .await
            .unwrap();
        registry
            .create(Some("new".to_string()), settings("New"), 500_000)
            .await
            .unwrap();
        let stale_handle = registry.get("old").await.unwrap();

        let removed = registry.remove_idle(600_000, 600_000).await;
        assert_eq!(removed, vec!["old".to_string()]);
        assert!(registry.get("old").await.is_err());
        assert!(registry.get("new").await.is_ok());
        assert!(stale_handle.lock().await.closed);
    }

    #[tokio::test]
    async fn test_lock_rejects_closed_room() {
        let registry = registry();
        registry
            .create(Some("room".to_string()), settings("Room"), 0)
            .await
            .unwrap();

        assert!(registry.lock("room").await.is_ok());
        registry.remove_idle(1_000_000, 1).await;
        assert!(matches!(
            registry.lock("room").await,
            Err(GameError::RoomNotFound)
        ));
    }
}
