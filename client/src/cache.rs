//! On-disk session cache used to rejoin a room after a restart
//!
//! The cache is advisory: it only lets the client offer its last room and
//! session token back to the server. The server decides whether the seat is
//! still there.

use log::debug;
use serde::{Deserialize, Serialize};
use shared::SESSION_CACHE_TTL_MS;
use std::fs;
use std::io;
use std::path::Path;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionCache {
    pub player_name: String,
    pub room_id: String,
    #[serde(default)]
    pub session_token: Option<String>,
    /// Unix time in milliseconds
    pub saved_at: u64,
}

impl SessionCache {
    pub fn new(player_name: &str, room_id: &str, session_token: Option<String>, now: u64) -> Self {
        Self {
            player_name: player_name.to_string(),
            room_id: room_id.to_string(),
            session_token,
            saved_at: now,
        }
    }

    /// Entries older than one hour are ignored.
    pub fn is_valid(&self, now: u64) -> bool {
        now.saturating_sub(self.saved_at) < SESSION_CACHE_TTL_MS
    }

    /// Reads the cache, treating a missing or unreadable file as empty.
    pub fn load(path: &Path) -> Option<Self> {
        let text = fs::read_to_string(path).ok()?;
        match serde_json::from_str(&text) {
            Ok(cache) => Some(cache),
            Err(e) => {
                debug!("Ignoring corrupt session cache {}: {}", path.display(), e);
                None
            }
        }
    }

    /// Like [`SessionCache::load`], but drops expired entries from disk.
    pub fn load_valid(path: &Path, now: u64) -> Option<Self> {
        let cache = Self::load(path)?;
        if cache.is_valid(now) {
            Some(cache)
        } else {
            debug!("Session cache {} expired", path.display());
            Self::clear(path);
            None
        }
    }

    pub fn save(&self, path: &Path) -> io::Result<()> {
        let text = serde_json::to_string_pretty(self)?;
        fs::write(path, text)
    }

    pub fn clear(path: &Path) {
        if let Err(e) = fs::remove_file(path) {
            if e.kind() != io::ErrorKind::NotFound {
                debug!("Failed to remove session cache {}: {}", path.display(), e);
            }
        }
    }
}
