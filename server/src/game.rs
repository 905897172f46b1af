//! Request handling on top of the registry, rooms and sessions
//!
//! `GameServer` is the single entry point the transport talks to. Every
//! request arrives with the caller's [`SessionContext`]; handlers look up the
//! caller's seat in the session manager, lock the target room, apply the
//! operation and deliver the resulting events before the room lock is
//! released. Lock order is registry, room, sessions, connections.
//!
//! Round deadlines are tokio tasks. A timer sleeps until its round's deadline
//! and then posts `(room, round)` to the deadline channel, which
//! [`GameServer::run_deadlines`] turns into [`GameServer::expire_round`] calls.
//! Superseded timers are aborted; one that fires late anyway is a no-op
//! because resolution is keyed on the round number.

use crate::client_manager::{ClientManager, ConnectionId};
use crate::config::GameConfig;
use crate::registry::{RoomRegistry, RoomSlot};
use crate::room::{JoinRequest, Outbox, RoundSchedule, RoomSettings};
use crate::session::{SessionEntry, SessionManager};
use log::{debug, info, warn};
use shared::{decode_client_message, timestamp_ms, ClientMessage, GameError, ServerMessage};
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, Mutex, RwLock};
use tokio::task::JoinHandle;

/// Per-connection context handed to every handler.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionContext {
    pub connection_id: ConnectionId,
    pub addr: SocketAddr,
}

/// What one sweep pass cleaned up.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct SweepReport {
    pub expired_sessions: usize,
    pub removed_rooms: Vec<String>,
}

type Deadline = (String, u32);

pub struct GameServer {
    config: Arc<GameConfig>,
    registry: RoomRegistry,
    sessions: Mutex<SessionManager>,
    clients: RwLock<ClientManager>,
    timers: Mutex<HashMap<String, (u32, JoinHandle<()>)>>,
    deadline_tx: mpsc::UnboundedSender<Deadline>,
    deadline_rx: Mutex<Option<mpsc::UnboundedReceiver<Deadline>>>,
}

impl GameServer {
    pub fn new(config: Arc<GameConfig>, max_connections: usize) -> Arc<Self> {
        let (deadline_tx, deadline_rx) = mpsc::unbounded_channel();
        Arc::new(Self {
            registry: RoomRegistry::new(Arc::clone(&config)),
            config,
            sessions: Mutex::new(SessionManager::new()),
            clients: RwLock::new(ClientManager::new(max_connections)),
            timers: Mutex::new(HashMap::new()),
            deadline_tx,
            deadline_rx: Mutex::new(Some(deadline_rx)),
        })
    }

    pub fn config(&self) -> &GameConfig {
        &self.config
    }

    pub fn registry(&self) -> &RoomRegistry {
        &self.registry
    }

    /// Admits a new transport connection, or `ServerFull`.
    pub async fn connect(
        &self,
        addr: SocketAddr,
        sender: mpsc::UnboundedSender<ServerMessage>,
    ) -> Result<SessionContext, GameError> {
        let connection_id = self
            .clients
            .write()
            .await
            .add_connection(addr, sender)
            .ok_or(GameError::ServerFull)?;
        Ok(SessionContext {
            connection_id,
            addr,
        })
    }

    /// The transport closed. The player's seat is kept for the grace period.
    pub async fn disconnect(&self, ctx: &SessionContext) {
        self.disconnect_at(ctx, timestamp_ms()).await
    }

    pub async fn disconnect_at(&self, ctx: &SessionContext, now: u64) {
        let entry = self.sessions.lock().await.detach(ctx.connection_id, now);
        if let Some(entry) = entry {
            if let Ok(mut slot) = self.registry.lock(&entry.room_id).await {
                if slot.disconnect(entry.player_id, ctx.connection_id, now) {
                    info!(
                        "{} lost connection to room {}, holding seat for {}s",
                        entry.player_name,
                        entry.room_id,
                        self.config.reconnect_grace_secs
                    );
                }
            }
        }
        self.clients.write().await.remove_connection(&ctx.connection_id);
    }

    /// Decodes one text frame and handles it. Undecodable frames get an
    /// error event back and change nothing.
    pub async fn handle_text(&self, ctx: &SessionContext, text: &str) {
        self.clients.write().await.touch(ctx.connection_id);
        match decode_client_message(text) {
            Ok(message) => self.handle_message(ctx, message).await,
            Err(error) => {
                debug!("Connection {} sent an invalid frame: {}", ctx.connection_id, error);
                self.reply(ctx, ServerMessage::for_decode_error(error)).await;
            }
        }
    }

    pub async fn handle_message(&self, ctx: &SessionContext, message: ClientMessage) {
        self.handle_message_at(ctx, message, timestamp_ms()).await
    }

    pub async fn handle_message_at(&self, ctx: &SessionContext, message: ClientMessage, now: u64) {
        debug!("Connection {} -> {}", ctx.connection_id, message.kind());

        let result = match &message {
            ClientMessage::CreateRoom {
                room_id,
                room_name,
                max_players,
                password,
                is_private,
            } => {
                let settings = RoomSettings {
                    name: room_name.clone(),
                    max_players: *max_players as usize,
                    password: password.clone(),
                    is_private: *is_private,
                };
                self.create_room(ctx, room_id.clone(), settings, now).await
            }
            ClientMessage::JoinRoom {
                room_id,
                player_name,
                password,
                session_token,
            } => {
                let request = JoinRequest {
                    player_name: player_name.clone(),
                    password: password.clone(),
                    session_token: session_token.clone(),
                };
                self.join_room(ctx, room_id, request, now).await
            }
            ClientMessage::LeaveRoom => self.leave_room(ctx, now).await,
            ClientMessage::MakeGuess { room_id, guess } => {
                self.make_guess(ctx, room_id, *guess, now).await
            }
            ClientMessage::ChatMessage { room_id, message } => {
                self.chat(ctx, room_id, message, now).await
            }
            ClientMessage::ResetRoom { room_id } => self.reset_room(ctx, room_id, now).await,
            ClientMessage::GetAvailableRooms => {
                let rooms = self.registry.list().await;
                self.reply(ctx, ServerMessage::AvailableRooms { rooms }).await;
                Ok(())
            }
            ClientMessage::GetRoomInfo { room_id } => match self.registry.lock(room_id).await {
                Ok(slot) => {
                    let room_info = slot.info();
                    self.reply(ctx, ServerMessage::RoomInfo { room_info }).await;
                    Ok(())
                }
                Err(error) => Err(error),
            },
        };

        if let Err(error) = result {
            debug!(
                "Rejected {} from connection {}: {}",
                message.kind(),
                ctx.connection_id,
                error
            );
            self.reply(ctx, message.error_reply(error)).await;
        }
    }

    async fn create_room(
        &self,
        ctx: &SessionContext,
        room_id: Option<String>,
        settings: RoomSettings,
        now: u64,
    ) -> Result<(), GameError> {
        let room_name = settings.name.trim().to_string();
        let room_id = self.registry.create(room_id, settings, now).await?;
        self.reply(ctx, ServerMessage::RoomCreated { room_id, room_name })
            .await;
        Ok(())
    }

    async fn join_room(
        &self,
        ctx: &SessionContext,
        room_id: &str,
        mut request: JoinRequest,
        now: u64,
    ) -> Result<(), GameError> {
        let moving_from = match self.session_of(ctx).await {
            Some(current) if current.room_id == room_id => {
                // Joining the room we are already in resumes our own seat.
                request.session_token = Some(current.token);
                None
            }
            other => other,
        };

        let from = match moving_from {
            Some(from) => from,
            None => {
                let mut slot = self.registry.lock(room_id).await?;
                return self.seat(ctx, room_id, &mut slot, request, now).await;
            }
        };

        // Two room locks are always taken in room id order.
        let (mut target, mut source) = if room_id < from.room_id.as_str() {
            let target = self.registry.lock(room_id).await?;
            let source = self.registry.lock(&from.room_id).await.ok();
            (target, source)
        } else {
            let source = self.registry.lock(&from.room_id).await.ok();
            let target = self.registry.lock(room_id).await?;
            (target, source)
        };

        // The current seat is only given up once the new one is certain.
        target.check_join(&request, now)?;
        self.vacate(source.as_deref_mut(), &from, now).await;
        drop(source);

        self.seat(ctx, room_id, &mut target, request, now).await
    }

    async fn seat(
        &self,
        ctx: &SessionContext,
        room_id: &str,
        slot: &mut RoomSlot,
        request: JoinRequest,
        now: u64,
    ) -> Result<(), GameError> {
        let mut out = Outbox::new();
        let result = slot.join(request, ctx.connection_id, now, &mut out);

        if let Ok(outcome) = &result {
            let previous = self.sessions.lock().await.bind(
                ctx.connection_id,
                &outcome.token,
                room_id,
                outcome.player_id,
                &outcome.player_name,
            );
            if let Some(previous) = previous.or(outcome.replaced_connection) {
                info!(
                    "Connection {} took over {}'s seat in room {} from connection {}",
                    ctx.connection_id, outcome.player_name, room_id, previous
                );
            }
        }

        self.flush(room_id, out).await;
        result.map(|_| ())
    }

    async fn leave_room(&self, ctx: &SessionContext, now: u64) -> Result<(), GameError> {
        let entry = self.session_of(ctx).await.ok_or(GameError::NotInRoom)?;
        self.remove_player(&entry, now).await;
        Ok(())
    }

    async fn remove_player(&self, entry: &SessionEntry, now: u64) {
        let mut slot = self.registry.lock(&entry.room_id).await.ok();
        self.vacate(slot.as_deref_mut(), entry, now).await;
    }

    /// Gives up `entry`'s seat. `slot` is its room, locked by the caller, or
    /// `None` when the room is already gone.
    async fn vacate(&self, slot: Option<&mut RoomSlot>, entry: &SessionEntry, now: u64) {
        match slot {
            Some(slot) => {
                let mut out = Outbox::new();
                slot.leave(entry.player_id, now, &mut out);
                self.sessions.lock().await.remove(&entry.token);
                self.flush(&entry.room_id, out).await;
            }
            None => {
                self.sessions.lock().await.remove(&entry.token);
            }
        }
    }

    async fn make_guess(
        &self,
        ctx: &SessionContext,
        room_id: &str,
        value: i64,
        now: u64,
    ) -> Result<(), GameError> {
        let entry = self.session_in(ctx, room_id).await?;
        let mut slot = self.registry.lock(room_id).await?;
        let mut out = Outbox::new();
        let result = slot.guess(entry.player_id, value, now, &mut out);
        self.flush(room_id, out).await;
        result.map(|_| ())
    }

    async fn chat(
        &self,
        ctx: &SessionContext,
        room_id: &str,
        message: &str,
        now: u64,
    ) -> Result<(), GameError> {
        let entry = self.session_in(ctx, room_id).await?;
        let mut slot = self.registry.lock(room_id).await?;
        let mut out = Outbox::new();
        let result = slot.chat(entry.player_id, message, now, &mut out);
        self.flush(room_id, out).await;
        result
    }

    async fn reset_room(
        &self,
        ctx: &SessionContext,
        room_id: &str,
        now: u64,
    ) -> Result<(), GameError> {
        let mut slot = self.registry.lock(room_id).await?;
        let entry = match self.session_of(ctx).await {
            Some(entry) if entry.room_id == room_id => entry,
            _ => return Err(GameError::NotAuthorized),
        };
        let mut out = Outbox::new();
        let result = slot.reset(entry.player_id, now, &mut out);
        self.flush(room_id, out).await;
        result
    }

    /// Deadline of round `round_number` in `room_id` has passed.
    pub async fn expire_round(&self, room_id: &str, round_number: u32) -> bool {
        self.expire_round_at(room_id, round_number, timestamp_ms())
            .await
    }

    pub async fn expire_round_at(&self, room_id: &str, round_number: u32, now: u64) -> bool {
        let mut slot = match self.registry.lock(room_id).await {
            Ok(slot) => slot,
            Err(_) => return false,
        };
        let mut out = Outbox::new();
        let expired = slot.expire_round(round_number, now, &mut out);
        self.flush(room_id, out).await;
        expired
    }

    /// Consumes fired round timers until the server is dropped.
    pub async fn run_deadlines(self: Arc<Self>) {
        let receiver = self.deadline_rx.lock().await.take();
        let mut receiver = match receiver {
            Some(receiver) => receiver,
            None => {
                warn!("Deadline dispatcher is already running");
                return;
            }
        };

        while let Some((room_id, round_number)) = receiver.recv().await {
            {
                let mut timers = self.timers.lock().await;
                if matches!(timers.get(&room_id), Some((n, _)) if *n == round_number) {
                    timers.remove(&room_id);
                }
            }
            let server = Arc::clone(&self);
            tokio::spawn(async move {
                server.expire_round(&room_id, round_number).await;
            });
        }
    }

    /// Drops seats whose grace period ran out and rooms idle for too long.
    pub async fn sweep(&self, now: u64) -> SweepReport {
        let grace_ms = self.config.reconnect_grace().as_millis() as u64;
        let expired = self.sessions.lock().await.expired(now, grace_ms);
        let mut report = SweepReport::default();

        for entry in expired {
            let mut slot = match self.registry.lock(&entry.room_id).await {
                Ok(slot) => slot,
                Err(_) => {
                    self.sessions.lock().await.remove(&entry.token);
                    continue;
                }
            };

            // The player may have come back between the scan and the lock.
            let still_gone = {
                let mut sessions = self.sessions.lock().await;
                let gone = sessions
                    .for_token(&entry.token)
                    .map_or(false, |s| s.connection.is_none());
                if gone {
                    sessions.remove(&entry.token);
                }
                gone
            };
            if !still_gone {
                continue;
            }

            info!(
                "Grace period over for {} in room {}",
                entry.player_name, entry.room_id
            );
            let mut out = Outbox::new();
            slot.leave(entry.player_id, now, &mut out);
            self.flush(&entry.room_id, out).await;
            report.expired_sessions += 1;
        }

        let idle_ms = self.config.room_idle_timeout().as_millis() as u64;
        report.removed_rooms = self.registry.remove_idle(now, idle_ms).await;
        if !report.removed_rooms.is_empty() {
            let mut timers = self.timers.lock().await;
            for room_id in &report.removed_rooms {
                if let Some((_, handle)) = timers.remove(room_id) {
                    handle.abort();
                }
            }
        }
        report
    }

    pub async fn connection_count(&self) -> usize {
        self.clients.read().await.len()
    }

    pub async fn session_count(&self) -> usize {
        self.sessions.lock().await.len()
    }

    async fn session_of(&self, ctx: &SessionContext) -> Option<SessionEntry> {
        self.sessions
            .lock()
            .await
            .for_connection(ctx.connection_id)
            .cloned()
    }

    async fn session_in(&self, ctx: &SessionContext, room_id: &str) -> Result<SessionEntry, GameError> {
        match self.session_of(ctx).await {
            Some(entry) if entry.room_id == room_id => Ok(entry),
            _ => Err(GameError::NotInRoom),
        }
    }

    async fn reply(&self, ctx: &SessionContext, message: ServerMessage) {
        self.clients.write().await.send(ctx.connection_id, message);
    }

    /// Applies an outbox while the caller still holds the room lock.
    async fn flush(&self, room_id: &str, out: Outbox) {
        if let Some(schedule) = out.round_started {
            self.schedule_deadline(room_id, schedule).await;
        } else if out.round_stopped {
            if let Some((_, handle)) = self.timers.lock().await.remove(room_id) {
                handle.abort();
            }
        }
        self.clients.write().await.deliver(out.deliveries);
    }

    async fn schedule_deadline(&self, room_id: &str, schedule: RoundSchedule) {
        let delay = Duration::from_millis(schedule.ends_at.saturating_sub(timestamp_ms()));
        let deadline_tx = self.deadline_tx.clone();
        let deadline = (room_id.to_string(), schedule.round_number);

        let handle = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let _ = deadline_tx.send(deadline);
        });

        let previous = self
            .timers
            .lock()
            .await
            .insert(room_id.to_string(), (schedule.round_number, handle));
        if let Some((_, previous)) = previous {
            previous.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::room::PlayerId;

    fn addr() -> SocketAddr {
        "127.0.0.1:9000".parse().unwrap()
    }

    fn server() -> Arc<GameServer> {
        GameServer::new(
            Arc::new(GameConfig {
                hints_enabled: false,
                guess_cooldown_ms: 0,
                ..GameConfig::default()
            }),
            10,
        )
    }

    async fn connect(
        server: &GameServer,
    ) -> (SessionContext, mpsc::UnboundedReceiver<ServerMessage>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (server.connect(addr(), tx).await.unwrap(), rx)
    }

    fn drain(rx: &mut mpsc::UnboundedReceiver<ServerMessage>) -> Vec<ServerMessage> {
        let mut messages = Vec::new();
        while let Ok(message) = rx.try_recv() {
            messages.push(message);
        }
        messages
    }

    fn create(room_id: &str, max_players: u32) -> ClientMessage {
        ClientMessage::CreateRoom {
            room_id: Some(room_id.to_string()),
            room_name: format!("Room {}", room_id),
            max_players,
            password: None,
            is_private: false,
        }
    }

    fn join(room_id: &str, name: &str) -> ClientMessage {
        ClientMessage::JoinRoom {
            room_id: room_id.to_string(),
            player_name: name.to_string(),
            password: None,
            session_token: None,
        }
    }

    async fn target(server: &GameServer, room_id: &str) -> i64 {
        let slot = server.registry.lock(room_id).await.unwrap();
        slot.current_round().unwrap().target()
    }

    async fn player_id(server: &GameServer, room_id: &str, name: &str) -> PlayerId {
        let slot = server.registry.lock(room_id).await.unwrap();
        slot.player_by_name(name).unwrap().id
    }

    #[tokio::test]
    async fn test_create_then_join_starts_round() {
        let server = server();
        let (ctx, mut rx) = connect(&server).await;

        server.handle_message(&ctx, create("lobby", 2)).await;
        server.handle_message(&ctx, join("lobby", "Alice")).await;

        let messages = drain(&mut rx);
        assert!(matches!(&messages[0], ServerMessage::RoomCreated { room_id, .. } if room_id == "lobby"));
        assert!(matches!(&messages[1], ServerMessage::RoomJoined { session_token, .. } if !session_token.is_empty()));
        assert!(matches!(
            &messages[2],
            ServerMessage::NewRound { round_number: 1, range: [1, 100], .. }
        ));
        assert_eq!(server.session_count().await, 1);
    }

    #[tokio::test]
    async fn test_join_unknown_room() {
        let server = server();
        let (ctx, mut rx) = connect(&server).await;

        server.handle_message(&ctx, join("missing", "Alice")).await;

        assert_eq!(
            drain(&mut rx),
            vec![ServerMessage::JoinError {
                error: GameError::RoomNotFound
            }]
        );
        assert_eq!(server.session_count().await, 0);
    }

    #[tokio::test]
    async fn test_correct_guess_flow() {
        let server = server();
        let (ctx, mut rx) = connect(&server).await;
        server.handle_message(&ctx, create("lobby", 2)).await;
        server.handle_message(&ctx, join("lobby", "Alice")).await;
        drain(&mut rx);

        let guess = target(&server, "lobby").await;
        server
            .handle_message(
                &ctx,
                ClientMessage::MakeGuess {
                    room_id: "lobby".to_string(),
                    guess,
                },
            )
            .await;

        let messages = drain(&mut rx);
        assert!(matches!(&messages[0], ServerMessage::GuessResult { details, .. } if details.correct && details.new_total_score > 0));
        assert!(matches!(&messages[1], ServerMessage::RoundEnded { round_number: 1, .. }));
        assert!(matches!(&messages[2], ServerMessage::ScoreboardUpdated { .. }));
        assert!(matches!(&messages[3], ServerMessage::NewRound { round_number: 2, .. }));
    }

    #[tokio::test]
    async fn test_guess_outside_room_is_rejected() {
        let server = server();
        let (ctx, mut rx) = connect(&server).await;
        server.handle_message(&ctx, create("lobby", 2)).await;
        drain(&mut rx);

        server
            .handle_message(
                &ctx,
                ClientMessage::MakeGuess {
                    room_id: "lobby".to_string(),
                    guess: 5,
                },
            )
            .await;
        assert_eq!(
            drain(&mut rx),
            vec![ServerMessage::GuessError {
                error: GameError::NotInRoom
            }]
        );
    }

    #[tokio::test]
    async fn test_invalid_frames() {
        let server = server();
        let (ctx, mut rx) = connect(&server).await;

        server.handle_text(&ctx, "not json").await;
        server
            .handle_text(&ctx, r#"{"type":"make_guess","room_id":"x","guess":"abc"}"#)
            .await;
        server
            .handle_text(&ctx, r#"{"type":"chat_message","room_id":"x","message":"  "}"#)
            .await;

        assert_eq!(
            drain(&mut rx),
            vec![
                ServerMessage::Error {
                    error: GameError::MalformedMessage
                },
                ServerMessage::GuessError {
                    error: GameError::InvalidGuessFormat
                },
                ServerMessage::ChatError {
                    error: GameError::EmptyMessage
                },
            ]
        );
    }

    #[tokio::test]
    async fn test_joining_another_room_leaves_the_first() {
        let server = server();
        let (alice, mut alice_rx) = connect(&server).await;
        let (bob, mut bob_rx) = connect(&server).await;
        server.handle_message(&alice, create("one", 4)).await;
        server.handle_message(&alice, create("two", 4)).await;
        server.handle_message(&alice, join("one", "Alice")).await;
        server.handle_message(&bob, join("one", "Bob")).await;
        drain(&mut bob_rx);

        server.handle_message(&alice, join("two", "Alice")).await;

        assert!(matches!(
            &drain(&mut bob_rx)[0],
            ServerMessage::PlayerLeft { player_name, .. } if player_name == "Alice"
        ));
        assert_eq!(server.registry.lock("one").await.unwrap().player_count(), 1);
        assert_eq!(server.registry.lock("two").await.unwrap().player_count(), 1);
        assert!(drain(&mut alice_rx)
            .iter()
            .any(|m| matches!(m, ServerMessage::RoomJoined { room_id, .. } if room_id == "two")));
    }

    #[tokio::test]
    async fn test_rejected_join_keeps_current_seat() {
        let server = server();
        let (alice, mut alice_rx) = connect(&server).await;
        server.handle_message(&alice, create("home", 4)).await;
        server
            .handle_message(
                &alice,
                ClientMessage::CreateRoom {
                    room_id: Some("locked".to_string()),
                    room_name: "Locked".to_string(),
                    max_players: 4,
                    password: Some("secret".to_string()),
                    is_private: false,
                },
            )
            .await;
        server.handle_message(&alice, join("home", "Alice")).await;
        let guess = target(&server, "home").await;
        server
            .handle_message(
                &alice,
                ClientMessage::MakeGuess {
                    room_id: "home".to_string(),
                    guess,
                },
            )
            .await;
        let score = {
            let slot = server.registry.lock("home").await.unwrap();
            slot.player_by_name("Alice").unwrap().score.total
        };
        assert!(score > 0);
        drain(&mut alice_rx);

        server.handle_message(&alice, join("nowhere", "Alice")).await;
        server.handle_message(&alice, join("locked", "Alice")).await;

        assert_eq!(
            drain(&mut alice_rx),
            vec![
                ServerMessage::JoinError {
                    error: GameError::RoomNotFound
                },
                ServerMessage::JoinError {
                    error: GameError::InvalidPassword
                },
            ]
        );
        let slot = server.registry.lock("home").await.unwrap();
        assert_eq!(slot.player_count(), 1);
        assert_eq!(slot.player_by_name("Alice").unwrap().score.total, score);
        drop(slot);
        assert_eq!(server.registry.lock("locked").await.unwrap().player_count(), 0);
        assert_eq!(server.session_count().await, 1);

        // Still seated: guessing in the old room works.
        server
            .handle_message(
                &alice,
                ClientMessage::MakeGuess {
                    room_id: "home".to_string(),
                    guess: 0,
                },
            )
            .await;
        assert!(matches!(
            &drain(&mut alice_rx)[0],
            ServerMessage::GuessError {
                error: GameError::OutOfRange
            }
        ));
    }

    #[tokio::test]
    async fn test_rejoining_same_room_keeps_seat() {
        let server = server();
        let (ctx, mut rx) = connect(&server).await;
        server.handle_message(&ctx, create("lobby", 4)).await;
        server.handle_message(&ctx, join("lobby", "Alice")).await;
        server.handle_message(&ctx, join("lobby", "Alice")).await;

        assert_eq!(server.registry.lock("lobby").await.unwrap().player_count(), 1);
        let joined = drain(&mut rx)
            .into_iter()
            .filter(|m| matches!(m, ServerMessage::RoomJoined { .. }))
            .count();
        assert_eq!(joined, 2);
    }

    #[tokio::test]
    async fn test_leave_requires_room() {
        let server = server();
        let (ctx, mut rx) = connect(&server).await;

        server.handle_message(&ctx, ClientMessage::LeaveRoom).await;
        assert_eq!(
            drain(&mut rx),
            vec![ServerMessage::Error {
                error: GameError::NotInRoom
            }]
        );
    }

    #[tokio::test]
    async fn test_timeout_through_engine() {
        let server = server();
        let (alice, mut alice_rx) = connect(&server).await;
        let (bob, mut bob_rx) = connect(&server).await;
        server.handle_message(&alice, create("lobby", 2)).await;
        server.handle_message(&alice, join("lobby", "Alice")).await;
        server.handle_message(&bob, join("lobby", "Bob")).await;
        drain(&mut alice_rx);
        drain(&mut bob_rx);

        assert!(server.expire_round("lobby", 1).await);
        assert!(!server.expire_round("lobby", 1).await);

        for rx in [&mut alice_rx, &mut bob_rx] {
            let messages = drain(rx);
            assert!(matches!(
                &messages[0],
                ServerMessage::RoundEnded { round_number: 1, winner: None, .. }
            ));
            assert!(matches!(&messages[1], ServerMessage::NewRound { round_number: 2, .. }));
        }
    }

    #[tokio::test]
    async fn test_reconnect_by_token_after_disconnect() {
        let server = server();
        let (ctx, mut rx) = connect(&server).await;
        server.handle_message(&ctx, create("lobby", 2)).await;
        server.handle_message(&ctx, join("lobby", "Alice")).await;
        let token = drain(&mut rx)
            .into_iter()
            .find_map(|m| match m {
                ServerMessage::RoomJoined { session_token, .. } => Some(session_token),
                _ => None,
            })
            .unwrap();
        let id = player_id(&server, "lobby", "Alice").await;

        server.disconnect(&ctx).await;
        assert_eq!(server.connection_count().await, 0);
        assert_eq!(server.session_count().await, 1);

        let (again, mut again_rx) = connect(&server).await;
        server
            .handle_message(
                &again,
                ClientMessage::JoinRoom {
                    room_id: "lobby".to_string(),
                    player_name: "Whoever".to_string(),
                    password: None,
                    session_token: Some(token),
                },
            )
            .await;

        assert!(matches!(&drain(&mut again_rx)[0], ServerMessage::RoomJoined { .. }));
        assert_eq!(player_id(&server, "lobby", "Alice").await, id);
        assert_eq!(server.registry.lock("lobby").await.unwrap().player_count(), 1);
    }

    #[tokio::test]
    async fn test_sweep_expires_seats_and_rooms() {
        let server = server();
        let (alice, _alice_rx) = connect(&server).await;
        let (bob, mut bob_rx) = connect(&server).await;
        server.handle_message_at(&alice, create("lobby", 2), 0).await;
        server.handle_message_at(&alice, join("lobby", "Alice"), 0).await;
        server.handle_message_at(&bob, join("lobby", "Bob"), 0).await;
        drain(&mut bob_rx);

        server.disconnect_at(&alice, 1_000).await;
        let report = server.sweep(30_000).await;
        assert_eq!(report.expired_sessions, 0);

        let report = server.sweep(61_000).await;
        assert_eq!(report.expired_sessions, 1);
        assert!(report.removed_rooms.is_empty());
        assert!(matches!(
            &drain(&mut bob_rx)[0],
            ServerMessage::PlayerLeft { player_name, .. } if player_name == "Alice"
        ));

        server.handle_message_at(&bob, ClientMessage::LeaveRoom, 62_000).await;
        let report = server.sweep(62_000 + 600_000).await;
        assert_eq!(report.removed_rooms, vec!["lobby".to_string()]);
        assert!(server.registry.get("lobby").await.is_err());
    }

    #[tokio::test]
    async fn test_reset_only_by_admin() {
        let server = server();
        let (alice, mut alice_rx) = connect(&server).await;
        let (bob, mut bob_rx) = connect(&server).await;
        server.handle_message(&alice, create("lobby", 2)).await;
        server.handle_message(&alice, join("lobby", "Alice")).await;
        server.handle_message(&bob, join("lobby", "Bob")).await;
        drain(&mut alice_rx);
        drain(&mut bob_rx);

        let reset = ClientMessage::ResetRoom {
            room_id: "lobby".to_string(),
        };
        server.handle_message(&bob, reset.clone()).await;
        assert_eq!(
            drain(&mut bob_rx),
            vec![ServerMessage::ResetError {
                error: GameError::NotAuthorized
            }]
        );

        server.handle_message(&alice, reset).await;
        assert!(matches!(&drain(&mut bob_rx)[0], ServerMessage::RoomReset { .. }));
    }

    #[tokio::test]
    async fn test_server_full() {
        let server = GameServer::new(Arc::new(GameConfig::default()), 1);
        let (_ctx, _rx) = connect(&server).await;
        let (tx, _rx2) = mpsc::unbounded_channel();

        assert_eq!(server.connect(addr(), tx).await, Err(GameError::ServerFull));
    }

    #[tokio::test]
    async fn test_room_listing_and_info() {
        let server = server();
        let (ctx, mut rx) = connect(&server).await;
        server.handle_message(&ctx, create("lobby", 3)).await;
        drain(&mut rx);

        server.handle_message(&ctx, ClientMessage::GetAvailableRooms).await;
        server
            .handle_message(
                &ctx,
                ClientMessage::GetRoomInfo {
                    room_id: "lobby".to_string(),
                },
            )
            .await;
        server
            .handle_message(
                &ctx,
                ClientMessage::GetRoomInfo {
                    room_id: "nope".to_string(),
                },
            )
            .await;

        let messages = drain(&mut rx);
        assert!(matches!(&messages[0], ServerMessage::AvailableRooms { rooms } if rooms.len() == 1));
        assert!(matches!(&messages[1], ServerMessage::RoomInfo { room_info } if room_info.max_players == 3));
        assert_eq!(
            messages[2],
            ServerMessage::Error {
                error: GameError::RoomNotFound
            }
        );
    }
}
