//! A single game room: its players, the current round and the leaderboard
//!
//! Every method here runs with the room's lock held by the caller, so the
//! room never has to reason about concurrent mutation. Instead of sending
//! anything itself, each operation appends the events it causes to an
//! [`Outbox`] in the order they happened; the caller delivers them before
//! releasing the lock, which gives every member the same event order.

use crate::client_manager::ConnectionId;
use crate::config::GameConfig;
use crate::hints::hint_for_round;
use crate::round::{GuessEvaluation, Round, RoundPhase};
use crate::scoring::{ScoreRecord, ScoringPolicy};
use log::{debug, info};
use rand::rngs::StdRng;
use rand::SeedableRng;
use sha2::{Digest, Sha256};
use shared::{
    GameError, GuessDetails, GuessHint, PlayerInfo, RoomInfo, RoomSummary, RoundSummary,
    ServerMessage, MAX_PLAYER_NAME_LEN, MAX_ROOM_NAME_LEN, MIN_PLAYER_NAME_LEN,
};
use std::collections::{BTreeMap, VecDeque};
use std::sync::Arc;

pub type PlayerId = u32;

const CHAT_WINDOW_MS: u64 = 60_000;

/// A member of a room. Survives disconnects until the grace period runs out.
#[derive(Debug, Clone)]
pub struct Player {
    pub id: PlayerId,
    pub name: String,
    /// Opaque token the client presents to resume this seat
    pub token: String,
    /// Live transport, `None` while disconnected
    pub connection: Option<ConnectionId>,
    pub score: ScoreRecord,
    pub joined_at: u64,
    pub last_activity: u64,
    pub disconnected_at: Option<u64>,
    last_guess_at: Option<u64>,
    chat_times: VecDeque<u64>,
}

impl Player {
    fn new(id: PlayerId, name: String, connection: ConnectionId, now: u64) -> Self {
        Self {
            id,
            name,
            token: uuid::Uuid::new_v4().to_string(),
            connection: Some(connection),
            score: ScoreRecord::default(),
            joined_at: now,
            last_activity: now,
            disconnected_at: None,
            last_guess_at: None,
            chat_times: VecDeque::new(),
        }
    }

    pub fn is_connected(&self) -> bool {
        self.connection.is_some()
    }

    pub fn can_make_guess(&self, now: u64, cooldown_ms: u64) -> bool {
        match self.last_guess_at {
            Some(last) => now.saturating_sub(last) >= cooldown_ms,
            None => true,
        }
    }

    /// Sliding one-minute window. Records the message when allowed.
    pub fn can_send_chat(&mut self, now: u64, max_per_minute: usize) -> bool {
        while let Some(&oldest) = self.chat_times.front() {
            if now.saturating_sub(oldest) >= CHAT_WINDOW_MS {
                self.chat_times.pop_front();
            } else {
                break;
            }
        }
        if max_per_minute > 0 && self.chat_times.len() >= max_per_minute {
            return false;
        }
        self.chat_times.push_back(now);
        true
    }

    fn info(&self, is_admin: bool) -> PlayerInfo {
        PlayerInfo {
            name: self.name.clone(),
            score: self.score.total,
            streak: self.score.streak,
            correct_guesses: self.score.correct_guesses,
            connected: self.is_connected(),
            is_admin,
        }
    }
}

/// When the room's current round will time out.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RoundSchedule {
    pub round_number: u32,
    pub ends_at: u64,
}

/// Events produced by one room operation, in emission order.
#[derive(Debug, Default)]
pub struct Outbox {
    pub deliveries: Vec<(ConnectionId, ServerMessage)>,
    /// Set when the operation started a round that needs a deadline timer
    pub round_started: Option<RoundSchedule>,
    /// Set when the room went back to `Pending`
    pub round_stopped: bool,
}

impl Outbox {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn send(&mut self, connection: ConnectionId, message: ServerMessage) {
        self.deliveries.push((connection, message));
    }

    pub fn messages_for(&self, connection: ConnectionId) -> Vec<&ServerMessage> {
        self.deliveries
            .iter()
            .filter(|(c, _)| *c == connection)
            .map(|(_, m)| m)
            .collect()
    }
}

/// How an accepted join is seated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Admission {
    Reattach(PlayerId),
    /// The name's previous seat outlived its grace period and is replaced
    Replace(PlayerId),
    Fresh,
}

/// Parameters of a join attempt.
#[derive(Debug, Clone, Default)]
pub struct JoinRequest {
    pub player_name: String,
    pub password: Option<String>,
    pub session_token: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JoinOutcome {
    pub player_id: PlayerId,
    pub player_name: String,
    pub token: String,
    pub reconnected: bool,
    /// Connection that held this seat before and must be detached
    pub replaced_connection: Option<ConnectionId>,
}

/// Settings given when a room is created.
#[derive(Debug, Clone)]
pub struct RoomSettings {
    pub name: String,
    pub max_players: usize,
    pub password: Option<String>,
    pub is_private: bool,
}

pub struct Room {
    pub id: String,
    pub name: String,
    pub max_players: usize,
    password_hash: Option<[u8; 32]>,
    pub is_private: bool,
    pub admin: Option<PlayerId>,
    pub created_at: u64,
    /// Creation order across the registry
    pub created_seq: u64,
    pub round_number: u32,
    round: Option<Round>,
    /// Keyed by id, which is also join order
    players: BTreeMap<PlayerId, Player>,
    next_player_id: PlayerId,
    history: VecDeque<RoundSummary>,
    /// Since when the room has had no players
    pub emptied_at: Option<u64>,
    config: Arc<GameConfig>,
    scoring: ScoringPolicy,
    rng: StdRng,
}

impl Room {
    pub fn new(
        id: String,
        settings: RoomSettings,
        now: u64,
        created_seq: u64,
        config: Arc<GameConfig>,
    ) -> Result<Self, GameError> {
        let name = settings.name.trim().to_string();
        let name_len = name.chars().count();
        if name_len == 0 || name_len > MAX_ROOM_NAME_LEN {
            return Err(GameError::InvalidRoomName);
        }
        if settings.max_players == 0 || settings.max_players > config.max_players_limit {
            return Err(GameError::InvalidCapacity);
        }

        let password_hash = normalize_password(settings.password.as_deref())
            .map(|password| hash_password(&id, password));

        Ok(Self {
            id,
            name,
            max_players: settings.max_players,
            password_hash,
            is_private: settings.is_private,
            admin: None,
            created_at: now,
            created_seq,
            round_number: 0,
            round: None,
            players: BTreeMap::new(),
            next_player_id: 1,
            history: VecDeque::new(),
            emptied_at: Some(now),
            scoring: ScoringPolicy::from(config.as_ref()),
            config,
            rng: StdRng::from_entropy(),
        })
    }

    pub fn has_password(&self) -> bool {
        self.password_hash.is_some()
    }

    pub fn check_password(&self, password: Option<&str>) -> bool {
        match (&self.password_hash, normalize_password(password)) {
            (None, _) => true,
            (Some(expected), Some(given)) => *expected == hash_password(&self.id, given),
            (Some(_), None) => false,
        }
    }

    pub fn phase(&self) -> RoundPhase {
        self.round.as_ref().map_or(RoundPhase::Pending, Round::phase)
    }

    pub fn current_round(&self) -> Option<&Round> {
        self.round.as_ref()
    }

    pub fn player_count(&self) -> usize {
        self.players.len()
    }

    pub fn is_empty(&self) -> bool {
        self.players.is_empty()
    }

    pub fn player(&self, id: PlayerId) -> Option<&Player> {
        self.players.get(&id)
    }

    pub fn player_by_name(&self, name: &str) -> Option<&Player> {
        self.players.values().find(|p| p.name == name)
    }

    pub fn players(&self) -> impl Iterator<Item = &Player> {
        self.players.values()
    }

    pub fn history(&self) -> impl Iterator<Item = &RoundSummary> {
        self.history.iter()
    }

    /// Adds a player, or reattaches a retained one.
    ///
    /// A matching `session_token` always resumes its seat. Otherwise a name
    /// held by a disconnected player inside the grace period resumes that
    /// player once the password checks out; a name held by a connected player
    /// is taken.
    pub fn join(
        &mut self,
        request: JoinRequest,
        connection: ConnectionId,
        now: u64,
        out: &mut Outbox,
    ) -> Result<JoinOutcome, GameError> {
        match self.admit(&request, now)? {
            Admission::Reattach(id) => return self.reattach(id, connection, now, out),
            // Grace is over; the stale seat goes before the new one is made.
            Admission::Replace(stale) => {
                self.leave(stale, now, out);
            }
            Admission::Fresh => {}
        }

        let name = request.player_name.trim().to_string();
        let id = self.next_player_id;
        self.next_player_id += 1;
        let player = Player::new(id, name.clone(), connection, now);
        let token = player.token.clone();
        self.players.insert(id, player);
        self.emptied_at = None;
        if self.admin.is_none() {
            self.admin = Some(id);
        }
        info!("Player {} ({}) joined room {}", name, id, self.id);

        out.send(connection, self.joined_message(&token));
        self.broadcast(
            out,
            ServerMessage::PlayerJoined {
                player_name: name.clone(),
                room_info: self.info(),
            },
            Some(id),
        );

        if self.round.is_none() {
            self.start_round(now, out);
        } else {
            self.send_current_round(connection, out);
        }

        Ok(JoinOutcome {
            player_id: id,
            player_name: name,
            token,
            reconnected: false,
            replaced_connection: None,
        })
    }

    /// Whether `join` would accept `request`. Changes nothing.
    pub fn check_join(&self, request: &JoinRequest, now: u64) -> Result<(), GameError> {
        self.admit(request, now).map(|_| ())
    }

    fn admit(&self, request: &JoinRequest, now: u64) -> Result<Admission, GameError> {
        if let Some(token) = request.session_token.as_deref() {
            if let Some(player) = self.players.values().find(|p| p.token == token) {
                return Ok(Admission::Reattach(player.id));
            }
        }

        let name = request.player_name.trim();
        let name_len = name.chars().count();
        if !(MIN_PLAYER_NAME_LEN..=MAX_PLAYER_NAME_LEN).contains(&name_len) {
            return Err(GameError::InvalidPlayerName);
        }

        let mut admission = Admission::Fresh;
        if let Some(existing) = self.player_by_name(name) {
            let since = existing.disconnected_at.ok_or(GameError::NameTaken)?;
            if !self.check_password(request.password.as_deref()) {
                return Err(GameError::InvalidPassword);
            }
            let grace_ms = self.config.reconnect_grace().as_millis() as u64;
            if now.saturating_sub(since) <= grace_ms {
                return Ok(Admission::Reattach(existing.id));
            }
            admission = Admission::Replace(existing.id);
        }

        if !self.check_password(request.password.as_deref()) {
            return Err(GameError::InvalidPassword);
        }
        let seated = match admission {
            Admission::Replace(_) => self.players.len() - 1,
            _ => self.players.len(),
        };
        if seated >= self.max_players {
            return Err(GameError::RoomFull);
        }
        Ok(admission)
    }

    fn reattach(
        &mut self,
        id: PlayerId,
        connection: ConnectionId,
        now: u64,
        out: &mut Outbox,
    ) -> Result<JoinOutcome, GameError> {
        let player = self.players.get_mut(&id).ok_or(GameError::NotInRoom)?;
        let previous = player.connection.replace(connection);
        player.disconnected_at = None;
        player.last_activity = now;
        let (name, token) = (player.name.clone(), player.token.clone());
        info!("Player {} ({}) reconnected to room {}", name, id, self.id);

        out.send(connection, self.joined_message(&token));
        self.broadcast(
            out,
            ServerMessage::PlayerReconnected {
                player_name: name.clone(),
                room_info: self.info(),
            },
            Some(id),
        );
        self.send_current_round(connection, out);

        Ok(JoinOutcome {
            player_id: id,
            player_name: name,
            token,
            reconnected: true,
            replaced_connection: previous.filter(|c| *c != connection),
        })
    }

    /// Removes a player for good. Returns the removed record.
    pub fn leave(&mut self, id: PlayerId, now: u64, out: &mut Outbox) -> Option<Player> {
        let player = self.players.remove(&id)?;
        info!("Player {} ({}) left room {}", player.name, id, self.id);

        if self.admin == Some(id) {
            self.admin = self.players.keys().next().copied();
        }

        if self.players.is_empty() {
            if self.round.take().is_some() {
                out.round_stopped = true;
            }
            self.emptied_at = Some(now);
        }

        self.broadcast(
            out,
            ServerMessage::PlayerLeft {
                player_name: player.name.clone(),
                room_info: self.info(),
            },
            None,
        );
        Some(player)
    }

    /// Detaches the player's transport but keeps the seat.
    ///
    /// Ignored when `connection` is no longer the player's live transport.
    pub fn disconnect(&mut self, id: PlayerId, connection: ConnectionId, now: u64) -> bool {
        match self.players.get_mut(&id) {
            Some(player) if player.connection == Some(connection) => {
                player.connection = None;
                player.disconnected_at = Some(now);
                debug!("Player {} ({}) disconnected from room {}", player.name, id, self.id);
                true
            }
            _ => false,
        }
    }

    /// Validates and applies a guess.
    pub fn guess(
        &mut self,
        id: PlayerId,
        value: i64,
        now: u64,
        out: &mut Outbox,
    ) -> Result<GuessDetails, GameError> {
        let player = self.players.get(&id).ok_or(GameError::NotInRoom)?;
        let connection = player.connection;

        let (number, expired) = match &self.round {
            Some(round) if round.is_active() => (round.number, round.is_expired(now)),
            _ => return Err(GameError::RoundNotActive),
        };
        if expired {
            // The deadline passed before the timer got to it.
            self.expire_round(number, now, out);
            return Err(GameError::RoundNotActive);
        }

        if !player.can_make_guess(now, self.config.guess_cooldown_ms) {
            return Err(GameError::GuessRateLimited);
        }

        let round = self.round.as_mut().ok_or(GameError::RoundNotActive)?;
        let cap = self.config.max_guesses_per_round;
        if cap > 0 && round.guesses_by(id) >= cap {
            return Err(GameError::GuessLimitReached);
        }

        let evaluation = round.submit(id, value)?;
        let total_guesses = round.total_guesses();
        let elapsed = now.saturating_sub(round.started_at);
        let duration = round.duration_ms();
        let started_at = round.started_at;
        let target = round.target();

        let player = self
            .players
            .get_mut(&id)
            .ok_or(GameError::NotInRoom)?;
        player.last_guess_at = Some(now);
        player.last_activity = now;

        match evaluation {
            GuessEvaluation::Incorrect(hint) => {
                let details = GuessDetails {
                    correct: false,
                    guess: value,
                    hint: Some(hint),
                    score_gained: 0,
                    time_bonus: 0,
                    streak_bonus: 0,
                    streak: player.score.streak,
                    total_guesses,
                    new_total_score: player.score.total,
                };
                let message = match hint {
                    GuessHint::Higher => format!("{} is too low, go higher", value),
                    GuessHint::Lower => format!("{} is too high, go lower", value),
                };
                if let Some(connection) = connection {
                    out.send(
                        connection,
                        ServerMessage::GuessResult {
                            message,
                            details: details.clone(),
                        },
                    );
                }
                Ok(details)
            }
            GuessEvaluation::Correct => {
                let delta = self.scoring.score(elapsed, duration, player.score.streak);
                player.score.record_win(number, &delta);
                let winner = player.name.clone();
                let details = GuessDetails {
                    correct: true,
                    guess: value,
                    hint: None,
                    score_gained: delta.total,
                    time_bonus: delta.time_bonus,
                    streak_bonus: delta.streak_bonus,
                    streak: player.score.streak,
                    total_guesses,
                    new_total_score: player.score.total,
                };

                for other in self.players.values_mut().filter(|p| p.id != id) {
                    other.score.break_streak();
                }

                info!(
                    "Room {}: {} won round {} (+{} points)",
                    self.id, winner, number, delta.total
                );

                if let Some(connection) = connection {
                    out.send(
                        connection,
                        ServerMessage::GuessResult {
                            message: format!("Correct! The number was {}", target),
                            details: details.clone(),
                        },
                    );
                }
                self.finish_round(
                    RoundSummary {
                        round_number: number,
                        winner: Some(winner),
                        target,
                        total_guesses,
                        duration_ms: now.saturating_sub(started_at),
                    },
                    out,
                );
                self.broadcast(
                    out,
                    ServerMessage::ScoreboardUpdated {
                        scores: self.scores(),
                    },
                    None,
                );
                self.start_round(now, out);
                Ok(details)
            }
        }
    }

    /// Deadline handler. Resolves round `round_number` with no winner if it is
    /// still active and starts the next one; a no-op otherwise.
    pub fn expire_round(&mut self, round_number: u32, now: u64, out: &mut Outbox) -> bool {
        let round = match self.round.as_mut() {
            Some(round) => round,
            None => return false,
        };
        if !round.try_resolve(round_number) {
            return false;
        }
        let participants = round.participants();
        let summary = RoundSummary {
            round_number,
            winner: None,
            target: round.target(),
            total_guesses: round.total_guesses(),
            duration_ms: now.saturating_sub(round.started_at),
        };
        for id in participants {
            if let Some(player) = self.players.get_mut(&id) {
                player.score.break_streak();
            }
        }

        info!(
            "Room {}: round {} timed out, the number was {}",
            self.id, round_number, summary.target
        );
        self.finish_round(summary, out);
        if !self.players.is_empty() {
            self.start_round(now, out);
        }
        true
    }

    pub fn chat(
        &mut self,
        id: PlayerId,
        message: &str,
        now: u64,
        out: &mut Outbox,
    ) -> Result<(), GameError> {
        let max_per_minute = self.config.max_chat_per_minute;
        let player = self.players.get_mut(&id).ok_or(GameError::NotInRoom)?;
        let text = message.trim();
        if text.is_empty() {
            return Err(GameError::EmptyMessage);
        }
        if !player.can_send_chat(now, max_per_minute) {
            return Err(GameError::ChatRateLimited);
        }
        player.last_activity = now;
        let player_name = player.name.clone();

        self.broadcast(
            out,
            ServerMessage::ChatMessage {
                player_name,
                message: text.to_string(),
                timestamp: now,
            },
            None,
        );
        Ok(())
    }

    /// Admin-only: wipes scores and history and restarts from round 1.
    pub fn reset(&mut self, requester: PlayerId, now: u64, out: &mut Outbox) -> Result<(), GameError> {
        let requester_name = match self.players.get(&requester) {
            Some(player) => player.name.clone(),
            None => return Err(GameError::NotInRoom),
        };
        if self.admin != Some(requester) {
            return Err(GameError::NotAuthorized);
        }

        for player in self.players.values_mut() {
            player.score.reset();
            player.last_guess_at = None;
        }
        self.history.clear();
        self.round = None;
        self.round_number = 0;
        info!("Room {} reset by {}", self.id, requester_name);

        self.broadcast(
            out,
            ServerMessage::RoomReset {
                message: format!("{} reset the room", requester_name),
            },
            None,
        );
        self.start_round(now, out);
        self.broadcast(
            out,
            ServerMessage::ScoreboardUpdated {
                scores: self.scores(),
            },
            None,
        );
        Ok(())
    }

    fn start_round(&mut self, now: u64, out: &mut Outbox) {
        self.round_number += 1;
        let number = self.round_number;
        let duration_ms = self.config.round_duration().as_millis() as u64;
        let previous_hint = self.round.as_ref().and_then(|r| r.hint_category);

        let mut round = Round::start(
            number,
            self.config.range_for_round(number),
            now,
            duration_ms,
            &mut self.rng,
        );
        if self.config.hints_enabled {
            if let Some((text, category)) =
                hint_for_round(number, round.target(), previous_hint, &mut self.rng)
            {
                round.hint = Some(text);
                round.hint_category = Some(category);
            }
        }
        debug!(
            "Room {}: round {} started, range [{}, {}]",
            self.id, number, round.low, round.high
        );

        let message = ServerMessage::NewRound {
            round_number: number,
            range: [round.low, round.high],
            end_time: round.ends_at,
            hint: round.hint.clone(),
        };
        out.round_started = Some(RoundSchedule {
            round_number: number,
            ends_at: round.ends_at,
        });
        self.round = Some(round);
        self.broadcast(out, message, None);
    }

    fn finish_round(&mut self, summary: RoundSummary, out: &mut Outbox) {
        self.broadcast(
            out,
            ServerMessage::RoundEnded {
                round_number: summary.round_number,
                winner: summary.winner.clone(),
                target: summary.target,
                total_guesses: summary.total_guesses,
                duration_ms: summary.duration_ms,
            },
            None,
        );
        self.history.push_back(summary);
        while self.history.len() > self.config.history_len {
            self.history.pop_front();
        }
    }

    fn send_current_round(&self, connection: ConnectionId, out: &mut Outbox) {
        if let Some(round) = self.round.as_ref().filter(|r| r.is_active()) {
            out.send(
                connection,
                ServerMessage::NewRound {
                    round_number: round.number,
                    range: [round.low, round.high],
                    end_time: round.ends_at,
                    hint: round.hint.clone(),
                },
            );
        }
    }

    fn joined_message(&self, token: &str) -> ServerMessage {
        ServerMessage::RoomJoined {
            room_id: self.id.clone(),
            room_name: self.name.clone(),
            session_token: token.to_string(),
            room_info: self.info(),
        }
    }

    /// Queues `message` for every connected member except `except`.
    pub fn broadcast(&self, out: &mut Outbox, message: ServerMessage, except: Option<PlayerId>) {
        for player in self.players.values() {
            if Some(player.id) == except {
                continue;
            }
            if let Some(connection) = player.connection {
                out.send(connection, message.clone());
            }
        }
    }

    pub fn scores(&self) -> BTreeMap<String, u64> {
        self.players
            .values()
            .map(|p| (p.name.clone(), p.score.total))
            .collect()
    }

    pub fn info(&self) -> RoomInfo {
        RoomInfo {
            room_id: self.id.clone(),
            room_name: self.name.clone(),
            scores: self.scores(),
            current_round: self
                .round
                .as_ref()
                .filter(|r| r.is_active())
                .map(Round::info),
            round_number: self.round_number,
            players: self
                .players
                .values()
                .map(|p| p.info(self.admin == Some(p.id)))
                .collect(),
            current_players: self.players.len(),
            max_players: self.max_players,
            recent_rounds: self.history.iter().cloned().collect(),
        }
    }

    pub fn summary(&self) -> RoomSummary {
        RoomSummary {
            id: self.id.clone(),
            name: self.name.clone(),
            current_players: self.players.len(),
            max_players: self.max_players,
            round_number: self.round_number,
            has_password: self.has_password(),
        }
    }
}

fn normalize_password(password: Option<&str>) -> Option<&str> {
    password.filter(|p| !p.is_empty())
}

fn hash_password(room_id: &str, password: &str) -> [u8; 32] {
    let mut hasher = Sha256::new();
    hasher.update(room_id.as_bytes());
    hasher.update([0u8]);
    hasher.update(password.as_bytes());
    hasher.finalize().into()
}
