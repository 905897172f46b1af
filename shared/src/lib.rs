use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

pub const DEFAULT_RANGE_LOW: i64 = 1;
pub const DEFAULT_RANGE_HIGH: i64 = 100;
pub const MIN_ROOM_ID_LEN: usize = 3;
pub const MAX_ROOM_ID_LEN: usize = 24;
pub const MAX_ROOM_NAME_LEN: usize = 40;
pub const MIN_PLAYER_NAME_LEN: usize = 2;
pub const MAX_PLAYER_NAME_LEN: usize = 20;
pub const MAX_CHAT_LEN: usize = 200;
/// How long a client-side session cache entry may be used to resume.
pub const SESSION_CACHE_TTL_MS: u64 = 60 * 60 * 1000;

/// Every recoverable failure a request can produce.
///
/// Serialized by variant name, so `GameError::RoomNotFound` travels as the
/// string `"RoomNotFound"` inside the `error` field of error events.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, thiserror::Error,
)]
pub enum GameError {
    #[error("room does not exist")]
    RoomNotFound,
    #[error("a room with this id already exists")]
    DuplicateRoomId,
    #[error("room is full")]
    RoomFull,
    #[error("wrong room password")]
    InvalidPassword,
    #[error("only the room admin may do this")]
    NotAuthorized,
    #[error("no round is running")]
    RoundNotActive,
    #[error("guess is outside the round range")]
    OutOfRange,
    #[error("guess must be an integer")]
    InvalidGuessFormat,
    #[error("message is empty")]
    EmptyMessage,
    #[error("room id must be 3-24 letters, digits, '_' or '-'")]
    InvalidRoomId,
    #[error("room name must be 1-40 characters")]
    InvalidRoomName,
    #[error("max players is out of bounds")]
    InvalidCapacity,
    #[error("player name must be 2-20 characters")]
    InvalidPlayerName,
    #[error("player name already in use in this room")]
    NameTaken,
    #[error("room limit reached")]
    TooManyRooms,
    #[error("not a member of this room")]
    NotInRoom,
    #[error("guessing too fast")]
    GuessRateLimited,
    #[error("no guesses left this round")]
    GuessLimitReached,
    #[error("chatting too fast")]
    ChatRateLimited,
    #[error("message is too long")]
    MessageTooLong,
    #[error("malformed message")]
    MalformedMessage,
    #[error("server is full")]
    ServerFull,
}

/// Requests sent by a client. Each JSON frame carries its kind in `type`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    CreateRoom {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        room_id: Option<String>,
        room_name: String,
        max_players: u32,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        password: Option<String>,
        #[serde(default)]
        is_private: bool,
    },
    JoinRoom {
        room_id: String,
        player_name: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        password: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        session_token: Option<String>,
    },
    LeaveRoom,
    MakeGuess {
        room_id: String,
        guess: i64,
    },
    ChatMessage {
        room_id: String,
        message: String,
    },
    ResetRoom {
        room_id: String,
    },
    GetAvailableRooms,
    GetRoomInfo {
        room_id: String,
    },
}

impl ClientMessage {
    pub fn kind(&self) -> &'static str {
        match self {
            ClientMessage::CreateRoom { .. } => "create_room",
            ClientMessage::JoinRoom { .. } => "join_room",
            ClientMessage::LeaveRoom => "leave_room",
            ClientMessage::MakeGuess { .. } => "make_guess",
            ClientMessage::ChatMessage { .. } => "chat_message",
            ClientMessage::ResetRoom { .. } => "reset_room",
            ClientMessage::GetAvailableRooms => "get_available_rooms",
            ClientMessage::GetRoomInfo { .. } => "get_room_info",
        }
    }

    /// Wraps a rejection in the error event the client listens for on this request kind.
    pub fn error_reply(&self, error: GameError) -> ServerMessage {
        match self {
            ClientMessage::CreateRoom { .. } => ServerMessage::CreateRoomError { error },
            ClientMessage::JoinRoom { .. } => ServerMessage::JoinError { error },
            ClientMessage::MakeGuess { .. } => ServerMessage::GuessError { error },
            ClientMessage::ChatMessage { .. } => ServerMessage::ChatError { error },
            ClientMessage::ResetRoom { .. } => ServerMessage::ResetError { error },
            _ => ServerMessage::Error { error },
        }
    }

    fn validate(&self) -> Result<(), GameError> {
        if let ClientMessage::ChatMessage { message, .. } = self {
            let trimmed = message.trim();
            if trimmed.is_empty() {
                return Err(GameError::EmptyMessage);
            }
            if trimmed.chars().count() > MAX_CHAT_LEN {
                return Err(GameError::MessageTooLong);
            }
        }
        Ok(())
    }
}

/// Direction from the rejected guess towards the target.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GuessHint {
    Higher,
    Lower,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GuessDetails {
    pub correct: bool,
    pub guess: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hint: Option<GuessHint>,
    pub score_gained: u64,
    pub time_bonus: u64,
    pub streak_bonus: u64,
    pub streak: u32,
    pub total_guesses: u32,
    pub new_total_score: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoundInfo {
    pub round_number: u32,
    pub range: [i64; 2],
    pub end_time: u64,
    pub total_guesses: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hint: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlayerInfo {
    pub name: String,
    pub score: u64,
    pub streak: u32,
    pub correct_guesses: u32,
    pub connected: bool,
    pub is_admin: bool,
}

/// One finished round, as kept in a room's recent history.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoundSummary {
    pub round_number: u32,
    pub winner: Option<String>,
    pub target: i64,
    pub total_guesses: u32,
    pub duration_ms: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoomInfo {
    pub room_id: String,
    pub room_name: String,
    pub scores: BTreeMap<String, u64>,
    pub current_round: Option<RoundInfo>,
    pub round_number: u32,
    pub players: Vec<PlayerInfo>,
    pub current_players: usize,
    pub max_players: usize,
    #[serde(default)]
    pub recent_rounds: Vec<RoundSummary>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoomSummary {
    pub id: String,
    pub name: String,
    pub current_players: usize,
    pub max_players: usize,
    pub round_number: u32,
    pub has_password: bool,
}

/// Events pushed by the server.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    RoomCreated {
        room_id: String,
        room_name: String,
    },
    CreateRoomError {
        error: GameError,
    },
    RoomJoined {
        room_id: String,
        room_name: String,
        session_token: String,
        room_info: RoomInfo,
    },
    JoinError {
        error: GameError,
    },
    PlayerJoined {
        player_name: String,
        room_info: RoomInfo,
    },
    PlayerReconnected {
        player_name: String,
        room_info: RoomInfo,
    },
    PlayerLeft {
        player_name: String,
        room_info: RoomInfo,
    },
    NewRound {
        round_number: u32,
        range: [i64; 2],
        end_time: u64,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        hint: Option<String>,
    },
    GuessResult {
        message: String,
        details: GuessDetails,
    },
    GuessError {
        error: GameError,
    },
    RoundEnded {
        round_number: u32,
        winner: Option<String>,
        target: i64,
        total_guesses: u32,
        duration_ms: u64,
    },
    ChatMessage {
        player_name: String,
        message: String,
        timestamp: u64,
    },
    ChatError {
        error: GameError,
    },
    ScoreboardUpdated {
        scores: BTreeMap<String, u64>,
    },
    RoomReset {
        message: String,
    },
    ResetError {
        error: GameError,
    },
    AvailableRooms {
        rooms: Vec<RoomSummary>,
    },
    RoomInfo {
        room_info: RoomInfo,
    },
    Error {
        error: GameError,
    },
}

impl ServerMessage {
    /// Picks the error event for a frame that failed to decode.
    pub fn for_decode_error(error: GameError) -> ServerMessage {
        match error {
            GameError::InvalidGuessFormat => ServerMessage::GuessError { error },
            GameError::EmptyMessage | GameError::MessageTooLong => {
                ServerMessage::ChatError { error }
            }
            _ => ServerMessage::Error { error },
        }
    }
}

/// Decodes and validates one inbound frame.
///
/// Guesses given as integer strings (`"42"`) are coerced; any other
/// non-integer guess is rejected with `InvalidGuessFormat`. Blank chat is
/// rejected with `EmptyMessage`. Everything else that does not match a
/// request shape is `MalformedMessage`.
pub fn decode_client_message(text: &str) -> Result<ClientMessage, GameError> {
    let mut value: Value = serde_json::from_str(text).map_err(|_| GameError::MalformedMessage)?;

    if value.get("type").and_then(Value::as_str) == Some("make_guess") {
        let guess = parse_guess(value.get("guess"))?;
        if let Some(fields) = value.as_object_mut() {
            fields.insert("guess".to_string(), Value::from(guess));
        }
    }

    let message: ClientMessage =
        serde_json::from_value(value).map_err(|_| GameError::MalformedMessage)?;
    message.validate()?;
    Ok(message)
}

fn parse_guess(value: Option<&Value>) -> Result<i64, GameError> {
    match value {
        Some(Value::Number(n)) => n.as_i64().ok_or(GameError::InvalidGuessFormat),
        Some(Value::String(s)) => s
            .trim()
            .parse::<i64>()
            .map_err(|_| GameError::InvalidGuessFormat),
        _ => Err(GameError::InvalidGuessFormat),
    }
}

pub fn encode_server_message(message: &ServerMessage) -> Result<String, serde_json::Error> {
    serde_json::to_string(message)
}

pub fn decode_server_message(text: &str) -> Result<ServerMessage, serde_json::Error> {
    serde_json::from_str(text)
}

pub fn encode_client_message(message: &ClientMessage) -> Result<String, serde_json::Error> {
    serde_json::to_string(message)
}

/// Current Unix time in milliseconds.
pub fn timestamp_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or(Duration::from_secs(0))
        .as_millis() as u64
}
