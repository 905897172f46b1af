//! Terminal command parsing
//!
//! Lines starting with `/` are commands, anything else is chat for the
//! current room.

use shared::ClientMessage;

const DEFAULT_MAX_PLAYERS: u32 = 8;

pub const HELP: &str = "\
Commands:
  /create <name> [max_players] [--id ID] [--password PW] [--private]
  /join <room_id> [password]
  /leave
  /guess <number>
  /rooms
  /info [room_id]
  /reset
  /quit
Anything else is sent as chat to your current room.";

/// A parsed line of user input
#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    Send(ClientMessage),
    Help,
    Quit,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum InputError {
    #[error("Unknown command /{0}, try /help")]
    UnknownCommand(String),
    #[error("Missing {0}")]
    MissingArgument(&'static str),
    #[error("'{0}' is not a whole number")]
    InvalidNumber(String),
    #[error("Join a room first")]
    NotInRoom,
}

/// Turns one line into a command. `room_id` is the room the user is in.
pub fn parse_command(
    line: &str,
    player_name: &str,
    room_id: Option<&str>,
) -> Result<Option<Command>, InputError> {
    let line = line.trim();
    if line.is_empty() {
        return Ok(None);
    }

    let Some(rest) = line.strip_prefix('/') else {
        let room_id = room_id.ok_or(InputError::NotInRoom)?;
        return Ok(Some(Command::Send(ClientMessage::ChatMessage {
            room_id: room_id.to_string(),
            message: line.to_string(),
        })));
    };

    let mut words = rest.split_whitespace();
    let name = words.next().unwrap_or("").to_lowercase();
    let args: Vec<&str> = words.collect();

    let command = match name.as_str() {
        "help" | "h" => Command::Help,
        "quit" | "exit" | "q" => Command::Quit,
        "rooms" => Command::Send(ClientMessage::GetAvailableRooms),
        "leave" => Command::Send(ClientMessage::LeaveRoom),
        "create" => Command::Send(parse_create(&args)?),
        "join" => {
            let target = args.first().ok_or(InputError::MissingArgument("room id"))?;
            Command::Send(ClientMessage::JoinRoom {
                room_id: target.to_string(),
                player_name: player_name.to_string(),
                password: args.get(1).map(|p| p.to_string()),
                session_token: None,
            })
        }
        "guess" | "g" => {
            let room_id = room_id.ok_or(InputError::NotInRoom)?;
            let raw = args.first().ok_or(InputError::MissingArgument("number"))?;
            let guess = raw
                .parse::<i64>()
                .map_err(|_| InputError::InvalidNumber(raw.to_string()))?;
            Command::Send(ClientMessage::MakeGuess {
                room_id: room_id.to_string(),
                guess,
            })
        }
        "info" => {
            let target = args
                .first()
                .copied()
                .or(room_id)
                .ok_or(InputError::MissingArgument("room id"))?;
            Command::Send(ClientMessage::GetRoomInfo {
                room_id: target.to_string(),
            })
        }
        "reset" => {
            let room_id = room_id.ok_or(InputError::NotInRoom)?;
            Command::Send(ClientMessage::ResetRoom {
                room_id: room_id.to_string(),
            })
        }
        other => return Err(InputError::UnknownCommand(other.to_string())),
    };
    Ok(Some(command))
}

fn parse_create(args: &[&str]) -> Result<ClientMessage, InputError> {
    let mut room_id = None;
    let mut password = None;
    let mut is_private = false;
    let mut words = Vec::new();

    let mut iter = args.iter();
    while let Some(arg) = iter.next() {
        match *arg {
            "--id" => room_id = Some(iter.next().ok_or(InputError::MissingArgument("room id"))?),
            "--password" => {
                password = Some(iter.next().ok_or(InputError::MissingArgument("password"))?)
            }
            "--private" => is_private = true,
            word => words.push(word),
        }
    }

    let max_players = match words.last().map(|w| w.parse::<u32>()) {
        Some(Ok(n)) => {
            words.pop();
            n
        }
        _ => DEFAULT_MAX_PLAYERS,
    };
    if words.is_empty() {
        return Err(InputError::MissingArgument("room name"));
    }

    Ok(ClientMessage::CreateRoom {
        room_id: room_id.map(|id| id.to_string()),
        room_name: words.join(" "),
        max_players,
        password: password.map(|p| p.to_string()),
        is_private,
    })
}
