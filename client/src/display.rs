//! Text rendering of server events for the terminal

use shared::{GuessHint, RoomInfo, ServerMessage};
use std::collections::BTreeMap;

/// One or more lines describing `message`, without a trailing newline.
pub fn render(message: &ServerMessage) -> String {
    match message {
        ServerMessage::RoomCreated { room_id, room_name } => {
            format!("Room '{}' created with id {}. Use /join {}", room_name, room_id, room_id)
        }
        ServerMessage::RoomJoined {
            room_name,
            room_info,
            ..
        } => format!("Joined '{}'\n{}", room_name, render_room(room_info)),
        ServerMessage::PlayerJoined { player_name, .. } => {
            format!("* {} joined the room", player_name)
        }
        ServerMessage::PlayerReconnected { player_name, .. } => {
            format!("* {} is back", player_name)
        }
        ServerMessage::PlayerLeft { player_name, .. } => {
            format!("* {} left the room", player_name)
        }
        ServerMessage::NewRound {
            round_number,
            range,
            end_time,
            hint,
        } => {
            let mut text = format!(
                "== Round {}: guess a number between {} and {} ({}s left) ==",
                round_number,
                range[0],
                range[1],
                seconds_left(*end_time)
            );
            if let Some(hint) = hint {
                text.push_str(&format!("\n   Hint: {}", hint));
            }
            text
        }
        ServerMessage::GuessResult { message, details } => {
            if details.correct {
                format!(
                    "{} +{} points ({} base, {} time, {} streak), total {}, streak {}",
                    message,
                    details.score_gained,
                    details
                        .score_gained
                        .saturating_sub(details.time_bonus)
                        .saturating_sub(details.streak_bonus),
                    details.time_bonus,
                    details.streak_bonus,
                    details.new_total_score,
                    details.streak
                )
            } else {
                let arrow = match details.hint {
                    Some(GuessHint::Higher) => "^",
                    Some(GuessHint::Lower) => "v",
                    None => "?",
                };
                format!("{} {}", arrow, message)
            }
        }
        ServerMessage::RoundEnded {
            round_number,
            winner,
            target,
            total_guesses,
            ..
        } => match winner {
            Some(winner) => format!(
                "Round {} won by {}. The number was {} ({} guesses)",
                round_number, winner, target, total_guesses
            ),
            None => format!(
                "Round {} timed out. The number was {} ({} guesses)",
                round_number, target, total_guesses
            ),
        },
        ServerMessage::ChatMessage {
            player_name,
            message,
            ..
        } => format!("<{}> {}", player_name, message),
        ServerMessage::ScoreboardUpdated { scores } => render_scores(scores),
        ServerMessage::RoomReset { message } => format!("* {}", message),
        ServerMessage::AvailableRooms { rooms } => {
            if rooms.is_empty() {
                return "No open rooms. Create one with /create <name>".to_string();
            }
            let mut lines = vec!["Open rooms:".to_string()];
            for room in rooms {
                lines.push(format!(
                    "  {:<10} {:<24} {}/{} players, round {}{}",
                    room.id,
                    room.name,
                    room.current_players,
                    room.max_players,
                    room.round_number,
                    if room.has_password { " [password]" } else { "" }
                ));
            }
            lines.join("\n")
        }
        ServerMessage::RoomInfo { room_info } => render_room(room_info),
        ServerMessage::CreateRoomError { error } => format!("! Could not create room: {}", error),
        ServerMessage::JoinError { error } => format!("! Could not join: {}", error),
        ServerMessage::GuessError { error } => format!("! Guess rejected: {}", error),
        ServerMessage::ChatError { error } => format!("! Message not sent: {}", error),
        ServerMessage::ResetError { error } => format!("! Could not reset: {}", error),
        ServerMessage::Error { error } => format!("! {}", error),
    }
}

pub fn render_scores(scores: &BTreeMap<String, u64>) -> String {
    let mut ranked: Vec<(&String, &u64)> = scores.iter().collect();
    ranked.sort_by(|a, b| b.1.cmp(a.1).then_with(|| a.0.cmp(b.0)));

    let mut lines = vec!["Scores:".to_string()];
    for (place, (name, score)) in ranked.into_iter().enumerate() {
        lines.push(format!("  {}. {:<20} {}", place + 1, name, score));
    }
    lines.join("\n")
}

pub fn render_room(info: &RoomInfo) -> String {
    let mut lines = vec![format!(
        "[{}] {} - {}/{} players, round {}",
        info.room_id, info.room_name, info.current_players, info.max_players, info.round_number
    )];
    for player in &info.players {
        let mut flags = Vec::new();
        if player.is_admin {
            flags.push("admin");
        }
        if !player.connected {
            flags.push("away");
        }
        lines.push(format!(
            "  {:<20} {:>6} pts  streak {}{}",
            player.name,
            player.score,
            player.streak,
            if flags.is_empty() {
                String::new()
            } else {
                format!("  ({})", flags.join(", "))
            }
        ));
    }
    if let Some(round) = &info.current_round {
        lines.push(format!(
            "  Current round {}: {}..{}, {} guesses so far",
            round.round_number, round.range[0], round.range[1], round.total_guesses
        ));
    }
    lines.join("\n")
}

fn seconds_left(end_time: u64) -> u64 {
    end_time.saturating_sub(shared::timestamp_ms()) / 1000
}
