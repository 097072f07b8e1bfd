//! JSON wire envelope and typed payloads. Every frame is
//! `{"type": <discriminator>, "payload": <object>}`; payloads are decoded in
//! a second step so unknown types can be skipped without touching the rest of
//! the frame.

use crate::game::types::{Avatar, GameStateView, PlayerView};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::fmt;

// Client -> server.
pub const MSG_JOIN_ROOM: &str = "join_room";
pub const MSG_ONBOARD: &str = "onboard";
pub const MSG_LEAVE_ROOM: &str = "leave_room";
pub const MSG_PLAYER_MOVE: &str = "player_move";
pub const MSG_GLOBAL_CHAT_MESSAGE: &str = "global_chat_message";
pub const MSG_ROOM_CHAT_MESSAGE: &str = "room_chat_message";
pub const MSG_CHAT_MESSAGE: &str = "chat_message";
pub const MSG_TREASURE_HUNT_GUESS: &str = "treasure_hunt_guess";

// Server -> client. `global_chat_messages` and `chat_message` flow both ways:
// inbound as a history request / direct send, outbound as the snapshot reply.
pub const MSG_ONBOARD_REQUEST: &str = "onboard_request";
pub const MSG_ROOM_JOINED: &str = "room_joined";
pub const MSG_ERROR: &str = "error";
pub const MSG_KULUCHIFIED_STATE: &str = "kuluchified_state";
pub const MSG_GLOBAL_CHAT_MESSAGES: &str = "global_chat_messages";
pub const MSG_ROOM_CHAT_MESSAGES: &str = "room_chat_messages";
pub const MSG_ANNOUNCEMENT: &str = "announcement";
pub const MSG_TREASURE_HUNT_STATE: &str = "treasure_hunt_state";

#[derive(Debug, Deserialize)]
struct Envelope {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    payload: Value,
}

#[derive(Debug, Clone, Deserialize)]
pub struct JoinRoomPayload {
    pub username: String,
    #[serde(default)]
    pub room_id: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct OnboardPayload {
    pub name: String,
    pub avatar: Avatar,
}

#[derive(Debug, Clone, Copy, Deserialize)]
pub struct PlayerMovePayload {
    pub new_x: i32,
    pub new_y: i32,
}

#[derive(Debug, Clone, Deserialize)]
pub struct GlobalChatSendPayload {
    pub message: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RoomChatSendPayload {
    pub room_number: String,
    pub message: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DirectChatSendPayload {
    pub to_player_id: String,
    pub message: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TreasureHuntGuessPayload {
    pub guess: String,
}

#[derive(Debug)]
pub enum ClientMessage {
    JoinRoom(JoinRoomPayload),
    Onboard(OnboardPayload),
    LeaveRoom,
    PlayerMove(PlayerMovePayload),
    GlobalChat(GlobalChatSendPayload),
    RoomChat(RoomChatSendPayload),
    DirectChat(DirectChatSendPayload),
    TreasureHuntGuess(TreasureHuntGuessPayload),
    GlobalChatHistory,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DecodeError {
    /// The frame is not a valid envelope, or the payload does not match the
    /// declared type.
    Malformed(String),
    /// The envelope is valid but the discriminator is not recognized. The
    /// dispatcher discards these; a strict caller may treat them as fatal.
    UnknownType(String),
}

impl fmt::Display for DecodeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DecodeError::Malformed(detail) => write!(f, "malformed frame: {detail}"),
            DecodeError::UnknownType(kind) => write!(f, "unknown message type: {kind}"),
        }
    }
}

impl std::error::Error for DecodeError {}

pub fn decode_client_message(text: &str) -> Result<ClientMessage, DecodeError> {
    let envelope: Envelope =
        serde_json::from_str(text).map_err(|error| DecodeError::Malformed(error.to_string()))?;
    let payload = envelope.payload;
    match envelope.kind.as_str() {
        MSG_JOIN_ROOM => Ok(ClientMessage::JoinRoom(payload_from(payload)?)),
        MSG_ONBOARD => Ok(ClientMessage::Onboard(payload_from(payload)?)),
        MSG_LEAVE_ROOM => Ok(ClientMessage::LeaveRoom),
        MSG_PLAYER_MOVE => Ok(ClientMessage::PlayerMove(payload_from(payload)?)),
        MSG_GLOBAL_CHAT_MESSAGE => Ok(ClientMessage::GlobalChat(payload_from(payload)?)),
        MSG_ROOM_CHAT_MESSAGE => Ok(ClientMessage::RoomChat(payload_from(payload)?)),
        MSG_CHAT_MESSAGE => Ok(ClientMessage::DirectChat(payload_from(payload)?)),
        MSG_TREASURE_HUNT_GUESS => Ok(ClientMessage::TreasureHuntGuess(payload_from(payload)?)),
        MSG_GLOBAL_CHAT_MESSAGES => Ok(ClientMessage::GlobalChatHistory),
        other => Err(DecodeError::UnknownType(other.to_string())),
    }
}

fn payload_from<T: serde::de::DeserializeOwned>(payload: Value) -> Result<T, DecodeError> {
    serde_json::from_value(payload).map_err(|error| DecodeError::Malformed(error.to_string()))
}

#[derive(Debug, Clone, Serialize)]
pub struct RoomJoinedPayload {
    pub room_id: String,
    pub player_id: String,
    pub game_state: GameStateView,
}

#[derive(Debug, Clone, Serialize)]
pub struct ErrorPayload {
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ChatEntry {
    pub username: String,
    pub message: String,
    pub timestamp: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SubRoomChatEntry {
    pub room_number: String,
    pub username: String,
    pub message: String,
    pub timestamp: i64,
}

/// Direct-chat record; both endpoints travel on the record itself. The
/// `player_id` fields carry usernames, never connection ids.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DirectChatPayload {
    pub from_player_id: String,
    pub to_player_id: String,
    pub message: String,
    pub timestamp: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AnnouncementPayload {
    pub message: String,
    pub timestamp: i64,
}

#[derive(Debug, Clone, Serialize)]
pub struct GlobalChatMessagesPayload {
    pub messages: Vec<ChatEntry>,
}

#[derive(Debug, Clone, Serialize)]
pub struct RoomChatMessagesPayload {
    pub room_number: String,
    pub messages: Vec<SubRoomChatEntry>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TreasureHuntStatePayload {
    pub current_clue_index: u32,
    pub clue_text: String,
    pub completed: bool,
}

/// The unified per-tick snapshot.
#[derive(Debug, Clone, Serialize)]
pub struct KuluchifiedStatePayload {
    pub game_state: GameStateView,
    pub chat_messages: Vec<ChatEntry>,
    pub room_chat_messages: HashMap<String, Vec<SubRoomChatEntry>>,
    pub announcements: Vec<AnnouncementPayload>,
    pub players: HashMap<String, PlayerView>,
    pub treasure_hunt_state: TreasureHuntStatePayload,
}

pub fn encode_message<T: Serialize>(kind: &str, payload: &T) -> String {
    serde_json::json!({ "type": kind, "payload": payload }).to_string()
}

pub fn encode_bare(kind: &str) -> String {
    serde_json::json!({ "type": kind }).to_string()
}
