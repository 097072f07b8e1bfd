use serde::Serialize;
use std::collections::HashMap;

/// Head, torso, legs sprite indexes.
pub type Avatar = [u8; 3];

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PlayerView {
    pub username: String,
    pub pos: String,
    pub avatar: Avatar,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct GameStateView {
    pub tick: u64,
    pub players: HashMap<String, PlayerView>,
    pub pos_to_username: HashMap<String, String>,
}

/// Positions travel as "Y:X" strings everywhere, including the occupancy
/// index keys.
pub fn encode_pos(x: i32, y: i32) -> String {
    format!("{y}:{x}")
}
