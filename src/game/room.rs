//! Authoritative world state. Every mutation happens on the room's own task,
//! which serializes registration, movement, chat fan-out, and the 20 Hz tick
//! through one command channel. Nothing outside the loop ever touches the
//! indexes; outside callers only enqueue commands and the loop pushes frames
//! onto per-connection queues.

use crate::chat::ChatStore;
use crate::game::constants::{
    FALLBACK_SPAWN_X, FALLBACK_SPAWN_Y, MAP_COLS, MAP_ROWS, MAX_SPAWN_ATTEMPTS,
    ROOM_COMMAND_CAPACITY, TICK_MS,
};
use crate::game::map::MapIndex;
use crate::game::riddle::RiddleEngine;
use crate::game::types::{encode_pos, Avatar, GameStateView, PlayerView};
use crate::protocol::{self, KuluchifiedStatePayload, RoomJoinedPayload};
use crate::transport::ws_session::ConnectionHandle;
use rand::Rng;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;

#[cfg(test)]
mod tests;

#[derive(Debug)]
pub enum RoomCommand {
    Register {
        conn: ConnectionHandle,
        username: String,
        avatar: Avatar,
    },
    Unregister {
        conn_id: String,
    },
    Broadcast {
        frame: String,
    },
    SubRoomCast {
        room_number: String,
        frame: String,
    },
    DirectCast {
        usernames: Vec<String>,
        frame: String,
    },
    Move {
        username: String,
        new_x: i32,
        new_y: i32,
    },
}

/// Cheap handle to a room task. Rooms are created lazily and live for the
/// rest of the process.
#[derive(Debug)]
pub struct Room {
    id: String,
    commands: mpsc::Sender<RoomCommand>,
}

impl Room {
    pub fn spawn(
        id: String,
        map: Arc<MapIndex>,
        chat: Arc<ChatStore>,
        riddle: Arc<RiddleEngine>,
    ) -> Arc<Self> {
        let (commands, inbox) = mpsc::channel(ROOM_COMMAND_CAPACITY);
        let state = RoomState::new(id.clone(), map, chat, riddle);
        tokio::spawn(run(state, inbox));
        Arc::new(Self { id, commands })
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub async fn register(&self, conn: ConnectionHandle, username: String, avatar: Avatar) {
        let _ = self
            .commands
            .send(RoomCommand::Register {
                conn,
                username,
                avatar,
            })
            .await;
    }

    pub async fn unregister(&self, conn_id: &str) {
        let _ = self
            .commands
            .send(RoomCommand::Unregister {
                conn_id: conn_id.to_string(),
            })
            .await;
    }

    pub async fn broadcast(&self, frame: String) {
        let _ = self.commands.send(RoomCommand::Broadcast { frame }).await;
    }

    pub async fn sub_room_cast(&self, room_number: String, frame: String) {
        let _ = self
            .commands
            .send(RoomCommand::SubRoomCast { room_number, frame })
            .await;
    }

    pub async fn direct_cast(&self, usernames: Vec<String>, frame: String) {
        let _ = self
            .commands
            .send(RoomCommand::DirectCast { usernames, frame })
            .await;
    }

    pub async fn move_player(&self, username: String, new_x: i32, new_y: i32) {
        let _ = self
            .commands
            .send(RoomCommand::Move {
                username,
                new_x,
                new_y,
            })
            .await;
    }

    /// Non-blocking broadcast for synchronous contexts (the riddle
    /// state-change callback). An overflowing inbox drops the frame; the
    /// next tick snapshot carries the same state anyway.
    pub fn try_broadcast(&self, frame: String) {
        if self
            .commands
            .try_send(RoomCommand::Broadcast { frame })
            .is_err()
        {
            tracing::warn!(room_id = %self.id, "room inbox full, dropping broadcast");
        }
    }
}

async fn run(mut state: RoomState, mut inbox: mpsc::Receiver<RoomCommand>) {
    let mut ticker = tokio::time::interval(Duration::from_millis(TICK_MS));
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
    loop {
        tokio::select! {
            command = inbox.recv() => {
                let Some(command) = command else { break };
                state.apply(command);
            }
            _ = ticker.tick() => state.tick(),
        }
    }
}

struct ConnectionEntry {
    conn: ConnectionHandle,
    username: String,
    position: String,
    current_sub_room: String,
}

struct RoomState {
    room_id: String,
    connections: HashMap<String, ConnectionEntry>,
    players: HashMap<String, PlayerView>,
    pos_index: HashMap<String, String>,
    tick: u64,
    map: Arc<MapIndex>,
    chat: Arc<ChatStore>,
    riddle: Arc<RiddleEngine>,
}

impl RoomState {
    fn new(
        room_id: String,
        map: Arc<MapIndex>,
        chat: Arc<ChatStore>,
        riddle: Arc<RiddleEngine>,
    ) -> Self {
        Self {
            room_id,
            connections: HashMap::new(),
            players: HashMap::new(),
            pos_index: HashMap::new(),
            tick: 0,
            map,
            chat,
            riddle,
        }
    }

    fn apply(&mut self, command: RoomCommand) {
        match command {
            RoomCommand::Register {
                conn,
                username,
                avatar,
            } => self.handle_register(conn, username, avatar),
            RoomCommand::Unregister { conn_id } => self.handle_unregister(&conn_id),
            RoomCommand::Broadcast { frame } => self.handle_broadcast(&frame),
            RoomCommand::SubRoomCast { room_number, frame } => {
                self.handle_sub_room_cast(&room_number, &frame)
            }
            RoomCommand::DirectCast { usernames, frame } => {
                self.handle_direct_cast(&usernames, &frame)
            }
            RoomCommand::Move {
                username,
                new_x,
                new_y,
            } => self.handle_move(&username, new_x, new_y),
        }
    }

    fn handle_register(&mut self, conn: ConnectionHandle, username: String, avatar: Avatar) {
        // A rejoin under the same username replaces the old session so the
        // username keeps exactly one position.
        let stale = self
            .connections
            .iter()
            .find(|(_, entry)| entry.username == username)
            .map(|(conn_id, _)| conn_id.clone());
        if let Some(conn_id) = stale {
            self.handle_unregister(&conn_id);
        }

        let (x, y) = self.find_spawn_position().unwrap_or_else(|| {
            tracing::warn!(
                room_id = %self.room_id,
                username = %username,
                "no free spawn position found, using fallback"
            );
            (FALLBACK_SPAWN_X, FALLBACK_SPAWN_Y)
        });
        let position = encode_pos(x, y);
        let current_sub_room = self.map.sub_room_at(x, y);

        self.players.insert(
            username.clone(),
            PlayerView {
                username: username.clone(),
                pos: position.clone(),
                avatar,
            },
        );
        self.pos_index.insert(position.clone(), username.clone());

        let joined = protocol::encode_message(
            protocol::MSG_ROOM_JOINED,
            &RoomJoinedPayload {
                room_id: self.room_id.clone(),
                player_id: username.clone(),
                game_state: self.game_state_view(),
            },
        );
        let riddle_frame = protocol::encode_message(
            protocol::MSG_TREASURE_HUNT_STATE,
            &self.riddle.snapshot(),
        );
        if conn.send(joined).is_err() || conn.send(riddle_frame).is_err() {
            conn.close();
            self.players.remove(&username);
            self.pos_index.remove(&position);
            return;
        }

        tracing::info!(
            room_id = %self.room_id,
            username = %username,
            position = %position,
            "player joined"
        );
        self.connections.insert(
            conn.id().to_string(),
            ConnectionEntry {
                conn,
                username,
                position,
                current_sub_room,
            },
        );
    }

    fn handle_unregister(&mut self, conn_id: &str) {
        let Some(entry) = self.connections.remove(conn_id) else {
            return;
        };
        self.pos_index.remove(&entry.position);
        self.players.remove(&entry.username);
        entry.conn.close();
        tracing::info!(room_id = %self.room_id, username = %entry.username, "player left");
    }

    /// Uniform random sampling over the grid, accepting the first position
    /// whose footprint fits and whose cell is unoccupied.
    fn find_spawn_position(&self) -> Option<(i32, i32)> {
        let mut rng = rand::thread_rng();
        for _ in 0..MAX_SPAWN_ATTEMPTS {
            let x = rng.gen_range(0..MAP_COLS as i32);
            let y = rng.gen_range(0..MAP_ROWS as i32);
            if !self.map.avatar_fits_at(x, y) {
                continue;
            }
            if self.pos_index.contains_key(&encode_pos(x, y)) {
                continue;
            }
            return Some((x, y));
        }
        None
    }

    /// Movement arbitration. Rejections are silent; the client reconciles
    /// against the next tick snapshot.
    fn handle_move(&mut self, username: &str, new_x: i32, new_y: i32) {
        let Some(conn_id) = self
            .connections
            .iter()
            .find(|(_, entry)| entry.username == username)
            .map(|(conn_id, _)| conn_id.clone())
        else {
            return;
        };
        if !self.map.avatar_fits_at(new_x, new_y) {
            return;
        }
        let new_pos = encode_pos(new_x, new_y);
        if self
            .pos_index
            .get(&new_pos)
            .is_some_and(|occupant| occupant != username)
        {
            return;
        }

        let current_sub_room = self.map.sub_room_at(new_x, new_y);
        let Some(entry) = self.connections.get_mut(&conn_id) else {
            return;
        };
        let old_pos = std::mem::replace(&mut entry.position, new_pos.clone());
        entry.current_sub_room = current_sub_room;

        self.pos_index.remove(&old_pos);
        self.pos_index.insert(new_pos.clone(), username.to_string());
        if let Some(player) = self.players.get_mut(username) {
            player.pos = new_pos;
        }
        // No broadcast here; the next tick carries the change.
    }

    /// Fan-out to every connection. A full or closed send queue marks the
    /// consumer dead: it is removed from the room and its queue is closed,
    /// which is the only liveness mechanism for stalled clients.
    fn handle_broadcast(&mut self, frame: &str) {
        let stale: Vec<String> = self
            .connections
            .iter()
            .filter(|(_, entry)| entry.conn.send(frame.to_string()).is_err())
            .map(|(conn_id, _)| conn_id.clone())
            .collect();
        for conn_id in stale {
            tracing::warn!(room_id = %self.room_id, conn_id = %conn_id, "dropping slow consumer");
            self.handle_unregister(&conn_id);
        }
    }

    fn handle_sub_room_cast(&mut self, room_number: &str, frame: &str) {
        let stale: Vec<String> = self
            .connections
            .iter()
            .filter(|(_, entry)| entry.current_sub_room == room_number)
            .filter(|(_, entry)| entry.conn.send(frame.to_string()).is_err())
            .map(|(conn_id, _)| conn_id.clone())
            .collect();
        for conn_id in stale {
            tracing::warn!(room_id = %self.room_id, conn_id = %conn_id, "dropping slow consumer");
            self.handle_unregister(&conn_id);
        }
    }

    fn handle_direct_cast(&mut self, usernames: &[String], frame: &str) {
        let stale: Vec<String> = self
            .connections
            .iter()
            .filter(|(_, entry)| usernames.contains(&entry.username))
            .filter(|(_, entry)| entry.conn.send(frame.to_string()).is_err())
            .map(|(conn_id, _)| conn_id.clone())
            .collect();
        for conn_id in stale {
            tracing::warn!(room_id = %self.room_id, conn_id = %conn_id, "dropping slow consumer");
            self.handle_unregister(&conn_id);
        }
    }

    /// One unified snapshot per tick, regardless of how much input arrived
    /// in between.
    fn tick(&mut self) {
        self.tick += 1;

        let announcements = self.riddle.pop_announcements();
        for announcement in &announcements {
            self.chat.append_announcement(announcement);
        }

        if self.connections.is_empty() {
            return;
        }

        for announcement in &announcements {
            let frame = protocol::encode_message(protocol::MSG_ANNOUNCEMENT, announcement);
            self.handle_broadcast(&frame);
        }

        let payload = KuluchifiedStatePayload {
            game_state: self.game_state_view(),
            chat_messages: self.chat.snapshot_global(),
            room_chat_messages: self.chat.snapshot_all_sub_rooms(),
            announcements,
            players: self.players.clone(),
            treasure_hunt_state: self.riddle.snapshot(),
        };
        let frame = protocol::encode_message(protocol::MSG_KULUCHIFIED_STATE, &payload);
        self.handle_broadcast(&frame);
    }

    fn game_state_view(&self) -> GameStateView {
        GameStateView {
            tick: self.tick,
            players: self.players.clone(),
            pos_to_username: self.pos_index.clone(),
        }
    }
}
