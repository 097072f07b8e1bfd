//! Process-wide state and the inbound message dispatcher. One `App` is
//! shared by every connection; per-connection session state lives with the
//! reader task that owns it.

use crate::chat::ChatStore;
use crate::game::constants::DEFAULT_ROOM_ID;
use crate::game::map::MapIndex;
use crate::game::riddle::RiddleEngine;
use crate::game::room::Room;
use crate::protocol::{
    self, ClientMessage, DecodeError, DirectChatSendPayload, ErrorPayload,
    GlobalChatMessagesPayload, GlobalChatSendPayload, JoinRoomPayload, OnboardPayload,
    PlayerMovePayload, RoomChatMessagesPayload, RoomChatSendPayload, TreasureHuntGuessPayload,
};
use crate::shared::names::sanitize_username;
use crate::transport::ws_session::ConnectionHandle;
use crate::users::{Profile, UserRegistry};
use dashmap::DashMap;
use std::sync::Arc;

pub struct App {
    pub users: Arc<UserRegistry>,
    pub chat: Arc<ChatStore>,
    pub riddle: Arc<RiddleEngine>,
    pub map: Arc<MapIndex>,
    rooms: DashMap<String, Arc<Room>>,
}

/// What the reader task knows about its connection: the send handle, the
/// bound profile once onboarding completes, the username cached between
/// `join_room` and `onboard`, and the current room if any.
pub struct ConnSession {
    pub handle: ConnectionHandle,
    pub profile: Option<Arc<Profile>>,
    pub pending_username: Option<String>,
    pub room: Option<Arc<Room>>,
}

impl ConnSession {
    pub fn new(handle: ConnectionHandle) -> Self {
        Self {
            handle,
            profile: None,
            pending_username: None,
            room: None,
        }
    }

    fn send_error(&self, message: &str) {
        let frame = protocol::encode_message(
            protocol::MSG_ERROR,
            &ErrorPayload {
                message: message.to_string(),
            },
        );
        let _ = self.handle.send(frame);
    }
}

impl App {
    pub fn new(
        users: Arc<UserRegistry>,
        chat: Arc<ChatStore>,
        riddle: Arc<RiddleEngine>,
        map: Arc<MapIndex>,
    ) -> Self {
        Self {
            users,
            chat,
            riddle,
            map,
            rooms: DashMap::new(),
        }
    }

    /// Lazily creates the room task on first join.
    pub fn room(&self, room_id: &str) -> Arc<Room> {
        let trimmed = room_id.trim();
        let name = if trimmed.is_empty() {
            DEFAULT_ROOM_ID
        } else {
            trimmed
        };
        match self.rooms.entry(name.to_string()) {
            dashmap::mapref::entry::Entry::Occupied(entry) => entry.get().clone(),
            dashmap::mapref::entry::Entry::Vacant(entry) => {
                let room = Room::spawn(
                    name.to_string(),
                    Arc::clone(&self.map),
                    Arc::clone(&self.chat),
                    Arc::clone(&self.riddle),
                );
                entry.insert(room.clone());
                tracing::info!(room_id = name, "created room");
                room
            }
        }
    }

    /// Fast-path fan-out used by the riddle state-change callback.
    pub fn broadcast_all_rooms(&self, frame: &str) {
        for room in self.rooms.iter() {
            room.value().try_broadcast(frame.to_string());
        }
    }

    pub async fn dispatch(&self, session: &mut ConnSession, text: &str) {
        let message = match protocol::decode_client_message(text) {
            Ok(message) => message,
            Err(DecodeError::UnknownType(kind)) => {
                tracing::debug!(conn_id = %session.handle.id(), kind, "discarding unknown message type");
                return;
            }
            Err(error) => {
                tracing::debug!(conn_id = %session.handle.id(), %error, "discarding malformed frame");
                return;
            }
        };
        match message {
            ClientMessage::JoinRoom(payload) => self.handle_join_room(session, payload).await,
            ClientMessage::Onboard(payload) => self.handle_onboard(session, payload).await,
            ClientMessage::LeaveRoom => self.handle_leave_room(session).await,
            ClientMessage::PlayerMove(payload) => self.handle_player_move(session, payload).await,
            ClientMessage::GlobalChat(payload) => self.handle_global_chat(session, payload).await,
            ClientMessage::RoomChat(payload) => self.handle_room_chat(session, payload).await,
            ClientMessage::DirectChat(payload) => self.handle_direct_chat(session, payload).await,
            ClientMessage::TreasureHuntGuess(payload) => self.handle_guess(session, payload),
            ClientMessage::GlobalChatHistory => self.handle_global_chat_history(session),
        }
    }

    async fn handle_join_room(&self, session: &mut ConnSession, payload: JoinRoomPayload) {
        let Some(username) = sanitize_username(&payload.username) else {
            session.send_error("A username is required to join");
            return;
        };
        if self.users.exists(&username) {
            // Returning user: their stored avatar wins over anything the
            // client sent this time.
            let (profile, _) = self.users.get_or_create(&username, [0, 0, 0]);
            self.enter_room(session, profile, &payload.room_id).await;
            return;
        }
        session.pending_username = Some(username);
        let _ = session
            .handle
            .send(protocol::encode_bare(protocol::MSG_ONBOARD_REQUEST));
    }

    async fn handle_onboard(&self, session: &mut ConnSession, payload: OnboardPayload) {
        let Some(username) = session.pending_username.take() else {
            session.send_error("Invalid onboarding flow - username not set");
            return;
        };
        let (profile, preexisting) = self.users.get_or_create(&username, payload.avatar);
        if !preexisting {
            tracing::info!(username = %profile.username, name = %payload.name, "new user onboarded");
        }
        self.enter_room(session, profile, DEFAULT_ROOM_ID).await;
    }

    async fn enter_room(&self, session: &mut ConnSession, profile: Arc<Profile>, room_id: &str) {
        if let Some(current) = session.room.take() {
            current.unregister(session.handle.id()).await;
        }
        let room = self.room(room_id);
        tracing::debug!(room_id = %room.id(), username = %profile.username, "registering into room");
        room.register(
            session.handle.clone(),
            profile.username.clone(),
            profile.avatar,
        )
        .await;
        session.profile = Some(profile);
        session.room = Some(room);
    }

    async fn handle_leave_room(&self, session: &mut ConnSession) {
        // Idempotent: leaving with no current room is a no-op.
        if let Some(room) = session.room.take() {
            room.unregister(session.handle.id()).await;
        }
    }

    async fn handle_player_move(&self, session: &ConnSession, payload: PlayerMovePayload) {
        let (Some(room), Some(profile)) = (session.room.as_ref(), session.profile.as_ref()) else {
            return;
        };
        room.move_player(profile.username.clone(), payload.new_x, payload.new_y)
            .await;
    }

    async fn handle_global_chat(&self, session: &ConnSession, payload: GlobalChatSendPayload) {
        let (Some(room), Some(profile)) = (session.room.as_ref(), session.profile.as_ref()) else {
            return;
        };
        let messages = self.chat.append_global(&profile.username, &payload.message);
        let frame = protocol::encode_message(
            protocol::MSG_GLOBAL_CHAT_MESSAGES,
            &GlobalChatMessagesPayload { messages },
        );
        room.broadcast(frame).await;
    }

    async fn handle_room_chat(&self, session: &ConnSession, payload: RoomChatSendPayload) {
        let (Some(room), Some(profile)) = (session.room.as_ref(), session.profile.as_ref()) else {
            return;
        };
        let messages =
            self.chat
                .append_sub_room(&payload.room_number, &profile.username, &payload.message);
        let frame = protocol::encode_message(
            protocol::MSG_ROOM_CHAT_MESSAGES,
            &RoomChatMessagesPayload {
                room_number: payload.room_number.clone(),
                messages,
            },
        );
        room.sub_room_cast(payload.room_number, frame).await;
    }

    async fn handle_direct_chat(&self, session: &ConnSession, payload: DirectChatSendPayload) {
        let (Some(room), Some(profile)) = (session.room.as_ref(), session.profile.as_ref()) else {
            return;
        };
        let entry = self
            .chat
            .append_direct(&profile.username, &payload.to_player_id, &payload.message);
        let frame = protocol::encode_message(protocol::MSG_CHAT_MESSAGE, &entry);
        room.direct_cast(
            vec![profile.username.clone(), payload.to_player_id],
            frame,
        )
        .await;
    }

    fn handle_guess(&self, session: &ConnSession, payload: TreasureHuntGuessPayload) {
        let Some(profile) = session.profile.as_ref() else {
            return;
        };
        // The guesser gets the fresh snapshot back whether or not they won;
        // a win additionally fans out through the state-change callback.
        self.riddle.guess(&profile.username, &payload.guess);
        let frame = protocol::encode_message(
            protocol::MSG_TREASURE_HUNT_STATE,
            &self.riddle.snapshot(),
        );
        let _ = session.handle.send(frame);
    }

    fn handle_global_chat_history(&self, session: &ConnSession) {
        let frame = protocol::encode_message(
            protocol::MSG_GLOBAL_CHAT_MESSAGES,
            &GlobalChatMessagesPayload {
                messages: self.chat.snapshot_global(),
            },
        );
        let _ = session.handle.send(frame);
    }
}
