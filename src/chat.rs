use crate::protocol::{AnnouncementPayload, ChatEntry, DirectChatPayload, SubRoomChatEntry};
use crate::shared::time::now_unix_secs;
use std::collections::HashMap;
use std::sync::Mutex;

/// Append-only chat histories: global, per-sub-room, per-pair direct, plus
/// the announcement log. Appends return full snapshots shaped for broadcast;
/// reads copy under the lock, so a reader observes every append that
/// completed before it.
#[derive(Debug, Default)]
pub struct ChatStore {
    inner: Mutex<ChatLogs>,
}

#[derive(Debug, Default)]
struct ChatLogs {
    global: Vec<ChatEntry>,
    sub_rooms: HashMap<String, Vec<SubRoomChatEntry>>,
    direct: HashMap<String, Vec<DirectChatPayload>>,
    announcements: Vec<AnnouncementPayload>,
}

impl ChatStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn append_global(&self, username: &str, message: &str) -> Vec<ChatEntry> {
        let mut logs = self.inner.lock().unwrap();
        logs.global.push(ChatEntry {
            username: username.to_string(),
            message: message.to_string(),
            timestamp: now_unix_secs(),
        });
        logs.global.clone()
    }

    pub fn append_sub_room(
        &self,
        room_number: &str,
        username: &str,
        message: &str,
    ) -> Vec<SubRoomChatEntry> {
        let mut logs = self.inner.lock().unwrap();
        let log = logs.sub_rooms.entry(room_number.to_string()).or_default();
        log.push(SubRoomChatEntry {
            room_number: room_number.to_string(),
            username: username.to_string(),
            message: message.to_string(),
            timestamp: now_unix_secs(),
        });
        log.clone()
    }

    /// Stores under the sorted username pair so either endpoint reaches the
    /// same log.
    pub fn append_direct(
        &self,
        from_username: &str,
        to_username: &str,
        message: &str,
    ) -> DirectChatPayload {
        let entry = DirectChatPayload {
            from_player_id: from_username.to_string(),
            to_player_id: to_username.to_string(),
            message: message.to_string(),
            timestamp: now_unix_secs(),
        };
        let key = direct_key(from_username, to_username);
        self.inner
            .lock()
            .unwrap()
            .direct
            .entry(key)
            .or_default()
            .push(entry.clone());
        entry
    }

    pub fn append_announcement(&self, announcement: &AnnouncementPayload) {
        self.inner
            .lock()
            .unwrap()
            .announcements
            .push(announcement.clone());
    }

    pub fn snapshot_global(&self) -> Vec<ChatEntry> {
        self.inner.lock().unwrap().global.clone()
    }

    pub fn snapshot_sub_room(&self, room_number: &str) -> Vec<SubRoomChatEntry> {
        self.inner
            .lock()
            .unwrap()
            .sub_rooms
            .get(room_number)
            .cloned()
            .unwrap_or_default()
    }

    pub fn snapshot_all_sub_rooms(&self) -> HashMap<String, Vec<SubRoomChatEntry>> {
        self.inner.lock().unwrap().sub_rooms.clone()
    }

    pub fn snapshot_direct(&self, a: &str, b: &str) -> Vec<DirectChatPayload> {
        self.inner
            .lock()
            .unwrap()
            .direct
            .get(&direct_key(a, b))
            .cloned()
            .unwrap_or_default()
    }

    pub fn snapshot_announcements(&self) -> Vec<AnnouncementPayload> {
        self.inner.lock().unwrap().announcements.clone()
    }
}

fn direct_key(a: &str, b: &str) -> String {
    if a <= b {
        format!("{a}:{b}")
    } else {
        format!("{b}:{a}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn global_appends_stay_ordered() {
        let store = ChatStore::new();
        store.append_global("alice", "first");
        let snapshot = store.append_global("bob", "second");
        assert_eq!(snapshot.len(), 2);
        assert_eq!(snapshot[0].message, "first");
        assert_eq!(snapshot[1].message, "second");
        // later snapshots preserve the same prefix order
        let later = store.snapshot_global();
        assert_eq!(later[0].message, "first");
        assert_eq!(later[1].message, "second");
    }

    #[test]
    fn sub_room_logs_are_isolated() {
        let store = ChatStore::new();
        store.append_sub_room("1", "x", "hi");
        assert_eq!(store.snapshot_sub_room("1").len(), 1);
        assert!(store.snapshot_sub_room("2").is_empty());
    }

    #[test]
    fn direct_key_is_symmetric() {
        let store = ChatStore::new();
        store.append_direct("bob", "alice", "hey");
        store.append_direct("alice", "bob", "hi back");
        let log = store.snapshot_direct("alice", "bob");
        assert_eq!(log.len(), 2);
        assert_eq!(log[0].from_player_id, "bob");
        assert_eq!(log[1].from_player_id, "alice");
        assert_eq!(store.snapshot_direct("bob", "alice").len(), 2);
    }

    #[test]
    fn announcements_accumulate() {
        let store = ChatStore::new();
        store.append_announcement(&AnnouncementPayload {
            message: "winner!".to_string(),
            timestamp: 1,
        });
        store.append_announcement(&AnnouncementPayload {
            message: "time's up".to_string(),
            timestamp: 2,
        });
        let log = store.snapshot_announcements();
        assert_eq!(log.len(), 2);
        assert_eq!(log[0].message, "winner!");
    }
}
