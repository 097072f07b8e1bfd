use super::*;
use crate::game::riddle::RiddleConfig;
use serde_json::Value;

fn floor_map() -> Arc<MapIndex> {
    // Single wall cell at the origin; everything else is open floor.
    Arc::new(MapIndex::from_grid("o").expect("map"))
}

fn labeled_map() -> Arc<MapIndex> {
    // A 3x3 patch of sub-room "1" in the top-left corner, floor elsewhere.
    Arc::new(MapIndex::from_grid("111\n111\n111").expect("map"))
}

fn make_state(map: Arc<MapIndex>) -> RoomState {
    RoomState::new(
        "0".to_string(),
        map,
        Arc::new(ChatStore::new()),
        Arc::new(RiddleEngine::new(RiddleConfig::default())),
    )
}

fn seed_player(
    state: &mut RoomState,
    username: &str,
    x: i32,
    y: i32,
    capacity: usize,
    sub_room: &str,
) -> mpsc::Receiver<String> {
    let (conn, outbound) = ConnectionHandle::channel(format!("conn-{username}"), capacity);
    let position = encode_pos(x, y);
    state.players.insert(
        username.to_string(),
        PlayerView {
            username: username.to_string(),
            pos: position.clone(),
            avatar: [0, 1, 2],
        },
    );
    state.pos_index.insert(position.clone(), username.to_string());
    state.connections.insert(
        conn.id().to_string(),
        ConnectionEntry {
            conn,
            username: username.to_string(),
            position,
            current_sub_room: sub_room.to_string(),
        },
    );
    outbound
}

fn drain(outbound: &mut mpsc::Receiver<String>) -> Vec<Value> {
    let mut frames = Vec::new();
    while let Ok(frame) = outbound.try_recv() {
        frames.push(serde_json::from_str(&frame).expect("frame json"));
    }
    frames
}

fn decode_pos(pos: &str) -> (i32, i32) {
    let (y, x) = pos.split_once(':').expect("y:x");
    (x.parse().expect("x"), y.parse().expect("y"))
}

fn assert_indexes_agree(state: &RoomState) {
    assert_eq!(state.players.len(), state.pos_index.len());
    for (username, player) in &state.players {
        assert_eq!(state.pos_index.get(&player.pos), Some(username));
    }
}

#[tokio::test]
async fn register_spawns_at_fitting_unoccupied_position() {
    let mut state = make_state(floor_map());
    let (conn, mut outbound) = ConnectionHandle::channel("conn-a".to_string(), 8);
    state.handle_register(conn, "alice".to_string(), [3, 2, 1]);

    let player = state.players.get("alice").expect("player");
    let (x, y) = decode_pos(&player.pos);
    assert!(state.map.avatar_fits_at(x, y));
    assert_eq!(player.avatar, [3, 2, 1]);
    assert_indexes_agree(&state);

    let frames = drain(&mut outbound);
    assert_eq!(frames.len(), 2);
    assert_eq!(frames[0]["type"], "room_joined");
    assert_eq!(frames[0]["payload"]["player_id"], "alice");
    assert_eq!(
        frames[0]["payload"]["game_state"]["players"]["alice"]["pos"],
        Value::String(player.pos.clone())
    );
    assert_eq!(frames[1]["type"], "treasure_hunt_state");
}

#[tokio::test]
async fn register_avoids_occupied_positions() {
    let mut state = make_state(floor_map());
    let mut outbounds = Vec::new();
    for index in 0..8 {
        let (conn, outbound) = ConnectionHandle::channel(format!("conn-{index}"), 8);
        state.handle_register(conn, format!("player-{index}"), [0, 0, 0]);
        outbounds.push(outbound);
    }
    assert_eq!(state.players.len(), 8);
    assert_indexes_agree(&state);
}

#[tokio::test]
async fn rejoin_replaces_previous_session() {
    let mut state = make_state(floor_map());
    let _old = seed_player(&mut state, "alice", 10, 10, 8, "");
    let (conn, _outbound) = ConnectionHandle::channel("conn-new".to_string(), 8);
    state.handle_register(conn, "alice".to_string(), [0, 0, 0]);

    assert_eq!(state.connections.len(), 1);
    assert!(state.connections.contains_key("conn-new"));
    assert_indexes_agree(&state);
}

#[tokio::test]
async fn move_into_occupied_cell_is_rejected() {
    let mut state = make_state(floor_map());
    let _a = seed_player(&mut state, "a", 5, 5, 8, "");
    let _b = seed_player(&mut state, "b", 6, 5, 8, "");

    state.handle_move("a", 6, 5);

    assert_eq!(state.pos_index.get("5:6"), Some(&"b".to_string()));
    assert_eq!(state.players.get("a").expect("a").pos, "5:5");
    assert_indexes_agree(&state);
}

#[tokio::test]
async fn move_into_wall_is_rejected() {
    let mut state = make_state(floor_map());
    let _a = seed_player(&mut state, "a", 5, 5, 8, "");

    // Footprint would touch the wall cell at the origin.
    state.handle_move("a", 1, 1);

    assert_eq!(state.players.get("a").expect("a").pos, "5:5");
    assert_indexes_agree(&state);
}

#[tokio::test]
async fn accepted_move_updates_every_index() {
    let mut state = make_state(floor_map());
    let _a = seed_player(&mut state, "a", 5, 5, 8, "");

    state.handle_move("a", 7, 9);

    assert_eq!(state.players.get("a").expect("a").pos, "9:7");
    assert!(!state.pos_index.contains_key("5:5"));
    assert_eq!(state.pos_index.get("9:7"), Some(&"a".to_string()));
    let entry = state.connections.values().next().expect("entry");
    assert_eq!(entry.position, "9:7");
    assert_indexes_agree(&state);
}

#[tokio::test]
async fn moving_in_place_is_allowed() {
    let mut state = make_state(floor_map());
    let _a = seed_player(&mut state, "a", 5, 5, 8, "");

    state.handle_move("a", 5, 5);

    assert_eq!(state.players.get("a").expect("a").pos, "5:5");
    assert_indexes_agree(&state);
}

#[tokio::test]
async fn move_tracks_sub_room_label() {
    let mut state = make_state(labeled_map());
    let _a = seed_player(&mut state, "a", 6, 6, 8, "");

    state.handle_move("a", 1, 1);
    assert_eq!(
        state.connections.values().next().expect("entry").current_sub_room,
        "1"
    );

    state.handle_move("a", 6, 6);
    assert_eq!(
        state.connections.values().next().expect("entry").current_sub_room,
        ""
    );
}

#[tokio::test]
async fn move_for_unknown_username_is_ignored() {
    let mut state = make_state(floor_map());
    state.handle_move("ghost", 5, 5);
    assert!(state.players.is_empty());
}

#[tokio::test]
async fn unregister_clears_all_indexes_and_is_idempotent() {
    let mut state = make_state(floor_map());
    let _a = seed_player(&mut state, "a", 5, 5, 8, "");

    state.handle_unregister("conn-a");
    assert!(state.connections.is_empty());
    assert!(state.players.is_empty());
    assert!(state.pos_index.is_empty());

    state.handle_unregister("conn-a");
    assert!(state.connections.is_empty());
}

#[tokio::test]
async fn slow_consumer_is_dropped_without_affecting_others() {
    let mut state = make_state(floor_map());
    let mut slow = seed_player(&mut state, "slow", 5, 5, 2, "");
    let mut healthy = seed_player(&mut state, "healthy", 9, 9, 16, "");

    for index in 0..10 {
        state.handle_broadcast(&format!("frame-{index}"));
    }

    assert!(!state.players.contains_key("slow"));
    assert!(!state.pos_index.contains_key("5:5"));
    assert!(state.players.contains_key("healthy"));
    assert_indexes_agree(&state);

    // The healthy consumer saw every frame, in enqueue order.
    let mut received = Vec::new();
    while let Ok(frame) = healthy.try_recv() {
        received.push(frame);
    }
    let expected: Vec<String> = (0..10).map(|index| format!("frame-{index}")).collect();
    assert_eq!(received, expected);

    // The slow one got only what fit before its queue overflowed.
    let mut stalled = Vec::new();
    while let Ok(frame) = slow.try_recv() {
        stalled.push(frame);
    }
    assert_eq!(stalled, vec!["frame-0".to_string(), "frame-1".to_string()]);
}

#[tokio::test]
async fn sub_room_cast_reaches_only_matching_connections() {
    let mut state = make_state(floor_map());
    let mut in_one = seed_player(&mut state, "x", 5, 5, 8, "1");
    let mut in_two = seed_player(&mut state, "y", 9, 9, 8, "2");
    let mut hallway = seed_player(&mut state, "z", 13, 13, 8, "");

    state.handle_sub_room_cast("1", "sub-room-frame");

    assert_eq!(in_one.try_recv().ok(), Some("sub-room-frame".to_string()));
    assert!(in_two.try_recv().is_err());
    assert!(hallway.try_recv().is_err());
}

#[tokio::test]
async fn direct_cast_reaches_both_endpoints_once() {
    let mut state = make_state(floor_map());
    let mut from = seed_player(&mut state, "a", 5, 5, 8, "");
    let mut to = seed_player(&mut state, "b", 9, 9, 8, "");
    let mut bystander = seed_player(&mut state, "c", 13, 13, 8, "");

    state.handle_direct_cast(&["a".to_string(), "b".to_string()], "dm-frame");

    assert_eq!(from.try_recv().ok(), Some("dm-frame".to_string()));
    assert_eq!(to.try_recv().ok(), Some("dm-frame".to_string()));
    assert!(from.try_recv().is_err());
    assert!(bystander.try_recv().is_err());
}

#[tokio::test]
async fn tick_snapshot_carries_world_chat_and_riddle_state() {
    let mut state = make_state(floor_map());
    let mut outbound = seed_player(&mut state, "alice", 5, 5, 8, "");

    state.chat.append_global("alice", "hello");
    state.chat.append_sub_room("1", "alice", "room hi");
    assert!(state.riddle.guess("alice", "keyboard"));

    state.tick();

    let frames = drain(&mut outbound);
    assert_eq!(frames.len(), 2);

    assert_eq!(frames[0]["type"], "announcement");
    assert!(frames[0]["payload"]["message"]
        .as_str()
        .expect("message")
        .contains("WINNER: alice"));

    let payload = &frames[1]["payload"];
    assert_eq!(frames[1]["type"], "kuluchified_state");
    assert_eq!(payload["game_state"]["tick"], 1);
    assert_eq!(payload["game_state"]["pos_to_username"]["5:5"], "alice");
    assert_eq!(payload["game_state"]["players"]["alice"]["pos"], "5:5");
    assert_eq!(payload["players"]["alice"]["pos"], "5:5");
    assert_eq!(payload["chat_messages"][0]["message"], "hello");
    assert_eq!(
        payload["room_chat_messages"]["1"][0]["message"],
        "room hi"
    );
    assert!(payload["announcements"][0]["message"]
        .as_str()
        .expect("announcement")
        .contains("WINNER"));
    assert_eq!(payload["treasure_hunt_state"]["completed"], true);

    // The drained announcement also landed in the read-only history.
    assert_eq!(state.chat.snapshot_announcements().len(), 1);

    // A second tick carries no stale announcements.
    let frames = drain(&mut outbound);
    assert!(frames.is_empty());
    state.tick();
    let frames = drain(&mut outbound);
    assert_eq!(frames.len(), 1);
    assert_eq!(frames[0]["payload"]["game_state"]["tick"], 2);
    assert_eq!(frames[0]["payload"]["announcements"], Value::Array(vec![]));
}

#[tokio::test]
async fn tick_advances_without_connections() {
    let mut state = make_state(floor_map());
    state.tick();
    state.tick();
    assert_eq!(state.tick, 2);
}
