use std::time::Duration;

pub const MAP_ROWS: usize = 250;
pub const MAP_COLS: usize = 400;

pub const TICK_MS: u64 = 50;

pub const DEFAULT_ROOM_ID: &str = "0";

pub const SEND_QUEUE_CAPACITY: usize = 256;
pub const ROOM_COMMAND_CAPACITY: usize = 256;

pub const MAX_SPAWN_ATTEMPTS: usize = 1000;
pub const FALLBACK_SPAWN_X: i32 = 120;
pub const FALLBACK_SPAWN_Y: i32 = 52;

pub const MAX_INBOUND_FRAME_BYTES: usize = 512;
pub const WRITE_WAIT: Duration = Duration::from_secs(10);
pub const PONG_WAIT: Duration = Duration::from_secs(60);
// Ping well inside the read deadline so an idle but healthy peer stays alive.
pub const PING_PERIOD: Duration = Duration::from_secs(54);
