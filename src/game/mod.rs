pub mod constants;
pub mod map;
pub mod riddle;
pub mod room;
pub mod types;
