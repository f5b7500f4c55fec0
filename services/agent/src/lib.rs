pub mod config;
pub mod deepgram_adapter;
pub mod room_adapter;
