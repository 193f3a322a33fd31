pub mod config;
pub mod error;
pub mod ffmpeg;
pub mod logger;
pub mod monitor;
pub mod ring_buffer;
pub mod routes;
pub mod state;
pub mod store;
pub mod supervisor;
