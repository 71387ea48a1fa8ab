//! WebSocket front end for `signal-core`: one socket per client, any number of
//! peer sessions multiplexed over it by session id.

pub mod config;
pub mod rtc;
pub mod server;
pub mod telemetry;
pub mod websocket;

pub use server::{build_router, run, serve, AppState};
