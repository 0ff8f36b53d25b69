//! Shared types and the voting core for the democratic DJ daemon.

pub mod config;
pub mod dispatcher;
pub mod driver;
pub mod platform;
pub mod playback;
pub mod protocol;
pub mod selector;
pub mod session;
pub mod state;
pub mod tally;
