pub mod cli;
pub mod commands;
pub mod config;
pub mod cues;
pub mod error;
pub mod job;
pub mod media;
pub mod model;
pub mod narration;
pub mod orchestrator;
pub mod payload;
pub mod pipeline;
pub mod preflight;
pub mod prompts;
pub mod render;
pub mod sanitize;
pub mod speech;

#[cfg(test)]
pub mod fakes;

pub use cli::ReelCommands;
pub use commands::handle_reel_command;
