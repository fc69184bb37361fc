//! Play audio attachments from chat in the sender's voice channel.

use std::sync::Arc;

pub mod commands;
pub mod events;
pub mod utils;

use commands::playback::utils::playback_manager::PlaybackManager;

pub type Error = Box<dyn std::error::Error + Send + Sync>;
pub type Context<'a> = poise::Context<'a, Data, Error>;
pub type CommandResult = Result<(), Error>;

/// User data, which is stored and accessible in all command invocations
pub struct Data {
    pub playback: Arc<PlaybackManager>,
}
