//! This module aggregates all the command modules for the bot.

/// Playing chat attachments in voice channels.
pub mod playback;
