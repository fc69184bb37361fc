use super::*;
use crate::commands::playback::utils::{
    embedded_messages::ReplyNotifier, playfile_error::PlayfileError,
};

/// Stop the playing file and leave the voice channel
#[poise::command(
    prefix_command,
    slash_command,
    guild_only,
    aliases("stop"),
    category = "Playback"
)]
pub async fn stopplayfile(ctx: Context<'_>) -> CommandResult {
    let guild_id = ctx.guild_id().ok_or(PlayfileError::NotInGuild)?;

    let playback = ctx.data().playback.clone();
    playback
        .stopplayfile(guild_id, &ReplyNotifier::new(ctx))
        .await;

    Ok(())
}
