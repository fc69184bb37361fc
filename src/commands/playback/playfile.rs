use super::*;
use crate::commands::playback::utils::{
    attachment::AttachmentRef, embedded_messages::ReplyNotifier,
    playback_manager::PlaybackRequest, playfile_error::PlayfileError,
};
use poise::serenity_prelude as serenity;
use tracing::debug;

/// Play an attached audio file in your voice channel
#[poise::command(prefix_command, slash_command, guild_only, category = "Playback")]
pub async fn playfile(
    ctx: Context<'_>,
    #[description = "Audio file to play"] file: Option<serenity::Attachment>,
) -> CommandResult {
    let guild_id = ctx.guild_id().ok_or(PlayfileError::NotInGuild)?;

    let attachments = invoking_attachments(ctx, file);
    let voice_channel = requester_voice_channel(ctx, guild_id);
    debug!(
        "playfile in guild {}: requester channel {:?}, attachments {:?}",
        guild_id, voice_channel, attachments
    );

    // Downloading and connecting can take longer than an interaction allows
    ctx.defer().await?;

    let request = PlaybackRequest {
        requester: ctx.author().id,
        guild_id,
        voice_channel,
        attachments,
    };

    let playback = ctx.data().playback.clone();
    playback.playfile(request, &ReplyNotifier::new(ctx)).await;

    Ok(())
}

/// Attachments of the invocation: the slash-command option, then the message's own files
fn invoking_attachments(ctx: Context<'_>, file: Option<serenity::Attachment>) -> Vec<AttachmentRef> {
    let mut attachments: Vec<AttachmentRef> = file.iter().map(AttachmentRef::from).collect();

    if let poise::Context::Prefix(prefix) = ctx {
        for attachment in &prefix.msg.attachments {
            if !attachments.iter().any(|known| known.url == attachment.url) {
                attachments.push(AttachmentRef::from(attachment));
            }
        }
    }

    attachments
}

/// Voice channel the invoking user is connected to, from the cache
fn requester_voice_channel(
    ctx: Context<'_>,
    guild_id: serenity::GuildId,
) -> Option<serenity::ChannelId> {
    let guild = ctx.serenity_context().cache.guild(guild_id)?;
    guild
        .voice_states
        .get(&ctx.author().id)
        .and_then(|state| state.channel_id)
}
