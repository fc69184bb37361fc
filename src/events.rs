use poise::serenity_prelude as serenity;
use tracing::info;

use crate::{Data, Error};

/// Gateway events the framework forwards to us
pub async fn event_handler(
    ctx: &serenity::Context,
    event: &serenity::FullEvent,
    _framework: poise::FrameworkContext<'_, Data, Error>,
    data: &Data,
) -> Result<(), Error> {
    if let serenity::FullEvent::VoiceStateUpdate { new, .. } = event {
        voice_state_update(ctx, new, data).await;
    }
    Ok(())
}

/// Tear down playback when the bot is removed from its voice channel by someone else
async fn voice_state_update(ctx: &serenity::Context, new: &serenity::VoiceState, data: &Data) {
    let bot_id = ctx.cache.current_user().id;
    if new.user_id != bot_id || new.channel_id.is_some() {
        return;
    }

    if let Some(guild_id) = new.guild_id {
        if data.playback.interrupt(guild_id).await {
            info!(
                "Disconnected from voice in guild {}, stopped file playback",
                guild_id
            );
        }
    }
}
