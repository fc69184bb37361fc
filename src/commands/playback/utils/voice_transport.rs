use async_trait::async_trait;
use poise::serenity_prelude::{ChannelId, GuildId};
use songbird::Songbird;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

use super::playfile_error::{PlayfileError, PlayfileResult};

/// Voice connection management for a guild
#[async_trait]
pub trait VoiceTransport: Send + Sync {
    /// Channel the bot is connected to in `guild_id`, if any
    async fn current_channel(&self, guild_id: GuildId) -> Option<ChannelId>;

    async fn connect(
        &self,
        guild_id: GuildId,
        channel_id: ChannelId,
        timeout: Duration,
    ) -> PlayfileResult<()>;

    /// Move an existing connection to another channel
    async fn move_to(
        &self,
        guild_id: GuildId,
        channel_id: ChannelId,
        timeout: Duration,
    ) -> PlayfileResult<()>;

    /// Leave the voice channel. Not being connected is not an error.
    async fn disconnect(&self, guild_id: GuildId) -> PlayfileResult<()>;
}

/// [`VoiceTransport`] backed by the songbird voice manager
pub struct SongbirdTransport {
    manager: Arc<Songbird>,
}

impl SongbirdTransport {
    pub fn new(manager: Arc<Songbird>) -> Self {
        Self { manager }
    }

    async fn join(
        &self,
        guild_id: GuildId,
        channel_id: ChannelId,
        timeout: Duration,
    ) -> PlayfileResult<()> {
        match tokio::time::timeout(timeout, self.manager.join(guild_id, channel_id)).await {
            Ok(Ok(_call)) => {
                info!("Joined voice channel {} in guild {}", channel_id, guild_id);
                Ok(())
            }
            Ok(Err(err)) => Err(PlayfileError::Transport(err.to_string())),
            Err(_elapsed) => Err(PlayfileError::ConnectTimeout(timeout)),
        }
    }
}

#[async_trait]
impl VoiceTransport for SongbirdTransport {
    async fn current_channel(&self, guild_id: GuildId) -> Option<ChannelId> {
        let call = self.manager.get(guild_id)?;
        let channel = call.lock().await.current_channel()?;
        Some(ChannelId::new(channel.0.get()))
    }

    async fn connect(
        &self,
        guild_id: GuildId,
        channel_id: ChannelId,
        timeout: Duration,
    ) -> PlayfileResult<()> {
        self.join(guild_id, channel_id, timeout).await
    }

    async fn move_to(
        &self,
        guild_id: GuildId,
        channel_id: ChannelId,
        timeout: Duration,
    ) -> PlayfileResult<()> {
        debug!("Moving guild {} voice connection to {}", guild_id, channel_id);
        // songbird moves an existing call when asked to join a different channel
        self.join(guild_id, channel_id, timeout).await
    }

    async fn disconnect(&self, guild_id: GuildId) -> PlayfileResult<()> {
        if self.manager.get(guild_id).is_none() {
            debug!("Guild {} has no voice connection to leave", guild_id);
            return Ok(());
        }

        self.manager
            .remove(guild_id)
            .await
            .map_err(|e| PlayfileError::Transport(e.to_string()))?;

        info!("Left voice channel in guild {}", guild_id);
        Ok(())
    }
}
