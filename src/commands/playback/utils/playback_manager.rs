//! Lifecycle of a playfile request: validate, claim the guild, stage the
//! attachment, connect, play, and tear everything down again.

use dashmap::DashMap;
use poise::serenity_prelude::{ChannelId, GuildId, UserId};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};

use crate::utils::config::{DisconnectPolicy, PlayfileConfig};

use super::attachment::{AttachmentRef, AttachmentStore, select_attachment};
use super::embedded_messages::{Notice, Notifier};
use super::playback_guard::{GuildPlaybackState, PlaybackGuard, StopAck};
use super::playfile_error::{PlayfileError, PlayfileResult};
use super::sinks::{AudioSink, PlaybackOutcome};
use super::staging::{PendingRemovals, StagedAudio};
use super::voice_transport::VoiceTransport;

/// One invocation of `playfile`
#[derive(Clone, Debug, PartialEq)]
pub struct PlaybackRequest {
    pub requester: UserId,
    pub guild_id: GuildId,
    /// Voice channel the requester is sitting in, if any
    pub voice_channel: Option<ChannelId>,
    pub attachments: Vec<AttachmentRef>,
}

/// How far a request got before it ended
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
enum Progress {
    Idle,
    Connecting,
    Playing,
}

enum Ending {
    Completed(PlayfileResult<()>),
    Stopped(Option<StopAck>),
}

/// Owns the collaborators and the per-guild playback state
pub struct PlaybackManager {
    config: PlayfileConfig,
    store: Arc<dyn AttachmentStore>,
    transport: Arc<dyn VoiceTransport>,
    sink: PlayfileResult<Arc<dyn AudioSink>>,
    state: Arc<GuildPlaybackState>,
    /// Serialises joining and leaving a guild's voice channel
    voice_locks: DashMap<GuildId, Arc<Mutex<()>>>,
    pending_removals: PendingRemovals,
}

impl PlaybackManager {
    /// `sink` is the outcome of sink selection at start-up; an error there is
    /// reported to every later request instead of attempting playback.
    pub fn new(
        config: PlayfileConfig,
        store: Arc<dyn AttachmentStore>,
        transport: Arc<dyn VoiceTransport>,
        sink: PlayfileResult<Arc<dyn AudioSink>>,
    ) -> Self {
        match &sink {
            Ok(sink) => info!("Playing files through the {} sink", sink.name()),
            Err(err) => error!("No audio sink available: {}", err),
        }

        Self {
            config,
            store,
            transport,
            sink,
            state: GuildPlaybackState::new(),
            voice_locks: DashMap::new(),
            pending_removals: PendingRemovals::default(),
        }
    }

    /// Whether a playfile request currently holds `guild_id`
    pub fn is_playing(&self, guild_id: GuildId) -> bool {
        self.state.is_active(guild_id)
    }

    /// Handle a `playfile` command. Every failure ends up as a message to the user.
    pub async fn playfile(&self, request: PlaybackRequest, notifier: &dyn Notifier) {
        let guild_id = request.guild_id;
        info!(
            "Playfile requested by {} in guild {} ({} attachments)",
            request.requester,
            guild_id,
            request.attachments.len()
        );

        if let Err(err) = self.try_playfile(request, notifier).await {
            if err.is_user_error() {
                warn!("Playfile rejected in guild {}: {}", guild_id, err);
            } else {
                error!("Playfile failed in guild {}: {}", guild_id, err);
            }
            self.send(notifier, Notice::Failed(err)).await;
        }
    }

    async fn try_playfile(
        &self,
        request: PlaybackRequest,
        notifier: &dyn Notifier,
    ) -> PlayfileResult<()> {
        let attachment = select_attachment(
            &request.attachments,
            &self.config.allowed_extensions,
            self.config.max_attachment_bytes,
        )?;
        let sink = self.sink.clone()?;
        let channel_id = request
            .voice_channel
            .ok_or(PlayfileError::UserNotInVoiceChannel)?;

        let (guard, mut stop_rx) = self.state.try_acquire(request.guild_id)?;

        let mut staged: Option<StagedAudio> = None;
        let mut progress = Progress::Idle;

        let ending = tokio::select! {
            result = self.run(
                request.guild_id,
                channel_id,
                attachment,
                sink.as_ref(),
                &mut staged,
                &mut progress,
                notifier,
            ) => Ending::Completed(result),
            stop = &mut stop_rx => Ending::Stopped(stop.ok()),
        };

        let (result, ack, stopped) = match ending {
            // A stop may have been signalled just as the track ended on its own.
            // Closing first makes any later stop fail to send instead of being ignored.
            Ending::Completed(result) => {
                stop_rx.close();
                match stop_rx.try_recv() {
                    Ok(ack) => (result, Some(ack), true),
                    Err(_) => (result, None, false),
                }
            }
            Ending::Stopped(ack) => (Ok(()), ack, true),
        };

        if stopped {
            info!("Playback in guild {} interrupted by stop", request.guild_id);
            self.stop_sink(request.guild_id).await;
        }

        self.teardown(guard, staged, progress, stopped).await;

        if let Some(ack) = ack {
            let _ = ack.send(());
        }

        result
    }

    #[allow(clippy::too_many_arguments)]
    async fn run(
        &self,
        guild_id: GuildId,
        channel_id: ChannelId,
        attachment: &AttachmentRef,
        sink: &dyn AudioSink,
        staged: &mut Option<StagedAudio>,
        progress: &mut Progress,
        notifier: &dyn Notifier,
    ) -> PlayfileResult<()> {
        let bytes = self.store.fetch(attachment).await?;
        debug!(
            "Downloaded {} ({} bytes) for guild {}",
            attachment.filename,
            bytes.len(),
            guild_id
        );

        let staged = staged.insert(
            StagedAudio::stage(
                self.config.staging,
                &self.config.temp_dir,
                &attachment.filename,
                &attachment.extension(),
                bytes,
            )
            .await?,
        );

        *progress = Progress::Connecting;
        let voice_lock = self.voice_lock(guild_id);
        let voice = voice_lock.lock().await;
        match self.transport.current_channel(guild_id).await {
            None => {
                self.transport
                    .connect(guild_id, channel_id, self.config.connect_timeout)
                    .await?
            }
            Some(current) if current != channel_id => {
                self.transport
                    .move_to(guild_id, channel_id, self.config.connect_timeout)
                    .await?
            }
            Some(_) => debug!("Already in channel {} for guild {}", channel_id, guild_id),
        }
        drop(voice);

        *progress = Progress::Playing;
        let handle = sink
            .play(guild_id, staged)
            .await
            .map_err(|err| match err {
                PlayfileError::Playback(_)
                | PlayfileError::DependencyMissing(_)
                | PlayfileError::Transport(_) => err,
                other => PlayfileError::Playback(other.to_string()),
            })?;

        info!("Now playing {} in guild {}", staged.filename(), guild_id);
        self.send(notifier, Notice::NowPlaying(staged.filename().to_string()))
            .await;

        match handle.finished().await {
            PlaybackOutcome::Finished => {
                info!("Finished playing {} in guild {}", staged.filename(), guild_id);
                Ok(())
            }
            PlaybackOutcome::Failed(reason) => Err(PlayfileError::Playback(reason)),
        }
    }

    /// Clear the busy flag, release the staged audio, then leave voice if required.
    async fn teardown(
        &self,
        mut guard: PlaybackGuard,
        staged: Option<StagedAudio>,
        progress: Progress,
        stopped: bool,
    ) {
        let guild_id = guard.guild_id();
        debug!(
            "Tearing down playback in guild {} (reached {:?}, stopped: {})",
            guild_id, progress, stopped
        );

        guard.release();

        if let Some(staged) = staged {
            staged
                .release(
                    &self.pending_removals,
                    self.config.cleanup_retries,
                    self.config.cleanup_retry_delay,
                )
                .await;
        }

        let leave = stopped
            || (self.config.disconnect_policy == DisconnectPolicy::AfterPlayback
                && progress >= Progress::Connecting);

        if !leave {
            return;
        }

        // A newer request may already own the guild's voice connection. Holding the
        // voice lock keeps it from reusing the session while this one is leaving.
        let voice_lock = self.voice_lock(guild_id);
        let _voice = voice_lock.lock().await;
        if self.state.is_active(guild_id) {
            debug!("Guild {} was claimed again, keeping its voice connection", guild_id);
        } else if let Err(err) = self.transport.disconnect(guild_id).await {
            warn!("Failed to leave voice channel in guild {}: {}", guild_id, err);
        }
    }

    /// Handle a `stopplayfile` command
    pub async fn stopplayfile(&self, guild_id: GuildId, notifier: &dyn Notifier) {
        let notice = if self.interrupt(guild_id).await {
            Notice::Stopped
        } else if self.transport.current_channel(guild_id).await.is_some() {
            self.stop_sink(guild_id).await;
            let voice_lock = self.voice_lock(guild_id);
            let _voice = voice_lock.lock().await;
            if let Err(err) = self.transport.disconnect(guild_id).await {
                error!("Failed to leave voice channel in guild {}: {}", guild_id, err);
                Notice::Failed(err)
            } else {
                Notice::Stopped
            }
        } else {
            debug!("Stop requested in guild {} with nothing playing", guild_id);
            Notice::NothingPlaying
        };

        self.send(notifier, notice).await;
    }

    /// Signal the guild's active playfile request to stop and wait for its teardown.
    ///
    /// Returns false when no request was active or it was already finishing on its own.
    pub async fn interrupt(&self, guild_id: GuildId) -> bool {
        let Some(ack) = self.state.signal_stop(guild_id) else {
            return false;
        };

        info!("Stopping playback in guild {}", guild_id);
        if ack.await.is_err() {
            debug!("Playback in guild {} ended before acknowledging stop", guild_id);
        }
        true
    }

    fn voice_lock(&self, guild_id: GuildId) -> Arc<Mutex<()>> {
        self.voice_locks.entry(guild_id).or_default().clone()
    }

    async fn stop_sink(&self, guild_id: GuildId) {
        if let Ok(sink) = &self.sink {
            if let Err(err) = sink.stop(guild_id).await {
                warn!("Failed to stop {} sink in guild {}: {}", sink.name(), guild_id, err);
            }
        }
    }

    async fn send(&self, notifier: &dyn Notifier, notice: Notice) {
        if let Err(err) = notifier.notify(notice).await {
            error!("Failed to send playback status message: {}", err);
        }
    }
}
