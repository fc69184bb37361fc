//! Per-guild single-flight guard for file playback.

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use poise::serenity_prelude::GuildId;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::oneshot;
use tracing::{debug, warn};

use super::playfile_error::{PlayfileError, PlayfileResult};

/// Sent by the playing task once teardown has finished
pub type StopAck = oneshot::Sender<()>;

#[derive(Debug)]
struct ActivePlayback {
    ticket: u64,
    stop: Option<oneshot::Sender<StopAck>>,
}

/// Which guilds currently have a playfile request in flight
#[derive(Debug, Default)]
pub struct GuildPlaybackState {
    active: DashMap<GuildId, ActivePlayback>,
    next_ticket: AtomicU64,
}

impl GuildPlaybackState {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Claim `guild_id` without waiting.
    ///
    /// Returns the guard that owns the claim and the receiver a stop request arrives on.
    pub fn try_acquire(
        self: &Arc<Self>,
        guild_id: GuildId,
    ) -> PlayfileResult<(PlaybackGuard, oneshot::Receiver<StopAck>)> {
        match self.active.entry(guild_id) {
            Entry::Occupied(_) => Err(PlayfileError::Busy(guild_id)),
            Entry::Vacant(slot) => {
                let ticket = self.next_ticket.fetch_add(1, Ordering::Relaxed);
                let (stop_tx, stop_rx) = oneshot::channel();
                slot.insert(ActivePlayback {
                    ticket,
                    stop: Some(stop_tx),
                });
                debug!("Guild {} claimed by playback #{}", guild_id, ticket);

                let guard = PlaybackGuard {
                    state: Arc::clone(self),
                    guild_id,
                    ticket,
                    released: false,
                };
                Ok((guard, stop_rx))
            }
        }
    }

    pub fn is_active(&self, guild_id: GuildId) -> bool {
        self.active.contains_key(&guild_id)
    }

    /// Ask the guild's active playback to stop.
    ///
    /// Returns the receiver its teardown acknowledgement arrives on, or `None` when
    /// nothing is active or the playback already stopped listening for a stop.
    pub fn signal_stop(&self, guild_id: GuildId) -> Option<oneshot::Receiver<()>> {
        let stop = self.take_stop(guild_id)?;
        let (ack_tx, ack_rx) = oneshot::channel();
        stop.send(ack_tx).ok()?;
        Some(ack_rx)
    }

    /// Take the stop channel of the guild's active playback, if it has not been taken yet
    fn take_stop(&self, guild_id: GuildId) -> Option<oneshot::Sender<StopAck>> {
        self.active
            .get_mut(&guild_id)
            .and_then(|mut playback| playback.stop.take())
    }

    fn release(&self, guild_id: GuildId, ticket: u64) -> bool {
        self.active
            .remove_if(&guild_id, |_, playback| playback.ticket == ticket)
            .is_some()
    }
}

/// Ownership of one guild's busy flag.
///
/// The flag is cleared by [`PlaybackGuard::release`], or on drop if release never ran.
#[derive(Debug)]
pub struct PlaybackGuard {
    state: Arc<GuildPlaybackState>,
    guild_id: GuildId,
    ticket: u64,
    released: bool,
}

impl PlaybackGuard {
    pub fn guild_id(&self) -> GuildId {
        self.guild_id
    }

    /// Clear the busy flag. Returns false if it was already cleared.
    pub fn release(&mut self) -> bool {
        if self.released {
            return false;
        }
        self.released = true;
        let removed = self.state.release(self.guild_id, self.ticket);
        debug!("Guild {} released by playback #{}", self.guild_id, self.ticket);
        removed
    }
}

impl Drop for PlaybackGuard {
    fn drop(&mut self) {
        if !self.released {
            warn!(
                "Playback #{} for guild {} dropped before teardown, clearing busy flag",
                self.ticket, self.guild_id
            );
            self.release();
        }
    }
}
