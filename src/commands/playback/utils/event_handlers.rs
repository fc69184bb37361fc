use poise::serenity_prelude as serenity;
use serenity::async_trait;
use songbird::tracks::PlayMode;
use tracing::{debug, warn};

use super::sinks::{CompletionSender, PlaybackOutcome};

/// Resolves a [`super::sinks::PlaybackHandle`] when songbird reports the track ended or failed
pub struct TrackCompletionNotifier {
    pub guild_id: serenity::GuildId,
    pub track_name: String,
    pub completion: CompletionSender,
}

/// An errored track is a failure; any other way of leaving the call is a finish
fn outcome_of<'a>(modes: impl IntoIterator<Item = &'a PlayMode>) -> PlaybackOutcome {
    modes
        .into_iter()
        .find_map(|mode| match mode {
            PlayMode::Errored(err) => Some(PlaybackOutcome::Failed(err.to_string())),
            _ => None,
        })
        .unwrap_or(PlaybackOutcome::Finished)
}

#[async_trait]
impl songbird::EventHandler for TrackCompletionNotifier {
    async fn act(&self, ctx: &songbird::EventContext<'_>) -> Option<songbird::Event> {
        if let songbird::EventContext::Track(tracks) = ctx {
            let outcome = outcome_of(tracks.iter().map(|(state, _)| &state.playing));

            match &outcome {
                PlaybackOutcome::Finished => debug!(
                    "Track {} finished in guild {}",
                    self.track_name, self.guild_id
                ),
                PlaybackOutcome::Failed(reason) => warn!(
                    "Track {} failed in guild {}: {}",
                    self.track_name, self.guild_id, reason
                ),
            }

            self.completion.complete(outcome);
            return Some(songbird::Event::Cancel);
        }
        None
    }
}
