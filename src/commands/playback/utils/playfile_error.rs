use poise::serenity_prelude::GuildId;
use thiserror::Error;

use super::embedded_messages::human_list;

/// Broad classes of playback failure, used to decide how loudly to log
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ErrorKind {
    InvalidInput,
    PreconditionFailed,
    Busy,
    StagingFailure,
    TransportFailure,
    DependencyMissing,
    PlaybackFailure,
}

/// Errors that can occur while handling a playfile request
#[derive(Error, Debug, Clone, PartialEq)]
pub enum PlayfileError {
    #[error("Not in a guild")]
    NotInGuild,

    #[error("No attachment on the message")]
    MissingAttachment,

    #[error("Extension `{extension}` is not allowed")]
    DisallowedExtension {
        extension: String,
        allowed: Vec<String>,
    },

    #[error("Attachment is {size} bytes, limit is {limit}")]
    AttachmentTooLarge { size: u64, limit: u64 },

    #[error("User is not in a voice channel")]
    UserNotInVoiceChannel,

    #[error("Guild {0} is already playing a file")]
    Busy(GuildId),

    #[error("Failed to stage attachment: {0}")]
    Staging(String),

    #[error("Voice transport error: {0}")]
    Transport(String),

    #[error("Timed out connecting to the voice channel after {0:?}")]
    ConnectTimeout(std::time::Duration),

    #[error("Missing dependency: {0}")]
    DependencyMissing(String),

    #[error("Playback failed: {0}")]
    Playback(String),
}

/// Result type for playfile operations
pub type PlayfileResult<T> = Result<T, PlayfileError>;

impl PlayfileError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::MissingAttachment
            | Self::DisallowedExtension { .. }
            | Self::AttachmentTooLarge { .. } => ErrorKind::InvalidInput,
            Self::NotInGuild | Self::UserNotInVoiceChannel => ErrorKind::PreconditionFailed,
            Self::Busy(_) => ErrorKind::Busy,
            Self::Staging(_) => ErrorKind::StagingFailure,
            Self::Transport(_) | Self::ConnectTimeout(_) => ErrorKind::TransportFailure,
            Self::DependencyMissing(_) => ErrorKind::DependencyMissing,
            Self::Playback(_) => ErrorKind::PlaybackFailure,
        }
    }

    /// Whether the failure was caused by the user rather than the bot
    pub fn is_user_error(&self) -> bool {
        matches!(
            self.kind(),
            ErrorKind::InvalidInput | ErrorKind::PreconditionFailed | ErrorKind::Busy
        )
    }

    /// Plain-language message shown in chat
    pub fn user_message(&self) -> String {
        match self {
            Self::NotInGuild => "This command can only be used in a server.".to_string(),
            Self::MissingAttachment => "Please attach an audio file to play.".to_string(),
            Self::DisallowedExtension { allowed, .. } => format!(
                "Please attach a valid audio file ({}).",
                human_list(allowed)
            ),
            Self::AttachmentTooLarge { limit, .. } => format!(
                "That file is too large to play. The limit is {}.",
                readable_size(*limit)
            ),
            Self::UserNotInVoiceChannel => {
                "You need to be in a voice channel to use this command.".to_string()
            }
            Self::Busy(_) => {
                "I'm already playing a file in this server. Please wait for it to finish."
                    .to_string()
            }
            Self::Staging(_) => "I couldn't download that file. Please try again.".to_string(),
            Self::Transport(_) | Self::ConnectTimeout(_) => {
                "I couldn't connect to your voice channel. Please try again.".to_string()
            }
            Self::DependencyMissing(what) => {
                format!("Audio playback is unavailable right now: {what} is missing.")
            }
            Self::Playback(reason) => {
                format!("An error occurred while trying to play the file: {reason}")
            }
        }
    }
}

/// Whole MiB or KiB where the size allows it, bytes otherwise
fn readable_size(bytes: u64) -> String {
    const KIB: u64 = 1024;
    const MIB: u64 = 1024 * KIB;

    if bytes >= MIB {
        format!("{} MiB", bytes / MIB)
    } else if bytes >= KIB {
        format!("{} KiB", bytes / KIB)
    } else {
        format!("{bytes} bytes")
    }
}
