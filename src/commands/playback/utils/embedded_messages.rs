use async_trait::async_trait;
use poise::CreateReply;
use std::fmt;

use super::playfile_error::PlayfileError;
use crate::{Context, Error};

/// A status message for the user who invoked a playback command
#[derive(Clone, Debug, PartialEq)]
pub enum Notice {
    NowPlaying(String),
    Stopped,
    NothingPlaying,
    Failed(PlayfileError),
}

impl Notice {
    pub fn is_failure(&self) -> bool {
        matches!(self, Notice::Failed(_))
    }

    pub fn to_reply(&self) -> CreateReply {
        CreateReply::default()
            .content(self.to_string())
            .ephemeral(self.is_failure())
    }
}

impl fmt::Display for Notice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Notice::NowPlaying(track) => write!(f, "Now playing: {track}"),
            Notice::Stopped => {
                f.write_str("Stopped playing file and disconnected from the voice channel.")
            }
            Notice::NothingPlaying => f.write_str("Nothing is playing right now."),
            Notice::Failed(err) => f.write_str(&err.user_message()),
        }
    }
}

/// Where status messages for a request are delivered
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn notify(&self, notice: Notice) -> Result<(), Error>;
}

/// Replies to the invoking command
pub struct ReplyNotifier<'a> {
    ctx: Context<'a>,
}

impl<'a> ReplyNotifier<'a> {
    pub fn new(ctx: Context<'a>) -> Self {
        Self { ctx }
    }
}

#[async_trait]
impl Notifier for ReplyNotifier<'_> {
    async fn notify(&self, notice: Notice) -> Result<(), Error> {
        self.ctx.send(notice.to_reply()).await?;
        Ok(())
    }
}

/// Join items as "a, b, or c"
pub fn human_list(items: &[String]) -> String {
    match items {
        [] => String::new(),
        [only] => only.clone(),
        [first, second] => format!("{first} or {second}"),
        [init @ .., last] => format!("{}, or {}", init.join(", "), last),
    }
}
