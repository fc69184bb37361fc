//! Runtime configuration for the playfile bot.
//!
//! Every setting is read from the process environment (after `.env` has been
//! loaded by `dotenv`), falling back to the defaults below.

use humantime_serde::re::humantime;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;

/// Extensions accepted when `PLAYFILE_EXTENSIONS` is unset.
pub const DEFAULT_EXTENSIONS: [&str; 4] = ["mp3", "wav", "aac", "flac"];
/// Discord's upload limit for unboosted guilds.
pub const DEFAULT_MAX_ATTACHMENT_BYTES: u64 = 25 * 1024 * 1024;

#[derive(Error, Debug, PartialEq)]
pub enum ConfigError {
    #[error("Missing required environment variable {0}")]
    Missing(&'static str),

    #[error("Invalid value {value:?} for {key}: {reason}")]
    Invalid {
        key: &'static str,
        value: String,
        reason: String,
    },
}

/// Where downloaded attachments are held while they play.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StagingMode {
    Memory,
    Disk,
}

impl FromStr for StagingMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "memory" | "mem" => Ok(Self::Memory),
            "disk" | "file" => Ok(Self::Disk),
            other => Err(format!("expected `memory` or `disk`, got `{other}`")),
        }
    }
}

/// Whether the bot leaves the voice channel once a file has finished playing.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DisconnectPolicy {
    AfterPlayback,
    Keep,
}

impl FromStr for DisconnectPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "after_play" | "after_playback" | "always" => Ok(Self::AfterPlayback),
            "keep" | "never" => Ok(Self::Keep),
            other => Err(format!("expected `after_play` or `keep`, got `{other}`")),
        }
    }
}

/// Which audio sink should be used for playback.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SinkPreference {
    /// Direct sink when ffmpeg is installed, songbird's queue otherwise
    Auto,
    /// Delegate decoding and scheduling to songbird's builtin track queue
    Queue,
    /// Decode through an ffmpeg subprocess
    Ffmpeg,
}

impl FromStr for SinkPreference {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "auto" => Ok(Self::Auto),
            "queue" | "delegated" => Ok(Self::Queue),
            "ffmpeg" | "direct" => Ok(Self::Ffmpeg),
            other => Err(format!("expected `auto`, `queue` or `ffmpeg`, got `{other}`")),
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct PlayfileConfig {
    pub prefix: String,
    /// Lowercase extensions without the leading dot
    pub allowed_extensions: Vec<String>,
    pub staging: StagingMode,
    pub temp_dir: PathBuf,
    pub max_attachment_bytes: u64,
    pub connect_timeout: Duration,
    pub disconnect_policy: DisconnectPolicy,
    pub sink: SinkPreference,
    pub ffmpeg_path: PathBuf,
    pub cleanup_retries: u32,
    pub cleanup_retry_delay: Duration,
}

impl Default for PlayfileConfig {
    fn default() -> Self {
        Self {
            prefix: "!".to_string(),
            allowed_extensions: DEFAULT_EXTENSIONS.iter().map(|e| e.to_string()).collect(),
            staging: StagingMode::Disk,
            temp_dir: std::env::temp_dir(),
            max_attachment_bytes: DEFAULT_MAX_ATTACHMENT_BYTES,
            connect_timeout: Duration::from_secs(60),
            disconnect_policy: DisconnectPolicy::AfterPlayback,
            sink: SinkPreference::Auto,
            ffmpeg_path: PathBuf::from("ffmpeg"),
            cleanup_retries: 3,
            cleanup_retry_delay: Duration::from_secs(2),
        }
    }
}

impl PlayfileConfig {
    /// Build the configuration from the process environment
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build the configuration from an arbitrary key lookup.
    ///
    /// Empty values are treated the same as unset ones.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());
        let mut config = Self::default();

        if let Some(prefix) = get("PLAYFILE_PREFIX") {
            config.prefix = prefix.trim().to_string();
        }

        if let Some(list) = get("PLAYFILE_EXTENSIONS") {
            let extensions = parse_extensions(&list);
            if extensions.is_empty() {
                return Err(ConfigError::Invalid {
                    key: "PLAYFILE_EXTENSIONS",
                    value: list,
                    reason: "at least one extension is required".to_string(),
                });
            }
            config.allowed_extensions = extensions;
        }

        if let Some(value) = get("PLAYFILE_STAGING") {
            config.staging = parse_with("PLAYFILE_STAGING", value, str::parse)?;
        }

        if let Some(dir) = get("PLAYFILE_TEMP_DIR") {
            config.temp_dir = PathBuf::from(dir);
        }

        if let Some(value) = get("PLAYFILE_MAX_BYTES") {
            config.max_attachment_bytes = parse_with("PLAYFILE_MAX_BYTES", value, |v| {
                v.trim().parse::<u64>().map_err(|e| e.to_string())
            })?;
        }

        if let Some(value) = get("PLAYFILE_CONNECT_TIMEOUT") {
            config.connect_timeout = parse_with("PLAYFILE_CONNECT_TIMEOUT", value, parse_duration)?;
        }

        if let Some(value) = get("PLAYFILE_DISCONNECT") {
            config.disconnect_policy = parse_with("PLAYFILE_DISCONNECT", value, str::parse)?;
        }

        if let Some(value) = get("PLAYFILE_SINK") {
            config.sink = parse_with("PLAYFILE_SINK", value, str::parse)?;
        }

        if let Some(path) = get("FFMPEG_PATH") {
            config.ffmpeg_path = PathBuf::from(path);
        }

        if let Some(value) = get("PLAYFILE_CLEANUP_RETRIES") {
            config.cleanup_retries = parse_with("PLAYFILE_CLEANUP_RETRIES", value, |v| {
                v.trim().parse::<u32>().map_err(|e| e.to_string())
            })?;
        }

        if let Some(value) = get("PLAYFILE_CLEANUP_DELAY") {
            config.cleanup_retry_delay = parse_with("PLAYFILE_CLEANUP_DELAY", value, parse_duration)?;
        }

        Ok(config)
    }
}

/// Split a comma separated extension list, normalizing case and stripping dots
pub fn parse_extensions(list: &str) -> Vec<String> {
    let mut extensions: Vec<String> = Vec::new();
    for ext in list.split(',') {
        let ext = ext.trim().trim_start_matches('.').to_ascii_lowercase();
        if !ext.is_empty() && !extensions.contains(&ext) {
            extensions.push(ext);
        }
    }
    extensions
}

fn parse_duration(value: &str) -> Result<Duration, String> {
    humantime::parse_duration(value.trim()).map_err(|e| e.to_string())
}

fn parse_with<T, P>(key: &'static str, value: String, parse: P) -> Result<T, ConfigError>
where
    P: Fn(&str) -> Result<T, String>,
{
    parse(&value).map_err(|reason| ConfigError::Invalid { key, value, reason })
}
