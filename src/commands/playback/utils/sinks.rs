//! Audio sinks: the component that turns staged audio into frames on a voice call.
//!
//! Two implementations exist. [`QueueSink`] hands the file to songbird's builtin
//! track queue, which decodes it with symphonia. [`FfmpegSink`] decodes through an
//! ffmpeg subprocess and feeds raw PCM into the call. [`select_sink`] picks one at
//! start-up so a missing decoder is known before anyone asks for playback.

use async_trait::async_trait;
use poise::serenity_prelude::GuildId;
use songbird::input::{AudioStream, File, Input, LiveInput, RawAdapter};
use songbird::tracks::TrackHandle;
use songbird::{Event, Songbird, TrackEvent};
use std::ffi::OsString;
use std::io::{Cursor, Read, Write};
use std::path::{Path, PathBuf};
use std::process::{Child, ChildStderr, ChildStdout, Command, Stdio};
use std::sync::{Arc, Mutex};
use symphonia::core::io::{MediaSource, ReadOnlySource};
use symphonia::core::probe::Hint;
use tokio::sync::oneshot;
use tracing::{debug, info, warn};

use crate::utils::config::{PlayfileConfig, SinkPreference};

use super::event_handlers::TrackCompletionNotifier;
use super::playfile_error::{PlayfileError, PlayfileResult};
use super::staging::StagedAudio;

const SAMPLE_RATE: u32 = 48_000;
const CHANNELS: u32 = 2;

/// How a track left the call
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum PlaybackOutcome {
    Finished,
    Failed(String),
}

/// Awaitable completion of one started track
#[derive(Debug)]
pub struct PlaybackHandle {
    done: oneshot::Receiver<PlaybackOutcome>,
}

impl PlaybackHandle {
    pub fn channel() -> (CompletionSender, PlaybackHandle) {
        let (tx, rx) = oneshot::channel();
        let sender = CompletionSender {
            tx: Arc::new(Mutex::new(Some(tx))),
        };
        (sender, PlaybackHandle { done: rx })
    }

    /// Wait for the track to end.
    ///
    /// A sink that goes away without reporting counts as finished.
    pub async fn finished(self) -> PlaybackOutcome {
        match self.done.await {
            Ok(outcome) => outcome,
            Err(_) => {
                debug!("Completion sender dropped before reporting, treating track as finished");
                PlaybackOutcome::Finished
            }
        }
    }
}

/// Sending half of a [`PlaybackHandle`]; only the first outcome is delivered
#[derive(Clone, Debug)]
pub struct CompletionSender {
    tx: Arc<Mutex<Option<oneshot::Sender<PlaybackOutcome>>>>,
}

impl CompletionSender {
    pub fn complete(&self, outcome: PlaybackOutcome) -> bool {
        let tx = match self.tx.lock() {
            Ok(mut slot) => slot.take(),
            Err(_) => None,
        };
        tx.is_some_and(|tx| tx.send(outcome).is_ok())
    }
}

/// Something that can play staged audio into a guild's voice call
#[async_trait]
pub trait AudioSink: Send + Sync {
    fn name(&self) -> &'static str;

    /// Start playing `staged`; the handle resolves when it stops
    async fn play(&self, guild_id: GuildId, staged: &StagedAudio) -> PlayfileResult<PlaybackHandle>;

    /// Stop whatever this sink is playing in the guild
    async fn stop(&self, guild_id: GuildId) -> PlayfileResult<()>;
}

/// Choose the sink named by the configuration, probing for ffmpeg where needed
pub async fn select_sink(
    config: &PlayfileConfig,
    manager: Arc<Songbird>,
) -> PlayfileResult<Arc<dyn AudioSink>> {
    match config.sink {
        SinkPreference::Queue => Ok(Arc::new(QueueSink::new(manager))),
        SinkPreference::Ffmpeg => {
            FfmpegSink::probe(&config.ffmpeg_path).await?;
            Ok(Arc::new(FfmpegSink::new(manager, config.ffmpeg_path.clone())))
        }
        SinkPreference::Auto => match FfmpegSink::probe(&config.ffmpeg_path).await {
            Ok(()) => Ok(Arc::new(FfmpegSink::new(manager, config.ffmpeg_path.clone()))),
            Err(err) => {
                info!("{}; falling back to the songbird queue sink", err);
                Ok(Arc::new(QueueSink::new(manager)))
            }
        },
    }
}

fn watch_track(
    guild_id: GuildId,
    track_name: &str,
    track: &TrackHandle,
) -> PlayfileResult<PlaybackHandle> {
    let (completion, handle) = PlaybackHandle::channel();

    for event in [TrackEvent::End, TrackEvent::Error] {
        track
            .add_event(
                Event::Track(event),
                TrackCompletionNotifier {
                    guild_id,
                    track_name: track_name.to_string(),
                    completion: completion.clone(),
                },
            )
            .map_err(|e| PlayfileError::Playback(e.to_string()))?;
    }

    Ok(handle)
}

fn call_for(
    manager: &Songbird,
    guild_id: GuildId,
) -> PlayfileResult<Arc<tokio::sync::Mutex<songbird::Call>>> {
    manager
        .get(guild_id)
        .ok_or_else(|| PlayfileError::Transport("not connected to a voice channel".to_string()))
}

/// Decodable songbird input for staged audio
fn staged_input(staged: &StagedAudio) -> PlayfileResult<Input> {
    if let Some(path) = staged.path() {
        return Ok(File::new(path.to_path_buf()).into());
    }

    if let Some(bytes) = staged.bytes() {
        let mut hint = Hint::new();
        hint.with_extension(staged.extension());
        let stream = AudioStream {
            input: Box::new(Cursor::new(bytes)) as Box<dyn MediaSource>,
            hint: Some(hint),
        };
        return Ok(Input::Live(LiveInput::Raw(stream), None));
    }

    Err(PlayfileError::Playback(
        "staged audio was already released".to_string(),
    ))
}

/// Delegates decoding and scheduling to songbird's builtin track queue
pub struct QueueSink {
    manager: Arc<Songbird>,
}

impl QueueSink {
    pub fn new(manager: Arc<Songbird>) -> Self {
        Self { manager }
    }
}

#[async_trait]
impl AudioSink for QueueSink {
    fn name(&self) -> &'static str {
        "songbird queue"
    }

    async fn play(&self, guild_id: GuildId, staged: &StagedAudio) -> PlayfileResult<PlaybackHandle> {
        let call = call_for(&self.manager, guild_id)?;
        let input = staged_input(staged)?;

        let mut handler = call.lock().await;
        let track = handler.enqueue_input(input).await;
        debug!(
            "Queued {} in guild {} (queue length {})",
            staged.filename(),
            guild_id,
            handler.queue().len()
        );

        watch_track(guild_id, staged.filename(), &track)
    }

    async fn stop(&self, guild_id: GuildId) -> PlayfileResult<()> {
        if let Some(call) = self.manager.get(guild_id) {
            call.lock().await.queue().stop();
        }
        Ok(())
    }
}

/// Decodes with an ffmpeg subprocess into 48kHz stereo f32 PCM
pub struct FfmpegSink {
    manager: Arc<Songbird>,
    ffmpeg: PathBuf,
}

impl FfmpegSink {
    pub fn new(manager: Arc<Songbird>, ffmpeg: PathBuf) -> Self {
        Self { manager, ffmpeg }
    }

    /// Check that `ffmpeg -version` runs
    pub async fn probe(ffmpeg: &Path) -> PlayfileResult<()> {
        let status = tokio::process::Command::new(ffmpeg)
            .arg("-version")
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .await
            .map_err(|e| PlayfileError::DependencyMissing(format!("ffmpeg ({e})")))?;

        if status.success() {
            debug!("Found ffmpeg at {}", ffmpeg.display());
            Ok(())
        } else {
            Err(PlayfileError::DependencyMissing(format!(
                "ffmpeg (exited with {status})"
            )))
        }
    }
}

#[async_trait]
impl AudioSink for FfmpegSink {
    fn name(&self) -> &'static str {
        "ffmpeg"
    }

    async fn play(&self, guild_id: GuildId, staged: &StagedAudio) -> PlayfileResult<PlaybackHandle> {
        let call = call_for(&self.manager, guild_id)?;

        let stream = FfmpegStream::spawn(&self.ffmpeg, staged).map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                PlayfileError::DependencyMissing(format!("ffmpeg ({e})"))
            } else {
                PlayfileError::Playback(e.to_string())
            }
        })?;
        let input: Input = RawAdapter::new(ReadOnlySource::new(stream), SAMPLE_RATE, CHANNELS).into();

        let track = call.lock().await.play_input(input);
        watch_track(guild_id, staged.filename(), &track)
    }

    async fn stop(&self, guild_id: GuildId) -> PlayfileResult<()> {
        if let Some(call) = self.manager.get(guild_id) {
            call.lock().await.stop();
        }
        Ok(())
    }
}

/// Stdout of a running ffmpeg; the process is killed when the stream is dropped.
///
/// End of output is only reported as such when ffmpeg exited successfully; a
/// failed decode turns into a read error carrying ffmpeg's last stderr line.
struct FfmpegStream {
    child: Child,
    stdout: ChildStdout,
    stderr: Option<ChildStderr>,
}

impl FfmpegStream {
    fn spawn(ffmpeg: &Path, staged: &StagedAudio) -> std::io::Result<Self> {
        let bytes = staged.bytes();
        let source = staged
            .path()
            .map(|p| p.as_os_str().to_owned())
            .unwrap_or_else(|| OsString::from("pipe:0"));

        let mut child = Command::new(ffmpeg)
            .args(["-hide_banner", "-loglevel", "error", "-i"])
            .arg(&source)
            .args(["-f", "f32le", "-ac", "2", "-ar", "48000", "pipe:1"])
            .stdin(if bytes.is_some() {
                Stdio::piped()
            } else {
                Stdio::null()
            })
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()?;

        if let (Some(bytes), Some(mut stdin)) = (bytes, child.stdin.take()) {
            tokio::task::spawn_blocking(move || {
                // ffmpeg closing the pipe early (stop, bad file) surfaces here
                if let Err(e) = stdin.write_all(&bytes) {
                    debug!("ffmpeg stdin closed early: {}", e);
                }
            });
        }

        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| std::io::Error::other("ffmpeg stdout was not captured"))?;
        let stderr = child.stderr.take();

        Ok(Self {
            child,
            stdout,
            stderr,
        })
    }

    /// Called once stdout is exhausted
    fn check_exit(&mut self) -> std::io::Result<()> {
        let status = self.child.wait()?;
        if status.success() {
            return Ok(());
        }

        let mut diagnostics = String::new();
        if let Some(mut stderr) = self.stderr.take() {
            if let Err(e) = stderr.read_to_string(&mut diagnostics) {
                debug!("Could not read ffmpeg stderr: {}", e);
            }
        }

        Err(std::io::Error::other(match last_line(&diagnostics) {
            Some(line) => format!("ffmpeg exited with {status}: {line}"),
            None => format!("ffmpeg exited with {status}"),
        }))
    }
}

fn last_line(text: &str) -> Option<&str> {
    text.lines().rev().map(str::trim).find(|l| !l.is_empty())
}

impl Read for FfmpegStream {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        let read = self.stdout.read(buf)?;
        if read == 0 && !buf.is_empty() {
            self.check_exit()?;
        }
        Ok(read)
    }
}

impl Drop for FfmpegStream {
    fn drop(&mut self) {
        if let Err(e) = self.child.kill() {
            if e.kind() != std::io::ErrorKind::InvalidInput {
                warn!("Failed to kill ffmpeg: {}", e);
            }
        }
        if let Err(e) = self.child.wait() {
            debug!("Failed to reap ffmpeg: {}", e);
        }
    }
}
