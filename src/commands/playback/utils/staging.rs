//! Local copies of downloaded attachments.
//!
//! A [`StagedAudio`] is owned by exactly one playback request. It is released
//! explicitly during teardown; dropping it without release still removes any
//! file it created.

use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::utils::config::StagingMode;

use super::playfile_error::{PlayfileError, PlayfileResult};

const FILE_PREFIX: &str = "playfile-";

#[derive(Debug)]
enum Storage {
    Memory(Arc<[u8]>),
    Disk(PathBuf),
    Released,
}

/// Downloaded attachment content, held in memory or in a uniquely named temp file
#[derive(Debug)]
pub struct StagedAudio {
    filename: String,
    extension: String,
    storage: Storage,
}

impl StagedAudio {
    pub fn in_memory(filename: &str, extension: &str, bytes: Vec<u8>) -> Self {
        Self {
            filename: filename.to_string(),
            extension: extension.to_string(),
            storage: Storage::Memory(bytes.into()),
        }
    }

    /// Write `bytes` to a fresh temp file inside `dir`
    pub async fn on_disk(
        dir: &Path,
        filename: &str,
        extension: &str,
        bytes: Vec<u8>,
    ) -> PlayfileResult<Self> {
        let dir = dir.to_path_buf();
        let suffix = if extension.is_empty() {
            String::new()
        } else {
            format!(".{extension}")
        };

        let path = tokio::task::spawn_blocking(move || -> std::io::Result<PathBuf> {
            std::fs::create_dir_all(&dir)?;
            let mut file = tempfile::Builder::new()
                .prefix(FILE_PREFIX)
                .suffix(&suffix)
                .tempfile_in(&dir)?;
            file.write_all(&bytes)?;
            file.flush()?;
            file.into_temp_path().keep().map_err(|e| e.error)
        })
        .await
        .map_err(|e| PlayfileError::Staging(e.to_string()))?
        .map_err(|e| PlayfileError::Staging(e.to_string()))?;

        debug!("Staged {} at {}", filename, path.display());

        Ok(Self {
            filename: filename.to_string(),
            extension: extension.to_string(),
            storage: Storage::Disk(path),
        })
    }

    /// Stage `bytes` the way `mode` asks for
    pub async fn stage(
        mode: StagingMode,
        dir: &Path,
        filename: &str,
        extension: &str,
        bytes: Vec<u8>,
    ) -> PlayfileResult<Self> {
        match mode {
            StagingMode::Memory => Ok(Self::in_memory(filename, extension, bytes)),
            StagingMode::Disk => Self::on_disk(dir, filename, extension, bytes).await,
        }
    }

    /// Original attachment filename, used as the track name
    pub fn filename(&self) -> &str {
        &self.filename
    }

    pub fn extension(&self) -> &str {
        &self.extension
    }

    pub fn path(&self) -> Option<&Path> {
        match &self.storage {
            Storage::Disk(path) => Some(path),
            _ => None,
        }
    }

    pub fn bytes(&self) -> Option<Arc<[u8]>> {
        match &self.storage {
            Storage::Memory(bytes) => Some(bytes.clone()),
            _ => None,
        }
    }

    /// Free the buffer or remove the temp file.
    ///
    /// Removal failures are retried and then parked in `pending`; they are never returned.
    pub async fn release(mut self, pending: &PendingRemovals, retries: u32, delay: Duration) {
        pending.sweep().await;

        match std::mem::replace(&mut self.storage, Storage::Released) {
            Storage::Disk(path) => {
                if let Err(path) = remove_with_retries(path, retries, delay).await {
                    warn!(
                        "Could not remove staged file {}, will retry on a later cleanup",
                        path.display()
                    );
                    pending.park(path);
                }
            }
            Storage::Memory(_) | Storage::Released => {}
        }
    }
}

impl Drop for StagedAudio {
    fn drop(&mut self) {
        if let Storage::Disk(path) = &self.storage {
            if let Err(e) = std::fs::remove_file(path) {
                if e.kind() != std::io::ErrorKind::NotFound {
                    warn!("Failed to remove staged file {}: {}", path.display(), e);
                }
            }
        }
    }
}

async fn remove_with_retries(path: PathBuf, retries: u32, delay: Duration) -> Result<(), PathBuf> {
    let mut attempt = 0;
    loop {
        match tokio::fs::remove_file(&path).await {
            Ok(()) => {
                debug!("Removed staged file {}", path.display());
                return Ok(());
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(()),
            Err(e) if attempt < retries => {
                attempt += 1;
                warn!(
                    "Failed to remove {} (attempt {}/{}): {}",
                    path.display(),
                    attempt,
                    retries + 1,
                    e
                );
                tokio::time::sleep(delay).await;
            }
            Err(e) => {
                warn!("Giving up removing {}: {}", path.display(), e);
                return Err(path);
            }
        }
    }
}

/// Staged files whose removal failed, retried on every later release
#[derive(Debug, Default)]
pub struct PendingRemovals {
    paths: Mutex<Vec<PathBuf>>,
}

impl PendingRemovals {
    pub fn park(&self, path: PathBuf) {
        if let Ok(mut paths) = self.paths.lock() {
            paths.push(path);
        }
    }

    pub fn len(&self) -> usize {
        self.paths.lock().map(|p| p.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Try once more to remove every parked path
    pub async fn sweep(&self) {
        let parked = match self.paths.lock() {
            Ok(mut paths) => std::mem::take(&mut *paths),
            Err(_) => return,
        };
        if parked.is_empty() {
            return;
        }

        let results = futures::future::join_all(parked.into_iter().map(|path| async move {
            match tokio::fs::remove_file(&path).await {
                Ok(()) => None,
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => None,
                Err(_) => Some(path),
            }
        }))
        .await;

        let still_stuck: Vec<PathBuf> = results.into_iter().flatten().collect();
        if still_stuck.is_empty() {
            info!("Removed all previously stuck staged files");
        }
        for path in still_stuck {
            self.park(path);
        }
    }
}
