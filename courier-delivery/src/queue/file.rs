//! File-backed retry queue
//!
//! # File Format
//! - One file per entry: `{hex(sha256(id))}.bin`, the bincode encoded `QueuedMessage`
//! - Names are a fixed-width digest of the id, so caller supplied keys can
//!   neither escape the directory nor exceed the filesystem's name limit
//!
//! All writes use "write to temp, then rename" so a crash never leaves a
//! half-written entry behind. Temporary files start with `.tmp_` and are
//! ignored when listing and removed when the queue is opened.
//!
//! An entry that no longer decodes is renamed with a `.corrupt_` prefix and
//! left for inspection; the rest of the queue keeps working.

use std::path::{Component, Path, PathBuf};

use async_trait::async_trait;
use courier_common::internal;
use sha2::{Digest, Sha256};
use tokio::fs;
use tracing::{error, warn};

use super::RetryQueue;
use crate::{error::QueueError, types::QueuedMessage};

const EXTENSION: &str = ".bin";
const TEMP_PREFIX: &str = ".tmp_";
const CORRUPT_PREFIX: &str = ".corrupt_";

/// Fixed-width file stem for `id`
fn file_stem(id: &str) -> String {
    hex::encode(Sha256::digest(id.as_bytes()))
}

/// Live entries only: temp and quarantined files all start with a dot
fn is_entry(name: &str) -> bool {
    name.ends_with(EXTENSION) && !name.starts_with('.')
}

/// Retry queue persisted to a directory
///
/// Survives restarts. Mutations are serialised through one async lock so a
/// `pop` can never hand the same entry to two callers.
#[derive(Debug)]
pub struct FileQueue {
    path: PathBuf,
    lock: tokio::sync::Mutex<()>,
}

impl FileQueue {
    /// Open (creating if needed) the queue directory at `path`
    ///
    /// # Errors
    /// - If `path` contains `..` components
    /// - If the directory cannot be created or is not a directory
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, QueueError> {
        let path = path.into();

        if path.components().any(|c| c == Component::ParentDir) {
            return Err(QueueError::Internal(format!(
                "Queue path cannot contain '..' components: {}",
                path.display()
            )));
        }

        std::fs::create_dir_all(&path)?;
        if !path.is_dir() {
            return Err(QueueError::Internal(format!(
                "Queue path is not a directory: {}",
                path.display()
            )));
        }

        Self::cleanup_temp_files(&path)?;

        internal!(level = DEBUG, "Opened retry queue at {}", path.display());

        Ok(Self {
            path,
            lock: tokio::sync::Mutex::new(()),
        })
    }

    /// Directory holding the entries
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Remove temp files left behind by a crash mid-write
    fn cleanup_temp_files(path: &Path) -> Result<(), QueueError> {
        for entry in std::fs::read_dir(path)? {
            let entry = entry?;
            if entry.file_name().to_string_lossy().starts_with(TEMP_PREFIX) {
                std::fs::remove_file(entry.path())?;
            }
        }
        Ok(())
    }

    fn entry_path(&self, id: &str) -> PathBuf {
        self.path.join(format!("{}{EXTENSION}", file_stem(id)))
    }

    async fn write(&self, message: &QueuedMessage) -> Result<(), QueueError> {
        let encoded = bincode::serde::encode_to_vec(message, bincode::config::standard())?;

        let path = self.entry_path(&message.id);
        let temp = self
            .path
            .join(format!("{TEMP_PREFIX}{}{EXTENSION}", file_stem(&message.id)));

        fs::write(&temp, &encoded).await?;
        fs::rename(&temp, &path).await?;
        Ok(())
    }

    async fn read(path: &Path) -> Result<QueuedMessage, QueueError> {
        let bytes = fs::read(path).await?;
        let (message, _) =
            bincode::serde::decode_from_slice(&bytes, bincode::config::standard())?;
        Ok(message)
    }

    /// Every entry, oldest first
    async fn load_all(&self) -> Result<Vec<QueuedMessage>, QueueError> {
        let mut dir = fs::read_dir(&self.path).await?;
        let mut messages = Vec::new();

        while let Some(entry) = dir.next_entry().await? {
            let name = entry.file_name();
            let name = name.to_string_lossy();
            if !is_entry(&name) {
                continue;
            }

            match Self::read(&entry.path()).await {
                Ok(message) => messages.push(message),
                // Removed by a concurrent reader between listing and reading
                Err(QueueError::Io(err)) if err.kind() == std::io::ErrorKind::NotFound => {}
                Err(QueueError::Serialization(reason)) => {
                    self.quarantine(&name, &reason).await;
                }
                Err(err) => return Err(err),
            }
        }

        messages.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id)));
        Ok(messages)
    }

    /// Move an undecodable entry out of the way
    async fn quarantine(&self, name: &str, reason: &str) {
        let from = self.path.join(name);
        let to = self.path.join(format!("{CORRUPT_PREFIX}{name}"));

        match fs::rename(&from, &to).await {
            Ok(()) => warn!(
                entry = %from.display(),
                quarantined = %to.display(),
                error = %reason,
                "Quarantined undecodable queue entry"
            ),
            Err(e) => error!(
                entry = %from.display(),
                error = %e,
                "Failed to quarantine undecodable queue entry, skipping it"
            ),
        }
    }

    async fn delete(&self, id: &str) -> Result<bool, QueueError> {
        match fs::remove_file(self.entry_path(id)).await {
            Ok(()) => Ok(true),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(err) => Err(err.into()),
        }
    }
}

#[async_trait]
impl RetryQueue for FileQueue {
    async fn push(&self, message: QueuedMessage) -> Result<(), QueueError> {
        let _guard = self.lock.lock().await;
        self.write(&message).await?;
        internal!(level = DEBUG, "Queued message {} for retry", message.id);
        Ok(())
    }

    async fn pop(&self) -> Result<Option<QueuedMessage>, QueueError> {
        let _guard = self.lock.lock().await;
        let Some(oldest) = self.load_all().await?.into_iter().next() else {
            return Ok(None);
        };
        self.delete(&oldest.id).await?;
        Ok(Some(oldest))
    }

    async fn peek(&self) -> Result<Option<QueuedMessage>, QueueError> {
        let _guard = self.lock.lock().await;
        Ok(self.load_all().await?.into_iter().next())
    }

    async fn get_all(&self) -> Result<Vec<QueuedMessage>, QueueError> {
        let _guard = self.lock.lock().await;
        self.load_all().await
    }

    async fn remove(&self, id: &str) -> Result<Option<QueuedMessage>, QueueError> {
        let _guard = self.lock.lock().await;
        let path = self.entry_path(id);

        let message = match Self::read(&path).await {
            Ok(message) => message,
            Err(QueueError::Io(err)) if err.kind() == std::io::ErrorKind::NotFound => {
                return Ok(None);
            }
            Err(err) => return Err(err),
        };

        self.delete(id).await?;
        Ok(Some(message))
    }

    async fn update(&self, message: QueuedMessage) -> Result<(), QueueError> {
        let _guard = self.lock.lock().await;
        if !fs::try_exists(self.entry_path(&message.id)).await? {
            return Err(QueueError::NotFound(message.id));
        }
        self.write(&message).await
    }

    async fn size(&self) -> Result<usize, QueueError> {
        let mut dir = fs::read_dir(&self.path).await?;
        let mut count = 0;

        while let Some(entry) = dir.next_entry().await? {
            let name = entry.file_name();
            let name = name.to_string_lossy();
            if is_entry(&name) {
                count += 1;
            }
        }

        Ok(count)
    }
}
