//! Retry queue for requests that exhausted every provider
//!
//! The dispatcher only talks to [`RetryQueue`]; the storage behind it is
//! chosen through [`QueueConfig`].

mod file;
mod memory;

use std::{path::PathBuf, sync::Arc};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

pub use self::{file::FileQueue, memory::MemoryQueue};
use crate::{error::QueueError, types::QueuedMessage};

/// Storage for queued messages
///
/// Entries are unique by id. Every operation must be safe to call while a
/// sweep is running.
#[async_trait]
pub trait RetryQueue: Send + Sync + std::fmt::Debug {
    /// Add an entry, replacing any entry with the same id
    async fn push(&self, message: QueuedMessage) -> Result<(), QueueError>;

    /// Remove and return the oldest entry
    async fn pop(&self) -> Result<Option<QueuedMessage>, QueueError>;

    /// The oldest entry, left in place
    async fn peek(&self) -> Result<Option<QueuedMessage>, QueueError>;

    /// Every entry, oldest first
    async fn get_all(&self) -> Result<Vec<QueuedMessage>, QueueError>;

    /// Remove the entry with `id`, returning it if it was present
    async fn remove(&self, id: &str) -> Result<Option<QueuedMessage>, QueueError>;

    /// Replace an existing entry
    ///
    /// # Errors
    /// [`QueueError::NotFound`] if no entry with that id is queued
    async fn update(&self, message: QueuedMessage) -> Result<(), QueueError>;

    /// Number of queued entries
    async fn size(&self) -> Result<usize, QueueError>;
}

/// Configuration for the retry queue backend
///
/// In-memory queue (lost on restart):
/// ```ron
/// queue: Memory,
/// ```
///
/// File-backed queue:
/// ```ron
/// queue: File(
///     path: "/var/spool/courier/retry",
/// ),
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum QueueConfig {
    #[default]
    Memory,
    File {
        /// Directory holding one file per queued entry
        path: PathBuf,
    },
}

impl QueueConfig {
    /// Build the configured backend
    ///
    /// # Errors
    /// If a file-backed queue directory cannot be prepared
    pub fn into_queue(self) -> Result<Arc<dyn RetryQueue>, QueueError> {
        Ok(match self {
            Self::Memory => Arc::new(MemoryQueue::new()),
            Self::File { path } => Arc::new(FileQueue::open(path)?),
        })
    }
}
