//! Data model shared by the dispatcher, the retry queue and callers

use std::time::{Duration, SystemTime};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::normalizer::NormalizedError;

/// Fallback horizon for deadlines too far out to represent
const FAR_FUTURE: Duration = Duration::from_secs(100 * 365 * 24 * 60 * 60);

/// `base + delay`, clamped to a far-future time instead of overflowing
pub(crate) fn deadline_after(base: SystemTime, delay: Duration) -> SystemTime {
    base.checked_add(delay)
        .or_else(|| base.checked_add(FAR_FUTURE))
        .unwrap_or(base)
}

/// An outbound message as submitted by a caller
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SendRequest {
    /// Recipient address
    pub to: String,
    /// Sender address
    pub from: String,
    /// Subject line
    pub subject: String,
    /// Message body as composed by the caller
    pub body: String,
    /// Body after template rendering, sent in preference to `body` when present
    #[serde(default)]
    pub rendered_body: Option<String>,
}

impl SendRequest {
    /// Create a new request with the required fields
    pub fn new(
        to: impl Into<String>,
        from: impl Into<String>,
        subject: impl Into<String>,
        body: impl Into<String>,
    ) -> Self {
        Self {
            to: to.into(),
            from: from.into(),
            subject: subject.into(),
            body: body.into(),
            rendered_body: None,
        }
    }

    /// Attach a rendered body
    #[must_use]
    pub fn with_rendered_body(mut self, rendered: impl Into<String>) -> Self {
        self.rendered_body = Some(rendered.into());
        self
    }

    /// The body a provider should transmit
    #[must_use]
    pub fn effective_body(&self) -> &str {
        self.rendered_body.as_deref().unwrap_or(&self.body)
    }
}

/// Outcome state of a send
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SendStatus {
    /// A provider accepted the message
    Sent,
    /// Terminal failure, nothing further will be attempted
    Failed,
    /// Every provider failed and the request waits on the retry queue
    Queued,
    /// A queued request failed again and is rescheduled
    Retrying,
}

impl std::fmt::Display for SendStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Self::Sent => "sent",
            Self::Failed => "failed",
            Self::Queued => "queued",
            Self::Retrying => "retrying",
        })
    }
}

/// Result of a send, cached under the request's idempotency key
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SendResult {
    /// Request identifier (the effective idempotency key)
    pub id: String,
    /// Outcome state
    pub status: SendStatus,
    /// Provider that accepted the message
    pub provider: Option<String>,
    /// Provider assigned message identifier
    pub message_id: Option<String>,
    /// Attempts made against the provider that produced this result
    pub attempts: u32,
    /// Raw error message of the final failure
    pub error: Option<String>,
    /// Classification of `error`
    pub normalized: Option<NormalizedError>,
    /// When this result was produced
    pub completed_at: DateTime<Utc>,
}

impl SendResult {
    /// A successful result
    #[must_use]
    pub fn sent(id: String, provider: String, message_id: Option<String>, attempts: u32) -> Self {
        Self {
            id,
            status: SendStatus::Sent,
            provider: Some(provider),
            message_id,
            attempts,
            error: None,
            normalized: None,
            completed_at: Utc::now(),
        }
    }

    /// A failure result carrying the raw error and its classification
    #[must_use]
    pub fn failure(
        id: String,
        status: SendStatus,
        attempts: u32,
        error: String,
        normalized: NormalizedError,
    ) -> Self {
        Self {
            id,
            status,
            provider: None,
            message_id: None,
            attempts,
            error: Some(error),
            normalized: Some(normalized),
            completed_at: Utc::now(),
        }
    }

    /// Returns `true` if a provider accepted the message
    #[must_use]
    pub fn is_sent(&self) -> bool {
        self.status == SendStatus::Sent
    }
}

/// A request waiting on the retry queue
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueuedMessage {
    /// Same identifier as the originating request and its `SendResult`
    pub id: String,
    /// The request to re-dispatch
    pub request: SendRequest,
    /// Dispatch rounds made so far, including the initial one
    pub attempts: u32,
    /// Earliest time the sweep may retry this entry
    pub next_retry: SystemTime,
    /// When the entry was first queued
    pub created_at: SystemTime,
    /// Raw error of the most recent failed round
    pub last_error: Option<String>,
}

impl QueuedMessage {
    /// Create a new queue entry after the first failed dispatch round
    ///
    /// The entry becomes due `retry_in` after its creation time.
    #[must_use]
    pub fn new(id: String, request: SendRequest, retry_in: Duration, last_error: String) -> Self {
        let created_at = SystemTime::now();
        Self {
            id,
            request,
            attempts: 1,
            next_retry: deadline_after(created_at, retry_in),
            created_at,
            last_error: Some(last_error),
        }
    }

    /// Returns `true` if the entry may be retried at `now`
    #[must_use]
    pub fn is_due(&self, now: SystemTime) -> bool {
        self.next_retry <= now
    }
}
