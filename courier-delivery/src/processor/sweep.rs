//! Periodic retry of queued requests

use std::{
    sync::{
        Weak,
        atomic::{AtomicBool, Ordering},
    },
    time::{Duration, SystemTime},
};

use courier_common::{Signal, internal};
use serde::Serialize;
use tokio::{sync::broadcast, task::JoinSet};
use tracing::{debug, error, info, warn};

use super::{EmailService, Inner};
use crate::{
    error::QueueError,
    normalizer::ErrorNormalizer,
    types::{QueuedMessage, SendResult, SendStatus},
};

/// What one sweep did
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SweepReport {
    /// Entries that were due
    pub due: usize,
    /// Entries sent and removed
    pub sent: usize,
    /// Entries that failed again and were rescheduled
    pub rescheduled: usize,
    /// Entries that reached their final attempt and were dropped
    pub dropped: usize,
    /// Entries left untouched because the rate limiter denied them
    pub deferred: usize,
    /// Entries that failed again but could not be rescheduled; they keep
    /// their previous schedule
    pub unsaved: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Outcome {
    Sent,
    Rescheduled,
    Dropped,
    Deferred,
    Unsaved,
    /// Removed by someone else while it was being retried
    Gone,
}

impl SweepReport {
    fn record(&mut self, outcome: Outcome) {
        match outcome {
            Outcome::Sent => self.sent += 1,
            Outcome::Rescheduled => self.rescheduled += 1,
            Outcome::Dropped => self.dropped += 1,
            Outcome::Deferred => self.deferred += 1,
            Outcome::Unsaved => self.unsaved += 1,
            Outcome::Gone => {}
        }
    }
}

/// Clears the in-progress flag however the sweep ends
struct SweepGuard<'a>(&'a AtomicBool);

impl Drop for SweepGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

/// Timer loop driving [`EmailService::process_queue`]
///
/// Holds only a weak reference so a dropped service ends the loop.
pub(super) async fn serve(
    inner: Weak<Inner>,
    interval: Duration,
    mut shutdown: broadcast::Receiver<Signal>,
) {
    let mut timer = tokio::time::interval(interval);
    timer.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

    // Skip the first tick to avoid immediate execution
    timer.tick().await;

    loop {
        tokio::select! {
            _ = timer.tick() => {
                let Some(inner) = inner.upgrade() else {
                    internal!("Email service dropped, queue processing exiting");
                    break;
                };

                let service = EmailService { inner };
                match service.process_queue().await {
                    Ok(report) if report.due > 0 => {
                        info!(
                            due = report.due,
                            sent = report.sent,
                            rescheduled = report.rescheduled,
                            dropped = report.dropped,
                            deferred = report.deferred,
                            unsaved = report.unsaved,
                            "Processed retry queue"
                        );
                    }
                    Ok(_) => debug!("Processed retry queue, nothing due"),
                    Err(e) => error!(error = %e, "Error processing retry queue"),
                }
            }
            sig = shutdown.recv() => {
                match sig {
                    Ok(Signal::Shutdown | Signal::Finalised) => {
                        internal!("Queue processing received shutdown signal");
                    }
                    Err(e) => {
                        error!(error = %e, "Queue processing shutdown channel error");
                    }
                }
                break;
            }
        }
    }
}

impl EmailService {
    /// Retry every queued entry that is due, once
    ///
    /// Due entries are retried in parallel, up to `max_concurrent_retries` at
    /// a time. Sweeps never overlap: a call made while another sweep is in
    /// progress returns an empty report.
    ///
    /// # Errors
    /// If the queue cannot be read
    pub async fn process_queue(&self) -> Result<SweepReport, QueueError> {
        let inner = &self.inner;

        if inner
            .sweeping
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            debug!("Queue sweep already in progress, skipping");
            return Ok(SweepReport::default());
        }
        let _guard = SweepGuard(&inner.sweeping);

        let now = SystemTime::now();
        let mut due = inner
            .queue
            .get_all()
            .await?
            .into_iter()
            .filter(|message| message.is_due(now));

        let mut report = SweepReport::default();
        let mut in_flight: JoinSet<Outcome> = JoinSet::new();
        let mut count = 0;

        // Spawn the initial batch, then one more as each task completes
        for message in due.by_ref().take(inner.config.max_concurrent_retries) {
            let service = self.clone();
            in_flight.spawn(async move { service.retry_entry(message).await });
            count += 1;
        }

        while let Some(joined) = in_flight.join_next().await {
            match joined {
                Ok(outcome) => report.record(outcome),
                Err(e) => error!(error = %e, "Queue retry task failed"),
            }

            if let Some(message) = due.next() {
                let service = self.clone();
                in_flight.spawn(async move { service.retry_entry(message).await });
                count += 1;
            }
        }

        report.due = count;
        self.refresh_queue_size().await;

        Ok(report)
    }

    /// Re-dispatch one queued entry under its original id
    ///
    /// The cached result for the id is replaced with the outcome of this round.
    async fn retry_entry(&self, mut message: QueuedMessage) -> Outcome {
        let inner = &self.inner;

        if !inner.rate_limiter.allow_request() {
            debug!(request_id = %message.id, "Rate limited, deferring queued retry");
            inner.metrics.record_rate_limited();
            return Outcome::Deferred;
        }

        inner.stats.record_request();

        let source = match self.dispatch(&message.id, &message.request).await {
            Ok(result) => {
                inner.stats.record_success();
                if let Err(e) = inner.queue.remove(&message.id).await {
                    error!(request_id = %message.id, error = %e, "Failed to remove sent message from queue");
                }
                info!(
                    request_id = %message.id,
                    queued_attempts = message.attempts,
                    "Queued message sent"
                );
                inner.cache.store_response(&message.id, result);
                return Outcome::Sent;
            }
            Err(source) => source,
        };

        inner.stats.record_failure();
        message.attempts = message.attempts.saturating_add(1);
        let raw = source.raw_message();
        message.last_error = Some(raw.clone());

        let normalized = ErrorNormalizer::normalize(&raw, source.provider(), source.code());

        if message.attempts >= inner.retry.max_attempts() {
            if let Err(e) = inner.queue.remove(&message.id).await {
                error!(request_id = %message.id, error = %e, "Failed to remove exhausted message from queue");
            }
            inner.stats.record_dropped();
            inner.metrics.record_failed(&normalized.category.to_string());
            error!(
                request_id = %message.id,
                attempts = message.attempts,
                category = %normalized.category,
                error = %raw,
                "Queued message exhausted its retries, dropping"
            );

            inner.cache.store_response(
                &message.id,
                SendResult::failure(
                    message.id.clone(),
                    SendStatus::Failed,
                    source.attempts(),
                    raw,
                    normalized,
                ),
            );
            return Outcome::Dropped;
        }

        message.next_retry = inner.retry.next_retry_time(message.attempts);
        let id = message.id.clone();
        let attempts = message.attempts;

        match inner.queue.update(message).await {
            Ok(()) => {}
            Err(QueueError::NotFound(_)) => {
                debug!(request_id = %id, "Queued message removed during retry");
                return Outcome::Gone;
            }
            Err(e) => {
                error!(request_id = %id, error = %e, "Failed to reschedule queued message");
                return Outcome::Unsaved;
            }
        }

        warn!(
            request_id = %id,
            attempts,
            error = %raw,
            "Queued message failed again, rescheduled"
        );

        inner.cache.store_response(
            &id,
            SendResult::failure(
                id.clone(),
                SendStatus::Retrying,
                source.attempts(),
                raw,
                normalized,
            ),
        );
        Outcome::Rescheduled
    }
}
