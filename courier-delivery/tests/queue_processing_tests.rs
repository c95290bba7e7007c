//! Integration tests for the retry queue sweep

mod support;

use std::{sync::Arc, time::Duration};

use async_trait::async_trait;
use courier_delivery::{
    EmailProvider, EmailService, ErrorCategory, MemoryQueue, MockBehaviour, MockProvider,
    QueueConfig, QueueError, QueuedMessage, RetryQueue, SendStatus, SweepReport,
};
use pretty_assertions::assert_eq;
use support::{failing, fast_config, request, service, succeeding, wait_until_due};

#[tokio::test]
async fn test_sweep_sends_due_entry() {
    let provider = failing("primary", "503 Service Unavailable");
    let service = service(fast_config(), &[&provider]);

    let err = service
        .send_email(request(1), Some("order-1".to_string()))
        .await
        .unwrap_err();
    assert_eq!(err.result.status, SendStatus::Queued);

    provider.set_behaviour(MockBehaviour::Succeed);
    wait_until_due().await;

    let report = service.process_queue().await.unwrap();
    assert_eq!(
        report,
        SweepReport {
            due: 1,
            sent: 1,
            ..SweepReport::default()
        }
    );
    assert_eq!(service.queue().size().await.unwrap(), 0);

    // The cached result now reflects the delivery
    let cached = service
        .send_email(request(1), Some("order-1".to_string()))
        .await
        .unwrap();
    assert_eq!(cached.status, SendStatus::Sent);
    assert_eq!(cached.provider.as_deref(), Some("primary"));
    assert_eq!(provider.calls(), 4);
}

#[tokio::test]
async fn test_sweep_reschedules_then_drops() {
    let provider = failing("primary", "connection refused");
    let service = service(fast_config(), &[&provider]);

    service
        .send_email(request(1), Some("order-1".to_string()))
        .await
        .unwrap_err();

    wait_until_due().await;
    let report = service.process_queue().await.unwrap();
    assert_eq!(report.rescheduled, 1);

    let queued = service.queue().get_all().await.unwrap();
    assert_eq!(queued.len(), 1);
    assert_eq!(queued[0].attempts, 2);
    assert_eq!(
        service.cache().get_response("order-1").map(|r| r.status),
        Some(SendStatus::Retrying)
    );

    wait_until_due().await;
    let report = service.process_queue().await.unwrap();
    assert_eq!(report.dropped, 1);
    assert_eq!(service.queue().size().await.unwrap(), 0);

    let cached = service.cache().get_response("order-1").unwrap();
    assert_eq!(cached.status, SendStatus::Failed);
    assert_eq!(cached.error.as_deref(), Some("connection refused"));

    let metrics = service.metrics();
    assert_eq!(metrics.queued, 1);
    assert_eq!(metrics.dropped, 1);

    // Three rounds of three attempts each
    assert_eq!(provider.calls(), 9);
}

/// A queue whose entries can be added and removed but never rewritten
#[derive(Debug, Default)]
struct NoUpdateQueue(MemoryQueue);

#[async_trait]
impl RetryQueue for NoUpdateQueue {
    async fn push(&self, message: QueuedMessage) -> Result<(), QueueError> {
        self.0.push(message).await
    }

    async fn pop(&self) -> Result<Option<QueuedMessage>, QueueError> {
        self.0.pop().await
    }

    async fn peek(&self) -> Result<Option<QueuedMessage>, QueueError> {
        self.0.peek().await
    }

    async fn get_all(&self) -> Result<Vec<QueuedMessage>, QueueError> {
        self.0.get_all().await
    }

    async fn remove(&self, id: &str) -> Result<Option<QueuedMessage>, QueueError> {
        self.0.remove(id).await
    }

    async fn update(&self, _message: QueuedMessage) -> Result<(), QueueError> {
        Err(QueueError::Internal("storage is read-only".to_string()))
    }

    async fn size(&self) -> Result<usize, QueueError> {
        self.0.size().await
    }
}

#[tokio::test]
async fn test_failed_reschedule_is_reported_separately() {
    let provider = failing("primary", "connection refused");
    let queue = Arc::new(NoUpdateQueue::default());
    let service = EmailService::builder(fast_config())
        .provider(provider.clone())
        .queue(queue.clone())
        .build()
        .unwrap();

    service
        .send_email(request(1), Some("order-1".to_string()))
        .await
        .unwrap_err();
    wait_until_due().await;

    let report = service.process_queue().await.unwrap();
    assert_eq!(
        report,
        SweepReport {
            due: 1,
            unsaved: 1,
            ..SweepReport::default()
        }
    );

    // The entry keeps its old schedule and the cache is not told otherwise
    let queued = queue.get_all().await.unwrap();
    assert_eq!(queued.len(), 1);
    assert_eq!(queued[0].attempts, 1);
    assert_eq!(
        service.cache().get_response("order-1").map(|r| r.status),
        Some(SendStatus::Queued)
    );
}

#[tokio::test]
async fn test_entry_pushed_mid_sweep_is_kept() {
    let provider = Arc::new(
        MockProvider::failing_times("primary", 1, "timeout")
            .with_latency(Duration::from_millis(50)),
    );
    let mut config = fast_config();
    config.retry.max_attempts = 1;
    let service = service(config, &[&provider]);

    service
        .send_email(request(1), Some("order-1".to_string()))
        .await
        .unwrap_err();
    wait_until_due().await;

    let sweep = tokio::spawn({
        let service = service.clone();
        async move { service.process_queue().await }
    });

    // The sweep is now waiting on the provider
    tokio::time::sleep(Duration::from_millis(10)).await;
    service
        .queue()
        .push(QueuedMessage::new(
            "order-2".to_string(),
            request(2),
            Duration::from_secs(3600),
            "timeout".to_string(),
        ))
        .await
        .unwrap();

    let report = sweep.await.unwrap().unwrap();
    assert_eq!(report.due, 1);
    assert_eq!(report.sent, 1);

    let ids: Vec<_> = service
        .queue()
        .get_all()
        .await
        .unwrap()
        .into_iter()
        .map(|m| m.id)
        .collect();
    assert_eq!(ids, vec!["order-2".to_string()]);
}

#[tokio::test]
async fn test_dropped_entry_is_classified_by_provider_code() {
    let provider = Arc::new(
        MockProvider::always_failing("coded", "Request rejected").with_error_code("550"),
    );
    let mut config = fast_config();
    config.retry.max_attempts = 2;
    let service = service(config, &[&provider]);

    service
        .send_email(request(1), Some("order-1".to_string()))
        .await
        .unwrap_err();
    wait_until_due().await;

    let report = service.process_queue().await.unwrap();
    assert_eq!(report.dropped, 1);

    let cached = service.cache().get_response("order-1").unwrap();
    assert_eq!(cached.status, SendStatus::Failed);
    let normalized = cached.normalized.expect("classified");
    assert_eq!(normalized.category, ErrorCategory::Recipient);
    assert_eq!(normalized.code.as_deref(), Some("550"));
}

#[tokio::test]
async fn test_sweep_leaves_entries_that_are_not_due() {
    let provider = succeeding("primary");
    let queue = Arc::new(MemoryQueue::new());
    queue
        .push(QueuedMessage::new(
            "later".to_string(),
            request(1),
            Duration::from_secs(3600),
            "timeout".to_string(),
        ))
        .await
        .unwrap();

    let service = EmailService::builder(fast_config())
        .provider(provider.clone())
        .queue(queue.clone())
        .build()
        .unwrap();

    let report = service.process_queue().await.unwrap();

    assert_eq!(report, SweepReport::default());
    assert_eq!(provider.calls(), 0);
    assert_eq!(queue.size().await.unwrap(), 1);
}

#[tokio::test]
async fn test_sweep_defers_when_rate_limited() {
    let provider = failing("primary", "timeout");
    let mut config = fast_config();
    config.rate_limit.max_requests = 1;
    config.rate_limit.window_ms = 60_000;
    let service = service(config, &[&provider]);

    service
        .send_email(request(1), Some("order-1".to_string()))
        .await
        .unwrap_err();
    wait_until_due().await;

    let report = service.process_queue().await.unwrap();

    assert_eq!(report.due, 1);
    assert_eq!(report.deferred, 1);
    assert_eq!(provider.calls(), 3);

    let queued = service.queue().get_all().await.unwrap();
    assert_eq!(queued[0].attempts, 1);
}

#[tokio::test]
async fn test_sweeps_do_not_overlap() {
    let provider = Arc::new(
        MockProvider::failing_times("primary", 3, "timeout")
            .with_latency(Duration::from_millis(5)),
    );
    let service = service(fast_config(), &[&provider]);

    service.send_email(request(1), None).await.unwrap_err();
    wait_until_due().await;

    let (first, second) = tokio::join!(service.process_queue(), service.process_queue());
    let reports = [first.unwrap(), second.unwrap()];

    assert_eq!(reports.iter().map(|r| r.sent).sum::<usize>(), 1);
    assert!(reports.contains(&SweepReport::default()));
    assert_eq!(provider.calls(), 4);
}

#[tokio::test]
async fn test_bounded_concurrency_sends_everything() {
    let provider = failing("primary", "timeout");
    let mut config = fast_config();
    config.retry.max_attempts = 1;
    config.max_concurrent_retries = 2;
    let service = service(config, &[&provider]);

    for n in 0..5 {
        service.send_email(request(n), None).await.unwrap_err();
    }
    provider.set_behaviour(MockBehaviour::Succeed);
    wait_until_due().await;

    let report = service.process_queue().await.unwrap();

    assert_eq!(report.due, 5);
    assert_eq!(report.sent, 5);
    assert_eq!(service.queue().size().await.unwrap(), 0);
}

#[tokio::test]
async fn test_timer_drives_the_sweep() {
    let provider = failing("primary", "timeout");
    let service = service(fast_config(), &[&provider]);

    service
        .send_email(request(1), Some("order-1".to_string()))
        .await
        .unwrap_err();
    provider.set_behaviour(MockBehaviour::Succeed);

    assert!(service.start_queue_processing());
    assert!(service.is_processing_queue());

    tokio::time::sleep(Duration::from_millis(200)).await;
    service.shutdown().await;

    assert!(!service.is_processing_queue());
    assert_eq!(service.queue().size().await.unwrap(), 0);
    assert_eq!(
        service.cache().get_response("order-1").map(|r| r.status),
        Some(SendStatus::Sent)
    );
}

#[tokio::test]
async fn test_shutdown_is_idempotent_and_keeps_the_queue() {
    let provider = failing("primary", "timeout");
    let mut config = fast_config();
    config.queue_processing_interval_ms = 60_000;
    let service = service(config, &[&provider]);

    // Never started
    service.shutdown().await;

    service.send_email(request(1), None).await.unwrap_err();

    assert!(service.start_queue_processing());
    assert!(!service.start_queue_processing());

    service.shutdown().await;
    service.shutdown().await;

    assert!(!service.is_processing_queue());
    assert_eq!(service.queue().size().await.unwrap(), 1);

    // Can be started again after a shutdown
    assert!(service.start_queue_processing());
    service.shutdown().await;
}

#[test]
fn test_start_without_runtime() {
    let provider = succeeding("primary");
    let service = service(fast_config(), &[&provider]);

    assert!(!service.start_queue_processing());
    assert!(!service.is_processing_queue());
}

#[tokio::test]
async fn test_file_queue_survives_restart() {
    let dir = tempfile::tempdir().unwrap();
    let mut config = fast_config();
    config.queue = QueueConfig::File {
        path: dir.path().to_path_buf(),
    };

    {
        let provider = failing("primary", "503 Service Unavailable");
        let service = service(config.clone(), &[&provider]);
        let err = service
            .send_email(request(1), Some("order-1".to_string()))
            .await
            .unwrap_err();
        assert_eq!(err.result.status, SendStatus::Queued);
    }

    let provider = succeeding("secondary");
    let service = EmailService::builder(config)
        .provider(provider.clone() as Arc<dyn EmailProvider>)
        .build()
        .unwrap();

    let queued = service.queue_status().await.unwrap();
    assert_eq!(queued.length, 1);
    assert_eq!(queued.items[0].id, "order-1");

    wait_until_due().await;
    let report = service.process_queue().await.unwrap();

    assert_eq!(report.sent, 1);
    assert_eq!(provider.sent(), vec![request(1)]);
    assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
}
