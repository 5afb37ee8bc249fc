//! Outbound dispatch queue — the reliability core.
//!
//! Any number of producer tasks enqueue jobs without blocking; a single
//! worker drains them in order, which is what preserves per-destination
//! ordering on the happy path. The worker enforces a flat minimum spacing
//! between consecutive sends (proactive rate limiting) and absorbs provider
//! 429s with an exponential backoff: a rate-limited job is re-enqueued by a
//! spawned timer task rather than by sleeping the worker, so later queued
//! jobs keep flowing while a retry waits. A retried job therefore re-enters
//! at the back of the queue and may be overtaken by newer same-destination
//! jobs — accepted ordering relaxation under failure.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{Instant, sleep};

use crate::config::DispatchConfig;
use crate::error::TransportError;

/// Pluggable "send body to destination" collaborator.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn deliver(&self, destination: &str, body: &str) -> Result<(), TransportError>;
}

/// One unit of outbound work. Consumed once per attempt; re-enqueued with
/// `attempt + 1` on a retryable failure.
#[derive(Debug, Clone)]
pub struct OutboundJob {
    pub destination: String,
    pub body: String,
    pub attempt: u32,
    pub enqueued_at: DateTime<Utc>,
}

impl OutboundJob {
    fn new(destination: String, body: String) -> Self {
        Self {
            destination,
            body,
            attempt: 0,
            enqueued_at: Utc::now(),
        }
    }

    fn next_attempt(mut self) -> Self {
        self.attempt += 1;
        self
    }
}

/// Cloneable producer handle. Enqueueing never blocks and never fails while
/// the worker is alive; once every handle is dropped the worker drains what
/// is left and exits.
#[derive(Clone)]
pub struct DispatchQueue {
    tx: mpsc::UnboundedSender<OutboundJob>,
}

impl DispatchQueue {
    /// Spawn the dispatch worker and hand back the producer side plus the
    /// worker's join handle for graceful shutdown.
    pub fn start(
        transport: Arc<dyn Transport>,
        config: DispatchConfig,
    ) -> (Self, JoinHandle<()>) {
        let (tx, rx) = mpsc::unbounded_channel();
        // Retry timers hold only a weak sender: pending retries keep the
        // worker alive only as long as some producer handle still exists.
        let retry_tx = tx.downgrade();
        let handle = tokio::spawn(run_worker(rx, retry_tx, transport, config));
        (Self { tx }, handle)
    }

    pub fn enqueue(&self, destination: impl Into<String>, body: impl Into<String>) {
        let job = OutboundJob::new(destination.into(), body.into());
        if self.tx.send(job).is_err() {
            tracing::warn!("dispatch worker is gone; dropping outbound message");
        }
    }

    pub fn is_accepting(&self) -> bool {
        !self.tx.is_closed()
    }
}

async fn run_worker(
    mut rx: mpsc::UnboundedReceiver<OutboundJob>,
    retry_tx: mpsc::WeakUnboundedSender<OutboundJob>,
    transport: Arc<dyn Transport>,
    config: DispatchConfig,
) {
    let spacing = config.send_spacing();
    let mut last_send: Option<Instant> = None;

    while let Some(job) = rx.recv().await {
        if let Some(prev) = last_send {
            let elapsed = prev.elapsed();
            if elapsed < spacing {
                sleep(spacing - elapsed).await;
            }
        }
        last_send = Some(Instant::now());

        match transport.deliver(&job.destination, &job.body).await {
            Ok(()) => {
                let queued_ms = (Utc::now() - job.enqueued_at).num_milliseconds();
                tracing::info!(
                    destination = %job.destination,
                    attempt = job.attempt,
                    queued_ms,
                    "delivered outbound message"
                );
            }
            Err(TransportError::RateLimited { retry_after }) => {
                if job.attempt < config.max_retries {
                    // Prefer the provider's own hint; fall back to
                    // exponential backoff on the attempt count.
                    let delay = retry_after.unwrap_or_else(|| {
                        config.backoff_base() * 2u32.saturating_pow(job.attempt)
                    });
                    tracing::warn!(
                        destination = %job.destination,
                        attempt = job.attempt,
                        delay_ms = delay.as_millis() as u64,
                        "rate limited; scheduling retry"
                    );
                    let retry_tx = retry_tx.clone();
                    let job = job.next_attempt();
                    tokio::spawn(async move {
                        sleep(delay).await;
                        if let Some(tx) = retry_tx.upgrade() {
                            let _ = tx.send(job);
                        }
                    });
                } else {
                    tracing::error!(
                        destination = %job.destination,
                        attempts = job.attempt + 1,
                        "dropping message: rate limited on every attempt"
                    );
                }
            }
            Err(e) => {
                tracing::error!(
                    destination = %job.destination,
                    attempt = job.attempt,
                    "dropping message: {e}"
                );
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::time::Duration;

    /// Transport that rate-limits the first `rate_limit_first` calls, then
    /// delivers, recording everything that got through.
    struct FlakyTransport {
        rate_limit_first: u32,
        calls: AtomicU32,
        delivered: Mutex<Vec<(String, String)>>,
    }

    impl FlakyTransport {
        fn new(rate_limit_first: u32) -> Self {
            Self {
                rate_limit_first,
                calls: AtomicU32::new(0),
                delivered: Mutex::new(Vec::new()),
            }
        }

        fn delivered(&self) -> Vec<(String, String)> {
            self.delivered.lock().unwrap().clone()
        }

        fn call_count(&self) -> u32 {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl Transport for FlakyTransport {
        async fn deliver(&self, destination: &str, body: &str) -> Result<(), TransportError> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst);
            if call < self.rate_limit_first {
                return Err(TransportError::RateLimited { retry_after: None });
            }
            self.delivered
                .lock()
                .unwrap()
                .push((destination.to_owned(), body.to_owned()));
            Ok(())
        }
    }

    struct RejectingTransport {
        calls: AtomicU32,
    }

    #[async_trait]
    impl Transport for RejectingTransport {
        async fn deliver(&self, _destination: &str, _body: &str) -> Result<(), TransportError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Err(TransportError::Rejected {
                status: 400,
                message: "invalid To number".into(),
            })
        }
    }

    fn fast_config(max_retries: u32) -> DispatchConfig {
        DispatchConfig {
            max_retries,
            backoff_base_ms: 5,
            send_spacing_ms: 0,
            send_timeout_secs: 10,
        }
    }

    async fn wait_until(mut condition: impl FnMut() -> bool) {
        for _ in 0..300 {
            if condition() {
                return;
            }
            sleep(Duration::from_millis(10)).await;
        }
        panic!("condition not reached within 3s");
    }

    #[tokio::test]
    async fn delivers_same_destination_jobs_in_enqueue_order() {
        let transport = Arc::new(FlakyTransport::new(0));
        let (queue, handle) = DispatchQueue::start(transport.clone(), fast_config(5));

        queue.enqueue("whatsapp:+1555", "chunk 1");
        queue.enqueue("whatsapp:+1555", "chunk 2");
        queue.enqueue("whatsapp:+1555", "chunk 3");
        drop(queue);
        handle.await.unwrap();

        assert_eq!(
            transport
                .delivered()
                .iter()
                .map(|(_, body)| body.as_str())
                .collect::<Vec<_>>(),
            vec!["chunk 1", "chunk 2", "chunk 3"]
        );
    }

    #[tokio::test]
    async fn rate_limited_then_success_delivers_exactly_once() {
        let transport = Arc::new(FlakyTransport::new(2));
        let (queue, _handle) = DispatchQueue::start(transport.clone(), fast_config(5));

        queue.enqueue("whatsapp:+1555", "eventually");
        wait_until(|| !transport.delivered().is_empty()).await;

        assert_eq!(
            transport.delivered(),
            vec![("whatsapp:+1555".to_owned(), "eventually".to_owned())]
        );
        assert_eq!(transport.call_count(), 3);
    }

    #[tokio::test]
    async fn rate_limited_past_ceiling_is_dropped() {
        let transport = Arc::new(FlakyTransport::new(u32::MAX));
        let (queue, _handle) = DispatchQueue::start(transport.clone(), fast_config(2));

        queue.enqueue("whatsapp:+1555", "doomed");
        // Initial attempt plus two retries, then the job is dropped.
        wait_until(|| transport.call_count() == 3).await;
        sleep(Duration::from_millis(60)).await;

        assert_eq!(transport.call_count(), 3);
        assert!(transport.delivered().is_empty());
    }

    #[tokio::test]
    async fn permanent_failure_is_never_retried() {
        let transport = Arc::new(RejectingTransport {
            calls: AtomicU32::new(0),
        });
        let (queue, handle) = DispatchQueue::start(transport.clone(), fast_config(5));

        queue.enqueue("whatsapp:+1555", "bad number");
        drop(queue);
        handle.await.unwrap();

        assert_eq!(transport.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn interleaved_destinations_keep_bodies_intact() {
        let transport = Arc::new(FlakyTransport::new(0));
        let (queue, handle) = DispatchQueue::start(transport.clone(), fast_config(5));

        for i in 0..5 {
            queue.enqueue("whatsapp:+1111", format!("to alice {i}"));
            queue.enqueue("whatsapp:+2222", format!("to bob {i}"));
        }
        drop(queue);
        handle.await.unwrap();

        let delivered = transport.delivered();
        assert_eq!(delivered.len(), 10);
        for (destination, body) in &delivered {
            match destination.as_str() {
                "whatsapp:+1111" => assert!(body.starts_with("to alice ")),
                "whatsapp:+2222" => assert!(body.starts_with("to bob ")),
                other => panic!("unexpected destination {other}"),
            }
        }
    }

    #[tokio::test]
    async fn send_spacing_is_enforced_between_consecutive_sends() {
        let transport = Arc::new(FlakyTransport::new(0));
        let config = DispatchConfig {
            send_spacing_ms: 50,
            ..fast_config(5)
        };
        let (queue, handle) = DispatchQueue::start(transport.clone(), config);

        let started = std::time::Instant::now();
        queue.enqueue("whatsapp:+1555", "a");
        queue.enqueue("whatsapp:+1555", "b");
        queue.enqueue("whatsapp:+1555", "c");
        drop(queue);
        handle.await.unwrap();

        // Two gaps of at least 50ms each between three sends.
        assert!(started.elapsed() >= Duration::from_millis(100));
        assert_eq!(transport.delivered().len(), 3);
    }

    #[tokio::test]
    async fn worker_drains_and_exits_when_producers_drop() {
        let transport = Arc::new(FlakyTransport::new(0));
        let (queue, handle) = DispatchQueue::start(transport.clone(), fast_config(5));

        queue.enqueue("whatsapp:+1555", "last words");
        assert!(queue.is_accepting());
        drop(queue);

        tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .expect("worker did not exit after drain")
            .unwrap();
        assert_eq!(transport.delivered().len(), 1);
    }
}
