//! Interim "still working" notice, raced against the conversation handler.
//!
//! The notifier sleeps, then checks the episode's completion signal exactly
//! once. If the handler already finished, nothing is sent. Completion a
//! moment after the check may still let the notice through — accepted
//! staleness, not a bug; there is no retroactive cancellation.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use tokio::time::sleep;

use crate::dispatch::DispatchQueue;

pub const INTERIM_NOTICE: &str = "Processing your message, one moment please...";

/// Single-use flag for one inbound-message episode. Set exactly once by the
/// conversation handler when it has finished enqueuing output.
#[derive(Clone, Default)]
pub struct CompletionSignal {
    done: Arc<AtomicBool>,
}

impl CompletionSignal {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&self) {
        self.done.store(true, Ordering::Release);
    }

    pub fn is_set(&self) -> bool {
        self.done.load(Ordering::Acquire)
    }
}

/// Sleep for `delay`, then enqueue one interim notice unless the handler
/// completed first.
pub async fn notify_if_slow(
    queue: DispatchQueue,
    destination: String,
    signal: CompletionSignal,
    delay: Duration,
) {
    sleep(delay).await;

    if signal.is_set() {
        return;
    }

    tracing::debug!(destination = %destination, "reply is slow; sending interim notice");
    queue.enqueue(destination, INTERIM_NOTICE);
}
