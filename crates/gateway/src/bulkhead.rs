//! Bulkhead bounding concurrent upstream calls.
//!
//! At most `max_concurrency` calls run at once. Excess callers wait in a
//! FIFO queue bounded by `queue_limit`; a caller that would overflow the
//! queue is rejected immediately, and a queued caller that is not
//! dispatched before `queue_timeout` fails with a queue timeout. The
//! permit is held for the whole logical call, attempts included.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use tokio::sync::{Semaphore, SemaphorePermit};
use tracing::debug;

use crate::errors::GatewayError;

/// A held concurrency slot. Dropping it frees the slot for the next
/// queued caller.
pub struct BulkheadPermit<'a> {
    _permit: SemaphorePermit<'a>,
}

struct WaitGuard<'a>(&'a AtomicUsize);

impl Drop for WaitGuard<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

/// Concurrency bound with a bounded FIFO wait queue.
#[derive(Debug)]
pub struct Bulkhead {
    semaphore: Semaphore,
    queue_limit: usize,
    queue_timeout: Duration,
    waiting: AtomicUsize,
}

impl Bulkhead {
    #[must_use]
    pub fn new(max_concurrency: usize, queue_limit: usize, queue_timeout: Duration) -> Self {
        Self {
            semaphore: Semaphore::new(max_concurrency),
            queue_limit,
            queue_timeout,
            waiting: AtomicUsize::new(0),
        }
    }

    /// Acquire a slot, queueing if none is free.
    ///
    /// # Errors
    ///
    /// - `GatewayError::QueueFull` if the wait queue is at capacity
    /// - `GatewayError::QueueTimeout` if no slot frees up in time
    pub async fn acquire(&self) -> Result<BulkheadPermit<'_>, GatewayError> {
        if let Ok(permit) = self.semaphore.try_acquire() {
            return Ok(BulkheadPermit { _permit: permit });
        }

        // Slots are busy; join the queue if there is room.
        if self.waiting.fetch_add(1, Ordering::SeqCst) >= self.queue_limit {
            self.waiting.fetch_sub(1, Ordering::SeqCst);
            debug!(target: "gateway.bulkhead", "Wait queue full, rejecting call");
            return Err(GatewayError::QueueFull);
        }
        let _guard = WaitGuard(&self.waiting);

        match tokio::time::timeout(self.queue_timeout, self.semaphore.acquire()).await {
            Ok(Ok(permit)) => Ok(BulkheadPermit { _permit: permit }),
            Ok(Err(_)) => Err(GatewayError::Unavailable(
                "bulkhead semaphore closed".to_string(),
            )),
            Err(_) => {
                debug!(target: "gateway.bulkhead", "Timed out waiting for a slot");
                Err(GatewayError::QueueTimeout)
            }
        }
    }

    /// Number of callers currently waiting for a slot.
    pub fn queue_depth(&self) -> usize {
        self.waiting.load(Ordering::SeqCst)
    }
}
