//! Shared cap on simultaneous external model calls.

use std::sync::Arc;

use tokio::sync::{AcquireError, OwnedSemaphorePermit, Semaphore};

/// Bounded concurrency limiter shared by all document pipelines.
///
/// Cloning shares the same permits.
#[derive(Debug, Clone)]
pub struct ExternalCallLimiter {
    semaphore: Arc<Semaphore>,
    capacity: usize,
}

impl ExternalCallLimiter {
    /// Create a limiter with `capacity` permits (at least one)
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            semaphore: Arc::new(Semaphore::new(capacity)),
            capacity,
        }
    }

    /// Wait for a permit; the call slot is released when the permit drops
    pub async fn acquire(&self) -> Result<OwnedSemaphorePermit, AcquireError> {
        Arc::clone(&self.semaphore).acquire_owned().await
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Permits not currently held
    pub fn available(&self) -> usize {
        self.semaphore.available_permits()
    }
}
