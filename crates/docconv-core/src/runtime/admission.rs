use std::sync::Arc;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};

use crate::runtime::types::ConversionError;

/// RAII guard that releases a conversion slot when dropped.
///
/// Callers must hold this until the engine process has exited.
pub struct Permit {
    /// Owned permit; dropping this struct releases it back to the semaphore.
    #[allow(dead_code)]
    permit: OwnedSemaphorePermit,
}

impl std::fmt::Debug for Permit {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Permit").finish()
    }
}

/// Bounds how many engine processes run at the same time.
///
/// Unlike a reject-when-full admission gate, [`Self::acquire`] queues the
/// caller until a slot frees up; the job timeout still only starts once the
/// process is spawned.
#[derive(Debug, Clone)]
pub struct ConversionLimiter {
    semaphore: Arc<Semaphore>,
    capacity: usize,
}

impl ConversionLimiter {
    /// Create a limiter with `capacity` slots (at least one).
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            semaphore: Arc::new(Semaphore::new(capacity)),
            capacity,
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Slots currently free.
    pub fn available(&self) -> usize {
        self.semaphore.available_permits()
    }

    /// Wait for a free slot.
    pub async fn acquire(&self) -> Result<Permit, ConversionError> {
        Arc::clone(&self.semaphore)
            .acquire_owned()
            .await
            .map(|permit| Permit { permit })
            .map_err(|e| ConversionError::Io {
                context: "conversion limiter".to_owned(),
                message: e.to_string(),
            })
    }

    /// Take a slot only if one is free right now.
    pub fn try_acquire(&self) -> Option<Permit> {
        Arc::clone(&self.semaphore)
            .try_acquire_owned()
            .ok()
            .map(|permit| Permit { permit })
    }
}
