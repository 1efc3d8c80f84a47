//! Admission control for heavy pipeline jobs
//!
//! A non-blocking gate over a fixed number of slots. Callers are never queued: when
//! every slot is held the request is rejected with [`JobError::CapacityExceeded`].
//! A granted [`AdmissionSlot`] gives its slot back when dropped.

use std::sync::Arc;
use tokio::sync::{OwnedSemaphorePermit, Semaphore, TryAcquireError};

use crate::error::JobError;

pub struct AdmissionGate {
    semaphore: Arc<Semaphore>,
    capacity: usize,
}

impl AdmissionGate {
    pub fn new(capacity: usize) -> Self {
        Self {
            semaphore: Arc::new(Semaphore::new(capacity)),
            capacity,
        }
    }

    /// Take a slot without waiting
    pub fn try_acquire(&self) -> Result<AdmissionSlot, JobError> {
        match Arc::clone(&self.semaphore).try_acquire_owned() {
            Ok(permit) => Ok(AdmissionSlot { _permit: permit }),
            Err(TryAcquireError::NoPermits) => Err(JobError::CapacityExceeded),
            Err(TryAcquireError::Closed) => {
                Err(JobError::Internal("admission gate closed".to_string()))
            }
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn available(&self) -> usize {
        self.semaphore.available_permits()
    }

    pub fn in_use(&self) -> usize {
        self.capacity - self.available()
    }
}

/// One held unit of concurrent pipeline execution
#[derive(Debug)]
pub struct AdmissionSlot {
    _permit: OwnedSemaphorePermit,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rejects_beyond_capacity() {
        let gate = AdmissionGate::new(2);
        let first = gate.try_acquire().unwrap();
        let _second = gate.try_acquire().unwrap();
        assert_eq!(gate.in_use(), 2);

        assert_eq!(gate.try_acquire().unwrap_err(), JobError::CapacityExceeded);

        drop(first);
        assert_eq!(gate.available(), 1);
        assert!(gate.try_acquire().is_ok());
    }

    #[tokio::test]
    async fn test_slot_released_when_task_fails() {
        let gate = Arc::new(AdmissionGate::new(1));

        let slot = gate.try_acquire().unwrap();
        let result = tokio::spawn(async move {
            let _slot = slot;
            Err::<(), JobError>(JobError::ExtractionFailure("boom".into()))
        })
        .await
        .unwrap();

        assert!(result.is_err());
        assert_eq!(gate.in_use(), 0);
    }
}
