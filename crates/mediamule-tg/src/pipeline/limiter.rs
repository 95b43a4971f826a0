use crate::prelude::*;
use crate::Result;
use std::sync::Arc;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};

/// Counting gate that bounds the number of simultaneous calls to one
/// external service. Clones share the same slots.
#[derive(Clone, Debug)]
pub(crate) struct ConcurrencyLimiter {
    service: &'static str,
    capacity: usize,
    slots: Arc<Semaphore>,
}

/// Occupies one slot of the limiter until dropped
#[derive(Debug)]
pub(crate) struct Permit {
    service: &'static str,
    _permit: OwnedSemaphorePermit,
}

impl ConcurrencyLimiter {
    /// Capacity of zero would deadlock every caller, so it's bumped to one
    pub(crate) fn new(service: &'static str, capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            service,
            capacity,
            slots: Arc::new(Semaphore::new(capacity)),
        }
    }

    pub(crate) fn capacity(&self) -> usize {
        self.capacity
    }

    pub(crate) async fn acquire(&self) -> Result<Permit> {
        let permit = self
            .slots
            .clone()
            .acquire_owned()
            .await
            .fatal_ctx(|| format!("BUG: the limiter of {} was closed", self.service))?;

        metrics::increment_gauge!("acquisitions_in_flight", 1.0, "service" => self.service);

        Ok(Permit {
            service: self.service,
            _permit: permit,
        })
    }
}

impl Drop for Permit {
    fn drop(&mut self) {
        metrics::decrement_gauge!("acquisitions_in_flight", 1.0, "service" => self.service);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    #[tokio::test(start_paused = true)]
    async fn never_exceeds_capacity() {
        for capacity in [1, 2, 3] {
            let limiter = ConcurrencyLimiter::new("test", capacity);
            let active = AtomicUsize::new(0);
            let max_active = AtomicUsize::new(0);

            let tasks = (0..10).map(|i| {
                let limiter = &limiter;
                let active = &active;
                let max_active = &max_active;
                async move {
                    let _permit = limiter.acquire().await.unwrap();
                    let now = active.fetch_add(1, Ordering::SeqCst) + 1;
                    max_active.fetch_max(now, Ordering::SeqCst);
                    tokio::time::sleep(Duration::from_millis(10 + i * 3)).await;
                    active.fetch_sub(1, Ordering::SeqCst);
                }
            });

            futures::future::join_all(tasks).await;

            assert_eq!(max_active.load(Ordering::SeqCst), capacity);
            assert_eq!(active.load(Ordering::SeqCst), 0);
        }
    }

    #[tokio::test]
    async fn slot_is_released_on_cancellation() {
        let limiter = ConcurrencyLimiter::new("test", 1);

        let held = limiter.acquire().await.unwrap();
        let waiting = tokio::time::timeout(Duration::from_millis(10), limiter.acquire()).await;
        assert!(waiting.is_err());

        drop(held);

        let fut = async {
            let _permit = limiter.acquire().await.unwrap();
            std::future::pending::<()>().await;
        };
        let _ = tokio::time::timeout(Duration::from_millis(10), fut).await;

        // The cancelled future must have released its slot
        let _permit = limiter.acquire().await.unwrap();
    }

    #[test]
    fn zero_capacity_is_bumped() {
        assert_eq!(ConcurrencyLimiter::new("test", 0).capacity(), 1);
    }
}
