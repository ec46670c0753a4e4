//! Request/response correlation over validator connections.
//!
//! Every request carries a fresh correlation id; the matching response runs
//! the continuation stored for it exactly once. Responses for ids that are
//! unknown, already resolved or expired are ignored.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use futures::future::BoxFuture;
use tokio::sync::Mutex;
use tracing::debug;
use uuid::Uuid;

/// Work to run when the response for a request arrives
pub type Continuation<P> = Box<dyn FnOnce(P) -> BoxFuture<'static, ()> + Send>;

/// Entry stored under its correlation id
pub struct PendingRequest<P> {
    pub validator_id: Uuid,
    pub issued_at: Instant,
    continuation: Continuation<P>,
}

pub struct Correlator<P> {
    pending: Mutex<HashMap<String, PendingRequest<P>>>,
}

impl<P> Default for Correlator<P> {
    fn default() -> Self {
        Self { pending: Mutex::new(HashMap::new()) }
    }
}

impl<P: Send + 'static> Correlator<P> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store `continuation` under a new random 128-bit id and return the id.
    pub async fn create_pending(&self, validator_id: Uuid, continuation: Continuation<P>) -> String {
        let correlation_id = Uuid::new_v4().to_string();
        let request = PendingRequest {
            validator_id,
            issued_at: Instant::now(),
            continuation,
        };
        self.pending.lock().await.insert(correlation_id.clone(), request);
        correlation_id
    }

    /// Remove the entry for `correlation_id` and run its continuation.
    ///
    /// Returns false, doing nothing, when no entry exists.
    pub async fn resolve(&self, correlation_id: &str, payload: P) -> bool {
        let Some(request) = self.pending.lock().await.remove(correlation_id) else {
            debug!(correlation_id, "Ignoring response for unknown correlation id");
            return false;
        };

        (request.continuation)(payload).await;
        true
    }

    /// Forget a request without running it
    pub async fn cancel(&self, correlation_id: &str) -> bool {
        self.pending.lock().await.remove(correlation_id).is_some()
    }

    /// Drop requests older than `max_age`, returning how many were dropped
    pub async fn expire(&self, max_age: Duration) -> usize {
        match Instant::now().checked_sub(max_age) {
            Some(cutoff) => self.expire_issued_before(cutoff).await,
            None => 0,
        }
    }

    /// Drop requests issued at or before `cutoff`
    pub async fn expire_issued_before(&self, cutoff: Instant) -> usize {
        let mut pending = self.pending.lock().await;
        let before = pending.len();
        pending.retain(|_, request| request.issued_at > cutoff);
        before - pending.len()
    }

    /// Outstanding requests per validator
    pub async fn in_flight_counts(&self) -> HashMap<Uuid, usize> {
        let pending = self.pending.lock().await;
        let mut counts = HashMap::new();
        for request in pending.values() {
            *counts.entry(request.validator_id).or_insert(0) += 1;
        }
        counts
    }

    pub async fn len(&self) -> usize {
        self.pending.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::FutureExt;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn counting(counter: Arc<AtomicUsize>) -> Continuation<u32> {
        Box::new(move |payload| {
            async move {
                counter.fetch_add(payload as usize, Ordering::SeqCst);
            }
            .boxed()
        })
    }

    #[tokio::test]
    async fn test_resolve_runs_continuation_once() {
        let correlator = Correlator::new();
        let counter = Arc::new(AtomicUsize::new(0));
        let id = correlator.create_pending(Uuid::new_v4(), counting(counter.clone())).await;

        assert!(correlator.resolve(&id, 1).await);
        assert!(!correlator.resolve(&id, 1).await);

        assert_eq!(counter.load(Ordering::SeqCst), 1);
        assert!(correlator.is_empty().await);
    }

    #[tokio::test]
    async fn test_unknown_id_is_a_no_op() {
        let correlator: Correlator<u32> = Correlator::new();
        assert!(!correlator.resolve("never-issued", 5).await);
    }

    #[tokio::test]
    async fn test_ids_are_unique() {
        let correlator = Correlator::new();
        let counter = Arc::new(AtomicUsize::new(0));
        let validator = Uuid::new_v4();

        let a = correlator.create_pending(validator, counting(counter.clone())).await;
        let b = correlator.create_pending(validator, counting(counter.clone())).await;

        assert_ne!(a, b);
        assert_eq!(correlator.len().await, 2);
        assert_eq!(correlator.in_flight_counts().await[&validator], 2);
    }

    #[tokio::test]
    async fn test_expired_requests_never_resolve() {
        let correlator = Correlator::new();
        let counter = Arc::new(AtomicUsize::new(0));
        let id = correlator.create_pending(Uuid::new_v4(), counting(counter.clone())).await;

        assert_eq!(correlator.expire(Duration::from_secs(3600)).await, 0);
        assert_eq!(correlator.expire_issued_before(Instant::now()).await, 1);

        assert!(!correlator.resolve(&id, 1).await);
        assert_eq!(counter.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_cancel_drops_without_running() {
        let correlator = Correlator::new();
        let counter = Arc::new(AtomicUsize::new(0));
        let id = correlator.create_pending(Uuid::new_v4(), counting(counter.clone())).await;

        assert!(correlator.cancel(&id).await);
        assert!(!correlator.cancel(&id).await);
        assert!(!correlator.resolve(&id, 1).await);
        assert_eq!(counter.load(Ordering::SeqCst), 0);
    }
}
