//! NOT_ENOUGH_MINTS retry policies
//!
//! The pipeline asks the policy what to do every time a computation reports
//! that the anonymity set is still too small.

use crate::config::{RetryConfig, RetryPolicyKind};
use lightwit_core::{PeerId, RequestId, WitnessRequest};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;

/// What to do with a request that hit NOT_ENOUGH_MINTS
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RetryDecision {
    /// Put it back at the tail of the queue
    Requeue,
    /// Give up and reject with NOT_ENOUGH_MINTS
    Reject,
}

/// Retry policy consulted by the request pipeline
pub trait RetryPolicy: Send + Sync {
    /// Decide the fate of a request whose computation found too few mints
    fn on_not_enough_mints(&self, request: &WitnessRequest) -> RetryDecision;

    /// The request reached a terminal outcome
    fn forget(&self, _request: &WitnessRequest) {}

    /// Drop all per-request state; the worker calls this when it stops
    fn reset(&self) {}
}

/// Requeue forever. Relies on chain height never going backwards.
#[derive(Clone, Copy, Debug, Default)]
pub struct UnboundedRetry;

impl RetryPolicy for UnboundedRetry {
    fn on_not_enough_mints(&self, _request: &WitnessRequest) -> RetryDecision {
        RetryDecision::Requeue
    }
}

/// Requeue until a request has failed `max_attempts` times, then reject.
///
/// Attempts are keyed by peer id and request id. Two queued requests from
/// the same peer that reuse a request id share one budget, the same way a
/// peer would see their replies as answers to one request.
#[derive(Debug)]
pub struct CappedRetry {
    max_attempts: u32,
    attempts: Mutex<HashMap<(PeerId, RequestId), u32>>,
}

impl CappedRetry {
    pub fn new(max_attempts: u32) -> Self {
        Self {
            max_attempts,
            attempts: Mutex::new(HashMap::new()),
        }
    }

    /// Attempts recorded for a request still in flight
    pub fn attempts(&self, request: &WitnessRequest) -> u32 {
        self.attempts
            .lock()
            .get(&key(request))
            .copied()
            .unwrap_or(0)
    }
}

fn key(request: &WitnessRequest) -> (PeerId, RequestId) {
    (request.peer().id, request.request_id())
}

impl RetryPolicy for CappedRetry {
    fn on_not_enough_mints(&self, request: &WitnessRequest) -> RetryDecision {
        let mut attempts = self.attempts.lock();
        let count = attempts.entry(key(request)).or_insert(0);
        *count += 1;
        if *count >= self.max_attempts {
            attempts.remove(&key(request));
            RetryDecision::Reject
        } else {
            RetryDecision::Requeue
        }
    }

    fn forget(&self, request: &WitnessRequest) {
        self.attempts.lock().remove(&key(request));
    }

    fn reset(&self) {
        self.attempts.lock().clear();
    }
}

/// Build the policy selected by configuration
pub fn from_config(config: &RetryConfig) -> Arc<dyn RetryPolicy> {
    match config.policy {
        RetryPolicyKind::Unbounded => Arc::new(UnboundedRetry),
        RetryPolicyKind::Capped => Arc::new(CappedRetry::new(config.max_attempts)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use lightwit_core::{BigNum, Denomination, PeerHandle, WitnessFilter};

    fn request(peer: u64, id: u32) -> WitnessRequest {
        WitnessRequest::new(
            RequestId(id),
            100,
            Denomination::Ten,
            WitnessFilter::match_all(),
            BigNum::from_u64(1),
            PeerHandle::new(peer, "127.0.0.1:12700"),
        )
        .unwrap()
    }

    #[test]
    fn test_unbounded_always_requeues() {
        let policy = UnboundedRetry;
        let r = request(1, 1);
        for _ in 0..1000 {
            assert_eq!(policy.on_not_enough_mints(&r), RetryDecision::Requeue);
        }
    }

    #[test]
    fn test_capped_rejects_on_last_attempt() {
        let policy = CappedRetry::new(3);
        let r = request(1, 1);
        assert_eq!(policy.on_not_enough_mints(&r), RetryDecision::Requeue);
        assert_eq!(policy.on_not_enough_mints(&r), RetryDecision::Requeue);
        assert_eq!(policy.attempts(&r), 2);
        assert_eq!(policy.on_not_enough_mints(&r), RetryDecision::Reject);
        assert_eq!(policy.attempts(&r), 0);
    }

    #[test]
    fn test_capped_counts_per_peer_and_request() {
        let policy = CappedRetry::new(2);
        let a = request(1, 7);
        let b = request(2, 7);
        assert_eq!(policy.on_not_enough_mints(&a), RetryDecision::Requeue);
        assert_eq!(policy.on_not_enough_mints(&b), RetryDecision::Requeue);
        assert_eq!(policy.attempts(&a), 1);
        assert_eq!(policy.attempts(&b), 1);

        policy.forget(&a);
        assert_eq!(policy.attempts(&a), 0);
        assert_eq!(policy.on_not_enough_mints(&b), RetryDecision::Reject);
    }

    #[test]
    fn test_capped_shares_budget_for_reused_id() {
        let policy = CappedRetry::new(2);
        let first = request(3, 9);
        let second = request(3, 9);
        assert_eq!(policy.on_not_enough_mints(&first), RetryDecision::Requeue);
        assert_eq!(policy.on_not_enough_mints(&second), RetryDecision::Reject);
    }

    #[test]
    fn test_reset_clears_all_counters() {
        let policy = CappedRetry::new(5);
        let a = request(1, 1);
        let b = request(2, 2);
        policy.on_not_enough_mints(&a);
        policy.on_not_enough_mints(&b);
        policy.on_not_enough_mints(&b);

        policy.reset();
        assert_eq!(policy.attempts(&a), 0);
        assert_eq!(policy.attempts(&b), 0);
    }

    #[test]
    fn test_from_config() {
        let config = RetryConfig {
            policy: RetryPolicyKind::Capped,
            max_attempts: 1,
        };
        let policy = from_config(&config);
        assert_eq!(
            policy.on_not_enough_mints(&request(1, 1)),
            RetryDecision::Reject
        );

        let policy = from_config(&RetryConfig::default());
        assert_eq!(
            policy.on_not_enough_mints(&request(1, 1)),
            RetryDecision::Requeue
        );
    }
}
