//! # Request Pipeline
//!
//! Drives one witness request from dequeue to a terminal reply, or back onto
//! the queue.
//!
//! ```text
//! received ──► height resolved? ──no──► reject NON_DETERMINED
//!                   │ yes
//!                   ▼
//!              activated? ──────no──► reject NON_DETERMINED
//!                   │ yes
//!                   ▼
//!              compute ──► Computed ─────────► reply
//!                   ├────► NotEnoughMints ───► retry policy: requeue | reject
//!                   ├────► Failed ───────────► reject NON_DETERMINED
//!                   └────► Err ──────────────► fatal, returned to the loop
//! ```
//!
//! A rejection only applies to the height the request asked for. If the
//! height being evaluated differs from the requested one, the request goes
//! back on the queue instead.

use crate::config::WorkerSettings;
use crate::metrics::WorkerMetrics;
use crate::queue::RequestQueue;
use crate::retry::{RetryDecision, RetryPolicy, UnboundedRetry};
use bytes::Bytes;
use lightwit_core::codec::{self, RejectCode, WitnessReply, PUBCOINS_COMMAND};
use lightwit_core::{
    AccumulatorMath, BlockHeight, ChainView, LightError, PeerLink, RequestId, Result,
    WitnessComputation, WitnessOutcome, WitnessParams, WitnessRequest,
};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, warn};

/// Why a request went back on the queue
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RequeueReason {
    /// Anonymity set still too small
    NotEnoughMints,
    /// The evaluated height is not the one the request asked for
    HeightMismatch { evaluated: BlockHeight },
}

/// Result of running one request through the pipeline
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum RequestOutcome {
    /// Witness sent
    Replied {
        request_id: RequestId,
        delivered: bool,
    },
    /// Rejection sent
    Rejected {
        request_id: RequestId,
        code: RejectCode,
        delivered: bool,
    },
    /// Pushed back on the queue, nothing sent
    Requeued {
        request_id: RequestId,
        reason: RequeueReason,
    },
}

impl RequestOutcome {
    /// Metric label
    pub fn label(&self) -> &'static str {
        match self {
            Self::Replied { .. } => "replied",
            Self::Rejected { .. } => "rejected",
            Self::Requeued { .. } => "requeued",
        }
    }

    pub fn request_id(&self) -> RequestId {
        match self {
            Self::Replied { request_id, .. }
            | Self::Rejected { request_id, .. }
            | Self::Requeued { request_id, .. } => *request_id,
        }
    }
}

/// Per-request state machine over the injected capabilities
pub struct RequestPipeline {
    chain: Arc<dyn ChainView>,
    math: Arc<dyn AccumulatorMath>,
    peers: Arc<dyn PeerLink>,
    queue: Arc<RequestQueue>,
    retry: Arc<dyn RetryPolicy>,
    settings: WorkerSettings,
    metrics: Option<WorkerMetrics>,
}

impl RequestPipeline {
    /// Create a pipeline that retries NOT_ENOUGH_MINTS forever
    pub fn new(
        chain: Arc<dyn ChainView>,
        math: Arc<dyn AccumulatorMath>,
        peers: Arc<dyn PeerLink>,
        queue: Arc<RequestQueue>,
        settings: WorkerSettings,
    ) -> Self {
        Self {
            chain,
            math,
            peers,
            queue,
            retry: Arc::new(UnboundedRetry),
            settings,
            metrics: None,
        }
    }

    pub fn with_retry_policy(mut self, retry: Arc<dyn RetryPolicy>) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_metrics(mut self, metrics: WorkerMetrics) -> Self {
        self.metrics = Some(metrics);
        self
    }

    /// Run one request to a terminal reply or a requeue.
    ///
    /// Every `Err` is an unclassified failure and must stop the worker.
    pub async fn process(&self, request: WitnessRequest) -> Result<RequestOutcome> {
        let requested = request.starting_height();

        let Some(block) = self.chain.resolve_height(requested) else {
            debug!(request = %request, "height not on the active chain");
            return Ok(self
                .reject(request, requested, RejectCode::NonDetermined)
                .await);
        };

        if block.height < self.settings.activation_height {
            debug!(
                request = %request,
                height = block.height,
                activation = self.settings.activation_height,
                "height predates accumulator activation"
            );
            return Ok(self
                .reject(request, block.height, RejectCode::NonDetermined)
                .await);
        }

        debug!(request = %request, height = block.height, "computing witness");
        let params = WitnessParams {
            denomination: request.denomination(),
            filter: request.filter().clone(),
            accumulator_seed: request.accumulator_seed().clone(),
            start_height: block.height,
            mint_budget: self.settings.mint_budget,
            max_scan_height: self.settings.max_scan_height,
        };

        match self.compute(params).await? {
            WitnessOutcome::Computed(computation) => Ok(self.reply(request, computation).await),
            WitnessOutcome::NotEnoughMints { reason } => {
                match self.retry.on_not_enough_mints(&request) {
                    RetryDecision::Requeue => {
                        debug!(request = %request, reason = %reason, "not enough mints yet");
                        Ok(self.requeue(request, RequeueReason::NotEnoughMints))
                    }
                    RetryDecision::Reject => {
                        info!(request = %request, reason = %reason, "retry policy gave up");
                        Ok(self
                            .reject(request, block.height, RejectCode::NotEnoughMints)
                            .await)
                    }
                }
            }
            WitnessOutcome::Failed { reason } => {
                warn!(request = %request, reason = %reason, "witness computation failed");
                Ok(self
                    .reject(request, block.height, RejectCode::NonDetermined)
                    .await)
            }
        }
    }

    async fn compute(&self, params: WitnessParams) -> Result<WitnessOutcome> {
        let math = Arc::clone(&self.math);
        let started = Instant::now();

        let result = tokio::task::spawn_blocking(move || math.compute_witness(&params))
            .await
            .map_err(|e| LightError::ComputationAborted(e.to_string()))?;

        if let Some(metrics) = &self.metrics {
            metrics.observe_computation(started.elapsed());
        }

        result.map_err(|e| {
            if e.is_fatal() {
                e
            } else {
                LightError::AccumulatorFault(e.to_string())
            }
        })
    }

    async fn reply(&self, request: WitnessRequest, computation: WitnessComputation) -> RequestOutcome {
        let reply = WitnessReply::from_computation(request.request_id(), computation);
        debug!(
            request = %request,
            mints = reply.mint_values.len(),
            height_stop = reply.height_stop,
            "sending witness"
        );

        let delivered = self.deliver(&request, codec::encode_success(&reply)).await;
        self.retry.forget(&request);

        RequestOutcome::Replied {
            request_id: request.request_id(),
            delivered,
        }
    }

    /// Reject for `evaluated_height`, or requeue if that is not the requested height
    async fn reject(
        &self,
        request: WitnessRequest,
        evaluated_height: BlockHeight,
        code: RejectCode,
    ) -> RequestOutcome {
        if request.starting_height() != evaluated_height {
            debug!(
                request = %request,
                evaluated = evaluated_height,
                "evaluated height differs from requested, requeueing"
            );
            return self.requeue(
                request,
                RequeueReason::HeightMismatch {
                    evaluated: evaluated_height,
                },
            );
        }

        info!(request = %request, code = %code, "rejecting witness request");
        let delivered = self
            .deliver(&request, codec::encode_rejection(request.request_id(), code))
            .await;
        self.retry.forget(&request);

        RequestOutcome::Rejected {
            request_id: request.request_id(),
            code,
            delivered,
        }
    }

    fn requeue(&self, request: WitnessRequest, reason: RequeueReason) -> RequestOutcome {
        let request_id = request.request_id();
        self.queue.push(request);
        RequestOutcome::Requeued { request_id, reason }
    }

    /// Send a reply; an unreachable peer is logged, never escalated
    async fn deliver(&self, request: &WitnessRequest, payload: Bytes) -> bool {
        match self.peers.send(request.peer(), PUBCOINS_COMMAND, payload).await {
            Ok(()) => true,
            Err(e) => {
                warn!(
                    request_id = %request.request_id(),
                    peer = %request.peer().addr,
                    error = %e,
                    "reply not delivered"
                );
                if let Some(metrics) = &self.metrics {
                    metrics.record_delivery_failure();
                }
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::retry::CappedRetry;
    use lightwit_core::memory::{MemoryChain, RecordingPeerLink, ScriptedMath};
    use lightwit_core::{
        BigNum, BlockDescriptor, Denomination, PeerHandle, PeerId, WitnessFilter,
    };
    use mockall::mock;
    use mockall::predicate::eq;

    mock! {
        Chain {}
        impl ChainView for Chain {
            fn resolve_height(&self, height: BlockHeight) -> Option<BlockDescriptor>;
        }
    }

    struct Harness {
        pipeline: RequestPipeline,
        math: Arc<ScriptedMath>,
        peers: Arc<RecordingPeerLink>,
        queue: Arc<RequestQueue>,
    }

    fn settings() -> WorkerSettings {
        WorkerSettings {
            pacing_interval_ms: 0,
            activation_height: 200,
            ..WorkerSettings::default()
        }
    }

    fn harness(chain: Arc<dyn ChainView>) -> Harness {
        let math = Arc::new(ScriptedMath::new());
        let peers = Arc::new(RecordingPeerLink::new());
        let queue = Arc::new(RequestQueue::new());
        let pipeline = RequestPipeline::new(
            chain,
            math.clone(),
            peers.clone(),
            queue.clone(),
            settings(),
        );
        Harness {
            pipeline,
            math,
            peers,
            queue,
        }
    }

    fn request(id: u32, height: BlockHeight) -> WitnessRequest {
        WitnessRequest::new(
            RequestId(id),
            height,
            Denomination::Fifty,
            WitnessFilter::match_all(),
            BigNum::from_u64(0xdead_beef),
            PeerHandle::new(7, "10.1.1.7:12700"),
        )
        .unwrap()
    }

    #[tokio::test]
    async fn test_unresolved_height_rejects_non_determined() {
        let h = harness(Arc::new(MemoryChain::new(400)));

        let outcome = h.pipeline.process(request(1, 500)).await.unwrap();

        assert_eq!(
            outcome,
            RequestOutcome::Rejected {
                request_id: RequestId(1),
                code: RejectCode::NonDetermined,
                delivered: true,
            }
        );
        let sent = h.peers.sent();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].command, "pubcoins");
        assert_eq!(
            sent[0].payload,
            codec::encode_rejection(RequestId(1), RejectCode::NonDetermined)
        );
        assert_eq!(h.math.call_count(), 0);
        assert!(h.queue.is_empty());
    }

    #[tokio::test]
    async fn test_pre_activation_height_rejects_non_determined() {
        let h = harness(Arc::new(MemoryChain::new(1000)));

        let outcome = h.pipeline.process(request(2, 150)).await.unwrap();

        assert!(matches!(
            outcome,
            RequestOutcome::Rejected {
                code: RejectCode::NonDetermined,
                ..
            }
        ));
        assert_eq!(h.math.call_count(), 0);
        assert!(h.queue.is_empty());
    }

    #[tokio::test]
    async fn test_computed_witness_is_replied() {
        let h = harness(Arc::new(MemoryChain::new(1000)));

        let outcome = h.pipeline.process(request(3, 300)).await.unwrap();

        assert_eq!(
            outcome,
            RequestOutcome::Replied {
                request_id: RequestId(3),
                delivered: true,
            }
        );
        let params = &h.math.calls()[0];
        assert_eq!(params.start_height, 300);
        assert_eq!(params.mint_budget, 100);
        assert_eq!(params.max_scan_height, 60 * 24 * 60);
        assert_eq!(params.denomination, Denomination::Fifty);
        assert_eq!(params.accumulator_seed, BigNum::from_u64(0xdead_beef));

        let expected = WitnessReply::from_computation(
            RequestId(3),
            ScriptedMath::sample_computation(params),
        );
        assert_eq!(h.peers.sent()[0].payload, codec::encode_success(&expected));
    }

    #[tokio::test]
    async fn test_not_enough_mints_requeues_unchanged() {
        let h = harness(Arc::new(MemoryChain::new(1000)));
        h.math.push_not_enough_mints(1);
        let original = request(4, 300);

        let outcome = h.pipeline.process(original.clone()).await.unwrap();

        assert_eq!(
            outcome,
            RequestOutcome::Requeued {
                request_id: RequestId(4),
                reason: RequeueReason::NotEnoughMints,
            }
        );
        assert!(h.peers.sent().is_empty());
        assert_eq!(h.queue.len(), 1);
        assert_eq!(h.queue.pop().await, original);
    }

    #[tokio::test]
    async fn test_capped_retry_rejects_with_not_enough_mints() {
        let mut h = harness(Arc::new(MemoryChain::new(1000)));
        h.pipeline = h.pipeline.with_retry_policy(Arc::new(CappedRetry::new(2)));
        h.math.push_not_enough_mints(2);

        let first = h.pipeline.process(request(5, 300)).await.unwrap();
        assert_eq!(first.label(), "requeued");
        let again = h.queue.pop().await;
        let second = h.pipeline.process(again).await.unwrap();

        assert_eq!(
            second,
            RequestOutcome::Rejected {
                request_id: RequestId(5),
                code: RejectCode::NotEnoughMints,
                delivered: true,
            }
        );
        assert_eq!(
            h.peers.sent()[0].payload,
            codec::encode_rejection(RequestId(5), RejectCode::NotEnoughMints)
        );
    }

    #[tokio::test]
    async fn test_failed_computation_rejects_non_determined() {
        let h = harness(Arc::new(MemoryChain::new(1000)));
        h.math.push(WitnessOutcome::Failed {
            reason: "filter matched nothing".into(),
        });

        let outcome = h.pipeline.process(request(6, 300)).await.unwrap();

        assert!(matches!(
            outcome,
            RequestOutcome::Rejected {
                code: RejectCode::NonDetermined,
                delivered: true,
                ..
            }
        ));
        assert!(h.queue.is_empty());
    }

    #[tokio::test]
    async fn test_height_mismatch_requeues_instead_of_rejecting() {
        let mut chain = MockChain::new();
        chain
            .expect_resolve_height()
            .with(eq(300))
            .times(1)
            .returning(|_| {
                Some(BlockDescriptor {
                    height: 301,
                    hash: [0u8; 32],
                })
            });
        let h = harness(Arc::new(chain));
        h.math.push(WitnessOutcome::Failed {
            reason: "scan aborted".into(),
        });

        let outcome = h.pipeline.process(request(7, 300)).await.unwrap();

        assert_eq!(
            outcome,
            RequestOutcome::Requeued {
                request_id: RequestId(7),
                reason: RequeueReason::HeightMismatch { evaluated: 301 },
            }
        );
        assert!(h.peers.sent().is_empty());
        assert_eq!(h.queue.len(), 1);
    }

    #[tokio::test]
    async fn test_unreachable_peer_consumes_request() {
        let h = harness(Arc::new(MemoryChain::new(1000)));
        h.peers.disconnect(PeerId(7));

        let outcome = h.pipeline.process(request(8, 300)).await.unwrap();

        assert_eq!(
            outcome,
            RequestOutcome::Replied {
                request_id: RequestId(8),
                delivered: false,
            }
        );
        assert!(h.queue.is_empty());
    }

    #[tokio::test]
    async fn test_accumulator_fault_is_returned() {
        let h = harness(Arc::new(MemoryChain::new(1000)));
        h.math.push_fault("modulus mismatch");

        let err = h.pipeline.process(request(9, 300)).await.unwrap_err();

        assert_eq!(err, LightError::AccumulatorFault("modulus mismatch".into()));
        assert!(h.peers.sent().is_empty());
        assert!(h.queue.is_empty());
    }

    #[tokio::test]
    async fn test_computation_panic_is_returned() {
        let h = harness(Arc::new(MemoryChain::new(1000)));
        h.math.push_panic("accumulator exploded");

        let err = h.pipeline.process(request(10, 300)).await.unwrap_err();

        assert!(matches!(err, LightError::ComputationAborted(_)));
        assert!(err.is_fatal());
    }

    #[tokio::test]
    async fn test_delivery_failures_are_metered() {
        let metrics = WorkerMetrics::new().unwrap();
        let mut h = harness(Arc::new(MemoryChain::new(1000)));
        h.pipeline = h.pipeline.with_metrics(metrics.clone());
        h.peers.disconnect(PeerId(7));

        h.pipeline.process(request(11, 300)).await.unwrap();

        assert!(metrics
            .render()
            .unwrap()
            .contains("lightwit_delivery_failures_total 1"));
    }
}
