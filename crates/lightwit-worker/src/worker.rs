//! Witness Worker
//!
//! Owns the request queue and the single scheduling loop. The loop paces
//! itself, pops one request at a time and runs it through the
//! [`RequestPipeline`]. An unclassified failure ends the loop for good;
//! restarting is left to whoever supervises the worker.

use crate::config::{WorkerConfig, WorkerSettings};
use crate::metrics::WorkerMetrics;
use crate::pipeline::{RequestOutcome, RequestPipeline};
use crate::queue::RequestQueue;
use crate::retry::{self, RetryPolicy};
use lightwit_core::codec::RejectCode;
use lightwit_core::{
    AccumulatorMath, ChainView, LightError, PeerLink, RequestId, Result, WitnessRequest,
};
use parking_lot::{Mutex, RwLock};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// Worker lifecycle state
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum WorkerState {
    /// Created, loop not spawned
    NotStarted,
    /// Loop running, requests accepted
    Running,
    /// Stop requested, waiting for the loop to exit
    Stopping,
    /// Loop exited
    Stopped,
}

/// Counters for the worker's lifetime
#[derive(Clone, Debug, Default)]
pub struct WorkerStats {
    /// Requests taken off the queue
    pub processed: u64,
    /// Witness replies sent
    pub replies: u64,
    /// Rejections sent
    pub rejections: u64,
    /// Requests put back on the queue
    pub requeues: u64,
    /// Replies or rejections that could not be delivered
    pub delivery_failures: u64,
    /// Failure that stopped the loop, if any
    pub last_fault: Option<String>,
}

/// Events emitted by the worker
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum WorkerEvent {
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
    /// Request put back on the queue
    Requeued { request_id: RequestId },
    /// Unclassified failure, loop stopping
    Faulted { error: String },
    /// Loop exited
    Stopped,
}

impl From<&RequestOutcome> for WorkerEvent {
    fn from(outcome: &RequestOutcome) -> Self {
        match *outcome {
            RequestOutcome::Replied {
                request_id,
                delivered,
            } => Self::Replied {
                request_id,
                delivered,
            },
            RequestOutcome::Rejected {
                request_id,
                code,
                delivered,
            } => Self::Rejected {
                request_id,
                code,
                delivered,
            },
            RequestOutcome::Requeued { request_id, .. } => Self::Requeued { request_id },
        }
    }
}

/// Builder for [`WitnessWorker`]
pub struct WitnessWorkerBuilder {
    config: WorkerConfig,
    chain: Option<Arc<dyn ChainView>>,
    math: Option<Arc<dyn AccumulatorMath>>,
    peers: Option<Arc<dyn PeerLink>>,
    retry: Option<Arc<dyn RetryPolicy>>,
    metrics: Option<WorkerMetrics>,
}

impl WitnessWorkerBuilder {
    pub fn chain(mut self, chain: Arc<dyn ChainView>) -> Self {
        self.chain = Some(chain);
        self
    }

    pub fn math(mut self, math: Arc<dyn AccumulatorMath>) -> Self {
        self.math = Some(math);
        self
    }

    pub fn peers(mut self, peers: Arc<dyn PeerLink>) -> Self {
        self.peers = Some(peers);
        self
    }

    /// Override the policy selected by `config.retry`
    pub fn retry_policy(mut self, retry: Arc<dyn RetryPolicy>) -> Self {
        self.retry = Some(retry);
        self
    }

    pub fn metrics(mut self, metrics: WorkerMetrics) -> Self {
        self.metrics = Some(metrics);
        self
    }

    pub fn build(self) -> Result<WitnessWorker> {
        self.config.validate()?;
        let chain = self
            .chain
            .ok_or_else(|| LightError::Config("chain view not set".into()))?;
        let math = self
            .math
            .ok_or_else(|| LightError::Config("accumulator math not set".into()))?;
        let peers = self
            .peers
            .ok_or_else(|| LightError::Config("peer link not set".into()))?;
        let retry = self
            .retry
            .unwrap_or_else(|| retry::from_config(&self.config.retry));

        let queue = Arc::new(RequestQueue::new());
        let mut pipeline = RequestPipeline::new(
            chain,
            math,
            peers,
            queue.clone(),
            self.config.worker.clone(),
        )
        .with_retry_policy(retry.clone());
        if let Some(metrics) = &self.metrics {
            pipeline = pipeline.with_metrics(metrics.clone());
        }

        let (shutdown_tx, _) = watch::channel(false);
        let (event_tx, _) = broadcast::channel(1024);

        Ok(WitnessWorker {
            settings: self.config.worker,
            queue,
            pipeline: Arc::new(pipeline),
            retry,
            state: Arc::new(RwLock::new(WorkerState::NotStarted)),
            stats: Arc::new(RwLock::new(WorkerStats::default())),
            event_tx,
            shutdown_tx,
            handle: Mutex::new(None),
            metrics: self.metrics,
        })
    }
}

/// Background worker answering witness requests, one at a time
pub struct WitnessWorker {
    settings: WorkerSettings,
    queue: Arc<RequestQueue>,
    pipeline: Arc<RequestPipeline>,
    retry: Arc<dyn RetryPolicy>,
    state: Arc<RwLock<WorkerState>>,
    stats: Arc<RwLock<WorkerStats>>,
    event_tx: broadcast::Sender<WorkerEvent>,
    shutdown_tx: watch::Sender<bool>,
    handle: Mutex<Option<JoinHandle<()>>>,
    metrics: Option<WorkerMetrics>,
}

impl WitnessWorker {
    pub fn builder(config: WorkerConfig) -> WitnessWorkerBuilder {
        WitnessWorkerBuilder {
            config,
            chain: None,
            math: None,
            peers: None,
            retry: None,
            metrics: None,
        }
    }

    /// Get current state
    pub fn state(&self) -> WorkerState {
        *self.state.read()
    }

    /// Get current stats
    pub fn stats(&self) -> WorkerStats {
        self.stats.read().clone()
    }

    /// Get event receiver
    pub fn subscribe(&self) -> broadcast::Receiver<WorkerEvent> {
        self.event_tx.subscribe()
    }

    /// Shared handle to the raw queue
    pub fn queue(&self) -> Arc<RequestQueue> {
        self.queue.clone()
    }

    pub fn queue_len(&self) -> usize {
        self.queue.len()
    }

    pub fn metrics(&self) -> Option<&WorkerMetrics> {
        self.metrics.as_ref()
    }

    /// Queue a request. Returns false unless the worker is running.
    pub fn submit(&self, request: WitnessRequest) -> bool {
        let state = self.state.read();
        if *state != WorkerState::Running {
            debug!(request = %request, state = ?*state, "worker not running, request refused");
            return false;
        }
        self.queue.push(request);
        if let Some(metrics) = &self.metrics {
            metrics.set_queue_depth(self.queue.len());
        }
        true
    }

    /// Spawn the scheduling loop on the current tokio runtime.
    ///
    /// Returns `Ok(false)` without doing anything unless the worker is in
    /// `NotStarted`.
    pub fn start(&self) -> Result<bool> {
        let runtime = tokio::runtime::Handle::try_current()
            .map_err(|e| LightError::NoRuntime(e.to_string()))?;

        let mut state = self.state.write();
        if *state != WorkerState::NotStarted {
            debug!(state = ?*state, "witness worker already started");
            return Ok(false);
        }

        let scheduler = SchedulingLoop {
            pacing: self.settings.pacing_interval(),
            queue: self.queue.clone(),
            pipeline: self.pipeline.clone(),
            state: self.state.clone(),
            stats: self.stats.clone(),
            event_tx: self.event_tx.clone(),
            shutdown_rx: self.shutdown_tx.subscribe(),
            metrics: self.metrics.clone(),
        };
        *self.handle.lock() = Some(runtime.spawn(scheduler.run()));
        *state = WorkerState::Running;

        info!(
            pacing_ms = self.settings.pacing_interval_ms,
            mint_budget = self.settings.mint_budget,
            max_scan_height = self.settings.max_scan_height,
            "witness worker started"
        );
        Ok(true)
    }

    /// Ask the loop to exit at its next safe point and wait for it.
    ///
    /// A computation already in progress runs to completion. Requests still
    /// queued are discarded, including after the loop stopped on a fault.
    pub async fn stop(&self) {
        {
            let mut state = self.state.write();
            match *state {
                WorkerState::NotStarted => {
                    *state = WorkerState::Stopped;
                    info!("witness worker stopped before start");
                    return;
                }
                WorkerState::Running => *state = WorkerState::Stopping,
                WorkerState::Stopping => return,
                // A fault already stopped the loop; its handle is still unclaimed.
                WorkerState::Stopped => {}
            }
        }

        self.shutdown_tx.send_replace(true);
        let handle = self.handle.lock().take();
        let Some(handle) = handle else {
            return;
        };
        if let Err(err) = handle.await {
            warn!(?err, "witness worker loop exited abnormally");
        }

        let discarded = self.queue.clear();
        self.retry.reset();
        if let Some(metrics) = &self.metrics {
            metrics.set_queue_depth(0);
        }
        *self.state.write() = WorkerState::Stopped;
        info!(discarded, "witness worker stopped");
    }
}

/// State moved into the spawned loop task
struct SchedulingLoop {
    pacing: Duration,
    queue: Arc<RequestQueue>,
    pipeline: Arc<RequestPipeline>,
    state: Arc<RwLock<WorkerState>>,
    stats: Arc<RwLock<WorkerStats>>,
    event_tx: broadcast::Sender<WorkerEvent>,
    shutdown_rx: watch::Receiver<bool>,
    metrics: Option<WorkerMetrics>,
}

impl SchedulingLoop {
    async fn run(mut self) {
        loop {
            // Pace between requests so heavy computations never run back to back.
            tokio::select! {
                biased;
                _ = self.shutdown_rx.changed() => break,
                _ = tokio::time::sleep(self.pacing) => {}
            }
            if *self.shutdown_rx.borrow() {
                break;
            }

            let request = tokio::select! {
                biased;
                _ = self.shutdown_rx.changed() => break,
                request = self.queue.pop() => request,
            };
            debug!(request = %request, pending = self.queue.len(), "popped witness request");

            match self.pipeline.process(request).await {
                Ok(outcome) => self.record(&outcome),
                Err(e) => {
                    error!(error = %e, "unclassified failure, witness worker loop exiting");
                    self.stats.write().last_fault = Some(e.to_string());
                    *self.state.write() = WorkerState::Stopped;
                    let _ = self.event_tx.send(WorkerEvent::Faulted {
                        error: e.to_string(),
                    });
                    break;
                }
            }
        }

        debug!("witness worker loop finished");
        let _ = self.event_tx.send(WorkerEvent::Stopped);
    }

    fn record(&self, outcome: &RequestOutcome) {
        {
            let mut stats = self.stats.write();
            stats.processed += 1;
            match outcome {
                RequestOutcome::Replied { delivered, .. } => {
                    stats.replies += 1;
                    if !delivered {
                        stats.delivery_failures += 1;
                    }
                }
                RequestOutcome::Rejected { delivered, .. } => {
                    stats.rejections += 1;
                    if !delivered {
                        stats.delivery_failures += 1;
                    }
                }
                RequestOutcome::Requeued { .. } => stats.requeues += 1,
            }
        }

        if let Some(metrics) = &self.metrics {
            metrics.record_outcome(outcome.label());
            metrics.set_queue_depth(self.queue.len());
        }
        let _ = self.event_tx.send(WorkerEvent::from(outcome));
    }
}
