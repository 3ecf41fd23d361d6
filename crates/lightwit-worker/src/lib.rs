//! # Lightwit Worker
//!
//! Asynchronous witness-request processing for light peers: a FIFO request
//! queue, one scheduling loop, and the per-request pipeline that validates
//! the height, runs the bounded computation and replies.

pub mod config;
pub mod metrics;
pub mod pipeline;
pub mod queue;
pub mod retry;
pub mod worker;

pub use config::WorkerConfig;
pub use metrics::WorkerMetrics;
pub use pipeline::{RequestOutcome, RequestPipeline};
pub use queue::RequestQueue;
pub use retry::{CappedRetry, RetryDecision, RetryPolicy, UnboundedRetry};
pub use worker::{WitnessWorker, WorkerEvent, WorkerState, WorkerStats};
