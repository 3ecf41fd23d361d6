//! # Request Queue
//!
//! Unbounded FIFO between the peer message handlers (many producers) and the
//! witness worker (single consumer). `push` never blocks; `pop` waits until
//! an item is available.

use lightwit_core::WitnessRequest;
use parking_lot::Mutex;
use std::collections::VecDeque;
use tokio::sync::Notify;

/// Unbounded multi-producer FIFO of witness requests
#[derive(Debug, Default)]
pub struct RequestQueue {
    items: Mutex<VecDeque<WitnessRequest>>,
    available: Notify,
}

impl RequestQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a request at the tail
    pub fn push(&self, request: WitnessRequest) {
        self.items.lock().push_back(request);
        self.available.notify_one();
    }

    /// Take the head request, waiting until one is pushed.
    ///
    /// Cancel safe: a dropped `pop` future never consumes an item.
    pub async fn pop(&self) -> WitnessRequest {
        loop {
            let next = self.items.lock().pop_front();
            if let Some(request) = next {
                return request;
            }
            self.available.notified().await;
        }
    }

    /// Number of queued requests
    pub fn len(&self) -> usize {
        self.items.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.lock().is_empty()
    }

    /// Drop every queued request, returning how many were discarded
    pub fn clear(&self) -> usize {
        let mut items = self.items.lock();
        let discarded = items.len();
        items.clear();
        discarded
    }
}
