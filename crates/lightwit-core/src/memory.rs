//! In-memory capabilities
//!
//! Deterministic stand-ins for the chain, the accumulator layer and the peer
//! network. Used by the test suites and by `lightwit simulate`.

use crate::capability::{
    AccumulatorMath, BlockDescriptor, ChainView, PeerLink, WitnessComputation, WitnessOutcome,
    WitnessParams,
};
use crate::error::{LightError, Result};
use crate::types::{BigNum, BlockHeight, PeerHandle, PeerId};
use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::{Mutex, RwLock};
use std::collections::{HashMap, HashSet, VecDeque};

/// Chain that knows every height up to its tip
#[derive(Debug)]
pub struct MemoryChain {
    tip: RwLock<BlockHeight>,
    /// Requested height -> height reported by the block found there
    remapped: RwLock<HashMap<BlockHeight, BlockHeight>>,
}

impl MemoryChain {
    pub fn new(tip: BlockHeight) -> Self {
        Self {
            tip: RwLock::new(tip),
            remapped: RwLock::new(HashMap::new()),
        }
    }

    pub fn tip(&self) -> BlockHeight {
        *self.tip.read()
    }

    /// Extend the chain by `blocks`
    pub fn advance(&self, blocks: BlockHeight) {
        let mut tip = self.tip.write();
        *tip = tip.saturating_add(blocks);
    }

    /// Make the block at `requested` report `reported` as its height
    pub fn remap(&self, requested: BlockHeight, reported: BlockHeight) {
        self.remapped.write().insert(requested, reported);
    }

    fn block_hash(height: BlockHeight) -> [u8; 32] {
        *blake3::hash(&height.to_le_bytes()).as_bytes()
    }
}

impl ChainView for MemoryChain {
    fn resolve_height(&self, height: BlockHeight) -> Option<BlockDescriptor> {
        if height > self.tip() {
            return None;
        }
        let reported = self.remapped.read().get(&height).copied().unwrap_or(height);
        Some(BlockDescriptor {
            height: reported,
            hash: Self::block_hash(reported),
        })
    }
}

#[derive(Debug)]
enum Step {
    Outcome(WitnessOutcome),
    Fault(String),
    Panic(String),
}

/// Accumulator layer that replays scripted outcomes.
///
/// Once the script runs dry it answers with the fallback outcome, or with
/// [`ScriptedMath::sample_computation`] when no fallback is set.
#[derive(Debug, Default)]
pub struct ScriptedMath {
    script: Mutex<VecDeque<Step>>,
    fallback: Option<WitnessOutcome>,
    calls: Mutex<Vec<WitnessParams>>,
}

impl ScriptedMath {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_fallback(fallback: WitnessOutcome) -> Self {
        Self {
            fallback: Some(fallback),
            ..Self::default()
        }
    }

    /// Queue an outcome for the next call
    pub fn push(&self, outcome: WitnessOutcome) {
        self.script.lock().push_back(Step::Outcome(outcome));
    }

    /// Queue `count` NOT_ENOUGH_MINTS outcomes
    pub fn push_not_enough_mints(&self, count: usize) {
        let mut script = self.script.lock();
        for _ in 0..count {
            script.push_back(Step::Outcome(WitnessOutcome::NotEnoughMints {
                reason: "anonymity set too small".to_string(),
            }));
        }
    }

    /// Queue an unclassified fault for the next call
    pub fn push_fault(&self, message: impl Into<String>) {
        self.script.lock().push_back(Step::Fault(message.into()));
    }

    /// Queue a panic for the next call
    pub fn push_panic(&self, message: impl Into<String>) {
        self.script.lock().push_back(Step::Panic(message.into()));
    }

    /// Number of computations performed
    pub fn call_count(&self) -> usize {
        self.calls.lock().len()
    }

    /// Parameters of every computation performed, oldest first
    pub fn calls(&self) -> Vec<WitnessParams> {
        self.calls.lock().clone()
    }

    /// Deterministic witness derived from the parameters
    pub fn sample_computation(params: &WitnessParams) -> WitnessComputation {
        let mint_count = params.mint_budget.min(3);
        let mint_values: Vec<BigNum> = (0..mint_count)
            .map(|i| {
                let mut hasher = blake3::Hasher::new();
                hasher.update(&params.denomination.value().to_le_bytes());
                hasher.update(&params.start_height.to_le_bytes());
                hasher.update(&i.to_le_bytes());
                BigNum::from_le_bytes(hasher.finalize().as_bytes()[..16].to_vec())
            })
            .collect();

        let mut acc = blake3::Hasher::new();
        acc.update(params.accumulator_seed.as_le_bytes());
        for mint in &mint_values {
            acc.update(mint.as_le_bytes());
        }
        let accumulator = acc.finalize();
        let witness = blake3::hash(accumulator.as_bytes());

        WitnessComputation {
            accumulator_value: BigNum::from_le_bytes(accumulator.as_bytes().to_vec()),
            witness_value: BigNum::from_le_bytes(witness.as_bytes().to_vec()),
            mint_values,
            height_stop: params
                .start_height
                .saturating_add(params.max_scan_height.min(10)),
        }
    }
}

impl AccumulatorMath for ScriptedMath {
    fn compute_witness(&self, params: &WitnessParams) -> Result<WitnessOutcome> {
        self.calls.lock().push(params.clone());
        let step = self.script.lock().pop_front();
        match step {
            Some(Step::Outcome(outcome)) => Ok(outcome),
            Some(Step::Fault(message)) => Err(LightError::AccumulatorFault(message)),
            Some(Step::Panic(message)) => panic!("{}", message),
            None => Ok(self
                .fallback
                .clone()
                .unwrap_or_else(|| WitnessOutcome::Computed(Self::sample_computation(params)))),
        }
    }
}

/// Message captured by [`RecordingPeerLink`]
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SentMessage {
    pub peer: PeerHandle,
    pub command: &'static str,
    pub payload: Bytes,
}

/// Peer link that records deliveries instead of sending them
#[derive(Debug, Default)]
pub struct RecordingPeerLink {
    sent: Mutex<Vec<SentMessage>>,
    disconnected: RwLock<HashSet<PeerId>>,
}

impl RecordingPeerLink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every later send to `peer` fail
    pub fn disconnect(&self, peer: PeerId) {
        self.disconnected.write().insert(peer);
    }

    /// Messages delivered so far
    pub fn sent(&self) -> Vec<SentMessage> {
        self.sent.lock().clone()
    }

    /// Messages delivered to one peer
    pub fn sent_to(&self, peer: PeerId) -> Vec<SentMessage> {
        self.sent
            .lock()
            .iter()
            .filter(|m| m.peer.id == peer)
            .cloned()
            .collect()
    }
}

#[async_trait]
impl PeerLink for RecordingPeerLink {
    async fn send(&self, peer: &PeerHandle, command: &'static str, payload: Bytes) -> Result<()> {
        if self.disconnected.read().contains(&peer.id) {
            return Err(LightError::PeerUnreachable(peer.id));
        }
        tracing::trace!(peer = %peer.id, command, bytes = payload.len(), "recorded message");
        self.sent.lock().push(SentMessage {
            peer: peer.clone(),
            command,
            payload,
        });
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Denomination, WitnessFilter};

    fn params(start_height: BlockHeight) -> WitnessParams {
        WitnessParams {
            denomination: Denomination::Five,
            filter: WitnessFilter::match_all(),
            accumulator_seed: BigNum::from_u64(11),
            start_height,
            mint_budget: 100,
            max_scan_height: 86_400,
        }
    }

    #[test]
    fn test_memory_chain_resolves_up_to_tip() {
        let chain = MemoryChain::new(400);
        assert_eq!(chain.resolve_height(400).unwrap().height, 400);
        assert!(chain.resolve_height(500).is_none());

        chain.advance(100);
        assert_eq!(chain.resolve_height(500).unwrap().height, 500);
    }

    #[test]
    fn test_memory_chain_remap() {
        let chain = MemoryChain::new(1000);
        chain.remap(300, 301);
        let block = chain.resolve_height(300).unwrap();
        assert_eq!(block.height, 301);
        assert_eq!(block.hash, MemoryChain::block_hash(301));
    }

    #[test]
    fn test_scripted_math_replays_then_falls_back() {
        let math = ScriptedMath::new();
        math.push_not_enough_mints(2);
        math.push_fault("corrupt mint");

        let p = params(250);
        assert!(matches!(
            math.compute_witness(&p),
            Ok(WitnessOutcome::NotEnoughMints { .. })
        ));
        assert!(matches!(
            math.compute_witness(&p),
            Ok(WitnessOutcome::NotEnoughMints { .. })
        ));
        assert_eq!(
            math.compute_witness(&p),
            Err(LightError::AccumulatorFault("corrupt mint".into()))
        );
        assert_eq!(
            math.compute_witness(&p).unwrap(),
            WitnessOutcome::Computed(ScriptedMath::sample_computation(&p))
        );
        assert_eq!(math.call_count(), 4);
    }

    #[test]
    fn test_sample_computation_is_deterministic_and_bounded() {
        let mut p = params(250);
        let a = ScriptedMath::sample_computation(&p);
        let b = ScriptedMath::sample_computation(&p);
        assert_eq!(a, b);
        assert_eq!(a.mint_values.len(), 3);
        assert_eq!(a.height_stop, 260);

        p.mint_budget = 1;
        assert_eq!(ScriptedMath::sample_computation(&p).mint_values.len(), 1);
    }

    #[tokio::test]
    async fn test_recording_peer_link() {
        let link = RecordingPeerLink::new();
        let alice = PeerHandle::new(1, "10.0.0.1:12700");
        let bob = PeerHandle::new(2, "10.0.0.2:12700");

        link.send(&alice, "pubcoins", Bytes::from_static(b"ok"))
            .await
            .unwrap();
        link.disconnect(bob.id);
        let err = link
            .send(&bob, "pubcoins", Bytes::from_static(b"lost"))
            .await
            .unwrap_err();

        assert_eq!(err, LightError::PeerUnreachable(PeerId(2)));
        assert_eq!(link.sent().len(), 1);
        assert_eq!(link.sent_to(PeerId(1))[0].payload, Bytes::from_static(b"ok"));
    }
}
