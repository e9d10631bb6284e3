//! Directory of live bridge tasks
//!
//! Holds only task plumbing (channels, stop signal, join handle). Call
//! state lives in the session store.

use crate::domain::audio::AudioFrame;
use crate::domain::shared::value_objects::CallControlId;
use bytes::Bytes;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch, RwLock};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Media sent back to the carrier leg
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OutboundMedia {
    /// Synthesized audio chunk
    Audio(Bytes),
    /// Flush audio already queued at the carrier (barge-in)
    ClearPlayback,
    /// Scripted utterance spoken by the carrier TTS
    Speak(String),
    Hangup,
}

/// Live bridge task handle
pub struct BridgeHandle {
    pub(crate) bridge_id: Uuid,
    pub(crate) inbound: mpsc::Sender<AudioFrame>,
    pub(crate) stop: watch::Sender<bool>,
    pub(crate) task: JoinHandle<()>,
    pub(crate) outbound: Option<mpsc::Receiver<OutboundMedia>>,
}

/// Result of handing an inbound frame to a bridge
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ForwardResult {
    Queued,
    /// Inbound queue full; frame dropped
    Full,
    /// No live bridge for the call
    NoBridge,
}

/// Bridge registry
#[derive(Clone, Default)]
pub struct BridgeRegistry {
    bridges: Arc<RwLock<HashMap<CallControlId, BridgeHandle>>>,
}

impl BridgeRegistry {
    /// Create a new, empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a bridge; hands the handle back when one is already live
    pub async fn insert(&self, id: CallControlId, handle: BridgeHandle) -> Option<BridgeHandle> {
        let mut bridges = self.bridges.write().await;
        if bridges.contains_key(&id) {
            return Some(handle);
        }
        bridges.insert(id.clone(), handle);
        info!("Registered bridge for call {}", id);
        None
    }

    pub async fn contains(&self, id: &CallControlId) -> bool {
        self.bridges.read().await.contains_key(id)
    }

    pub async fn active_count(&self) -> usize {
        self.bridges.read().await.len()
    }

    /// Queue an inbound frame without blocking
    pub async fn forward(&self, id: &CallControlId, frame: AudioFrame) -> ForwardResult {
        let bridges = self.bridges.read().await;
        let Some(handle) = bridges.get(id) else {
            return ForwardResult::NoBridge;
        };
        match handle.inbound.try_send(frame) {
            Ok(()) => ForwardResult::Queued,
            Err(mpsc::error::TrySendError::Full(frame)) => {
                warn!("Inbound queue full for call {}, dropping frame seq={}", id, frame.seq);
                ForwardResult::Full
            }
            Err(mpsc::error::TrySendError::Closed(_)) => ForwardResult::NoBridge,
        }
    }

    /// Take the outbound media receiver; only one consumer may attach
    pub async fn take_outbound(&self, id: &CallControlId) -> Option<mpsc::Receiver<OutboundMedia>> {
        let mut bridges = self.bridges.write().await;
        bridges.get_mut(id).and_then(|handle| handle.outbound.take())
    }

    /// Signal the bridge to stop and wait up to `grace` for it to drain
    ///
    /// Returns false when no bridge was live.
    pub async fn stop(&self, id: &CallControlId, grace: Duration) -> bool {
        let handle = self.bridges.write().await.remove(id);
        let Some(handle) = handle else {
            return false;
        };

        let _ = handle.stop.send(true);
        let mut task = handle.task;
        if tokio::time::timeout(grace, &mut task).await.is_err() {
            warn!("Bridge for call {} did not stop within {:?}, aborting", id, grace);
            task.abort();
        }
        info!("Stopped bridge for call {}", id);
        true
    }

    /// Drop the entry of a bridge that ended on its own
    ///
    /// Only the bridge that owns the entry may release it.
    pub(crate) async fn release(&self, id: &CallControlId, bridge_id: Uuid) {
        let mut bridges = self.bridges.write().await;
        if bridges.get(id).map_or(false, |h| h.bridge_id == bridge_id) {
            bridges.remove(id);
            debug!("Released bridge entry for call {}", id);
        }
    }

    /// Stop every live bridge (shutdown)
    pub async fn stop_all(&self, grace: Duration) {
        let ids: Vec<CallControlId> = self.bridges.read().await.keys().cloned().collect();
        for id in ids {
            self.stop(&id, grace).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn idle_handle() -> (BridgeHandle, mpsc::Receiver<AudioFrame>, watch::Receiver<bool>) {
        let (inbound, inbound_rx) = mpsc::channel(1);
        let (stop, stop_rx) = watch::channel(false);
        let (_outbound_tx, outbound_rx) = mpsc::channel(1);
        let mut waiter = stop_rx.clone();
        let task = tokio::spawn(async move {
            let _ = waiter.changed().await;
        });
        (
            BridgeHandle {
                bridge_id: Uuid::new_v4(),
                inbound,
                stop,
                task,
                outbound: Some(outbound_rx),
            },
            inbound_rx,
            stop_rx,
        )
    }

    #[tokio::test]
    async fn test_insert_rejects_second_bridge() {
        let registry = BridgeRegistry::new();
        let id = CallControlId::new("v3:reg");
        let (first, _rx1, _s1) = idle_handle();
        let (second, _rx2, _s2) = idle_handle();

        assert!(registry.insert(id.clone(), first).await.is_none());
        assert!(registry.insert(id.clone(), second).await.is_some());
        assert_eq!(registry.active_count().await, 1);
    }

    #[tokio::test]
    async fn test_forward_and_backpressure() {
        let registry = BridgeRegistry::new();
        let id = CallControlId::new("v3:fwd");
        let (handle, mut inbound_rx, _stop) = idle_handle();
        registry.insert(id.clone(), handle).await;

        let frame = AudioFrame::new(1, Bytes::from_static(b"a"));
        assert_eq!(registry.forward(&id, frame.clone()).await, ForwardResult::Queued);
        assert_eq!(registry.forward(&id, frame.clone()).await, ForwardResult::Full);
        assert_eq!(inbound_rx.recv().await.unwrap().seq, 1);

        let unknown = CallControlId::new("v3:none");
        assert_eq!(registry.forward(&unknown, frame).await, ForwardResult::NoBridge);
    }

    #[tokio::test]
    async fn test_outbound_taken_once() {
        let registry = BridgeRegistry::new();
        let id = CallControlId::new("v3:out");
        let (handle, _rx, _stop) = idle_handle();
        registry.insert(id.clone(), handle).await;

        assert!(registry.take_outbound(&id).await.is_some());
        assert!(registry.take_outbound(&id).await.is_none());
    }

    #[tokio::test]
    async fn test_stop_signals_and_removes() {
        let registry = BridgeRegistry::new();
        let id = CallControlId::new("v3:stop");
        let (handle, _rx, stop_rx) = idle_handle();
        registry.insert(id.clone(), handle).await;

        assert!(registry.stop(&id, Duration::from_secs(1)).await);
        assert!(*stop_rx.borrow());
        assert!(!registry.contains(&id).await);
        assert!(!registry.stop(&id, Duration::from_secs(1)).await);
    }

    #[tokio::test]
    async fn test_release_only_by_owner() {
        let registry = BridgeRegistry::new();
        let id = CallControlId::new("v3:own");
        let (handle, _rx, _stop) = idle_handle();
        let owner = handle.bridge_id;
        registry.insert(id.clone(), handle).await;

        registry.release(&id, Uuid::new_v4()).await;
        assert!(registry.contains(&id).await);
        registry.release(&id, owner).await;
        assert!(!registry.contains(&id).await);
    }
}
