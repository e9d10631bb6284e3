//! Session side-effect writer
//!
//! Transcript and metadata writes leave the live audio path through a
//! bounded queue. A single task per call drains it in order with bounded
//! retry; a full queue drops the write.

use crate::application::retry::{with_retry, RetryPolicy};
use crate::domain::call::{CallSessionStore, TranscriptFragment};
use crate::domain::shared::value_objects::CallControlId;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{error, warn};

/// One queued session write
#[derive(Debug, Clone, PartialEq)]
pub enum SessionWrite {
    Transcript(TranscriptFragment),
    Metadata { key: String, value: String },
}

/// Producer side of a call's writer task
pub struct SessionWriter {
    call_control_id: CallControlId,
    tx: mpsc::Sender<SessionWrite>,
    task: JoinHandle<()>,
}

impl SessionWriter {
    /// Spawn the writer task for one call
    pub fn spawn(
        store: Arc<dyn CallSessionStore>,
        call_control_id: CallControlId,
        capacity: usize,
        policy: RetryPolicy,
    ) -> Self {
        let (tx, mut rx) = mpsc::channel::<SessionWrite>(capacity.max(1));
        let id = call_control_id.clone();

        let task = tokio::spawn(async move {
            while let Some(write) = rx.recv().await {
                if let Err(e) = apply(&store, &id, write, policy).await {
                    error!("Dropping session write for call {}: {}", id, e);
                }
            }
        });

        Self {
            call_control_id,
            tx,
            task,
        }
    }

    /// Queue a write; never waits
    pub fn push(&self, write: SessionWrite) -> bool {
        match self.tx.try_send(write) {
            Ok(()) => true,
            Err(mpsc::error::TrySendError::Full(_)) => {
                warn!("Session write queue full for call {}, dropping write", self.call_control_id);
                metrics::counter!("session_writes_dropped_total").increment(1);
                false
            }
            Err(mpsc::error::TrySendError::Closed(_)) => false,
        }
    }

    pub fn metadata(&self, key: &str, value: impl Into<String>) -> bool {
        self.push(SessionWrite::Metadata {
            key: key.to_string(),
            value: value.into(),
        })
    }

    /// Close the queue and wait for queued writes to land
    pub async fn flush(self) {
        drop(self.tx);
        if let Err(e) = self.task.await {
            error!("Session writer for call {} panicked: {}", self.call_control_id, e);
        }
    }
}

async fn apply(
    store: &Arc<dyn CallSessionStore>,
    id: &CallControlId,
    write: SessionWrite,
    policy: RetryPolicy,
) -> crate::domain::shared::result::Result<()> {
    match write {
        SessionWrite::Transcript(fragment) => {
            with_retry(policy, "transcript append", || {
                let fragment = fragment.clone();
                async move { store.append_transcript(id, fragment).await }
            })
            .await
        }
        SessionWrite::Metadata { key, value } => {
            with_retry(policy, "metadata write", || {
                let (key, value) = (key.clone(), value.clone());
                async move { store.set_metadata(id, &key, &value).await }
            })
            .await
        }
    }
}
