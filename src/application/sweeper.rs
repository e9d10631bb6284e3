//! Session eviction loop

use crate::domain::call::CallSessionStore;
use metrics::counter;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Periodically evict sessions past their expiry
pub fn spawn_session_sweeper(store: Arc<dyn CallSessionStore>, every: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut timer = tokio::time::interval(every);
        timer.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        info!("Session sweeper started ({:?})", every);

        loop {
            timer.tick().await;
            match store.evict_expired().await {
                Ok(0) => debug!("No expired sessions"),
                Ok(n) => {
                    counter!("call_sessions_evicted_total").increment(n as u64);
                    info!("Evicted {} expired call sessions", n);
                }
                Err(e) => warn!("Session sweep failed: {}", e),
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::call::NewCallSession;
    use crate::domain::shared::value_objects::CallControlId;
    use crate::infrastructure::persistence::InMemoryCallSessionStore;

    #[tokio::test]
    async fn test_sweeper_evicts_expired_sessions() {
        let store = Arc::new(InMemoryCallSessionStore::new(chrono::Duration::milliseconds(-1)));
        store
            .create(&CallControlId::new("v3:old"), NewCallSession::default())
            .await
            .unwrap();
        assert_eq!(store.len(), 1);

        let handle = spawn_session_sweeper(store.clone(), Duration::from_millis(10));
        tokio::time::sleep(Duration::from_millis(50)).await;
        handle.abort();

        assert_eq!(store.len(), 0);
    }
}
