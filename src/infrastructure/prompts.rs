//! In-memory store configuration cache

use crate::domain::pipeline::{PromptCache, StorePrompts};
use crate::domain::shared::result::Result;
use crate::domain::shared::value_objects::StoreId;
use async_trait::async_trait;
use dashmap::DashMap;
use std::collections::BTreeMap;
use std::time::{Duration, Instant};
use tracing::debug;

struct CachedPrompts {
    prompts: StorePrompts,
    /// `None` for entries that never expire
    expires_at: Option<Instant>,
}

/// Prompt cache with per-entry TTL
///
/// Entries loaded from configuration are pinned; entries pushed at runtime
/// expire after the cache TTL and read as misses afterwards.
pub struct InMemoryPromptCache {
    entries: DashMap<StoreId, CachedPrompts>,
    ttl: Duration,
}

impl InMemoryPromptCache {
    pub fn new(ttl: Duration) -> Self {
        Self {
            entries: DashMap::new(),
            ttl,
        }
    }

    /// Cache preloaded with pinned prompts
    pub fn with_stores(ttl: Duration, stores: &BTreeMap<String, StorePrompts>) -> Self {
        let cache = Self::new(ttl);
        for (store_id, prompts) in stores {
            cache.entries.insert(
                StoreId::new(store_id.clone()),
                CachedPrompts {
                    prompts: prompts.clone(),
                    expires_at: None,
                },
            );
        }
        cache
    }

    pub fn insert(&self, store_id: StoreId, prompts: StorePrompts) {
        self.entries.insert(
            store_id,
            CachedPrompts {
                prompts,
                expires_at: Some(Instant::now() + self.ttl),
            },
        );
    }

    pub fn invalidate(&self, store_id: &StoreId) {
        self.entries.remove(store_id);
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[async_trait]
impl PromptCache for InMemoryPromptCache {
    async fn get_cached_store_ai_prompts(&self, store_id: &StoreId) -> Result<Option<StorePrompts>> {
        let now = Instant::now();
        let expired = match self.entries.get(store_id) {
            None => return Ok(None),
            Some(entry) => match entry.expires_at {
                Some(at) if at <= now => true,
                _ => return Ok(Some(entry.prompts.clone())),
            },
        };

        if expired {
            debug!("Prompt cache entry for store {} expired", store_id);
            self.entries.remove_if(store_id, |_, e| e.expires_at.map_or(false, |at| at <= now));
        }
        Ok(None)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn prompts(category: &str) -> StorePrompts {
        StorePrompts {
            system_prompt: "Take pizza orders".to_string(),
            business_category: category.to_string(),
            wording: BTreeMap::new(),
        }
    }

    #[tokio::test]
    async fn test_hit_and_miss() {
        let cache = InMemoryPromptCache::new(Duration::from_secs(60));
        cache.insert(StoreId::new("store-1"), prompts("restaurant"));

        let hit = cache
            .get_cached_store_ai_prompts(&StoreId::new("store-1"))
            .await
            .unwrap();
        assert_eq!(hit.unwrap().business_category, "restaurant");

        let miss = cache
            .get_cached_store_ai_prompts(&StoreId::new("store-2"))
            .await
            .unwrap();
        assert!(miss.is_none());
    }

    #[tokio::test]
    async fn test_expired_entry_is_a_miss() {
        let cache = InMemoryPromptCache::new(Duration::ZERO);
        cache.insert(StoreId::new("store-1"), prompts("salon"));

        let result = cache
            .get_cached_store_ai_prompts(&StoreId::new("store-1"))
            .await
            .unwrap();
        assert!(result.is_none());
        assert!(cache.is_empty());
    }

    #[tokio::test]
    async fn test_configured_stores_are_pinned() {
        let mut stores = BTreeMap::new();
        stores.insert("store-9".to_string(), prompts("clinic"));
        let cache = InMemoryPromptCache::with_stores(Duration::ZERO, &stores);

        let result = cache
            .get_cached_store_ai_prompts(&StoreId::new("store-9"))
            .await
            .unwrap();
        assert_eq!(result.unwrap().business_category, "clinic");
    }
}
