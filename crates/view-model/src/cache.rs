//! Cache of live views keyed by subscription key.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::Mutex;

use crate::selector::SubscriptionKey;

/// Maps subscription keys to shared view instances.
///
/// The cache never evicts on its own; entries live until removed. Lookups
/// and inserts happen under one lock, so concurrent misses for a key agree
/// on a single instance.
pub struct ViewCache<V> {
    views: Mutex<HashMap<SubscriptionKey, Arc<V>>>,
}

impl<V> ViewCache<V> {
    /// Creates an empty cache.
    pub fn new() -> Self {
        Self {
            views: Mutex::new(HashMap::new()),
        }
    }

    /// Returns the cached instance for `key`, creating it with `create` on a
    /// miss. `create` must not suspend; it runs while the cache is locked.
    ///
    /// The boolean is true when this call inserted the instance.
    pub async fn get_or_insert_with(
        &self,
        key: &SubscriptionKey,
        create: impl FnOnce() -> Arc<V>,
    ) -> (Arc<V>, bool) {
        let mut views = self.views.lock().await;
        if let Some(existing) = views.get(key) {
            return (Arc::clone(existing), false);
        }
        let view = create();
        views.insert(key.clone(), Arc::clone(&view));
        metrics::gauge!("view_model_cached_views").set(views.len() as f64);
        (view, true)
    }

    /// Returns the cached instance for `key`.
    pub async fn get(&self, key: &SubscriptionKey) -> Option<Arc<V>> {
        self.views.lock().await.get(key).cloned()
    }

    /// Removes and returns the instance for `key`.
    pub async fn remove(&self, key: &SubscriptionKey) -> Option<Arc<V>> {
        let mut views = self.views.lock().await;
        let removed = views.remove(key);
        metrics::gauge!("view_model_cached_views").set(views.len() as f64);
        removed
    }

    /// Removes and returns every cached instance.
    pub async fn drain(&self) -> Vec<Arc<V>> {
        let mut views = self.views.lock().await;
        let drained = views.drain().map(|(_, view)| view).collect();
        metrics::gauge!("view_model_cached_views").set(0.0);
        drained
    }

    /// Returns the number of cached instances.
    pub async fn len(&self) -> usize {
        self.views.lock().await.len()
    }

    /// Whether the cache is empty.
    pub async fn is_empty(&self) -> bool {
        self.views.lock().await.is_empty()
    }
}

impl<V> Default for ViewCache<V> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::selector::Selector;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn key(ids: &[&str]) -> SubscriptionKey {
        SubscriptionKey::resolve(&Selector::aggregates(ids.iter().copied())).unwrap()
    }

    #[tokio::test]
    async fn miss_inserts_and_hit_reuses() {
        let cache = ViewCache::new();

        let (first, inserted) = cache.get_or_insert_with(&key(&["a"]), || Arc::new(1)).await;
        assert!(inserted);
        let (second, inserted) = cache.get_or_insert_with(&key(&["a"]), || Arc::new(2)).await;
        assert!(!inserted);

        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(*second, 1);
    }

    #[tokio::test]
    async fn remove_and_drain() {
        let cache = ViewCache::new();
        cache.get_or_insert_with(&key(&["a"]), || Arc::new("a")).await;
        cache.get_or_insert_with(&key(&["b"]), || Arc::new("b")).await;
        cache.get_or_insert_with(&SubscriptionKey::All, || Arc::new("*")).await;
        assert_eq!(cache.len().await, 3);

        assert_eq!(cache.remove(&key(&["a"])).await.as_deref(), Some(&"a"));
        assert!(cache.remove(&key(&["a"])).await.is_none());
        assert!(cache.get(&key(&["a"])).await.is_none());

        let drained = cache.drain().await;
        assert_eq!(drained.len(), 2);
        assert!(cache.is_empty().await);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_misses_create_once() {
        let cache = Arc::new(ViewCache::new());
        let created = Arc::new(AtomicUsize::new(0));

        let tasks: Vec<_> = (0..16)
            .map(|_| {
                let cache = Arc::clone(&cache);
                let created = Arc::clone(&created);
                tokio::spawn(async move {
                    cache
                        .get_or_insert_with(&key(&["b", "a"]), || {
                            created.fetch_add(1, Ordering::SeqCst);
                            Arc::new(())
                        })
                        .await
                        .0
                })
            })
            .collect();

        let mut views = Vec::new();
        for task in tasks {
            views.push(task.await.unwrap());
        }

        assert_eq!(created.load(Ordering::SeqCst), 1);
        assert!(views.windows(2).all(|w| Arc::ptr_eq(&w[0], &w[1])));
    }
}
