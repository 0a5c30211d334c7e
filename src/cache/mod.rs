use std::{
    collections::{HashMap, VecDeque},
    sync::{Arc, Mutex, MutexGuard},
    time::{Duration, Instant},
};

use crate::model::TaskKind;

/// Cache key for one submission: `model:task:formatted_prompt`.
pub fn cache_key(model: &str, task: TaskKind, formatted_prompt: &str) -> String {
    format!("{model}:{task}:{formatted_prompt}")
}

/// Completed responses keyed by [`cache_key`], with a per-entry TTL and a
/// bounded size. Oldest insertions are evicted first. Clones share storage.
#[derive(Clone)]
pub struct ResponseCache {
    inner: Arc<Mutex<CacheInner>>,
    ttl: Duration,
    capacity: usize,
}

#[derive(Default)]
struct CacheInner {
    entries: HashMap<String, CacheEntry>,
    order: VecDeque<String>,
}

struct CacheEntry {
    text: String,
    inserted: Instant,
}

impl ResponseCache {
    pub fn new(ttl: Duration, capacity: usize) -> Self {
        Self {
            inner: Arc::new(Mutex::new(CacheInner::default())),
            ttl,
            capacity,
        }
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn get(&self, key: &str) -> Option<String> {
        self.get_at(key, Instant::now())
    }

    pub fn insert(&self, key: String, text: String) {
        self.insert_at(key, text, Instant::now());
    }

    pub fn len(&self) -> usize {
        self.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn clear(&self) {
        let mut inner = self.lock();
        inner.entries.clear();
        inner.order.clear();
    }

    fn get_at(&self, key: &str, now: Instant) -> Option<String> {
        let mut inner = self.lock();
        let expired = match inner.entries.get(key) {
            Some(entry) if now.saturating_duration_since(entry.inserted) < self.ttl => {
                return Some(entry.text.clone());
            }
            Some(_) => true,
            None => false,
        };
        if expired {
            inner.remove(key);
        }
        None
    }

    fn insert_at(&self, key: String, text: String, now: Instant) {
        if self.capacity == 0 {
            return;
        }
        let mut inner = self.lock();
        inner.remove(&key);
        inner.order.push_back(key.clone());
        inner.entries.insert(
            key,
            CacheEntry {
                text,
                inserted: now,
            },
        );
        while inner.entries.len() > self.capacity {
            let Some(oldest) = inner.order.pop_front() else {
                break;
            };
            inner.entries.remove(&oldest);
        }
    }

    fn lock(&self) -> MutexGuard<'_, CacheInner> {
        self.inner
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl CacheInner {
    fn remove(&mut self, key: &str) {
        if self.entries.remove(key).is_some() {
            self.order.retain(|k| k != key);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn key_combines_model_task_and_prompt() {
        assert_eq!(
            cache_key("llama", TaskKind::Translate, "Translate \"chat\"."),
            "llama:translate:Translate \"chat\"."
        );
        assert_ne!(
            cache_key("llama", TaskKind::Explain, "x"),
            cache_key("devstral", TaskKind::Explain, "x")
        );
    }

    #[test]
    fn returns_text_unchanged() {
        let cache = ResponseCache::new(Duration::from_secs(60), 8);
        cache.insert("k".into(), "Hello, world".into());
        assert_eq!(cache.get("k").as_deref(), Some("Hello, world"));
        assert_eq!(cache.get("other"), None);
    }

    #[test]
    fn expires_entries_after_ttl() {
        let cache = ResponseCache::new(Duration::from_secs(30), 8);
        let start = Instant::now();
        cache.insert_at("k".into(), "v".into(), start);

        assert!(cache.get_at("k", start + Duration::from_secs(29)).is_some());
        assert!(cache.get_at("k", start + Duration::from_secs(30)).is_none());
        assert!(cache.is_empty());
    }

    #[test]
    fn evicts_oldest_when_full() {
        let cache = ResponseCache::new(Duration::from_secs(60), 2);
        cache.insert("a".into(), "1".into());
        cache.insert("b".into(), "2".into());
        cache.insert("a".into(), "1b".into());
        cache.insert("c".into(), "3".into());

        assert_eq!(cache.len(), 2);
        assert_eq!(cache.get("b"), None);
        assert_eq!(cache.get("a").as_deref(), Some("1b"));
        assert_eq!(cache.get("c").as_deref(), Some("3"));
    }

    #[test]
    fn zero_capacity_stores_nothing() {
        let cache = ResponseCache::new(Duration::from_secs(60), 0);
        cache.insert("k".into(), "v".into());
        assert!(cache.get("k").is_none());
    }

    #[test]
    fn clones_share_entries() {
        let cache = ResponseCache::new(Duration::from_secs(60), 4);
        let other = cache.clone();
        other.insert("k".into(), "v".into());
        assert_eq!(cache.get("k").as_deref(), Some("v"));
        cache.clear();
        assert!(other.is_empty());
    }
}
