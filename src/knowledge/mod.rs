pub mod fetcher;

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use chrono::{DateTime, TimeDelta, Utc};
use serde::Serialize;

use crate::persona::KnowledgeLink;
pub use fetcher::{ContentFetcher, HttpFetcher};

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct CacheKey {
    link_id: String,
    url: String,
}

impl CacheKey {
    fn of(link: &KnowledgeLink) -> Self {
        Self {
            link_id: link.id.clone(),
            url: link.url.clone(),
        }
    }
}

#[derive(Debug, Clone)]
struct CacheEntry {
    content: String,
    fetched_at: DateTime<Utc>,
}

impl CacheEntry {
    fn is_fresh(&self, now: DateTime<Utc>, ttl: TimeDelta) -> bool {
        now - self.fetched_at < ttl
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct CacheStats {
    pub entries: usize,
    pub oldest_fetch: Option<DateTime<Utc>>,
    pub newest_fetch: Option<DateTime<Utc>>,
}

/// Fetched knowledge-link text, keyed by link id and url.
///
/// Stale entries stay in the map until the next `resolve` for the same
/// link replaces them. The lock is never held across a fetch, so two
/// concurrent compositions can both fetch the same link; the later write
/// wins.
pub struct LinkCache {
    fetcher: Arc<dyn ContentFetcher>,
    entries: Mutex<HashMap<CacheKey, CacheEntry>>,
}

impl LinkCache {
    pub fn new(fetcher: Arc<dyn ContentFetcher>) -> Self {
        Self {
            fetcher,
            entries: Mutex::new(HashMap::new()),
        }
    }

    pub fn fetcher(&self) -> &Arc<dyn ContentFetcher> {
        &self.fetcher
    }

    /// Return cached content for `link` if it was fetched less than `ttl`
    /// ago, otherwise fetch, store and return fresh content.
    pub async fn resolve(&self, link: &KnowledgeLink, ttl: TimeDelta) -> String {
        self.resolve_at(link, ttl, Utc::now()).await
    }

    async fn resolve_at(&self, link: &KnowledgeLink, ttl: TimeDelta, now: DateTime<Utc>) -> String {
        let key = CacheKey::of(link);
        let cached = self
            .lock()
            .get(&key)
            .filter(|e| e.is_fresh(now, ttl))
            .map(|e| e.content.clone());
        if let Some(content) = cached {
            tracing::debug!("Knowledge cache hit: {} ({})", link.id, link.url);
            return content;
        }

        let content = self.fetcher.fetch(&link.url, link.kind).await;
        self.lock().insert(
            key,
            CacheEntry {
                content: content.clone(),
                fetched_at: now,
            },
        );
        content
    }

    /// Remove every entry, returning how many there were.
    pub fn clear(&self) -> usize {
        let mut entries = self.lock();
        let removed = entries.len();
        entries.clear();
        tracing::info!("Cleared knowledge cache ({removed} items)");
        removed
    }

    /// Drop entries that no longer belong to any of `links`, e.g. after an
    /// admin changed a link's URL or deleted the link.
    pub fn prune(&self, links: &[KnowledgeLink]) -> usize {
        let live: std::collections::HashSet<CacheKey> = links.iter().map(CacheKey::of).collect();
        let mut entries = self.lock();
        let before = entries.len();
        entries.retain(|key, _| live.contains(key));
        let removed = before - entries.len();
        if removed > 0 {
            tracing::info!("Pruned {removed} knowledge cache entries for removed links");
        }
        removed
    }

    pub fn stats(&self) -> CacheStats {
        let entries = self.lock();
        CacheStats {
            entries: entries.len(),
            oldest_fetch: entries.values().map(|e| e.fetched_at).min(),
            newest_fetch: entries.values().map(|e| e.fetched_at).max(),
        }
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<CacheKey, CacheEntry>> {
        self.entries.lock().expect("knowledge cache lock poisoned")
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::persona::{LinkType, Priority};
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Returns `"{url}#{n}"` where n counts calls, so re-fetches are visible.
    #[derive(Default)]
    pub(crate) struct CountingFetcher {
        pub calls: AtomicUsize,
    }

    #[async_trait::async_trait]
    impl ContentFetcher for CountingFetcher {
        async fn fetch(&self, url: &str, _kind: LinkType) -> String {
            let n = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
            format!("{url}#{n}")
        }
    }

    pub(crate) fn link(id: &str, url: &str) -> KnowledgeLink {
        KnowledgeLink {
            id: id.into(),
            title: format!("Link {id}"),
            url: url.into(),
            kind: LinkType::Web,
            category: "tools".into(),
            description: String::new(),
            priority: Priority::Medium,
            active: true,
        }
    }

    fn setup() -> (Arc<CountingFetcher>, LinkCache) {
        let fetcher = Arc::new(CountingFetcher::default());
        let cache = LinkCache::new(fetcher.clone());
        (fetcher, cache)
    }

    fn calls(f: &CountingFetcher) -> usize {
        f.calls.load(Ordering::SeqCst)
    }

    #[tokio::test]
    async fn test_first_resolve_fetches_once_and_stores() {
        let (fetcher, cache) = setup();
        let content = cache.resolve(&link("1", "https://a.example"), TimeDelta::hours(24)).await;
        assert_eq!(content, "https://a.example#1");
        assert_eq!(calls(&fetcher), 1);
        assert_eq!(cache.len(), 1);
    }

    #[tokio::test]
    async fn test_resolve_within_window_uses_cache() {
        let (fetcher, cache) = setup();
        let l = link("1", "https://a.example");
        let first = cache.resolve(&l, TimeDelta::hours(24)).await;
        let second = cache.resolve(&l, TimeDelta::hours(24)).await;
        assert_eq!(first, second);
        assert_eq!(calls(&fetcher), 1);
    }

    #[tokio::test]
    async fn test_resolve_after_window_refetches_once() {
        let (fetcher, cache) = setup();
        let l = link("1", "https://a.example");
        let ttl = TimeDelta::hours(24);
        let t0 = Utc::now();

        cache.resolve_at(&l, ttl, t0).await;
        cache.resolve_at(&l, ttl, t0 + TimeDelta::hours(23)).await;
        assert_eq!(calls(&fetcher), 1);

        let refreshed = cache.resolve_at(&l, ttl, t0 + TimeDelta::hours(24)).await;
        assert_eq!(refreshed, "https://a.example#2");
        assert_eq!(calls(&fetcher), 2);
        assert_eq!(cache.len(), 1);
    }

    #[tokio::test]
    async fn test_shorter_ttl_applies_to_existing_entries() {
        let (fetcher, cache) = setup();
        let l = link("1", "https://a.example");
        let t0 = Utc::now();
        cache.resolve_at(&l, TimeDelta::hours(24), t0).await;
        cache.resolve_at(&l, TimeDelta::hours(1), t0 + TimeDelta::hours(2)).await;
        assert_eq!(calls(&fetcher), 2);
    }

    #[tokio::test]
    async fn test_clear_forces_refetch() {
        let (fetcher, cache) = setup();
        let a = link("1", "https://a.example");
        let b = link("2", "https://b.example");
        cache.resolve(&a, TimeDelta::hours(24)).await;
        cache.resolve(&b, TimeDelta::hours(24)).await;

        assert_eq!(cache.clear(), 2);
        assert_eq!(cache.len(), 0);

        cache.resolve(&a, TimeDelta::hours(24)).await;
        assert_eq!(calls(&fetcher), 3);
    }

    #[tokio::test]
    async fn test_url_change_is_a_new_key_and_prune_drops_old() {
        let (fetcher, cache) = setup();
        let old = link("1", "https://old.example");
        let new = link("1", "https://new.example");
        cache.resolve(&old, TimeDelta::hours(24)).await;
        cache.resolve(&new, TimeDelta::hours(24)).await;
        assert_eq!(calls(&fetcher), 2);
        assert_eq!(cache.len(), 2);

        assert_eq!(cache.prune(std::slice::from_ref(&new)), 1);
        assert_eq!(cache.len(), 1);
        cache.resolve(&new, TimeDelta::hours(24)).await;
        assert_eq!(calls(&fetcher), 2);
    }

    #[tokio::test]
    async fn test_stats_reports_entries() {
        let (_, cache) = setup();
        assert_eq!(cache.stats().entries, 0);
        assert!(cache.stats().oldest_fetch.is_none());
        cache.resolve(&link("1", "https://a.example"), TimeDelta::hours(24)).await;
        let stats = cache.stats();
        assert_eq!(stats.entries, 1);
        assert_eq!(stats.oldest_fetch, stats.newest_fetch);
    }
}
