//! In-memory decode cache for background images
//!
//! Keeps every decoded image for the rest of the session and collapses
//! concurrent loads of the same URL into one fetch. Batch preloads fan out
//! over every URL at once and wait for all of them to settle.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use futures::future::{BoxFuture, FutureExt, Shared};
use futures::stream::{FuturesUnordered, StreamExt};
use log::{debug, warn};
use serde::Serialize;

use super::loader::{DecodedImage, ImageLoader};
use crate::catalog::Catalog;
use crate::error::LoadError;

/// A load in progress, awaitable by any number of callers
type LoadFuture = Shared<BoxFuture<'static, Result<(), LoadError>>>;

/// Progress of a batch preload.
///
/// `loaded` counts every URL that has settled, failed or not.
#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize)]
pub struct CacheStatus {
    pub loaded: usize,
    pub total: usize,
    pub failed: Vec<String>,
}

/// Decode cache occupancy
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ImageCacheStats {
    pub cached: usize,
    pub loading: usize,
}

#[derive(Default)]
struct State {
    decoded: HashMap<String, Arc<DecodedImage>>,
    in_flight: HashMap<String, LoadFuture>,
    /// Bumped by `clear`; loads from an older generation do not write back
    generation: u64,
}

/// Session-wide cache of decoded background images.
///
/// Loads have no timeout: a load that never finishes keeps its in-flight
/// slot, and later `preload` calls for that URL wait on it.
pub struct ImageCache {
    catalog: Arc<Catalog>,
    loader: Arc<dyn ImageLoader>,
    state: Arc<Mutex<State>>,
}

impl ImageCache {
    pub fn new(catalog: Arc<Catalog>, loader: Arc<dyn ImageLoader>) -> Self {
        Self {
            catalog,
            loader,
            state: Arc::new(Mutex::new(State::default())),
        }
    }

    /// Load and decode one image.
    ///
    /// Resolves at once if already decoded, joins the pending load if one is
    /// in flight, and otherwise starts a new load. A failed load leaves no
    /// trace, so it can be retried.
    pub async fn preload(&self, url: &str) -> Result<(), LoadError> {
        let pending = {
            let mut state = lock(&self.state);
            if state.decoded.contains_key(url) {
                return Ok(());
            }
            match state.in_flight.get(url) {
                Some(pending) => {
                    debug!("Joining in-flight load: {}", url);
                    pending.clone()
                }
                None => {
                    let pending = self.start_load(url, state.generation);
                    state.in_flight.insert(url.to_string(), pending.clone());
                    pending
                }
            }
        };

        pending.await
    }

    /// Preload every URL in the catalog
    pub async fn preload_all(&self) -> CacheStatus {
        self.preload_all_with_progress(|_| {}).await
    }

    /// Preload every URL in the catalog, reporting after each one settles
    pub async fn preload_all_with_progress<F>(&self, on_progress: F) -> CacheStatus
    where
        F: FnMut(&CacheStatus),
    {
        self.preload_urls(self.catalog.all_urls(), on_progress).await
    }

    /// Preload one category; unknown categories are empty
    pub async fn preload_category(&self, category: &str) -> CacheStatus {
        self.preload_category_with_progress(category, |_| {}).await
    }

    pub async fn preload_category_with_progress<F>(
        &self,
        category: &str,
        on_progress: F,
    ) -> CacheStatus
    where
        F: FnMut(&CacheStatus),
    {
        self.preload_urls(self.catalog.urls(category).to_vec(), on_progress)
            .await
    }

    /// True if the URL is decoded and held
    pub fn is_cached(&self, url: &str) -> bool {
        lock(&self.state).decoded.contains_key(url)
    }

    /// Decoded handle for a URL, if held
    pub fn get(&self, url: &str) -> Option<Arc<DecodedImage>> {
        lock(&self.state).decoded.get(url).cloned()
    }

    pub fn stats(&self) -> ImageCacheStats {
        let state = lock(&self.state);
        ImageCacheStats {
            cached: state.decoded.len(),
            loading: state.in_flight.len(),
        }
    }

    /// Forget every decoded image and in-flight load
    pub fn clear(&self) {
        let mut state = lock(&self.state);
        state.decoded.clear();
        state.in_flight.clear();
        state.generation += 1;
    }

    pub fn catalog(&self) -> &Catalog {
        &self.catalog
    }

    /// Fan out over `urls` and wait for all of them; never fails as a whole
    async fn preload_urls<F>(&self, urls: Vec<String>, mut on_progress: F) -> CacheStatus
    where
        F: FnMut(&CacheStatus),
    {
        let mut status = CacheStatus {
            loaded: 0,
            total: urls.len(),
            failed: Vec::new(),
        };

        let mut pending: FuturesUnordered<_> = urls
            .into_iter()
            .map(|url| async move {
                let result = self.preload(&url).await;
                (url, result)
            })
            .collect();

        while let Some((url, result)) = pending.next().await {
            status.loaded += 1;
            if let Err(e) = result {
                warn!("Failed to cache image: {}", e);
                status.failed.push(url);
            }
            on_progress(&status);
        }

        debug!(
            "Preloaded {}/{} images ({} failed)",
            status.loaded - status.failed.len(),
            status.total,
            status.failed.len()
        );
        status
    }

    /// Spawn the load so it completes even if every waiter goes away
    fn start_load(&self, url: &str, generation: u64) -> LoadFuture {
        let loader = self.loader.clone();
        let state = self.state.clone();
        let key = url.to_string();

        let task = tokio::spawn(async move {
            let result = loader.load(&key).await;

            let mut state = lock(&state);
            if state.generation != generation {
                return result.map(|_| ());
            }
            state.in_flight.remove(&key);
            let image = result?;
            state.decoded.insert(key, Arc::new(image));
            Ok(())
        });

        let url = url.to_string();
        async move {
            task.await.unwrap_or_else(|e| {
                Err(LoadError::Fetch {
                    url,
                    reason: e.to_string(),
                })
            })
        }
        .boxed()
        .shared()
    }
}

fn lock(state: &Mutex<State>) -> MutexGuard<'_, State> {
    state.lock().unwrap_or_else(PoisonError::into_inner)
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;
    use tokio::sync::Notify;

    use crate::client::FetchImageLoader;
    use crate::network::MockFetcher;
    use crate::network::mock::png_bytes;

    fn catalog() -> Arc<Catalog> {
        Arc::new(
            Catalog::from_pairs([
                ("a", vec!["https://images.unsplash.com/u1", "https://images.unsplash.com/u2"]),
                ("b", vec!["https://images.unsplash.com/u3"]),
            ])
            .unwrap(),
        )
    }

    fn cache_with(fetcher: MockFetcher) -> (ImageCache, Arc<MockFetcher>) {
        let fetcher = Arc::new(fetcher);
        let loader = Arc::new(FetchImageLoader::new(fetcher.clone()));
        (ImageCache::new(catalog(), loader), fetcher)
    }

    fn all_ok() -> MockFetcher {
        MockFetcher::new()
            .with_response("https://images.unsplash.com/u1", 200, png_bytes())
            .with_response("https://images.unsplash.com/u2", 200, png_bytes())
            .with_response("https://images.unsplash.com/u3", 200, png_bytes())
    }

    /// Loader that blocks until released, counting calls
    struct GatedLoader {
        calls: AtomicUsize,
        gate: Notify,
    }

    #[async_trait]
    impl ImageLoader for GatedLoader {
        async fn load(&self, url: &str) -> Result<DecodedImage, LoadError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.gate.notified().await;
            Ok(DecodedImage {
                url: url.to_string(),
                image: image::DynamicImage::new_rgb8(1, 1),
            })
        }
    }

    #[tokio::test]
    async fn test_preload_caches_decoded_image() {
        let (cache, _fetcher) = cache_with(all_ok());
        let url = "https://images.unsplash.com/u1";

        assert!(!cache.is_cached(url));
        cache.preload(url).await.unwrap();

        assert!(cache.is_cached(url));
        assert_eq!(cache.get(url).unwrap().width(), 3);
        assert_eq!(
            cache.stats(),
            ImageCacheStats {
                cached: 1,
                loading: 0
            }
        );
    }

    #[tokio::test]
    async fn test_preload_is_idempotent() {
        let (cache, fetcher) = cache_with(all_ok());
        let url = "https://images.unsplash.com/u1";

        cache.preload(url).await.unwrap();
        cache.preload(url).await.unwrap();
        assert_eq!(fetcher.calls(url), 1);
    }

    #[tokio::test]
    async fn test_concurrent_preloads_share_one_fetch() {
        let url = "https://images.unsplash.com/u1";
        let fetcher = all_ok().with_delay(Duration::from_millis(30));
        let (cache, fetcher) = cache_with(fetcher);

        let (a, b, c) = tokio::join!(cache.preload(url), cache.preload(url), cache.preload(url));
        assert!(a.is_ok() && b.is_ok() && c.is_ok());
        assert_eq!(fetcher.calls(url), 1);
    }

    #[tokio::test]
    async fn test_failed_preload_can_be_retried() {
        let url = "https://images.unsplash.com/u1";
        let (cache, fetcher) = cache_with(MockFetcher::new().with_status(url, 500));

        assert!(cache.preload(url).await.is_err());
        assert!(!cache.is_cached(url));
        assert_eq!(cache.stats().loading, 0);

        fetcher.set_response(url, 200, png_bytes());
        cache.preload(url).await.unwrap();
        assert!(cache.is_cached(url));
        assert_eq!(fetcher.calls(url), 2);
    }

    #[tokio::test]
    async fn test_preload_all_counts_every_url() {
        let fetcher = MockFetcher::new()
            .with_response("https://images.unsplash.com/u1", 200, png_bytes())
            .with_status("https://images.unsplash.com/u2", 404)
            .with_response("https://images.unsplash.com/u3", 200, "garbage");
        let (cache, _fetcher) = cache_with(fetcher);

        let mut snapshots = Vec::new();
        let mut status = cache
            .preload_all_with_progress(|s| snapshots.push(s.loaded))
            .await;

        assert_eq!(status.loaded, status.total);
        assert_eq!(status.total, 3);
        status.failed.sort();
        assert_eq!(
            status.failed,
            vec![
                "https://images.unsplash.com/u2".to_string(),
                "https://images.unsplash.com/u3".to_string()
            ]
        );
        assert_eq!(snapshots, vec![1, 2, 3]);
        assert!(cache.is_cached("https://images.unsplash.com/u1"));
    }

    #[tokio::test]
    async fn test_preload_category_scoped() {
        let (cache, fetcher) = cache_with(all_ok());

        let status = cache.preload_category("b").await;

        assert_eq!(
            status,
            CacheStatus {
                loaded: 1,
                total: 1,
                failed: vec![]
            }
        );
        assert!(cache.is_cached("https://images.unsplash.com/u3"));
        assert!(!cache.is_cached("https://images.unsplash.com/u1"));
        assert!(!cache.is_cached("https://images.unsplash.com/u2"));
        assert_eq!(fetcher.calls("https://images.unsplash.com/u1"), 0);
        assert_eq!(fetcher.calls("https://images.unsplash.com/u2"), 0);
    }

    #[tokio::test]
    async fn test_unknown_category_is_empty() {
        let (cache, fetcher) = cache_with(all_ok());
        let status = cache.preload_category("nope").await;
        assert_eq!(status, CacheStatus::default());
        assert_eq!(fetcher.total_calls(), 0);
    }

    #[tokio::test]
    async fn test_clear_forgets_everything() {
        let (cache, fetcher) = cache_with(all_ok());
        cache.preload_all().await;
        let urls = cache.catalog().all_urls();
        assert!(urls.iter().all(|u| cache.is_cached(u)));

        cache.clear();
        assert!(urls.iter().all(|u| !cache.is_cached(u)));
        assert_eq!(cache.stats(), ImageCacheStats::default());

        // Behaves like a first run afterwards
        cache.preload(&urls[0]).await.unwrap();
        assert_eq!(fetcher.calls(&urls[0]), 2);
    }

    #[tokio::test]
    async fn test_clear_during_load_does_not_repopulate() {
        let loader = Arc::new(GatedLoader {
            calls: AtomicUsize::new(0),
            gate: Notify::new(),
        });
        let cache = Arc::new(ImageCache::new(catalog(), loader.clone()));
        let url = "https://images.unsplash.com/u1";

        let first = {
            let cache = cache.clone();
            tokio::spawn(async move { cache.preload(url).await })
        };
        while loader.calls.load(Ordering::SeqCst) == 0 {
            tokio::task::yield_now().await;
        }
        assert_eq!(cache.stats().loading, 1);

        cache.clear();
        loader.gate.notify_one();
        first.await.unwrap().unwrap();

        assert!(!cache.is_cached(url));
        assert_eq!(cache.stats().loading, 0);
    }

    #[tokio::test]
    async fn test_load_survives_dropped_waiter() {
        let loader = Arc::new(GatedLoader {
            calls: AtomicUsize::new(0),
            gate: Notify::new(),
        });
        let cache = ImageCache::new(catalog(), loader.clone());
        let url = "https://images.unsplash.com/u1";

        // Start a load and give up on it straight away
        let _ = tokio::time::timeout(Duration::from_millis(10), cache.preload(url)).await;
        loader.gate.notify_one();

        cache.preload(url).await.unwrap();
        assert!(cache.is_cached(url));
        assert_eq!(loader.calls.load(Ordering::SeqCst), 1);
    }
}
