//! Cache controller: request interception over durable stores
//!
//! One [`CacheController`] is one generation of the background controller. It
//! owns a versioned precache of build artifacts and the long-lived
//! background-image store, answers intercepted requests from them, and
//! services control messages from the cache client.

use std::sync::{Arc, Mutex};

use futures::future::{join_all, try_join_all};
use log::{debug, error, info, warn};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinSet;

use crate::cache::{CacheStorage, StoreLayout, request_key};
use crate::config::{Config, PrecacheEntry};
use crate::error::{CacheError, Error, FetchError, Result};
use crate::network::{Fetcher, Request, Response};
use crate::protocol::ControlMessage;

pub mod host;
pub mod lifecycle;

pub use host::{ControllerHandle, ControllerHost, Registration};
pub use lifecycle::LifecycleState;

/// Durable storage shared by every controller generation
pub type SharedStorage = Arc<Mutex<CacheStorage>>;

/// Response header recording which artifact revision a precache entry holds
const REVISION_HEADER: &str = "x-precache-revision";

/// Everything a controller generation needs to know about its environment
#[derive(Debug, Clone)]
pub struct ControllerOptions {
    pub layout: StoreLayout,
    pub image_host: String,
    pub manifest: Vec<PrecacheEntry>,
}

impl ControllerOptions {
    pub fn from_config(config: &Config) -> Self {
        Self {
            layout: config.layout(),
            image_host: config.image_host.clone(),
            manifest: config.precache.manifest.clone(),
        }
    }
}

/// Outcome of a `CACHE_BACKGROUNDS` request
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct WarmReport {
    /// Fetched and written to the image store
    pub stored: Vec<String>,
    /// Fetched but not stored because the status was not 2xx
    pub skipped: Vec<String>,
    /// Network, URL, or store failure
    pub failed: Vec<String>,
}

/// Outcome of activation cleanup
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ActivationReport {
    pub deleted: Vec<String>,
    pub failed: Vec<String>,
}

enum WarmOutcome {
    Stored,
    Skipped,
    Failed,
}

/// One generation of the request-intercepting cache controller
pub struct CacheController {
    options: ControllerOptions,
    storage: SharedStorage,
    fetcher: Arc<dyn Fetcher>,
    state: watch::Sender<LifecycleState>,
    skip_waiting: watch::Sender<bool>,
}

impl CacheController {
    pub fn new(options: ControllerOptions, storage: SharedStorage, fetcher: Arc<dyn Fetcher>) -> Self {
        Self {
            options,
            storage,
            fetcher,
            state: watch::Sender::new(LifecycleState::Installing),
            skip_waiting: watch::Sender::new(false),
        }
    }

    pub fn options(&self) -> &ControllerOptions {
        &self.options
    }

    /// Current lifecycle state
    pub fn state(&self) -> LifecycleState {
        *self.state.borrow()
    }

    /// Watch lifecycle transitions
    pub fn subscribe(&self) -> watch::Receiver<LifecycleState> {
        self.state.subscribe()
    }

    pub(crate) fn set_state(&self, state: LifecycleState) {
        let previous = self.state.send_replace(state);
        if previous != state {
            debug!("Cache controller {} -> {}", previous, state);
        }
    }

    /// Install this generation: fill the current precache, then ask to skip
    /// the waiting phase. A failed install leaves the generation redundant.
    pub async fn install(&self) -> Result<()> {
        self.set_state(LifecycleState::Installing);
        let store = self.options.layout.precache_name();

        match self.precache(&store).await {
            Ok(fetched) => {
                info!(
                    "Installed cache controller ({} artifacts fetched into {})",
                    fetched, store
                );
                self.set_state(LifecycleState::Installed);
                self.skip_waiting();
                Ok(())
            }
            Err(e) => {
                error!("Cache controller install failed: {}", e);
                self.set_state(LifecycleState::Redundant);
                Err(e)
            }
        }
    }

    /// Request activation without waiting for old pages to close
    pub fn skip_waiting(&self) {
        self.skip_waiting.send_replace(true);
    }

    pub fn skip_waiting_requested(&self) -> bool {
        *self.skip_waiting.borrow()
    }

    /// Resolve once `skip_waiting` has been called
    pub async fn wait_for_skip_waiting(&self) {
        let mut rx = self.skip_waiting.subscribe();
        // The sender lives in self, so the channel cannot close while we wait
        let _ = rx.wait_for(|requested| *requested).await;
    }

    /// Activate: delete every store this generation does not own.
    ///
    /// Each deletion is independent; failures are logged and activation
    /// still completes.
    pub fn activate(&self) -> ActivationReport {
        self.set_state(LifecycleState::Activating);
        let mut report = ActivationReport::default();

        let names = match self.with_storage(|s| s.store_names()) {
            Ok(names) => names,
            Err(e) => {
                warn!("Could not list stores during activation: {}", e);
                Vec::new()
            }
        };

        for name in names {
            if self.options.layout.should_retain(&name) {
                continue;
            }
            match self.with_storage(|s| s.delete_store(&name)) {
                Ok(_) => {
                    info!("Deleted stale store {}", name);
                    report.deleted.push(name);
                }
                Err(e) => {
                    warn!("Failed to delete stale store {}: {}", name, e);
                    report.failed.push(name);
                }
            }
        }

        self.set_state(LifecycleState::Activated);
        report
    }

    /// Answer an intercepted request.
    ///
    /// Image-host requests never fail: a miss that cannot reach the network
    /// becomes a 503. Other requests fall through to the network and keep
    /// its errors.
    pub async fn handle_fetch(&self, request: &Request) -> std::result::Result<Response, FetchError> {
        if request.host() == Some(self.options.image_host.as_str()) {
            return Ok(self.fetch_image(request).await);
        }

        let key = request_key(request);
        match self.with_storage(|s| s.match_any(&key)) {
            Ok(Some(response)) => {
                debug!("Cache hit: {}", request.url);
                return Ok(response);
            }
            Ok(None) => {}
            Err(e) => warn!("Store lookup failed for {}: {}", request.url, e),
        }

        self.fetcher.fetch(request).await
    }

    /// Service one control message to completion
    pub async fn handle_message(&self, message: ControlMessage) {
        match message {
            ControlMessage::CacheBackgrounds { urls } => {
                let report = self.cache_backgrounds(&urls).await;
                info!(
                    "Cached {}/{} backgrounds ({} skipped, {} failed)",
                    report.stored.len(),
                    urls.len(),
                    report.skipped.len(),
                    report.failed.len()
                );
            }
            ControlMessage::SkipWaiting => self.skip_waiting(),
        }
    }

    /// Fetch every URL concurrently and keep successful responses in the
    /// image store. One URL failing never affects the others.
    pub async fn cache_backgrounds(&self, urls: &[String]) -> WarmReport {
        let store = self.options.layout.image_store.as_str();
        if let Err(e) = self.with_storage(|s| s.open_store(store)) {
            warn!("Could not open image store {}: {}", store, e);
        }

        let outcomes = join_all(urls.iter().map(|url| self.cache_one(store, url))).await;

        let mut report = WarmReport::default();
        for (url, outcome) in urls.iter().zip(outcomes) {
            match outcome {
                WarmOutcome::Stored => report.stored.push(url.clone()),
                WarmOutcome::Skipped => report.skipped.push(url.clone()),
                WarmOutcome::Failed => report.failed.push(url.clone()),
            }
        }
        report
    }

    /// Event loop: every message gets its own task, so a batch stuck on a
    /// hung fetch never holds back later messages. Returns once every sender
    /// is gone and the outstanding handlers have finished.
    pub async fn run(self: Arc<Self>, mut messages: mpsc::UnboundedReceiver<ControlMessage>) {
        let mut handlers = JoinSet::new();
        loop {
            tokio::select! {
                message = messages.recv() => match message {
                    Some(message) => {
                        let controller = self.clone();
                        handlers.spawn(async move { controller.handle_message(message).await });
                    }
                    None => break,
                },
                Some(_) = handlers.join_next(), if !handlers.is_empty() => {}
            }
        }
        while handlers.join_next().await.is_some() {}
        debug!("Control channel closed");
    }

    async fn fetch_image(&self, request: &Request) -> Response {
        let store = self.options.layout.image_store.as_str();
        let key = request_key(request);

        match self.with_storage(|s| s.match_in(store, &key)) {
            Ok(Some(response)) => {
                debug!("Cache hit: {}", request.url);
                return response;
            }
            Ok(None) => {}
            Err(e) => warn!("Image store lookup failed for {}: {}", request.url, e),
        }

        match self.fetcher.fetch(request).await {
            Ok(response) => {
                if response.ok()
                    && let Err(e) = self.with_storage(|s| s.put(store, request, &response))
                {
                    warn!("Failed to store {}: {}", request.url, e);
                }
                response
            }
            Err(e) => {
                warn!("Image unavailable offline: {}: {}", request.url, e);
                Response::offline_image()
            }
        }
    }

    async fn cache_one(&self, store: &str, url: &str) -> WarmOutcome {
        let request = match Request::get(url) {
            Ok(request) => request,
            Err(e) => {
                warn!("Failed to cache: {}: {}", url, e);
                return WarmOutcome::Failed;
            }
        };

        let response = match self.fetcher.fetch(&request).await {
            Ok(response) => response,
            Err(e) => {
                warn!("Failed to cache: {}: {}", url, e);
                return WarmOutcome::Failed;
            }
        };

        if !response.ok() {
            debug!("Not caching {} (HTTP {})", url, response.status);
            return WarmOutcome::Skipped;
        }

        match self.with_storage(|s| s.put(store, &request, &response)) {
            Ok(()) => WarmOutcome::Stored,
            Err(e) => {
                warn!("Failed to cache: {}: {}", url, e);
                WarmOutcome::Failed
            }
        }
    }

    /// Fetch manifest entries missing from `store`; returns how many were fetched
    async fn precache(&self, store: &str) -> Result<usize> {
        self.with_storage(|s| s.open_store(store))?;

        let mut pending = Vec::new();
        for entry in &self.options.manifest {
            let request = Request::get(&entry.url)?;
            let existing = self.with_storage(|s| s.match_in(store, &request_key(&request)))?;
            let up_to_date = existing.is_some_and(|r| {
                r.header(REVISION_HEADER) == entry.revision.as_deref()
            });
            if up_to_date {
                debug!("Precache entry up to date: {}", entry.url);
            } else {
                pending.push((request, entry.revision.clone()));
            }
        }

        let fetched = try_join_all(pending.into_iter().map(|(request, revision)| async move {
            let mut response = self.fetcher.fetch(&request).await?;
            if !response.ok() {
                return Err(Error::Other(format!(
                    "precache of {} returned HTTP {}",
                    request.url, response.status
                )));
            }
            if let Some(revision) = revision {
                response.headers.push((REVISION_HEADER.to_string(), revision));
            }
            Ok::<_, Error>((request, response))
        }))
        .await?;

        for (request, response) in &fetched {
            self.with_storage(|s| s.put(store, request, response))?;
        }
        Ok(fetched.len())
    }

    fn with_storage<T>(
        &self,
        f: impl FnOnce(&CacheStorage) -> std::result::Result<T, CacheError>,
    ) -> std::result::Result<T, CacheError> {
        let guard = self
            .storage
            .lock()
            .map_err(|_| CacheError::Io("store lock poisoned".to_string()))?;
        f(&guard)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::network::MockFetcher;
    use crate::network::mock::png_bytes;
    use tempfile::TempDir;

    const X: &str = "https://images.unsplash.com/x";
    const Y: &str = "https://images.unsplash.com/y";
    const APP_JS: &str = "https://app.example.com/assets/app.js";

    fn options(manifest: Vec<PrecacheEntry>) -> ControllerOptions {
        ControllerOptions {
            layout: StoreLayout::new("precache", "v2-current", "bg-cache"),
            image_host: "images.unsplash.com".to_string(),
            manifest,
        }
    }

    fn test_controller(
        fetcher: MockFetcher,
        manifest: Vec<PrecacheEntry>,
    ) -> (Arc<CacheController>, Arc<MockFetcher>, SharedStorage, TempDir) {
        let dir = TempDir::new().unwrap();
        let storage = Arc::new(Mutex::new(CacheStorage::open_at(dir.path()).unwrap()));
        let fetcher = Arc::new(fetcher);
        let controller = Arc::new(CacheController::new(
            options(manifest),
            storage.clone(),
            fetcher.clone(),
        ));
        (controller, fetcher, storage, dir)
    }

    fn stored_urls(storage: &SharedStorage, store: &str) -> Vec<String> {
        storage.lock().unwrap().keys(store).unwrap()
    }

    #[tokio::test]
    async fn test_image_miss_fetches_and_stores() {
        let (controller, fetcher, storage, _dir) =
            test_controller(MockFetcher::new().with_response(X, 200, png_bytes()), vec![]);

        let request = Request::get(X).unwrap();
        let first = controller.handle_fetch(&request).await.unwrap();
        let second = controller.handle_fetch(&request).await.unwrap();

        assert_eq!(first.status, 200);
        assert_eq!(first.body, second.body);
        assert_eq!(fetcher.calls(X), 1);
        assert_eq!(stored_urls(&storage, "bg-cache"), vec![X]);
    }

    #[tokio::test]
    async fn test_image_miss_offline_is_503() {
        let (controller, _fetcher, storage, _dir) =
            test_controller(MockFetcher::new().with_failure(X), vec![]);

        let response = controller
            .handle_fetch(&Request::get(X).unwrap())
            .await
            .unwrap();

        assert_eq!(response.status, 503);
        assert_eq!(response.body, crate::network::OFFLINE_IMAGE_BODY.as_bytes());
        assert!(stored_urls(&storage, "bg-cache").is_empty());
    }

    #[tokio::test]
    async fn test_image_served_from_store_when_offline() {
        let (controller, fetcher, _storage, _dir) =
            test_controller(MockFetcher::new().with_response(X, 200, "img"), vec![]);
        let request = Request::get(X).unwrap();
        controller.handle_fetch(&request).await.unwrap();

        fetcher.set_failure(X);
        let response = controller.handle_fetch(&request).await.unwrap();
        assert_eq!(response.status, 200);
        assert_eq!(response.body, b"img");
    }

    #[tokio::test]
    async fn test_image_error_status_not_stored() {
        let (controller, fetcher, storage, _dir) =
            test_controller(MockFetcher::new().with_status(Y, 404), vec![]);
        let request = Request::get(Y).unwrap();

        let response = controller.handle_fetch(&request).await.unwrap();
        assert_eq!(response.status, 404);
        controller.handle_fetch(&request).await.unwrap();

        assert_eq!(fetcher.calls(Y), 2);
        assert!(stored_urls(&storage, "bg-cache").is_empty());
    }

    #[tokio::test]
    async fn test_other_requests_are_not_stored_and_errors_propagate() {
        let (controller, fetcher, storage, _dir) = test_controller(
            MockFetcher::new().with_response("https://api.example.com/now", 200, "{}"),
            vec![],
        );

        let request = Request::get("https://api.example.com/now").unwrap();
        controller.handle_fetch(&request).await.unwrap();
        controller.handle_fetch(&request).await.unwrap();
        assert_eq!(fetcher.calls("https://api.example.com/now"), 2);
        assert!(storage.lock().unwrap().store_names().unwrap().is_empty());

        let offline = Request::get("https://api.example.com/offline").unwrap();
        assert!(matches!(
            controller.handle_fetch(&offline).await,
            Err(FetchError::Network(_))
        ));
    }

    #[tokio::test]
    async fn test_install_precaches_manifest_and_serves_it() {
        let manifest = vec![PrecacheEntry {
            url: APP_JS.to_string(),
            revision: Some("abc".to_string()),
        }];
        let (controller, fetcher, storage, _dir) = test_controller(
            MockFetcher::new().with_response(APP_JS, 200, "bundle"),
            manifest,
        );

        controller.install().await.unwrap();
        assert_eq!(controller.state(), LifecycleState::Installed);
        assert!(controller.skip_waiting_requested());
        assert_eq!(stored_urls(&storage, "precache-v2-current"), vec![APP_JS]);

        // Served from the precache even once the network is gone
        fetcher.set_failure(APP_JS);
        let response = controller
            .handle_fetch(&Request::get(APP_JS).unwrap())
            .await
            .unwrap();
        assert_eq!(response.body, b"bundle");
        assert_eq!(fetcher.calls(APP_JS), 1);
    }

    #[tokio::test]
    async fn test_reinstall_skips_unchanged_revisions() {
        let manifest = vec![PrecacheEntry {
            url: APP_JS.to_string(),
            revision: Some("abc".to_string()),
        }];
        let (controller, fetcher, _storage, _dir) = test_controller(
            MockFetcher::new().with_response(APP_JS, 200, "bundle"),
            manifest,
        );

        controller.install().await.unwrap();
        controller.install().await.unwrap();
        assert_eq!(fetcher.calls(APP_JS), 1);
    }

    #[tokio::test]
    async fn test_install_failure_is_redundant() {
        let manifest = vec![PrecacheEntry {
            url: APP_JS.to_string(),
            revision: None,
        }];
        let (controller, _fetcher, _storage, _dir) =
            test_controller(MockFetcher::new().with_status(APP_JS, 500), manifest);

        assert!(controller.install().await.is_err());
        assert_eq!(controller.state(), LifecycleState::Redundant);
        assert!(!controller.skip_waiting_requested());
    }

    #[tokio::test]
    async fn test_activate_deletes_only_stale_versions() {
        let (controller, _fetcher, storage, _dir) = test_controller(MockFetcher::new(), vec![]);
        {
            let s = storage.lock().unwrap();
            for name in ["precache-v1", "bg-cache", "precache-v2-current"] {
                s.open_store(name).unwrap();
            }
        }

        let report = controller.activate();

        assert_eq!(report.deleted, vec!["precache-v1"]);
        assert!(report.failed.is_empty());
        assert_eq!(controller.state(), LifecycleState::Activated);
        assert_eq!(
            storage.lock().unwrap().store_names().unwrap(),
            vec!["bg-cache", "precache-v2-current"]
        );
    }

    #[tokio::test]
    async fn test_cache_backgrounds_tolerates_failures() {
        let (controller, _fetcher, storage, _dir) = test_controller(
            MockFetcher::new()
                .with_response(X, 200, png_bytes())
                .with_status(Y, 404)
                .with_failure("https://images.unsplash.com/z"),
            vec![],
        );

        let report = controller
            .cache_backgrounds(&[
                X.to_string(),
                Y.to_string(),
                "https://images.unsplash.com/z".to_string(),
                "::not a url::".to_string(),
            ])
            .await;

        assert_eq!(report.stored, vec![X]);
        assert_eq!(report.skipped, vec![Y]);
        assert_eq!(report.failed.len(), 2);
        assert_eq!(stored_urls(&storage, "bg-cache"), vec![X]);
    }

    #[tokio::test]
    async fn test_cache_backgrounds_runs_concurrently() {
        let urls: Vec<String> = (0..8)
            .map(|i| format!("https://images.unsplash.com/p{i}"))
            .collect();
        let mut fetcher = MockFetcher::new().with_delay(std::time::Duration::from_millis(50));
        for url in &urls {
            fetcher = fetcher.with_response(url, 200, "img");
        }
        let (controller, _fetcher, _storage, _dir) = test_controller(fetcher, vec![]);

        let started = std::time::Instant::now();
        let report = controller.cache_backgrounds(&urls).await;

        assert_eq!(report.stored.len(), 8);
        assert!(started.elapsed() < std::time::Duration::from_millis(350));
    }

    #[tokio::test]
    async fn test_run_loop_services_messages() {
        let (controller, _fetcher, storage, _dir) =
            test_controller(MockFetcher::new().with_response(X, 200, "img"), vec![]);
        let (tx, rx) = mpsc::unbounded_channel();

        tx.send(ControlMessage::SkipWaiting).unwrap();
        tx.send(ControlMessage::CacheBackgrounds {
            urls: vec![X.to_string(), Y.to_string()],
        })
        .unwrap();
        drop(tx);

        controller.clone().run(rx).await;

        assert!(controller.skip_waiting_requested());
        assert_eq!(stored_urls(&storage, "bg-cache"), vec![X]);
    }

    /// Network that never answers for `/hang`
    struct HangingFetcher {
        inner: MockFetcher,
    }

    #[async_trait::async_trait]
    impl Fetcher for HangingFetcher {
        async fn fetch(&self, request: &Request) -> std::result::Result<Response, FetchError> {
            if request.url.path() == "/hang" {
                std::future::pending::<()>().await;
            }
            self.inner.fetch(request).await
        }
    }

    #[tokio::test]
    async fn test_hung_batch_does_not_block_later_messages() {
        let dir = TempDir::new().unwrap();
        let storage = Arc::new(Mutex::new(CacheStorage::open_at(dir.path()).unwrap()));
        let fetcher = HangingFetcher {
            inner: MockFetcher::new().with_response(X, 200, "img"),
        };
        let controller = Arc::new(CacheController::new(
            options(vec![]),
            storage.clone(),
            Arc::new(fetcher),
        ));
        let (tx, rx) = mpsc::unbounded_channel();
        tokio::spawn(controller.clone().run(rx));

        tx.send(ControlMessage::CacheBackgrounds {
            urls: vec!["https://images.unsplash.com/hang".to_string()],
        })
        .unwrap();
        tx.send(ControlMessage::CacheBackgrounds {
            urls: vec![X.to_string()],
        })
        .unwrap();
        tx.send(ControlMessage::SkipWaiting).unwrap();

        for _ in 0..100 {
            if controller.skip_waiting_requested() && stored_urls(&storage, "bg-cache") == vec![X] {
                return;
            }
            tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        }
        panic!("messages after the hung batch were never handled");
    }

    #[tokio::test]
    async fn test_wait_for_skip_waiting() {
        let (controller, _fetcher, _storage, _dir) = test_controller(MockFetcher::new(), vec![]);

        let waiter = {
            let controller = controller.clone();
            tokio::spawn(async move { controller.wait_for_skip_waiting().await })
        };
        tokio::task::yield_now().await;
        assert!(!waiter.is_finished());

        controller.handle_message(ControlMessage::SkipWaiting).await;
        waiter.await.unwrap();
    }
}
