//! Hosting environment for cache controllers
//!
//! The host is the registration boundary: it starts controller generations,
//! drives them through install and activation, and tells clients which
//! generation currently controls the page. Requests made through the host
//! are intercepted by the active controller, or go straight to the network
//! when there is none.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use log::{debug, info, warn};
use tokio::sync::{mpsc, watch};

use super::{CacheController, ControllerOptions, LifecycleState, SharedStorage, WarmReport};
use crate::error::{FetchError, RegistrationError};
use crate::network::{Fetcher, Request, Response};
use crate::protocol::ControlMessage;

/// Cloneable handle to one running controller generation
#[derive(Clone)]
pub struct ControllerHandle {
    generation: u64,
    controller: Arc<CacheController>,
    messages: mpsc::UnboundedSender<ControlMessage>,
}

impl ControllerHandle {
    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn state(&self) -> LifecycleState {
        self.controller.state()
    }

    /// Watch this generation's lifecycle transitions
    pub fn subscribe(&self) -> watch::Receiver<LifecycleState> {
        self.controller.subscribe()
    }

    /// Fire-and-forget message to the controller; there is no reply
    pub fn post_message(&self, message: ControlMessage) {
        if self.messages.send(message).is_err() {
            warn!(
                "Cache controller {} has stopped, message dropped",
                self.generation
            );
        }
    }

    /// Send a request through this controller
    pub async fn fetch(&self, request: &Request) -> Result<Response, FetchError> {
        self.controller.handle_fetch(request).await
    }

    /// Persist backgrounds and wait for the result, bypassing the message
    /// channel
    pub async fn cache_backgrounds(&self, urls: &[String]) -> WarmReport {
        self.controller.cache_backgrounds(urls).await
    }
}

/// A successful registration: views onto the host's controller slots
pub struct Registration {
    scope: String,
    /// The generation this registration started
    started: ControllerHandle,
    active: watch::Receiver<Option<ControllerHandle>>,
    installing: watch::Receiver<Option<ControllerHandle>>,
}

impl Registration {
    pub fn scope(&self) -> &str {
        &self.scope
    }

    /// The controller serving pages right now, if any
    pub fn active(&self) -> Option<ControllerHandle> {
        self.active.borrow().clone()
    }

    /// The generation currently installing or waiting, if any
    pub fn installing(&self) -> Option<ControllerHandle> {
        self.installing.borrow().clone()
    }

    /// Resolve with the active controller, waiting for a controller change
    /// when there is none yet. `None` if the host went away.
    pub async fn wait_active(&self) -> Option<ControllerHandle> {
        let mut rx = self.active.clone();
        let current = rx.wait_for(Option::is_some).await.ok()?;
        current.clone()
    }

    /// Wait until the generation started by this registration has either
    /// taken control or failed.
    ///
    /// Returns the active controller, or `None` when the install failed or a
    /// newer generation already replaced it.
    pub async fn wait_settled(&self) -> Option<ControllerHandle> {
        let mut state = self.started.subscribe();
        let reached = match state
            .wait_for(|s| s.is_active() || *s == LifecycleState::Redundant)
            .await
        {
            Ok(current) => *current,
            Err(_) => return None,
        };
        if reached == LifecycleState::Redundant {
            return None;
        }
        self.wait_active().await
    }

    /// Controller-change notifications
    pub fn controller_changes(&self) -> watch::Receiver<Option<ControllerHandle>> {
        self.active.clone()
    }

    /// New-generation notifications (the "update found" signal)
    pub fn updates(&self) -> watch::Receiver<Option<ControllerHandle>> {
        self.installing.clone()
    }
}

/// Environment that runs cache controllers on behalf of pages
pub struct ControllerHost {
    storage: SharedStorage,
    network: Arc<dyn Fetcher>,
    supported: bool,
    next_generation: AtomicU64,
    active: Arc<watch::Sender<Option<ControllerHandle>>>,
    installing: Arc<watch::Sender<Option<ControllerHandle>>>,
}

impl ControllerHost {
    /// Host that supports controllers
    pub fn new(storage: SharedStorage, network: Arc<dyn Fetcher>) -> Self {
        Self {
            storage,
            network,
            supported: true,
            next_generation: AtomicU64::new(1),
            active: Arc::new(watch::Sender::new(None)),
            installing: Arc::new(watch::Sender::new(None)),
        }
    }

    /// Host without controller support; registration always fails
    pub fn unsupported(storage: SharedStorage, network: Arc<dyn Fetcher>) -> Self {
        Self {
            supported: false,
            ..Self::new(storage, network)
        }
    }

    pub fn is_supported(&self) -> bool {
        self.supported
    }

    /// The controller serving pages right now, if any
    pub fn controller(&self) -> Option<ControllerHandle> {
        self.active.borrow().clone()
    }

    /// Register a new controller generation scoped to the site root.
    ///
    /// Returns as soon as the generation is started; install, activation and
    /// the controller change happen in the background.
    pub fn register(
        &self,
        options: ControllerOptions,
    ) -> Result<Registration, RegistrationError> {
        if !self.supported {
            return Err(RegistrationError::Unsupported);
        }
        let runtime = tokio::runtime::Handle::try_current()
            .map_err(|e| RegistrationError::Spawn(e.to_string()))?;

        let generation = self.next_generation.fetch_add(1, Ordering::Relaxed);
        let controller = Arc::new(CacheController::new(
            options,
            self.storage.clone(),
            self.network.clone(),
        ));
        let (tx, rx) = mpsc::unbounded_channel();
        let handle = ControllerHandle {
            generation,
            controller: controller.clone(),
            messages: tx,
        };

        runtime.spawn(controller.run(rx));
        self.installing.send_replace(Some(handle.clone()));
        runtime.spawn(drive_lifecycle(
            handle.clone(),
            self.active.clone(),
            self.installing.clone(),
        ));

        info!("Registered cache controller {} for scope /", generation);
        Ok(Registration {
            scope: "/".to_string(),
            started: handle,
            active: self.active.subscribe(),
            installing: self.installing.subscribe(),
        })
    }

    /// Drop the active controller. Returns false when nothing was registered.
    pub fn unregister(&self) -> bool {
        match self.active.send_replace(None) {
            Some(previous) => {
                previous.controller.set_state(LifecycleState::Redundant);
                info!("Unregistered cache controller {}", previous.generation);
                true
            }
            None => false,
        }
    }
}

/// Requests made through the host go through the active controller
#[async_trait]
impl Fetcher for ControllerHost {
    async fn fetch(&self, request: &Request) -> Result<Response, FetchError> {
        match self.controller() {
            Some(handle) => handle.fetch(request).await,
            None => self.network.fetch(request).await,
        }
    }
}

/// install -> wait -> activate -> claim
async fn drive_lifecycle(
    handle: ControllerHandle,
    active: Arc<watch::Sender<Option<ControllerHandle>>>,
    installing: Arc<watch::Sender<Option<ControllerHandle>>>,
) {
    let generation = handle.generation;
    let controller = handle.controller.clone();

    if controller.install().await.is_err() {
        clear_if_current(&installing, generation);
        return;
    }

    // With no controller in charge there is nobody to wait for
    let has_active = active.borrow().is_some();
    if has_active {
        debug!("Cache controller {} waiting to take over", generation);
        controller.wait_for_skip_waiting().await;
    }

    controller.activate();

    // Claim open pages
    clear_if_current(&installing, generation);
    let previous = active.borrow().clone();
    if let Some(previous) = previous {
        previous.controller.set_state(LifecycleState::Redundant);
    }
    active.send_replace(Some(handle));
    info!("Cache controller {} is now in control", generation);
}

fn clear_if_current(slot: &watch::Sender<Option<ControllerHandle>>, generation: u64) {
    slot.send_if_modified(|current| {
        if current.as_ref().map(|h| h.generation) == Some(generation) {
            *current = None;
            true
        } else {
            false
        }
    });
}
