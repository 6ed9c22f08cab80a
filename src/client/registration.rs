//! Client side of controller registration

use log::{debug, info, warn};

use crate::catalog::Catalog;
use crate::controller::{
    ControllerHandle, ControllerHost, ControllerOptions, LifecycleState, Registration,
};
use crate::protocol::ControlMessage;

/// Register the cache controller and hand it the catalog to persist.
///
/// Returns `None` when the host cannot run controllers; the caller then
/// keeps working with the in-memory decode cache only.
pub fn register_and_warm(
    host: &ControllerHost,
    options: ControllerOptions,
    catalog: &Catalog,
) -> Option<Registration> {
    if !host.is_supported() {
        warn!("Cache controllers are not supported here; using the in-memory cache only");
        return None;
    }
    let registration = match host.register(options) {
        Ok(registration) => registration,
        Err(e) => {
            warn!("Cache controller registration failed: {}", e);
            return None;
        }
    };
    info!("Cache controller registered for scope {}", registration.scope());

    spawn_update_listener(&registration);

    let urls = catalog.all_urls();
    match registration.active() {
        Some(handle) => send_backgrounds(&handle, urls),
        None => {
            let mut changes = registration.controller_changes();
            tokio::spawn(async move {
                let handle = match changes.wait_for(Option::is_some).await {
                    Ok(current) => current.clone(),
                    Err(_) => return,
                };
                if let Some(handle) = handle {
                    send_backgrounds(&handle, urls);
                }
            });
        }
    }

    Some(registration)
}

/// Tear down the active controller; false when none was registered
pub fn unregister(host: &ControllerHost) -> bool {
    host.unregister()
}

fn send_backgrounds(handle: &ControllerHandle, urls: Vec<String>) {
    debug!(
        "Asking cache controller {} to persist {} backgrounds",
        handle.generation(),
        urls.len()
    );
    handle.post_message(ControlMessage::CacheBackgrounds { urls });
}

/// Watch for new generations and announce the ones that will replace a
/// running controller
fn spawn_update_listener(registration: &Registration) {
    let mut updates = registration.updates();
    let active = registration.controller_changes();

    tokio::spawn(async move {
        loop {
            let installing = updates.borrow_and_update().clone();
            if let Some(handle) = installing {
                let previous = active
                    .borrow()
                    .as_ref()
                    .map(ControllerHandle::generation)
                    .filter(|g| *g != handle.generation());
                tokio::spawn(watch_install(handle, previous));
            }
            if updates.changed().await.is_err() {
                break;
            }
        }
    });
}

async fn watch_install(handle: ControllerHandle, previous: Option<u64>) {
    let mut state = handle.subscribe();
    let reached = match state
        .wait_for(|s| *s != LifecycleState::Installing)
        .await
    {
        Ok(current) => *current,
        Err(_) => return,
    };

    if announces_update(previous, reached) {
        info!("New cache controller available, please refresh.");
    }
}

/// A finished install is an update only when it will replace a controller
fn announces_update(previous: Option<u64>, reached: LifecycleState) -> bool {
    previous.is_some() && reached != LifecycleState::Redundant
}
