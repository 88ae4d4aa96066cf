//! Credential file watcher for hot reload.

use std::sync::Arc;
use std::time::Duration;

use notify::{Config, Event, RecommendedWatcher, RecursiveMode, Watcher};

use crate::tls::identity::TlsIdentityStore;

/// Watches the file-backed sources of an identity store (certificate, key
/// and client-CA paths) and reloads credentials when they change. A reload
/// reassembles the store's active TLS configuration, so CA rotations take
/// effect too; a failed reload keeps the current credentials in place.
pub struct CredentialWatcher {
    store: Arc<TlsIdentityStore>,
}

impl CredentialWatcher {
    pub fn new(store: Arc<TlsIdentityStore>) -> Self {
        Self { store }
    }

    /// Start watching in a background thread. The returned watcher must be
    /// kept alive for watching to continue.
    pub fn run(self) -> Result<RecommendedWatcher, notify::Error> {
        let paths = self.store.watch_paths();
        let store = self.store;

        let mut watcher = RecommendedWatcher::new(
            move |res: notify::Result<Event>| match res {
                Ok(event) => {
                    if event.kind.is_modify() || event.kind.is_create() {
                        tracing::info!("Credential file change detected, reloading...");
                        if let Err(e) = store.update_credentials() {
                            tracing::error!(
                                "Failed to reload TLS credentials: {}. Keeping current identity.",
                                e
                            );
                        }
                    }
                }
                Err(e) => tracing::error!("Watch error: {:?}", e),
            },
            Config::default().with_poll_interval(Duration::from_secs(2)),
        )?;

        for path in &paths {
            watcher.watch(path, RecursiveMode::NonRecursive)?;
        }

        tracing::info!(paths = paths.len(), "Credential watcher started");
        Ok(watcher)
    }
}
