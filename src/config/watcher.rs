//! Configuration file watcher for hot reload.
//!
//! A single save often produces a burst of modify/create events. Each event
//! re-reads the file, but a configuration is only published when its
//! registrations differ from the last one sent.

use notify::{Config, Event, RecommendedWatcher, RecursiveMode, Watcher};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::sync::mpsc;

use crate::apiservice::ApiService;
use crate::config::loader::load_config;
use crate::config::schema::ProxyConfig;

/// Watches the configuration file and publishes registration changes.
pub struct ConfigWatcher {
    reload: Reload,
    update_tx: mpsc::UnboundedSender<ProxyConfig>,
}

/// Reload state: the file and the registrations last published from it.
struct Reload {
    path: PathBuf,
    published: Vec<ApiService>,
}

impl Reload {
    /// Re-read the file. `None` when it is invalid or nothing changed.
    fn check(&mut self) -> Option<ProxyConfig> {
        let config = match load_config(&self.path) {
            Ok(config) => config,
            Err(e) => {
                tracing::error!(path = ?self.path, error = %e, "Failed to reload config, keeping current registrations");
                return None;
            }
        };
        if config.api_services == self.published {
            tracing::debug!(path = ?self.path, "Config reloaded, registrations unchanged");
            return None;
        }
        self.published = config.api_services.clone();
        Some(config)
    }
}

impl ConfigWatcher {
    /// `current` is the configuration already applied at startup.
    ///
    /// Returns the watcher and a receiver for validated configurations.
    pub fn new(path: &Path, current: &ProxyConfig) -> (Self, mpsc::UnboundedReceiver<ProxyConfig>) {
        let (update_tx, update_rx) = mpsc::unbounded_channel();
        let reload = Reload {
            path: path.to_path_buf(),
            published: current.api_services.clone(),
        };
        (Self { reload, update_tx }, update_rx)
    }

    /// Start watching the file. The returned watcher must be kept alive.
    pub fn run(self) -> Result<RecommendedWatcher, notify::Error> {
        let Self { mut reload, update_tx } = self;
        let path = reload.path.clone();

        let mut watcher = RecommendedWatcher::new(
            move |res: notify::Result<Event>| match res {
                Ok(event) if event.kind.is_modify() || event.kind.is_create() => {
                    if let Some(config) = reload.check() {
                        tracing::info!(
                            path = ?reload.path,
                            api_services = config.api_services.len(),
                            "Registrations changed on disk"
                        );
                        let _ = update_tx.send(config);
                    }
                }
                Ok(_) => {}
                Err(e) => tracing::error!(error = ?e, "Config watch error"),
            },
            Config::default().with_poll_interval(Duration::from_secs(2)),
        )?;
        watcher.watch(&path, RecursiveMode::NonRecursive)?;

        tracing::info!(path = ?path, "Config watcher started");
        Ok(watcher)
    }
}
