use std::{
    path::{Path, PathBuf},
    sync::{Arc, Mutex, PoisonError, RwLock},
};

use log::{info, warn};
use notify::{EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use tokio::sync::watch;

use crate::error::{AppError, Result};

use super::loader::{load_config, providers_dir};
use super::Config;

/// Central copy of the provider configuration loaded from disk, with optional file watching.
pub struct ConfigRegistry {
    root: PathBuf,
    state: RwLock<Arc<Config>>,
    updates_tx: watch::Sender<Arc<Config>>,
    watcher: Mutex<Option<RecommendedWatcher>>,
}

impl ConfigRegistry {
    /// Build the registry by scanning `assets/providers` under the provided root.
    pub fn new(root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        let config = Arc::new(load_config(&root)?);
        let (updates_tx, _) = watch::channel(Arc::clone(&config));

        Ok(Self {
            root,
            state: RwLock::new(config),
            updates_tx,
            watcher: Mutex::new(None),
        })
    }

    /// Current configuration snapshot.
    pub fn snapshot(&self) -> Arc<Config> {
        Arc::clone(&self.state.read().unwrap_or_else(PoisonError::into_inner))
    }

    /// Subscribe to configuration updates. The receiver immediately holds the latest snapshot.
    pub fn subscribe(&self) -> watch::Receiver<Arc<Config>> {
        self.updates_tx.subscribe()
    }

    /// Force a reload from disk and broadcast the new snapshot.
    pub fn refresh(&self) -> Result<()> {
        let config = Arc::new(load_config(self.root())?);

        {
            let mut state = self.state.write().unwrap_or_else(PoisonError::into_inner);
            *state = Arc::clone(&config);
        }

        info!(
            "Reloaded {} provider descriptors from {}",
            config.providers.len(),
            providers_dir(self.root()).display()
        );
        let _ = self.updates_tx.send(config);
        Ok(())
    }

    /// Begin watching the providers directory for changes. Multiple invocations are no-ops.
    pub fn start_watching(self: &Arc<Self>) -> Result<()> {
        let mut slot = self.watcher.lock().unwrap_or_else(PoisonError::into_inner);
        if slot.is_some() {
            return Ok(());
        }

        let dir = providers_dir(self.root());
        if !dir.exists() {
            std::fs::create_dir_all(&dir)?;
        }

        let registry = Arc::clone(self);
        let mut watcher =
            notify::recommended_watcher(move |res: notify::Result<notify::Event>| match res {
                Ok(event) if is_relevant_event(&event.kind) => {
                    if let Err(err) = registry.refresh() {
                        warn!("Failed to refresh provider descriptors: {err}");
                    }
                }
                Ok(_) => {}
                Err(err) => warn!("Provider config watch error: {err}"),
            })
            .map_err(|err| AppError::message(format!("Failed to start watcher: {err}")))?;

        watcher
            .watch(&dir, RecursiveMode::NonRecursive)
            .map_err(|err| {
                AppError::message(format!("Failed to watch providers directory: {err}"))
            })?;
        *slot = Some(watcher);
        Ok(())
    }

    fn root(&self) -> &Path {
        &self.root
    }
}

fn is_relevant_event(kind: &EventKind) -> bool {
    matches!(
        kind,
        EventKind::Create(_)
            | EventKind::Modify(_)
            | EventKind::Remove(_)
            | EventKind::Any
            | EventKind::Other
    )
}
