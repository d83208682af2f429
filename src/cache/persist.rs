//! Off-thread snapshot writes for [`super::ResponseCache`].
//!
//! Only the newest pending write is kept, so bursts of cache updates collapse
//! into one store round trip.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use log::warn;
use tokio::runtime::Handle;

use crate::error::AppError;

use super::store::KeyValueStore;

#[derive(Debug, Clone, PartialEq)]
pub(crate) enum PendingWrite {
    Snapshot(String),
    Remove,
}

pub(crate) struct Persister {
    store: Arc<dyn KeyValueStore>,
    namespace: String,
    pending: Mutex<Option<PendingWrite>>,
    io: Mutex<()>,
    scheduled: AtomicBool,
    degraded: AtomicBool,
}

impl Persister {
    pub(crate) fn new(store: Arc<dyn KeyValueStore>, namespace: String) -> Self {
        Self {
            store,
            namespace,
            pending: Mutex::new(None),
            io: Mutex::new(()),
            scheduled: AtomicBool::new(false),
            degraded: AtomicBool::new(false),
        }
    }

    pub(crate) fn is_degraded(&self) -> bool {
        self.degraded.load(Ordering::Relaxed)
    }

    /// Queue `write`, replacing any write that has not reached the store yet.
    ///
    /// Inside a tokio runtime the store is touched from a blocking task. Outside
    /// one the write happens before this returns.
    pub(crate) fn submit(self: &Arc<Self>, write: PendingWrite) {
        if self.is_degraded() {
            return;
        }
        *self.pending.lock().unwrap_or_else(PoisonError::into_inner) = Some(write);

        match Handle::try_current() {
            Ok(handle) => {
                if !self.scheduled.swap(true, Ordering::AcqRel) {
                    let persister = Arc::clone(self);
                    handle.spawn_blocking(move || {
                        persister.scheduled.store(false, Ordering::Release);
                        persister.drain();
                    });
                }
            }
            Err(_) => self.drain(),
        }
    }

    /// Write out whatever is pending on the calling thread.
    pub(crate) fn drain(&self) {
        let _io = self.io.lock().unwrap_or_else(PoisonError::into_inner);
        loop {
            let next = self
                .pending
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .take();
            let Some(write) = next else {
                break;
            };
            if self.is_degraded() {
                continue;
            }

            let result = match write {
                PendingWrite::Snapshot(json) => self.store.set_item(&self.namespace, &json),
                PendingWrite::Remove => self.store.remove_item(&self.namespace),
            };
            if let Err(err) = result {
                self.degrade(&err);
            }
        }
    }

    fn degrade(&self, err: &AppError) {
        if !self.degraded.swap(true, Ordering::Relaxed) {
            warn!("Cache persistence disabled, continuing in memory: {err}");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::MemoryStore;

    fn persister() -> (Arc<MemoryStore>, Arc<Persister>) {
        let store = Arc::new(MemoryStore::new());
        let persister = Arc::new(Persister::new(store.clone(), "cache".to_string()));
        (store, persister)
    }

    #[test]
    fn writes_inline_without_a_runtime() {
        let (store, persister) = persister();
        persister.submit(PendingWrite::Snapshot("{}".to_string()));
        assert_eq!(store.get_item("cache").expect("read"), Some("{}".to_string()));

        persister.submit(PendingWrite::Remove);
        assert_eq!(store.get_item("cache").expect("read"), None);
    }

    #[tokio::test]
    async fn newest_write_wins_after_drain() {
        let (store, persister) = persister();
        for n in 0..20 {
            persister.submit(PendingWrite::Snapshot(n.to_string()));
        }
        persister.drain();

        assert_eq!(store.get_item("cache").expect("read"), Some("19".to_string()));
    }
}
