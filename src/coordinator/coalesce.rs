use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};

struct Slot {
    lock: Arc<AsyncMutex<()>>,
    holders: usize,
}

/// Serializes concurrent work on the same cache key so only the first caller
/// reaches the network and later ones find its result in the cache.
#[derive(Default)]
pub struct Coalescer {
    slots: Arc<Mutex<HashMap<String, Slot>>>,
}

impl Coalescer {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn acquire(&self, key: &str) -> CoalesceGuard {
        let lock = {
            let mut slots = lock_slots(&self.slots);
            let slot = slots.entry(key.to_string()).or_insert_with(|| Slot {
                lock: Arc::new(AsyncMutex::new(())),
                holders: 0,
            });
            slot.holders += 1;
            Arc::clone(&slot.lock)
        };

        let mut guard = CoalesceGuard {
            key: key.to_string(),
            slots: Arc::clone(&self.slots),
            permit: None,
        };
        guard.permit = Some(lock.lock_owned().await);
        guard
    }

    /// Keys with at least one caller holding or waiting.
    pub fn in_flight(&self) -> usize {
        lock_slots(&self.slots).len()
    }
}

/// Held for the duration of one keyed fetch. Dropping it, even mid-wait, releases the slot.
pub struct CoalesceGuard {
    key: String,
    slots: Arc<Mutex<HashMap<String, Slot>>>,
    permit: Option<OwnedMutexGuard<()>>,
}

impl Drop for CoalesceGuard {
    fn drop(&mut self) {
        self.permit.take();
        let mut slots = lock_slots(&self.slots);
        if let Some(slot) = slots.get_mut(&self.key) {
            slot.holders = slot.holders.saturating_sub(1);
            if slot.holders == 0 {
                slots.remove(&self.key);
            }
        }
    }
}

fn lock_slots(slots: &Mutex<HashMap<String, Slot>>) -> MutexGuard<'_, HashMap<String, Slot>> {
    slots.lock().unwrap_or_else(PoisonError::into_inner)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test(start_paused = true)]
    async fn same_key_waits_for_holder() {
        let coalescer = Arc::new(Coalescer::new());
        let first = coalescer.acquire("k").await;

        let waiter = {
            let coalescer = Arc::clone(&coalescer);
            tokio::spawn(async move {
                let _guard = coalescer.acquire("k").await;
            })
        };

        tokio::time::sleep(Duration::from_millis(10)).await;
        assert!(!waiter.is_finished());
        drop(first);
        waiter.await.expect("waiter completes");
        assert_eq!(coalescer.in_flight(), 0);
    }

    #[tokio::test]
    async fn different_keys_do_not_block() {
        let coalescer = Coalescer::new();
        let _a = coalescer.acquire("a").await;
        let _b = coalescer.acquire("b").await;
        assert_eq!(coalescer.in_flight(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn cancelled_waiter_releases_slot() {
        let coalescer = Arc::new(Coalescer::new());
        let first = coalescer.acquire("k").await;

        let waiter = {
            let coalescer = Arc::clone(&coalescer);
            tokio::spawn(async move {
                let _guard = coalescer.acquire("k").await;
            })
        };
        tokio::time::sleep(Duration::from_millis(10)).await;
        waiter.abort();
        let _ = waiter.await;

        drop(first);
        assert_eq!(coalescer.in_flight(), 0);
    }
}
