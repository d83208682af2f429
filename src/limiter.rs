//! Per-provider request counters inside resetting windows.
//!
//! Windows are evaluated lazily: the first admission check after a window has
//! elapsed resets the counter. There is no background timer.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use log::{debug, warn};
use tokio::sync::broadcast;

use crate::clock::Clock;
use crate::config::{Config, RateLimitConfig};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimitState {
    pub capacity: u32,
    pub window_ms: u64,
    pub window_start: i64,
    pub count: u32,
}

impl RateLimitState {
    fn new(limit: RateLimitConfig, now: i64) -> Self {
        Self {
            capacity: limit.requests,
            window_ms: limit.window_ms,
            window_start: now,
            count: 0,
        }
    }

    fn window_elapsed(&self, now: i64) -> bool {
        now.saturating_sub(self.window_start) > self.window_ms as i64
    }

    fn refresh(&mut self, now: i64) {
        if self.window_elapsed(now) {
            self.count = 0;
            self.window_start = now;
        }
    }

    fn has_headroom(&self) -> bool {
        self.count < self.capacity
    }

    /// Timestamp at which the current window closes.
    pub fn resets_at(&self) -> i64 {
        self.window_start.saturating_add(self.window_ms as i64)
    }
}

/// Signals the UI layer may react to instead of the limiter navigating anywhere itself.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProviderEvent {
    Exhausted { provider: String, resets_at: i64 },
}

pub struct RateLimiter {
    states: Mutex<HashMap<String, RateLimitState>>,
    clock: Arc<dyn Clock>,
    events: broadcast::Sender<ProviderEvent>,
}

impl RateLimiter {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        let (events, _) = broadcast::channel(32);
        Self {
            states: Mutex::new(HashMap::new()),
            clock,
            events,
        }
    }

    pub fn from_config(config: &Config, clock: Arc<dyn Clock>) -> Self {
        let limiter = Self::new(clock);
        limiter.apply_config(config);
        limiter
    }

    /// Install limits for every configured provider, keeping live counters.
    pub fn apply_config(&self, config: &Config) {
        for provider in config.providers.values() {
            self.configure(&provider.id, provider.rate_limit);
        }
    }

    /// Install or replace one provider's limit. Existing counters survive a reload.
    pub fn configure(&self, provider: &str, limit: RateLimitConfig) {
        let now = self.clock.now_ms();
        let mut states = self.lock_states();
        states
            .entry(provider.to_string())
            .and_modify(|state| {
                state.capacity = limit.requests;
                state.window_ms = limit.window_ms;
            })
            .or_insert_with(|| RateLimitState::new(limit, now));
    }

    /// Whether a request for `provider` may be dispatched now.
    ///
    /// Unconfigured providers always admit.
    pub fn admit(&self, provider: &str) -> bool {
        let now = self.clock.now_ms();
        let mut states = self.lock_states();
        match states.get_mut(provider) {
            Some(state) => {
                state.refresh(now);
                state.has_headroom()
            }
            None => true,
        }
    }

    /// Count one dispatched request against `provider`'s window.
    pub fn record_usage(&self, provider: &str) {
        let mut states = self.lock_states();
        if let Some(state) = states.get_mut(provider) {
            state.count = state.count.saturating_add(1).min(state.capacity);
        }
    }

    /// Admit and record in one step so concurrent dispatchers cannot overshoot capacity.
    pub fn try_acquire(&self, provider: &str) -> bool {
        let now = self.clock.now_ms();
        let mut states = self.lock_states();
        match states.get_mut(provider) {
            Some(state) => {
                state.refresh(now);
                if state.has_headroom() {
                    state.count += 1;
                    true
                } else {
                    false
                }
            }
            None => true,
        }
    }

    /// Stop admitting `provider` for the rest of its window after an upstream 429.
    pub fn mark_exhausted(&self, provider: &str) {
        let now = self.clock.now_ms();
        let resets_at = {
            let mut states = self.lock_states();
            let Some(state) = states.get_mut(provider) else {
                debug!("Ignoring exhaustion signal for unconfigured provider {provider}");
                return;
            };
            state.refresh(now);
            state.count = state.capacity;
            state.resets_at()
        };

        warn!("Provider {provider} exhausted until {resets_at}");
        let _ = self.events.send(ProviderEvent::Exhausted {
            provider: provider.to_string(),
            resets_at,
        });
    }

    pub fn snapshot(&self, provider: &str) -> Option<RateLimitState> {
        self.lock_states().get(provider).copied()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ProviderEvent> {
        self.events.subscribe()
    }

    fn lock_states(&self) -> MutexGuard<'_, HashMap<String, RateLimitState>> {
        self.states.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
