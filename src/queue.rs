//! FIFO queue for requests the rate limiter could not admit immediately.

use std::collections::VecDeque;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use futures::future::BoxFuture;
use futures::FutureExt;
use log::{debug, info};
use serde_json::Value;
use tokio::sync::oneshot;

use crate::config::QueueSettings;
use crate::error::Result;
use crate::limiter::RateLimiter;

type Job = Box<dyn FnOnce() -> BoxFuture<'static, Result<Value>> + Send>;

/// One deferred provider call plus the channel its caller waits on.
pub struct QueuedRequest {
    provider: String,
    execute: Job,
    responder: oneshot::Sender<Result<Value>>,
}

impl QueuedRequest {
    pub fn new<F, Fut>(
        provider: impl Into<String>,
        execute: F,
    ) -> (Self, oneshot::Receiver<Result<Value>>)
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = Result<Value>> + Send + 'static,
    {
        let (responder, receiver) = oneshot::channel();
        let request = Self {
            provider: provider.into(),
            execute: Box::new(move || execute().boxed()),
            responder,
        };
        (request, receiver)
    }

    pub fn provider(&self) -> &str {
        &self.provider
    }

    async fn run(self) {
        let provider = self.provider;
        let result = (self.execute)().await;
        if self.responder.send(result).is_err() {
            debug!("Caller for {provider} request went away before it settled");
        }
    }
}

#[derive(Default)]
struct QueueState {
    pending: VecDeque<QueuedRequest>,
    draining: bool,
}

pub struct RequestQueue {
    state: Mutex<QueueState>,
    limiter: Arc<RateLimiter>,
    backoff_ms: AtomicU64,
}

impl RequestQueue {
    pub fn new(limiter: Arc<RateLimiter>, settings: &QueueSettings) -> Self {
        Self {
            state: Mutex::new(QueueState::default()),
            limiter,
            backoff_ms: AtomicU64::new(settings.backoff_ms),
        }
    }

    pub fn configure(&self, settings: &QueueSettings) {
        self.backoff_ms.store(settings.backoff_ms, Ordering::Relaxed);
    }

    /// Dispatch right away when nothing is waiting and the provider has headroom,
    /// otherwise join the tail of the queue.
    pub fn submit(self: &Arc<Self>, request: QueuedRequest) {
        let mut state = self.lock_state();
        if state.pending.is_empty() && self.limiter.try_acquire(&request.provider) {
            drop(state);
            info!("Dispatching {} request", request.provider);
            tokio::spawn(request.run());
            return;
        }

        self.push(&mut state, request);
    }

    /// Append to the tail and make sure a drain task is running.
    pub fn enqueue(self: &Arc<Self>, request: QueuedRequest) {
        let mut state = self.lock_state();
        self.push(&mut state, request);
    }

    pub fn len(&self) -> usize {
        self.lock_state().pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn is_draining(&self) -> bool {
        self.lock_state().draining
    }

    fn push(self: &Arc<Self>, state: &mut QueueState, request: QueuedRequest) {
        debug!(
            "Queued {} request behind {} others",
            request.provider,
            state.pending.len()
        );
        state.pending.push_back(request);
        if !state.draining {
            state.draining = true;
            tokio::spawn(Arc::clone(self).drain());
        }
    }

    async fn drain(self: Arc<Self>) {
        loop {
            let next = {
                let mut state = self.lock_state();
                let Some(head) = state.pending.front() else {
                    state.draining = false;
                    return;
                };
                if self.limiter.try_acquire(&head.provider) {
                    state.pending.pop_front()
                } else {
                    None
                }
            };

            match next {
                Some(request) => {
                    info!("Dispatching queued {} request", request.provider);
                    tokio::spawn(request.run());
                }
                None => {
                    let backoff = Duration::from_millis(self.backoff_ms.load(Ordering::Relaxed));
                    tokio::time::sleep(backoff).await;
                }
            }
        }
    }

    fn lock_state(&self) -> MutexGuard<'_, QueueState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::SystemClock;
    use crate::config::RateLimitConfig;
    use serde_json::json;
    use tokio::time::Instant;

    fn queue(limits: &[(&str, u32)]) -> Arc<RequestQueue> {
        let limiter = Arc::new(RateLimiter::new(Arc::new(SystemClock::new())));
        for (provider, requests) in limits {
            limiter.configure(
                provider,
                RateLimitConfig {
                    requests: *requests,
                    window_ms: 1_000,
                },
            );
        }
        Arc::new(RequestQueue::new(limiter, &QueueSettings::default()))
    }

    fn recording(
        log: &Arc<Mutex<Vec<String>>>,
        provider: &str,
        label: &str,
    ) -> (QueuedRequest, oneshot::Receiver<Result<Value>>) {
        let log = Arc::clone(log);
        let label = label.to_string();
        QueuedRequest::new(provider, move || async move {
            log.lock().expect("log").push(label.clone());
            Ok(json!(label))
        })
    }

    #[tokio::test(start_paused = true)]
    async fn admitted_request_dispatches_without_queueing() {
        let queue = queue(&[("p1", 1)]);
        let log = Arc::new(Mutex::new(Vec::new()));
        let start = Instant::now();

        let (request, rx) = recording(&log, "p1", "first");
        queue.submit(request);
        assert!(queue.is_empty());
        assert_eq!(rx.await.expect("settled").expect("ok"), json!("first"));
        assert!(start.elapsed() < Duration::from_millis(1_000));
    }

    #[tokio::test(start_paused = true)]
    async fn blocked_head_holds_back_other_providers() {
        let queue = queue(&[("p1", 1), ("p2", 100)]);
        let log = Arc::new(Mutex::new(Vec::new()));
        let start = Instant::now();

        let (first, first_rx) = recording(&log, "p1", "p1-a");
        let (second, second_rx) = recording(&log, "p1", "p1-b");
        let (third, third_rx) = recording(&log, "p2", "p2-a");
        queue.submit(first);
        queue.submit(second);
        queue.submit(third);
        assert_eq!(queue.len(), 2);
        assert!(queue.is_draining());

        first_rx.await.expect("settled").expect("ok");
        third_rx.await.expect("settled").expect("ok");
        assert!(start.elapsed() >= Duration::from_millis(1_000));
        second_rx.await.expect("settled").expect("ok");

        let order = log.lock().expect("log").clone();
        assert_eq!(order, vec!["p1-a", "p1-b", "p2-a"]);

        tokio::task::yield_now().await;
        assert!(queue.is_empty());
        assert!(!queue.is_draining());
    }

    #[tokio::test(start_paused = true)]
    async fn dropped_caller_is_ignored() {
        let queue = queue(&[("p1", 1)]);
        let log = Arc::new(Mutex::new(Vec::new()));

        let (first, first_rx) = recording(&log, "p1", "kept");
        let (second, second_rx) = recording(&log, "p1", "dropped");
        queue.submit(first);
        queue.enqueue(second);
        drop(second_rx);

        first_rx.await.expect("settled").expect("ok");
        tokio::time::sleep(Duration::from_millis(2_500)).await;
        assert_eq!(log.lock().expect("log").len(), 2);
        assert!(queue.is_empty());
    }
}
