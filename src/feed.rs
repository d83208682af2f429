use std::sync::Arc;
use std::time::Duration;

use log::{debug, warn};
use serde_json::Value;
use tokio::sync::{watch, Notify};
use tokio::task::JoinHandle;

use crate::coordinator::{FetchCoordinator, FetchSource};
use crate::fetch::NormalizedData;

pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(30);
pub const DEFAULT_MOUNT_DEBOUNCE: Duration = Duration::from_millis(100);

/// What a widget asks the coordinator for on every poll.
#[derive(Debug, Clone, PartialEq)]
pub struct FeedRequest {
    pub provider: String,
    pub endpoint: String,
    pub args: Value,
}

impl FeedRequest {
    pub fn new(provider: impl Into<String>, endpoint: impl Into<String>, args: Value) -> Self {
        Self {
            provider: provider.into(),
            endpoint: endpoint.into(),
            args,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FeedSettings {
    pub interval: Duration,
    pub debounce: Duration,
}

impl Default for FeedSettings {
    fn default() -> Self {
        Self {
            interval: DEFAULT_POLL_INTERVAL,
            debounce: DEFAULT_MOUNT_DEBOUNCE,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum FeedState {
    Idle,
    Loading,
    Ready {
        data: NormalizedData,
        source: FetchSource,
    },
    Failed {
        message: String,
    },
}

impl FeedState {
    pub fn is_settled(&self) -> bool {
        matches!(self, FeedState::Ready { .. } | FeedState::Failed { .. })
    }
}

/// Polls one request on an interval and publishes every outcome on a watch channel.
/// Polling stops when the feed is stopped or dropped.
pub struct WidgetFeed {
    state: watch::Receiver<FeedState>,
    refresh: Arc<Notify>,
    task: JoinHandle<()>,
}

impl WidgetFeed {
    pub fn spawn(coordinator: Arc<FetchCoordinator>, request: FeedRequest, settings: FeedSettings) -> Self {
        let (tx, rx) = watch::channel(FeedState::Idle);
        let refresh = Arc::new(Notify::new());
        let task = tokio::spawn(poll(coordinator, request, settings, tx, Arc::clone(&refresh)));
        Self {
            state: rx,
            refresh,
            task,
        }
    }

    pub fn state(&self) -> FeedState {
        self.state.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<FeedState> {
        self.state.clone()
    }

    /// Fetch now instead of waiting for the next tick.
    pub fn refresh(&self) {
        self.refresh.notify_one();
    }

    pub fn stop(&self) {
        self.task.abort();
    }

    pub fn is_stopped(&self) -> bool {
        self.task.is_finished()
    }
}

impl Drop for WidgetFeed {
    fn drop(&mut self) {
        self.task.abort();
    }
}

async fn poll(
    coordinator: Arc<FetchCoordinator>,
    request: FeedRequest,
    settings: FeedSettings,
    tx: watch::Sender<FeedState>,
    refresh: Arc<Notify>,
) {
    tokio::time::sleep(settings.debounce).await;

    loop {
        let has_data = matches!(*tx.borrow(), FeedState::Ready { .. });
        if !has_data {
            tx.send_replace(FeedState::Loading);
        }

        let next = match coordinator
            .request(&request.provider, &request.endpoint, request.args.clone())
            .await
        {
            Ok(fetched) => FeedState::Ready {
                data: fetched.data,
                source: fetched.source,
            },
            Err(err) => {
                warn!(
                    "Feed {}/{} failed: {err}",
                    request.provider, request.endpoint
                );
                FeedState::Failed {
                    message: err.user_message(),
                }
            }
        };
        tx.send_replace(next);

        tokio::select! {
            _ = tokio::time::sleep(settings.interval) => {}
            _ = refresh.notified() => debug!("Manual refresh of {}/{}", request.provider, request.endpoint),
        }
    }
}
