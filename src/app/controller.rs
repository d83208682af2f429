use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use reqwest::Client;
use serde_json::{json, Value};

use crate::app::render;
use crate::cli::{CacheAction, Commands};
use crate::config::registry::ConfigRegistry;
use crate::coordinator::{FetchCoordinator, Fetched};
use crate::error::{AppError, Result};
use crate::feed::{FeedRequest, FeedSettings, FeedState, WidgetFeed};
use crate::fetch::{Relay, RelayResponse};
use crate::limiter::ProviderEvent;
use crate::utils::{format_epoch_ms, parse_args, parse_key_value};

/// Runs one CLI command against a shared coordinator.
pub struct AppController {
    coordinator: Arc<FetchCoordinator>,
    registry: Option<Arc<ConfigRegistry>>,
}

impl AppController {
    pub fn new(coordinator: Arc<FetchCoordinator>, registry: Option<Arc<ConfigRegistry>>) -> Self {
        Self {
            coordinator,
            registry,
        }
    }

    pub async fn run(self, command: Commands) -> Result<()> {
        match command {
            Commands::Providers => print_lines(render::provider_lines(&self.coordinator.config())),
            Commands::Fetch {
                provider,
                endpoint,
                args,
            } => {
                let args = parse_args(&args)?;
                let fetched = self
                    .coordinator
                    .request(&provider, &endpoint, Value::Object(args))
                    .await?;
                print_lines(render::fetched_lines(&fetched));
            }
            Commands::Quote { symbol, provider } => {
                let fetched = self.quote(&symbol, &provider).await?;
                print_lines(render::fetched_lines(&fetched));
            }
            Commands::Watch {
                provider,
                endpoint,
                args,
                interval,
            } => {
                let request = FeedRequest::new(provider, endpoint, Value::Object(parse_args(&args)?));
                self.watch(request, Duration::from_secs(interval.max(1)))
                    .await?;
            }
            Commands::Relay { params, method } => {
                let response = self.relay(&method, &params).await?;
                println!("HTTP {}", response.status);
                println!("{}", serde_json::to_string_pretty(&response.body)?);
                if response.status != 200 {
                    return Err(AppError::message(format!("Relay answered with status {}", response.status)));
                }
            }
            Commands::Cache { action } => self.cache(action),
        }
        Ok(())
    }

    async fn quote(&self, symbol: &str, provider: &str) -> Result<Fetched> {
        match provider {
            "alphaVantage" => self.coordinator.quote(symbol).await,
            "finnhub" => self.coordinator.finnhub_quote(symbol).await,
            "indianAPI" => self.coordinator.indian_quote(symbol, None).await,
            other => {
                self.coordinator
                    .request(other, "quote", json!({ "symbol": symbol }))
                    .await
            }
        }
    }

    /// Run the relay handler against the first relayed provider, filling in its configured key.
    async fn relay(&self, method: &str, params: &[String]) -> Result<RelayResponse> {
        let config = self.coordinator.config();
        let provider = config
            .providers
            .values()
            .find(|provider| provider.relay)
            .ok_or_else(|| AppError::configuration("No provider is configured to use the relay"))?;

        let mut query = HashMap::new();
        for param in params {
            let (key, value) = parse_key_value(param)
                .ok_or_else(|| AppError::message(format!("Expected key=value, got '{param}'")))?;
            query.insert(key, value);
        }
        if let Some(key) = provider.api_key.as_ref().filter(|key| !key.trim().is_empty()) {
            query.entry("api_key".to_string()).or_insert_with(|| key.clone());
        }

        let relay = Relay::new(Client::new(), provider.base_url.as_str());
        Ok(relay.handle(method, &query).await)
    }

    async fn watch(&self, request: FeedRequest, interval: Duration) -> Result<()> {
        let follower = match &self.registry {
            Some(registry) => {
                registry.start_watching()?;
                Some(self.coordinator.follow(registry.subscribe()))
            }
            None => None,
        };

        let settings = FeedSettings {
            interval,
            ..FeedSettings::default()
        };
        let feed = WidgetFeed::spawn(Arc::clone(&self.coordinator), request, settings);
        let mut updates = feed.subscribe();
        let mut events = self.coordinator.subscribe_events();
        let interrupted = tokio::signal::ctrl_c();
        tokio::pin!(interrupted);

        loop {
            tokio::select! {
                changed = updates.changed() => {
                    if changed.is_err() {
                        break;
                    }
                    let state = updates.borrow_and_update().clone();
                    print_state(&state);
                }
                event = events.recv() => {
                    if let Ok(ProviderEvent::Exhausted { provider, resets_at }) = event {
                        println!("{provider} rate limit reached, resets at {}", format_epoch_ms(resets_at));
                    }
                }
                _ = &mut interrupted => break,
            }
        }

        feed.stop();
        if let Some(follower) = follower {
            follower.abort();
        }
        Ok(())
    }

    fn cache(&self, action: CacheAction) {
        let cache = self.coordinator.cache();
        match action {
            CacheAction::Stats => print_lines(render::stats_lines(&cache.stats())),
            CacheAction::Clear => {
                cache.clear();
                println!("Cache cleared.");
            }
            CacheAction::ClearExpired => {
                println!("Removed {} expired entries.", cache.clear_expired());
            }
            CacheAction::ClearProvider { provider } => {
                println!(
                    "Removed {} entries for {provider}.",
                    cache.clear_by_provider(&provider)
                );
            }
        }
    }
}

fn print_state(state: &FeedState) {
    match state {
        FeedState::Idle => {}
        FeedState::Loading => println!("Loading..."),
        FeedState::Ready { data, source } => {
            println!("[{}]", render::source_label(source));
            print_lines(render::data_lines(data));
        }
        FeedState::Failed { message } => println!("Error: {message}"),
    }
}

fn print_lines(lines: Vec<String>) {
    for line in lines {
        println!("{line}");
    }
}
