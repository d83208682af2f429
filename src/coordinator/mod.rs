//! Cache-first fetch pipeline: coalesce, rate limit, dispatch, normalize, cache,
//! and degrade to stale data or fallback providers when a call fails.

use std::sync::{Arc, PoisonError, RwLock};

use chrono::{Duration as ChronoDuration, Utc};
use log::{debug, info, warn};
use serde::Serialize;
use serde_json::{json, Map, Value};
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;

use crate::cache::{CacheKey, CacheLookup, KeyValueStore, ResponseCache};
use crate::clock::{Clock, SystemClock};
use crate::config::{Config, MAX_FALLBACK_DEPTH};
use crate::error::{AppError, HttpFailure, Result};
use crate::fetch::{HttpTransport, NormalizedData, PreparedRequest, ProviderGateway};
use crate::limiter::{ProviderEvent, RateLimiter};
use crate::queue::{QueuedRequest, RequestQueue};

pub mod coalesce;

use coalesce::Coalescer;

const CANDLE_LOOKBACK_DAYS: i64 = 30;

/// Where a returned payload came from, so widgets can flag degraded data.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum FetchSource {
    Network,
    Cache,
    Stale,
    Fallback { provider: String, endpoint: String },
}

impl FetchSource {
    pub fn is_degraded(&self) -> bool {
        matches!(self, FetchSource::Stale | FetchSource::Fallback { .. })
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Fetched {
    pub data: NormalizedData,
    pub source: FetchSource,
    pub key: String,
}

pub struct FetchCoordinator {
    config: RwLock<Arc<Config>>,
    transport: Arc<dyn HttpTransport>,
    limiter: Arc<RateLimiter>,
    queue: Arc<RequestQueue>,
    cache: Arc<ResponseCache>,
    coalescer: Coalescer,
}

impl FetchCoordinator {
    pub fn new(
        config: Config,
        transport: Arc<dyn HttpTransport>,
        store: Option<Arc<dyn KeyValueStore>>,
    ) -> Self {
        Self::with_clock(config, transport, store, Arc::new(SystemClock::new()))
    }

    pub fn with_clock(
        config: Config,
        transport: Arc<dyn HttpTransport>,
        store: Option<Arc<dyn KeyValueStore>>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let limiter = Arc::new(RateLimiter::from_config(&config, Arc::clone(&clock)));
        let queue = Arc::new(RequestQueue::new(Arc::clone(&limiter), &config.queue));
        let cache = match store {
            Some(store) => ResponseCache::with_store(&config.cache, clock, store),
            None => ResponseCache::new(&config.cache, clock),
        };
        cache.initialize();

        Self {
            config: RwLock::new(Arc::new(config)),
            transport,
            limiter,
            queue,
            cache: Arc::new(cache),
            coalescer: Coalescer::new(),
        }
    }

    pub fn config(&self) -> Arc<Config> {
        Arc::clone(&self.config.read().unwrap_or_else(PoisonError::into_inner))
    }

    /// Swap provider definitions at runtime. Live rate-limit counters are kept.
    pub fn apply_config(&self, config: Arc<Config>) {
        self.limiter.apply_config(&config);
        self.queue.configure(&config.queue);
        self.cache.configure(&config.cache);
        *self.config.write().unwrap_or_else(PoisonError::into_inner) = config;
        info!("Applied provider configuration");
    }

    /// Keep this coordinator in step with a configuration registry.
    pub fn follow(self: &Arc<Self>, mut updates: watch::Receiver<Arc<Config>>) -> JoinHandle<()> {
        let coordinator = Arc::clone(self);
        tokio::spawn(async move {
            while updates.changed().await.is_ok() {
                let config = Arc::clone(&updates.borrow_and_update());
                coordinator.apply_config(config);
            }
        })
    }

    pub fn cache(&self) -> &Arc<ResponseCache> {
        &self.cache
    }

    pub fn limiter(&self) -> &Arc<RateLimiter> {
        &self.limiter
    }

    pub fn queue(&self) -> &Arc<RequestQueue> {
        &self.queue
    }

    pub fn subscribe_events(&self) -> broadcast::Receiver<ProviderEvent> {
        self.limiter.subscribe()
    }

    /// Fetch `endpoint` from `provider`, serving fresh cache first and degrading on failure.
    pub async fn request(&self, provider: &str, endpoint: &str, args: Value) -> Result<Fetched> {
        let config = self.config();
        let named = ProviderGateway::new(&config).resolve_args(provider, endpoint, &args)?;
        let key = cache_key(&config, provider, endpoint, &named)?;

        if let Some(data) = self.cached(&key) {
            return Ok(fetched(data, FetchSource::Cache, &key));
        }

        let _guard = self.coalescer.acquire(&key.to_string()).await;
        if let Some(data) = self.cached(&key) {
            debug!("Served {key} from a concurrent fetch");
            return Ok(fetched(data, FetchSource::Cache, &key));
        }

        match self.fetch_single(&config, provider, endpoint, &named, &key).await {
            Ok(data) => Ok(fetched(data, FetchSource::Network, &key)),
            Err(err) => self.recover(&config, provider, endpoint, &named, &key, err).await,
        }
    }

    async fn recover(
        &self,
        config: &Config,
        provider: &str,
        endpoint: &str,
        named: &Map<String, Value>,
        key: &CacheKey,
        err: AppError,
    ) -> Result<Fetched> {
        if matches!(err, AppError::Configuration(_)) {
            return Err(err);
        }

        if let Some(data) = self.cache.get_stale(key).and_then(decode_cached) {
            warn!("{provider}/{endpoint} failed ({err}), serving stale data");
            return Ok(fetched(data, FetchSource::Stale, key));
        }

        let steps = config.fallback_chain(provider, endpoint);
        if steps.is_empty() || !err.allows_fallback() {
            return Err(err);
        }

        warn!("{provider}/{endpoint} failed ({err}), trying fallbacks");
        let mut attempts = 1;
        let mut last = err;
        for step in steps.iter().take(MAX_FALLBACK_DEPTH) {
            let step_args = step.args_transform.apply(named);
            let step_key = match cache_key(config, &step.provider, &step.endpoint, &step_args) {
                Ok(step_key) => step_key,
                Err(step_err) => {
                    warn!("Fallback {}/{} skipped: {step_err}", step.provider, step.endpoint);
                    attempts += 1;
                    last = step_err;
                    continue;
                }
            };
            let source = FetchSource::Fallback {
                provider: step.provider.clone(),
                endpoint: step.endpoint.clone(),
            };

            if let Some(data) = self.cached(&step_key) {
                return Ok(fetched(data, source, &step_key));
            }

            attempts += 1;
            match self
                .fetch_single(config, &step.provider, &step.endpoint, &step_args, &step_key)
                .await
            {
                Ok(data) => {
                    info!(
                        "Fallback {}/{} answered for {provider}/{endpoint}",
                        step.provider, step.endpoint
                    );
                    return Ok(fetched(data, source, &step_key));
                }
                Err(step_err) => {
                    warn!("Fallback {}/{} failed: {step_err}", step.provider, step.endpoint);
                    last = step_err;
                }
            }
        }

        Err(AppError::AllProvidersFailed {
            provider: provider.to_string(),
            endpoint: endpoint.to_string(),
            attempts,
            last: Box::new(last),
        })
    }

    /// One provider call: build, dispatch through limiter and queue, normalize, cache.
    async fn fetch_single(
        &self,
        config: &Config,
        provider: &str,
        endpoint: &str,
        named: &Map<String, Value>,
        key: &CacheKey,
    ) -> Result<NormalizedData> {
        let gateway = ProviderGateway::new(config);
        let request = gateway.build_from_named(provider, endpoint, named)?;
        let symbol = request.symbol().map(str::to_string);

        let raw = self.dispatch(request).await?;
        let data = gateway
            .normalize(provider, endpoint, &raw, symbol.as_deref())?
            .ok_or_else(|| AppError::malformed(provider, format!("unrecognized {endpoint} payload")))?;

        match serde_json::to_value(&data) {
            Ok(payload) => self.cache.set(key, payload, self.cache.ttl_for(provider, endpoint)),
            Err(err) => warn!("Could not cache {key}: {err}"),
        }
        Ok(data)
    }

    async fn dispatch(&self, request: PreparedRequest) -> Result<Value> {
        let provider = request.provider.clone();
        let transport = Arc::clone(&self.transport);
        let (queued, settled) =
            QueuedRequest::new(provider.clone(), move || async move { transport.get(&request).await });
        self.queue.submit(queued);

        match settled.await.map_err(|_| AppError::Abandoned)? {
            Err(AppError::Http {
                kind: HttpFailure::RateLimited,
                ..
            }) => {
                self.limiter.mark_exhausted(&provider);
                Err(AppError::ProviderExhausted { provider })
            }
            other => other,
        }
    }

    /// Fresh cached data only. Expired entries stay behind for stale fallback.
    fn cached(&self, key: &CacheKey) -> Option<NormalizedData> {
        match self.cache.lookup(key) {
            CacheLookup::Fresh(payload) => decode_cached(payload),
            CacheLookup::Stale | CacheLookup::Miss => None,
        }
    }

    pub async fn quote(&self, symbol: &str) -> Result<Fetched> {
        self.request("alphaVantage", "quote", json!({ "symbol": symbol }))
            .await
    }

    pub async fn intraday(&self, symbol: &str, interval: Option<&str>) -> Result<Fetched> {
        let mut args = Map::new();
        args.insert("symbol".to_string(), json!(symbol));
        if let Some(interval) = interval {
            args.insert("interval".to_string(), json!(interval));
        }
        self.request("alphaVantage", "intraday", Value::Object(args))
            .await
    }

    pub async fn daily(&self, symbol: &str) -> Result<Fetched> {
        self.request("alphaVantage", "daily", json!({ "symbol": symbol }))
            .await
    }

    pub async fn top_gainers_losers(&self) -> Result<Fetched> {
        self.request("alphaVantage", "topGainersLosers", json!({}))
            .await
    }

    pub async fn finnhub_quote(&self, symbol: &str) -> Result<Fetched> {
        self.request("finnhub", "quote", json!({ "symbol": symbol }))
            .await
    }

    /// Candles between `from` and `to` (epoch seconds), defaulting to the last 30 days.
    pub async fn candles(
        &self,
        symbol: &str,
        resolution: Option<&str>,
        from: Option<i64>,
        to: Option<i64>,
    ) -> Result<Fetched> {
        let to = to.unwrap_or_else(|| Utc::now().timestamp());
        let from = from.unwrap_or(to - ChronoDuration::days(CANDLE_LOOKBACK_DAYS).num_seconds());
        let mut args = Map::new();
        args.insert("symbol".to_string(), json!(symbol));
        args.insert("from".to_string(), json!(from));
        args.insert("to".to_string(), json!(to));
        if let Some(resolution) = resolution {
            args.insert("resolution".to_string(), json!(resolution));
        }
        self.request("finnhub", "candles", Value::Object(args)).await
    }

    pub async fn company_profile(&self, symbol: &str) -> Result<Fetched> {
        self.request("finnhub", "profile", json!({ "symbol": symbol }))
            .await
    }

    pub async fn indian_quote(&self, symbol: &str, exchange: Option<&str>) -> Result<Fetched> {
        self.request("indianAPI", "quote", indian_args(symbol, exchange, &[]))
            .await
    }

    pub async fn indian_historical(
        &self,
        symbol: &str,
        from_date: &str,
        to_date: &str,
        exchange: Option<&str>,
    ) -> Result<Fetched> {
        let dates = [("from_date", from_date), ("to_date", to_date)];
        self.request("indianAPI", "historical", indian_args(symbol, exchange, &dates))
            .await
    }

    pub async fn indian_company_info(&self, symbol: &str, exchange: Option<&str>) -> Result<Fetched> {
        self.request("indianAPI", "companyInfo", indian_args(symbol, exchange, &[]))
            .await
    }
}

fn indian_args(symbol: &str, exchange: Option<&str>, extra: &[(&str, &str)]) -> Value {
    let mut args = Map::new();
    args.insert("symbol".to_string(), json!(symbol));
    if let Some(exchange) = exchange {
        args.insert("exchange".to_string(), json!(exchange));
    }
    for (key, value) in extra {
        args.insert(key.to_string(), json!(value));
    }
    Value::Object(args)
}

/// Key over the arguments actually sent, so callers that spell out a default share an entry.
fn cache_key(
    config: &Config,
    provider: &str,
    endpoint: &str,
    named: &Map<String, Value>,
) -> Result<CacheKey> {
    let effective = ProviderGateway::new(config).effective_args(provider, endpoint, named)?;
    Ok(CacheKey::new(provider, endpoint, &Value::Object(effective)))
}

fn decode_cached(payload: Value) -> Option<NormalizedData> {
    match serde_json::from_value(payload) {
        Ok(data) => Some(data),
        Err(err) => {
            debug!("Ignoring undecodable cache payload: {err}");
            None
        }
    }
}

fn fetched(data: NormalizedData, source: FetchSource, key: &CacheKey) -> Fetched {
    Fetched {
        data,
        source,
        key: key.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::MemoryStore;
    use crate::config::RateLimitConfig;
    use crate::test_support::{http_error, ScriptedTransport};
    use std::time::Duration;
    use tokio::time::Instant;

    fn config(alpha_limit: RateLimitConfig) -> Config {
        let mut config = Config::builtin();
        for provider in config.providers.values_mut() {
            provider.api_key = Some(format!("{}-key", provider.id));
        }
        if let Some(alpha) = config.providers.get_mut("alphaVantage") {
            alpha.rate_limit = alpha_limit;
        }
        config
    }

    fn coordinator(transport: Arc<ScriptedTransport>) -> FetchCoordinator {
        let limit = RateLimitConfig {
            requests: 1,
            window_ms: 1_000,
        };
        FetchCoordinator::new(config(limit), transport, None)
    }

    fn alpha_quote(symbol: &str, price: &str) -> Value {
        json!({ "Global Quote": { "01. symbol": symbol, "05. price": price } })
    }

    fn price(fetched: &Fetched) -> Option<f64> {
        fetched.data.as_quote().and_then(|quote| quote.price)
    }

    #[tokio::test(start_paused = true)]
    async fn identical_concurrent_requests_share_one_dispatch() {
        let transport = Arc::new(ScriptedTransport::with_delay(Duration::from_millis(200)));
        transport.push("alphaVantage", "quote", Ok(alpha_quote("IBM", "182.15")));
        let coordinator = coordinator(Arc::clone(&transport));

        let (first, second) = tokio::join!(
            coordinator.request("alphaVantage", "quote", json!(["IBM"])),
            coordinator.request("alphaVantage", "quote", json!({ "symbol": "IBM" })),
        );
        let first = first.expect("first");
        let second = second.expect("second");

        assert_eq!(transport.call_count(), 1);
        assert_eq!(first.source, FetchSource::Network);
        assert_eq!(second.source, FetchSource::Cache);
        assert_eq!(price(&second), Some(182.15));
        assert_eq!(first.key, second.key);
    }

    #[tokio::test(start_paused = true)]
    async fn different_keys_wait_for_the_window() {
        let transport = Arc::new(ScriptedTransport::new());
        transport
            .push("alphaVantage", "quote", Ok(alpha_quote("IBM", "1")))
            .push("alphaVantage", "quote", Ok(alpha_quote("MSFT", "2")));
        let coordinator = coordinator(Arc::clone(&transport));
        let start = Instant::now();

        let (ibm, msft) = tokio::join!(coordinator.quote("IBM"), coordinator.quote("MSFT"));
        ibm.expect("ibm");
        msft.expect("msft");

        assert_eq!(transport.call_count(), 2);
        assert!(start.elapsed() >= Duration::from_millis(1_000));
    }

    #[tokio::test(start_paused = true)]
    async fn fresh_hit_skips_network() {
        let transport = Arc::new(ScriptedTransport::new());
        transport.push("finnhub", "quote", Ok(json!({"c": 10.0, "pc": 9.5})));
        let coordinator = coordinator(Arc::clone(&transport));

        let first = coordinator.finnhub_quote("AAPL").await.expect("first");
        tokio::time::advance(Duration::from_secs(29)).await;
        let second = coordinator.finnhub_quote("AAPL").await.expect("second");

        assert_eq!(first.source, FetchSource::Network);
        assert_eq!(second.source, FetchSource::Cache);
        assert_eq!(transport.call_count(), 1);
        assert_eq!(
            second.data.as_quote().map(|quote| quote.symbol.as_str()),
            Some("AAPL")
        );
    }

    #[tokio::test(start_paused = true)]
    async fn failure_serves_stale_entry() {
        let transport = Arc::new(ScriptedTransport::new());
        transport
            .push("alphaVantage", "quote", Ok(alpha_quote("IBM", "100")))
            .push("alphaVantage", "quote", Err(http_error("alphaVantage", 500)));
        let coordinator = coordinator(Arc::clone(&transport));

        coordinator.quote("IBM").await.expect("warm");
        tokio::time::advance(Duration::from_secs(151)).await;

        let degraded = coordinator.quote("IBM").await.expect("stale");
        assert_eq!(degraded.source, FetchSource::Stale);
        assert!(degraded.source.is_degraded());
        assert_eq!(price(&degraded), Some(100.0));
        assert_eq!(transport.call_count(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn rate_limited_call_still_serves_stale_entry() {
        let transport = Arc::new(ScriptedTransport::new());
        transport
            .push("alphaVantage", "quote", Ok(alpha_quote("IBM", "100")))
            .push("alphaVantage", "quote", Err(http_error("alphaVantage", 429)));
        let coordinator = coordinator(Arc::clone(&transport));
        let mut events = coordinator.subscribe_events();

        coordinator.quote("IBM").await.expect("warm");
        tokio::time::advance(Duration::from_secs(151)).await;

        let degraded = coordinator.quote("IBM").await.expect("stale");
        assert_eq!(degraded.source, FetchSource::Stale);
        assert_eq!(price(&degraded), Some(100.0));
        assert!(!coordinator.limiter().admit("alphaVantage"));
        assert!(matches!(
            events.try_recv(),
            Ok(ProviderEvent::Exhausted { ref provider, .. }) if provider == "alphaVantage"
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn spelled_out_default_shares_the_cache_entry() {
        let transport = Arc::new(ScriptedTransport::new());
        transport.push("indianAPI", "quote", Ok(json!({"data": {"symbol": "TCS", "price": 3500.0}})));
        let coordinator = coordinator(Arc::clone(&transport));

        let implicit = coordinator.indian_quote("TCS", None).await.expect("implicit");
        let explicit = coordinator.indian_quote("TCS", Some("NSE")).await.expect("explicit");

        assert_eq!(transport.call_count(), 1);
        assert_eq!(implicit.source, FetchSource::Network);
        assert_eq!(explicit.source, FetchSource::Cache);
        assert_eq!(implicit.key, explicit.key);
    }

    #[tokio::test(start_paused = true)]
    async fn walks_fallback_chain_in_order() {
        let transport = Arc::new(ScriptedTransport::new());
        transport
            .push("indianAPI", "quote", Err(AppError::Timeout { provider: "indianAPI".to_string() }))
            .push("indianAPI", "quote", Err(http_error("indianAPI", 502)))
            .push("alphaVantage", "quote", Ok(alpha_quote("TCS", "3500")));
        let coordinator = coordinator(Arc::clone(&transport));

        let result = coordinator.indian_quote("TCS", Some("NSE")).await.expect("fallback");
        assert_eq!(
            result.source,
            FetchSource::Fallback {
                provider: "alphaVantage".to_string(),
                endpoint: "quote".to_string()
            }
        );

        let calls = transport.calls();
        assert_eq!(calls.len(), 3);
        assert_eq!(calls[0].param("exchange"), Some("NSE"));
        assert_eq!(calls[1].param("exchange"), None);
        assert_eq!(calls[2].provider, "alphaVantage");
        assert_eq!(calls[2].symbol(), Some("TCS"));
    }

    #[tokio::test(start_paused = true)]
    async fn exhausted_chain_reports_every_attempt() {
        let transport = Arc::new(ScriptedTransport::new());
        transport
            .push("indianAPI", "companyInfo", Err(http_error("indianAPI", 500)))
            .push("indianAPI", "companyInfo", Ok(json!({"data": {}})))
            .push("finnhub", "profile", Err(http_error("finnhub", 503)));
        let coordinator = coordinator(Arc::clone(&transport));

        let err = coordinator
            .indian_company_info("INFY", None)
            .await
            .expect_err("everything failed");
        match err {
            AppError::AllProvidersFailed { attempts, last, .. } => {
                assert_eq!(attempts, 3);
                assert!(matches!(*last, AppError::Http { status: 503, .. }));
            }
            other => panic!("unexpected error {other:?}"),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn forbidden_does_not_fall_back() {
        let transport = Arc::new(ScriptedTransport::new());
        transport.push("indianAPI", "quote", Err(http_error("indianAPI", 403)));
        let coordinator = coordinator(Arc::clone(&transport));

        let err = coordinator.indian_quote("TCS", None).await.expect_err("forbidden");
        assert!(err.user_message().starts_with("Access denied"));
        assert_eq!(transport.call_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn rate_limited_provider_is_marked_exhausted() {
        let transport = Arc::new(ScriptedTransport::new());
        transport.push("finnhub", "quote", Err(http_error("finnhub", 429)));
        let coordinator = coordinator(Arc::clone(&transport));
        let mut events = coordinator.subscribe_events();

        let err = coordinator.finnhub_quote("AAPL").await.expect_err("429");
        assert!(matches!(err, AppError::ProviderExhausted { .. }));
        assert!(!coordinator.limiter().admit("finnhub"));
        assert!(matches!(
            events.try_recv(),
            Ok(ProviderEvent::Exhausted { ref provider, .. }) if provider == "finnhub"
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn configuration_errors_never_reach_the_network() {
        let transport = Arc::new(ScriptedTransport::new());
        let mut config = config(RateLimitConfig {
            requests: 5,
            window_ms: 60_000,
        });
        if let Some(finnhub) = config.providers.get_mut("finnhub") {
            finnhub.api_key = None;
        }
        let coordinator = FetchCoordinator::new(config, transport.clone(), None);

        let err = coordinator
            .request("alphaVantage", "weekly", json!(["IBM"]))
            .await
            .expect_err("unknown endpoint");
        assert!(matches!(err, AppError::Configuration(_)));

        let err = coordinator.finnhub_quote("AAPL").await.expect_err("no key");
        assert!(matches!(err, AppError::Configuration(_)));
        assert_eq!(transport.call_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn unmatched_payload_is_malformed() {
        let transport = Arc::new(ScriptedTransport::new());
        transport.push("alphaVantage", "quote", Ok(json!({"Note": "Thank you for using Alpha Vantage"})));
        let coordinator = coordinator(Arc::clone(&transport));

        let err = coordinator.quote("IBM").await.expect_err("no quote");
        assert!(matches!(err, AppError::MalformedResponse { .. }));
        assert!(coordinator.cache().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn candles_default_to_thirty_days() {
        let transport = Arc::new(ScriptedTransport::new());
        transport.push("finnhub", "candles", Ok(json!({"s": "no_data"})));
        let coordinator = coordinator(Arc::clone(&transport));

        let result = coordinator.candles("AAPL", None, None, None).await.expect("candles");
        assert_eq!(result.data.as_series().map(<[_]>::len), Some(0));

        let call = &transport.calls()[0];
        let from: i64 = call.param("from").and_then(|v| v.parse().ok()).expect("from");
        let to: i64 = call.param("to").and_then(|v| v.parse().ok()).expect("to");
        assert_eq!(to - from, 30 * 24 * 60 * 60);
        assert_eq!(call.param("resolution"), Some("D"));
    }

    #[tokio::test(start_paused = true)]
    async fn persisted_entries_survive_restart() {
        let store: Arc<dyn KeyValueStore> = Arc::new(MemoryStore::new());
        let limit = RateLimitConfig {
            requests: 5,
            window_ms: 60_000,
        };

        let transport = Arc::new(ScriptedTransport::new());
        transport.push("finnhub", "profile", Ok(json!({"ticker": "AAPL", "name": "Apple Inc"})));
        let first = FetchCoordinator::new(config(limit), transport, Some(Arc::clone(&store)));
        first.company_profile("AAPL").await.expect("network");
        first.cache().flush();

        let transport = Arc::new(ScriptedTransport::new());
        let second = FetchCoordinator::new(config(limit), transport.clone(), Some(store));
        let cached = second.company_profile("AAPL").await.expect("cached");
        assert_eq!(cached.source, FetchSource::Cache);
        assert_eq!(transport.call_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn applied_config_changes_limits() {
        let transport = Arc::new(ScriptedTransport::new());
        let coordinator = coordinator(Arc::clone(&transport));

        let mut next = (*coordinator.config()).clone();
        if let Some(alpha) = next.providers.get_mut("alphaVantage") {
            alpha.rate_limit.requests = 7;
        }
        coordinator.apply_config(Arc::new(next));

        let state = coordinator.limiter().snapshot("alphaVantage").expect("state");
        assert_eq!(state.capacity, 7);
        assert_eq!(
            coordinator
                .config()
                .provider("alphaVantage")
                .map(|p| p.rate_limit.requests),
            Some(7)
        );
    }
}
