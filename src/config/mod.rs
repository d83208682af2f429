use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use std::collections::BTreeMap;

use crate::error::{AppError, Result};

pub mod loader;
pub mod registry;
pub mod validator;

pub use loader::{load_config, load_provider_descriptor, load_provider_descriptors};
pub use registry::ConfigRegistry;

/// Upper bound on the number of steps evaluated after a primary request fails.
pub const MAX_FALLBACK_DEPTH: usize = 3;

pub const DEFAULT_MAX_CACHE_ENTRIES: usize = 50;
pub const DEFAULT_QUEUE_BACKOFF_MS: u64 = 1_000;
pub const STORAGE_NAMESPACE: &str = "finance-dashboard-storage";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RateLimitConfig {
    pub requests: u32,
    pub window_ms: u64,
}

/// Canonical shape an endpoint's response normalizes into.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResponseShape {
    Quote,
    Series,
    Profile,
    Movers,
}

#[derive(Debug, Clone)]
pub struct EndpointConfig {
    pub name: String,
    pub description: String,
    /// Path appended to the provider base URL. May contain `{field}` placeholders.
    pub path: Option<String>,
    pub static_params: BTreeMap<String, String>,
    pub required_fields: Vec<String>,
    pub optional_fields: Vec<String>,
    pub default_params: Map<String, Value>,
    /// Fields only forwarded when their value is one of the listed ones.
    pub allowed_values: BTreeMap<String, Vec<String>>,
    pub shape: ResponseShape,
}

impl EndpointConfig {
    /// Declared fields in positional order: required first, then optional.
    pub fn positional_fields(&self) -> impl Iterator<Item = &String> {
        self.required_fields.iter().chain(self.optional_fields.iter())
    }

    pub fn declares(&self, field: &str) -> bool {
        self.positional_fields().any(|declared| declared == field)
    }
}

#[derive(Debug, Clone)]
pub struct ProviderConfig {
    pub id: String,
    pub name: String,
    pub description: String,
    pub base_url: String,
    pub api_key: Option<String>,
    pub api_key_param: String,
    /// Requests go through the same-origin relay instead of hitting the upstream directly.
    pub relay: bool,
    pub rate_limit: RateLimitConfig,
    pub endpoints: BTreeMap<String, EndpointConfig>,
}

impl ProviderConfig {
    pub fn is_configured(&self) -> bool {
        self.api_key
            .as_deref()
            .map(|key| !key.trim().is_empty())
            .unwrap_or(false)
    }
}

/// How the primary request's arguments are reshaped for a fallback step.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "fields", rename_all = "snake_case")]
pub enum ArgsTransform {
    Keep,
    /// Send the listed fields as explicit nulls so endpoint defaults do not re-apply.
    Omit(Vec<String>),
    /// Forward only the listed fields.
    Only(Vec<String>),
}

impl ArgsTransform {
    pub fn apply(&self, args: &Map<String, Value>) -> Map<String, Value> {
        match self {
            ArgsTransform::Keep => args.clone(),
            ArgsTransform::Omit(fields) => {
                let mut next = args.clone();
                for field in fields {
                    next.insert(field.clone(), Value::Null);
                }
                next
            }
            ArgsTransform::Only(fields) => args
                .iter()
                .filter(|(key, _)| fields.iter().any(|field| field == *key))
                .map(|(key, value)| (key.clone(), value.clone()))
                .collect(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FallbackStep {
    pub provider: String,
    pub endpoint: String,
    pub args_transform: ArgsTransform,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FallbackChain {
    pub provider: String,
    pub endpoint: String,
    pub steps: Vec<FallbackStep>,
}

#[derive(Debug, Clone)]
pub struct CacheSettings {
    pub max_entries: usize,
    pub min_ttl_ms: u64,
    pub max_ttl_ms: u64,
    pub namespace: String,
}

impl Default for CacheSettings {
    fn default() -> Self {
        Self {
            max_entries: DEFAULT_MAX_CACHE_ENTRIES,
            min_ttl_ms: crate::cache::ttl::MIN_TTL_MS,
            max_ttl_ms: crate::cache::ttl::MAX_TTL_MS,
            namespace: STORAGE_NAMESPACE.to_string(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct QueueSettings {
    pub backoff_ms: u64,
}

impl Default for QueueSettings {
    fn default() -> Self {
        Self {
            backoff_ms: DEFAULT_QUEUE_BACKOFF_MS,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct Config {
    pub providers: BTreeMap<String, ProviderConfig>,
    pub fallbacks: Vec<FallbackChain>,
    pub cache: CacheSettings,
    pub queue: QueueSettings,
}

impl Config {
    /// Provider table of the hosted dashboard: Alpha Vantage, Finnhub and the Indian API relay.
    pub fn builtin() -> Self {
        let alpha_vantage = ProviderConfig {
            id: "alphaVantage".to_string(),
            name: "Alpha Vantage".to_string(),
            description: "Global stock market data and technical indicators".to_string(),
            base_url: env_or("ALPHA_VANTAGE_BASE_URL", "https://www.alphavantage.co/query"),
            api_key: env_key("ALPHA_VANTAGE_API_KEY"),
            api_key_param: "apikey".to_string(),
            relay: false,
            rate_limit: RateLimitConfig {
                requests: 5,
                window_ms: 60_000,
            },
            endpoints: BTreeMap::from([
                (
                    "quote".to_string(),
                    endpoint("Stock Quote", "Get real-time stock quote data")
                        .static_param("function", "GLOBAL_QUOTE")
                        .required(&["symbol"])
                        .shape(ResponseShape::Quote)
                        .build(),
                ),
                (
                    "intraday".to_string(),
                    endpoint("Intraday Data", "Get intraday time series data")
                        .static_param("function", "TIME_SERIES_INTRADAY")
                        .required(&["symbol", "interval"])
                        .optional(&["outputsize"])
                        .defaults(json!({ "interval": "5min", "outputsize": "compact" }))
                        .shape(ResponseShape::Series)
                        .build(),
                ),
                (
                    "daily".to_string(),
                    endpoint("Daily Data", "Get daily time series data")
                        .static_param("function", "TIME_SERIES_DAILY")
                        .required(&["symbol"])
                        .optional(&["outputsize"])
                        .defaults(json!({ "outputsize": "compact" }))
                        .shape(ResponseShape::Series)
                        .build(),
                ),
                (
                    "topGainersLosers".to_string(),
                    endpoint("Top Gainers/Losers", "Get top gaining and losing stocks")
                        .static_param("function", "TOP_GAINERS_LOSERS")
                        .shape(ResponseShape::Movers)
                        .build(),
                ),
            ]),
        };

        let finnhub = ProviderConfig {
            id: "finnhub".to_string(),
            name: "Finnhub".to_string(),
            description: "Real-time financial data and market information".to_string(),
            base_url: env_or("FINNHUB_BASE_URL", "https://finnhub.io/api/v1"),
            api_key: env_key("FINNHUB_API_KEY"),
            api_key_param: "token".to_string(),
            relay: false,
            rate_limit: RateLimitConfig {
                requests: 60,
                window_ms: 60_000,
            },
            endpoints: BTreeMap::from([
                (
                    "quote".to_string(),
                    endpoint("Stock Quote", "Get real-time stock quote")
                        .path("quote")
                        .required(&["symbol"])
                        .shape(ResponseShape::Quote)
                        .build(),
                ),
                (
                    "candles".to_string(),
                    endpoint("Candlestick Data", "Get historical candlestick data")
                        .path("stock/candle")
                        .required(&["symbol", "resolution"])
                        .optional(&["from", "to"])
                        .defaults(json!({ "resolution": "D" }))
                        .shape(ResponseShape::Series)
                        .build(),
                ),
                (
                    "profile".to_string(),
                    endpoint("Company Profile", "Get company profile information")
                        .path("stock/profile2")
                        .required(&["symbol"])
                        .shape(ResponseShape::Profile)
                        .build(),
                ),
            ]),
        };

        let exchanges = vec!["NSE".to_string(), "BSE".to_string()];
        let indian_api = ProviderConfig {
            id: "indianAPI".to_string(),
            name: "Indian API".to_string(),
            description: "Indian stock market data and financial information".to_string(),
            base_url: env_or("INDIAN_API_BASE_URL", "https://stock.indianapi.in"),
            api_key: env_key("INDIAN_API_KEY"),
            api_key_param: "api_key".to_string(),
            relay: true,
            rate_limit: RateLimitConfig {
                requests: 100,
                window_ms: 60_000,
            },
            endpoints: BTreeMap::from([
                (
                    "quote".to_string(),
                    endpoint("Stock Quote", "Get Indian stock quote data")
                        .path("quote")
                        .required(&["symbol"])
                        .optional(&["exchange"])
                        .defaults(json!({ "exchange": "NSE" }))
                        .allowed("exchange", exchanges.clone())
                        .shape(ResponseShape::Quote)
                        .build(),
                ),
                (
                    "historical".to_string(),
                    endpoint("Historical Data", "Get historical stock data")
                        .path("historical")
                        .required(&["symbol", "from_date", "to_date"])
                        .optional(&["exchange"])
                        .defaults(json!({ "exchange": "NSE" }))
                        .allowed("exchange", exchanges.clone())
                        .shape(ResponseShape::Series)
                        .build(),
                ),
                (
                    "companyInfo".to_string(),
                    endpoint("Company Information", "Get company information")
                        .path("company")
                        .required(&["symbol"])
                        .optional(&["exchange"])
                        .defaults(json!({ "exchange": "NSE" }))
                        .allowed("exchange", exchanges)
                        .shape(ResponseShape::Profile)
                        .build(),
                ),
            ]),
        };

        let without_exchange = ArgsTransform::Omit(vec!["exchange".to_string()]);
        let symbol_only = ArgsTransform::Only(vec!["symbol".to_string()]);
        let fallbacks = vec![
            FallbackChain {
                provider: "indianAPI".to_string(),
                endpoint: "quote".to_string(),
                steps: vec![
                    step("indianAPI", "quote", without_exchange.clone()),
                    step("alphaVantage", "quote", symbol_only.clone()),
                ],
            },
            FallbackChain {
                provider: "indianAPI".to_string(),
                endpoint: "historical".to_string(),
                steps: vec![
                    step("indianAPI", "historical", without_exchange.clone()),
                    step("alphaVantage", "daily", symbol_only.clone()),
                ],
            },
            FallbackChain {
                provider: "indianAPI".to_string(),
                endpoint: "companyInfo".to_string(),
                steps: vec![
                    step("indianAPI", "companyInfo", without_exchange),
                    step("finnhub", "profile", symbol_only),
                ],
            },
        ];

        let providers = [alpha_vantage, finnhub, indian_api]
            .into_iter()
            .map(|provider| (provider.id.clone(), provider))
            .collect();

        Config {
            providers,
            fallbacks,
            cache: CacheSettings::default(),
            queue: QueueSettings::default(),
        }
    }

    pub fn provider(&self, provider: &str) -> Option<&ProviderConfig> {
        self.providers.get(provider)
    }

    /// Resolve a (provider, endpoint) pair or fail with a configuration error.
    pub fn endpoint(&self, provider: &str, endpoint: &str) -> Result<(&ProviderConfig, &EndpointConfig)> {
        let provider_config = self
            .providers
            .get(provider)
            .ok_or_else(|| AppError::configuration(format!("unknown provider `{provider}`")))?;
        let endpoint_config = provider_config.endpoints.get(endpoint).ok_or_else(|| {
            AppError::configuration(format!(
                "Endpoint {endpoint} not found for provider {provider}"
            ))
        })?;
        Ok((provider_config, endpoint_config))
    }

    pub fn fallback_chain(&self, provider: &str, endpoint: &str) -> &[FallbackStep] {
        self.fallbacks
            .iter()
            .find(|chain| chain.provider == provider && chain.endpoint == endpoint)
            .map(|chain| chain.steps.as_slice())
            .unwrap_or(&[])
    }

    /// Providers that have an API key available.
    pub fn available_providers(&self) -> Vec<&ProviderConfig> {
        self.providers
            .values()
            .filter(|provider| provider.is_configured())
            .collect()
    }
}

fn env_or(name: &str, default: &str) -> String {
    std::env::var(name)
        .ok()
        .filter(|value| !value.trim().is_empty())
        .unwrap_or_else(|| default.to_string())
}

fn env_key(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|value| !value.trim().is_empty())
}

fn step(provider: &str, endpoint: &str, args_transform: ArgsTransform) -> FallbackStep {
    FallbackStep {
        provider: provider.to_string(),
        endpoint: endpoint.to_string(),
        args_transform,
    }
}

fn endpoint(name: &str, description: &str) -> EndpointBuilder {
    EndpointBuilder {
        inner: EndpointConfig {
            name: name.to_string(),
            description: description.to_string(),
            path: None,
            static_params: BTreeMap::new(),
            required_fields: Vec::new(),
            optional_fields: Vec::new(),
            default_params: Map::new(),
            allowed_values: BTreeMap::new(),
            shape: ResponseShape::Quote,
        },
    }
}

struct EndpointBuilder {
    inner: EndpointConfig,
}

impl EndpointBuilder {
    fn path(mut self, path: &str) -> Self {
        self.inner.path = Some(path.to_string());
        self
    }

    fn static_param(mut self, key: &str, value: &str) -> Self {
        self.inner
            .static_params
            .insert(key.to_string(), value.to_string());
        self
    }

    fn required(mut self, fields: &[&str]) -> Self {
        self.inner.required_fields = fields.iter().map(|f| f.to_string()).collect();
        self
    }

    fn optional(mut self, fields: &[&str]) -> Self {
        self.inner.optional_fields = fields.iter().map(|f| f.to_string()).collect();
        self
    }

    fn defaults(mut self, defaults: Value) -> Self {
        if let Value::Object(map) = defaults {
            self.inner.default_params = map;
        }
        self
    }

    fn allowed(mut self, field: &str, values: Vec<String>) -> Self {
        self.inner.allowed_values.insert(field.to_string(), values);
        self
    }

    fn shape(mut self, shape: ResponseShape) -> Self {
        self.inner.shape = shape;
        self
    }

    fn build(self) -> EndpointConfig {
        self.inner
    }
}
