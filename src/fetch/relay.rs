//! Same-origin relay in front of the Indian API.
//!
//! The relay only understands `symbol`, `exchange`, `api_key` and `endpoint`;
//! everything else a request carries is passed through to the upstream query.

use std::collections::HashMap;
use std::time::Duration;

use log::{debug, warn};
use reqwest::header::{ACCEPT, CONTENT_TYPE, USER_AGENT};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::error::{AppError, HttpFailure};

use super::request::PreparedRequest;

pub const RELAY_USER_AGENT: &str = "Mozilla/5.0 (compatible; Finance Dashboard)";
pub const RELAY_TIMEOUT: Duration = Duration::from_secs(10);
const DEFAULT_ENDPOINT: &str = "quote";
const FALLBACK_HINT: &str = "Consider using Alpha Vantage or Finnhub instead.";
const RELAYED_EXCHANGES: &[&str] = &["NSE", "BSE"];

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RelayQuery {
    pub symbol: String,
    pub exchange: Option<String>,
    pub api_key: String,
    pub endpoint: Option<String>,
    pub extra: Vec<(String, String)>,
}

impl RelayQuery {
    /// Read the relay's query string, rejecting requests without a symbol or key.
    pub fn parse(params: &HashMap<String, String>) -> Result<Self, RelayResponse> {
        let non_empty = |key: &str| {
            params
                .get(key)
                .map(|value| value.trim())
                .filter(|value| !value.is_empty())
                .map(str::to_string)
        };

        let (Some(symbol), Some(api_key)) = (non_empty("symbol"), non_empty("api_key")) else {
            return Err(RelayResponse::new(
                400,
                json!({ "message": "Missing required parameters" }),
            ));
        };

        let mut extra: Vec<(String, String)> = params
            .iter()
            .filter(|(key, _)| !matches!(key.as_str(), "symbol" | "exchange" | "api_key" | "endpoint"))
            .map(|(key, value)| (key.clone(), value.clone()))
            .collect();
        extra.sort();

        Ok(Self {
            symbol,
            exchange: non_empty("exchange"),
            api_key,
            endpoint: non_empty("endpoint"),
            extra,
        })
    }

    pub fn from_prepared(request: &PreparedRequest) -> Self {
        let mut query = Self {
            symbol: String::new(),
            exchange: None,
            api_key: String::new(),
            endpoint: request.path.clone(),
            extra: Vec::new(),
        };

        for (key, value) in &request.params {
            if *key == request.api_key_param {
                query.api_key = value.clone();
            } else if key == "symbol" {
                query.symbol = value.clone();
            } else if key == "exchange" {
                query.exchange = Some(value.clone());
            } else {
                query.extra.push((key.clone(), value.clone()));
            }
        }
        query
    }

    fn upstream_params(&self) -> Vec<(String, String)> {
        let mut params = vec![
            ("symbol".to_string(), self.symbol.clone()),
            ("api_key".to_string(), self.api_key.clone()),
        ];
        if let Some(exchange) = self
            .exchange
            .as_deref()
            .filter(|exchange| RELAYED_EXCHANGES.contains(exchange))
        {
            params.push(("exchange".to_string(), exchange.to_string()));
        }
        params.extend(self.extra.iter().cloned());
        params
    }
}

/// Status plus JSON body, as the relay would answer over HTTP.
#[derive(Debug, Clone, PartialEq)]
pub struct RelayResponse {
    pub status: u16,
    pub body: Value,
}

impl RelayResponse {
    pub fn new(status: u16, body: Value) -> Self {
        Self { status, body }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RelayFailureKind {
    Timeout,
    Network,
    NonJson,
    Upstream(u16),
    Other,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RelayErrorBody {
    pub message: String,
    pub error: String,
    pub details: String,
    pub fallback: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RelayFailure {
    pub kind: RelayFailureKind,
    pub body: RelayErrorBody,
}

impl RelayFailure {
    pub fn new(kind: RelayFailureKind, error: impl Into<String>) -> Self {
        let (message, details) = match kind {
            RelayFailureKind::Timeout => (
                "Request timeout",
                "The Indian API is taking too long to respond. Please try again or use a different API provider.",
            ),
            RelayFailureKind::Network => (
                "Network connection failed",
                "Unable to connect to the Indian API. The service might be down or unreachable.",
            ),
            RelayFailureKind::NonJson => (
                "Invalid API response",
                "The Indian API returned an HTML page instead of data. The endpoint might be incorrect.",
            ),
            RelayFailureKind::Upstream(_) | RelayFailureKind::Other => (
                "The Indian API request failed.",
                "This might be due to CORS restrictions or API endpoint issues.",
            ),
        };

        Self {
            kind,
            body: RelayErrorBody {
                message: message.to_string(),
                error: error.into(),
                details: details.to_string(),
                fallback: FALLBACK_HINT.to_string(),
            },
        }
    }

    pub fn into_response(self) -> RelayResponse {
        RelayResponse::new(500, json!(self.body))
    }

    /// Typed error for callers that went through the relay in-process.
    pub fn into_app_error(self, provider: &str) -> AppError {
        match self.kind {
            RelayFailureKind::Timeout => AppError::Timeout {
                provider: provider.to_string(),
            },
            RelayFailureKind::Network => AppError::Network {
                provider: provider.to_string(),
                reason: self.body.error,
            },
            RelayFailureKind::NonJson => AppError::malformed(provider, self.body.error),
            RelayFailureKind::Upstream(status) => AppError::Http {
                provider: provider.to_string(),
                status,
                kind: HttpFailure::from_status(status),
                message: Some(self.body.message),
            },
            RelayFailureKind::Other => AppError::Http {
                provider: provider.to_string(),
                status: 500,
                kind: HttpFailure::Server,
                message: Some(self.body.message),
            },
        }
    }
}

pub struct Relay {
    client: Client,
    base_url: String,
}

impl Relay {
    pub fn new(client: Client, base_url: impl Into<String>) -> Self {
        Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        }
    }

    pub fn upstream_url(&self, query: &RelayQuery) -> String {
        let endpoint = query.endpoint.as_deref().unwrap_or(DEFAULT_ENDPOINT);
        format!("{}/{}", self.base_url, endpoint.trim_start_matches('/'))
    }

    /// Answer one relay call the way the HTTP handler does.
    pub async fn handle(&self, method: &str, params: &HashMap<String, String>) -> RelayResponse {
        if !method.eq_ignore_ascii_case("GET") {
            return RelayResponse::new(405, json!({ "message": "Method not allowed" }));
        }

        let query = match RelayQuery::parse(params) {
            Ok(query) => query,
            Err(response) => return response,
        };

        match self.forward(&query).await {
            Ok(body) => RelayResponse::new(200, body),
            Err(failure) => {
                warn!("Relay request for {} failed: {}", query.symbol, failure.body.error);
                failure.into_response()
            }
        }
    }

    pub async fn forward(&self, query: &RelayQuery) -> Result<Value, RelayFailure> {
        let url = self.upstream_url(query);
        debug!("Relaying {} request for {}", url, query.symbol);

        let response = self
            .client
            .get(&url)
            .query(&query.upstream_params())
            .header(USER_AGENT, RELAY_USER_AGENT)
            .header(ACCEPT, "application/json")
            .timeout(RELAY_TIMEOUT)
            .send()
            .await
            .map_err(classify_send_error)?;

        let status = response.status();
        if !status.is_success() {
            return Err(RelayFailure::new(
                RelayFailureKind::Upstream(status.as_u16()),
                format!("API responded with status: {}", status.as_u16()),
            ));
        }

        let content_type = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|value| value.to_str().ok())
            .unwrap_or_default()
            .to_string();
        if !content_type.contains("application/json") {
            return Err(RelayFailure::new(
                RelayFailureKind::NonJson,
                format!("API returned non-JSON response: {content_type}"),
            ));
        }

        let body = response.text().await.map_err(classify_send_error)?;
        serde_json::from_str(&body).map_err(|err| {
            RelayFailure::new(RelayFailureKind::NonJson, format!("Invalid JSON body: {err}"))
        })
    }
}

fn classify_send_error(err: reqwest::Error) -> RelayFailure {
    let kind = if err.is_timeout() {
        RelayFailureKind::Timeout
    } else if err.is_connect() || err.is_request() {
        RelayFailureKind::Network
    } else {
        RelayFailureKind::Other
    };
    RelayFailure::new(kind, err.without_url().to_string())
}
