use thiserror::Error;

pub use anyhow::Context;

pub type Result<T> = std::result::Result<T, AppError>;

/// Coarse classification of a non-success HTTP status returned by a provider.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HttpFailure {
    Redirect,
    Forbidden,
    RateLimited,
    Server,
    Other,
}

impl HttpFailure {
    pub fn from_status(status: u16) -> Self {
        match status {
            300..=399 => HttpFailure::Redirect,
            403 => HttpFailure::Forbidden,
            429 => HttpFailure::RateLimited,
            500..=599 => HttpFailure::Server,
            _ => HttpFailure::Other,
        }
    }
}

#[derive(Debug, Error)]
pub enum AppError {
    #[error("network error talking to {provider}: {reason}")]
    Network { provider: String, reason: String },
    #[error("{provider} responded with HTTP {status}")]
    Http {
        provider: String,
        status: u16,
        kind: HttpFailure,
        message: Option<String>,
    },
    #[error("request to {provider} timed out")]
    Timeout { provider: String },
    #[error("configuration error: {0}")]
    Configuration(String),
    #[error("malformed response from {provider}: {reason}")]
    MalformedResponse { provider: String, reason: String },
    #[error("provider {provider} exhausted its rate limit")]
    ProviderExhausted { provider: String },
    #[error("all providers failed for {provider}/{endpoint} after {attempts} attempts: {last}")]
    AllProvidersFailed {
        provider: String,
        endpoint: String,
        attempts: usize,
        last: Box<AppError>,
    },
    #[error("request was dropped before it settled")]
    Abandoned,
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Json(#[from] serde_json::Error),
    #[error("{0}")]
    Message(String),
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl AppError {
    pub fn message<T: Into<String>>(msg: T) -> Self {
        AppError::Message(msg.into())
    }

    pub fn configuration<T: Into<String>>(msg: T) -> Self {
        AppError::Configuration(msg.into())
    }

    pub fn malformed(provider: &str, reason: impl Into<String>) -> Self {
        AppError::MalformedResponse {
            provider: provider.to_string(),
            reason: reason.into(),
        }
    }

    /// Whether a failure of this kind should walk the provider fallback chain.
    ///
    /// Permission problems, redirects, bad configuration and exhausted quotas are
    /// not transient, so they surface directly.
    pub fn allows_fallback(&self) -> bool {
        match self {
            AppError::Network { .. } | AppError::Timeout { .. } => true,
            AppError::MalformedResponse { .. } => true,
            AppError::Http { kind, .. } => matches!(kind, HttpFailure::Server),
            _ => false,
        }
    }

    pub fn is_timeout(&self) -> bool {
        matches!(self, AppError::Timeout { .. })
    }

    /// Text shown in a widget's error state next to the retry action.
    pub fn user_message(&self) -> String {
        match self {
            AppError::Http { kind, message, .. } => match kind {
                HttpFailure::Redirect => {
                    "API endpoint has moved. Please check the API configuration.".to_string()
                }
                HttpFailure::Forbidden => {
                    "Access denied. Please check your API key and permissions.".to_string()
                }
                HttpFailure::RateLimited => {
                    "Rate limit exceeded. Please wait before making more requests.".to_string()
                }
                HttpFailure::Server => "API server error. Please try again later.".to_string(),
                HttpFailure::Other => message
                    .clone()
                    .unwrap_or_else(|| "API request failed".to_string()),
            },
            AppError::ProviderExhausted { .. } => {
                "Rate limit exceeded. Please wait before making more requests.".to_string()
            }
            AppError::Network { .. } => "Network error - please check your connection".to_string(),
            AppError::Timeout { .. } => {
                "The data provider took too long to respond. Please try again.".to_string()
            }
            AppError::AllProvidersFailed { provider, .. } => format!(
                "Unable to fetch data from {provider} or any fallback provider. Please try again later."
            ),
            other => other.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn http(status: u16) -> AppError {
        AppError::Http {
            provider: "finnhub".to_string(),
            status,
            kind: HttpFailure::from_status(status),
            message: None,
        }
    }

    #[test]
    fn classifies_statuses() {
        assert_eq!(HttpFailure::from_status(301), HttpFailure::Redirect);
        assert_eq!(HttpFailure::from_status(403), HttpFailure::Forbidden);
        assert_eq!(HttpFailure::from_status(429), HttpFailure::RateLimited);
        assert_eq!(HttpFailure::from_status(503), HttpFailure::Server);
        assert_eq!(HttpFailure::from_status(404), HttpFailure::Other);
    }

    #[test]
    fn only_transient_failures_fall_back() {
        assert!(http(500).allows_fallback());
        assert!(!http(403).allows_fallback());
        assert!(!http(429).allows_fallback());
        assert!(AppError::Timeout {
            provider: "indianAPI".to_string()
        }
        .allows_fallback());
        assert!(!AppError::configuration("unknown endpoint").allows_fallback());
    }

    #[test]
    fn user_messages_follow_status() {
        assert!(http(403).user_message().starts_with("Access denied"));
        assert!(http(429).user_message().starts_with("Rate limit exceeded"));
        assert!(http(301).user_message().contains("has moved"));
    }
}
