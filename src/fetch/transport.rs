use std::time::Duration;

use futures::future::BoxFuture;
use futures::FutureExt;
use log::{debug, info};
use reqwest::header::ACCEPT;
use reqwest::{redirect, Client};
use serde_json::Value;

use crate::error::{AppError, Context, HttpFailure, Result};

use super::relay::{Relay, RelayQuery};
use super::request::PreparedRequest;

pub const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// The network seam: everything above it works on prepared requests and JSON values.
pub trait HttpTransport: Send + Sync {
    fn get<'a>(&'a self, request: &'a PreparedRequest) -> BoxFuture<'a, Result<Value>>;
}

pub struct ReqwestTransport {
    client: Client,
}

impl ReqwestTransport {
    pub fn new() -> Result<Self> {
        let client = Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .redirect(redirect::Policy::none())
            .build()
            .context("Failed to construct HTTP client")?;
        Ok(Self::with_client(client))
    }

    pub fn with_client(client: Client) -> Self {
        Self { client }
    }

    async fn fetch_direct(&self, request: &PreparedRequest) -> Result<Value> {
        let provider = request.provider.as_str();
        let response = self
            .client
            .get(&request.url)
            .query(&request.params)
            .header(ACCEPT, "application/json")
            .send()
            .await
            .map_err(|err| classify_error(provider, err))?;

        let status = response.status();
        if !status.is_success() {
            let message = response
                .json::<Value>()
                .await
                .ok()
                .and_then(|body| body.get("message").and_then(Value::as_str).map(str::to_string));
            return Err(AppError::Http {
                provider: provider.to_string(),
                status: status.as_u16(),
                kind: HttpFailure::from_status(status.as_u16()),
                message,
            });
        }

        let body = response
            .text()
            .await
            .map_err(|err| classify_error(provider, err))?;
        serde_json::from_str(&body)
            .map_err(|err| AppError::malformed(provider, format!("response is not JSON: {err}")))
    }

    async fn fetch_relayed(&self, request: &PreparedRequest) -> Result<Value> {
        let relay = Relay::new(self.client.clone(), request.base_url.as_str());
        relay
            .forward(&RelayQuery::from_prepared(request))
            .await
            .map_err(|failure| failure.into_app_error(&request.provider))
    }
}

impl HttpTransport for ReqwestTransport {
    fn get<'a>(&'a self, request: &'a PreparedRequest) -> BoxFuture<'a, Result<Value>> {
        async move {
            info!("GET {}/{} via {}", request.provider, request.endpoint, request.url);
            debug!("Request parameters: {:?}", request.redacted_params());
            if request.via_relay {
                self.fetch_relayed(request).await
            } else {
                self.fetch_direct(request).await
            }
        }
        .boxed()
    }
}

fn classify_error(provider: &str, err: reqwest::Error) -> AppError {
    if err.is_timeout() {
        AppError::Timeout {
            provider: provider.to_string(),
        }
    } else {
        AppError::Network {
            provider: provider.to_string(),
            reason: err.without_url().to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::serve_once;

    fn request(url: String) -> PreparedRequest {
        PreparedRequest {
            provider: "finnhub".to_string(),
            endpoint: "quote".to_string(),
            base_url: url.clone(),
            path: None,
            url,
            params: vec![
                ("symbol".to_string(), "AAPL".to_string()),
                ("token".to_string(), "secret".to_string()),
            ],
            api_key_param: "token".to_string(),
            via_relay: false,
        }
    }

    #[tokio::test]
    async fn decodes_json_body() {
        let base = serve_once(200, "application/json", r#"{"c": 189.5}"#).await;
        let transport = ReqwestTransport::new().expect("client");
        let value = transport.get(&request(base)).await.expect("json");
        assert_eq!(value["c"], 189.5);
    }

    #[tokio::test]
    async fn classifies_status_codes() {
        let transport = ReqwestTransport::new().expect("client");

        for (status, expected) in [
            (403, HttpFailure::Forbidden),
            (429, HttpFailure::RateLimited),
            (503, HttpFailure::Server),
            (301, HttpFailure::Redirect),
        ] {
            let base = serve_once(status, "application/json", r#"{"message": "nope"}"#).await;
            match transport.get(&request(base)).await {
                Err(AppError::Http { status: got, kind, .. }) => {
                    assert_eq!(got, status);
                    assert_eq!(kind, expected);
                }
                other => panic!("unexpected result for {status}: {other:?}"),
            }
        }
    }

    #[tokio::test]
    async fn non_json_body_is_malformed() {
        let base = serve_once(200, "text/html", "<html>maintenance</html>").await;
        let transport = ReqwestTransport::new().expect("client");
        let err = transport.get(&request(base)).await.expect_err("not json");
        assert!(matches!(err, AppError::MalformedResponse { .. }));
        assert!(err.allows_fallback());
    }

    #[tokio::test]
    async fn unreachable_host_is_network_error() {
        let transport = ReqwestTransport::new().expect("client");
        let err = transport
            .get(&request("http://127.0.0.1:9".to_string()))
            .await
            .expect_err("refused");
        assert!(matches!(err, AppError::Network { .. }));
        assert!(!err.to_string().contains("secret"));
    }
}
