use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;
use std::time::Duration;

use futures::future::BoxFuture;
use futures::FutureExt;
use serde_json::Value;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;

use crate::error::{AppError, Result};
use crate::fetch::{HttpTransport, PreparedRequest};

/// Serve one canned HTTP response on an ephemeral local port and return its base URL.
pub async fn serve_once(status: u16, content_type: &str, body: &str) -> String {
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
    let addr = listener.local_addr().expect("local addr");
    let response = format!(
        "HTTP/1.1 {status} Scripted\r\nContent-Type: {content_type}\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{body}",
        body.len()
    );

    tokio::spawn(async move {
        if let Ok((mut socket, _)) = listener.accept().await {
            let mut buf = [0u8; 4096];
            let mut seen = Vec::new();
            loop {
                let read = socket.read(&mut buf).await.unwrap_or(0);
                if read == 0 {
                    break;
                }
                seen.extend_from_slice(&buf[..read]);
                if seen.windows(4).any(|window| window == b"\r\n\r\n") {
                    break;
                }
            }
            let _ = socket.write_all(response.as_bytes()).await;
            let _ = socket.shutdown().await;
        }
    });

    format!("http://{addr}")
}

/// In-process transport answering from per-endpoint scripts and recording every call.
#[derive(Default)]
pub struct ScriptedTransport {
    scripts: Mutex<HashMap<(String, String), VecDeque<Result<Value>>>>,
    calls: Mutex<Vec<PreparedRequest>>,
    delay: Duration,
}

impl ScriptedTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every call waits this long before answering, like a slow network.
    pub fn with_delay(delay: Duration) -> Self {
        Self {
            delay,
            ..Self::default()
        }
    }

    pub fn push(&self, provider: &str, endpoint: &str, response: Result<Value>) -> &Self {
        self.scripts
            .lock()
            .expect("scripts")
            .entry((provider.to_string(), endpoint.to_string()))
            .or_default()
            .push_back(response);
        self
    }

    pub fn calls(&self) -> Vec<PreparedRequest> {
        self.calls.lock().expect("calls").clone()
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().expect("calls").len()
    }

    pub fn calls_to(&self, provider: &str, endpoint: &str) -> usize {
        self.calls
            .lock()
            .expect("calls")
            .iter()
            .filter(|call| call.provider == provider && call.endpoint == endpoint)
            .count()
    }
}

impl HttpTransport for ScriptedTransport {
    fn get<'a>(&'a self, request: &'a PreparedRequest) -> BoxFuture<'a, Result<Value>> {
        async move {
            self.calls.lock().expect("calls").push(request.clone());
            if !self.delay.is_zero() {
                tokio::time::sleep(self.delay).await;
            }

            let next = self
                .scripts
                .lock()
                .expect("scripts")
                .get_mut(&(request.provider.clone(), request.endpoint.clone()))
                .and_then(VecDeque::pop_front);
            next.unwrap_or_else(|| {
                Err(AppError::Network {
                    provider: request.provider.clone(),
                    reason: format!("no scripted response for {}", request.endpoint),
                })
            })
        }
        .boxed()
    }
}

pub fn http_error(provider: &str, status: u16) -> AppError {
    AppError::Http {
        provider: provider.to_string(),
        status,
        kind: crate::error::HttpFailure::from_status(status),
        message: None,
    }
}
