//! reqwest-backed runner

use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use std::collections::HashMap;
use std::str::FromStr;
use std::time::{Duration, Instant};

use super::response::MAX_DOWNLOAD_SIZE;
use super::{Request, Response, Runner};
use crate::app::HttpConfig;
use crate::error::RunnerError;

/// HTTP runner wrapping a reqwest client
pub struct HttpRunner {
    /// Inner reqwest client
    client: reqwest::Client,

    /// Default timeout
    timeout: Duration,

    /// User agent sent when the request does not set one
    user_agent: String,
}

impl HttpRunner {
    /// Create a new runner from the HTTP settings
    pub fn new(config: &HttpConfig) -> Result<Self, RunnerError> {
        let redirect = if config.follow_redirects {
            reqwest::redirect::Policy::limited(10)
        } else {
            reqwest::redirect::Policy::none()
        };

        let mut builder = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout))
            .redirect(redirect)
            .danger_accept_invalid_certs(true);

        if let Some(proxy) = &config.proxy {
            let proxy = reqwest::Proxy::all(proxy)
                .map_err(|e| RunnerError::InvalidUrl(format!("{}: {}", proxy, e)))?;
            builder = builder.proxy(proxy);
        }

        let client = builder
            .build()
            .map_err(|e| RunnerError::RequestFailed(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self {
            client,
            timeout: Duration::from_secs(config.timeout),
            user_agent: config.user_agent.clone(),
        })
    }

    fn build_headers(&self, request: &Request) -> HeaderMap {
        let mut headers = HeaderMap::new();
        for (key, value) in &request.headers {
            if let (Ok(name), Ok(val)) = (HeaderName::from_str(key), HeaderValue::from_str(value)) {
                headers.insert(name, val);
            } else {
                tracing::debug!(header = %key, "Skipping header that is not valid HTTP");
            }
        }

        if !request.host.is_empty() {
            if let Ok(host) = HeaderValue::from_str(&request.host) {
                headers.insert(reqwest::header::HOST, host);
            }
        }

        if !headers.contains_key(reqwest::header::USER_AGENT) {
            if let Ok(ua) = HeaderValue::from_str(&self.user_agent) {
                headers.insert(reqwest::header::USER_AGENT, ua);
            }
        }
        headers
    }
}

#[async_trait]
impl Runner for HttpRunner {
    async fn execute(&self, request: &Request) -> Result<Response, RunnerError> {
        let method = reqwest::Method::from_bytes(request.method.as_bytes())
            .map_err(|_| RunnerError::InvalidMethod(request.method.clone()))?;
        let url = reqwest::Url::parse(&request.url)
            .map_err(|e| RunnerError::InvalidUrl(format!("{}: {}", request.url, e)))?;

        let mut builder = self
            .client
            .request(method, url)
            .headers(self.build_headers(request));

        if !request.body.is_empty() {
            builder = builder.body(request.body.clone());
        }

        let start = Instant::now();
        let response = builder.send().await.map_err(|e| self.map_error(e))?;

        let status = response.status().as_u16();
        let headers: HashMap<String, String> = response
            .headers()
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_str().unwrap_or("").to_string()))
            .collect();

        if let Some(declared) = response.content_length() {
            if declared > MAX_DOWNLOAD_SIZE {
                tracing::debug!(url = %request.url, declared, "Skipping oversized response body");
                return Ok(Response::cancelled(
                    request.clone(),
                    status,
                    headers,
                    declared,
                    start.elapsed(),
                ));
            }
        }

        let body = response
            .bytes()
            .await
            .map_err(|e| RunnerError::Body(e.to_string()))?;

        Ok(Response::new(
            request.clone(),
            status,
            headers,
            body.to_vec(),
            start.elapsed(),
        ))
    }
}

impl HttpRunner {
    fn map_error(&self, err: reqwest::Error) -> RunnerError {
        if err.is_timeout() {
            RunnerError::Timeout(self.timeout.as_millis() as u64)
        } else {
            RunnerError::RequestFailed(err.to_string())
        }
    }
}
