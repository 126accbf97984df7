//! HTTP client for the attacked endpoint.
//!
//! - Every call goes to the network: there is no response cache, so two
//!   identical timed probes are both measured against the target
//! - Timed probes are sent exactly once; only setup requests retry
//! - Headers, proxy and TLS options come from the operator's config

use crate::models::{
    ConfigError, OrmLeakError, Payload, ProbeResponse, Result, TargetConfig, expand_headers,
};
use reqwest::Method;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tracing::{debug, warn};

/// Client bound to one target URL.
#[derive(Debug)]
pub struct HttpTarget {
    client: reqwest::Client,
    /// Target URL
    url: String,
    /// Method used for probes
    method: Method,
    /// Custom headers to include in requests
    custom_headers: HashMap<String, String>,
    /// Request timeout
    timeout: Duration,
    /// Maximum attempts for setup requests
    max_retries: u32,
    /// Requests sent so far
    requests_sent: AtomicU64,
}

impl HttpTarget {
    /// Create a new target client.
    ///
    /// # Arguments
    /// - `url`: Target URL
    /// - `method`: HTTP method for probes (e.g. "POST")
    /// - `custom_headers`: Additional headers to include in requests
    /// - `timeout_secs`: Request timeout in seconds
    /// - `max_retries`: Maximum attempts for setup requests
    /// - `proxy`: Optional proxy URL
    /// - `accept_invalid_certs`: Skip TLS certificate verification
    pub fn new(
        url: String,
        method: &str,
        custom_headers: HashMap<String, String>,
        timeout_secs: u64,
        max_retries: u32,
        proxy: Option<&str>,
        accept_invalid_certs: bool,
    ) -> Result<Self> {
        let timeout = Duration::from_secs(timeout_secs);
        let method = Method::from_bytes(method.to_uppercase().as_bytes())
            .map_err(|_| ConfigError::Invalid(format!("unknown HTTP method '{method}'")))?;

        let mut builder = reqwest::Client::builder()
            .timeout(timeout)
            .danger_accept_invalid_certs(accept_invalid_certs);

        if let Some(proxy_url) = proxy {
            let proxy = reqwest::Proxy::all(proxy_url).map_err(|e| ConfigError::Proxy {
                url: proxy_url.to_string(),
                source: e,
            })?;
            builder = builder.proxy(proxy);
        }

        let client = builder.build().map_err(OrmLeakError::Network)?;

        Ok(Self {
            client,
            url,
            method,
            custom_headers,
            timeout,
            max_retries: max_retries.max(1),
            requests_sent: AtomicU64::new(0),
        })
    }

    /// Build a client from the `[target]` section.
    pub fn from_config(config: &TargetConfig) -> Result<Self> {
        Self::new(
            config.url.clone(),
            &config.method,
            expand_headers(&config.headers),
            config.timeout_secs,
            config.max_retries,
            config.proxy.as_deref(),
            config.accept_invalid_certs,
        )
    }

    /// Get the target URL.
    pub fn url(&self) -> &str {
        &self.url
    }

    /// Method used for probes.
    pub fn method(&self) -> Method {
        self.method.clone()
    }

    /// Number of requests sent so far.
    pub fn requests_sent(&self) -> u64 {
        self.requests_sent.load(Ordering::Relaxed)
    }

    /// Build headers for a request.
    fn headers(&self) -> HeaderMap {
        let mut headers = HeaderMap::new();

        for (key, value) in &self.custom_headers {
            match (
                HeaderName::try_from(key.as_str()),
                HeaderValue::from_str(value),
            ) {
                (Ok(name), Ok(val)) => {
                    headers.insert(name, val);
                }
                _ => warn!(header = %key, "Skipping invalid header"),
            }
        }

        headers
    }

    fn query_url(&self, query: &str) -> String {
        if query.is_empty() {
            self.url.clone()
        } else if self.url.contains('?') {
            format!("{}&{query}", self.url)
        } else {
            format!("{}?{query}", self.url)
        }
    }

    /// Send a payload with the configured method, exactly once.
    pub async fn send(&self, payload: &Payload) -> Result<ProbeResponse> {
        self.send_with_method(self.method.clone(), payload).await
    }

    /// Send a payload with an explicit method, exactly once.
    pub async fn send_with_method(&self, method: Method, payload: &Payload) -> Result<ProbeResponse> {
        let request = match payload {
            Payload::Json(body) => self
                .client
                .request(method, &self.url)
                .headers(self.headers())
                .json(body),
            Payload::Query(query) => self
                .client
                .request(method, self.query_url(query))
                .headers(self.headers()),
        };

        self.requests_sent.fetch_add(1, Ordering::Relaxed);

        let response = request.send().await.map_err(|e| self.map_error(e))?;
        let status = response.status().as_u16();
        let body = response.text().await.map_err(|e| self.map_error(e))?;

        Ok(ProbeResponse::new(status, body))
    }

    /// Send an untimed setup request, retrying network errors with backoff.
    pub async fn send_with_retry(&self, method: Method, payload: &Payload) -> Result<ProbeResponse> {
        let mut last_error: Option<OrmLeakError> = None;

        for attempt in 0..self.max_retries {
            match self.send_with_method(method.clone(), payload).await {
                Ok(response) => return Ok(response),
                Err(e) if e.is_retryable() => {
                    if attempt < self.max_retries - 1 {
                        let backoff = Duration::from_secs(2u64.pow(attempt));
                        debug!(
                            url = %self.url,
                            attempt = attempt,
                            backoff_secs = backoff.as_secs(),
                            error = %e,
                            "Retrying after network error"
                        );
                        tokio::time::sleep(backoff).await;
                    }
                    last_error = Some(e);
                }
                Err(e) => return Err(e),
            }
        }

        Err(last_error.unwrap_or_else(|| {
            OrmLeakError::Internal("setup request made no attempts".to_string())
        }))
    }

    fn map_error(&self, e: reqwest::Error) -> OrmLeakError {
        if e.is_timeout() {
            OrmLeakError::Timeout(self.timeout)
        } else {
            OrmLeakError::Network(e)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn target(url: &str) -> HttpTarget {
        HttpTarget::new(url.to_string(), "get", HashMap::new(), 5, 1, None, false).unwrap()
    }

    #[test]
    fn test_query_url_joins_existing_query() {
        assert_eq!(target("http://h/api").query_url("a=1"), "http://h/api?a=1");
        assert_eq!(target("http://h/api?x=2").query_url("a=1"), "http://h/api?x=2&a=1");
        assert_eq!(target("http://h/api").query_url(""), "http://h/api");
    }

    #[test]
    fn test_rejects_unknown_method() {
        let result = HttpTarget::new("http://h".into(), "NOT A METHOD", HashMap::new(), 5, 1, None, false);
        assert!(matches!(result, Err(OrmLeakError::Config(_))));
    }
}
