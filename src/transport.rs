//! Low-level HTTP send/receive.
//!
//! A transport never interprets status codes: every response that made it
//! back, 2xx or not, is returned as `Ok` so the gateway decides what it means.
//! Only timeouts and connection-level failures are errors.

use std::collections::BTreeMap;
use std::future::Future;

use serde_json::Value;

use crate::contract::Method;

/// Header name (lower-case) to value.
pub type Headers = BTreeMap<String, String>;

/// A fully resolved outgoing request. `path` is relative to the base URL.
#[derive(Debug, Clone)]
pub struct TransportRequest {
    pub method: Method,
    pub path: String,
    pub query: Vec<(String, String)>,
    pub headers: Headers,
    pub body: Option<Value>,
}

impl TransportRequest {
    #[must_use]
    pub fn new(method: Method, path: impl Into<String>) -> Self {
        Self {
            method,
            path: path.into(),
            query: Vec::new(),
            headers: Headers::new(),
            body: None,
        }
    }

    #[must_use]
    pub fn with_body(mut self, body: Value) -> Self {
        self.body = Some(body);
        self
    }

    /// The `Authorization` header, if any.
    #[must_use]
    pub fn authorization(&self) -> Option<&str> {
        self.headers.get("authorization").map(String::as_str)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransportResponse {
    pub status: u16,
    pub body: String,
}

impl TransportResponse {
    #[must_use]
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TransportError {
    #[error("request timed out")]
    Timeout,
    #[error("{0}")]
    Network(String),
}

impl From<TransportError> for crate::error::Error {
    fn from(e: TransportError) -> Self {
        match e {
            TransportError::Timeout => Self::Timeout,
            TransportError::Network(msg) => Self::Network(msg),
        }
    }
}

/// Sends requests to the backend.
///
/// Implement this to plug in a different HTTP stack, or a scripted fake in
/// tests.
pub trait Transport: Send + Sync + 'static {
    fn send(
        &self,
        request: TransportRequest,
    ) -> impl Future<Output = Result<TransportResponse, TransportError>> + Send;
}

#[cfg(feature = "http")]
pub use self::http::ReqwestTransport;

#[cfg(feature = "http")]
mod http {
    use std::time::Duration;

    use url::Url;

    use super::{Headers, Transport, TransportError, TransportRequest, TransportResponse};
    use crate::config::GatewayConfig;
    use crate::contract::Method;

    /// [`Transport`] backed by `reqwest`.
    #[derive(Debug, Clone)]
    pub struct ReqwestTransport {
        base_url: Url,
        timeout: Duration,
        default_headers: Headers,
        http: reqwest::Client,
    }

    impl ReqwestTransport {
        #[must_use]
        pub fn new(config: &GatewayConfig) -> Self {
            let mut default_headers = Headers::new();
            default_headers.insert("accept".into(), "application/json".into());
            default_headers.insert("user-agent".into(), config.user_agent().to_owned());
            for (name, value) in config.default_headers() {
                default_headers.insert(name.to_ascii_lowercase(), value.clone());
            }

            Self {
                base_url: config.base_url().clone(),
                timeout: config.timeout(),
                default_headers,
                http: reqwest::Client::new(),
            }
        }

        /// Use a custom HTTP client (for connection pool reuse or testing).
        #[must_use]
        pub fn with_http_client(mut self, client: reqwest::Client) -> Self {
            self.http = client;
            self
        }

        /// Joins `path` onto the base URL, keeping the base URL's own path.
        fn url(&self, path: &str, query: &[(String, String)]) -> Url {
            let mut url = self.base_url.clone();
            let joined = format!("{}{}", url.path().trim_end_matches('/'), path);
            url.set_path(&joined);
            if !query.is_empty() {
                url.query_pairs_mut()
                    .extend_pairs(query.iter().map(|(k, v)| (k.as_str(), v.as_str())));
            }
            url
        }
    }

    fn method(method: Method) -> reqwest::Method {
        match method {
            Method::Get => reqwest::Method::GET,
            Method::Post => reqwest::Method::POST,
            Method::Put => reqwest::Method::PUT,
            Method::Patch => reqwest::Method::PATCH,
            Method::Delete => reqwest::Method::DELETE,
        }
    }

    fn classify(e: reqwest::Error) -> TransportError {
        if e.is_timeout() {
            TransportError::Timeout
        } else {
            TransportError::Network(e.to_string())
        }
    }

    impl Transport for ReqwestTransport {
        async fn send(
            &self,
            request: TransportRequest,
        ) -> Result<TransportResponse, TransportError> {
            let url = self.url(&request.path, &request.query);

            let mut headers = self.default_headers.clone();
            headers.extend(request.headers);

            let mut builder = self
                .http
                .request(method(request.method), url)
                .timeout(self.timeout);
            for (name, value) in &headers {
                builder = builder.header(name.as_str(), value.as_str());
            }
            if let Some(body) = &request.body {
                builder = builder.json(body);
            }

            let response = builder.send().await.map_err(classify)?;
            let status = response.status().as_u16();
            let body = response.text().await.map_err(classify)?;

            tracing::debug!(
                status,
                method = %request.method,
                path = %request.path,
                "Backend responded"
            );
            Ok(TransportResponse { status, body })
        }
    }

}
