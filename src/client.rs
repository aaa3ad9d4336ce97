//! The gateway: the one entry point the application calls.
//!
//! Every call runs the same pipeline: contract lookup, request validation,
//! path rendering, wire conversion, auth, send, one refresh-and-retry on 401,
//! then unwrapping and response validation.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use percent_encoding::{AsciiSet, NON_ALPHANUMERIC, utf8_percent_encode};
use serde::de::DeserializeOwned;
use serde_json::Value;
use tokio::sync::broadcast;
use tracing::Instrument;

use crate::auth::{AuthEvent, AuthManager, AuthSession, Credentials, SessionStore};
use crate::config::GatewayConfig;
use crate::contract::{ContractRegistry, EndpointContract, EndpointKey};
use crate::error::Error;
use crate::naming::{UnwrapError, from_wire, to_wire};
use crate::transport::{Headers, Transport, TransportRequest, TransportResponse};

/// Path parameter values are encoded as a single segment.
const PATH_SEGMENT: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'-')
    .remove(b'_')
    .remove(b'.')
    .remove(b'~');

/// Longest raw body quoted in a [`Error::RequestFailed`] message.
const MAX_RAW_MESSAGE: usize = 200;

/// Path and query parameters for one call.
///
/// ```rust,ignore
/// let params = Params::new().path("id", &lead_id).query("page", 2).query("limit", 20);
/// ```
#[derive(Debug, Clone, Default)]
pub struct Params {
    path: BTreeMap<String, String>,
    query: Vec<(String, String)>,
}

impl Params {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Value for a `:name` placeholder in the path template.
    #[must_use]
    pub fn path(mut self, name: impl Into<String>, value: impl fmt::Display) -> Self {
        self.path.insert(name.into(), value.to_string());
        self
    }

    /// Query string pair, sent in insertion order.
    #[must_use]
    pub fn query(mut self, name: impl Into<String>, value: impl fmt::Display) -> Self {
        self.query.push((name.into(), value.to_string()));
        self
    }

    #[must_use]
    pub fn path_value(&self, name: &str) -> Option<&str> {
        self.path.get(name).map(String::as_str)
    }
}

/// Typed client for the CRM backend.
///
/// Cheap to clone; clones share the registry, transport and session.
pub struct GatewayClient<T, S> {
    registry: Arc<ContractRegistry>,
    transport: Arc<T>,
    auth: AuthManager<T, S>,
    proactive_refresh: bool,
}

impl<T, S> Clone for GatewayClient<T, S> {
    fn clone(&self) -> Self {
        Self {
            registry: Arc::clone(&self.registry),
            transport: Arc::clone(&self.transport),
            auth: self.auth.clone(),
            proactive_refresh: self.proactive_refresh,
        }
    }
}

#[cfg(feature = "http")]
impl<S: SessionStore> GatewayClient<crate::transport::ReqwestTransport, S> {
    /// Client over HTTP with a caller-provided session store.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] for an invalid configuration or
    /// [`Error::Schema`] if the built-in contracts fail to compile.
    pub fn with_reqwest(config: &GatewayConfig, store: S) -> Result<Self, Error> {
        let transport = crate::transport::ReqwestTransport::new(config);
        Self::new(config, transport, store)
    }
}

#[cfg(feature = "http")]
impl GatewayClient<crate::transport::ReqwestTransport, crate::auth::FileSessionStore> {
    /// Client configured from `CRM_*` environment variables, persisting the
    /// session under `CRM_SESSION_DIR` (or a `crm-gateway` directory in the
    /// system temp dir).
    ///
    /// # Errors
    ///
    /// Same as [`GatewayConfig::from_env`] and [`GatewayClient::new`].
    pub fn from_env() -> Result<Self, Error> {
        let config = GatewayConfig::from_env()?;
        let dir = config
            .session_dir()
            .map_or_else(|| std::env::temp_dir().join("crm-gateway"), std::path::Path::to_path_buf);
        Self::with_reqwest(&config, crate::auth::FileSessionStore::new(dir))
    }
}

impl<T: Transport, S: SessionStore> GatewayClient<T, S> {
    /// Builds the client and its contract registry.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] for an invalid configuration or
    /// [`Error::Schema`] if the built-in contracts fail to compile.
    pub fn new(config: &GatewayConfig, transport: T, store: S) -> Result<Self, Error> {
        config.validate()?;
        let registry = Arc::new(ContractRegistry::builtin()?);
        let transport = Arc::new(transport);
        let auth = AuthManager::new(Arc::clone(&transport), store, config);
        Ok(Self {
            registry,
            transport,
            auth,
            proactive_refresh: config.proactive_refresh(),
        })
    }

    #[must_use]
    pub fn registry(&self) -> &ContractRegistry {
        &self.registry
    }

    #[must_use]
    pub fn auth(&self) -> &AuthManager<T, S> {
        &self.auth
    }

    // ── Session passthroughs ───────────────────────────────────────

    /// See [`AuthManager::login`].
    ///
    /// # Errors
    ///
    /// Returns [`Error::Auth`] if the credentials are rejected, or a transport
    /// error.
    pub async fn login(&self, credentials: &Credentials) -> Result<AuthSession, Error> {
        self.auth.login(credentials).await
    }

    pub async fn logout(&self) {
        self.auth.logout().await;
    }

    pub async fn restore(&self) -> Option<AuthSession> {
        self.auth.restore().await
    }

    #[must_use]
    pub fn session(&self) -> Option<AuthSession> {
        self.auth.session()
    }

    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<AuthEvent> {
        self.auth.subscribe()
    }

    // ── Requests ───────────────────────────────────────────────────

    /// Calls the endpoint registered under `key` and returns the validated
    /// logical response.
    ///
    /// # Errors
    ///
    /// - [`Error::UnknownEndpoint`] if `key` is not registered
    /// - [`Error::InvalidRequest`] / [`Error::MissingPathParam`] before anything is sent
    /// - [`Error::RequestFailed`] for non-2xx answers
    /// - [`Error::SessionExpired`] if a 401 could not be recovered by refreshing
    /// - [`Error::InvalidResponse`] if the answer breaks the response contract
    /// - [`Error::Network`] / [`Error::Timeout`] from the transport
    pub async fn request(
        &self,
        key: &str,
        body: Option<Value>,
        params: &Params,
    ) -> Result<Value, Error> {
        let contract = self.registry.lookup(key)?;
        self.execute(contract, body, params).await
    }

    /// [`GatewayClient::request`] with a typed key.
    ///
    /// # Errors
    ///
    /// Same as [`GatewayClient::request`].
    pub async fn call(
        &self,
        key: EndpointKey,
        body: Option<Value>,
        params: &Params,
    ) -> Result<Value, Error> {
        let contract = self.registry.get(key)?;
        self.execute(contract, body, params).await
    }

    /// [`GatewayClient::request`], deserializing the logical value into `R`.
    ///
    /// # Errors
    ///
    /// Same as [`GatewayClient::request`]; a value that does not fit `R` is
    /// reported as [`Error::InvalidResponse`].
    pub async fn request_as<R: DeserializeOwned>(
        &self,
        key: &str,
        body: Option<Value>,
        params: &Params,
    ) -> Result<R, Error> {
        let contract = self.registry.lookup(key)?;
        let value = self.execute(contract, body, params).await?;
        decode(contract.key.as_str(), value)
    }

    /// [`GatewayClient::call`], deserializing the logical value into `R`.
    ///
    /// # Errors
    ///
    /// Same as [`GatewayClient::request_as`].
    pub async fn call_as<R: DeserializeOwned>(
        &self,
        key: EndpointKey,
        body: Option<Value>,
        params: &Params,
    ) -> Result<R, Error> {
        let contract = self.registry.get(key)?;
        let value = self.execute(contract, body, params).await?;
        decode(contract.key.as_str(), value)
    }

    async fn execute(
        &self,
        contract: &EndpointContract,
        body: Option<Value>,
        params: &Params,
    ) -> Result<Value, Error> {
        let endpoint = contract.key.as_str();

        let body = body.unwrap_or(Value::Null);
        if let Err(diagnostics) = contract.request_schema.validate(&body) {
            tracing::debug!(endpoint, ?diagnostics, "Request rejected by contract");
            return Err(Error::InvalidRequest { endpoint, diagnostics });
        }

        let path = render_path(contract, params)?;
        let mut request = TransportRequest::new(contract.method, path);
        request.query.clone_from(&params.query);
        if !body.is_null() {
            request.body = Some(to_wire(&body, contract.request_envelope, params.path_value("id")));
        }

        let span = tracing::debug_span!(
            "crm_request",
            endpoint,
            method = %contract.method,
            path = %request.path
        );
        async move {
            let response = self.send_with_refresh(request).await?;
            if !response.is_success() {
                let backend_message = backend_message(&response.body);
                tracing::debug!(
                    status = response.status,
                    %backend_message,
                    "Backend returned an error"
                );
                return Err(Error::RequestFailed {
                    status: response.status,
                    backend_message,
                });
            }
            decode_response(contract, &response)
        }
        .instrument(span)
        .await
    }

    /// Sends once, and once more after a refresh if the backend answers 401.
    async fn send_with_refresh(
        &self,
        request: TransportRequest,
    ) -> Result<TransportResponse, Error> {
        if self.proactive_refresh {
            self.auth.ensure_fresh().await?;
        }

        let (response, token) = self.send_authenticated(request.clone()).await?;
        if response.status != 401 {
            return Ok(response);
        }

        tracing::info!(anonymous = token.is_none(), "Access token rejected, refreshing");
        match token {
            Some(token) => self.auth.refresh_after_rejection(&token).await?,
            None => self.auth.refresh().await?,
        };

        let (response, _) = self.send_authenticated(request).await?;
        if response.status == 401 {
            tracing::warn!("Refreshed access token rejected as well");
        }
        Ok(response)
    }

    async fn send_authenticated(
        &self,
        mut request: TransportRequest,
    ) -> Result<(TransportResponse, Option<String>), Error> {
        let mut headers = Headers::new();
        let token = self.auth.attach_auth(&mut headers);
        request.headers.extend(headers);
        let response = self.transport.send(request).await?;
        Ok((response, token))
    }
}

/// Fills `:name` placeholders from `params`, percent-encoding each value.
fn render_path(contract: &EndpointContract, params: &Params) -> Result<String, Error> {
    let mut path = String::with_capacity(contract.path_template.len());
    for segment in contract.path_template.split('/').skip(1) {
        path.push('/');
        match segment.strip_prefix(':') {
            Some(name) => {
                let value = params
                    .path_value(name)
                    .filter(|v| !v.is_empty())
                    .ok_or_else(|| Error::MissingPathParam {
                        endpoint: contract.key.as_str(),
                        param: name.to_owned(),
                    })?;
                path.extend(utf8_percent_encode(value, PATH_SEGMENT));
            }
            None => path.push_str(segment),
        }
    }
    Ok(path)
}

fn decode_response(
    contract: &EndpointContract,
    response: &TransportResponse,
) -> Result<Value, Error> {
    let endpoint = contract.key.as_str();

    let logical = if response.body.trim().is_empty() {
        Value::Null
    } else {
        let wire: Value = serde_json::from_str(&response.body)
            .map_err(|e| contract_drift(endpoint, vec![format!("body is not JSON: {e}")]))?;
        from_wire(&wire, contract.response_envelope).map_err(|e| match e {
            UnwrapError::Malformed(detail) => contract_drift(endpoint, vec![detail]),
            UnwrapError::Rejected(backend_message) => Error::RequestFailed {
                status: response.status,
                backend_message,
            },
        })?
    };

    contract
        .response_schema
        .validate(&logical)
        .map_err(|diagnostics| contract_drift(endpoint, diagnostics))?;
    Ok(logical)
}

fn decode<R: DeserializeOwned>(endpoint: &'static str, value: Value) -> Result<R, Error> {
    serde_json::from_value(value).map_err(|e| contract_drift(endpoint, vec![e.to_string()]))
}

fn contract_drift(endpoint: &'static str, diagnostics: Vec<String>) -> Error {
    tracing::error!(endpoint, ?diagnostics, "Backend response does not match contract");
    Error::InvalidResponse { endpoint, diagnostics }
}

/// Best human-readable message in an error body.
///
/// Understands JSON:API `errors[0]`, the `{"error": {"message"}}` envelope and
/// a top-level `message`; anything else is quoted raw, truncated.
pub(crate) fn backend_message(body: &str) -> String {
    if let Ok(value) = serde_json::from_str::<Value>(body) {
        let found = [
            "/errors/0/detail",
            "/errors/0/title",
            "/error/message",
            "/message",
            "/error",
        ]
        .into_iter()
        .find_map(|pointer| value.pointer(pointer).and_then(Value::as_str));
        if let Some(message) = found {
            return message.to_owned();
        }
    }

    let raw = body.trim();
    if raw.is_empty() {
        return "no response body".into();
    }
    if raw.chars().count() > MAX_RAW_MESSAGE {
        let truncated: String = raw.chars().take(MAX_RAW_MESSAGE).collect();
        return format!("{truncated}...");
    }
    raw.to_owned()
}
