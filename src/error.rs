/// Errors surfaced by the gateway client.
///
/// The calling layer only needs to tell [`Error::SessionExpired`] apart from
/// everything else (see [`Error::is_session_expired`]).
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum Error {
    /// The endpoint key is not in the registry. A wiring bug, never retried.
    #[error("unknown endpoint: {0}")]
    UnknownEndpoint(String),

    /// The request body failed its contract. Nothing was sent.
    #[error("invalid request for {endpoint}: {}", diagnostics.join("; "))]
    InvalidRequest {
        endpoint: &'static str,
        diagnostics: Vec<String>,
    },

    /// A `:name` placeholder in the path template had no value.
    #[error("missing path parameter `{param}` for {endpoint}")]
    MissingPathParam {
        endpoint: &'static str,
        param: String,
    },

    /// The backend answered with a non-2xx status (other than a recovered 401).
    #[error("request failed with status {status}: {backend_message}")]
    RequestFailed { status: u16, backend_message: String },

    /// Token refresh was exhausted; the session has been cleared.
    #[error("session expired, re-authentication required")]
    SessionExpired,

    /// The backend payload does not match the response contract.
    #[error("invalid response for {endpoint}: {}", diagnostics.join("; "))]
    InvalidResponse {
        endpoint: &'static str,
        diagnostics: Vec<String>,
    },

    #[error("network error: {0}")]
    Network(String),

    #[error("request timed out")]
    Timeout,

    /// Login failed or an auth endpoint returned an unusable payload.
    #[error("{operation} failed: {detail}")]
    Auth {
        operation: &'static str,
        status: Option<u16>,
        detail: String,
    },

    #[error("configuration error: {0}")]
    Config(String),

    #[error("session store error: {0}")]
    Store(String),

    /// A built-in contract schema failed to compile.
    #[error("schema error for {endpoint}: {detail}")]
    Schema {
        endpoint: &'static str,
        detail: String,
    },
}

impl Error {
    /// Whether the application must force the user to log in again.
    #[must_use]
    pub fn is_session_expired(&self) -> bool {
        matches!(self, Self::SessionExpired)
    }

    /// Whether retrying the same call later may succeed.
    ///
    /// The client itself never retries these; the caller decides.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Network(_) | Self::Timeout => true,
            Self::RequestFailed { status, .. } => *status >= 500,
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_session_expired_requires_login() {
        assert!(Error::SessionExpired.is_session_expired());
        assert!(!Error::Timeout.is_session_expired());
        assert!(
            !Error::RequestFailed {
                status: 401,
                backend_message: "nope".into()
            }
            .is_session_expired()
        );
    }

    #[test]
    fn retryable_kinds() {
        assert!(Error::Timeout.is_retryable());
        assert!(Error::Network("reset".into()).is_retryable());
        assert!(
            Error::RequestFailed {
                status: 503,
                backend_message: String::new()
            }
            .is_retryable()
        );
        assert!(
            !Error::RequestFailed {
                status: 422,
                backend_message: String::new()
            }
            .is_retryable()
        );
        assert!(!Error::UnknownEndpoint("x".into()).is_retryable());
    }

    #[test]
    fn invalid_request_lists_diagnostics() {
        let err = Error::InvalidRequest {
            endpoint: "leads.create",
            diagnostics: vec!["/: \"email\" is a required property".into(), "b".into()],
        };
        let text = err.to_string();
        assert!(text.starts_with("invalid request for leads.create"));
        assert!(text.contains("; b"));
    }
}
