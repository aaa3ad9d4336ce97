use std::path::PathBuf;
use std::time::Duration;

use url::Url;

use crate::error::Error;

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// Gateway client configuration.
///
/// The base URL is the only required value and is a constructor parameter;
/// everything else has a default and can be overridden with `with_*`.
///
/// ```rust,ignore
/// use crm_gateway::GatewayConfig;
///
/// let config = GatewayConfig::new("https://crm.example.com/Api/V8".parse()?)
///     .with_timeout(std::time::Duration::from_secs(10));
/// ```
#[derive(Debug, Clone)]
#[non_exhaustive]
pub struct GatewayConfig {
    pub(crate) base_url: Url,
    pub(crate) timeout: Duration,
    pub(crate) login_path: String,
    pub(crate) refresh_path: String,
    pub(crate) user_agent: String,
    pub(crate) default_headers: Vec<(String, String)>,
    pub(crate) session_key: String,
    pub(crate) session_dir: Option<PathBuf>,
    pub(crate) proactive_refresh: bool,
}

impl GatewayConfig {
    #[must_use]
    pub fn new(base_url: Url) -> Self {
        Self {
            base_url,
            timeout: DEFAULT_TIMEOUT,
            login_path: "/auth/login".into(),
            refresh_path: "/auth/refresh".into(),
            user_agent: concat!("crm-gateway/", env!("CARGO_PKG_VERSION")).into(),
            default_headers: Vec::new(),
            session_key: "crm_gateway.session".into(),
            session_dir: None,
            proactive_refresh: true,
        }
    }

    /// Create config from environment variables.
    ///
    /// # Required env vars
    /// - `CRM_API_URL`: backend base URL
    ///
    /// # Optional env vars
    /// - `CRM_API_TIMEOUT_SECS`: per-request timeout in seconds
    /// - `CRM_LOGIN_PATH`, `CRM_REFRESH_PATH`: auth endpoint paths
    /// - `CRM_SESSION_DIR`: directory for the persisted session
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] if `CRM_API_URL` is missing or any value is malformed.
    pub fn from_env() -> Result<Self, Error> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    pub(crate) fn from_lookup(var: impl Fn(&str) -> Option<String>) -> Result<Self, Error> {
        let base_url: Url = var("CRM_API_URL")
            .ok_or_else(|| Error::Config("CRM_API_URL is required".into()))?
            .parse()
            .map_err(|e| Error::Config(format!("CRM_API_URL: {e}")))?;

        let mut config = Self::new(base_url);

        if let Some(secs) = var("CRM_API_TIMEOUT_SECS") {
            let secs: u64 = secs
                .trim()
                .parse()
                .map_err(|e| Error::Config(format!("CRM_API_TIMEOUT_SECS: {e}")))?;
            config = config.with_timeout(Duration::from_secs(secs));
        }
        if let Some(path) = var("CRM_LOGIN_PATH") {
            config = config.with_login_path(path);
        }
        if let Some(path) = var("CRM_REFRESH_PATH") {
            config = config.with_refresh_path(path);
        }
        if let Some(dir) = var("CRM_SESSION_DIR") {
            config = config.with_session_dir(dir);
        }

        config.validate()?;
        Ok(config)
    }

    /// Checks values the builder cannot enforce by type.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] describing the first invalid value.
    pub fn validate(&self) -> Result<(), Error> {
        if self.base_url.cannot_be_a_base() {
            return Err(Error::Config(format!("{} cannot be a base URL", self.base_url)));
        }
        if self.timeout.is_zero() {
            return Err(Error::Config("timeout must be greater than zero".into()));
        }
        for (name, path) in [
            ("login path", &self.login_path),
            ("refresh path", &self.refresh_path),
        ] {
            if !path.starts_with('/') {
                return Err(Error::Config(format!("{name} must start with '/': {path}")));
            }
        }
        Ok(())
    }

    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    #[must_use]
    pub fn with_login_path(mut self, path: impl Into<String>) -> Self {
        self.login_path = path.into();
        self
    }

    #[must_use]
    pub fn with_refresh_path(mut self, path: impl Into<String>) -> Self {
        self.refresh_path = path.into();
        self
    }

    #[must_use]
    pub fn with_user_agent(mut self, user_agent: impl Into<String>) -> Self {
        self.user_agent = user_agent.into();
        self
    }

    /// Add a header sent with every request.
    #[must_use]
    pub fn with_default_header(
        mut self,
        name: impl Into<String>,
        value: impl Into<String>,
    ) -> Self {
        self.default_headers.push((name.into(), value.into()));
        self
    }

    /// Key under which the session is persisted.
    #[must_use]
    pub fn with_session_key(mut self, key: impl Into<String>) -> Self {
        self.session_key = key.into();
        self
    }

    #[must_use]
    pub fn with_session_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.session_dir = Some(dir.into());
        self
    }

    /// Refresh before sending when the access token is already past `expires_at`.
    #[must_use]
    pub fn with_proactive_refresh(mut self, enabled: bool) -> Self {
        self.proactive_refresh = enabled;
        self
    }

    #[must_use]
    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    #[must_use]
    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    #[must_use]
    pub fn login_path(&self) -> &str {
        &self.login_path
    }

    #[must_use]
    pub fn refresh_path(&self) -> &str {
        &self.refresh_path
    }

    #[must_use]
    pub fn user_agent(&self) -> &str {
        &self.user_agent
    }

    #[must_use]
    pub fn default_headers(&self) -> &[(String, String)] {
        &self.default_headers
    }

    #[must_use]
    pub fn session_key(&self) -> &str {
        &self.session_key
    }

    #[must_use]
    pub fn session_dir(&self) -> Option<&std::path::Path> {
        self.session_dir.as_deref()
    }

    #[must_use]
    pub fn proactive_refresh(&self) -> bool {
        self.proactive_refresh
    }
}
