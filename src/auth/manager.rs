use std::sync::Arc;

use futures::FutureExt;
use futures::future::{BoxFuture, Shared};
use parking_lot::Mutex;
use serde_json::{Value, json};
use tokio::sync::broadcast;

use super::session::{
    AuthSession, Credentials, LoginResponse, RefreshResponse, expiry_from_now, unwrap_auth_payload,
};
use super::store::SessionStore;
use crate::client::backend_message;
use crate::config::GatewayConfig;
use crate::contract::Method;
use crate::error::Error;
use crate::transport::{Headers, Transport, TransportRequest};

/// Session lifecycle notifications for the application layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[non_exhaustive]
pub enum AuthEvent {
    LoggedIn,
    Refreshed,
    /// Refresh failed and the session is gone; the user must log in again.
    SessionExpired,
    LoggedOut,
}

/// Why a shared refresh failed. Cloned out to every waiter.
#[derive(Debug, Clone)]
struct RefreshFailure(String);

type RefreshOutcome = Result<AuthSession, RefreshFailure>;
type InFlightRefresh = Shared<BoxFuture<'static, RefreshOutcome>>;

enum Refresh {
    Settled(AuthSession),
    Pending(InFlightRefresh),
}

#[derive(Default)]
struct State {
    session: Option<AuthSession>,
    in_flight: Option<InFlightRefresh>,
}

struct Inner<T, S> {
    transport: Arc<T>,
    store: S,
    login_path: String,
    refresh_path: String,
    session_key: String,
    state: Mutex<State>,
    /// Serializes store writes; see [`Inner::sync_persisted`].
    persist_lock: tokio::sync::Mutex<()>,
    events: broadcast::Sender<AuthEvent>,
}

/// Owns the auth session and coordinates login, refresh and logout.
///
/// Cheap to clone; clones share one session. Session state is only changed
/// through these methods, and the lock guarding it is never held across an
/// await.
pub struct AuthManager<T, S> {
    inner: Arc<Inner<T, S>>,
}

// Manual Clone: avoid derive adding `T: Clone, S: Clone` bounds.
impl<T, S> Clone for AuthManager<T, S> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T: Transport, S: SessionStore> AuthManager<T, S> {
    #[must_use]
    pub fn new(transport: Arc<T>, store: S, config: &GatewayConfig) -> Self {
        let (events, _) = broadcast::channel(16);
        Self {
            inner: Arc::new(Inner {
                transport,
                store,
                login_path: config.login_path().to_owned(),
                refresh_path: config.refresh_path().to_owned(),
                session_key: config.session_key().to_owned(),
                state: Mutex::new(State::default()),
                persist_lock: tokio::sync::Mutex::new(()),
                events,
            }),
        }
    }

    /// Subscribe to session lifecycle events.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<AuthEvent> {
        self.inner.events.subscribe()
    }

    /// Snapshot of the current session, `None` when anonymous.
    #[must_use]
    pub fn session(&self) -> Option<AuthSession> {
        self.inner.state.lock().session.clone()
    }

    #[must_use]
    pub fn is_authenticated(&self) -> bool {
        self.inner.state.lock().session.is_some()
    }

    /// The underlying store.
    #[must_use]
    pub fn store(&self) -> &S {
        &self.inner.store
    }

    /// Adds the bearer header when authenticated; no-op when anonymous.
    ///
    /// Returns the access token that was attached.
    pub fn attach_auth(&self, headers: &mut Headers) -> Option<String> {
        let state = self.inner.state.lock();
        let session = state.session.as_ref()?;
        headers.insert("authorization".into(), session.bearer());
        Some(session.access_token.clone())
    }

    /// Rehydrates the persisted session, if any.
    ///
    /// An in-memory session always wins over the stored copy. A stored value
    /// that cannot be read is discarded.
    pub async fn restore(&self) -> Option<AuthSession> {
        let stored = match self.inner.store.load(&self.inner.session_key).await {
            Ok(Some(stored)) => stored,
            Ok(None) => return self.session(),
            Err(e) => {
                tracing::warn!(error = %e, "Failed to load persisted session");
                return self.session();
            }
        };

        let session: AuthSession = match serde_json::from_str(&stored) {
            Ok(session) => session,
            Err(e) => {
                tracing::warn!(error = %e, "Discarding unreadable persisted session");
                self.inner.sync_persisted().await;
                return self.session();
            }
        };

        let mut state = self.inner.state.lock();
        if state.session.is_none() {
            tracing::debug!(expires_at = %session.expires_at, "Restored persisted session");
            state.session = Some(session);
        }
        state.session.clone()
    }

    /// Exchanges credentials for a session.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Auth`] if the backend rejects the credentials or sends
    /// an unusable payload, or [`Error::Network`]/[`Error::Timeout`] on
    /// transport failure. The previous state is left untouched on failure.
    pub async fn login(&self, credentials: &Credentials) -> Result<AuthSession, Error> {
        let request = TransportRequest::new(Method::Post, self.inner.login_path.clone())
            .with_body(json!({
                "username": credentials.username,
                "password": credentials.password
            }));

        let response = self.inner.transport.send(request).await?;
        if !response.is_success() {
            tracing::warn!(status = response.status, "Login rejected");
            return Err(Error::Auth {
                operation: "login",
                status: Some(response.status),
                detail: backend_message(&response.body),
            });
        }

        let payload: LoginResponse =
            parse_auth_payload(&response.body).map_err(|detail| Error::Auth {
                operation: "login",
                status: Some(response.status),
                detail,
            })?;

        let session = AuthSession::new(
            payload.access_token,
            payload.refresh_token,
            expiry_from_now(payload.expires_in),
            payload.user,
        );

        self.inner.state.lock().session = Some(session.clone());
        self.inner.sync_persisted().await;
        self.inner.emit(AuthEvent::LoggedIn);
        tracing::info!("Login successful");

        Ok(session)
    }

    /// Refreshes the token pair, sharing one call among concurrent callers.
    ///
    /// # Errors
    ///
    /// Returns [`Error::SessionExpired`] when anonymous or when the refresh
    /// fails; in the latter case the session has been cleared.
    pub async fn refresh(&self) -> Result<AuthSession, Error> {
        match self.inner.join_or_start(None)? {
            Refresh::Settled(session) => Ok(session),
            Refresh::Pending(in_flight) => await_refresh(in_flight).await,
        }
    }

    /// Refresh in response to the backend rejecting `rejected`.
    ///
    /// If the session already carries a different token, someone else
    /// refreshed since that request went out and the current session is
    /// returned without another network call.
    ///
    /// # Errors
    ///
    /// Same as [`AuthManager::refresh`].
    pub async fn refresh_after_rejection(&self, rejected: &str) -> Result<AuthSession, Error> {
        match self.inner.join_or_start(Some(rejected))? {
            Refresh::Settled(session) => Ok(session),
            Refresh::Pending(in_flight) => await_refresh(in_flight).await,
        }
    }

    /// Refreshes first if the current token is already past its expiry.
    ///
    /// # Errors
    ///
    /// Same as [`AuthManager::refresh`]. Anonymous callers pass through.
    pub async fn ensure_fresh(&self) -> Result<(), Error> {
        let expired_token = {
            let state = self.inner.state.lock();
            match &state.session {
                Some(session) if session.is_expired() => session.access_token.clone(),
                _ => return Ok(()),
            }
        };
        tracing::debug!("Access token past expiry, refreshing before send");
        self.refresh_after_rejection(&expired_token).await.map(|_| ())
    }

    /// Clears the session and its persisted copy. Idempotent.
    pub async fn logout(&self) {
        let had_session = self.inner.state.lock().session.take().is_some();
        self.inner.sync_persisted().await;
        if had_session {
            self.inner.emit(AuthEvent::LoggedOut);
            tracing::info!("Logged out");
        }
    }
}

async fn await_refresh(in_flight: InFlightRefresh) -> Result<AuthSession, Error> {
    in_flight.await.map_err(|RefreshFailure(reason)| {
        tracing::debug!(%reason, "Shared refresh failed");
        Error::SessionExpired
    })
}

fn parse_auth_payload<P: serde::de::DeserializeOwned>(body: &str) -> Result<P, String> {
    let value: Value = serde_json::from_str(body).map_err(|e| format!("body is not JSON: {e}"))?;
    serde_json::from_value(unwrap_auth_payload(value)).map_err(|e| e.to_string())
}

impl<T: Transport, S: SessionStore> Inner<T, S> {
    /// Returns the in-flight refresh, starting one if none exists.
    ///
    /// With `rejected` set, a session whose access token already differs is
    /// returned as is. The refresh runs as its own task so that no waiter can
    /// cancel it.
    fn join_or_start(self: &Arc<Self>, rejected: Option<&str>) -> Result<Refresh, Error> {
        let mut state = self.state.lock();
        if let Some(in_flight) = &state.in_flight {
            return Ok(Refresh::Pending(in_flight.clone()));
        }
        let Some(session) = state.session.clone() else {
            return Err(Error::SessionExpired);
        };
        if rejected.is_some_and(|token| token != session.access_token) {
            return Ok(Refresh::Settled(session));
        }

        let inner = Arc::clone(self);
        let task = tokio::spawn(async move { inner.run_refresh(session).await });
        let in_flight = async move {
            task.await
                .unwrap_or_else(|e| Err(RefreshFailure(format!("refresh task aborted: {e}"))))
        }
        .boxed()
        .shared();

        state.in_flight = Some(in_flight.clone());
        Ok(Refresh::Pending(in_flight))
    }

    async fn run_refresh(self: Arc<Self>, previous: AuthSession) -> RefreshOutcome {
        tracing::info!("Refreshing access token");
        let result = self.request_refresh(&previous).await;

        // Settle the slot and the session in one critical section so that a
        // caller arriving afterwards sees either the old world or the new one.
        let (outcome, event) = {
            let mut state = self.state.lock();
            state.in_flight = None;
            let still_current = state
                .session
                .as_ref()
                .is_some_and(|s| s.refresh_token == previous.refresh_token);

            if still_current {
                match result {
                    Ok(session) => {
                        state.session = Some(session.clone());
                        (Ok(session), Some(AuthEvent::Refreshed))
                    }
                    Err(reason) => {
                        state.session = None;
                        (Err(RefreshFailure(reason)), Some(AuthEvent::SessionExpired))
                    }
                }
            } else {
                // Logout or a fresh login happened meanwhile; that state wins.
                let outcome = state
                    .session
                    .clone()
                    .ok_or_else(|| RefreshFailure("session ended during refresh".into()));
                (outcome, None)
            }
        };

        match (&outcome, event) {
            (Ok(_), Some(event)) => {
                self.sync_persisted().await;
                self.emit(event);
                tracing::info!("Access token refreshed");
            }
            (Err(RefreshFailure(reason)), Some(event)) => {
                self.sync_persisted().await;
                self.emit(event);
                tracing::warn!(%reason, "Token refresh failed, session cleared");
            }
            _ => tracing::debug!("Refresh result superseded"),
        }
        outcome
    }

    async fn request_refresh(&self, previous: &AuthSession) -> Result<AuthSession, String> {
        let request = TransportRequest::new(Method::Post, self.refresh_path.clone())
            .with_body(json!({ "refreshToken": previous.refresh_token }));

        let response = self
            .transport
            .send(request)
            .await
            .map_err(|e| format!("transport: {e}"))?;
        if !response.is_success() {
            return Err(format!(
                "status {}: {}",
                response.status,
                backend_message(&response.body)
            ));
        }

        let payload: RefreshResponse = parse_auth_payload(&response.body)?;
        Ok(AuthSession::new(
            payload.access_token,
            payload
                .refresh_token
                .unwrap_or_else(|| previous.refresh_token.clone()),
            expiry_from_now(payload.expires_in),
            previous.user.clone(),
        ))
    }

    /// Writes the current in-memory session to the store, or removes the
    /// stored copy when anonymous.
    ///
    /// Every session transition calls this after changing state. Writes are
    /// serialized and each one snapshots the state only once it holds the
    /// persist lock, so the last transition always decides the stored copy.
    /// Store failures are logged; the in-memory session stays authoritative.
    async fn sync_persisted(&self) {
        let _guard = self.persist_lock.lock().await;
        let session = self.state.lock().session.clone();

        match session {
            Some(session) => {
                let json = match serde_json::to_string(&session) {
                    Ok(json) => json,
                    Err(e) => {
                        tracing::warn!(error = %e, "Failed to serialize session");
                        return;
                    }
                };
                if let Err(e) = self.store.save(&self.session_key, &json).await {
                    tracing::warn!(error = %e, "Failed to persist session");
                }
            }
            None => {
                if let Err(e) = self.store.remove(&self.session_key).await {
                    tracing::warn!(error = %e, "Failed to clear persisted session");
                }
            }
        }
    }

    fn emit(&self, event: AuthEvent) {
        // No subscribers is fine.
        let _ = self.events.send(event);
    }
}
