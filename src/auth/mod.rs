//! Auth session lifecycle for the gateway.
//!
//! # Quick Start
//!
//! ```rust,ignore
//! use crm_gateway::auth::{AuthEvent, Credentials};
//!
//! // 1. Rehydrate any session persisted by a previous run
//! gateway.restore().await;
//!
//! // 2. Log in when there is none
//! if gateway.session().is_none() {
//!     gateway.login(&Credentials::new("admin", password)).await?;
//! }
//!
//! // 3. React to the session ending underneath the app
//! let mut events = gateway.subscribe();
//! while let Ok(event) = events.recv().await {
//!     if event == AuthEvent::SessionExpired {
//!         show_login_screen();
//!     }
//! }
//! ```
//!
//! Concurrent refresh attempts share a single call to the refresh endpoint;
//! every waiter sees the same outcome.

mod manager;
mod session;
mod store;

pub use manager::{AuthEvent, AuthManager};
pub use session::{AuthSession, Credentials};
pub use store::{FileSessionStore, MemorySessionStore, SessionStore, StoreError};
