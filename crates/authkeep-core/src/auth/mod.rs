//! Authentication module for managing the user session.
//!
//! This module provides:
//! - `SessionManager`: login/logout/refresh over persisted records
//! - `AuthStorage`: typed token, user and OAuth state records
//! - `RefreshLoop`: background task keeping the access token fresh
//! - `SessionProvider`/`SessionContext`: explicit mount point for front ends
//! - `OAuthClient`: CSRF-checked authorization-code flow
//!
//! Access tokens are refreshed once they are within 5 minutes of expiry.

pub mod context;
pub mod oauth;
pub mod refresher;
pub mod session;
pub mod storage;

pub use context::{ContextError, SessionContext, SessionProvider};
pub use oauth::{generate_state, OAuthClient, OAuthConfig, OAuthError};
pub use refresher::{RefreshLoop, RefreshSchedule, DEFAULT_POLL_INTERVAL};
pub use session::{AuthState, RefreshError, SessionManager};
pub use storage::AuthStorage;
