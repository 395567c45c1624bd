//! Core library for authkeep.
//!
//! Keeps a client-side authenticated session alive: persists the token and
//! user records through a pluggable key-value store, refreshes the access
//! token before it expires, and publishes the derived `AuthState` to any
//! front end that mounts a `SessionProvider`.

pub mod api;
pub mod auth;
pub mod config;
pub mod models;
pub mod storage;
pub mod utils;

#[cfg(test)]
mod test_support;

pub use api::{ApiError, TokenClient, TokenExchange};
pub use auth::{
    AuthState, AuthStorage, ContextError, OAuthClient, OAuthConfig, RefreshLoop,
    RefreshSchedule, SessionContext, SessionManager, SessionProvider,
};
pub use config::Config;
pub use models::{Tokens, User};
pub use storage::{open_store, KeyValueStore};
