//! Data models for the persisted session records.
//!
//! - `Tokens`: access/refresh token pair with its expiry
//! - `User`: identity of the signed-in user

pub mod tokens;
pub mod user;

pub use tokens::{default_refresh_buffer, TokenType, Tokens, TOKEN_REFRESH_BUFFER_MINUTES};
pub use user::User;
