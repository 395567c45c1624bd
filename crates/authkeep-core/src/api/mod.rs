//! HTTP client module for the backend token endpoints.
//!
//! This module provides `TokenClient` for exchanging refresh tokens and
//! authorization codes, and the `TokenExchange` seam the session manager
//! refreshes through.

pub mod client;
pub mod error;

pub use client::{CodeExchangeResponse, TokenClient, TokenExchange, TokenResponse};
pub use error::ApiError;
