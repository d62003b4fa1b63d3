//! Token service: keeps provider access tokens fresh with single-flight
//! refresh and per-connection exponential backoff on failure.

mod token_service;

pub use token_service::{RefreshedTokens, TokenRefresher, TokenService};
