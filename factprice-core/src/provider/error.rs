//! Structured errors for the price-data provider.
//!
//! Everything here is fatal for a run. Recoverable outcomes (a day without
//! data, a malformed candle) are not errors; see [`super::price::CandleLookup`].

use thiserror::Error;

/// Authorization or token refresh failed.
#[derive(Debug, Error)]
pub enum AuthError {
    #[error("credential '{0}' is not set in the credential store")]
    MissingCredential(&'static str),

    #[error("redirect URL carries no authorization code")]
    MissingCode,

    #[error("invalid URL: {0}")]
    InvalidUrl(String),

    #[error("token endpoint rejected the {grant} grant with HTTP {status}: {body}")]
    Rejected {
        grant: &'static str,
        status: u16,
        body: String,
    },

    #[error("token endpoint unreachable: {0}")]
    Network(String),

    #[error("token response malformed: {0}")]
    MalformedResponse(String),

    #[error("authorization aborted: {0}")]
    Aborted(String),

    #[error("credential store: {0}")]
    Store(#[from] std::io::Error),
}

/// A provider failure that may indicate a systemic problem. Never retried,
/// never masked as a missing price.
#[derive(Debug, Error)]
pub enum ProviderError {
    #[error("authentication failed: {0}")]
    Auth(#[from] AuthError),

    #[error("provider rejected the bearer token (HTTP {status})")]
    Unauthorized { status: u16 },

    #[error("provider quota exhausted (HTTP 429)")]
    QuotaExceeded,

    #[error("provider returned HTTP {status} for {symbol}: {body}")]
    Status {
        status: u16,
        symbol: String,
        body: String,
    },

    #[error("network error: {0}")]
    Network(String),
}
