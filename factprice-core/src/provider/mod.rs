//! Price-data provider: OAuth session, rate limiting, price resolution.
//!
//! Layering, leaf-first:
//! - [`credentials`]: the persisted credential file
//! - [`oauth`]: token issuance/refresh state machine
//! - [`rate_limiter`]: minimum spacing between outbound calls
//! - [`price`]: the [`PriceApi`] seam and the bounded forward-probing resolver
//! - [`schwab`]: the HTTP implementation of [`PriceApi`]

pub mod credentials;
pub mod error;
pub mod oauth;
pub mod price;
pub mod rate_limiter;
pub mod schwab;

pub use credentials::{CredentialState, CredentialStore};
pub use error::{AuthError, ProviderError};
pub use oauth::{
    AuthorizationCodeProvider, HttpTokenTransport, OAuthSession, SessionPhase, SessionSettings,
    TokenGrant, TokenResponse, TokenTransport,
};
pub use price::{
    CandleLookup, PriceApi, PriceQuote, PriceResolver, ProbePolicy, ProbeSchedule, ResolverStats,
};
pub use rate_limiter::RateLimiter;
pub use schwab::{SchwabPriceApi, DEFAULT_PRICE_HISTORY_URL};
