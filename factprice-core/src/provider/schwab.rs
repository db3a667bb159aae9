//! Schwab market-data provider.
//!
//! One daily candle per request from the `pricehistory` endpoint. Every call
//! first asks the OAuth session for a token (refreshing if stale), then goes
//! through the shared [`RateLimiter`].

use super::error::ProviderError;
use super::oauth::OAuthSession;
use super::price::{CandleLookup, PriceApi};
use super::rate_limiter::RateLimiter;
use chrono::{NaiveDate, NaiveTime};
use serde::Deserialize;
use std::sync::{Mutex, PoisonError};
use std::time::Duration;
use tracing::debug;

pub const DEFAULT_PRICE_HISTORY_URL: &str = "https://api.schwabapi.com/marketdata/v1/pricehistory";

const DAY_MILLIS: i64 = 86_400_000;

/// `pricehistory` response body.
#[derive(Debug, Deserialize)]
struct PriceHistory {
    candles: Option<Vec<Candle>>,
    #[serde(default)]
    empty: bool,
}

#[derive(Debug, Deserialize)]
struct Candle {
    close: Option<f64>,
}

pub struct SchwabPriceApi {
    client: reqwest::blocking::Client,
    price_history_url: String,
    session: Mutex<OAuthSession>,
    limiter: RateLimiter,
}

impl SchwabPriceApi {
    pub fn new(
        session: OAuthSession,
        limiter: RateLimiter,
        price_history_url: impl Into<String>,
        timeout: Duration,
    ) -> Result<Self, ProviderError> {
        let client = reqwest::blocking::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| ProviderError::Network(format!("HTTP client: {e}")))?;
        Ok(Self {
            client,
            price_history_url: price_history_url.into(),
            session: Mutex::new(session),
            limiter,
        })
    }

    fn access_token(&self) -> Result<String, ProviderError> {
        let mut session = self.session.lock().unwrap_or_else(PoisonError::into_inner);
        Ok(session.acquire()?)
    }

    fn fetch(&self, symbol: &str, day: NaiveDate, token: &str) -> Result<(u16, String), ProviderError> {
        let (start, end) = day_bounds_millis(day);
        let query = [
            ("symbol", symbol.to_string()),
            ("periodType", "month".to_string()),
            ("frequencyType", "daily".to_string()),
            ("frequency", "1".to_string()),
            ("startDate", start.to_string()),
            ("endDate", end.to_string()),
        ];

        let resp = self
            .client
            .get(&self.price_history_url)
            .bearer_auth(token)
            .query(&query)
            .send()
            .map_err(|e| ProviderError::Network(e.to_string()))?;
        let status = resp.status().as_u16();
        let body = resp
            .text()
            .map_err(|e| ProviderError::Network(e.to_string()))?;
        Ok((status, body))
    }
}

impl PriceApi for SchwabPriceApi {
    fn daily_candle(&self, symbol: &str, day: NaiveDate) -> Result<CandleLookup, ProviderError> {
        let token = self.access_token()?;
        let (status, body) = self.limiter.run(|| self.fetch(symbol, day, &token))?;
        debug!(symbol, %day, status, "pricehistory response");
        classify_response(symbol, status, &body)
    }
}

/// First and last millisecond of `day`, UTC epoch.
pub fn day_bounds_millis(day: NaiveDate) -> (i64, i64) {
    let start = day.and_time(NaiveTime::MIN).and_utc().timestamp_millis();
    (start, start + DAY_MILLIS - 1)
}

/// Map an HTTP status and body onto a lookup outcome or a fatal error.
pub fn classify_response(symbol: &str, status: u16, body: &str) -> Result<CandleLookup, ProviderError> {
    match status {
        200..=299 => Ok(parse_candles(body)),
        401 | 403 => Err(ProviderError::Unauthorized { status }),
        404 => Ok(CandleLookup::NoData),
        429 => Err(ProviderError::QuotaExceeded),
        _ => Err(ProviderError::Status {
            status,
            symbol: symbol.to_string(),
            body: truncate(body, 200),
        }),
    }
}

fn parse_candles(body: &str) -> CandleLookup {
    let history: PriceHistory = match serde_json::from_str(body) {
        Ok(h) => h,
        Err(e) => return CandleLookup::Malformed(format!("unparseable body: {e}")),
    };

    match history.candles {
        Some(candles) if !candles.is_empty() && !history.empty => match candles[0].close {
            Some(close) => CandleLookup::Close(close),
            None => CandleLookup::Malformed("first candle has no close".into()),
        },
        _ => CandleLookup::NoData,
    }
}

fn truncate(body: &str, max_chars: usize) -> String {
    body.chars().take(max_chars).collect()
}
