//! Price resolution: `(symbol, filed_date) → close price | None`.
//!
//! The first probe is `filed_date + offset` (one calendar day by default,
//! i.e. the session after filing). A day the provider has no data for
//! (weekend, holiday, halted stock) advances the probe by one calendar day,
//! up to `max_attempts` probes in total. The walk is an explicit
//! [`ProbeSchedule`] so the bound is a testable parameter rather than an
//! implicit loop.
//!
//! Outcomes:
//! - a close price: `Some(price)`
//! - every probe empty, or a structurally malformed response: `None`, logged
//! - any other provider failure: [`ProviderError`], never retried
//!
//! Results are memoised per `(symbol, filed_date)` for the lifetime of the
//! resolver, i.e. one enrichment run.

use super::error::ProviderError;
use chrono::{Duration, NaiveDate};
use std::collections::HashMap;
use tracing::{debug, warn};

/// What the provider said about one probe day.
#[derive(Debug, Clone, PartialEq)]
pub enum CandleLookup {
    Close(f64),
    /// No trading data for the day; worth probing the next one.
    NoData,
    /// Response did not have the expected shape. Not retried.
    Malformed(String),
}

/// Single-day candle lookup against a price provider.
pub trait PriceApi {
    fn daily_candle(&self, symbol: &str, day: NaiveDate) -> Result<CandleLookup, ProviderError>;
}

impl<T: PriceApi + ?Sized> PriceApi for &T {
    fn daily_candle(&self, symbol: &str, day: NaiveDate) -> Result<CandleLookup, ProviderError> {
        (**self).daily_candle(symbol, day)
    }
}

/// Forward-probing parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProbePolicy {
    /// Calendar days between the filed date and the first probe.
    pub offset_days: i64,
    /// Total probes, first one included.
    pub max_attempts: u32,
}

impl Default for ProbePolicy {
    fn default() -> Self {
        Self {
            offset_days: 1,
            max_attempts: 6,
        }
    }
}

/// The bounded sequence of `(attempt, probe day)` pairs for one lookup.
#[derive(Debug, Clone)]
pub struct ProbeSchedule {
    next_day: Option<NaiveDate>,
    attempt: u32,
    max_attempts: u32,
}

impl ProbeSchedule {
    pub fn new(filed: NaiveDate, policy: ProbePolicy) -> Self {
        Self {
            next_day: filed.checked_add_signed(Duration::days(policy.offset_days)),
            attempt: 0,
            max_attempts: policy.max_attempts,
        }
    }

    /// Attempts issued so far.
    pub fn attempts(&self) -> u32 {
        self.attempt
    }
}

impl Iterator for ProbeSchedule {
    type Item = (u32, NaiveDate);

    fn next(&mut self) -> Option<Self::Item> {
        if self.attempt >= self.max_attempts {
            return None;
        }
        let day = self.next_day?;
        self.attempt += 1;
        self.next_day = day.succ_opt();
        Some((self.attempt, day))
    }
}

/// A resolved (or unresolvable) price for one `(symbol, filed_date)`.
#[derive(Debug, Clone, PartialEq)]
pub struct PriceQuote {
    pub symbol: String,
    /// Day the price was taken from, or the last day probed if none was.
    pub probe_date: Option<NaiveDate>,
    pub close_price: Option<f64>,
    pub attempts: u32,
}

/// Counters for one resolver lifetime.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ResolverStats {
    pub external_calls: u64,
    pub cache_hits: u64,
    pub resolved: u64,
    pub unresolved: u64,
}

/// Memoising forward-probing resolver.
pub struct PriceResolver<A: PriceApi> {
    api: A,
    policy: ProbePolicy,
    cache: HashMap<(String, NaiveDate), PriceQuote>,
    stats: ResolverStats,
}

impl<A: PriceApi> PriceResolver<A> {
    pub fn new(api: A, policy: ProbePolicy) -> Self {
        Self {
            api,
            policy,
            cache: HashMap::new(),
            stats: ResolverStats::default(),
        }
    }

    pub fn stats(&self) -> ResolverStats {
        self.stats
    }

    pub fn quote(&self, symbol: &str, filed: NaiveDate) -> Option<&PriceQuote> {
        self.cache.get(&(symbol.to_string(), filed))
    }

    /// Resolve the close price for `symbol` after `filed`.
    pub fn resolve(&mut self, symbol: &str, filed: NaiveDate) -> Result<Option<f64>, ProviderError> {
        let key = (symbol.to_string(), filed);
        if let Some(quote) = self.cache.get(&key) {
            self.stats.cache_hits += 1;
            return Ok(quote.close_price);
        }

        let quote = self.probe(symbol, filed)?;
        match quote.close_price {
            Some(_) => self.stats.resolved += 1,
            None => self.stats.unresolved += 1,
        }
        let price = quote.close_price;
        self.cache.insert(key, quote);
        Ok(price)
    }

    fn probe(&mut self, symbol: &str, filed: NaiveDate) -> Result<PriceQuote, ProviderError> {
        let mut schedule = ProbeSchedule::new(filed, self.policy);
        let mut last_day = None;

        while let Some((attempt, day)) = schedule.next() {
            last_day = Some(day);
            self.stats.external_calls += 1;

            match self.api.daily_candle(symbol, day)? {
                CandleLookup::Close(price) => {
                    debug!(symbol, %filed, %day, attempt, price, "price resolved");
                    return Ok(PriceQuote {
                        symbol: symbol.to_string(),
                        probe_date: Some(day),
                        close_price: Some(price),
                        attempts: attempt,
                    });
                }
                CandleLookup::NoData => {
                    debug!(symbol, %day, attempt, "no trading data, probing next day");
                }
                CandleLookup::Malformed(reason) => {
                    warn!(symbol, %filed, %day, %reason, "malformed price response, recording null");
                    return Ok(PriceQuote {
                        symbol: symbol.to_string(),
                        probe_date: Some(day),
                        close_price: None,
                        attempts: attempt,
                    });
                }
            }
        }

        warn!(
            symbol,
            %filed,
            attempts = schedule.attempts(),
            "no price within probe window, recording null"
        );
        Ok(PriceQuote {
            symbol: symbol.to_string(),
            probe_date: last_day,
            close_price: None,
            attempts: schedule.attempts(),
        })
    }
}
