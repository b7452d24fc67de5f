//! Base-relative exchange rate table
//!
//! The table is copy-on-write: every fluctuation builds a complete new map
//! and swaps it in under the write lock, so a reader holding a snapshot sees
//! either all of one tick's values or none of them.

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use rand::Rng;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::debug;

use fx_core::{CurrencyCode, FeedError, FeedResult, RateError, RatePair, RateResult};

use crate::feeds::RateSource;
use crate::fluctuation::FluctuationConfig;

/// Immutable view of the table at one tick
#[derive(Debug, Clone)]
pub struct RateSnapshot {
    rates: Arc<HashMap<CurrencyCode, f64>>,
    tick: u64,
}

impl RateSnapshot {
    /// `rate(destination) / rate(base)`
    pub fn get_rate(&self, base: &CurrencyCode, destination: &CurrencyCode) -> RateResult<f64> {
        let base_rate = self
            .rate(base)
            .ok_or_else(|| RateError::RateNotFound(base.to_string()))?;
        let destination_rate = self
            .rate(destination)
            .ok_or_else(|| RateError::RateNotFound(destination.to_string()))?;

        Ok(destination_rate / base_rate)
    }

    pub fn get_pair_rate(&self, pair: &RatePair) -> RateResult<f64> {
        self.get_rate(&pair.base, &pair.destination)
    }

    /// Raw base-relative rate for one code
    pub fn rate(&self, code: &CurrencyCode) -> Option<f64> {
        self.rates.get(code).copied()
    }

    pub fn contains(&self, code: &CurrencyCode) -> bool {
        self.rates.contains_key(code)
    }

    /// Currency codes, sorted
    pub fn currencies(&self) -> Vec<CurrencyCode> {
        let mut codes: Vec<_> = self.rates.keys().cloned().collect();
        codes.sort();
        codes
    }

    pub fn len(&self) -> usize {
        self.rates.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rates.is_empty()
    }

    /// Fluctuation tick this snapshot was taken at (0 = initial load)
    pub fn tick(&self) -> u64 {
        self.tick
    }
}

#[derive(Debug)]
struct TableInner {
    rates: Arc<HashMap<CurrencyCode, f64>>,
    tick: u64,
    last_fluctuation: Option<DateTime<Utc>>,
}

/// Shared exchange rate table
#[derive(Debug)]
pub struct RateTable {
    base: CurrencyCode,
    inner: RwLock<TableInner>,
}

impl RateTable {
    /// Build a table from already parsed rates
    ///
    /// Every rate must be finite and strictly positive. The base currency is
    /// always present with a rate of exactly 1.0.
    pub fn new(mut rates: HashMap<CurrencyCode, f64>) -> FeedResult<Self> {
        if rates.is_empty() {
            return Err(FeedError::MissingRates);
        }

        if let Some((code, value)) = rates.iter().find(|(_, v)| !v.is_finite() || **v <= 0.0) {
            return Err(FeedError::InvalidRate {
                currency: code.to_string(),
                value: *value,
            });
        }

        let base = CurrencyCode::base();
        rates.insert(base.clone(), 1.0);

        Ok(Self {
            base,
            inner: RwLock::new(TableInner {
                rates: Arc::new(rates),
                tick: 0,
                last_fluctuation: None,
            }),
        })
    }

    /// Build a table from raw feed output keyed by code text
    pub fn from_raw(raw: HashMap<String, f64>) -> FeedResult<Self> {
        let rates = raw
            .into_iter()
            .map(|(code, rate)| {
                code.parse::<CurrencyCode>()
                    .map(|code| (code, rate))
                    .map_err(|e| FeedError::Parse(e.to_string()))
            })
            .collect::<FeedResult<HashMap<_, _>>>()?;

        Self::new(rates)
    }

    /// Populate a table from an external source
    pub async fn load(source: &dyn RateSource) -> FeedResult<Self> {
        let raw = source.fetch().await?;
        let table = Self::from_raw(raw)?;
        debug!(currencies = table.snapshot().len(), "rate table loaded");
        Ok(table)
    }

    pub fn base(&self) -> &CurrencyCode {
        &self.base
    }

    /// Consistent view of the current tick
    pub fn snapshot(&self) -> RateSnapshot {
        let inner = self.inner.read();
        RateSnapshot {
            rates: Arc::clone(&inner.rates),
            tick: inner.tick,
        }
    }

    pub fn get_rate(&self, base: &CurrencyCode, destination: &CurrencyCode) -> RateResult<f64> {
        self.snapshot().get_rate(base, destination)
    }

    /// Apply one fluctuation tick and return its number
    ///
    /// Each code is scaled by an independent random factor from `config`.
    /// The new map replaces the old one in a single write.
    pub fn fluctuate<R: Rng>(&self, rng: &mut R, config: &FluctuationConfig) -> u64 {
        let mut inner = self.inner.write();

        let next: HashMap<CurrencyCode, f64> = inner
            .rates
            .iter()
            .map(|(code, rate)| {
                if code == &self.base && !config.include_base {
                    return (code.clone(), *rate);
                }
                let updated = (rate * config.factor(rng)).max(f64::MIN_POSITIVE);
                (code.clone(), updated)
            })
            .collect();

        inner.rates = Arc::new(next);
        inner.tick += 1;
        inner.last_fluctuation = Some(Utc::now());
        inner.tick
    }

    pub fn stats(&self) -> RateTableStats {
        let inner = self.inner.read();
        RateTableStats {
            currency_count: inner.rates.len(),
            tick: inner.tick,
            last_fluctuation: inner.last_fluctuation,
        }
    }
}

/// Statistics about the rate table
#[derive(Debug, Clone)]
pub struct RateTableStats {
    pub currency_count: usize,
    pub tick: u64,
    pub last_fluctuation: Option<DateTime<Utc>>,
}
