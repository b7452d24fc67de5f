//! Error types

use thiserror::Error;

use crate::{ConnectionId, RatePair};

/// Rate lookup errors
#[derive(Debug, Clone, PartialEq, Error)]
pub enum RateError {
    #[error("rate not found for currency {0}")]
    RateNotFound(String),

    #[error("base currency {base} can not be same as destination currency {destination}")]
    InvalidArgument { base: String, destination: String },

    #[error("invalid currency code: {0:?}")]
    InvalidCurrency(String),
}

/// Initial rate feed errors
#[derive(Debug, Error)]
pub enum FeedError {
    #[error("feed request failed: {0}")]
    Http(String),

    #[error("expected response code 200, got {0}")]
    UnexpectedStatus(u16),

    #[error("unable to parse feed document: {0}")]
    Parse(String),

    #[error("invalid rate {value} for currency {currency}")]
    InvalidRate { currency: String, value: f64 },

    #[error("feed document contained no rates")]
    MissingRates,
}

/// Subscription registry errors
#[derive(Debug, Clone, PartialEq, Error)]
pub enum RegistryError {
    #[error("subscription already active for rate {0}")]
    DuplicateSubscription(RatePair),

    #[error("connection {0} is not registered")]
    UnknownConnection(ConnectionId),
}

/// Terminal failure of a single streaming connection
#[derive(Debug, Error)]
pub enum ConnectionError {
    #[error("transport error: {0}")]
    Transport(String),
}

/// Consumer side errors
#[derive(Debug, Error)]
pub enum ClientError {
    #[error("unable to retrieve exchange rate from currency service: {0}")]
    InvalidArgument(String),

    #[error("rate not found: {0}")]
    RateNotFound(String),

    #[error("transport error: {0}")]
    Transport(String),
}

/// Settings loading errors
#[derive(Debug, Error)]
pub enum SettingsError {
    #[error("unable to load settings: {0}")]
    Load(#[from] ::config::ConfigError),

    #[error("invalid configuration: {0}")]
    Invalid(String),
}

/// Result type alias
pub type RateResult<T> = Result<T, RateError>;
pub type FeedResult<T> = Result<T, FeedError>;
pub type RegistryResult<T> = Result<T, RegistryError>;
pub type ClientResult<T> = Result<T, ClientError>;
