//! Messages pushed to subscribers on the streaming channel

use std::fmt;

use crate::RatePair;

/// Application error codes carried in-band on the stream
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCode {
    InvalidArgument,
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ErrorCode::InvalidArgument => f.write_str("invalid_argument"),
        }
    }
}

/// A subscribe request echoed back as it was received
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RejectedRequest {
    pub base: String,
    pub destination: String,
}

impl From<&RatePair> for RejectedRequest {
    fn from(pair: &RatePair) -> Self {
        Self {
            base: pair.base.to_string(),
            destination: pair.destination.to_string(),
        }
    }
}

impl fmt::Display for RejectedRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "base: {} destination: {}", self.base, self.destination)
    }
}

/// Server to client stream message
///
/// Exactly one variant per message. Errors sent this way never close the
/// stream.
#[derive(Debug, Clone, PartialEq)]
pub enum StreamMessage {
    RateUpdate {
        pair: RatePair,
        rate: f64,
    },
    SubscriptionError {
        code: ErrorCode,
        message: String,
        request: RejectedRequest,
    },
}

impl StreamMessage {
    pub fn rate_update(pair: RatePair, rate: f64) -> Self {
        StreamMessage::RateUpdate { pair, rate }
    }

    /// In-band rejection of a subscribe request
    pub fn rejected(request: RejectedRequest, message: impl Into<String>) -> Self {
        StreamMessage::SubscriptionError {
            code: ErrorCode::InvalidArgument,
            message: message.into(),
            request,
        }
    }

    pub fn is_error(&self) -> bool {
        matches!(self, StreamMessage::SubscriptionError { .. })
    }
}
