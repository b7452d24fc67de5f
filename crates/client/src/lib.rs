//! Consumer side of the currency service
//!
//! Rates are resolved once over the unary call, cached, and then kept fresh
//! by the pushes arriving on a single subscription stream.

pub mod cache;

pub use cache::{round_to_tenth, RateCache};
