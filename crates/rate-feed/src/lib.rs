//! Exchange rate table and its data sources
//!
//! Features:
//! - Base-relative rate table with consistent per-tick snapshots
//! - Initial load from the ECB daily reference feed
//! - Simulated fluctuation on a fixed interval
//! - Change notification for downstream broadcasters

pub mod feeds;
pub mod fluctuation;
pub mod table;

pub use feeds::{EcbFeed, RateSource, StaticRates};
pub use fluctuation::{FluctuationConfig, FluctuationDriver};
pub use table::{RateSnapshot, RateTable, RateTableStats};
