//! Core types and utilities for the currency rate service
//!
//! This crate provides shared types used across all components:
//! - Currency codes and rate pairs
//! - Stream message types pushed to subscribers
//! - Error types
//! - Service and client settings
//! - Logging setup for the binaries

pub mod types;
pub mod stream;
pub mod settings;
pub mod errors;
pub mod logging;

pub use types::*;
pub use stream::*;
pub use settings::*;
pub use errors::*;
pub use logging::init_logging;
