//! gRPC currency service
//!
//! Serves one-shot rate lookups and a bidirectional subscription stream that
//! pushes updated rates to every subscriber after each fluctuation tick.

pub mod broadcaster;
pub mod connection;
pub mod registry;
pub mod server;
pub mod service;

// Re-export proto types
pub use fx_proto::{conversions, proto};

pub use broadcaster::{BroadcastStats, Broadcaster};
pub use connection::{ConnectionState, StreamConnection};
pub use registry::{BroadcastTarget, SubscriptionRegistry};
pub use server::{GrpcServer, GrpcServerBuilder, GrpcServerConfig};
pub use service::{CurrencyServiceImpl, ServiceConfig};
