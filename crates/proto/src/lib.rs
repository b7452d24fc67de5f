//! Currency service wire protocol
//!
//! Generated tonic/prost stubs shared by the server and its consumers, plus
//! the conversions to and from the domain types in `fx-core`.

pub mod conversions;

pub mod proto {
    tonic::include_proto!("currency.v1");

    /// Encoded descriptors of `currency.proto`, served through reflection
    pub const FILE_DESCRIPTOR_SET: &[u8] =
        tonic::include_file_descriptor_set!("currency_descriptor");
}

pub use conversions::{rate_error_to_status, rate_response};
