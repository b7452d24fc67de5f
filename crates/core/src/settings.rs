//! Configuration types
//!
//! Settings are layered: built-in defaults, then an optional TOML file
//! (`currency.toml` or the path in `CURRENCY_CONFIG`), then environment
//! variables such as `CURRENCY_GRPC__PORT=9092`.

use ::config::{Config, Environment, File, FileFormat};
use serde::{Deserialize, Serialize};

use crate::SettingsError;

const ENV_PREFIX: &str = "CURRENCY";
const DEFAULT_CONFIG_FILE: &str = "currency";

/// gRPC listener configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GrpcSettings {
    pub host: String,
    pub port: u16,
    pub keep_alive_interval_secs: u64,
    pub keep_alive_timeout_secs: u64,
}

impl Default for GrpcSettings {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 9092,
            keep_alive_interval_secs: 60,
            keep_alive_timeout_secs: 20,
        }
    }
}

/// Initial rate feed configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FeedSettings {
    pub url: String,
    pub timeout_secs: u64,
}

impl Default for FeedSettings {
    fn default() -> Self {
        Self {
            url: "https://www.ecb.europa.eu/stats/eurofxref/eurofxref-daily.xml".to_string(),
            timeout_secs: 10,
        }
    }
}

/// How each tick picks the direction of a rate change
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FluctuationDirection {
    /// Every tick scales rates down, so they drift monotonically
    #[default]
    Monotonic,
    /// Down or up with equal odds, chosen per currency
    Random,
}

/// Simulated rate drift configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FluctuationSettings {
    pub interval_secs: u64,
    /// Upper bound of the relative change applied per tick
    pub max_change: f64,
    pub direction: FluctuationDirection,
    /// Whether the base currency drifts along with everything else
    pub include_base: bool,
}

impl Default for FluctuationSettings {
    fn default() -> Self {
        Self {
            interval_secs: 20,
            max_change: 0.10,
            direction: FluctuationDirection::Monotonic,
            include_base: true,
        }
    }
}

/// Streaming connection configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StreamSettings {
    /// Capacity of each connection's outbound queue
    pub outbound_buffer: usize,
}

impl Default for StreamSettings {
    fn default() -> Self {
        Self { outbound_buffer: 64 }
    }
}

/// Consumer configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientSettings {
    pub endpoint: String,
    pub watch: Vec<String>,
}

impl Default for ClientSettings {
    fn default() -> Self {
        Self {
            endpoint: "http://127.0.0.1:9092".to_string(),
            watch: vec!["USD".to_string(), "GBP".to_string()],
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct LogSettings {
    pub json: bool,
}

/// Complete service configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub grpc: GrpcSettings,
    pub feed: FeedSettings,
    pub fluctuation: FluctuationSettings,
    pub stream: StreamSettings,
    pub client: ClientSettings,
    pub log: LogSettings,
}

impl Settings {
    /// Load from the optional config file and the environment
    pub fn load() -> Result<Self, SettingsError> {
        let path = std::env::var(format!("{ENV_PREFIX}_CONFIG"))
            .unwrap_or_else(|_| DEFAULT_CONFIG_FILE.to_string());

        let settings: Settings = Config::builder()
            .add_source(File::with_name(&path).required(false))
            .add_source(
                Environment::with_prefix(ENV_PREFIX)
                    .prefix_separator("_")
                    .separator("__")
                    .list_separator(",")
                    .with_list_parse_key("client.watch")
                    .try_parsing(true),
            )
            .build()?
            .try_deserialize()?;

        settings.validate()?;
        Ok(settings)
    }

    /// Load from TOML text only
    pub fn from_toml(text: &str) -> Result<Self, SettingsError> {
        let settings: Settings = Config::builder()
            .add_source(File::from_str(text, FileFormat::Toml))
            .build()?
            .try_deserialize()?;

        settings.validate()?;
        Ok(settings)
    }

    pub fn validate(&self) -> Result<(), SettingsError> {
        let fluctuation = &self.fluctuation;
        if fluctuation.interval_secs == 0 {
            return Err(SettingsError::Invalid(
                "fluctuation.interval_secs must be positive".to_string(),
            ));
        }
        if !(fluctuation.max_change > 0.0 && fluctuation.max_change < 1.0) {
            return Err(SettingsError::Invalid(format!(
                "fluctuation.max_change must be within (0, 1), got {}",
                fluctuation.max_change
            )));
        }
        if self.stream.outbound_buffer == 0 {
            return Err(SettingsError::Invalid(
                "stream.outbound_buffer must be positive".to_string(),
            ));
        }
        Ok(())
    }

    pub fn grpc_address(&self) -> String {
        format!("{}:{}", self.grpc.host, self.grpc.port)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let settings = Settings::default();
        assert_eq!(settings.grpc.port, 9092);
        assert_eq!(settings.fluctuation.interval_secs, 20);
        assert_eq!(settings.fluctuation.direction, FluctuationDirection::Monotonic);
        assert!(settings.fluctuation.include_base);
        assert!(settings.validate().is_ok());
    }

    #[test]
    fn test_partial_toml_keeps_defaults() {
        let settings = Settings::from_toml(
            r#"
            [grpc]
            port = 50051

            [fluctuation]
            direction = "random"
            include_base = false
            "#,
        )
        .unwrap();

        assert_eq!(settings.grpc.port, 50051);
        assert_eq!(settings.grpc.host, "0.0.0.0");
        assert_eq!(settings.fluctuation.direction, FluctuationDirection::Random);
        assert!(!settings.fluctuation.include_base);
        assert_eq!(settings.fluctuation.max_change, 0.10);
        assert_eq!(settings.grpc_address(), "0.0.0.0:50051");
    }

    #[test]
    fn test_rejects_out_of_range_change() {
        let err = Settings::from_toml("[fluctuation]\nmax_change = 1.5\n").unwrap_err();
        assert!(matches!(err, SettingsError::Invalid(_)));
    }
}
