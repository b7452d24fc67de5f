//! Simulated rate fluctuation
//!
//! The reference feed only publishes once a day, so the driver perturbs the
//! table on a fixed interval and announces each tick on a watch channel.

use rand::Rng;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tracing::{debug, info};

use fx_core::{FluctuationDirection, FluctuationSettings};

use crate::table::RateTable;

/// Fluctuation driver configuration
#[derive(Debug, Clone)]
pub struct FluctuationConfig {
    pub interval: Duration,
    pub max_change: f64,
    pub direction: FluctuationDirection,
    pub include_base: bool,
}

impl FluctuationConfig {
    /// Draw the multiplier applied to one rate for one tick
    pub fn factor<R: Rng>(&self, rng: &mut R) -> f64 {
        let change = rng.random::<f64>() * self.max_change;

        let rising = match self.direction {
            FluctuationDirection::Monotonic => false,
            FluctuationDirection::Random => rng.random_bool(0.5),
        };

        if rising {
            1.0 + change
        } else {
            1.0 - change
        }
    }
}

impl Default for FluctuationConfig {
    fn default() -> Self {
        FluctuationSettings::default().into()
    }
}

impl From<FluctuationSettings> for FluctuationConfig {
    fn from(settings: FluctuationSettings) -> Self {
        Self {
            interval: Duration::from_secs(settings.interval_secs),
            max_change: settings.max_change,
            direction: settings.direction,
            include_base: settings.include_base,
        }
    }
}

/// Background task that perturbs the rate table
pub struct FluctuationDriver {
    config: FluctuationConfig,
    table: Arc<RateTable>,
}

impl FluctuationDriver {
    pub fn new(config: FluctuationConfig, table: Arc<RateTable>) -> Self {
        Self { config, table }
    }

    /// Spawn the driver
    ///
    /// The returned receiver observes the number of the latest tick. The
    /// task runs until it is aborted.
    pub fn spawn(self) -> (JoinHandle<()>, watch::Receiver<u64>) {
        let (tx, rx) = watch::channel(self.table.stats().tick);
        let handle = tokio::spawn(async move {
            self.run(tx).await;
        });
        (handle, rx)
    }

    pub async fn run(self, changed: watch::Sender<u64>) {
        info!(
            interval = ?self.config.interval,
            max_change = self.config.max_change,
            direction = ?self.config.direction,
            include_base = self.config.include_base,
            "Starting rate fluctuation"
        );

        let mut interval = interval_at(Instant::now() + self.config.interval, self.config.interval);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            interval.tick().await;

            let tick = {
                let mut rng = rand::rng();
                self.table.fluctuate(&mut rng, &self.config)
            };

            debug!(tick, "rates fluctuated");
            changed.send_replace(tick);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use fx_core::CurrencyCode;
    use rand::rngs::StdRng;
    use rand::SeedableRng;
    use std::collections::HashMap;

    #[test]
    fn test_monotonic_factor_bounds() {
        let config = FluctuationConfig::default();
        let mut rng = StdRng::seed_from_u64(9);

        for _ in 0..1000 {
            let f = config.factor(&mut rng);
            assert!(f > 0.9 && f <= 1.0, "factor {f} out of range");
        }
    }

    #[test]
    fn test_config_from_settings() {
        let settings = FluctuationSettings {
            interval_secs: 5,
            max_change: 0.2,
            direction: FluctuationDirection::Random,
            include_base: false,
        };
        let config = FluctuationConfig::from(settings);

        assert_eq!(config.interval, Duration::from_secs(5));
        assert_eq!(config.max_change, 0.2);
        assert_eq!(config.direction, FluctuationDirection::Random);
        assert!(!config.include_base);
    }

    #[tokio::test]
    async fn test_driver_signals_each_tick() {
        let table = Arc::new(
            RateTable::new(HashMap::from([("USD".parse::<CurrencyCode>().unwrap(), 1.1)])).unwrap(),
        );
        let config = FluctuationConfig {
            interval: Duration::from_millis(10),
            ..FluctuationConfig::default()
        };

        let (handle, mut rx) = FluctuationDriver::new(config, Arc::clone(&table)).spawn();
        assert_eq!(*rx.borrow(), 0);

        tokio::time::timeout(Duration::from_secs(2), rx.changed())
            .await
            .expect("timeout waiting for tick")
            .unwrap();

        let tick = *rx.borrow_and_update();
        assert!(tick >= 1);
        assert!(table.stats().tick >= tick);

        handle.abort();
    }
}
