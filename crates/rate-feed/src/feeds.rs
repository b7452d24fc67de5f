//! Rate sources used to populate the table at startup

use serde::Deserialize;
use std::collections::HashMap;
use std::time::Duration;
use tracing::{debug, info};

use fx_core::{FeedError, FeedResult, FeedSettings};

/// Source of base-relative rates keyed by currency code
#[async_trait::async_trait]
pub trait RateSource: Send + Sync {
    async fn fetch(&self) -> FeedResult<HashMap<String, f64>>;

    fn name(&self) -> &str;
}

/// European Central Bank daily reference rates (EUR based)
pub struct EcbFeed {
    url: String,
    client: reqwest::Client,
}

impl EcbFeed {
    pub fn new(url: impl Into<String>, timeout: Duration) -> FeedResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| FeedError::Http(e.to_string()))?;

        Ok(Self {
            url: url.into(),
            client,
        })
    }

    pub fn from_settings(settings: &FeedSettings) -> FeedResult<Self> {
        Self::new(settings.url.clone(), Duration::from_secs(settings.timeout_secs))
    }

    pub fn url(&self) -> &str {
        &self.url
    }
}

#[async_trait::async_trait]
impl RateSource for EcbFeed {
    async fn fetch(&self) -> FeedResult<HashMap<String, f64>> {
        info!(url = %self.url, "Fetching reference rates");

        let response = self
            .client
            .get(&self.url)
            .send()
            .await
            .map_err(|e| FeedError::Http(e.to_string()))?;

        let status = response.status();
        if status != reqwest::StatusCode::OK {
            return Err(FeedError::UnexpectedStatus(status.as_u16()));
        }

        let body = response
            .text()
            .await
            .map_err(|e| FeedError::Http(e.to_string()))?;

        let rates = parse_ecb_document(&body)?;
        debug!(count = rates.len(), "Parsed reference rates");
        Ok(rates)
    }

    fn name(&self) -> &str {
        "ecb"
    }
}

/// Fixed rates, for tests and offline runs
#[derive(Debug, Clone, Default)]
pub struct StaticRates {
    rates: HashMap<String, f64>,
}

impl StaticRates {
    pub fn new<I, S>(rates: I) -> Self
    where
        I: IntoIterator<Item = (S, f64)>,
        S: Into<String>,
    {
        Self {
            rates: rates.into_iter().map(|(code, rate)| (code.into(), rate)).collect(),
        }
    }
}

#[async_trait::async_trait]
impl RateSource for StaticRates {
    async fn fetch(&self) -> FeedResult<HashMap<String, f64>> {
        Ok(self.rates.clone())
    }

    fn name(&self) -> &str {
        "static"
    }
}

// Document layout: <Envelope><Cube><Cube time=".."><Cube currency=".." rate=".."/>...

#[derive(Debug, Deserialize)]
struct Envelope {
    #[serde(rename = "Cube")]
    cube: OuterCube,
}

#[derive(Debug, Deserialize)]
struct OuterCube {
    #[serde(rename = "Cube", default)]
    days: Vec<DailyCube>,
}

#[derive(Debug, Deserialize)]
struct DailyCube {
    #[serde(rename = "@time", default)]
    time: Option<String>,
    #[serde(rename = "Cube", default)]
    rates: Vec<RateCube>,
}

#[derive(Debug, Deserialize)]
struct RateCube {
    #[serde(rename = "@currency")]
    currency: String,
    #[serde(rename = "@rate")]
    rate: String,
}

/// Parse an ECB reference rate document into code -> rate
pub fn parse_ecb_document(xml: &str) -> FeedResult<HashMap<String, f64>> {
    let envelope: Envelope =
        quick_xml::de::from_str(xml).map_err(|e| FeedError::Parse(e.to_string()))?;

    let mut rates = HashMap::new();
    for day in envelope.cube.days {
        debug!(time = ?day.time, count = day.rates.len(), "Reference rate set");
        for cube in day.rates {
            let rate: f64 = cube.rate.trim().parse().map_err(|_| {
                FeedError::Parse(format!("rate {:?} for {} is not a number", cube.rate, cube.currency))
            })?;
            rates.insert(cube.currency, rate);
        }
    }

    if rates.is_empty() {
        return Err(FeedError::MissingRates);
    }

    Ok(rates)
}
