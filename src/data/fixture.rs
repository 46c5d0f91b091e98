//! Local fixture-file data provider.
//!
//! Serves fundamentals, price history and options snapshots from a JSON
//! file, keyed by ticker. Used for offline runs, demos and tests. Tickers
//! missing from the file are reported as explicit absence, never as errors.
//!
//! File layout:
//!
//! ```json
//! {
//!   "instruments": {
//!     "AAPL": {
//!       "fundamentals": { "pe": 28.1, "ev_to_ebitda": 21.0, ... , "sector": "Technology" },
//!       "prices": [ { "date": "2024-01-02", "open": 1, "high": 1, "low": 1, "close": 1, "volume": 1 } ],
//!       "options": null
//!     }
//!   }
//! }
//! ```

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs;
use tracing::debug;

use super::{FundamentalsProvider, OptionsProvider, PriceHistoryProvider};
use crate::types::{normalize_ticker, Fundamentals, OptionsSnapshot, PriceBar};

/// Everything known about one instrument in the fixture.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FixtureInstrument {
    #[serde(default)]
    pub fundamentals: Option<Fundamentals>,
    #[serde(default)]
    pub prices: Vec<PriceBar>,
    #[serde(default)]
    pub options: Option<OptionsSnapshot>,
}

/// Top-level fixture document.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FixtureUniverse {
    #[serde(default)]
    pub instruments: HashMap<String, FixtureInstrument>,
}

pub struct FixtureProvider {
    instruments: HashMap<String, FixtureInstrument>,
    rate_limit_sensitive: bool,
}

impl FixtureProvider {
    /// Load a fixture from a JSON file on disk.
    pub fn load(path: &str) -> Result<Self> {
        let contents = fs::read_to_string(path)
            .with_context(|| format!("Failed to read fixture file: {path}"))?;
        let universe: FixtureUniverse = serde_json::from_str(&contents)
            .with_context(|| format!("Failed to parse fixture file: {path}"))?;
        Ok(Self::from_universe(universe))
    }

    /// Build from an in-memory universe. Keys are normalised and bars sorted
    /// by date so lookups match the engine's normalised symbols.
    pub fn from_universe(universe: FixtureUniverse) -> Self {
        let instruments = universe
            .instruments
            .into_iter()
            .filter_map(|(ticker, mut instrument)| {
                instrument.prices.sort_by_key(|bar| bar.date);
                normalize_ticker(&ticker).map(|t| (t, instrument))
            })
            .collect();
        Self {
            instruments,
            rate_limit_sensitive: false,
        }
    }

    /// Mark this source as rate-limit sensitive (serialised fetching).
    pub fn with_rate_limit_sensitive(mut self, sensitive: bool) -> Self {
        self.rate_limit_sensitive = sensitive;
        self
    }

    /// Number of instruments in the fixture.
    pub fn len(&self) -> usize {
        self.instruments.len()
    }

    pub fn is_empty(&self) -> bool {
        self.instruments.is_empty()
    }

    fn get(&self, ticker: &str) -> Option<&FixtureInstrument> {
        let found = self.instruments.get(ticker);
        if found.is_none() {
            debug!(ticker, "Ticker not present in fixture");
        }
        found
    }
}

#[async_trait]
impl PriceHistoryProvider for FixtureProvider {
    async fn fetch_prices(
        &self,
        ticker: &str,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<Vec<PriceBar>> {
        Ok(self
            .get(ticker)
            .map(|i| {
                i.prices
                    .iter()
                    .filter(|bar| bar.date >= start && bar.date <= end)
                    .cloned()
                    .collect()
            })
            .unwrap_or_default())
    }
}

#[async_trait]
impl FundamentalsProvider for FixtureProvider {
    async fn fetch_fundamentals(&self, ticker: &str) -> Result<Option<Fundamentals>> {
        Ok(self.get(ticker).and_then(|i| i.fundamentals.clone()))
    }

    fn rate_limit_sensitive(&self) -> bool {
        self.rate_limit_sensitive
    }
}

#[async_trait]
impl OptionsProvider for FixtureProvider {
    async fn fetch_options(&self, ticker: &str) -> Result<Option<OptionsSnapshot>> {
        Ok(self.get(ticker).and_then(|i| i.options.clone()))
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
