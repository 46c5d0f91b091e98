//! FRED macro provider.
//!
//! Builds the run-wide macro snapshot from the FRED API (Federal Reserve
//! Economic Data).
//!
//! API: `https://api.stlouisfed.org/fred/series/observations`
//! Auth: API key via `api_key` query param. Free registration.
//! Rate limit: 120 req/min.
//!
//! Series: DCOILWTICO (WTI spot), T10Y2Y (10y-2y spread), CPIAUCSL (CPI
//! index, converted to YoY). FRED does not publish the ISM manufacturing
//! PMI, so PMI comes from configuration and defaults to a neutral 50.

use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::Client;
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use tracing::debug;

use super::MacroProvider;
use crate::types::MacroSnapshot;

const FRED_BASE_URL: &str = "https://api.stlouisfed.org/fred/series/observations";

const WTI_SERIES: &str = "DCOILWTICO";
const SPREAD_SERIES: &str = "T10Y2Y";
const CPI_SERIES: &str = "CPIAUCSL";

/// PMI used when none is configured: exactly on the expansion boundary.
const NEUTRAL_PMI: f64 = 50.0;

// ---------------------------------------------------------------------------
// FRED API response types
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct FredResponse {
    #[serde(default)]
    observations: Vec<FredObservation>,
}

#[derive(Debug, Clone, Deserialize)]
struct FredObservation {
    date: String,
    value: String,
}

impl FredObservation {
    /// FRED reports missing observations as ".".
    fn parsed(&self) -> Option<f64> {
        self.value.trim().parse::<f64>().ok().filter(|v| v.is_finite())
    }
}

// ---------------------------------------------------------------------------
// Provider
// ---------------------------------------------------------------------------

pub struct FredMacroProvider {
    http: Client,
    api_key: SecretString,
    pmi: Option<f64>,
}

impl FredMacroProvider {
    pub fn new(api_key: SecretString, pmi: Option<f64>) -> Result<Self> {
        let http = Client::builder()
            .timeout(std::time::Duration::from_secs(15))
            .user_agent("screener/0.1.0")
            .build()
            .context("Failed to build FRED HTTP client")?;
        Ok(Self { http, api_key, pmi })
    }

    /// Fetch the most recent `limit` observations, newest first.
    async fn fetch_series(&self, series_id: &str, limit: usize) -> Result<Vec<FredObservation>> {
        let url = format!(
            "{FRED_BASE_URL}?series_id={series_id}&api_key={}\
             &file_type=json&sort_order=desc&limit={limit}",
            urlencoding::encode(self.api_key.expose_secret()),
        );

        let resp = self
            .http
            .get(&url)
            .send()
            .await
            .with_context(|| format!("FRED request failed for {series_id}"))?;

        if !resp.status().is_success() {
            let status = resp.status();
            anyhow::bail!("FRED API error for {series_id}: {status}");
        }

        let data: FredResponse = resp
            .json()
            .await
            .with_context(|| format!("Failed to parse FRED response for {series_id}"))?;

        debug!(series_id, observations = data.observations.len(), "FRED series fetched");
        Ok(data.observations)
    }
}

/// Newest valid observation in a newest-first list.
fn latest_value(observations: &[FredObservation]) -> Option<f64> {
    observations.iter().find_map(FredObservation::parsed)
}

/// Year-over-year percent change of a monthly index, newest-first input.
///
/// Compares the newest valid value with the one twelve valid observations
/// earlier.
fn year_over_year(observations: &[FredObservation]) -> Option<f64> {
    let values: Vec<f64> = observations.iter().filter_map(FredObservation::parsed).collect();
    let latest = *values.first()?;
    let year_ago = *values.get(12)?;
    if year_ago <= 0.0 {
        return None;
    }
    Some((latest / year_ago - 1.0) * 100.0)
}

#[async_trait]
impl MacroProvider for FredMacroProvider {
    async fn fetch_macro(&self) -> Result<MacroSnapshot> {
        let (wti, spread, cpi) = tokio::join!(
            self.fetch_series(WTI_SERIES, 10),
            self.fetch_series(SPREAD_SERIES, 10),
            self.fetch_series(CPI_SERIES, 16),
        );

        let wti = latest_value(&wti?).context("No valid WTI observation from FRED")?;
        let spread = latest_value(&spread?).context("No valid 2s10s observation from FRED")?;
        let cpi = cpi?;
        let cpi_yoy = year_over_year(&cpi).context("Not enough CPI history for YoY")?;

        let snapshot = MacroSnapshot {
            pmi: self.pmi.unwrap_or(NEUTRAL_PMI),
            wti,
            spread_2s10s: spread,
            cpi_yoy,
        };
        debug!(
            %snapshot,
            cpi_as_of = cpi.first().map(|o| o.date.as_str()).unwrap_or("?"),
            "FRED macro snapshot built"
        );
        Ok(snapshot)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
