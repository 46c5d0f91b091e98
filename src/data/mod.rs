//! Market and macro data providers.
//!
//! Defines one trait per external capability the screener consumes, and
//! provides a local fixture-file implementation plus a FRED-backed macro
//! source. The engine treats every provider as slow, rate-limited and
//! fallible; none of them is retried by the engine.

pub mod fixture;
pub mod fred;

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::NaiveDate;
use secrecy::SecretString;
use std::sync::Arc;
use tracing::info;

use crate::config::{AppConfig, MacroSourceConfig, ProvidersConfig};
use crate::types::{Fundamentals, MacroSnapshot, OptionsSnapshot, PriceBar};
use fixture::FixtureProvider;
use fred::FredMacroProvider;

// ---------------------------------------------------------------------------
// Capabilities
// ---------------------------------------------------------------------------

/// Daily OHLCV history.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait PriceHistoryProvider: Send + Sync {
    /// Bars for `ticker` within `[start, end]`, ordered by date.
    /// An empty vector means the provider has no data for the range.
    async fn fetch_prices(
        &self,
        ticker: &str,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<Vec<PriceBar>>;
}

/// Point-in-time fundamentals.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait FundamentalsProvider: Send + Sync {
    /// `Ok(None)` means the provider explicitly has no data for `ticker`.
    async fn fetch_fundamentals(&self, ticker: &str) -> Result<Option<Fundamentals>>;

    /// Whether this source throttles aggressively. When true, the engine
    /// runs one pipeline at a time and pauses after each fundamentals call.
    fn rate_limit_sensitive(&self) -> bool {
        false
    }
}

/// Run-wide macro regime snapshot.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait MacroProvider: Send + Sync {
    async fn fetch_macro(&self) -> Result<MacroSnapshot>;
}

/// Options-market positioning. Entirely optional to scoring.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait OptionsProvider: Send + Sync {
    async fn fetch_options(&self, ticker: &str) -> Result<Option<OptionsSnapshot>>;
}

/// One implementation of each capability, shared across a run.
#[derive(Clone)]
pub struct Providers {
    pub prices: Arc<dyn PriceHistoryProvider>,
    pub fundamentals: Arc<dyn FundamentalsProvider>,
    pub macro_data: Arc<dyn MacroProvider>,
    pub options: Arc<dyn OptionsProvider>,
}

// ---------------------------------------------------------------------------
// Config-backed macro source
// ---------------------------------------------------------------------------

/// Returns a fixed snapshot, typically read from `config.toml`.
pub struct StaticMacroProvider {
    snapshot: MacroSnapshot,
}

impl StaticMacroProvider {
    pub fn new(snapshot: MacroSnapshot) -> Self {
        Self { snapshot }
    }
}

#[async_trait]
impl MacroProvider for StaticMacroProvider {
    async fn fetch_macro(&self) -> Result<MacroSnapshot> {
        Ok(self.snapshot)
    }
}

// ---------------------------------------------------------------------------
// Construction from config
// ---------------------------------------------------------------------------

/// Build the provider set selected by configuration.
pub fn build_providers(cfg: &ProvidersConfig) -> Result<Providers> {
    let fixture = Arc::new(
        FixtureProvider::load(&cfg.fixture_path)
            .with_context(|| format!("Failed to load market data fixture: {}", cfg.fixture_path))?
            .with_rate_limit_sensitive(cfg.rate_limit_sensitive),
    );

    let macro_data: Arc<dyn MacroProvider> = match &cfg.macro_source {
        MacroSourceConfig::Static {
            pmi,
            wti,
            spread_2s10s,
            cpi_yoy,
        } => {
            info!("Using static macro snapshot from config");
            Arc::new(StaticMacroProvider::new(MacroSnapshot {
                pmi: *pmi,
                wti: *wti,
                spread_2s10s: *spread_2s10s,
                cpi_yoy: *cpi_yoy,
            }))
        }
        MacroSourceConfig::Fred { api_key_env, pmi } => {
            let key = AppConfig::resolve_env(api_key_env)?;
            info!(api_key_env = %api_key_env, "Using FRED macro provider");
            Arc::new(FredMacroProvider::new(SecretString::new(key), *pmi)?)
        }
    };

    info!(
        fixture = %cfg.fixture_path,
        instruments = fixture.len(),
        rate_limit_sensitive = cfg.rate_limit_sensitive,
        "Providers initialised"
    );

    Ok(Providers {
        prices: fixture.clone(),
        fundamentals: fixture.clone(),
        macro_data,
        options: fixture,
    })
}
