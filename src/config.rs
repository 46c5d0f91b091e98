//! Configuration loading from TOML with environment variable resolution.
//!
//! Reads `config.toml` and deserializes into strongly-typed structs.
//! Secrets (API keys) are referenced by env-var name in the config and
//! resolved at runtime via `std::env::var`.

use anyhow::{Context, Result};
use chrono::NaiveDate;
use serde::Deserialize;
use std::fs;
use std::time::Duration;

use crate::engine::normalizer::NormalizationMode;
use crate::engine::screener::{CancelPolicy, EngineConfig, ScreenRequest};
use crate::scoring::filter::FilterSpec;
use crate::types::{ScoringWeights, ScreenError};

/// Top-level application configuration.
#[derive(Debug, Deserialize, Clone)]
pub struct AppConfig {
    pub screen: ScreenConfig,
    #[serde(default)]
    pub engine: EngineSection,
    pub providers: ProvidersConfig,
}

/// The screening run the binary performs.
#[derive(Debug, Deserialize, Clone)]
pub struct ScreenConfig {
    pub tickers: Vec<String>,
    pub start: NaiveDate,
    pub end: NaiveDate,
    #[serde(default)]
    pub weights: ScoringWeights,
    #[serde(default)]
    pub filter: Option<FilterSpec>,
    #[serde(default)]
    pub normalization: Option<NormalizationMode>,
    /// How many ranked rows to print.
    #[serde(default = "default_top_n")]
    pub top_n: usize,
    #[serde(default)]
    pub on_cancel: CancelPolicy,
}

fn default_top_n() -> usize {
    20
}

#[derive(Debug, Deserialize, Clone)]
pub struct EngineSection {
    /// Defaults to the number of cores, capped at 8.
    #[serde(default)]
    pub max_concurrency: Option<usize>,
    #[serde(default = "default_rate_limited_delay_ms")]
    pub rate_limited_delay_ms: u64,
}

fn default_rate_limited_delay_ms() -> u64 {
    1000
}

impl Default for EngineSection {
    fn default() -> Self {
        Self {
            max_concurrency: None,
            rate_limited_delay_ms: default_rate_limited_delay_ms(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct ProvidersConfig {
    /// JSON file serving fundamentals, prices and options.
    pub fixture_path: String,
    #[serde(default)]
    pub rate_limit_sensitive: bool,
    #[serde(rename = "macro")]
    pub macro_source: MacroSourceConfig,
}

#[derive(Debug, Deserialize, Clone, PartialEq)]
#[serde(tag = "source", rename_all = "snake_case")]
pub enum MacroSourceConfig {
    /// Fixed regime values.
    Static {
        pmi: f64,
        wti: f64,
        spread_2s10s: f64,
        cpi_yoy: f64,
    },
    /// Live series from FRED. PMI is not on FRED, so it stays configurable.
    Fred {
        api_key_env: String,
        #[serde(default)]
        pmi: Option<f64>,
    },
}

impl AppConfig {
    /// Load configuration from a TOML file.
    pub fn load(path: &str) -> Result<Self> {
        let contents = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {path}"))?;
        Self::parse(&contents).with_context(|| format!("Failed to parse config file: {path}"))
    }

    /// Parse configuration from TOML text.
    pub fn parse(contents: &str) -> Result<Self> {
        let config: AppConfig = toml::from_str(contents)?;
        if let Some(0) = config.engine.max_concurrency {
            return Err(ScreenError::Config("engine.max_concurrency must be at least 1".into()).into());
        }
        Ok(config)
    }

    /// Resolve an environment variable name to its value.
    /// Useful for loading secrets referenced in the config.
    pub fn resolve_env(env_name: &str) -> Result<String> {
        std::env::var(env_name)
            .with_context(|| format!("Environment variable not set: {env_name}"))
    }

    /// The request described by `[screen]`.
    pub fn screen_request(&self) -> ScreenRequest {
        let s = &self.screen;
        let mut request = ScreenRequest::new(s.tickers.iter().cloned(), s.start, s.end)
            .with_weights(s.weights)
            .with_cancel_policy(s.on_cancel);
        if let Some(filter) = &s.filter {
            request = request.with_filter(filter.clone());
        }
        if let Some(mode) = s.normalization {
            request = request.with_normalization(mode);
        }
        request
    }

    pub fn engine_config(&self) -> EngineConfig {
        EngineConfig {
            max_concurrency: self.engine.max_concurrency,
            rate_limited_delay: Duration::from_millis(self.engine.rate_limited_delay_ms),
        }
    }
}
