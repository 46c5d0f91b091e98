//! Mock market data for integration testing.
//!
//! Provides a deterministic implementation of every provider capability,
//! all in-memory with no external dependencies. Failures, absences,
//! latency and rate-limit sensitivity are controllable per ticker from
//! test code, and every call is recorded.

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use chrono::{Duration as ChronoDuration, NaiveDate};
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use screener::data::{
    FundamentalsProvider, MacroProvider, OptionsProvider, PriceHistoryProvider, Providers,
};
use screener::types::*;

pub fn date(y: i32, m: u32, d: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(y, m, d).unwrap()
}

/// Fundamentals with middle-of-the-road values for `sector`.
pub fn fundamentals(sector: &str) -> Fundamentals {
    Fundamentals {
        pe: 18.0,
        ev_to_ebitda: 12.0,
        fcf_yield: 0.05,
        pb: 3.0,
        roic: 0.15,
        gross_margin: 0.40,
        net_debt_to_ebitda: 1.0,
        sector: sector.to_string(),
    }
}

/// Consecutive daily bars from 2024-01-01 with the given closes.
pub fn bars(closes: &[f64]) -> Vec<PriceBar> {
    let start = date(2024, 1, 1);
    closes
        .iter()
        .enumerate()
        .map(|(i, &close)| PriceBar {
            date: start + ChronoDuration::days(i as i64),
            open: close,
            high: close,
            low: close,
            close,
            volume: 10_000,
        })
        .collect()
}

/// `n` bars rising linearly from `base` by `step`.
pub fn trend(n: usize, base: f64, step: f64) -> Vec<PriceBar> {
    bars(&(0..n).map(|i| base + step * i as f64).collect::<Vec<_>>())
}

pub fn options(put_call_ratio: f64) -> OptionsSnapshot {
    OptionsSnapshot {
        put_call_ratio,
        implied_vol_rank: 40.0,
        call_vol_to_avg_20d: 1.2,
        near_otm_call_oi_delta: 0.1,
    }
}

pub fn expansion() -> MacroSnapshot {
    MacroSnapshot {
        pmi: 54.0,
        wti: 82.0,
        spread_2s10s: 0.6,
        cpi_yoy: 2.4,
    }
}

#[derive(Debug, Clone, Default)]
pub struct MockInstrument {
    pub fundamentals: Option<Fundamentals>,
    pub prices: Vec<PriceBar>,
    pub options: Option<OptionsSnapshot>,
}

/// A mock market for deterministic testing.
pub struct MockMarket {
    instruments: HashMap<String, MockInstrument>,
    macro_snapshot: Option<MacroSnapshot>,
    fundamentals_errors: HashSet<String>,
    price_errors: HashSet<String>,
    option_errors: HashSet<String>,
    panics: HashSet<String>,
    latency: Duration,
    rate_limited: bool,
    in_flight: Arc<AtomicUsize>,
    max_in_flight: Arc<AtomicUsize>,
    macro_calls: Arc<AtomicUsize>,
    fundamentals_calls: Arc<Mutex<Vec<String>>>,
    option_calls: Arc<Mutex<Vec<String>>>,
    /// If set, every per-ticker call returns this error.
    force_error: Arc<Mutex<Option<String>>>,
}

impl MockMarket {
    pub fn new() -> Self {
        Self {
            instruments: HashMap::new(),
            macro_snapshot: Some(expansion()),
            fundamentals_errors: HashSet::new(),
            price_errors: HashSet::new(),
            option_errors: HashSet::new(),
            panics: HashSet::new(),
            latency: Duration::ZERO,
            rate_limited: false,
            in_flight: Arc::new(AtomicUsize::new(0)),
            max_in_flight: Arc::new(AtomicUsize::new(0)),
            macro_calls: Arc::new(AtomicUsize::new(0)),
            fundamentals_calls: Arc::new(Mutex::new(Vec::new())),
            option_calls: Arc::new(Mutex::new(Vec::new())),
            force_error: Arc::new(Mutex::new(None)),
        }
    }

    /// A fully populated instrument: fundamentals, 30 rising bars, options.
    pub fn with_ticker(self, ticker: &str, sector: &str) -> Self {
        self.with_instrument(
            ticker,
            MockInstrument {
                fundamentals: Some(fundamentals(sector)),
                prices: trend(30, 100.0, 1.0),
                options: Some(options(0.8)),
            },
        )
    }

    pub fn with_instrument(mut self, ticker: &str, instrument: MockInstrument) -> Self {
        self.instruments.insert(ticker.to_string(), instrument);
        self
    }

    pub fn with_macro(mut self, snapshot: Option<MacroSnapshot>) -> Self {
        self.macro_snapshot = snapshot;
        self
    }

    pub fn failing_fundamentals(mut self, ticker: &str) -> Self {
        self.fundamentals_errors.insert(ticker.to_string());
        self
    }

    pub fn failing_prices(mut self, ticker: &str) -> Self {
        self.price_errors.insert(ticker.to_string());
        self
    }

    pub fn failing_options(mut self, ticker: &str) -> Self {
        self.option_errors.insert(ticker.to_string());
        self
    }

    pub fn panicking(mut self, ticker: &str) -> Self {
        self.panics.insert(ticker.to_string());
        self
    }

    /// Every per-ticker call takes `latency` to answer.
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    pub fn rate_limited(mut self, sensitive: bool) -> Self {
        self.rate_limited = sensitive;
        self
    }

    /// Force all subsequent per-ticker calls to return an error.
    pub fn set_error(&self, msg: &str) {
        *self.force_error.lock().unwrap() = Some(msg.to_string());
    }

    /// Most pipelines observed between their fundamentals call and their
    /// last provider call at the same time. Filtered-out tickers never
    /// reach the options call, so leave filters off when reading this.
    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }

    pub fn macro_calls(&self) -> usize {
        self.macro_calls.load(Ordering::SeqCst)
    }

    pub fn fundamentals_calls(&self) -> Vec<String> {
        self.fundamentals_calls.lock().unwrap().clone()
    }

    pub fn option_calls(&self) -> Vec<String> {
        self.option_calls.lock().unwrap().clone()
    }

    fn enter(&self) {
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);
    }

    fn leave(&self) {
        let _ = self
            .in_flight
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1));
    }

    async fn pause(&self) {
        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }
    }

    fn forced(&self) -> Result<()> {
        match self.force_error.lock().unwrap().as_ref() {
            Some(msg) => Err(anyhow!("{msg}")),
            None => Ok(()),
        }
    }
}

/// Wire one shared mock into every provider slot.
pub fn providers(market: &Arc<MockMarket>) -> Providers {
    Providers {
        prices: market.clone(),
        fundamentals: market.clone(),
        macro_data: market.clone(),
        options: market.clone(),
    }
}

#[async_trait]
impl FundamentalsProvider for MockMarket {
    async fn fetch_fundamentals(&self, ticker: &str) -> Result<Option<Fundamentals>> {
        self.fundamentals_calls.lock().unwrap().push(ticker.to_string());
        self.enter();
        self.pause().await;

        if self.panics.contains(ticker) {
            self.leave();
            panic!("mock panic for {ticker}");
        }
        if let Err(e) = self.forced() {
            self.leave();
            return Err(e);
        }
        if self.fundamentals_errors.contains(ticker) {
            self.leave();
            return Err(anyhow!("fundamentals unavailable for {ticker}"));
        }
        let fundamentals = self
            .instruments
            .get(ticker)
            .and_then(|i| i.fundamentals.clone());
        if fundamentals.is_none() {
            self.leave();
        }
        Ok(fundamentals)
    }

    fn rate_limit_sensitive(&self) -> bool {
        self.rate_limited
    }
}

#[async_trait]
impl PriceHistoryProvider for MockMarket {
    async fn fetch_prices(
        &self,
        ticker: &str,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<Vec<PriceBar>> {
        self.pause().await;
        if let Err(e) = self.forced() {
            self.leave();
            return Err(e);
        }
        if self.price_errors.contains(ticker) {
            self.leave();
            return Err(anyhow!("price history unavailable for {ticker}"));
        }
        let bars: Vec<PriceBar> = self
            .instruments
            .get(ticker)
            .map(|i| {
                i.prices
                    .iter()
                    .filter(|b| b.date >= start && b.date <= end)
                    .cloned()
                    .collect()
            })
            .unwrap_or_default();
        if bars.is_empty() {
            self.leave();
        }
        Ok(bars)
    }
}

#[async_trait]
impl OptionsProvider for MockMarket {
    async fn fetch_options(&self, ticker: &str) -> Result<Option<OptionsSnapshot>> {
        self.option_calls.lock().unwrap().push(ticker.to_string());
        self.pause().await;
        self.leave();
        if self.option_errors.contains(ticker) {
            return Err(anyhow!("options chain unavailable for {ticker}"));
        }
        Ok(self.instruments.get(ticker).and_then(|i| i.options.clone()))
    }
}

#[async_trait]
impl MacroProvider for MockMarket {
    async fn fetch_macro(&self) -> Result<MacroSnapshot> {
        self.macro_calls.fetch_add(1, Ordering::SeqCst);
        self.macro_snapshot
            .ok_or_else(|| anyhow!("macro source offline"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_mock_fetch_known_and_unknown() {
        let market = MockMarket::new().with_ticker("AAPL", "Technology");
        let f = market.fetch_fundamentals("AAPL").await.unwrap();
        assert_eq!(f.unwrap().sector, "Technology");
        assert!(market.fetch_fundamentals("NOPE").await.unwrap().is_none());
        assert_eq!(market.fundamentals_calls(), vec!["AAPL", "NOPE"]);
    }

    #[tokio::test]
    async fn test_mock_prices_clipped() {
        let market = MockMarket::new().with_ticker("AAPL", "Technology");
        let bars = market
            .fetch_prices("AAPL", date(2024, 1, 5), date(2024, 1, 9))
            .await
            .unwrap();
        assert_eq!(bars.len(), 5);
    }

    #[tokio::test]
    async fn test_mock_forced_error() {
        let market = MockMarket::new().with_ticker("AAPL", "Technology");
        market.set_error("maintenance window");
        let err = market.fetch_fundamentals("AAPL").await.unwrap_err();
        assert!(err.to_string().contains("maintenance"));
        assert!(market.fetch_prices("AAPL", date(2024, 1, 1), date(2024, 2, 1)).await.is_err());
    }

    #[tokio::test]
    async fn test_mock_occupancy_spans_pipeline() {
        let market = MockMarket::new()
            .with_ticker("AAPL", "Technology")
            .with_ticker("MSFT", "Technology");
        market.fetch_fundamentals("AAPL").await.unwrap();
        market.fetch_fundamentals("MSFT").await.unwrap();
        assert_eq!(market.max_in_flight(), 2);

        market.fetch_prices("AAPL", date(2024, 1, 1), date(2024, 2, 1)).await.unwrap();
        market.fetch_options("AAPL").await.unwrap();
        market.fetch_fundamentals("NOPE").await.unwrap();
        assert_eq!(market.max_in_flight(), 2);
    }

    #[tokio::test]
    async fn test_mock_macro_offline() {
        let market = MockMarket::new().with_macro(None);
        assert!(market.fetch_macro().await.is_err());
        assert_eq!(market.macro_calls(), 1);
    }
}
