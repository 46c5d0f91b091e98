//! Shared types for the screener.
//!
//! These types form the data model used across all modules. Provider,
//! scoring and engine modules depend on them without depending on each
//! other.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::fmt;

// ---------------------------------------------------------------------------
// Instrument identifiers
// ---------------------------------------------------------------------------

/// Normalise a requested symbol: trim surrounding whitespace and upper-case.
///
/// Returns `None` for blank input so callers can classify it as
/// [`Disposition::SkippedBlank`] without touching any provider.
pub fn normalize_ticker(raw: &str) -> Option<String> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_uppercase())
    }
}

// ---------------------------------------------------------------------------
// Market data
// ---------------------------------------------------------------------------

/// Point-in-time valuation and quality metrics for one instrument.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Fundamentals {
    pub pe: f64,
    pub ev_to_ebitda: f64,
    /// Free-cash-flow yield as a fraction (0.05 = 5%).
    pub fcf_yield: f64,
    pub pb: f64,
    /// Return on invested capital as a fraction.
    pub roic: f64,
    /// Gross margin as a fraction.
    pub gross_margin: f64,
    pub net_debt_to_ebitda: f64,
    pub sector: String,
}

impl fmt::Display for Fundamentals {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "[{}] P/E={:.1} EV/EBITDA={:.1} FCF={:.1}% P/B={:.1} ROIC={:.1}% GM={:.1}% ND/EBITDA={:.1}",
            self.sector,
            self.pe,
            self.ev_to_ebitda,
            self.fcf_yield * 100.0,
            self.pb,
            self.roic * 100.0,
            self.gross_margin * 100.0,
            self.net_debt_to_ebitda,
        )
    }
}

impl Fundamentals {
    /// Helper to build a test fundamentals snapshot with sensible defaults.
    #[cfg(test)]
    pub fn sample(sector: &str) -> Self {
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
}

/// One daily OHLCV bar.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PriceBar {
    pub date: NaiveDate,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: u64,
}

impl PriceBar {
    /// Build a consecutive daily series from closing prices (test helper).
    #[cfg(test)]
    pub fn series(closes: &[f64]) -> Vec<PriceBar> {
        let start = NaiveDate::from_ymd_opt(2024, 1, 1).unwrap();
        closes
            .iter()
            .enumerate()
            .map(|(i, &close)| PriceBar {
                date: start + chrono::Duration::days(i as i64),
                open: close,
                high: close,
                low: close,
                close,
                volume: 1_000,
            })
            .collect()
    }
}

/// Summary of options-market positioning for one instrument.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OptionsSnapshot {
    pub put_call_ratio: f64,
    /// Implied-volatility rank on a 0–100 scale.
    pub implied_vol_rank: f64,
    /// Today's call volume relative to its 20-day average.
    pub call_vol_to_avg_20d: f64,
    /// Change in near-the-money OTM call open interest.
    pub near_otm_call_oi_delta: f64,
}

/// Macro regime inputs shared by every instrument in a run.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MacroSnapshot {
    /// Manufacturing PMI (50 = expansion/contraction boundary).
    pub pmi: f64,
    /// WTI crude, USD per barrel.
    pub wti: f64,
    /// 10y minus 2y Treasury yield, percentage points.
    pub spread_2s10s: f64,
    /// CPI year-over-year, percent.
    pub cpi_yoy: f64,
}

impl MacroSnapshot {
    /// Substitute used when the macro provider fails.
    ///
    /// PMI sits exactly on the boundary, WTI exactly at the threshold, a
    /// flat curve (-0.05) and CPI at target (+0.05): the sector tilt sums
    /// to exactly zero.
    pub fn neutral() -> Self {
        Self {
            pmi: 50.0,
            wti: 60.0,
            spread_2s10s: 0.0,
            cpi_yoy: 2.0,
        }
    }
}

impl Default for MacroSnapshot {
    fn default() -> Self {
        Self::neutral()
    }
}

impl fmt::Display for MacroSnapshot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "PMI={:.1} WTI=${:.2} 2s10s={:+.2} CPI={:.1}%",
            self.pmi, self.wti, self.spread_2s10s, self.cpi_yoy,
        )
    }
}

// ---------------------------------------------------------------------------
// Scoring
// ---------------------------------------------------------------------------

/// Per-factor coefficients supplied by the caller.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ScoringWeights {
    pub value: f64,
    pub quality: f64,
    pub momentum: f64,
    pub options: f64,
    pub macro_tilt: f64,
}

impl Default for ScoringWeights {
    fn default() -> Self {
        Self {
            value: 1.0,
            quality: 1.0,
            momentum: 1.0,
            options: 1.0,
            macro_tilt: 1.0,
        }
    }
}

/// The five factors before weighting.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct FactorValues {
    pub value: f64,
    pub quality: f64,
    pub momentum: f64,
    pub options: f64,
    pub macro_tilt: f64,
}

impl FactorValues {
    /// Multiply each factor by its weight.
    pub fn weighted(&self, weights: &ScoringWeights) -> Score {
        Score {
            value: self.value * weights.value,
            quality: self.quality * weights.quality,
            momentum: self.momentum * weights.momentum,
            options: self.options * weights.options,
            macro_tilt: self.macro_tilt * weights.macro_tilt,
        }
    }
}

/// Weighted factor components. The total is always derived from them.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Score {
    pub value: f64,
    pub quality: f64,
    pub momentum: f64,
    pub options: f64,
    pub macro_tilt: f64,
}

impl Score {
    pub fn total(&self) -> f64 {
        self.value + self.quality + self.momentum + self.options + self.macro_tilt
    }
}

impl fmt::Display for Score {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "total={:+.4} (V {:+.4} | Q {:+.4} | M {:+.4} | O {:+.4} | X {:+.4})",
            self.total(),
            self.value,
            self.quality,
            self.momentum,
            self.options,
            self.macro_tilt,
        )
    }
}

/// Raw factors, the weights applied, and the resulting weighted score.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ScoreExplanation {
    pub raw: FactorValues,
    pub weights: ScoringWeights,
    pub weighted: Score,
}

// ---------------------------------------------------------------------------
// Screen results
// ---------------------------------------------------------------------------

/// One included instrument together with every input used to score it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScreenResult {
    pub ticker: String,
    pub fundamentals: Fundamentals,
    pub prices: Vec<PriceBar>,
    pub options: Option<OptionsSnapshot>,
    pub macro_snapshot: MacroSnapshot,
    pub score: Score,
}

impl fmt::Display for ScreenResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{:<8} {} | bars={} options={}",
            self.ticker,
            self.score,
            self.prices.len(),
            if self.options.is_some() { "yes" } else { "no" },
        )
    }
}

/// Why a requested ticker is, or is not, in the final result set.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Disposition {
    Included,
    SkippedBlank,
    SkippedNoFundamentals,
    SkippedNoPrices,
    SkippedFilteredOut,
    FailedFundamentals,
    FailedPrices,
    Failed(String),
}

impl Disposition {
    /// Recorded for a ticker whose pipeline the run was cancelled under.
    pub fn cancelled() -> Self {
        Disposition::Failed("cancelled".to_string())
    }

    pub fn is_included(&self) -> bool {
        matches!(self, Disposition::Included)
    }

    /// Whether a collaborator (or the pipeline itself) raised an error,
    /// as opposed to reporting absence or being excluded by policy.
    pub fn is_failure(&self) -> bool {
        matches!(
            self,
            Disposition::FailedFundamentals | Disposition::FailedPrices | Disposition::Failed(_)
        )
    }
}

impl fmt::Display for Disposition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Disposition::Included => write!(f, "included"),
            Disposition::SkippedBlank => write!(f, "skipped: blank ticker"),
            Disposition::SkippedNoFundamentals => write!(f, "skipped: no fundamentals"),
            Disposition::SkippedNoPrices => write!(f, "skipped: no prices"),
            Disposition::SkippedFilteredOut => write!(f, "skipped: filtered out"),
            Disposition::FailedFundamentals => write!(f, "failed: fundamentals"),
            Disposition::FailedPrices => write!(f, "failed: prices"),
            Disposition::Failed(reason) => write!(f, "failed: {reason}"),
        }
    }
}

/// The terminal disposition recorded for one requested ticker.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TickerDisposition {
    /// Normalised symbol, or the raw input when it was blank.
    pub ticker: String,
    pub disposition: Disposition,
}

/// Emitted once per requested ticker when its pipeline finishes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProgressEvent {
    pub ticker: String,
    pub completed: usize,
    pub total: usize,
    pub disposition: Disposition,
}

impl fmt::Display for ProgressEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "[{}/{}] {} => {}",
            self.completed, self.total, self.ticker, self.disposition,
        )
    }
}

// ---------------------------------------------------------------------------
// Error types
// ---------------------------------------------------------------------------

/// Errors that abort a whole screening run.
///
/// Per-ticker problems never surface here; they become a [`Disposition`].
#[derive(Debug, thiserror::Error)]
pub enum ScreenError {
    #[error("Screen request has no tickers")]
    EmptyUniverse,

    #[error("Invalid date range: end {end} is before start {start}")]
    InvalidDateRange { start: NaiveDate, end: NaiveDate },

    #[error("Screen cancelled after {completed} of {total} tickers")]
    Cancelled { completed: usize, total: usize },

    #[error("Configuration error: {0}")]
    Config(String),
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
