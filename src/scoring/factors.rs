//! Raw factor formulas.
//!
//! Every function here is pure. The orchestrator, the filter and the
//! normalizer all call into this module so the formulas exist exactly once.

use crate::types::{Fundamentals, MacroSnapshot, OptionsSnapshot, PriceBar};

// ---------------------------------------------------------------------------
// Momentum
// ---------------------------------------------------------------------------

/// Trailing window used for momentum, in bars.
pub const MOMENTUM_LOOKBACK: usize = 20;

/// Return over the last `lookback` bars: `(close[last] - close[last-lookback]) / close[last-lookback]`.
///
/// `None` when there are not enough bars, the base close is not positive,
/// or the result is not finite.
pub fn trailing_return(bars: &[PriceBar], lookback: usize) -> Option<f64> {
    if bars.len() <= lookback {
        return None;
    }
    let last = bars[bars.len() - 1].close;
    let base = bars[bars.len() - 1 - lookback].close;
    if base.is_nan() || base <= 0.0 {
        return None;
    }
    let ret = (last - base) / base;
    ret.is_finite().then_some(ret)
}

/// 20-bar trailing return, if computable.
pub fn momentum_return(bars: &[PriceBar]) -> Option<f64> {
    trailing_return(bars, MOMENTUM_LOOKBACK)
}

/// Momentum factor: the 20-bar return, or 0 when it cannot be computed.
pub fn momentum_factor(bars: &[PriceBar]) -> f64 {
    momentum_return(bars).unwrap_or(0.0)
}

// ---------------------------------------------------------------------------
// Fundamentals-based factors
// ---------------------------------------------------------------------------

/// Higher yield and lower multiples increase value.
pub fn value_factor(f: &Fundamentals) -> f64 {
    f.fcf_yield - f.pe / 100.0 - f.pb / 10.0 - f.ev_to_ebitda / 20.0
}

/// Profitability minus a leverage penalty.
pub fn quality_factor(f: &Fundamentals) -> f64 {
    f.roic / 10.0 + f.gross_margin / 50.0 - f.net_debt_to_ebitda / 5.0
}

// ---------------------------------------------------------------------------
// Options
// ---------------------------------------------------------------------------

/// Options positioning factor. Absent snapshot scores 0.
pub fn options_factor(options: Option<&OptionsSnapshot>) -> f64 {
    let Some(o) = options else {
        return 0.0;
    };
    (1.0 - o.put_call_ratio)
        + iv_component(o.implied_vol_rank)
        + (o.call_vol_to_avg_20d - 1.0)
        + o.near_otm_call_oi_delta
}

/// Peaks at an IV rank of 40; out-of-range (or NaN) ranks contribute 0.
fn iv_component(rank: f64) -> f64 {
    if (0.0..=100.0).contains(&rank) {
        1.0 - (rank - 40.0).abs() / 60.0
    } else {
        0.0
    }
}

// ---------------------------------------------------------------------------
// Macro
// ---------------------------------------------------------------------------

/// How a sector responds to the macro regime.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SectorClass {
    Cyclical,
    Defensive,
    Neutral,
}

impl SectorClass {
    /// Classify a free-form sector label (trimmed, case-insensitive).
    pub fn classify(sector: &str) -> Self {
        match sector.trim().to_lowercase().as_str() {
            "energy" | "materials" | "industrials" => SectorClass::Cyclical,
            "utilities" | "staples" | "consumer staples" => SectorClass::Defensive,
            _ => SectorClass::Neutral,
        }
    }
}

/// Regime tilt before it is applied to a sector.
pub fn macro_tilt(m: &MacroSnapshot) -> f64 {
    let mut tilt = 0.0;
    if m.pmi > 50.0 {
        tilt += 0.2;
    }
    if m.wti > 60.0 {
        tilt += 0.1;
    }
    if m.spread_2s10s > 0.0 {
        tilt += 0.1;
    } else {
        tilt -= 0.05;
    }
    if m.cpi_yoy < 3.0 {
        tilt += 0.05;
    } else {
        tilt -= 0.05;
    }
    tilt
}

/// Macro factor for an instrument in `sector`.
pub fn macro_factor(sector: &str, m: &MacroSnapshot) -> f64 {
    match SectorClass::classify(sector) {
        SectorClass::Cyclical => macro_tilt(m),
        SectorClass::Defensive => -macro_tilt(m) / 2.0,
        SectorClass::Neutral => 0.0,
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
