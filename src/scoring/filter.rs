//! Pre-scoring screen filter.
//!
//! Runs after fundamentals and prices are known and before the (possibly
//! metered) options fetch, so filtered-out tickers never pay for it.

use serde::{Deserialize, Serialize};
use tracing::debug;

use super::factors::momentum_return;
use crate::types::{Fundamentals, PriceBar};

/// Independent optional constraints combined with AND.
///
/// An unset field imposes no restriction. Comparisons are inclusive.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FilterSpec {
    pub min_fcf_yield: Option<f64>,
    pub max_pe: Option<f64>,
    pub min_roic: Option<f64>,
    pub max_net_debt_to_ebitda: Option<f64>,
    /// Minimum 20-bar trailing return. Fails when momentum is not computable.
    pub min_momentum: Option<f64>,
}

impl FilterSpec {
    /// Whether every configured constraint holds for this instrument.
    pub fn matches(&self, fundamentals: &Fundamentals, prices: &[PriceBar]) -> bool {
        if let Some(min) = self.min_fcf_yield {
            if !(fundamentals.fcf_yield >= min) {
                debug!(fcf_yield = fundamentals.fcf_yield, min, "Filter: FCF yield too low");
                return false;
            }
        }

        if let Some(max) = self.max_pe {
            if !(fundamentals.pe <= max) {
                debug!(pe = fundamentals.pe, max, "Filter: P/E too high");
                return false;
            }
        }

        if let Some(min) = self.min_roic {
            if !(fundamentals.roic >= min) {
                debug!(roic = fundamentals.roic, min, "Filter: ROIC too low");
                return false;
            }
        }

        if let Some(max) = self.max_net_debt_to_ebitda {
            if !(fundamentals.net_debt_to_ebitda <= max) {
                debug!(
                    net_debt_to_ebitda = fundamentals.net_debt_to_ebitda,
                    max, "Filter: leverage too high"
                );
                return false;
            }
        }

        if let Some(min) = self.min_momentum {
            match momentum_return(prices) {
                Some(momentum) if momentum >= min => {}
                other => {
                    debug!(momentum = ?other, min, bars = prices.len(), "Filter: momentum check failed");
                    return false;
                }
            }
        }

        true
    }

    /// True when no constraint is set.
    pub fn is_empty(&self) -> bool {
        self == &FilterSpec::default()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
