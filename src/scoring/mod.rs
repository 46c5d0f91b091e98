//! Scoring: raw factor formulas, the weighted scorer, and the screen filter.

pub mod factors;
pub mod filter;

use crate::types::{
    FactorValues, Fundamentals, MacroSnapshot, OptionsSnapshot, PriceBar, Score,
    ScoreExplanation, ScoringWeights, ScreenResult,
};

/// Everything the scorer reads for one instrument.
#[derive(Debug, Clone, Copy)]
pub struct ScoreInputs<'a> {
    pub fundamentals: &'a Fundamentals,
    pub prices: &'a [PriceBar],
    pub options: Option<&'a OptionsSnapshot>,
    pub macro_snapshot: &'a MacroSnapshot,
}

/// Compute the five unweighted factors.
///
/// `Scorer::compute` and `Scorer::explain` both go through here, so they can
/// never disagree.
pub fn raw_factors(inputs: &ScoreInputs<'_>) -> FactorValues {
    FactorValues {
        value: factors::value_factor(inputs.fundamentals),
        quality: factors::quality_factor(inputs.fundamentals),
        momentum: factors::momentum_factor(inputs.prices),
        options: factors::options_factor(inputs.options),
        macro_tilt: factors::macro_factor(&inputs.fundamentals.sector, inputs.macro_snapshot),
    }
}

/// Deterministic, side-effect-free five-factor scorer.
pub struct Scorer;

impl Scorer {
    pub fn compute(inputs: &ScoreInputs<'_>, weights: &ScoringWeights) -> Score {
        raw_factors(inputs).weighted(weights)
    }

    /// Raw components alongside the weighted result.
    pub fn explain(inputs: &ScoreInputs<'_>, weights: &ScoringWeights) -> ScoreExplanation {
        let raw = raw_factors(inputs);
        ScoreExplanation {
            raw,
            weights: *weights,
            weighted: raw.weighted(weights),
        }
    }
}

// ---------------------------------------------------------------------------
// ScreenResult helpers
// ---------------------------------------------------------------------------

impl ScreenResult {
    /// The captured inputs this result was scored from.
    pub fn inputs(&self) -> ScoreInputs<'_> {
        ScoreInputs {
            fundamentals: &self.fundamentals,
            prices: &self.prices,
            options: self.options.as_ref(),
            macro_snapshot: &self.macro_snapshot,
        }
    }

    /// Re-derive the raw (non-normalized) score from captured inputs,
    /// without refetching anything.
    pub fn explain(&self, weights: &ScoringWeights) -> ScoreExplanation {
        Scorer::explain(&self.inputs(), weights)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
