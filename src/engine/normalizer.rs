//! Cross-sectional factor normalization.
//!
//! Re-scores Value, Quality and Momentum relative to the run's own universe
//! using z-scores, globally or per sector. Options and macro factors keep
//! their raw formulas. Must only run once every pipeline of the run has
//! finished: the statistics are defined over the complete result set.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tracing::debug;

use crate::scoring::factors::{macro_factor, momentum_factor, options_factor};
use crate::types::{FactorValues, ScoringWeights, ScreenResult};

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

/// Smallest sector that gets its own statistics.
pub const DEFAULT_MIN_GROUP_SIZE: usize = 5;

/// Z-scores are clamped to `[-Z_CLAMP, Z_CLAMP]`.
pub const Z_CLAMP: f64 = 3.0;

/// Standard deviations at or below this are treated as a constant feature.
const DEGENERATE_STD: f64 = 1e-12;

fn default_min_group_size() -> usize {
    DEFAULT_MIN_GROUP_SIZE
}

/// Which universe the statistics are computed over.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "scope", rename_all = "snake_case")]
pub enum NormalizationMode {
    /// One set of statistics over the whole run.
    Global,
    /// Per-sector statistics for sectors with at least `min_group_size`
    /// members; smaller sectors fall back to global statistics.
    /// Momentum is always normalized globally.
    Sector {
        #[serde(default = "default_min_group_size")]
        min_group_size: usize,
    },
}

impl NormalizationMode {
    pub fn sector() -> Self {
        NormalizationMode::Sector {
            min_group_size: DEFAULT_MIN_GROUP_SIZE,
        }
    }
}

// ---------------------------------------------------------------------------
// Features
// ---------------------------------------------------------------------------

const PE: usize = 0;
const EV_TO_EBITDA: usize = 1;
const FCF_YIELD: usize = 2;
const PB: usize = 3;
const ROIC: usize = 4;
const GROSS_MARGIN: usize = 5;
const NET_DEBT_TO_EBITDA: usize = 6;
const MOMENTUM: usize = 7;
const FEATURE_COUNT: usize = 8;

type Features = [f64; FEATURE_COUNT];

fn extract(result: &ScreenResult) -> Features {
    let f = &result.fundamentals;
    let mut out = [0.0; FEATURE_COUNT];
    out[PE] = f.pe;
    out[EV_TO_EBITDA] = f.ev_to_ebitda;
    out[FCF_YIELD] = f.fcf_yield;
    out[PB] = f.pb;
    out[ROIC] = f.roic;
    out[GROSS_MARGIN] = f.gross_margin;
    out[NET_DEBT_TO_EBITDA] = f.net_debt_to_ebitda;
    out[MOMENTUM] = momentum_factor(&result.prices);
    out
}

/// Population mean and standard deviation per feature.
#[derive(Debug, Clone, Copy, PartialEq)]
struct FeatureStats {
    mean: Features,
    std: Features,
}

impl FeatureStats {
    /// Statistics over the finite values of each feature (divide by N).
    fn compute<'a>(rows: impl Iterator<Item = &'a Features> + Clone) -> Self {
        let mut mean = [0.0; FEATURE_COUNT];
        let mut std = [0.0; FEATURE_COUNT];

        for i in 0..FEATURE_COUNT {
            let values: Vec<f64> = rows
                .clone()
                .map(|row| row[i])
                .filter(|v| v.is_finite())
                .collect();
            if values.is_empty() {
                continue;
            }
            let n = values.len() as f64;
            let m = values.iter().sum::<f64>() / n;
            let var = values.iter().map(|v| (v - m).powi(2)).sum::<f64>() / n;
            mean[i] = m;
            std[i] = var.sqrt();
        }

        Self { mean, std }
    }

    fn z(&self, features: &Features, i: usize) -> f64 {
        zscore(features[i], self.mean[i], self.std[i])
    }
}

/// Clamped z-score; exactly 0 for a constant feature.
fn zscore(value: f64, mean: f64, std: f64) -> f64 {
    if std <= DEGENERATE_STD {
        return 0.0;
    }
    ((value - mean) / std).clamp(-Z_CLAMP, Z_CLAMP)
}

/// Mean of the finite inputs, or 0 if there are none.
fn average(values: &[f64]) -> f64 {
    let finite: Vec<f64> = values.iter().copied().filter(|v| v.is_finite()).collect();
    if finite.is_empty() {
        0.0
    } else {
        finite.iter().sum::<f64>() / finite.len() as f64
    }
}

fn clamp_factor(v: f64) -> f64 {
    if v.is_finite() {
        v.clamp(-Z_CLAMP, Z_CLAMP)
    } else {
        0.0
    }
}

fn sector_key(sector: &str) -> String {
    sector.trim().to_lowercase()
}

// ---------------------------------------------------------------------------
// Normalization pass
// ---------------------------------------------------------------------------

/// Re-score `results` cross-sectionally and re-weight with `weights`.
///
/// Returns the input unchanged when there is at most one result. Every field
/// except `score` is carried through.
pub fn normalize(
    results: &[ScreenResult],
    mode: &NormalizationMode,
    weights: &ScoringWeights,
) -> Vec<ScreenResult> {
    if results.len() <= 1 {
        return results.to_vec();
    }

    let features: Vec<Features> = results.iter().map(extract).collect();
    let global = FeatureStats::compute(features.iter());

    let sector_stats: HashMap<String, FeatureStats> = match mode {
        NormalizationMode::Global => HashMap::new(),
        NormalizationMode::Sector { min_group_size } => {
            let mut groups: HashMap<String, Vec<&Features>> = HashMap::new();
            for (result, row) in results.iter().zip(&features) {
                groups
                    .entry(sector_key(&result.fundamentals.sector))
                    .or_default()
                    .push(row);
            }
            groups
                .into_iter()
                .filter(|(sector, rows)| {
                    let eligible = rows.len() >= *min_group_size;
                    debug!(
                        sector = %sector,
                        members = rows.len(),
                        eligible,
                        "Sector group"
                    );
                    eligible
                })
                .map(|(sector, rows)| (sector, FeatureStats::compute(rows.into_iter())))
                .collect()
        }
    };

    let normalized: Vec<ScreenResult> = results
        .iter()
        .zip(&features)
        .map(|(result, row)| {
            let stats = sector_stats
                .get(&sector_key(&result.fundamentals.sector))
                .unwrap_or(&global);

            let value = average(&[
                stats.z(row, FCF_YIELD),
                -stats.z(row, PE),
                -stats.z(row, EV_TO_EBITDA),
                -stats.z(row, PB),
            ]);
            let quality = average(&[
                stats.z(row, ROIC),
                stats.z(row, GROSS_MARGIN),
                -stats.z(row, NET_DEBT_TO_EBITDA),
            ]);
            let momentum = global.z(row, MOMENTUM);

            let raw = FactorValues {
                value: clamp_factor(value),
                quality: clamp_factor(quality),
                momentum: clamp_factor(momentum),
                options: options_factor(result.options.as_ref()),
                macro_tilt: macro_factor(&result.fundamentals.sector, &result.macro_snapshot),
            };

            ScreenResult {
                score: raw.weighted(weights),
                ..result.clone()
            }
        })
        .collect();

    debug!(
        results = normalized.len(),
        sector_groups = sector_stats.len(),
        ?mode,
        "Normalization complete"
    );

    normalized
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
