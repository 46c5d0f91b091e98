//! Screening orchestrator.
//!
//! Runs one pipeline per requested ticker concurrently behind a semaphore
//! gate, classifies every outcome into a [`Disposition`], reports progress,
//! and optionally hands the collected results to the normalizer.
//!
//! Pipeline, per ticker:
//! 1. blank input is skipped, otherwise the symbol is normalised
//! 2. fundamentals (error or absence ends the pipeline)
//! 3. price history for the request window (error or empty ends it)
//! 4. filter, before any options call
//! 5. options, best effort
//! 6. score against the run-wide macro snapshot

use std::any::Any;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::NaiveDate;
use futures::FutureExt;
use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, Semaphore};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::normalizer::{self, NormalizationMode};
use crate::data::Providers;
use crate::scoring::filter::FilterSpec;
use crate::scoring::{ScoreInputs, Scorer};
use crate::types::{
    normalize_ticker, Disposition, MacroSnapshot, ProgressEvent, ScoringWeights, ScreenError,
    ScreenResult, TickerDisposition,
};

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

/// Upper bound on the default pipeline concurrency.
pub const MAX_DEFAULT_CONCURRENCY: usize = 8;

/// Pause after each fundamentals call when the source is rate-limit sensitive.
pub const DEFAULT_RATE_LIMITED_DELAY: Duration = Duration::from_millis(1000);

/// Receives one [`ProgressEvent`] per finished pipeline.
pub type ProgressSender = mpsc::UnboundedSender<ProgressEvent>;

/// `min(available cores, 8)`.
pub fn default_concurrency() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1)
        .min(MAX_DEFAULT_CONCURRENCY)
}

#[derive(Debug, Clone, PartialEq)]
pub struct EngineConfig {
    /// Overrides [`default_concurrency`]. Ignored for rate-limit sensitive
    /// sources, which always run one pipeline at a time.
    pub max_concurrency: Option<usize>,
    pub rate_limited_delay: Duration,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_concurrency: None,
            rate_limited_delay: DEFAULT_RATE_LIMITED_DELAY,
        }
    }
}

/// What a cancelled run returns.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CancelPolicy {
    /// `Err(ScreenError::Cancelled)`.
    #[default]
    Propagate,
    /// A report flagged `cancelled`. Pipelines that finished keep their
    /// outcome; the rest are recorded as `Failed("cancelled")`.
    ReturnPartial,
}

// ---------------------------------------------------------------------------
// Request
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq)]
pub struct ScreenRequest {
    /// Raw symbols as supplied; duplicates are processed independently.
    pub tickers: Vec<String>,
    pub start: NaiveDate,
    pub end: NaiveDate,
    pub weights: ScoringWeights,
    pub filter: Option<FilterSpec>,
    pub normalization: Option<NormalizationMode>,
    pub on_cancel: CancelPolicy,
}

impl ScreenRequest {
    pub fn new<I, S>(tickers: I, start: NaiveDate, end: NaiveDate) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            tickers: tickers.into_iter().map(Into::into).collect(),
            start,
            end,
            weights: ScoringWeights::default(),
            filter: None,
            normalization: None,
            on_cancel: CancelPolicy::default(),
        }
    }

    pub fn with_weights(mut self, weights: ScoringWeights) -> Self {
        self.weights = weights;
        self
    }

    pub fn with_filter(mut self, filter: FilterSpec) -> Self {
        self.filter = Some(filter);
        self
    }

    pub fn with_normalization(mut self, mode: NormalizationMode) -> Self {
        self.normalization = Some(mode);
        self
    }

    pub fn with_cancel_policy(mut self, policy: CancelPolicy) -> Self {
        self.on_cancel = policy;
        self
    }

    /// Reject requests that cannot produce a meaningful run.
    pub fn validate(&self) -> Result<(), ScreenError> {
        if self.tickers.is_empty() {
            return Err(ScreenError::EmptyUniverse);
        }
        if self.end < self.start {
            return Err(ScreenError::InvalidDateRange {
                start: self.start,
                end: self.end,
            });
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Report
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DispositionCounts {
    pub included: usize,
    pub skipped: usize,
    pub failed: usize,
}

impl DispositionCounts {
    pub fn total(&self) -> usize {
        self.included + self.skipped + self.failed
    }
}

/// Outcome of one screening run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScreenReport {
    pub run_id: Uuid,
    /// Raw-scored results, in request order.
    pub results: Vec<ScreenResult>,
    /// Present only when normalization was requested and the run completed.
    pub normalized: Option<Vec<ScreenResult>>,
    /// One entry per requested ticker, in request order.
    pub dispositions: Vec<TickerDisposition>,
    pub cancelled: bool,
    pub elapsed_ms: u64,
}

impl ScreenReport {
    /// The normalized set when there is one, otherwise the raw set.
    pub fn final_results(&self) -> &[ScreenResult] {
        self.normalized.as_deref().unwrap_or(&self.results)
    }

    /// Final results by total score, best first. Ties break on ticker.
    pub fn ranked(&self) -> Vec<&ScreenResult> {
        let mut ranked: Vec<&ScreenResult> = self.final_results().iter().collect();
        ranked.sort_by(|a, b| {
            b.score
                .total()
                .total_cmp(&a.score.total())
                .then_with(|| a.ticker.cmp(&b.ticker))
        });
        ranked
    }

    pub fn top(&self, n: usize) -> Vec<&ScreenResult> {
        let mut ranked = self.ranked();
        ranked.truncate(n);
        ranked
    }

    /// First recorded disposition for `ticker` (normalised form).
    pub fn disposition_of(&self, ticker: &str) -> Option<&Disposition> {
        self.dispositions
            .iter()
            .find(|d| d.ticker == ticker)
            .map(|d| &d.disposition)
    }

    pub fn counts(&self) -> DispositionCounts {
        let mut counts = DispositionCounts::default();
        for d in &self.dispositions {
            if d.disposition.is_included() {
                counts.included += 1;
            } else if d.disposition.is_failure() {
                counts.failed += 1;
            } else {
                counts.skipped += 1;
            }
        }
        counts
    }

    pub fn summary(&self) -> String {
        let c = self.counts();
        format!(
            "run {}: {} included, {} skipped, {} failed in {}ms{}{}",
            self.run_id,
            c.included,
            c.skipped,
            c.failed,
            self.elapsed_ms,
            if self.normalized.is_some() { " (normalized)" } else { "" },
            if self.cancelled { " [cancelled]" } else { "" },
        )
    }
}

// ---------------------------------------------------------------------------
// Pipeline
// ---------------------------------------------------------------------------

/// The run was cancelled while this pipeline was waiting on something.
struct Interrupted;

/// What a finished pipeline hands to the aggregator.
struct Completion {
    ticker: String,
    disposition: Disposition,
    result: Option<ScreenResult>,
    interrupted: bool,
}

impl Completion {
    fn stopped(ticker: impl Into<String>, disposition: Disposition) -> Self {
        Self {
            ticker: ticker.into(),
            disposition,
            result: None,
            interrupted: false,
        }
    }

    /// Stand-in for a pipeline that never reached an outcome of its own.
    fn cancelled(raw: &str) -> Self {
        let ticker = normalize_ticker(raw).unwrap_or_else(|| raw.to_string());
        Self {
            interrupted: true,
            ..Self::stopped(ticker, Disposition::cancelled())
        }
    }
}

/// Per-run state shared read-only by every pipeline.
struct Pipeline {
    providers: Providers,
    macro_snapshot: Arc<MacroSnapshot>,
    start: NaiveDate,
    end: NaiveDate,
    weights: ScoringWeights,
    filter: Option<FilterSpec>,
    pacing: Option<Duration>,
    cancel: CancellationToken,
}

impl Pipeline {
    /// Race `fut` against cancellation.
    async fn guard<F: Future>(&self, fut: F) -> Result<F::Output, Interrupted> {
        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => Err(Interrupted),
            out = fut => Ok(out),
        }
    }

    async fn run(&self, raw: &str) -> Result<Completion, Interrupted> {
        let Some(ticker) = normalize_ticker(raw) else {
            return Ok(Completion::stopped(raw, Disposition::SkippedBlank));
        };

        let fetched = self
            .guard(self.providers.fundamentals.fetch_fundamentals(&ticker))
            .await?;
        if let Some(delay) = self.pacing {
            self.guard(tokio::time::sleep(delay)).await?;
        }
        let fundamentals = match fetched {
            Ok(Some(f)) => f,
            Ok(None) => {
                debug!(ticker = %ticker, "No fundamentals");
                return Ok(Completion::stopped(ticker, Disposition::SkippedNoFundamentals));
            }
            Err(e) => {
                warn!(ticker = %ticker, error = %e, "Fundamentals fetch failed");
                return Ok(Completion::stopped(ticker, Disposition::FailedFundamentals));
            }
        };

        let prices = match self
            .guard(self.providers.prices.fetch_prices(&ticker, self.start, self.end))
            .await?
        {
            Ok(bars) if bars.is_empty() => {
                debug!(ticker = %ticker, "No price history in range");
                return Ok(Completion::stopped(ticker, Disposition::SkippedNoPrices));
            }
            Ok(bars) => bars,
            Err(e) => {
                warn!(ticker = %ticker, error = %e, "Price history fetch failed");
                return Ok(Completion::stopped(ticker, Disposition::FailedPrices));
            }
        };

        if let Some(filter) = &self.filter {
            if !filter.matches(&fundamentals, &prices) {
                return Ok(Completion::stopped(ticker, Disposition::SkippedFilteredOut));
            }
        }

        let options = match self
            .guard(self.providers.options.fetch_options(&ticker))
            .await?
        {
            Ok(options) => options,
            Err(e) => {
                debug!(ticker = %ticker, error = %e, "Options unavailable, scoring without");
                None
            }
        };

        let macro_snapshot = *self.macro_snapshot;
        let score = Scorer::compute(
            &ScoreInputs {
                fundamentals: &fundamentals,
                prices: &prices,
                options: options.as_ref(),
                macro_snapshot: &macro_snapshot,
            },
            &self.weights,
        );

        Ok(Completion {
            ticker: ticker.clone(),
            disposition: Disposition::Included,
            result: Some(ScreenResult {
                ticker,
                fundamentals,
                prices,
                options,
                macro_snapshot,
                score,
            }),
            interrupted: false,
        })
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

fn millis(elapsed: Duration) -> u64 {
    u64::try_from(elapsed.as_millis()).unwrap_or(u64::MAX)
}

// ---------------------------------------------------------------------------
// Screener
// ---------------------------------------------------------------------------

pub struct Screener {
    providers: Providers,
    config: EngineConfig,
}

impl Screener {
    pub fn new(providers: Providers, config: EngineConfig) -> Self {
        Self { providers, config }
    }

    /// Number of pipelines allowed in flight at once.
    pub fn concurrency_limit(&self) -> usize {
        if self.providers.fundamentals.rate_limit_sensitive() {
            return 1;
        }
        self.config
            .max_concurrency
            .unwrap_or_else(default_concurrency)
            .max(1)
    }

    /// Screen `request` to completion.
    pub async fn screen(
        &self,
        request: &ScreenRequest,
        progress: Option<ProgressSender>,
    ) -> Result<ScreenReport, ScreenError> {
        self.screen_until(request, progress, CancellationToken::new())
            .await
    }

    /// Screen `request`, stopping early once `cancel` fires.
    ///
    /// Pipelines that already finished keep their outcome; the rest stop at
    /// their next provider call and are recorded as `Failed("cancelled")`,
    /// so every ticker still gets exactly one disposition and one progress
    /// event. Returns only after every pipeline has stopped.
    pub async fn screen_until(
        &self,
        request: &ScreenRequest,
        progress: Option<ProgressSender>,
        cancel: CancellationToken,
    ) -> Result<ScreenReport, ScreenError> {
        request.validate()?;

        let started = Instant::now();
        let run_id = Uuid::new_v4();
        let total = request.tickers.len();
        let rate_limited = self.providers.fundamentals.rate_limit_sensitive();
        let concurrency = self.concurrency_limit();

        // Pipelines stop if this future is dropped mid-run.
        let run_token = cancel.child_token();
        let _stop_on_drop = run_token.clone().drop_guard();

        info!(
            %run_id,
            tickers = total,
            concurrency,
            rate_limited,
            normalization = ?request.normalization,
            "Screen started"
        );

        let macro_snapshot = tokio::select! {
            biased;
            _ = run_token.cancelled() => None,
            fetched = self.providers.macro_data.fetch_macro() => Some(match fetched {
                Ok(snapshot) => {
                    debug!(%snapshot, "Macro snapshot fetched");
                    snapshot
                }
                Err(e) => {
                    warn!(error = %e, "Macro fetch failed, using neutral snapshot");
                    MacroSnapshot::neutral()
                }
            }),
        };

        let mut results: Vec<(usize, ScreenResult)> = Vec::new();
        let mut dispositions: Vec<(usize, TickerDisposition)> = Vec::with_capacity(total);
        let mut completed = 0usize;
        let mut interrupted = 0usize;
        let (tx, mut rx) = mpsc::unbounded_channel::<(usize, Completion)>();

        match macro_snapshot {
            Some(macro_snapshot) => {
                let pipeline = Arc::new(Pipeline {
                    providers: self.providers.clone(),
                    macro_snapshot: Arc::new(macro_snapshot),
                    start: request.start,
                    end: request.end,
                    weights: request.weights,
                    filter: request.filter.clone().filter(|f| !f.is_empty()),
                    pacing: rate_limited.then_some(self.config.rate_limited_delay),
                    cancel: run_token.clone(),
                });
                let gate = Arc::new(Semaphore::new(concurrency));

                for (index, raw) in request.tickers.iter().cloned().enumerate() {
                    let pipeline = Arc::clone(&pipeline);
                    let gate = Arc::clone(&gate);
                    let tx = tx.clone();

                    tokio::spawn(async move {
                        let permit = tokio::select! {
                            biased;
                            _ = pipeline.cancel.cancelled() => None,
                            permit = gate.acquire_owned() => permit.ok(),
                        };
                        let Some(permit) = permit else {
                            let _ = tx.send((index, Completion::cancelled(&raw)));
                            return;
                        };

                        let outcome = AssertUnwindSafe(pipeline.run(&raw)).catch_unwind().await;
                        drop(permit);

                        let completion = match outcome {
                            Ok(Ok(completion)) => completion,
                            Ok(Err(Interrupted)) => Completion::cancelled(&raw),
                            Err(panic) => {
                                let reason = panic_message(panic.as_ref());
                                let ticker = normalize_ticker(&raw).unwrap_or(raw);
                                warn!(ticker = %ticker, reason = %reason, "Pipeline panicked");
                                Completion::stopped(ticker, Disposition::Failed(reason))
                            }
                        };
                        let _ = tx.send((index, completion));
                    });
                }
            }
            None => {
                // Cancelled before any pipeline could start.
                for (index, raw) in request.tickers.iter().enumerate() {
                    let _ = tx.send((index, Completion::cancelled(raw)));
                }
            }
        }
        drop(tx);

        // Single consumer: the only place outcomes are recorded.
        while let Some((index, completion)) = rx.recv().await {
            completed += 1;
            if completion.interrupted {
                interrupted += 1;
            }
            debug!(
                ticker = %completion.ticker,
                completed,
                total,
                disposition = %completion.disposition,
                "Ticker finished"
            );
            if let Some(tx) = &progress {
                let _ = tx.send(ProgressEvent {
                    ticker: completion.ticker.clone(),
                    completed,
                    total,
                    disposition: completion.disposition.clone(),
                });
            }
            dispositions.push((
                index,
                TickerDisposition {
                    ticker: completion.ticker,
                    disposition: completion.disposition,
                },
            ));
            if let Some(result) = completion.result {
                results.push((index, result));
            }
        }

        let cancelled = interrupted > 0;
        if cancelled {
            let finished = completed - interrupted;
            warn!(%run_id, finished, total, policy = ?request.on_cancel, "Screen cancelled");
            if request.on_cancel == CancelPolicy::Propagate {
                return Err(ScreenError::Cancelled {
                    completed: finished,
                    total,
                });
            }
        }

        results.sort_by_key(|(index, _)| *index);
        dispositions.sort_by_key(|(index, _)| *index);
        let results: Vec<ScreenResult> = results.into_iter().map(|(_, r)| r).collect();
        let dispositions: Vec<TickerDisposition> =
            dispositions.into_iter().map(|(_, d)| d).collect();

        let normalized = match request.normalization {
            Some(mode) if !cancelled => {
                Some(normalizer::normalize(&results, &mode, &request.weights))
            }
            Some(_) => {
                debug!("Skipping normalization for a partial run");
                None
            }
            None => None,
        };

        let report = ScreenReport {
            run_id,
            results,
            normalized,
            dispositions,
            cancelled,
            elapsed_ms: millis(started.elapsed()),
        };
        info!(summary = %report.summary(), "Screen finished");

        Ok(report)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
