//! The index pipeline: wires the five stages together.
//!
//! EXECUTION ORDER (fixed, documented, never reordered):
//!   0. Validate config; check every transaction's tract exists (fatal).
//!   1. Pair extractor       : once per run.
//!   2. Supertract builder   : per geography, per window.
//!   3. BMN regression       : one independent task per supertract,
//!                             fanned out on rayon workers.
//!   4. Aggregator           : BARRIER: waits for every task of the window.
//!   5. Chainer / rebaser    : BARRIER: waits for every window of the
//!                             geography.
//!
//! RULES:
//!   - Data flows strictly forward. No stage re-enters an earlier one.
//!   - Regression tasks share nothing mutable.
//!   - Only structural errors return `Err`. Everything else is a
//!     diagnostic plus `no_data` in the output.

use crate::{
    aggregator::{self, aggregate_window, WeightInputs},
    bmn_regression::{self, regress, RegressionOutput},
    chainer::{self, chain_windows, rebase},
    config::RunConfig,
    diagnostics::{Diagnostic, DiagnosticsBundle, RegressionRecord},
    error::{IndexError, IndexResult},
    geography::{GeographyGraph, Region, TractIdx},
    pair_extractor::{self, extract_pairs, HalfPairCounts, RepeatSalePair, Transaction},
    period::{rolling_windows, Window},
    series::IndexSeries,
    supertract_builder::{self, build_supertracts, Supertract},
    types::{GeographyId, Period, RunId, SupertractId},
};
use rayon::prelude::*;
use serde::Serialize;
use std::collections::{BTreeMap, HashMap};
use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};

/// Shared cancellation switch owned by the orchestration layer.
///
/// Once set, regression tasks that have not started are skipped and their
/// geography-periods come out as `no_data`.
#[derive(Debug, Clone, Default)]
pub struct CancelFlag(Arc<AtomicBool>);

impl CancelFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct PipelineOutput {
    pub run_id:      RunId,
    pub series:      BTreeMap<GeographyId, IndexSeries>,
    pub diagnostics: DiagnosticsBundle,
}

enum TaskOutcome {
    Done(IndexResult<RegressionOutput>),
    Cancelled,
}

struct RegressionTask<'a> {
    supertract: &'a Supertract,
    pairs:      Vec<&'a RepeatSalePair>,
}

pub struct IndexPipeline {
    config: RunConfig,
    graph:  GeographyGraph,
    cancel: CancelFlag,
}

impl IndexPipeline {
    pub fn new(config: RunConfig, graph: GeographyGraph) -> Self {
        Self {
            config,
            graph,
            cancel: CancelFlag::new(),
        }
    }

    pub fn with_cancel(mut self, cancel: CancelFlag) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn cancel_flag(&self) -> CancelFlag {
        self.cancel.clone()
    }

    pub fn config(&self) -> &RunConfig {
        &self.config
    }

    pub fn graph(&self) -> &GeographyGraph {
        &self.graph
    }

    /// The period every output series is rebased to.
    pub fn base_period(&self) -> Period {
        self.config.frequency.first_period_of_year(self.config.base_year)
    }

    /// Run every stage for the requested geographies.
    pub fn run(&self, run_id: RunId, transactions: &[Transaction], regions: &[Region]) -> IndexResult<PipelineOutput> {
        self.config.validate()?;
        self.graph.check_transactions(transactions)?;
        log::info!(
            "run={run_id} start: transactions={} regions={}",
            transactions.len(),
            regions.len()
        );

        let mut diagnostics = DiagnosticsBundle::new(run_id.clone());

        // ── 1. Pairs ───────────────────────────────────────────────────
        let extraction = extract_pairs(transactions, &self.config);
        diagnostics.extraction = extraction.stats.clone();
        diagnostics.record_all(pair_extractor::STAGE, extraction.diagnostics);

        let windows = match extraction.half_pairs.period_range() {
            Some((first, last)) => rolling_windows(
                first,
                last,
                self.config.window_length,
                self.config.effective_window_step(),
            ),
            None => Vec::new(),
        };

        let mut by_tract: HashMap<&str, Vec<&RepeatSalePair>> = HashMap::new();
        for pair in &extraction.pairs {
            by_tract.entry(pair.tract_id.as_str()).or_default().push(pair);
        }

        // ── 2–5. Per geography ─────────────────────────────────────────
        let mut series = BTreeMap::new();
        for region in regions {
            let region_series = self.run_region(region, &windows, &by_tract, &mut diagnostics)?;
            series.insert(region.id.clone(), region_series);
        }

        log::info!(
            "run={run_id} done: pairs={} geographies={} diagnostics={}",
            extraction.stats.pairs,
            series.len(),
            diagnostics.entries.len()
        );
        Ok(PipelineOutput { run_id, series, diagnostics })
    }

    fn run_region(
        &self,
        region: &Region,
        windows: &[Window],
        by_tract: &HashMap<&str, Vec<&RepeatSalePair>>,
        diagnostics: &mut DiagnosticsBundle,
    ) -> IndexResult<IndexSeries> {
        let tracts = region
            .tract_ids
            .iter()
            .map(|id| {
                self.graph.idx(id).ok_or_else(|| {
                    IndexError::invalid_config(format!(
                        "region '{}' references unknown tract '{id}'",
                        region.id
                    ))
                })
            })
            .collect::<IndexResult<Vec<TractIdx>>>()?;

        let mut window_series = Vec::with_capacity(windows.len());
        for &window in windows {
            let series = self.run_window(region, &tracts, window, by_tract, diagnostics)?;
            window_series.push((window, series));
        }

        let frequency = self.config.frequency;
        let chained = chain_windows(&region.id, frequency, &window_series);
        diagnostics.record_all(chainer::STAGE, chained.diagnostics);

        let mut series = chained.series;
        if let Some(diagnostic) = rebase(&mut series, self.base_period()) {
            diagnostics.record(chainer::STAGE, diagnostic);
        }
        Ok(series)
    }

    fn run_window(
        &self,
        region: &Region,
        tracts: &[TractIdx],
        window: Window,
        by_tract: &HashMap<&str, Vec<&RepeatSalePair>>,
        diagnostics: &mut DiagnosticsBundle,
    ) -> IndexResult<IndexSeries> {
        let region_pairs = window_pairs(
            by_tract,
            tracts.iter().map(|&idx| self.graph.tract(idx).id.as_str()),
            window,
        );
        let counts = HalfPairCounts::from_pairs(region_pairs.iter().copied());

        // ── Supertracts ────────────────────────────────────────────────
        let plan = build_supertracts(&self.graph, &region.id, tracts, &counts, window, &self.config);
        diagnostics.record_all(supertract_builder::STAGE, plan.diagnostics.iter().cloned());
        diagnostics.supertracts.extend(plan.to_records());

        // ── Regressions (fork) ─────────────────────────────────────────
        let tasks: Vec<RegressionTask> = plan
            .supertracts
            .iter()
            .filter(|s| s.needs_regression())
            .map(|s| RegressionTask {
                supertract: s,
                pairs:      window_pairs(by_tract, s.members.iter().map(String::as_str), window),
            })
            .collect();

        let outcomes: Vec<TaskOutcome> = tasks
            .par_iter()
            .map(|task| {
                if self.cancel.is_cancelled() {
                    return TaskOutcome::Cancelled;
                }
                TaskOutcome::Done(regress(&task.supertract.id, window, &task.pairs, &self.config))
            })
            .collect();

        // ── Join ───────────────────────────────────────────────────────
        let mut outputs: BTreeMap<SupertractId, RegressionOutput> = BTreeMap::new();
        let mut inputs: BTreeMap<SupertractId, WeightInputs> = BTreeMap::new();
        for (task, outcome) in tasks.iter().zip(outcomes) {
            let id = task.supertract.id.clone();
            match outcome {
                TaskOutcome::Done(result) => {
                    let output = result?;
                    if output.is_singular() {
                        diagnostics.record(
                            bmn_regression::STAGE,
                            Diagnostic::SingularDesignMatrix {
                                geography:     region.id.clone(),
                                window,
                                supertract_id: id.clone(),
                                rank:          output.summary.rank,
                                columns:       output.summary.columns,
                            },
                        );
                    }
                    for &period in &output.summary.unidentified_periods {
                        diagnostics.record(
                            bmn_regression::STAGE,
                            Diagnostic::UnidentifiedPeriod {
                                geography:     region.id.clone(),
                                window,
                                supertract_id: id.clone(),
                                period,
                            },
                        );
                    }
                    diagnostics.regressions.push(RegressionRecord {
                        geography: region.id.clone(),
                        window,
                        summary:   output.summary.clone(),
                    });
                    inputs.insert(id.clone(), WeightInputs::new(task.supertract, &task.pairs, &self.graph));
                    outputs.insert(id, output);
                }
                TaskOutcome::Cancelled => {
                    diagnostics.record(
                        aggregator::STAGE,
                        Diagnostic::TaskCancelled {
                            geography:     region.id.clone(),
                            window,
                            supertract_id: id,
                        },
                    );
                }
            }
        }

        // ── Aggregate (barrier) ────────────────────────────────────────
        Ok(aggregate_window(
            &plan,
            &outputs,
            &inputs,
            &self.config.weighting_scheme,
            self.config.frequency,
        ))
    }
}

/// Pairs of the given tracts with both sales inside `window`.
fn window_pairs<'p, 'm>(
    by_tract: &HashMap<&str, Vec<&'p RepeatSalePair>>,
    tracts: impl IntoIterator<Item = &'m str>,
    window: Window,
) -> Vec<&'p RepeatSalePair> {
    tracts
        .into_iter()
        .filter_map(|t| by_tract.get(t))
        .flatten()
        .copied()
        .filter(|p| p.within(&window))
        .collect()
}
