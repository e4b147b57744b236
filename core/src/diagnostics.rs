//! Run diagnostics: every non-fatal condition the pipeline recovers from.
//!
//! RULE: per-unit failures never abort a run. They are recorded here
//! and the affected geography-periods come out as `no_data`.
//! Only structural errors (`IndexError`) stop the pipeline.

use crate::{
    bmn_regression::RegressionSummary,
    pair_extractor::ExtractionStats,
    period::Window,
    types::{GeographyId, Period, PropertyId, RunId, SupertractId, TractId},
};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Every recoverable condition raised during a run.
/// Variants are only ever appended.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Diagnostic {
    // ── Pair extractor ─────────────────────────────
    OutlierPairExcluded {
        property_id: PropertyId,
        first_period: Period,
        second_period: Period,
        log_price_ratio: f64,
    },

    // ── Supertract builder ─────────────────────────
    MergeExhaustion {
        geography: GeographyId,
        window: Window,
        period: Period,
        tract_ids: Vec<TractId>,
        half_pairs: u32,
    },
    InsufficientSample {
        geography: GeographyId,
        window: Window,
        supertract_id: SupertractId,
        period: Period,
        half_pairs: u32,
    },

    // ── Regression engine ──────────────────────────
    SingularDesignMatrix {
        geography: GeographyId,
        window: Window,
        supertract_id: SupertractId,
        rank: usize,
        columns: usize,
    },
    UnidentifiedPeriod {
        geography: GeographyId,
        window: Window,
        supertract_id: SupertractId,
        period: Period,
    },

    // ── Chainer / rebaser ──────────────────────────
    ChainBreak {
        geography: GeographyId,
        window: Window,
    },
    BasePeriodUnavailable {
        geography: GeographyId,
        base_period: Period,
    },

    // ── Orchestration ──────────────────────────────
    TaskCancelled {
        geography: GeographyId,
        window: Window,
        supertract_id: SupertractId,
    },
}

impl Diagnostic {
    /// Stable name of the variant, matching its serde tag.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::OutlierPairExcluded { .. }   => "outlier_pair_excluded",
            Self::MergeExhaustion { .. }       => "merge_exhaustion",
            Self::InsufficientSample { .. }    => "insufficient_sample",
            Self::SingularDesignMatrix { .. }  => "singular_design_matrix",
            Self::UnidentifiedPeriod { .. }    => "unidentified_period",
            Self::ChainBreak { .. }            => "chain_break",
            Self::BasePeriodUnavailable { .. } => "base_period_unavailable",
            Self::TaskCancelled { .. }         => "task_cancelled",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DiagnosticEntry {
    pub stage:      String,
    pub kind:       String,
    pub diagnostic: Diagnostic,
}

/// Composition of one supertract, as exported per window.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SupertractRecord {
    pub geography:            GeographyId,
    pub window:               Window,
    pub supertract_id:        SupertractId,
    pub tract_ids:            Vec<TractId>,
    pub half_pairs:           BTreeMap<Period, u32>,
    pub periods:              Vec<Period>,
    pub insufficient_periods: Vec<Period>,
}

/// Everything the export collaborator needs to explain a run.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct DiagnosticsBundle {
    pub run_id:      RunId,
    pub extraction:  ExtractionStats,
    pub entries:     Vec<DiagnosticEntry>,
    pub supertracts: Vec<SupertractRecord>,
    pub regressions: Vec<RegressionRecord>,
}

/// Regression fit summary tagged with where it ran.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RegressionRecord {
    pub geography: GeographyId,
    pub window:    Window,
    pub summary:   RegressionSummary,
}

impl DiagnosticsBundle {
    pub fn new(run_id: RunId) -> Self {
        Self { run_id, ..Self::default() }
    }

    pub fn record(&mut self, stage: &str, diagnostic: Diagnostic) {
        log::debug!("run={} stage={stage} diagnostic={}", self.run_id, diagnostic.kind());
        self.entries.push(DiagnosticEntry {
            stage:      stage.to_string(),
            kind:       diagnostic.kind().to_string(),
            diagnostic,
        });
    }

    pub fn record_all(&mut self, stage: &str, diagnostics: impl IntoIterator<Item = Diagnostic>) {
        for diagnostic in diagnostics {
            self.record(stage, diagnostic);
        }
    }

    pub fn count(&self, kind: &str) -> usize {
        self.entries.iter().filter(|e| e.kind == kind).count()
    }

    pub fn of_kind<'a>(&'a self, kind: &'a str) -> impl Iterator<Item = &'a Diagnostic> + 'a {
        self.entries
            .iter()
            .filter(move |e| e.kind == kind)
            .map(|e| &e.diagnostic)
    }

    pub fn to_json(&self) -> crate::error::IndexResult<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }
}
