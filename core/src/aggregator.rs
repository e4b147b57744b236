//! Aggregator: combines supertract series into one composite series per
//! higher-level geography.
//!
//! Regression output is on a log scale, so the composite is a weighted
//! arithmetic mean of `ln(level)`, re-exponentiated:
//!
//!   ln(agg) = Σ wᵢ·ln(levelᵢ) / Σ wᵢ
//!
//! RULES:
//!   - A period is aggregated only once every supertract covering it has
//!     a result or is definitively excluded (the caller's barrier).
//!   - Insufficient or missing supertracts drop out; weights renormalise
//!     over the rest.
//!   - No contributors means `no_data`. Nothing is fabricated.

use crate::{
    bmn_regression::{RegressionOutput, ResultStatus},
    error::{IndexError, IndexResult},
    geography::GeographyGraph,
    pair_extractor::RepeatSalePair,
    period::Frequency,
    series::{IndexSeries, IndexValue},
    supertract_builder::{Supertract, SupertractPlan},
    types::{Period, SupertractId},
};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

pub const STAGE: &str = "aggregator";

/// How supertracts are weighted against each other within a period.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(tag = "scheme", rename_all = "snake_case")]
pub enum WeightingScheme {
    /// Every supertract counts the same.
    #[default]
    Equal,
    /// Total sale value of the supertract's half-pairs in the period.
    Value,
    /// Housing units of the member tracts, or distinct properties sampled
    /// when any member lacks that metadata.
    UnitCount,
    /// Externally supplied weights keyed by supertract id. A supertract
    /// missing from the table falls back to the sum of its member tract
    /// ids' entries.
    Custom { weights: BTreeMap<String, f64> },
}

impl WeightingScheme {
    pub fn validate(&self) -> IndexResult<()> {
        if let Self::Custom { weights } = self {
            if let Some((id, w)) = weights.iter().find(|(_, w)| !(w.is_finite() && **w >= 0.0)) {
                return Err(IndexError::invalid_config(format!(
                    "custom weight for '{id}' must be finite and non-negative, got {w}"
                )));
            }
        }
        Ok(())
    }

    /// Weight of one supertract in one period.
    pub fn weight(&self, inputs: &WeightInputs, period: Period) -> f64 {
        match self {
            Self::Equal => 1.0,
            Self::Value => inputs.value_by_period.get(&period).copied().unwrap_or(0.0),
            Self::UnitCount => inputs
                .housing_units
                .map(|u| u as f64)
                .unwrap_or(inputs.distinct_properties as f64),
            Self::Custom { weights } => weights
                .get(&inputs.supertract_id)
                .copied()
                .unwrap_or_else(|| {
                    inputs
                        .members
                        .iter()
                        .filter_map(|t| weights.get(t))
                        .sum()
                }),
        }
    }
}

/// What the weighting schemes need to know about one supertract.
#[derive(Debug, Clone, PartialEq)]
pub struct WeightInputs {
    pub supertract_id:       SupertractId,
    pub members:             Vec<String>,
    /// Sum of sale prices of the supertract's half-pairs, per period.
    pub value_by_period:     BTreeMap<Period, f64>,
    pub distinct_properties: usize,
    /// Sum of member housing units, when every member has it.
    pub housing_units:       Option<u64>,
}

impl WeightInputs {
    pub fn new(supertract: &Supertract, pairs: &[&RepeatSalePair], graph: &GeographyGraph) -> Self {
        let mut value_by_period: BTreeMap<Period, f64> = BTreeMap::new();
        let mut properties = BTreeSet::new();
        for pair in pairs.iter().filter(|p| p.within(&supertract.window)) {
            *value_by_period.entry(pair.first_period).or_insert(0.0) += pair.first_price;
            *value_by_period.entry(pair.second_period).or_insert(0.0) += pair.second_price;
            properties.insert(pair.property_id.as_str());
        }

        let housing_units = supertract
            .members
            .iter()
            .map(|id| graph.idx(id).and_then(|idx| graph.tract(idx).housing_units))
            .sum::<Option<u64>>();

        Self {
            supertract_id: supertract.id.clone(),
            members: supertract.members.clone(),
            value_by_period,
            distinct_properties: properties.len(),
            housing_units,
        }
    }
}

/// One supertract's contribution to a period.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Contribution {
    pub level:          f64,
    pub weight:         f64,
    pub standard_error: Option<f64>,
    pub half_pairs:     u32,
}

/// Weighted log-mean of the contributions. Returns the composite level
/// and its log-scale standard error, or `None` for an empty set.
///
/// A set whose weights sum to zero is averaged with equal weights.
pub fn combine(contributions: &[Contribution]) -> Option<(f64, Option<f64>)> {
    if contributions.is_empty() {
        return None;
    }
    let total: f64 = contributions.iter().map(|c| c.weight).sum();
    let weights: Vec<f64> = if total > 0.0 {
        contributions.iter().map(|c| c.weight / total).collect()
    } else {
        log::warn!("aggregate: zero total weight over {} supertracts, using equal weights", contributions.len());
        vec![1.0 / contributions.len() as f64; contributions.len()]
    };

    let ln_level: f64 = contributions
        .iter()
        .zip(&weights)
        .map(|(c, w)| w * c.level.ln())
        .sum();

    let standard_error = contributions
        .iter()
        .zip(&weights)
        .map(|(c, w)| c.standard_error.map(|se| (w * se).powi(2)))
        .sum::<Option<f64>>()
        .map(f64::sqrt);

    Some((ln_level.exp(), standard_error))
}

/// Build the composite series of one geography for one window.
///
/// `outputs` holds the regression output of every supertract that ran;
/// a supertract absent from it (cancelled or failed) is treated as
/// missing for every period it covers.
pub fn aggregate_window(
    plan: &SupertractPlan,
    outputs: &BTreeMap<SupertractId, RegressionOutput>,
    inputs: &BTreeMap<SupertractId, WeightInputs>,
    scheme: &WeightingScheme,
    frequency: Frequency,
) -> IndexSeries {
    let geography = plan.geography.as_str();
    let mut series = IndexSeries::new(geography, frequency);

    for period in plan.window.periods() {
        let contributions: Vec<Contribution> = plan
            .covering(period)
            .filter(|s| s.is_sufficient_at(period))
            .filter_map(|s| {
                let result = outputs.get(&s.id)?.result_at(period)?;
                if result.status != ResultStatus::Ok {
                    return None;
                }
                let weight = inputs.get(&s.id).map_or(1.0, |i| scheme.weight(i, period));
                Some(Contribution {
                    level:          result.level,
                    weight,
                    standard_error: result.standard_error,
                    half_pairs:     s.half_pairs_at(period),
                })
            })
            .collect();

        let value = match combine(&contributions) {
            Some((level, se)) => {
                let depth = contributions.iter().map(|c| c.half_pairs).sum();
                IndexValue::ok(geography, frequency, period, level, depth).with_standard_error(se)
            }
            None => IndexValue::no_data(geography, frequency, period),
        };
        series.values.push(value);
    }

    log::debug!(
        "geo={geography} window={}..{} aggregated ok={} of {}",
        plan.window.start,
        plan.window.end,
        series.ok_count(),
        series.values.len()
    );
    series
}
