//! Pair extractor: turns validated transactions into repeat-sale pairs.
//!
//! RULES:
//!   - Pure function of (transactions, config). No side effects.
//!   - Every kept pair contributes exactly two half-pairs, one at the
//!     period of each sale, both in the property's tract.
//!   - Outliers are dropped and reported, never fatal.

use crate::{
    config::RunConfig,
    diagnostics::Diagnostic,
    period::{Frequency, Window},
    types::{Period, PropertyId, TractId},
};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

pub const STAGE: &str = "pair_extractor";

/// A validated sale, owned by the upstream validation collaborator.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Transaction {
    pub property_id: PropertyId,
    pub sale_date:   NaiveDate,
    pub price:       f64,
    pub tract_id:    TractId,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum PairingPolicy {
    /// Only consecutive sales pair: t1<t2<t3 gives (t1,t2) and (t2,t3).
    #[default]
    Adjacent,
    /// Every ordered combination of sales pairs: adds (t1,t3).
    AllCombinations,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RepeatSalePair {
    pub property_id:     PropertyId,
    pub tract_id:        TractId,
    pub first_date:      NaiveDate,
    pub second_date:     NaiveDate,
    pub first_price:     f64,
    pub second_price:    f64,
    pub first_period:    Period,
    pub second_period:   Period,
    pub log_price_ratio: f64,
}

impl RepeatSalePair {
    pub fn holding_days(&self) -> i64 {
        (self.second_date - self.first_date).num_days()
    }

    pub fn holding_years(&self) -> f64 {
        self.holding_days() as f64 / 365.25
    }

    pub fn mean_price(&self) -> f64 {
        (self.first_price + self.second_price) / 2.0
    }

    /// Both sales fall inside the window.
    pub fn within(&self, window: &Window) -> bool {
        window.contains(self.first_period) && window.contains(self.second_period)
    }
}

/// Half-pair depth per (tract, period).
#[derive(Debug, Clone, Default, PartialEq)]
pub struct HalfPairCounts {
    counts: BTreeMap<(TractId, Period), u32>,
}

impl HalfPairCounts {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_pairs<'a>(pairs: impl IntoIterator<Item = &'a RepeatSalePair>) -> Self {
        let mut counts = Self::new();
        for pair in pairs {
            counts.add_pair(pair);
        }
        counts
    }

    pub fn add_pair(&mut self, pair: &RepeatSalePair) {
        *self.counts.entry((pair.tract_id.clone(), pair.first_period)).or_insert(0) += 1;
        *self.counts.entry((pair.tract_id.clone(), pair.second_period)).or_insert(0) += 1;
    }

    pub fn get(&self, tract_id: &str, period: Period) -> u32 {
        self.counts
            .get(&(tract_id.to_string(), period))
            .copied()
            .unwrap_or(0)
    }

    pub fn total(&self) -> u64 {
        self.counts.values().map(|&c| c as u64).sum()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&TractId, Period, u32)> {
        self.counts.iter().map(|((t, p), c)| (t, *p, *c))
    }

    /// First and last period with any half-pairs.
    pub fn period_range(&self) -> Option<(Period, Period)> {
        let mut periods = self.counts.keys().map(|(_, p)| *p);
        let first = periods.next()?;
        Some(periods.fold((first, first), |(lo, hi), p| (lo.min(p), hi.max(p))))
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct ExtractionStats {
    pub transactions:      usize,
    pub properties:        usize,
    pub repeat_properties: usize,
    pub pairs:             usize,
    pub outliers:          usize,
    pub same_period_pairs: usize,
}

#[derive(Debug, Clone, Default)]
pub struct Extraction {
    pub pairs:       Vec<RepeatSalePair>,
    pub half_pairs:  HalfPairCounts,
    pub stats:       ExtractionStats,
    pub diagnostics: Vec<Diagnostic>,
}

/// Extract repeat-sale pairs and half-pair counts from validated sales.
///
/// Output order is deterministic: pairs are sorted by property id, then
/// by first sale date.
pub fn extract_pairs(transactions: &[Transaction], config: &RunConfig) -> Extraction {
    let mut by_property: BTreeMap<&str, Vec<&Transaction>> = BTreeMap::new();
    for txn in transactions {
        by_property.entry(txn.property_id.as_str()).or_default().push(txn);
    }

    let mut extraction = Extraction::default();
    extraction.stats.transactions = transactions.len();
    extraction.stats.properties = by_property.len();

    for sales in by_property.values_mut() {
        sales.sort_by(|a, b| {
            a.sale_date
                .cmp(&b.sale_date)
                .then(a.price.total_cmp(&b.price))
        });
        let mut paired_any = false;

        for (i, j) in candidate_pairs(sales.len(), config.pairing_policy) {
            let (first, second) = (sales[i], sales[j]);
            if first.sale_date >= second.sale_date {
                continue;
            }
            let pair = make_pair(first, second, config.frequency);

            if pair.first_period == pair.second_period {
                extraction.stats.same_period_pairs += 1;
                continue;
            }
            if pair.log_price_ratio.abs() > config.outlier_bound
                || !pair.log_price_ratio.is_finite()
            {
                extraction.stats.outliers += 1;
                extraction.diagnostics.push(Diagnostic::OutlierPairExcluded {
                    property_id:     pair.property_id.clone(),
                    first_period:    pair.first_period,
                    second_period:   pair.second_period,
                    log_price_ratio: pair.log_price_ratio,
                });
                continue;
            }

            extraction.half_pairs.add_pair(&pair);
            extraction.pairs.push(pair);
            paired_any = true;
        }

        if paired_any {
            extraction.stats.repeat_properties += 1;
        }
    }

    extraction.stats.pairs = extraction.pairs.len();
    log::debug!(
        "extract: transactions={} properties={} pairs={} outliers={} same_period={}",
        extraction.stats.transactions,
        extraction.stats.properties,
        extraction.stats.pairs,
        extraction.stats.outliers,
        extraction.stats.same_period_pairs
    );
    extraction
}

fn candidate_pairs(n: usize, policy: PairingPolicy) -> Vec<(usize, usize)> {
    match policy {
        PairingPolicy::Adjacent => (1..n).map(|j| (j - 1, j)).collect(),
        PairingPolicy::AllCombinations => (0..n)
            .flat_map(|i| (i + 1..n).map(move |j| (i, j)))
            .collect(),
    }
}

fn make_pair(first: &Transaction, second: &Transaction, frequency: Frequency) -> RepeatSalePair {
    RepeatSalePair {
        property_id:     first.property_id.clone(),
        tract_id:        first.tract_id.clone(),
        first_date:      first.sale_date,
        second_date:     second.sale_date,
        first_price:     first.price,
        second_price:    second.price,
        first_period:    frequency.period_of(first.sale_date),
        second_period:   frequency.period_of(second.sale_date),
        log_price_ratio: (second.price / first.price).ln(),
    }
}

