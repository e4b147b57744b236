//! Chainer / rebaser: splices overlapping window series into one
//! continuous series and pins the base period to 100.
//!
//! Each later window is rescaled so that it agrees with the series
//! chained so far at their latest common `ok` period (the link), then
//! contributes every period after the link. Periods no window covers
//! come out as `no_data`; nothing is interpolated.

use crate::{
    diagnostics::Diagnostic,
    period::{Frequency, Window},
    series::{IndexSeries, IndexValue},
    types::{Period, BASE_INDEX_VALUE},
};
use std::collections::BTreeMap;

pub const STAGE: &str = "chainer";

#[derive(Debug, Clone)]
pub struct ChainOutcome {
    pub series:      IndexSeries,
    pub diagnostics: Vec<Diagnostic>,
}

/// Chain window series of one geography, in window-start order.
pub fn chain_windows(geography: &str, frequency: Frequency, windows: &[(Window, IndexSeries)]) -> ChainOutcome {
    let mut ordered: Vec<&(Window, IndexSeries)> = windows.iter().collect();
    ordered.sort_by_key(|(w, _)| *w);

    let mut chained: BTreeMap<Period, IndexValue> = BTreeMap::new();
    let mut diagnostics = Vec::new();

    for (i, (window, series)) in ordered.into_iter().enumerate() {
        if i == 0 {
            for v in &series.values {
                chained.insert(v.period, v.clone());
            }
            continue;
        }

        match link(&chained, series) {
            Some((link_period, factor)) => {
                log::debug!(
                    "geo={geography} window={}..{} link={link_period} factor={factor:.6}",
                    window.start,
                    window.end
                );
                for v in series.values.iter().filter(|v| v.period > link_period) {
                    let keep_existing = !v.is_ok()
                        && chained.get(&v.period).is_some_and(IndexValue::is_ok);
                    if keep_existing {
                        continue;
                    }
                    let mut scaled = v.clone();
                    scaled.scale(factor);
                    chained.insert(v.period, scaled);
                }
            }
            None => {
                log::warn!(
                    "geo={geography} window={}..{} has no common ok period with the chain",
                    window.start,
                    window.end
                );
                diagnostics.push(Diagnostic::ChainBreak {
                    geography: geography.to_string(),
                    window:    *window,
                });
                for v in &series.values {
                    chained
                        .entry(v.period)
                        .or_insert_with(|| IndexValue::no_data(geography, frequency, v.period));
                }
            }
        }
    }

    let mut out = IndexSeries::new(geography, frequency);
    if let (Some(&first), Some(&last)) = (chained.keys().next(), chained.keys().next_back()) {
        for period in first..=last {
            out.values.push(
                chained
                    .remove(&period)
                    .unwrap_or_else(|| IndexValue::no_data(geography, frequency, period)),
            );
        }
    }

    ChainOutcome { series: out, diagnostics }
}

/// Latest period `ok` in both, and the factor mapping `next` onto `chained`.
fn link(chained: &BTreeMap<Period, IndexValue>, next: &IndexSeries) -> Option<(Period, f64)> {
    next.values
        .iter()
        .rev()
        .filter_map(|v| {
            let theirs = v.value?;
            let ours = chained.get(&v.period)?.value?;
            (theirs > 0.0).then(|| (v.period, ours / theirs))
        })
        .next()
}

/// Rescale the whole series so `base_period` is exactly 100.
///
/// Returns a diagnostic, leaving the series untouched, when the base
/// period has no value.
pub fn rebase(series: &mut IndexSeries, base_period: Period) -> Option<Diagnostic> {
    rebase_to(series, base_period, BASE_INDEX_VALUE)
}

/// Like [`rebase`], but pins the base period to `base_value`.
pub fn rebase_to(series: &mut IndexSeries, base_period: Period, base_value: f64) -> Option<Diagnostic> {
    let current = match series.value_at(base_period) {
        Some(v) if v > 0.0 => v,
        _ => {
            log::warn!("geo={} base period {base_period} unavailable, series not rebased", series.geography);
            return Some(Diagnostic::BasePeriodUnavailable {
                geography: series.geography.clone(),
                base_period,
            });
        }
    };

    let factor = base_value / current;
    for v in &mut series.values {
        if v.period == base_period {
            v.value = Some(base_value);
        } else {
            v.scale(factor);
        }
    }
    series.base_period = Some(base_period);
    None
}
