//! Index values and series, as handed to the export collaborator.

use crate::{
    period::Frequency,
    types::{GeographyId, Period},
};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum IndexStatus {
    Ok,
    NoData,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct IndexValue {
    pub geography:    GeographyId,
    pub period:       Period,
    pub label:        String,
    /// `None` exactly when `status` is `NoData`.
    pub value:        Option<f64>,
    /// Half-pairs behind the value.
    pub sample_depth: u32,
    /// Standard error on the log scale.
    pub standard_error: Option<f64>,
    pub status:       IndexStatus,
}

impl IndexValue {
    pub fn ok(geography: &str, frequency: Frequency, period: Period, value: f64, sample_depth: u32) -> Self {
        Self {
            geography:      geography.to_string(),
            period,
            label:          frequency.label(period),
            value:          Some(value),
            sample_depth,
            standard_error: None,
            status:         IndexStatus::Ok,
        }
    }

    pub fn no_data(geography: &str, frequency: Frequency, period: Period) -> Self {
        Self {
            geography:      geography.to_string(),
            period,
            label:          frequency.label(period),
            value:          None,
            sample_depth:   0,
            standard_error: None,
            status:         IndexStatus::NoData,
        }
    }

    pub fn with_standard_error(mut self, standard_error: Option<f64>) -> Self {
        self.standard_error = standard_error;
        self
    }

    pub fn is_ok(&self) -> bool {
        self.status == IndexStatus::Ok
    }

    /// Value bounds at `z` standard errors, e.g. 1.96 for 95%.
    pub fn confidence_interval(&self, z: f64) -> Option<(f64, f64)> {
        let value = self.value?;
        let se = self.standard_error?;
        Some((value * (-z * se).exp(), value * (z * se).exp()))
    }

    pub(crate) fn scale(&mut self, factor: f64) {
        if let Some(v) = self.value.as_mut() {
            *v *= factor;
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct IndexSeries {
    pub geography:   GeographyId,
    pub frequency:   Frequency,
    /// Period pinned to 100, once rebased.
    pub base_period: Option<Period>,
    /// Ordered by period, one entry per period, no gaps.
    pub values:      Vec<IndexValue>,
}

/// Summary statistics over the `ok` values of a series.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SeriesSummary {
    pub total_periods: usize,
    pub ok_periods:    usize,
    pub min_value:     f64,
    pub max_value:     f64,
    pub mean_value:    f64,
}

impl IndexSeries {
    pub fn new(geography: &str, frequency: Frequency) -> Self {
        Self {
            geography:   geography.to_string(),
            frequency,
            base_period: None,
            values:      Vec::new(),
        }
    }

    pub fn get(&self, period: Period) -> Option<&IndexValue> {
        self.values.iter().find(|v| v.period == period)
    }

    pub fn value_at(&self, period: Period) -> Option<f64> {
        self.get(period).and_then(|v| v.value)
    }

    pub fn first_period(&self) -> Option<Period> {
        self.values.first().map(|v| v.period)
    }

    pub fn last_period(&self) -> Option<Period> {
        self.values.last().map(|v| v.period)
    }

    pub fn ok_count(&self) -> usize {
        self.values.iter().filter(|v| v.is_ok()).count()
    }

    /// Period-over-period growth, `None` where either side is missing.
    pub fn period_growth_rates(&self) -> Vec<(Period, Option<f64>)> {
        self.values
            .iter()
            .map(|v| (v.period, self.growth_since(v, 1)))
            .collect()
    }

    /// Growth over the same period one year earlier.
    pub fn annual_growth_rates(&self) -> Vec<(Period, Option<f64>)> {
        let lag = self.frequency.periods_per_year();
        self.values
            .iter()
            .map(|v| (v.period, self.growth_since(v, lag)))
            .collect()
    }

    fn growth_since(&self, current: &IndexValue, lag: i32) -> Option<f64> {
        let now = current.value?;
        let before = self.value_at(current.period - lag)?;
        (before > 0.0).then(|| now / before - 1.0)
    }

    pub fn summary(&self) -> Option<SeriesSummary> {
        let ok: Vec<f64> = self.values.iter().filter_map(|v| v.value).collect();
        if ok.is_empty() {
            return None;
        }
        Some(SeriesSummary {
            total_periods: self.values.len(),
            ok_periods:    ok.len(),
            min_value:     ok.iter().copied().fold(f64::INFINITY, f64::min),
            max_value:     ok.iter().copied().fold(f64::NEG_INFINITY, f64::max),
            mean_value:    ok.iter().sum::<f64>() / ok.len() as f64,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn series(values: &[Option<f64>]) -> IndexSeries {
        let mut s = IndexSeries::new("G", Frequency::Quarterly);
        for (i, v) in values.iter().enumerate() {
            let p = 8000 + i as i32;
            s.values.push(match v {
                Some(v) => IndexValue::ok("G", Frequency::Quarterly, p, *v, 10),
                None => IndexValue::no_data("G", Frequency::Quarterly, p),
            });
        }
        s
    }

    #[test]
    fn growth_rates_skip_missing_neighbours() {
        let s = series(&[Some(100.0), Some(110.0), None, Some(121.0), Some(125.0)]);
        let growth = s.period_growth_rates();
        assert_eq!(growth[0].1, None);
        assert!((growth[1].1.expect("growth") - 0.10).abs() < 1e-12);
        assert_eq!(growth[2].1, None);
        assert_eq!(growth[3].1, None);

        let annual = s.annual_growth_rates();
        assert!((annual[4].1.expect("annual") - 0.25).abs() < 1e-12);
    }

    #[test]
    fn summary_ignores_no_data() {
        let s = series(&[Some(100.0), None, Some(120.0)]);
        let summary = s.summary().expect("summary");
        assert_eq!(summary.ok_periods, 2);
        assert_eq!(summary.total_periods, 3);
        assert_eq!(summary.mean_value, 110.0);
    }
}
