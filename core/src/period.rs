//! Index periods: frequency, period labels, and estimation windows.
//!
//! A `Period` is an ordinal count of frequency units since year 0, so
//! consecutive periods always differ by exactly 1 regardless of frequency.

use crate::types::Period;
use chrono::{Datelike, NaiveDate};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, Default)]
#[serde(rename_all = "snake_case")]
pub enum Frequency {
    Monthly,
    Quarterly,
    #[default]
    Annual,
}

impl Frequency {
    pub fn periods_per_year(&self) -> i32 {
        match self {
            Self::Monthly   => 12,
            Self::Quarterly => 4,
            Self::Annual    => 1,
        }
    }

    /// The period a sale on `date` falls in.
    pub fn period_of(&self, date: NaiveDate) -> Period {
        let month0 = date.month0() as i32;
        match self {
            Self::Monthly   => date.year() * 12 + month0,
            Self::Quarterly => date.year() * 4 + month0 / 3,
            Self::Annual    => date.year(),
        }
    }

    pub fn first_period_of_year(&self, year: i32) -> Period {
        year * self.periods_per_year()
    }

    pub fn year_of(&self, period: Period) -> i32 {
        period.div_euclid(self.periods_per_year())
    }

    /// Human-readable label: `2020-03`, `2020Q1` or `2020`.
    pub fn label(&self, period: Period) -> String {
        let year = self.year_of(period);
        let sub = period.rem_euclid(self.periods_per_year()) + 1;
        match self {
            Self::Monthly   => format!("{year:04}-{sub:02}"),
            Self::Quarterly => format!("{year:04}Q{sub}"),
            Self::Annual    => format!("{year:04}"),
        }
    }
}

/// An inclusive range of periods estimated by one regression run.
/// `start` is the window's local base period.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Window {
    pub start: Period,
    pub end:   Period,
}

impl Window {
    pub fn new(start: Period, end: Period) -> Self {
        debug_assert!(start <= end, "window start after end");
        Self { start, end }
    }

    pub fn contains(&self, period: Period) -> bool {
        period >= self.start && period <= self.end
    }

    pub fn len(&self) -> usize {
        (self.end - self.start + 1) as usize
    }

    pub fn is_empty(&self) -> bool {
        self.end < self.start
    }

    pub fn periods(&self) -> impl Iterator<Item = Period> {
        self.start..=self.end
    }
}

/// Cover `[first, last]` with rolling windows of `length` periods that
/// advance by `step`. The final window is truncated at `last`.
///
/// `length` and `step` are validated by `RunConfig::validate`.
pub fn rolling_windows(first: Period, last: Period, length: u32, step: u32) -> Vec<Window> {
    if last < first {
        return Vec::new();
    }
    let length = length.max(1) as i32;
    let step = step.max(1) as i32;

    let mut windows = Vec::new();
    let mut start = first;
    loop {
        let end = (start + length - 1).min(last);
        windows.push(Window::new(start, end));
        if end == last {
            break;
        }
        start += step;
    }
    windows
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn labels_follow_frequency() {
        let date = NaiveDate::from_ymd_opt(2021, 8, 15).expect("valid date");
        let m = Frequency::Monthly.period_of(date);
        let q = Frequency::Quarterly.period_of(date);
        let a = Frequency::Annual.period_of(date);
        assert_eq!(Frequency::Monthly.label(m), "2021-08");
        assert_eq!(Frequency::Quarterly.label(q), "2021Q3");
        assert_eq!(Frequency::Annual.label(a), "2021");
    }

    #[test]
    fn consecutive_months_are_adjacent_periods() {
        let dec = NaiveDate::from_ymd_opt(2019, 12, 1).expect("valid date");
        let jan = NaiveDate::from_ymd_opt(2020, 1, 1).expect("valid date");
        assert_eq!(
            Frequency::Monthly.period_of(jan) - Frequency::Monthly.period_of(dec),
            1
        );
    }

    #[test]
    fn rolling_windows_overlap_by_length_minus_step() {
        let windows = rolling_windows(0, 9, 4, 3);
        assert_eq!(
            windows,
            vec![Window::new(0, 3), Window::new(3, 6), Window::new(6, 9)]
        );

        let truncated = rolling_windows(0, 7, 4, 3);
        assert_eq!(truncated.last(), Some(&Window::new(6, 7)));
    }
}
