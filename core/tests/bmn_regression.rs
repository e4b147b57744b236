//! BMN regression: path recovery, pair weighting, and singular designs.

use chrono::{Datelike, Months, NaiveDate};
use rsai_core::{
    bmn_regression::{regress, PairWeighting, ResultStatus, Solver},
    config::RunConfig,
    error::IndexError,
    pair_extractor::RepeatSalePair,
    period::{Frequency, Window},
    types::Period,
};

const MONTHLY_RATE: f64 = 0.005;

/// Monthly period `offset` months after January 2015.
fn month(offset: u32) -> (Period, NaiveDate) {
    let date = NaiveDate::from_ymd_opt(2015, 1, 1)
        .and_then(|d| d.checked_add_months(Months::new(offset)))
        .expect("date");
    (Frequency::Monthly.period_of(date), date)
}

fn pair_between(id: &str, first: u32, second: u32, log_ratio: f64) -> RepeatSalePair {
    let (p1, d1) = month(first);
    let (p2, d2) = month(second);
    let first_price = 200_000.0 + 1_000.0 * d1.month() as f64;
    RepeatSalePair {
        property_id:     id.into(),
        tract_id:        "A".into(),
        first_date:      d1,
        second_date:     d2,
        first_price,
        second_price:    first_price * log_ratio.exp(),
        first_period:    p1,
        second_period:   p2,
        log_price_ratio: log_ratio,
    }
}

/// Every ordered pair of months in `0..=last`, priced on the exact path.
fn exact_path(last: u32) -> Vec<RepeatSalePair> {
    let g = (1.0 + MONTHLY_RATE).ln();
    let mut pairs = Vec::new();
    for i in 0..last {
        for j in i + 1..=last {
            pairs.push(pair_between(&format!("P{i}-{j}"), i, j, (j - i) as f64 * g));
        }
    }
    pairs
}

/// Like `exact_path`, but each pair twice with ±0.1% log noise that
/// cancels. Prices stay on the path so both copies weigh the same.
fn symmetric_noise_path(last: u32) -> Vec<RepeatSalePair> {
    let g = (1.0 + MONTHLY_RATE).ln();
    let mut pairs = Vec::new();
    for i in 0..last {
        for j in i + 1..=last {
            let y = (j - i) as f64 * g;
            for (tag, noise) in [("U", 0.001), ("D", -0.001)] {
                let mut pair = pair_between(&format!("{tag}{i}-{j}"), i, j, y);
                pair.log_price_ratio += noise;
                pairs.push(pair);
            }
        }
    }
    pairs
}

fn monthly_config() -> RunConfig {
    RunConfig {
        frequency: Frequency::Monthly,
        ..RunConfig::default_test()
    }
}

#[test]
fn constant_rate_is_recovered_exactly() {
    let pairs = exact_path(6);
    let refs: Vec<&RepeatSalePair> = pairs.iter().collect();
    let window = Window::new(month(0).0, month(6).0);

    let output = regress("A", window, &refs, &monthly_config()).expect("regress");

    assert_eq!(output.summary.solver, Solver::Cholesky);
    assert_eq!(output.summary.rank, 6);
    assert_eq!(output.results.len(), 7);
    for (t, result) in output.results.iter().enumerate() {
        let expected = t as f64 * (1.0 + MONTHLY_RATE).ln();
        assert!(
            (result.coefficient - expected).abs() < 1e-9,
            "period {}: coefficient {} expected {expected}",
            result.period,
            result.coefficient
        );
        assert_eq!(result.status, ResultStatus::Ok);
    }
    assert_eq!(output.results[0].coefficient, 0.0, "window base is clamped to zero");
    assert!((output.results[6].level - 100.0 * (1.0 + MONTHLY_RATE).powi(6)).abs() < 1e-6);
}

#[test]
fn every_pair_weighting_recovers_a_symmetric_noise_path() {
    let pairs = symmetric_noise_path(4);
    let refs: Vec<&RepeatSalePair> = pairs.iter().collect();
    let window = Window::new(month(0).0, month(4).0);

    let weightings = [
        PairWeighting::Uniform,
        PairWeighting::PriceLevel,
        PairWeighting::Recency { half_life: 2.0 },
        PairWeighting::CaseShiller,
    ];
    for weighting in weightings {
        let config = RunConfig {
            pair_weighting: weighting,
            ..monthly_config()
        };
        let output = regress("A", window, &refs, &config).expect("regress");

        for (t, result) in output.results.iter().enumerate() {
            let expected = t as f64 * (1.0 + MONTHLY_RATE).ln();
            assert!(
                (result.coefficient - expected).abs() < 1e-9,
                "{weighting:?} period {t}: {} vs {expected}",
                result.coefficient
            );
        }
        assert!(output.summary.degrees_of_freedom > 0);
        assert!(output.summary.residual_std_error.expect("residual error") > 0.0);
        let r2 = output.summary.r_squared.expect("r squared");
        assert!(r2 > 0.5 && r2 < 1.0, "{weighting:?}: r squared {r2}");
        assert_eq!(output.results[0].standard_error, Some(0.0));
        assert!(output.results[2].standard_error.expect("se") > 0.0);
    }
}

#[test]
fn single_pair_gives_minimum_norm_solution_and_flags_gap() {
    let config = RunConfig::default_test();
    let pair = RepeatSalePair {
        property_id:     "P1".into(),
        tract_id:        "A".into(),
        first_date:      NaiveDate::from_ymd_opt(2010, 3, 1).expect("date"),
        second_date:     NaiveDate::from_ymd_opt(2012, 3, 1).expect("date"),
        first_price:     100_000.0,
        second_price:    121_000.0,
        first_period:    2010,
        second_period:   2012,
        log_price_ratio: 1.21f64.ln(),
    };
    let window = Window::new(2010, 2012);

    let output = regress("A", window, &[&pair], &config).expect("non-strict regress");

    assert!(output.is_singular());
    assert_eq!(output.summary.rank, 1);
    assert_eq!(output.summary.columns, 2);

    let gap = output.result_at(2011).expect("2011");
    assert_eq!(gap.status, ResultStatus::InsufficientSample);
    assert!(gap.coefficient.abs() < 1e-12, "minimum-norm leaves the gap at zero");

    let last = output.result_at(2012).expect("2012");
    assert_eq!(last.status, ResultStatus::Ok);
    assert!((last.coefficient - 1.21f64.ln()).abs() < 1e-9);
    assert!((last.level - 121.0).abs() < 1e-6);
    assert_eq!(last.standard_error, None, "no residual degrees of freedom");
}

fn annual_pair(id: &str, first: Period, second: Period, log_ratio: f64) -> RepeatSalePair {
    RepeatSalePair {
        property_id:     id.into(),
        tract_id:        "A".into(),
        first_date:      NaiveDate::from_ymd_opt(first, 6, 1).expect("date"),
        second_date:     NaiveDate::from_ymd_opt(second, 6, 1).expect("date"),
        first_price:     100_000.0,
        second_price:    100_000.0 * log_ratio.exp(),
        first_period:    first,
        second_period:   second,
        log_price_ratio: log_ratio,
    }
}

#[test]
fn periods_without_a_path_to_the_base_are_not_trusted() {
    let rise = 1.1f64.ln();
    let mut pairs: Vec<RepeatSalePair> = (0..5)
        .map(|i| annual_pair(&format!("early-{i}"), 2010, 2011, rise))
        .collect();
    pairs.extend((0..5).map(|i| annual_pair(&format!("late-{i}"), 2012, 2013, rise)));
    let refs: Vec<&RepeatSalePair> = pairs.iter().collect();

    let output = regress("A", Window::new(2010, 2013), &refs, &RunConfig::default_test()).expect("regress");

    assert!(output.is_singular());
    assert_eq!(output.summary.rank, 2);
    assert_eq!(output.summary.unidentified_periods, vec![2012, 2013]);

    let linked = output.result_at(2011).expect("2011");
    assert_eq!(linked.status, ResultStatus::Ok);
    assert!((linked.level - 110.0).abs() < 1e-6, "got {}", linked.level);

    for period in [2012, 2013] {
        let result = output.result_at(period).expect("period present");
        assert_eq!(result.observations, 5);
        assert_eq!(result.status, ResultStatus::InsufficientSample, "period {period}");
        assert_eq!(result.standard_error, None);
    }
}

#[test]
fn fit_statistics_accompany_the_coefficients() {
    let pairs = symmetric_noise_path(6);
    let refs: Vec<&RepeatSalePair> = pairs.iter().collect();
    let output = regress("A", Window::new(month(0).0, month(6).0), &refs, &monthly_config()).expect("regress");

    let summary = &output.summary;
    let r2 = summary.r_squared.expect("r squared");
    let adjusted = summary.adjusted_r_squared.expect("adjusted r squared");
    assert!(adjusted <= r2, "adjusting for columns cannot raise the fit");
    assert!(summary.f_statistic.expect("f statistic") > 0.0);
    assert!(summary.unidentified_periods.is_empty());

    for result in output.results.iter().skip(1) {
        let se = result.standard_error.expect("standard error");
        let t = result.t_statistic.expect("t statistic");
        assert!((t - result.coefficient / se).abs() < 1e-9);
    }
    assert_eq!(output.results[0].t_statistic, None, "the base has no sampling error");
}

#[test]
fn strict_mode_rejects_a_singular_design() {
    let config = RunConfig {
        strict: true,
        ..RunConfig::default_test()
    };
    let pair = RepeatSalePair {
        property_id:     "P1".into(),
        tract_id:        "A".into(),
        first_date:      NaiveDate::from_ymd_opt(2010, 3, 1).expect("date"),
        second_date:     NaiveDate::from_ymd_opt(2012, 3, 1).expect("date"),
        first_price:     100_000.0,
        second_price:    121_000.0,
        first_period:    2010,
        second_period:   2012,
        log_price_ratio: 1.21f64.ln(),
    };

    let err = regress("A", Window::new(2010, 2012), &[&pair], &config).expect_err("strict must fail");
    assert!(
        matches!(err, IndexError::SingularDesignMatrix { rank: 1, columns: 2, .. }),
        "got {err:?}"
    );
}

#[test]
fn empty_input_yields_insufficient_results() {
    let output = regress("A", Window::new(2010, 2013), &[], &RunConfig::default_test()).expect("regress");

    assert_eq!(output.summary.solver, Solver::Empty);
    assert_eq!(output.results.len(), 4);
    assert!(output
        .results
        .iter()
        .all(|r| r.status == ResultStatus::InsufficientSample));
}
