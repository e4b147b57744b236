//! BMN regression engine: Bailey-Muth-Nourse weighted least squares.
//!
//! Each repeat-sale pair is one row: +1 at its later period, −1 at its
//! earlier period, target `ln(p2/p1)`. The window's first period is the
//! local base and has no column (its coefficient is clamped to 0).
//!
//! Solve: `(XᵗWX) β = XᵗWy` by Cholesky. When Cholesky fails or the
//! system is near-singular, fall back to the SVD pseudo-inverse, which
//! yields the minimum-norm least-squares solution.
//!
//! A period's level is identified only when some chain of pairs links it
//! back to the window base. Every other period is `InsufficientSample`,
//! whatever the solver put in its coefficient. That covers periods with no
//! sales at all and whole groups of periods whose pairs only connect
//! among themselves.
//!
//! RULE: a regression reads only its own pairs and returns only its own
//! results. Tasks are independent and may run on any worker thread.

use crate::{
    config::RunConfig,
    error::{IndexError, IndexResult},
    pair_extractor::RepeatSalePair,
    period::Window,
    types::{Period, SupertractId, BASE_INDEX_VALUE},
};
use nalgebra::{DMatrix, DVector};
use serde::{Deserialize, Serialize};

pub const STAGE: &str = "bmn_regression";

/// Per-pair weights populating `W`.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Default)]
#[serde(tag = "method", rename_all = "snake_case")]
pub enum PairWeighting {
    /// `W = I`.
    #[default]
    Uniform,
    /// Weight by mean pair price, normalised to mean 1.
    PriceLevel,
    /// Halve the weight every `half_life` periods before the window end.
    Recency { half_life: f64 },
    /// Three-stage interval weighting: OLS, regress squared residuals on
    /// holding years, then WLS with the inverse predicted variance.
    CaseShiller,
}

impl PairWeighting {
    pub fn validate(&self) -> IndexResult<()> {
        if let Self::Recency { half_life } = self {
            if !(half_life.is_finite() && *half_life > 0.0) {
                return Err(IndexError::invalid_config(format!(
                    "recency half_life must be positive, got {half_life}"
                )));
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Solver {
    Cholesky,
    PseudoInverse,
    /// Nothing to solve: no pairs or no non-base periods.
    Empty,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ResultStatus {
    Ok,
    InsufficientSample,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RegressionResult {
    pub supertract_id: SupertractId,
    pub period:        Period,
    /// Log-level relative to the window base.
    pub coefficient:   f64,
    /// `100 · exp(coefficient)`.
    pub level:         f64,
    /// Standard error of `coefficient`; `None` without residual degrees
    /// of freedom.
    pub standard_error: Option<f64>,
    /// `coefficient / standard_error`, when the error is positive.
    pub t_statistic:   Option<f64>,
    /// Pairs with a sale in this period.
    pub observations:  u32,
    pub status:        ResultStatus,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RegressionSummary {
    pub supertract_id:      SupertractId,
    pub solver:             Solver,
    pub rank:               usize,
    pub columns:            usize,
    pub observations:       usize,
    pub degrees_of_freedom: i64,
    pub r_squared:          Option<f64>,
    pub adjusted_r_squared: Option<f64>,
    pub f_statistic:        Option<f64>,
    pub residual_std_error: Option<f64>,
    /// Periods with sales but no pair path back to the window base.
    pub unidentified_periods: Vec<Period>,
}

#[derive(Debug, Clone)]
pub struct RegressionOutput {
    pub results: Vec<RegressionResult>,
    pub summary: RegressionSummary,
}

impl RegressionOutput {
    pub fn is_singular(&self) -> bool {
        self.summary.solver == Solver::PseudoInverse
    }

    pub fn result_at(&self, period: Period) -> Option<&RegressionResult> {
        self.results.iter().find(|r| r.period == period)
    }
}

/// Run the BMN regression for one supertract over one window.
///
/// Pairs with a sale outside the window are ignored.
pub fn regress(
    supertract_id: &str,
    window: Window,
    pairs: &[&RepeatSalePair],
    config: &RunConfig,
) -> IndexResult<RegressionOutput> {
    let design = Design::new(window, pairs);
    let tolerance = config.singular_tolerance;

    let weights = match config.pair_weighting {
        PairWeighting::Uniform => vec![1.0; design.rows.len()],
        PairWeighting::PriceLevel => {
            normalise(design.rows.iter().map(|r| r.mean_price).collect())
        }
        PairWeighting::Recency { half_life } => design
            .rows
            .iter()
            .map(|r| 0.5f64.powf((window.end - r.second) as f64 / half_life))
            .collect(),
        PairWeighting::CaseShiller => {
            let first_stage = design.solve(&vec![1.0; design.rows.len()], tolerance)?;
            interval_weights(&design, &first_stage.beta)
        }
    };

    let fit = design.solve(&weights, tolerance)?;
    let singular = fit.solver == Solver::PseudoInverse;

    if singular {
        log::warn!(
            "supertract={supertract_id} window={}..{} singular design: rank {} of {}",
            window.start,
            window.end,
            fit.rank,
            design.columns
        );
        if config.strict {
            return Err(IndexError::SingularDesignMatrix {
                supertract_id: supertract_id.to_string(),
                rank:          fit.rank,
                columns:       design.columns,
            });
        }
    }

    // ── Residual variance ──────────────────────────────────────────────

    let n = design.rows.len();
    let dof = n as i64 - fit.rank as i64;
    let mut ssr = 0.0;
    let mut w_sum = 0.0;
    let mut wy_sum = 0.0;
    for (row, &w) in design.rows.iter().zip(&weights) {
        let e = row.y - design.predict(row, &fit.beta);
        ssr += w * e * e;
        w_sum += w;
        wy_sum += w * row.y;
    }
    let sigma2 = (dof > 0).then(|| ssr / dof as f64);

    let r_squared = if w_sum > 0.0 {
        let y_bar = wy_sum / w_sum;
        let sst: f64 = design
            .rows
            .iter()
            .zip(&weights)
            .map(|(row, &w)| w * (row.y - y_bar).powi(2))
            .sum();
        (sst > 0.0).then(|| 1.0 - ssr / sst)
    } else {
        None
    };

    let adjusted_r_squared = r_squared
        .filter(|_| dof > 0)
        .map(|r2| 1.0 - (1.0 - r2) * (n as f64 - 1.0) / dof as f64);
    let f_statistic = r_squared
        .filter(|&r2| dof > 0 && fit.rank > 0 && r2 < 1.0)
        .map(|r2| ((r2 / fit.rank as f64) / ((1.0 - r2) / dof as f64)).max(0.0));

    // ── Per-period results ─────────────────────────────────────────────

    let observations = design.observations_per_period();
    let identified = design.linked_to_base();
    let mut unidentified_periods = Vec::new();
    let results = window
        .periods()
        .map(|period| {
            let offset = (period - window.start) as usize;
            let obs = observations[offset];
            let linked = identified[offset];
            if obs > 0 && !linked {
                unidentified_periods.push(period);
            }
            let (coefficient, standard_error) = match design.column(period) {
                None => (0.0, sigma2.map(|_| 0.0)),
                Some(c) => (
                    fit.beta[c],
                    sigma2
                        .filter(|_| linked)
                        .map(|s2| (s2 * fit.covariance[(c, c)]).max(0.0).sqrt()),
                ),
            };
            let status = if obs > 0 && linked {
                ResultStatus::Ok
            } else {
                ResultStatus::InsufficientSample
            };
            RegressionResult {
                supertract_id: supertract_id.to_string(),
                period,
                coefficient,
                level: BASE_INDEX_VALUE * coefficient.exp(),
                standard_error,
                t_statistic: standard_error.filter(|&se| se > 0.0).map(|se| coefficient / se),
                observations: obs,
                status,
            }
        })
        .collect();

    if !unidentified_periods.is_empty() {
        log::warn!(
            "supertract={supertract_id} window={}..{} periods {:?} have no pair path to the base",
            window.start,
            window.end,
            unidentified_periods
        );
    }

    Ok(RegressionOutput {
        results,
        summary: RegressionSummary {
            supertract_id:      supertract_id.to_string(),
            solver:             fit.solver,
            rank:               fit.rank,
            columns:            design.columns,
            observations:       n,
            degrees_of_freedom: dof,
            r_squared,
            adjusted_r_squared,
            f_statistic,
            residual_std_error: sigma2.map(f64::sqrt),
            unidentified_periods,
        },
    })
}

// ── Design ───────────────────────────────────────────────────────────────────

/// One design row, kept sparse: at most two non-zero entries.
struct Row {
    first:         Period,
    second:        Period,
    y:             f64,
    mean_price:    f64,
    holding_years: f64,
}

struct Design {
    window:  Window,
    columns: usize,
    rows:    Vec<Row>,
}

struct Fit {
    beta:       DVector<f64>,
    /// `(XᵗWX)⁻¹`, or its pseudo-inverse.
    covariance: DMatrix<f64>,
    solver:     Solver,
    rank:       usize,
}

impl Design {
    fn new(window: Window, pairs: &[&RepeatSalePair]) -> Self {
        let rows = pairs
            .iter()
            .filter(|p| p.within(&window) && p.first_period < p.second_period)
            .map(|p| Row {
                first:         p.first_period,
                second:        p.second_period,
                y:             p.log_price_ratio,
                mean_price:    p.mean_price(),
                holding_years: p.holding_years(),
            })
            .collect();
        Self {
            window,
            columns: window.len() - 1,
            rows,
        }
    }

    /// Column of a period; the base period has none.
    fn column(&self, period: Period) -> Option<usize> {
        (period > self.window.start && period <= self.window.end)
            .then(|| (period - self.window.start - 1) as usize)
    }

    fn predict(&self, row: &Row, beta: &DVector<f64>) -> f64 {
        let at = |p: Period| self.column(p).map_or(0.0, |c| beta[c]);
        at(row.second) - at(row.first)
    }

    fn observations_per_period(&self) -> Vec<u32> {
        let mut obs = vec![0u32; self.window.len()];
        for row in &self.rows {
            obs[(row.first - self.window.start) as usize] += 1;
            obs[(row.second - self.window.start) as usize] += 1;
        }
        obs
    }

    /// Whether each window period is joined to the base by a chain of
    /// pairs. Union-find over the pair endpoints.
    fn linked_to_base(&self) -> Vec<bool> {
        fn find(parent: &mut [usize], mut i: usize) -> usize {
            while parent[i] != i {
                parent[i] = parent[parent[i]];
                i = parent[i];
            }
            i
        }

        let mut parent: Vec<usize> = (0..self.window.len()).collect();
        for row in &self.rows {
            let a = find(&mut parent, (row.first - self.window.start) as usize);
            let b = find(&mut parent, (row.second - self.window.start) as usize);
            if a != b {
                parent[a.max(b)] = a.min(b);
            }
        }
        let base = find(&mut parent, 0);
        (0..parent.len()).map(|i| find(&mut parent, i) == base).collect()
    }

    /// Accumulate `XᵗWX` and `XᵗWy` row by row and solve.
    fn solve(&self, weights: &[f64], tolerance: f64) -> IndexResult<Fit> {
        let k = self.columns;
        let mut xtwx = DMatrix::<f64>::zeros(k, k);
        let mut xtwy = DVector::<f64>::zeros(k);

        for (row, &w) in self.rows.iter().zip(weights) {
            let entries = [
                (self.column(row.second), 1.0),
                (self.column(row.first), -1.0),
            ];
            for &(ci, xi) in &entries {
                let Some(ci) = ci else { continue };
                xtwy[ci] += w * xi * row.y;
                for &(cj, xj) in &entries {
                    if let Some(cj) = cj {
                        xtwx[(ci, cj)] += w * xi * xj;
                    }
                }
            }
        }

        if k == 0 || self.rows.is_empty() {
            return Ok(Fit {
                beta:       DVector::zeros(k),
                covariance: DMatrix::zeros(k, k),
                solver:     Solver::Empty,
                rank:       0,
            });
        }

        if let Some(chol) = xtwx.clone().cholesky() {
            let diag = chol.l().diagonal();
            let max = diag.iter().fold(0.0f64, |m, d| m.max(d.abs()));
            let min = diag.iter().fold(f64::INFINITY, |m, d| m.min(d.abs()));
            let finite = diag.iter().all(|d| d.is_finite());
            if finite && max > 0.0 && (min / max).powi(2) > tolerance {
                return Ok(Fit {
                    beta:       chol.solve(&xtwy),
                    covariance: chol.inverse(),
                    solver:     Solver::Cholesky,
                    rank:       k,
                });
            }
        }

        let svd = xtwx.svd(true, true);
        let eps = tolerance * svd.singular_values.max();
        let rank = svd.rank(eps);
        let pinv = svd
            .pseudo_inverse(eps)
            .map_err(|e| anyhow::anyhow!("pseudo-inverse failed: {e}"))?;
        Ok(Fit {
            beta:       &pinv * &xtwy,
            covariance: pinv,
            solver:     Solver::PseudoInverse,
            rank,
        })
    }
}

/// Second stage of the Case-Shiller procedure: model the squared
/// first-stage residuals as `a + b · holding_years` and weight each pair
/// by the inverse of its predicted variance.
fn interval_weights(design: &Design, beta: &DVector<f64>) -> Vec<f64> {
    let n = design.rows.len();
    if n == 0 {
        return Vec::new();
    }
    let e2: Vec<f64> = design
        .rows
        .iter()
        .map(|r| (r.y - design.predict(r, beta)).powi(2))
        .collect();
    let h: Vec<f64> = design.rows.iter().map(|r| r.holding_years).collect();

    let nf = n as f64;
    let h_bar = h.iter().sum::<f64>() / nf;
    let e_bar = e2.iter().sum::<f64>() / nf;
    let s_hh: f64 = h.iter().map(|x| (x - h_bar).powi(2)).sum();
    let s_he: f64 = h.iter().zip(&e2).map(|(x, e)| (x - h_bar) * (e - e_bar)).sum();

    let b = if s_hh > 0.0 { s_he / s_hh } else { 0.0 };
    let a = e_bar - b * h_bar;
    if e_bar <= 0.0 {
        return vec![1.0; n];
    }

    // Floor the predicted variance so a negative slope can't flip signs.
    let floor = e_bar * 1e-3;
    normalise(h.iter().map(|x| 1.0 / (a + b * x).max(floor)).collect())
}

fn normalise(mut weights: Vec<f64>) -> Vec<f64> {
    let mean = weights.iter().sum::<f64>() / weights.len().max(1) as f64;
    if mean > 0.0 {
        for w in &mut weights {
            *w /= mean;
        }
    }
    weights
}
