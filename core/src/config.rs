use crate::{
    aggregator::WeightingScheme,
    bmn_regression::PairWeighting,
    error::{IndexError, IndexResult},
    pair_extractor::PairingPolicy,
    period::Frequency,
    supertract_builder::DistanceMetric,
};
use serde::{Deserialize, Serialize};

pub const DEFAULT_MIN_HALF_PAIRS: u32 = 40;
pub const DEFAULT_WINDOW_LENGTH: u32 = 10;
pub const DEFAULT_SINGULAR_TOLERANCE: f64 = 1e-10;

/// Run configuration for one pipeline execution.
///
/// Every field has a default, so a config file only needs to name what
/// it overrides.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct RunConfig {
    /// Minimum half-pairs a supertract needs in a period to be regressed.
    pub min_half_pairs: u32,
    /// Calendar year whose first period is rebased to 100.
    pub base_year: i32,
    pub frequency: Frequency,
    pub weighting_scheme: WeightingScheme,
    /// Periods per estimation window.
    pub window_length: u32,
    /// Periods between successive window starts. Defaults to
    /// `window_length - 1`, which overlaps windows by one period.
    pub window_step: Option<u32>,
    /// Pairs with `|ln(p2/p1)|` above this bound are dropped.
    pub outlier_bound: f64,
    pub pairing_policy: PairingPolicy,
    pub distance_metric: DistanceMetric,
    pub pair_weighting: PairWeighting,
    /// Escalate a singular design matrix to a hard failure.
    pub strict: bool,
    /// Relative tolerance below which `XᵗWX` is treated as singular.
    pub singular_tolerance: f64,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            min_half_pairs:     DEFAULT_MIN_HALF_PAIRS,
            base_year:          2000,
            frequency:          Frequency::Annual,
            weighting_scheme:   WeightingScheme::Equal,
            window_length:      DEFAULT_WINDOW_LENGTH,
            window_step:        None,
            outlier_bound:      10f64.ln(),
            pairing_policy:     PairingPolicy::Adjacent,
            distance_metric:    DistanceMetric::CentroidEuclidean,
            pair_weighting:     PairWeighting::Uniform,
            strict:             false,
            singular_tolerance: DEFAULT_SINGULAR_TOLERANCE,
        }
    }
}

impl RunConfig {
    /// Load from a JSON file. Missing fields take their defaults.
    /// In tests, use RunConfig::default_test().
    pub fn load(path: &str) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| anyhow::anyhow!("Cannot read {path}: {e}"))?;
        let config: RunConfig = serde_json::from_str(&content)
            .map_err(|e| anyhow::anyhow!("Cannot parse {path}: {e}"))?;
        config.validate()?;
        Ok(config)
    }

    /// Config with small thresholds for use in unit tests.
    pub fn default_test() -> Self {
        Self {
            min_half_pairs: 10,
            base_year:      2010,
            window_length:  4,
            ..Self::default()
        }
    }

    pub fn effective_window_step(&self) -> u32 {
        self.window_step
            .unwrap_or_else(|| self.window_length.saturating_sub(1))
            .max(1)
    }

    /// Reject configurations the pipeline cannot run with.
    pub fn validate(&self) -> IndexResult<()> {
        if self.window_length < 2 {
            return Err(IndexError::invalid_config(format!(
                "window_length must be at least 2, got {}",
                self.window_length
            )));
        }
        match self.window_step {
            Some(0) => return Err(IndexError::invalid_config("window_step must be positive")),
            Some(step) if step >= self.window_length => {
                return Err(IndexError::invalid_config(format!(
                    "window_step {step} must be below window_length {} so windows overlap",
                    self.window_length
                )))
            }
            _ => {}
        }
        if !(self.outlier_bound.is_finite() && self.outlier_bound > 0.0) {
            return Err(IndexError::invalid_config(format!(
                "outlier_bound must be a positive finite number, got {}",
                self.outlier_bound
            )));
        }
        if !(self.singular_tolerance.is_finite() && self.singular_tolerance > 0.0) {
            return Err(IndexError::invalid_config(format!(
                "singular_tolerance must be a positive finite number, got {}",
                self.singular_tolerance
            )));
        }
        self.weighting_scheme.validate()?;
        self.pair_weighting.validate()?;
        Ok(())
    }
}
