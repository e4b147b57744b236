//! rsai-core: repeat-sales house price index engine.
//!
//! Transactions flow forward through five stages:
//! pair extraction, supertract construction, BMN regression,
//! aggregation, then chaining and rebasing. See `pipeline` for the
//! orchestration and its barriers.

pub mod aggregator;
pub mod bmn_regression;
pub mod chainer;
pub mod config;
pub mod diagnostics;
pub mod error;
pub mod geography;
pub mod pair_extractor;
pub mod period;
pub mod pipeline;
pub mod rng;
pub mod series;
pub mod supertract_builder;
pub mod synthetic;
pub mod types;
