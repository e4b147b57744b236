//! Synthetic repeat-sales market with a known appreciation path.
//!
//! A rows × cols grid of tracts with rook adjacency, grouped into regions
//! by column band. Every property sells at least twice; each sale is
//! priced off a constant monthly appreciation rate, optionally with
//! log-normal noise. Fully determined by `seed`.

use crate::{
    error::{IndexError, IndexResult},
    geography::{GeographyGraph, Region, Tract},
    pair_extractor::Transaction,
    rng::{MarketRng, Stream},
};
use chrono::{Datelike, Duration, NaiveDate};

#[derive(Debug, Clone)]
pub struct SyntheticMarket {
    pub rows:                 usize,
    pub cols:                 usize,
    /// Column bands, each becoming one parent region.
    pub regions:              usize,
    pub properties_per_tract: usize,
    /// Sales per property are drawn from `2..=max_sales`.
    pub max_sales:            u32,
    pub start_year:           i32,
    pub years:                u32,
    pub monthly_rate:         f64,
    /// Standard deviation of the per-sale log price noise.
    pub noise_sd:             f64,
    pub base_price:           f64,
    pub seed:                 u64,
}

impl Default for SyntheticMarket {
    fn default() -> Self {
        Self {
            rows:                 3,
            cols:                 4,
            regions:              2,
            properties_per_tract: 60,
            max_sales:            3,
            start_year:           2010,
            years:                8,
            monthly_rate:         0.004,
            noise_sd:             0.0,
            base_price:           250_000.0,
            seed:                 42,
        }
    }
}

#[derive(Debug, Clone)]
pub struct GeneratedMarket {
    pub graph:        GeographyGraph,
    pub regions:      Vec<Region>,
    pub transactions: Vec<Transaction>,
}

impl SyntheticMarket {
    pub fn tract_id(row: usize, col: usize) -> String {
        format!("T{row:02}{col:02}")
    }

    pub fn region_id(&self, col: usize) -> String {
        let band = col * self.regions.max(1) / self.cols.max(1);
        format!("R{band}")
    }

    /// True index level, relative to the first month, `months` in.
    pub fn true_level(&self, months: i32) -> f64 {
        100.0 * (1.0 + self.monthly_rate).powi(months)
    }

    pub fn generate(&self) -> IndexResult<GeneratedMarket> {
        let mut layout = MarketRng::for_stream(self.seed, Stream::Layout);
        let mut timing = MarketRng::for_stream(self.seed, Stream::SaleTiming);
        let mut noise = MarketRng::for_stream(self.seed, Stream::PriceNoise);
        let mut base = MarketRng::for_stream(self.seed, Stream::BasePrice);

        // ── Geography ──────────────────────────────────────────────────
        let mut graph = GeographyGraph::new();
        for r in 0..self.rows {
            for c in 0..self.cols {
                let tract = Tract::new(Self::tract_id(r, c), 40.0 + r as f64 * 0.01, -75.0 + c as f64 * 0.01)
                    .with_parent(self.region_id(c))
                    .with_housing_units(500 + layout.next_u64_below(1500));
                graph.add_tract(tract);
            }
        }
        for r in 0..self.rows {
            for c in 0..self.cols {
                let here = Self::tract_id(r, c);
                let edges = [(r + 1 < self.rows, r + 1, c), (c + 1 < self.cols, r, c + 1)];
                for (exists, nr, nc) in edges {
                    if exists {
                        graph.add_adjacency(&here, &Self::tract_id(nr, nc), None)?;
                    }
                }
            }
        }
        let regions = graph.regions_by_parent("R0");

        // ── Sales ──────────────────────────────────────────────────────
        let start = NaiveDate::from_ymd_opt(self.start_year, 1, 1).ok_or_else(|| {
            IndexError::invalid_config(format!("synthetic start_year {} is out of range", self.start_year))
        })?;
        let span_days = (self.years.max(1) as u64) * 365;
        let mut transactions = Vec::new();

        for r in 0..self.rows {
            for c in 0..self.cols {
                let tract_id = Self::tract_id(r, c);
                for i in 0..self.properties_per_tract {
                    let property_id = format!("{tract_id}-P{i:04}");
                    let quality = (0.3 * base.standard_normal()).exp();
                    let sales = 2 + timing.next_u64_below(self.max_sales.max(2) as u64 - 1);

                    for _ in 0..sales {
                        let date = start + Duration::days(timing.next_u64_below(span_days) as i64);
                        let months = (date.year() - self.start_year) * 12 + date.month0() as i32;
                        let price = self.base_price
                            * quality
                            * self.true_level(months) / 100.0
                            * (self.noise_sd * noise.standard_normal()).exp();
                        transactions.push(Transaction {
                            property_id: property_id.clone(),
                            sale_date:   date,
                            price,
                            tract_id:    tract_id.clone(),
                        });
                    }
                }
            }
        }

        log::debug!(
            "synthetic: seed={} tracts={} transactions={}",
            self.seed,
            graph.len(),
            transactions.len()
        );
        Ok(GeneratedMarket { graph, regions, transactions })
    }
}
