//! index-runner: headless repeat-sales index runner over a synthetic market.
//!
//! Usage:
//!   index-runner --seed 12345 --rows 4 --cols 6 --years 10
//!   index-runner --seed 12345 --config run.json --json > run.json

use anyhow::Result;
use rsai_core::{
    config::RunConfig,
    pipeline::{IndexPipeline, PipelineOutput},
    synthetic::SyntheticMarket,
};
use std::env;

#[derive(serde::Serialize)]
struct RunReport<'a> {
    started_at: String,
    market:     MarketReport,
    config:     &'a RunConfig,
    output:     &'a PipelineOutput,
}

#[derive(serde::Serialize)]
struct MarketReport {
    seed:         u64,
    tracts:       usize,
    transactions: usize,
    monthly_rate: f64,
    noise_sd:     f64,
}

fn main() -> Result<()> {
    env_logger::init();

    let args: Vec<String> = env::args().collect();
    let defaults = SyntheticMarket::default();
    let market = SyntheticMarket {
        seed:                 parse_arg(&args, "--seed", defaults.seed),
        rows:                 parse_arg(&args, "--rows", defaults.rows),
        cols:                 parse_arg(&args, "--cols", defaults.cols),
        regions:              parse_arg(&args, "--regions", defaults.regions),
        properties_per_tract: parse_arg(&args, "--properties", defaults.properties_per_tract),
        years:                parse_arg(&args, "--years", defaults.years),
        monthly_rate:         parse_arg(&args, "--rate", defaults.monthly_rate),
        noise_sd:             parse_arg(&args, "--noise", defaults.noise_sd),
        ..defaults
    };
    let config_path = str_arg(&args, "--config");
    let json = args.iter().any(|a| a == "--json");

    let config = match config_path {
        Some(path) => RunConfig::load(path)?,
        None => RunConfig {
            base_year: market.start_year,
            min_half_pairs: 20,
            window_length: 5,
            ..RunConfig::default()
        },
    };

    if !json {
        println!("rsai index-runner");
        println!("  seed:        {}", market.seed);
        println!("  grid:        {}x{}", market.rows, market.cols);
        println!("  years:       {}", market.years);
        println!("  frequency:   {:?}", config.frequency);
        println!("  config:      {}", config_path.unwrap_or("(built-in)"));
        println!();
    }

    let generated = market.generate()?;
    let run_id = format!("run-{}-{}", market.seed, uuid::Uuid::new_v4());
    let pipeline = IndexPipeline::new(config.clone(), generated.graph);
    let output = pipeline.run(run_id, &generated.transactions, &generated.regions)?;

    if json {
        let report = RunReport {
            started_at: chrono::Utc::now().to_rfc3339(),
            market: MarketReport {
                seed:         market.seed,
                tracts:       market.rows * market.cols,
                transactions: generated.transactions.len(),
                monthly_rate: market.monthly_rate,
                noise_sd:     market.noise_sd,
            },
            config: &config,
            output: &output,
        };
        println!("{}", serde_json::to_string_pretty(&report)?);
        log::info!("run={} written as json", output.run_id);
    } else {
        print_summary(&market, &output);
    }

    Ok(())
}

fn print_summary(market: &SyntheticMarket, output: &PipelineOutput) {
    let stats = &output.diagnostics.extraction;
    println!("=== RUN SUMMARY ===");
    println!("  run_id:        {}", output.run_id);
    println!("  transactions:  {}", stats.transactions);
    println!("  pairs:         {}", stats.pairs);
    println!("  outliers:      {}", stats.outliers);
    println!("  supertracts:   {}", output.diagnostics.supertracts.len());
    println!("  regressions:   {}", output.diagnostics.regressions.len());
    println!("  diagnostics:   {}", output.diagnostics.entries.len());

    for (geography, series) in &output.series {
        println!();
        println!("=== {geography} ===");
        match series.summary() {
            Some(s) => println!(
                "  ok {}/{} | min {:.1} | max {:.1} | mean {:.1}",
                s.ok_periods, s.total_periods, s.min_value, s.max_value, s.mean_value
            ),
            None => println!("  (no data)"),
        }
        for v in &series.values {
            match v.value {
                Some(value) => println!("  {} | {value:>8.2} | depth {}", v.label, v.sample_depth),
                None => println!("  {} |  no data |", v.label),
            }
        }
    }

    let annual = (1.0 + market.monthly_rate).powi(12) - 1.0;
    println!();
    println!("  true annual growth: {:.2}%", annual * 100.0);
}

fn parse_arg<T: std::str::FromStr + Copy>(args: &[String], flag: &str, default: T) -> T {
    args.windows(2)
        .find(|w| w[0] == flag)
        .and_then(|w| w[1].parse().ok())
        .unwrap_or(default)
}

fn str_arg<'a>(args: &'a [String], flag: &str) -> Option<&'a str> {
    args.windows(2)
        .find(|w| w[0] == flag)
        .map(|w| w[1].as_str())
}
