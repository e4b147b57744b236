//! Same inputs, same config: byte-identical output.
//!
//! Regressions run on a worker pool, so this also guards against results
//! depending on task completion order.

use rsai_core::{config::RunConfig, pipeline::IndexPipeline, synthetic::SyntheticMarket};

fn run_json(seed: u64) -> String {
    let generated = SyntheticMarket {
        seed,
        noise_sd: 0.03,
        ..SyntheticMarket::default()
    }
    .generate()
    .expect("generate market");
    let pipeline = IndexPipeline::new(RunConfig::default_test(), generated.graph);
    let output = pipeline
        .run(format!("det-test-{seed}"), &generated.transactions, &generated.regions)
        .expect("pipeline run");
    let mut json = serde_json::to_string(&output.series).expect("serialize series");
    json.push_str(&output.diagnostics.to_json().expect("serialize diagnostics"));
    json
}

#[test]
fn same_seed_produces_identical_output() {
    const SEED: u64 = 0xDEAD_BEEF_CAFE_1234;

    let a = run_json(SEED);
    let b = run_json(SEED);
    assert_eq!(a.len(), b.len(), "output lengths differ");
    assert!(a == b, "same seed produced different output");
}

#[test]
fn synthetic_market_is_a_pure_function_of_its_seed() {
    let a = SyntheticMarket::default().generate().expect("generate market");
    let b = SyntheticMarket::default().generate().expect("generate market");
    assert_eq!(a.transactions, b.transactions);
    assert_eq!(a.regions, b.regions);

    let other = SyntheticMarket { seed: 99, ..SyntheticMarket::default() }
        .generate()
        .expect("generate market");
    assert_ne!(
        a.transactions, other.transactions,
        "different seeds produced identical markets; seed is not being used"
    );
}
