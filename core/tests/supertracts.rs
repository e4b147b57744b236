//! Supertract builder: merge order, exhaustion, partition and connectivity.

use chrono::NaiveDate;
use rsai_core::{
    config::RunConfig,
    diagnostics::Diagnostic,
    geography::{GeographyGraph, Tract},
    pair_extractor::{HalfPairCounts, RepeatSalePair},
    period::Window,
    pipeline::IndexPipeline,
    supertract_builder::{build_supertracts, covered_tracts, DistanceMetric},
    synthetic::SyntheticMarket,
    types::Period,
};
use std::collections::BTreeSet;

fn pair(property: &str, tract: &str, first: Period, second: Period) -> RepeatSalePair {
    RepeatSalePair {
        property_id:     property.into(),
        tract_id:        tract.into(),
        first_date:      NaiveDate::from_ymd_opt(first, 6, 1).expect("date"),
        second_date:     NaiveDate::from_ymd_opt(second, 6, 1).expect("date"),
        first_price:     100_000.0,
        second_price:    110_000.0,
        first_period:    first,
        second_period:   second,
        log_price_ratio: 1.1f64.ln(),
    }
}

/// `n` pairs in `tract` spanning the whole window, so each period gets `n`.
fn pairs_in(tract: &str, n: usize, window: Window) -> Vec<RepeatSalePair> {
    (0..n)
        .map(|i| pair(&format!("{tract}-{i}"), tract, window.start, window.end))
        .collect()
}

/// A - B - C along a line, plus an island D with no neighbours.
fn line_graph() -> GeographyGraph {
    let mut graph = GeographyGraph::new();
    graph.add_tract(Tract::new("A", 0.0, 0.0));
    graph.add_tract(Tract::new("B", 0.0, 1.0));
    graph.add_tract(Tract::new("C", 0.0, 2.0));
    graph.add_tract(Tract::new("D", 5.0, 5.0));
    graph.add_adjacency("A", "B", None).expect("A-B");
    graph.add_adjacency("B", "C", None).expect("B-C");
    graph
}

#[test]
fn deficient_line_merges_into_one_supertract() {
    let graph = line_graph();
    let window = Window::new(2015, 2016);
    let mut pairs = pairs_in("A", 3, window);
    pairs.extend(pairs_in("B", 4, window));
    pairs.extend(pairs_in("C", 20, window));
    let counts = HalfPairCounts::from_pairs(&pairs);

    let tracts: Vec<_> = ["A", "B", "C"].iter().map(|t| graph.idx(t).expect("tract")).collect();
    let config = RunConfig::default_test();
    let plan = build_supertracts(&graph, "G", &tracts, &counts, window, &config);

    assert_eq!(plan.supertracts.len(), 1, "got {:?}", plan.supertracts);
    let st = &plan.supertracts[0];
    assert_eq!(st.members, vec!["A", "B", "C"]);
    assert_eq!(st.id, "A+B+C");
    assert_eq!(st.periods, vec![2015, 2016]);
    assert_eq!(st.half_pairs_at(2015), 27);
    assert!(plan.diagnostics.is_empty(), "unexpected flags: {:?}", plan.diagnostics);
}

#[test]
fn sufficient_tracts_stay_alone() {
    let graph = line_graph();
    let window = Window::new(2015, 2016);
    let mut pairs = pairs_in("A", 12, window);
    pairs.extend(pairs_in("B", 15, window));
    pairs.extend(pairs_in("C", 3, window));
    let counts = HalfPairCounts::from_pairs(&pairs);

    let tracts: Vec<_> = ["A", "B", "C"].iter().map(|t| graph.idx(t).expect("tract")).collect();
    let plan = build_supertracts(&graph, "G", &tracts, &counts, window, &RunConfig::default_test());

    let ids: Vec<_> = plan.supertracts.iter().map(|s| s.id.as_str()).collect();
    assert_eq!(ids, vec!["A", "B+C"], "C may only merge with its neighbour B");
}

#[test]
fn isolated_deficient_tract_is_flagged_not_dropped() {
    let graph = line_graph();
    let window = Window::new(2015, 2016);
    let mut pairs = pairs_in("A", 20, window);
    pairs.extend(pairs_in("B", 20, window));
    pairs.extend(pairs_in("D", 2, window));
    let counts = HalfPairCounts::from_pairs(&pairs);

    let tracts: Vec<_> = ["A", "B", "D"].iter().map(|t| graph.idx(t).expect("tract")).collect();
    let plan = build_supertracts(&graph, "G", &tracts, &counts, window, &RunConfig::default_test());

    let island = plan
        .supertracts
        .iter()
        .find(|s| s.members == ["D"])
        .expect("D must still appear");
    assert!(island.periods.is_empty());
    assert_eq!(island.insufficient_periods, vec![2015, 2016]);
    assert!(!island.needs_regression());

    let exhausted = plan
        .diagnostics
        .iter()
        .filter(|d| matches!(d, Diagnostic::MergeExhaustion { tract_ids, .. } if tract_ids == &["D"]))
        .count();
    let insufficient = plan
        .diagnostics
        .iter()
        .filter(|d| matches!(d, Diagnostic::InsufficientSample { supertract_id, .. } if supertract_id == "D"))
        .count();
    assert_eq!(exhausted, 2, "one exhaustion flag per period");
    assert_eq!(insufficient, 2);
    assert_eq!(covered_tracts(&plan), BTreeSet::from(["A", "B", "D"]));
}

/// Deficient X with sufficient neighbours Y (north) and Z (east).
/// Z is added first so arena order disagrees with id order.
fn fork_graph(z_distance: f64, boundaries: (Option<f64>, Option<f64>)) -> GeographyGraph {
    let mut graph = GeographyGraph::new();
    graph.add_tract(Tract::new("Z", z_distance, 0.0));
    graph.add_tract(Tract::new("X", 0.0, 0.0));
    graph.add_tract(Tract::new("Y", 0.0, 1.0));
    graph.add_adjacency("X", "Z", boundaries.1).expect("X-Z");
    graph.add_adjacency("X", "Y", boundaries.0).expect("X-Y");
    graph
}

fn fork_ids(graph: &GeographyGraph, config: &RunConfig) -> Vec<String> {
    let window = Window::new(2015, 2016);
    let mut pairs = pairs_in("X", 3, window);
    pairs.extend(pairs_in("Y", 20, window));
    pairs.extend(pairs_in("Z", 20, window));
    let counts = HalfPairCounts::from_pairs(&pairs);

    let tracts: Vec<_> = ["X", "Y", "Z"].iter().map(|t| graph.idx(t).expect("tract")).collect();
    let plan = build_supertracts(graph, "G", &tracts, &counts, window, config);
    let mut ids: Vec<String> = plan.supertracts.iter().map(|s| s.id.clone()).collect();
    ids.sort();
    ids
}

#[test]
fn equidistant_neighbours_tie_to_the_lowest_id() {
    let graph = fork_graph(1.0, (None, None));
    assert_eq!(fork_ids(&graph, &RunConfig::default_test()), vec!["X+Y", "Z"]);
}

#[test]
fn shared_boundary_metric_prefers_the_longer_border() {
    let graph = fork_graph(3.0, (Some(1.0), Some(5.0)));

    let nearest = fork_ids(&graph, &RunConfig::default_test());
    assert_eq!(nearest, vec!["X+Y", "Z"], "Y has the nearer centroid");

    let config = RunConfig {
        distance_metric: DistanceMetric::SharedBoundary,
        ..RunConfig::default_test()
    };
    assert_eq!(fork_ids(&graph, &config), vec!["X+Z", "Y"]);
}

#[test]
fn synthetic_supertracts_partition_and_stay_connected() {
    let market = SyntheticMarket {
        properties_per_tract: 30,
        ..SyntheticMarket::default()
    };
    let generated = market.generate().expect("generate market");
    let regions = generated.regions.clone();
    let pipeline = IndexPipeline::new(RunConfig::default_test(), generated.graph);
    let output = pipeline
        .run("partition-test".into(), &generated.transactions, &regions)
        .expect("pipeline run");

    let records = &output.diagnostics.supertracts;
    assert!(!records.is_empty());

    for record in records {
        let members: Vec<_> = record
            .tract_ids
            .iter()
            .map(|t| pipeline.graph().idx(t).expect("known tract"))
            .collect();
        assert!(
            pipeline.graph().is_connected(&members),
            "supertract {} is not connected",
            record.supertract_id
        );
    }

    for region in &regions {
        let windows: BTreeSet<_> = records
            .iter()
            .filter(|r| r.geography == region.id)
            .map(|r| r.window)
            .collect();
        for window in windows {
            for period in window.periods() {
                let mut seen: Vec<&str> = records
                    .iter()
                    .filter(|r| r.geography == region.id && r.window == window)
                    .filter(|r| r.periods.contains(&period) || r.insufficient_periods.contains(&period))
                    .flat_map(|r| r.tract_ids.iter().map(String::as_str))
                    .collect();
                seen.sort();
                let expected: Vec<&str> = region.tract_ids.iter().map(String::as_str).collect();
                assert_eq!(
                    seen, expected,
                    "region {} window {window:?} period {period}: tracts must appear exactly once",
                    region.id
                );
            }
        }
    }
}
