//! Supertract builder: merges tracts until every group carries enough
//! half-pairs for a stable regression.
//!
//! ALGORITHM (per period of the window, independently):
//!   1. One candidate per tract.
//!   2. Take the deficient candidate with the fewest half-pairs
//!      (ties: lowest tract id) and merge it with its nearest adjacent
//!      candidate (ties: lowest tract id).
//!   3. Repeat until no candidate is deficient, or the deficient one has
//!      no adjacent candidate left (merge exhaustion).
//!
//! RULES:
//!   - Pure function of (graph, tracts, counts, window, config).
//!   - Merges are monotonic: a group is never split within a window.
//!   - Only adjacent candidates merge, so every supertract is connected.

use crate::{
    config::RunConfig,
    diagnostics::{Diagnostic, SupertractRecord},
    geography::{Centroid, GeographyGraph, TractIdx},
    pair_extractor::HalfPairCounts,
    period::Window,
    types::{GeographyId, Period, SupertractId, TractId},
};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::{BTreeMap, BTreeSet};

pub const STAGE: &str = "supertract_builder";

/// How "nearest" is decided when choosing a merge partner.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum DistanceMetric {
    /// Planar distance between candidate centroids.
    #[default]
    CentroidEuclidean,
    /// Great-circle distance between candidate centroids.
    CentroidHaversine,
    /// Longest total shared boundary wins.
    SharedBoundary,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Supertract {
    pub id:      SupertractId,
    pub window:  Window,
    /// Member tract ids, sorted.
    pub members: Vec<TractId>,
    /// Aggregate half-pairs per window period.
    pub half_pairs: BTreeMap<Period, u32>,
    /// Periods in which this group is the regression unit for its tracts.
    pub periods: Vec<Period>,
    /// Periods in which this group exists but is below threshold.
    pub insufficient_periods: Vec<Period>,
}

impl Supertract {
    pub fn covers(&self, period: Period) -> bool {
        self.periods.contains(&period) || self.insufficient_periods.contains(&period)
    }

    pub fn is_sufficient_at(&self, period: Period) -> bool {
        self.periods.contains(&period)
    }

    pub fn half_pairs_at(&self, period: Period) -> u32 {
        self.half_pairs.get(&period).copied().unwrap_or(0)
    }

    /// Whether any period needs a regression from this group.
    pub fn needs_regression(&self) -> bool {
        !self.periods.is_empty()
    }
}

/// All supertracts of one geography for one window.
#[derive(Debug, Clone)]
pub struct SupertractPlan {
    pub geography:   GeographyId,
    pub window:      Window,
    pub supertracts: Vec<Supertract>,
    pub diagnostics: Vec<Diagnostic>,
}

impl SupertractPlan {
    /// Supertracts that partition the geography's tracts at `period`.
    pub fn covering(&self, period: Period) -> impl Iterator<Item = &Supertract> {
        self.supertracts.iter().filter(move |s| s.covers(period))
    }

    pub fn to_records(&self) -> Vec<SupertractRecord> {
        self.supertracts
            .iter()
            .map(|s| SupertractRecord {
                geography:            self.geography.clone(),
                window:               self.window,
                supertract_id:        s.id.clone(),
                tract_ids:            s.members.clone(),
                half_pairs:           s.half_pairs.clone(),
                periods:              s.periods.clone(),
                insufficient_periods: s.insufficient_periods.clone(),
            })
            .collect()
    }
}

pub fn supertract_id(members: &[TractId]) -> SupertractId {
    members.join("+")
}

/// Build the supertracts of `tracts` for every period of `window`.
pub fn build_supertracts(
    graph: &GeographyGraph,
    geography: &str,
    tracts: &[TractIdx],
    counts: &HalfPairCounts,
    window: Window,
    config: &RunConfig,
) -> SupertractPlan {
    let mut by_members: BTreeMap<Vec<TractId>, Supertract> = BTreeMap::new();
    let mut diagnostics = Vec::new();

    for period in window.periods() {
        let merger = Merger::new(graph, tracts, counts, period, config);
        let groups = merger.run();

        for group in groups {
            let mut members: Vec<TractId> = group
                .members
                .iter()
                .map(|&idx| graph.tract(idx).id.clone())
                .collect();
            members.sort();

            if group.exhausted {
                diagnostics.push(Diagnostic::MergeExhaustion {
                    geography:  geography.to_string(),
                    window,
                    period,
                    tract_ids:  members.clone(),
                    half_pairs: group.half_pairs,
                });
            }

            let supertract = by_members.entry(members.clone()).or_insert_with(|| Supertract {
                id:                   supertract_id(&members),
                window,
                half_pairs:           window_half_pairs(&members, counts, window),
                members:              members.clone(),
                periods:              Vec::new(),
                insufficient_periods: Vec::new(),
            });

            if group.half_pairs >= config.min_half_pairs {
                supertract.periods.push(period);
            } else {
                supertract.insufficient_periods.push(period);
                diagnostics.push(Diagnostic::InsufficientSample {
                    geography:     geography.to_string(),
                    window,
                    supertract_id: supertract.id.clone(),
                    period,
                    half_pairs:    group.half_pairs,
                });
            }
        }
    }

    let supertracts: Vec<Supertract> = by_members.into_values().collect();
    log::debug!(
        "geo={geography} window={}..{} supertracts={} flags={}",
        window.start,
        window.end,
        supertracts.len(),
        diagnostics.len()
    );

    SupertractPlan {
        geography: geography.to_string(),
        window,
        supertracts,
        diagnostics,
    }
}

fn window_half_pairs(members: &[TractId], counts: &HalfPairCounts, window: Window) -> BTreeMap<Period, u32> {
    window
        .periods()
        .map(|p| (p, members.iter().map(|t| counts.get(t, p)).sum()))
        .collect()
}

// ── Merging ──────────────────────────────────────────────────────────────────

const NO_OWNER: usize = usize::MAX;

#[derive(Debug, Clone)]
struct Candidate {
    members:    Vec<TractIdx>,
    half_pairs: u32,
    centroid:   Centroid,
    /// Lowest member tract id, for deterministic tie-breaks.
    min_id:     TractId,
    exhausted:  bool,
}

/// Final group produced by merging at one period.
struct Group {
    members:    Vec<TractIdx>,
    half_pairs: u32,
    exhausted:  bool,
}

struct Merger<'a> {
    graph:      &'a GeographyGraph,
    metric:     DistanceMetric,
    threshold:  u32,
    candidates: Vec<Option<Candidate>>,
    /// Candidate index owning each tract; NO_OWNER outside the geography.
    owner:      Vec<usize>,
}

impl<'a> Merger<'a> {
    fn new(
        graph: &'a GeographyGraph,
        tracts: &[TractIdx],
        counts: &HalfPairCounts,
        period: Period,
        config: &RunConfig,
    ) -> Self {
        let mut owner = vec![NO_OWNER; graph.len()];
        let mut candidates = Vec::with_capacity(tracts.len());
        for &idx in tracts {
            if owner[idx] != NO_OWNER {
                continue;
            }
            let tract = graph.tract(idx);
            owner[idx] = candidates.len();
            candidates.push(Some(Candidate {
                members:    vec![idx],
                half_pairs: counts.get(&tract.id, period),
                centroid:   tract.centroid,
                min_id:     tract.id.clone(),
                exhausted:  false,
            }));
        }
        Self {
            graph,
            metric: config.distance_metric,
            threshold: config.min_half_pairs,
            candidates,
            owner,
        }
    }

    fn run(mut self) -> Vec<Group> {
        while let Some(target) = self.next_deficient() {
            match self.nearest_neighbor(target) {
                Some(partner) => self.merge(target, partner),
                None => {
                    if let Some(c) = self.candidates[target].as_mut() {
                        c.exhausted = true;
                    }
                }
            }
        }
        self.candidates
            .into_iter()
            .flatten()
            .map(|c| Group {
                members:    c.members,
                half_pairs: c.half_pairs,
                exhausted:  c.exhausted,
            })
            .collect()
    }

    fn next_deficient(&self) -> Option<usize> {
        self.candidates
            .iter()
            .enumerate()
            .filter_map(|(i, c)| c.as_ref().map(|c| (i, c)))
            .filter(|(_, c)| !c.exhausted && c.half_pairs < self.threshold)
            .min_by(|(_, a), (_, b)| {
                a.half_pairs
                    .cmp(&b.half_pairs)
                    .then_with(|| a.min_id.cmp(&b.min_id))
            })
            .map(|(i, _)| i)
    }

    /// Adjacent candidates with the total shared boundary to each.
    fn adjacent(&self, target: usize) -> BTreeMap<usize, f64> {
        let mut adjacent = BTreeMap::new();
        let Some(candidate) = self.candidates[target].as_ref() else {
            return adjacent;
        };
        for &member in &candidate.members {
            for edge in self.graph.neighbors(member) {
                let other = self.owner[edge.to];
                if other != NO_OWNER && other != target {
                    *adjacent.entry(other).or_insert(0.0) += edge.shared_boundary;
                }
            }
        }
        adjacent
    }

    fn nearest_neighbor(&self, target: usize) -> Option<usize> {
        let origin = self.candidates[target].as_ref()?.centroid;
        let adjacent = self.adjacent(target);

        adjacent
            .into_iter()
            .filter_map(|(idx, boundary)| {
                let c = self.candidates[idx].as_ref()?;
                // Smaller score is nearer.
                let score = match self.metric {
                    DistanceMetric::CentroidEuclidean => origin.euclidean(&c.centroid),
                    DistanceMetric::CentroidHaversine => origin.haversine_km(&c.centroid),
                    DistanceMetric::SharedBoundary    => -boundary,
                };
                Some((idx, score, c.min_id.as_str()))
            })
            .min_by(|a, b| compare_scores(a.1, b.1).then_with(|| a.2.cmp(b.2)))
            .map(|(idx, _, _)| idx)
    }

    fn merge(&mut self, a: usize, b: usize) {
        let (keep, absorb) = if a < b { (a, b) } else { (b, a) };
        let Some(absorbed) = self.candidates[absorb].take() else {
            return;
        };
        for &m in &absorbed.members {
            self.owner[m] = keep;
        }
        let graph = self.graph;
        if let Some(kept) = self.candidates[keep].as_mut() {
            kept.members.extend(absorbed.members);
            kept.members.sort_unstable();
            kept.half_pairs += absorbed.half_pairs;
            kept.centroid = Centroid::mean(kept.members.iter().map(|&m| &graph.tract(m).centroid));
            if absorbed.min_id < kept.min_id {
                kept.min_id = absorbed.min_id;
            }
        }
    }
}

/// Float comparison that treats near-equal scores as ties, so the
/// lowest-id rule decides them.
fn compare_scores(a: f64, b: f64) -> Ordering {
    let scale = a.abs().max(b.abs()).max(1.0);
    if (a - b).abs() <= 1e-9 * scale {
        Ordering::Equal
    } else {
        a.total_cmp(&b)
    }
}

/// Tracts referenced by any supertract of a plan.
pub fn covered_tracts(plan: &SupertractPlan) -> BTreeSet<&str> {
    plan.supertracts
        .iter()
        .flat_map(|s| s.members.iter().map(String::as_str))
        .collect()
}
