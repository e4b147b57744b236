//! Geography adjacency graph, as supplied by the geography collaborator.
//!
//! Tracts live in an arena and refer to each other by integer index, so
//! the graph is plain data: cheap to share read-only across workers.
//! Adjacency is symmetric by construction.

use crate::{
    error::{IndexError, IndexResult},
    pair_extractor::Transaction,
    types::{GeographyId, TractId},
};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap, VecDeque};

/// Arena index of a tract inside a `GeographyGraph`.
pub type TractIdx = usize;

const EARTH_RADIUS_KM: f64 = 6371.0;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Default)]
pub struct Centroid {
    pub latitude:  f64,
    pub longitude: f64,
}

impl Centroid {
    pub fn new(latitude: f64, longitude: f64) -> Self {
        Self { latitude, longitude }
    }

    /// Planar distance in coordinate units.
    pub fn euclidean(&self, other: &Centroid) -> f64 {
        (self.latitude - other.latitude).hypot(self.longitude - other.longitude)
    }

    /// Great-circle distance in kilometres.
    pub fn haversine_km(&self, other: &Centroid) -> f64 {
        let (lat1, lat2) = (self.latitude.to_radians(), other.latitude.to_radians());
        let dlat = lat2 - lat1;
        let dlon = (other.longitude - self.longitude).to_radians();
        let a = (dlat / 2.0).sin().powi(2) + lat1.cos() * lat2.cos() * (dlon / 2.0).sin().powi(2);
        2.0 * EARTH_RADIUS_KM * a.sqrt().asin()
    }

    /// Unweighted mean of a set of centroids.
    pub fn mean<'a>(centroids: impl IntoIterator<Item = &'a Centroid>) -> Centroid {
        let (mut lat, mut lon, mut n) = (0.0, 0.0, 0usize);
        for c in centroids {
            lat += c.latitude;
            lon += c.longitude;
            n += 1;
        }
        if n == 0 {
            return Centroid::default();
        }
        Centroid::new(lat / n as f64, lon / n as f64)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Tract {
    pub id:       TractId,
    pub centroid: Centroid,
    /// Higher-level geography (county, CBSA) the tract rolls up into.
    #[serde(default)]
    pub parent_id: Option<GeographyId>,
    #[serde(default)]
    pub housing_units: Option<u64>,
}

impl Tract {
    pub fn new(id: impl Into<TractId>, latitude: f64, longitude: f64) -> Self {
        Self {
            id:            id.into(),
            centroid:      Centroid::new(latitude, longitude),
            parent_id:     None,
            housing_units: None,
        }
    }

    pub fn with_parent(mut self, parent_id: impl Into<GeographyId>) -> Self {
        self.parent_id = Some(parent_id.into());
        self
    }

    pub fn with_housing_units(mut self, units: u64) -> Self {
        self.housing_units = Some(units);
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Edge {
    pub to: TractIdx,
    /// Length of the shared boundary, 1.0 when unknown.
    pub shared_boundary: f64,
}

/// One adjacency as it arrives from the geography collaborator.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AdjacencyRecord {
    pub a: TractId,
    pub b: TractId,
    #[serde(default)]
    pub shared_boundary: Option<f64>,
}

/// A higher-level geography an index series is requested for.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Region {
    pub id:        GeographyId,
    pub tract_ids: Vec<TractId>,
}

#[derive(Debug, Clone, Default)]
pub struct GeographyGraph {
    tracts:    Vec<Tract>,
    index:     HashMap<TractId, TractIdx>,
    adjacency: Vec<Vec<Edge>>,
}

impl GeographyGraph {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_records(tracts: Vec<Tract>, adjacency: &[AdjacencyRecord]) -> IndexResult<Self> {
        let mut graph = Self::new();
        for tract in tracts {
            graph.add_tract(tract);
        }
        for edge in adjacency {
            graph.add_adjacency(&edge.a, &edge.b, edge.shared_boundary)?;
        }
        Ok(graph)
    }

    /// Insert a tract, replacing the metadata of an existing one with the
    /// same id. Returns its arena index.
    pub fn add_tract(&mut self, tract: Tract) -> TractIdx {
        if let Some(&idx) = self.index.get(&tract.id) {
            self.tracts[idx] = tract;
            return idx;
        }
        let idx = self.tracts.len();
        self.index.insert(tract.id.clone(), idx);
        self.tracts.push(tract);
        self.adjacency.push(Vec::new());
        idx
    }

    /// Record that `a` and `b` share a boundary. Self-loops and duplicate
    /// edges are ignored.
    pub fn add_adjacency(&mut self, a: &str, b: &str, shared_boundary: Option<f64>) -> IndexResult<()> {
        let ia = self.require(a)?;
        let ib = self.require(b)?;
        if ia == ib || self.adjacency[ia].iter().any(|e| e.to == ib) {
            return Ok(());
        }
        let shared_boundary = shared_boundary.unwrap_or(1.0);
        self.adjacency[ia].push(Edge { to: ib, shared_boundary });
        self.adjacency[ib].push(Edge { to: ia, shared_boundary });
        Ok(())
    }

    fn require(&self, id: &str) -> IndexResult<TractIdx> {
        self.idx(id).ok_or_else(|| {
            IndexError::invalid_config(format!("adjacency references unknown tract '{id}'"))
        })
    }

    pub fn idx(&self, id: &str) -> Option<TractIdx> {
        self.index.get(id).copied()
    }

    pub fn contains(&self, id: &str) -> bool {
        self.index.contains_key(id)
    }

    pub fn tract(&self, idx: TractIdx) -> &Tract {
        &self.tracts[idx]
    }

    pub fn neighbors(&self, idx: TractIdx) -> &[Edge] {
        &self.adjacency[idx]
    }

    pub fn len(&self) -> usize {
        self.tracts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tracts.is_empty()
    }

    pub fn tracts(&self) -> impl Iterator<Item = &Tract> {
        self.tracts.iter()
    }

    /// Fail on the first transaction whose tract is not in the graph.
    pub fn check_transactions(&self, transactions: &[Transaction]) -> IndexResult<()> {
        match transactions.iter().find(|t| !self.contains(&t.tract_id)) {
            Some(t) => Err(IndexError::InvalidGeography {
                tract_id:    t.tract_id.clone(),
                property_id: t.property_id.clone(),
            }),
            None => Ok(()),
        }
    }

    /// One region per distinct parent id; tracts without a parent are
    /// grouped under `fallback_id`.
    pub fn regions_by_parent(&self, fallback_id: &str) -> Vec<Region> {
        let mut grouped: BTreeMap<GeographyId, Vec<TractId>> = BTreeMap::new();
        for tract in &self.tracts {
            let parent = tract.parent_id.clone().unwrap_or_else(|| fallback_id.to_string());
            grouped.entry(parent).or_default().push(tract.id.clone());
        }
        grouped
            .into_iter()
            .map(|(id, mut tract_ids)| {
                tract_ids.sort();
                Region { id, tract_ids }
            })
            .collect()
    }

    /// Whether the given tracts form one connected subgraph, using only
    /// edges between members.
    pub fn is_connected(&self, members: &[TractIdx]) -> bool {
        let Some(&start) = members.first() else {
            return true;
        };
        let mut seen = vec![false; self.tracts.len()];
        let in_set: Vec<bool> = {
            let mut v = vec![false; self.tracts.len()];
            for &m in members {
                v[m] = true;
            }
            v
        };
        let mut queue = VecDeque::from([start]);
        seen[start] = true;
        let mut reached = 1;
        while let Some(idx) = queue.pop_front() {
            for edge in &self.adjacency[idx] {
                if in_set[edge.to] && !seen[edge.to] {
                    seen[edge.to] = true;
                    reached += 1;
                    queue.push_back(edge.to);
                }
            }
        }
        reached == members.iter().filter(|&&m| in_set[m]).count()
    }
}
