// decision-intel-service/src/graph.rs
// ============================================================================
// Module: Decision Graph
// Description: Typed, weighted edges between decisions with PageRank
//              salience (§3.5, §4.9).
// Purpose: Let an agent trace why a decision exists and which decisions are
//          load-bearing.
// Dependencies: decision-intel-core, std::collections, std::fs, std::sync
// ============================================================================

//! ## Overview
//! [`DecisionGraph`] is a directed multigraph on [`DecisionId`]s. Edges are
//! append-only: a restart replays the journal to rebuild the in-memory
//! adjacency rather than trusting a snapshot (§4.9: "append-only edge
//! journal + rebuild on restart"). Salience is PageRank over the edge
//! weights, recomputed on demand or automatically every
//! [`DEFAULT_RECOMPUTE_INTERVAL`] edge mutations (§4.9).

use std::collections::HashMap;
use std::collections::HashSet;
use std::collections::VecDeque;
use std::fs::File;
use std::fs::OpenOptions;
use std::io::BufRead;
use std::io::BufReader;
use std::io::Write as _;
use std::path::PathBuf;
use std::sync::Mutex;

use decision_intel_core::DecisionId;
use decision_intel_core::Timestamp;
use serde::Deserialize;
use serde::Serialize;
use thiserror::Error;

/// Typed relation between two decisions (§3.5).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EdgeType {
    DependsOn,
    Supersedes,
    Contradicts,
    Refines,
    RelatesTo,
    CausedBy,
    Blocks,
}

/// Default top-K auto-linked on `recordDecision` (§4.9).
pub const DEFAULT_AUTO_LINK_TOP_K: usize = 5;
/// Default number of edge mutations between automatic PageRank recomputes
/// (§4.9).
pub const DEFAULT_RECOMPUTE_INTERVAL: u64 = 100;
/// PageRank damping factor (§4.9).
pub const PAGERANK_DAMPING: f64 = 0.85;
/// Clamp bounds applied to auto-linked `relates_to` weights derived from
/// retrieval distance (§4.9).
pub const AUTO_LINK_WEIGHT_MIN: f64 = 0.05;
pub const AUTO_LINK_WEIGHT_MAX: f64 = 1.0;

/// A directed, typed, weighted edge between two decisions (§3.5).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Edge {
    pub source: DecisionId,
    pub target: DecisionId,
    pub edge_type: EdgeType,
    pub weight: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub context: Option<String>,
    pub created_at: Timestamp,
}

/// A traversal result: the edges reachable from a root within a depth bound
/// (§4.9).
#[derive(Debug, Clone, Serialize)]
pub struct GraphView {
    pub root: DecisionId,
    pub edges: Vec<Edge>,
    pub nodes: Vec<DecisionId>,
}

#[derive(Debug, Error)]
pub enum GraphError {
    #[error("decision graph journal io error: {0}")]
    Io(String),
    #[error("edge endpoint does not exist: {0}")]
    UnknownEndpoint(String),
    #[error("self-loop edges are not permitted: {0}")]
    SelfLoop(String),
}

struct Inner {
    edges: Vec<Edge>,
    salience: HashMap<DecisionId, f64>,
    mutations_since_recompute: u64,
}

/// The decision graph: edges, traversal, and PageRank salience (§3.5, §4.9).
pub struct DecisionGraph {
    inner: Mutex<Inner>,
    journal_path: Option<PathBuf>,
    recompute_interval: u64,
}

impl DecisionGraph {
    #[must_use]
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(Inner { edges: Vec::new(), salience: HashMap::new(), mutations_since_recompute: 0 }),
            journal_path: None,
            recompute_interval: DEFAULT_RECOMPUTE_INTERVAL,
        }
    }

    #[must_use]
    pub fn with_recompute_interval(mut self, interval: u64) -> Self {
        self.recompute_interval = interval.max(1);
        self
    }

    /// Attaches a journal file, replaying existing edges (§4.9).
    ///
    /// # Errors
    ///
    /// Returns [`GraphError::Io`] if the journal exists but cannot be read.
    pub fn with_journal(mut self, path: impl Into<PathBuf>) -> Result<Self, GraphError> {
        let path = path.into();
        if path.exists() {
            let file = File::open(&path).map_err(|err| GraphError::Io(err.to_string()))?;
            let reader = BufReader::new(file);
            let mut inner = self.inner.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
            for line in reader.lines() {
                let line = line.map_err(|err| GraphError::Io(err.to_string()))?;
                if line.trim().is_empty() {
                    continue;
                }
                if let Ok(edge) = serde_json::from_str::<Edge>(&line) {
                    upsert_edge(&mut inner.edges, edge);
                }
            }
            drop(inner);
        }
        self.journal_path = Some(path);
        Ok(self)
    }

    /// Creates or updates an edge between two known decisions (§4.9:
    /// "rejects self-loops, rejects duplicate (source, target, type) edges
    /// (updates weight instead)").
    ///
    /// `known_ids` is the set of decision IDs the caller has confirmed exist
    /// (the graph itself does not hold a store reference).
    ///
    /// # Errors
    ///
    /// Returns [`GraphError::SelfLoop`] or [`GraphError::UnknownEndpoint`]
    /// when validation fails.
    pub fn link(
        &self,
        source: DecisionId,
        target: DecisionId,
        edge_type: EdgeType,
        weight: f64,
        context: Option<String>,
        known_ids: &HashSet<DecisionId>,
        now: Timestamp,
    ) -> Result<Edge, GraphError> {
        if source == target {
            return Err(GraphError::SelfLoop(source.to_string()));
        }
        if !known_ids.contains(&source) {
            return Err(GraphError::UnknownEndpoint(source.to_string()));
        }
        if !known_ids.contains(&target) {
            return Err(GraphError::UnknownEndpoint(target.to_string()));
        }
        let edge = Edge { source, target, edge_type, weight: weight.clamp(f64::MIN_POSITIVE, 1.0), context, created_at: now };
        let mut inner = self.inner.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        upsert_edge(&mut inner.edges, edge.clone());
        self.append(&edge);
        inner.mutations_since_recompute += 1;
        if inner.mutations_since_recompute >= self.recompute_interval {
            recompute_pagerank(&inner.edges, &mut inner.salience);
            inner.mutations_since_recompute = 0;
        }
        Ok(edge)
    }

    /// Auto-links `new_id` to the top-K most recently retrieved decisions
    /// with a `relates_to` edge, weight derived from retrieval distance
    /// (§4.9).
    pub fn auto_link_from_retrieval(&self, new_id: &DecisionId, found: &[(DecisionId, f64)], top_k: usize, now: Timestamp) {
        let mut inner = self.inner.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        for (target, distance) in found.iter().take(top_k) {
            if target == new_id {
                continue;
            }
            let weight = (1.0 - distance).clamp(AUTO_LINK_WEIGHT_MIN, AUTO_LINK_WEIGHT_MAX);
            let edge = Edge {
                source: new_id.clone(),
                target: target.clone(),
                edge_type: EdgeType::RelatesTo,
                weight,
                context: Some("auto-linked from retrieval".to_string()),
                created_at: now,
            };
            upsert_edge(&mut inner.edges, edge.clone());
            self.append(&edge);
            inner.mutations_since_recompute += 1;
        }
        if inner.mutations_since_recompute >= self.recompute_interval {
            recompute_pagerank(&inner.edges, &mut inner.salience);
            inner.mutations_since_recompute = 0;
        }
    }

    /// Breadth-first traversal from `root` up to `depth` hops, optionally
    /// restricted to `edge_types` (§4.9).
    #[must_use]
    pub fn get_graph(&self, root: &DecisionId, depth: usize, edge_types: Option<&[EdgeType]>) -> GraphView {
        let inner = self.inner.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        let mut visited = HashSet::new();
        visited.insert(root.clone());
        let mut frontier = vec![root.clone()];
        let mut collected = Vec::new();
        for _ in 0..depth {
            let mut next = Vec::new();
            for node in &frontier {
                for edge in &inner.edges {
                    let matches_type = edge_types.map_or(true, |types| types.contains(&edge.edge_type));
                    if !matches_type {
                        continue;
                    }
                    if &edge.source == node && visited.insert(edge.target.clone()) {
                        next.push(edge.target.clone());
                        collected.push(edge.clone());
                    } else if &edge.target == node && visited.insert(edge.source.clone()) {
                        next.push(edge.source.clone());
                        collected.push(edge.clone());
                    }
                }
            }
            if next.is_empty() {
                break;
            }
            frontier = next;
        }
        GraphView { root: root.clone(), edges: collected, nodes: visited.into_iter().collect() }
    }

    /// Direct neighbors of `id`, optionally restricted to one edge type
    /// (§4.9).
    #[must_use]
    pub fn get_neighbors(&self, id: &DecisionId, edge_type: Option<EdgeType>) -> Vec<Edge> {
        let inner = self.inner.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        inner
            .edges
            .iter()
            .filter(|edge| (&edge.source == id || &edge.target == id) && edge_type.map_or(true, |t| edge.edge_type == t))
            .cloned()
            .collect()
    }

    /// Returns the PageRank salience of `id` in `[0, 1]`, recomputing first
    /// if `force` is set (§4.9).
    #[must_use]
    pub fn salience(&self, id: &DecisionId, force: bool) -> f64 {
        let mut inner = self.inner.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        if force {
            recompute_pagerank(&inner.edges, &mut inner.salience);
            inner.mutations_since_recompute = 0;
        }
        inner.salience.get(id).copied().unwrap_or(0.0)
    }

    /// Edges of type `contradicts` still present in the graph, used by the
    /// ready queue (§4.9).
    #[must_use]
    pub fn active_contradictions(&self) -> Vec<Edge> {
        let inner = self.inner.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        inner.edges.iter().filter(|edge| edge.edge_type == EdgeType::Contradicts).cloned().collect()
    }

    fn append(&self, edge: &Edge) {
        let Some(path) = &self.journal_path else { return };
        let Ok(payload) = serde_json::to_string(edge) else { return };
        if let Ok(mut file) = OpenOptions::new().create(true).append(true).open(path) {
            let _ = writeln!(file, "{payload}");
            let _ = file.flush();
        }
    }
}

impl Default for DecisionGraph {
    fn default() -> Self {
        Self::new()
    }
}

fn upsert_edge(edges: &mut Vec<Edge>, edge: Edge) {
    if let Some(existing) = edges.iter_mut().find(|e| e.source == edge.source && e.target == edge.target && e.edge_type == edge.edge_type) {
        existing.weight = edge.weight;
        existing.context = edge.context;
        existing.created_at = edge.created_at;
    } else {
        edges.push(edge);
    }
}

fn recompute_pagerank(edges: &[Edge], salience: &mut HashMap<DecisionId, f64>) {
    salience.clear();
    let mut nodes: VecDeque<DecisionId> = VecDeque::new();
    let mut seen = HashSet::new();
    for edge in edges {
        if seen.insert(edge.source.clone()) {
            nodes.push_back(edge.source.clone());
        }
        if seen.insert(edge.target.clone()) {
            nodes.push_back(edge.target.clone());
        }
    }
    let n = nodes.len();
    if n == 0 {
        return;
    }
    let mut rank: HashMap<DecisionId, f64> = nodes.iter().cloned().map(|id| (id, 1.0 / n as f64)).collect();

    let mut outgoing_weight: HashMap<DecisionId, f64> = HashMap::new();
    for edge in edges {
        *outgoing_weight.entry(edge.source.clone()).or_insert(0.0) += edge.weight;
    }

    for _ in 0..50 {
        let mut next: HashMap<DecisionId, f64> = nodes.iter().cloned().map(|id| (id, (1.0 - PAGERANK_DAMPING) / n as f64)).collect();
        for edge in edges {
            let source_rank = rank.get(&edge.source).copied().unwrap_or(0.0);
            let total_out = outgoing_weight.get(&edge.source).copied().unwrap_or(1.0).max(f64::MIN_POSITIVE);
            let share = PAGERANK_DAMPING * source_rank * (edge.weight / total_out);
            *next.entry(edge.target.clone()).or_insert(0.0) += share;
        }
        rank = next;
    }

    let max_rank = rank.values().cloned().fold(f64::MIN_POSITIVE, f64::max);
    for (id, value) in rank {
        salience.insert(id, (value / max_rank).clamp(0.0, 1.0));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn id(hex: &str) -> DecisionId {
        DecisionId::parse(hex).expect("valid id")
    }

    #[test]
    fn link_rejects_self_loop() {
        let graph = DecisionGraph::new();
        let mut known = HashSet::new();
        known.insert(id("aaaaaaaa"));
        let result = graph.link(id("aaaaaaaa"), id("aaaaaaaa"), EdgeType::RelatesTo, 1.0, None, &known, Timestamp::now());
        assert!(matches!(result, Err(GraphError::SelfLoop(_))));
    }

    #[test]
    fn link_rejects_unknown_endpoint() {
        let graph = DecisionGraph::new();
        let mut known = HashSet::new();
        known.insert(id("aaaaaaaa"));
        let result = graph.link(id("aaaaaaaa"), id("bbbbbbbb"), EdgeType::RelatesTo, 1.0, None, &known, Timestamp::now());
        assert!(matches!(result, Err(GraphError::UnknownEndpoint(_))));
    }

    #[test]
    fn duplicate_edge_updates_weight_instead_of_duplicating() {
        let graph = DecisionGraph::new();
        let mut known = HashSet::new();
        known.insert(id("aaaaaaaa"));
        known.insert(id("bbbbbbbb"));
        graph.link(id("aaaaaaaa"), id("bbbbbbbb"), EdgeType::DependsOn, 0.5, None, &known, Timestamp::now()).expect("first link");
        graph.link(id("aaaaaaaa"), id("bbbbbbbb"), EdgeType::DependsOn, 0.9, None, &known, Timestamp::now()).expect("second link");
        let neighbors = graph.get_neighbors(&id("aaaaaaaa"), None);
        assert_eq!(neighbors.len(), 1);
        assert!((neighbors[0].weight - 0.9).abs() < 1e-9);
    }

    #[test]
    fn get_graph_respects_depth_bound() {
        let graph = DecisionGraph::new();
        let mut known = HashSet::new();
        for hex in ["aaaaaaaa", "bbbbbbbb", "cccccccc"] {
            known.insert(id(hex));
        }
        graph.link(id("aaaaaaaa"), id("bbbbbbbb"), EdgeType::RelatesTo, 1.0, None, &known, Timestamp::now()).expect("link ab");
        graph.link(id("bbbbbbbb"), id("cccccccc"), EdgeType::RelatesTo, 1.0, None, &known, Timestamp::now()).expect("link bc");
        let view = graph.get_graph(&id("aaaaaaaa"), 1, None);
        assert!(view.nodes.contains(&id("bbbbbbbb")));
        assert!(!view.nodes.contains(&id("cccccccc")));
    }

    #[test]
    fn salience_is_higher_for_more_referenced_node() {
        let graph = DecisionGraph::new();
        let mut known = HashSet::new();
        for hex in ["aaaaaaaa", "bbbbbbbb", "cccccccc"] {
            known.insert(id(hex));
        }
        graph.link(id("bbbbbbbb"), id("aaaaaaaa"), EdgeType::RelatesTo, 1.0, None, &known, Timestamp::now()).expect("link ba");
        graph.link(id("cccccccc"), id("aaaaaaaa"), EdgeType::RelatesTo, 1.0, None, &known, Timestamp::now()).expect("link ca");
        let salience_a = graph.salience(&id("aaaaaaaa"), true);
        let salience_b = graph.salience(&id("bbbbbbbb"), false);
        assert!(salience_a > salience_b);
    }
}
