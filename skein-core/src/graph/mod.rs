//! Directed link graph built from crawl edges, and the analyses run over it.
//!
//! The graph is a multigraph: every discovered [`LinkEdge`] becomes one edge,
//! so a page linking twice to the same target carries two edges. Degree and
//! importance computations work on the de-duplicated adjacency sets instead.

pub mod cycles;
pub mod export;
pub mod importance;
pub mod patterns;

use petgraph::Direction;
use petgraph::graph::{DiGraph, NodeIndex};
use serde::Serialize;
use skein_scanner::{EdgeMetadata, LinkEdge};
use std::collections::{BTreeSet, HashMap};
use thiserror::Error;
use tracing::info;

pub use cycles::{Cycle, CycleOptions};
pub use export::{AdjacencyMatrix, ExportFormat, ExportOptions};
pub use importance::{ImportanceOptions, ImportanceScores};
pub use patterns::{
    DomainConnectivity, DomainStats, LinkPatterns, NodeDegree, NodeRoles, PatternCount,
    RoleThresholds,
};

#[derive(Error, Debug)]
pub enum GraphError {
    #[error("Unknown export format: '{0}' (expected json, dot, csv or matrix)")]
    UnknownFormat(String),

    #[error("Graph serialization failed: {0}")]
    Serialization(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, GraphError>;

/// A page in the graph with its de-duplicated neighbours.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GraphNode {
    pub url: String,
    pub outbound_links: Vec<String>,
    pub inbound_links: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub importance: Option<f64>,
}

#[derive(Debug, Clone, Default)]
pub struct LinkGraph {
    graph: DiGraph<String, EdgeMetadata>,
    index: HashMap<String, NodeIndex>,
    importance: Option<(ImportanceOptions, ImportanceScores)>,
}

impl LinkGraph {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_edges<'a>(edges: impl IntoIterator<Item = &'a LinkEdge>) -> Self {
        let mut graph = Self::new();
        for edge in edges {
            graph.add_link(&edge.from, &edge.to, edge.metadata.clone());
        }
        graph
    }

    /// Add a page, even one with no links. Returns its index.
    pub fn add_node(&mut self, url: &str) -> NodeIndex {
        if let Some(idx) = self.index.get(url) {
            return *idx;
        }
        self.importance = None;
        let idx = self.graph.add_node(url.to_string());
        self.index.insert(url.to_string(), idx);
        idx
    }

    pub fn add_link(&mut self, from: &str, to: &str, metadata: EdgeMetadata) {
        let source = self.add_node(from);
        let target = self.add_node(to);
        self.graph.add_edge(source, target, metadata);
        self.importance = None;
    }

    pub fn contains(&self, url: &str) -> bool {
        self.index.contains_key(url)
    }

    pub fn node_count(&self) -> usize {
        self.graph.node_count()
    }

    /// Number of edges, counting repeated links.
    pub fn edge_count(&self) -> usize {
        self.graph.edge_count()
    }

    /// Number of distinct (from, to) pairs.
    pub fn unique_edge_count(&self) -> usize {
        self.adjacency().iter().map(|targets| targets.len()).sum()
    }

    pub fn urls(&self) -> impl Iterator<Item = &str> {
        self.graph.node_indices().map(|idx| self.graph[idx].as_str())
    }

    pub fn outbound_links(&self, url: &str) -> Vec<String> {
        self.neighbours(url, Direction::Outgoing)
    }

    pub fn inbound_links(&self, url: &str) -> Vec<String> {
        self.neighbours(url, Direction::Incoming)
    }

    pub fn node(&self, url: &str) -> Option<GraphNode> {
        self.index.get(url)?;
        Some(GraphNode {
            url: url.to_string(),
            outbound_links: self.outbound_links(url),
            inbound_links: self.inbound_links(url),
            importance: self.cached_importance().and_then(|s| s.get(url)),
        })
    }

    /// Scores from the last importance run, if the graph has not changed since.
    pub fn cached_importance(&self) -> Option<&ImportanceScores> {
        self.importance.as_ref().map(|(_, scores)| scores)
    }

    fn neighbours(&self, url: &str, direction: Direction) -> Vec<String> {
        let Some(idx) = self.index.get(url) else {
            return Vec::new();
        };
        let unique: BTreeSet<&str> = self
            .graph
            .neighbors_directed(*idx, direction)
            .map(|n| self.graph[n].as_str())
            .collect();
        unique.into_iter().map(str::to_string).collect()
    }

    /// De-duplicated, sorted out-neighbour indices for every node.
    pub(crate) fn adjacency(&self) -> Vec<Vec<usize>> {
        self.graph
            .node_indices()
            .map(|idx| {
                let targets: BTreeSet<usize> = self
                    .graph
                    .neighbors_directed(idx, Direction::Outgoing)
                    .map(|n| n.index())
                    .collect();
                targets.into_iter().collect()
            })
            .collect()
    }

    pub(crate) fn url_at(&self, index: usize) -> &str {
        &self.graph[NodeIndex::new(index)]
    }

    pub(crate) fn inner(&self) -> &DiGraph<String, EdgeMetadata> {
        &self.graph
    }
}

/// Tuning for a full [`LinkAnalysis`] run.
#[derive(Debug, Clone, PartialEq)]
pub struct AnalysisOptions {
    pub importance: ImportanceOptions,
    pub cycles: CycleOptions,
    pub roles: RoleThresholds,
    /// Number of pages listed in `top_pages`.
    pub top_n: usize,
}

impl Default for AnalysisOptions {
    fn default() -> Self {
        Self {
            importance: ImportanceOptions::default(),
            cycles: CycleOptions::default(),
            roles: RoleThresholds::default(),
            top_n: 10,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct GraphSummary {
    pub nodes: usize,
    pub edges: usize,
    pub unique_edges: usize,
    pub dangling_nodes: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct RankedPage {
    pub url: String,
    pub score: f64,
    pub in_degree: usize,
    pub out_degree: usize,
}

/// Everything the analyzer reports about one graph.
#[derive(Debug, Clone, Serialize)]
pub struct LinkAnalysis {
    pub summary: GraphSummary,
    pub importance: ImportanceScores,
    pub top_pages: Vec<RankedPage>,
    pub cycles: Vec<Cycle>,
    pub hubs: Vec<NodeDegree>,
    pub authorities: Vec<NodeDegree>,
    pub patterns: LinkPatterns,
    pub connectivity: DomainConnectivity,
    #[serde(skip)]
    graph: LinkGraph,
}

impl LinkAnalysis {
    pub fn analyze(mut graph: LinkGraph, options: &AnalysisOptions) -> Self {
        let importance = graph.calculate_importance(&options.importance);
        let cycles = graph.detect_cycles(&options.cycles);
        let roles = graph.classify_nodes(&options.roles);
        let patterns = graph.link_patterns();
        let connectivity = graph.domain_connectivity();
        let degrees = graph.degrees();

        let top_pages = importance
            .top(options.top_n)
            .into_iter()
            .map(|(url, score)| {
                let (in_degree, out_degree) = degrees.get(&url).copied().unwrap_or((0, 0));
                RankedPage {
                    url,
                    score,
                    in_degree,
                    out_degree,
                }
            })
            .collect();

        let summary = GraphSummary {
            nodes: graph.node_count(),
            edges: graph.edge_count(),
            unique_edges: graph.unique_edge_count(),
            dangling_nodes: degrees.values().filter(|(_, out)| *out == 0).count(),
        };

        info!(
            nodes = summary.nodes,
            edges = summary.edges,
            cycles = cycles.len(),
            hubs = roles.hubs.len(),
            authorities = roles.authorities.len(),
            converged = importance.converged,
            "Link analysis complete"
        );

        Self {
            summary,
            importance,
            top_pages,
            cycles,
            hubs: roles.hubs,
            authorities: roles.authorities,
            patterns,
            connectivity,
            graph,
        }
    }

    pub fn graph(&self) -> &LinkGraph {
        &self.graph
    }

    /// Serialize the analyzed graph, with importance scores attached.
    pub fn export(&self, format: ExportFormat) -> Result<String> {
        let options = ExportOptions {
            include_metadata: true,
            include_importance: true,
        };
        self.graph.export(format, &options)
    }
}
