use petgraph::visit::EdgeRef;
use serde::Serialize;
use std::fmt;
use std::str::FromStr;

use super::{GraphError, LinkGraph, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExportFormat {
    Json,
    Dot,
    Csv,
    Matrix,
}

impl FromStr for ExportFormat {
    type Err = GraphError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "json" => Ok(ExportFormat::Json),
            "dot" | "graphviz" => Ok(ExportFormat::Dot),
            "csv" => Ok(ExportFormat::Csv),
            "matrix" | "adjacency" => Ok(ExportFormat::Matrix),
            other => Err(GraphError::UnknownFormat(other.to_string())),
        }
    }
}

impl fmt::Display for ExportFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ExportFormat::Json => "json",
            ExportFormat::Dot => "dot",
            ExportFormat::Csv => "csv",
            ExportFormat::Matrix => "matrix",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ExportOptions {
    /// Edge metadata in JSON and DOT, graph totals in JSON.
    pub include_metadata: bool,
    /// Attach the last computed importance scores, when there are any.
    pub include_importance: bool,
}

/// Link counts between every ordered pair of pages, parallel links summed.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AdjacencyMatrix {
    pub nodes: Vec<String>,
    pub matrix: Vec<Vec<u32>>,
}

#[derive(Serialize)]
struct JsonNode<'a> {
    id: &'a str,
    in_degree: usize,
    out_degree: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    importance: Option<f64>,
}

#[derive(Serialize)]
struct JsonEdge<'a> {
    source: &'a str,
    target: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    anchor_text: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    title: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    context: Option<&'a str>,
}

fn dot_escape(value: &str) -> String {
    value
        .replace('\\', "\\\\")
        .replace('"', "\\\"")
        .replace('\n', "\\n")
}

fn csv_field(value: &str) -> String {
    if value.contains([',', '"', '\n', '\r']) {
        format!("\"{}\"", value.replace('"', "\"\""))
    } else {
        value.to_string()
    }
}

impl LinkGraph {
    pub fn export(&self, format: ExportFormat, options: &ExportOptions) -> Result<String> {
        match format {
            ExportFormat::Json => self.export_json(options),
            ExportFormat::Dot => Ok(self.export_dot(options)),
            ExportFormat::Csv => Ok(self.export_csv(options)),
            ExportFormat::Matrix => Ok(serde_json::to_string_pretty(&self.adjacency_matrix())?),
        }
    }

    pub fn adjacency_matrix(&self) -> AdjacencyMatrix {
        let n = self.node_count();
        let mut matrix = vec![vec![0u32; n]; n];
        for edge in self.inner().edge_references() {
            matrix[edge.source().index()][edge.target().index()] += 1;
        }
        AdjacencyMatrix {
            nodes: self.urls().map(str::to_string).collect(),
            matrix,
        }
    }

    fn importance_for(&self, options: &ExportOptions, url: &str) -> Option<f64> {
        if !options.include_importance {
            return None;
        }
        self.cached_importance().and_then(|scores| scores.get(url))
    }

    fn export_json(&self, options: &ExportOptions) -> Result<String> {
        let degrees = self.degrees();
        let nodes: Vec<JsonNode> = self
            .urls()
            .map(|url| {
                let (in_degree, out_degree) = degrees.get(url).copied().unwrap_or((0, 0));
                JsonNode {
                    id: url,
                    in_degree,
                    out_degree,
                    importance: self.importance_for(options, url),
                }
            })
            .collect();

        let edges: Vec<JsonEdge> = self
            .inner()
            .edge_references()
            .map(|edge| {
                let metadata = edge.weight();
                JsonEdge {
                    source: self.url_at(edge.source().index()),
                    target: self.url_at(edge.target().index()),
                    anchor_text: options
                        .include_metadata
                        .then_some(metadata.anchor_text.as_str()),
                    title: options
                        .include_metadata
                        .then_some(metadata.title.as_deref())
                        .flatten(),
                    context: options.include_metadata.then_some(metadata.context.as_str()),
                }
            })
            .collect();

        let document = if options.include_metadata {
            serde_json::json!({
                "nodes": nodes,
                "edges": edges,
                "metadata": {
                    "node_count": self.node_count(),
                    "edge_count": self.edge_count(),
                    "unique_edge_count": self.unique_edge_count(),
                    "generated_at": chrono::Utc::now().to_rfc3339(),
                }
            })
        } else {
            serde_json::json!({ "nodes": nodes, "edges": edges })
        };

        Ok(serde_json::to_string_pretty(&document)?)
    }

    fn export_dot(&self, options: &ExportOptions) -> String {
        let mut dot = String::from("digraph links {\n");
        dot.push_str("  rankdir=LR;\n");
        dot.push_str("  node [shape=box];\n");

        for url in self.urls() {
            match self.importance_for(options, url) {
                Some(score) => dot.push_str(&format!(
                    "  \"{}\" [importance=\"{:.6}\"];\n",
                    dot_escape(url),
                    score
                )),
                None => dot.push_str(&format!("  \"{}\";\n", dot_escape(url))),
            }
        }

        for edge in self.inner().edge_references() {
            let from = dot_escape(self.url_at(edge.source().index()));
            let to = dot_escape(self.url_at(edge.target().index()));
            let anchor = edge.weight().anchor_text.trim();
            if options.include_metadata && !anchor.is_empty() {
                dot.push_str(&format!(
                    "  \"{}\" -> \"{}\" [label=\"{}\"];\n",
                    from,
                    to,
                    dot_escape(anchor)
                ));
            } else {
                dot.push_str(&format!("  \"{}\" -> \"{}\";\n", from, to));
            }
        }

        dot.push_str("}\n");
        dot
    }

    fn export_csv(&self, options: &ExportOptions) -> String {
        let with_importance = options.include_importance && self.cached_importance().is_some();

        let mut csv = String::from("source,target,anchor_text,context");
        if with_importance {
            csv.push_str(",target_importance");
        }
        csv.push('\n');

        for edge in self.inner().edge_references() {
            let target = self.url_at(edge.target().index());
            let metadata = edge.weight();
            csv.push_str(&format!(
                "{},{},{},{}",
                csv_field(self.url_at(edge.source().index())),
                csv_field(target),
                csv_field(&metadata.anchor_text),
                csv_field(&metadata.context)
            ));
            if with_importance {
                let score = self.importance_for(options, target).unwrap_or(0.0);
                csv.push_str(&format!(",{:.6}", score));
            }
            csv.push('\n');
        }
        csv
    }
}
