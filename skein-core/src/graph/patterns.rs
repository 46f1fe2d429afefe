use petgraph::visit::EdgeRef;
use serde::Serialize;
use skein_scanner::url_utils::{host_of, registrable_domain, url_path};
use std::collections::{BTreeMap, HashMap, HashSet};

use super::LinkGraph;

const TOP_PATTERNS: usize = 10;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RoleThresholds {
    pub hub_min_out_degree: usize,
    pub authority_min_in_degree: usize,
    /// Cap on each returned list.
    pub limit: usize,
}

impl Default for RoleThresholds {
    fn default() -> Self {
        Self {
            hub_min_out_degree: 10,
            authority_min_in_degree: 5,
            limit: 20,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NodeDegree {
    pub url: String,
    pub in_degree: usize,
    pub out_degree: usize,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct NodeRoles {
    pub hubs: Vec<NodeDegree>,
    pub authorities: Vec<NodeDegree>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PatternCount {
    pub value: String,
    pub count: usize,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct LinkPatterns {
    pub total_links: usize,
    /// Links whose target is on the same host.
    pub internal_links: usize,
    pub external_links: usize,
    /// Links whose target shares the registrable domain, subdomains included.
    pub same_domain_links: usize,
    pub cross_domain_links: usize,
    pub top_path_prefixes: Vec<PatternCount>,
    pub top_anchor_texts: Vec<PatternCount>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DomainStats {
    pub domain: String,
    pub pages: usize,
    pub inbound: usize,
    pub outbound: usize,
    pub internal: usize,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct DomainConnectivity {
    pub domains: Vec<DomainStats>,
    pub unique_connections: usize,
    /// `unique_connections / (D * (D - 1))`, zero with fewer than two domains.
    pub density: f64,
}

fn domain_of(url: &str) -> String {
    host_of(url)
        .map(|host| registrable_domain(&host))
        .unwrap_or_else(|| "unknown".to_string())
}

fn path_prefix(url: &str) -> String {
    match url_path(url).split('/').find(|s| !s.is_empty()) {
        Some(segment) => format!("/{}", segment),
        None => "/".to_string(),
    }
}

fn top_counts(counts: HashMap<String, usize>) -> Vec<PatternCount> {
    let mut ranked: Vec<PatternCount> = counts
        .into_iter()
        .map(|(value, count)| PatternCount { value, count })
        .collect();
    ranked.sort_by(|a, b| b.count.cmp(&a.count).then_with(|| a.value.cmp(&b.value)));
    ranked.truncate(TOP_PATTERNS);
    ranked
}

impl LinkGraph {
    /// `(in, out)` over distinct neighbours, keyed by URL.
    pub fn degrees(&self) -> HashMap<String, (usize, usize)> {
        let adjacency = self.adjacency();
        let mut in_degree = vec![0usize; adjacency.len()];
        for targets in &adjacency {
            for &target in targets {
                in_degree[target] += 1;
            }
        }
        adjacency
            .iter()
            .enumerate()
            .map(|(i, targets)| (self.url_at(i).to_string(), (in_degree[i], targets.len())))
            .collect()
    }

    pub fn classify_nodes(&self, thresholds: &RoleThresholds) -> NodeRoles {
        let degrees: Vec<NodeDegree> = self
            .degrees()
            .into_iter()
            .map(|(url, (in_degree, out_degree))| NodeDegree {
                url,
                in_degree,
                out_degree,
            })
            .collect();

        let mut hubs: Vec<NodeDegree> = degrees
            .iter()
            .filter(|n| n.out_degree >= thresholds.hub_min_out_degree)
            .cloned()
            .collect();
        hubs.sort_by(|a, b| b.out_degree.cmp(&a.out_degree).then_with(|| a.url.cmp(&b.url)));
        hubs.truncate(thresholds.limit);

        let mut authorities: Vec<NodeDegree> = degrees
            .into_iter()
            .filter(|n| n.in_degree >= thresholds.authority_min_in_degree)
            .collect();
        authorities.sort_by(|a, b| b.in_degree.cmp(&a.in_degree).then_with(|| a.url.cmp(&b.url)));
        authorities.truncate(thresholds.limit);

        NodeRoles { hubs, authorities }
    }

    pub fn link_patterns(&self) -> LinkPatterns {
        let mut patterns = LinkPatterns::default();
        let mut prefixes: HashMap<String, usize> = HashMap::new();
        let mut anchors: HashMap<String, usize> = HashMap::new();

        for edge in self.inner().edge_references() {
            let from = self.url_at(edge.source().index());
            let to = self.url_at(edge.target().index());
            patterns.total_links += 1;

            if host_of(from) == host_of(to) {
                patterns.internal_links += 1;
            } else {
                patterns.external_links += 1;
            }
            if domain_of(from) == domain_of(to) {
                patterns.same_domain_links += 1;
            } else {
                patterns.cross_domain_links += 1;
            }

            *prefixes.entry(path_prefix(to)).or_insert(0) += 1;
            let anchor = edge.weight().anchor_text.trim().to_lowercase();
            if !anchor.is_empty() {
                *anchors.entry(anchor).or_insert(0) += 1;
            }
        }

        patterns.top_path_prefixes = top_counts(prefixes);
        patterns.top_anchor_texts = top_counts(anchors);
        patterns
    }

    pub fn domain_connectivity(&self) -> DomainConnectivity {
        let mut domains: BTreeMap<String, DomainStats> = BTreeMap::new();
        for url in self.urls() {
            let domain = domain_of(url);
            domains
                .entry(domain.clone())
                .or_insert_with(|| DomainStats {
                    domain,
                    pages: 0,
                    inbound: 0,
                    outbound: 0,
                    internal: 0,
                })
                .pages += 1;
        }

        let mut connections: HashSet<(String, String)> = HashSet::new();
        for edge in self.inner().edge_references() {
            let from = domain_of(self.url_at(edge.source().index()));
            let to = domain_of(self.url_at(edge.target().index()));
            if from == to {
                if let Some(stats) = domains.get_mut(&from) {
                    stats.internal += 1;
                }
                continue;
            }
            if let Some(stats) = domains.get_mut(&from) {
                stats.outbound += 1;
            }
            if let Some(stats) = domains.get_mut(&to) {
                stats.inbound += 1;
            }
            connections.insert((from, to));
        }

        let count = domains.len();
        let max_pairs = count.saturating_mul(count.saturating_sub(1));
        let density = if max_pairs == 0 {
            0.0
        } else {
            connections.len() as f64 / max_pairs as f64
        };

        DomainConnectivity {
            domains: domains.into_values().collect(),
            unique_connections: connections.len(),
            density,
        }
    }
}
