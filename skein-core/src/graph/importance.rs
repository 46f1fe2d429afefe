use serde::Serialize;
use std::collections::BTreeMap;
use tracing::debug;

use super::LinkGraph;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ImportanceOptions {
    pub damping: f64,
    pub max_iterations: usize,
    /// Convergence threshold on the L1 change between iterations.
    pub tolerance: f64,
}

impl Default for ImportanceOptions {
    fn default() -> Self {
        Self {
            damping: 0.85,
            max_iterations: 100,
            tolerance: 1e-6,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ImportanceScores {
    pub scores: BTreeMap<String, f64>,
    pub iterations: usize,
    pub converged: bool,
}

impl ImportanceScores {
    pub fn get(&self, url: &str) -> Option<f64> {
        self.scores.get(url).copied()
    }

    pub fn total(&self) -> f64 {
        self.scores.values().sum()
    }

    /// Highest scores first; ties broken by URL.
    pub fn top(&self, n: usize) -> Vec<(String, f64)> {
        let mut ranked: Vec<(String, f64)> =
            self.scores.iter().map(|(u, s)| (u.clone(), *s)).collect();
        ranked.sort_by(|a, b| b.1.total_cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
        ranked.truncate(n);
        ranked
    }
}

impl LinkGraph {
    /// PageRank over the de-duplicated adjacency.
    ///
    /// Every node, isolated ones included, counts toward `N`. Nodes without
    /// outbound links spread their score evenly over all nodes, so the
    /// scores always sum to 1. The result is cached until the graph changes
    /// or different options are passed.
    pub fn calculate_importance(&mut self, options: &ImportanceOptions) -> ImportanceScores {
        if let Some((cached_options, scores)) = &self.importance
            && cached_options == options
        {
            return scores.clone();
        }

        let scores = self.compute_importance(options);
        self.importance = Some((*options, scores.clone()));
        scores
    }

    fn compute_importance(&self, options: &ImportanceOptions) -> ImportanceScores {
        let n = self.node_count();
        if n == 0 {
            return ImportanceScores {
                converged: true,
                ..Default::default()
            };
        }

        let adjacency = self.adjacency();
        let d = options.damping.clamp(0.0, 1.0);
        let uniform = 1.0 / n as f64;
        let mut scores = vec![uniform; n];
        let mut iterations = 0;
        let mut converged = false;

        while iterations < options.max_iterations {
            iterations += 1;

            let dangling: f64 = adjacency
                .iter()
                .zip(&scores)
                .filter(|(targets, _)| targets.is_empty())
                .map(|(_, score)| score)
                .sum();

            let base = (1.0 - d) * uniform + d * dangling * uniform;
            let mut next = vec![base; n];
            for (source, targets) in adjacency.iter().enumerate() {
                if targets.is_empty() {
                    continue;
                }
                let share = d * scores[source] / targets.len() as f64;
                for &target in targets {
                    next[target] += share;
                }
            }

            let delta: f64 = next.iter().zip(&scores).map(|(a, b)| (a - b).abs()).sum();
            scores = next;
            if delta < options.tolerance {
                converged = true;
                break;
            }
        }

        debug!(nodes = n, iterations, converged, "Importance computed");

        ImportanceScores {
            scores: scores
                .into_iter()
                .enumerate()
                .map(|(i, score)| (self.url_at(i).to_string(), score))
                .collect(),
            iterations,
            converged,
        }
    }
}
