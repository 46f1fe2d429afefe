use petgraph::visit::EdgeRef;
use serde::Serialize;
use std::collections::HashMap;

use super::LinkGraph;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CycleOptions {
    pub max_length: usize,
    pub max_cycles: usize,
}

impl Default for CycleOptions {
    fn default() -> Self {
        Self {
            max_length: 5,
            max_cycles: 100,
        }
    }
}

/// A simple directed cycle, listed from its lowest-indexed node.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Cycle {
    pub nodes: Vec<String>,
    pub length: usize,
    /// Mean metadata density of the links along the cycle.
    pub strength: f64,
}

struct Search<'a> {
    adjacency: &'a [Vec<usize>],
    max_length: usize,
    max_cycles: usize,
    path: Vec<usize>,
    on_path: Vec<bool>,
    found: Vec<Vec<usize>>,
}

impl Search<'_> {
    /// Each cycle is reported once, from its smallest node, so rotations
    /// of the same cycle never show up twice.
    fn from_start(&mut self, start: usize) {
        self.path.push(start);
        self.on_path[start] = true;
        self.extend(start, start);
        self.on_path[start] = false;
        self.path.pop();
    }

    fn extend(&mut self, start: usize, current: usize) {
        let adjacency = self.adjacency;
        for &next in &adjacency[current] {
            if self.found.len() >= self.max_cycles {
                return;
            }
            if next == start {
                // Self-links are not cycles between pages.
                if self.path.len() >= 2 {
                    self.found.push(self.path.clone());
                }
                continue;
            }
            if next < start || self.on_path[next] || self.path.len() >= self.max_length {
                continue;
            }
            self.path.push(next);
            self.on_path[next] = true;
            self.extend(start, next);
            self.on_path[next] = false;
            self.path.pop();
        }
    }
}

impl LinkGraph {
    /// Simple cycles of 2 to `max_length` pages, at most `max_cycles` of them.
    pub fn detect_cycles(&self, options: &CycleOptions) -> Vec<Cycle> {
        let adjacency = self.adjacency();
        let mut search = Search {
            adjacency: &adjacency,
            max_length: options.max_length,
            max_cycles: options.max_cycles,
            path: Vec::new(),
            on_path: vec![false; adjacency.len()],
            found: Vec::new(),
        };

        for start in 0..adjacency.len() {
            if search.found.len() >= options.max_cycles {
                break;
            }
            search.from_start(start);
        }

        let densities = self.pair_densities();
        let mut cycles: Vec<Cycle> = search
            .found
            .into_iter()
            .map(|path| {
                let total: f64 = path
                    .iter()
                    .enumerate()
                    .map(|(i, &from)| {
                        let to = path[(i + 1) % path.len()];
                        densities.get(&(from, to)).copied().unwrap_or(0.0)
                    })
                    .sum();
                Cycle {
                    length: path.len(),
                    strength: total / path.len() as f64,
                    nodes: path.iter().map(|&i| self.url_at(i).to_string()).collect(),
                }
            })
            .collect();

        cycles.sort_by(|a, b| {
            a.length
                .cmp(&b.length)
                .then_with(|| b.strength.total_cmp(&a.strength))
        });
        cycles
    }

    /// Best metadata density among the parallel edges of each linked pair.
    fn pair_densities(&self) -> HashMap<(usize, usize), f64> {
        let mut densities: HashMap<(usize, usize), f64> = HashMap::new();
        for edge in self.inner().edge_references() {
            let key = (edge.source().index(), edge.target().index());
            let density = edge.weight().density();
            densities
                .entry(key)
                .and_modify(|d| *d = d.max(density))
                .or_insert(density);
        }
        densities
    }
}
