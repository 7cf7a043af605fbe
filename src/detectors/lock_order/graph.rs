//! Lock-order graph and elementary cycle enumeration
//!
//! Nodes are lock names, an edge `A -> B` means some path acquires `B`
//! while holding `A`. The builder is owned by the caller and fed one unit
//! at a time; once finished the graph is read-only.
//!
//! # Algorithm
//!
//! Johnson's algorithm over locks sorted by name: for each start lock `s`,
//! take the strongly connected component containing `s` in the subgraph of
//! locks not smaller than `s` (Tarjan via petgraph), then search circuits
//! through `s` with the blocked-set bookkeeping that keeps the search
//! output-sensitive. Every cycle is reported exactly once, starting at its
//! smallest lock.

use crate::models::AcquisitionSite;
use petgraph::algo::tarjan_scc;
use petgraph::graph::{DiGraph, NodeIndex};
use rustc_hash::{FxHashMap, FxHashSet};
use tracing::warn;

/// Upper bound on enumerated cycles; dense graphs can have exponentially many
pub const MAX_CYCLES: usize = 1000;

/// Accumulates lock-order edges across units
#[derive(Debug, Default)]
pub struct LockGraphBuilder {
    graph: DiGraph<String, AcquisitionSite>,
    index: FxHashMap<String, NodeIndex>,
}

impl LockGraphBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_lock(&mut self, name: &str) -> NodeIndex {
        if let Some(&idx) = self.index.get(name) {
            return idx;
        }
        let idx = self.graph.add_node(name.to_string());
        self.index.insert(name.to_string(), idx);
        idx
    }

    /// Insert `site.held -> site.acquired`. Returns false for self-edges and
    /// for edges already present (the first site is kept).
    pub fn add_edge(&mut self, site: AcquisitionSite) -> bool {
        if site.held == site.acquired {
            return false;
        }
        let from = self.add_lock(&site.held);
        let to = self.add_lock(&site.acquired);
        if self.graph.find_edge(from, to).is_some() {
            return false;
        }
        self.graph.add_edge(from, to, site);
        true
    }

    pub fn edge_count(&self) -> usize {
        self.graph.edge_count()
    }

    pub fn finish(self) -> LockGraph {
        LockGraph {
            graph: self.graph,
            index: self.index,
        }
    }
}

/// Finished, read-only lock-order graph
#[derive(Debug, Default)]
pub struct LockGraph {
    graph: DiGraph<String, AcquisitionSite>,
    index: FxHashMap<String, NodeIndex>,
}

impl LockGraph {
    pub fn lock_count(&self) -> usize {
        self.graph.node_count()
    }

    pub fn edge_count(&self) -> usize {
        self.graph.edge_count()
    }

    pub fn has_edge(&self, from: &str, to: &str) -> bool {
        self.site(from, to).is_some()
    }

    /// First acquisition site recorded for `from -> to`
    pub fn site(&self, from: &str, to: &str) -> Option<&AcquisitionSite> {
        let from = *self.index.get(from)?;
        let to = *self.index.get(to)?;
        let edge = self.graph.find_edge(from, to)?;
        self.graph.edge_weight(edge)
    }

    /// Lock names in sorted order
    pub fn locks(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.graph.node_weights().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    /// Every elementary cycle, each rotated to start at its smallest lock.
    ///
    /// Output is sorted by length, then lexicographically.
    pub fn elementary_cycles(&self) -> Vec<Vec<String>> {
        let names = self.locks();
        let rank: FxHashMap<&str, usize> =
            names.iter().enumerate().map(|(i, n)| (*n, i)).collect();

        let mut adjacency: Vec<Vec<usize>> = vec![Vec::new(); names.len()];
        for edge in self.graph.edge_indices() {
            if let Some((a, b)) = self.graph.edge_endpoints(edge) {
                adjacency[rank[self.graph[a].as_str()]].push(rank[self.graph[b].as_str()]);
            }
        }
        for successors in &mut adjacency {
            successors.sort_unstable();
        }

        let mut search = CircuitSearch::new(&adjacency);
        for start in 0..names.len() {
            let Some(component) = component_of(&adjacency, start) else {
                continue;
            };
            search.run(start, &component);
            if search.truncated {
                warn!(
                    "Lock graph has more than {} cycles, reporting the first {}",
                    MAX_CYCLES, MAX_CYCLES
                );
                break;
            }
        }

        let mut cycles: Vec<Vec<String>> = search
            .cycles
            .into_iter()
            .map(|cycle| cycle.into_iter().map(|i| names[i].to_string()).collect())
            .collect();
        cycles.sort_by(|a, b| a.len().cmp(&b.len()).then_with(|| a.cmp(b)));
        cycles
    }
}

/// Strongly connected component containing `start` within the subgraph of
/// nodes ranked `>= start`, if it can hold a cycle
fn component_of(adjacency: &[Vec<usize>], start: usize) -> Option<FxHashSet<usize>> {
    let mut sub: DiGraph<usize, ()> = DiGraph::new();
    let nodes: Vec<NodeIndex> = (start..adjacency.len()).map(|i| sub.add_node(i)).collect();
    for (i, successors) in adjacency.iter().enumerate().skip(start) {
        for &j in successors.iter().filter(|&&j| j >= start) {
            sub.add_edge(nodes[i - start], nodes[j - start], ());
        }
    }

    tarjan_scc(&sub)
        .into_iter()
        .find(|scc| scc.iter().any(|&n| sub[n] == start))
        .filter(|scc| scc.len() > 1)
        .map(|scc| scc.into_iter().map(|n| sub[n]).collect())
}

struct CircuitSearch<'a> {
    adjacency: &'a [Vec<usize>],
    blocked: Vec<bool>,
    blocked_by: Vec<FxHashSet<usize>>,
    stack: Vec<usize>,
    cycles: Vec<Vec<usize>>,
    truncated: bool,
}

impl<'a> CircuitSearch<'a> {
    fn new(adjacency: &'a [Vec<usize>]) -> Self {
        let n = adjacency.len();
        Self {
            adjacency,
            blocked: vec![false; n],
            blocked_by: vec![FxHashSet::default(); n],
            stack: Vec::new(),
            cycles: Vec::new(),
            truncated: false,
        }
    }

    fn run(&mut self, start: usize, component: &FxHashSet<usize>) {
        for &v in component {
            self.blocked[v] = false;
            self.blocked_by[v].clear();
        }
        self.circuit(start, start, component);
    }

    fn circuit(&mut self, v: usize, start: usize, component: &FxHashSet<usize>) -> bool {
        let mut found = false;
        self.stack.push(v);
        self.blocked[v] = true;

        let adjacency = self.adjacency;
        for &w in adjacency[v].iter().filter(|&&w| component.contains(&w)) {
            if self.truncated {
                break;
            }
            if w == start {
                self.cycles.push(self.stack.clone());
                found = true;
                if self.cycles.len() >= MAX_CYCLES {
                    self.truncated = true;
                }
            } else if !self.blocked[w] && self.circuit(w, start, component) {
                found = true;
            }
        }

        if found {
            self.unblock(v);
        } else {
            for &w in adjacency[v].iter().filter(|&&w| component.contains(&w)) {
                self.blocked_by[w].insert(v);
            }
        }
        self.stack.pop();
        found
    }

    fn unblock(&mut self, u: usize) {
        self.blocked[u] = false;
        let waiting: Vec<usize> = self.blocked_by[u].drain().collect();
        for w in waiting {
            if self.blocked[w] {
                self.unblock(w);
            }
        }
    }
}
