//! Weighted graph over positioned entities, used to derive secondary
//! relationships for animation (e.g. a pulse travelling between two nodes).
//!
//! The index is read-only over one set of positions. After a resize or a
//! relayout, build a new one instead of patching it.
//!
//! Designed for dashboard-sized graphs (tens to a few hundred nodes): the
//! fully connected variant stores n² edges, and Dijkstra extracts the
//! minimum with a linear scan over the unvisited set.
//!
//! # Usage
//! ```ignore
//! let index = GraphIndex::build_within(store.entities(), |e| layout.position(e.id()), 120.0);
//! let hops = index.shortest_path("L1", "L7");
//! ```

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::topology::Entity;

/// 2D position in layout space
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Point {
    pub x: f32,
    pub y: f32,
}

impl Point {
    pub const fn new(x: f32, y: f32) -> Self {
        Self { x, y }
    }

    pub fn distance(&self, other: &Point) -> f32 {
        let dx = self.x - other.x;
        let dy = self.y - other.y;
        (dx * dx + dy * dy).sqrt()
    }

    fn is_finite(&self) -> bool {
        self.x.is_finite() && self.y.is_finite()
    }
}

#[derive(Debug, Clone, Default)]
pub struct GraphIndex {
    /// Node ids in insertion order; drives tie-breaking
    ids: Vec<String>,
    index: HashMap<String, usize>,
    /// Undirected adjacency: node → (neighbour, weight)
    adjacency: Vec<Vec<(usize, f32)>>,
}

impl GraphIndex {
    /// Fully connected graph weighted by Euclidean distance.
    ///
    /// Entities for which `position_of` returns `None` (or a non-finite
    /// point) are left out of the graph.
    pub fn build<'a, I, F>(entities: I, position_of: F) -> Self
    where
        I: IntoIterator<Item = &'a Entity>,
        F: Fn(&Entity) -> Option<Point>,
    {
        Self::build_within(entities, position_of, f32::INFINITY)
    }

    /// Like [`GraphIndex::build`] but only links pairs at most `max_link`
    /// apart, so distant entities are reached hop by hop or not at all.
    pub fn build_within<'a, I, F>(entities: I, position_of: F, max_link: f32) -> Self
    where
        I: IntoIterator<Item = &'a Entity>,
        F: Fn(&Entity) -> Option<Point>,
    {
        let mut graph = Self::default();
        let mut positions: Vec<Point> = Vec::new();

        for entity in entities {
            let Some(point) = position_of(entity).filter(Point::is_finite) else {
                continue;
            };
            if graph.insert_node(entity.id()).is_some() {
                positions.push(point);
            }
        }

        for a in 0..positions.len() {
            for b in (a + 1)..positions.len() {
                let weight = positions[a].distance(&positions[b]);
                if weight <= max_link {
                    graph.link(a, b, weight);
                }
            }
        }

        tracing::trace!(
            nodes = graph.node_count(),
            edges = graph.edge_count(),
            "Graph index built"
        );
        graph
    }

    /// Build from explicit undirected weighted edges. Edges naming an
    /// unknown node, or carrying a negative or non-finite weight, are
    /// ignored.
    pub fn from_edges<N, E, S>(nodes: N, edges: E) -> Self
    where
        N: IntoIterator<Item = S>,
        E: IntoIterator<Item = (S, S, f32)>,
        S: AsRef<str>,
    {
        let mut graph = Self::default();
        for node in nodes {
            graph.insert_node(node.as_ref());
        }
        for (a, b, weight) in edges {
            if !weight.is_finite() || weight < 0.0 {
                continue;
            }
            if let (Some(&a), Some(&b)) = (graph.index.get(a.as_ref()), graph.index.get(b.as_ref()))
            {
                if a != b {
                    graph.link(a, b, weight);
                }
            }
        }
        graph
    }

    /// Returns the new node's slot, or `None` for a duplicate id.
    fn insert_node(&mut self, id: &str) -> Option<usize> {
        if self.index.contains_key(id) {
            return None;
        }
        let slot = self.ids.len();
        self.ids.push(id.to_string());
        self.index.insert(id.to_string(), slot);
        self.adjacency.push(Vec::new());
        Some(slot)
    }

    fn link(&mut self, a: usize, b: usize, weight: f32) {
        self.adjacency[a].push((b, weight));
        self.adjacency[b].push((a, weight));
    }

    pub fn node_count(&self) -> usize {
        self.ids.len()
    }

    /// Undirected edge count
    pub fn edge_count(&self) -> usize {
        self.adjacency.iter().map(Vec::len).sum::<usize>() / 2
    }

    pub fn contains(&self, id: &str) -> bool {
        self.index.contains_key(id)
    }

    /// Ordered ids from `from` to `to` inclusive. Empty when either end is
    /// missing or no path exists.
    ///
    /// Among equally short frontier candidates the one inserted first wins.
    pub fn shortest_path(&self, from: &str, to: &str) -> Vec<String> {
        self.dijkstra(from, to)
            .map(|(path, _)| path.into_iter().map(|i| self.ids[i].clone()).collect())
            .unwrap_or_default()
    }

    /// Total weight of the shortest path, if one exists.
    pub fn shortest_distance(&self, from: &str, to: &str) -> Option<f32> {
        self.dijkstra(from, to).map(|(_, distance)| distance)
    }

    fn dijkstra(&self, from: &str, to: &str) -> Option<(Vec<usize>, f32)> {
        let source = *self.index.get(from)?;
        let target = *self.index.get(to)?;

        let n = self.ids.len();
        let mut dist = vec![f32::INFINITY; n];
        let mut prev: Vec<Option<usize>> = vec![None; n];
        let mut visited = vec![false; n];
        dist[source] = 0.0;

        loop {
            // Min-extraction over the unvisited set; strict `<` keeps the
            // first candidate on ties
            let mut current: Option<usize> = None;
            for i in 0..n {
                if visited[i] || !dist[i].is_finite() {
                    continue;
                }
                if current.map_or(true, |c| dist[i] < dist[c]) {
                    current = Some(i);
                }
            }
            let Some(u) = current else {
                break;
            };
            if u == target {
                break;
            }
            visited[u] = true;

            for &(v, weight) in &self.adjacency[u] {
                if visited[v] {
                    continue;
                }
                let candidate = dist[u] + weight;
                if candidate < dist[v] {
                    dist[v] = candidate;
                    prev[v] = Some(u);
                }
            }
        }

        if !dist[target].is_finite() {
            return None;
        }

        let mut path = vec![target];
        let mut cursor = target;
        while let Some(p) = prev[cursor] {
            path.push(p);
            cursor = p;
        }
        path.reverse();
        Some((path, dist[target]))
    }
}

// =============================================================================
// TESTS
// =============================================================================
