//! Weighted graph with Dijkstra shortest paths.
//!
//! Costs are `f64`; callers only insert finite, positive weights. Equal-cost
//! frontier entries are popped in discovery order, so among paths of equal
//! weight the one found first wins.

use std::cmp::Ordering;
use std::collections::BinaryHeap;

/// A directed edge. `robot` indexes the robot that can make the hop.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Edge {
    pub to: usize,
    pub cost: f64,
    pub robot: usize,
}

#[derive(Debug, Default, Clone)]
pub struct Graph {
    adjacency: Vec<Vec<Edge>>,
}

impl Graph {
    pub fn with_nodes(count: usize) -> Self {
        Self {
            adjacency: vec![Vec::new(); count],
        }
    }

    pub fn node_count(&self) -> usize {
        self.adjacency.len()
    }

    pub fn edge_count(&self) -> usize {
        self.adjacency.iter().map(Vec::len).sum()
    }

    /// Connect `a` and `b` in both directions.
    pub fn add_undirected_edge(&mut self, a: usize, b: usize, cost: f64, robot: usize) {
        self.adjacency[a].push(Edge { to: b, cost, robot });
        self.adjacency[b].push(Edge { to: a, cost, robot });
    }

    pub fn edges(&self, node: usize) -> &[Edge] {
        &self.adjacency[node]
    }

    pub fn degree(&self, node: usize) -> usize {
        self.adjacency[node].len()
    }

    /// Single-source shortest paths from `start`.
    pub fn shortest_paths(&self, start: usize) -> ShortestPaths {
        let mut dist = vec![f64::INFINITY; self.adjacency.len()];
        let mut prev: Vec<Option<(usize, Edge)>> = vec![None; self.adjacency.len()];
        let mut heap = BinaryHeap::new();
        let mut seq = 0u64;

        dist[start] = 0.0;
        heap.push(State {
            cost: 0.0,
            seq,
            node: start,
        });

        while let Some(State { cost, node, .. }) = heap.pop() {
            if cost > dist[node] {
                continue;
            }

            for edge in &self.adjacency[node] {
                let next_cost = cost + edge.cost;
                if next_cost < dist[edge.to] {
                    dist[edge.to] = next_cost;
                    prev[edge.to] = Some((node, *edge));
                    seq += 1;
                    heap.push(State {
                        cost: next_cost,
                        seq,
                        node: edge.to,
                    });
                }
            }
        }

        ShortestPaths { start, dist, prev }
    }
}

/// Result of a single-source search.
#[derive(Debug, Clone)]
pub struct ShortestPaths {
    start: usize,
    dist: Vec<f64>,
    prev: Vec<Option<(usize, Edge)>>,
}

impl ShortestPaths {
    /// Distance to `node`, or `None` if unreachable.
    pub fn distance(&self, node: usize) -> Option<f64> {
        self.dist.get(node).copied().filter(|d| d.is_finite())
    }

    /// Nodes from the start to `end` and the edge taken into each node
    /// after the first. `None` if `end` is unreachable.
    pub fn path_to(&self, end: usize) -> Option<(Vec<usize>, Vec<Edge>)> {
        self.distance(end)?;
        let mut nodes = vec![end];
        let mut edges = Vec::new();
        let mut node = end;
        while node != self.start {
            let (from, edge) = self.prev[node]?;
            edges.push(edge);
            nodes.push(from);
            node = from;
        }
        nodes.reverse();
        edges.reverse();
        Some((nodes, edges))
    }
}

#[derive(Clone, Copy, PartialEq)]
struct State {
    cost: f64,
    seq: u64,
    node: usize,
}

impl Eq for State {}

// Min-heap on cost, then on discovery order.
impl Ord for State {
    fn cmp(&self, other: &Self) -> Ordering {
        other
            .cost
            .total_cmp(&self.cost)
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

impl PartialOrd for State {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}
