//! Topology - the undirected graph nodes gossip over
//!
//! Generating or loading real topologies happens outside the simulator; this
//! type only holds the adjacency and a few regular shapes used for tests and
//! small experiments. The same type describes an optional overlay.

use std::collections::{BTreeMap, BTreeSet, VecDeque};

use gossim_core::{NodeId, SimRng};

/// Undirected graph over the dense ids `0..node_count`
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Topology {
    adjacency: BTreeMap<NodeId, BTreeSet<NodeId>>,
}

impl Topology {
    /// `count` isolated nodes
    pub fn new(count: usize) -> Self {
        let adjacency = (0..count)
            .map(|i| (NodeId::from_index(i), BTreeSet::new()))
            .collect();
        Topology { adjacency }
    }

    /// 0 - 1 - 2 - ... - (count-1)
    pub fn line(count: usize) -> Self {
        let mut topology = Self::new(count);
        for i in 1..count {
            topology.add_edge(NodeId::from_index(i - 1), NodeId::from_index(i));
        }
        topology
    }

    /// A line with its ends joined
    pub fn ring(count: usize) -> Self {
        let mut topology = Self::line(count);
        if count > 2 {
            topology.add_edge(NodeId::from_index(count - 1), NodeId::ZERO);
        }
        topology
    }

    /// Every pair connected
    pub fn complete(count: usize) -> Self {
        let mut topology = Self::new(count);
        for i in 0..count {
            for j in (i + 1)..count {
                topology.add_edge(NodeId::from_index(i), NodeId::from_index(j));
            }
        }
        topology
    }

    /// Node 0 connected to every other node
    pub fn star(count: usize) -> Self {
        let mut topology = Self::new(count);
        for i in 1..count {
            topology.add_edge(NodeId::ZERO, NodeId::from_index(i));
        }
        topology
    }

    /// Explicit edge list
    pub fn from_edges(count: usize, edges: &[(u64, u64)]) -> Self {
        let mut topology = Self::new(count);
        for &(a, b) in edges {
            topology.add_edge(NodeId(a), NodeId(b));
        }
        topology
    }

    /// Erdős–Rényi graph: each pair is linked with probability `p`
    pub fn random(count: usize, p: f64, rng: &mut SimRng) -> Self {
        let mut topology = Self::new(count);
        for i in 0..count {
            for j in (i + 1)..count {
                if rng.bernoulli(p) {
                    topology.add_edge(NodeId::from_index(i), NodeId::from_index(j));
                }
            }
        }
        topology
    }

    /// Add an undirected edge, growing the node set if needed. Self-loops
    /// are ignored.
    pub fn add_edge(&mut self, a: NodeId, b: NodeId) {
        let top = a.max(b).index();
        while self.adjacency.len() <= top {
            let next = NodeId::from_index(self.adjacency.len());
            self.adjacency.insert(next, BTreeSet::new());
        }
        if a == b {
            return;
        }
        self.adjacency.entry(a).or_default().insert(b);
        self.adjacency.entry(b).or_default().insert(a);
    }

    pub fn remove_edge(&mut self, a: NodeId, b: NodeId) {
        if let Some(set) = self.adjacency.get_mut(&a) {
            set.remove(&b);
        }
        if let Some(set) = self.adjacency.get_mut(&b) {
            set.remove(&a);
        }
    }

    pub fn neighbors(&self, node: NodeId) -> Option<&BTreeSet<NodeId>> {
        self.adjacency.get(&node)
    }

    pub fn node_count(&self) -> usize {
        self.adjacency.len()
    }

    pub fn edge_count(&self) -> usize {
        self.adjacency.values().map(BTreeSet::len).sum::<usize>() / 2
    }

    pub fn nodes(&self) -> impl Iterator<Item = NodeId> + '_ {
        self.adjacency.keys().copied()
    }

    /// Whether every node can reach every other node
    pub fn is_connected(&self) -> bool {
        let Some(start) = self.adjacency.keys().next().copied() else {
            return true;
        };
        let mut seen = BTreeSet::from([start]);
        let mut frontier = VecDeque::from([start]);
        while let Some(node) = frontier.pop_front() {
            for next in &self.adjacency[&node] {
                if seen.insert(*next) {
                    frontier.push_back(*next);
                }
            }
        }
        seen.len() == self.adjacency.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_line_and_ring() {
        let line = Topology::line(4);
        assert_eq!(line.edge_count(), 3);
        assert_eq!(line.neighbors(NodeId(0)).unwrap().len(), 1);
        assert_eq!(line.neighbors(NodeId(1)).unwrap().len(), 2);

        let ring = Topology::ring(4);
        assert_eq!(ring.edge_count(), 4);
        assert!(ring.neighbors(NodeId(3)).unwrap().contains(&NodeId(0)));
    }

    #[test]
    fn test_complete_and_star() {
        assert_eq!(Topology::complete(5).edge_count(), 10);
        let star = Topology::star(5);
        assert_eq!(star.neighbors(NodeId(0)).unwrap().len(), 4);
        assert_eq!(star.neighbors(NodeId(4)).unwrap().len(), 1);
    }

    #[test]
    fn test_from_edges_grows_and_ignores_self_loops() {
        let topology = Topology::from_edges(2, &[(0, 1), (1, 4), (2, 2)]);
        assert_eq!(topology.node_count(), 5);
        assert_eq!(topology.edge_count(), 2);
        assert!(!topology.is_connected());
    }

    #[test]
    fn test_remove_edge() {
        let mut topology = Topology::ring(3);
        topology.remove_edge(NodeId(0), NodeId(1));
        assert_eq!(topology.edge_count(), 2);
        assert!(topology.is_connected());
    }

    #[test]
    fn test_random_is_deterministic() {
        let a = Topology::random(20, 0.3, &mut SimRng::new(9));
        let b = Topology::random(20, 0.3, &mut SimRng::new(9));
        assert_eq!(a, b);
    }
}
