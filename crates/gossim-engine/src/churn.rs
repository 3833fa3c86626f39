//! Churn - scheduled node arrivals and departures
//!
//! The engine applies churn events at their tick. Neighbors learn about
//! them through their `arriving`/`leaving` sets, which the application
//! drains (and thereby applies to its link set) once per tick.

use std::collections::BTreeSet;

use gossim_core::{NodeId, SimRng, Tick};

/// A change to the node population
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Churn {
    /// The node leaves; its state is discarded
    Depart(NodeId),
    /// The node (re)joins with the given links
    Arrive { node: NodeId, links: Vec<NodeId> },
}

/// A churn change at a point in simulated time
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ChurnEvent {
    pub at: Tick,
    pub change: Churn,
}

/// Every churn event of one repetition
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ChurnPlan {
    events: Vec<ChurnEvent>,
}

impl ChurnPlan {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn depart(mut self, at: u64, node: u64) -> Self {
        self.events.push(ChurnEvent {
            at: Tick(at),
            change: Churn::Depart(NodeId(node)),
        });
        self
    }

    pub fn arrive(mut self, at: u64, node: u64, links: &[u64]) -> Self {
        self.events.push(ChurnEvent {
            at: Tick(at),
            change: Churn::Arrive {
                node: NodeId(node),
                links: links.iter().copied().map(NodeId).collect(),
            },
        });
        self
    }

    /// `count` distinct nodes out of `0..node_count` leave at uniformly drawn
    /// ticks in `from..until`
    pub fn random_departures(
        node_count: usize,
        count: usize,
        from: u64,
        until: u64,
        rng: &mut SimRng,
    ) -> Self {
        let ids: Vec<u64> = (0..node_count as u64).collect();
        let span = until.saturating_sub(from).max(1) as usize;
        let mut plan = Self::new();
        for node in rng.sample(&ids, count) {
            let at = from + rng.index(span) as u64;
            plan = plan.depart(at, node);
        }
        plan
    }

    pub fn events(&self) -> &[ChurnEvent] {
        &self.events
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }
}

/// Neighbor changes handed to an application when it drains churn
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ChurnDelta {
    pub arrived: BTreeSet<NodeId>,
    pub departed: BTreeSet<NodeId>,
}

impl ChurnDelta {
    pub fn is_empty(&self) -> bool {
        self.arrived.is_empty() && self.departed.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_plan_builder() {
        let plan = ChurnPlan::new().depart(5, 1).arrive(9, 4, &[0, 2]);
        assert_eq!(plan.events().len(), 2);
        assert_eq!(plan.events()[0].change, Churn::Depart(NodeId(1)));
        assert_eq!(
            plan.events()[1].change,
            Churn::Arrive {
                node: NodeId(4),
                links: vec![NodeId(0), NodeId(2)]
            }
        );
    }

    #[test]
    fn test_random_departures_distinct() {
        let mut rng = SimRng::new(3);
        let plan = ChurnPlan::random_departures(10, 4, 10, 20, &mut rng);
        let nodes: BTreeSet<NodeId> = plan
            .events()
            .iter()
            .filter_map(|e| match e.change {
                Churn::Depart(node) => Some(node),
                Churn::Arrive { .. } => None,
            })
            .collect();
        assert_eq!(nodes.len(), 4);
        assert!(plan
            .events()
            .iter()
            .all(|e| (Tick(10)..Tick(20)).contains(&e.at)));
    }
}
