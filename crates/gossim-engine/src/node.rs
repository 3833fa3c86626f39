//! Node - one network participant as seen by the engine
//!
//! A node owns its neighbor sets, message counters, pending churn and the
//! single application instance running on it. Only the engine mutates a
//! node; applications observe it through [`AppContext`](crate::AppContext).

use std::collections::BTreeSet;
use std::fmt;

use gossim_core::NodeId;

use crate::app::Application;
use crate::churn::ChurnDelta;

/// Message counters of a node. Monotonically increasing.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct NodeCounters {
    /// Messages handed to the channel, one per expanded destination
    pub sent: u64,
    /// Messages delivered to this node
    pub received: u64,
    /// Messages from this node that were dropped or hit a departed node
    pub lost: u64,
}

pub struct Node {
    id: NodeId,
    links: BTreeSet<NodeId>,
    overlay: Option<BTreeSet<NodeId>>,
    counters: NodeCounters,
    active: bool,
    arriving: BTreeSet<NodeId>,
    leaving: BTreeSet<NodeId>,
    next_seq: u64,
    pub(crate) app: Option<Box<dyn Application>>,
}

impl Node {
    pub fn new(id: NodeId, links: BTreeSet<NodeId>) -> Self {
        Node {
            id,
            links,
            overlay: None,
            counters: NodeCounters::default(),
            active: true,
            arriving: BTreeSet::new(),
            leaving: BTreeSet::new(),
            next_seq: 0,
            app: None,
        }
    }

    /// A slot for an id that has not joined yet
    pub(crate) fn absent(id: NodeId) -> Self {
        let mut node = Self::new(id, BTreeSet::new());
        node.active = false;
        node
    }

    pub fn id(&self) -> NodeId {
        self.id
    }

    pub fn links(&self) -> &BTreeSet<NodeId> {
        &self.links
    }

    pub fn overlay_links(&self) -> Option<&BTreeSet<NodeId>> {
        self.overlay.as_ref()
    }

    pub fn counters(&self) -> NodeCounters {
        self.counters
    }

    pub fn is_active(&self) -> bool {
        self.active
    }

    /// Whether an application is currently installed
    pub fn has_app(&self) -> bool {
        self.app.is_some()
    }

    pub fn app(&self) -> Option<&dyn Application> {
        self.app.as_deref()
    }

    /// Pending churn not yet drained by the application
    pub fn pending_churn(&self) -> (&BTreeSet<NodeId>, &BTreeSet<NodeId>) {
        (&self.arriving, &self.leaving)
    }

    pub(crate) fn set_overlay(&mut self, overlay: BTreeSet<NodeId>) {
        self.overlay = Some(overlay);
    }

    pub(crate) fn next_seq(&mut self) -> u64 {
        let seq = self.next_seq;
        self.next_seq += 1;
        seq
    }

    pub(crate) fn record_sent(&mut self) {
        self.counters.sent += 1;
    }

    pub(crate) fn record_received(&mut self) {
        self.counters.received += 1;
    }

    pub(crate) fn record_lost(&mut self) {
        self.counters.lost += 1;
    }

    pub(crate) fn depart(&mut self) {
        self.active = false;
        self.app = None;
        self.arriving.clear();
        self.leaving.clear();
    }

    pub(crate) fn arrive(&mut self, links: BTreeSet<NodeId>) {
        self.active = true;
        self.links = links;
        self.arriving.clear();
        self.leaving.clear();
    }

    pub(crate) fn note_arrival(&mut self, peer: NodeId) {
        self.leaving.remove(&peer);
        self.arriving.insert(peer);
    }

    pub(crate) fn note_departure(&mut self, peer: NodeId) {
        self.arriving.remove(&peer);
        self.leaving.insert(peer);
    }

    /// Apply and clear pending churn
    pub(crate) fn drain_churn(&mut self) -> ChurnDelta {
        let arrived = std::mem::take(&mut self.arriving);
        let departed = std::mem::take(&mut self.leaving);
        for peer in &arrived {
            self.links.insert(*peer);
        }
        for peer in &departed {
            self.links.remove(peer);
            if let Some(overlay) = self.overlay.as_mut() {
                overlay.remove(peer);
            }
        }
        ChurnDelta { arrived, departed }
    }
}

impl fmt::Debug for Node {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Node")
            .field("id", &self.id)
            .field("active", &self.active)
            .field("links", &self.links)
            .field("counters", &self.counters)
            .finish()
    }
}
