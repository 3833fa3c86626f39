//! Message envelope and delivery trace

use std::fmt;

use gossim_core::{join_batch, NodeId, Tick, WireWriter};

/// Where a message is addressed
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Destination {
    /// A single node
    Node(NodeId),
    /// Every current neighbor of the sender, expanded when dispatched
    Any,
}

/// Broadcast marker
pub const TO_ANY: Destination = Destination::Any;

impl From<NodeId> for Destination {
    fn from(id: NodeId) -> Self {
        Destination::Node(id)
    }
}

/// A delivered message. Immutable once sent.
///
/// Identity is `(from, seq)`; `seq` increases monotonically per sender.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Message {
    pub from: NodeId,
    pub to: NodeId,
    pub seq: u64,
    pub sent_at: Tick,
    pub payload: String,
}

impl Message {
    /// Algorithm tag: the payload text before the first field separator
    pub fn tag(&self) -> &str {
        self.payload.split('|').next().unwrap_or_default()
    }
}

impl fmt::Display for Message {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}->{} #{} @{}: {}",
            self.from, self.to, self.seq, self.sent_at, self.payload
        )
    }
}

/// What the engine did with a send
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SendOutcome {
    /// Handed to the channel under this sequence number. The channel may
    /// still lose it.
    Sent(u64),
    /// The target has left the network. The message is counted as sent and
    /// lost and is never delivered.
    Departed(u64),
}

impl SendOutcome {
    /// Sequence number consumed by the send
    pub fn seq(self) -> u64 {
        match self {
            SendOutcome::Sent(seq) | SendOutcome::Departed(seq) => seq,
        }
    }

    pub fn is_departed(self) -> bool {
        matches!(self, SendOutcome::Departed(_))
    }
}

/// A send waiting for the generation phase of a synchronous round
#[derive(Clone, Debug, PartialEq, Eq)]
pub(crate) struct Outgoing {
    pub to: Destination,
    pub seq: u64,
    pub payload: String,
}

/// Record of every delivery, for offline replay and diffing
#[derive(Clone, Debug, Default)]
pub struct MessageTrace {
    records: Vec<String>,
}

impl MessageTrace {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&mut self, msg: &Message, delivered_at: Tick) {
        let line = WireWriter::new(&msg.from.to_string())
            .field(msg.to)
            .field(msg.seq)
            .field(msg.sent_at)
            .field(delivered_at)
            .field(&msg.payload)
            .finish();
        self.records.push(line);
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn records(&self) -> &[String] {
        &self.records
    }

    /// All records as one `;`-joined batch
    pub fn dump(&self) -> String {
        join_batch(&self.records)
    }
}
