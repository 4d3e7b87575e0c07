//! Mutation notifications for external dispatchers.
//!
//! Every successful add/remove/clear emits a [`NodeEvent`] carrying the
//! affected node(s) plus immutable before/after snapshots of the mutated
//! set. Dispatch is fire-and-forget: a failing sink is logged and never
//! blocks or fails the mutation.

use crate::holder::Reference;
use crate::node::Node;
use im::HashSet as ImHashSet;

/// What a mutation did.
#[derive(Debug, Clone)]
pub enum NodeEventKind {
    Added(Node),
    Removed(Node),
    /// A bulk removal (clear, predicate removal, audit sweep).
    Cleared,
}

/// A single mutation notification.
#[derive(Debug, Clone)]
pub struct NodeEvent {
    /// The holder that was mutated.
    pub holder: Reference,
    pub kind: NodeEventKind,
    /// Snapshot of the mutated set before the change.
    pub before: ImHashSet<Node>,
    /// Snapshot of the mutated set after the change.
    pub after: ImHashSet<Node>,
}

/// External event dispatcher. Implementations must not block.
pub trait EventSink: Send + Sync {
    fn handle(&self, event: NodeEvent) -> anyhow::Result<()>;
}

/// Drops every event. The default sink.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopEventSink;

impl EventSink for NoopEventSink {
    fn handle(&self, _event: NodeEvent) -> anyhow::Result<()> {
        Ok(())
    }
}

pub(crate) fn dispatch(sink: &dyn EventSink, event: NodeEvent) {
    if let Err(error) = sink.handle(event) {
        tracing::warn!(%error, "event sink failed; mutation unaffected");
    }
}
