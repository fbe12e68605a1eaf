//! Dependency registry data model
//!
//! A dependency edge is a `(node, expression)` pair whose change must
//! trigger a dependent's recomputation. The registry keeps one subscriber
//! list per edge; the first subscription and last release invoke the node's
//! watch/unwatch hooks. Hook invocation itself lives on
//! [`Tree`](crate::tree::Tree) because it needs tree-wide mutation; this
//! module owns the tables and bookkeeping types.

use std::rc::Rc;

use indexmap::IndexSet;
use rustc_hash::FxHashMap;

use crate::ast::Expression;
use crate::tree::NodeId;
use crate::value::Value;

/// A `(node, expression)` pair keying the dependency registry
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DependencyEdge {
    /// Node whose property is depended upon
    pub node: NodeId,
    /// Expression naming the property (usually a bare identifier)
    pub expr: Rc<Expression>,
}

impl DependencyEdge {
    /// Edge for an identifier property of a node
    pub fn identifier(node: NodeId, name: &str) -> Self {
        Self {
            node,
            expr: Rc::new(Expression::identifier(name)),
        }
    }
}

/// Ordered, de-duplicated set of dependency edges recorded during one
/// evaluation pass
#[derive(Debug, Clone, Default)]
pub struct DependencyList {
    edges: IndexSet<DependencyEdge>,
}

impl DependencyList {
    /// Empty list
    pub fn new() -> Self {
        Self::default()
    }

    /// Record an edge; duplicates collapse
    pub fn record(&mut self, edge: DependencyEdge) {
        self.edges.insert(edge);
    }

    /// Record an identifier edge
    pub fn record_identifier(&mut self, node: NodeId, name: &str) {
        self.record(DependencyEdge::identifier(node, name));
    }

    /// Iterate recorded edges in recording order
    pub fn iter(&self) -> impl Iterator<Item = &DependencyEdge> {
        self.edges.iter()
    }

    /// Membership test
    pub fn contains(&self, edge: &DependencyEdge) -> bool {
        self.edges.contains(edge)
    }

    /// Number of recorded edges
    pub fn len(&self) -> usize {
        self.edges.len()
    }

    /// Whether nothing was recorded
    pub fn is_empty(&self) -> bool {
        self.edges.is_empty()
    }

    /// Merge another list into this one
    pub fn extend(&mut self, other: &DependencyList) {
        for edge in other.iter() {
            self.edges.insert(edge.clone());
        }
    }
}

/// Identifier of one active subscription; release through
/// [`Tree::unsubscribe`](crate::tree::Tree::unsubscribe) is idempotent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(pub(crate) u64);

/// Identifier of an externally registered change handler
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct HandlerId(pub(crate) u64);

/// What to do when a subscribed edge fires.
///
/// Recomputation reactions are deferred through the task queue; handler
/// reactions deliver the notification on the triggering stack, which keeps
/// the ordering guarantee that every current subscriber hears about a change
/// before any recomputation it triggers begins.
#[derive(Debug, Clone)]
pub(crate) enum Reaction {
    /// Queue a rule re-evaluation of the given node
    EvaluateRules(NodeId),
    /// Queue recomputation of the relationship watcher keyed by this edge
    RecomputeRelationship(NodeId, Rc<Expression>),
    /// Queue recomputation of an expression watcher
    RecomputeWatcher(u64),
    /// Invoke an external change handler
    Handler(HandlerId),
}

/// Change notification delivered to external handlers
#[derive(Debug, Clone)]
pub struct PropertyChange {
    /// Node whose property changed
    pub node: NodeId,
    /// Expression the subscription was registered for
    pub expr: Rc<Expression>,
    /// New value of the property
    pub value: Value,
}

/// One subscriber list entry
#[derive(Default)]
pub(crate) struct WatchEntry {
    pub(crate) subscribers: Vec<(SubscriptionId, Reaction)>,
}

/// Registry tables: per-edge subscriber lists plus the reverse record map
/// that makes release idempotent.
#[derive(Default)]
pub(crate) struct Registry {
    pub(crate) entries: FxHashMap<DependencyEdge, WatchEntry>,
    pub(crate) records: FxHashMap<SubscriptionId, DependencyEdge>,
    pub(crate) next_subscription: u64,
}

impl Registry {
    pub(crate) fn next_id(&mut self) -> SubscriptionId {
        let id = SubscriptionId(self.next_subscription);
        self.next_subscription += 1;
        id
    }

    /// Number of live subscriptions for an edge
    pub(crate) fn subscriber_count(&self, edge: &DependencyEdge) -> usize {
        self.entries
            .get(edge)
            .map(|entry| entry.subscribers.len())
            .unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dependency_list_deduplicates() {
        let node = NodeId::test_id(1);
        let mut deps = DependencyList::new();
        deps.record_identifier(node, "name");
        deps.record_identifier(node, "name");
        deps.record_identifier(node, "role");
        assert_eq!(deps.len(), 2);
        assert!(deps.contains(&DependencyEdge::identifier(node, "role")));
    }

    #[test]
    fn edges_key_by_structure() {
        let node = NodeId::test_id(7);
        let a = DependencyEdge::identifier(node, "name");
        let b = DependencyEdge::identifier(node, "name");
        assert_eq!(a, b);

        let mut registry = Registry::default();
        registry.entries.entry(a).or_default();
        assert_eq!(registry.subscriber_count(&b), 0);
        assert_eq!(registry.entries.len(), 1);
    }
}
