//! External collaborator contracts
//!
//! A [`Provider`] is a capability object backing a node with externally
//! sourced data (a platform accessibility backend). Providers are queried in
//! attachment order with a primary and a late tier; built-ins and rule
//! declarations rank between the two. The [`Application`] is the embedding
//! layer above the tree: it hears about structure and declaration changes
//! and may inject identifiers of its own.
//!
//! Provider data fetches may suspend on I/O; completions must be marshalled
//! back onto the tree's logical thread before touching node state.

use std::cell::RefCell;
use std::rc::Rc;

use async_trait::async_trait;
use rustc_hash::FxHashMap;

use crate::ast::Expression;
use crate::error::Result;
use crate::tree::registry::DependencyList;
use crate::tree::{NodeId, Tree};
use crate::value::Value;

/// Capability contract implemented by out-of-scope backends
#[async_trait(?Send)]
pub trait Provider {
    /// Primary identifier hook; first non-Undefined answer across the
    /// node's providers wins. Transient backend failures should surface as
    /// recoverable errors and leave the property unknown.
    fn evaluate_identifier(
        &self,
        node: NodeId,
        name: &str,
        deps: &mut DependencyList,
    ) -> Result<Value> {
        let _ = (node, name, deps);
        Ok(Value::Undefined)
    }

    /// Late fallback tier, consulted after built-ins, declarations, and
    /// overrides
    fn evaluate_identifier_late(
        &self,
        node: NodeId,
        name: &str,
        deps: &mut DependencyList,
    ) -> Result<Value> {
        let _ = (node, name, deps);
        Ok(Value::Undefined)
    }

    /// First subscriber appeared for `(node, expr)`; return `true` when this
    /// provider takes responsibility for watching it
    fn watch_property(&self, node: NodeId, expr: &Expression) -> bool {
        let _ = (node, expr);
        false
    }

    /// Last subscriber released `(node, expr)`; return `true` when this
    /// provider handled the corresponding watch
    fn unwatch_property(&self, node: NodeId, expr: &Expression) -> bool {
        let _ = (node, expr);
        false
    }

    /// The node is being structurally removed
    fn notify_node_removed(&self, node: NodeId) {
        let _ = node;
    }

    /// Identifiers this provider updates through the batched
    /// tracked-property path, if any. Snapshotted when the provider is
    /// attached; once any provider on a node declares a set, pushes for
    /// names outside the union are dropped.
    fn tracked_properties(&self) -> Option<Vec<Rc<str>>> {
        None
    }

    /// A tracked property was pushed through
    /// [`Tree::tracked_property_changed`]
    fn tracked_property_changed(&self, node: NodeId, name: &str, value: &Value) {
        let _ = (node, name, value);
    }

    /// Diagnostic dump of backend-side state for a node
    fn dump_properties(&self, node: NodeId) -> serde_json::Value {
        let _ = node;
        serde_json::Value::Null
    }

    /// Resolve a screen point suitable for synthetic clicks
    async fn get_clickable_point(&self, node: NodeId) -> Result<Option<(f64, f64)>> {
        let _ = node;
        Ok(None)
    }
}

/// Embedding-layer contract above the tree
pub trait Application {
    /// A tree finished constructing its root
    fn root_created(&self, tree: &mut Tree, root: NodeId) {
        let _ = (tree, root);
    }

    /// A node's declaration map changed after a rule evaluation pass
    fn node_declarations_changed(&self, tree: &mut Tree, node: NodeId) {
        let _ = (tree, node);
    }

    /// A node died (its id no longer resolves)
    fn node_died(&self, tree: &mut Tree, node: NodeId) {
        let _ = (tree, node);
    }

    /// Tier-3 identifier injection between built-ins and declarations
    fn evaluate_identifier_hook(
        &self,
        tree: &mut Tree,
        node: NodeId,
        name: &str,
        deps: &mut DependencyList,
    ) -> Option<Value> {
        let _ = (tree, node, name, deps);
        None
    }

    /// Diagnostic dump hook for application-level node state
    fn dump_node_properties(&self, node: NodeId) -> serde_json::Value {
        let _ = node;
        serde_json::Value::Null
    }
}

/// Application that ignores every callback
pub struct NullApplication;

impl Application for NullApplication {}

/// In-memory provider serving a fixed property map per node.
///
/// Intended for tests and demos; real backends implement [`Provider`] over a
/// platform accessibility protocol.
#[derive(Default)]
pub struct StaticProvider {
    properties: RefCell<FxHashMap<(NodeId, Rc<str>), Value>>,
    late_properties: RefCell<FxHashMap<(NodeId, Rc<str>), Value>>,
    tracked: RefCell<Vec<Rc<str>>>,
    watched: RefCell<Vec<(NodeId, Expression)>>,
    removed: RefCell<Vec<NodeId>>,
}

impl StaticProvider {
    /// Empty provider
    pub fn new() -> Rc<Self> {
        Rc::new(Self::default())
    }

    /// Set a primary-tier property
    pub fn set(&self, node: NodeId, name: &str, value: Value) {
        self.properties
            .borrow_mut()
            .insert((node, Rc::from(name)), value);
    }

    /// Set a late-tier property
    pub fn set_late(&self, node: NodeId, name: &str, value: Value) {
        self.late_properties
            .borrow_mut()
            .insert((node, Rc::from(name)), value);
    }

    /// Declare a property name as updated through the tracked push path.
    /// Takes effect for nodes the provider is attached to afterwards.
    pub fn track(&self, name: &str) {
        self.tracked.borrow_mut().push(Rc::from(name));
    }

    /// Nodes this provider was told were removed, in notification order
    pub fn removed(&self) -> Vec<NodeId> {
        self.removed.borrow().clone()
    }

    /// Number of active provider-side watches
    pub fn watch_count(&self) -> usize {
        self.watched.borrow().len()
    }
}

impl Provider for StaticProvider {
    fn evaluate_identifier(
        &self,
        node: NodeId,
        name: &str,
        _deps: &mut DependencyList,
    ) -> Result<Value> {
        Ok(self
            .properties
            .borrow()
            .get(&(node, Rc::from(name)))
            .cloned()
            .unwrap_or(Value::Undefined))
    }

    fn evaluate_identifier_late(
        &self,
        node: NodeId,
        name: &str,
        _deps: &mut DependencyList,
    ) -> Result<Value> {
        Ok(self
            .late_properties
            .borrow()
            .get(&(node, Rc::from(name)))
            .cloned()
            .unwrap_or(Value::Undefined))
    }

    fn watch_property(&self, node: NodeId, expr: &Expression) -> bool {
        // Only identifiers this provider actually serves are its watches.
        let serves = match expr.as_identifier() {
            Some(name) => self
                .properties
                .borrow()
                .contains_key(&(node, Rc::from(name))),
            None => false,
        };
        if serves {
            self.watched.borrow_mut().push((node, expr.clone()));
        }
        serves
    }

    fn unwatch_property(&self, node: NodeId, expr: &Expression) -> bool {
        let mut watched = self.watched.borrow_mut();
        if let Some(position) = watched
            .iter()
            .position(|(n, e)| *n == node && e == expr)
        {
            watched.remove(position);
            true
        } else {
            false
        }
    }

    fn tracked_properties(&self) -> Option<Vec<Rc<str>>> {
        let tracked = self.tracked.borrow();
        if tracked.is_empty() {
            None
        } else {
            Some(tracked.clone())
        }
    }

    fn notify_node_removed(&self, node: NodeId) {
        self.removed.borrow_mut().push(node);
    }
}
