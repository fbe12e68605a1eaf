//! Per-node state
//!
//! Nodes are identity-compared tree entities addressed by
//! [`NodeId`](crate::tree::NodeId); all state lives in the tree's slot table
//! and is only touched through `&mut Tree`.

use std::rc::Rc;

use indexmap::IndexMap;
use rustc_hash::{FxHashMap, FxHashSet};
use smallvec::SmallVec;

use crate::ast::Expression;
use crate::provider::Provider;
use crate::tree::NodeId;
use crate::tree::registry::{DependencyEdge, SubscriptionId};
use crate::value::Value;
use crate::watch::PollToken;

/// A declaration decided by rule evaluation: the originating rule and the
/// computed value
#[derive(Debug, Clone)]
pub struct Declaration {
    /// Index of the deciding rule in the root's rule list
    pub rule_index: usize,
    /// Computed value
    pub value: Value,
}

/// Rule-evaluation lifecycle of one node
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub(crate) struct EvalFlags {
    /// A deferred evaluation task is outstanding
    pub queued: bool,
    /// An evaluation pass is running (reentrancy guard)
    pub evaluating: bool,
    /// A dependency fired while evaluating; one more pass is needed
    pub rerun: bool,
    /// Consecutive passes without an external change
    pub convergence_count: u32,
    /// Requeueing suppressed until the next external change
    pub parked: bool,
}

/// Mutable state of one tree node
pub(crate) struct NodeData {
    pub(crate) parent: Option<NodeId>,
    pub(crate) children: SmallVec<[NodeId; 4]>,
    pub(crate) providers: SmallVec<[Rc<dyn Provider>; 2]>,
    /// Active declarations, in rule-decision order for deterministic diffing
    pub(crate) declarations: IndexMap<Rc<str>, Declaration>,
    /// Out-of-band assigned overrides
    pub(crate) overrides: IndexMap<Rc<str>, Value>,
    /// Latest values pushed for tracked properties, served from the provider
    /// tier
    pub(crate) tracked: FxHashMap<Rc<str>, Value>,
    /// Union of the attached providers' declared tracked-property sets,
    /// snapshotted at attachment; `None` while no provider declares one
    pub(crate) tracked_names: Option<FxHashSet<Rc<str>>>,
    /// Dependency subscriptions owned by this node's rule evaluator, keyed
    /// by edge for set-difference reconciliation
    pub(crate) rule_subscriptions: FxHashMap<DependencyEdge, SubscriptionId>,
    /// Relationship watchers keyed on this node (disposed at death)
    pub(crate) relationship_keys: Vec<Rc<Expression>>,
    /// Poll loops owned by this node (cancelled at death)
    pub(crate) poll_tokens: Vec<Rc<PollToken>>,
    pub(crate) flags: EvalFlags,
    pub(crate) alive: bool,
}

impl NodeData {
    pub(crate) fn new() -> Self {
        Self {
            parent: None,
            children: SmallVec::new(),
            providers: SmallVec::new(),
            declarations: IndexMap::new(),
            overrides: IndexMap::new(),
            tracked: FxHashMap::default(),
            tracked_names: None,
            rule_subscriptions: FxHashMap::default(),
            relationship_keys: Vec::new(),
            poll_tokens: Vec::new(),
            flags: EvalFlags::default(),
            alive: false,
        }
    }

    /// Declaration then override then Undefined; pure read
    pub(crate) fn declared_value(&self, name: &str) -> Value {
        if let Some(declaration) = self.declarations.get(name) {
            return declaration.value.clone();
        }
        if let Some(value) = self.overrides.get(name) {
            return value.clone();
        }
        Value::Undefined
    }
}
