//! Relationship watchers: continuously-maintained derived values for
//! structural predicates
//!
//! A relationship query (`child_matches(pred)` and friends) evaluates a
//! predicate against structurally related nodes. While anything subscribes
//! to the query's `(node, apply-expression)` edge, a watcher keeps the
//! result current: it recomputes with the same compute + diff + reconcile
//! discipline as the rule evaluator and notifies the edge on
//! `value_equals` change.

use std::rc::Rc;

use rustc_hash::FxHashMap;

use crate::ast::Expression;
use crate::error::Result;
use crate::eval::{Scope, evaluate};
use crate::tree::registry::{DependencyEdge, DependencyList, Reaction, SubscriptionId};
use crate::tree::{ChangeOrigin, NodeId, Tree};
use crate::value::Value;

/// The seven structural predicates
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RelationshipKind {
    /// Self if it matches, else the parent's same query
    ThisOrAncestor,
    /// Self if it matches, else the first child whose same query is truthy
    ThisOrDescendant,
    /// First child (in order) matching the predicate
    Child,
    /// Last child (in order) matching the predicate
    LastChild,
    /// The parent, if it matches
    Parent,
    /// Nearest following sibling matching the predicate
    NextSibling,
    /// Nearest preceding sibling matching the predicate
    PreviousSibling,
}

impl RelationshipKind {
    /// All kinds, in identifier-lookup order
    pub const ALL: [RelationshipKind; 7] = [
        RelationshipKind::ThisOrAncestor,
        RelationshipKind::ThisOrDescendant,
        RelationshipKind::Child,
        RelationshipKind::LastChild,
        RelationshipKind::Parent,
        RelationshipKind::NextSibling,
        RelationshipKind::PreviousSibling,
    ];

    /// Rule-language identifier naming this query
    pub fn identifier(&self) -> &'static str {
        match self {
            RelationshipKind::ThisOrAncestor => "this_or_ancestor_matches",
            RelationshipKind::ThisOrDescendant => "this_or_descendant_matches",
            RelationshipKind::Child => "child_matches",
            RelationshipKind::LastChild => "last_child_matches",
            RelationshipKind::Parent => "parent_matches",
            RelationshipKind::NextSibling => "next_sibling_matches",
            RelationshipKind::PreviousSibling => "previous_sibling_matches",
        }
    }

    /// Parse an identifier into a kind
    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL
            .iter()
            .copied()
            .find(|kind| kind.identifier() == name)
    }
}

/// Recognize `kind(predicate)` apply expressions
pub(crate) fn recognize(expr: &Expression) -> Option<(RelationshipKind, &Expression)> {
    let (name, args) = expr.as_named_apply()?;
    let kind = RelationshipKind::from_name(name)?;
    if args.len() != 1 {
        return None;
    }
    Some((kind, &args[0]))
}

/// Live derived value for one `(node, apply-expression)` edge
pub(crate) struct RelationshipState {
    pub(crate) kind: RelationshipKind,
    pub(crate) predicate: Rc<Expression>,
    pub(crate) value: Value,
    pub(crate) subscriptions: FxHashMap<DependencyEdge, SubscriptionId>,
    pub(crate) queued: bool,
    pub(crate) pending_external: bool,
}

/// Evaluate a relationship apply expression from inside expression
/// evaluation: record the apply edge itself and serve the watcher's cached
/// value when one is live.
pub(crate) fn evaluate_cached(
    tree: &mut Tree,
    node: NodeId,
    kind: RelationshipKind,
    predicate: &Expression,
    full_expr: &Expression,
    scope: &Scope,
    deps: &mut DependencyList,
) -> Result<Value> {
    let key = DependencyEdge {
        node,
        expr: Rc::new(full_expr.clone()),
    };
    deps.record(key.clone());
    if let Some(state) = tree.relationships.get(&key) {
        return Ok(state.value.clone());
    }
    // No watcher yet: one-shot compute. The caller's subscription to the
    // apply edge constructs the watcher that keeps the value live.
    let mut scratch = DependencyList::new();
    compute(tree, node, kind, predicate, scope.root, &mut scratch)
}

/// Construct the watcher for a recognized apply edge, if absent
pub(crate) fn ensure_watcher(tree: &mut Tree, edge: &DependencyEdge) {
    if tree.relationships.contains_key(edge) {
        return;
    }
    let Some((kind, predicate)) = recognize(&edge.expr) else {
        return;
    };
    let predicate = Rc::new(predicate.clone());
    let root = tree.root();
    let mut deps = DependencyList::new();
    let value = compute(tree, edge.node, kind, &predicate, root, &mut deps)
        .unwrap_or(Value::Undefined);

    let mut subscriptions = FxHashMap::default();
    for dep in deps.iter() {
        let sub = tree.subscribe(
            dep.clone(),
            Reaction::RecomputeRelationship(edge.node, edge.expr.clone()),
        );
        subscriptions.insert(dep.clone(), sub);
    }
    tree.relationships.insert(
        edge.clone(),
        RelationshipState {
            kind,
            predicate,
            value,
            subscriptions,
            queued: false,
            pending_external: false,
        },
    );
    if let Some(data) = tree.get_mut(edge.node) {
        data.relationship_keys.push(edge.expr.clone());
    }
}

/// Tear a watcher down, releasing every subscription it owns. Idempotent.
pub(crate) fn dispose(tree: &mut Tree, edge: &DependencyEdge) {
    let Some(state) = tree.relationships.remove(edge) else {
        return;
    };
    for (_, sub) in state.subscriptions {
        tree.unsubscribe(sub);
    }
}

/// Deferred recomputation of one watcher: compute, diff, reconcile
/// subscriptions by set difference, notify on change.
pub(crate) fn recompute(tree: &mut Tree, edge: &DependencyEdge) {
    let Some(state) = tree.relationships.get_mut(edge) else {
        return;
    };
    state.queued = false;
    let origin = if std::mem::take(&mut state.pending_external) {
        ChangeOrigin::External
    } else {
        ChangeOrigin::Rules
    };
    let kind = state.kind;
    let predicate = state.predicate.clone();
    let old_value = state.value.clone();

    let root = tree.root();
    let mut deps = DependencyList::new();
    let value =
        compute(tree, edge.node, kind, &predicate, root, &mut deps).unwrap_or(Value::Undefined);

    // Reconcile: reuse persisting subscriptions, create new ones, dispose
    // stale ones.
    let reaction = Reaction::RecomputeRelationship(edge.node, edge.expr.clone());
    let existing: Vec<DependencyEdge> = tree
        .relationships
        .get(edge)
        .map(|state| state.subscriptions.keys().cloned().collect())
        .unwrap_or_default();
    for dep in deps.iter() {
        if !existing.contains(dep) {
            let sub = tree.subscribe(dep.clone(), reaction.clone());
            if let Some(state) = tree.relationships.get_mut(edge) {
                state.subscriptions.insert(dep.clone(), sub);
            }
        }
    }
    let mut stale: Vec<SubscriptionId> = Vec::new();
    if let Some(state) = tree.relationships.get_mut(edge) {
        let stale_keys: Vec<DependencyEdge> = state
            .subscriptions
            .keys()
            .filter(|dep| !deps.contains(dep))
            .cloned()
            .collect();
        for key in stale_keys {
            if let Some(sub) = state.subscriptions.remove(&key) {
                stale.push(sub);
            }
        }
    }
    for sub in stale {
        tree.unsubscribe(sub);
    }

    if !old_value.value_equals(&value) {
        if let Some(state) = tree.relationships.get_mut(edge) {
            state.value = value.clone();
        }
        tree.notify_edge(edge, &value, origin);
    }
}

/// Compute a relationship's current value, recording every structural and
/// predicate dependency into `deps`.
pub(crate) fn compute(
    tree: &mut Tree,
    node: NodeId,
    kind: RelationshipKind,
    predicate: &Expression,
    root: NodeId,
    deps: &mut DependencyList,
) -> Result<Value> {
    match kind {
        RelationshipKind::ThisOrAncestor => {
            let mut current = node;
            loop {
                if matches(tree, current, predicate, root, deps) {
                    return Ok(Value::Node(current));
                }
                deps.record_identifier(current, "parent");
                match tree.parent(current) {
                    Some(parent) => current = parent,
                    None => return Ok(Value::Undefined),
                }
            }
        }
        RelationshipKind::ThisOrDescendant => {
            Ok(this_or_descendant(tree, node, predicate, root, deps))
        }
        RelationshipKind::Child => {
            deps.record_identifier(node, "children");
            for child in tree.children(node) {
                if matches(tree, child, predicate, root, deps) {
                    return Ok(Value::Node(child));
                }
            }
            Ok(Value::Undefined)
        }
        RelationshipKind::LastChild => {
            deps.record_identifier(node, "children");
            for child in tree.children(node).into_iter().rev() {
                if matches(tree, child, predicate, root, deps) {
                    return Ok(Value::Node(child));
                }
            }
            Ok(Value::Undefined)
        }
        RelationshipKind::Parent => {
            deps.record_identifier(node, "parent");
            match tree.parent(node) {
                Some(parent) if matches(tree, parent, predicate, root, deps) => {
                    Ok(Value::Node(parent))
                }
                _ => Ok(Value::Undefined),
            }
        }
        RelationshipKind::NextSibling => siblings(tree, node, predicate, root, deps, false),
        RelationshipKind::PreviousSibling => siblings(tree, node, predicate, root, deps, true),
    }
}

/// Self if it matches, else the first child (in order) whose same query is
/// truthy. Every child is evaluated even after a match so the dependency
/// set stays complete.
fn this_or_descendant(
    tree: &mut Tree,
    node: NodeId,
    predicate: &Expression,
    root: NodeId,
    deps: &mut DependencyList,
) -> Value {
    if matches(tree, node, predicate, root, deps) {
        return Value::Node(node);
    }
    deps.record_identifier(node, "children");
    let mut found = Value::Undefined;
    for child in tree.children(node) {
        let result = this_or_descendant(tree, child, predicate, root, deps);
        if found.is_undefined() && result.to_bool() {
            found = result;
        }
    }
    found
}

fn siblings(
    tree: &mut Tree,
    node: NodeId,
    predicate: &Expression,
    root: NodeId,
    deps: &mut DependencyList,
    preceding: bool,
) -> Result<Value> {
    deps.record_identifier(node, "parent");
    let Some(parent) = tree.parent(node) else {
        return Ok(Value::Undefined);
    };
    deps.record_identifier(parent, "children");
    let children = tree.children(parent);
    let Some(position) = children.iter().position(|c| *c == node) else {
        log::warn!("{node:?} missing from its parent's child list");
        return Ok(Value::Undefined);
    };
    let candidates: Vec<NodeId> = if preceding {
        children[..position].iter().rev().copied().collect()
    } else {
        children[position + 1..].to_vec()
    };
    for sibling in candidates {
        if matches(tree, sibling, predicate, root, deps) {
            return Ok(Value::Node(sibling));
        }
    }
    Ok(Value::Undefined)
}

fn matches(
    tree: &mut Tree,
    candidate: NodeId,
    predicate: &Expression,
    root: NodeId,
    deps: &mut DependencyList,
) -> bool {
    let scope = Scope::node(candidate, root);
    evaluate(tree, predicate, &scope, deps).to_bool()
}
