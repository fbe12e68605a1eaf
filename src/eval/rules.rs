//! Per-node rule evaluation
//!
//! Each alive node runs the root's globally ordered rule list through a
//! small state machine: a dependency fire while idle queues a deferred pass;
//! a fire during a pass requests one more. A pass rebuilds the declaration
//! map from scratch, diffs it against the previous map by key and
//! `value_equals`, reconciles the node's dependency subscriptions by set
//! difference, and fires notifications for the changed set only.

use std::rc::Rc;

use indexmap::IndexMap;

use crate::eval::{Scope, evaluate};
use crate::tree::node::Declaration;
use crate::tree::registry::{DependencyEdge, DependencyList, Reaction, SubscriptionId};
use crate::tree::root::STOP_DECLARATION;
use crate::tree::{ChangeOrigin, NodeId, Tree};
use crate::value::Value;

/// Run one deferred evaluation pass for a node.
pub(crate) fn evaluate_node(tree: &mut Tree, id: NodeId) {
    {
        let Some(data) = tree.get_mut(id) else {
            return;
        };
        data.flags.queued = false;
        if !data.alive || data.flags.evaluating {
            return;
        }
        data.flags.evaluating = true;
        data.flags.rerun = false;
    }

    let (decided, deps) = run_rules(tree, id);
    let changed = diff_declarations(tree, id, &decided);
    reconcile_subscriptions(tree, id, &deps);
    tree.set_declarations(id, decided);

    let parked = update_convergence(tree, id, !changed.is_empty());

    for (name, value) in &changed {
        tree.notify_identifier(id, name, value, ChangeOrigin::Rules);
    }
    if !changed.is_empty() {
        tree.application().node_declarations_changed(tree, id);
    }

    let rerun = match tree.get_mut(id) {
        Some(data) => {
            data.flags.evaluating = false;
            std::mem::take(&mut data.flags.rerun)
        }
        None => false,
    };
    if rerun && !parked {
        tree.request_evaluation(id);
    }
}

/// Scan the global rule list: skip rules whose declared properties are all
/// decided, gate on selectors, decide undecided properties first-rule-wins,
/// and honor a truthy `stop` after the declaring rule.
fn run_rules(
    tree: &mut Tree,
    id: NodeId,
) -> (IndexMap<Rc<str>, Declaration>, DependencyList) {
    let rules = tree.rules().clone();
    let scope = Scope::node(id, tree.root());
    let mut deps = DependencyList::new();
    let mut decided: IndexMap<Rc<str>, Declaration> = IndexMap::new();

    for (rule_index, rule) in rules.rules().iter().enumerate() {
        if rule
            .declarations
            .iter()
            .all(|(name, _)| decided.contains_key(name))
        {
            continue;
        }
        if let Some(selector) = &rule.selector
            && !evaluate(tree, selector, &scope, &mut deps).to_bool()
        {
            continue;
        }
        for (name, expr) in &rule.declarations {
            if decided.contains_key(name) {
                continue;
            }
            let value = evaluate(tree, expr, &scope, &mut deps);
            decided.insert(name.clone(), Declaration { rule_index, value });
        }
        if decided
            .get(STOP_DECLARATION)
            .map(|declaration| declaration.value.to_bool())
            .unwrap_or(false)
        {
            break;
        }
    }
    (decided, deps)
}

/// Changed-property set between the previous and the new declaration map;
/// additions and removals count, removals surface as Undefined.
fn diff_declarations(
    tree: &Tree,
    id: NodeId,
    decided: &IndexMap<Rc<str>, Declaration>,
) -> Vec<(Rc<str>, Value)> {
    let Some(data) = tree.get(id) else {
        return Vec::new();
    };
    let mut changed = Vec::new();
    for (name, declaration) in decided {
        match data.declarations.get(name) {
            Some(old) if old.value.value_equals(&declaration.value) => {}
            _ => changed.push((name.clone(), declaration.value.clone())),
        }
    }
    for name in data.declarations.keys() {
        if !decided.contains_key(name) {
            changed.push((name.clone(), Value::Undefined));
        }
    }
    changed
}

/// Set-difference reconciliation: persisting edges keep their subscription,
/// new edges subscribe, stale edges release.
fn reconcile_subscriptions(tree: &mut Tree, id: NodeId, deps: &DependencyList) {
    let existing: Vec<DependencyEdge> = tree
        .get(id)
        .map(|data| data.rule_subscriptions.keys().cloned().collect())
        .unwrap_or_default();

    for edge in deps.iter() {
        if existing.contains(edge) {
            continue;
        }
        let sub = tree.subscribe(edge.clone(), Reaction::EvaluateRules(id));
        if let Some(data) = tree.get_mut(id) {
            data.rule_subscriptions.insert(edge.clone(), sub);
        }
    }

    let mut stale: Vec<SubscriptionId> = Vec::new();
    if let Some(data) = tree.get_mut(id) {
        let stale_keys: Vec<DependencyEdge> = data
            .rule_subscriptions
            .keys()
            .filter(|edge| !deps.contains(edge))
            .cloned()
            .collect();
        for key in stale_keys {
            if let Some(sub) = data.rule_subscriptions.remove(&key) {
                stale.push(sub);
            }
        }
    }
    for sub in stale {
        tree.unsubscribe(sub);
    }
}

/// Track consecutive changed passes; park the node with a warning once the
/// configured cap is exceeded. Returns whether the node is now parked.
fn update_convergence(tree: &mut Tree, id: NodeId, changed: bool) -> bool {
    let cap = tree.config().convergence_cap;
    let Some(data) = tree.get_mut(id) else {
        return false;
    };
    if !changed {
        data.flags.convergence_count = 0;
        return data.flags.parked;
    }
    data.flags.convergence_count = data.flags.convergence_count.saturating_add(1);
    if data.flags.convergence_count > cap {
        data.flags.parked = true;
        log::warn!(
            "rule evaluation of {id:?} failed to converge after {cap} passes; \
             parking until the next external change"
        );
        return true;
    }
    false
}
