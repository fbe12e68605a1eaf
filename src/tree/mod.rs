//! The mirrored tree: arena-indexed node table, structural operations, the
//! dependency registry, and the deferred task queue
//!
//! All tree mutation and evaluation state lives on one logical thread; the
//! core takes `&mut Tree` everywhere and holds no locks. Changes propagate by
//! message passing: a dependency fire never recurses into recomputation on
//! the triggering stack, it enqueues a task that [`Tree::run_until_idle`]
//! drains FIFO after the stack unwinds.

pub mod node;
pub mod registry;
pub mod root;

use std::cell::RefCell;
use std::collections::VecDeque;
use std::fmt;
use std::rc::Rc;

use rustc_hash::FxHashMap;

use crate::ast::Expression;
use crate::config::EngineConfig;
use crate::error::{AxError, ErrorSink, default_error_sink};
use crate::eval::relationship::{self, RelationshipKind, RelationshipState};
use crate::eval::{Builtins, rules};
use crate::provider::{Application, Provider};
use crate::tree::node::{Declaration, NodeData};
use crate::tree::registry::{
    DependencyEdge, DependencyList, HandlerId, PropertyChange, Reaction, Registry, SubscriptionId,
};
use crate::tree::root::Root;
use crate::value::Value;
use crate::watch::{ExprWatcherState, PollToken};

/// Identity of a tree node.
///
/// Node ids are generational: a slot reused after a node's death yields a
/// different id, so stale ids held by collaborators simply fail to resolve.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId {
    index: u32,
    generation: u32,
}

impl fmt::Debug for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "node#{}v{}", self.index, self.generation)
    }
}

impl NodeId {
    #[cfg(test)]
    pub(crate) fn test_id(index: u32) -> Self {
        Self {
            index,
            generation: 0,
        }
    }
}

struct Slot {
    generation: u32,
    data: Option<NodeData>,
}

/// Deferred work item
#[derive(Debug, Clone)]
pub(crate) enum Task {
    EvaluateRules(NodeId),
    RecomputeRelationship(DependencyEdge),
    RecomputeWatcher(u64),
}

/// Where a change notification originated.
///
/// External changes (provider pushes, overrides, structure) reset the
/// convergence counter of nodes they wake; rule-driven changes do not, which
/// is what lets the convergence cap catch cyclic rules that oscillate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ChangeOrigin {
    External,
    Rules,
}

type Handler = Rc<RefCell<dyn FnMut(&mut Tree, &PropertyChange)>>;

/// The mirrored tree and every piece of reactive state attached to it
pub struct Tree {
    config: EngineConfig,
    rules: Rc<Root>,
    application: Rc<dyn Application>,
    slots: Vec<Slot>,
    free: Vec<u32>,
    root: NodeId,
    pub(crate) registry: Registry,
    handlers: FxHashMap<HandlerId, Handler>,
    handler_for_sub: FxHashMap<SubscriptionId, HandlerId>,
    next_handler: u64,
    pub(crate) relationships: FxHashMap<DependencyEdge, RelationshipState>,
    pub(crate) watchers: FxHashMap<u64, ExprWatcherState>,
    pub(crate) next_watcher: u64,
    pub(crate) builtins: Builtins,
    queue: VecDeque<Task>,
    draining: bool,
    error_sink: ErrorSink,
}

impl Tree {
    /// Create a tree with its root node alive and the root's first rule
    /// evaluation queued. Call [`Tree::run_until_idle`] to run it.
    pub fn new(config: EngineConfig, rules: Rc<Root>, application: Rc<dyn Application>) -> Self {
        let mut tree = Self {
            config,
            rules,
            application: application.clone(),
            slots: Vec::new(),
            free: Vec::new(),
            root: NodeId {
                index: 0,
                generation: 0,
            },
            registry: Registry::default(),
            handlers: FxHashMap::default(),
            handler_for_sub: FxHashMap::default(),
            next_handler: 0,
            relationships: FxHashMap::default(),
            watchers: FxHashMap::default(),
            next_watcher: 0,
            builtins: Builtins::new(),
            queue: VecDeque::new(),
            draining: false,
            error_sink: default_error_sink(),
        };
        let root = tree.allocate();
        debug_assert_eq!(root.index, 0);
        tree.root = root;
        tree.mark_alive(root);
        application.root_created(&mut tree, root);
        tree
    }

    /// The distinguished root node
    pub fn root(&self) -> NodeId {
        self.root
    }

    /// Engine configuration
    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// The global ordered rule list
    pub fn rules(&self) -> &Rc<Root> {
        &self.rules
    }

    /// The application collaborator
    pub(crate) fn application(&self) -> Rc<dyn Application> {
        self.application.clone()
    }

    /// Replace the process-wide sink for unexpected errors
    pub fn set_error_sink(&mut self, sink: ErrorSink) {
        self.error_sink = sink;
    }

    // ---- slot table ----------------------------------------------------

    fn allocate(&mut self) -> NodeId {
        if let Some(index) = self.free.pop() {
            let slot = &mut self.slots[index as usize];
            slot.data = Some(NodeData::new());
            NodeId {
                index,
                generation: slot.generation,
            }
        } else {
            let index = self.slots.len() as u32;
            self.slots.push(Slot {
                generation: 0,
                data: Some(NodeData::new()),
            });
            NodeId {
                index,
                generation: 0,
            }
        }
    }

    pub(crate) fn get(&self, id: NodeId) -> Option<&NodeData> {
        let slot = self.slots.get(id.index as usize)?;
        if slot.generation != id.generation {
            return None;
        }
        slot.data.as_ref()
    }

    pub(crate) fn get_mut(&mut self, id: NodeId) -> Option<&mut NodeData> {
        let slot = self.slots.get_mut(id.index as usize)?;
        if slot.generation != id.generation {
            return None;
        }
        slot.data.as_mut()
    }

    fn release(&mut self, id: NodeId) {
        if let Some(slot) = self.slots.get_mut(id.index as usize)
            && slot.generation == id.generation
        {
            slot.data = None;
            slot.generation = slot.generation.wrapping_add(1);
            self.free.push(id.index);
        }
    }

    /// Whether a node exists and is alive
    pub fn is_alive(&self, id: NodeId) -> bool {
        self.get(id).map(|data| data.alive).unwrap_or(false)
    }

    // ---- structure -----------------------------------------------------

    /// Create a detached, not-yet-alive node. Insert it under a parent and
    /// mark it alive to bring it into the tree.
    pub fn create_node(&mut self) -> NodeId {
        self.allocate()
    }

    /// Insert `child` under `parent` at `index`.
    ///
    /// Panics on structural-invariant violations: unknown parent or child,
    /// an already-parented child, or an out-of-range index. These are
    /// programming errors, not recoverable conditions.
    pub fn insert_child(&mut self, parent: NodeId, index: usize, child: NodeId) {
        assert!(self.get(parent).is_some(), "insert under unknown parent {parent:?}");
        let child_data = self
            .get(child)
            .unwrap_or_else(|| panic!("inserting unknown node {child:?}"));
        assert!(
            child_data.parent.is_none(),
            "inserting already-parented node {child:?}"
        );
        let parent_data = self.get_mut(parent).expect("parent checked above");
        assert!(
            index <= parent_data.children.len(),
            "child index {index} out of range for {parent:?}"
        );
        parent_data.children.insert(index, child);
        self.get_mut(child).expect("child checked above").parent = Some(parent);

        let count = Value::Integer(self.get(parent).expect("parent").children.len() as i64);
        self.notify_identifier(parent, "children", &count, ChangeOrigin::External);
        self.notify_identifier(child, "parent", &Value::Node(parent), ChangeOrigin::External);
    }

    /// Mark a node alive; schedules (does not run) its first rule evaluation
    pub fn mark_alive(&mut self, id: NodeId) {
        let Some(data) = self.get_mut(id) else {
            log::warn!("mark_alive on unknown node {id:?}");
            return;
        };
        if data.alive {
            return;
        }
        data.alive = true;
        self.request_evaluation(id);
    }

    /// Structurally remove a node: descendants are removed (not merely
    /// deactivated) first, every subscription referencing them is torn down,
    /// and death is raised to the application child-before-parent.
    pub fn remove_node(&mut self, id: NodeId) {
        assert_ne!(id, self.root, "cannot remove the root node");
        let Some(data) = self.get(id) else {
            log::warn!("remove_node on unknown node {id:?}");
            return;
        };
        if let Some(parent) = data.parent {
            let parent_data = self.get_mut(parent).expect("parented node has live parent");
            parent_data.children.retain(|c| *c != id);
            self.get_mut(id).expect("checked above").parent = None;
            let count = Value::Integer(self.get(parent).expect("parent").children.len() as i64);
            self.notify_identifier(parent, "children", &count, ChangeOrigin::External);
        }
        self.kill_recursive(id);
    }

    fn kill_recursive(&mut self, id: NodeId) {
        let Some(data) = self.get(id) else {
            return;
        };
        let children: Vec<NodeId> = data.children.iter().copied().collect();
        for child in children {
            self.kill_recursive(child);
        }

        let data = self.get_mut(id).expect("node still present");
        data.alive = false;
        let providers: Vec<Rc<dyn Provider>> = data.providers.to_vec();
        let rule_subs: Vec<SubscriptionId> = data.rule_subscriptions.values().copied().collect();
        let relationship_keys = std::mem::take(&mut data.relationship_keys);
        let poll_tokens = std::mem::take(&mut data.poll_tokens);

        for provider in &providers {
            provider.notify_node_removed(id);
        }
        for key in relationship_keys {
            relationship::dispose(self, &DependencyEdge { node: id, expr: key });
        }
        for sub in rule_subs {
            self.unsubscribe(sub);
        }
        for token in poll_tokens {
            token.cancel();
        }
        self.purge_node_edges(id);
        self.release(id);
        self.application().node_died(self, id);
    }

    /// Drop every registry entry keyed by a dead node so no subscription
    /// referencing it survives. Owners' stale ids become no-ops.
    fn purge_node_edges(&mut self, id: NodeId) {
        let dead: Vec<DependencyEdge> = self
            .registry
            .entries
            .keys()
            .filter(|edge| edge.node == id)
            .cloned()
            .collect();
        for edge in dead {
            if let Some(entry) = self.registry.entries.remove(&edge) {
                for (sub, reaction) in entry.subscribers {
                    self.registry.records.remove(&sub);
                    if let Some(handler) = self.handler_for_sub.remove(&sub) {
                        self.handlers.remove(&handler);
                    }
                    if self.config.trace_subscriptions {
                        log::trace!("purged {sub:?} ({reaction:?}) for dead {id:?}");
                    }
                }
            }
        }
    }

    /// Parent of a node
    pub fn parent(&self, id: NodeId) -> Option<NodeId> {
        self.get(id).and_then(|data| data.parent)
    }

    /// Children of a node, in order
    pub fn children(&self, id: NodeId) -> Vec<NodeId> {
        self.get(id)
            .map(|data| data.children.iter().copied().collect())
            .unwrap_or_default()
    }

    /// Position of a node in its parent's child list
    pub fn index_in_parent(&self, id: NodeId) -> Option<usize> {
        let parent = self.parent(id)?;
        self.get(parent)?.children.iter().position(|c| *c == id)
    }

    /// Attach a provider; queues a re-evaluation since new data may change
    /// rule outcomes. The provider's declared tracked-property set is
    /// snapshotted here and gates [`Tree::tracked_property_changed`].
    pub fn attach_provider(&mut self, id: NodeId, provider: Rc<dyn Provider>) {
        let Some(data) = self.get_mut(id) else {
            log::warn!("attach_provider on unknown node {id:?}");
            return;
        };
        if let Some(names) = provider.tracked_properties() {
            data.tracked_names
                .get_or_insert_with(Default::default)
                .extend(names);
        }
        data.providers.push(provider);
        if data.alive {
            self.request_evaluation(id);
        }
    }

    // ---- declarations & overrides --------------------------------------

    /// Active declaration, else assigned override, else Undefined.
    ///
    /// A pure read: records no dependency and never triggers evaluation.
    pub fn get_declaration(&self, id: NodeId, name: &str) -> Value {
        self.get(id)
            .map(|data| data.declared_value(name))
            .unwrap_or(Value::Undefined)
    }

    /// Declarations currently active on a node, in decision order
    pub fn declaration_entries(&self, id: NodeId) -> Vec<(String, Value)> {
        self.get(id)
            .map(|data| {
                data.declarations
                    .iter()
                    .map(|(name, declaration)| (name.to_string(), declaration.value.clone()))
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Set or clear (with Undefined) an out-of-band override.
    ///
    /// Notifies only when the stored override actually changes under
    /// `value_equals`.
    pub fn assign(&mut self, id: NodeId, name: &str, value: Value) {
        let Some(data) = self.get_mut(id) else {
            log::warn!("assign on unknown node {id:?}");
            return;
        };
        let old = data.overrides.get(name).cloned().unwrap_or(Value::Undefined);
        if old.value_equals(&value) {
            return;
        }
        if value.is_undefined() {
            data.overrides.shift_remove(name);
        } else {
            data.overrides.insert(Rc::from(name), value.clone());
        }
        self.notify_identifier(id, name, &value, ChangeOrigin::External);
    }

    pub(crate) fn set_declarations(
        &mut self,
        id: NodeId,
        declarations: indexmap::IndexMap<Rc<str>, Declaration>,
    ) {
        if let Some(data) = self.get_mut(id) {
            data.declarations = declarations;
        }
    }

    // ---- tracked properties --------------------------------------------

    /// Entry point for backends pushing a batched tracked-property change.
    ///
    /// Must be called on the tree's logical thread. The value is cached and
    /// served from the provider tier; a `value_equals`-change notifies. Once
    /// any attached provider declares a tracked set, pushes for names
    /// outside the union of declared sets are dropped with a warning.
    pub fn tracked_property_changed(&mut self, id: NodeId, name: &str, value: Value) {
        if !self.is_alive(id) {
            log::warn!("tracked change '{name}' for dead or unknown node {id:?}");
            return;
        }
        let data = self.get_mut(id).expect("alive node");
        if let Some(names) = &data.tracked_names
            && !names.contains(name)
        {
            log::warn!("tracked change '{name}' on {id:?} matches no provider's tracked set");
            return;
        }
        let old = data.tracked.get(name).cloned().unwrap_or(Value::Undefined);
        if old.value_equals(&value) {
            return;
        }
        data.tracked.insert(Rc::from(name), value.clone());
        let providers: Vec<Rc<dyn Provider>> = data.providers.to_vec();
        for provider in providers {
            provider.tracked_property_changed(id, name, &value);
        }
        self.notify_identifier(id, name, &value, ChangeOrigin::External);
    }

    // ---- identifier resolution -----------------------------------------

    /// Resolve an identifier on a node through the six-tier chain:
    /// providers (primary), built-ins, application hook, declarations,
    /// overrides, providers (late). Every tier except the built-in one
    /// records a dependency edge on the requested identifier.
    pub fn evaluate_identifier(
        &mut self,
        id: NodeId,
        name: &str,
        deps: &mut DependencyList,
    ) -> Value {
        let Some(data) = self.get(id) else {
            return Value::Undefined;
        };
        if self.config.trace_evaluation {
            log::trace!("resolve '{name}' on {id:?}");
        }

        // Tier 1: provider primary hook; tracked values are provider data.
        if let Some(value) = data.tracked.get(name).cloned() {
            deps.record_identifier(id, name);
            return value;
        }
        let providers: Vec<Rc<dyn Provider>> = data.providers.to_vec();
        for provider in &providers {
            match provider.evaluate_identifier(id, name, deps) {
                Ok(Value::Undefined) => {}
                Ok(value) => {
                    deps.record_identifier(id, name);
                    return value;
                }
                Err(err) => self.report_error(&err),
            }
        }

        // Tier 2: built-in structural identifiers; no dependency edge.
        if let Some(value) = self.builtin_identifier(id, name) {
            return value;
        }

        // Tier 3: application hook.
        if let Some(value) = self
            .application()
            .evaluate_identifier_hook(self, id, name, deps)
        {
            deps.record_identifier(id, name);
            return value;
        }

        // Tiers 4 & 5: declarations, then overrides.
        if let Some(data) = self.get(id) {
            if let Some(declaration) = data.declarations.get(name) {
                deps.record_identifier(id, name);
                return declaration.value.clone();
            }
            if let Some(value) = data.overrides.get(name) {
                deps.record_identifier(id, name);
                return value.clone();
            }
        }

        // Tier 6: provider late hook.
        for provider in &providers {
            match provider.evaluate_identifier_late(id, name, deps) {
                Ok(Value::Undefined) => {}
                Ok(value) => {
                    deps.record_identifier(id, name);
                    return value;
                }
                Err(err) => self.report_error(&err),
            }
        }

        deps.record_identifier(id, name);
        Value::Undefined
    }

    fn builtin_identifier(&mut self, id: NodeId, name: &str) -> Option<Value> {
        match name {
            "parent" => Some(
                self.parent(id)
                    .map(Value::Node)
                    .unwrap_or(Value::Undefined),
            ),
            // "children" is the pseudo-property structural mutations notify;
            // it must evaluate to the same value the notification carries.
            "child_count" | "children" => Some(Value::Integer(
                self.get(id).map(|d| d.children.len()).unwrap_or(0) as i64,
            )),
            "index_in_parent" => Some(
                self.index_in_parent(id)
                    .map(|index| Value::Integer(index as i64))
                    .unwrap_or(Value::Undefined),
            ),
            "child_at" => Some(Value::Method(
                self.builtins.child_at.bind(Value::Node(id)),
            )),
            "assign" => Some(Value::Method(self.builtins.assign.bind(Value::Node(id)))),
            _ => {
                let kind = RelationshipKind::from_name(name)?;
                Some(Value::Method(
                    self.builtins.relationship(kind).bind(Value::Node(id)),
                ))
            }
        }
    }

    /// One-shot expression evaluation with a node as context; recorded
    /// dependencies are discarded, so the result is a snapshot with no
    /// liveness. Consumers wanting updates use an
    /// [`ExpressionWatcher`](crate::watch::ExpressionWatcher).
    pub fn evaluate_expression(&mut self, expr: &Expression, context: NodeId) -> Value {
        let scope = crate::eval::Scope::node(context, self.root);
        let mut deps = DependencyList::new();
        crate::eval::evaluate(self, expr, &scope, &mut deps)
    }

    // ---- subscriptions & notification ----------------------------------

    /// Subscribe an external handler to changes of `(node, expr)`.
    ///
    /// Reference-counted per edge: the first subscriber invokes the node's
    /// watch hooks (providers first, then relationship-watcher construction
    /// for recognized apply expressions); the last release invokes the
    /// inverse.
    pub fn watch(
        &mut self,
        node: NodeId,
        expr: Expression,
        handler: impl FnMut(&mut Tree, &PropertyChange) + 'static,
    ) -> SubscriptionId {
        let handler_id = HandlerId(self.next_handler);
        self.next_handler += 1;
        self.handlers
            .insert(handler_id, Rc::new(RefCell::new(handler)));
        let edge = DependencyEdge {
            node,
            expr: Rc::new(expr),
        };
        let sub = self.subscribe(edge, Reaction::Handler(handler_id));
        self.handler_for_sub.insert(sub, handler_id);
        sub
    }

    pub(crate) fn subscribe(&mut self, edge: DependencyEdge, reaction: Reaction) -> SubscriptionId {
        let id = self.registry.next_id();
        self.registry.records.insert(id, edge.clone());
        let entry = self.registry.entries.entry(edge.clone()).or_default();
        entry.subscribers.push((id, reaction));
        let first = entry.subscribers.len() == 1;
        if self.config.trace_subscriptions {
            log::trace!("subscribe {id:?} to {:?}/{}", edge.node, edge.expr);
        }
        if first {
            self.on_first_subscriber(&edge);
        }
        id
    }

    /// Release a subscription. Idempotent: releasing twice, or after the
    /// subscribed node died, is a no-op.
    pub fn unsubscribe(&mut self, id: SubscriptionId) {
        let Some(edge) = self.registry.records.remove(&id) else {
            return;
        };
        if let Some(handler) = self.handler_for_sub.remove(&id) {
            self.handlers.remove(&handler);
        }
        let now_empty = match self.registry.entries.get_mut(&edge) {
            Some(entry) => {
                entry.subscribers.retain(|(sub, _)| *sub != id);
                entry.subscribers.is_empty()
            }
            None => false,
        };
        if self.config.trace_subscriptions {
            log::trace!("unsubscribe {id:?} from {:?}/{}", edge.node, edge.expr);
        }
        if now_empty {
            self.registry.entries.remove(&edge);
            self.on_last_subscriber(&edge);
        }
    }

    fn on_first_subscriber(&mut self, edge: &DependencyEdge) {
        let Some(data) = self.get(edge.node) else {
            return;
        };
        let providers: Vec<Rc<dyn Provider>> = data.providers.to_vec();
        for provider in providers {
            if provider.watch_property(edge.node, &edge.expr) {
                return;
            }
        }
        if relationship::recognize(&edge.expr).is_some() {
            relationship::ensure_watcher(self, edge);
        }
    }

    fn on_last_subscriber(&mut self, edge: &DependencyEdge) {
        if let Some(data) = self.get(edge.node) {
            let providers: Vec<Rc<dyn Provider>> = data.providers.to_vec();
            for provider in providers {
                if provider.unwatch_property(edge.node, &edge.expr) {
                    return;
                }
            }
        }
        if self.relationships.contains_key(edge) {
            relationship::dispose(self, edge);
            if let Some(data) = self.get_mut(edge.node) {
                data.relationship_keys.retain(|key| *key != edge.expr);
            }
        }
    }

    pub(crate) fn notify_identifier(
        &mut self,
        node: NodeId,
        name: &str,
        value: &Value,
        origin: ChangeOrigin,
    ) {
        let edge = DependencyEdge::identifier(node, name);
        self.notify_edge(&edge, value, origin);
    }

    /// Fan a change out to the edge's current subscribers. Handler
    /// subscribers run on this stack; recomputation subscribers are queued,
    /// so every notification lands before any triggered recomputation runs.
    pub(crate) fn notify_edge(&mut self, edge: &DependencyEdge, value: &Value, origin: ChangeOrigin) {
        let Some(entry) = self.registry.entries.get(edge) else {
            return;
        };
        let subscribers: Vec<(SubscriptionId, Reaction)> = entry.subscribers.clone();
        for (_, reaction) in subscribers {
            match reaction {
                Reaction::EvaluateRules(target) => {
                    if origin == ChangeOrigin::External
                        && let Some(data) = self.get_mut(target)
                    {
                        data.flags.convergence_count = 0;
                        data.flags.parked = false;
                    }
                    self.request_evaluation(target);
                }
                Reaction::RecomputeRelationship(node, expr) => {
                    let key = DependencyEdge { node, expr };
                    if let Some(state) = self.relationships.get_mut(&key) {
                        if origin == ChangeOrigin::External {
                            state.pending_external = true;
                        }
                        if !state.queued {
                            state.queued = true;
                            self.queue.push_back(Task::RecomputeRelationship(key));
                        }
                    }
                }
                Reaction::RecomputeWatcher(id) => {
                    if let Some(state) = self.watchers.get_mut(&id)
                        && !state.queued
                    {
                        state.queued = true;
                        self.queue.push_back(Task::RecomputeWatcher(id));
                    }
                }
                Reaction::Handler(handler_id) => {
                    if let Some(handler) = self.handlers.get(&handler_id).cloned() {
                        let change = PropertyChange {
                            node: edge.node,
                            expr: edge.expr.clone(),
                            value: value.clone(),
                        };
                        (handler.borrow_mut())(self, &change);
                    }
                }
            }
        }
    }

    // ---- scheduling ----------------------------------------------------

    pub(crate) fn request_evaluation(&mut self, id: NodeId) {
        let Some(data) = self.get_mut(id) else {
            return;
        };
        if !data.alive || data.flags.parked {
            return;
        }
        if data.flags.evaluating {
            data.flags.rerun = true;
            return;
        }
        if data.flags.queued {
            return;
        }
        data.flags.queued = true;
        self.queue.push_back(Task::EvaluateRules(id));
    }

    /// Drain the deferred queue FIFO until empty.
    ///
    /// Reentrant calls (from inside a notification handler) return
    /// immediately; the outer drain finishes the work.
    pub fn run_until_idle(&mut self) {
        if self.draining {
            return;
        }
        self.draining = true;
        while let Some(task) = self.queue.pop_front() {
            match task {
                Task::EvaluateRules(id) => rules::evaluate_node(self, id),
                Task::RecomputeRelationship(key) => relationship::recompute(self, &key),
                Task::RecomputeWatcher(id) => crate::watch::recompute(self, id),
            }
        }
        self.draining = false;
    }

    /// Whether deferred work is outstanding
    pub fn is_idle(&self) -> bool {
        self.queue.is_empty()
    }

    // ---- provider async capabilities -----------------------------------

    /// Resolve a clickable point through the node's providers, in order.
    ///
    /// The returned future does not borrow the tree; completions must be
    /// marshalled back onto the tree's logical thread before touching node
    /// state.
    pub fn clickable_point(
        &self,
        id: NodeId,
    ) -> impl std::future::Future<Output = Option<(f64, f64)>> + 'static {
        let providers: Vec<Rc<dyn Provider>> = self
            .get(id)
            .map(|data| data.providers.to_vec())
            .unwrap_or_default();
        async move {
            for provider in providers {
                match provider.get_clickable_point(id).await {
                    Ok(Some(point)) => return Some(point),
                    Ok(None) => {}
                    Err(err) => log::debug!("clickable-point lookup failed on {id:?}: {err}"),
                }
            }
            None
        }
    }

    /// Register a poll loop's cancellation token with its owning node so
    /// node death cancels the loop.
    pub fn register_poll(&mut self, id: NodeId, token: Rc<PollToken>) {
        if let Some(data) = self.get_mut(id) {
            data.poll_tokens.push(token);
        } else {
            token.cancel();
        }
    }

    // ---- errors --------------------------------------------------------

    /// Route an error: recoverable failures are logged and swallowed (the
    /// property stays unknown); unexpected failures go to the error sink.
    pub(crate) fn report_error(&self, err: &AxError) {
        if err.is_recoverable() {
            log::debug!("recoverable evaluation failure: {err}");
        } else {
            (self.error_sink)(err);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::NullApplication;

    fn empty_tree() -> Tree {
        Tree::new(
            EngineConfig::default(),
            Rc::new(Root::new(vec![])),
            Rc::new(NullApplication),
        )
    }

    #[test]
    fn generational_ids_invalidate_on_death() {
        let mut tree = empty_tree();
        let root = tree.root();
        let child = tree.create_node();
        tree.insert_child(root, 0, child);
        tree.mark_alive(child);
        tree.run_until_idle();
        assert!(tree.is_alive(child));

        tree.remove_node(child);
        assert!(!tree.is_alive(child));
        assert_eq!(tree.get_declaration(child, "anything"), Value::Undefined);

        // Slot reuse must not resurrect the old id.
        let replacement = tree.create_node();
        assert_ne!(replacement, child);
    }

    #[test]
    #[should_panic(expected = "already-parented")]
    fn double_insert_panics() {
        let mut tree = empty_tree();
        let root = tree.root();
        let child = tree.create_node();
        tree.insert_child(root, 0, child);
        tree.insert_child(root, 1, child);
    }

    #[test]
    #[should_panic(expected = "out of range")]
    fn bad_index_panics() {
        let mut tree = empty_tree();
        let root = tree.root();
        let child = tree.create_node();
        tree.insert_child(root, 3, child);
    }

    #[test]
    fn assign_notifies_only_on_effective_change() {
        let mut tree = empty_tree();
        let root = tree.root();
        let fired = Rc::new(std::cell::Cell::new(0));
        let fired_inner = fired.clone();
        tree.watch(root, Expression::identifier("marker"), move |_, _| {
            fired_inner.set(fired_inner.get() + 1);
        });

        tree.assign(root, "marker", Value::Integer(5));
        assert_eq!(fired.get(), 1);
        // Equals-equal reassignment fires nothing.
        tree.assign(root, "marker", Value::Double(5.0));
        assert_eq!(fired.get(), 1);
        tree.assign(root, "marker", Value::Integer(6));
        assert_eq!(fired.get(), 2);
        // Undefined clears.
        tree.assign(root, "marker", Value::Undefined);
        assert_eq!(fired.get(), 3);
        assert_eq!(tree.get_declaration(root, "marker"), Value::Undefined);
    }

    #[test]
    fn children_evaluates_to_the_notified_count() {
        let mut tree = empty_tree();
        let root = tree.root();
        let seen: Rc<RefCell<Vec<Value>>> = Rc::new(RefCell::new(Vec::new()));
        let sink = seen.clone();
        tree.watch(root, Expression::identifier("children"), move |_, change| {
            sink.borrow_mut().push(change.value.clone());
        });

        let child = tree.create_node();
        tree.insert_child(root, 0, child);
        tree.mark_alive(child);
        tree.run_until_idle();

        assert_eq!(seen.borrow().as_slice(), [Value::Integer(1)]);
        // The built-in resolves to the same value the notification carried.
        assert_eq!(
            tree.evaluate_expression(&Expression::identifier("children"), root),
            Value::Integer(1)
        );
        assert_eq!(
            tree.evaluate_expression(&Expression::identifier("child_count"), root),
            Value::Integer(1)
        );
    }

    #[test]
    fn unsubscribe_is_idempotent() {
        let mut tree = empty_tree();
        let root = tree.root();
        let sub = tree.watch(root, Expression::identifier("x"), |_, _| {});
        tree.unsubscribe(sub);
        tree.unsubscribe(sub);
        assert_eq!(
            tree.registry
                .subscriber_count(&DependencyEdge::identifier(root, "x")),
            0
        );
    }
}
