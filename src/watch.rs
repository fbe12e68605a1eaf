//! Reusable dependency-aware value observers
//!
//! [`ExpressionWatcher`] keeps a fixed `(context, root, expression)` triple
//! evaluated, re-running on any recorded dependency change; consumers read
//! the current value synchronously and await the change signal. [`PollLoop`]
//! drives a refresh future on a cancellable timer for properties no backend
//! pushes.
//!
//! Both live on the tree's logical thread: the tree is shared as
//! `Rc<RefCell<Tree>>` and the futures must run on a current-thread
//! runtime (`tokio::task::LocalSet`).

use std::cell::{Cell, RefCell};
use std::rc::Rc;
use std::time::Duration;

use rustc_hash::FxHashMap;
use tokio::sync::Notify;
use tokio::sync::oneshot;

use crate::ast::Expression;
use crate::eval::{Scope, evaluate};
use crate::tree::registry::{DependencyEdge, DependencyList, Reaction, SubscriptionId};
use crate::tree::{NodeId, Tree};
use crate::value::Value;

/// Shared handle to a tree living on the current thread
pub type TreeHandle = Rc<RefCell<Tree>>;

/// Tree-side state of one expression watcher
pub(crate) struct ExprWatcherState {
    pub(crate) context: NodeId,
    pub(crate) expr: Rc<Expression>,
    pub(crate) value: Value,
    pub(crate) subscriptions: FxHashMap<DependencyEdge, SubscriptionId>,
    pub(crate) queued: bool,
    pub(crate) waiters: Vec<oneshot::Sender<()>>,
}

/// Dependency-aware observer of one expression.
///
/// The change signal is single-delivery: a waiter registered after a change
/// was delivered waits for the next change, never one already delivered.
/// Disposing the watcher wakes pending waiters.
pub struct ExpressionWatcher {
    id: u64,
    tree: TreeHandle,
}

impl ExpressionWatcher {
    /// Evaluate the expression against `context` and keep the result
    /// current until disposed
    pub fn new(tree: &TreeHandle, context: NodeId, expr: Expression) -> Self {
        let id = {
            let mut tree_ref = tree.borrow_mut();
            let id = tree_ref.next_watcher;
            tree_ref.next_watcher += 1;

            let expr = Rc::new(expr);
            let root = tree_ref.root();
            let scope = Scope::node(context, root);
            let mut deps = DependencyList::new();
            let value = evaluate(&mut tree_ref, &expr, &scope, &mut deps);

            let mut subscriptions = FxHashMap::default();
            for dep in deps.iter() {
                let sub = tree_ref.subscribe(dep.clone(), Reaction::RecomputeWatcher(id));
                subscriptions.insert(dep.clone(), sub);
            }
            tree_ref.watchers.insert(
                id,
                ExprWatcherState {
                    context,
                    expr,
                    value,
                    subscriptions,
                    queued: false,
                    waiters: Vec::new(),
                },
            );
            id
        };
        Self {
            id,
            tree: tree.clone(),
        }
    }

    /// Synchronous read of the current value
    pub fn current(&self) -> Value {
        self.tree
            .borrow()
            .watchers
            .get(&self.id)
            .map(|state| state.value.clone())
            .unwrap_or(Value::Undefined)
    }

    /// Await the next change delivered after this call. Resolves spuriously
    /// (with the value unchanged) only when the watcher is disposed.
    pub fn changed(&self) -> impl std::future::Future<Output = ()> {
        let (sender, receiver) = oneshot::channel();
        if let Some(state) = self.tree.borrow_mut().watchers.get_mut(&self.id) {
            state.waiters.push(sender);
        }
        // A dropped sender (disposal, or a watcher that never existed)
        // resolves the future too.
        async move {
            let _ = receiver.await;
        }
    }

    /// Stop watching and release every subscription. Idempotent; safe from
    /// inside a change callback.
    pub fn dispose(&self) {
        let mut tree = self.tree.borrow_mut();
        dispose_watcher(&mut tree, self.id);
    }
}

fn dispose_watcher(tree: &mut Tree, id: u64) {
    let Some(state) = tree.watchers.remove(&id) else {
        return;
    };
    for (_, sub) in state.subscriptions {
        tree.unsubscribe(sub);
    }
    // Dropping the senders wakes pending waiters.
}

/// Deferred recomputation of one expression watcher
pub(crate) fn recompute(tree: &mut Tree, id: u64) {
    let Some(state) = tree.watchers.get_mut(&id) else {
        return;
    };
    state.queued = false;
    let context = state.context;
    let expr = state.expr.clone();
    let old_value = state.value.clone();

    let root = tree.root();
    let scope = Scope::node(context, root);
    let mut deps = DependencyList::new();
    let value = evaluate(tree, &expr, &scope, &mut deps);

    let existing: Vec<DependencyEdge> = tree
        .watchers
        .get(&id)
        .map(|state| state.subscriptions.keys().cloned().collect())
        .unwrap_or_default();
    for dep in deps.iter() {
        if !existing.contains(dep) {
            let sub = tree.subscribe(dep.clone(), Reaction::RecomputeWatcher(id));
            if let Some(state) = tree.watchers.get_mut(&id) {
                state.subscriptions.insert(dep.clone(), sub);
            }
        }
    }
    let mut stale: Vec<SubscriptionId> = Vec::new();
    if let Some(state) = tree.watchers.get_mut(&id) {
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
        if let Some(state) = tree.watchers.get_mut(&id) {
            state.value = value;
            for waiter in state.waiters.drain(..) {
                let _ = waiter.send(());
            }
        }
    }
}

/// Cancellation token shared between a poll loop and its owning node
pub struct PollToken {
    cancelled: Cell<bool>,
    notify: Notify,
}

impl PollToken {
    fn new() -> Self {
        Self {
            cancelled: Cell::new(false),
            notify: Notify::new(),
        }
    }

    /// Request cancellation; idempotent and safe from inside the refresh
    pub fn cancel(&self) {
        self.cancelled.set(true);
        self.notify.notify_waiters();
    }

    /// Whether cancellation was requested
    pub fn is_cancelled(&self) -> bool {
        self.cancelled.get()
    }
}

/// Repeating refresh on a cancellable timer.
///
/// The refresh runs once immediately, then again after every interval.
/// Cancellation is race-free: a refresh already in flight when cancelled
/// completes, but no further delay or refresh is scheduled.
pub struct PollLoop {
    token: Rc<PollToken>,
}

impl PollLoop {
    /// Spawn the loop on the current `LocalSet`
    pub fn spawn<F, Fut>(interval: Duration, mut refresh: F) -> Self
    where
        F: FnMut() -> Fut + 'static,
        Fut: std::future::Future<Output = ()> + 'static,
    {
        let token = Rc::new(PollToken::new());
        let looper = token.clone();
        tokio::task::spawn_local(async move {
            loop {
                if looper.is_cancelled() {
                    break;
                }
                refresh().await;
                if looper.is_cancelled() {
                    break;
                }
                tokio::select! {
                    _ = tokio::time::sleep(interval) => {}
                    _ = looper.notify.notified() => {}
                }
            }
        });
        Self { token }
    }

    /// The loop's cancellation token, for registering with a node so node
    /// death cancels the loop
    pub fn token(&self) -> Rc<PollToken> {
        self.token.clone()
    }

    /// Cancel the loop. Idempotent.
    pub fn cancel(&self) {
        self.token.cancel();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::task::LocalSet;

    #[tokio::test(start_paused = true)]
    async fn poll_loop_runs_immediately_then_on_interval() {
        let local = LocalSet::new();
        local
            .run_until(async {
                let count = Rc::new(Cell::new(0u32));
                let counter = count.clone();
                let poll = PollLoop::spawn(Duration::from_secs(1), move || {
                    let counter = counter.clone();
                    async move {
                        counter.set(counter.get() + 1);
                    }
                });

                tokio::task::yield_now().await;
                assert_eq!(count.get(), 1);

                tokio::time::sleep(Duration::from_millis(2500)).await;
                assert_eq!(count.get(), 3);
                poll.cancel();
            })
            .await;
    }

    #[tokio::test(start_paused = true)]
    async fn cancelled_refresh_in_flight_schedules_nothing() {
        let local = LocalSet::new();
        local
            .run_until(async {
                let count = Rc::new(Cell::new(0u32));
                let counter = count.clone();
                let token_slot: Rc<RefCell<Option<Rc<PollToken>>>> =
                    Rc::new(RefCell::new(None));
                let slot = token_slot.clone();
                let poll = PollLoop::spawn(Duration::from_secs(1), move || {
                    let counter = counter.clone();
                    let slot = slot.clone();
                    async move {
                        counter.set(counter.get() + 1);
                        // Cancel from inside the refresh itself.
                        if let Some(token) = slot.borrow().as_ref() {
                            token.cancel();
                        }
                        tokio::time::sleep(Duration::from_millis(10)).await;
                    }
                });
                *token_slot.borrow_mut() = Some(poll.token());

                tokio::time::sleep(Duration::from_secs(5)).await;
                assert_eq!(count.get(), 1);
                // Repeated cancellation is a no-op.
                poll.cancel();
                poll.cancel();
            })
            .await;
    }
}
