//! Expression watchers and poll loops on a current-thread runtime.

use std::cell::{Cell, RefCell};
use std::rc::Rc;
use std::time::Duration;

use futures::FutureExt;
use pretty_assertions::assert_eq;
use tokio::task::LocalSet;

use axtree::{
    EngineConfig, Expression, ExpressionWatcher, NullApplication, PollLoop, Root, Rule,
    StaticProvider, Tree, TreeHandle, Value,
};

fn shared_tree(rules: Vec<Rule>) -> TreeHandle {
    Rc::new(RefCell::new(Tree::new(
        EngineConfig::default(),
        Rc::new(Root::new(rules)),
        Rc::new(NullApplication),
    )))
}

#[tokio::test]
async fn watcher_tracks_assigned_values() {
    let tree = shared_tree(vec![]);
    let root = tree.borrow().root();
    tree.borrow_mut().run_until_idle();

    let watcher = ExpressionWatcher::new(&tree, root, Expression::identifier("title"));
    assert_eq!(watcher.current(), Value::Undefined);

    let changed = watcher.changed();
    tree.borrow_mut().assign(root, "title", Value::string("Save"));
    tree.borrow_mut().run_until_idle();
    changed.await;
    assert_eq!(watcher.current(), Value::string("Save"));

    // Delivery is per change: a waiter registered afterwards stays pending.
    assert_eq!(watcher.changed().now_or_never(), None);
    watcher.dispose();
}

#[tokio::test]
async fn equal_reassignment_delivers_no_change() {
    let tree = shared_tree(vec![]);
    let root = tree.borrow().root();
    tree.borrow_mut().assign(root, "count", Value::Integer(7));
    tree.borrow_mut().run_until_idle();

    let watcher = ExpressionWatcher::new(&tree, root, Expression::identifier("count"));
    assert_eq!(watcher.current(), Value::Integer(7));

    let changed = watcher.changed();
    tree.borrow_mut().assign(root, "count", Value::Double(7.0));
    tree.borrow_mut().run_until_idle();
    assert_eq!(changed.now_or_never(), None);

    watcher.dispose();
}

#[tokio::test]
async fn watcher_follows_rule_outputs() {
    let tree = shared_tree(vec![Rule::selected(
        Expression::identifier("expanded"),
        vec![("state", Expression::string("open"))],
    )]);
    let root = tree.borrow().root();
    tree.borrow_mut().run_until_idle();

    let watcher = ExpressionWatcher::new(&tree, root, Expression::identifier("state"));
    assert_eq!(watcher.current(), Value::Undefined);

    let changed = watcher.changed();
    tree.borrow_mut().assign(root, "expanded", Value::Boolean(true));
    tree.borrow_mut().run_until_idle();
    changed.await;
    assert_eq!(watcher.current(), Value::string("open"));
    watcher.dispose();
}

#[tokio::test]
async fn dispose_wakes_pending_waiters() {
    let tree = shared_tree(vec![]);
    let root = tree.borrow().root();
    tree.borrow_mut().run_until_idle();

    let watcher = ExpressionWatcher::new(&tree, root, Expression::identifier("title"));
    let changed = watcher.changed();
    watcher.dispose();
    changed.await;
    assert_eq!(watcher.current(), Value::Undefined);
    // Disposing twice is a no-op.
    watcher.dispose();
}

#[tokio::test]
async fn watcher_subscription_reaches_the_provider() {
    let tree = shared_tree(vec![]);
    let root = tree.borrow().root();
    let provider = StaticProvider::new();
    provider.set(root, "role", Value::string("pane"));
    tree.borrow_mut().attach_provider(root, provider.clone());
    tree.borrow_mut().run_until_idle();

    let watcher = ExpressionWatcher::new(&tree, root, Expression::identifier("role"));
    assert_eq!(watcher.current(), Value::string("pane"));
    assert_eq!(provider.watch_count(), 1);

    watcher.dispose();
    assert_eq!(provider.watch_count(), 0);
}

#[tokio::test(start_paused = true)]
async fn node_death_cancels_registered_poll_loops() {
    let local = LocalSet::new();
    local
        .run_until(async {
            let tree = shared_tree(vec![]);
            let root = tree.borrow().root();
            let node = {
                let mut tree = tree.borrow_mut();
                let node = tree.create_node();
                tree.insert_child(root, 0, node);
                tree.mark_alive(node);
                tree.run_until_idle();
                node
            };

            let refreshed = Rc::new(Cell::new(0u32));
            let counter = refreshed.clone();
            let handle = tree.clone();
            let poll = PollLoop::spawn(Duration::from_secs(1), move || {
                let counter = counter.clone();
                let handle = handle.clone();
                async move {
                    counter.set(counter.get() + 1);
                    let mut tree = handle.borrow_mut();
                    tree.tracked_property_changed(node, "ticks", Value::Integer(counter.get() as i64));
                    tree.run_until_idle();
                }
            });
            tree.borrow_mut().register_poll(node, poll.token());

            tokio::time::sleep(Duration::from_millis(1500)).await;
            assert_eq!(refreshed.get(), 2);

            tree.borrow_mut().remove_node(node);
            tree.borrow_mut().run_until_idle();
            assert!(poll.token().is_cancelled());

            // No further refreshes run after death.
            tokio::time::sleep(Duration::from_secs(5)).await;
            assert_eq!(refreshed.get(), 2);
        })
        .await;
}
