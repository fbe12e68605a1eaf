//! Relationship queries: ordering, live recomputation on structural change,
//! watch refcounting, and the death cascade.

use std::cell::RefCell;
use std::rc::Rc;

use pretty_assertions::assert_eq;

use axtree::{
    Application, BinaryOperator, EngineConfig, Expression, NodeId, NullApplication, Root,
    StaticProvider, Tree, Value,
};

fn empty_tree() -> Tree {
    let _ = env_logger::builder().is_test(true).try_init();
    Tree::new(
        EngineConfig::default(),
        Rc::new(Root::new(vec![])),
        Rc::new(NullApplication),
    )
}

fn role_is(role: &str) -> Expression {
    Expression::binary(
        BinaryOperator::Equal,
        Expression::identifier("role"),
        Expression::string(role),
    )
}

fn query(name: &str, predicate: Expression) -> Expression {
    Expression::apply(Expression::identifier(name), vec![predicate])
}

/// Root with three children whose roles come from a shared provider.
fn family(roles: [&str; 3]) -> (Tree, Rc<StaticProvider>, [NodeId; 3]) {
    let mut tree = empty_tree();
    let root = tree.root();
    let provider = StaticProvider::new();
    let mut children = [root; 3];
    for (i, role) in roles.iter().enumerate() {
        let child = tree.create_node();
        tree.attach_provider(child, provider.clone());
        provider.set(child, "role", Value::string(*role));
        tree.insert_child(root, i, child);
        tree.mark_alive(child);
        children[i] = child;
    }
    tree.run_until_idle();
    (tree, provider, children)
}

#[test]
fn child_matches_picks_the_first_in_order() {
    let (mut tree, _, [_, c2, c3]) = family(["label", "button", "button"]);
    let root = tree.root();

    let expr = query("child_matches", role_is("button"));
    assert_eq!(tree.evaluate_expression(&expr, root), Value::Node(c2));

    let last = query("last_child_matches", role_is("button"));
    assert_eq!(tree.evaluate_expression(&last, root), Value::Node(c3));

    let none = query("child_matches", role_is("slider"));
    assert_eq!(tree.evaluate_expression(&none, root), Value::Undefined);
}

#[test]
fn inserting_an_earlier_match_retargets_the_query() {
    let (mut tree, provider, [_, c2, _]) = family(["label", "button", "button"]);
    let root = tree.root();
    let expr = query("child_matches", role_is("button"));

    let seen: Rc<RefCell<Vec<Value>>> = Rc::new(RefCell::new(Vec::new()));
    let sink = seen.clone();
    tree.watch(root, expr.clone(), move |_, change| {
        sink.borrow_mut().push(change.value.clone());
    });
    assert_eq!(tree.evaluate_expression(&expr, root), Value::Node(c2));

    // A matching child inserted before c2 becomes the new first match.
    let c4 = tree.create_node();
    tree.attach_provider(c4, provider.clone());
    provider.set(c4, "role", Value::string("button"));
    tree.insert_child(root, 1, c4);
    tree.mark_alive(c4);
    tree.run_until_idle();

    assert_eq!(seen.borrow().as_slice(), [Value::Node(c4)]);
    assert_eq!(tree.evaluate_expression(&expr, root), Value::Node(c4));
}

#[test]
fn predicate_changes_retarget_the_query() {
    let (mut tree, _, [c1, c2, _]) = family(["label", "button", "text"]);
    let root = tree.root();
    let expr = query("child_matches", role_is("label"));

    let seen: Rc<RefCell<Vec<Value>>> = Rc::new(RefCell::new(Vec::new()));
    let sink = seen.clone();
    tree.watch(root, expr.clone(), move |_, change| {
        sink.borrow_mut().push(change.value.clone());
    });
    assert_eq!(tree.evaluate_expression(&expr, root), Value::Node(c1));

    // The provider pushes a role change on the matching child.
    tree.tracked_property_changed(c1, "role", Value::string("text"));
    tree.tracked_property_changed(c2, "role", Value::string("label"));
    tree.run_until_idle();

    assert_eq!(seen.borrow().last(), Some(&Value::Node(c2)));
    assert_eq!(tree.evaluate_expression(&expr, root), Value::Node(c2));
}

#[test]
fn ancestor_and_descendant_queries() {
    let mut tree = empty_tree();
    let root = tree.root();
    let provider = StaticProvider::new();

    let dialog = tree.create_node();
    tree.attach_provider(dialog, provider.clone());
    provider.set(dialog, "role", Value::string("dialog"));
    tree.insert_child(root, 0, dialog);
    tree.mark_alive(dialog);

    let inner = tree.create_node();
    tree.attach_provider(inner, provider.clone());
    provider.set(inner, "role", Value::string("button"));
    tree.insert_child(dialog, 0, inner);
    tree.mark_alive(inner);
    tree.run_until_idle();

    let up = query("this_or_ancestor_matches", role_is("dialog"));
    assert_eq!(tree.evaluate_expression(&up, inner), Value::Node(dialog));
    assert_eq!(tree.evaluate_expression(&up, dialog), Value::Node(dialog));
    assert_eq!(tree.evaluate_expression(&up, root), Value::Undefined);

    let down = query("this_or_descendant_matches", role_is("button"));
    assert_eq!(tree.evaluate_expression(&down, root), Value::Node(inner));

    let up_via_dot = Expression::dot(
        Expression::identifier("parent"),
        query("parent_matches", role_is("dialog")),
    );
    // inner.parent is the dialog; its parent is the root, which has no role.
    assert_eq!(tree.evaluate_expression(&up_via_dot, inner), Value::Undefined);
}

#[test]
fn sibling_queries_scan_outward_from_the_node() {
    let (mut tree, _, [c1, c2, c3]) = family(["button", "label", "button"]);

    let next = query("next_sibling_matches", role_is("button"));
    assert_eq!(tree.evaluate_expression(&next, c1), Value::Node(c3));
    assert_eq!(tree.evaluate_expression(&next, c3), Value::Undefined);

    let previous = query("previous_sibling_matches", role_is("button"));
    assert_eq!(tree.evaluate_expression(&previous, c3), Value::Node(c1));
    assert_eq!(tree.evaluate_expression(&previous, c2), Value::Node(c1));
    assert_eq!(tree.evaluate_expression(&previous, c1), Value::Undefined);
}

#[test]
fn provider_watch_hooks_are_refcounted_per_edge() {
    let mut tree = empty_tree();
    let root = tree.root();
    let provider = StaticProvider::new();
    provider.set(root, "role", Value::string("pane"));
    tree.attach_provider(root, provider.clone());
    tree.run_until_idle();

    let first = tree.watch(root, Expression::identifier("role"), |_, _| {});
    assert_eq!(provider.watch_count(), 1);
    let second = tree.watch(root, Expression::identifier("role"), |_, _| {});
    assert_eq!(provider.watch_count(), 1);

    // The backend watch survives until the last subscriber releases.
    tree.unsubscribe(first);
    assert_eq!(provider.watch_count(), 1);
    tree.unsubscribe(second);
    assert_eq!(provider.watch_count(), 0);
}

struct DeathLog {
    died: RefCell<Vec<NodeId>>,
}

impl Application for DeathLog {
    fn node_died(&self, _tree: &mut Tree, node: NodeId) {
        self.died.borrow_mut().push(node);
    }
}

#[test]
fn removal_kills_descendants_first() {
    let log = Rc::new(DeathLog {
        died: RefCell::new(Vec::new()),
    });
    let mut tree = Tree::new(
        EngineConfig::default(),
        Rc::new(Root::new(vec![])),
        log.clone(),
    );
    let root = tree.root();
    let provider = StaticProvider::new();

    let parent = tree.create_node();
    tree.attach_provider(parent, provider.clone());
    tree.insert_child(root, 0, parent);
    tree.mark_alive(parent);
    let child = tree.create_node();
    tree.attach_provider(child, provider.clone());
    tree.insert_child(parent, 0, child);
    tree.mark_alive(child);
    tree.run_until_idle();

    let sub = tree.watch(child, Expression::identifier("role"), |_, _| {
        panic!("dead node must not fire notifications");
    });

    tree.remove_node(parent);
    tree.run_until_idle();

    // Child-before-parent, both to the application and to the provider.
    assert_eq!(log.died.borrow().as_slice(), [child, parent]);
    assert_eq!(provider.removed(), vec![child, parent]);
    assert!(!tree.is_alive(parent));
    assert!(!tree.is_alive(child));

    // The child's subscriptions were purged; a late release is a no-op.
    tree.tracked_property_changed(child, "role", Value::string("gone"));
    tree.unsubscribe(sub);
}
