//! Diagnostic dumps of tree state
//!
//! Renders nodes as JSON for logging and tooling: declarations, overrides,
//! provider-side dumps, the application's own view, and children,
//! recursively.

use serde_json::{Map, Value as Json, json};

use crate::tree::{NodeId, Tree};

/// Dump one node (and its subtree) as JSON
pub fn dump_node(tree: &Tree, id: NodeId) -> Json {
    let Some(data) = tree.get(id) else {
        return json!({ "id": format!("{id:?}"), "dead": true });
    };

    let mut declarations = Map::new();
    for (name, declaration) in &data.declarations {
        declarations.insert(
            name.to_string(),
            json!({
                "value": declaration.value.to_json(),
                "rule": declaration.rule_index,
            }),
        );
    }

    let mut overrides = Map::new();
    for (name, value) in &data.overrides {
        overrides.insert(name.to_string(), value.to_json());
    }

    let providers: Vec<Json> = data
        .providers
        .iter()
        .map(|provider| provider.dump_properties(id))
        .filter(|dump| !dump.is_null())
        .collect();

    let application = tree.application().dump_node_properties(id);

    let children: Vec<Json> = data
        .children
        .iter()
        .map(|child| dump_node(tree, *child))
        .collect();

    let mut out = Map::new();
    out.insert("id".into(), Json::String(format!("{id:?}")));
    out.insert("alive".into(), Json::Bool(data.alive));
    if !declarations.is_empty() {
        out.insert("declarations".into(), Json::Object(declarations));
    }
    if !overrides.is_empty() {
        out.insert("overrides".into(), Json::Object(overrides));
    }
    if !providers.is_empty() {
        out.insert("providers".into(), Json::Array(providers));
    }
    if !application.is_null() {
        out.insert("application".into(), application);
    }
    if !children.is_empty() {
        out.insert("children".into(), Json::Array(children));
    }
    Json::Object(out)
}

/// Dump the whole tree from its root
pub fn dump_tree(tree: &Tree) -> Json {
    dump_node(tree, tree.root())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::rc::Rc;

    use crate::ast::Expression;
    use crate::config::EngineConfig;
    use crate::provider::NullApplication;
    use crate::tree::Tree;
    use crate::tree::root::{Root, Rule};
    use crate::value::Value;

    #[test]
    fn dump_renders_declarations_overrides_and_children() {
        let mut tree = Tree::new(
            EngineConfig::default(),
            Rc::new(Root::new(vec![Rule::unconditional(vec![(
                "focusable",
                Expression::boolean(true),
            )])])),
            Rc::new(NullApplication),
        );
        let root = tree.root();
        let child = tree.create_node();
        tree.insert_child(root, 0, child);
        tree.mark_alive(child);
        tree.assign(child, "marker", Value::Integer(5));
        tree.run_until_idle();

        let dump = dump_tree(&tree);
        assert_eq!(dump["alive"], json!(true));
        assert_eq!(dump["declarations"]["focusable"]["value"], json!(true));
        assert_eq!(dump["declarations"]["focusable"]["rule"], json!(0));
        let children = dump["children"].as_array().unwrap();
        assert_eq!(children.len(), 1);
        assert_eq!(children[0]["overrides"]["marker"], json!(5));

        // A dead id renders a tombstone instead of node state.
        tree.remove_node(child);
        assert_eq!(dump_node(&tree, child)["dead"], json!(true));
    }
}
