//! Compiled rule list owned by the tree root
//!
//! The rule compiler is out of scope; it hands the core a pre-flattened,
//! globally ordered list of `(selector, declarations)` pairs. The list is
//! immutable for the lifetime of the tree.

use std::rc::Rc;

use crate::ast::Expression;

/// Declaration name given special meaning by the rule evaluator: a truthy
/// `stop` halts rule scanning after the declaring rule.
pub const STOP_DECLARATION: &str = "stop";

/// One rule: an optional selector gating a set of property declarations
#[derive(Debug, Clone)]
pub struct Rule {
    /// Selector expression; a rule without one matches every node
    pub selector: Option<Rc<Expression>>,
    /// Ordered `(property name, value expression)` declarations
    pub declarations: Vec<(Rc<str>, Rc<Expression>)>,
}

impl Rule {
    /// Rule with a selector
    pub fn selected(
        selector: Expression,
        declarations: Vec<(&str, Expression)>,
    ) -> Self {
        Self {
            selector: Some(Rc::new(selector)),
            declarations: convert(declarations),
        }
    }

    /// Unconditional rule
    pub fn unconditional(declarations: Vec<(&str, Expression)>) -> Self {
        Self {
            selector: None,
            declarations: convert(declarations),
        }
    }
}

fn convert(declarations: Vec<(&str, Expression)>) -> Vec<(Rc<str>, Rc<Expression>)> {
    declarations
        .into_iter()
        .map(|(name, expr)| (Rc::from(name), Rc::new(expr)))
        .collect()
}

/// The globally ordered rule list held by the root
#[derive(Debug, Clone, Default)]
pub struct Root {
    rules: Vec<Rule>,
}

impl Root {
    /// Wrap a compiled rule list
    pub fn new(rules: Vec<Rule>) -> Self {
        Self { rules }
    }

    /// The ordered rules
    pub fn rules(&self) -> &[Rule] {
        &self.rules
    }
}
