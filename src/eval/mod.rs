//! Expression evaluation with dependency recording
//!
//! Evaluation walks the externally supplied AST against a [`Scope`]. Every
//! context-sensitive identifier lookup records a dependency edge into the
//! caller's [`DependencyList`]; the rule evaluator and the watchers turn
//! those edges into live subscriptions. Failures are caught at the dispatch
//! point, logged, and become `Undefined` — a malformed rule or a provider
//! bug must not corrupt unrelated nodes.

pub mod relationship;
pub mod rules;

use crate::ast::{BinaryOperator, Expression, Literal, UnaryOperator};
use crate::error::{AxError, Result};
use crate::tree::registry::DependencyList;
use crate::tree::{NodeId, Tree};
use crate::value::{
    Routine, Value, checked_add, checked_mul, checked_neg, checked_sub, floor_div, floor_mod,
};

use relationship::RelationshipKind;

/// Evaluation scope: the context value identifiers resolve against, and the
/// root whose rule list governs the tree
#[derive(Debug, Clone)]
pub struct Scope {
    /// Current context value (usually a node)
    pub context: Value,
    /// The tree's root node
    pub root: NodeId,
}

impl Scope {
    /// Scope with a node as context
    pub fn node(context: NodeId, root: NodeId) -> Self {
        Self {
            context: Value::Node(context),
            root,
        }
    }

    /// Same root, different context
    pub fn with_context(&self, context: Value) -> Self {
        Self {
            context,
            root: self.root,
        }
    }
}

/// Evaluate an expression, catching recoverable failures as Undefined
pub fn evaluate(
    tree: &mut Tree,
    expr: &Expression,
    scope: &Scope,
    deps: &mut DependencyList,
) -> Value {
    match eval_expr(tree, expr, scope, deps) {
        Ok(value) => value,
        Err(err) => {
            tree.report_error(&err);
            Value::Undefined
        }
    }
}

fn eval_expr(
    tree: &mut Tree,
    expr: &Expression,
    scope: &Scope,
    deps: &mut DependencyList,
) -> Result<Value> {
    match expr {
        Expression::Literal(literal) => Ok(literal_value(literal)),
        Expression::Identifier(name) => {
            Ok(evaluate_identifier_on(tree, &scope.context.clone(), name, scope, deps))
        }
        Expression::Dot { base, member } => {
            let left = eval_expr(tree, base, scope, deps)?;
            eval_member(tree, &left, member, expr, scope, deps)
        }
        Expression::Apply(data) => {
            // A recognized relationship applied to the scope context keys a
            // watcher on the context node; the dependency edge is the apply
            // expression itself.
            if let Some((kind, predicate)) = relationship::recognize(expr)
                && let Value::Node(node) = scope.context
            {
                return relationship::evaluate_cached(tree, node, kind, predicate, expr, scope, deps);
            }
            let callable = eval_expr(tree, &data.callee, scope, deps)?;
            apply_value(tree, &callable, &data.args, scope, deps)
        }
        Expression::Unary { op, operand } => {
            let value = eval_expr(tree, operand, scope, deps)?;
            match op {
                UnaryOperator::Not => Ok(Value::Boolean(!value.to_bool())),
                UnaryOperator::Negate => match value {
                    Value::Integer(i) => Ok(Value::Integer(checked_neg(i)?)),
                    Value::Double(d) => Ok(Value::Double(-d)),
                    _ => Ok(Value::Undefined),
                },
            }
        }
        Expression::Binary(data) => eval_binary(tree, data.op, &data.left, &data.right, scope, deps),
    }
}

fn literal_value(literal: &Literal) -> Value {
    match literal {
        Literal::Undefined => Value::Undefined,
        Literal::Boolean(b) => Value::Boolean(*b),
        Literal::Integer(i) => Value::Integer(*i),
        Literal::Double(d) => Value::Double(*d),
        Literal::String(s) => Value::String(s.clone()),
    }
}

fn eval_binary(
    tree: &mut Tree,
    op: BinaryOperator,
    left: &Expression,
    right: &Expression,
    scope: &Scope,
    deps: &mut DependencyList,
) -> Result<Value> {
    // and/or return the deciding operand's actual value, not a coerced
    // boolean, and short-circuit the other side.
    match op {
        BinaryOperator::And => {
            let l = eval_expr(tree, left, scope, deps)?;
            if !l.to_bool() {
                return Ok(l);
            }
            return eval_expr(tree, right, scope, deps);
        }
        BinaryOperator::Or => {
            let l = eval_expr(tree, left, scope, deps)?;
            if l.to_bool() {
                return Ok(l);
            }
            return eval_expr(tree, right, scope, deps);
        }
        _ => {}
    }

    let l = eval_expr(tree, left, scope, deps)?;
    let r = eval_expr(tree, right, scope, deps)?;
    match op {
        BinaryOperator::Equal => Ok(Value::Boolean(l.value_equals(&r))),
        BinaryOperator::NotEqual => Ok(Value::Boolean(!l.value_equals(&r))),
        BinaryOperator::LessThan => Ok(ordering_value(&l, &r, |o| o.is_lt())),
        BinaryOperator::LessOrEqual => Ok(ordering_value(&l, &r, |o| o.is_le())),
        BinaryOperator::GreaterThan => Ok(ordering_value(&l, &r, |o| o.is_gt())),
        BinaryOperator::GreaterOrEqual => Ok(ordering_value(&l, &r, |o| o.is_ge())),
        BinaryOperator::Add => arithmetic(l, r, checked_add, |a, b| a + b, Some(concat)),
        BinaryOperator::Subtract => arithmetic(l, r, checked_sub, |a, b| a - b, None),
        BinaryOperator::Multiply => arithmetic(l, r, checked_mul, |a, b| a * b, None),
        BinaryOperator::Divide => arithmetic(l, r, floor_div, |a, b| a / b, None),
        BinaryOperator::Modulo => {
            // Floor semantics for doubles too: the result takes the
            // divisor's sign.
            arithmetic(l, r, floor_mod, |a, b| a - b * (a / b).floor(), None)
        }
        BinaryOperator::And | BinaryOperator::Or => unreachable!("handled above"),
    }
}

fn ordering_value(
    l: &Value,
    r: &Value,
    test: impl Fn(std::cmp::Ordering) -> bool,
) -> Value {
    match l.compare(r) {
        Some(ordering) => Value::Boolean(test(ordering)),
        None => Value::Undefined,
    }
}

fn concat(l: &str, r: &str) -> Value {
    Value::string(format!("{l}{r}"))
}

fn arithmetic(
    l: Value,
    r: Value,
    int_op: impl Fn(i64, i64) -> Result<i64>,
    double_op: impl Fn(f64, f64) -> f64,
    string_op: Option<fn(&str, &str) -> Value>,
) -> Result<Value> {
    match (&l, &r) {
        (Value::Integer(a), Value::Integer(b)) => Ok(Value::Integer(int_op(*a, *b)?)),
        (Value::Double(a), Value::Double(b)) => Ok(Value::Double(double_op(*a, *b))),
        (Value::Integer(a), Value::Double(b)) => Ok(Value::Double(double_op(*a as f64, *b))),
        (Value::Double(a), Value::Integer(b)) => Ok(Value::Double(double_op(*a, *b as f64))),
        (Value::String(a), Value::String(b)) => match string_op {
            Some(op) => Ok(op(a, b)),
            None => Ok(Value::Undefined),
        },
        _ => Ok(Value::Undefined),
    }
}

/// Resolve an identifier against a context value.
///
/// Nodes dispatch through the six-tier resolution chain; enum values test
/// alias membership; strings expose their member methods; everything else is
/// terminal and yields Undefined.
pub fn evaluate_identifier_on(
    tree: &mut Tree,
    context: &Value,
    name: &str,
    _scope: &Scope,
    deps: &mut DependencyList,
) -> Value {
    match context {
        Value::Node(id) => tree.evaluate_identifier(*id, name, deps),
        Value::Enum(e) => Value::Boolean(e.matches(name)),
        Value::String(_) => string_member(tree, context, name),
        Value::Method(m) => {
            // Identifier lookup falls through to the receiver; a bound
            // method is otherwise opaque.
            let receiver = m.receiver().clone();
            evaluate_identifier_on(tree, &receiver, name, _scope, deps)
        }
        _ => Value::Undefined,
    }
}

fn string_member(tree: &Tree, context: &Value, name: &str) -> Value {
    match (context, name) {
        (Value::String(s), "length") => Value::Integer(s.chars().count() as i64),
        (_, "starts_with") => {
            Value::Method(tree.builtins.starts_with.bind(context.clone()))
        }
        (_, "ends_with") => Value::Method(tree.builtins.ends_with.bind(context.clone())),
        _ => Value::Undefined,
    }
}

fn eval_member(
    tree: &mut Tree,
    left: &Value,
    member: &Expression,
    full_expr: &Expression,
    scope: &Scope,
    deps: &mut DependencyList,
) -> Result<Value> {
    match member {
        Expression::Identifier(name) => {
            Ok(evaluate_identifier_on(tree, left, name, scope, deps))
        }
        Expression::Apply(data) => {
            // Relationship applied through a dot: key the watcher on the
            // subject node under the member expression.
            if let Some((kind, predicate)) = relationship::recognize(member)
                && let Value::Node(node) = left
            {
                return relationship::evaluate_cached(
                    tree, *node, kind, predicate, member, scope, deps,
                );
            }
            let callable = eval_member(tree, left, &data.callee, full_expr, scope, deps)?;
            apply_value(tree, &callable, &data.args, scope, deps)
        }
        _ => Err(AxError::type_error(format!(
            "member access requires an identifier or application, got {member}"
        ))),
    }
}

/// Apply a callable to raw argument expressions, evaluated against the
/// original scope on demand
fn apply_value(
    tree: &mut Tree,
    callable: &Value,
    args: &[Expression],
    scope: &Scope,
    deps: &mut DependencyList,
) -> Result<Value> {
    match callable {
        Value::Routine(routine) => routine.invoke(tree, scope, &Value::Undefined, args, deps),
        Value::Method(method) => method.clone().invoke(tree, scope, args, deps),
        Value::Undefined => Ok(Value::Undefined),
        other => Err(AxError::type_error(format!(
            "{} is not callable",
            other.type_name()
        ))),
    }
}

/// Evaluate one argument expression against the original scope
pub(crate) fn eval_argument(
    tree: &mut Tree,
    args: &[Expression],
    index: usize,
    name: &str,
    scope: &Scope,
    deps: &mut DependencyList,
) -> Result<Value> {
    let Some(arg) = args.get(index) else {
        return Err(AxError::ArityMismatch {
            name: name.to_string(),
            expected: index + 1,
            actual: args.len(),
        });
    };
    eval_expr(tree, arg, scope, deps)
}

/// Built-in routines shared by every node, created once per tree so the
/// methods they produce compare equal across evaluation passes.
pub(crate) struct Builtins {
    pub(crate) child_at: Routine,
    pub(crate) assign: Routine,
    pub(crate) starts_with: Routine,
    pub(crate) ends_with: Routine,
    relationships: Vec<(RelationshipKind, Routine)>,
}

impl Builtins {
    pub(crate) fn new() -> Self {
        let child_at = Routine::new("child_at", |tree, scope, receiver, args, deps| {
            let Value::Node(node) = receiver else {
                return Err(AxError::type_error("child_at requires a node receiver"));
            };
            let index = eval_argument(tree, args, 0, "child_at", scope, deps)?;
            let Value::Integer(index) = index else {
                return Ok(Value::Undefined);
            };
            if index < 0 {
                return Ok(Value::Undefined);
            }
            Ok(tree
                .children(*node)
                .get(index as usize)
                .copied()
                .map(Value::Node)
                .unwrap_or(Value::Undefined))
        });

        let assign = Routine::new("assign", |tree, scope, receiver, args, deps| {
            let Value::Node(node) = receiver else {
                return Err(AxError::type_error("assign requires a node receiver"));
            };
            let name = eval_argument(tree, args, 0, "assign", scope, deps)?;
            let Value::String(name) = name else {
                return Err(AxError::type_error("assign requires a string property name"));
            };
            let value = eval_argument(tree, args, 1, "assign", scope, deps)?;
            tree.assign(*node, &name, value);
            Ok(Value::Undefined)
        });

        let starts_with = Routine::new("starts_with", |tree, scope, receiver, args, deps| {
            let prefix = eval_argument(tree, args, 0, "starts_with", scope, deps)?;
            let Value::String(prefix) = prefix else {
                return Ok(Value::Undefined);
            };
            Ok(receiver
                .starts_with_invariant(&prefix)
                .map(Value::Boolean)
                .unwrap_or(Value::Undefined))
        });

        let ends_with = Routine::new("ends_with", |tree, scope, receiver, args, deps| {
            let suffix = eval_argument(tree, args, 0, "ends_with", scope, deps)?;
            let Value::String(suffix) = suffix else {
                return Ok(Value::Undefined);
            };
            Ok(receiver
                .ends_with_invariant(&suffix)
                .map(Value::Boolean)
                .unwrap_or(Value::Undefined))
        });

        let relationships = RelationshipKind::ALL
            .iter()
            .map(|kind| {
                let kind = *kind;
                let routine =
                    Routine::new(kind.identifier(), move |tree, scope, receiver, args, deps| {
                        let Value::Node(node) = receiver else {
                            return Err(AxError::type_error(
                                "relationship query requires a node receiver",
                            ));
                        };
                        let Some(predicate) = args.first() else {
                            return Err(AxError::ArityMismatch {
                                name: kind.identifier().to_string(),
                                expected: 1,
                                actual: 0,
                            });
                        };
                        relationship::compute(tree, *node, kind, predicate, scope.root, deps)
                    });
                (kind, routine)
            })
            .collect();

        Self {
            child_at,
            assign,
            starts_with,
            ends_with,
            relationships,
        }
    }

    pub(crate) fn relationship(&self, kind: RelationshipKind) -> &Routine {
        &self
            .relationships
            .iter()
            .find(|(k, _)| *k == kind)
            .expect("every relationship kind has a routine")
            .1
    }
}
