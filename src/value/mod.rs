//! Core value types for rule evaluation
//!
//! [`Value`] is the polymorphic evaluation primitive: every identifier
//! lookup, declaration, override, and relationship result is one of these
//! variants. Values are immutable and structurally compared;
//! [`Value::value_equals`] is the single change-detection predicate used
//! throughout the crate.

mod numeric;

pub use numeric::{
    checked_add, checked_mul, checked_neg, checked_sub, compare_int_double, floor_div, floor_mod,
    int_double_equal,
};

use std::cmp::Ordering;
use std::fmt;
use std::rc::Rc;

use crate::ast::Expression;
use crate::error::Result;
use crate::eval::Scope;
use crate::tree::registry::DependencyList;
use crate::tree::{NodeId, Tree};

/// Polymorphic evaluation value
#[derive(Clone)]
pub enum Value {
    /// Explicit "not known / not applicable"; falsy and terminal under dot
    Undefined,
    /// Boolean value
    Boolean(bool),
    /// Integer value (fixed-width fallback; overflow is a recoverable error)
    Integer(i64),
    /// IEEE-754 double
    Double(f64),
    /// String value (ordinal comparison)
    String(Rc<str>),
    /// Enumeration value with an alias-name set
    Enum(Rc<EnumValue>),
    /// Reference to a live tree node (identity comparison)
    Node(NodeId),
    /// Callable routine
    Routine(Routine),
    /// Routine bound to a receiver value
    Method(Method),
}

/// Enumeration value: a canonical name plus aliases.
///
/// Identifier lookup on an enum value tests membership of the identifier in
/// the alias-name set, so rules can write `control_type.button`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EnumValue {
    name: Rc<str>,
    aliases: Vec<Rc<str>>,
}

impl EnumValue {
    /// Create an enum value from a canonical name and aliases
    pub fn new(name: impl AsRef<str>, aliases: impl IntoIterator<Item = impl AsRef<str>>) -> Self {
        Self {
            name: Rc::from(name.as_ref()),
            aliases: aliases.into_iter().map(|a| Rc::from(a.as_ref())).collect(),
        }
    }

    /// Canonical name
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Case-insensitive membership test against the canonical name and all
    /// aliases
    pub fn matches(&self, identifier: &str) -> bool {
        self.name.eq_ignore_ascii_case(identifier)
            || self
                .aliases
                .iter()
                .any(|alias| alias.eq_ignore_ascii_case(identifier))
    }
}

/// Signature shared by routines and methods.
///
/// Arguments arrive unevaluated; the callee evaluates what it needs against
/// the original scope. The receiver is `Undefined` for unbound routines.
pub type RoutineFn =
    dyn Fn(&mut Tree, &Scope, &Value, &[Expression], &mut DependencyList) -> Result<Value>;

/// Callable routine value, compared by function identity
#[derive(Clone)]
pub struct Routine {
    name: Rc<str>,
    func: Rc<RoutineFn>,
}

impl Routine {
    /// Create a named routine
    pub fn new(
        name: impl AsRef<str>,
        func: impl Fn(&mut Tree, &Scope, &Value, &[Expression], &mut DependencyList) -> Result<Value>
        + 'static,
    ) -> Self {
        Self {
            name: Rc::from(name.as_ref()),
            func: Rc::new(func),
        }
    }

    /// Routine name, for diagnostics
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Invoke with an explicit receiver
    pub fn invoke(
        &self,
        tree: &mut Tree,
        scope: &Scope,
        receiver: &Value,
        args: &[Expression],
        deps: &mut DependencyList,
    ) -> Result<Value> {
        (self.func)(tree, scope, receiver, args, deps)
    }

    /// Bind this routine to a receiver, producing a method value
    pub fn bind(&self, receiver: Value) -> Method {
        Method {
            receiver: Box::new(receiver),
            routine: self.clone(),
        }
    }
}

impl fmt::Debug for Routine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Routine({})", self.name)
    }
}

/// A routine bound to a receiver value
#[derive(Debug, Clone)]
pub struct Method {
    receiver: Box<Value>,
    routine: Routine,
}

impl Method {
    /// Bound receiver
    pub fn receiver(&self) -> &Value {
        &self.receiver
    }

    /// Underlying routine
    pub fn routine(&self) -> &Routine {
        &self.routine
    }

    /// Invoke against the bound receiver
    pub fn invoke(
        &self,
        tree: &mut Tree,
        scope: &Scope,
        args: &[Expression],
        deps: &mut DependencyList,
    ) -> Result<Value> {
        self.routine.invoke(tree, scope, &self.receiver, args, deps)
    }
}

impl Value {
    /// Variant name, for diagnostics and error messages
    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Undefined => "Undefined",
            Value::Boolean(_) => "Boolean",
            Value::Integer(_) => "Integer",
            Value::Double(_) => "Double",
            Value::String(_) => "String",
            Value::Enum(_) => "Enum",
            Value::Node(_) => "Node",
            Value::Routine(_) => "Routine",
            Value::Method(_) => "Method",
        }
    }

    /// String value constructor
    pub fn string(value: impl AsRef<str>) -> Self {
        Value::String(Rc::from(value.as_ref()))
    }

    /// Whether this is the undefined value
    pub fn is_undefined(&self) -> bool {
        matches!(self, Value::Undefined)
    }

    /// Truthiness: Undefined is false; numbers are true when nonzero (and,
    /// for doubles, non-NaN); strings when nonempty; everything else true.
    pub fn to_bool(&self) -> bool {
        match self {
            Value::Undefined => false,
            Value::Boolean(b) => *b,
            Value::Integer(i) => *i != 0,
            Value::Double(d) => *d != 0.0 && !d.is_nan(),
            Value::String(s) => !s.is_empty(),
            Value::Enum(_) | Value::Node(_) | Value::Routine(_) | Value::Method(_) => true,
        }
    }

    /// The single change-detection predicate.
    ///
    /// Structural equality with two refinements: an integer and a double are
    /// equal when they denote the same mathematical value, and two NaN
    /// doubles are equal (a NaN-valued declaration must not fire a change
    /// notification on every pass).
    pub fn value_equals(&self, other: &Value) -> bool {
        match (self, other) {
            (Value::Undefined, Value::Undefined) => true,
            (Value::Boolean(a), Value::Boolean(b)) => a == b,
            (Value::Integer(a), Value::Integer(b)) => a == b,
            (Value::Double(a), Value::Double(b)) => {
                a == b || (a.is_nan() && b.is_nan())
            }
            (Value::Integer(i), Value::Double(d)) | (Value::Double(d), Value::Integer(i)) => {
                int_double_equal(*i, *d)
            }
            (Value::String(a), Value::String(b)) => a == b,
            (Value::Enum(a), Value::Enum(b)) => a.name() == b.name(),
            (Value::Node(a), Value::Node(b)) => a == b,
            (Value::Routine(a), Value::Routine(b)) => Rc::ptr_eq(&a.func, &b.func),
            (Value::Method(a), Value::Method(b)) => {
                Rc::ptr_eq(&a.routine.func, &b.routine.func)
                    && a.receiver.value_equals(&b.receiver)
            }
            _ => false,
        }
    }

    /// Ordering, defined only for matching or numeric-compatible variant
    /// pairs; anything else (and any NaN operand) is incomparable.
    pub fn compare(&self, other: &Value) -> Option<Ordering> {
        match (self, other) {
            (Value::Integer(a), Value::Integer(b)) => Some(a.cmp(b)),
            (Value::Double(a), Value::Double(b)) => a.partial_cmp(b),
            (Value::Integer(i), Value::Double(d)) => compare_int_double(*i, *d),
            (Value::Double(d), Value::Integer(i)) => {
                compare_int_double(*i, *d).map(Ordering::reverse)
            }
            (Value::String(a), Value::String(b)) => Some(a.as_bytes().cmp(b.as_bytes())),
            (Value::Boolean(a), Value::Boolean(b)) => Some(a.cmp(b)),
            _ => None,
        }
    }

    /// Case-insensitive-invariant prefix test for string values
    pub fn starts_with_invariant(&self, prefix: &str) -> Option<bool> {
        match self {
            Value::String(s) => Some(
                s.to_lowercase().starts_with(&prefix.to_lowercase()),
            ),
            _ => None,
        }
    }

    /// Case-insensitive-invariant suffix test for string values
    pub fn ends_with_invariant(&self, suffix: &str) -> Option<bool> {
        match self {
            Value::String(s) => Some(s.to_lowercase().ends_with(&suffix.to_lowercase())),
            _ => None,
        }
    }

    /// Render for diagnostics dumps
    pub fn to_json(&self) -> serde_json::Value {
        match self {
            Value::Undefined => serde_json::Value::Null,
            Value::Boolean(b) => serde_json::Value::Bool(*b),
            Value::Integer(i) => serde_json::Value::from(*i),
            Value::Double(d) => serde_json::Number::from_f64(*d)
                .map(serde_json::Value::Number)
                .unwrap_or(serde_json::Value::Null),
            Value::String(s) => serde_json::Value::String(s.to_string()),
            Value::Enum(e) => serde_json::Value::String(format!("enum:{}", e.name())),
            Value::Node(id) => serde_json::Value::String(format!("{id:?}")),
            Value::Routine(r) => serde_json::Value::String(format!("routine:{}", r.name())),
            Value::Method(m) => {
                serde_json::Value::String(format!("method:{}", m.routine().name()))
            }
        }
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        self.value_equals(other)
    }
}

impl fmt::Debug for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Undefined => write!(f, "Undefined"),
            Value::Boolean(b) => write!(f, "Boolean({b})"),
            Value::Integer(i) => write!(f, "Integer({i})"),
            Value::Double(d) => write!(f, "Double({d})"),
            Value::String(s) => write!(f, "String({s:?})"),
            Value::Enum(e) => write!(f, "Enum({})", e.name()),
            Value::Node(id) => write!(f, "Node({id:?})"),
            Value::Routine(r) => write!(f, "Routine({})", r.name()),
            Value::Method(m) => write!(f, "Method({})", m.routine().name()),
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Undefined => write!(f, "undefined"),
            Value::Boolean(b) => write!(f, "{b}"),
            Value::Integer(i) => write!(f, "{i}"),
            Value::Double(d) => write!(f, "{d}"),
            Value::String(s) => write!(f, "{s}"),
            Value::Enum(e) => write!(f, "{}", e.name()),
            Value::Node(id) => write!(f, "{id:?}"),
            Value::Routine(r) => write!(f, "{}()", r.name()),
            Value::Method(m) => write!(f, "{}()", m.routine().name()),
        }
    }
}

impl From<bool> for Value {
    fn from(value: bool) -> Self {
        Value::Boolean(value)
    }
}

impl From<i64> for Value {
    fn from(value: i64) -> Self {
        Value::Integer(value)
    }
}

impl From<f64> for Value {
    fn from(value: f64) -> Self {
        Value::Double(value)
    }
}

impl From<&str> for Value {
    fn from(value: &str) -> Self {
        Value::string(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[test]
    fn cross_type_numeric_equality() {
        assert!(Value::Double(2.0).value_equals(&Value::Integer(2)));
        assert!(Value::Integer(2).value_equals(&Value::Double(2.0)));
        assert!(!Value::Double(2.5).value_equals(&Value::Integer(2)));
    }

    #[test]
    fn cross_type_numeric_ordering() {
        assert_eq!(
            Value::Double(2.5).compare(&Value::Integer(2)),
            Some(Ordering::Greater)
        );
        assert_eq!(
            Value::Integer(2).compare(&Value::Double(2.5)),
            Some(Ordering::Less)
        );
    }

    #[test]
    fn nan_is_incomparable_but_stable() {
        let nan = Value::Double(f64::NAN);
        assert_eq!(nan.compare(&Value::Double(1.0)), None);
        assert_eq!(nan.compare(&Value::Integer(1)), None);
        // Stable under change detection
        assert!(nan.value_equals(&Value::Double(f64::NAN)));
    }

    #[test]
    fn mismatched_variants_are_incomparable() {
        assert_eq!(Value::string("a").compare(&Value::Integer(1)), None);
        assert_eq!(Value::Undefined.compare(&Value::Undefined), None);
    }

    #[rstest]
    #[case(Value::Undefined, false)]
    #[case(Value::Boolean(true), true)]
    #[case(Value::Boolean(false), false)]
    #[case(Value::Integer(0), false)]
    #[case(Value::Integer(-3), true)]
    #[case(Value::Double(0.0), false)]
    #[case(Value::Double(f64::NAN), false)]
    #[case(Value::Double(0.5), true)]
    #[case(Value::string(""), false)]
    #[case(Value::string("x"), true)]
    fn truthiness(#[case] value: Value, #[case] expected: bool) {
        assert_eq!(value.to_bool(), expected);
    }

    #[test]
    fn enum_membership_is_case_insensitive() {
        let control = EnumValue::new("Button", ["PushButton", "button"]);
        assert!(control.matches("BUTTON"));
        assert!(control.matches("pushbutton"));
        assert!(!control.matches("checkbox"));
    }

    #[test]
    fn string_prefix_suffix_invariant() {
        let value = Value::string("MenuItem");
        assert_eq!(value.starts_with_invariant("menu"), Some(true));
        assert_eq!(value.ends_with_invariant("ITEM"), Some(true));
        assert_eq!(value.starts_with_invariant("item"), Some(false));
        assert_eq!(Value::Integer(1).starts_with_invariant("1"), None);
    }

    #[test]
    fn routines_compare_by_identity() {
        let a = Routine::new("noop", |_, _, _, _, _| Ok(Value::Undefined));
        let b = Routine::new("noop", |_, _, _, _, _| Ok(Value::Undefined));
        let a2 = Value::Routine(a.clone());
        assert!(a2.value_equals(&Value::Routine(a)));
        assert!(!a2.value_equals(&Value::Routine(b)));
    }
}
