//! Expression AST consumed by the evaluation core
//!
//! The rule-language parser lives outside this crate; it hands the core a
//! fully-formed [`Expression`] tree. Expressions are immutable, shared via
//! `Rc`, and structurally hashable so a `(node, expression)` pair can key the
//! dependency registry.

use std::fmt;
use std::rc::Rc;

/// AST representation of rule-language expressions
///
/// Large variants carry boxed payload structs to keep the enum small.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Expression {
    /// Literal value
    Literal(Literal),

    /// Identifier, resolved against the current evaluation context
    Identifier(Rc<str>),

    /// Member access (`base.member`); `member` is an identifier or an
    /// application, re-evaluated against the *base value* while the original
    /// evaluation context is preserved for the member's own operands
    Dot {
        /// Expression producing the left-hand value
        base: Box<Expression>,
        /// Identifier or application resolved against the left-hand value
        member: Box<Expression>,
    },

    /// Application (`callee(args...)`); arguments are passed unevaluated to
    /// the callee and evaluated against the original context on demand
    Apply(Box<ApplyData>),

    /// Unary operation
    Unary {
        /// The operator
        op: UnaryOperator,
        /// The operand
        operand: Box<Expression>,
    },

    /// Binary operation (boxed payload for size)
    Binary(Box<BinaryData>),
}

/// Application payload
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ApplyData {
    /// Expression producing the callable
    pub callee: Expression,
    /// Raw argument expressions
    pub args: Vec<Expression>,
}

/// Binary operation payload
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct BinaryData {
    /// The operator
    pub op: BinaryOperator,
    /// Left operand
    pub left: Expression,
    /// Right operand
    pub right: Expression,
}

/// Binary operators of the rule language
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BinaryOperator {
    /// Logical and; returns the deciding operand's actual value
    And,
    /// Logical or; returns the deciding operand's actual value
    Or,
    /// Equality (`value_equals` semantics)
    Equal,
    /// Inequality
    NotEqual,
    /// Less than
    LessThan,
    /// Less than or equal
    LessOrEqual,
    /// Greater than
    GreaterThan,
    /// Greater than or equal
    GreaterOrEqual,
    /// Addition (also string concatenation)
    Add,
    /// Subtraction
    Subtract,
    /// Multiplication
    Multiply,
    /// Integer division rounds toward negative infinity
    Divide,
    /// Modulo with floor semantics (result takes the divisor's sign)
    Modulo,
}

/// Unary operators of the rule language
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum UnaryOperator {
    /// Boolean negation via `to_bool`
    Not,
    /// Numeric negation
    Negate,
}

/// Literal values
///
/// Doubles are compared and hashed by bit pattern so expressions stay usable
/// as hash keys; the evaluator's own numeric equality is separate.
#[derive(Debug, Clone)]
pub enum Literal {
    /// The undefined value
    Undefined,
    /// Boolean literal
    Boolean(bool),
    /// Integer literal
    Integer(i64),
    /// Double literal
    Double(f64),
    /// String literal
    String(Rc<str>),
}

impl PartialEq for Literal {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Literal::Undefined, Literal::Undefined) => true,
            (Literal::Boolean(a), Literal::Boolean(b)) => a == b,
            (Literal::Integer(a), Literal::Integer(b)) => a == b,
            (Literal::Double(a), Literal::Double(b)) => a.to_bits() == b.to_bits(),
            (Literal::String(a), Literal::String(b)) => a == b,
            _ => false,
        }
    }
}

impl Eq for Literal {}

impl std::hash::Hash for Literal {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        core::mem::discriminant(self).hash(state);
        match self {
            Literal::Undefined => {}
            Literal::Boolean(b) => b.hash(state),
            Literal::Integer(i) => i.hash(state),
            Literal::Double(d) => d.to_bits().hash(state),
            Literal::String(s) => s.hash(state),
        }
    }
}

impl Expression {
    /// Identifier expression
    pub fn identifier(name: impl AsRef<str>) -> Self {
        Expression::Identifier(Rc::from(name.as_ref()))
    }

    /// Boolean literal expression
    pub fn boolean(value: bool) -> Self {
        Expression::Literal(Literal::Boolean(value))
    }

    /// Integer literal expression
    pub fn integer(value: i64) -> Self {
        Expression::Literal(Literal::Integer(value))
    }

    /// Double literal expression
    pub fn double(value: f64) -> Self {
        Expression::Literal(Literal::Double(value))
    }

    /// String literal expression
    pub fn string(value: impl AsRef<str>) -> Self {
        Expression::Literal(Literal::String(Rc::from(value.as_ref())))
    }

    /// Undefined literal expression
    pub fn undefined() -> Self {
        Expression::Literal(Literal::Undefined)
    }

    /// Member access expression
    pub fn dot(base: Expression, member: Expression) -> Self {
        Expression::Dot {
            base: Box::new(base),
            member: Box::new(member),
        }
    }

    /// Application expression
    pub fn apply(callee: Expression, args: Vec<Expression>) -> Self {
        Expression::Apply(Box::new(ApplyData { callee, args }))
    }

    /// Binary expression
    pub fn binary(op: BinaryOperator, left: Expression, right: Expression) -> Self {
        Expression::Binary(Box::new(BinaryData { op, left, right }))
    }

    /// Unary expression
    pub fn unary(op: UnaryOperator, operand: Expression) -> Self {
        Expression::Unary {
            op,
            operand: Box::new(operand),
        }
    }

    /// The identifier name if this is a bare identifier expression
    pub fn as_identifier(&self) -> Option<&str> {
        match self {
            Expression::Identifier(name) => Some(name),
            _ => None,
        }
    }

    /// If this is `callee(args...)` with a bare-identifier callee, the
    /// callee name and argument list. Relationship watch construction keys
    /// off this shape.
    pub fn as_named_apply(&self) -> Option<(&str, &[Expression])> {
        match self {
            Expression::Apply(data) => {
                let name = data.callee.as_identifier()?;
                Some((name, &data.args))
            }
            _ => None,
        }
    }
}

impl fmt::Display for BinaryOperator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let symbol = match self {
            BinaryOperator::And => "and",
            BinaryOperator::Or => "or",
            BinaryOperator::Equal => "==",
            BinaryOperator::NotEqual => "!=",
            BinaryOperator::LessThan => "<",
            BinaryOperator::LessOrEqual => "<=",
            BinaryOperator::GreaterThan => ">",
            BinaryOperator::GreaterOrEqual => ">=",
            BinaryOperator::Add => "+",
            BinaryOperator::Subtract => "-",
            BinaryOperator::Multiply => "*",
            BinaryOperator::Divide => "div",
            BinaryOperator::Modulo => "mod",
        };
        f.write_str(symbol)
    }
}

impl fmt::Display for Expression {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Expression::Literal(Literal::Undefined) => write!(f, "undefined"),
            Expression::Literal(Literal::Boolean(b)) => write!(f, "{b}"),
            Expression::Literal(Literal::Integer(i)) => write!(f, "{i}"),
            Expression::Literal(Literal::Double(d)) => write!(f, "{d}"),
            Expression::Literal(Literal::String(s)) => write!(f, "{s:?}"),
            Expression::Identifier(name) => write!(f, "{name}"),
            Expression::Dot { base, member } => write!(f, "{base}.{member}"),
            Expression::Apply(data) => {
                write!(f, "{}(", data.callee)?;
                for (i, arg) in data.args.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{arg}")?;
                }
                write!(f, ")")
            }
            Expression::Unary {
                op: UnaryOperator::Not,
                operand,
            } => write!(f, "not {operand}"),
            Expression::Unary {
                op: UnaryOperator::Negate,
                operand,
            } => write!(f, "-{operand}"),
            Expression::Binary(data) => {
                write!(f, "({} {} {})", data.left, data.op, data.right)
            }
        }
    }
}
