//! Reactive accessibility-tree core
//!
//! Mirrors externally-sourced, asynchronously-updating accessibility trees
//! into one uniform tree of typed values and evaluates a declarative rule
//! set against it: a dependency-tracking, incrementally-recomputed property
//! system with relationship queries and polling lifecycles on top.

pub mod ast;
pub mod config;
pub mod diagnostics;
pub mod error;
pub mod eval;
pub mod provider;
pub mod tree;
pub mod value;
pub mod watch;

// Re-export main types
pub use ast::{BinaryOperator, Expression, Literal, UnaryOperator};
pub use config::EngineConfig;
pub use error::{AxError, Result};
pub use eval::relationship::RelationshipKind;
pub use eval::{Scope, evaluate};
pub use provider::{Application, NullApplication, Provider, StaticProvider};
pub use tree::registry::{DependencyEdge, DependencyList, PropertyChange, SubscriptionId};
pub use tree::root::{Root, Rule};
pub use tree::{NodeId, Tree};
pub use value::{EnumValue, Method, Routine, Value};
pub use watch::{ExpressionWatcher, PollLoop, PollToken, TreeHandle};
