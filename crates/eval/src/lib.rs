//! oraculo-eval: sandboxed expressions and the rule engine.
//!
//! Rule conditions and evidence are small expressions in a restricted,
//! Python-flavoured grammar. They are lexed and parsed into an [`Expr`]
//! tree and walked against a [`Context`] that exposes exactly the invoice,
//! the current item and the `helpers` namespace. There is no statement
//! form, no loop and no way to reach host internals.
//!
//! # Public API
//!
//! - [`RuleEngine`] -- applies a rule set to an [`Invoice`], yielding [`Finding`]s
//! - [`Evaluator`] / [`Context`] -- evaluate one expression
//! - [`compile()`] -- parse expression text once for repeated use
//! - [`EvalError`], [`RuleError`] -- evaluation failures

pub mod ast;
pub mod builtins;
pub mod engine;
pub mod error;
pub mod evaluator;
pub mod helpers;
pub mod lexer;
pub mod numeric;
pub mod parser;
pub mod record;
pub mod value;

pub use ast::Expr;
pub use engine::{AuditReport, EngineOptions, ErrorPolicy, Finding, RuleEngine};
pub use error::{EvalError, RuleError};
pub use evaluator::{compile, Context, Evaluator};
pub use helpers::RuleHelper;
pub use record::{Invoice, Item, RecordError};
pub use value::Value;
