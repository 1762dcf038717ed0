//! oraculo-core: rule DSL for NF-e audits.
//!
//! Turns YAML rule documents into a validated in-memory model, serializes
//! them back to canonical YAML, composes a baseline with a tenant override,
//! and ships the built-in rule packs. Expression strings inside conditions
//! and evidence are carried as text; evaluating them is the job of
//! `oraculo-eval`.
//!
//! # Public API
//!
//! - [`parse()`] / [`materialize()`] -- text or stored payload to [`RuleDocument`]
//! - [`compose()`] and [`ComposedRuleSet`] -- baseline + override merge
//! - [`RulePackRegistry`] / [`get_rule_pack()`] -- bundled packs
//! - [`DslError`], [`PackError`] -- error types

pub mod compose;
pub mod document;
pub mod error;
pub mod packs;
pub mod parser;
pub mod serialize;

// ── Convenience re-exports: model ────────────────────────────────────

pub use document::{
    Clause, Evidence, EvidenceValue, RuleAction, RuleCondition, RuleDefinition, RuleDocument, RuleScope,
};
pub use error::{DslError, PackError, SerializeError};

// ── Convenience re-exports: entry points ─────────────────────────────

pub use compose::{compose, ComposedRuleSet};
pub use packs::{get_rule_pack, RulePack, RulePackRegistry};
pub use parser::{materialize, parse};
pub use serialize::document_to_payload;
