//! Rule document model.
//!
//! These are plain value types produced by the parser and consumed by the
//! composer and the rule engine. Nothing here is mutated after parsing:
//! composition works on clones, so a tenant override can never reach back
//! into the baseline it was merged with.

use std::fmt;

// ──────────────────────────────────────────────
// Scope
// ──────────────────────────────────────────────

/// Iteration granularity of a rule.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum RuleScope {
    /// Evaluated once per invoice, without an `item` binding.
    #[default]
    Invoice,
    /// Evaluated once per line item, with `item` bound to the current item.
    Item,
}

impl RuleScope {
    pub fn as_str(&self) -> &'static str {
        match self {
            RuleScope::Invoice => "invoice",
            RuleScope::Item => "item",
        }
    }

    /// Parse the DSL spelling. Surrounding whitespace is ignored.
    pub fn from_dsl(s: &str) -> Option<RuleScope> {
        match s.trim() {
            "invoice" => Some(RuleScope::Invoice),
            "item" => Some(RuleScope::Item),
            _ => None,
        }
    }
}

impl fmt::Display for RuleScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ──────────────────────────────────────────────
// Conditions
// ──────────────────────────────────────────────

/// One entry of an `all` / `any` list.
#[derive(Debug, Clone, PartialEq)]
pub enum Clause {
    /// An expression evaluated by the expression evaluator.
    Expr(String),
    /// A nested condition object.
    Group(RuleCondition),
}

/// The `when` block of a rule.
///
/// `None` and `Some(vec![])` are kept apart so that `any: []` survives a
/// serialize/parse round trip; both match (see the engine for the empty
/// `any` semantics).
#[derive(Debug, Clone, PartialEq, Default)]
pub struct RuleCondition {
    pub all: Option<Vec<Clause>>,
    pub any: Option<Vec<Clause>>,
    pub not: Option<Box<RuleCondition>>,
}

impl RuleCondition {
    /// A condition with a single expression clause under `all`.
    pub fn expr(text: impl Into<String>) -> Self {
        RuleCondition {
            all: Some(vec![Clause::Expr(text.into())]),
            ..RuleCondition::default()
        }
    }

    /// True when no block is present. An empty condition always matches.
    pub fn is_empty(&self) -> bool {
        self.all.is_none() && self.any.is_none() && self.not.is_none()
    }

    /// Every expression string in the tree, depth first, in document order.
    pub fn expressions(&self) -> Vec<&str> {
        let mut out = Vec::new();
        self.collect_expressions(&mut out);
        out
    }

    fn collect_expressions<'a>(&'a self, out: &mut Vec<&'a str>) {
        for clauses in [&self.all, &self.any].into_iter().flatten() {
            for clause in clauses {
                match clause {
                    Clause::Expr(text) => out.push(text),
                    Clause::Group(inner) => inner.collect_expressions(out),
                }
            }
        }
        if let Some(inner) = &self.not {
            inner.collect_expressions(out);
        }
    }
}

// ──────────────────────────────────────────────
// Actions
// ──────────────────────────────────────────────

/// A single `then.evidence` entry.
///
/// Strings are expressions evaluated against the context that matched the
/// rule; every other YAML value is attached to the finding as written.
#[derive(Debug, Clone, PartialEq)]
pub enum EvidenceValue {
    Literal(serde_json::Value),
    Expression(String),
}

impl EvidenceValue {
    /// Classify a decoded YAML/JSON value.
    pub fn from_json(value: serde_json::Value) -> Self {
        match value {
            serde_json::Value::String(text) => EvidenceValue::Expression(text),
            other => EvidenceValue::Literal(other),
        }
    }

    pub fn to_json(&self) -> serde_json::Value {
        match self {
            EvidenceValue::Literal(v) => v.clone(),
            EvidenceValue::Expression(text) => serde_json::Value::String(text.clone()),
        }
    }
}

/// `then.evidence` entries in the order they were written.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Evidence {
    entries: Vec<(String, EvidenceValue)>,
}

impl Evidence {
    pub fn new() -> Self {
        Evidence::default()
    }

    /// Add an entry, or replace the value of an existing key in place.
    pub fn insert(&mut self, key: String, value: EvidenceValue) {
        match self.entries.iter_mut().find(|(k, _)| *k == key) {
            Some((_, slot)) => *slot = value,
            None => self.entries.push((key, value)),
        }
    }

    pub fn get(&self, key: &str) -> Option<&EvidenceValue> {
        self.entries.iter().find(|(k, _)| k == key).map(|(_, v)| v)
    }

    pub fn keys(&self) -> impl Iterator<Item = &String> {
        self.entries.iter().map(|(k, _)| k)
    }

    pub fn values(&self) -> impl Iterator<Item = &EvidenceValue> {
        self.entries.iter().map(|(_, v)| v)
    }

    pub fn iter(&self) -> std::slice::Iter<'_, (String, EvidenceValue)> {
        self.entries.iter()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl FromIterator<(String, EvidenceValue)> for Evidence {
    fn from_iter<I: IntoIterator<Item = (String, EvidenceValue)>>(iter: I) -> Self {
        let mut evidence = Evidence::new();
        for (key, value) in iter {
            evidence.insert(key, value);
        }
        evidence
    }
}

impl<'a> IntoIterator for &'a Evidence {
    type Item = &'a (String, EvidenceValue);
    type IntoIter = std::slice::Iter<'a, (String, EvidenceValue)>;

    fn into_iter(self) -> Self::IntoIter {
        self.entries.iter()
    }
}

/// The `then` block of a rule: what a finding says when the rule matches.
#[derive(Debug, Clone, PartialEq)]
pub struct RuleAction {
    pub inconsistency_code: String,
    /// Open-ended severity label (`alto`, `medio`, `baixo`, ...).
    pub severity: String,
    pub message_pt: String,
    pub suggestion_code: Option<String>,
    /// Legal references, in document order. Empty means absent.
    pub references: Vec<String>,
    /// Empty means absent.
    pub evidence: Evidence,
}

impl RuleAction {
    pub fn new(
        inconsistency_code: impl Into<String>,
        severity: impl Into<String>,
        message_pt: impl Into<String>,
    ) -> Self {
        RuleAction {
            inconsistency_code: inconsistency_code.into(),
            severity: severity.into(),
            message_pt: message_pt.into(),
            suggestion_code: None,
            references: Vec::new(),
            evidence: Evidence::new(),
        }
    }
}

// ──────────────────────────────────────────────
// Rules and documents
// ──────────────────────────────────────────────

/// A single rule. `Clone` is a deep, independent copy.
#[derive(Debug, Clone, PartialEq)]
pub struct RuleDefinition {
    pub id: String,
    pub name: String,
    pub scope: RuleScope,
    pub description: Option<String>,
    pub when: RuleCondition,
    pub then: RuleAction,
    pub disabled: bool,
}

impl RuleDefinition {
    pub fn new(id: impl Into<String>, name: impl Into<String>, then: RuleAction) -> Self {
        RuleDefinition {
            id: id.into(),
            name: name.into(),
            scope: RuleScope::Invoice,
            description: None,
            when: RuleCondition::default(),
            then,
            disabled: false,
        }
    }

    pub fn with_scope(mut self, scope: RuleScope) -> Self {
        self.scope = scope;
        self
    }

    pub fn with_when(mut self, when: RuleCondition) -> Self {
        self.when = when;
        self
    }

    pub fn disabled(mut self) -> Self {
        self.disabled = true;
        self
    }
}

/// An ordered collection of rules plus free-form metadata.
///
/// Rule order is significant: it drives composition order and the order in
/// which the engine reports findings.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct RuleDocument {
    pub name: Option<String>,
    pub version: Option<String>,
    /// Preserved verbatim; the parser never interprets it.
    pub metadata: serde_json::Map<String, serde_json::Value>,
    pub rules: Vec<RuleDefinition>,
}

impl RuleDocument {
    pub fn new(rules: Vec<RuleDefinition>) -> Self {
        RuleDocument {
            rules,
            ..RuleDocument::default()
        }
    }

    pub fn rule(&self, id: &str) -> Option<&RuleDefinition> {
        self.rules.iter().find(|r| r.id == id)
    }

    pub fn rule_ids(&self) -> Vec<&str> {
        self.rules.iter().map(|r| r.id.as_str()).collect()
    }

    /// Canonical YAML text for this document.
    pub fn to_yaml(&self) -> Result<String, crate::error::SerializeError> {
        crate::serialize::document_to_yaml(self)
    }

    /// Structured JSON form (the shape `rules` takes in a stored payload).
    pub fn to_json(&self) -> serde_json::Value {
        crate::serialize::document_to_json(self)
    }

    /// Storage payload pairing the author's raw text with the structured
    /// rules; [`crate::parser::materialize`] reads it back.
    pub fn to_payload(&self, raw_text: &str) -> serde_json::Value {
        crate::serialize::document_to_payload(self, raw_text)
    }
}
