//! Canonical serialization of rule documents.
//!
//! Field order is fixed and absent optional fields are omitted, so that
//! `parse(to_yaml(doc)) == doc` for every valid document.

use serde_json::{Map, Value};

use crate::document::{Clause, RuleAction, RuleCondition, RuleDefinition, RuleDocument};
use crate::error::SerializeError;

pub fn document_to_json(doc: &RuleDocument) -> Value {
    let mut obj = Map::new();
    if let Some(name) = &doc.name {
        obj.insert("name".to_owned(), Value::String(name.clone()));
    }
    if let Some(version) = &doc.version {
        obj.insert("version".to_owned(), Value::String(version.clone()));
    }
    if !doc.metadata.is_empty() {
        obj.insert("metadata".to_owned(), Value::Object(doc.metadata.clone()));
    }
    obj.insert(
        "rules".to_owned(),
        Value::Array(doc.rules.iter().map(rule_to_json).collect()),
    );
    Value::Object(obj)
}

pub fn document_to_yaml(doc: &RuleDocument) -> Result<String, SerializeError> {
    to_yaml_text(&document_to_json(doc))
}

/// Storage payload for a document: the author's raw text (canonical) plus
/// the structured rules. [`crate::parser::materialize`] is the inverse.
pub fn document_to_payload(doc: &RuleDocument, yaml_text: &str) -> Value {
    let mut obj = Map::new();
    obj.insert("yaml".to_owned(), Value::String(yaml_text.to_owned()));
    obj.insert(
        "rules".to_owned(),
        Value::Array(doc.rules.iter().map(rule_to_json).collect()),
    );
    if !doc.metadata.is_empty() {
        obj.insert("metadata".to_owned(), Value::Object(doc.metadata.clone()));
    }
    if let Some(name) = &doc.name {
        obj.insert("name".to_owned(), Value::String(name.clone()));
    }
    if let Some(version) = &doc.version {
        obj.insert("version".to_owned(), Value::String(version.clone()));
    }
    Value::Object(obj)
}

pub fn rule_to_json(rule: &RuleDefinition) -> Value {
    let mut obj = Map::new();
    obj.insert("id".to_owned(), Value::String(rule.id.clone()));
    obj.insert("name".to_owned(), Value::String(rule.name.clone()));
    obj.insert(
        "scope".to_owned(),
        Value::String(rule.scope.as_str().to_owned()),
    );
    if let Some(description) = &rule.description {
        obj.insert("description".to_owned(), Value::String(description.clone()));
    }
    obj.insert("when".to_owned(), condition_to_json(&rule.when));
    obj.insert("then".to_owned(), action_to_json(&rule.then));
    if rule.disabled {
        obj.insert("disabled".to_owned(), Value::Bool(true));
    }
    Value::Object(obj)
}

pub fn condition_to_json(cond: &RuleCondition) -> Value {
    let mut obj = Map::new();
    if let Some(all) = &cond.all {
        obj.insert("all".to_owned(), clauses_to_json(all));
    }
    if let Some(any) = &cond.any {
        obj.insert("any".to_owned(), clauses_to_json(any));
    }
    if let Some(not) = &cond.not {
        obj.insert("not".to_owned(), condition_to_json(not));
    }
    Value::Object(obj)
}

fn clauses_to_json(clauses: &[Clause]) -> Value {
    Value::Array(
        clauses
            .iter()
            .map(|c| match c {
                Clause::Expr(text) => Value::String(text.clone()),
                Clause::Group(inner) => condition_to_json(inner),
            })
            .collect(),
    )
}

pub fn action_to_json(action: &RuleAction) -> Value {
    let mut obj = Map::new();
    obj.insert(
        "inconsistency_code".to_owned(),
        Value::String(action.inconsistency_code.clone()),
    );
    obj.insert(
        "severity".to_owned(),
        Value::String(action.severity.clone()),
    );
    obj.insert(
        "message_pt".to_owned(),
        Value::String(action.message_pt.clone()),
    );
    if let Some(code) = &action.suggestion_code {
        obj.insert("suggestion_code".to_owned(), Value::String(code.clone()));
    }
    if !action.references.is_empty() {
        obj.insert(
            "references".to_owned(),
            Value::Array(
                action
                    .references
                    .iter()
                    .map(|r| Value::String(r.clone()))
                    .collect(),
            ),
        );
    }
    if !action.evidence.is_empty() {
        let evidence: Map<String, Value> = action
            .evidence
            .iter()
            .map(|(k, v)| (k.clone(), v.to_json()))
            .collect();
        obj.insert("evidence".to_owned(), Value::Object(evidence));
    }
    Value::Object(obj)
}

/// Render a JSON tree as YAML.
pub(crate) fn to_yaml_text(value: &Value) -> Result<String, SerializeError> {
    Ok(serde_yaml::to_string(value)?)
}
