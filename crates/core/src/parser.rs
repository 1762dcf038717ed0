//! DSL parser and schema validator.
//!
//! YAML text is decoded into a generic tree first (a YAML syntax problem is
//! a [`DslError::Parse`]), converted to a string-keyed JSON tree, and then
//! validated rule by rule into a [`RuleDocument`] (a schema problem is a
//! [`DslError::Validation`]). Stored payloads that are already decoded go
//! through [`materialize`] and share the same validation path.

use std::collections::HashSet;

use serde_json::{Map, Value};

use crate::document::{
    Clause, Evidence, EvidenceValue, RuleAction, RuleCondition, RuleDefinition, RuleDocument,
    RuleScope,
};
use crate::error::DslError;

/// Parse DSL text into a validated document.
///
/// Accepts either a bare list of rules or a mapping with optional `name`,
/// `version`, `metadata` and a required `rules` list.
pub fn parse(text: &str) -> Result<RuleDocument, DslError> {
    let raw: serde_yaml::Value =
        serde_yaml::from_str(text).map_err(|e| DslError::parse(e.to_string()))?;
    let payload = yaml_to_json(raw)?;

    let doc = match payload {
        Value::Array(entries) => RuleDocument::new(parse_rules(&entries)?),
        Value::Object(obj) => {
            let metadata = extract_metadata(&obj)?;
            let rules_source = match obj.get("rules") {
                None | Some(Value::Null) => {
                    return Err(DslError::validation(
                        "document must contain a 'rules' key",
                    ))
                }
                Some(v) => v,
            };
            let entries = rules_source
                .as_array()
                .ok_or_else(|| DslError::validation("'rules' must be a list"))?;
            RuleDocument {
                name: optional_str(obj.get("name")),
                version: optional_str(obj.get("version")),
                metadata,
                rules: parse_rules(entries)?,
            }
        }
        Value::Null => {
            return Err(DslError::validation("document must contain a 'rules' key"));
        }
        _ => {
            return Err(DslError::validation(
                "document root must be a mapping or a list of rules",
            ));
        }
    };

    tracing::debug!(
        name = doc.name.as_deref().unwrap_or(""),
        rules = doc.rules.len(),
        "parsed rule document"
    );
    Ok(doc)
}

/// Rebuild a document from an already-decoded storage payload.
///
/// A non-empty `yaml` field wins, so the canonical text form round-trips
/// exactly. Otherwise the `rules` array is validated structurally; a
/// payload without a `rules` array yields an empty document.
pub fn materialize(payload: &Value) -> Result<RuleDocument, DslError> {
    let Some(obj) = payload.as_object() else {
        return Ok(RuleDocument::default());
    };

    if let Some(text) = obj.get("yaml").and_then(Value::as_str) {
        if !text.trim().is_empty() {
            return parse(text);
        }
    }

    let Some(entries) = obj.get("rules").and_then(Value::as_array) else {
        return Ok(RuleDocument::default());
    };

    Ok(RuleDocument {
        name: optional_str(obj.get("name")),
        version: optional_str(obj.get("version")),
        metadata: extract_metadata(obj)?,
        rules: parse_rules(entries)?,
    })
}

// ──────────────────────────────────────────────
// Rules
// ──────────────────────────────────────────────

fn parse_rules(entries: &[Value]) -> Result<Vec<RuleDefinition>, DslError> {
    let mut seen = HashSet::new();
    let mut rules = Vec::with_capacity(entries.len());
    for (index, entry) in entries.iter().enumerate() {
        let rule = parse_rule(entry, index + 1)?;
        if !seen.insert(rule.id.clone()) {
            return Err(DslError::validation(format!(
                "rule #{} ('{}'): duplicate rule id",
                index + 1,
                rule.id
            )));
        }
        rules.push(rule);
    }
    Ok(rules)
}

/// Error-message prefix identifying a rule by position and, once known, id.
struct RuleLabel<'a> {
    position: usize,
    id: Option<&'a str>,
}

impl RuleLabel<'_> {
    fn err(&self, msg: impl AsRef<str>) -> DslError {
        match self.id {
            Some(id) => DslError::validation(format!(
                "rule #{} ('{}'): {}",
                self.position,
                id,
                msg.as_ref()
            )),
            None => DslError::validation(format!("rule #{}: {}", self.position, msg.as_ref())),
        }
    }
}

fn parse_rule(entry: &Value, position: usize) -> Result<RuleDefinition, DslError> {
    let unnamed = RuleLabel { position, id: None };
    let obj = entry
        .as_object()
        .ok_or_else(|| unnamed.err("rule must be a mapping"))?;

    let id = require_str(obj.get("id"))
        .ok_or_else(|| unnamed.err("field 'id' is required and must be a non-empty string"))?;
    let label = RuleLabel {
        position,
        id: Some(&id),
    };

    let name = require_str(obj.get("name"))
        .ok_or_else(|| label.err("field 'name' is required and must be a non-empty string"))?;
    let description = optional_str(obj.get("description"));

    let scope = match obj.get("scope") {
        None | Some(Value::Null) => RuleScope::Invoice,
        Some(Value::String(s)) => RuleScope::from_dsl(s)
            .ok_or_else(|| label.err("field 'scope' must be 'invoice' or 'item'"))?,
        Some(_) => return Err(label.err("field 'scope' must be 'invoice' or 'item'")),
    };

    let when = parse_condition(obj.get("when"), &label, "when")?;
    let then = parse_action(obj.get("then"), &label)?;

    let disabled = match obj.get("disabled") {
        None | Some(Value::Null) => false,
        Some(Value::Bool(b)) => *b,
        Some(_) => return Err(label.err("field 'disabled' must be a boolean")),
    };

    Ok(RuleDefinition {
        id: id.clone(),
        name,
        scope,
        description,
        when,
        then,
        disabled,
    })
}

// ──────────────────────────────────────────────
// Conditions
// ──────────────────────────────────────────────

fn parse_condition(
    value: Option<&Value>,
    label: &RuleLabel<'_>,
    field: &str,
) -> Result<RuleCondition, DslError> {
    match value {
        None | Some(Value::Null) => Ok(RuleCondition::default()),
        Some(Value::String(text)) => Ok(RuleCondition::expr(require_expr(text, label, field)?)),
        Some(Value::Object(obj)) => {
            let mut cond = RuleCondition::default();
            for (key, v) in obj {
                match key.as_str() {
                    "all" => cond.all = Some(parse_clauses(v, label, "all")?),
                    "any" => cond.any = Some(parse_clauses(v, label, "any")?),
                    "not" => cond.not = Some(Box::new(parse_condition(Some(v), label, "not")?)),
                    other => {
                        return Err(label.err(format!(
                            "unknown key '{}' in '{}' (expected 'all', 'any' or 'not')",
                            other, field
                        )))
                    }
                }
            }
            Ok(cond)
        }
        Some(_) => Err(label.err(format!(
            "field '{}' must be an expression string or a mapping with 'all'/'any'/'not'",
            field
        ))),
    }
}

fn parse_clauses(
    value: &Value,
    label: &RuleLabel<'_>,
    key: &str,
) -> Result<Vec<Clause>, DslError> {
    let items = value
        .as_array()
        .ok_or_else(|| label.err(format!("block '{}' must be a list", key)))?;
    items
        .iter()
        .map(|clause| match clause {
            Value::String(text) => Ok(Clause::Expr(require_expr(text, label, key)?)),
            Value::Object(_) => Ok(Clause::Group(parse_condition(Some(clause), label, key)?)),
            _ => Err(label.err(format!(
                "clauses in '{}' must be expression strings or condition mappings",
                key
            ))),
        })
        .collect()
}

fn require_expr(text: &str, label: &RuleLabel<'_>, field: &str) -> Result<String, DslError> {
    if text.trim().is_empty() {
        return Err(label.err(format!("empty expression in '{}'", field)));
    }
    Ok(text.to_owned())
}

// ──────────────────────────────────────────────
// Actions
// ──────────────────────────────────────────────

fn parse_action(value: Option<&Value>, label: &RuleLabel<'_>) -> Result<RuleAction, DslError> {
    let obj = value
        .and_then(Value::as_object)
        .ok_or_else(|| label.err("field 'then' must be a mapping describing the action"))?;

    let required = |key: &str| {
        require_str(obj.get(key)).ok_or_else(|| {
            label.err(format!(
                "'then.{}' is required and must be a non-empty string",
                key
            ))
        })
    };
    let inconsistency_code = required("inconsistency_code")?;
    let severity = required("severity")?;
    let message_pt = required("message_pt")?;

    let suggestion_code = match obj.get("suggestion_code") {
        None | Some(Value::Null) => None,
        Some(Value::String(s)) => Some(s.trim())
            .filter(|s| !s.is_empty())
            .map(str::to_owned),
        Some(_) => return Err(label.err("'then.suggestion_code' must be a string")),
    };

    let references = match obj.get("references") {
        None | Some(Value::Null) => Vec::new(),
        Some(Value::Array(items)) => items
            .iter()
            .map(|r| {
                r.as_str()
                    .map(str::to_owned)
                    .ok_or_else(|| label.err("'then.references' must be a list of strings"))
            })
            .collect::<Result<Vec<_>, _>>()?,
        Some(_) => return Err(label.err("'then.references' must be a list of strings")),
    };

    let evidence = match obj.get("evidence") {
        None | Some(Value::Null) => Evidence::new(),
        Some(Value::Object(entries)) => entries
            .iter()
            .map(|(k, v)| (k.clone(), EvidenceValue::from_json(v.clone())))
            .collect(),
        Some(_) => return Err(label.err("'then.evidence' must be a mapping")),
    };

    Ok(RuleAction {
        inconsistency_code,
        severity,
        message_pt,
        suggestion_code,
        references,
        evidence,
    })
}

// ──────────────────────────────────────────────
// Field helpers
// ──────────────────────────────────────────────

fn extract_metadata(obj: &Map<String, Value>) -> Result<Map<String, Value>, DslError> {
    match obj.get("metadata") {
        None | Some(Value::Null) => Ok(Map::new()),
        Some(Value::Object(m)) => Ok(m.clone()),
        Some(_) => Err(DslError::validation("field 'metadata' must be a mapping")),
    }
}

fn require_str(value: Option<&Value>) -> Option<String> {
    match value {
        Some(Value::String(s)) if !s.trim().is_empty() => Some(s.trim().to_owned()),
        _ => None,
    }
}

/// Like [`require_str`], but a bare number (`version: 2`) is taken as text.
fn optional_str(value: Option<&Value>) -> Option<String> {
    match value {
        Some(Value::Number(n)) => Some(n.to_string()),
        other => require_str(other),
    }
}

// ──────────────────────────────────────────────
// YAML -> JSON tree
// ──────────────────────────────────────────────

/// Convert a decoded YAML tree into a string-keyed JSON tree. Scalar
/// mapping keys are coerced to their text form; tags are dropped.
fn yaml_to_json(value: serde_yaml::Value) -> Result<Value, DslError> {
    use serde_yaml::Value as Yaml;

    Ok(match value {
        Yaml::Null => Value::Null,
        Yaml::Bool(b) => Value::Bool(b),
        Yaml::Number(n) => number_to_json(&n)?,
        Yaml::String(s) => Value::String(s),
        Yaml::Sequence(seq) => Value::Array(
            seq.into_iter()
                .map(yaml_to_json)
                .collect::<Result<Vec<_>, _>>()?,
        ),
        Yaml::Mapping(mapping) => {
            let mut obj = Map::new();
            for (k, v) in mapping {
                obj.insert(mapping_key(k)?, yaml_to_json(v)?);
            }
            Value::Object(obj)
        }
        Yaml::Tagged(tagged) => yaml_to_json(tagged.value)?,
    })
}

fn number_to_json(n: &serde_yaml::Number) -> Result<Value, DslError> {
    if let Some(i) = n.as_i64() {
        return Ok(Value::from(i));
    }
    if let Some(u) = n.as_u64() {
        return Ok(Value::from(u));
    }
    n.as_f64()
        .and_then(serde_json::Number::from_f64)
        .map(Value::Number)
        .ok_or_else(|| DslError::validation(format!("unsupported number '{}'", n)))
}

fn mapping_key(key: serde_yaml::Value) -> Result<String, DslError> {
    use serde_yaml::Value as Yaml;

    match key {
        Yaml::String(s) => Ok(s),
        Yaml::Number(n) => Ok(n.to_string()),
        Yaml::Bool(b) => Ok(b.to_string()),
        Yaml::Null => Ok("null".to_owned()),
        Yaml::Tagged(tagged) => mapping_key(tagged.value),
        Yaml::Sequence(_) | Yaml::Mapping(_) => Err(DslError::validation(
            "mapping keys must be scalar values",
        )),
    }
}

// ──────────────────────────────────────────────
// Tests
// ──────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    const BASIC: &str = r#"
name: Baseline
version: "2024.04"
metadata:
  owner: fiscal
rules:
  - id: R1
    name: Total divergente
    when:
      all:
        - "helpers.total_variance() > 0.1"
    then:
      inconsistency_code: TOTAL_DIVERGENTE
      severity: alto
      message_pt: Total difere
      evidence:
        variacao: "helpers.total_variance()"
        limite: 0.1
"#;

    fn validation_message(text: &str) -> String {
        match parse(text) {
            Err(DslError::Validation { message }) => message,
            other => panic!("expected validation error, got {:?}", other),
        }
    }

    #[test]
    fn parses_mapping_document() {
        let doc = parse(BASIC).unwrap();
        assert_eq!(doc.name.as_deref(), Some("Baseline"));
        assert_eq!(doc.version.as_deref(), Some("2024.04"));
        assert_eq!(doc.metadata.get("owner"), Some(&serde_json::json!("fiscal")));
        assert_eq!(doc.rules.len(), 1);

        let rule = &doc.rules[0];
        assert_eq!(rule.scope, RuleScope::Invoice);
        assert!(!rule.disabled);
        assert_eq!(
            rule.when.all,
            Some(vec![Clause::Expr("helpers.total_variance() > 0.1".into())])
        );
        assert_eq!(
            rule.then.evidence.get("variacao"),
            Some(&EvidenceValue::Expression("helpers.total_variance()".into()))
        );
        assert_eq!(
            rule.then.evidence.get("limite"),
            Some(&EvidenceValue::Literal(serde_json::json!(0.1)))
        );
    }

    #[test]
    fn parses_bare_list_document() {
        let doc = parse(
            r#"
- id: R1
  name: Regra
  scope: " item "
  when: "item.total_value > 0"
  then: {inconsistency_code: C, severity: baixo, message_pt: m}
"#,
        )
        .unwrap();
        assert!(doc.name.is_none());
        assert_eq!(doc.rules[0].scope, RuleScope::Item);
        assert_eq!(doc.rules[0].when, RuleCondition::expr("item.total_value > 0"));
    }

    #[test]
    fn trims_identity_fields() {
        let doc = parse(
            "- {id: '  R1 ', name: ' Nome ', then: {inconsistency_code: ' C ', severity: a, message_pt: m}}",
        )
        .unwrap();
        assert_eq!(doc.rules[0].id, "R1");
        assert_eq!(doc.rules[0].name, "Nome");
        assert_eq!(doc.rules[0].then.inconsistency_code, "C");
    }

    #[test]
    fn broken_yaml_is_parse_error() {
        let err = parse("rules: [unclosed").unwrap_err();
        assert!(matches!(err, DslError::Parse { .. }), "{:?}", err);
    }

    #[test]
    fn missing_rules_key_is_validation_error() {
        assert!(validation_message("name: x").contains("'rules'"));
        assert!(parse("").is_err());
        assert!(validation_message("rules: 3").contains("must be a list"));
        assert!(validation_message("42").contains("root"));
    }

    #[test]
    fn rule_errors_carry_position_and_id() {
        let msg = validation_message("- {name: x, then: {}}");
        assert!(msg.starts_with("rule #1:"), "{}", msg);
        assert!(msg.contains("'id'"));

        let msg = validation_message(
            "- {id: A, name: a, then: {inconsistency_code: C, severity: s, message_pt: m}}\n- {id: B, then: {}}",
        );
        assert!(msg.starts_with("rule #2 ('B'):"), "{}", msg);
        assert!(msg.contains("'name'"));

        assert!(validation_message("- 5").contains("must be a mapping"));
    }

    #[test]
    fn invalid_scope_rejected() {
        let msg = validation_message(
            "- {id: A, name: a, scope: linha, then: {inconsistency_code: C, severity: s, message_pt: m}}",
        );
        assert!(msg.contains("'scope'"));
        let msg = validation_message(
            "- {id: A, name: a, scope: '', then: {inconsistency_code: C, severity: s, message_pt: m}}",
        );
        assert!(msg.contains("'scope'"));
    }

    #[test]
    fn condition_shapes_validated() {
        let then = "then: {inconsistency_code: C, severity: s, message_pt: m}";
        let msg = validation_message(&format!("- {{id: A, name: a, when: {{all: 'x'}}, {}}}", then));
        assert!(msg.contains("'all' must be a list"), "{}", msg);
        let msg = validation_message(&format!("- {{id: A, name: a, when: {{any: 1}}, {}}}", then));
        assert!(msg.contains("'any' must be a list"), "{}", msg);
        let msg = validation_message(&format!("- {{id: A, name: a, when: 12, {}}}", then));
        assert!(msg.contains("'when'"), "{}", msg);
        let msg = validation_message(&format!("- {{id: A, name: a, when: {{alll: []}}, {}}}", then));
        assert!(msg.contains("unknown key 'alll'"), "{}", msg);
        let msg = validation_message(&format!("- {{id: A, name: a, when: {{all: [3]}}, {}}}", then));
        assert!(msg.contains("clauses in 'all'"), "{}", msg);
        let msg = validation_message(&format!("- {{id: A, name: a, when: '  ', {}}}", then));
        assert!(msg.contains("empty expression"), "{}", msg);
    }

    #[test]
    fn nested_conditions_and_not() {
        let doc = parse(
            r#"
- id: A
  name: a
  when:
    all:
      - "invoice.total_value > 0"
      - any: ["item.cfop == '6102'", {not: "item.cest"}]
    not:
      all: ["invoice.has_st"]
  then: {inconsistency_code: C, severity: s, message_pt: m}
"#,
        )
        .unwrap();
        let when = &doc.rules[0].when;
        let all = when.all.as_ref().unwrap();
        assert_eq!(all.len(), 2);
        let Clause::Group(group) = &all[1] else {
            panic!("expected nested group");
        };
        let any = group.any.as_ref().unwrap();
        assert_eq!(
            any[1],
            Clause::Group(RuleCondition {
                not: Some(Box::new(RuleCondition::expr("item.cest"))),
                ..RuleCondition::default()
            })
        );
        assert_eq!(
            when.not.as_deref(),
            Some(&RuleCondition::expr("invoice.has_st"))
        );
    }

    #[test]
    fn action_fields_validated() {
        let rule = |then: &str| format!("- {{id: A, name: a, then: {}}}", then);
        assert!(validation_message(&rule("[]")).contains("'then'"));
        assert!(validation_message("- {id: A, name: a}").contains("'then'"));
        assert!(validation_message(&rule("{severity: s, message_pt: m}"))
            .contains("inconsistency_code"));
        assert!(validation_message(&rule("{inconsistency_code: C, message_pt: m}"))
            .contains("severity"));
        assert!(validation_message(&rule("{inconsistency_code: C, severity: s}"))
            .contains("message_pt"));
        assert!(validation_message(&rule(
            "{inconsistency_code: C, severity: s, message_pt: m, references: [a, 1]}"
        ))
        .contains("references"));
        assert!(validation_message(&rule(
            "{inconsistency_code: C, severity: s, message_pt: m, references: a}"
        ))
        .contains("references"));
        assert!(validation_message(&rule(
            "{inconsistency_code: C, severity: s, message_pt: m, evidence: [a]}"
        ))
        .contains("evidence"));
        assert!(validation_message(&rule(
            "{inconsistency_code: C, severity: s, message_pt: m, suggestion_code: 3}"
        ))
        .contains("suggestion_code"));
    }

    #[test]
    fn evidence_keeps_authored_order() {
        let doc = parse(
            "- {id: A, name: a, then: {inconsistency_code: C, severity: s, message_pt: m, evidence: {zeta: z, alfa: 1, meio: m}}}",
        )
        .unwrap();
        let keys: Vec<&String> = doc.rules[0].then.evidence.keys().collect();
        assert_eq!(keys, vec!["zeta", "alfa", "meio"]);
        let again = parse(&doc.to_yaml().unwrap()).unwrap();
        assert_eq!(again, doc);
        let keys: Vec<&String> = again.rules[0].then.evidence.keys().collect();
        assert_eq!(keys, vec!["zeta", "alfa", "meio"]);
    }

    #[test]
    fn evidence_keys_coerced_to_strings() {
        let doc = parse(
            "- {id: A, name: a, then: {inconsistency_code: C, severity: s, message_pt: m, evidence: {1: x, true: 2}}}",
        )
        .unwrap();
        let keys: Vec<&String> = doc.rules[0].then.evidence.keys().collect();
        assert_eq!(keys, vec!["1", "true"]);
    }

    #[test]
    fn empty_suggestion_and_collections_are_absent() {
        let doc = parse(
            "- {id: A, name: a, then: {inconsistency_code: C, severity: s, message_pt: m, suggestion_code: '', references: [], evidence: {}}}",
        )
        .unwrap();
        let then = &doc.rules[0].then;
        assert!(then.suggestion_code.is_none());
        assert!(then.references.is_empty());
        assert!(then.evidence.is_empty());
    }

    #[test]
    fn disabled_must_be_boolean() {
        let doc = parse(
            "- {id: A, name: a, disabled: true, then: {inconsistency_code: C, severity: s, message_pt: m}}",
        )
        .unwrap();
        assert!(doc.rules[0].disabled);
        assert!(validation_message(
            "- {id: A, name: a, disabled: 'yes', then: {inconsistency_code: C, severity: s, message_pt: m}}"
        )
        .contains("'disabled'"));
    }

    #[test]
    fn duplicate_ids_rejected() {
        let msg = validation_message(
            "- {id: A, name: a, then: {inconsistency_code: C, severity: s, message_pt: m}}\n- {id: A, name: b, then: {inconsistency_code: C, severity: s, message_pt: m}}",
        );
        assert!(msg.contains("duplicate"), "{}", msg);
    }

    #[test]
    fn metadata_must_be_mapping_and_is_copied_verbatim() {
        assert!(validation_message("metadata: [1]\nrules: []").contains("'metadata'"));
        let doc = parse("metadata: {tags: [a, b], nested: {x: 1}}\nrules: []").unwrap();
        assert_eq!(
            serde_json::Value::Object(doc.metadata),
            serde_json::json!({"tags": ["a", "b"], "nested": {"x": 1}})
        );
    }

    #[test]
    fn materialize_prefers_embedded_yaml() {
        let payload = serde_json::json!({
            "yaml": BASIC,
            "rules": [],
            "name": "ignored",
        });
        let doc = materialize(&payload).unwrap();
        assert_eq!(doc.name.as_deref(), Some("Baseline"));
        assert_eq!(doc.rules.len(), 1);
    }

    #[test]
    fn materialize_rebuilds_from_rules_array() {
        let payload = serde_json::json!({
            "name": "Override",
            "metadata": {"org": 7},
            "rules": [{
                "id": "R9",
                "name": "Regra",
                "scope": "item",
                "when": {"any": []},
                "then": {"inconsistency_code": "C", "severity": "s", "message_pt": "m"}
            }]
        });
        let doc = materialize(&payload).unwrap();
        assert_eq!(doc.name.as_deref(), Some("Override"));
        assert_eq!(doc.rules[0].scope, RuleScope::Item);
        assert_eq!(doc.rules[0].when.any, Some(vec![]));
        assert_eq!(doc.metadata.get("org"), Some(&serde_json::json!(7)));
    }

    #[test]
    fn materialize_without_rules_is_empty() {
        assert_eq!(
            materialize(&serde_json::json!({"name": "x"})).unwrap(),
            RuleDocument::default()
        );
        assert_eq!(
            materialize(&serde_json::json!("nope")).unwrap(),
            RuleDocument::default()
        );
        let err = materialize(&serde_json::json!({"rules": [1]})).unwrap_err();
        assert!(err.is_validation());
    }
}
