//! Rule engine: applies a rule set to one invoice and its items.
//!
//! Rules run in document order. Item-scoped rules run once per item, in
//! item order; invoice-scoped rules run once. Each matching pair yields one
//! [`Finding`]. Expressions are compiled once when the engine is built.

use std::collections::HashMap;

use oraculo_core::{Clause, EvidenceValue, RuleCondition, RuleDefinition, RuleDocument, RuleScope};
use serde::{Deserialize, Serialize, Serializer};

use crate::ast::Expr;
use crate::error::{EvalError, RuleError};
use crate::evaluator::{compile, Context, Evaluator};
use crate::helpers::RuleHelper;
use crate::record::{Invoice, Item};
use crate::value::Value;

// ──────────────────────────────────────────────
// Options
// ──────────────────────────────────────────────

/// What an audit does when a rule expression fails.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ErrorPolicy {
    /// Stop at the first failure and return it.
    #[default]
    Abort,
    /// Record the failure, skip that rule for that invoice or item, and
    /// keep going.
    Flag,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct EngineOptions {
    #[serde(default)]
    pub on_error: ErrorPolicy,
}

// ──────────────────────────────────────────────
// Results
// ──────────────────────────────────────────────

/// One matched rule against the invoice or one of its items.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Finding {
    pub rule_id: String,
    pub name: String,
    pub inconsistency_code: String,
    pub severity: String,
    pub message_pt: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub suggestion_code: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub references: Vec<String>,
    #[serde(skip_serializing_if = "serde_json::Map::is_empty")]
    pub evidence: serde_json::Map<String, serde_json::Value>,
    /// Zero-based position of the triggering item; `None` for
    /// invoice-scoped rules.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub item_index: Option<usize>,
}

/// Findings plus the rule failures collected under [`ErrorPolicy::Flag`].
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct AuditReport {
    pub findings: Vec<Finding>,
    #[serde(serialize_with = "serialize_failures")]
    pub failures: Vec<RuleError>,
    pub rules_evaluated: usize,
}

impl AuditReport {
    pub fn is_clean(&self) -> bool {
        self.findings.is_empty() && self.failures.is_empty()
    }

    /// Finding count per rule id, in order of first appearance.
    pub fn summary(&self) -> Vec<(&str, usize)> {
        let mut counts: Vec<(&str, usize)> = Vec::new();
        for finding in &self.findings {
            match counts.iter_mut().find(|(id, _)| *id == finding.rule_id) {
                Some((_, n)) => *n += 1,
                None => counts.push((&finding.rule_id, 1)),
            }
        }
        counts
    }
}

#[derive(Serialize)]
struct FailureView<'a> {
    rule_id: &'a str,
    expression: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    item_index: Option<usize>,
    error: String,
}

fn serialize_failures<S: Serializer>(failures: &[RuleError], s: S) -> Result<S::Ok, S::Error> {
    s.collect_seq(failures.iter().map(|f| FailureView {
        rule_id: &f.rule_id,
        expression: &f.expression,
        item_index: f.item_index,
        error: f.source.to_string(),
    }))
}

// ──────────────────────────────────────────────
// Compiled rules
// ──────────────────────────────────────────────

/// An expression failure before it is attributed to an item.
struct Failure<'r> {
    expression: &'r str,
    source: EvalError,
}

#[derive(Debug, Clone)]
struct CompiledRule {
    rule: RuleDefinition,
    /// Every condition and evidence expression, keyed by its text.
    expressions: HashMap<String, Result<Expr, EvalError>>,
}

impl CompiledRule {
    fn new(rule: &RuleDefinition) -> Self {
        let evidence = rule.then.evidence.values().filter_map(|v| match v {
            EvidenceValue::Expression(text) => Some(text.as_str()),
            EvidenceValue::Literal(_) => None,
        });
        let expressions = rule
            .when
            .expressions()
            .into_iter()
            .chain(evidence)
            .map(|text| (text.to_owned(), compile(text)))
            .collect();
        CompiledRule {
            rule: rule.clone(),
            expressions,
        }
    }

    fn expression<'r>(&'r self, text: &'r str) -> Result<&'r Expr, Failure<'r>> {
        let compiled = match self.expressions.get(text) {
            Some(compiled) => compiled,
            None => {
                return Err(Failure {
                    expression: text,
                    source: EvalError::syntax(0, "expression was not compiled"),
                })
            }
        };
        compiled.as_ref().map_err(|source| Failure {
            expression: text,
            source: source.clone(),
        })
    }

    fn evaluate<'r>(&'r self, evaluator: &Evaluator<'_>, text: &'r str) -> Result<Value, Failure<'r>> {
        let expr = self.expression(text)?;
        evaluator.eval(expr).map_err(|source| Failure {
            expression: text,
            source,
        })
    }

    fn clause<'r>(&'r self, evaluator: &Evaluator<'_>, clause: &'r Clause) -> Result<bool, Failure<'r>> {
        match clause {
            Clause::Expr(text) => {
                let expr = self.expression(text)?;
                evaluator.test(expr).map_err(|source| Failure {
                    expression: text,
                    source,
                })
            }
            Clause::Group(inner) => self.matches(evaluator, inner),
        }
    }

    /// `all` needs every clause, a non-empty `any` needs one, an empty
    /// `any` passes, and a matching `not` blocks.
    fn matches<'r>(
        &'r self,
        evaluator: &Evaluator<'_>,
        condition: &'r RuleCondition,
    ) -> Result<bool, Failure<'r>> {
        if let Some(all) = &condition.all {
            for clause in all {
                if !self.clause(evaluator, clause)? {
                    return Ok(false);
                }
            }
        }
        if let Some(any) = &condition.any {
            if !any.is_empty() {
                let mut hit = false;
                for clause in any {
                    if self.clause(evaluator, clause)? {
                        hit = true;
                        break;
                    }
                }
                if !hit {
                    return Ok(false);
                }
            }
        }
        if let Some(inner) = &condition.not {
            if self.matches(evaluator, inner)? {
                return Ok(false);
            }
        }
        Ok(true)
    }

    fn finding<'r>(
        &'r self,
        evaluator: &Evaluator<'_>,
        item_index: Option<usize>,
    ) -> Result<Finding, Failure<'r>> {
        let action = &self.rule.then;
        let mut evidence = serde_json::Map::new();
        for (key, entry) in &action.evidence {
            let value = match entry {
                EvidenceValue::Literal(literal) => literal.clone(),
                EvidenceValue::Expression(text) => {
                    self.evaluate(evaluator, text)?.to_evidence_json()
                }
            };
            evidence.insert(key.clone(), value);
        }
        Ok(Finding {
            rule_id: self.rule.id.clone(),
            name: self.rule.name.clone(),
            inconsistency_code: action.inconsistency_code.clone(),
            severity: action.severity.clone(),
            message_pt: action.message_pt.clone(),
            suggestion_code: action.suggestion_code.clone(),
            references: action.references.clone(),
            evidence,
            item_index,
        })
    }
}

// ──────────────────────────────────────────────
// Engine
// ──────────────────────────────────────────────

/// A compiled, enabled rule set. Immutable once built, so one engine can
/// serve concurrent audits.
#[derive(Debug, Clone)]
pub struct RuleEngine {
    rules: Vec<CompiledRule>,
    options: EngineOptions,
}

impl RuleEngine {
    /// Build from an ordered rule list. Disabled rules are dropped here and
    /// never evaluated.
    pub fn new(rules: &[RuleDefinition]) -> Self {
        let rules: Vec<CompiledRule> = rules
            .iter()
            .filter(|r| !r.disabled)
            .map(CompiledRule::new)
            .collect();
        tracing::debug!(rules = rules.len(), "rule engine built");
        RuleEngine {
            rules,
            options: EngineOptions::default(),
        }
    }

    pub fn from_document(document: &RuleDocument) -> Self {
        RuleEngine::new(&document.rules)
    }

    pub fn with_options(mut self, options: EngineOptions) -> Self {
        self.options = options;
        self
    }

    pub fn options(&self) -> EngineOptions {
        self.options
    }

    pub fn rules(&self) -> impl Iterator<Item = &RuleDefinition> {
        self.rules.iter().map(|c| &c.rule)
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    /// Expressions that failed to compile, one error per rule and text.
    /// They would fail again at evaluation time; this surfaces them early.
    pub fn compile_errors(&self) -> Vec<RuleError> {
        let mut errors = Vec::new();
        for compiled in &self.rules {
            let mut failed: Vec<(&String, &EvalError)> = compiled
                .expressions
                .iter()
                .filter_map(|(text, result)| result.as_ref().err().map(|e| (text, e)))
                .collect();
            failed.sort_by(|a, b| a.0.cmp(b.0));
            errors.extend(failed.into_iter().map(|(text, source)| RuleError {
                rule_id: compiled.rule.id.clone(),
                expression: text.clone(),
                item_index: None,
                source: source.clone(),
            }));
        }
        errors
    }

    /// Evaluate every rule against `invoice`. `items` defaults to the
    /// invoice's own items. The first expression failure aborts the call,
    /// whatever the configured policy.
    pub fn evaluate(&self, invoice: &Invoice, items: Option<&[Item]>) -> Result<Vec<Finding>, RuleError> {
        self.run(invoice, items, ErrorPolicy::Abort)
            .map(|report| report.findings)
    }

    /// Like [`evaluate`](Self::evaluate) but honours the configured
    /// [`ErrorPolicy`] and reports failures alongside findings.
    pub fn audit(&self, invoice: &Invoice, items: Option<&[Item]>) -> Result<AuditReport, RuleError> {
        self.run(invoice, items, self.options.on_error)
    }

    fn run(
        &self,
        invoice: &Invoice,
        items: Option<&[Item]>,
        policy: ErrorPolicy,
    ) -> Result<AuditReport, RuleError> {
        let items = items.unwrap_or_else(|| invoice.items());
        let helper = RuleHelper::new(invoice, items);
        let invoice_value = invoice.to_value();
        let item_values: Vec<Value> = if self.rules.iter().any(|c| c.rule.scope == RuleScope::Item) {
            items.iter().map(Item::to_value).collect()
        } else {
            Vec::new()
        };

        let mut report = AuditReport::default();
        for compiled in &self.rules {
            report.rules_evaluated += 1;
            match compiled.rule.scope {
                RuleScope::Invoice => {
                    let context = Context::new()
                        .bind("invoice", &invoice_value)
                        .with_helpers(helper);
                    apply(compiled, context, None, policy, &mut report)?;
                }
                RuleScope::Item => {
                    for (index, item_value) in item_values.iter().enumerate() {
                        let context = Context::new()
                            .bind("invoice", &invoice_value)
                            .bind("item", item_value)
                            .with_helpers(helper);
                        apply(compiled, context, Some(index), policy, &mut report)?;
                    }
                }
            }
        }

        tracing::info!(
            rules = report.rules_evaluated,
            items = items.len(),
            findings = report.findings.len(),
            failures = report.failures.len(),
            "audit finished"
        );
        Ok(report)
    }
}

fn apply(
    compiled: &CompiledRule,
    context: Context<'_>,
    item_index: Option<usize>,
    policy: ErrorPolicy,
    report: &mut AuditReport,
) -> Result<(), RuleError> {
    let evaluator = Evaluator::new(context);
    let outcome = compiled
        .matches(&evaluator, &compiled.rule.when)
        .and_then(|matched| {
            if matched {
                compiled.finding(&evaluator, item_index).map(Some)
            } else {
                Ok(None)
            }
        });

    match outcome {
        Ok(Some(finding)) => {
            tracing::debug!(rule_id = %finding.rule_id, item_index = ?item_index, "rule matched");
            report.findings.push(finding);
        }
        Ok(None) => {
            tracing::debug!(rule_id = %compiled.rule.id, item_index = ?item_index, "rule did not match");
        }
        Err(failure) => {
            let error = RuleError {
                rule_id: compiled.rule.id.clone(),
                expression: failure.expression.to_owned(),
                item_index,
                source: failure.source,
            };
            match policy {
                ErrorPolicy::Abort => return Err(error),
                ErrorPolicy::Flag => {
                    tracing::warn!(
                        rule_id = %error.rule_id,
                        item_index = ?item_index,
                        error = %error.source,
                        "rule evaluation failed"
                    );
                    report.failures.push(error);
                }
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use oraculo_core::RuleAction;

    fn action() -> RuleAction {
        RuleAction::new("CODE", "alto", "mensagem")
    }

    fn rule(id: &str, when: RuleCondition) -> RuleDefinition {
        RuleDefinition::new(id, id, action()).with_when(when)
    }

    fn ids(findings: &[Finding]) -> Vec<&str> {
        findings.iter().map(|f| f.rule_id.as_str()).collect()
    }

    fn invoice() -> Invoice {
        Invoice::new().with("total_value", 10).with("uf", "AM")
    }

    #[test]
    fn empty_condition_always_matches() {
        let engine = RuleEngine::new(&[rule("R1", RuleCondition::default())]);
        assert_eq!(ids(&engine.evaluate(&invoice(), None).unwrap()), vec!["R1"]);
    }

    #[test]
    fn empty_any_is_vacuously_true() {
        let when = RuleCondition {
            any: Some(vec![]),
            ..RuleCondition::default()
        };
        let engine = RuleEngine::new(&[rule("R1", when)]);
        assert_eq!(engine.evaluate(&invoice(), None).unwrap().len(), 1);
    }

    #[test]
    fn all_any_and_not_combine() {
        let when = RuleCondition {
            all: Some(vec![Clause::Expr("invoice.total_value > 5".into())]),
            any: Some(vec![
                Clause::Expr("invoice.uf == 'SP'".into()),
                Clause::Group(RuleCondition::expr("invoice.uf == 'AM'")),
            ]),
            not: Some(Box::new(RuleCondition::expr("invoice.total_value > 100"))),
        };
        let blocked = RuleCondition {
            not: Some(Box::new(RuleCondition::expr("invoice.uf == 'AM'"))),
            ..RuleCondition::default()
        };
        let none_of_any = RuleCondition {
            any: Some(vec![Clause::Expr("False".into()), Clause::Expr("0".into())]),
            ..RuleCondition::default()
        };
        let engine = RuleEngine::new(&[
            rule("MATCH", when),
            rule("BLOCKED", blocked),
            rule("NONE", none_of_any),
        ]);
        assert_eq!(ids(&engine.evaluate(&invoice(), None).unwrap()), vec!["MATCH"]);
    }

    #[test]
    fn all_short_circuits_before_failing_clause() {
        let when = RuleCondition {
            all: Some(vec![
                Clause::Expr("False".into()),
                Clause::Expr("invoice.missing > 1".into()),
            ]),
            ..RuleCondition::default()
        };
        let engine = RuleEngine::new(&[rule("R1", when)]);
        assert!(engine.evaluate(&invoice(), None).unwrap().is_empty());
    }

    #[test]
    fn disabled_rules_are_dropped_at_construction() {
        let engine = RuleEngine::new(&[
            rule("ON", RuleCondition::default()),
            rule("OFF", RuleCondition::default()).disabled(),
        ]);
        assert_eq!(engine.len(), 1);
        assert_eq!(ids(&engine.evaluate(&invoice(), None).unwrap()), vec!["ON"]);
    }

    #[test]
    fn evidence_mixes_literals_and_expressions() {
        let mut act = action();
        act.evidence.insert(
            "uf".into(),
            EvidenceValue::Expression("invoice.uf".into()),
        );
        act.evidence.insert(
            "limite".into(),
            EvidenceValue::Literal(serde_json::json!(5)),
        );
        act.evidence.insert(
            "metade".into(),
            EvidenceValue::Expression("invoice.total_value / 4".into()),
        );
        let engine = RuleEngine::new(&[RuleDefinition::new("R1", "R1", act)]);
        let findings = engine.evaluate(&invoice(), None).unwrap();
        let evidence = &findings[0].evidence;
        assert_eq!(evidence["uf"], serde_json::json!("AM"));
        assert_eq!(evidence["limite"], serde_json::json!(5));
        assert_eq!(evidence["metade"], serde_json::json!(2.5));
    }

    #[test]
    fn failure_identifies_rule_and_expression() {
        let engine = RuleEngine::new(&[
            rule("OK", RuleCondition::default()),
            rule("BAD", RuleCondition::expr("invoice.nope == 1")),
        ]);
        let err = engine.evaluate(&invoice(), None).unwrap_err();
        assert_eq!(err.rule_id, "BAD");
        assert_eq!(err.expression, "invoice.nope == 1");
        assert_eq!(err.item_index, None);
        assert!(matches!(err.source, EvalError::UnknownAttribute { .. }));
    }

    #[test]
    fn flag_policy_keeps_other_rules() {
        let engine = RuleEngine::new(&[
            rule("BAD", RuleCondition::expr("1 +")),
            rule("OK", RuleCondition::expr("invoice.uf == 'AM'")),
        ])
        .with_options(EngineOptions {
            on_error: ErrorPolicy::Flag,
        });
        let report = engine.audit(&invoice(), None).unwrap();
        assert_eq!(ids(&report.findings), vec!["OK"]);
        assert_eq!(report.failures.len(), 1);
        assert!(matches!(report.failures[0].source, EvalError::Syntax { .. }));
        assert_eq!(report.rules_evaluated, 2);

        // evaluate() stays strict
        assert!(engine.evaluate(&invoice(), None).is_err());
    }

    #[test]
    fn compile_errors_are_listed_up_front() {
        let engine = RuleEngine::new(&[
            rule("BAD", RuleCondition::expr("import os")),
            rule("OK", RuleCondition::expr("1 == 1")),
        ]);
        let errors = engine.compile_errors();
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].rule_id, "BAD");
    }

    #[test]
    fn report_serializes_failures_as_text() {
        let engine = RuleEngine::new(&[rule("BAD", RuleCondition::expr("x"))]).with_options(
            EngineOptions {
                on_error: ErrorPolicy::Flag,
            },
        );
        let report = engine.audit(&invoice(), None).unwrap();
        let json = serde_json::to_value(&report).unwrap();
        assert_eq!(json["failures"][0]["rule_id"], "BAD");
        assert_eq!(json["failures"][0]["error"], "name 'x' is not defined");
        assert_eq!(json["rules_evaluated"], 1);
        assert!(!report.is_clean());
    }

    #[test]
    fn error_policy_reads_lowercase() {
        let opts: EngineOptions = serde_json::from_str(r#"{"on_error": "flag"}"#).unwrap();
        assert_eq!(opts.on_error, ErrorPolicy::Flag);
        let opts: EngineOptions = serde_json::from_str("{}").unwrap();
        assert_eq!(opts.on_error, ErrorPolicy::Abort);
    }
}
