//! Baseline + override composition.
//!
//! Rules are merged by `id`. Baseline order is kept for ids that survive;
//! ids that only the override introduces are appended in override order.
//! A disabled override rule removes the baseline rule with the same id.

use std::collections::HashMap;

use serde_json::{json, Map, Value};

use crate::document::{RuleDefinition, RuleDocument};
use crate::error::SerializeError;

/// Merge `overrides` on top of `baseline`, returning independent copies.
pub fn compose(baseline: &[RuleDefinition], overrides: &[RuleDefinition]) -> Vec<RuleDefinition> {
    let mut slots: Vec<Option<RuleDefinition>> = Vec::new();
    let mut index: HashMap<String, usize> = HashMap::new();

    for rule in baseline.iter().filter(|r| !r.disabled) {
        match index.get(&rule.id) {
            Some(&slot) => slots[slot] = Some(rule.clone()),
            None => {
                index.insert(rule.id.clone(), slots.len());
                slots.push(Some(rule.clone()));
            }
        }
    }

    for rule in overrides {
        if rule.disabled {
            if let Some(slot) = index.remove(&rule.id) {
                slots[slot] = None;
                tracing::debug!(rule_id = %rule.id, "override disabled baseline rule");
            }
            continue;
        }
        match index.get(&rule.id) {
            Some(&slot) => {
                slots[slot] = Some(rule.clone());
                tracing::debug!(rule_id = %rule.id, "override replaced rule");
            }
            None => {
                index.insert(rule.id.clone(), slots.len());
                slots.push(Some(rule.clone()));
                tracing::debug!(rule_id = %rule.id, "override added rule");
            }
        }
    }

    slots.into_iter().flatten().collect()
}

/// The effective rule set for one tenant: a baseline document, an optional
/// override document, and their composition.
///
/// This is a derived view; it is recomputed whenever either source changes
/// and never stored.
#[derive(Debug, Clone)]
pub struct ComposedRuleSet<'a> {
    pub baseline: &'a RuleDocument,
    pub override_doc: Option<&'a RuleDocument>,
    pub rules: Vec<RuleDefinition>,
    /// Baseline metadata with override keys layered on top.
    pub metadata: Map<String, Value>,
}

impl<'a> ComposedRuleSet<'a> {
    pub fn new(baseline: &'a RuleDocument, override_doc: Option<&'a RuleDocument>) -> Self {
        let rules = match override_doc {
            Some(o) => compose(&baseline.rules, &o.rules),
            None => compose(&baseline.rules, &[]),
        };

        let mut metadata = baseline.metadata.clone();
        if let Some(o) = override_doc {
            for (k, v) in &o.metadata {
                metadata.insert(k.clone(), v.clone());
            }
        }

        tracing::debug!(
            baseline_rules = baseline.rules.len(),
            override_rules = override_doc.map_or(0, |o| o.rules.len()),
            effective_rules = rules.len(),
            "composed rule set"
        );

        ComposedRuleSet {
            baseline,
            override_doc,
            rules,
            metadata,
        }
    }

    /// The merged document. Name and version come from the override when it
    /// sets them, otherwise from the baseline.
    pub fn document(&self) -> RuleDocument {
        let pick = |f: fn(&RuleDocument) -> &Option<String>| {
            self.override_doc
                .and_then(|o| f(o).clone())
                .or_else(|| f(self.baseline).clone())
        };
        RuleDocument {
            name: pick(|d| &d.name),
            version: pick(|d| &d.version),
            metadata: self.metadata.clone(),
            rules: self.rules.clone(),
        }
    }

    /// YAML text of the merged document.
    pub fn to_yaml(&self) -> Result<String, SerializeError> {
        self.document().to_yaml()
    }

    /// Audit metadata describing where the effective rules came from.
    pub fn provenance(&self) -> Value {
        let source = |d: &RuleDocument| json!({ "name": d.name, "version": d.version });
        json!({
            "sources": {
                "baseline": source(self.baseline),
                "override": self.override_doc.map(source),
            },
            "document": Value::Object(self.metadata.clone()),
        })
    }
}
