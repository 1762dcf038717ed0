//! Built-in rule packs.
//!
//! Packs ship as DSL text compiled into the binary. Every pack is parsed
//! when the registry is built so a malformed pack fails at startup, but the
//! registry hands out the raw text: the text stays the single canonical
//! form and callers parse it again when they need the structured document.

use crate::document::RuleDocument;
use crate::error::{DslError, PackError};
use crate::parser;

/// A named, versioned rule document distributed with the application.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RulePack {
    pub slug: String,
    pub name: String,
    pub description: String,
    pub version: Option<String>,
    pub yaml: String,
}

impl RulePack {
    /// Parse the pack text.
    pub fn document(&self) -> Result<RuleDocument, DslError> {
        parser::parse(&self.yaml)
    }
}

struct BuiltinPack {
    slug: &'static str,
    name: &'static str,
    description: &'static str,
    version: Option<&'static str>,
    text: &'static str,
}

const BUILTIN_PACKS: &[BuiltinPack] = &[BuiltinPack {
    slug: "zfm_baseline",
    name: "Pacote ZFM",
    description: "Conjunto inicial de regras fiscais para operações com Zona Franca de Manaus.",
    version: Some("2024.04"),
    text: include_str!("../packs/zfm_baseline.yaml"),
}];

/// Read-only catalog of rule packs, keyed by slug.
#[derive(Debug, Clone)]
pub struct RulePackRegistry {
    packs: Vec<RulePack>,
}

impl RulePackRegistry {
    /// The packs bundled with this crate.
    pub fn builtin() -> Result<Self, PackError> {
        Self::from_packs(BUILTIN_PACKS.iter().map(|p| RulePack {
            slug: p.slug.to_owned(),
            name: p.name.to_owned(),
            description: p.description.to_owned(),
            version: p.version.map(str::to_owned),
            yaml: p.text.to_owned(),
        }))
    }

    /// Build a registry from arbitrary packs, validating each one.
    pub fn from_packs(packs: impl IntoIterator<Item = RulePack>) -> Result<Self, PackError> {
        let packs: Vec<RulePack> = packs.into_iter().collect();
        for pack in &packs {
            let doc = pack.document().map_err(|source| PackError::Invalid {
                slug: pack.slug.clone(),
                source,
            })?;
            tracing::debug!(slug = %pack.slug, rules = doc.rules.len(), "loaded rule pack");
        }
        Ok(RulePackRegistry { packs })
    }

    pub fn get(&self, slug: &str) -> Result<&RulePack, PackError> {
        self.packs
            .iter()
            .find(|p| p.slug == slug)
            .ok_or_else(|| PackError::NotFound {
                slug: slug.to_owned(),
            })
    }

    pub fn iter(&self) -> impl Iterator<Item = &RulePack> {
        self.packs.iter()
    }

    pub fn len(&self) -> usize {
        self.packs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.packs.is_empty()
    }
}

/// Look up a bundled pack by slug.
pub fn get_rule_pack(slug: &str) -> Result<RulePack, PackError> {
    RulePackRegistry::builtin()?.get(slug).cloned()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builtin_registry_loads() {
        let registry = RulePackRegistry::builtin().unwrap();
        assert_eq!(registry.len(), 1);
        let pack = registry.get("zfm_baseline").unwrap();
        assert_eq!(pack.version.as_deref(), Some("2024.04"));
        assert!(pack.yaml.contains("ZFM-TOTAL-001"));
    }

    #[test]
    fn builtin_pack_document_matches_catalog_version() {
        let pack = get_rule_pack("zfm_baseline").unwrap();
        let doc = pack.document().unwrap();
        assert_eq!(doc.version, pack.version);
        assert_eq!(
            doc.rule_ids(),
            vec!["ZFM-TOTAL-001", "ZFM-ST-001", "ZFM-CEST-001"]
        );
    }

    #[test]
    fn unknown_slug_is_not_found() {
        let err = get_rule_pack("nao_existe").unwrap_err();
        assert_eq!(
            err,
            PackError::NotFound {
                slug: "nao_existe".into()
            }
        );
    }

    #[test]
    fn malformed_pack_fails_registry_construction() {
        let bad = RulePack {
            slug: "quebrado".into(),
            name: "Quebrado".into(),
            description: String::new(),
            version: None,
            yaml: "rules:\n  - id: X\n".into(),
        };
        let err = RulePackRegistry::from_packs([bad]).unwrap_err();
        assert!(matches!(err, PackError::Invalid { ref slug, .. } if slug == "quebrado"));
    }
}
