//! CLI integration tests for all subcommands.
//!
//! Uses `assert_cmd` to spawn the `oraculo` binary and verify
//! exit codes, stdout content, and stderr content.
//!
//! Tests set `current_dir` to the workspace root so that relative paths
//! to the core crate's fixtures resolve, except the config-file tests,
//! which run inside a temporary directory.

use assert_cmd::cargo::cargo_bin_cmd;
use assert_cmd::Command;
use predicates::prelude::*;
use std::fs;
use std::path::{Path, PathBuf};
use tempfile::TempDir;

/// Locate the workspace root by walking up from CARGO_MANIFEST_DIR.
fn workspace_root() -> PathBuf {
    let manifest_dir = Path::new(env!("CARGO_MANIFEST_DIR"));
    // crates/cli -> workspace root is two levels up
    manifest_dir
        .parent()
        .and_then(|p| p.parent())
        .expect("workspace root")
        .to_path_buf()
}

/// Helper: create a Command for the `oraculo` binary, rooted at workspace.
fn oraculo() -> Command {
    let mut cmd = cargo_bin_cmd!("oraculo");
    cmd.current_dir(workspace_root());
    cmd.env_remove("ORACULO_LOG").env_remove("RUST_LOG");
    cmd
}

const ZFM_INVOICE: &str = r#"{
  "total_value": 95,
  "freight_value": 5,
  "has_st": false,
  "items": [
    {"cfop": "6102", "ncm": "22030000", "cest": null, "cst": "10",
     "total_value": 50, "icms_st_value": 0}
  ]
}"#;

fn write(dir: &TempDir, name: &str, content: &str) -> PathBuf {
    let path = dir.path().join(name);
    fs::write(&path, content).unwrap();
    path
}

// ──────────────────────────────────────────────
// 1. Help and version
// ──────────────────────────────────────────────

#[test]
fn help_exits_0_with_description() {
    oraculo()
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("NF-e audit rule toolchain"));
}

#[test]
fn version_exits_0() {
    oraculo()
        .arg("--version")
        .assert()
        .success()
        .stdout(predicate::str::contains("oraculo"));
}

// ──────────────────────────────────────────────
// 2. validate
// ──────────────────────────────────────────────

#[test]
fn validate_fixture_succeeds() {
    oraculo()
        .args(["validate", "crates/core/tests/fixtures/nested_conditions.yaml"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Valid:"))
        .stdout(predicate::str::contains("(2 rules)"));
}

#[test]
fn validate_json_lists_rule_ids() {
    let output = oraculo()
        .args([
            "--output",
            "json",
            "validate",
            "crates/core/tests/fixtures/bare_list.yaml",
        ])
        .output()
        .unwrap();
    assert!(output.status.success());
    let json: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    assert_eq!(json["valid"], true);
    assert_eq!(json["rules"], serde_json::json!(["L1"]));
}

#[test]
fn validate_reports_schema_errors() {
    let dir = TempDir::new().unwrap();
    let path = write(
        &dir,
        "bad.yaml",
        "rules:\n  - id: R1\n    name: Sem then\n",
    );
    oraculo()
        .arg("validate")
        .arg(&path)
        .assert()
        .failure()
        .stderr(predicate::str::contains("validation error"));
}

#[test]
fn validate_reports_expression_syntax_errors() {
    let dir = TempDir::new().unwrap();
    let path = write(
        &dir,
        "expr.yaml",
        r#"
- id: R1
  name: Expressao quebrada
  when: "invoice.total_value >"
  then:
    inconsistency_code: X
    severity: alto
    message_pt: x
"#,
    );
    oraculo()
        .arg("validate")
        .arg(&path)
        .assert()
        .failure()
        .stderr(predicate::str::starts_with("error: rule 'R1'"))
        .stderr(predicate::str::contains("syntax error"));
}

#[test]
fn validate_missing_file_fails() {
    oraculo()
        .args(["validate", "does/not/exist.yaml"])
        .assert()
        .failure()
        .stderr(predicate::str::starts_with("error: could not read 'does/not/exist.yaml'"));
}

// ──────────────────────────────────────────────
// 3. compose
// ──────────────────────────────────────────────

#[test]
fn compose_defaults_to_bundled_baseline() {
    oraculo()
        .arg("compose")
        .assert()
        .success()
        .stdout(predicate::str::contains("ZFM-TOTAL-001"))
        .stdout(predicate::str::contains("ZFM-CEST-001"));
}

#[test]
fn compose_applies_override_and_reports_provenance() {
    let dir = TempDir::new().unwrap();
    let override_path = write(
        &dir,
        "override.yaml",
        r#"
name: Tenant
version: "7"
rules:
  - id: ZFM-CEST-001
    name: off
    disabled: true
    then:
      inconsistency_code: CEST_OBRIGATORIO
      severity: baixo
      message_pt: off
"#,
    );
    let output = oraculo()
        .args(["compose", "--baseline", "pack:zfm_baseline", "--format", "json"])
        .arg("--override")
        .arg(&override_path)
        .output()
        .unwrap();
    assert!(output.status.success());
    let json: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    let ids: Vec<&str> = json["document"]["rules"]
        .as_array()
        .unwrap()
        .iter()
        .map(|r| r["id"].as_str().unwrap())
        .collect();
    assert_eq!(ids, vec!["ZFM-TOTAL-001", "ZFM-ST-001"]);
    assert_eq!(json["document"]["name"], "Tenant");
    assert_eq!(json["provenance"]["sources"]["baseline"]["version"], "2024.04");
    assert_eq!(json["provenance"]["sources"]["override"]["name"], "Tenant");
}

#[test]
fn compose_unknown_pack_fails() {
    oraculo()
        .args(["compose", "--baseline", "pack:nope"])
        .assert()
        .failure()
        .stderr(predicate::str::starts_with("error: rule pack 'nope' not found"));
}

// ──────────────────────────────────────────────
// 4. audit
// ──────────────────────────────────────────────

#[test]
fn audit_prints_findings_as_text() {
    let dir = TempDir::new().unwrap();
    let invoice = write(&dir, "nfe.json", ZFM_INVOICE);
    oraculo()
        .arg("audit")
        .arg("--invoice")
        .arg(&invoice)
        .assert()
        .success()
        .stdout(predicate::str::contains("[alto] ZFM-TOTAL-001 TOTAL_DIVERGENTE"))
        .stdout(predicate::str::contains("[medio] ZFM-ST-001 item 0"))
        .stdout(predicate::str::contains("suggestion: REGULARIZAR_ST"))
        .stdout(predicate::str::contains("3 finding(s), 0 failure(s)"));
}

#[test]
fn audit_json_contains_findings_and_provenance() {
    let dir = TempDir::new().unwrap();
    let invoice = write(&dir, "nfe.json", ZFM_INVOICE);
    let output = oraculo()
        .args(["--output", "json", "audit", "--invoice"])
        .arg(&invoice)
        .output()
        .unwrap();
    assert!(output.status.success());
    let json: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    let findings = json["findings"].as_array().unwrap();
    assert_eq!(findings.len(), 3);
    assert_eq!(findings[0]["evidence"]["variacao"], 40.0);
    assert_eq!(findings[1]["item_index"], 0);
    assert_eq!(json["failures"], serde_json::json!([]));
    assert_eq!(json["rules_evaluated"], 3);
    assert_eq!(json["provenance"]["sources"]["baseline"]["name"], "Pacote ZFM");
}

fn broken_override(dir: &TempDir) -> PathBuf {
    write(
        dir,
        "broken.yaml",
        r#"
- id: QUEBRADA
  name: Quebrada
  when: invoice.peso > 1
  then:
    inconsistency_code: X
    severity: baixo
    message_pt: x
"#,
    )
}

#[test]
fn audit_aborts_on_expression_error_by_default() {
    let dir = TempDir::new().unwrap();
    let invoice = write(&dir, "nfe.json", ZFM_INVOICE);
    let broken = broken_override(&dir);
    oraculo()
        .arg("audit")
        .arg("--invoice")
        .arg(&invoice)
        .arg("--override")
        .arg(&broken)
        .assert()
        .failure()
        .stderr(predicate::str::contains("rule 'QUEBRADA'"))
        .stderr(predicate::str::contains("no attribute 'peso'"));
}

#[test]
fn audit_flag_policy_reports_failure_and_continues() {
    let dir = TempDir::new().unwrap();
    let invoice = write(&dir, "nfe.json", ZFM_INVOICE);
    let broken = broken_override(&dir);
    oraculo()
        .arg("audit")
        .arg("--invoice")
        .arg(&invoice)
        .arg("--override")
        .arg(&broken)
        .args(["--on-error", "flag"])
        .assert()
        .success()
        .stdout(predicate::str::contains("FAILED rule 'QUEBRADA'"))
        .stdout(predicate::str::contains("3 finding(s), 1 failure(s)"));
}

#[test]
fn audit_rejects_non_object_invoice() {
    let dir = TempDir::new().unwrap();
    let invoice = write(&dir, "nfe.json", "[1, 2]");
    oraculo()
        .arg("audit")
        .arg("--invoice")
        .arg(&invoice)
        .assert()
        .failure()
        .stderr(predicate::str::contains("invoice must be a JSON object"));
}

#[test]
fn audit_error_is_json_under_json_output() {
    let output = oraculo()
        .args(["--output", "json", "audit", "--invoice", "missing.json"])
        .output()
        .unwrap();
    assert!(!output.status.success());
    let json: serde_json::Value = serde_json::from_slice(&output.stderr).unwrap();
    assert!(json["error"]
        .as_str()
        .unwrap()
        .contains("invoice file not found"));
}

// ──────────────────────────────────────────────
// 5. packs
// ──────────────────────────────────────────────

#[test]
fn packs_list_shows_bundled_pack() {
    oraculo()
        .args(["packs", "list"])
        .assert()
        .success()
        .stdout(predicate::str::contains("zfm_baseline\t2024.04\tPacote ZFM"));
}

#[test]
fn packs_show_prints_dsl_text() {
    oraculo()
        .args(["packs", "show", "zfm_baseline"])
        .assert()
        .success()
        .stdout(predicate::str::contains("id: ZFM-ST-001"));
}

#[test]
fn packs_show_unknown_slug_fails() {
    oraculo()
        .args(["packs", "show", "nope"])
        .assert()
        .failure()
        .stderr(predicate::str::starts_with("error: rule pack 'nope' not found"))
        .stderr(predicate::str::contains("error: error").not());
}

#[test]
fn errors_carry_a_single_prefix() {
    let dir = TempDir::new().unwrap();
    let invoice = write(&dir, "nfe.json", ZFM_INVOICE);
    let broken = broken_override(&dir);
    let assert = oraculo()
        .arg("audit")
        .arg("--invoice")
        .arg(&invoice)
        .arg("--override")
        .arg(&broken)
        .assert()
        .failure();
    let stderr = String::from_utf8_lossy(&assert.get_output().stderr).into_owned();
    assert_eq!(stderr.matches("error:").count(), 1, "{}", stderr);

    let output = oraculo()
        .args(["--output", "json", "packs", "show", "nope"])
        .output()
        .unwrap();
    let json: serde_json::Value = serde_json::from_slice(&output.stderr).unwrap();
    assert_eq!(json["error"], "rule pack 'nope' not found");
}

// ──────────────────────────────────────────────
// 6. Configuration file
// ──────────────────────────────────────────────

#[test]
fn config_file_in_working_directory_sets_policy() {
    let dir = TempDir::new().unwrap();
    write(&dir, "oraculo.toml", "[audit]\non_error = \"flag\"\n");
    let invoice = write(&dir, "nfe.json", ZFM_INVOICE);
    let broken = broken_override(&dir);
    let mut cmd = cargo_bin_cmd!("oraculo");
    cmd.current_dir(dir.path())
        .env_remove("ORACULO_LOG")
        .env_remove("RUST_LOG")
        .arg("audit")
        .arg("--invoice")
        .arg(&invoice)
        .arg("--override")
        .arg(&broken)
        .assert()
        .success()
        .stdout(predicate::str::contains("1 failure(s)"));
}

#[test]
fn config_with_unknown_key_is_rejected() {
    let dir = TempDir::new().unwrap();
    let config = write(&dir, "custom.toml", "[audit]\nbaseline_path = \"x\"\n");
    oraculo()
        .arg("--config")
        .arg(&config)
        .args(["packs", "list"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("could not parse"));
}
