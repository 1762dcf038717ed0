//! Configuration file for the `oraculo` binary.
//!
//! Read from `--config <path>` or, when that flag is absent, from
//! `oraculo.toml` in the working directory if one exists. Every field is
//! optional.
//!
//! # Example
//!
//! ```toml
//! [audit]
//! on_error = "flag"
//! baseline = "pack:zfm_baseline"
//!
//! [logging]
//! level = "debug"
//! format = "json"
//! ```

use std::path::Path;

use oraculo_eval::ErrorPolicy;
use serde::Deserialize;

pub const DEFAULT_CONFIG_FILE: &str = "oraculo.toml";

// ── Types ─────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    #[serde(default)]
    pub audit: AuditConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct AuditConfig {
    /// Policy when a rule expression fails during an audit.
    #[serde(default)]
    pub on_error: ErrorPolicy,
    /// Baseline source: a file path or `pack:<slug>`.
    #[serde(default = "default_baseline")]
    pub baseline: String,
}

impl Default for AuditConfig {
    fn default() -> Self {
        AuditConfig {
            on_error: ErrorPolicy::default(),
            baseline: default_baseline(),
        }
    }
}

fn default_baseline() -> String {
    "pack:zfm_baseline".to_owned()
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LoggingConfig {
    /// Filter directive used when neither `ORACULO_LOG` nor `RUST_LOG` is set.
    #[serde(default = "default_level")]
    pub level: String,
    #[serde(default)]
    pub format: LogFormat,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        LoggingConfig {
            level: default_level(),
            format: LogFormat::default(),
        }
    }
}

fn default_level() -> String {
    "warn".to_owned()
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

// ── Functions ─────────────────────────────────────────────────────────────────

/// Read and parse a config TOML file from `path`.
///
/// Returns a human-readable error string on failure.
pub fn read_config(path: &Path) -> Result<Config, String> {
    let content = std::fs::read_to_string(path)
        .map_err(|e| format!("could not read '{}': {}", path.display(), e))?;

    toml::from_str(&content).map_err(|e| format!("could not parse '{}': {}", path.display(), e))
}

/// Resolve the configuration: an explicit path must exist, the default
/// file is used only when present, otherwise defaults apply.
pub fn load(explicit: Option<&Path>) -> Result<Config, String> {
    if let Some(path) = explicit {
        return read_config(path);
    }
    let default_path = Path::new(DEFAULT_CONFIG_FILE);
    if default_path.is_file() {
        read_config(default_path)
    } else {
        Ok(Config::default())
    }
}
