mod config;
mod telemetry;

use std::path::{Path, PathBuf};
use std::process;

use clap::{Parser, Subcommand, ValueEnum};
use oraculo_core::{get_rule_pack, parse, ComposedRuleSet, EvidenceValue, RuleDocument, RulePackRegistry};
use oraculo_eval::{AuditReport, EngineOptions, ErrorPolicy, Invoice, RuleEngine};

/// Output format for CLI responses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub(crate) enum OutputFormat {
    Text,
    Json,
}

/// Serialization of a composed rule document.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum DocumentFormat {
    Yaml,
    Json,
}

/// Error policy override for the audit subcommand.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum OnError {
    Abort,
    Flag,
}

impl From<OnError> for ErrorPolicy {
    fn from(value: OnError) -> Self {
        match value {
            OnError::Abort => ErrorPolicy::Abort,
            OnError::Flag => ErrorPolicy::Flag,
        }
    }
}

/// NF-e audit rule toolchain.
#[derive(Parser)]
#[command(name = "oraculo", version, about = "NF-e audit rule toolchain")]
struct Cli {
    /// Output format (text or json)
    #[arg(long, global = true, default_value = "text", value_enum)]
    output: OutputFormat,

    /// Suppress non-essential output
    #[arg(long, global = true)]
    quiet: bool,

    /// Configuration file (default: ./oraculo.toml when present)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Parse and validate a rule document, including its expressions
    Validate {
        /// Path to the YAML rule document
        file: PathBuf,
    },

    /// Merge a baseline with an override and print the effective document
    Compose {
        /// Baseline source: a file path or pack:<slug>
        #[arg(long)]
        baseline: Option<String>,
        /// Path to the tenant override document
        #[arg(long = "override")]
        override_file: Option<PathBuf>,
        /// Document format (yaml or json)
        #[arg(long, default_value = "yaml", value_enum)]
        format: DocumentFormat,
    },

    /// Audit an exported invoice against the effective rules
    Audit {
        /// Path to the invoice JSON (header fields plus an `items` array)
        #[arg(long)]
        invoice: PathBuf,
        /// Baseline source: a file path or pack:<slug>
        #[arg(long)]
        baseline: Option<String>,
        /// Path to the tenant override document
        #[arg(long = "override")]
        override_file: Option<PathBuf>,
        /// What to do when a rule expression fails
        #[arg(long, value_enum)]
        on_error: Option<OnError>,
    },

    /// Inspect the bundled rule packs
    Packs {
        #[command(subcommand)]
        command: PackCommands,
    },
}

#[derive(Subcommand)]
enum PackCommands {
    /// List bundled packs
    List,
    /// Print the DSL text of a bundled pack
    Show {
        /// Pack slug, e.g. zfm_baseline
        slug: String,
    },
}

fn main() {
    let cli = Cli::parse();

    let config = match config::load(cli.config.as_deref()) {
        Ok(c) => c,
        Err(msg) => fail(&msg, cli.output, cli.quiet),
    };

    if let Err(e) = telemetry::init(&config.logging) {
        fail(&e.to_string(), cli.output, cli.quiet);
    }

    match cli.command {
        Commands::Validate { file } => {
            cmd_validate(&file, cli.output, cli.quiet);
        }
        Commands::Compose {
            baseline,
            override_file,
            format,
        } => {
            let baseline = baseline.unwrap_or_else(|| config.audit.baseline.clone());
            cmd_compose(
                &baseline,
                override_file.as_deref(),
                format,
                cli.output,
                cli.quiet,
            );
        }
        Commands::Audit {
            invoice,
            baseline,
            override_file,
            on_error,
        } => {
            let baseline = baseline.unwrap_or_else(|| config.audit.baseline.clone());
            let options = EngineOptions {
                on_error: on_error.map_or(config.audit.on_error, ErrorPolicy::from),
            };
            cmd_audit(
                &invoice,
                &baseline,
                override_file.as_deref(),
                options,
                cli.output,
                cli.quiet,
            );
        }
        Commands::Packs { command } => match command {
            PackCommands::List => cmd_packs_list(cli.output, cli.quiet),
            PackCommands::Show { slug } => cmd_packs_show(&slug, cli.output, cli.quiet),
        },
    }
}

// ── Loading ──────────────────────────────────────────────────────────────────

/// Read and parse a rule document file.
fn load_document_file(path: &Path) -> Result<RuleDocument, String> {
    let text = std::fs::read_to_string(path)
        .map_err(|e| format!("could not read '{}': {}", path.display(), e))?;
    parse(&text).map_err(|e| format!("{}: {}", path.display(), e))
}

/// Resolve a document source: `pack:<slug>` or a file path.
fn load_document(source: &str) -> Result<RuleDocument, String> {
    let doc = match source.strip_prefix("pack:") {
        Some(slug) => {
            let pack = get_rule_pack(slug).map_err(|e| e.to_string())?;
            pack.document()
                .map_err(|e| format!("rule pack '{}': {}", slug, e))?
        }
        None => load_document_file(Path::new(source))?,
    };
    tracing::debug!(source, rules = doc.rules.len(), "loaded rule document");
    Ok(doc)
}

fn load_or_exit<T>(result: Result<T, String>, output: OutputFormat, quiet: bool) -> T {
    match result {
        Ok(value) => value,
        Err(msg) => fail(&msg, output, quiet),
    }
}

fn print_json(value: &serde_json::Value) {
    match serde_json::to_string_pretty(value) {
        Ok(text) => println!("{}", text),
        Err(e) => fail(
            &format!("failed to serialize output: {}", e),
            OutputFormat::Text,
            false,
        ),
    }
}

// ── Commands ─────────────────────────────────────────────────────────────────

fn cmd_validate(file: &Path, output: OutputFormat, quiet: bool) {
    let doc = load_or_exit(load_document_file(file), output, quiet);

    // Expressions are only parsed by the evaluator, so check them here too.
    let mut problems = Vec::new();
    for rule in &doc.rules {
        let evidence = rule.then.evidence.values().filter_map(|v| match v {
            EvidenceValue::Expression(text) => Some(text.as_str()),
            EvidenceValue::Literal(_) => None,
        });
        for text in rule.when.expressions().into_iter().chain(evidence) {
            if let Err(e) = oraculo_eval::compile(text) {
                problems.push(format!("rule '{}': `{}`: {}", rule.id, text, e));
            }
        }
    }

    if !problems.is_empty() {
        match output {
            OutputFormat::Text => {
                for p in &problems {
                    report_error(p, output, quiet);
                }
            }
            OutputFormat::Json => print_json(&serde_json::json!({
                "valid": false,
                "errors": problems,
            })),
        }
        process::exit(1);
    }

    match output {
        OutputFormat::Text => {
            if !quiet {
                println!("Valid: {} ({} rules)", file.display(), doc.rules.len());
            }
        }
        OutputFormat::Json => print_json(&serde_json::json!({
            "valid": true,
            "name": doc.name,
            "version": doc.version,
            "rules": doc.rule_ids(),
        })),
    }
}

fn cmd_compose(
    baseline_source: &str,
    override_path: Option<&Path>,
    format: DocumentFormat,
    output: OutputFormat,
    quiet: bool,
) {
    let baseline = load_or_exit(load_document(baseline_source), output, quiet);
    let override_doc = override_path.map(|p| load_or_exit(load_document_file(p), output, quiet));

    let composed = ComposedRuleSet::new(&baseline, override_doc.as_ref());
    match format {
        DocumentFormat::Yaml => match composed.to_yaml() {
            Ok(text) => print!("{}", text),
            Err(e) => fail(&e.to_string(), output, quiet),
        },
        DocumentFormat::Json => print_json(&serde_json::json!({
            "document": composed.document().to_json(),
            "provenance": composed.provenance(),
        })),
    }
}

fn cmd_audit(
    invoice_path: &Path,
    baseline_source: &str,
    override_path: Option<&Path>,
    options: EngineOptions,
    output: OutputFormat,
    quiet: bool,
) {
    let invoice_str = match std::fs::read_to_string(invoice_path) {
        Ok(s) => s,
        Err(_) => fail(
            &format!("invoice file not found: {}", invoice_path.display()),
            output,
            quiet,
        ),
    };
    let invoice_json: serde_json::Value = match serde_json::from_str(&invoice_str) {
        Ok(v) => v,
        Err(e) => fail(
            &format!("invalid JSON in {}: {}", invoice_path.display(), e),
            output,
            quiet,
        ),
    };
    let invoice = match Invoice::from_json(&invoice_json) {
        Ok(inv) => inv,
        Err(e) => fail(&format!("{}: {}", invoice_path.display(), e), output, quiet),
    };

    let baseline = load_or_exit(load_document(baseline_source), output, quiet);
    let override_doc = override_path.map(|p| load_or_exit(load_document_file(p), output, quiet));
    let composed = ComposedRuleSet::new(&baseline, override_doc.as_ref());

    let engine = RuleEngine::new(&composed.rules).with_options(options);
    let report = match engine.audit(&invoice, None) {
        Ok(r) => r,
        Err(e) => fail(&e.to_string(), output, quiet),
    };

    match output {
        OutputFormat::Text => print_report_text(&report, quiet),
        OutputFormat::Json => {
            let mut value = match serde_json::to_value(&report) {
                Ok(v) => v,
                Err(e) => fail(&e.to_string(), output, quiet),
            };
            value["provenance"] = composed.provenance();
            print_json(&value);
        }
    }
}

fn print_report_text(report: &AuditReport, quiet: bool) {
    for f in &report.findings {
        let location = match f.item_index {
            Some(i) => format!(" item {}", i),
            None => String::new(),
        };
        println!(
            "[{}] {}{} {}: {}",
            f.severity, f.rule_id, location, f.inconsistency_code, f.message_pt
        );
        if let Some(code) = &f.suggestion_code {
            println!("    suggestion: {}", code);
        }
        if !f.evidence.is_empty() {
            let pairs: Vec<String> = f
                .evidence
                .iter()
                .map(|(k, v)| format!("{}={}", k, v))
                .collect();
            println!("    evidence: {}", pairs.join(", "));
        }
    }
    for failure in &report.failures {
        println!("FAILED {}", failure);
    }
    if !quiet {
        let per_rule: Vec<String> = report
            .summary()
            .iter()
            .map(|(id, n)| format!("{} x{}", id, n))
            .collect();
        println!(
            "{} finding(s), {} failure(s), {} rule(s) evaluated{}",
            report.findings.len(),
            report.failures.len(),
            report.rules_evaluated,
            if per_rule.is_empty() {
                String::new()
            } else {
                format!(" [{}]", per_rule.join(", "))
            }
        );
    }
}

fn cmd_packs_list(output: OutputFormat, quiet: bool) {
    let registry = load_or_exit(
        RulePackRegistry::builtin().map_err(|e| e.to_string()),
        output,
        quiet,
    );
    match output {
        OutputFormat::Text => {
            for pack in registry.iter() {
                println!(
                    "{}\t{}\t{}",
                    pack.slug,
                    pack.version.as_deref().unwrap_or("-"),
                    pack.name
                );
            }
        }
        OutputFormat::Json => {
            let packs: Vec<serde_json::Value> = registry
                .iter()
                .map(|p| {
                    serde_json::json!({
                        "slug": p.slug,
                        "name": p.name,
                        "description": p.description,
                        "version": p.version,
                    })
                })
                .collect();
            print_json(&serde_json::Value::Array(packs));
        }
    }
}

fn cmd_packs_show(slug: &str, output: OutputFormat, quiet: bool) {
    let pack = load_or_exit(
        get_rule_pack(slug).map_err(|e| e.to_string()),
        output,
        quiet,
    );
    match output {
        OutputFormat::Text => print!("{}", pack.yaml),
        OutputFormat::Json => print_json(&serde_json::json!({
            "slug": pack.slug,
            "name": pack.name,
            "description": pack.description,
            "version": pack.version,
            "yaml": pack.yaml,
        })),
    }
}

fn fail(msg: &str, output: OutputFormat, quiet: bool) -> ! {
    report_error(msg, output, quiet);
    process::exit(1);
}

/// Print an error to stderr: `error: <msg>` as text, `{"error": msg}` as JSON.
pub(crate) fn report_error(msg: &str, output: OutputFormat, quiet: bool) {
    if quiet {
        return;
    }
    match output {
        OutputFormat::Text => eprintln!("error: {}", msg),
        OutputFormat::Json => {
            eprintln!("{}", serde_json::json!({ "error": msg }));
        }
    }
}
