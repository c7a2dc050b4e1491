//! Exocortex: personal records kept as YAML files on disk.
//!
//! Recipes, job analyses and reading items live one file per record under a
//! per-collection root. A record's `status` decides its folder, so changing
//! the status moves the file:
//!
//! ```text
//! ~/exocortex-data/recipe-manager/recipes/
//!     to-try/shakshuka.yaml
//!     perfected/banana-bread.yaml
//! ```
//!
//! # Guarantees
//!
//! - **Contained**: the store never reads, writes or removes outside the root
//! - **Write before delete**: an interrupted move leaves a duplicate, never a loss
//! - **Clean tags**: stored tags are trimmed, unique and non-empty
//! - **Audited**: every mutation attempt is appended to a JSONL event log
//!
//! # Examples
//!
//! ```bash
//! # Move a recipe to tried/
//! exocortex status ~/exocortex-data/recipe-manager/recipes/to-try/shakshuka.yaml Tried
//!
//! # Replace its tags
//! exocortex tags ~/exocortex-data/recipe-manager/recipes/tried/shakshuka.yaml breakfast eggs
//!
//! # Look for misfiled or duplicated records
//! exocortex check
//! ```
//!
//! # Crate Structure
//!
//! - [`core`]: configuration, errors, filesystem seam, audit log
//! - [`plugins`]: the record store and recipe validation

pub mod core;
pub mod plugins;

mod cli;

use crate::cli::{Cli, CollectionArgs, Command};
use crate::core::broker::MutationBroker;
use crate::core::config::{self, ResolvedConfig};
use crate::core::error::ExocortexError;
use crate::core::output;
use crate::core::store::Collection;
use crate::core::time;
use crate::plugins::recipes;
use crate::plugins::records::{self, MutationReport, Record, RecordStore};

use clap::Parser;
use colored::Colorize;
use serde_json::json;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum OutputFormat {
    Text,
    Json,
}

fn parse_format(format: &str) -> Result<OutputFormat, ExocortexError> {
    match format {
        "text" => Ok(OutputFormat::Text),
        "json" => Ok(OutputFormat::Json),
        other => Err(ExocortexError::ValidationError(format!(
            "Unknown format '{}'. Expected 'text' or 'json'",
            other
        ))),
    }
}

fn print_envelope(cmd: &str, ok: bool, extra: serde_json::Value) -> Result<(), ExocortexError> {
    let env = time::command_envelope(cmd, if ok { "ok" } else { "error" }, extra);
    let text = serde_json::to_string_pretty(&env)
        .map_err(|e| ExocortexError::ValidationError(format!("encode output: {}", e)))?;
    println!("{}", text);
    Ok(())
}

fn open_store(
    config: &ResolvedConfig,
    args: &CollectionArgs,
) -> Result<RecordStore, ExocortexError> {
    let collection: Collection = args.collection.parse()?;
    let mut store = config.store(collection);
    if let Some(root) = &args.root {
        store.root = root.clone();
    }
    let records = RecordStore::new(store);
    Ok(match &config.audit_log {
        Some(path) => records.with_broker(MutationBroker::new(path, &config.actor)),
        None => records,
    })
}

fn record_json(record: &Record) -> Result<serde_json::Value, ExocortexError> {
    let data = serde_json::to_value(&record.data).map_err(|e| {
        ExocortexError::MalformedRecord {
            path: record.location.clone(),
            reason: format!("not representable as JSON: {}", e),
        }
    })?;
    Ok(json!({
        "id": record.id(),
        "location": record.location,
        "folder": record.folder(),
        "status": record.status(),
        "tags": record.tags(),
        "data": data,
    }))
}

fn emit_mutation(
    cmd: &str,
    format: OutputFormat,
    report: &MutationReport,
) -> Result<(), ExocortexError> {
    match format {
        OutputFormat::Json => {
            let extra = serde_json::to_value(report)
                .map_err(|e| ExocortexError::ValidationError(format!("encode report: {}", e)))?;
            print_envelope(cmd, report.success, extra)
        }
        OutputFormat::Text => {
            if report.success {
                let id = report.record_id.as_deref().unwrap_or("?");
                let location = report.new_location.as_deref().unwrap_or("?");
                match &report.tags {
                    Some(tags) => println!(
                        "{} {} tags {}",
                        "✓".bright_green(),
                        id.bright_white(),
                        output::tag_list(tags)
                    ),
                    None => println!("{} {} → {}", "✓".bright_green(), id.bright_white(), location),
                }
            }
            Ok(())
        }
    }
}

pub fn run() -> Result<(), ExocortexError> {
    let cli = Cli::parse();
    let config_path = cli.config.as_deref();

    match cli.command {
        Command::Version => {
            println!("v{}", env!("CARGO_PKG_VERSION"));
            Ok(())
        }
        Command::Paths { format } => {
            let format = parse_format(&format)?;
            let config = config::load_config(config_path)?;
            show_paths(&config, format)
        }
        Command::Status {
            path,
            new_status,
            args,
        } => {
            let format = parse_format(&args.format)?;
            let config = config::load_config(config_path)?;
            let store = open_store(&config, &args)?;
            let result = store.set_status(&path, &new_status);
            emit_mutation("records.status", format, &MutationReport::from(&result))?;
            result.map(|_| ())
        }
        Command::Tags { path, tags, args } => {
            let format = parse_format(&args.format)?;
            let config = config::load_config(config_path)?;
            let store = open_store(&config, &args)?;
            let result = store.set_tags(&path, &tags);
            emit_mutation("records.tags", format, &MutationReport::from(&result))?;
            result.map(|_| ())
        }
        Command::List { status, args } => {
            let format = parse_format(&args.format)?;
            let config = config::load_config(config_path)?;
            run_list(&open_store(&config, &args)?, status.as_deref(), format)
        }
        Command::Show { id, name, args } => {
            let format = parse_format(&args.format)?;
            let config = config::load_config(config_path)?;
            let store = open_store(&config, &args)?;
            match (id, name) {
                (Some(id), _) => run_show(&store, &id, format),
                (None, Some(query)) => run_search(&store, &query, format),
                (None, None) => Err(ExocortexError::ValidationError(
                    "show needs a record id or --name".into(),
                )),
            }
        }
        Command::Check { args } => {
            let format = parse_format(&args.format)?;
            let config = config::load_config(config_path)?;
            run_check(&open_store(&config, &args)?, format)
        }
        Command::Validate { args } => {
            let format = parse_format(&args.format)?;
            let config = config::load_config(config_path)?;
            let store = open_store(&config, &args)?;
            if store.store().collection != Collection::Recipes {
                return Err(ExocortexError::ValidationError(format!(
                    "validate supports the recipes collection, not '{}'",
                    store.store().collection
                )));
            }
            run_validate(&store, format)
        }
    }
}

fn show_paths(config: &ResolvedConfig, format: OutputFormat) -> Result<(), ExocortexError> {
    let roots: Vec<(Collection, std::path::PathBuf)> = Collection::ALL
        .into_iter()
        .map(|c| (c, config.store(c).root))
        .collect();

    if format == OutputFormat::Json {
        let collections: serde_json::Map<String, serde_json::Value> = roots
            .iter()
            .map(|(c, root)| (c.name().to_string(), json!(root)))
            .collect();
        return print_envelope(
            "paths",
            true,
            json!({
                "data_dir": config.data_dir,
                "config_file": config.config_file,
                "collections": collections,
                "audit_log": config.audit_log,
                "actor": config.actor,
            }),
        );
    }

    println!("{} {}", "data dir:".bright_white(), config.data_dir.display());
    match &config.config_file {
        Some(p) => println!("{} {}", "config:".bright_white(), p.display()),
        None => println!("{} (defaults)", "config:".bright_white()),
    }
    for (c, root) in roots {
        println!("  {:<10} {}", c.name().bright_cyan(), root.display());
    }
    match &config.audit_log {
        Some(p) => println!("{} {} (actor: {})", "audit log:".bright_white(), p.display(), config.actor),
        None => println!("{} disabled", "audit log:".bright_white()),
    }
    Ok(())
}

fn run_list(
    store: &RecordStore,
    status: Option<&str>,
    format: OutputFormat,
) -> Result<(), ExocortexError> {
    let listing = store.list(status)?;

    if format == OutputFormat::Json {
        let records = listing
            .records
            .iter()
            .map(record_json)
            .collect::<Result<Vec<_>, _>>()?;
        let skipped: Vec<_> = listing
            .skipped
            .iter()
            .map(|(path, reason)| json!({"location": path, "error": reason}))
            .collect();
        return print_envelope(
            "records.list",
            true,
            json!({"count": records.len(), "records": records, "skipped": skipped}),
        );
    }

    for record in &listing.records {
        let name = record.get_str("name").unwrap_or("");
        println!(
            "{:<14} {:<32} {:<12} {}",
            record.folder().unwrap_or_default().bright_cyan(),
            record.id().bright_white(),
            record.status().unwrap_or("-"),
            output::compact_line(
                &format!("{} {}", name, output::tag_list(&record.tags())),
                60
            )
        );
    }
    for (path, reason) in &listing.skipped {
        eprintln!(
            "{} skipped {}: {}",
            "⚠".bright_yellow(),
            path.display(),
            output::compact_line(reason, 120)
        );
    }
    println!("{} record(s)", listing.records.len());
    Ok(())
}

fn run_show(store: &RecordStore, id: &str, format: OutputFormat) -> Result<(), ExocortexError> {
    let hits = store.find(id)?;
    if hits.is_empty() {
        return Err(ExocortexError::NotFound(format!(
            "no record '{}' in {}",
            id,
            store.store().collection
        )));
    }

    if format == OutputFormat::Json {
        let records = hits.iter().map(record_json).collect::<Result<Vec<_>, _>>()?;
        return print_envelope(
            "records.show",
            true,
            json!({"record_id": id, "duplicated": hits.len() > 1, "records": records}),
        );
    }

    if hits.len() > 1 {
        eprintln!(
            "{} '{}' exists in {} folders; run `exocortex check`",
            "⚠".bright_yellow(),
            id,
            hits.len()
        );
    }
    for record in &hits {
        println!("{} {}", "#".bright_black(), record.location.display());
        print!("{}", records::render_record(&record.location, &record.data)?);
    }
    Ok(())
}

fn run_search(store: &RecordStore, query: &str, format: OutputFormat) -> Result<(), ExocortexError> {
    let hits = store.find_by_name(query)?;
    if hits.is_empty() {
        return Err(ExocortexError::NotFound(format!(
            "no record named like '{}' in {}",
            query,
            store.store().collection
        )));
    }

    if format == OutputFormat::Json {
        let records = hits.iter().map(record_json).collect::<Result<Vec<_>, _>>()?;
        return print_envelope(
            "records.search",
            true,
            json!({"query": query, "count": records.len(), "records": records}),
        );
    }

    for record in &hits {
        println!(
            "{:<14} {:<32} {}",
            record.folder().unwrap_or_default().bright_cyan(),
            record.id().bright_white(),
            record.get_str("name").unwrap_or("")
        );
    }
    println!("{} match(es)", hits.len());
    Ok(())
}

fn run_check(store: &RecordStore, format: OutputFormat) -> Result<(), ExocortexError> {
    let violations = store.check_invariants()?;

    if format == OutputFormat::Json {
        print_envelope(
            "records.check",
            violations.is_empty(),
            json!({"violations": violations}),
        )?;
    } else {
        for v in &violations {
            println!(
                "{} {:<16} {} {}",
                "✗".bright_red(),
                serde_json::to_value(v.kind)
                    .ok()
                    .and_then(|k| k.as_str().map(str::to_string))
                    .unwrap_or_default(),
                v.location.display(),
                output::compact_line(&v.detail, 100)
            );
        }
        if violations.is_empty() {
            println!("{} {} is consistent", "✓".bright_green(), store.store().collection);
        }
    }

    if violations.is_empty() {
        Ok(())
    } else {
        Err(ExocortexError::ValidationError(format!(
            "{} invariant violation(s)",
            violations.len()
        )))
    }
}

fn run_validate(store: &RecordStore, format: OutputFormat) -> Result<(), ExocortexError> {
    let issues = recipes::validate_collection(store)?;

    if format == OutputFormat::Json {
        print_envelope("recipes.validate", issues.is_empty(), json!({"issues": issues}))?;
    } else {
        for issue in &issues {
            println!("{} {}", "✗".bright_red(), issue.location.display());
            for e in &issue.errors {
                println!("    {}", e);
            }
        }
        if issues.is_empty() {
            println!("{} all recipes valid", "✓".bright_green());
        }
    }

    if issues.is_empty() {
        Ok(())
    } else {
        Err(ExocortexError::ValidationError(format!(
            "{} recipe(s) failed validation",
            issues.len()
        )))
    }
}
