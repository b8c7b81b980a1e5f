//! reshelf: repository restructuring and documentation normalization.
//!
//! Brings a repository to the layout described by a versioned target schema.
//! A run scans the tree, builds the reference graph, classifies every file,
//! plans an ordered set of merges, moves, archives and deletions, and applies
//! them one at a time. Each action rewrites every reference it would break and
//! is checked by a verifier; a failing action is rolled back and the run halts
//! with all earlier actions kept.
//!
//! # Examples
//!
//! ```bash
//! # Scaffold .reshelf/config.toml and .reshelf/schema.toml
//! reshelf init
//!
//! # Validate the schema, then inspect the plan
//! reshelf schema check
//! reshelf plan
//!
//! # Apply it
//! reshelf execute
//! ```
//!
//! # Crate Structure
//!
//! - [`core`]: state, scanning, classification, planning and the executor
//! - [`plugins`]: archive storage, content merging and verification

pub mod core;
pub mod plugins;

use core::{
    classify::{Classification, Verdict},
    engine::{Engine, ExecuteOptions, RunReport},
    error::ReshelfError,
    executor::ActionStatus,
    journal, output, scaffold,
    store::{self, Store},
    time,
};
use plugins::{archive, verify};

use clap::{Parser, Subcommand, ValueEnum};
use colored::Colorize;
use serde_json::Value as JsonValue;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

#[derive(Parser, Debug)]
#[clap(
    name = "reshelf",
    version = env!("CARGO_PKG_VERSION"),
    about = "Restructure a repository to match its target schema"
)]
struct Cli {
    /// Repository root (defaults to the nearest ancestor containing .reshelf/).
    #[clap(long, global = true)]
    root: Option<PathBuf>,
    /// Output format.
    #[clap(long, global = true, value_enum, default_value = "text")]
    format: OutputFormat,
    #[clap(subcommand)]
    command: Command,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
enum OutputFormat {
    Text,
    Json,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Write default .reshelf/config.toml and .reshelf/schema.toml
    Init {
        /// Overwrite existing files.
        #[clap(long)]
        force: bool,
        /// Show what would be written.
        #[clap(long)]
        dry_run: bool,
    },
    /// Inventory and classify every file
    Scan,
    /// Show the reference graph
    Graph {
        /// Render as a Mermaid flowchart.
        #[clap(long)]
        mermaid: bool,
    },
    /// Compute the migration plan without changing anything
    Plan {
        /// Archive run directory name (defaults to epoch seconds).
        #[clap(long)]
        stamp: Option<String>,
    },
    /// Apply the migration plan
    Execute {
        /// Compute and report the plan; mutate nothing.
        #[clap(long)]
        dry_run: bool,
        /// Move files with plain renames even inside a git work tree.
        #[clap(long)]
        no_git: bool,
        /// Archive run directory name (defaults to epoch seconds).
        #[clap(long)]
        stamp: Option<String>,
    },
    /// Target schema commands
    Schema(SchemaCli),
    /// Archive manifest commands
    Archive(ArchiveCli),
    /// Run journal commands
    Runs(RunsCli),
}

#[derive(clap::Args, Debug)]
struct SchemaCli {
    #[clap(subcommand)]
    command: SchemaCommand,
}

#[derive(Subcommand, Debug)]
enum SchemaCommand {
    /// Validate config and schema
    Check,
}

#[derive(clap::Args, Debug)]
struct ArchiveCli {
    #[clap(subcommand)]
    command: ArchiveCommand,
}

#[derive(Subcommand, Debug)]
enum ArchiveCommand {
    /// List manifest entries
    List,
    /// Check every archived file against its recorded hash
    Verify,
}

#[derive(clap::Args, Debug)]
struct RunsCli {
    #[clap(subcommand)]
    command: RunsCommand,
}

#[derive(Subcommand, Debug)]
enum RunsCommand {
    /// List journaled runs
    List,
    /// Print every event of one run
    Show { run_id: String },
}

impl Command {
    fn name(&self) -> &'static str {
        match self {
            Command::Init { .. } => "init",
            Command::Scan => "scan",
            Command::Graph { .. } => "graph",
            Command::Plan { .. } => "plan",
            Command::Execute { .. } => "execute",
            Command::Schema(_) => "schema.check",
            Command::Archive(a) => match a.command {
                ArchiveCommand::List => "archive.list",
                ArchiveCommand::Verify => "archive.verify",
            },
            Command::Runs(r) => match r.command {
                RunsCommand::List => "runs.list",
                RunsCommand::Show { .. } => "runs.show",
            },
        }
    }
}

/// Parse arguments, run the command, and return the process exit code.
pub fn run() -> i32 {
    let cli = Cli::parse();
    let cmd = cli.command.name();
    let format = cli.format;
    match dispatch(cli) {
        Ok(code) => code,
        Err(err) => {
            report_error(cmd, format, &err);
            err.exit_code()
        }
    }
}

fn report_error(cmd: &str, format: OutputFormat, err: &ReshelfError) {
    let record = err.record(None);
    match format {
        OutputFormat::Json => emit_json(&time::command_envelope(
            cmd,
            "error",
            serde_json::json!({ "failure": record }),
        )),
        OutputFormat::Text => {
            eprintln!("{} {}", "error:".bright_red().bold(), record.cause);
            eprintln!("  {} {}", "fix:".bright_cyan(), record.remediation);
        }
    }
}

fn emit_json(value: &JsonValue) {
    match serde_json::to_string_pretty(value) {
        Ok(s) => println!("{}", s),
        Err(e) => eprintln!("error: cannot render JSON output: {}", e),
    }
}

fn resolve_root(explicit: Option<PathBuf>) -> Result<PathBuf, ReshelfError> {
    let current_dir = std::env::current_dir()?;
    let root = match explicit {
        Some(dir) => dir,
        None => store::find_project_root(&current_dir).unwrap_or(current_dir),
    };
    Ok(std::fs::canonicalize(&root).unwrap_or(root))
}

fn dispatch(cli: Cli) -> Result<i32, ReshelfError> {
    let format = cli.format;
    let cmd = cli.command.name();
    match cli.command {
        Command::Init { force, dry_run } => {
            let target_dir = match cli.root {
                Some(d) => d,
                None => std::env::current_dir()?,
            };
            run_init(&target_dir, force, dry_run, format)
        }
        Command::Scan => run_scan(&resolve_root(cli.root)?, format),
        Command::Graph { mermaid } => run_graph(&resolve_root(cli.root)?, mermaid, format),
        Command::Plan { stamp } => run_plan(&resolve_root(cli.root)?, stamp, format),
        Command::Execute {
            dry_run,
            no_git,
            stamp,
        } => run_execute(&resolve_root(cli.root)?, dry_run, !no_git, stamp, format),
        Command::Schema(schema_cli) => match schema_cli.command {
            SchemaCommand::Check => run_schema_check(&resolve_root(cli.root)?, format),
        },
        Command::Archive(archive_cli) => {
            run_archive(&resolve_root(cli.root)?, archive_cli.command, cmd, format)
        }
        Command::Runs(runs_cli) => run_runs(&resolve_root(cli.root)?, runs_cli.command, cmd, format),
    }
}

fn run_init(target_dir: &Path, force: bool, dry_run: bool, format: OutputFormat) -> Result<i32, ReshelfError> {
    let steps = scaffold::scaffold_project(&scaffold::ScaffoldOptions {
        target_dir: target_dir.to_path_buf(),
        force,
        dry_run,
    })?;
    if format == OutputFormat::Json {
        let files: Vec<JsonValue> = steps
            .iter()
            .map(|step| match step {
                scaffold::ScaffoldStep::Wrote(p) => {
                    serde_json::json!({ "path": p.display().to_string(), "action": "wrote" })
                }
                scaffold::ScaffoldStep::WouldWrite(p) => {
                    serde_json::json!({ "path": p.display().to_string(), "action": "would_write" })
                }
                scaffold::ScaffoldStep::WouldSkip(p) => {
                    serde_json::json!({ "path": p.display().to_string(), "action": "would_skip" })
                }
            })
            .collect();
        emit_json(&time::command_envelope("init", "ok", serde_json::json!({ "files": files })));
        return Ok(0);
    }
    println!("Scaffolding reshelf into {}", target_dir.display());
    for step in &steps {
        match step {
            scaffold::ScaffoldStep::Wrote(p) => println!("  {} {}", "wrote:".bright_green(), p.display()),
            scaffold::ScaffoldStep::WouldWrite(p) => println!("  would-write: {}", p.display()),
            scaffold::ScaffoldStep::WouldSkip(p) => {
                println!("  would-skip: {} (exists; pass --force to overwrite)", p.display())
            }
        }
    }
    Ok(0)
}

fn run_schema_check(root: &Path, format: OutputFormat) -> Result<i32, ReshelfError> {
    let engine = Engine::open(root)?;
    if format == OutputFormat::Json {
        emit_json(&time::command_envelope(
            "schema.check",
            "ok",
            serde_json::json!({ "config": engine.config, "schema": engine.schema }),
        ));
        return Ok(0);
    }
    println!(
        "{} schema v{}: {} governed director{}, {} relocation{}",
        "✓".bright_green(),
        engine.schema.version,
        engine.schema.directories.len(),
        if engine.schema.directories.len() == 1 { "y" } else { "ies" },
        engine.schema.relocations.len(),
        if engine.schema.relocations.len() == 1 { "" } else { "s" }
    );
    Ok(0)
}

fn verdict_colored(verdict: &Verdict) -> String {
    let label = verdict.to_string();
    match verdict {
        Verdict::Conforming => label.green().to_string(),
        Verdict::MergeCandidate(_) | Verdict::RelocateCandidate(_) => label.bright_cyan().to_string(),
        Verdict::ArchiveCandidate | Verdict::DeleteCandidate => label.bright_yellow().to_string(),
        Verdict::Unclassified => label.bright_red().to_string(),
    }
}

fn run_scan(root: &Path, format: OutputFormat) -> Result<i32, ReshelfError> {
    let engine = Engine::open(root)?;
    let analysis = engine.analyze()?;
    let ambiguities = analysis.ambiguities();
    if format == OutputFormat::Json {
        emit_json(&time::command_envelope(
            "scan",
            "ok",
            serde_json::json!({
                "files": analysis.inventory.nodes,
                "classifications": analysis.classifications,
                "ambiguities": ambiguities,
            }),
        ));
        return Ok(0);
    }
    println!("{} files under {}", analysis.inventory.len(), root.display());
    for c in &analysis.classifications {
        println!("  {:<40} {}  {}", c.file, verdict_colored(&c.verdict), c.reason.dimmed());
    }
    if !ambiguities.is_empty() {
        println!();
        println!(
            "{} {} file(s) need a confirmed disposition",
            "⚠".bright_yellow(),
            ambiguities.len()
        );
    }
    Ok(0)
}

fn run_graph(root: &Path, mermaid: bool, format: OutputFormat) -> Result<i32, ReshelfError> {
    let engine = Engine::open(root)?;
    let (_, graph) = engine.scan()?;
    if mermaid {
        print!("{}", graph.to_mermaid());
        return Ok(0);
    }
    if format == OutputFormat::Json {
        emit_json(&time::command_envelope("graph", "ok", serde_json::to_value(&graph)?));
        return Ok(0);
    }
    for edge in &graph.edges {
        println!("  {} -> {}  (line {})", edge.from, edge.to, edge.line);
    }
    let broken: Vec<_> = graph.broken().collect();
    if !broken.is_empty() {
        println!();
        println!("{} {} broken reference(s)", "⚠".bright_yellow(), broken.len());
        for r in broken {
            println!("  {}:{} {}", r.from, r.line, r.raw.bright_red());
        }
    }
    Ok(0)
}

fn unclassified_files(items: &[Classification]) -> Vec<String> {
    items.iter().map(|c| c.file.clone()).collect()
}

fn run_plan(root: &Path, stamp: Option<String>, format: OutputFormat) -> Result<i32, ReshelfError> {
    let engine = Engine::open(root)?;
    let stamp = stamp.unwrap_or_else(|| time::now_epoch_secs().to_string());
    let (analysis, plan) = engine.plan(&stamp)?;
    let ambiguities = analysis.ambiguities();
    if format == OutputFormat::Json {
        emit_json(&time::command_envelope(
            "plan",
            "ok",
            serde_json::json!({ "plan": plan, "ambiguities": ambiguities }),
        ));
        return Ok(0);
    }
    if plan.is_empty() {
        println!("{} repository already matches the schema", "✓".bright_green());
    }
    for (i, action) in plan.actions.iter().enumerate() {
        let rewrites = action.rewrites();
        if rewrites.is_empty() {
            println!("  {:>3}. {}", i + 1, action);
        } else {
            println!(
                "  {:>3}. {} {}",
                i + 1,
                action,
                format!("(rewrites {} file(s))", rewrites.len()).dimmed()
            );
        }
    }
    if !plan.unclassified.is_empty() {
        println!();
        println!(
            "{} left in place until a disposition is confirmed: {}",
            "⚠".bright_yellow(),
            output::preview_messages(&unclassified_files(&plan.unclassified), 5, 60)
        );
    }
    Ok(0)
}

fn run_execute(
    root: &Path,
    dry_run: bool,
    use_git: bool,
    stamp: Option<String>,
    format: OutputFormat,
) -> Result<i32, ReshelfError> {
    let engine = Engine::open(root)?;
    let verifier = verify::from_config(engine.config.verifier.as_ref());

    let cancel = Arc::new(AtomicBool::new(false));
    let flag = Arc::clone(&cancel);
    if let Err(e) = ctrlc::set_handler(move || flag.store(true, Ordering::SeqCst)) {
        eprintln!("warning: cannot install Ctrl-C handler: {}", e);
    }

    let report = engine.execute(
        &ExecuteOptions {
            dry_run,
            run_stamp: stamp,
            use_git,
            cancel,
        },
        verifier.as_ref(),
    )?;
    print_report(&report, format);
    Ok(report.exit_code())
}

fn status_colored(status: ActionStatus) -> String {
    let s = status.as_str();
    match status {
        ActionStatus::Verified => s.bright_green().to_string(),
        ActionStatus::Applied | ActionStatus::Pending => s.normal().to_string(),
        ActionStatus::Failed => s.bright_red().bold().to_string(),
        ActionStatus::RolledBack => s.bright_yellow().to_string(),
    }
}

fn print_report(report: &RunReport, format: OutputFormat) {
    if format == OutputFormat::Json {
        let status = if report.exit_code() == 0 { "ok" } else { "halted" };
        match serde_json::to_value(report) {
            Ok(v) => emit_json(&time::command_envelope("execute", status, v)),
            Err(e) => eprintln!("error: cannot render JSON output: {}", e),
        }
        return;
    }

    let mode = if report.dry_run { " (dry run)" } else { "" };
    println!(
        "run {}{}: {} action(s), verifier: {}",
        report.run_id,
        mode,
        report.plan.actions.len(),
        report.verifier
    );
    for record in &report.records {
        println!("  {:>3}. [{}] {}", record.seq, status_colored(record.status), record.action);
        if let Some(out) = &record.verifier_output {
            if record.status == ActionStatus::Failed || record.status == ActionStatus::RolledBack {
                println!("       {}", output::compact_line(out, 160).dimmed());
            }
        }
    }
    if !report.dry_run && report.manifest_appended > 0 {
        println!("  archived {} new file(s)", report.manifest_appended);
    }
    if !report.plan.unclassified.is_empty() {
        println!(
            "  {} unclassified: {}",
            "⚠".bright_yellow(),
            output::preview_messages(&unclassified_files(&report.plan.unclassified), 5, 60)
        );
    }
    match &report.failure {
        Some(failure) => {
            println!("{} run halted: {}", "✗".bright_red(), failure.cause);
            println!("  {} {}", "fix:".bright_cyan(), failure.remediation);
        }
        None if !report.dry_run => println!("{} run complete", "✓".bright_green()),
        None => {}
    }
}

fn run_archive(
    root: &Path,
    command: ArchiveCommand,
    cmd: &str,
    format: OutputFormat,
) -> Result<i32, ReshelfError> {
    let store = Store::new(root);
    let config = core::config::load_config(&store)?;
    match command {
        ArchiveCommand::List => {
            let entries = archive::list_archives(&store, &config.archive_dir)?;
            if format == OutputFormat::Json {
                emit_json(&time::command_envelope(
                    cmd,
                    "ok",
                    serde_json::json!({ "entries": entries }),
                ));
                return Ok(0);
            }
            for e in &entries {
                println!("  {} -> {}  ({})", e.original_path, e.archive_path, e.reason.dimmed());
            }
            println!("{} archived file(s)", entries.len());
            Ok(0)
        }
        ArchiveCommand::Verify => {
            let failures = archive::verify_archives(&store, &config.archive_dir)?;
            let code = if failures.is_empty() { 0 } else { 1 };
            if format == OutputFormat::Json {
                let status = if code == 0 { "ok" } else { "failed" };
                emit_json(&time::command_envelope(
                    cmd,
                    status,
                    serde_json::json!({ "failures": failures }),
                ));
                return Ok(code);
            }
            if failures.is_empty() {
                println!("{} archive intact", "✓".bright_green());
            }
            for f in &failures {
                println!("  {} {}", "✗".bright_red(), f);
            }
            Ok(code)
        }
    }
}

fn run_runs(root: &Path, command: RunsCommand, cmd: &str, format: OutputFormat) -> Result<i32, ReshelfError> {
    let store = Store::new(root);
    match command {
        RunsCommand::List => {
            let runs = journal::list_runs(&store)?;
            if format == OutputFormat::Json {
                emit_json(&time::command_envelope(cmd, "ok", serde_json::json!({ "runs": runs })));
                return Ok(0);
            }
            for r in &runs {
                println!("  {}  {}  {} ({} events)", r.run_id, r.started_at, r.outcome, r.events);
            }
            Ok(0)
        }
        RunsCommand::Show { run_id } => {
            let events = journal::read_run(&store, &run_id)?;
            if format == OutputFormat::Json {
                emit_json(&time::command_envelope(
                    cmd,
                    "ok",
                    serde_json::json!({ "run_id": run_id, "events": events }),
                ));
                return Ok(0);
            }
            for e in &events {
                println!("  {}  {:<24} {}", e.ts, e.event, output::compact_line(&e.detail.to_string(), 120));
            }
            Ok(0)
        }
    }
}
