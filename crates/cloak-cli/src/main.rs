use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use cloak_ir::{load_bundle, save_bundle, ProgramBundle};
use cloak_slicer::{
    Criterion, Diagnostic, PreloadKind, Report, SliceDirection, SlicerConfig, TransactionKind,
};
use std::path::{Path, PathBuf};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "cloak")]
#[command(about = "cloak - shield secret-dependent code from cache-timing observation")]
#[command(version)]
struct Cli {
    /// Log every marking and placement decision
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Wrap secret-dependent regions in transactions with preloads
    Instrument {
        input: PathBuf,

        #[arg(short, long)]
        config: Option<PathBuf>,

        /// Walk dependencies instead of dependents
        #[arg(long)]
        backward: bool,

        /// Where to write the instrumented bundle
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Where to write the JSON report
        #[arg(long)]
        report: Option<PathBuf>,
    },

    /// Reduce the program to what a criterion depends on
    Slice {
        input: PathBuf,

        /// `secret`, `ret`, or `call:<function>`
        #[arg(long, default_value = "secret")]
        criterion: String,

        #[arg(short, long)]
        config: Option<PathBuf>,

        /// Mark the slice without removing anything
        #[arg(long)]
        mark_only: bool,

        #[arg(short, long)]
        output: Option<PathBuf>,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let filter = if cli.verbose { "debug" } else { "warn" };
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)))
        .with_writer(std::io::stderr)
        .init();

    match cli.command {
        Commands::Instrument {
            input,
            config,
            backward,
            output,
            report,
        } => cmd_instrument(&input, config.as_deref(), backward, output.as_deref(), report.as_deref()),
        Commands::Slice {
            input,
            criterion,
            config,
            mark_only,
            output,
        } => cmd_slice(&input, &criterion, config.as_deref(), mark_only, output.as_deref()),
    }
}

fn load_config(path: Option<&Path>) -> Result<SlicerConfig> {
    match path {
        Some(path) => SlicerConfig::load(path),
        None => Ok(SlicerConfig::default()),
    }
}

fn load(path: &Path) -> Result<ProgramBundle> {
    tracing::debug!(path = %path.display(), "loading bundle");
    load_bundle(path).with_context(|| format!("failed to load bundle {}", path.display()))
}

fn save(bundle: &ProgramBundle, path: Option<&Path>) -> Result<()> {
    if let Some(path) = path {
        save_bundle(bundle, path)
            .with_context(|| format!("failed to write bundle {}", path.display()))?;
        println!("   Output: {}", path.display());
    }
    Ok(())
}

/// Print diagnostics; a usage error aborts the command.
fn check_diagnostics(report: &Report) -> Result<()> {
    use colored::*;

    for diagnostic in &report.diagnostics {
        match diagnostic {
            Diagnostic::UsageError { message } => bail!("{message}"),
            Diagnostic::StructuralGap { .. } => {
                eprintln!("{} {}", "warning:".yellow().bold(), diagnostic)
            }
            Diagnostic::OracleMiss { .. } => {
                eprintln!("{} {}", "note:".bright_black(), diagnostic)
            }
        }
    }
    Ok(())
}

fn cmd_instrument(
    input: &Path,
    config: Option<&Path>,
    backward: bool,
    output: Option<&Path>,
    report_path: Option<&Path>,
) -> Result<()> {
    use colored::*;

    let mut config = load_config(config)?;
    if backward {
        config.direction = Some(SliceDirection::Backward);
    }
    let mut bundle = load(input)?;
    let report = cloak_slicer::instrument(&mut bundle, &config);
    check_diagnostics(&report)?;

    println!("{} {}", "Instrumented".bright_green().bold(), input.display());
    println!("   Seeds: {}", report.seeds.len());
    println!("   Marked nodes: {}", report.marked_nodes);
    println!("   Transactions: {}", report.transactions.len());
    for txn in &report.transactions {
        let kind = match txn.kind {
            TransactionKind::Branch => "branch",
            TransactionKind::Loop => "loop",
            TransactionKind::Block => "block",
        };
        let end = txn
            .end
            .map_or_else(|| "missing".to_string(), |end| end.to_string());
        println!("     {kind:<6} at {}: start {} end {end}", txn.block, txn.start);
    }
    println!("   Preloads: {}", report.preloads.len());
    for preload in &report.preloads {
        let what = match &preload.kind {
            PreloadKind::Stack(id) => format!("stack buffer {id}"),
            PreloadKind::Heap(id) => format!("heap buffer {id}"),
            PreloadKind::Global(global) => match bundle.module.globals.get(global) {
                Some(g) => format!("global {}", g.name),
                None => format!("global {global}"),
            },
            PreloadKind::Code(name) => format!("code of {name}"),
        };
        println!("     {what}");
    }
    println!(
        "   Buffers: {} (next id {})",
        report.buffers.len(),
        report.next_buffer_id
    );
    println!("   Releases: {}", report.releases.len());

    if let Some(path) = report_path {
        let json = serde_json::to_string_pretty(&report)?;
        std::fs::write(path, json)
            .with_context(|| format!("failed to write report {}", path.display()))?;
    }
    save(&bundle, output)
}

fn cmd_slice(
    input: &Path,
    criterion: &str,
    config: Option<&Path>,
    mark_only: bool,
    output: Option<&Path>,
) -> Result<()> {
    use colored::*;

    let config = load_config(config)?;
    let criterion: Criterion = criterion.parse()?;
    let mut bundle = load(input)?;
    let report = cloak_slicer::slice(&mut bundle, &config, &criterion, mark_only);
    check_diagnostics(&report)?;

    println!("{} {}", "Sliced".bright_green().bold(), input.display());
    println!("   Criterion: {criterion:?}");
    println!("   Marked nodes: {}", report.marked_nodes);
    if let Some(stats) = report.statistics {
        println!("   {stats}");
        println!("   Blocks removed: {}", stats.blocks_removed);
    }
    save(&bundle, output)
}
