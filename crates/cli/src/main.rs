use std::fs;
use std::io::{self, BufRead, Write};
use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use clap::ArgAction;
use clap::{Args, Parser, Subcommand};
use dataset_sorter_core::{
    clean_backups, load_config, run_sort, run_sort_with_callback, CleanOptions, DirectoryReport,
    RunReport, SortConfig, SortOptions,
};
use tracing::debug;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::prelude::*;
use tracing_subscriber::{fmt, EnvFilter};

/// Groups above which an overwriting run asks for confirmation.
const CONFIRM_THRESHOLD: u64 = 50;

#[derive(Debug, Parser)]
#[command(
    name = "dataset-sorter",
    version,
    about = "Number image files and their prompt sidecars into a gap-free dataset."
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Also write logs to this file (no ANSI colors). Console output is kept.
    #[arg(long, global = true, value_name = "FILE")]
    log_file: Option<PathBuf>,

    /// Log filter, e.g. `debug` or `dataset_sorter_core=trace`. Overrides RUST_LOG.
    #[arg(long, global = true, value_name = "LEVEL")]
    log_level: Option<String>,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Rename new images and their sidecars to the next free indices.
    Sort(SortArgs),
    /// Remove backup folders left by earlier runs.
    Clean(CleanArgs),
}

#[derive(Debug, Args)]
struct SortArgs {
    /// Directory to process.
    #[arg(default_value = ".", value_name = "DIR")]
    dir: PathBuf,

    /// Process every subdirectory as well.
    #[arg(long)]
    recursive: bool,

    /// Replace existing destination files instead of skipping the group.
    #[arg(long)]
    overwrite: bool,

    /// Report what would happen without touching the filesystem.
    #[arg(long)]
    dry_run: bool,

    /// Do not copy originals to a backup folder before renaming.
    #[arg(long)]
    no_backup: bool,

    /// Central backup root instead of a `backup` folder per directory.
    #[arg(long, value_name = "DIR")]
    backup_dir: Option<PathBuf>,

    /// Naming template, e.g. `{index}` or `{index}_{random}`.
    #[arg(long = "naming-convention", value_name = "TEMPLATE")]
    naming_convention: Option<String>,

    /// Image extensions to recognize (repeatable). Replaces the defaults.
    #[arg(long = "ext", value_name = "EXT", num_args = 1, action = ArgAction::Append)]
    ext: Vec<String>,

    /// Exclude glob patterns (repeatable).
    #[arg(long = "exclude", value_name = "GLOB", num_args = 1, action = ArgAction::Append)]
    exclude: Vec<String>,

    /// Seed for `{random}` tokens.
    #[arg(long)]
    seed: Option<u64>,

    /// Write the JSON run report to this file.
    #[arg(long, value_name = "FILE")]
    report: Option<PathBuf>,

    /// JSON settings file; flags given here take precedence.
    #[arg(long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Emit a log line per processed group.
    #[arg(long)]
    progress: bool,

    /// Debug-level logging.
    #[arg(long)]
    verbose: bool,

    /// Skip the confirmation prompt for large overwriting runs.
    #[arg(long)]
    yes: bool,
}

#[derive(Debug, Args)]
struct CleanArgs {
    /// Directory to clean.
    #[arg(default_value = ".", value_name = "DIR")]
    dir: PathBuf,

    /// Central backup root to remove as well.
    #[arg(long, value_name = "DIR")]
    backup_dir: Option<PathBuf>,

    /// List the backup folders without removing them.
    #[arg(long)]
    dry_run: bool,
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    let verbose = matches!(&cli.command, Commands::Sort(args) if args.verbose);
    let _guard = init_tracing(cli.log_file.as_deref(), cli.log_level.as_deref(), verbose)?;

    match cli.command {
        Commands::Sort(args) => run_sort_command(args),
        Commands::Clean(args) => run_clean_command(args),
    }
}

fn build_options(args: &SortArgs) -> Result<SortOptions> {
    let mut config = match &args.config {
        Some(path) => load_config(path)?,
        None => SortConfig::default(),
    };

    config.recursive |= args.recursive;
    config.overwrite |= args.overwrite;
    config.dry_run |= args.dry_run;
    config.progress |= args.progress;
    if args.no_backup {
        config.backup = false;
    }
    if let Some(backup_dir) = &args.backup_dir {
        config.backup_dir = Some(backup_dir.clone());
    }
    if let Some(template) = &args.naming_convention {
        config.naming_template = template.clone();
    }
    if !args.ext.is_empty() {
        config.extensions = args.ext.clone();
    }
    config.excludes.extend(args.exclude.iter().cloned());
    if args.seed.is_some() {
        config.seed = args.seed;
    }

    config.into_options(args.dir.clone())
}

fn run_sort_command(args: SortArgs) -> Result<()> {
    let mut options = build_options(&args)?;
    debug!(?options, "resolved sort options");

    if options.overwrite && !options.dry_run && !args.yes {
        // The preview needs the same tokens as the real run.
        if options.seed.is_none() {
            options.seed = Some(rand::random());
        }
        let preview = run_sort(&SortOptions {
            dry_run: true,
            ..options.clone()
        })?;
        let planned = preview.totals.previewed + preview.totals.skipped + preview.totals.failed;
        if planned > CONFIRM_THRESHOLD {
            print_totals(&preview);
            if !confirm(&format!(
                "Overwrite is enabled and {planned} group(s) are planned. Continue?"
            ))? {
                println!("Aborted; nothing was renamed.");
                return Ok(());
            }
        }
    }

    let report = run_sort_with_callback(&options, print_directory)?;
    print_totals(&report);
    for warning in &report.warnings {
        println!("Warning: {warning}");
    }

    if let Some(output) = &args.report {
        let payload = serde_json::to_string_pretty(&report).context("failed to serialize report")?;
        fs::write(output, payload)
            .with_context(|| format!("failed to write report to {}", output.display()))?;
        println!("Report written to {}", output.display());
    }

    Ok(())
}

fn run_clean_command(args: CleanArgs) -> Result<()> {
    let report = clean_backups(
        &args.dir,
        &CleanOptions {
            dry_run: args.dry_run,
            backup_dir: args.backup_dir,
        },
    )?;

    let verb = if report.dry_run { "Would remove" } else { "Removed" };
    for path in &report.removed {
        println!("{verb} {}", path.display());
    }
    println!("{verb} {} backup folder(s).", report.removed.len());
    for warning in &report.warnings {
        println!("Warning: {warning}");
    }
    Ok(())
}

fn print_directory(report: &DirectoryReport) {
    if report.is_empty() && report.orphans.is_empty() {
        return;
    }
    println!(
        "{}: renamed {} | previewed {} | skipped {} | failed {} | orphans {}",
        report.directory.display(),
        report.renamed,
        report.previewed,
        report.skipped,
        report.failed,
        report.orphans.len()
    );
    for group in &report.groups {
        if let Some(error) = &group.error {
            println!("  - {} ({:?}): {error}", group.stem, group.status);
        }
    }
}

fn print_totals(report: &RunReport) {
    let totals = &report.totals;
    println!(
        "{}Processed {} director(ies): renamed {}, previewed {}, skipped {}, failed {}, orphans {}.",
        if report.dry_run { "[dry-run] " } else { "" },
        totals.directories,
        totals.renamed,
        totals.previewed,
        totals.skipped,
        totals.failed,
        totals.orphans
    );
}

fn confirm(question: &str) -> Result<bool> {
    print!("{question} [y/N] ");
    io::stdout().flush().context("failed to flush stdout")?;
    let mut answer = String::new();
    io::stdin()
        .lock()
        .read_line(&mut answer)
        .context("failed to read confirmation")?;
    Ok(matches!(answer.trim().to_ascii_lowercase().as_str(), "y" | "yes"))
}

fn init_tracing(
    log_file: Option<&Path>,
    log_level: Option<&str>,
    verbose: bool,
) -> Result<Option<WorkerGuard>> {
    let filter = match log_level {
        Some(level) => EnvFilter::try_new(level)
            .with_context(|| format!("invalid log level '{level}'"))?,
        None if verbose => EnvFilter::new("debug"),
        None => EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
    };

    let Some(path) = log_file else {
        let _ = tracing_subscriber::fmt().with_env_filter(filter).try_init();
        return Ok(None);
    };

    let Some(file_name) = path.file_name() else {
        bail!("log file path has no file name: {}", path.display());
    };
    let directory = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    fs::create_dir_all(directory)
        .with_context(|| format!("failed to create log directory {}", directory.display()))?;

    let appender = tracing_appender::rolling::never(directory, file_name);
    let (writer, guard) = tracing_appender::non_blocking(appender);
    let _ = tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer())
        .with(fmt::layer().with_writer(writer).with_ansi(false))
        .try_init();
    Ok(Some(guard))
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;

    use clap::Parser;

    use super::{Cli, Commands};

    #[test]
    fn repeatable_flags_do_not_swallow_the_directory() {
        let cli = Cli::try_parse_from([
            "dataset-sorter",
            "sort",
            "--ext",
            "png",
            "--ext",
            "webp",
            "--exclude",
            "raw_*",
            "photos",
        ])
        .expect("parse");

        let Commands::Sort(args) = cli.command else {
            panic!("expected the sort subcommand");
        };
        assert_eq!(args.dir, PathBuf::from("photos"));
        assert_eq!(args.ext, vec!["png", "webp"]);
        assert_eq!(args.exclude, vec!["raw_*"]);
    }

    #[test]
    fn log_file_is_a_global_flag() {
        let cli = Cli::try_parse_from(["dataset-sorter", "clean", "--log-file", "run.log", "data"])
            .expect("parse");
        assert_eq!(cli.log_file, Some(PathBuf::from("run.log")));
        let Commands::Clean(args) = cli.command else {
            panic!("expected the clean subcommand");
        };
        assert_eq!(args.dir, PathBuf::from("data"));
    }
}
