use std::error::Error;
use std::fs::File;
use std::io::BufReader;
use std::path::PathBuf;

use chrono::NaiveDate;
use clap::{Parser, error::ErrorKind};
use tracing::info;
use tracing_subscriber::EnvFilter;

use crate::checkpoint::FileCheckpointStore;
use crate::config::{AuditConfig, TimeRange};
use crate::engine::{AuditEngine, RunOutcome, finalize_only};
use crate::report::ReportEmitter;
use crate::store::SqliteStore;
use crate::types::CollectionName;

const DEFAULT_KEY_FIELD: &str = "_id";

#[derive(Debug, Clone, PartialEq, Eq)]
struct ImportArg {
    collection: CollectionName,
    path: PathBuf,
}

#[derive(Debug, Parser)]
#[command(
    name = "crossref-audit",
    version,
    disable_help_subcommand = true,
    about = "Checkpointed cross-collection consistency audit",
    long_about = "Scan the primary collection in key order, check every row's repository body against the bodies linked from its item, and write a Markdown report. Progress is checkpointed so an interrupted run resumes after the last committed key.",
    after_help = "Set RUST_LOG to change log verbosity (default: info)."
)]
/// CLI for `crossref-audit`.
///
/// Common usage:
/// - Scan (or resume) against a database: `--db audit.sqlite`
/// - Scan a bounded window: `--start-date 2024-01-01 --end-date 2024-02-01`
/// - Stop after a few batches, resume later: `--max-batches 10`
/// - Re-render the report from the last checkpoint: `--finalize-only`
struct AuditCli {
    #[arg(
        long,
        value_name = "PATH",
        required_unless_present = "finalize_only",
        help = "SQLite database holding the audited collections"
    )]
    db: Option<PathBuf>,
    #[arg(
        long = "max-batches",
        value_name = "N",
        value_parser = parse_positive_usize,
        help = "Stop after N batches in this run (resume later from the checkpoint)"
    )]
    max_batches: Option<usize>,
    #[arg(
        long = "finalize-only",
        conflicts_with_all = [
            "max_batches",
            "start_date",
            "end_date",
            "batch_keys",
            "checkpoint_every",
            "sample_cap",
            "imports",
        ],
        help = "Skip scanning and render the report from the last checkpoint"
    )]
    finalize_only: bool,
    #[arg(
        long = "start-date",
        value_name = "YYYY-MM-DD",
        value_parser = parse_date_arg,
        help = "Only audit rows with timestamp on or after this date (UTC)"
    )]
    start_date: Option<NaiveDate>,
    #[arg(
        long = "end-date",
        value_name = "YYYY-MM-DD",
        value_parser = parse_date_arg,
        help = "Only audit rows with timestamp before this date (UTC)"
    )]
    end_date: Option<NaiveDate>,
    #[arg(
        long = "checkpoint-path",
        value_name = "PATH",
        help = "Checkpoint file (default: .crossref_audit/checkpoint.json)"
    )]
    checkpoint_path: Option<PathBuf>,
    #[arg(
        long = "report-path",
        value_name = "PATH",
        help = "Report file (default: reports/crossref_audit.md)"
    )]
    report_path: Option<PathBuf>,
    #[arg(
        long = "batch-keys",
        value_name = "N",
        value_parser = parse_positive_usize,
        help = "Distinct item keys per batch"
    )]
    batch_keys: Option<usize>,
    #[arg(
        long = "checkpoint-every",
        value_name = "BATCHES",
        value_parser = parse_positive_usize,
        help = "Completed batches between checkpoint writes"
    )]
    checkpoint_every: Option<usize>,
    #[arg(
        long = "sample-cap",
        value_name = "N",
        help = "Violation samples kept for the report"
    )]
    sample_cap: Option<usize>,
    #[arg(
        long = "import",
        value_name = "COLLECTION=PATH",
        value_parser = parse_import_arg,
        help = "Load a JSON Lines file into a collection before scanning, repeat as needed"
    )]
    imports: Vec<ImportArg>,
    #[arg(
        long = "key-field",
        value_name = "FIELD",
        default_value = DEFAULT_KEY_FIELD,
        help = "Field holding the document key in imported JSON Lines"
    )]
    key_field: String,
}

/// Run the `crossref-audit` command line with the given arguments (program name excluded).
pub fn run_audit<I>(args_iter: I) -> Result<(), Box<dyn Error>>
where
    I: Iterator<Item = String>,
{
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .try_init();

    let Some(cli) =
        parse_cli::<AuditCli, _>(std::iter::once("crossref-audit".to_string()).chain(args_iter))?
    else {
        return Ok(());
    };

    let config = build_config(&cli);
    config.validate()?;
    let checkpoints = FileCheckpointStore::new(&config.checkpoint_path);

    if cli.finalize_only {
        let outcome = finalize_only(&checkpoints, &ReportEmitter::new(&config.report_path))?;
        print_outcome(&outcome);
        return Ok(());
    }

    let Some(db) = cli.db.as_ref() else {
        return Err("--db is required unless --finalize-only is set".into());
    };
    let store = SqliteStore::open(db)?;
    for import in &cli.imports {
        let file = File::open(&import.path)
            .map_err(|err| format!("failed to open {}: {err}", import.path.display()))?;
        let rows = store.import_json_lines(&import.collection, BufReader::new(file), &cli.key_field)?;
        info!(
            "[crossref:app] imported {} rows from {} into '{}'",
            rows,
            import.path.display(),
            import.collection
        );
    }

    let mut engine = AuditEngine::new(&store, &checkpoints, config);
    let outcome = engine.run()?;
    print_outcome(&outcome);
    Ok(())
}

fn build_config(cli: &AuditCli) -> AuditConfig {
    let mut config = AuditConfig::default();
    if let Some(keys) = cli.batch_keys {
        config = config.with_batch_key_threshold(keys);
    }
    if let Some(every) = cli.checkpoint_every {
        config.checkpoint_every_batches = every;
    }
    if let Some(cap) = cli.sample_cap {
        config.sample_cap = cap;
    }
    if let Some(path) = cli.checkpoint_path.clone() {
        config.checkpoint_path = path;
    }
    if let Some(path) = cli.report_path.clone() {
        config.report_path = path;
    }
    config.max_batches = cli.max_batches;
    config.time_range = TimeRange::from_dates(cli.start_date, cli.end_date);
    config
}

fn print_outcome(outcome: &RunOutcome) {
    let totals = &outcome.totals;
    println!(
        "Scanned {} rows in total: {} classified ({} consistent, {} violations), {} excluded.",
        totals.scanned, totals.classified, totals.consistent, totals.violations, totals.excluded
    );
    if outcome.batches_this_run > 0 {
        println!(
            "This run processed {} batches ({} rows).",
            outcome.batches_this_run, outcome.rows_scanned_this_run
        );
    }
    if outcome.stopped_early {
        println!(
            "Stopped early; rerun to resume after key {}.",
            outcome.last_key.as_deref().unwrap_or("<none>")
        );
    }
    println!("Report written to {}", outcome.report_path.display());
}

fn parse_positive_usize(raw: &str) -> Result<usize, String> {
    let parsed = raw
        .parse::<usize>()
        .map_err(|_| format!("Could not parse '{}' as a positive integer", raw))?;
    if parsed == 0 {
        return Err("value must be greater than zero".to_string());
    }
    Ok(parsed)
}

fn parse_date_arg(raw: &str) -> Result<NaiveDate, String> {
    NaiveDate::parse_from_str(raw.trim(), "%Y-%m-%d")
        .map_err(|_| format!("invalid date '{}': expected YYYY-MM-DD", raw.trim()))
}

fn parse_import_arg(raw: &str) -> Result<ImportArg, String> {
    let Some((collection, path)) = raw.split_once('=') else {
        return Err(format!("invalid import '{raw}': expected COLLECTION=PATH"));
    };
    let collection = collection.trim();
    let path = path.trim();
    if collection.is_empty() || path.is_empty() {
        return Err(format!("invalid import '{raw}': expected COLLECTION=PATH"));
    }
    Ok(ImportArg {
        collection: collection.to_string(),
        path: PathBuf::from(path),
    })
}

fn parse_cli<T, I>(args: I) -> Result<Option<T>, Box<dyn Error>>
where
    T: Parser,
    I: IntoIterator,
    I::Item: Into<std::ffi::OsString> + Clone,
{
    match T::try_parse_from(args) {
        Ok(cli) => Ok(Some(cli)),
        Err(err) => match err.kind() {
            ErrorKind::DisplayHelp | ErrorKind::DisplayVersion => {
                err.print()?;
                Ok(None)
            }
            _ => Err(err.into()),
        },
    }
}
