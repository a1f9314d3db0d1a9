//! treemerge - merge backup trees without losing divergent files.
//!
//! Usage:
//!   treemerge merge SRC DST        Print what a merge would do
//!   treemerge merge SRC DST -x     Copy, delete and clean up
//!   treemerge scan ROOT...         Find duplicate content
//!   treemerge dedupe ROOT...       Remove redundant copies
//!   treemerge duplicates --db F    List groups stored in an index
//!   treemerge sessions --db F      List sessions stored in an index
//!   treemerge --help               Show help

mod logging;

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::Duration;

use clap::{Args, Parser, Subcommand, ValueEnum};
use color_eyre::eyre::{Context, Result, bail};
use tokio::sync::broadcast::{self, error::RecvError};

use treemerge_analyze::{
    ContentIndex, DuplicateReport, DuplicateScanner, HashAlgorithm, MemoryIndex, SessionTag,
    SqliteIndex,
};
use treemerge_core::{AuditLog, CompareMode, ExceptionPolicy, MergeConfig, ScanConfig};
use treemerge_ops::{DuplicatePruner, MergeEngine, RunContext};
use treemerge_scan::MergeProgress;

#[derive(Parser)]
#[command(
    name = "treemerge",
    version,
    about = "Merge backup trees and find duplicate content",
    long_about = "treemerge folds a source tree into a destination tree. Files that \
                  already exist with the same content are skipped, files that differ \
                  are copied under a tagged name, and nothing is overwritten.\n\n\
                  Without --execute every step is printed as a shell command instead."
)]
struct Cli {
    /// Raise log verbosity (-v info, -vv debug, -vvv trace)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    /// Append skipped files and absorbed errors to this file
    #[arg(long, global = true, value_name = "FILE")]
    audit_log: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Merge SOURCE into DESTINATION
    Merge(MergeArgs),

    /// Record every file under the roots and report duplicate content
    Scan(ScanArgs),

    /// Scan, then remove every copy but the lexicographically first
    Dedupe {
        #[command(flatten)]
        scan: ScanArgs,

        /// Delete instead of printing `rm` commands
        #[arg(short = 'x', long)]
        execute: bool,

        /// Seconds to wait before deleting
        #[arg(long, default_value = "5")]
        timeout: u64,
    },

    /// List duplicate groups stored in an index
    Duplicates {
        /// Index database
        #[arg(long, value_name = "FILE")]
        db: PathBuf,

        /// Restrict to these sessions (all when omitted)
        #[arg(short, long = "session", value_name = "TAG")]
        sessions: Vec<String>,

        /// Maximum number of groups to show
        #[arg(short = 'n', long, default_value = "20")]
        top: usize,

        /// Output format
        #[arg(short, long, default_value = "text")]
        format: OutputFormat,
    },

    /// List sessions stored in an index
    Sessions {
        /// Index database
        #[arg(long, value_name = "FILE")]
        db: PathBuf,

        /// Output format
        #[arg(short, long, default_value = "text")]
        format: OutputFormat,
    },
}

#[derive(Args)]
struct MergeArgs {
    /// Tree whose files are moved
    source: PathBuf,

    /// Tree that receives them
    destination: PathBuf,

    /// TOML file with merge settings; flags below are applied on top
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Copy, delete, create directories and clean up (all steps live)
    #[arg(short = 'x', long)]
    execute: bool,

    /// Copy files
    #[arg(long)]
    copy: bool,

    /// Delete source files after copying (needs --copy)
    #[arg(long)]
    delete: bool,

    /// Create destination directories
    #[arg(long)]
    mkdir: bool,

    /// Remove emptied source directories (needs --delete)
    #[arg(long)]
    cleanup: bool,

    /// How an existing destination is compared with the source
    #[arg(long, value_name = "MODE")]
    compare: Option<CompareArg>,

    /// Glob; files with a matching path component are left in place
    #[arg(long = "ignore", value_name = "GLOB")]
    ignore_patterns: Vec<String>,

    /// Treat AppleDouble `._*` files as ignorable
    #[arg(long)]
    ignore_dot_underscore: bool,

    /// Log and continue past unexpected I/O errors (may leave a partial merge)
    #[arg(long)]
    suppress_errors: bool,

    /// Record merged files in this index database
    #[arg(long, value_name = "FILE")]
    db: Option<PathBuf>,

    /// Seconds to wait before a run that changes files
    #[arg(long, default_value = "5")]
    timeout: u64,

    /// Show progress on stderr
    #[arg(short = 'P', long)]
    progress: bool,

    /// Output format for the summary
    #[arg(short, long, default_value = "text")]
    format: OutputFormat,
}

#[derive(Args)]
struct ScanArgs {
    /// Roots to scan
    #[arg(required = true)]
    roots: Vec<PathBuf>,

    /// Keep records in this index database (in memory when omitted)
    #[arg(long, value_name = "FILE")]
    db: Option<PathBuf>,

    /// Skip hidden files and directories
    #[arg(long)]
    no_hidden: bool,

    /// Follow symbolic links
    #[arg(short = 'L', long)]
    follow_symlinks: bool,

    /// Hashing threads (0 = one per core)
    #[arg(short = 'j', long, default_value = "0")]
    threads: usize,

    /// Glob; files with a matching path component are skipped
    #[arg(long = "ignore", value_name = "GLOB")]
    ignore_patterns: Vec<String>,

    /// Files smaller than this many bytes are never reported
    #[arg(long, default_value = "4096")]
    hash_threshold: u64,

    /// Digest algorithm
    #[arg(long, default_value = "blake3", value_parser = parse_algorithm)]
    algorithm: HashAlgorithm,

    /// Skip AppleDouble `._*` files
    #[arg(long)]
    ignore_dot_underscore: bool,

    /// Log and continue past unexpected I/O errors
    #[arg(long)]
    suppress_errors: bool,

    /// Maximum number of groups to show
    #[arg(short = 'n', long, default_value = "20")]
    top: usize,

    /// Show progress on stderr
    #[arg(short = 'P', long)]
    progress: bool,

    /// Output format
    #[arg(short, long, default_value = "text")]
    format: OutputFormat,
}

#[derive(Debug, Clone, Copy, ValueEnum, Default)]
enum OutputFormat {
    #[default]
    Text,
    Json,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum CompareArg {
    /// Same size and same bytes
    Content,
    /// Same size and modification time
    Shallow,
    /// Never compare; an existing destination is always skipped
    AssumeSame,
}

impl From<CompareArg> for CompareMode {
    fn from(arg: CompareArg) -> Self {
        match arg {
            CompareArg::Content => CompareMode::Content,
            CompareArg::Shallow => CompareMode::Shallow,
            CompareArg::AssumeSame => CompareMode::AssumeSame,
        }
    }
}

fn parse_algorithm(s: &str) -> Result<HashAlgorithm, String> {
    s.parse()
        .map_err(|_| format!("unknown algorithm `{s}` (blake3, sha256, xxhash64)"))
}

fn main() -> Result<()> {
    color_eyre::install()?;

    let cli = Cli::parse();
    logging::init(cli.verbose);

    let cancel = Arc::new(AtomicBool::new(false));
    let flag = Arc::clone(&cancel);
    ctrlc::set_handler(move || flag.store(true, Ordering::SeqCst))
        .wrap_err("Cannot install Ctrl-C handler")?;

    let audit = match &cli.audit_log {
        Some(path) => AuditLog::open(path).wrap_err("Cannot open audit log")?,
        None => AuditLog::disabled(),
    };

    match cli.command {
        Command::Merge(args) => run_merge(args, audit, cancel),
        Command::Scan(args) => run_scan(args, &audit, cancel),
        Command::Dedupe {
            scan,
            execute,
            timeout,
        } => run_dedupe(scan, execute, timeout, audit, cancel),
        Command::Duplicates {
            db,
            sessions,
            top,
            format,
        } => run_duplicates(&db, sessions, top, format),
        Command::Sessions { db, format } => run_sessions(&db, format),
    }
}

fn merge_config(args: &MergeArgs) -> Result<MergeConfig> {
    let mut config = match &args.config {
        Some(path) => MergeConfig::from_toml_file(path)?,
        None => MergeConfig::default(),
    };
    if args.execute {
        config.perform_copy = true;
        config.perform_delete = true;
        config.perform_mkdir = true;
        config.perform_cleanup = true;
    }
    config.perform_copy |= args.copy;
    config.perform_delete |= args.delete;
    config.perform_mkdir |= args.mkdir;
    config.perform_cleanup |= args.cleanup;
    if let Some(compare) = args.compare {
        config.compare = compare.into();
    }
    config.ignore_patterns.extend(args.ignore_patterns.iter().cloned());
    config.ignore_dot_underscore |= args.ignore_dot_underscore;
    config.suppress_unknown_errors |= args.suppress_errors;
    config.validate()?;
    Ok(config)
}

fn run_merge(args: MergeArgs, audit: AuditLog, cancel: Arc<AtomicBool>) -> Result<()> {
    let config = merge_config(&args)?;

    let mut engine = MergeEngine::new(config.clone())?
        .with_audit(audit)
        .with_cancel_flag(Arc::clone(&cancel));
    let (source, destination) = engine.validate_roots(&args.source, &args.destination)?;
    if let Some(db) = &args.db {
        let index = SqliteIndex::open(db)
            .wrap_err_with(|| format!("Cannot open index {}", db.display()))?;
        engine = engine.with_index(Arc::new(index));
    }

    if !config.is_dry_run() {
        eprintln!("Merging {} into {}", source.display(), destination.display());
        eprintln!(
            " copy: {}  delete: {}  mkdir: {}  cleanup: {}  compare: {:?}",
            config.perform_copy,
            config.perform_delete,
            config.perform_mkdir,
            config.perform_cleanup,
            config.compare
        );
        if config.suppress_unknown_errors {
            eprintln!(" unexpected errors are logged and skipped");
        }
        countdown(args.timeout, &cancel)?;
    }

    let progress = args.progress.then(|| spawn_progress(engine.subscribe()));
    let mut ctx = RunContext::new();
    let result = engine.run(&source, &destination, &mut ctx);
    drop(engine);
    if let Some(handle) = progress {
        let _ = handle.join();
    }

    // The summary is printed even when the run stopped early.
    print_merge_summary(&ctx, args.format)?;
    result.wrap_err("Merge stopped")?;
    Ok(())
}

fn scan_config(args: &ScanArgs) -> Result<ScanConfig> {
    let config = ScanConfig::builder()
        .roots(args.roots.clone())
        .include_hidden(!args.no_hidden)
        .follow_symlinks(args.follow_symlinks)
        .threads(args.threads)
        .ignore_patterns(args.ignore_patterns.clone())
        .hash_threshold(args.hash_threshold)
        .hash_algorithm(args.algorithm)
        .ignore_dot_underscore(args.ignore_dot_underscore)
        .suppress_unknown_errors(args.suppress_errors)
        .build()
        .wrap_err("Invalid scan settings")?;
    Ok(config)
}

fn open_index(db: Option<&Path>) -> Result<Box<dyn ContentIndex>> {
    Ok(match db {
        Some(path) => Box::new(
            SqliteIndex::open(path)
                .wrap_err_with(|| format!("Cannot open index {}", path.display()))?,
        ),
        None => Box::new(MemoryIndex::new()),
    })
}

/// Run a scan and return its report.
fn scan_roots(
    args: &ScanArgs,
    config: ScanConfig,
    audit: &AuditLog,
    cancel: Arc<AtomicBool>,
) -> Result<treemerge_analyze::ScanReport> {
    let index = open_index(args.db.as_deref())?;
    let scanner = DuplicateScanner::new(config).with_cancel_flag(cancel);

    eprintln!("Scanning {} root(s)...", args.roots.len());
    let progress = args.progress.then(|| spawn_progress(scanner.subscribe()));
    let result = scanner.scan(index.as_ref(), audit);
    drop(scanner);
    if let Some(handle) = progress {
        let _ = handle.join();
    }
    result.wrap_err("Scan failed")
}

fn run_scan(args: ScanArgs, audit: &AuditLog, cancel: Arc<AtomicBool>) -> Result<()> {
    let config = scan_config(&args)?;
    let scan = scan_roots(&args, config, audit, cancel)?;

    match args.format {
        OutputFormat::Text => {
            println!();
            println!("{}", "─".repeat(70));
            println!(" Session {}", scan.session);
            println!(
                " {} files, {} in {:.2}s",
                scan.files_scanned,
                format_size(scan.bytes_scanned),
                scan.elapsed.as_secs_f64()
            );
            if scan.files_skipped > 0 || scan.errors_absorbed > 0 {
                println!(
                    " {} skipped, {} error(s) absorbed",
                    scan.files_skipped, scan.errors_absorbed
                );
            }
            println!("{}", "─".repeat(70));
            print_groups(&scan.report, args.top);
            if !scan.warnings.is_empty() {
                println!("{} warning(s) during scan", scan.warnings.len());
            }
        }
        OutputFormat::Json => {
            println!("{}", serde_json::to_string_pretty(&scan)?);
        }
    }
    Ok(())
}

fn run_dedupe(
    args: ScanArgs,
    execute: bool,
    timeout: u64,
    audit: AuditLog,
    cancel: Arc<AtomicBool>,
) -> Result<()> {
    let config = scan_config(&args)?;
    let policy = ExceptionPolicy::from(&config);
    let scan = scan_roots(&args, config, &audit, Arc::clone(&cancel))?;

    if !scan.report.has_duplicates() {
        eprintln!("No duplicate files found.");
        return Ok(());
    }
    if execute {
        eprintln!(
            "Deleting {} redundant file(s), {}",
            scan.report.files_with_duplicates - scan.report.group_count as u64,
            format_size(scan.report.total_wasted_space)
        );
        countdown(timeout, &cancel)?;
    }

    let mut pruner = DuplicatePruner::new(execute)
        .with_audit(audit)
        .with_policy(policy);
    let report = pruner.prune(&scan.report.groups)?;

    match args.format {
        OutputFormat::Text => {
            let verb = if execute { "Removed" } else { "Would remove" };
            eprintln!("{verb} {}", report.summary());
        }
        OutputFormat::Json => {
            println!("{}", serde_json::to_string_pretty(&report)?);
        }
    }
    Ok(())
}

fn run_duplicates(db: &Path, sessions: Vec<String>, top: usize, format: OutputFormat) -> Result<()> {
    let index =
        SqliteIndex::open(db).wrap_err_with(|| format!("Cannot open index {}", db.display()))?;
    let sessions: Vec<SessionTag> = sessions.into_iter().map(SessionTag::new).collect();
    let report = DuplicateReport::new(index.duplicate_groups(&sessions)?);

    match format {
        OutputFormat::Text => print_groups(&report, top),
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&report)?),
    }
    Ok(())
}

fn run_sessions(db: &Path, format: OutputFormat) -> Result<()> {
    let index =
        SqliteIndex::open(db).wrap_err_with(|| format!("Cannot open index {}", db.display()))?;
    let sessions = index.sessions()?;

    match format {
        OutputFormat::Text => {
            if sessions.is_empty() {
                println!(" No sessions recorded.");
            }
            for s in &sessions {
                let errors = index.errors(Some(&s.session))?.len();
                println!(
                    " {:<10} {}  {:>8} files {:>10}  {} error(s)",
                    s.session.as_str(),
                    s.started_at.to_rfc3339(),
                    s.files,
                    format_size(s.bytes),
                    errors
                );
            }
        }
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&sessions)?),
    }
    Ok(())
}

fn print_groups(report: &DuplicateReport, top: usize) {
    println!();
    if report.groups.is_empty() {
        println!(" No duplicate files found.");
        println!();
        return;
    }

    println!(
        " Found {} duplicate groups ({} files)",
        report.group_count, report.files_with_duplicates
    );
    println!(" Total wasted space: {}", format_size(report.total_wasted_space));
    println!();

    for (i, group) in report.groups.iter().take(top).enumerate() {
        println!(
            " Group {} ({} files, {} each, {} wasted)",
            i + 1,
            group.count(),
            format_size(group.size),
            format_size(group.wasted_bytes)
        );
        println!("   keep {}", group.keeper().display());
        for path in group.redundant() {
            println!("        {}", path.display());
        }
        println!();
    }
    if report.group_count > top {
        println!(" ... and {} more groups", report.group_count - top);
    }
}

fn print_merge_summary(ctx: &RunContext, format: OutputFormat) -> Result<()> {
    match format {
        OutputFormat::Text => {
            println!();
            println!("{}", "─".repeat(50));
            for (label, counter) in ctx.stats.rows() {
                println!(
                    " {label:<11} {:>8} files {:>12}",
                    counter.count,
                    format_size(counter.bytes)
                );
            }
            if ctx.absorbed > 0 {
                println!(" {} file(s) left in place after errors", ctx.absorbed);
            }
            if !ctx.warnings.is_empty() {
                println!(" {} warning(s) during walk", ctx.warnings.len());
            }
            println!("{}", "─".repeat(50));
            println!(" Session {}: renamed copies match *-{}*", ctx.session, ctx.session);
        }
        OutputFormat::Json => {
            let summary = serde_json::json!({
                "session": ctx.session,
                "stats": ctx.stats,
                "absorbed": ctx.absorbed,
                "dirs_removed": ctx.dirs_removed,
                "warnings": ctx.warnings,
            });
            println!("{}", serde_json::to_string_pretty(&summary)?);
        }
    }
    Ok(())
}

/// Count down on stderr, giving Ctrl-C a chance before anything changes.
fn countdown(seconds: u64, cancel: &AtomicBool) -> Result<()> {
    for remaining in (1..=seconds).rev() {
        eprint!("\rStarting in {remaining}s, Ctrl-C to abort ");
        for _ in 0..10 {
            if cancel.load(Ordering::SeqCst) {
                eprintln!();
                bail!("Aborted before any change was made");
            }
            thread::sleep(Duration::from_millis(100));
        }
    }
    if seconds > 0 {
        eprintln!();
    }
    Ok(())
}

/// Render progress snapshots until the sender side is dropped.
fn spawn_progress(mut rx: broadcast::Receiver<MergeProgress>) -> thread::JoinHandle<()> {
    thread::spawn(move || {
        loop {
            match rx.blocking_recv() {
                Ok(p) => eprint!(
                    "\r{:?}: {} files, {} ({:.0}/s)    ",
                    p.phase,
                    p.files,
                    format_size(p.bytes),
                    p.files_per_second()
                ),
                Err(RecvError::Lagged(_)) => continue,
                Err(RecvError::Closed) => break,
            }
        }
        eprintln!();
    })
}

/// Format size in human-readable form.
fn format_size(bytes: u64) -> String {
    humansize::format_size(bytes, humansize::BINARY)
}
