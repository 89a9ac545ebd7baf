//! pesift - Concurrently sweep directory trees for PE candidate files
//!
//! This tool walks a directory tree (or takes a single file), runs cheap
//! pre-validation on every regular file and hands validated PE candidates
//! to the header parser, printing one report line per valid image.

use anyhow::{bail, Result};
use clap::{Args, Parser, ValueEnum};
use pesift_core::{
    sniff_file, ConsoleSink, ImageClass, NullSink, Outcome, PeProbe, ReportSink, ScanContext,
    Walker, WorkerPool,
};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::thread;
use tracing::{debug, info, Level};
use tracing_subscriber::EnvFilter;

/// Concurrently sweep directory trees for PE candidate files
#[derive(Parser, Debug)]
#[command(name = "pesift")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    #[command(flatten)]
    input: InputMode,

    /// Number of worker threads for file validation
    #[arg(short, long, default_value_t = default_jobs())]
    jobs: usize,

    /// Maximum directory recursion depth
    #[arg(long, default_value_t = pesift_core::DEFAULT_MAX_DEPTH)]
    max_depth: usize,

    /// Architecture class candidates must match
    #[arg(long, value_enum, default_value = "native")]
    arch: Arch,

    /// Suppress per-file progress lines (report lines only go to the log)
    #[arg(short, long)]
    quiet: bool,

    /// Verbosity level (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,
}

#[derive(Args, Debug)]
#[group(required = true, multiple = false)]
struct InputMode {
    /// Path to a single file to validate and parse
    #[arg(short, long)]
    file: Option<PathBuf>,

    /// Path to a directory tree to sweep
    #[arg(short, long)]
    directory: Option<PathBuf>,
}

/// Architecture class selection for the scan
#[derive(Debug, Clone, Copy, ValueEnum)]
enum Arch {
    /// Match the architecture this process runs as
    Native,
    /// 32-bit images only
    X86,
    /// 64-bit images only
    X64,
}

impl Arch {
    fn image_class(self) -> ImageClass {
        match self {
            Self::Native => ImageClass::native(),
            Self::X86 => ImageClass::Pe32,
            Self::X64 => ImageClass::Pe32Plus,
        }
    }
}

fn default_jobs() -> usize {
    thread::available_parallelism().map(|n| n.get()).unwrap_or(4)
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize tracing
    let level = match cli.verbose {
        0 => Level::WARN,
        1 => Level::INFO,
        2 => Level::DEBUG,
        _ => Level::TRACE,
    };

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive(level.into()))
        .with_target(false)
        .init();

    if cli.jobs == 0 {
        bail!("--jobs must be at least 1");
    }

    let sink: Arc<dyn ReportSink> = if cli.quiet {
        Arc::new(NullSink)
    } else {
        Arc::new(ConsoleSink::new())
    };
    let ctx = ScanContext::new(cli.arch.image_class());
    let probe = Arc::new(PeProbe::new());

    // Dispatch based on input mode
    if let Some(ref file) = cli.input.file {
        process_single_file(file, &ctx, probe.as_ref(), sink.as_ref())
    } else if let Some(ref directory) = cli.input.directory {
        process_directory(&cli, directory, ctx, probe, sink)
    } else {
        bail!("Either --file or --directory must be specified")
    }
}

/// Validate and parse a single file
fn process_single_file(
    file: &Path,
    ctx: &ScanContext,
    probe: &PeProbe,
    sink: &dyn ReportSink,
) -> Result<()> {
    if !file.exists() {
        bail!("Input file does not exist: {}", file.display());
    }
    if !file.is_file() {
        bail!("Input path is not a file: {}", file.display());
    }

    match sniff_file(ctx, file, probe, sink) {
        Outcome::Parsed(report) => {
            debug!(path = %file.display(), "parsed");
            println!("{}", report.summary());
            Ok(())
        }
        Outcome::Rejected(reason) => {
            bail!("{}: rejected ({reason:?})", file.display())
        }
        Outcome::Failed { stage, source } => {
            bail!("{}: {} failed: {source}", file.display(), stage.label())
        }
    }
}

/// Sweep a directory tree
fn process_directory(
    cli: &Cli,
    directory: &Path,
    ctx: ScanContext,
    probe: Arc<PeProbe>,
    sink: Arc<dyn ReportSink>,
) -> Result<()> {
    if !directory.exists() {
        bail!("Directory does not exist: {}", directory.display());
    }
    if !directory.is_dir() {
        bail!("Path is not a directory: {}", directory.display());
    }

    info!(jobs = cli.jobs, "sweeping directory: {}", directory.display());

    let pool = WorkerPool::new(cli.jobs, Arc::clone(&sink))?;
    let walker = Walker::new(&pool, probe, Arc::clone(&sink), ctx).max_depth(cli.max_depth);

    let result = walker.walk(directory);
    drop(walker);
    // Wait for in-flight validations before reporting.
    pool.join();

    let stats = result?;
    println!(
        "Swept {} director{}: {} file(s) submitted, {} symlink(s) skipped, {} empty, {} entr{} skipped",
        stats.dirs_visited,
        if stats.dirs_visited == 1 { "y" } else { "ies" },
        stats.files_submitted,
        stats.symlinks_skipped,
        stats.empty_dirs,
        stats.entries_skipped,
        if stats.entries_skipped == 1 { "y" } else { "ies" },
    );

    Ok(())
}
