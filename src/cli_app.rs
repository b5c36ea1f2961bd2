//! Top-level CLI definition and dispatch.

use std::ffi::OsString;
use std::io::Write;
use std::os::unix::ffi::{OsStrExt, OsStringExt};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::AtomicBool;
use std::time::Instant;

use clap::{Args, Parser, Subcommand};

use fsledger::core::config::Config;
use fsledger::core::errors::{ErrorLedger, FslError, Result};
use fsledger::core::paths::{reduce_paths, resolve_physical};
use fsledger::crawl::exclude::ExcludeMatcher;
use fsledger::crawl::walker::{WalkOptions, Walker};
use fsledger::index::check::check;
use fsledger::index::merge::{DiffKind, MergeOptions, diff_index, update_index};
use fsledger::index::store::{Index, ReadOnlyIndex};
use fsledger::logger::journal::Journal;

/// fsledger — incremental filesystem indexer for a content-addressed backup
/// system.
#[derive(Debug, Parser)]
#[command(
    name = "fsl",
    version,
    about = "Incremental filesystem indexer",
    long_about = None,
    arg_required_else_help = true
)]
pub struct Cli {
    /// Subcommand to execute.
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Clone, Subcommand)]
enum Command {
    /// Print the walker's stream, one path per line.
    #[command(alias = "crawler")]
    Crawl(CrawlArgs),
    /// Maintain the persistent index.
    Index(IndexArgs),
}

/// The exclude flag family shared by both subcommands.
#[derive(Debug, Clone, Args, Default)]
struct ExcludeArgs {
    /// Absolute path to exclude (repeatable).
    #[arg(long = "exclude", value_name = "PATH")]
    exclude: Vec<PathBuf>,
    /// File with one exclude path per line (repeatable).
    #[arg(long = "exclude-from", value_name = "FILE")]
    exclude_from: Vec<PathBuf>,
    /// Skip paths matching the unanchored regex (repeatable).
    #[arg(long = "exclude-rx", value_name = "RX")]
    exclude_rx: Vec<String>,
    /// File with one exclude regex per line (repeatable).
    #[arg(long = "exclude-rx-from", value_name = "FILE")]
    exclude_rx_from: Vec<PathBuf>,
}

#[derive(Debug, Clone, Args)]
struct CrawlArgs {
    /// Paths to walk.
    #[arg(value_name = "PATH", required = true)]
    paths: Vec<PathBuf>,
    /// Don't cross filesystem boundaries.
    #[arg(short = 'x', long, visible_alias = "one-file-system")]
    xdev: bool,
    #[command(flatten)]
    excludes: ExcludeArgs,
    /// Walk without printing.
    #[arg(short, long)]
    quiet: bool,
    /// Print entry count and throughput to stderr after the walk.
    #[arg(long)]
    profile: bool,
}

#[derive(Debug, Clone, Args)]
#[allow(clippy::struct_excessive_bools)]
struct IndexArgs {
    /// Paths to index.
    #[arg(value_name = "PATH")]
    paths: Vec<PathBuf>,
    /// Recursively update the index for the given paths (default mode).
    #[arg(short, long)]
    update: bool,
    /// Print the indexed paths (may be combined with --update).
    #[arg(short, long)]
    print: bool,
    /// Print only paths that were added, deleted, or modified.
    #[arg(short, long)]
    modified: bool,
    /// Print each path with a status character (A/M/D).
    #[arg(short, long)]
    status: bool,
    /// Verify index file integrity.
    #[arg(long)]
    check: bool,
    /// Delete the default index file.
    #[arg(long)]
    clear: bool,
    /// Index file path (default: <repo>/bupindex.sqlite).
    #[arg(short = 'f', long, value_name = "FILE")]
    indexfile: Option<PathBuf>,
    /// Repository directory (default: $FSLEDGER_REPO).
    #[arg(long, value_name = "DIR")]
    repo: Option<PathBuf>,
    /// Don't cross filesystem boundaries.
    #[arg(short = 'x', long, visible_alias = "one-file-system")]
    xdev: bool,
    #[command(flatten)]
    excludes: ExcludeArgs,
    /// Increase log output (can be used more than once).
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,
}

/// Effective index modes after defaulting and mutual-exclusion checks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Modes {
    update: bool,
    print: bool,
    modified: bool,
    status: bool,
    check: bool,
    clear: bool,
}

fn resolve_modes(args: &IndexArgs) -> Result<Modes> {
    let flags = [
        args.update,
        args.print,
        args.modified,
        args.status,
        args.check,
        args.clear,
    ];
    let selected = flags.iter().filter(|&&f| f).count();

    let print_update = selected == 2 && args.print && args.update;
    if selected > 1 && !print_update {
        return Err(FslError::Misuse {
            details: "modes are mutually exclusive (except --print with --update)".to_string(),
        });
    }
    if args.clear && args.indexfile.is_some() {
        return Err(FslError::Misuse {
            details: "cannot clear an external index (via -f)".to_string(),
        });
    }

    let update = args.update || selected == 0;
    if update && args.paths.is_empty() {
        return Err(FslError::Misuse {
            details: "update mode requested but no paths given".to_string(),
        });
    }
    if (args.modified || args.status) && args.paths.is_empty() {
        return Err(FslError::Misuse {
            details: "--modified/--status need the paths to compare against".to_string(),
        });
    }

    Ok(Modes {
        update,
        print: args.print,
        modified: args.modified,
        status: args.status,
        check: args.check,
        clear: args.clear,
    })
}

fn read_pattern_lines(path: &Path) -> Result<Vec<String>> {
    let raw = std::fs::read_to_string(path).map_err(|source| FslError::io(path, source))?;
    Ok(raw
        .lines()
        .map(str::trim_end)
        .filter(|line| !line.is_empty())
        .map(ToString::to_string)
        .collect())
}

fn build_matcher(args: &ExcludeArgs, config: &Config) -> Result<ExcludeMatcher> {
    let mut literals: Vec<PathBuf> = config.exclude_paths.clone();
    literals.extend(args.exclude.iter().cloned());
    for file in &args.exclude_from {
        literals.extend(read_pattern_lines(file)?.into_iter().map(PathBuf::from));
    }

    let mut patterns: Vec<String> = config.exclude_rx.clone();
    patterns.extend(args.exclude_rx.iter().cloned());
    for file in &args.exclude_rx_from {
        patterns.extend(read_pattern_lines(file)?);
    }

    ExcludeMatcher::new(literals, patterns)
}

fn interrupt_flag() -> Result<Arc<AtomicBool>> {
    let flag = Arc::new(AtomicBool::new(false));
    signal_hook::flag::register(signal_hook::consts::SIGINT, Arc::clone(&flag)).map_err(
        |err| FslError::Runtime {
            details: format!("cannot install SIGINT handler: {err}"),
        },
    )?;
    Ok(flag)
}

fn write_path_line(out: &mut impl Write, path: &Path) -> Result<()> {
    out.write_all(path.as_os_str().as_bytes())
        .and_then(|()| out.write_all(b"\n"))
        .map_err(|source| FslError::io(path, source))
}

/// Dispatch a parsed command line; returns the process exit code.
pub fn run(cli: &Cli) -> Result<i32> {
    match &cli.command {
        Command::Crawl(args) => run_crawl(args),
        Command::Index(args) => run_index(args),
    }
}

fn run_crawl(args: &CrawlArgs) -> Result<i32> {
    let matcher = Arc::new(build_matcher(&args.excludes, &Config::default())?);
    let journal = Arc::new(Journal::stderr_only(0));
    let ledger = Arc::new(ErrorLedger::new());

    let walker = Walker::new(
        args.paths.clone(),
        matcher,
        WalkOptions {
            xdev: args.xdev,
            repo_dir: None,
            full_paths: true,
            depths: Vec::new(),
        },
        journal,
        Arc::clone(&ledger),
    )
    .with_interrupt(interrupt_flag()?);

    let started = Instant::now();
    let mut entries: u64 = 0;
    let stdout = std::io::stdout();
    let mut out = stdout.lock();
    for item in walker {
        let entry = item?;
        entries += 1;
        if !args.quiet {
            write_path_line(&mut out, Path::new(&entry.name))?;
        }
    }
    out.flush().map_err(|source| FslError::io("stdout", source))?;

    if args.profile {
        let elapsed = started.elapsed().as_secs_f64();
        let rate = if elapsed > 0.0 {
            #[allow(clippy::cast_precision_loss)]
            let rate = entries as f64 / elapsed;
            rate
        } else {
            0.0
        };
        eprintln!("fsl: crawl entries={entries} elapsed={elapsed:.3}s rate={rate:.0}/s");
    }

    finish(&ledger)
}

fn run_index(args: &IndexArgs) -> Result<i32> {
    let modes = resolve_modes(args)?;
    let config = Config::discover(args.repo.as_deref())?;
    let matcher = Arc::new(build_matcher(&args.excludes, &config)?);
    let journal = Arc::new(Journal::open(
        config.journal_file().as_deref(),
        args.verbose,
    ));
    let ledger = Arc::new(ErrorLedger::new());

    let index_file = config.index_file(args.indexfile.as_deref())?;

    if modes.clear {
        match std::fs::remove_file(&index_file) {
            Ok(()) => {}
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {}
            Err(source) => return Err(FslError::io(&index_file, source)),
        }
        return finish(&ledger);
    }

    if modes.check {
        let store = ReadOnlyIndex::open(&index_file)?;
        let violations = check(&store)?;
        let stdout = std::io::stdout();
        let mut out = stdout.lock();
        for violation in &violations {
            writeln!(out, "{violation}").map_err(|source| FslError::io("stdout", source))?;
        }
        if violations.is_empty() {
            return finish(&ledger);
        }
        return Ok(1);
    }

    let merge_options = MergeOptions {
        xdev: args.xdev || config.xdev,
        repo_dir: config.repo_dir.as_deref().map(resolve_physical),
        interrupt: Some(interrupt_flag()?),
    };

    if modes.update {
        let index = Index::open(&index_file)?;
        for (canonical, _original) in reduce_paths(&args.paths) {
            match update_index(
                &index,
                &canonical,
                &matcher,
                &merge_options,
                &journal,
                &ledger,
            ) {
                Ok(_) => {}
                // A root that vanished before indexing is recorded, not fatal.
                Err(FslError::Io { path, source })
                    if source.kind() == std::io::ErrorKind::NotFound =>
                {
                    ledger.record(format!("{}: cannot index missing path", path.display()));
                }
                Err(err) => return Err(err),
            }
        }
        index.commit()?;
    }

    if modes.print {
        let store = ReadOnlyIndex::open(&index_file)?;
        print_index_listing(&store)?;
    }

    if modes.modified || modes.status {
        let store = ReadOnlyIndex::open(&index_file)?;
        let stdout = std::io::stdout();
        let mut out = stdout.lock();
        let mut failed_io = None;
        for (canonical, _original) in reduce_paths(&args.paths) {
            diff_index(
                &store,
                &canonical,
                &matcher,
                &merge_options,
                &journal,
                &ledger,
                |event| {
                    let result = if modes.status {
                        let marker = match event.kind {
                            DiffKind::Added => 'A',
                            DiffKind::Deleted => 'D',
                            DiffKind::Modified => 'M',
                            DiffKind::Unchanged => ' ',
                        };
                        write!(out, "{marker} ")
                            .map_err(|source| FslError::io("stdout", source))
                            .and_then(|()| write_path_line(&mut out, &event.path))
                    } else if event.kind == DiffKind::Unchanged {
                        Ok(())
                    } else {
                        write_path_line(&mut out, &event.path)
                    };
                    if let Err(err) = result {
                        failed_io.get_or_insert(err);
                    }
                },
            )?;
        }
        if let Some(err) = failed_io {
            return Err(err);
        }
    }

    finish(&ledger)
}

/// Pre-order listing of every indexed path, one per line.
fn print_index_listing(store: &ReadOnlyIndex) -> Result<()> {
    let stdout = std::io::stdout();
    let mut out = stdout.lock();
    let mut segments: Vec<OsString> = Vec::new();

    for item in store.pre_order_iter(None)? {
        let entry = item?;
        segments.truncate(entry.depth);
        segments.push(OsString::from_vec(entry.name));

        let mut path = PathBuf::new();
        for segment in &segments {
            path.push(segment);
        }
        write_path_line(&mut out, &path)?;
    }
    Ok(())
}

/// Common exit path: warn when transient errors were recorded.
fn finish(ledger: &ErrorLedger) -> Result<i32> {
    if ledger.is_empty() {
        Ok(0)
    } else {
        eprintln!("WARNING: {} errors encountered.", ledger.count());
        Ok(1)
    }
}
