//! Top-level CLI definition and dispatch.

use std::collections::BTreeSet;
use std::fs;
use std::io::{self, IsTerminal, Write};
use std::path::{Path, PathBuf};

use clap::{Args, CommandFactory, Parser, Subcommand};
use clap_complete::{Shell as CompletionShell, generate};
use colored::{Colorize, control};
use serde_json::{Value, json};
use thiserror::Error;

use kbuild_slim::core::config::Config;
use kbuild_slim::core::errors::KslError;
use kbuild_slim::reduce::ReductionOutcome;
use kbuild_slim::reduce::inventory::{ExclusionRules, scan_inventory};

/// kslim: shrink a kernel source tree to the files one build actually opens.
#[derive(Debug, Parser)]
#[command(
    name = "kslim",
    author,
    version,
    about = "Kernel build source reducer",
    long_about = None,
    arg_required_else_help = true
)]
pub struct Cli {
    /// Override config file path.
    #[arg(long, global = true, value_name = "PATH")]
    config: Option<PathBuf>,
    /// Force JSON output mode.
    #[arg(long, global = true)]
    json: bool,
    /// Disable colored output.
    #[arg(long, global = true)]
    no_color: bool,
    /// Increase verbosity.
    #[arg(short, long, global = true, conflicts_with = "quiet")]
    verbose: bool,
    /// Quiet mode (errors only).
    #[arg(short, long, global = true, conflicts_with = "verbose")]
    quiet: bool,
    /// Subcommand to execute.
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Clone, Subcommand)]
enum Command {
    /// Run a build and delete every source file it did not open.
    Reduce(ReduceArgs),
    /// List what a reduction would consider, without building.
    Inventory(InventoryArgs),
    /// View configuration state.
    Config(ConfigArgs),
    /// Generate shell completions.
    Completions(CompletionsArgs),
}

#[derive(Debug, Clone, Args)]
struct ReduceArgs {
    /// Tree to reduce.
    #[arg(long, default_value = ".", value_name = "DIR")]
    root: PathBuf,
    /// Plan and report, but delete nothing.
    #[arg(long)]
    dry_run: bool,
    /// Leave directories that end up empty in place.
    #[arg(long)]
    keep_empty_dirs: bool,
    /// Write the touched files, one relative path per line.
    #[arg(long, value_name = "FILE")]
    touched_list: Option<PathBuf>,
    /// Extra root-relative path to keep (repeatable).
    #[arg(long = "exclude", value_name = "PATH")]
    excludes: Vec<String>,
    /// Build command to supervise.
    #[arg(last = true, required = true, num_args = 1.., value_name = "CMD")]
    build: Vec<String>,
}

#[derive(Debug, Clone, Args)]
struct InventoryArgs {
    /// Tree to scan.
    #[arg(long, default_value = ".", value_name = "DIR")]
    root: PathBuf,
    /// Print every candidate file.
    #[arg(long)]
    list: bool,
    /// Extra root-relative path to keep (repeatable).
    #[arg(long = "exclude", value_name = "PATH")]
    excludes: Vec<String>,
}

#[derive(Debug, Clone, Args, Default)]
struct ConfigArgs {
    /// Config operation to run.
    #[command(subcommand)]
    command: Option<ConfigCommand>,
}

#[derive(Debug, Clone, Subcommand)]
enum ConfigCommand {
    /// Print resolved config file path.
    Path,
    /// Print effective merged configuration.
    Show,
    /// Validate configuration and exit.
    Validate,
}

#[derive(Debug, Clone, Args)]
struct CompletionsArgs {
    /// Shell to generate completion script for.
    #[arg(value_enum)]
    shell: CompletionShell,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum OutputMode {
    Human,
    Json,
}

/// CLI error type with explicit exit-code mapping.
#[derive(Debug, Error)]
pub enum CliError {
    /// Invalid user input at runtime.
    #[error("{0}")]
    User(String),
    /// Environment/runtime failure.
    #[error("{0}")]
    Runtime(String),
    /// Reduction ran but some deletions failed.
    #[error("{0}")]
    Partial(String),
    /// Library failure; carries its own exit status.
    #[error(transparent)]
    Reduction(#[from] KslError),
    /// JSON serialization failed.
    #[error("failed to serialize output: {0}")]
    Json(#[from] serde_json::Error),
    /// Output write failed.
    #[error("failed to write output: {0}")]
    Io(#[from] io::Error),
}

impl CliError {
    /// Process exit code contract for the CLI.
    ///
    /// A failed build exits with the build's own status.
    pub const fn exit_code(&self) -> i32 {
        match self {
            Self::User(_) => 1,
            Self::Runtime(_) | Self::Io(_) => 2,
            Self::Json(_) => 3,
            Self::Partial(_) => 4,
            Self::Reduction(err) => err.exit_code(),
        }
    }
}

/// Dispatch CLI commands.
pub fn run(cli: &Cli) -> Result<(), CliError> {
    if cli.no_color {
        control::set_override(false);
    }

    match &cli.command {
        Command::Reduce(args) => run_reduce(cli, args),
        Command::Inventory(args) => run_inventory(cli, args),
        Command::Config(args) => run_config(cli, args),
        Command::Completions(args) => {
            let mut command = Cli::command();
            let binary_name = command.get_name().to_string();
            generate(args.shell, &mut command, binary_name, &mut io::stdout());
            Ok(())
        }
    }
}

// ──────────────────── reduce ────────────────────

fn run_reduce(cli: &Cli, args: &ReduceArgs) -> Result<(), CliError> {
    let mut config = Config::load(cli.config.as_deref())?;
    config.reduce.dry_run |= args.dry_run;
    if args.keep_empty_dirs {
        config.reduce.prune_empty_dirs = false;
    }
    config.inventory.excluded_paths.extend(args.excludes.iter().cloned());
    config.normalize_paths();
    config.validate()?;

    let root = resolve_root(&args.root)?;
    if cli.verbose {
        eprintln!(
            "[KSL-REDUCE] tree {} (config {})",
            root.display(),
            config.paths.config_file.display()
        );
        eprintln!("[KSL-RUN] supervising: {}", args.build.join(" "));
    }

    let outcome = execute_reduction(&config, &root, &args.build)?;

    if let Some(list) = &args.touched_list {
        write_touched_list(list, &outcome.touched)?;
    }

    match output_mode(cli) {
        OutputMode::Human => {
            if !cli.quiet {
                print_outcome_human(&outcome, cli.verbose);
            }
        }
        OutputMode::Json => {
            let payload = json!({
                "command": "reduce",
                "outcome": serde_json::to_value(&outcome)?,
            });
            write_json_line(&payload)?;
        }
    }

    outcome
        .deletion
        .ensure_complete()
        .map_err(|e| CliError::Partial(e.to_string()))
}

#[cfg(target_os = "linux")]
fn execute_reduction(
    config: &Config,
    root: &Path,
    build: &[String],
) -> Result<ReductionOutcome, CliError> {
    use kbuild_slim::logger::journal::Journal;
    use kbuild_slim::reduce::{ReductionRequest, reduce};

    let Some((program, rest)) = build.split_first() else {
        return Err(CliError::User("missing build command after --".to_string()));
    };
    let request = ReductionRequest::from_config(root, config)?;
    let mut journal = Journal::open(config.paths.journal_file.as_deref());
    let mut command = std::process::Command::new(program);
    command.args(rest);
    Ok(reduce(&request, &mut command, &mut journal)?)
}

#[cfg(not(target_os = "linux"))]
fn execute_reduction(
    _config: &Config,
    _root: &Path,
    _build: &[String],
) -> Result<ReductionOutcome, CliError> {
    Err(CliError::Runtime(
        "reduce needs Linux inotify; use `kslim inventory` to preview".to_string(),
    ))
}

/// One path per line, byte-for-byte as named on disk.
fn write_touched_list(path: &Path, touched: &BTreeSet<PathBuf>) -> Result<(), CliError> {
    let mut body = Vec::new();
    for file in touched {
        body.extend_from_slice(&path_bytes(file));
        body.push(b'\n');
    }
    fs::write(path, body).map_err(|e| CliError::Reduction(KslError::io(path, e)))
}

#[cfg(unix)]
fn path_bytes(path: &Path) -> Vec<u8> {
    use std::os::unix::ffi::OsStrExt;
    path.as_os_str().as_bytes().to_vec()
}

#[cfg(not(unix))]
fn path_bytes(path: &Path) -> Vec<u8> {
    path.to_string_lossy().into_owned().into_bytes()
}

fn print_outcome_human(outcome: &ReductionOutcome, verbose: bool) {
    let heading = if outcome.dry_run {
        "Reduction planned (dry run)".yellow().bold()
    } else {
        "Reduction complete".green().bold()
    };
    println!("{heading}: {}", outcome.root.display());
    println!(
        "  Inventory: {} files in {} watched directories",
        outcome.inventory_files, outcome.watches
    );
    println!(
        "  Build: {} events in {} chunks ({} bytes) over {} polls",
        outcome.events, outcome.chunks, outcome.bytes, outcome.polls
    );
    println!("  Touched: {}", outcome.touched.len());
    if outcome.dry_run {
        println!("  Would delete: {}", outcome.unused);
    } else {
        println!(
            "  Deleted: {} ({} already absent), {} empty directories pruned",
            outcome.deletion.deleted, outcome.deletion.already_absent, outcome.deletion.dirs_pruned
        );
    }
    for failure in &outcome.deletion.failures {
        println!(
            "  {} {}: {}",
            "FAILED".red(),
            failure.path.display(),
            failure.error
        );
    }
    if verbose {
        println!("  Elapsed: {} ms", outcome.elapsed_ms);
    }
}

// ──────────────────── inventory ────────────────────

fn run_inventory(cli: &Cli, args: &InventoryArgs) -> Result<(), CliError> {
    let mut config = Config::load(cli.config.as_deref())?;
    config.inventory.excluded_paths.extend(args.excludes.iter().cloned());
    config.normalize_paths();
    config.validate()?;

    let root = resolve_root(&args.root)?;
    let rules = ExclusionRules::from_config(&config.inventory)?;
    let inventory = scan_inventory(&root, &rules)?;

    match output_mode(cli) {
        OutputMode::Human => {
            if !cli.quiet {
                println!("{}: {}", "Inventory".bold(), root.display());
                println!("  Files: {}", inventory.file_count());
                println!("  Directories: {}", inventory.dirs.len());
            }
            if args.list {
                for file in &inventory.files {
                    println!("{}", file.display());
                }
            }
        }
        OutputMode::Json => {
            let mut payload = json!({
                "command": "inventory",
                "root": root.to_string_lossy(),
                "files": inventory.file_count(),
                "dirs": inventory.dirs.len(),
            });
            if args.list {
                payload["paths"] = serde_json::to_value(&inventory.files)?;
            }
            write_json_line(&payload)?;
        }
    }
    Ok(())
}

fn resolve_root(root: &Path) -> Result<PathBuf, CliError> {
    fs::canonicalize(root).map_err(|e| CliError::Reduction(KslError::io(root, e)))
}

// ──────────────────── config ────────────────────

fn run_config(cli: &Cli, args: &ConfigArgs) -> Result<(), CliError> {
    match &args.command {
        None | Some(ConfigCommand::Path) => {
            let path = cli.config.clone().unwrap_or_else(Config::default_path);
            let exists = path.exists();

            match output_mode(cli) {
                OutputMode::Human => {
                    println!("{}", path.display());
                    if !exists {
                        println!("  (file does not exist; defaults will be used)");
                    }
                }
                OutputMode::Json => {
                    let payload = json!({
                        "command": "config path",
                        "path": path.to_string_lossy(),
                        "exists": exists,
                    });
                    write_json_line(&payload)?;
                }
            }
            Ok(())
        }
        Some(ConfigCommand::Show) => {
            let config = Config::load(cli.config.as_deref())?;

            match output_mode(cli) {
                OutputMode::Human => {
                    let toml_str = toml::to_string_pretty(&config)
                        .map_err(|e| CliError::Runtime(format!("serialize config: {e}")))?;
                    println!("{toml_str}");
                }
                OutputMode::Json => {
                    let payload = json!({
                        "command": "config show",
                        "config": serde_json::to_value(&config)?,
                    });
                    write_json_line(&payload)?;
                }
            }
            Ok(())
        }
        Some(ConfigCommand::Validate) => match Config::load(cli.config.as_deref()) {
            Ok(config) => {
                let hash = config.stable_hash()?;

                match output_mode(cli) {
                    OutputMode::Human => {
                        println!("Configuration is valid.");
                        println!("  Source: {}", config.paths.config_file.display());
                        println!("  Hash: {hash}");
                    }
                    OutputMode::Json => {
                        let payload = json!({
                            "command": "config validate",
                            "valid": true,
                            "path": config.paths.config_file.to_string_lossy(),
                            "hash": hash,
                        });
                        write_json_line(&payload)?;
                    }
                }
                Ok(())
            }
            Err(e) => {
                match output_mode(cli) {
                    OutputMode::Human => {
                        eprintln!("Configuration is INVALID: {e}");
                    }
                    OutputMode::Json => {
                        let payload = json!({
                            "command": "config validate",
                            "valid": false,
                            "error": e.to_string(),
                            "code": e.code(),
                        });
                        write_json_line(&payload)?;
                    }
                }
                Err(CliError::User(format!("invalid config: {e}")))
            }
        },
    }
}

// ──────────────────── output ────────────────────

fn write_json_line(payload: &Value) -> Result<(), CliError> {
    let mut stdout = io::stdout().lock();
    serde_json::to_writer(&mut stdout, payload)?;
    writeln!(stdout)?;
    Ok(())
}

fn output_mode(cli: &Cli) -> OutputMode {
    let env_mode = std::env::var("KSL_OUTPUT_FORMAT").ok();
    resolve_output_mode(cli.json, env_mode.as_deref(), io::stdout().is_terminal())
}

fn resolve_output_mode(json_flag: bool, env_mode: Option<&str>, stdout_is_tty: bool) -> OutputMode {
    if json_flag {
        return OutputMode::Json;
    }

    let fallback = if stdout_is_tty {
        OutputMode::Human
    } else {
        OutputMode::Json
    };

    match env_mode
        .map(str::trim)
        .map(str::to_ascii_lowercase)
        .as_deref()
    {
        Some("json") => OutputMode::Json,
        Some("human") => OutputMode::Human,
        _ => fallback,
    }
}
