//! seeedflash CLI - keeps ArduPy firmware on Seeed boards up to date.
//!
//! ## Features
//!
//! - Watch for boards and offer firmware updates as they are plugged in
//! - Check a board's firmware version against the latest release
//! - Flash a firmware image with `bossac`
//! - Sync the ArduPy library archives
//! - Shell completion generation
//! - Environment variable support

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use clap_complete::Shell;
use console::style;
use env_logger::Env;
use log::debug;
use seeedflash::BoardCatalog;
use std::env;
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

mod commands;
mod config;
mod serial;

use config::{Config, Overrides, Settings};

/// Whether stderr is a terminal (set once at startup).
static STDERR_IS_TTY: AtomicBool = AtomicBool::new(true);

/// Set by the Ctrl-C handler.
static INTERRUPTED: AtomicBool = AtomicBool::new(false);

/// Check if spinners and colors should be used (TTY and colors enabled).
pub(crate) fn use_fancy_output() -> bool {
    STDERR_IS_TTY.load(Ordering::Relaxed) && console::colors_enabled_stderr()
}

/// Whether Ctrl-C was pressed.
pub(crate) fn was_interrupted() -> bool {
    INTERRUPTED.load(Ordering::SeqCst)
}

/// Errors with a dedicated exit code.
#[derive(Debug, thiserror::Error)]
pub(crate) enum CliError {
    /// Wrong or missing input; exits with 2.
    #[error("{0}")]
    Usage(String),
    /// The user cancelled; exits with 130.
    #[error("{0}")]
    Cancelled(String),
}

/// Process exit code for an error.
fn exit_code(err: &anyhow::Error) -> i32 {
    match err.downcast_ref::<CliError>() {
        Some(CliError::Usage(_)) => 2,
        Some(CliError::Cancelled(_)) => 130,
        None => 1,
    }
}

/// seeedflash - Firmware updater for Seeed ArduPy boards.
///
/// Environment variables:
///   SEEEDFLASH_CACHE_DIR        - Metadata and image cache directory
///   SEEEDFLASH_REMOTE_BASE      - Base URL of the firmware repository
///   SEEEDFLASH_CATALOG          - Board descriptor replacing the bundled one
///   SEEEDFLASH_PORT             - Default serial port for check/flash
///   SEEEDFLASH_NON_INTERACTIVE  - Non-interactive mode (answer prompts with "no")
#[derive(Parser)]
#[command(name = "seeedflash")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
#[allow(clippy::struct_excessive_bools)]
pub(crate) struct Cli {
    /// Verbose output level (-v, -vv for increasing detail).
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Quiet mode (suppress non-essential output).
    #[arg(short, long, global = true)]
    quiet: bool,

    /// Non-interactive mode (answer every update prompt with "no").
    #[arg(long, global = true, env = "SEEEDFLASH_NON_INTERACTIVE")]
    non_interactive: bool,

    /// Answer every update prompt with "yes".
    #[arg(short = 'y', long, global = true, conflicts_with = "non_interactive")]
    yes: bool,

    /// Path to a configuration file.
    #[arg(long = "config", global = true, value_name = "PATH")]
    config_path: Option<PathBuf>,

    /// Metadata and image cache directory.
    #[arg(long, global = true, value_name = "DIR", env = "SEEEDFLASH_CACHE_DIR")]
    cache_dir: Option<PathBuf>,

    /// Base URL of the firmware repository.
    #[arg(long, global = true, value_name = "URL", env = "SEEEDFLASH_REMOTE_BASE")]
    remote_base: Option<String>,

    /// Board descriptor (JSON) replacing the bundled catalog.
    #[arg(long, global = true, value_name = "PATH", env = "SEEEDFLASH_CATALOG")]
    catalog: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

/// Available commands.
#[derive(Subcommand)]
enum Commands {
    /// Watch for boards and offer firmware updates as they appear.
    Watch {
        /// Skip the library sync on startup.
        #[arg(long)]
        no_libs: bool,
    },

    /// List available serial ports.
    ListPorts {
        /// Output port list as JSON to stdout.
        #[arg(long)]
        json: bool,
    },

    /// List supported boards and their actions.
    Boards {
        /// Output the catalog as JSON to stdout.
        #[arg(long)]
        json: bool,
    },

    /// Compare a board's firmware with the latest release (no flashing).
    Check {
        /// Serial port of the board (auto-detected if not specified).
        #[arg(short, long, env = "SEEEDFLASH_PORT")]
        port: Option<String>,

        /// Output the result as JSON to stdout.
        #[arg(long)]
        json: bool,
    },

    /// Flash a firmware image.
    Flash {
        /// Path to the firmware image.
        image: PathBuf,

        /// Serial port of the board (auto-detected if not specified).
        #[arg(short, long, env = "SEEEDFLASH_PORT")]
        port: Option<String>,

        /// Total flashing attempts.
        #[arg(long, value_parser = clap::value_parser!(u32).range(1..))]
        attempts: Option<u32>,
    },

    /// Sync the ArduPy library archives into the workspace.
    Libs,

    /// Generate shell completion scripts.
    Completions {
        /// Shell type (detected from $SHELL if not specified).
        #[arg(value_enum)]
        shell: Option<Shell>,
    },
}

fn install_interrupt_handler() {
    let installed = ctrlc::set_handler(|| {
        // A second Ctrl-C gives up on a graceful stop.
        if INTERRUPTED.swap(true, Ordering::SeqCst) {
            std::process::exit(130);
        }
    });
    if let Err(e) = installed {
        debug!("Cannot install Ctrl-C handler: {e}");
    }
    seeedflash::set_interrupt_checker(was_interrupted);
}

fn load_catalog(settings: &Settings) -> Result<Arc<BoardCatalog>> {
    let catalog = match &settings.catalog_path {
        Some(path) => BoardCatalog::from_path(path)
            .with_context(|| format!("Failed to load board catalog {}", path.display()))?,
        None => BoardCatalog::bundled().context("Bundled board catalog is invalid")?,
    };
    debug!("Board catalog has {} entries", catalog.len());
    Ok(Arc::new(catalog))
}

fn run(cli: &Cli) -> Result<()> {
    let config = if let Some(ref path) = cli.config_path {
        Config::load_from_path(path)
    } else {
        Config::load()
    };
    let settings = Settings::resolve(
        &config,
        &Overrides {
            cache_dir: cli.cache_dir.clone(),
            remote_base: cli.remote_base.clone(),
            catalog: cli.catalog.clone(),
        },
    );

    match &cli.command {
        Commands::Watch { no_libs } => {
            let catalog = load_catalog(&settings)?;
            commands::watch::cmd_watch(cli, &settings, catalog, !*no_libs)
        },
        Commands::ListPorts { json } => {
            let catalog = load_catalog(&settings)?;
            commands::ports::cmd_list_ports(&catalog, *json);
            Ok(())
        },
        Commands::Boards { json } => {
            let catalog = load_catalog(&settings)?;
            commands::boards::cmd_boards(catalog, *json)
        },
        Commands::Check { port, json } => {
            let catalog = load_catalog(&settings)?;
            commands::check::cmd_check(cli, &settings, &catalog, port.as_deref(), *json)
        },
        Commands::Flash {
            image,
            port,
            attempts,
        } => {
            let catalog = load_catalog(&settings)?;
            commands::flash::cmd_flash(
                cli,
                &settings,
                &catalog,
                image,
                port.as_deref(),
                *attempts,
            )
        },
        Commands::Libs => {
            let catalog = load_catalog(&settings)?;
            commands::libs::cmd_libs(cli, &settings, &catalog)
        },
        Commands::Completions { shell } => {
            let shell = shell
                .or_else(commands::completions::detect_shell_type)
                .ok_or_else(|| {
                    CliError::Usage(
                        "Specify a shell type, e.g.: seeedflash completions bash".to_string(),
                    )
                })?;
            commands::completions::cmd_completions(shell);
            Ok(())
        },
    }
}

fn main() {
    let stderr_is_tty = console::Term::stderr().is_term();
    STDERR_IS_TTY.store(stderr_is_tty, Ordering::Relaxed);

    if env::var("NO_COLOR").is_ok() || !stderr_is_tty {
        console::set_colors_enabled(false);
        console::set_colors_enabled_stderr(false);
    }

    let cli = Cli::parse();

    let log_level = if cli.quiet {
        "warn"
    } else {
        match cli.verbose {
            0 => "info",
            1 => "debug",
            _ => "trace",
        }
    };
    env_logger::Builder::from_env(Env::default().default_filter_or(log_level))
        .format_target(cli.verbose >= 2)
        .format_timestamp(if cli.verbose >= 2 {
            Some(env_logger::TimestampPrecision::Millis)
        } else {
            None
        })
        .init();

    debug!(
        "seeedflash v{} (verbose level: {})",
        env!("CARGO_PKG_VERSION"),
        cli.verbose
    );

    install_interrupt_handler();

    if let Err(err) = run(&cli) {
        eprintln!("{} {err:#}", style("Error:").red().bold());
        std::process::exit(exit_code(&err));
    }
}
