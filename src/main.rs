//! # Plugin Gallery CLI (`gallery`)
//!
//! The `gallery` binary fetches the configured plugin sources, extracts the
//! documentation of every plugin and exports it as Hugo content.
//!
//! ## Usage
//!
//! ```bash
//! gallery --config ./gallery.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `gallery build` | Fetch all sources and export the content tree |
//! | `gallery sources` | List sources and their workspace cache state |
//! | `gallery inspect <FILE>...` | Print the records of local plugin files |
//! | `gallery stats` | Summarize the last export |
//! | `gallery completions <SHELL>` | Generate shell completions |
//!
//! ## Exit status
//!
//! `0` success, `1` unrecoverable failure, `2` some sources failed but the
//! content was published, `3` interrupted before publishing.

use clap::{CommandFactory, Parser, Subcommand};
use clap_complete::Shell;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

use plugin_gallery::config;
use plugin_gallery::inspect;
use plugin_gallery::pipeline::{self, BuildOptions};
use plugin_gallery::progress::ProgressMode;
use plugin_gallery::sources;
use plugin_gallery::stats;

/// Plugin Gallery: collect monitoring plugin documentation into a static
/// site.
///
/// All commands accept a `--config` flag pointing to a TOML configuration
/// file. See `gallery.example.toml` for a full example.
#[derive(Parser)]
#[command(
    name = "gallery",
    about = "Plugin Gallery — collect monitoring plugin documentation into Hugo content",
    version,
    long_about = "Plugin Gallery fetches plugin sources (git repositories, release archives, \
    local directories), parses the POD documentation and magic markers embedded in every \
    plugin, and exports normalized records, taxonomies and statistics as Hugo content."
)]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "./gallery.toml")]
    config: PathBuf,

    /// More log output (`-v` debug, `-vv` trace). `RUST_LOG` takes precedence.
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Only log errors.
    #[arg(short, long, global = true, conflicts_with = "verbose")]
    quiet: bool,

    #[command(subcommand)]
    command: Commands,
}

/// Top-level CLI commands.
#[derive(Subcommand)]
enum Commands {
    /// Fetch all sources and export the gallery content.
    ///
    /// Sources are fetched concurrently; a failing source is reported and
    /// skipped while the others are still exported. The content tree is
    /// replaced only when the export completed.
    Build {
        /// Reuse the cached workspaces without fetching.
        #[arg(long)]
        skip_fetch: bool,

        /// Output directory (overrides `[output].dir`).
        #[arg(long)]
        output: Option<PathBuf>,

        /// Progress on stderr. Defaults to `human` on a terminal, else `off`.
        #[arg(long, value_enum)]
        progress: Option<ProgressMode>,
    },

    /// List configured sources and their workspace cache state.
    Sources,

    /// Parse local plugin files and print their records as JSON.
    ///
    /// Nothing is fetched; the configuration is only used for category
    /// synonyms and falls back to defaults when missing.
    Inspect {
        /// Plugin files to inspect.
        #[arg(required = true)]
        files: Vec<PathBuf>,
    },

    /// Summarize an exported content tree.
    Stats {
        /// Content directory (overrides `[output].dir`).
        #[arg(long)]
        output: Option<PathBuf>,
    },

    /// Generate shell completions.
    Completions {
        shell: Shell,
    },
}

fn init_tracing(verbose: u8, quiet: bool) {
    let default = match (quiet, verbose) {
        (true, _) => "error",
        (false, 0) => "info",
        (false, 1) => "debug",
        (false, _) => "trace",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    init_tracing(cli.verbose, cli.quiet);

    match run(cli).await {
        Ok(code) => code,
        Err(e) => {
            eprintln!("Error: {:#}", e);
            ExitCode::from(1)
        }
    }
}

async fn run(cli: Cli) -> anyhow::Result<ExitCode> {
    // Commands that don't require config
    match &cli.command {
        Commands::Completions { shell } => {
            clap_complete::generate(*shell, &mut Cli::command(), "gallery", &mut std::io::stdout());
            return Ok(ExitCode::SUCCESS);
        }
        Commands::Inspect { files } => {
            // Use config if available, otherwise a minimal default
            let cfg =
                config::load_config(&cli.config).unwrap_or_else(|_| config::Config::minimal());
            inspect::run_inspect(&cfg, files.as_slice())?;
            return Ok(ExitCode::SUCCESS);
        }
        Commands::Stats { output: Some(dir) } => {
            stats::run_stats(dir)?;
            return Ok(ExitCode::SUCCESS);
        }
        _ => {}
    }

    let cfg = config::load_config(&cli.config)?;

    match cli.command {
        Commands::Build {
            skip_fetch,
            output,
            progress,
        } => {
            let mode = progress.unwrap_or_else(ProgressMode::default_for_tty);
            let options = BuildOptions { skip_fetch, output };
            let summary = pipeline::run_build(
                &cfg,
                &options,
                Arc::from(mode.reporter()),
                pipeline::cancel_on_ctrl_c(),
            )
            .await?;
            pipeline::print_summary(&summary);
            Ok(ExitCode::from(summary.outcome.exit_code() as u8))
        }
        Commands::Sources => {
            sources::list_sources(&cfg)?;
            Ok(ExitCode::SUCCESS)
        }
        Commands::Stats { output } => {
            let dir = output.unwrap_or_else(|| cfg.output.dir.clone());
            stats::run_stats(&dir)?;
            Ok(ExitCode::SUCCESS)
        }
        Commands::Completions { .. } | Commands::Inspect { .. } => {
            // Handled above (before config loading)
            unreachable!()
        }
    }
}
