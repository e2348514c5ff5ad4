use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::process::ExitCode;
use tokio::runtime::Runtime;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use papertrail::cli::CommandContext;
use papertrail::cli::commands;

#[derive(Parser)]
#[command(name = "papertrail")]
#[command(
    version,
    about = "Resumable checkpoints for multi-stage paper analysis"
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    #[arg(long, short, help = "Project config file (default: .papertrail/config.toml)")]
    config: Option<PathBuf>,

    #[arg(long)]
    verbose: bool,

    #[arg(long, short)]
    quiet: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Show the subject key a paper resolves to
    Subject {
        #[arg(help = "Path to the paper")]
        paper: PathBuf,
    },

    /// Inspect and select stored checkpoints
    Checkpoints {
        #[command(subcommand)]
        action: CheckpointAction,
    },

    /// Apply the configured retention policy
    Prune {
        #[arg(long, help = "Only prune this subject")]
        subject: Option<String>,
        #[arg(long = "dry-run", help = "Show what would be deleted")]
        dry_run: bool,
    },

    /// Remove every stored checkpoint
    Clean {
        #[arg(long, short, help = "Skip confirmation")]
        yes: bool,
    },

    /// Manage configuration
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Subcommand)]
enum CheckpointAction {
    /// List checkpoints for a paper, newest first
    List {
        paper: PathBuf,
        #[arg(
            short = 'f',
            long,
            default_value = "text",
            help = "Output format: text, json"
        )]
        format: String,
    },
    /// Show one checkpoint
    Show {
        file: PathBuf,
        #[arg(long, help = "Render as markdown")]
        markdown: bool,
    },
    /// Store statistics
    Stats,
    /// Compare a checkpoint with the current paper and configuration
    Verify { file: PathBuf, paper: PathBuf },
    /// Choose the checkpoint to resume from (0 = start fresh)
    Select {
        paper: PathBuf,
        #[arg(long, help = "Use the newest valid checkpoint")]
        latest: bool,
        #[arg(long, help = "Use a specific checkpoint file", conflicts_with = "latest")]
        checkpoint: Option<PathBuf>,
    },
}

#[derive(Subcommand)]
enum ConfigAction {
    /// Show current configuration (merged from all sources)
    Show {
        #[arg(short = 'g', long, help = "Show global config file only")]
        global: bool,
        #[arg(
            short = 'f',
            long,
            default_value = "toml",
            help = "Output format: toml, json, yaml"
        )]
        format: String,
    },
    /// Show configuration file paths
    Path,
    /// Initialize configuration
    Init {
        #[arg(long, short, help = "Initialize global config")]
        global: bool,
        #[arg(long, help = "Overwrite existing config")]
        force: bool,
    },
}

/// Set up panic handler for graceful error reporting
fn setup_panic_handler() {
    let default_hook = std::panic::take_hook();

    std::panic::set_hook(Box::new(move |panic_info| {
        let message = if let Some(s) = panic_info.payload().downcast_ref::<&str>() {
            s.to_string()
        } else if let Some(s) = panic_info.payload().downcast_ref::<String>() {
            s.clone()
        } else {
            "Unknown panic".to_string()
        };

        eprintln!("\n\x1b[1;31m━━━ PANIC ━━━\x1b[0m");
        eprintln!("\x1b[31mpapertrail encountered an unexpected error:\x1b[0m");
        eprintln!("  {}", message);

        if let Some(location) = panic_info.location() {
            eprintln!(
                "\x1b[90mLocation: {}:{}:{}\x1b[0m",
                location.file(),
                location.line(),
                location.column()
            );
        }
        eprintln!();

        // Call default hook for backtrace (if RUST_BACKTRACE=1)
        default_hook(panic_info);
    }));
}

fn main() -> ExitCode {
    setup_panic_handler();

    match run_cli() {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("\x1b[31mError:\x1b[0m {}", e);
            ExitCode::FAILURE
        }
    }
}

fn run_cli() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let ctx = CommandContext::load(cli.config.as_deref());

    let filter = if cli.verbose {
        "debug"
    } else if cli.quiet {
        "error"
    } else {
        ctx.as_ref()
            .map(|c| c.config.logging.level.as_str())
            .unwrap_or("info")
    };

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| filter.into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Initialization must work even when the existing config does not load
    if let Commands::Config {
        action: ConfigAction::Init { global, force },
    } = cli.command
    {
        if global {
            commands::config::init_global(force)?;
        } else {
            commands::config::init_project(force)?;
        }
        return Ok(());
    }

    let ctx = ctx?;
    match cli.command {
        Commands::Subject { paper } => {
            commands::subject::run(&ctx, &paper)?;
        }
        Commands::Checkpoints { action } => match action {
            CheckpointAction::List { paper, format } => {
                commands::checkpoints::list(&ctx, &paper, &format)?;
            }
            CheckpointAction::Show { file, markdown } => {
                commands::checkpoints::show(&ctx, &file, markdown)?;
            }
            CheckpointAction::Stats => {
                commands::checkpoints::stats(&ctx)?;
            }
            CheckpointAction::Verify { file, paper } => {
                commands::checkpoints::verify(&ctx, &file, &paper)?;
            }
            CheckpointAction::Select {
                paper,
                latest,
                checkpoint,
            } => {
                commands::checkpoints::select(&ctx, &paper, latest, checkpoint)?;
            }
        },
        Commands::Prune { subject, dry_run } => {
            commands::prune::run(&ctx, subject, dry_run)?;
        }
        Commands::Clean { yes } => {
            let rt = Runtime::new()?;
            rt.block_on(commands::clean::run(&ctx, yes))?;
        }
        Commands::Config { action } => match action {
            ConfigAction::Show { global, format } => {
                commands::config::show(&ctx, global, &format)?;
            }
            ConfigAction::Path => {
                commands::config::path(&ctx)?;
            }
            ConfigAction::Init { .. } => {}
        },
    }

    Ok(())
}
