//! Mnemos CLI - Main entry point

mod commands;

use clap::{Parser, Subcommand};
use mnemos_foundation::RuntimeConfig;
use std::path::PathBuf;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Mnemos - plugin manager for the memory runtime
#[derive(Parser, Debug)]
#[command(name = "mnemos")]
#[command(author, version, about, long_about = None)]
struct Args {
    #[command(subcommand)]
    command: Command,

    /// Plugin installation directory (defaults to the first configured directory)
    #[arg(long, global = true)]
    plugin_dir: Option<PathBuf>,

    /// Runtime config file (defaults to global + project runtime.json)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Enable debug logging
    #[arg(short, long, global = true)]
    debug: bool,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Install a plugin from github:owner/repo[@tag], a URL, or a local directory
    Install {
        source: String,

        /// Reinstall even if already installed
        #[arg(short, long)]
        force: bool,

        /// Do not install missing dependencies
        #[arg(long)]
        no_deps: bool,

        /// Record the plugin as disabled
        #[arg(long)]
        disabled: bool,

        /// Source for a dependency, as <id>=<source> (repeatable)
        #[arg(long = "dep", value_name = "ID=SOURCE")]
        dependencies: Vec<String>,
    },
    /// Uninstall a plugin
    Uninstall {
        id: String,

        /// Uninstall even if other plugins depend on it
        #[arg(short, long)]
        force: bool,

        /// Keep the plugin files on disk
        #[arg(long)]
        keep_files: bool,
    },
    /// Mark an installed plugin as active
    Enable { id: String },
    /// Mark an installed plugin as disabled
    Disable { id: String },
    /// Update a plugin from a new source
    Update {
        id: String,
        source: String,

        /// Skip the backup of the current files
        #[arg(long)]
        no_backup: bool,
    },
    /// List installed plugins
    List {
        /// Print records as JSON
        #[arg(long)]
        json: bool,
    },
    /// Check GitHub-installed plugins for newer tags
    Outdated,
    /// Discover plugins and validate the dependency graph
    Check,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let config = match &args.config {
        Some(path) => RuntimeConfig::load_from(path)?,
        None => RuntimeConfig::load().unwrap_or_else(|e| {
            eprintln!("Warning: Failed to load config: {}", e);
            RuntimeConfig::default()
        }),
    };

    // Initialize logging
    let log_level = if args.debug {
        "debug".to_string()
    } else {
        config.logging.level.clone()
    };
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&log_level)),
        )
        .with(tracing_subscriber::fmt::layer().with_target(false))
        .init();

    let ctx = commands::CliContext::new(config, args.plugin_dir)?;
    tracing::debug!("Using plugin directory: {}", ctx.plugin_dir.display());

    match args.command {
        Command::Install {
            source,
            force,
            no_deps,
            disabled,
            dependencies,
        } => {
            commands::install(&ctx, &source, force, !no_deps, !disabled, &dependencies).await
        }
        Command::Uninstall {
            id,
            force,
            keep_files,
        } => commands::uninstall(&ctx, &id, force, !keep_files).await,
        Command::Enable { id } => commands::set_enabled(&ctx, &id, true).await,
        Command::Disable { id } => commands::set_enabled(&ctx, &id, false).await,
        Command::Update {
            id,
            source,
            no_backup,
        } => commands::update(&ctx, &id, &source, !no_backup).await,
        Command::List { json } => commands::list(&ctx, json).await,
        Command::Outdated => commands::outdated(&ctx).await,
        Command::Check => commands::check(&ctx).await,
    }
}
