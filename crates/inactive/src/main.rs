//! `inactive`: query and update the inactive-subject store from the shell.

use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use inactive_logging::{init_logging, LogConfig};
use inactive_store::{BackendConfig, InactiveStore, StoreConfig};
use tracing::debug;

/// Exit status when a command fails, distinct from `contains` reporting absence.
const EXIT_FAILURE: u8 = 2;

#[derive(Parser, Debug)]
#[command(name = "inactive", version, about = "Track subjects found inactive and when to retest them")]
struct Cli {
    /// Enable verbose logging (info/debug to stderr)
    #[arg(short = 'v', long, global = true)]
    verbose: bool,

    /// Also write logs under $INACTIVE_HOME/logs
    #[arg(long, global = true)]
    log_file: bool,

    /// TOML configuration file
    #[arg(long, global = true, env = "INACTIVE_CONFIG")]
    config: Option<PathBuf>,

    /// Override the configured backend (json:PATH, sqlite:PATH, mysql://..., mariadb://...)
    #[arg(long, global = true)]
    backend: Option<String>,

    /// Override the configured retest interval in days
    #[arg(long, global = true)]
    days: Option<u64>,

    /// Namespace (subject file) the command applies to
    #[arg(short = 'n', long, global = true, default_value = "default")]
    namespace: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Exit 0 if SUBJECT is recorded, 1 if not
    Contains { subject: String },

    /// Record SUBJECT as tested now with STATUS
    Add { subject: String, status: String },

    /// Forget SUBJECT
    Remove { subject: String },

    /// List subjects due for a retest
    Due,

    /// List subjects tested within the retest interval
    Tested,

    /// Print the resolved configuration as JSON
    Config,
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    let mut log_config = LogConfig::new("inactive");
    log_config.verbose = cli.verbose;
    log_config.log_to_file = cli.log_file;
    if let Err(err) = init_logging(log_config) {
        eprintln!("warning: {:#}", err);
    }

    match run(cli) {
        Ok(code) => code,
        Err(err) => {
            eprintln!("Error: {:?}", err);
            ExitCode::from(EXIT_FAILURE)
        }
    }
}

fn run(cli: Cli) -> Result<ExitCode> {
    let config = resolve_config(cli.config.as_deref(), cli.backend.as_deref(), cli.days)?;

    if let Commands::Config = cli.command {
        let json = serde_json::to_string_pretty(&config).context("Failed to render config")?;
        println!("{json}");
        return Ok(ExitCode::SUCCESS);
    }

    let mut store = InactiveStore::open(cli.namespace.as_str(), &config)
        .with_context(|| format!("Failed to open store for namespace '{}'", cli.namespace))?;
    debug!(namespace = %cli.namespace, backend = ?store.backend_name(), "Store opened");

    match cli.command {
        Commands::Contains { subject } => {
            let present = store.contains(&subject)?;
            println!("{}", if present { "present" } else { "absent" });
            return Ok(if present {
                ExitCode::SUCCESS
            } else {
                ExitCode::from(1)
            });
        }
        Commands::Add { subject, status } => {
            store
                .add(&subject, &status)
                .with_context(|| format!("Failed to add '{}'", subject))?;
        }
        Commands::Remove { subject } => {
            store
                .remove(&subject)
                .with_context(|| format!("Failed to remove '{}'", subject))?;
        }
        Commands::Due => print_subjects(store.list_due_for_retest()?)?,
        Commands::Tested => print_subjects(store.list_already_tested()?)?,
        Commands::Config => {}
    }

    store.save().context("Failed to save store")?;
    Ok(ExitCode::SUCCESS)
}

fn resolve_config(
    path: Option<&Path>,
    backend: Option<&str>,
    days: Option<u64>,
) -> Result<StoreConfig> {
    let mut config = match path {
        Some(path) => StoreConfig::load(path)
            .with_context(|| format!("Failed to load config {}", path.display()))?,
        None => StoreConfig::default(),
    };
    if let Some(raw) = backend {
        config.backend = BackendConfig::from_url(raw)?;
    }
    if let Some(days) = days {
        config.days_between_retest = days;
    }
    config.validate()?;
    Ok(config)
}

fn print_subjects(subjects: impl IntoIterator<Item = String>) -> Result<()> {
    let stdout = io::stdout();
    let mut out = stdout.lock();
    for subject in subjects {
        writeln!(out, "{subject}")?;
    }
    out.flush()?;
    Ok(())
}
