use anyhow::{bail, Context};
use clap::{Parser, Subcommand};
use py_mutation::config::SessionConfig;
use py_mutation::mutation::init_session;
use py_mutation::operators::OperatorCatalog;
use py_mutation::sqlite::WorkDb;
use serde_json::json;
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "py-mutation")]
#[command(about = "Generate mutation work items for Python code bases")]
struct Cli {
    /// Log debug details
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Replace the content of a session database with fresh work items
    Init {
        /// Path of the TOML configuration
        config: PathBuf,

        /// Path of the SQLite session database
        session: PathBuf,

        /// Only mutate lines changed since this git reference (overrides the config)
        #[arg(short, long)]
        baseline: Option<String>,

        /// Directory the baseline diff is computed in
        #[arg(long, default_value = ".")]
        repo_dir: PathBuf,
    },
    /// List every available mutation operator
    Operators,
    /// Print a session's configuration and work items as JSON lines
    Dump {
        /// Path of the SQLite session database
        session: PathBuf,
    },
    /// Print a configuration template
    NewConfig,
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let default_level = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)),
        )
        .with_writer(std::io::stderr)
        .init();

    match cli.command {
        Commands::Init {
            config,
            session,
            baseline,
            repo_dir,
        } => {
            let mut session_config = SessionConfig::load(&config)
                .with_context(|| format!("loading {}", config.display()))?;
            if baseline.is_some() {
                session_config.baseline = baseline;
            }

            let mut work_db = WorkDb::open(&session)
                .with_context(|| format!("opening {}", session.display()))?;
            let count = init_session(&session_config, &mut work_db, &repo_dir)
                .context("initializing session")?;
            println!("{} work items written to {}", count, session.display());
        }
        Commands::Operators => {
            let catalog = OperatorCatalog::new();
            for operator in catalog.iter() {
                println!("{:<24} {}", operator.name(), operator.description());
            }
        }
        Commands::Dump { session } => {
            if !session.exists() {
                bail!("session database {} does not exist", session.display());
            }
            let work_db = WorkDb::open(&session)
                .with_context(|| format!("opening {}", session.display()))?;

            println!(
                "{}",
                json!({
                    "config": work_db.config()?,
                    "initialized_at": work_db.initialized_at()?,
                })
            );
            for item in work_db.work_items()? {
                println!("{}", serde_json::to_string(&item)?);
            }
        }
        Commands::NewConfig => {
            print!("{}", SessionConfig::template());
        }
    }

    Ok(())
}
