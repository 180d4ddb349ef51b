use anyhow::{bail, Result};
use authrotor::config::Config;
use authrotor::gateway;
use authrotor::store::SqliteUserStore;
use clap::{CommandFactory, Parser, Subcommand};
use clap_complete::Shell;
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

/// Credential issue and rotation service.
#[derive(Parser, Debug)]
#[command(name = "authrotor")]
#[command(version, about, long_about = None)]
struct Cli {
    /// Path to config.toml (defaults to the platform config dir)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Start the HTTP gateway
    Serve {
        /// Listen host (overrides config)
        #[arg(long)]
        host: Option<String>,

        /// Listen port (overrides config)
        #[arg(short, long)]
        port: Option<u16>,
    },

    /// Create the SQLite user database if it does not exist
    InitDb,

    /// Provision a user in the SQLite database
    AddUser {
        /// User id (a new UUID when omitted)
        #[arg(long)]
        id: Option<String>,

        /// Contact address for security alerts
        #[arg(long)]
        email: String,
    },

    /// Print shell completions to stdout
    Completions {
        #[arg(value_enum)]
        shell: Shell,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();

    if let Commands::Completions { shell } = cli.command {
        clap_complete::generate(shell, &mut Cli::command(), "authrotor", &mut std::io::stdout());
        return Ok(());
    }

    let mut config = Config::load(cli.config.as_deref())?;

    match cli.command {
        Commands::Serve { host, port } => {
            if let Some(host) = host {
                config.gateway.host = host;
            }
            if let Some(port) = port {
                config.gateway.port = port;
            }
            gateway::run_gateway(config).await
        }
        Commands::InitDb => {
            let store = open_sqlite(&config)?;
            tracing::info!(
                path = %config.store.path.display(),
                users = store.user_count()?,
                "User database ready"
            );
            Ok(())
        }
        Commands::AddUser { id, email } => {
            let store = open_sqlite(&config)?;
            let id = id.unwrap_or_else(|| uuid::Uuid::new_v4().to_string());
            store.insert_user(&id, &email)?;
            println!("{id}");
            Ok(())
        }
        Commands::Completions { .. } => Ok(()),
    }
}

fn open_sqlite(config: &Config) -> Result<SqliteUserStore> {
    if config.store.kind != "sqlite" {
        bail!(
            "store.kind is '{}'; provisioning commands need the sqlite store",
            config.store.kind
        );
    }
    SqliteUserStore::open(&config.store.path)
}
