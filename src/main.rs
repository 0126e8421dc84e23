use std::fs;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::bail;
use chrono::Utc;
use clap::{Parser, Subcommand};
use tracing::info;
use tracing_subscriber::EnvFilter;
use uuid::Uuid;

use dockhand::auth::TokenGenerator;
use dockhand::config::ServerConfig;
use dockhand::deploy::{DockerCli, Orchestrator};
use dockhand::server::validation::validate_username;
use dockhand::server::{AppState, create_router};
use dockhand::store::{SqliteStore, Store};
use dockhand::types::{Token, User};

const ADMIN_TOKEN_FILE: &str = ".admin_token";

fn create_token(
    generator: &TokenGenerator,
    is_admin: bool,
    user_id: Option<String>,
) -> anyhow::Result<(Token, String)> {
    let issued = generator.issue()?;
    let token = Token {
        id: Uuid::new_v4().to_string(),
        token_hash: issued.hash,
        token_lookup: issued.raw.lookup().to_string(),
        is_admin,
        user_id,
        created_at: Utc::now(),
        expires_at: None,
        last_used_at: None,
    };
    Ok((token, issued.raw.to_string()))
}

#[cfg(unix)]
fn set_restrictive_permissions(path: &std::path::Path) {
    use std::os::unix::fs::PermissionsExt;
    if let Err(e) = fs::set_permissions(path, fs::Permissions::from_mode(0o600)) {
        tracing::warn!("Failed to set permissions on {}: {e}", path.display());
    }
}

#[derive(Parser)]
#[command(name = "dockhand")]
#[command(about = "A self-hosted control plane for containerized sites", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Administrative commands
    Admin {
        #[command(subcommand)]
        command: AdminCommands,
    },

    /// Start the API server
    Serve {
        /// Host to bind to
        #[arg(long, default_value = "127.0.0.1")]
        host: String,

        /// Port to bind to
        #[arg(long, short, default_value = "8080")]
        port: u16,

        /// Data directory for the database and site topologies
        #[arg(long, default_value = "./data")]
        data_dir: String,

        /// Deploy configuration file (defaults to <data-dir>/dockhand.toml when present)
        #[arg(long)]
        config: Option<PathBuf>,
    },
}

#[derive(Subcommand)]
enum AdminCommands {
    /// Initialize the server (create database and admin token)
    Init {
        /// Data directory for the database and site topologies
        #[arg(long, default_value = "./data")]
        data_dir: String,

        /// Skip interactive prompts
        #[arg(long)]
        non_interactive: bool,
    },
}

fn run_init(data_dir: String, non_interactive: bool) -> anyhow::Result<()> {
    let data_path = PathBuf::from(data_dir);
    fs::create_dir_all(&data_path)?;

    let config = ServerConfig {
        data_dir: data_path.clone(),
        ..ServerConfig::default()
    };
    let store = SqliteStore::new(config.db_path())?;
    store.initialize()?;

    let token_file = data_path.join(ADMIN_TOKEN_FILE);

    if store.has_admin_token()? {
        bail!(
            "Server already initialized. Admin token exists at: {}",
            token_file.display()
        );
    }

    let generator = TokenGenerator::new();
    let (token, raw_token) = create_token(&generator, true, None)?;

    store.create_token(&token)?;
    fs::write(&token_file, &raw_token)?;

    #[cfg(unix)]
    set_restrictive_permissions(&token_file);

    println!();
    println!("========================================");
    println!("Admin token (save this, it won't be shown again):");
    println!();
    println!("  {raw_token}");
    println!();
    println!("Token also written to: {}", token_file.display());
    println!("========================================");
    println!();

    if !non_interactive {
        create_first_user_prompt(&store, &generator)?;
    }

    Ok(())
}

fn create_first_user_prompt(store: &SqliteStore, generator: &TokenGenerator) -> anyhow::Result<()> {
    let create_user = inquire::Confirm::new("Would you like to create a first user?")
        .with_default(false)
        .prompt()?;

    if !create_user {
        return Ok(());
    }

    let username = inquire::Text::new("Username:")
        .with_validator(|input: &str| match validate_username(input.trim()) {
            Ok(()) => Ok(inquire::validator::Validation::Valid),
            Err(message) => Ok(inquire::validator::Validation::Invalid(message.into())),
        })
        .prompt()?;

    let can_create_sites = inquire::Confirm::new("Allow this user to create sites?")
        .with_default(true)
        .prompt()?;

    let now = Utc::now();
    let user = User {
        id: Uuid::new_v4().to_string(),
        username: username.trim().to_string(),
        can_create_sites,
        created_at: now,
        updated_at: now,
    };
    store.create_user(&user)?;

    let (user_token, raw_token) = create_token(generator, false, Some(user.id.clone()))?;
    store.create_token(&user_token)?;

    println!();
    println!("========================================");
    println!("Created user '{}' with token:", user.username);
    println!();
    println!("  {raw_token}");
    println!();
    println!("========================================");
    println!();

    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("dockhand=info".parse()?))
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Admin { command } => match command {
            AdminCommands::Init {
                data_dir,
                non_interactive,
            } => {
                run_init(data_dir, non_interactive)?;
            }
        },
        Commands::Serve {
            host,
            port,
            data_dir,
            config,
        } => {
            let config = ServerConfig::load(host, port, data_dir.into(), config.as_deref())?;

            let token_file = config.data_dir.join(ADMIN_TOKEN_FILE);
            if !token_file.exists() {
                bail!(
                    "Server not initialized. Run 'dockhand admin init' first to create the database and admin token."
                );
            }

            let store = SqliteStore::new(config.db_path())?;
            store.initialize()?;
            if !store.has_admin_token()? {
                bail!(
                    "Server not initialized. Run 'dockhand admin init' first to create the database and admin token."
                );
            }

            info!("Admin token available at {}", token_file.display());

            fs::create_dir_all(&config.deploy.apps_base)?;
            let runtime = Arc::new(DockerCli::new(
                config.deploy.timeouts.clone(),
                tokio::runtime::Handle::current(),
            ));
            let orchestrator =
                Orchestrator::with_default_source(Arc::new(store), runtime, config.deploy.clone());
            info!(
                apps_base = %config.deploy.apps_base.display(),
                proxy_network = %config.deploy.proxy_network,
                "orchestrator ready"
            );

            let app = create_router(Arc::new(AppState::new(orchestrator)));
            let addr = config.socket_addr()?;

            info!("Starting server on {}", addr);

            let listener = tokio::net::TcpListener::bind(addr).await?;
            axum::serve(listener, app).await?;
        }
    }

    Ok(())
}
