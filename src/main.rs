//! uhu - UpdateHub Utils
//!
//! Uploads firmware packages to an UpdateHub server and manages the local
//! credential store.

use anyhow::{anyhow, Context, Result};
use clap::{Parser, Subcommand};
use dialoguer::{Input, Password};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};
use uhu::auth::ConfigCredentials;
use uhu::config::{
    ACCESS_ID_KEY, ACCESS_SECRET_KEY, AUTH_SECTION, CONFIG_PATH_ENV, SERVER_URL_KEY,
    SETTINGS_SECTION,
};
use uhu::http::HttpClient;
use uhu::progress::{ConsoleProgress, ProgressReporter, SilentProgress};
use uhu::{Config, Package, PackagePusher};

/// UpdateHub Utils - package uploader
#[derive(Parser, Debug)]
#[command(name = "uhu")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Path to configuration file (default: ~/.uhu.yaml)
    #[arg(short, long, global = true, env = CONFIG_PATH_ENV)]
    config: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long, global = true, default_value = "warn")]
    log_level: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Upload a package
    Upload {
        /// Package file
        package: PathBuf,

        /// Parallel object uploads (overrides settings.upload_concurrency)
        #[arg(long)]
        concurrency: Option<usize>,
    },

    /// Show the server-side status of a package
    Status {
        /// Package UID
        package_uid: String,
    },

    /// Manage the configuration file
    #[command(subcommand)]
    Config(ConfigCommands),
}

#[derive(Subcommand, Debug)]
enum ConfigCommands {
    /// Store credentials, prompting for anything not given
    Init {
        #[arg(long)]
        access_id: Option<String>,

        #[arg(long)]
        access_secret: Option<String>,

        #[arg(long)]
        server_url: Option<String>,
    },

    /// Set a value
    Set {
        key: String,
        value: String,

        #[arg(long, default_value = SETTINGS_SECTION)]
        section: String,
    },

    /// Print a value
    Get {
        key: String,

        #[arg(long, default_value = SETTINGS_SECTION)]
        section: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    tracing_subscriber::registry()
        .with(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(format!("uhu={}", cli.log_level))),
        )
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(std::io::stderr)
                .with_target(false),
        )
        .init();

    if let Err(e) = execute(&cli).await {
        eprintln!("Error: {:#}", e);
        std::process::exit(1);
    }
    Ok(())
}

async fn execute(cli: &Cli) -> Result<()> {
    let config_path = match &cli.config {
        Some(path) => path.clone(),
        None => Config::default_path()?,
    };

    match &cli.command {
        Commands::Upload {
            package,
            concurrency,
        } => upload(&config_path, package, *concurrency).await,
        Commands::Status { package_uid } => status(&config_path, package_uid).await,
        Commands::Config(cmd) => configure(&config_path, cmd),
    }
}

fn load_config(path: &Path) -> Result<Config> {
    Config::load_or_default(path)
        .with_context(|| format!("Failed to load configuration from {}", path.display()))
}

fn pusher(config: &Config, progress: Arc<dyn ProgressReporter>) -> Result<PackagePusher> {
    let client = HttpClient::new(Arc::new(ConfigCredentials::new(config.clone())))?;
    Ok(PackagePusher::new(client, config.server_url(), progress)
        .with_chunk_size(config.chunk_size())
        .with_concurrency(config.upload_concurrency()))
}

async fn upload(config_path: &Path, package: &Path, concurrency: Option<usize>) -> Result<()> {
    let config = load_config(config_path)?;
    let progress = Arc::new(ConsoleProgress::detect());

    let path = package.to_path_buf();
    let loader = progress.clone();
    let package = tokio::task::spawn_blocking(move || Package::load(&path, loader.as_ref()))
        .await
        .context("Package loading was interrupted")??;

    let mut pusher = pusher(&config, progress)?;
    if let Some(n) = concurrency {
        pusher = pusher.with_concurrency(n);
    }

    pusher
        .push_package(&package)
        .await
        .map_err(|e| anyhow!("Package upload failed during {} phase: {}", e.phase(), e))?;
    Ok(())
}

async fn status(config_path: &Path, package_uid: &str) -> Result<()> {
    let config = load_config(config_path)?;
    let pusher = pusher(&config, Arc::new(SilentProgress))?;
    let status = pusher
        .get_package_status(package_uid)
        .await
        .map_err(|e| anyhow!("Failed to get package status: {}", e))?;
    println!("{}", status);
    Ok(())
}

fn configure(config_path: &Path, cmd: &ConfigCommands) -> Result<()> {
    match cmd {
        ConfigCommands::Init {
            access_id,
            access_secret,
            server_url,
        } => {
            let mut config = load_config(config_path)?;

            let access_id = match access_id {
                Some(id) => id.clone(),
                None => Input::<String>::new()
                    .with_prompt("Access ID")
                    .interact_text()?,
            };
            let access_secret = match access_secret {
                Some(secret) => secret.clone(),
                None => Password::new().with_prompt("Access secret").interact()?,
            };

            config.set(AUTH_SECTION, ACCESS_ID_KEY, access_id);
            config.set(AUTH_SECTION, ACCESS_SECRET_KEY, access_secret);
            if let Some(url) = server_url {
                config.set(SETTINGS_SECTION, SERVER_URL_KEY, url.clone());
            }
            config.validate()?;
            config.save(config_path)?;

            println!("Configuration saved to {}", config_path.display());
            Ok(())
        }

        ConfigCommands::Set {
            key,
            value,
            section,
        } => {
            let mut config = load_config(config_path)?;
            config.set(section, key, value.clone());
            config.validate()?;
            config.save(config_path)?;
            Ok(())
        }

        ConfigCommands::Get { key, section } => {
            let config = load_config(config_path)?;
            let value = config
                .get(section, key)
                .ok_or_else(|| anyhow!("'{}.{}' is not set", section, key))?;
            println!("{}", value);
            Ok(())
        }
    }
}
