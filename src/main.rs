#![cfg(feature = "cli")]
use std::path::PathBuf;

use anyhow::Context;
use clap::{ArgAction, Parser, Subcommand};
use tracing::{error, info, Level};

use drm_relay::account::AccountClient;
use drm_relay::config::RelayConfig;
use drm_relay::credentials::{Account, CredentialStore};
use drm_relay::relay::RelayService;
use drm_relay::resolver::AssetId;

#[derive(Parser)]
#[command(
    name = "drm-relay",
    version,
    disable_version_flag = true,
    about = "DRM license and manifest relay"
)]
struct Cli {
    #[arg(short = 'v', long = "version", action = ArgAction::SetTrue)]
    version: bool,

    #[arg(short = 'd', long = "debug", action = ArgAction::SetTrue)]
    debug: bool,

    /// YAML configuration file.
    #[arg(short = 'c', long = "config", global = true)]
    config: Option<PathBuf>,

    /// Account service login.
    #[arg(
        short = 'u',
        long = "user",
        env = "USER",
        default_value = "",
        hide_env_values = true,
        global = true
    )]
    user: String,

    /// Account service password.
    #[arg(
        short = 'P',
        long = "pass",
        env = "PASS",
        default_value = "",
        hide_env_values = true,
        global = true
    )]
    pass: String,

    #[command(subcommand)]
    command: Option<Commands>,
}

/// CLI subcommands.
#[derive(Subcommand)]
enum Commands {
    /// Log in, keep the token renewed, and serve the relay API.
    ///
    /// Exits with an error as soon as a renewal fails.
    Serve {
        #[arg(long = "host")]
        host: Option<String>,
        #[arg(short = 'p', long = "port", env = "PORT")]
        port: Option<u16>,
    },
    /// Resolve one asset and print its DRM token and stream URL.
    Asset { id: AssetId },
    /// Print the rewritten manifest of one asset.
    Manifest { id: AssetId },
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let level = if cli.debug {
        Level::DEBUG
    } else {
        Level::INFO
    };

    tracing_subscriber::fmt()
        .with_max_level(level)
        .init();

    info!("drm-relay version {}", env!("CARGO_PKG_VERSION"));

    if cli.version {
        return Ok(());
    }

    let config = match &cli.config {
        Some(path) => RelayConfig::from_path(path)
            .with_context(|| format!("Failed to load config {}", path.display()))?,
        None => RelayConfig::default(),
    };

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("Failed to create runtime")?;

    let account = Account::new(cli.user, cli.pass);
    match cli.command {
        Some(Commands::Serve { host, port }) => {
            runtime.block_on(run_serve(config, account, host, port))
        }
        Some(Commands::Asset { id }) => runtime.block_on(run_asset(config, account, id)),
        Some(Commands::Manifest { id }) => runtime.block_on(run_manifest(config, account, id)),
        None => Ok(()),
    }
}

async fn connect(config: &RelayConfig, account: Account) -> anyhow::Result<RelayService> {
    let client = AccountClient::new(config)?;
    let store = CredentialStore::new(client.clone(), account);
    store
        .login_account()
        .await
        .context("Initial login to the account service failed")?;
    info!("[+] Logged in to {}", client.base_url());

    Ok(RelayService::from_config(config, client, store)?)
}

async fn run_serve(
    config: RelayConfig,
    account: Account,
    host: Option<String>,
    port: Option<u16>,
) -> anyhow::Result<()> {
    let relay = connect(&config, account).await?;
    let renewal = relay.credentials().start_auto_renew(config.renew_interval());
    info!("[+] Renewing token every {}s", config.renew_interval().as_secs());

    let host = host.unwrap_or_else(|| config.host.clone());
    let port = port.unwrap_or(config.port);

    tokio::select! {
        result = drm_relay::serve::run(relay, &host, port) => {
            result.context("Server stopped")?;
        }
        result = renewal.wait() => {
            if let Err(e) = result {
                error!("[-] Token renewal failed: {}", e);
                return Err(e).context("Token renewal failed, shutting down");
            }
        }
    }
    Ok(())
}

async fn run_asset(config: RelayConfig, account: Account, id: AssetId) -> anyhow::Result<()> {
    let relay = connect(&config, account).await?;
    let asset = relay.resolve(id).await?;
    info!("[+] Asset {}", id);
    info!(" + DRM token: {}", asset.drm_token);
    info!(" + Stream URL: {}", asset.stream_url);
    Ok(())
}

async fn run_manifest(config: RelayConfig, account: Account, id: AssetId) -> anyhow::Result<()> {
    let relay = connect(&config, account).await?;
    let manifest = relay.get_manifest(id).await?;
    println!("{}", String::from_utf8_lossy(&manifest));
    Ok(())
}
