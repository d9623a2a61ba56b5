mod auth;
mod config;
mod gateway;
mod provider;
mod store;
mod workspace;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tower_http::trace::TraceLayer;
use tracing::info;
use tracing_subscriber::EnvFilter;

use crate::auth::{Authenticator, CookiePresenceAuthenticator, NoAuthenticator};
use crate::config::Config;
use crate::gateway::proxy::StreamingProxy;
use crate::gateway::GatewayState;
use crate::provider::{MachineApi, ProviderClient};
use crate::store::MachineStore;
use crate::workspace::{ActorConfig, WorkspaceRegistry};

#[derive(Parser)]
#[command(name = "eureka", about = "Multi-tenant workspace gateway")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the gateway.
    Serve {
        /// Path to config file (TOML).
        #[arg(long, short)]
        config: Option<PathBuf>,
    },
    /// Validate configuration and probe the provider API. Exits 0 if both pass.
    Check {
        /// Path to config file (TOML).
        #[arg(long, short)]
        config: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Check { config: config_path } => {
            let config = load_config(config_path)?;
            let provider = ProviderClient::new(&config.provider)?;
            let machines = provider
                .list_machines()
                .await
                .map_err(|e| anyhow::anyhow!("provider probe failed: {e}"))?;
            println!(
                "ok: provider reachable, {} machine(s) in app {}",
                machines.len(),
                config.provider.app_name
            );
        }
        Commands::Serve { config: config_path } => {
            let config = load_config(config_path)?;
            info!(
                base_domain = %config.base_domain,
                listen_addr = %config.listen_addr,
                data_dir = %config.data_dir.display(),
                inactivity_timeout_secs = config.lifecycle.inactivity_timeout_secs,
                "eureka starting"
            );

            let provider: Arc<dyn MachineApi> = Arc::new(ProviderClient::new(&config.provider)?);
            let store = Arc::new(MachineStore::new(&config.data_dir));
            let registry = WorkspaceRegistry::new(
                provider,
                store,
                ActorConfig {
                    inactivity_timeout: config.lifecycle.inactivity_timeout(),
                    recovery_backoff: Default::default(),
                },
            );
            let proxy = StreamingProxy::new(&config.proxy, &config.provider.app_name)?;
            let authenticator: Arc<dyn Authenticator> = if config.auth.disabled {
                tracing::warn!("authentication disabled, every visitor is admitted");
                Arc::new(NoAuthenticator)
            } else {
                Arc::new(CookiePresenceAuthenticator::new(
                    config.auth.cookie_name.clone(),
                ))
            };

            let state = Arc::new(GatewayState {
                registry,
                proxy,
                authenticator,
                base_domain: config.base_domain.clone(),
            });
            let app = gateway::build_router(state).layer(TraceLayer::new_for_http());

            let listener = tokio::net::TcpListener::bind(&config.listen_addr)
                .await
                .with_context(|| format!("binding {}", config.listen_addr))?;
            info!(addr = %config.listen_addr, "gateway listening");

            axum::serve(listener, app)
                .with_graceful_shutdown(shutdown_signal())
                .await?;
            info!("eureka shut down");
        }
    }

    Ok(())
}

fn load_config(path: Option<PathBuf>) -> Result<Config> {
    match path {
        Some(path) => Config::load(&path),
        None => {
            let config = Config::default();
            config.validate()?;
            Ok(config)
        }
    }
}

async fn shutdown_signal() {
    let mut sigterm = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
        .expect("failed to register SIGTERM handler");
    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            info!("received SIGINT, shutting down");
        }
        _ = sigterm.recv() => {
            info!("received SIGTERM, shutting down");
        }
    }
}
