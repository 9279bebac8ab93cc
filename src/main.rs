use std::net::SocketAddr;
use std::path::Path;
use std::sync::Arc;

use emuprot_core::auth::StaticDirectory;
use emuprot_core::{LockManager, ServerConfig};
use emuprot_manager::{ManagerEnv, ManagerServer};
use emuprot_protocol::{ProtocolServer, ServerEnv};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Main entry point for the emuprot servers
///
/// Starts both servers concurrently:
/// - the EMU-webApp websocket protocol server (configurable via EMUPROT_PROTOCOL_ADDR)
/// - the manager HTTP API (configurable via EMUPROT_MANAGER_ADDR)
///
/// # Environment Variables
/// - `EMUPROT_DATA_DIR`: Root directory holding the projects (required)
/// - `EMUPROT_PROTOCOL_ADDR`: Websocket server address (default: "0.0.0.0:17890")
/// - `EMUPROT_MANAGER_ADDR`: Manager API address (default: "0.0.0.0:3000")
/// - `EMUPROT_AUTH_FILE`: JSON user directory; without it nobody can log in
/// - `EMUPROT_FILTER_FINISHED_BUNDLES`: "false" disables hiding of finished
///   bundle-list entries from protocol clients
#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("emuprot=info".parse()?),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let data_dir = std::env::var("EMUPROT_DATA_DIR")
        .map_err(|_| anyhow::anyhow!("EMUPROT_DATA_DIR must be set"))?;
    let protocol_addr: SocketAddr = std::env::var("EMUPROT_PROTOCOL_ADDR")
        .unwrap_or_else(|_| "0.0.0.0:17890".into())
        .parse()?;
    let manager_addr: SocketAddr = std::env::var("EMUPROT_MANAGER_ADDR")
        .unwrap_or_else(|_| "0.0.0.0:3000".into())
        .parse()?;
    let filter_finished = std::env::var("EMUPROT_FILTER_FINISHED_BUNDLES")
        .map(|v| v != "false")
        .unwrap_or(true);

    let config = ServerConfig::new(data_dir)?.with_filter_finished_bundles(filter_finished);

    let directory = match std::env::var("EMUPROT_AUTH_FILE") {
        Ok(path) => Arc::new(StaticDirectory::load(Path::new(&path)).await?),
        Err(_) => {
            tracing::warn!("EMUPROT_AUTH_FILE not set, starting with an empty user directory");
            Arc::new(StaticDirectory::empty())
        }
    };
    let locks = LockManager::new(&config);

    tracing::info!("++ Starting emuprot protocol server on {}", protocol_addr);
    tracing::info!("++ Starting emuprot manager API on {}", manager_addr);

    let protocol_app = ProtocolServer::new(Arc::new(ServerEnv {
        config: config.clone(),
        locks: locks.clone(),
        authenticator: directory.clone(),
        identifier: directory.clone(),
    }))
    .router();

    let manager_app = ManagerServer::new(Arc::new(ManagerEnv {
        config,
        locks,
        authenticator: directory.clone(),
        identifier: directory.clone(),
        authorizer: directory,
    }))
    .router();

    let protocol_listener = tokio::net::TcpListener::bind(protocol_addr).await?;
    let manager_listener = tokio::net::TcpListener::bind(manager_addr).await?;

    let (protocol_result, manager_result) = tokio::join!(
        axum::serve(protocol_listener, protocol_app),
        axum::serve(manager_listener, manager_app),
    );
    protocol_result?;
    manager_result?;

    Ok(())
}
