pub mod routes;

use crate::coc::CocClient;
use crate::config::Config;
use crate::scheduler::AutoSnapshotController;
use crate::storage::Storage;
use anyhow::{Context, Result};
use axum::Router;
use std::net::{Ipv4Addr, SocketAddr};
use std::sync::{Arc, Mutex};
use tokio::net::TcpListener;
use tracing::info;

pub async fn run_server(
    config: Arc<Config>,
    storage: Arc<Mutex<Storage>>,
    snapshots: Arc<Mutex<AutoSnapshotController>>,
) -> Result<()> {
    let port = config.api_port;
    let client = CocClient::from_config(&config)?;
    let state = routes::ApiState {
        storage,
        client,
        snapshots,
    };
    let app: Router = routes::router(state);

    let addr = SocketAddr::from((Ipv4Addr::LOCALHOST, port));
    let listener = TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind API server: {addr}"))?;

    info!(address = %addr, "clanwatch API server started");

    axum::serve(listener, app)
        .await
        .context("API server failed")?;

    Ok(())
}
