//! HTTP surface over an [`ObjectStore`].
//!
//! A single route carries the whole protocol: `POST /?name=dir/file`
//! uploads a body, `GET`/`HEAD /?name=<handle>` retrieve it, `DELETE`
//! removes it. Internal errors are logged but never echoed to clients.

pub mod routes;

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use axum::extract::DefaultBodyLimit;
use axum::routing::get;
use axum::Router;
use cask_storage::{DedupStore, FsStore, ObjectStore, StoreError};
use tracing::info;

const MAX_BODY_SIZE: usize = 10 * 1024 * 1024 * 1024; // 10GiB

/// Which storage backend to run against. The two layouts share a root
/// format but are not interchangeable, so a deployment picks one and keeps
/// it.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Backend {
    Dedup,
    Plain,
}

impl std::str::FromStr for Backend {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "dedup" => Ok(Backend::Dedup),
            "plain" => Ok(Backend::Plain),
            other => Err(format!(
                "unknown backend `{other}`, expected `dedup` or `plain`"
            )),
        }
    }
}

#[derive(Clone, Debug)]
pub struct ServerConfig {
    pub api_port: u16,
    pub data_dir: PathBuf,
    pub backend: Backend,
}

/// State maintained by the server.
///
/// We derive Clone here to allow this state to be shared between request
/// handlers, as Axum requires state types to be cloneable to share them
/// across requests.
#[derive(Clone)]
pub struct AppState {
    pub store: Arc<dyn ObjectStore>,
}

/// Build the router. Separate from [`run_server`] so tests can drive it
/// without a listener.
pub fn app(state: AppState) -> Router {
    Router::new()
        .route(
            "/",
            get(routes::fetch_object)
                .post(routes::store_object)
                .delete(routes::remove_object),
        )
        .layer(DefaultBodyLimit::max(MAX_BODY_SIZE))
        .with_state(state)
}

/// Construct the backend named by the config.
pub fn open_store(config: &ServerConfig) -> Result<Arc<dyn ObjectStore>, StoreError> {
    Ok(match config.backend {
        Backend::Dedup => Arc::new(DedupStore::open(&config.data_dir)?),
        Backend::Plain => Arc::new(FsStore::open(&config.data_dir)?),
    })
}

pub async fn run_server(config: ServerConfig) -> Result<()> {
    let store = open_store(&config)
        .with_context(|| format!("Failed to open store at {}", config.data_dir.display()))?;
    info!(
        "Opened {:?} store rooted at {}",
        config.backend,
        config.data_dir.display()
    );

    let app = app(AppState { store });

    let addr = SocketAddr::from(([127, 0, 0, 1], config.api_port));
    info!("cask HTTP server listening on {}", addr);

    axum::serve(
        tokio::net::TcpListener::bind(addr)
            .await
            .context("Failed to bind HTTP server")?,
        app,
    )
    .await
    .context("HTTP server failed")?;

    Ok(())
}

/// Runs the main async runtime
pub fn run(config: ServerConfig) -> Result<()> {
    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("Failed to build the async runtime")?
        .block_on(run_server(config))
}
