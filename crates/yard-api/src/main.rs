use std::net::SocketAddr;
use std::sync::Arc;

use tracing_subscriber::EnvFilter;

use yard_api::AppState;
use yard_core::{ProgressBoard, YardConfig};
use yard_store::{
    AccessController, ArchiveCoordinator, ChunkedUploader, HttpObjectStore, LeaseLocks,
    ObjectStore, RetentionManager,
};
use yard_worker::{JobQueue, RoutineRegistry, TrackingClient, Trainer};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let config = YardConfig::from_env()?;

    let store: Arc<dyn ObjectStore> =
        Arc::new(HttpObjectStore::new(&config.store_endpoint, config.store_token.clone())?);
    let locks = Arc::new(LeaseLocks::new());
    let retention = Arc::new(RetentionManager::new(
        Arc::clone(&store),
        locks,
        &config.scratch_bucket,
        config.scratch_keep,
    ));
    let access = AccessController::new(Arc::clone(&store));
    let uploader = ChunkedUploader::new(Arc::clone(&store), config.chunk_bytes);
    let board = ProgressBoard::default();
    let archive = ArchiveCoordinator::new(
        Arc::clone(&store),
        access,
        retention,
        uploader,
        &config.dataset_bucket,
        &config.script_bucket,
        board.clone(),
    );

    let tracking = match &config.tracking_url {
        Some(url) => Some(TrackingClient::new(url)?),
        None => None,
    };

    // No built-in routines; runs either carry a script or an embedder
    // registers its own.
    let trainer = Trainer::new(
        Arc::clone(&store),
        archive,
        board.clone(),
        RoutineRegistry::new(),
        tracking,
        &config.dataset_bucket,
        &config.work_dir,
    );
    let queue = JobQueue::start(
        Arc::new(trainer),
        board.clone(),
        config.workers,
        config.retry_delay,
    );

    let state = AppState {
        config,
        store,
        board,
        queue,
    };

    let addr = SocketAddr::from(([0, 0, 0, 0], state.config.port));
    tracing::info!(%addr, workers = state.config.workers, "trainyard api listening");
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, yard_api::app(state).into_make_service()).await?;
    Ok(())
}
