//! Worker-facing HTTP server.
//!
//! Carries the pull side (`GET /work`) and the push side (`PUT /work/:id`)
//! of the worker protocol, plus a job status endpoint and a health probe.

mod handlers;
mod queue;
mod routes;

pub use queue::{QueuedUpdate, UpdateQueue, UpdateWorker};
pub use routes::create_router;

use std::net::SocketAddr;
use std::sync::Arc;

use crate::artifacts::{ArtifactStore, FileStore};
use crate::config::Settings;
use crate::repository::Db;

/// Shared state for the server.
#[derive(Clone)]
pub struct AppState {
    pub db: Db,
    pub store: Arc<dyn ArtifactStore>,
    pub settings: Arc<Settings>,
    pub updates: UpdateQueue,
}

impl AppState {
    /// Build the state and the update drain task that goes with it. The
    /// caller decides where the task runs.
    pub fn new(
        db: Db,
        store: Arc<dyn ArtifactStore>,
        settings: Arc<Settings>,
    ) -> (Self, UpdateWorker) {
        let (updates, worker) = queue::channel(
            db.clone(),
            store.clone(),
            settings.clone(),
            settings.update_queue_size,
        );
        (
            Self {
                db,
                store,
                settings,
                updates,
            },
            worker,
        )
    }
}

/// Start the server: run migrations, spawn the update drain task, listen.
pub async fn serve(settings: &Settings) -> anyhow::Result<()> {
    settings.ensure_directories()?;

    let db = Db::from_url(&settings.database_url());
    db.migrate().await?;

    let store: Arc<dyn ArtifactStore> = Arc::new(FileStore::new(settings.artifact_root.clone()));
    let settings = Arc::new(settings.clone());
    let (state, worker) = AppState::new(db, store, settings.clone());
    tokio::spawn(worker.run());

    let app = create_router(state);
    let addr: SocketAddr = format!("{}:{}", settings.host, settings.port).parse()?;
    tracing::info!("Starting server at http://{}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
