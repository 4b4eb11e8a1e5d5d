//! Orchestration services.
//!
//! Separated from transport concerns: the server layer enqueues calls
//! into these functions, the CLI and tests call them directly. Every
//! mutating entry point runs inside a single database transaction.

pub mod advancer;
pub mod batcher;
pub mod completer;
pub mod dispatcher;
pub mod submit;
pub mod updater;

pub use completer::{cancel_job, pause_job, resume_job};
pub use dispatcher::get_work;
pub use submit::{submit_job, JobSpec, StepSpec};
pub use updater::process_update;

use thiserror::Error;

use crate::artifacts::ArtifactError;
use crate::repository::DieselError;

#[derive(Error, Debug)]
pub enum OrchestrationError {
    #[error("database error: {0}")]
    Database(#[from] DieselError),
    #[error("artifact store error: {0}")]
    Artifact(#[from] ArtifactError),
    #[error("invalid request: {0}")]
    InvalidRequest(String),
    #[error("pipeline invariant violated: {0}")]
    InvariantViolation(String),
    #[error("not found: {0}")]
    NotFound(String),
}

pub type Result<T> = std::result::Result<T, OrchestrationError>;

impl OrchestrationError {
    /// Whether this is SQLite writer contention, worth retrying.
    pub fn is_busy(&self) -> bool {
        match self {
            Self::Database(e) => crate::repository::is_busy(e),
            _ => false,
        }
    }
}
