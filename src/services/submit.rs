//! Job submission.
//!
//! The request layer of the full platform builds the step chain from the
//! user's request; this entry point persists it and seeds the query step
//! with its first work item, all in one transaction.

use diesel_async::AsyncConnection;
use serde::{Deserialize, Serialize};

use crate::config::Settings;
use crate::models::{Job, JobStatus, StepKind};
use crate::repository::records::{NewWorkItem, NewWorkflowStep};
use crate::repository::{jobs, steps, user_work, work_items, Db};

use super::{OrchestrationError, Result};

/// One step of a requested workflow.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StepSpec {
    #[serde(rename = "serviceID")]
    pub service_id: String,
    pub kind: StepKind,
    /// Serialized request operation handed to workers.
    #[serde(default = "default_operation")]
    pub operation: String,
    #[serde(default = "default_weight")]
    pub progress_weight: f64,
    #[serde(default)]
    pub max_batch_inputs: Option<i32>,
    #[serde(default)]
    pub max_batch_size_bytes: Option<i64>,
}

fn default_operation() -> String {
    "{}".to_string()
}

fn default_weight() -> f64 {
    1.0
}

/// A workflow submission.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobSpec {
    pub username: String,
    pub num_input_granules: i32,
    #[serde(default = "default_true")]
    pub is_async: bool,
    #[serde(default)]
    pub ignore_errors: bool,
    pub steps: Vec<StepSpec>,
    /// Initial continuation cursor for the query step.
    #[serde(rename = "scrollID", default)]
    pub scroll_id: Option<String>,
    /// Input catalog for the query step, when the request layer staged one.
    #[serde(default)]
    pub input_catalog: Option<String>,
}

fn default_true() -> bool {
    true
}

impl JobSpec {
    fn validate(&self) -> Result<()> {
        if self.username.is_empty() {
            return Err(OrchestrationError::InvalidRequest(
                "username must not be empty".to_string(),
            ));
        }
        if self.num_input_granules < 0 {
            return Err(OrchestrationError::InvalidRequest(
                "numInputGranules must not be negative".to_string(),
            ));
        }
        let Some(first) = self.steps.first() else {
            return Err(OrchestrationError::InvalidRequest(
                "a workflow needs at least one step".to_string(),
            ));
        };
        if first.kind != StepKind::Query {
            return Err(OrchestrationError::InvalidRequest(
                "the first step of every workflow is the query step".to_string(),
            ));
        }
        if self.steps.iter().skip(1).any(|s| s.kind == StepKind::Query) {
            return Err(OrchestrationError::InvalidRequest(
                "only the first step may be the query step".to_string(),
            ));
        }
        Ok(())
    }
}

/// Create a job, its workflow steps, and the first query work item.
pub async fn submit_job(db: &Db, settings: &Settings, spec: JobSpec) -> Result<Job> {
    spec.validate()?;

    let mut job = Job::new(spec.username.clone(), spec.num_input_granules);
    job.is_async = spec.is_async;
    job.ignore_errors = spec.ignore_errors;
    if spec.is_async && spec.num_input_granules > settings.preview_threshold {
        job.status = JobStatus::Previewing;
    }

    let cmr_max_page_size = settings.cmr_max_page_size;
    let job_for_insert = job.clone();
    let mut conn = db.conn().await?;
    conn.transaction(|conn| {
        Box::pin(async move {
            let job = job_for_insert;
            jobs::insert(conn, &job).await?;

            let new_steps: Vec<NewWorkflowStep<'_>> = spec
                .steps
                .iter()
                .enumerate()
                .map(|(i, s)| {
                    let step_index = (i + 1) as i32;
                    NewWorkflowStep {
                        job_id: &job.id,
                        step_index,
                        service_id: &s.service_id,
                        step_kind: s.kind.as_str(),
                        operation: &s.operation,
                        work_item_count: s
                            .kind
                            .expected_item_count(job.num_input_granules, cmr_max_page_size),
                        completed_count: 0,
                        progress_weight: s.progress_weight,
                        is_complete: 0,
                        max_batch_inputs: s.max_batch_inputs,
                        max_batch_size_bytes: s.max_batch_size_bytes,
                    }
                })
                .collect();
            steps::insert(conn, &new_steps).await?;

            let first = &spec.steps[0];
            let seed = NewWorkItem::ready(
                &job.id,
                &first.service_id,
                1,
                spec.input_catalog.as_deref().unwrap_or(""),
                0,
            )
            .with_scroll_id(spec.scroll_id.clone());
            work_items::insert_chunked(conn, &[seed], 1).await?;
            user_work::add_ready(conn, &job.username, &first.service_id, 1).await?;

            Ok(job)
        })
    })
    .await
}
