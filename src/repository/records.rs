//! Diesel ORM records for database tables.
//!
//! Records mirror the column layout exactly; `From` impls convert them
//! into the domain models, tolerating malformed stored values the same
//! way everywhere (fall back to a safe default rather than failing a
//! whole query).

use diesel::prelude::*;

use crate::models::{
    Batch, BatchItem, Job, JobError, JobLink, JobStatus, StepKind, WorkItem, WorkItemStatus,
    WorkflowStep,
};
use crate::schema;

use super::{parse_datetime, parse_datetime_opt};

#[derive(Queryable, Selectable, Identifiable, Debug, Clone)]
#[diesel(table_name = schema::jobs)]
#[diesel(check_for_backend(diesel::sqlite::Sqlite))]
pub struct JobRecord {
    pub id: String,
    pub username: String,
    pub status: String,
    pub message: String,
    pub progress: i32,
    pub num_input_granules: i32,
    pub ignore_errors: i32,
    pub is_async: i32,
    pub batches_completed: i32,
    pub created_at: String,
    pub updated_at: String,
}

#[derive(Insertable, Debug)]
#[diesel(table_name = schema::jobs)]
pub struct NewJob<'a> {
    pub id: &'a str,
    pub username: &'a str,
    pub status: &'a str,
    pub message: &'a str,
    pub progress: i32,
    pub num_input_granules: i32,
    pub ignore_errors: i32,
    pub is_async: i32,
    pub batches_completed: i32,
    pub created_at: &'a str,
    pub updated_at: &'a str,
}

impl From<JobRecord> for Job {
    fn from(record: JobRecord) -> Self {
        Job {
            id: record.id,
            username: record.username,
            status: JobStatus::from_str(&record.status).unwrap_or(JobStatus::Accepted),
            message: record.message,
            progress: record.progress,
            num_input_granules: record.num_input_granules,
            ignore_errors: record.ignore_errors != 0,
            is_async: record.is_async != 0,
            batches_completed: record.batches_completed,
            created_at: parse_datetime(&record.created_at),
            updated_at: parse_datetime(&record.updated_at),
        }
    }
}

#[derive(Queryable, Selectable, Identifiable, Debug, Clone)]
#[diesel(table_name = schema::workflow_steps)]
#[diesel(check_for_backend(diesel::sqlite::Sqlite))]
pub struct WorkflowStepRecord {
    pub id: i32,
    pub job_id: String,
    pub step_index: i32,
    pub service_id: String,
    pub step_kind: String,
    pub operation: String,
    pub work_item_count: i32,
    pub completed_count: i32,
    pub progress_weight: f64,
    pub is_complete: i32,
    pub max_batch_inputs: Option<i32>,
    pub max_batch_size_bytes: Option<i64>,
}

#[derive(Insertable, Debug)]
#[diesel(table_name = schema::workflow_steps)]
pub struct NewWorkflowStep<'a> {
    pub job_id: &'a str,
    pub step_index: i32,
    pub service_id: &'a str,
    pub step_kind: &'a str,
    pub operation: &'a str,
    pub work_item_count: i32,
    pub completed_count: i32,
    pub progress_weight: f64,
    pub is_complete: i32,
    pub max_batch_inputs: Option<i32>,
    pub max_batch_size_bytes: Option<i64>,
}

impl From<WorkflowStepRecord> for WorkflowStep {
    fn from(record: WorkflowStepRecord) -> Self {
        WorkflowStep {
            id: record.id,
            job_id: record.job_id,
            step_index: record.step_index,
            service_id: record.service_id,
            step_kind: StepKind::from_str(&record.step_kind).unwrap_or(StepKind::Map),
            operation: record.operation,
            work_item_count: record.work_item_count,
            completed_count: record.completed_count,
            progress_weight: record.progress_weight,
            is_complete: record.is_complete != 0,
            max_batch_inputs: record.max_batch_inputs,
            max_batch_size_bytes: record.max_batch_size_bytes,
        }
    }
}

#[derive(Queryable, Selectable, Identifiable, Debug, Clone)]
#[diesel(table_name = schema::work_items)]
#[diesel(check_for_backend(diesel::sqlite::Sqlite))]
pub struct WorkItemRecord {
    pub id: i32,
    pub job_id: String,
    pub service_id: String,
    pub step_index: i32,
    pub status: String,
    pub stac_catalog_location: String,
    pub scroll_id: Option<String>,
    pub sort_index: i32,
    pub retry_count: i32,
    pub started_at: Option<String>,
    pub duration_ms: Option<i64>,
    pub total_items_size: Option<f64>,
    pub output_item_sizes: Option<String>,
    pub created_at: String,
    pub updated_at: String,
}

#[derive(Insertable, Debug, Clone)]
#[diesel(table_name = schema::work_items)]
pub struct NewWorkItem {
    pub job_id: String,
    pub service_id: String,
    pub step_index: i32,
    pub status: String,
    pub stac_catalog_location: String,
    pub scroll_id: Option<String>,
    pub sort_index: i32,
    pub retry_count: i32,
    pub created_at: String,
    pub updated_at: String,
}

impl NewWorkItem {
    /// A ready item for the given step and input catalog.
    pub fn ready(
        job_id: &str,
        service_id: &str,
        step_index: i32,
        stac_catalog_location: &str,
        sort_index: i32,
    ) -> Self {
        let now = super::now_rfc3339();
        Self {
            job_id: job_id.to_string(),
            service_id: service_id.to_string(),
            step_index,
            status: WorkItemStatus::Ready.as_str().to_string(),
            stac_catalog_location: stac_catalog_location.to_string(),
            scroll_id: None,
            sort_index,
            retry_count: 0,
            created_at: now.clone(),
            updated_at: now,
        }
    }

    pub fn with_scroll_id(mut self, scroll_id: Option<String>) -> Self {
        self.scroll_id = scroll_id;
        self
    }
}

impl From<WorkItemRecord> for WorkItem {
    fn from(record: WorkItemRecord) -> Self {
        let output_item_sizes = record
            .output_item_sizes
            .and_then(|s| serde_json::from_str(&s).ok());
        WorkItem {
            id: record.id,
            job_id: record.job_id,
            service_id: record.service_id,
            workflow_step_index: record.step_index,
            status: WorkItemStatus::from_str(&record.status).unwrap_or(WorkItemStatus::Ready),
            stac_catalog_location: record.stac_catalog_location,
            scroll_id: record.scroll_id,
            sort_index: record.sort_index,
            retry_count: record.retry_count,
            started_at: parse_datetime_opt(record.started_at),
            duration_ms: record.duration_ms,
            total_items_size: record.total_items_size,
            output_item_sizes,
            created_at: parse_datetime(&record.created_at),
            updated_at: parse_datetime(&record.updated_at),
        }
    }
}

#[derive(Queryable, Selectable, Identifiable, Debug, Clone)]
#[diesel(table_name = schema::job_links)]
#[diesel(check_for_backend(diesel::sqlite::Sqlite))]
pub struct JobLinkRecord {
    pub id: i32,
    pub job_id: String,
    pub href: String,
    pub rel: String,
    pub mime_type: Option<String>,
    pub title: Option<String>,
    pub bbox: Option<String>,
    pub temporal_start: Option<String>,
    pub temporal_end: Option<String>,
    pub created_at: String,
}

#[derive(Insertable, Debug)]
#[diesel(table_name = schema::job_links)]
pub struct NewJobLink {
    pub job_id: String,
    pub href: String,
    pub rel: String,
    pub mime_type: Option<String>,
    pub title: Option<String>,
    pub bbox: Option<String>,
    pub temporal_start: Option<String>,
    pub temporal_end: Option<String>,
    pub created_at: String,
}

impl From<JobLinkRecord> for JobLink {
    fn from(record: JobLinkRecord) -> Self {
        let bbox = record.bbox.and_then(|s| serde_json::from_str(&s).ok());
        JobLink {
            href: record.href,
            rel: record.rel,
            mime_type: record.mime_type,
            title: record.title,
            bbox,
            temporal_start: parse_datetime_opt(record.temporal_start),
            temporal_end: parse_datetime_opt(record.temporal_end),
        }
    }
}

#[derive(Queryable, Selectable, Identifiable, Debug, Clone)]
#[diesel(table_name = schema::job_errors)]
#[diesel(check_for_backend(diesel::sqlite::Sqlite))]
pub struct JobErrorRecord {
    pub id: i32,
    pub job_id: String,
    pub url: String,
    pub message: String,
    pub created_at: String,
}

#[derive(Insertable, Debug)]
#[diesel(table_name = schema::job_errors)]
pub struct NewJobError<'a> {
    pub job_id: &'a str,
    pub url: &'a str,
    pub message: &'a str,
    pub created_at: &'a str,
}

impl From<JobErrorRecord> for JobError {
    fn from(record: JobErrorRecord) -> Self {
        JobError {
            url: record.url,
            message: record.message,
        }
    }
}

#[derive(Queryable, Selectable, Identifiable, Debug, Clone)]
#[diesel(table_name = schema::batches)]
#[diesel(check_for_backend(diesel::sqlite::Sqlite))]
pub struct BatchRecord {
    pub id: i32,
    pub job_id: String,
    pub service_id: String,
    pub batch_id: i32,
    pub created_at: String,
}

#[derive(Insertable, Debug)]
#[diesel(table_name = schema::batches)]
pub struct NewBatch<'a> {
    pub job_id: &'a str,
    pub service_id: &'a str,
    pub batch_id: i32,
    pub created_at: &'a str,
}

impl From<BatchRecord> for Batch {
    fn from(record: BatchRecord) -> Self {
        Batch {
            id: record.id,
            job_id: record.job_id,
            service_id: record.service_id,
            batch_id: record.batch_id,
        }
    }
}

#[derive(Queryable, Selectable, Identifiable, Debug, Clone)]
#[diesel(table_name = schema::batch_items)]
#[diesel(check_for_backend(diesel::sqlite::Sqlite))]
pub struct BatchItemRecord {
    pub id: i32,
    pub job_id: String,
    pub service_id: String,
    pub batch_id: Option<i32>,
    pub stac_item_url: Option<String>,
    pub item_size: i64,
    pub sort_index: i32,
    pub created_at: String,
}

#[derive(Insertable, Debug, Clone)]
#[diesel(table_name = schema::batch_items)]
pub struct NewBatchItem {
    pub job_id: String,
    pub service_id: String,
    pub batch_id: Option<i32>,
    pub stac_item_url: Option<String>,
    pub item_size: i64,
    pub sort_index: i32,
    pub created_at: String,
}

impl From<BatchItemRecord> for BatchItem {
    fn from(record: BatchItemRecord) -> Self {
        BatchItem {
            id: record.id,
            job_id: record.job_id,
            service_id: record.service_id,
            batch_id: record.batch_id,
            stac_item_url: record.stac_item_url,
            item_size: record.item_size,
            sort_index: record.sort_index,
        }
    }
}

#[derive(Queryable, Selectable, Identifiable, Debug, Clone)]
#[diesel(table_name = schema::user_work)]
#[diesel(check_for_backend(diesel::sqlite::Sqlite))]
pub struct UserWorkRecord {
    pub id: i32,
    pub username: String,
    pub service_id: String,
    pub ready_count: i32,
    pub last_update: String,
}
