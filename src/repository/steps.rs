//! Workflow step queries.

use diesel::prelude::*;
use diesel_async::RunQueryDsl;

use crate::models::WorkflowStep;
use crate::schema::workflow_steps;

use super::records::{NewWorkflowStep, WorkflowStepRecord};
use super::{DieselError, SqliteConn};

pub async fn insert(
    conn: &mut SqliteConn,
    steps: &[NewWorkflowStep<'_>],
) -> Result<(), DieselError> {
    for step in steps {
        diesel::insert_into(workflow_steps::table)
            .values(step)
            .execute(conn)
            .await?;
    }
    Ok(())
}

pub async fn get(
    conn: &mut SqliteConn,
    job_id: &str,
    step_index: i32,
) -> Result<Option<WorkflowStep>, DieselError> {
    workflow_steps::table
        .filter(workflow_steps::job_id.eq(job_id))
        .filter(workflow_steps::step_index.eq(step_index))
        .first::<WorkflowStepRecord>(conn)
        .await
        .optional()
        .map(|opt| opt.map(WorkflowStep::from))
}

/// All steps of a job in pipeline order.
pub async fn for_job(conn: &mut SqliteConn, job_id: &str) -> Result<Vec<WorkflowStep>, DieselError> {
    workflow_steps::table
        .filter(workflow_steps::job_id.eq(job_id))
        .order(workflow_steps::step_index.asc())
        .load::<WorkflowStepRecord>(conn)
        .await
        .map(|records| records.into_iter().map(WorkflowStep::from).collect())
}

/// Steps strictly after `step_index`, in pipeline order.
pub async fn after(
    conn: &mut SqliteConn,
    job_id: &str,
    step_index: i32,
) -> Result<Vec<WorkflowStep>, DieselError> {
    workflow_steps::table
        .filter(workflow_steps::job_id.eq(job_id))
        .filter(workflow_steps::step_index.gt(step_index))
        .order(workflow_steps::step_index.asc())
        .load::<WorkflowStepRecord>(conn)
        .await
        .map(|records| records.into_iter().map(WorkflowStep::from).collect())
}

pub async fn set_work_item_count(
    conn: &mut SqliteConn,
    job_id: &str,
    step_index: i32,
    count: i32,
) -> Result<(), DieselError> {
    diesel::update(
        workflow_steps::table
            .filter(workflow_steps::job_id.eq(job_id))
            .filter(workflow_steps::step_index.eq(step_index)),
    )
    .set(workflow_steps::work_item_count.eq(count))
    .execute(conn)
    .await?;
    Ok(())
}

pub async fn increment_work_item_count(
    conn: &mut SqliteConn,
    job_id: &str,
    step_index: i32,
    by: i32,
) -> Result<(), DieselError> {
    diesel::update(
        workflow_steps::table
            .filter(workflow_steps::job_id.eq(job_id))
            .filter(workflow_steps::step_index.eq(step_index)),
    )
    .set(workflow_steps::work_item_count.eq(workflow_steps::work_item_count + by))
    .execute(conn)
    .await?;
    Ok(())
}

/// One fewer upstream output will arrive; floor at zero.
pub async fn decrement_work_item_count(
    conn: &mut SqliteConn,
    job_id: &str,
    step_index: i32,
) -> Result<(), DieselError> {
    diesel::update(
        workflow_steps::table
            .filter(workflow_steps::job_id.eq(job_id))
            .filter(workflow_steps::step_index.eq(step_index))
            .filter(workflow_steps::work_item_count.gt(0)),
    )
    .set(workflow_steps::work_item_count.eq(workflow_steps::work_item_count - 1))
    .execute(conn)
    .await?;
    Ok(())
}

pub async fn set_completion(
    conn: &mut SqliteConn,
    job_id: &str,
    step_index: i32,
    completed_count: i32,
    is_complete: bool,
) -> Result<(), DieselError> {
    diesel::update(
        workflow_steps::table
            .filter(workflow_steps::job_id.eq(job_id))
            .filter(workflow_steps::step_index.eq(step_index)),
    )
    .set((
        workflow_steps::completed_count.eq(completed_count),
        workflow_steps::is_complete.eq(is_complete as i32),
    ))
    .execute(conn)
    .await?;
    Ok(())
}
