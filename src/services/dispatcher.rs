//! Dispatcher: hands the next unit of work to a polling worker.

use std::time::Duration;

use chrono::Utc;
use diesel_async::AsyncConnection;
use tracing::debug;

use crate::config::Settings;
use crate::models::{StepKind, WorkItemHandle, WorkItemStatus};
use crate::repository::{jobs, steps, user_work, work_items, Db};

use super::{OrchestrationError, Result};

/// How long to wait before the single retry after writer contention.
const CLAIM_RETRY_DELAY: Duration = Duration::from_millis(100);

/// Claim the oldest ready work item for a service.
///
/// FIFO by `(created_at, id)` within the service. Sequential steps hand
/// out one item at a time: if the head of the queue belongs to one and a
/// sibling is running, the worker gets nothing and polls again. A busy
/// database is retried once.
pub async fn get_work(
    db: &Db,
    settings: &Settings,
    service_id: &str,
) -> Result<Option<WorkItemHandle>> {
    match try_claim(db, settings, service_id).await {
        Err(e) if e.is_busy() => {
            debug!(service_id, "claim hit writer contention, retrying once");
            tokio::time::sleep(CLAIM_RETRY_DELAY).await;
            match try_claim(db, settings, service_id).await {
                Err(e) if e.is_busy() => Ok(None),
                other => other,
            }
        }
        other => other,
    }
}

async fn try_claim(
    db: &Db,
    settings: &Settings,
    service_id: &str,
) -> Result<Option<WorkItemHandle>> {
    let service_id = service_id.to_string();
    let cmr_max_page_size = settings.cmr_max_page_size;

    let mut conn = db.conn().await?;
    conn.transaction(|conn| {
        Box::pin(async move {
            let Some(mut item) = work_items::next_ready_for_service(conn, &service_id).await?
            else {
                return Ok(None);
            };

            let step = steps::get(conn, &item.job_id, item.workflow_step_index)
                .await?
                .ok_or_else(|| {
                    OrchestrationError::InvariantViolation(format!(
                        "work item {} references missing step {} of job {}",
                        item.id, item.workflow_step_index, item.job_id
                    ))
                })?;

            if step.step_kind.is_sequential()
                && work_items::has_running_for_step(conn, &item.job_id, item.workflow_step_index)
                    .await?
            {
                return Ok(None);
            }

            let job = jobs::get(conn, &item.job_id).await?.ok_or_else(|| {
                OrchestrationError::InvariantViolation(format!(
                    "work item {} references missing job {}",
                    item.id, item.job_id
                ))
            })?;

            let now = Utc::now();
            work_items::mark_running(conn, item.id, now).await?;
            user_work::decrement_ready(conn, &job.username, &service_id).await?;

            let max_cmr_granules = if step.step_kind == StepKind::Query {
                let successful =
                    work_items::successful_count_for_step(conn, &item.job_id, step.step_index)
                        .await? as i32;
                Some(page_limit(
                    job.num_input_granules,
                    successful,
                    cmr_max_page_size,
                ))
            } else {
                None
            };

            item.status = WorkItemStatus::Running;
            item.started_at = Some(now);
            debug!(
                work_item_id = item.id,
                job_id = %item.job_id,
                service_id = %service_id,
                "claimed work item"
            );

            Ok(Some(WorkItemHandle {
                work_item: item,
                operation: step.operation,
                max_cmr_granules,
            }))
        })
    })
    .await
}

/// Page-size hint for the query step: bounds the total granules the step
/// ever yields to the job's granule count.
pub fn page_limit(num_input_granules: i32, successful_query_items: i32, cmr_max_page_size: i32) -> i32 {
    let already_fetched = successful_query_items.saturating_mul(cmr_max_page_size);
    num_input_granules
        .saturating_sub(already_fetched)
        .min(cmr_max_page_size)
        .max(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_page_limit_caps_at_page_size() {
        assert_eq!(page_limit(5000, 0, 2000), 2000);
    }

    #[test]
    fn test_page_limit_last_partial_page() {
        assert_eq!(page_limit(5000, 2, 2000), 1000);
    }

    #[test]
    fn test_page_limit_exhausted() {
        assert_eq!(page_limit(5000, 3, 2000), 0);
        assert_eq!(page_limit(4000, 2, 2000), 0);
    }

    #[test]
    fn test_page_limit_never_negative() {
        assert_eq!(page_limit(100, 50, 2000), 0);
    }
}
