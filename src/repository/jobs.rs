//! Job queries, including the owned link and error records.

use diesel::prelude::*;
use diesel_async::RunQueryDsl;

use crate::models::{Job, JobError, JobLink, JobStatus};
use crate::schema::{job_errors, job_links, jobs};

use super::records::{JobErrorRecord, JobLinkRecord, JobRecord, NewJob, NewJobError, NewJobLink};
use super::{now_rfc3339, DieselError, SqliteConn};

pub async fn insert(conn: &mut SqliteConn, job: &Job) -> Result<(), DieselError> {
    let created_at = job.created_at.to_rfc3339();
    let updated_at = job.updated_at.to_rfc3339();
    let record = NewJob {
        id: &job.id,
        username: &job.username,
        status: job.status.as_str(),
        message: &job.message,
        progress: job.progress,
        num_input_granules: job.num_input_granules,
        ignore_errors: job.ignore_errors as i32,
        is_async: job.is_async as i32,
        batches_completed: job.batches_completed,
        created_at: &created_at,
        updated_at: &updated_at,
    };
    diesel::insert_into(jobs::table)
        .values(&record)
        .execute(conn)
        .await?;
    Ok(())
}

pub async fn get(conn: &mut SqliteConn, id: &str) -> Result<Option<Job>, DieselError> {
    jobs::table
        .filter(jobs::id.eq(id))
        .first::<JobRecord>(conn)
        .await
        .optional()
        .map(|opt| opt.map(Job::from))
}

/// All jobs, newest first.
pub async fn list(conn: &mut SqliteConn) -> Result<Vec<Job>, DieselError> {
    jobs::table
        .order(jobs::created_at.desc())
        .load::<JobRecord>(conn)
        .await
        .map(|records| records.into_iter().map(Job::from).collect())
}

pub async fn set_status(
    conn: &mut SqliteConn,
    id: &str,
    status: JobStatus,
    message: Option<&str>,
) -> Result<(), DieselError> {
    match message {
        Some(message) => {
            diesel::update(jobs::table.filter(jobs::id.eq(id)))
                .set((
                    jobs::status.eq(status.as_str()),
                    jobs::message.eq(message),
                    jobs::updated_at.eq(now_rfc3339()),
                ))
                .execute(conn)
                .await?;
        }
        None => {
            diesel::update(jobs::table.filter(jobs::id.eq(id)))
                .set((
                    jobs::status.eq(status.as_str()),
                    jobs::updated_at.eq(now_rfc3339()),
                ))
                .execute(conn)
                .await?;
        }
    }
    Ok(())
}

pub async fn set_progress(conn: &mut SqliteConn, id: &str, progress: i32) -> Result<(), DieselError> {
    diesel::update(jobs::table.filter(jobs::id.eq(id)))
        .set((
            jobs::progress.eq(progress),
            jobs::updated_at.eq(now_rfc3339()),
        ))
        .execute(conn)
        .await?;
    Ok(())
}

/// Shrink the expected granule count. Never grows it.
pub async fn shrink_num_input_granules(
    conn: &mut SqliteConn,
    id: &str,
    num_input_granules: i32,
) -> Result<(), DieselError> {
    diesel::update(
        jobs::table
            .filter(jobs::id.eq(id))
            .filter(jobs::num_input_granules.gt(num_input_granules)),
    )
    .set((
        jobs::num_input_granules.eq(num_input_granules),
        jobs::updated_at.eq(now_rfc3339()),
    ))
    .execute(conn)
    .await?;
    Ok(())
}

pub async fn increment_batches_completed(conn: &mut SqliteConn, id: &str) -> Result<(), DieselError> {
    diesel::update(jobs::table.filter(jobs::id.eq(id)))
        .set((
            jobs::batches_completed.eq(jobs::batches_completed + 1),
            jobs::updated_at.eq(now_rfc3339()),
        ))
        .execute(conn)
        .await?;
    Ok(())
}

/// Append a result link unless one with the same href is already present.
/// Returns whether a row was inserted.
pub async fn add_link(
    conn: &mut SqliteConn,
    job_id: &str,
    link: &JobLink,
) -> Result<bool, DieselError> {
    use diesel::dsl::count_star;
    let exists: i64 = job_links::table
        .filter(job_links::job_id.eq(job_id))
        .filter(job_links::href.eq(&link.href))
        .select(count_star())
        .first(conn)
        .await?;
    if exists > 0 {
        return Ok(false);
    }

    let record = NewJobLink {
        job_id: job_id.to_string(),
        href: link.href.clone(),
        rel: link.rel.clone(),
        mime_type: link.mime_type.clone(),
        title: link.title.clone(),
        bbox: link
            .bbox
            .map(|b| serde_json::to_string(&b).unwrap_or_default()),
        temporal_start: link.temporal_start.map(|dt| dt.to_rfc3339()),
        temporal_end: link.temporal_end.map(|dt| dt.to_rfc3339()),
        created_at: now_rfc3339(),
    };
    diesel::insert_into(job_links::table)
        .values(&record)
        .execute(conn)
        .await?;
    Ok(true)
}

/// Result links in insertion order.
pub async fn links(conn: &mut SqliteConn, job_id: &str) -> Result<Vec<JobLink>, DieselError> {
    job_links::table
        .filter(job_links::job_id.eq(job_id))
        .order(job_links::id.asc())
        .load::<JobLinkRecord>(conn)
        .await
        .map(|records| records.into_iter().map(JobLink::from).collect())
}

pub async fn link_count(conn: &mut SqliteConn, job_id: &str) -> Result<i64, DieselError> {
    use diesel::dsl::count_star;
    job_links::table
        .filter(job_links::job_id.eq(job_id))
        .filter(job_links::rel.eq("data"))
        .select(count_star())
        .first(conn)
        .await
}

pub async fn add_error(
    conn: &mut SqliteConn,
    job_id: &str,
    url: &str,
    message: &str,
) -> Result<(), DieselError> {
    let created_at = now_rfc3339();
    let record = NewJobError {
        job_id,
        url,
        message,
        created_at: &created_at,
    };
    diesel::insert_into(job_errors::table)
        .values(&record)
        .execute(conn)
        .await?;
    Ok(())
}

pub async fn error_count(conn: &mut SqliteConn, job_id: &str) -> Result<i64, DieselError> {
    use diesel::dsl::count_star;
    job_errors::table
        .filter(job_errors::job_id.eq(job_id))
        .select(count_star())
        .first(conn)
        .await
}

pub async fn errors(conn: &mut SqliteConn, job_id: &str) -> Result<Vec<JobError>, DieselError> {
    job_errors::table
        .filter(job_errors::job_id.eq(job_id))
        .order(job_errors::id.asc())
        .load::<JobErrorRecord>(conn)
        .await
        .map(|records| records.into_iter().map(JobError::from).collect())
}
