//! Status command: job table on stdout.

use console::style;

use crate::config::Settings;
use crate::models::JobStatus;
use crate::repository::{jobs, Db};

/// Print every job with its status and progress.
pub async fn cmd_status(settings: &Settings) -> anyhow::Result<()> {
    let db = Db::from_url(&settings.database_url());
    let mut conn = db.conn().await?;
    let all_jobs = jobs::list(&mut conn).await?;

    if all_jobs.is_empty() {
        println!("No jobs.");
        return Ok(());
    }

    println!(
        "{:<38} {:<22} {:>8} {:>9} {}",
        "JOB", "STATUS", "PROGRESS", "GRANULES", "USER"
    );
    for job in &all_jobs {
        let status = match job.status {
            JobStatus::Successful => style(job.status.as_str()).green(),
            JobStatus::Failed => style(job.status.as_str()).red(),
            JobStatus::CompleteWithErrors | JobStatus::RunningWithErrors => {
                style(job.status.as_str()).yellow()
            }
            _ => style(job.status.as_str()).cyan(),
        };
        println!(
            "{:<38} {:<22} {:>7}% {:>9} {}",
            job.id, status, job.progress, job.num_input_granules, job.username
        );
    }

    Ok(())
}
