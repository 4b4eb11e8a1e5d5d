//! Job control commands: cancel, pause, resume.

use console::style;

use crate::config::Settings;
use crate::repository::Db;
use crate::services;

pub async fn cmd_cancel(
    settings: &Settings,
    job_id: &str,
    message: Option<&str>,
) -> anyhow::Result<()> {
    let db = Db::from_url(&settings.database_url());
    let job = services::cancel_job(&db, job_id, message).await?;
    println!("{} Canceled job {}", style("✓").green(), job.id);
    Ok(())
}

pub async fn cmd_pause(settings: &Settings, job_id: &str) -> anyhow::Result<()> {
    let db = Db::from_url(&settings.database_url());
    let job = services::pause_job(&db, job_id).await?;
    println!("{} Paused job {}", style("✓").green(), job.id);
    Ok(())
}

pub async fn cmd_resume(settings: &Settings, job_id: &str) -> anyhow::Result<()> {
    let db = Db::from_url(&settings.database_url());
    let job = services::resume_job(&db, job_id).await?;
    println!("{} Resumed job {}", style("✓").green(), job.id);
    Ok(())
}
