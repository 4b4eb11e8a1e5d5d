//! Initialize and migrate commands.

use console::style;

use crate::config::Settings;
use crate::repository::Db;

/// Initialize the data directory and database.
pub async fn cmd_init(settings: &Settings) -> anyhow::Result<()> {
    settings.ensure_directories()?;

    let db = Db::from_url(&settings.database_url());
    db.migrate().await?;

    println!(
        "{} Initialized orchestrator state in {}",
        style("✓").green(),
        settings.data_dir.display()
    );
    println!("  Database: {}", settings.database_url());
    println!("  Artifacts: {}", settings.artifact_root.display());
    Ok(())
}

/// Run pending migrations without touching anything else.
pub async fn cmd_migrate(settings: &Settings) -> anyhow::Result<()> {
    let db = Db::from_url(&settings.database_url());
    db.migrate().await?;
    println!("{} Database is up to date", style("✓").green());
    Ok(())
}
