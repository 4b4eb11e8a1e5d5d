//! Artifact store: opaque JSON catalogs at well-known keys.
//!
//! The core only ever reads and writes whole JSON documents; the key
//! layout below is part of the worker contract. Cloud storage itself is
//! out of scope, so the file-backed store maps both `s3://` and absolute
//! keys into a local root.

mod file;
mod memory;

pub use file::FileStore;
pub use memory::MemoryStore;

use async_trait::async_trait;
use thiserror::Error;

use crate::models::stac::{StacCatalog, StacItem};

#[derive(Error, Debug)]
pub enum ArtifactError {
    #[error("artifact not found: {0}")]
    NotFound(String),
    #[error("invalid artifact key: {0}")]
    InvalidKey(String),
    #[error("artifact I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("artifact serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, ArtifactError>;

/// Content store for JSON catalogs, keyed by URL.
#[async_trait]
pub trait ArtifactStore: Send + Sync {
    async fn put_json(&self, url: &str, body: &serde_json::Value) -> Result<()>;
    async fn get_json(&self, url: &str) -> Result<serde_json::Value>;
}

/// Output catalog location for one work item. `page` selects one page of a
/// multi-catalog output; `None` is the single-catalog form.
pub fn work_item_catalog_url(job_id: &str, work_item_id: i32, page: Option<usize>) -> String {
    match page {
        None => format!("/tmp/{job_id}/{work_item_id}/outputs/catalog.json"),
        Some(n) => format!("/tmp/{job_id}/{work_item_id}/outputs/catalog{n}.json"),
    }
}

/// Catalog location for a sealed batch.
pub fn batch_catalog_url(bucket: &str, job_id: &str, step_index: i32, batch_id: i32) -> String {
    format!("s3://{bucket}/{job_id}/batches/{step_index}/{batch_id}/catalog.json")
}

/// Resolve an href found inside a catalog against the catalog's own URL.
/// Absolute hrefs (`s3://…`, `/…`) pass through untouched.
pub fn resolve_href(catalog_url: &str, href: &str) -> String {
    if href.contains("://") || href.starts_with('/') {
        return href.to_string();
    }
    match catalog_url.rsplit_once('/') {
        Some((base, _)) => format!("{base}/{href}"),
        None => href.to_string(),
    }
}

pub async fn read_catalog(store: &dyn ArtifactStore, url: &str) -> Result<StacCatalog> {
    let value = store.get_json(url).await?;
    Ok(serde_json::from_value(value)?)
}

pub async fn read_item(store: &dyn ArtifactStore, url: &str) -> Result<StacItem> {
    let value = store.get_json(url).await?;
    Ok(serde_json::from_value(value)?)
}

pub async fn write_catalog(
    store: &dyn ArtifactStore,
    url: &str,
    catalog: &StacCatalog,
) -> Result<()> {
    store.put_json(url, &serde_json::to_value(catalog)?).await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_work_item_catalog_url() {
        assert_eq!(
            work_item_catalog_url("job-1", 42, None),
            "/tmp/job-1/42/outputs/catalog.json"
        );
        assert_eq!(
            work_item_catalog_url("job-1", 42, Some(3)),
            "/tmp/job-1/42/outputs/catalog3.json"
        );
    }

    #[test]
    fn test_batch_catalog_url() {
        assert_eq!(
            batch_catalog_url("artifacts", "job-1", 3, 0),
            "s3://artifacts/job-1/batches/3/0/catalog.json"
        );
    }

    #[test]
    fn test_resolve_href() {
        assert_eq!(
            resolve_href("/tmp/j/1/outputs/catalog.json", "item0.json"),
            "/tmp/j/1/outputs/item0.json"
        );
        assert_eq!(
            resolve_href("/tmp/j/1/outputs/catalog.json", "s3://b/item.json"),
            "s3://b/item.json"
        );
        assert_eq!(
            resolve_href("s3://b/j/catalog.json", "/tmp/other.json"),
            "/tmp/other.json"
        );
    }
}
