//! Filesystem-backed artifact store.

use std::path::{Component, Path, PathBuf};

use async_trait::async_trait;
use url::Url;

use super::{ArtifactError, ArtifactStore, Result};

/// Stores artifacts under a local root directory.
///
/// `s3://bucket/key` maps to `<root>/<bucket>/<key>`; absolute keys like
/// `/tmp/<job>/…` map to `<root>/tmp/<job>/…`.
pub struct FileStore {
    root: PathBuf,
}

impl FileStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn resolve(&self, url: &str) -> Result<PathBuf> {
        let relative = if url.starts_with("s3://") {
            let parsed = Url::parse(url)
                .map_err(|_| ArtifactError::InvalidKey(url.to_string()))?;
            let bucket = parsed
                .host_str()
                .ok_or_else(|| ArtifactError::InvalidKey(url.to_string()))?;
            let key = parsed.path().trim_start_matches('/');
            if key.is_empty() {
                return Err(ArtifactError::InvalidKey(url.to_string()));
            }
            format!("{bucket}/{key}")
        } else {
            url.trim_start_matches('/').to_string()
        };

        let path = Path::new(&relative);
        if path
            .components()
            .any(|c| matches!(c, Component::ParentDir | Component::RootDir | Component::Prefix(_)))
        {
            return Err(ArtifactError::InvalidKey(url.to_string()));
        }
        Ok(self.root.join(path))
    }
}

#[async_trait]
impl ArtifactStore for FileStore {
    async fn put_json(&self, url: &str, body: &serde_json::Value) -> Result<()> {
        let path = self.resolve(url)?;
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let bytes = serde_json::to_vec_pretty(body)?;
        tokio::fs::write(&path, bytes).await?;
        Ok(())
    }

    async fn get_json(&self, url: &str) -> Result<serde_json::Value> {
        let path = self.resolve(url)?;
        let bytes = match tokio::fs::read(&path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(ArtifactError::NotFound(url.to_string()))
            }
            Err(e) => return Err(e.into()),
        };
        Ok(serde_json::from_slice(&bytes)?)
    }
}
