//! In-memory artifact store for tests.

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;

use super::{ArtifactError, ArtifactStore, Result};

#[derive(Default)]
pub struct MemoryStore {
    entries: Mutex<HashMap<String, serde_json::Value>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Stored keys, sorted; handy for asserting on the key layout.
    pub fn keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = self.entries.lock().unwrap().keys().cloned().collect();
        keys.sort();
        keys
    }
}

#[async_trait]
impl ArtifactStore for MemoryStore {
    async fn put_json(&self, url: &str, body: &serde_json::Value) -> Result<()> {
        self.entries
            .lock()
            .unwrap()
            .insert(url.to_string(), body.clone());
        Ok(())
    }

    async fn get_json(&self, url: &str) -> Result<serde_json::Value> {
        self.entries
            .lock()
            .unwrap()
            .get(url)
            .cloned()
            .ok_or_else(|| ArtifactError::NotFound(url.to_string()))
    }
}
