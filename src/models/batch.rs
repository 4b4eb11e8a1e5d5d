//! Aggregation batch models.

use serde::{Deserialize, Serialize};

/// A group of upstream outputs bound for one aggregating work item.
///
/// Batch ids are dense from 0 per `(job, service)`. The highest id is the
/// current batch; every lower id has been sealed and its downstream work
/// item emitted.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Batch {
    pub id: i32,
    #[serde(rename = "jobID")]
    pub job_id: String,
    #[serde(rename = "serviceID")]
    pub service_id: String,
    pub batch_id: i32,
}

/// One upstream output awaiting (or holding) a batch assignment.
///
/// A null `batch_id` means pending assignment. A null `stac_item_url` is a
/// placeholder for a failed upstream item; placeholders keep the sort
/// order contiguous but never count toward batch limits.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchItem {
    pub id: i32,
    #[serde(rename = "jobID")]
    pub job_id: String,
    #[serde(rename = "serviceID")]
    pub service_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub batch_id: Option<i32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stac_item_url: Option<String>,
    /// Size in bytes; zero for placeholders.
    pub item_size: i64,
    pub sort_index: i32,
}

impl BatchItem {
    pub fn is_placeholder(&self) -> bool {
        self.stac_item_url.is_none()
    }
}
