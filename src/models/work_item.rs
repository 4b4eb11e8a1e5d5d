//! Work item model and the worker update payload.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

const BYTES_PER_MIB: f64 = 1024.0 * 1024.0;

/// Lifecycle status of a work item.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkItemStatus {
    Ready,
    Running,
    Successful,
    Failed,
    Canceled,
    Warning,
}

impl WorkItemStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Ready => "ready",
            Self::Running => "running",
            Self::Successful => "successful",
            Self::Failed => "failed",
            Self::Canceled => "canceled",
            Self::Warning => "warning",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "ready" => Some(Self::Ready),
            "running" => Some(Self::Running),
            "successful" => Some(Self::Successful),
            "failed" => Some(Self::Failed),
            "canceled" => Some(Self::Canceled),
            "warning" => Some(Self::Warning),
            _ => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::Successful | Self::Failed | Self::Canceled | Self::Warning
        )
    }
}

impl std::fmt::Display for WorkItemStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One invocation of one service on one input catalog.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkItem {
    pub id: i32,
    #[serde(rename = "jobID")]
    pub job_id: String,
    #[serde(rename = "serviceID")]
    pub service_id: String,
    pub workflow_step_index: i32,
    pub status: WorkItemStatus,
    /// Artifact-store URL of the input catalog.
    pub stac_catalog_location: String,
    /// Continuation cursor; used only by the query step.
    #[serde(rename = "scrollID", skip_serializing_if = "Option::is_none")]
    pub scroll_id: Option<String>,
    /// Canonical output ordering key within `(job, service)`.
    pub sort_index: i32,
    pub retry_count: i32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    /// Observed runtime in milliseconds.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub duration_ms: Option<i64>,
    /// Combined output size in MiB.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub total_items_size: Option<f64>,
    /// Individual output sizes in bytes.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output_item_sizes: Option<Vec<i64>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// What the dispatcher hands to a polling worker.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkItemHandle {
    pub work_item: WorkItem,
    /// Serialized request operation for the owning step.
    pub operation: String,
    /// Page-size hint for the query step.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_cmr_granules: Option<i32>,
}

/// A worker's terminal report for one work item.
///
/// The payload is a closed sum over the statuses a worker may report;
/// fields that only make sense for one status live on that variant.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum WorkItemUpdate {
    Successful {
        /// Output catalog URLs, in the worker's production order.
        #[serde(default)]
        results: Vec<String>,
        /// Total hits reported by the source catalog query.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        hits: Option<i32>,
        #[serde(
            rename = "scrollID",
            default,
            skip_serializing_if = "Option::is_none"
        )]
        scroll_id: Option<String>,
        /// Worker-observed runtime in milliseconds.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        duration: Option<i64>,
        /// Combined output size in MiB.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        total_items_size: Option<f64>,
        /// Individual output sizes in bytes.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        output_item_sizes: Option<Vec<i64>>,
    },
    Failed {
        #[serde(
            rename = "errorMessage",
            default,
            skip_serializing_if = "Option::is_none"
        )]
        error_message: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        duration: Option<i64>,
    },
    Warning {
        #[serde(
            rename = "errorMessage",
            default,
            skip_serializing_if = "Option::is_none"
        )]
        message: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        duration: Option<i64>,
    },
}

impl WorkItemUpdate {
    pub fn status(&self) -> WorkItemStatus {
        match self {
            Self::Successful { .. } => WorkItemStatus::Successful,
            Self::Failed { .. } => WorkItemStatus::Failed,
            Self::Warning { .. } => WorkItemStatus::Warning,
        }
    }

    pub fn is_failure(&self) -> bool {
        matches!(self, Self::Failed { .. })
    }

    pub fn duration(&self) -> Option<i64> {
        match self {
            Self::Successful { duration, .. }
            | Self::Failed { duration, .. }
            | Self::Warning { duration, .. } => *duration,
        }
    }

    pub fn results(&self) -> &[String] {
        match self {
            Self::Successful { results, .. } => results,
            _ => &[],
        }
    }

    pub fn hits(&self) -> Option<i32> {
        match self {
            Self::Successful { hits, .. } => *hits,
            _ => None,
        }
    }

    pub fn scroll_id(&self) -> Option<&str> {
        match self {
            Self::Successful { scroll_id, .. } => scroll_id.as_deref(),
            _ => None,
        }
    }

    pub fn output_item_sizes(&self) -> Option<&[i64]> {
        match self {
            Self::Successful {
                output_item_sizes, ..
            } => output_item_sizes.as_deref(),
            _ => None,
        }
    }

    /// Combined output size in MiB, derived from the per-item byte sizes
    /// when the worker did not report a total.
    pub fn total_items_size_mib(&self) -> Option<f64> {
        match self {
            Self::Successful {
                total_items_size,
                output_item_sizes,
                ..
            } => total_items_size.or_else(|| {
                output_item_sizes
                    .as_ref()
                    .map(|sizes| sizes.iter().map(|s| *s as f64).sum::<f64>() / BYTES_PER_MIB)
            }),
            _ => None,
        }
    }

    pub fn error_message(&self) -> Option<&str> {
        match self {
            Self::Failed { error_message, .. } => error_message.as_deref(),
            Self::Warning { message, .. } => message.as_deref(),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_round_trip() {
        for status in [
            WorkItemStatus::Ready,
            WorkItemStatus::Running,
            WorkItemStatus::Successful,
            WorkItemStatus::Failed,
            WorkItemStatus::Canceled,
            WorkItemStatus::Warning,
        ] {
            assert_eq!(WorkItemStatus::from_str(status.as_str()), Some(status));
        }
    }

    #[test]
    fn test_terminal_set() {
        assert!(WorkItemStatus::Successful.is_terminal());
        assert!(WorkItemStatus::Failed.is_terminal());
        assert!(WorkItemStatus::Canceled.is_terminal());
        assert!(WorkItemStatus::Warning.is_terminal());
        assert!(!WorkItemStatus::Ready.is_terminal());
        assert!(!WorkItemStatus::Running.is_terminal());
    }

    #[test]
    fn test_update_deserializes_wire_names() {
        let body = serde_json::json!({
            "status": "successful",
            "results": ["s3://bucket/cat.json"],
            "hits": 12,
            "scrollID": "abc",
            "totalItemsSize": 1.5,
            "outputItemSizes": [100, 200],
        });
        let update: WorkItemUpdate = serde_json::from_value(body).unwrap();
        assert_eq!(update.status(), WorkItemStatus::Successful);
        assert_eq!(update.hits(), Some(12));
        assert_eq!(update.scroll_id(), Some("abc"));
        assert_eq!(update.results(), ["s3://bucket/cat.json"]);
        assert_eq!(update.total_items_size_mib(), Some(1.5));
    }

    #[test]
    fn test_update_derives_total_size_from_item_sizes() {
        let update = WorkItemUpdate::Successful {
            results: vec![],
            hits: None,
            scroll_id: None,
            duration: None,
            total_items_size: None,
            output_item_sizes: Some(vec![1024 * 1024, 1024 * 1024]),
        };
        assert_eq!(update.total_items_size_mib(), Some(2.0));
    }

    #[test]
    fn test_failed_update_carries_message() {
        let body = serde_json::json!({
            "status": "failed",
            "errorMessage": "out of memory",
            "duration": 42,
        });
        let update: WorkItemUpdate = serde_json::from_value(body).unwrap();
        assert!(update.is_failure());
        assert_eq!(update.error_message(), Some("out of memory"));
        assert_eq!(update.duration(), Some(42));
        assert!(update.results().is_empty());
    }

    #[test]
    fn test_work_item_wire_round_trip() {
        let item = WorkItem {
            id: 7,
            job_id: "j1".to_string(),
            service_id: "svc/reproject:latest".to_string(),
            workflow_step_index: 2,
            status: WorkItemStatus::Running,
            stac_catalog_location: "/tmp/j1/7/outputs/catalog.json".to_string(),
            scroll_id: Some("cursor".to_string()),
            sort_index: 3,
            retry_count: 1,
            started_at: None,
            duration_ms: None,
            total_items_size: Some(0.5),
            output_item_sizes: Some(vec![524288]),
            created_at: Utc::now(),
            updated_at: Utc::now(),
        };
        let json = serde_json::to_value(&item).unwrap();
        assert_eq!(json["jobID"], "j1");
        assert_eq!(json["serviceID"], "svc/reproject:latest");
        assert_eq!(json["scrollID"], "cursor");
        let back: WorkItem = serde_json::from_value(json).unwrap();
        assert_eq!(back.id, item.id);
        assert_eq!(back.sort_index, item.sort_index);
        assert_eq!(back.scroll_id, item.scroll_id);
        assert_eq!(back.status, item.status);
        assert_eq!(back.total_items_size, item.total_items_size);
    }
}
