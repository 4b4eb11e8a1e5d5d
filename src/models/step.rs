//! Workflow step model.

use serde::{Deserialize, Serialize};

/// How a step consumes its predecessor's outputs.
///
/// The kind is declared at submission; the scheduler never infers it from
/// the service image name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepKind {
    /// The sequential source-catalog query step. Always step 1, at most one
    /// item in flight, pages through the source via a scroll cursor.
    Query,
    /// One work item per input catalog.
    Map,
    /// Consumes every predecessor output as a single input.
    Aggregate,
    /// Aggregating, with inputs partitioned into bounded batches.
    BatchedAggregate,
}

impl StepKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Query => "query",
            Self::Map => "map",
            Self::Aggregate => "aggregate",
            Self::BatchedAggregate => "batched_aggregate",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "query" => Some(Self::Query),
            "map" => Some(Self::Map),
            "aggregate" => Some(Self::Aggregate),
            "batched_aggregate" => Some(Self::BatchedAggregate),
            _ => None,
        }
    }

    /// At most one ready-or-running work item at a time.
    pub fn is_sequential(&self) -> bool {
        matches!(self, Self::Query)
    }

    /// Emits exactly one downstream work item per batch (or per step).
    pub fn has_aggregated_output(&self) -> bool {
        matches!(self, Self::Aggregate | Self::BatchedAggregate)
    }

    pub fn is_batched(&self) -> bool {
        matches!(self, Self::BatchedAggregate)
    }

    /// Expected work item count for a step of this kind given the job's
    /// granule count.
    pub fn expected_item_count(&self, num_input_granules: i32, cmr_max_page_size: i32) -> i32 {
        match self {
            Self::Query => {
                if cmr_max_page_size <= 0 {
                    0
                } else {
                    (num_input_granules + cmr_max_page_size - 1) / cmr_max_page_size
                }
            }
            Self::Map => num_input_granules,
            Self::Aggregate | Self::BatchedAggregate => 1,
        }
    }
}

impl std::fmt::Display for StepKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One stage in a job's processing pipeline, bound to a single service.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkflowStep {
    pub id: i32,
    #[serde(rename = "jobID")]
    pub job_id: String,
    /// 1-based, contiguous within a job.
    pub step_index: i32,
    #[serde(rename = "serviceID")]
    pub service_id: String,
    pub step_kind: StepKind,
    /// Serialized request operation handed to workers with each item.
    pub operation: String,
    /// Expected number of work items for this step.
    pub work_item_count: i32,
    pub completed_count: i32,
    pub progress_weight: f64,
    pub is_complete: bool,
    /// Batch bounds; fall back to the environment defaults when unset.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_batch_inputs: Option<i32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_batch_size_bytes: Option<i64>,
}

impl WorkflowStep {
    /// Expected item count for this step given the job's granule count.
    pub fn expected_item_count(&self, num_input_granules: i32, cmr_max_page_size: i32) -> i32 {
        self.step_kind
            .expected_item_count(num_input_granules, cmr_max_page_size)
    }
}
