//! Domain models for jobs, workflow steps, work items, and batches.

mod batch;
mod job;
mod step;
pub mod stac;
mod work_item;

pub use batch::{Batch, BatchItem};
pub use job::{Job, JobError, JobLink, JobStatus};
pub use step::{StepKind, WorkflowStep};
pub use work_item::{WorkItem, WorkItemHandle, WorkItemStatus, WorkItemUpdate};
