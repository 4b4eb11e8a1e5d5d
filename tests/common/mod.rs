//! Shared test harness: a scratch database, an in-memory artifact store,
//! and helpers that play the worker side of the protocol.

#![allow(dead_code)]

use std::sync::Arc;

use tempfile::TempDir;

use harmony_workflow::artifacts::{work_item_catalog_url, ArtifactStore, MemoryStore};
use harmony_workflow::config::Settings;
use harmony_workflow::models::{
    Batch, BatchItem, Job, JobError, JobLink, StepKind, WorkItem, WorkItemHandle, WorkItemUpdate,
    WorkflowStep,
};
use harmony_workflow::repository::{batches, jobs, steps, user_work, work_items, Db};
use harmony_workflow::services::{self, JobSpec, StepSpec};

pub const QUERY_SERVICE: &str = "harmony/query-cmr:latest";

pub struct Harness {
    pub db: Db,
    pub store: Arc<MemoryStore>,
    pub settings: Settings,
    _dir: TempDir,
}

pub async fn harness() -> Harness {
    harness_with(|_| {}).await
}

pub async fn harness_with(tweak: impl FnOnce(&mut Settings)) -> Harness {
    let dir = TempDir::new().unwrap();
    let db = Db::from_path(&dir.path().join("core.db"));
    db.migrate().await.unwrap();

    let mut settings = Settings {
        data_dir: dir.path().to_path_buf(),
        ..Default::default()
    };
    tweak(&mut settings);

    Harness {
        db,
        store: Arc::new(MemoryStore::new()),
        settings,
        _dir: dir,
    }
}

impl Harness {
    pub async fn submit(&self, spec: JobSpec) -> Job {
        services::submit_job(&self.db, &self.settings, spec)
            .await
            .unwrap()
    }

    pub async fn claim(&self, service_id: &str) -> Option<WorkItemHandle> {
        services::get_work(&self.db, &self.settings, service_id)
            .await
            .unwrap()
    }

    pub async fn update(&self, work_item_id: i32, update: WorkItemUpdate) {
        services::process_update(
            &self.db,
            self.store.as_ref(),
            &self.settings,
            work_item_id,
            update,
        )
        .await
        .unwrap()
    }

    pub async fn job(&self, job_id: &str) -> Job {
        let mut conn = self.db.conn().await.unwrap();
        jobs::get(&mut conn, job_id).await.unwrap().unwrap()
    }

    pub async fn step(&self, job_id: &str, step_index: i32) -> WorkflowStep {
        let mut conn = self.db.conn().await.unwrap();
        steps::get(&mut conn, job_id, step_index)
            .await
            .unwrap()
            .unwrap()
    }

    pub async fn items(&self, job_id: &str) -> Vec<WorkItem> {
        let mut conn = self.db.conn().await.unwrap();
        work_items::for_job(&mut conn, job_id).await.unwrap()
    }

    pub async fn items_for_step(&self, job_id: &str, step_index: i32) -> Vec<WorkItem> {
        self.items(job_id)
            .await
            .into_iter()
            .filter(|i| i.workflow_step_index == step_index)
            .collect()
    }

    pub async fn links(&self, job_id: &str) -> Vec<JobLink> {
        let mut conn = self.db.conn().await.unwrap();
        jobs::links(&mut conn, job_id).await.unwrap()
    }

    pub async fn errors(&self, job_id: &str) -> Vec<JobError> {
        let mut conn = self.db.conn().await.unwrap();
        jobs::errors(&mut conn, job_id).await.unwrap()
    }

    pub async fn current_batch(&self, job_id: &str, service_id: &str) -> Option<Batch> {
        let mut conn = self.db.conn().await.unwrap();
        batches::current_batch(&mut conn, job_id, service_id)
            .await
            .unwrap()
    }

    pub async fn batch_items(&self, job_id: &str, service_id: &str, batch_id: i32) -> Vec<BatchItem> {
        let mut conn = self.db.conn().await.unwrap();
        batches::items_in_batch(&mut conn, job_id, service_id, batch_id)
            .await
            .unwrap()
    }

    pub async fn ready_count(&self, username: &str, service_id: &str) -> i32 {
        let mut conn = self.db.conn().await.unwrap();
        user_work::ready_count(&mut conn, username, service_id)
            .await
            .unwrap()
    }

    /// Stage one output catalog for a work item, holding one granule item
    /// per name. Returns the catalog URL for the `results` array.
    pub async fn stage_output(
        &self,
        job_id: &str,
        work_item_id: i32,
        page: Option<usize>,
        granules: &[&str],
    ) -> String {
        let catalog_url = work_item_catalog_url(job_id, work_item_id, page);
        let mut links = Vec::new();
        for name in granules {
            let item_file = format!("{name}.json");
            links.push(serde_json::json!({"rel": "item", "href": item_file}));
            let item_url = catalog_url
                .rsplit_once('/')
                .map(|(base, _)| format!("{base}/{item_file}"))
                .unwrap();
            self.store
                .put_json(&item_url, &granule_item(name))
                .await
                .unwrap();
        }
        self.store
            .put_json(
                &catalog_url,
                &serde_json::json!({
                    "stac_version": "1.0.0-beta.2",
                    "id": format!("outputs-{work_item_id}"),
                    "description": "service outputs",
                    "links": links,
                }),
            )
            .await
            .unwrap();
        catalog_url
    }

    /// Stage one single-granule catalog per name, as a multi-output
    /// producer (the query step) would. Returns the catalog URLs.
    pub async fn stage_numbered_outputs(
        &self,
        job_id: &str,
        work_item_id: i32,
        granules: &[&str],
    ) -> Vec<String> {
        let mut urls = Vec::new();
        for (i, name) in granules.iter().enumerate() {
            urls.push(
                self.stage_output(job_id, work_item_id, Some(i), &[name])
                    .await,
            );
        }
        urls
    }
}

/// A granule item document with a single data asset.
pub fn granule_item(name: &str) -> serde_json::Value {
    serde_json::json!({
        "stac_version": "1.0.0-beta.2",
        "id": name,
        "bbox": [-10.0, -10.0, 10.0, 10.0],
        "properties": {
            "start_datetime": "2020-01-01T00:00:00Z",
            "end_datetime": "2020-01-02T00:00:00Z",
        },
        "assets": {
            "data": {
                "href": format!("s3://data/{name}.tif"),
                "type": "image/tiff",
                "title": format!("{name}.tif"),
            }
        },
    })
}

pub fn successful(results: Vec<String>) -> WorkItemUpdate {
    WorkItemUpdate::Successful {
        results,
        hits: None,
        scroll_id: None,
        duration: None,
        total_items_size: None,
        output_item_sizes: None,
    }
}

pub fn successful_with_hits(results: Vec<String>, hits: i32) -> WorkItemUpdate {
    WorkItemUpdate::Successful {
        results,
        hits: Some(hits),
        scroll_id: None,
        duration: None,
        total_items_size: None,
        output_item_sizes: None,
    }
}

pub fn successful_with_sizes(results: Vec<String>, sizes: Vec<i64>) -> WorkItemUpdate {
    WorkItemUpdate::Successful {
        results,
        hits: None,
        scroll_id: None,
        duration: None,
        total_items_size: None,
        output_item_sizes: Some(sizes),
    }
}

pub fn failed(message: &str) -> WorkItemUpdate {
    WorkItemUpdate::Failed {
        error_message: Some(message.to_string()),
        duration: None,
    }
}

pub fn query_step() -> StepSpec {
    StepSpec {
        service_id: QUERY_SERVICE.to_string(),
        kind: StepKind::Query,
        operation: "{}".to_string(),
        progress_weight: 1.0,
        max_batch_inputs: None,
        max_batch_size_bytes: None,
    }
}

pub fn map_step(service_id: &str) -> StepSpec {
    StepSpec {
        service_id: service_id.to_string(),
        kind: StepKind::Map,
        operation: "{}".to_string(),
        progress_weight: 1.0,
        max_batch_inputs: None,
        max_batch_size_bytes: None,
    }
}

pub fn aggregate_step(service_id: &str) -> StepSpec {
    StepSpec {
        service_id: service_id.to_string(),
        kind: StepKind::Aggregate,
        operation: "{}".to_string(),
        progress_weight: 1.0,
        max_batch_inputs: None,
        max_batch_size_bytes: None,
    }
}

pub fn batched_step(service_id: &str, max_inputs: i32, max_bytes: i64) -> StepSpec {
    StepSpec {
        service_id: service_id.to_string(),
        kind: StepKind::BatchedAggregate,
        operation: "{}".to_string(),
        progress_weight: 1.0,
        max_batch_inputs: Some(max_inputs),
        max_batch_size_bytes: Some(max_bytes),
    }
}

pub fn job_spec(username: &str, num_input_granules: i32, steps: Vec<StepSpec>) -> JobSpec {
    JobSpec {
        username: username.to_string(),
        num_input_granules,
        is_async: true,
        ignore_errors: false,
        steps,
        scroll_id: None,
        input_catalog: None,
    }
}

/// Verify the sort-index contiguity invariant for every `(job, service)`
/// scope of a finished job: the indexes used are exactly `0..N`.
pub async fn assert_sort_contiguity(h: &Harness, job_id: &str) {
    use std::collections::BTreeMap;
    let mut by_service: BTreeMap<String, Vec<i32>> = BTreeMap::new();
    for item in h.items(job_id).await {
        by_service
            .entry(item.service_id.clone())
            .or_default()
            .push(item.sort_index);
    }
    for (service, mut indexes) in by_service {
        indexes.sort_unstable();
        let expected: Vec<i32> = (0..indexes.len() as i32).collect();
        assert_eq!(
            indexes, expected,
            "sort indexes for service {service} are not contiguous"
        );
    }
}
