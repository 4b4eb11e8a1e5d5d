//! Batch engine: bounded batches, global ordering, placeholders.

mod common;

use common::*;
use harmony_workflow::artifacts::{batch_catalog_url, ArtifactStore};
use harmony_workflow::models::{JobStatus, WorkItemStatus};
use harmony_workflow::services::JobSpec;

const MAP_SERVICE: &str = "svc/subset:1";
const CONCAT_SERVICE: &str = "svc/concatenate:1";

fn batched_job(username: &str, granules: i32, max_inputs: i32) -> JobSpec {
    job_spec(
        username,
        granules,
        vec![
            query_step(),
            map_step(MAP_SERVICE),
            batched_step(CONCAT_SERVICE, max_inputs, 1_000_000_000),
        ],
    )
}

/// Run the query step and return the staged per-granule pages.
async fn run_query(h: &Harness, job_id: &str, names: &[&str]) {
    let q = h.claim(QUERY_SERVICE).await.unwrap();
    let pages = h.stage_numbered_outputs(job_id, q.work_item.id, names).await;
    h.update(
        q.work_item.id,
        successful_with_hits(pages, names.len() as i32),
    )
    .await;
}

/// Complete one map item (claimed FIFO) with a single 100-byte output.
async fn complete_next_map_item(h: &Harness, job_id: &str) {
    let handle = h.claim(MAP_SERVICE).await.unwrap();
    let name = format!("out-{}", handle.work_item.sort_index);
    let catalog = h
        .stage_output(job_id, handle.work_item.id, None, &[&name])
        .await;
    h.update(
        handle.work_item.id,
        successful_with_sizes(vec![catalog], vec![100]),
    )
    .await;
}

#[tokio::test]
async fn test_five_items_batch_as_two_two_one() {
    let h = harness().await;
    let job = h.submit(batched_job("alice", 5, 2)).await;
    run_query(&h, &job.id, &["g0", "g1", "g2", "g3", "g4"]).await;

    for _ in 0..5 {
        complete_next_map_item(&h, &job.id).await;
    }

    // Three sealed batches holding 2, 2, 1 items.
    for (batch_id, expected) in [(0, 2), (1, 2), (2, 1)] {
        let items = h.batch_items(&job.id, CONCAT_SERVICE, batch_id).await;
        assert_eq!(items.len(), expected, "batch {batch_id}");
        assert!(items.iter().all(|i| !i.is_placeholder()));
    }

    // Three aggregating work items, ordered by batch id.
    let children = h.items_for_step(&job.id, 3).await;
    assert_eq!(children.len(), 3);
    let sorts: Vec<i32> = children.iter().map(|c| c.sort_index).collect();
    assert_eq!(sorts, vec![0, 1, 2]);

    // Each batch catalog lists its item URLs in ascending sort order.
    let mut seen = Vec::new();
    for child in &children {
        let expected_url = batch_catalog_url(
            &h.settings.artifact_bucket,
            &job.id,
            3,
            child.sort_index,
        );
        assert_eq!(child.stac_catalog_location, expected_url);
        let catalog = h.store.get_json(&expected_url).await.unwrap();
        let hrefs: Vec<String> = catalog["links"]
            .as_array()
            .unwrap()
            .iter()
            .filter(|l| l["rel"] == "item")
            .map(|l| l["href"].as_str().unwrap().to_string())
            .collect();
        seen.extend(hrefs);
    }
    let mut expected_order = Vec::new();
    for b in 0..3 {
        for item in h.batch_items(&job.id, CONCAT_SERVICE, b).await {
            expected_order.push(item.stac_item_url.unwrap());
        }
    }
    assert_eq!(seen, expected_order);

    // The step expects exactly the three sealed batches.
    assert_eq!(h.step(&job.id, 3).await.work_item_count, 3);

    // Drain the aggregating step to finish the job.
    for _ in 0..3 {
        let handle = h.claim(CONCAT_SERVICE).await.unwrap();
        h.update(handle.work_item.id, successful(vec![])).await;
    }
    let job = h.job(&job.id).await;
    assert_eq!(job.status, JobStatus::Successful);
    assert_sort_contiguity(&h, &job.id).await;
}

#[tokio::test]
async fn test_out_of_order_completion_waits_for_contiguity() {
    let h = harness().await;
    let job = h.submit(batched_job("bob", 4, 2)).await;
    run_query(&h, &job.id, &["g0", "g1", "g2", "g3"]).await;

    let items = h.items_for_step(&job.id, 2).await;
    let by_sort = |sort: i32| items.iter().find(|i| i.sort_index == sort).unwrap().id;

    let complete = |id: i32, sort: i32| {
        let h = &h;
        let job_id = job.id.clone();
        async move {
            let catalog = h
                .stage_output(&job_id, id, None, &[&format!("out-{sort}")])
                .await;
            h.update(id, successful_with_sizes(vec![catalog], vec![100]))
                .await;
        }
    };

    // Finish the tail first: nothing can be batched yet.
    complete(by_sort(3), 3).await;
    complete(by_sort(2), 2).await;
    assert!(h.items_for_step(&job.id, 3).await.is_empty());
    let pending = h.batch_items(&job.id, CONCAT_SERVICE, 0).await;
    assert!(pending.is_empty(), "nothing contiguous with batch 0 yet");

    // The head arrives; items 0..4 become contiguous and both batches seal.
    complete(by_sort(0), 0).await;
    complete(by_sort(1), 1).await;

    let children = h.items_for_step(&job.id, 3).await;
    assert_eq!(children.len(), 2);
    for b in 0..2 {
        let rows = h.batch_items(&job.id, CONCAT_SERVICE, b).await;
        let sorts: Vec<i32> = rows.iter().map(|r| r.sort_index).collect();
        assert_eq!(sorts, vec![2 * b, 2 * b + 1]);
    }
}

#[tokio::test]
async fn test_failed_item_leaves_placeholder_and_keeps_order() {
    let h = harness_with(|s| s.work_item_retry_limit = 0).await;
    let spec = JobSpec {
        ignore_errors: true,
        ..batched_job("carol", 3, 2)
    };
    let job = h.submit(spec).await;
    run_query(&h, &job.id, &["g0", "g1", "g2"]).await;

    // Item 0 fails for good; items 1 and 2 succeed.
    let doomed = h.claim(MAP_SERVICE).await.unwrap();
    assert_eq!(doomed.work_item.sort_index, 0);
    h.update(doomed.work_item.id, failed("unusable granule")).await;
    complete_next_map_item(&h, &job.id).await;
    complete_next_map_item(&h, &job.id).await;

    // One batch: the placeholder plus the two real items, in order.
    let rows = h.batch_items(&job.id, CONCAT_SERVICE, 0).await;
    let sorts: Vec<i32> = rows.iter().map(|r| r.sort_index).collect();
    assert_eq!(sorts, vec![0, 1, 2]);
    assert!(rows[0].is_placeholder());
    assert!(!rows[1].is_placeholder());
    assert!(!rows[2].is_placeholder());

    // The sealed catalog lists only the real items.
    let children = h.items_for_step(&job.id, 3).await;
    assert_eq!(children.len(), 1);
    let catalog = h
        .store
        .get_json(&children[0].stac_catalog_location)
        .await
        .unwrap();
    let item_links = catalog["links"]
        .as_array()
        .unwrap()
        .iter()
        .filter(|l| l["rel"] == "item")
        .count();
    assert_eq!(item_links, 2);

    // Finish the aggregate; one error, links present, completes with errors.
    let handle = h.claim(CONCAT_SERVICE).await.unwrap();
    let out = h
        .stage_output(&job.id, handle.work_item.id, None, &["stitched"])
        .await;
    h.update(handle.work_item.id, successful(vec![out])).await;

    let job = h.job(&job.id).await;
    assert_eq!(job.status, JobStatus::CompleteWithErrors);
    assert_eq!(h.errors(&job.id).await.len(), 1);
    assert_eq!(h.links(&job.id).await.len(), 1);
    assert_eq!(
        h.items_for_step(&job.id, 2)
            .await
            .iter()
            .filter(|i| i.status == WorkItemStatus::Failed)
            .count(),
        1
    );
}
