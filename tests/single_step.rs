//! Happy-path single-step jobs and the termination invariants.

mod common;

use common::*;
use harmony_workflow::models::{JobStatus, WorkItemStatus};

#[tokio::test]
async fn test_single_step_job_completes_with_one_link() {
    let h = harness().await;
    let job = h.submit(job_spec("alice", 1, vec![query_step()])).await;
    assert_eq!(job.status, JobStatus::Accepted);
    assert_eq!(h.ready_count("alice", QUERY_SERVICE).await, 1);

    let handle = h.claim(QUERY_SERVICE).await.expect("query item ready");
    assert_eq!(handle.work_item.job_id, job.id);
    assert_eq!(handle.max_cmr_granules, Some(1));
    assert_eq!(h.ready_count("alice", QUERY_SERVICE).await, 0);

    let catalog = h
        .stage_output(&job.id, handle.work_item.id, None, &["granule-a"])
        .await;
    h.update(handle.work_item.id, successful_with_hits(vec![catalog], 1))
        .await;

    let job = h.job(&job.id).await;
    assert_eq!(job.status, JobStatus::Successful);
    assert_eq!(job.progress, 100);

    let links = h.links(&job.id).await;
    assert_eq!(links.len(), 1);
    let link = &links[0];
    assert_eq!(link.href, "s3://data/granule-a.tif");
    assert_eq!(link.rel, "data");
    assert_eq!(link.mime_type.as_deref(), Some("image/tiff"));
    assert_eq!(link.bbox, Some([-10.0, -10.0, 10.0, 10.0]));
    assert_eq!(
        link.temporal_start.unwrap().to_rfc3339(),
        "2020-01-01T00:00:00+00:00"
    );
    assert_eq!(
        link.temporal_end.unwrap().to_rfc3339(),
        "2020-01-02T00:00:00+00:00"
    );

    assert_sort_contiguity(&h, &job.id).await;
}

#[tokio::test]
async fn test_terminal_job_ignores_further_updates() {
    let h = harness().await;
    let job = h.submit(job_spec("alice", 1, vec![query_step()])).await;

    let handle = h.claim(QUERY_SERVICE).await.unwrap();
    let catalog = h
        .stage_output(&job.id, handle.work_item.id, None, &["granule-a"])
        .await;
    h.update(
        handle.work_item.id,
        successful_with_hits(vec![catalog.clone()], 1),
    )
    .await;

    let terminal = h.job(&job.id).await;
    assert!(terminal.status.is_terminal());

    // A late duplicate and a late failure both bounce off the terminal job.
    h.update(handle.work_item.id, successful(vec![catalog])).await;
    h.update(handle.work_item.id, failed("late failure")).await;

    let after = h.job(&job.id).await;
    assert_eq!(after.status, terminal.status);
    assert_eq!(after.message, terminal.message);
    assert_eq!(after.progress, terminal.progress);
    assert_eq!(h.links(&job.id).await.len(), 1);
}

#[tokio::test]
async fn test_duplicate_update_adds_no_second_link() {
    let h = harness().await;
    let job = h
        .submit(job_spec("alice", 2, vec![query_step(), map_step("svc/reproject:1")]))
        .await;

    let q = h.claim(QUERY_SERVICE).await.unwrap();
    let pages = h
        .stage_numbered_outputs(&job.id, q.work_item.id, &["g0", "g1"])
        .await;
    h.update(q.work_item.id, successful_with_hits(pages, 2)).await;

    // Two step-2 items; finish the first one twice.
    let first = h.claim("svc/reproject:1").await.unwrap();
    let catalog = h
        .stage_output(&job.id, first.work_item.id, None, &["out-g0"])
        .await;
    h.update(first.work_item.id, successful(vec![catalog.clone()]))
        .await;
    h.update(first.work_item.id, successful(vec![catalog])).await;

    assert_eq!(h.links(&job.id).await.len(), 1);

    // The job is still live; the second item is untouched.
    let job = h.job(&job.id).await;
    assert_eq!(job.status, JobStatus::Running);
    let open: Vec<_> = h
        .items_for_step(&job.id, 2)
        .await
        .into_iter()
        .filter(|i| i.status == WorkItemStatus::Ready)
        .collect();
    assert_eq!(open.len(), 1);
}
