//! Query-step paging: scroll continuation, page-limit hints, and the
//! granule-count bound.

mod common;

use common::*;
use harmony_workflow::models::{JobStatus, WorkItemStatus};
use harmony_workflow::services::JobSpec;

const MAP_SERVICE: &str = "svc/subset:1";

#[tokio::test]
async fn test_query_pages_until_granule_budget_is_spent() {
    let h = harness_with(|s| s.cmr_max_page_size = 2).await;
    let spec = JobSpec {
        scroll_id: Some("scroll-0".to_string()),
        ..job_spec("alice", 5, vec![query_step(), map_step(MAP_SERVICE)])
    };
    let job = h.submit(spec).await;
    assert_eq!(h.step(&job.id, 1).await.work_item_count, 3);

    let mut produced = 0;
    let expected_limits = [2, 2, 1];
    for (page, limit) in expected_limits.iter().enumerate() {
        let handle = h.claim(QUERY_SERVICE).await.expect("query page ready");
        assert_eq!(handle.max_cmr_granules, Some(*limit));
        assert_eq!(handle.work_item.sort_index, page as i32);
        assert_eq!(handle.work_item.scroll_id.as_deref(), Some("scroll-0"));

        let names: Vec<String> = (0..*limit).map(|i| format!("g{produced_i}", produced_i = produced + i)).collect();
        let name_refs: Vec<&str> = names.iter().map(String::as_str).collect();
        let pages = h
            .stage_numbered_outputs(&job.id, handle.work_item.id, &name_refs)
            .await;
        produced += limit;
        h.update(handle.work_item.id, successful(pages)).await;
    }

    // The budget is spent; no fourth page exists.
    assert!(h.claim(QUERY_SERVICE).await.is_none());
    let query_items = h.items_for_step(&job.id, 1).await;
    assert_eq!(query_items.len(), 3);
    assert!(query_items
        .iter()
        .all(|i| i.status == WorkItemStatus::Successful));

    // Total children equals the granule count: the bound held.
    let children = h.items_for_step(&job.id, 2).await;
    assert_eq!(children.len(), 5);
    let mut sorts: Vec<i32> = children.iter().map(|c| c.sort_index).collect();
    sorts.sort_unstable();
    assert_eq!(sorts, vec![0, 1, 2, 3, 4]);

    for _ in 0..5 {
        let handle = h.claim(MAP_SERVICE).await.unwrap();
        let name = format!("out-{}", handle.work_item.sort_index);
        let catalog = h
            .stage_output(&job.id, handle.work_item.id, None, &[&name])
            .await;
        h.update(handle.work_item.id, successful(vec![catalog])).await;
    }

    let job = h.job(&job.id).await;
    assert_eq!(job.status, JobStatus::Successful);
    assert_eq!(h.links(&job.id).await.len(), 5);
    assert_sort_contiguity(&h, &job.id).await;
}

#[tokio::test]
async fn test_fewer_hits_shrinks_the_job() {
    let h = harness_with(|s| s.cmr_max_page_size = 2).await;
    let job = h
        .submit(job_spec("bob", 5, vec![query_step(), map_step(MAP_SERVICE)]))
        .await;
    assert_eq!(h.step(&job.id, 1).await.work_item_count, 3);
    assert_eq!(h.step(&job.id, 2).await.work_item_count, 5);

    // The source only has three granules.
    let q = h.claim(QUERY_SERVICE).await.unwrap();
    let pages = h
        .stage_numbered_outputs(&job.id, q.work_item.id, &["g0", "g1"])
        .await;
    h.update(q.work_item.id, successful_with_hits(pages, 3)).await;

    let job_row = h.job(&job.id).await;
    assert_eq!(job_row.num_input_granules, 3);
    assert_eq!(h.step(&job.id, 1).await.work_item_count, 2);
    assert_eq!(h.step(&job.id, 2).await.work_item_count, 3);

    // One more page of one granule finishes the query step.
    let q = h.claim(QUERY_SERVICE).await.unwrap();
    assert_eq!(q.max_cmr_granules, Some(1));
    let pages = h
        .stage_numbered_outputs(&job.id, q.work_item.id, &["g2"])
        .await;
    h.update(q.work_item.id, successful(pages)).await;
    assert!(h.claim(QUERY_SERVICE).await.is_none());

    for _ in 0..3 {
        let handle = h.claim(MAP_SERVICE).await.unwrap();
        let name = format!("out-{}", handle.work_item.sort_index);
        let catalog = h
            .stage_output(&job.id, handle.work_item.id, None, &[&name])
            .await;
        h.update(handle.work_item.id, successful(vec![catalog])).await;
    }

    let job = h.job(&job.id).await;
    assert_eq!(job.status, JobStatus::Successful);
    assert_eq!(h.links(&job.id).await.len(), 3);
}

#[tokio::test]
async fn test_sequential_query_dispatches_one_item_at_a_time() {
    let h = harness_with(|s| s.cmr_max_page_size = 1).await;
    let job = h.submit(job_spec("carol", 2, vec![query_step()])).await;

    let first = h.claim(QUERY_SERVICE).await.unwrap();
    // Only one query item exists at a time, so a second poll finds nothing.
    assert!(h.claim(QUERY_SERVICE).await.is_none());

    let pages = h
        .stage_numbered_outputs(&job.id, first.work_item.id, &["g0"])
        .await;
    h.update(first.work_item.id, successful(pages)).await;

    // The continuation is claimable only now.
    let second = h.claim(QUERY_SERVICE).await.unwrap();
    assert_eq!(second.work_item.job_id, job.id);
    assert_eq!(second.work_item.sort_index, 1);
}
