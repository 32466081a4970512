//! Check orchestration tests

use std::sync::Arc;
use std::time::Duration;

use tokio_test::{assert_err, assert_ok};

use fleetkeeper::check::orchestrator::CheckOptions;
use fleetkeeper::errors::KeeperError;
use fleetkeeper::models::check_job::{CheckOutcome, JobStatus};
use fleetkeeper::models::container::{Container, UpdatePolicy, UpdateScope};
use fleetkeeper::models::update::UpdateStatus;
use fleetkeeper::storage::traits::{CheckJobStore, UpdateStore};

use crate::support::{orchestrator, store_with, CollectingSink, FakeTagSource, FaultyStore};

fn options(concurrency_limit: usize, dedup_enabled: bool) -> CheckOptions {
    CheckOptions {
        concurrency_limit,
        dedup_enabled,
        include_prereleases: false,
        cancel_poll_interval: Duration::from_millis(5),
    }
}

/// `per_image` containers for each of `images` images, all on tag 1.0.0
fn fleet(images: usize, per_image: usize) -> Vec<Container> {
    (0..images)
        .flat_map(|i| {
            (0..per_image).map(move |j| Container::new(format!("svc-{i}-{j}"), format!("org/image-{i}"), "1.0.0"))
        })
        .collect()
}

fn source_for(images: usize) -> FakeTagSource {
    (0..images).fold(FakeTagSource::new(), |source, i| {
        source.with_tags(&format!("org/image-{i}"), &["1.0.0", "1.0.1", "1.1.0", "2.0.0"])
    })
}

#[tokio::test]
async fn test_identical_containers_share_one_fetch() {
    let store = store_with(fleet(1, 3)).await;
    let source = Arc::new(source_for(1));
    let events = Arc::new(CollectingSink::new());
    let orchestrator = orchestrator(store.clone(), source.clone(), events.clone(), options(5, true));

    let job = assert_ok!(orchestrator.trigger_and_run().await);
    assert_eq!(job.status, JobStatus::Done);
    assert_eq!(job.total_count, 3);
    assert_eq!(job.checked_count, 3);
    assert_eq!(job.updates_found, 3);
    assert_eq!(source.fetches(), 1);

    // Default minor scope picks 1.1.0 for every container
    let pending = store.list_updates_by_status(UpdateStatus::Pending).await.unwrap();
    assert_eq!(pending.len(), 3);
    assert!(pending.iter().all(|u| u.to_tag == "1.1.0"));
    assert_eq!(events.count("update_found"), 3);
    assert_eq!(events.count("job_completed"), 1);
}

#[tokio::test]
async fn test_fetches_once_per_image() {
    let store = store_with(fleet(4, 3)).await;
    let source = Arc::new(source_for(4));
    let events = Arc::new(CollectingSink::new());
    let orchestrator = orchestrator(store, source.clone(), events.clone(), options(5, true));

    let job = assert_ok!(orchestrator.trigger_and_run().await);
    assert_eq!(job.status, JobStatus::Done);
    assert_eq!(job.checked_count, 12);
    assert_eq!(job.results.len(), 12);
    assert_eq!(source.fetches(), 4);
    assert_eq!(events.count("job_progress"), 12);
}

#[tokio::test]
async fn test_without_dedup_every_container_fetches() {
    let store = store_with(fleet(4, 3)).await;
    let source = Arc::new(source_for(4));
    let orchestrator = orchestrator(store, source.clone(), Arc::new(CollectingSink::new()), options(5, false));

    let job = assert_ok!(orchestrator.trigger_and_run().await);
    assert_eq!(job.checked_count, 12);
    assert_eq!(source.fetches(), 12);
}

#[tokio::test]
async fn test_scopes_share_a_group() {
    let containers = vec![
        Container::new("patch", "org/image-0", "1.0.0").with_scope(UpdateScope::Patch),
        Container::new("major", "org/image-0", "1.0.0").with_scope(UpdateScope::Major),
    ];
    let store = store_with(containers).await;
    let source = Arc::new(source_for(1));
    let orchestrator = orchestrator(store.clone(), source.clone(), Arc::new(CollectingSink::new()), options(5, true));

    assert_ok!(orchestrator.trigger_and_run().await);
    assert_eq!(source.fetches(), 1);

    let patch = store.list_updates_for_container("patch").await.unwrap();
    let major = store.list_updates_for_container("major").await.unwrap();
    assert_eq!(patch[0].to_tag, "1.0.1");
    assert_eq!(major[0].to_tag, "2.0.0");
}

#[tokio::test]
async fn test_group_error_is_isolated() {
    let mut containers = fleet(2, 2);
    containers.push(Container::new("broken", "org/broken", "1.0.0"));
    let store = store_with(containers).await;
    let source = Arc::new(source_for(2).failing("org/broken"));
    let events = Arc::new(CollectingSink::new());
    let orchestrator = orchestrator(store, source, events.clone(), options(5, true));

    let job = assert_ok!(orchestrator.trigger_and_run().await);
    assert_eq!(job.status, JobStatus::Done);
    assert_eq!(job.checked_count, 5);
    assert_eq!(job.errors_count, 1);
    assert_eq!(job.updates_found, 4);

    let broken = job
        .results
        .iter()
        .find(|r| r.container_name == "broken")
        .expect("broken container has a result");
    assert!(matches!(&broken.outcome, CheckOutcome::Error { message } if message.contains("503")));
    assert_eq!(events.count("job_failed"), 0);
}

#[tokio::test]
async fn test_second_trigger_rejected_while_active() {
    let store = store_with(fleet(1, 1)).await;
    let orchestrator = orchestrator(
        store,
        Arc::new(source_for(1)),
        Arc::new(CollectingSink::new()),
        options(5, true),
    );

    let queued = assert_ok!(orchestrator.trigger().await);
    let err = assert_err!(orchestrator.trigger().await);
    assert!(matches!(err, KeeperError::JobAlreadyActive(ref id) if *id == queued.id));

    let done = assert_ok!(orchestrator.run(&queued.id).await);
    assert_eq!(done.status, JobStatus::Done);

    // Finished jobs no longer block
    assert_ok!(orchestrator.trigger().await);
}

#[tokio::test]
async fn test_cancel_skips_remaining_groups() {
    let store = store_with(fleet(4, 1)).await;
    let source = Arc::new(source_for(4).with_delay(Duration::from_millis(100)));
    let events = Arc::new(CollectingSink::new());
    let orchestrator = orchestrator(store, source, events.clone(), options(1, true));

    let job = assert_ok!(orchestrator.trigger().await);
    let runner = {
        let orchestrator = orchestrator.clone();
        let id = job.id.clone();
        tokio::spawn(async move { orchestrator.run(&id).await })
    };

    tokio::time::sleep(Duration::from_millis(150)).await;
    assert!(assert_ok!(orchestrator.cancel(&job.id).await));

    let finished = assert_ok!(runner.await.unwrap());
    assert_eq!(finished.status, JobStatus::Canceled);
    assert_eq!(finished.total_count, 4);
    assert!(finished.checked_count < finished.total_count);
    assert!(finished.checked_count >= 1);
    assert_eq!(events.count("job_canceled"), 1);

    // Canceling a finished job is a no-op
    assert!(!assert_ok!(orchestrator.cancel(&job.id).await));
}

#[tokio::test]
async fn test_disabled_containers_are_skipped() {
    let mut containers = fleet(1, 2);
    containers.push(Container::new("frozen", "org/image-0", "1.0.0").with_policy(UpdatePolicy::Disabled));
    let store = store_with(containers).await;
    let orchestrator = orchestrator(
        store.clone(),
        Arc::new(source_for(1)),
        Arc::new(CollectingSink::new()),
        options(5, true),
    );

    let job = assert_ok!(orchestrator.trigger_and_run().await);
    assert_eq!(job.total_count, 2);
    assert!(job.results.iter().all(|r| r.container_name != "frozen"));
    assert!(store.list_updates_for_container("frozen").await.unwrap().is_empty());
}

#[tokio::test]
async fn test_auto_policy_approves_and_rerun_does_not_duplicate() {
    let containers = vec![Container::new("auto", "org/image-0", "1.0.0").with_policy(UpdatePolicy::Auto)];
    let store = store_with(containers).await;
    let orchestrator = orchestrator(
        store.clone(),
        Arc::new(source_for(1)),
        Arc::new(CollectingSink::new()),
        options(5, true),
    );

    assert_ok!(orchestrator.trigger_and_run().await);
    let second = assert_ok!(orchestrator.trigger_and_run().await);
    assert!(!second.results[0].update_recorded);

    let updates = store.list_updates_for_container("auto").await.unwrap();
    assert_eq!(updates.len(), 1);
    assert_eq!(updates[0].status, UpdateStatus::Approved);
}

#[tokio::test]
async fn test_escaped_store_error_fails_the_job() {
    let store = Arc::new(FaultyStore::with_containers(fleet(1, 2)).await);
    store.fail_progress_writes();
    let source = Arc::new(source_for(1));
    let events = Arc::new(CollectingSink::new());
    let orchestrator = orchestrator(store.clone(), source, events.clone(), options(2, true));

    let job = assert_ok!(orchestrator.trigger_and_run().await);
    assert_eq!(job.status, JobStatus::Failed);
    assert!(job.finished_at.is_some());
    let error = job.error.as_deref().expect("failure recorded");
    assert!(error.contains("disk full"), "{error}");

    let stored = store.get_job(&job.id).await.unwrap().unwrap();
    assert_eq!(stored.status, JobStatus::Failed);
    assert_eq!(events.count("job_failed"), 1);
    assert_eq!(events.count("job_completed"), 0);

    // The failed job no longer blocks new ones
    assert_ok!(orchestrator.trigger().await);
}

#[tokio::test]
async fn test_record_failure_is_isolated_within_group() {
    let store = Arc::new(FaultyStore::with_containers(fleet(1, 3)).await);
    store.fail_inserts_for("svc-0-1");
    let source = Arc::new(source_for(1));
    let events = Arc::new(CollectingSink::new());
    let orchestrator = orchestrator(store.clone(), source.clone(), events.clone(), options(2, true));

    let job = assert_ok!(orchestrator.trigger_and_run().await);
    assert_eq!(job.status, JobStatus::Done);
    assert_eq!(source.fetches(), 1);
    assert_eq!(job.checked_count, 3);
    assert_eq!(job.errors_count, 1);
    assert_eq!(job.updates_found, 2);

    let failed = job
        .results
        .iter()
        .find(|r| r.container_name == "svc-0-1")
        .expect("result present");
    assert!(matches!(&failed.outcome, CheckOutcome::Error { message } if message.contains("disk full")));

    for sibling in ["svc-0-0", "svc-0-2"] {
        let updates = store.list_updates_for_container(sibling).await.unwrap();
        assert_eq!(updates.len(), 1, "{sibling}");
        assert_eq!(updates[0].to_tag, "1.1.0");
    }
    assert!(store.list_updates_for_container("svc-0-1").await.unwrap().is_empty());
    assert_eq!(events.count("update_found"), 2);
}
