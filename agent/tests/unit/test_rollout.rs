//! Rollout lifecycle tests

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, TimeZone, Utc};
use tokio_test::assert_ok;

use fleetkeeper::cache::order::OrderCache;
use fleetkeeper::deploy::Intent;
use fleetkeeper::models::container::Container;
use fleetkeeper::models::update::{Update, UpdateStatus};
use fleetkeeper::rollout::{ApplyOutcome, Rollout, RolloutOptions};
use fleetkeeper::scheduler::DependencyScheduler;
use fleetkeeper::storage::memory::MemoryStore;
use fleetkeeper::storage::traits::{ContainerStore, UpdateStore};
use fleetkeeper::utils::CooldownOptions;

use crate::support::{store_with, CollectingSink, FakeExecutor};

struct Harness {
    store: Arc<MemoryStore>,
    executor: Arc<FakeExecutor>,
    events: Arc<CollectingSink>,
    rollout: Rollout,
}

async fn harness(containers: Vec<Container>, options: RolloutOptions) -> Harness {
    let store = store_with(containers).await;
    let executor = Arc::new(FakeExecutor::new());
    let events = Arc::new(CollectingSink::new());
    let rollout = Rollout::new(
        store.clone(),
        Arc::new(DependencyScheduler::new(Arc::new(OrderCache::new(16)))),
        executor.clone(),
        events.clone(),
        options,
    );
    Harness {
        store,
        executor,
        events,
        rollout,
    }
}

fn stack() -> Vec<Container> {
    vec![
        Container::new("web", "org/web", "1.0.0").with_dependencies(["api"]),
        Container::new("api", "org/api", "1.0.0").with_dependencies(["db"]),
        Container::new("db", "library/postgres", "1.0.0"),
    ]
}

fn options(max_apply_retries: u32) -> RolloutOptions {
    RolloutOptions {
        max_apply_retries,
        retry_backoff: CooldownOptions {
            base_delay: Duration::from_secs(60),
            max_delay: Duration::from_secs(3600),
            multiplier: 2.0,
        },
    }
}

/// Wednesday noon
fn midweek() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 10, 14, 12, 0, 0).unwrap()
}

async fn approved(store: &MemoryStore, container: &str, to_tag: &str, created: DateTime<Utc>) -> Update {
    store
        .insert_update(Update::new(container, "1.0.0", to_tag, UpdateStatus::Approved, created))
        .await
        .unwrap()
}

#[tokio::test]
async fn test_applies_in_dependency_order() {
    let h = harness(stack(), options(3)).await;
    let now = midweek();
    for name in ["web", "api", "db"] {
        approved(&h.store, name, "1.1.0", now).await;
    }

    let summaries = assert_ok!(h.rollout.apply_batch(now).await);
    assert_eq!(summaries.len(), 3);
    assert!(summaries.iter().all(|s| s.outcome == ApplyOutcome::Applied));
    assert_eq!(h.executor.containers(), vec!["db", "api", "web"]);
    assert_eq!(
        h.executor.intents()[0],
        Intent::SetTag {
            container: "db".to_string(),
            image: "library/postgres".to_string(),
            tag: "1.1.0".to_string(),
        }
    );

    let web = h.store.get_container("web").await.unwrap().unwrap();
    assert_eq!(web.current_tag, "1.1.0");
    assert_eq!(h.events.count("update_applied"), 3);

    // Nothing left to do
    assert!(assert_ok!(h.rollout.apply_batch(now).await).is_empty());
}

#[tokio::test]
async fn test_failed_dependency_defers_dependents() {
    let h = harness(stack(), options(3)).await;
    let now = midweek();
    for name in ["web", "api", "db"] {
        approved(&h.store, name, "1.1.0", now).await;
    }
    h.executor.fail("api");

    let summaries = assert_ok!(h.rollout.apply_batch(now).await);
    let outcome_of = |name: &str| {
        summaries
            .iter()
            .find(|s| s.container_name == name)
            .map(|s| s.outcome.clone())
            .expect("summary present")
    };

    assert_eq!(outcome_of("db"), ApplyOutcome::Applied);
    assert!(matches!(outcome_of("api"), ApplyOutcome::Failed { next_retry_at: Some(_), .. }));
    assert_eq!(
        outcome_of("web"),
        ApplyOutcome::Deferred {
            reason: "dependency api not applied".to_string()
        }
    );
    assert_eq!(h.executor.containers(), vec!["db", "api"]);

    // The deferred update stays approved for the next batch
    let web = h.store.list_updates_for_container("web").await.unwrap();
    assert_eq!(web[0].status, UpdateStatus::Approved);
}

#[tokio::test]
async fn test_retry_budget_then_reapproval() {
    let h = harness(vec![Container::new("web", "org/web", "1.0.0")], options(2)).await;
    let now = midweek();
    let update = approved(&h.store, "web", "1.1.0", now).await;
    h.executor.fail("web");

    let first = assert_ok!(h.rollout.apply_batch(now).await);
    assert_eq!(
        first[0].outcome,
        ApplyOutcome::Failed {
            error: "exit status 1".to_string(),
            next_retry_at: Some(now + chrono::Duration::seconds(60)),
        }
    );

    // Not due yet
    assert!(assert_ok!(h.rollout.apply_batch(now).await).is_empty());

    let due = now + chrono::Duration::seconds(61);
    let second = assert_ok!(h.rollout.apply_batch(due).await);
    assert!(matches!(second[0].outcome, ApplyOutcome::Failed { next_retry_at: None, .. }));

    let stored = h.store.get_update(&update.id).await.unwrap().unwrap();
    assert_eq!(stored.status, UpdateStatus::PendingRetry);
    assert_eq!(stored.retry_count, 2);
    assert!(assert_ok!(h.rollout.apply_batch(now + chrono::Duration::days(1)).await).is_empty());
    assert_eq!(h.events.count("update_apply_failed"), 2);

    // Re-approval starts over
    h.executor.recover("web");
    let reapproved = assert_ok!(h.rollout.approve(&stored.id, stored.version).await);
    assert_eq!(reapproved.retry_count, 0);
    assert!(reapproved.next_retry_at.is_none());

    let third = assert_ok!(h.rollout.apply_batch(due).await);
    assert_eq!(third[0].outcome, ApplyOutcome::Applied);
}

#[tokio::test]
async fn test_outside_window_is_deferred() {
    let mut db = Container::new("db", "library/postgres", "1.0.0");
    db.update_window = Some("sat,sun 02:00-05:00".to_string());
    let h = harness(vec![db], options(3)).await;
    let now = midweek();
    approved(&h.store, "db", "1.1.0", now).await;

    let summaries = assert_ok!(h.rollout.apply_batch(now).await);
    assert_eq!(
        summaries[0].outcome,
        ApplyOutcome::Deferred {
            reason: "outside update window".to_string()
        }
    );
    assert!(h.executor.intents().is_empty());

    // Saturday 03:00
    let saturday = Utc.with_ymd_and_hms(2026, 10, 17, 3, 0, 0).unwrap();
    let summaries = assert_ok!(h.rollout.apply_batch(saturday).await);
    assert_eq!(summaries[0].outcome, ApplyOutcome::Applied);
}

#[tokio::test]
async fn test_cycle_falls_back_to_name_order() {
    let containers = vec![
        Container::new("a", "org/a", "1.0.0").with_dependencies(["b"]),
        Container::new("b", "org/b", "1.0.0").with_dependencies(["a"]),
    ];
    let h = harness(containers, options(3)).await;
    let now = midweek();
    approved(&h.store, "a", "1.1.0", now).await;
    approved(&h.store, "b", "1.1.0", now).await;

    let summaries = assert_ok!(h.rollout.apply_batch(now).await);
    assert!(summaries.iter().all(|s| s.outcome == ApplyOutcome::Applied));
    assert_eq!(h.executor.containers(), vec!["a", "b"]);
}

#[tokio::test]
async fn test_unknown_container_is_deferred() {
    let h = harness(vec![], options(3)).await;
    approved(&h.store, "ghost", "1.1.0", midweek()).await;

    let summaries = assert_ok!(h.rollout.apply_batch(midweek()).await);
    assert_eq!(
        summaries[0].outcome,
        ApplyOutcome::Deferred {
            reason: "container not in inventory".to_string()
        }
    );
}

#[tokio::test]
async fn test_approve_many_reports_each_item() {
    let h = harness(stack(), options(3)).await;
    let now = midweek();
    let web = h
        .store
        .insert_update(Update::new("web", "1.0.0", "1.1.0", UpdateStatus::Pending, now))
        .await
        .unwrap();
    let api = h
        .store
        .insert_update(Update::new("api", "1.0.0", "1.1.0", UpdateStatus::Pending, now))
        .await
        .unwrap();

    let summaries = h
        .rollout
        .approve_many(&[
            (web.id.clone(), web.version),
            (api.id.clone(), api.version + 6),
            ("missing".to_string(), 1),
        ])
        .await;

    assert_eq!(summaries.len(), 3);
    assert!(summaries[0].approved);
    assert!(!summaries[1].approved);
    assert!(summaries[1].error.is_some());
    assert!(!summaries[2].approved);

    let pending = assert_ok!(h.rollout.pending_updates().await);
    assert_eq!(pending.len(), 1);
    assert_eq!(pending[0].id, api.id);
}

#[tokio::test]
async fn test_newer_update_retires_older() {
    let h = harness(vec![Container::new("web", "org/web", "1.0.0")], options(3)).await;
    let now = midweek();
    let older = approved(&h.store, "web", "1.1.0", now - chrono::Duration::hours(1)).await;
    approved(&h.store, "web", "1.2.0", now).await;

    let summaries = assert_ok!(h.rollout.apply_batch(now).await);
    assert_eq!(summaries.len(), 1);
    assert_eq!(summaries[0].to_tag, "1.2.0");

    let retired = h.store.get_update(&older.id).await.unwrap().unwrap();
    assert_eq!(retired.status, UpdateStatus::Rejected);
    assert_eq!(retired.last_error.as_deref(), Some("superseded by 1.2.0"));
}
