mod common;

use relationship_service::domain::RepairOutcome;
use relationship_service::ServiceError;
use std::time::Duration;

#[tokio::test]
async fn toggle_twice_restores_both_sides() {
    let h = common::harness();
    let a = h.user("alice").await;
    let b = h.user("bob").await;
    let before = h.graph().await;

    let first = h.state.relationships.toggle_follow(a.id, b.id).await.unwrap();
    let second = h.state.relationships.toggle_follow(a.id, b.id).await.unwrap();

    assert!(first.followed);
    assert!(!second.followed);
    assert_eq!(h.graph().await, before);
}

#[tokio::test]
async fn single_toggle_touches_only_the_pair() {
    let h = common::harness();
    let a = h.user("alice").await;
    let b = h.user("bob").await;
    let c = h.user("carol").await;
    h.state.relationships.toggle_follow(c.id, a.id).await.unwrap();
    let c_before = h.get(c.id).await;

    h.state.relationships.toggle_follow(a.id, b.id).await.unwrap();

    let a_after = h.get(a.id).await;
    let b_after = h.get(b.id).await;
    assert!(a_after.following.contains(&b.id));
    assert!(b_after.followers.contains(&a.id));
    assert!(a_after.followers.contains(&c.id));
    assert!(b_after.following.is_empty());

    let c_after = h.get(c.id).await;
    assert_eq!(c_after.following, c_before.following);
    assert_eq!(c_after.followers, c_before.followers);
}

#[tokio::test]
async fn self_follow_fails_without_mutation() {
    let h = common::harness();
    let a = h.user("alice").await;
    let before = h.graph().await;

    let err = h.state.relationships.toggle_follow(a.id, a.id).await.unwrap_err();

    assert!(matches!(err, ServiceError::SelfReference(_)));
    assert_eq!(h.graph().await, before);
    assert_eq!(h.get(a.id).await.version, a.version);
}

#[tokio::test]
async fn version_conflicts_are_retried() {
    let h = common::harness();
    let a = h.user("alice").await;
    let b = h.user("bob").await;

    h.users.inject_conflicts(3);
    let outcome = h.state.relationships.toggle_follow(a.id, b.id).await.unwrap();

    assert!(outcome.followed);
    assert!(h.get(a.id).await.following.contains(&b.id));
    assert!(h.get(b.id).await.followers.contains(&a.id));
}

#[tokio::test]
async fn conflicts_beyond_the_bound_surface() {
    let h = common::harness();
    let a = h.user("alice").await;
    let b = h.user("bob").await;

    h.users.inject_conflicts(100);
    let err = h.state.relationships.toggle_follow(a.id, b.id).await.unwrap_err();

    assert!(matches!(err, ServiceError::Conflict(_)));
    assert!(h.get(a.id).await.following.is_empty());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_toggles_settle_symmetric() {
    let h = common::harness();
    let a = h.user("alice").await;
    let b = h.user("bob").await;

    let mut tasks = Vec::new();
    for i in 0..12 {
        let relationships = h.state.relationships.clone();
        let (actor, target) = if i % 2 == 0 { (a.id, b.id) } else { (b.id, a.id) };
        tasks.push(tokio::spawn(async move {
            relationships.toggle_follow(actor, target).await
        }));
    }
    for task in tasks {
        task.await.unwrap().unwrap();
    }

    let a = h.get(a.id).await;
    let b = h.get(b.id).await;
    assert_eq!(a.following.contains(&b.id), b.followers.contains(&a.id));
    assert_eq!(b.following.contains(&a.id), a.followers.contains(&b.id));
    // Six toggles in each direction: both edges end up absent.
    assert!(a.following.is_empty() && b.following.is_empty());
}

#[tokio::test]
async fn failed_target_write_is_repaired_by_reconciler() {
    let h = common::harness();
    let a = h.user("alice").await;
    let b = h.user("bob").await;

    h.users.break_saves_for(b.id);
    let err = h.state.relationships.toggle_follow(a.id, b.id).await.unwrap_err();
    assert!(matches!(err, ServiceError::Database(_)));

    // Actor side committed, target side did not.
    assert!(h.get(a.id).await.following.contains(&b.id));
    assert!(!h.get(b.id).await.followers.contains(&a.id));

    h.users.heal();
    let outcome = h.state.reconciler.repair_edge(a.id, b.id).await.unwrap();
    assert_eq!(outcome, RepairOutcome::BackEdgeAdded);
    assert!(h.get(b.id).await.followers.contains(&a.id));

    let report = h.state.reconciler.sweep(10).await.unwrap();
    assert_eq!(report.users_scanned, 2);
    assert_eq!(report.repairs(), 0);
}

#[tokio::test]
async fn deadline_cuts_toggle_between_the_two_writes() {
    let h = common::harness_with_timeout(300);
    let a = h.user("alice").await;
    let b = h.user("bob").await;
    h.users.set_save_latency(Some(Duration::from_millis(200)));

    let err = h.state.relationships.toggle_follow(a.id, b.id).await.unwrap_err();
    h.users.set_save_latency(None);
    assert!(matches!(err, ServiceError::Timeout(_)));

    // Actor write landed inside the deadline; the target write was dropped.
    assert!(h.get(a.id).await.following.contains(&b.id));
    assert!(!h.get(b.id).await.followers.contains(&a.id));

    let outcome = h.state.reconciler.repair_edge(a.id, b.id).await.unwrap();
    assert_eq!(outcome, RepairOutcome::BackEdgeAdded);
    assert!(h.get(b.id).await.followers.contains(&a.id));
}

#[tokio::test]
async fn deadline_before_first_write_leaves_graph_untouched() {
    let h = common::harness_with_timeout(100);
    let a = h.user("alice").await;
    let b = h.user("bob").await;
    let before = h.graph().await;
    h.users.set_save_latency(Some(Duration::from_millis(500)));

    let err = h.state.relationships.toggle_follow(a.id, b.id).await.unwrap_err();
    h.users.set_save_latency(None);

    assert!(matches!(err, ServiceError::Timeout(_)));
    assert_eq!(h.graph().await, before);
}
