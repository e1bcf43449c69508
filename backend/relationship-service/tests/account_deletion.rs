mod common;

use relationship_service::domain::DeletionStep;
use relationship_service::repository::{PostRepository, UserRepository};
use std::time::Duration;

#[tokio::test]
async fn cascade_removes_posts_and_both_edge_lists() {
    let h = common::harness();
    let u = h.user("ursula").await;
    let f = h.user("frank").await;
    let g1 = h.user("gina").await;
    let g2 = h.user("gus").await;
    let g3 = h.user("gail").await;

    // One follower, three followees: the lists have different lengths.
    h.state.relationships.toggle_follow(f.id, u.id).await.unwrap();
    for g in [&g1, &g2, &g3] {
        h.state.relationships.toggle_follow(u.id, g.id).await.unwrap();
    }
    let p1 = h.post(u.id, "first").await;
    let p2 = h.post(u.id, "second").await;
    let avatar = h.get(u.id).await.avatar.unwrap();

    let report = h.state.deletions.delete_account(u.id).await.unwrap();

    assert!(report.is_clean(), "unexpected issues: {:?}", report.errors);
    assert!(report.user_removed);
    assert!(!report.resumed);
    assert_eq!(report.posts_deleted, 2);
    assert_eq!(report.edges_repaired, 4);

    assert!(h.users.get(u.id).await.unwrap_err().to_string().contains("not found"));
    assert!(h.posts.get(p1.id).await.is_err());
    assert!(h.posts.get(p2.id).await.is_err());
    assert!(!h.assets.contains(&p1.image.public_id).await);
    assert!(!h.assets.contains(&avatar.public_id).await);

    assert!(!h.get(f.id).await.following.contains(&u.id));
    for g in [&g1, &g2, &g3] {
        assert!(!h.get(g.id).await.followers.contains(&u.id));
    }
}

#[tokio::test]
async fn rerun_after_success_is_a_noop() {
    let h = common::harness();
    let u = h.user("ursula").await;
    let f = h.user("frank").await;
    h.state.relationships.toggle_follow(f.id, u.id).await.unwrap();
    h.post(u.id, "only").await;

    h.state.deletions.delete_account(u.id).await.unwrap();
    let again = h.state.deletions.delete_account(u.id).await.unwrap();

    assert!(!again.user_removed);
    assert!(!again.resumed);
    assert_eq!(again.posts_deleted, 0);
    assert_eq!(again.edges_repaired, 0);
    assert!(again.errors.is_empty());
}

#[tokio::test]
async fn partial_failure_resumes_from_checkpoint() {
    let h = common::harness();
    let u = h.user("ursula").await;
    let f = h.user("frank").await;
    let g = h.user("gina").await;
    h.state.relationships.toggle_follow(f.id, u.id).await.unwrap();
    h.state.relationships.toggle_follow(u.id, g.id).await.unwrap();
    let post = h.post(u.id, "photo").await;
    let avatar = h.get(u.id).await.avatar.unwrap();

    h.users.break_saves_for(f.id);
    h.assets.set_failing_deletes(true);

    let first = h.state.deletions.delete_account(u.id).await.unwrap();

    assert!(first.user_removed);
    assert!(!first.is_clean());
    let steps: Vec<DeletionStep> = first.errors.iter().map(|e| e.step).collect();
    assert!(steps.contains(&DeletionStep::FollowerEdge));
    assert!(steps.contains(&DeletionStep::Avatar));
    assert!(first
        .errors
        .iter()
        .any(|e| e.step == DeletionStep::PostAsset && e.target == post.image.public_id));
    // Asset failures don't stop the post itself from being removed.
    assert_eq!(first.posts_deleted, 1);
    assert!(h.posts.get(post.id).await.is_err());
    // Other neighbours were still detached.
    assert!(!h.get(g.id).await.followers.contains(&u.id));
    assert!(h.get(f.id).await.following.contains(&u.id));

    h.users.heal();
    h.assets.set_failing_deletes(false);

    let second = h.state.deletions.delete_account(u.id).await.unwrap();

    assert!(second.resumed);
    assert!(!second.user_removed);
    assert!(second.is_clean(), "unexpected issues: {:?}", second.errors);
    assert_eq!(second.edges_repaired, 1);
    assert!(!h.get(f.id).await.following.contains(&u.id));
    assert!(!h.assets.contains(&avatar.public_id).await);

    // Checkpoint cleared: a third run has nothing to do.
    let third = h.state.deletions.delete_account(u.id).await.unwrap();
    assert!(!third.resumed);
    assert!(third.is_clean());
}

#[tokio::test]
async fn deleted_neighbours_do_not_fail_the_cascade() {
    let h = common::harness();
    let u = h.user("ursula").await;
    let f = h.user("frank").await;
    h.state.relationships.toggle_follow(f.id, u.id).await.unwrap();

    // Frank disappears without detaching, leaving a stale id on ursula.
    h.users.delete(f.id).await.unwrap();
    let report = h.state.deletions.delete_account(u.id).await.unwrap();

    assert!(report.user_removed);
    assert!(report.is_clean());
    assert_eq!(report.edges_repaired, 0);
}

#[tokio::test]
async fn profile_skips_ids_left_by_a_missing_neighbour() {
    let h = common::harness();
    let u = h.user("ursula").await;
    let f = h.user("frank").await;
    h.state.relationships.toggle_follow(f.id, u.id).await.unwrap();

    // Remove frank's aggregate directly so ursula keeps a stale follower id.
    h.users.delete(f.id).await.unwrap();

    let profile = h.state.profiles.get_profile(u.id).await.unwrap();
    assert!(profile.user.followers.contains(&f.id));
    assert!(profile.followers.is_empty());

    let report = h.state.reconciler.reconcile_user(u.id).await.unwrap();
    assert_eq!(report.dangling_removed, 1);
    assert!(h.get(u.id).await.followers.is_empty());
}

#[tokio::test]
async fn deletion_waits_for_in_flight_toggle_on_the_same_user() {
    let h = common::harness();
    let u_id = h.user("ursula").await.id;
    let x_id = h.user("xavier").await.id;

    // Hold the toggle after its actor-side write has committed.
    let gate = h.users.hold_next_save_of(x_id);
    let relationships = h.state.relationships.clone();
    let toggle = tokio::spawn(async move { relationships.toggle_follow(x_id, u_id).await });
    gate.committed.notified().await;

    let deletions = h.state.deletions.clone();
    let deletion = tokio::spawn(async move { deletions.delete_account(u_id).await });
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(!deletion.is_finished());

    gate.release.notify_one();
    assert!(toggle.await.unwrap().unwrap().followed);

    let report = deletion.await.unwrap().unwrap();
    assert!(report.user_removed);
    assert!(report.errors.is_empty(), "{:?}", report.errors);
    assert_eq!(report.edges_repaired, 1);
    assert!(h.users.get(u_id).await.is_err());
    assert!(!h.get(x_id).await.following.contains(&u_id));
}
