mod common;

use common::{setup_test_db, thought, unit_at, user};
use matching_service::{EventBroadcaster, MatchingEngine, RecomputeWorkers};
use std::sync::Arc;
use thoughtmates_core::{BroadcastConfig, BroadcastEvent, ContentStore, MatchStore, MatchingConfig};
use tokio_util::sync::CancellationToken;

fn engine(db: &Arc<database::Database>, config: MatchingConfig) -> MatchingEngine {
    MatchingEngine::new(db.clone(), db.clone(), config)
}

#[tokio::test]
async fn test_meaningful_affinity_is_stored_both_ways() {
    let db = setup_test_db().await;
    let ada = user(&db, "ada").await;
    let bob = user(&db, "bob").await;
    thought(&db, &ada, vec![1.0, 0.0]).await;
    thought(&db, &bob, unit_at(0.6)).await;

    let outcome = engine(&db, MatchingConfig::default())
        .recompute_for_user(ada.id, &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(outcome.compared, 1);
    assert_eq!(outcome.stored, 1);
    assert!(!outcome.cancelled);

    let ada_top = db.top_matches(ada.id, 10).await.unwrap();
    let bob_top = db.top_matches(bob.id, 10).await.unwrap();
    assert_eq!(ada_top.len(), 1);
    assert_eq!(bob_top.len(), 1);
    assert_eq!(ada_top[0].other_user_id, bob.id);
    assert_eq!(bob_top[0].other_user_id, ada.id);
    assert!((ada_top[0].score - 0.6).abs() < 1e-5);
    assert_eq!(ada_top[0].score, bob_top[0].score);
}

#[tokio::test]
async fn test_scores_at_or_below_threshold_are_not_stored() {
    let db = setup_test_db().await;
    let ada = user(&db, "ada").await;
    let bob = user(&db, "bob").await;
    thought(&db, &ada, vec![1.0, 0.0]).await;
    thought(&db, &bob, unit_at(0.1)).await;

    let outcome = engine(&db, MatchingConfig::default())
        .recompute_for_user(ada.id, &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(outcome.compared, 1);
    assert_eq!(outcome.stored, 0);
    assert!(db.get_match(ada.id, bob.id).await.unwrap().is_none());
}

#[tokio::test]
async fn test_lower_score_keeps_earlier_match_unless_pruning() {
    let db = setup_test_db().await;
    let ada = user(&db, "ada").await;
    let bob = user(&db, "bob").await;
    thought(&db, &ada, vec![1.0, 0.0]).await;
    let close = thought(&db, &bob, unit_at(0.6)).await;

    let cancel = CancellationToken::new();
    engine(&db, MatchingConfig::default())
        .recompute_for_user(ada.id, &cancel)
        .await
        .unwrap();

    // bob's only thought now barely relates to ada's
    db.delete_content(close, bob.id).await.unwrap();
    thought(&db, &bob, unit_at(0.1)).await;

    engine(&db, MatchingConfig::default())
        .recompute_for_user(ada.id, &cancel)
        .await
        .unwrap();
    let kept = db.get_match(ada.id, bob.id).await.unwrap().unwrap();
    assert!((kept.score - 0.6).abs() < 1e-5);

    let pruning = MatchingConfig {
        prune_stale: true,
        ..Default::default()
    };
    let outcome = engine(&db, pruning)
        .recompute_for_user(ada.id, &cancel)
        .await
        .unwrap();
    assert_eq!(outcome.pruned, 1);
    assert!(db.get_match(ada.id, bob.id).await.unwrap().is_none());
    assert!(db.get_match(bob.id, ada.id).await.unwrap().is_none());
}

#[tokio::test]
async fn test_bad_candidates_are_skipped() {
    let db = setup_test_db().await;
    let ada = user(&db, "ada").await;
    let bob = user(&db, "bob").await;
    let cy = user(&db, "cy").await;
    let dee = user(&db, "dee").await;
    thought(&db, &ada, vec![1.0, 0.0]).await;
    thought(&db, &bob, unit_at(0.9)).await;
    thought(&db, &cy, vec![1.0, 0.0, 0.0]).await;
    let broken = thought(&db, &dee, vec![1.0, 0.0]).await;

    sqlx::query("UPDATE thoughts SET vector = 'not a vector' WHERE id = ?")
        .bind(broken)
        .execute(db.pool())
        .await
        .unwrap();

    let outcome = engine(&db, MatchingConfig::default())
        .recompute_for_user(ada.id, &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(outcome.compared, 1);
    assert_eq!(outcome.stored, 1);
    assert_eq!(outcome.skipped, 2);
    assert!(db.get_match(ada.id, bob.id).await.unwrap().is_some());
    assert!(db.get_match(ada.id, cy.id).await.unwrap().is_none());
    assert!(db.get_match(ada.id, dee.id).await.unwrap().is_none());
}

#[tokio::test]
async fn test_user_without_thoughts_is_a_no_op() {
    let db = setup_test_db().await;
    let ada = user(&db, "ada").await;
    let bob = user(&db, "bob").await;
    thought(&db, &bob, vec![1.0, 0.0]).await;

    let outcome = engine(&db, MatchingConfig::default())
        .recompute_for_user(ada.id, &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(outcome.compared, 0);
    assert!(db.top_matches(bob.id, 10).await.unwrap().is_empty());
}

#[tokio::test]
async fn test_cancelled_pass_stops_before_next_candidate() {
    let db = setup_test_db().await;
    let ada = user(&db, "ada").await;
    let bob = user(&db, "bob").await;
    thought(&db, &ada, vec![1.0, 0.0]).await;
    thought(&db, &bob, unit_at(0.9)).await;

    let engine = engine(&db, MatchingConfig::default());
    let cancel = CancellationToken::new();
    cancel.cancel();

    let outcome = engine.recompute_for_user(ada.id, &cancel).await.unwrap();

    assert!(outcome.cancelled);
    assert_eq!(outcome.compared, 0);
    assert!(db.get_match(ada.id, bob.id).await.unwrap().is_none());

    let stats = engine.metrics().get_stats().await;
    assert_eq!(stats.passes_started, 1);
    assert_eq!(stats.passes_cancelled, 1);
    assert_eq!(stats.passes_completed, 0);
}

#[tokio::test]
async fn test_workers_publish_matches_updated() {
    let db = setup_test_db().await;
    let ada = user(&db, "ada").await;
    let bob = user(&db, "bob").await;
    thought(&db, &ada, vec![1.0, 0.0]).await;
    thought(&db, &bob, unit_at(0.8)).await;

    let (broadcaster, _task) = EventBroadcaster::spawn(&BroadcastConfig::default());
    let mut events = broadcaster.subscribe();
    let config = MatchingConfig::default();
    let engine = engine(&db, config.clone()).with_broadcaster(broadcaster);
    let (queue, workers) =
        RecomputeWorkers::spawn(Arc::new(engine), &config, CancellationToken::new());

    queue.enqueue(ada.id).await;

    let event = common::wait_for(&mut events, |event| {
        matches!(event, BroadcastEvent::MatchesUpdated { .. })
    })
    .await;
    assert_eq!(
        event,
        BroadcastEvent::MatchesUpdated {
            user_id: ada.id,
            stored: 1
        }
    );
    assert!(db.get_match(bob.id, ada.id).await.unwrap().is_some());

    workers.shutdown().await;
    let stats = queue.metrics().get_stats().await;
    assert_eq!(stats.jobs_enqueued, 1);
    assert_eq!(stats.passes_completed, 1);
}

#[tokio::test]
async fn test_single_candidate_slot_is_not_spent_on_self() {
    let db = setup_test_db().await;
    let ada = user(&db, "ada").await;
    let bob = user(&db, "bob").await;
    thought(&db, &ada, vec![1.0, 0.0]).await;
    thought(&db, &bob, unit_at(0.8)).await;

    let config = MatchingConfig {
        max_candidates: 1,
        ..Default::default()
    };
    let outcome = engine(&db, config)
        .recompute_for_user(ada.id, &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(outcome.compared, 1);
    assert!(db.get_match(ada.id, bob.id).await.unwrap().is_some());
}
