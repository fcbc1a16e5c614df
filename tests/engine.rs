use std::sync::Arc;

use chrono::{DateTime, Duration, NaiveDate, Utc};

use matchday_bot::config::{ConfigTable, VenueConfig};
use matchday_bot::db::memory::MemoryDb;
use matchday_bot::db::schema::{Gender, OptionKind};
use matchday_bot::db::store::{NicknameStore, VoteStore};
use matchday_bot::engine::identity::placeholder_id;
use matchday_bot::engine::{Engine, EngineError};

const VENUE: i64 = 42;

fn engine() -> (Engine, Arc<MemoryDb>) {
    engine_with(VenueConfig::defaults(VENUE))
}

fn engine_with(config: VenueConfig) -> (Engine, Arc<MemoryDb>) {
    let db = Arc::new(MemoryDb::new());

    let engine = Engine::new(
        db.clone(),
        db.clone(),
        db.clone(),
        ConfigTable::new(vec![config]),
    );

    (engine, db)
}

fn today() -> NaiveDate {
    Utc::now().date_naive()
}

fn ts(offset_secs: i64) -> DateTime<Utc> {
    Utc::now() + Duration::seconds(offset_secs)
}

#[tokio::test]
async fn second_create_fails_while_poll_is_current() {
    let (engine, _) = engine();

    let created = engine.create_poll(VENUE, today()).await.unwrap();
    assert!(created.poll.active);
    assert!(created.replaced.is_none());

    let err = engine.create_poll(VENUE, today() + Duration::days(7)).await.unwrap_err();
    assert!(matches!(err, EngineError::PollExists));
}

#[tokio::test]
async fn stale_poll_is_retired_not_blocking() {
    let (engine, _) = engine();

    let stale = engine
        .create_poll(VENUE, today() - Duration::days(3))
        .await
        .unwrap()
        .poll;

    let created = engine.create_poll(VENUE, today()).await.unwrap();

    let replaced = created.replaced.expect("stale poll should be returned");
    assert_eq!(replaced.id, stale.id);
    assert!(!replaced.active);
    assert!(!replaced.pinned);
    assert_ne!(created.poll.id, stale.id);
}

#[tokio::test]
async fn cancel_restore_round_trip_keeps_the_poll() {
    let (engine, _) = engine();

    let poll = engine.create_poll(VENUE, today()).await.unwrap().poll;

    let cancelled = engine.cancel_poll(VENUE).await.unwrap();
    assert_eq!(cancelled.id, poll.id);
    assert!(!cancelled.active);

    assert!(engine.active_poll(VENUE).await.unwrap().is_none());
    let latest = engine.latest_poll(VENUE).await.unwrap().unwrap();
    assert_eq!(latest.id, poll.id);

    // The caller marks the cancellation with an external message.
    let mut marked = cancelled.clone();
    marked.cancel_message_id = Some(9001);
    engine.update_poll(&marked).await.unwrap();

    let restored = engine.restore_poll(VENUE).await.unwrap();
    assert_eq!(restored.id, poll.id);
    assert!(restored.active);
    // Restore leaves the cancellation-message slot for the caller to clear.
    assert_eq!(restored.cancel_message_id, Some(9001));
}

#[tokio::test]
async fn restore_refuses_a_passed_event_date() {
    let (engine, _) = engine();

    engine
        .create_poll(VENUE, today() - Duration::days(1))
        .await
        .unwrap();
    engine.cancel_poll(VENUE).await.unwrap();

    let err = engine.restore_poll(VENUE).await.unwrap_err();
    assert!(matches!(err, EngineError::PollDatePassed));
}

#[tokio::test]
async fn lifecycle_errors_without_a_poll() {
    let (engine, _) = engine();

    assert!(matches!(
        engine.cancel_poll(VENUE).await.unwrap_err(),
        EngineError::NoActivePoll
    ));
    assert!(matches!(
        engine.restore_poll(VENUE).await.unwrap_err(),
        EngineError::NoCancelledPoll
    ));
    assert!(matches!(
        engine.set_pinned(VENUE, true).await.unwrap_err(),
        EngineError::NoActivePoll
    ));
}

#[tokio::test]
async fn set_pinned_updates_the_active_poll() {
    let (engine, _) = engine();

    engine.create_poll(VENUE, today()).await.unwrap();

    let pinned = engine.set_pinned(VENUE, true).await.unwrap();
    assert!(pinned.pinned);

    let unpinned = engine.set_pinned(VENUE, false).await.unwrap();
    assert!(!unpinned.pinned);
}

#[tokio::test]
async fn concurrent_creates_yield_one_active_poll() {
    let (engine, _) = engine();

    let date = today();
    let (a, b) = tokio::join!(
        engine.create_poll(VENUE, date),
        engine.create_poll(VENUE, date),
    );

    let succeeded = [a.is_ok(), b.is_ok()].iter().filter(|ok| **ok).count();
    assert_eq!(succeeded, 1);
    for result in [a, b] {
        if let Err(e) = result {
            assert!(matches!(e, EngineError::PollExists));
        }
    }

    assert!(engine.active_poll(VENUE).await.unwrap().is_some());
}

#[tokio::test]
async fn new_polls_follow_the_venue_auto_pin_setting() {
    let (engine, _) = engine();
    let poll = engine.create_poll(VENUE, today()).await.unwrap().poll;
    assert!(poll.pinned);

    let mut config = VenueConfig::defaults(VENUE);
    config.auto_pin = false;
    let (engine, _) = engine_with(config);
    let poll = engine.create_poll(VENUE, today()).await.unwrap().poll;
    assert!(!poll.pinned);
}

#[tokio::test]
async fn latest_vote_wins_and_retraction_hides() {
    let (engine, _) = engine();

    let poll = engine.create_poll(VENUE, today()).await.unwrap().poll;

    engine
        .record_platform_vote(VENUE, poll.id, 10, None, "Ana", OptionKind::FirstTime, ts(0))
        .await
        .unwrap();
    engine
        .record_platform_vote(VENUE, poll.id, 10, None, "Ana", OptionKind::SecondTime, ts(5))
        .await
        .unwrap();
    engine
        .record_platform_vote(VENUE, poll.id, 11, None, "Ben", OptionKind::FirstTime, ts(1))
        .await
        .unwrap();

    let current = engine.current_votes(poll.id).await.unwrap();
    assert_eq!(current.len(), 2);
    let ana = current.iter().find(|v| v.user_id == 10).unwrap();
    assert_eq!(ana.option, OptionKind::SecondTime);

    engine
        .record_platform_vote(VENUE, poll.id, 11, None, "Ben", OptionKind::Retracted, ts(9))
        .await
        .unwrap();

    let current = engine.current_votes(poll.id).await.unwrap();
    assert_eq!(current.len(), 1);
    assert_eq!(current[0].user_id, 10);
}

#[tokio::test]
async fn manual_votes_under_the_same_text_converge() {
    let (engine, _) = engine();

    let poll = engine.create_poll(VENUE, today()).await.unwrap().poll;

    engine
        .record_manual_vote(poll.id, "Ghost", OptionKind::FirstTime, ts(0))
        .await
        .unwrap();
    engine
        .record_manual_vote(poll.id, "Ghost", OptionKind::NotComing, ts(5))
        .await
        .unwrap();

    let current = engine.current_votes(poll.id).await.unwrap();
    assert_eq!(current.len(), 1);
    assert_eq!(current[0].user_id, placeholder_id("Ghost"));
    assert_eq!(current[0].option, OptionKind::NotComing);
    assert!(current[0].manual);
}

#[tokio::test]
async fn handle_and_nickname_targets_resolve_to_one_identity() {
    let (engine, _) = engine();

    let poll = engine.create_poll(VENUE, today()).await.unwrap().poll;

    let created = engine
        .create_nickname(VENUE, None, Some("@foxhound"), "Fox", None)
        .await
        .unwrap();
    assert!(created);

    engine
        .record_manual_vote(poll.id, "Fox", OptionKind::FirstTime, ts(0))
        .await
        .unwrap();
    engine
        .record_manual_vote(poll.id, "@foxhound", OptionKind::SecondTime, ts(5))
        .await
        .unwrap();

    let current = engine.current_votes(poll.id).await.unwrap();
    assert_eq!(current.len(), 1);
    assert_eq!(current[0].user_id, placeholder_id("foxhound"));
    assert_eq!(current[0].option, OptionKind::SecondTime);
}

#[tokio::test]
async fn consolidation_folds_placeholders_and_is_idempotent() {
    let (engine, nicknames) = engine();

    let poll = engine.create_poll(VENUE, today()).await.unwrap().poll;

    engine
        .create_nickname(VENUE, None, Some("foxhound"), "Fox", None)
        .await
        .unwrap();
    engine
        .record_manual_vote(poll.id, "Fox", OptionKind::FirstTime, ts(0))
        .await
        .unwrap();

    let rewritten = engine
        .ensure_user_data_consistency(VENUE, 500, Some("foxhound"))
        .await
        .unwrap();
    assert_eq!(rewritten, 1);

    let current = engine.current_votes(poll.id).await.unwrap();
    assert_eq!(current.len(), 1);
    assert_eq!(current[0].user_id, 500);
    assert_eq!(current[0].handle.as_deref(), Some("foxhound"));
    assert_eq!(current[0].option, OptionKind::FirstTime);

    // Running it again must not change the outcome.
    let rewritten = engine
        .ensure_user_data_consistency(VENUE, 500, Some("foxhound"))
        .await
        .unwrap();
    assert_eq!(rewritten, 0);
    assert_eq!(engine.current_votes(poll.id).await.unwrap(), current);

    // The nickname mapping now carries the real identity.
    let mapping = nicknames.by_nickname("Fox").await.unwrap().unwrap();
    assert_eq!(mapping.user_id, 500);
    assert_eq!(mapping.handle.as_deref(), Some("foxhound"));
}

#[tokio::test]
async fn platform_vote_consolidates_prior_manual_entries() {
    let (engine, _) = engine();

    let poll = engine.create_poll(VENUE, today()).await.unwrap().poll;

    engine
        .create_nickname(VENUE, None, Some("foxhound"), "Fox", None)
        .await
        .unwrap();
    engine
        .record_manual_vote(poll.id, "Fox", OptionKind::Undecided, ts(0))
        .await
        .unwrap();

    // Fox now votes directly on the platform; the real id becomes known.
    engine
        .record_platform_vote(
            VENUE,
            poll.id,
            500,
            Some("foxhound"),
            "Fox R.",
            OptionKind::FirstTime,
            ts(5),
        )
        .await
        .unwrap();

    let current = engine.current_votes(poll.id).await.unwrap();
    assert_eq!(current.len(), 1);
    assert_eq!(current[0].user_id, 500);
    assert_eq!(current[0].option, OptionKind::FirstTime);
}

#[tokio::test]
async fn linking_a_nickname_to_a_real_account_consolidates_votes() {
    let (engine, _) = engine();

    let poll = engine.create_poll(VENUE, today()).await.unwrap().poll;

    engine
        .record_manual_vote(poll.id, "Fox", OptionKind::FirstTime, ts(0))
        .await
        .unwrap();

    // Registering the nickname with a real id folds the placeholder vote in
    // immediately, without waiting for a platform vote.
    assert!(engine
        .create_nickname(VENUE, Some(500), None, "Fox", None)
        .await
        .unwrap());

    let current = engine.current_votes(poll.id).await.unwrap();
    assert_eq!(current.len(), 1);
    assert_eq!(current[0].user_id, 500);
    assert_eq!(current[0].option, OptionKind::FirstTime);
}

#[tokio::test]
async fn consolidation_moves_mapping_and_votes_in_one_call() {
    let (engine, db) = engine();

    let poll = engine.create_poll(VENUE, today()).await.unwrap().poll;

    engine
        .create_nickname(VENUE, None, Some("foxhound"), "Fox", None)
        .await
        .unwrap();
    engine
        .record_manual_vote(poll.id, "Fox", OptionKind::FirstTime, ts(0))
        .await
        .unwrap();

    // A single store call re-points the mapping and re-owns the votes.
    let rewritten = db
        .consolidate_placeholders(poll.id, 500, Some("foxhound"), &["Fox".to_owned()])
        .await
        .unwrap();
    assert_eq!(rewritten, 1);

    let mapping = db.by_nickname("Fox").await.unwrap().unwrap();
    assert_eq!(mapping.user_id, 500);
    assert_eq!(mapping.handle.as_deref(), Some("foxhound"));

    let current = engine.current_votes(poll.id).await.unwrap();
    assert_eq!(current.len(), 1);
    assert_eq!(current[0].user_id, 500);
}

#[tokio::test]
async fn ownership_rewrite_preserves_option_and_timestamp() {
    let (engine, db) = engine();

    let poll = engine.create_poll(VENUE, today()).await.unwrap().poll;

    let before = engine
        .record_manual_vote(poll.id, "Ghost", OptionKind::FirstTime, ts(0))
        .await
        .unwrap();

    let moved = db
        .rewrite_ownership(poll.id, placeholder_id("Ghost"), 900, Some("ghost"))
        .await
        .unwrap();
    assert_eq!(moved, 1);

    let current = engine.current_votes(poll.id).await.unwrap();
    assert_eq!(current.len(), 1);
    assert_eq!(current[0].user_id, 900);
    assert_eq!(current[0].handle.as_deref(), Some("ghost"));
    assert_eq!(current[0].option, before.option);
    assert_eq!(current[0].submitted_at, before.submitted_at);
}

#[tokio::test]
async fn nickname_is_first_writer_wins() {
    let (engine, nicknames) = engine();

    assert!(engine
        .create_nickname(VENUE, Some(500), None, "Fox", None)
        .await
        .unwrap());
    assert!(!engine
        .create_nickname(VENUE, Some(501), None, "Fox", None)
        .await
        .unwrap());

    // The second call must not alter the first mapping.
    let mapping = nicknames.by_nickname("Fox").await.unwrap().unwrap();
    assert_eq!(mapping.user_id, 500);
}

#[tokio::test]
async fn nickname_backfills_numeric_id_from_vote_history() {
    let (engine, nicknames) = engine();

    let poll = engine.create_poll(VENUE, today()).await.unwrap().poll;

    engine
        .record_platform_vote(
            VENUE,
            poll.id,
            777,
            Some("badger"),
            "B.",
            OptionKind::Later,
            ts(0),
        )
        .await
        .unwrap();

    assert!(engine
        .create_nickname(VENUE, None, Some("@badger"), "Badger", None)
        .await
        .unwrap());

    let mapping = nicknames.by_nickname("Badger").await.unwrap().unwrap();
    assert_eq!(mapping.user_id, 777);
}

#[tokio::test]
async fn quorum_report_maps_the_winning_band_to_a_start_time() {
    let (engine, _) = engine();

    let poll = engine.create_poll(VENUE, today()).await.unwrap().poll;

    for i in 0..11 {
        engine
            .record_platform_vote(
                VENUE,
                poll.id,
                100 + i,
                None,
                &format!("user-{}", i),
                OptionKind::FirstTime,
                ts(i),
            )
            .await
            .unwrap();
    }
    engine
        .record_platform_vote(VENUE, poll.id, 200, None, "late", OptionKind::Later, ts(20))
        .await
        .unwrap();

    let report = engine.quorum_for_venue(VENUE).await.unwrap();
    assert!(report.decision.enough_players);
    assert_eq!(
        report.start_time,
        Some(VenueConfig::defaults(VENUE).first_time)
    );
    assert_eq!(report.decision.playing.len(), 11);
    assert_eq!(report.decision.arriving_later.len(), 1);
}

#[tokio::test]
async fn read_views_split_attending_and_undecided() {
    let (engine, _) = engine();

    let poll = engine.create_poll(VENUE, today()).await.unwrap().poll;

    engine
        .record_platform_vote(VENUE, poll.id, 1, None, "a", OptionKind::FirstTime, ts(0))
        .await
        .unwrap();
    engine
        .record_platform_vote(VENUE, poll.id, 2, None, "b", OptionKind::Later, ts(1))
        .await
        .unwrap();
    engine
        .record_platform_vote(VENUE, poll.id, 3, None, "c", OptionKind::Undecided, ts(2))
        .await
        .unwrap();
    engine
        .record_platform_vote(VENUE, poll.id, 4, None, "d", OptionKind::NotComing, ts(3))
        .await
        .unwrap();

    let attending = engine.attending(poll.id).await.unwrap();
    assert_eq!(attending.len(), 2);

    let undecided = engine.undecided(poll.id).await.unwrap();
    assert_eq!(undecided.len(), 1);
    assert_eq!(undecided[0].user_id, 3);
}

#[tokio::test]
async fn nickname_cache_is_keyed_by_identity() {
    let (engine, _) = engine();

    engine
        .create_nickname(VENUE, Some(500), Some("foxhound"), "Fox", Some(Gender::Female))
        .await
        .unwrap();
    engine
        .create_nickname(VENUE, Some(501), None, "Badger", None)
        .await
        .unwrap();

    let cache = engine.nickname_cache(&[500, 501, 502]).await.unwrap();
    assert_eq!(cache.len(), 2);
    assert_eq!(cache.get(&500).unwrap().nickname, "Fox");
    assert_eq!(cache.get(&500).unwrap().gender, Some(Gender::Female));
    assert_eq!(cache.get(&501).unwrap().nickname, "Badger");
}
