use chrono::{DateTime, NaiveDate, Utc};
use class_scheduler::catalog::{self, Catalog, ClassEntry, CurriculumEntry, LessonEntry};
use class_scheduler::db::{InsertOutcome, NewBatch, NewSession, SessionSetWrite};
use class_scheduler::model::{BatchStatus, Slot};
use class_scheduler::report::SkipReason;
use class_scheduler::{batches, config, db, sessions};
use tokio::time::Duration;
use tokio_util::sync::CancellationToken;

async fn setup_pool() -> db::Pool {
    let pool = db::init_pool("sqlite::memory:", Duration::from_secs(5))
        .await
        .unwrap();
    db::run_migrations(&pool).await.unwrap();
    pool
}

fn test_config() -> config::Config {
    let mut cfg: config::Config = serde_yaml::from_str(config::example()).unwrap();
    cfg.destinations.clear();
    cfg
}

fn at(raw: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(raw).unwrap().with_timezone(&Utc)
}

fn date(raw: &str) -> NaiveDate {
    NaiveDate::parse_from_str(raw, "%Y-%m-%d").unwrap()
}

/// Class "X" starting Thursdays on a ten lesson curriculum, optionally
/// declared longer than its lesson list.
fn catalog_with_length(total_sessions: Option<i64>) -> Catalog {
    Catalog {
        curricula: vec![CurriculumEntry {
            name: "Rust Foundations".into(),
            active: true,
            lessons: (1..=10)
                .map(|i| LessonEntry {
                    title: format!("Lesson {i}"),
                    lesson_ref: format!("rf-{i:02}"),
                })
                .collect(),
        }],
        classes: vec![ClassEntry {
            name: "X".into(),
            start_weekday: "thu".into(),
            curriculum: Some("Rust Foundations".into()),
            total_sessions,
            active: true,
        }],
    }
}

/// Import the catalog and open the batch starting Thursday 2026-10-22.
async fn seed_batch(pool: &db::Pool, cfg: &config::Config, total_sessions: Option<i64>) -> i64 {
    catalog::import(pool, &catalog_with_length(total_sessions))
        .await
        .unwrap();
    let report = batches::create_due_batches(
        pool,
        cfg,
        at("2026-10-22T06:00:00+05:30"),
        &CancellationToken::new(),
    )
    .await
    .unwrap();
    assert_eq!(report.created, 1);
    db::list_active_batches(pool).await.unwrap()[0].batch_id
}

#[tokio::test]
async fn start_day_gets_three_sessions_of_lesson_one() {
    let pool = setup_pool().await;
    let cfg = test_config();
    let batch_id = seed_batch(&pool, &cfg, None).await;

    let report = sessions::generate_sessions(
        &pool,
        &cfg,
        at("2026-10-22T06:05:00+05:30"),
        &CancellationToken::new(),
    )
    .await
    .unwrap();
    assert_eq!(report.created, 1);
    assert_eq!(
        report.find("batch:X#1").unwrap().detail.as_deref(),
        Some("session 1: Lesson 1")
    );

    let rows = db::list_sessions(&pool, batch_id).await.unwrap();
    assert_eq!(rows.len(), 3);
    assert!(rows.iter().all(|s| s.session_number == 1));
    assert!(rows.iter().all(|s| s.title == "Lesson 1"));
    assert!(rows.iter().all(|s| s.lesson_ref.as_deref() == Some("rf-01")));
    assert!(rows.iter().all(|s| s.scheduled_date == date("2026-10-22")));
    assert_eq!(
        rows.iter().map(|s| s.slot).collect::<Vec<_>>(),
        vec![Slot::Morning, Slot::Afternoon, Slot::Evening]
    );
    assert_eq!(
        rows.iter().map(|s| s.scheduled_at).collect::<Vec<_>>(),
        vec![
            at("2026-10-22T09:00:00+05:30"),
            at("2026-10-22T13:00:00+05:30"),
            at("2026-10-22T19:30:00+05:30"),
        ]
    );
}

#[tokio::test]
async fn session_number_follows_elapsed_days() {
    let pool = setup_pool().await;
    let cfg = test_config();
    let batch_id = seed_batch(&pool, &cfg, None).await;

    // D + 5.
    sessions::generate_sessions(
        &pool,
        &cfg,
        at("2026-10-27T07:00:00+05:30"),
        &CancellationToken::new(),
    )
    .await
    .unwrap();

    let rows = db::list_sessions(&pool, batch_id).await.unwrap();
    assert_eq!(rows.len(), 3);
    assert!(rows.iter().all(|s| s.session_number == 6 && s.title == "Lesson 6"));
    assert!(rows.iter().all(|s| s.scheduled_date == date("2026-10-27")));
}

#[tokio::test]
async fn regeneration_is_idempotent() {
    let pool = setup_pool().await;
    let cfg = test_config();
    let batch_id = seed_batch(&pool, &cfg, None).await;
    let cancel = CancellationToken::new();
    let now = at("2026-10-22T06:05:00+05:30");

    let (a, b) = tokio::join!(
        sessions::generate_sessions(&pool, &cfg, now, &cancel),
        sessions::generate_sessions(&pool, &cfg, now, &cancel),
    );
    let (a, b) = (a.unwrap(), b.unwrap());
    assert_eq!(a.created + b.created, 1);
    assert_eq!(
        a.count_skipped(SkipReason::AlreadyExists) + b.count_skipped(SkipReason::AlreadyExists),
        1
    );

    let again = sessions::generate_sessions(&pool, &cfg, now, &cancel).await.unwrap();
    assert_eq!(again.count_skipped(SkipReason::AlreadyExists), 1);
    assert_eq!(db::list_sessions(&pool, batch_id).await.unwrap().len(), 3);
}

#[tokio::test]
async fn changed_slot_times_do_not_regenerate() {
    let pool = setup_pool().await;
    let mut cfg = test_config();
    let batch_id = seed_batch(&pool, &cfg, None).await;
    let cancel = CancellationToken::new();
    let now = at("2026-10-22T06:05:00+05:30");

    sessions::generate_sessions(&pool, &cfg, now, &cancel).await.unwrap();
    let before: Vec<_> = db::list_sessions(&pool, batch_id)
        .await
        .unwrap()
        .iter()
        .map(|s| (s.id, s.scheduled_at))
        .collect();

    cfg.schedule.slots.morning = "08:00".into();
    cfg.schedule.slots.afternoon = "14:00".into();
    cfg.schedule.slots.evening = "20:00".into();
    let report = sessions::generate_sessions(&pool, &cfg, now, &cancel).await.unwrap();
    assert_eq!(report.count_skipped(SkipReason::AlreadyExists), 1);
    assert_eq!(report.created, 0);

    let after: Vec<_> = db::list_sessions(&pool, batch_id)
        .await
        .unwrap()
        .iter()
        .map(|s| (s.id, s.scheduled_at))
        .collect();
    assert_eq!(after, before);
    assert_eq!(
        after.iter().map(|(_, t)| *t).collect::<Vec<_>>(),
        vec![
            at("2026-10-22T09:00:00+05:30"),
            at("2026-10-22T13:00:00+05:30"),
            at("2026-10-22T19:30:00+05:30"),
        ]
    );
}

#[tokio::test]
async fn existing_slot_blocks_filling_in_the_rest() {
    let pool = setup_pool().await;
    let cfg = test_config();
    let batch_id = seed_batch(&pool, &cfg, None).await;
    let today = date("2026-10-22");

    let write = db::insert_session_set(
        &pool,
        batch_id,
        today,
        &[NewSession {
            session_number: 1,
            title: "Lesson 1".into(),
            lesson_ref: Some("rf-01".into()),
            slot: Slot::Afternoon,
            scheduled_at: at("2026-10-22T13:00:00+05:30"),
        }],
    )
    .await
    .unwrap();
    assert!(matches!(write, SessionSetWrite::Inserted(ref ids) if ids.len() == 1));

    let report = sessions::generate_sessions(
        &pool,
        &cfg,
        at("2026-10-22T06:05:00+05:30"),
        &CancellationToken::new(),
    )
    .await
    .unwrap();
    assert_eq!(report.count_skipped(SkipReason::AlreadyExists), 1);

    let rows = db::list_sessions(&pool, batch_id).await.unwrap();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].slot, Slot::Afternoon);
}

#[tokio::test]
async fn nothing_is_generated_before_the_start_date() {
    let pool = setup_pool().await;
    let cfg = test_config();
    catalog::import(&pool, &catalog_with_length(None)).await.unwrap();
    let class = db::classes_starting_on(&pool, 4).await.unwrap().remove(0);

    let outcome = db::insert_batch(
        &pool,
        &NewBatch {
            class_id: class.id,
            curriculum_id: class.curriculum_id.unwrap(),
            batch_number: 1,
            start_date: date("2026-10-29"),
            status: BatchStatus::Active,
        },
        at("2026-10-20T00:00:00Z"),
    )
    .await
    .unwrap();
    let InsertOutcome::Inserted(batch_id) = outcome else {
        panic!("expected insert, got {outcome:?}");
    };

    let report = sessions::generate_sessions(
        &pool,
        &cfg,
        at("2026-10-22T06:05:00+05:30"),
        &CancellationToken::new(),
    )
    .await
    .unwrap();
    assert_eq!(report.count_skipped(SkipReason::NotStarted), 1);
    assert!(db::list_sessions(&pool, batch_id).await.unwrap().is_empty());
}

#[tokio::test]
async fn batch_completes_after_the_last_session() {
    let pool = setup_pool().await;
    let cfg = test_config();
    let batch_id = seed_batch(&pool, &cfg, None).await;
    let cancel = CancellationToken::new();

    // D + 9 is session 10, the last one.
    let last_day = sessions::generate_sessions(&pool, &cfg, at("2026-10-31T06:00:00+05:30"), &cancel)
        .await
        .unwrap();
    assert_eq!(last_day.created, 1);

    // D + 10 is past the curriculum length.
    let report = sessions::generate_sessions(&pool, &cfg, at("2026-11-01T06:00:00+05:30"), &cancel)
        .await
        .unwrap();
    assert_eq!(report.count_skipped(SkipReason::CurriculumComplete), 1);
    assert_eq!(db::count_sessions_on(&pool, batch_id, date("2026-11-01")).await.unwrap(), 0);

    let batches = db::list_batches(&pool, db::classes_starting_on(&pool, 4).await.unwrap()[0].id)
        .await
        .unwrap();
    assert_eq!(batches[0].status, BatchStatus::Completed);
    assert!(db::list_active_batches(&pool).await.unwrap().is_empty());
}

#[tokio::test]
async fn missing_lesson_uses_fallback_title() {
    let pool = setup_pool().await;
    let cfg = test_config();
    let batch_id = seed_batch(&pool, &cfg, Some(12)).await;

    // D + 11 is session 12; the lesson list stops at 10.
    sessions::generate_sessions(
        &pool,
        &cfg,
        at("2026-11-02T06:00:00+05:30"),
        &CancellationToken::new(),
    )
    .await
    .unwrap();

    let rows = db::list_sessions(&pool, batch_id).await.unwrap();
    assert_eq!(rows.len(), 3);
    assert!(rows.iter().all(|s| s.title == "Class 12" && s.lesson_ref.is_none()));
}
