mod common;

use std::fs;
use std::io::Cursor;
use std::path::Path;

use chrono::NaiveDate;
use crossref_audit::app::run_audit;
use crossref_audit::{
    AuditConfig, AuditEngine, CheckpointStatus, CheckpointStore, DocumentStore,
    FileCheckpointStore, InMemoryStore, ReasonCode, RetryConfig, SqliteStore, TimeRange,
};
use serde_json::json;

const DOCUMENTS: &str = r#"{"_id":"D1","repository":"R1","item":"I1","createdAt":"2024-01-02T10:00:00Z"}
{"_id":"D2","repository":"R1","item":"I2","createdAt":"2024-01-03T10:00:00Z"}

{"_id":"D3","repository":"R2","item":"I3","createdAt":"2024-02-10T10:00:00Z"}
"#;
const REPOSITORIES: &str = r#"{"_id":"R1","body":"bodyA"}
{"_id":"R2","body":"bodyB"}
"#;
const ITEMS: &str = r#"{"_id":"I1","bodies":["bodyA"]}
{"_id":"I2","bodies":["bodyB"]}
"#;

fn write_lines(path: &Path, body: &str) {
    fs::write(path, body).expect("failed writing jsonl fixture");
}

fn seeded_store(path: &Path) -> SqliteStore {
    let store = SqliteStore::open(path).expect("open sqlite");
    for (collection, body) in [
        ("documents", DOCUMENTS),
        ("repositories", REPOSITORIES),
        ("items", ITEMS),
    ] {
        store
            .import_json_lines(collection, Cursor::new(body), "_id")
            .expect("import");
    }
    store
}

#[test]
fn sqlite_store_reproduces_three_row_scenario() {
    let temp = tempfile::tempdir().expect("failed creating tempdir");
    let store = seeded_store(&temp.path().join("audit.sqlite"));
    let config = AuditConfig {
        page_size: 2,
        retry: RetryConfig::none(),
        checkpoint_path: temp.path().join("checkpoint.json"),
        report_path: temp.path().join("report.md"),
        ..AuditConfig::default().with_batch_key_threshold(2)
    };
    let checkpoints = FileCheckpointStore::new(&config.checkpoint_path);
    let outcome = AuditEngine::new(&store, &checkpoints, config)
        .run()
        .expect("run");

    assert_eq!(outcome.batches_this_run, 2);
    assert_eq!(outcome.totals.classified, 2);
    assert_eq!(outcome.totals.violations, 1);
    assert_eq!(outcome.totals.excluded, 1);
    let checkpoint = checkpoints.load().expect("load").expect("checkpoint");
    assert_eq!(checkpoint.status, CheckpointStatus::Complete);
    assert_eq!(checkpoint.last_key.as_deref(), Some("D3"));
    assert_eq!(
        checkpoint.reasons[&ReasonCode::LinkedEntityMismatch]
            .entity_ids
            .len(),
        1
    );
}

fn copy_into_sqlite(source: &InMemoryStore, target: &SqliteStore) {
    for collection in ["documents", "repositories", "items"] {
        let docs = source.load_collection(collection).expect("load collection");
        target
            .insert_documents(collection, docs)
            .expect("insert documents");
    }
}

#[test]
fn backends_agree_on_windowed_audits() {
    let memory = common::mixed_store(60);
    for (key, ts) in [
        ("doc_9001", json!("2024-01-05")),
        ("doc_9002", json!("2024-01-05 10:00:00")),
        ("doc_9003", json!(2460320)),
        ("doc_9004", json!("2024-01-05T10:00:00Z")),
    ] {
        memory
            .insert(
                "documents",
                key,
                json!({"repository": "R0", "item": "I2", "createdAt": ts}),
            )
            .expect("insert document");
    }
    let temp = tempfile::tempdir().expect("failed creating tempdir");
    let sqlite = SqliteStore::open(temp.path().join("audit.sqlite")).expect("open sqlite");
    copy_into_sqlite(&memory, &sqlite);

    let window = TimeRange::from_dates(
        NaiveDate::from_ymd_opt(2024, 1, 1),
        NaiveDate::from_ymd_opt(2024, 1, 15),
    );
    let run = |store: &dyn DocumentStore, name: &str| {
        let dir = temp.path().join(name);
        let config = AuditConfig {
            time_range: window,
            ..common::test_config(&dir)
        };
        let checkpoints = FileCheckpointStore::new(&config.checkpoint_path);
        let outcome = AuditEngine::new(store, &checkpoints, config)
            .run()
            .expect("run");
        let checkpoint = checkpoints.load().expect("load").expect("checkpoint");
        let report = fs::read_to_string(&outcome.report_path).expect("report");
        (checkpoint, report)
    };
    let (from_memory, memory_report) = run(&memory, "memory");
    let (from_sqlite, sqlite_report) = run(&sqlite, "sqlite");

    assert_eq!(from_sqlite.totals, from_memory.totals);
    assert_eq!(from_sqlite.reasons, from_memory.reasons);
    assert_eq!(from_sqlite.last_key, from_memory.last_key);
    assert_eq!(sqlite_report, memory_report);
    // Only the RFC 3339 row of the odd-format group is inside the window.
    assert_eq!(from_memory.last_key.as_deref(), Some("doc_9004"));
}

#[test]
fn cli_scans_resumes_and_finalizes() {
    let temp = tempfile::tempdir().expect("failed creating tempdir");
    let db = temp.path().join("audit.sqlite");
    let docs = temp.path().join("documents.jsonl");
    let repos = temp.path().join("repositories.jsonl");
    let items = temp.path().join("items.jsonl");
    write_lines(&docs, DOCUMENTS);
    write_lines(&repos, REPOSITORIES);
    write_lines(&items, ITEMS);
    let checkpoint = temp.path().join("state").join("checkpoint.json");
    let report = temp.path().join("reports").join("audit.md");
    let arg = |path: &Path| path.display().to_string();

    run_audit(
        [
            "--db".to_string(),
            arg(&db),
            "--import".to_string(),
            format!("documents={}", arg(&docs)),
            "--import".to_string(),
            format!("repositories={}", arg(&repos)),
            "--import".to_string(),
            format!("items={}", arg(&items)),
            "--batch-keys".to_string(),
            "1".to_string(),
            "--max-batches".to_string(),
            "1".to_string(),
            "--checkpoint-path".to_string(),
            arg(&checkpoint),
            "--report-path".to_string(),
            arg(&report),
        ]
        .into_iter(),
    )
    .expect("first cli run");
    let partial = FileCheckpointStore::new(&checkpoint)
        .load()
        .expect("load")
        .expect("checkpoint");
    assert_eq!(partial.status, CheckpointStatus::InProgress);
    assert_eq!(partial.last_key.as_deref(), Some("D1"));

    run_audit(
        [
            "--db".to_string(),
            arg(&db),
            "--batch-keys".to_string(),
            "1".to_string(),
            "--checkpoint-path".to_string(),
            arg(&checkpoint),
            "--report-path".to_string(),
            arg(&report),
        ]
        .into_iter(),
    )
    .expect("resumed cli run");
    let complete = FileCheckpointStore::new(&checkpoint)
        .load()
        .expect("load")
        .expect("checkpoint");
    assert_eq!(complete.status, CheckpointStatus::Complete);
    assert_eq!(complete.totals.violations, 1);
    let scanned_report = fs::read(&report).expect("report");

    run_audit(
        [
            "--finalize-only".to_string(),
            "--checkpoint-path".to_string(),
            arg(&checkpoint),
            "--report-path".to_string(),
            arg(&report),
        ]
        .into_iter(),
    )
    .expect("finalize-only run");
    assert_eq!(fs::read(&report).expect("report"), scanned_report);
}

#[test]
fn cli_date_window_filters_rows() {
    let temp = tempfile::tempdir().expect("failed creating tempdir");
    let db = temp.path().join("audit.sqlite");
    drop(seeded_store(&db));
    let checkpoint = temp.path().join("checkpoint.json");
    let report = temp.path().join("audit.md");

    run_audit(
        [
            "--db",
            db.to_str().expect("utf8 path"),
            "--start-date",
            "2024-01-01",
            "--end-date",
            "2024-02-01",
            "--checkpoint-path",
            checkpoint.to_str().expect("utf8 path"),
            "--report-path",
            report.to_str().expect("utf8 path"),
        ]
        .into_iter()
        .map(str::to_string),
    )
    .expect("windowed run");
    let state = FileCheckpointStore::new(&checkpoint)
        .load()
        .expect("load")
        .expect("checkpoint");
    assert_eq!(state.totals.scanned, 2);
    assert_eq!(state.totals.excluded, 0);
    let text = fs::read_to_string(&report).expect("report");
    assert!(text.contains("2024-01-01 to 2024-02-01"));
}

#[test]
fn cli_finalize_only_without_checkpoint_errors() {
    let temp = tempfile::tempdir().expect("failed creating tempdir");
    let checkpoint = temp.path().join("none.json");
    let err = run_audit(
        [
            "--finalize-only".to_string(),
            "--checkpoint-path".to_string(),
            checkpoint.display().to_string(),
            "--report-path".to_string(),
            temp.path().join("r.md").display().to_string(),
        ]
        .into_iter(),
    )
    .expect_err("missing checkpoint");
    assert!(err.to_string().contains("no checkpoint found"));
}
