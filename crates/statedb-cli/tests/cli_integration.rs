use std::ffi::OsStr;
use std::path::{Path, PathBuf};
use std::process::{Command, Output};

use serde_json::Value;
use statedb_core::buckets::{CLIQUE, HEADERS, HEADER_CANONICAL, HEADER_PREFIX_OLD};
use statedb_core::{save_stage_progress, save_stage_unwind, ReadTx, RwTx, Stage, Store};
use statedb_store_sqlite::SqliteStore;
use tempfile::TempDir;

fn temp_db() -> (TempDir, PathBuf) {
    let dir = tempfile::tempdir().unwrap_or_else(|err| panic!("failed to create temp dir: {err}"));
    let db = dir.path().join("statedb.sqlite3");
    (dir, db)
}

fn run_sdb<I, S>(args: I) -> Output
where
    I: IntoIterator<Item = S>,
    S: AsRef<OsStr>,
{
    Command::new(env!("CARGO_BIN_EXE_sdb"))
        .args(args)
        .env("RUST_LOG", "warn")
        .output()
        .unwrap_or_else(|err| panic!("failed to execute sdb binary: {err}"))
}

fn run_json<I, S>(args: I) -> Value
where
    I: IntoIterator<Item = S>,
    S: AsRef<OsStr>,
{
    let output = run_sdb(args);
    if !output.status.success() {
        let stdout = String::from_utf8_lossy(&output.stdout);
        let stderr = String::from_utf8_lossy(&output.stderr);
        panic!(
            "sdb command failed (status={}):\nstdout:\n{}\nstderr:\n{}",
            output.status, stdout, stderr
        );
    }

    let stdout = String::from_utf8_lossy(&output.stdout).trim().to_string();
    serde_json::from_str(&stdout)
        .unwrap_or_else(|err| panic!("stdout is not valid JSON: {err}\nstdout:\n{stdout}"))
}

fn path_str(path: &Path) -> &str {
    path.to_str().unwrap_or_else(|| panic!("path should be valid UTF-8: {}", path.display()))
}

fn as_bool(value: &Value, key: &str) -> bool {
    value
        .get(key)
        .and_then(Value::as_bool)
        .unwrap_or_else(|| panic!("missing boolean field `{key}` in payload: {value}"))
}

fn as_str<'a>(value: &'a Value, key: &str) -> &'a str {
    value
        .get(key)
        .and_then(Value::as_str)
        .unwrap_or_else(|| panic!("missing string field `{key}` in payload: {value}"))
}

fn names(value: &Value, key: &str) -> Vec<String> {
    value
        .get(key)
        .and_then(Value::as_array)
        .unwrap_or_else(|| panic!("missing array field `{key}` in payload: {value}"))
        .iter()
        .map(|item| item.as_str().unwrap_or_else(|| panic!("non-string name in {value}")).to_string())
        .collect()
}

fn shipped() -> Vec<String> {
    ["header_prefix_to_separate_buckets", "remove_clique_bucket", "db_schema_version"]
        .iter()
        .map(ToString::to_string)
        .collect()
}

fn open_store(db: &Path) -> SqliteStore {
    SqliteStore::open(db).unwrap_or_else(|err| panic!("failed to open {}: {err}", db.display()))
}

#[test]
fn fresh_database_has_every_shipped_migration_pending() {
    let (_dir, db) = temp_db();

    let pending = run_json(["--db", path_str(&db), "migrations", "pending"]);
    assert_eq!(as_str(&pending, "contract_version"), "sdb.v1");
    assert!(as_bool(&pending, "has_pending"));
    assert_eq!(names(&pending, "pending"), shipped());

    let list = run_json(["--db", path_str(&db), "migrations", "list"]);
    let Some(entries) = list.get("migrations").and_then(Value::as_array) else {
        panic!("missing migrations array: {list}");
    };
    assert_eq!(entries.len(), 3);
    assert!(entries.iter().all(|entry| !as_bool(entry, "applied")));
}

#[test]
fn dry_run_reports_without_applying() {
    let (_dir, db) = temp_db();

    let dry = run_json(["--db", path_str(&db), "migrations", "apply", "--dry-run"]);
    assert!(as_bool(&dry, "dry_run"));
    assert_eq!(names(&dry, "would_apply"), shipped());
    assert_eq!(dry.get("schema_version"), Some(&Value::Null));

    let pending = run_json(["--db", path_str(&db), "migrations", "pending"]);
    assert_eq!(names(&pending, "pending"), shipped());
}

#[test]
fn apply_is_idempotent_and_stamps_schema_version() {
    let (_dir, db) = temp_db();

    let first = run_json(["--db", path_str(&db), "migrations", "apply"]);
    assert!(!as_bool(&first, "dry_run"));
    assert_eq!(names(&first, "applied"), shipped());
    assert!(names(&first, "pending").is_empty());
    assert_eq!(as_str(&first, "schema_version"), "2.0.0");
    assert_eq!(as_str(&first, "backend"), "mdbx");

    let second = run_json(["--db", path_str(&db), "migrations", "apply"]);
    assert!(names(&second, "applied").is_empty());
    assert_eq!(as_str(&second, "before_schema_version"), "2.0.0");

    let pending = run_json(["--db", path_str(&db), "migrations", "pending"]);
    assert!(!as_bool(&pending, "has_pending"));
}

#[test]
fn schema_version_follows_backend_flag() {
    let (_dir, db) = temp_db();

    let before = run_json(["--db", path_str(&db), "db", "schema-version"]);
    assert_eq!(before.get("schema_version"), Some(&Value::Null));
    assert!(!as_bool(&before, "up_to_date"));

    run_json(["--db", path_str(&db), "--backend", "lmdb", "migrations", "apply"]);

    let lmdb = run_json(["--db", path_str(&db), "--backend", "lmdb", "db", "schema-version"]);
    assert_eq!(as_str(&lmdb, "schema_version"), "1.0.0");
    assert!(as_bool(&lmdb, "up_to_date"));

    let mdbx = run_json(["--db", path_str(&db), "db", "schema-version"]);
    assert_eq!(as_str(&mdbx, "expected_version"), "2.0.0");
    assert!(!as_bool(&mdbx, "up_to_date"));
}

#[test]
fn payload_decodes_stage_snapshot() {
    let (_dir, db) = temp_db();
    {
        let store = open_store(&db);
        let mut tx = store.begin_rw().unwrap_or_else(|err| panic!("begin_rw failed: {err}"));
        save_stage_progress(&mut tx, Stage::Execution, 42)
            .unwrap_or_else(|err| panic!("failed to save stage progress: {err}"));
        tx.commit().unwrap_or_else(|err| panic!("commit failed: {err}"));
    }

    run_json(["--db", path_str(&db), "migrations", "apply"]);

    let payload = run_json(["--db", path_str(&db), "migrations", "payload", "db_schema_version"]);
    assert_eq!(as_str(&payload, "name"), "db_schema_version");
    let Some(stages) = payload.get("stages") else {
        panic!("missing stages in payload: {payload}");
    };
    assert_eq!(as_str(stages, "Execution"), "000000000000002a");
    assert_eq!(payload.pointer("/blocks/Execution").and_then(Value::as_u64), Some(42));
}

#[test]
fn stages_reports_progress_and_unwind_points() {
    let (_dir, db) = temp_db();
    {
        let store = open_store(&db);
        let mut tx = store.begin_rw().unwrap_or_else(|err| panic!("begin_rw failed: {err}"));
        save_stage_progress(&mut tx, Stage::Senders, 900)
            .unwrap_or_else(|err| panic!("failed to save stage progress: {err}"));
        save_stage_unwind(&mut tx, Stage::Senders, 850)
            .unwrap_or_else(|err| panic!("failed to save stage unwind: {err}"));
        tx.commit().unwrap_or_else(|err| panic!("commit failed: {err}"));
    }

    let result = run_json(["--db", path_str(&db), "db", "stages"]);
    let Some(stages) = result.get("stages").and_then(Value::as_array) else {
        panic!("missing stages array: {result}");
    };
    assert_eq!(stages.len(), Stage::ALL.len());
    assert_eq!(as_str(&stages[0], "stage"), "Headers");
    let Some(senders) = stages.iter().find(|row| as_str(row, "stage") == "Senders") else {
        panic!("Senders missing from {result}");
    };
    assert_eq!(senders.get("progress").and_then(Value::as_u64), Some(900));
    assert_eq!(senders.get("unwind").and_then(Value::as_u64), Some(850));
    let Some(headers) = stages.iter().find(|row| as_str(row, "stage") == "Headers") else {
        panic!("Headers missing from {result}");
    };
    assert_eq!(headers.get("progress").and_then(Value::as_u64), Some(0));
}

#[test]
fn buckets_flags_deprecated_ones_until_migrated_away() {
    let (_dir, db) = temp_db();
    {
        let store = open_store(&db);
        let mut tx = store.begin_rw().unwrap_or_else(|err| panic!("begin_rw failed: {err}"));
        tx.create_bucket(CLIQUE)
            .unwrap_or_else(|err| panic!("failed to create bucket: {err}"));
        tx.commit().unwrap_or_else(|err| panic!("commit failed: {err}"));
    }

    let before = run_json(["--db", path_str(&db), "db", "buckets"]);
    assert!(as_bool(&before, "has_deprecated"));
    let Some(buckets) = before.get("buckets").and_then(Value::as_array) else {
        panic!("missing buckets array: {before}");
    };
    let Some(clique) = buckets.iter().find(|row| as_str(row, "name") == CLIQUE) else {
        panic!("{CLIQUE} missing from {before}");
    };
    assert!(as_bool(clique, "deprecated"));

    run_json(["--db", path_str(&db), "migrations", "apply"]);

    let after = run_json(["--db", path_str(&db), "db", "buckets"]);
    assert!(!as_bool(&after, "has_deprecated"));
}

#[test]
fn payload_of_unapplied_migration_fails() {
    let (_dir, db) = temp_db();

    let output = run_sdb(["--db", path_str(&db), "migrations", "payload", "db_schema_version"]);
    assert!(!output.status.success());
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("has not been applied"), "unexpected stderr: {stderr}");
}

#[test]
fn apply_splits_legacy_header_bucket() {
    let (_dir, db) = temp_db();
    let mut header_key = 7_u64.to_be_bytes().to_vec();
    header_key.extend_from_slice(&[0xAB; 32]);
    let mut canonical_key = 7_u64.to_be_bytes().to_vec();
    canonical_key.push(b'n');
    {
        let store = open_store(&db);
        let mut tx = store.begin_rw().unwrap_or_else(|err| panic!("begin_rw failed: {err}"));
        tx.create_bucket(HEADER_PREFIX_OLD)
            .unwrap_or_else(|err| panic!("failed to create legacy bucket: {err}"));
        tx.put(HEADER_PREFIX_OLD, &header_key, b"header")
            .unwrap_or_else(|err| panic!("failed to seed header: {err}"));
        tx.put(HEADER_PREFIX_OLD, &canonical_key, &[0xAB; 32])
            .unwrap_or_else(|err| panic!("failed to seed canonical hash: {err}"));
        tx.commit().unwrap_or_else(|err| panic!("commit failed: {err}"));
    }

    let applied = run_json(["--db", path_str(&db), "migrations", "apply"]);
    assert_eq!(names(&applied, "applied"), shipped());

    let store = open_store(&db);
    let tx = store.begin_ro().unwrap_or_else(|err| panic!("begin_ro failed: {err}"));
    let exists = tx
        .bucket_exists(HEADER_PREFIX_OLD)
        .unwrap_or_else(|err| panic!("bucket lookup failed: {err}"));
    assert!(!exists);
    let header = tx.get(HEADERS, &header_key).unwrap_or_else(|err| panic!("read failed: {err}"));
    assert_eq!(header, Some(b"header".to_vec()));
    let canonical = tx
        .get(HEADER_CANONICAL, &7_u64.to_be_bytes())
        .unwrap_or_else(|err| panic!("read failed: {err}"));
    assert_eq!(canonical, Some(vec![0xAB; 32]));
}
