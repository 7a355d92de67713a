use regsync::{Reconciler, SyncLock, SyncOutcome, SyncReport};
use regsync_core::{ChatId, SyncConfig, PENDING_REVIEW_STATUS};
use regsync_storage::{RegistryStore, StoredUser};
use std::fs;
use std::path::Path;
use std::process::Command;
use tempfile::TempDir;

fn write(path: &Path, content: &str) {
    fs::write(path, content).expect("write fixture");
}

fn completed(outcome: SyncOutcome) -> SyncReport {
    match outcome {
        SyncOutcome::Completed(report) => report,
        other => panic!("expected a completed pass, got {other:?}"),
    }
}

fn stored_user(config: &SyncConfig, chat_id: i64) -> StoredUser {
    RegistryStore::open(&config.db_path)
        .expect("open store")
        .user(ChatId(chat_id))
        .expect("query")
        .expect("row present")
}

fn without_updated_at(mut users: Vec<StoredUser>) -> Vec<StoredUser> {
    for user in &mut users {
        user.updated_at = None;
    }
    users
}

#[test]
fn users_and_states_land_in_one_row_per_chat() {
    let dir = TempDir::new().expect("tempdir");
    let config = SyncConfig::in_dir(dir.path());
    write(
        &config.users_path,
        r#"{"1": {"name": "A", "status": "approved"}}"#,
    );
    write(&config.states_path, r#"{"1": "done", "2": "start"}"#);

    let report = completed(Reconciler::new(config.clone()).run().expect("run"));
    assert_eq!(report.applied(), 3);
    assert_eq!(report.failed(), 0);

    let one = stored_user(&config, 1);
    assert_eq!(one.name.as_deref(), Some("A"));
    assert_eq!(one.status.as_deref(), Some("approved"));
    assert_eq!(one.state.as_deref(), Some("done"));

    let two = stored_user(&config, 2);
    assert_eq!(two.state.as_deref(), Some("start"));
    assert_eq!(two.name, None);
    assert_eq!(two.company, None);
    assert_eq!(two.email, None);
    assert_eq!(two.status, None);
    assert_eq!(two.review_decision, None);
    assert!(two.created_at.is_some());
    assert_eq!(two.created_at, two.updated_at);

    assert!(!config.lock_path.exists());
}

#[test]
fn empty_or_absent_snapshots_never_open_the_store() {
    let dir = TempDir::new().expect("tempdir");
    let config = SyncConfig::in_dir(dir.path());

    let outcome = Reconciler::new(config.clone()).run().expect("run");
    assert_eq!(outcome, SyncOutcome::NothingToSync);
    assert!(!config.db_path.exists());

    write(&config.users_path, "[]");
    write(&config.states_path, "{}");
    let outcome = Reconciler::new(config.clone()).run().expect("run");
    assert_eq!(outcome, SyncOutcome::NothingToSync);
    assert!(!config.db_path.exists());
    assert!(!config.lock_path.exists());
}

#[test]
fn malformed_snapshot_counts_as_empty() {
    let dir = TempDir::new().expect("tempdir");
    let config = SyncConfig::in_dir(dir.path());
    write(&config.users_path, "{\"1\": {\"name\": ");
    write(&config.states_path, r#"{"3": "AWAIT_NAME"}"#);

    let report = completed(Reconciler::new(config.clone()).run().expect("run"));
    assert_eq!(report.states_inserted, 1);
    assert_eq!(report.users_inserted + report.users_updated, 0);
    assert_eq!(stored_user(&config, 3).state.as_deref(), Some("AWAIT_NAME"));
}

#[test]
fn missing_status_becomes_pending_review() {
    let dir = TempDir::new().expect("tempdir");
    let config = SyncConfig::in_dir(dir.path());
    write(
        &config.users_path,
        r#"{"77": {"chat_id": 77, "name": "Sara", "email": "sara@example.com"}}"#,
    );

    completed(Reconciler::new(config.clone()).run().expect("run"));
    let row = stored_user(&config, 77);
    assert_eq!(row.status.as_deref(), Some(PENDING_REVIEW_STATUS));
    assert_eq!(row.state, None);
}

#[test]
fn second_identical_pass_only_moves_updated_at() {
    let dir = TempDir::new().expect("tempdir");
    let config = SyncConfig::in_dir(dir.path());
    write(
        &config.users_path,
        r#"{
            "10": {"name": "Reza", "company": "Acme", "status": "تایید شده",
                   "reviewed_by_user_id": 5550001, "review_decision": "approved"},
            "11": {"name": "Mina", "verification_type": "linkedin",
                   "verification_value": "https://linkedin.com/in/mina"}
        }"#,
    );
    write(
        &config.states_path,
        r#"{"10": "COMPLETED", "11": "AWAIT_VERIFICATION", "12": "AWAIT_NAME"}"#,
    );

    completed(Reconciler::new(config.clone()).run().expect("first run"));
    let first = RegistryStore::open(&config.db_path)
        .expect("open")
        .users()
        .expect("list");

    let report = completed(Reconciler::new(config.clone()).run().expect("second run"));
    assert_eq!(report.users_updated, 2);
    assert_eq!(report.states_updated, 3);
    assert_eq!(report.users_inserted + report.states_inserted, 0);

    let second = RegistryStore::open(&config.db_path)
        .expect("open")
        .users()
        .expect("list");
    assert_eq!(second.len(), 3);
    assert_eq!(without_updated_at(first), without_updated_at(second));
}

#[test]
fn state_only_pass_keeps_profile_fields() {
    let dir = TempDir::new().expect("tempdir");
    let config = SyncConfig::in_dir(dir.path());
    write(
        &config.users_path,
        r#"{"20": {"name": "Ali", "company": "Pars", "motivation": "peering"}}"#,
    );
    completed(Reconciler::new(config.clone()).run().expect("first run"));

    fs::remove_file(&config.users_path).expect("remove users");
    write(&config.states_path, r#"{"20": "PROFILE_EDIT"}"#);
    let report = completed(Reconciler::new(config.clone()).run().expect("second run"));
    assert_eq!(report.states_updated, 1);

    let row = stored_user(&config, 20);
    assert_eq!(row.state.as_deref(), Some("PROFILE_EDIT"));
    assert_eq!(row.name.as_deref(), Some("Ali"));
    assert_eq!(row.company.as_deref(), Some("Pars"));
    assert_eq!(row.motivation.as_deref(), Some("peering"));
}

#[test]
fn user_update_clears_fields_missing_from_new_record() {
    let dir = TempDir::new().expect("tempdir");
    let config = SyncConfig::in_dir(dir.path());
    write(
        &config.users_path,
        r#"{"30": {"name": "Neda", "company": "Shatel", "rejection_reason": "incomplete"}}"#,
    );
    completed(Reconciler::new(config.clone()).run().expect("first run"));
    let created_at = stored_user(&config, 30).created_at;

    write(&config.users_path, r#"{"30": {"name": "Neda R"}}"#);
    completed(Reconciler::new(config.clone()).run().expect("second run"));

    let row = stored_user(&config, 30);
    assert_eq!(row.name.as_deref(), Some("Neda R"));
    assert_eq!(row.company, None);
    assert_eq!(row.rejection_reason, None);
    assert_eq!(row.created_at, created_at);
}

#[test]
fn held_lock_means_abstain_without_touching_store() {
    let dir = TempDir::new().expect("tempdir");
    let config = SyncConfig::in_dir(dir.path());
    write(&config.users_path, r#"{"1": {"name": "A"}}"#);

    let holder = SyncLock::try_acquire(&config.lock_path, config.lock_stale_after)
        .expect("acquire")
        .expect("lock free");

    let outcome = Reconciler::new(config.clone()).run().expect("run");
    assert_eq!(outcome, SyncOutcome::AlreadyRunning);
    assert!(!config.db_path.exists());
    assert!(config.lock_path.exists());

    holder.release().expect("release");
}

#[test]
fn bad_records_do_not_fail_the_pass() {
    let dir = TempDir::new().expect("tempdir");
    let config = SyncConfig::in_dir(dir.path());
    write(
        &config.users_path,
        r#"{"oops": {"name": "X"}, "40": {"name": {"first": "Y"}}, "41": {"name": "Z"}}"#,
    );
    write(&config.states_path, r#"{"42": ["AWAIT_NAME"], "43": "AWAIT_NAME"}"#);

    let report = completed(Reconciler::new(config.clone()).run().expect("run"));
    assert_eq!(report.users_failed, 2);
    assert_eq!(report.states_failed, 1);
    assert_eq!(report.applied(), 2);

    let store = RegistryStore::open(&config.db_path).expect("open");
    assert_eq!(store.user_count().expect("count"), 2);
    assert!(store.user(ChatId(40)).expect("query").is_none());
}

#[test]
fn corrupt_store_fails_the_pass_and_releases_lock() {
    let dir = TempDir::new().expect("tempdir");
    let config = SyncConfig::in_dir(dir.path());
    write(&config.states_path, r#"{"1": "start"}"#);
    write(&config.db_path, "this is not a sqlite database, just some text padding it out");

    let result = Reconciler::new(config.clone()).run();
    assert!(matches!(result, Err(regsync::SyncError::SchemaInit(_))));
    assert!(!config.lock_path.exists());
}

fn regsync_command(config: &SyncConfig) -> Command {
    let mut command = Command::new(env!("CARGO_BIN_EXE_regsync"));
    command
        .arg("--users")
        .arg(&config.users_path)
        .arg("--states")
        .arg(&config.states_path)
        .arg("--db")
        .arg(&config.db_path)
        .arg("--lock")
        .arg(&config.lock_path)
        .env_remove("REGSYNC_CONFIG")
        .env("RUST_LOG", "off");
    command
}

#[test]
fn binary_exit_codes_follow_outcome() {
    let dir = TempDir::new().expect("tempdir");
    let config = SyncConfig::in_dir(dir.path());
    write(&config.states_path, r#"{"1": "start"}"#);

    let status = regsync_command(&config).status().expect("spawn");
    assert_eq!(status.code(), Some(0));
    assert_eq!(stored_user(&config, 1).state.as_deref(), Some("start"));

    let holder = SyncLock::try_acquire(&config.lock_path, None)
        .expect("acquire")
        .expect("lock free");
    let status = regsync_command(&config).status().expect("spawn");
    assert_eq!(status.code(), Some(0));
    holder.release().expect("release");

    let broken = TempDir::new().expect("tempdir");
    let broken_config = SyncConfig::in_dir(broken.path());
    write(&broken_config.states_path, r#"{"1": "start"}"#);
    write(&broken_config.db_path, "this is not a sqlite database, just some text padding it out");
    let status = regsync_command(&broken_config).status().expect("spawn");
    assert_eq!(status.code(), Some(1));
    assert!(!broken_config.lock_path.exists());
}
