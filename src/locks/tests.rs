//! Tests for the locks subsystem.

use super::*;
use crate::context::WorkspaceContext;
use crate::error::SpecrunError;
use chrono::{Duration, Utc};
use tempfile::TempDir;

fn workspace() -> (TempDir, WorkspaceContext) {
    let dir = TempDir::new().unwrap();
    let ctx = WorkspaceContext::at(dir.path().to_path_buf());
    (dir, ctx)
}

fn backdate(path: &std::path::Path, minutes: i64) {
    let mut meta = LockMetadata::from_file(path).unwrap();
    meta.created_at = Utc::now() - Duration::minutes(minutes);
    std::fs::write(path, meta.to_json().unwrap()).unwrap();
}

#[test]
fn metadata_describes_this_process() {
    let meta = LockMetadata::new("run");

    assert!(meta.owner.contains('@'));
    assert_eq!(meta.pid, Some(std::process::id()));
    assert_eq!(meta.action, "run");
    assert!(meta.age().num_minutes() < 1);
    assert_eq!(meta.age_string(), "0m");
}

#[test]
fn metadata_json_round_trip() {
    let meta = LockMetadata::new("agents disable");
    let parsed: LockMetadata = serde_json::from_str(&meta.to_json().unwrap()).unwrap();
    assert_eq!(parsed, meta);
}

#[test]
fn age_string_formats() {
    let mut meta = LockMetadata::new("run");
    meta.created_at = Utc::now() - Duration::minutes(125);
    assert_eq!(meta.age_string(), "2h 5m");

    meta.created_at = Utc::now() - Duration::hours(28);
    assert_eq!(meta.age_string(), "1d 4h");
}

#[test]
fn staleness_threshold() {
    let mut meta = LockMetadata::new("run");
    assert!(!meta.is_stale(120));
    meta.created_at = Utc::now() - Duration::minutes(121);
    assert!(meta.is_stale(120));
}

#[test]
fn second_acquire_is_contention() {
    let (_dir, ctx) = workspace();
    let guard = acquire_feature_lock(&ctx, "001-auth", "run").unwrap();
    assert!(guard.path().exists());

    let err = acquire_feature_lock(&ctx, "001-auth", "state reenter").unwrap_err();
    assert!(matches!(err, SpecrunError::LockContention(_)));
    assert_eq!(err.exit_code(), crate::exit_codes::LOCK_FAILURE);
    let message = err.to_string();
    assert!(message.contains("held by another process"));
    assert!(message.contains("Action: run"));
}

#[test]
fn distinct_features_do_not_contend() {
    let (_dir, ctx) = workspace();
    let _a = acquire_feature_lock(&ctx, "001-auth", "run").unwrap();
    let _b = acquire_feature_lock(&ctx, "002-billing", "run").unwrap();
}

#[test]
fn drop_releases_the_lock() {
    let (_dir, ctx) = workspace();
    let path = {
        let guard = acquire_feature_lock(&ctx, "001-auth", "run").unwrap();
        guard.path().to_path_buf()
    };
    assert!(!path.exists());
    acquire_feature_lock(&ctx, "001-auth", "run").unwrap();
}

#[test]
fn explicit_release() {
    let (_dir, ctx) = workspace();
    let guard = acquire_feature_lock(&ctx, "001-auth", "run").unwrap();
    let path = guard.path().to_path_buf();
    guard.release().unwrap();
    assert!(!path.exists());
}

#[test]
fn list_reports_locks_sorted_and_flags_stale() {
    let (_dir, ctx) = workspace();
    let b = acquire_feature_lock(&ctx, "002-billing", "run").unwrap();
    let a = acquire_feature_lock(&ctx, "001-auth", "state complete").unwrap();
    backdate(b.path(), 500);
    std::fs::write(ctx.locks_dir.join("notes.txt"), "ignored").unwrap();
    std::fs::write(ctx.locks_dir.join("garbage.lock"), "not json").unwrap();

    let locks = list_locks(&ctx, 120).unwrap();

    let names: Vec<&str> = locks.iter().map(|l| l.name.as_str()).collect();
    assert_eq!(names, vec!["001-auth", "002-billing"]);
    assert!(!locks[0].is_stale);
    assert!(locks[1].is_stale);
    assert!(locks[1].to_string().contains("STALE"));
    assert_eq!(locks[0].metadata.action, "state complete");
    drop(a);
    drop(b);
}

#[test]
fn list_without_locks_dir_is_empty() {
    let (_dir, ctx) = workspace();
    assert!(list_locks(&ctx, 120).unwrap().is_empty());
}

#[test]
fn clear_removes_and_reports() {
    let (_dir, ctx) = workspace();
    let guard = acquire_feature_lock(&ctx, "001-auth", "run").unwrap();
    let path = guard.path().to_path_buf();
    std::mem::forget(guard);

    let info = clear_lock(&ctx, "001-auth", 120).unwrap();
    assert_eq!(info.name, "001-auth");
    assert_eq!(info.metadata.action, "run");
    assert!(!path.exists());
}

#[test]
fn clear_missing_lock_is_user_error() {
    let (_dir, ctx) = workspace();
    let err = clear_lock(&ctx, "001-auth", 120).unwrap_err();
    assert!(matches!(err, SpecrunError::UserError(_)));
}
