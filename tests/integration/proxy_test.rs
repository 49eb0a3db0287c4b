use std::sync::Arc;

use anyhow::Result;
use parking_lot::Mutex;

use atundo::common::{BranchStatus, BranchType, SqlType};
use atundo::driver::{Conn, Driver};
use atundo::error::AtError;
use atundo::exec::{ExecContext, SqlHook};
use atundo::{AtConfig, ProxyConn, ProxyDriver, ResourceManagerInbound};

#[path = "../common/mod.rs"]
mod common;

use common::{args, int, text, users, Harness, MemDriver, DSN, RESOURCE_ID};

const XID: &str = "192.168.0.1:8091:7001";

fn seeded(harness: &Harness) {
    harness
        .db
        .seed("t_user", vec![vec![int(1), text("a"), int(10)], vec![int(2), text("b"), int(20)]]);
}

fn global_conn(harness: &Harness) -> Result<ProxyConn> {
    let mut conn = harness.driver.open_conn(DSN)?;
    conn.bind_xid(XID);
    Ok(conn)
}

fn undo_rows(harness: &Harness) -> Vec<(String, i64)> {
    harness
        .db
        .rows("undo_log")
        .iter()
        .map(|r| {
            (
                r["xid"].as_str().unwrap_or_default().to_string(),
                r["branch_id"].as_i64().unwrap_or_default(),
            )
        })
        .collect()
}

fn rollback_branch(harness: &Harness, branch_id: i64) -> Result<BranchStatus> {
    Ok(harness.rm.branch_rollback(BranchType::AT, XID, branch_id, RESOURCE_ID, &[])?)
}

#[test]
fn test_statements_outside_global_transaction_pass_through() -> Result<()> {
    let harness = Harness::new();
    let mut conn = harness.driver.open_conn(DSN)?;
    assert!(conn.xid().is_none());
    assert_eq!(conn.resource_id(), RESOURCE_ID);

    let result = conn.exec("INSERT INTO t_user (name, age) VALUES (?, ?)", &args(vec![text("x"), int(1)]))?;
    assert_eq!(result.rows_affected, 1);

    assert_eq!(harness.db.statements(), vec!["INSERT INTO t_user (name, age) VALUES (?, ?)"]);
    assert_eq!(harness.db.catalog_queries(), 0);
    assert!(harness.coordinator.registrations().is_empty());
    assert!(undo_rows(&harness).is_empty());
    Ok(())
}

#[test]
fn test_local_commit_registers_branch_and_writes_undo_log() -> Result<()> {
    let harness = Harness::new();
    seeded(&harness);
    let mut conn = global_conn(&harness)?;

    conn.begin()?;
    conn.exec("UPDATE t_user SET age = ? WHERE id = ?", &args(vec![int(11), int(1)]))?;
    assert!(conn.transaction_context().has_undo_logs());
    conn.commit()?;

    let registrations = harness.coordinator.registrations();
    assert_eq!(registrations.len(), 1);
    assert_eq!(registrations[0].resource_id, RESOURCE_ID);
    assert_eq!(registrations[0].xid, XID);
    assert_eq!(registrations[0].lock_keys, "t_user:1");

    assert_eq!(undo_rows(&harness), vec![(XID.to_string(), registrations[0].branch_id)]);
    assert_eq!(users(&harness.db), vec![(1, "a".to_string(), 11), (2, "b".to_string(), 20)]);
    assert!(!conn.transaction_context().has_undo_logs());
    assert_eq!(conn.xid(), Some(XID));

    let statements = harness.db.statements();
    assert_eq!(statements.first().map(String::as_str), Some("BEGIN"));
    assert_eq!(statements.last().map(String::as_str), Some("COMMIT"));
    Ok(())
}

#[test]
fn test_branch_rollback_restores_every_statement() -> Result<()> {
    let harness = Harness::new();
    seeded(&harness);
    let mut conn = global_conn(&harness)?;

    conn.begin()?;
    let inserted = conn.exec("INSERT INTO t_user (name, age) VALUES (?, ?)", &args(vec![text("c"), int(30)]))?;
    assert_eq!(inserted.last_insert_id, Some(3));
    conn.exec("UPDATE t_user SET name = ?, age = ? WHERE id = ?", &args(vec![text("a2"), int(11), int(1)]))?;
    conn.exec("DELETE FROM t_user WHERE id = ?", &args(vec![int(2)]))?;
    conn.commit()?;

    let registration = &harness.coordinator.registrations()[0];
    assert_eq!(registration.lock_keys, "t_user:3;t_user:1;t_user:2");
    assert_eq!(users(&harness.db), vec![(1, "a2".to_string(), 11), (3, "c".to_string(), 30)]);

    assert_eq!(rollback_branch(&harness, registration.branch_id)?, BranchStatus::PhaseTwoRollbacked);

    let mut restored = users(&harness.db);
    restored.sort();
    assert_eq!(restored, vec![(1, "a".to_string(), 10), (2, "b".to_string(), 20)]);
    assert!(undo_rows(&harness).is_empty());
    Ok(())
}

#[test]
fn test_branch_commit_deletes_undo_log_asynchronously() -> Result<()> {
    let harness = Harness::new();
    seeded(&harness);
    let mut conn = global_conn(&harness)?;

    conn.exec("DELETE FROM t_user WHERE id = ?", &args(vec![int(2)]))?;
    let branch_id = harness.coordinator.registrations()[0].branch_id;

    let status = harness.rm.branch_commit(BranchType::AT, XID, branch_id, RESOURCE_ID, &[])?;
    assert_eq!(status, BranchStatus::PhaseTwoCommitted);
    assert_eq!(harness.rm.pending_commits(), 1);
    assert_eq!(undo_rows(&harness).len(), 1);

    assert_eq!(harness.rm.process_pending_commits()?, 1);
    assert_eq!(harness.rm.pending_commits(), 0);
    assert!(undo_rows(&harness).is_empty());
    assert_eq!(users(&harness.db), vec![(1, "a".to_string(), 10)]);
    Ok(())
}

#[test]
fn test_statement_without_begin_runs_in_own_local_transaction() -> Result<()> {
    let harness = Harness::new();
    seeded(&harness);
    let mut conn = global_conn(&harness)?;

    conn.exec("UPDATE t_user SET age = age + 1 WHERE id IN (?, ?)", &args(vec![int(1), int(2)]))?;

    let statements = harness.db.statements();
    assert_eq!(statements.first().map(String::as_str), Some("BEGIN"));
    assert_eq!(statements.last().map(String::as_str), Some("COMMIT"));
    assert_eq!(harness.coordinator.registrations()[0].lock_keys, "t_user:1,2");
    assert_eq!(undo_rows(&harness).len(), 1);

    // A second statement opens its own branch
    conn.exec("UPDATE t_user SET age = ? WHERE id = ?", &args(vec![int(5), int(1)]))?;
    assert_eq!(harness.coordinator.registrations().len(), 2);
    assert_eq!(undo_rows(&harness).len(), 2);
    Ok(())
}

/// Records hook calls as `label.before` / `label.after(before_rows,after_rows)`
struct RecordingHook {
    label: &'static str,
    events: Arc<Mutex<Vec<String>>>,
}

impl SqlHook for RecordingHook {
    fn before(&self, ctx: &ExecContext<'_>) {
        assert!(ctx.before_image.is_none());
        self.events.lock().push(format!("{}.before", self.label));
    }

    fn after(&self, ctx: &ExecContext<'_>) {
        let size = |image: &Option<atundo::undo::RecordImage>| image.as_ref().map(|i| i.rows.len());
        self.events.lock().push(format!(
            "{}.after({:?},{:?})",
            self.label,
            size(&ctx.before_image),
            size(&ctx.after_image)
        ));
    }
}

fn hooked_harness(events: &Arc<Mutex<Vec<String>>>) -> Harness {
    let h1 = Arc::new(RecordingHook { label: "h1", events: Arc::clone(events) });
    let h2 = Arc::new(RecordingHook { label: "h2", events: Arc::clone(events) });
    Harness::build(AtConfig::default(), |registry| {
        registry.register_hook(SqlType::Update, h1);
        registry.register_hook(SqlType::Update, h2);
    })
}

#[test]
fn test_hooks_run_in_order_around_image_capture() -> Result<()> {
    let events = Arc::new(Mutex::new(Vec::new()));
    let harness = hooked_harness(&events);
    seeded(&harness);
    let mut conn = global_conn(&harness)?;

    conn.exec("UPDATE t_user SET age = ? WHERE age < ?", &args(vec![int(50), int(100)]))?;
    assert_eq!(
        *events.lock(),
        vec!["h1.before", "h2.before", "h1.after(Some(2),Some(2))", "h2.after(Some(2),Some(2))"]
    );

    // Other statement kinds have no hooks
    events.lock().clear();
    conn.exec("DELETE FROM t_user WHERE id = ?", &args(vec![int(1)]))?;
    assert!(events.lock().is_empty());
    Ok(())
}

#[test]
fn test_after_hooks_run_when_statement_fails() -> Result<()> {
    let events = Arc::new(Mutex::new(Vec::new()));
    let harness = hooked_harness(&events);
    seeded(&harness);
    harness.db.fail_on("UPDATE t_user SET");
    let mut conn = global_conn(&harness)?;

    let err = conn.exec("UPDATE t_user SET age = ? WHERE id = ?", &args(vec![int(50), int(1)]));
    assert!(err.is_err());
    assert_eq!(
        *events.lock(),
        vec!["h1.before", "h2.before", "h1.after(Some(1),None)", "h2.after(Some(1),None)"]
    );

    assert_eq!(harness.db.statements().last().map(String::as_str), Some("ROLLBACK"));
    assert!(harness.coordinator.registrations().is_empty());
    assert!(undo_rows(&harness).is_empty());
    Ok(())
}

#[test]
fn test_unchanged_rows_skip_undo_log_when_validating() -> Result<()> {
    let harness = Harness::new();
    seeded(&harness);
    let mut conn = global_conn(&harness)?;

    conn.exec("UPDATE t_user SET age = ? WHERE id = ?", &args(vec![int(10), int(1)]))?;

    assert!(harness.coordinator.registrations().is_empty());
    assert!(undo_rows(&harness).is_empty());
    assert_eq!(harness.db.statements().last().map(String::as_str), Some("COMMIT"));
    Ok(())
}

#[test]
fn test_unchanged_rows_logged_without_validation() -> Result<()> {
    let mut config = AtConfig::default();
    config.undo.data_validation = false;
    let harness = Harness::with_config(config);
    seeded(&harness);
    let mut conn = global_conn(&harness)?;

    conn.exec("UPDATE t_user SET age = ? WHERE id = ?", &args(vec![int(10), int(1)]))?;

    assert_eq!(harness.coordinator.registrations().len(), 1);
    assert_eq!(undo_rows(&harness).len(), 1);
    Ok(())
}

#[test]
fn test_failed_local_commit_reports_phase_one_failure() -> Result<()> {
    let harness = Harness::new();
    seeded(&harness);
    let mut conn = global_conn(&harness)?;

    conn.begin()?;
    conn.exec("UPDATE t_user SET age = ? WHERE id = ?", &args(vec![int(99), int(2)]))?;
    harness.db.fail_on("COMMIT");
    assert!(conn.commit().is_err());

    let branch_id = harness.coordinator.registrations()[0].branch_id;
    assert_eq!(
        harness.coordinator.reports(),
        vec![(XID.to_string(), branch_id, BranchStatus::PhaseOneFailed)]
    );

    harness.db.clear_failures();
    conn.rollback()?;
    assert_eq!(users(&harness.db), vec![(1, "a".to_string(), 10), (2, "b".to_string(), 20)]);
    assert!(undo_rows(&harness).is_empty());
    Ok(())
}

#[test]
fn test_failed_registration_keeps_local_transaction_open() -> Result<()> {
    let harness = Harness::new();
    seeded(&harness);
    harness.coordinator.fail_registration(true);
    let mut conn = global_conn(&harness)?;

    conn.begin()?;
    conn.exec("DELETE FROM t_user WHERE id = ?", &args(vec![int(1)]))?;
    assert!(conn.commit().is_err());
    assert!(!harness.db.statements().contains(&"COMMIT".to_string()));
    assert!(harness.coordinator.reports().is_empty());

    conn.rollback()?;
    assert_eq!(users(&harness.db).len(), 2);
    assert!(undo_rows(&harness).is_empty());
    Ok(())
}

#[test]
fn test_replace_is_rolled_back() -> Result<()> {
    let harness = Harness::new();
    seeded(&harness);
    let mut conn = global_conn(&harness)?;

    conn.exec(
        "REPLACE INTO t_user (id, name, age) VALUES (?, ?, ?), (?, ?, ?)",
        &args(vec![int(1), text("z"), int(99), int(7), text("g"), int(70)]),
    )?;
    let mut changed = users(&harness.db);
    changed.sort();
    assert_eq!(changed, vec![(1, "z".to_string(), 99), (2, "b".to_string(), 20), (7, "g".to_string(), 70)]);

    let branch_id = harness.coordinator.registrations()[0].branch_id;
    assert_eq!(rollback_branch(&harness, branch_id)?, BranchStatus::PhaseTwoRollbacked);

    let mut restored = users(&harness.db);
    restored.sort();
    assert_eq!(restored, vec![(1, "a".to_string(), 10), (2, "b".to_string(), 20)]);
    Ok(())
}

#[test]
fn test_insert_on_duplicate_update_is_rolled_back() -> Result<()> {
    let harness = Harness::new();
    seeded(&harness);
    let mut conn = global_conn(&harness)?;

    conn.exec(
        "INSERT INTO t_user (id, name, age) VALUES (?, ?, ?), (?, ?, ?) ON DUPLICATE KEY UPDATE age = VALUES(age)",
        &args(vec![int(2), text("b"), int(50), int(5), text("e"), int(5)]),
    )?;
    let mut changed = users(&harness.db);
    changed.sort();
    assert_eq!(changed, vec![(1, "a".to_string(), 10), (2, "b".to_string(), 50), (5, "e".to_string(), 5)]);

    let branch_id = harness.coordinator.registrations()[0].branch_id;
    assert_eq!(rollback_branch(&harness, branch_id)?, BranchStatus::PhaseTwoRollbacked);

    let mut restored = users(&harness.db);
    restored.sort();
    assert_eq!(restored, vec![(1, "a".to_string(), 10), (2, "b".to_string(), 20)]);
    Ok(())
}

#[test]
fn test_modified_rows_block_rollback() -> Result<()> {
    let harness = Harness::new();
    seeded(&harness);
    let mut conn = global_conn(&harness)?;

    conn.exec("UPDATE t_user SET age = ? WHERE id = ?", &args(vec![int(11), int(1)]))?;
    let branch_id = harness.coordinator.registrations()[0].branch_id;
    harness.db.tamper("t_user", 1, "age", int(77));

    assert_eq!(rollback_branch(&harness, branch_id)?, BranchStatus::PhaseTwoRollbackFailedUnretryable);
    assert_eq!(users(&harness.db)[0], (1, "a".to_string(), 77));
    assert_eq!(undo_rows(&harness).len(), 1);
    Ok(())
}

#[test]
fn test_primary_key_update_is_rejected() -> Result<()> {
    let harness = Harness::new();
    seeded(&harness);
    let mut conn = global_conn(&harness)?;

    let err = conn
        .exec("UPDATE t_user SET id = ? WHERE id = ?", &args(vec![int(9), int(1)]))
        .unwrap_err();
    assert!(err.to_string().contains("primary key"), "unexpected error {}", err);

    assert_eq!(users(&harness.db), vec![(1, "a".to_string(), 10), (2, "b".to_string(), 20)]);
    assert!(harness.coordinator.registrations().is_empty());
    assert!(undo_rows(&harness).is_empty());
    assert_eq!(harness.db.statements().last().map(String::as_str), Some("ROLLBACK"));
    Ok(())
}

#[test]
fn test_unparseable_statement_passes_through() -> Result<()> {
    let harness = Harness::new();
    seeded(&harness);
    let mut conn = global_conn(&harness)?;

    assert!(conn.exec("TRUNCATE t_user", &[]).is_err());
    assert_eq!(harness.db.statements(), vec!["TRUNCATE t_user"]);
    assert_eq!(harness.db.catalog_queries(), 0);
    assert!(harness.coordinator.registrations().is_empty());
    Ok(())
}

#[test]
fn test_queries_are_not_intercepted() -> Result<()> {
    let harness = Harness::new();
    seeded(&harness);
    let mut conn = global_conn(&harness)?;

    let rows = conn.query("SELECT id, name FROM t_user WHERE id = ? FOR UPDATE", &args(vec![int(2)]))?;
    assert_eq!(rows.row_count(), 1);
    assert_eq!(harness.db.statements().len(), 1);
    assert!(harness.coordinator.registrations().is_empty());
    Ok(())
}

#[test]
fn test_unbound_connection_stops_capturing() -> Result<()> {
    let harness = Harness::new();
    seeded(&harness);
    let mut conn = global_conn(&harness)?;

    assert_eq!(conn.unbind_xid().as_deref(), Some(XID));
    conn.exec("DELETE FROM t_user WHERE id = ?", &args(vec![int(1)]))?;
    assert!(harness.coordinator.registrations().is_empty());
    assert!(undo_rows(&harness).is_empty());
    Ok(())
}

#[test]
fn test_driver_open_registers_resource() -> Result<()> {
    let harness = Harness::new();
    let conn = harness.driver.open(DSN)?;
    drop(conn);

    assert_eq!(harness.driver.name(), "mysql");
    let resources = harness.rm.managed_resources();
    assert_eq!(resources.len(), 1);
    assert!(harness.rm.resource(RESOURCE_ID).is_some());
    Ok(())
}

#[test]
fn test_unknown_dialect_is_rejected() {
    let harness = Harness::new();
    let driver = ProxyDriver::new(
        Arc::new(MemDriver::new("sqlite3", Arc::clone(&harness.db))),
        Arc::clone(&harness.registry),
        Arc::clone(&harness.rm),
    );

    let err = driver.open_conn(DSN).err();
    assert!(matches!(err, Some(AtError::Resource(_))));
    assert!(harness.rm.managed_resources().is_empty());
}
