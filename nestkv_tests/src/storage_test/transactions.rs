use super::*;
use nestkv_core::txn::CallbackKind;
use std::sync::atomic::AtomicBool;
use std::sync::{Arc, Mutex};

fn memory() -> Database {
    let db = Database::open_memory(StoreConfig::default()).unwrap();
    users_and_orders(&db);
    db
}

#[test]
fn test_begin_twice_and_commit_without_begin_fail() {
    let db = memory();
    let mut s = db.session();
    assert!(matches!(s.commit().unwrap_err(), Error::NoActiveTransaction));
    assert!(matches!(s.rollback().unwrap_err(), Error::NoActiveTransaction));
    s.begin().unwrap();
    assert!(matches!(s.begin().unwrap_err(), Error::TransactionAlreadyActive));
    assert!(s.in_transaction());
    s.commit().unwrap();
    assert!(!s.in_transaction());
}

#[test]
fn test_rollback_discards_every_statement() {
    let db = memory();
    let mut s = db.session();
    s.begin().unwrap();
    s.insert("users", vec![int(1), text("ram")]).unwrap();
    s.insert("orders", vec![int(1), int(1), Value::BigInt(3)]).unwrap();
    s.rollback().unwrap();
    assert!(s.scan("users").unwrap().is_empty());
    assert!(s.scan("orders").unwrap().is_empty());
}

#[test]
fn test_dropping_a_session_rolls_back_its_transaction() {
    let db = memory();
    {
        let mut s = db.session();
        s.begin().unwrap();
        s.insert("users", vec![int(1), text("ram")]).unwrap();
    }
    assert!(db.session().scan("users").unwrap().is_empty());
}

#[test]
fn test_callbacks_run_by_kind_newest_first() {
    let db = memory();
    let log = Arc::new(Mutex::new(Vec::new()));
    let mut s = db.session();
    s.begin().unwrap();
    for (kind, name) in [
        (CallbackKind::PreCommit, "pre"),
        (CallbackKind::Commit, "commit-1"),
        (CallbackKind::Commit, "commit-2"),
        (CallbackKind::Rollback, "rollback"),
        (CallbackKind::End, "end"),
    ] {
        let log = log.clone();
        s.add_callback(
            kind,
            Box::new(move || -> nestkv_core::Result<()> {
                log.lock().unwrap().push(name);
                Ok(())
            }),
        )
        .unwrap();
    }
    s.commit().unwrap();
    assert_eq!(*log.lock().unwrap(), vec!["pre", "commit-2", "commit-1", "end"]);
}

#[test]
fn test_rollback_callbacks_run_when_commit_fails() {
    let db = memory();
    let rolled_back = Arc::new(AtomicBool::new(false));
    let mut s = db.session();
    s.begin().unwrap();
    s.set_rollback_pending().unwrap();
    let flag = rolled_back.clone();
    s.add_callback(
        CallbackKind::Rollback,
        Box::new(move || -> nestkv_core::Result<()> {
            flag.store(true, Ordering::SeqCst);
            Ok(())
        }),
    )
    .unwrap();
    assert!(matches!(s.commit().unwrap_err(), Error::TransactionAborted));
    assert!(rolled_back.load(Ordering::SeqCst));
}

#[test]
fn test_failing_pre_commit_callback_aborts_the_commit() {
    let db = memory();
    let mut s = db.session();
    s.begin().unwrap();
    s.insert("users", vec![int(1), text("ram")]).unwrap();
    s.add_callback(
        CallbackKind::PreCommit,
        Box::new(|| -> nestkv_core::Result<()> { Err(Error::Value("refused".to_string())) }),
    )
    .unwrap();
    assert!(matches!(s.commit().unwrap_err(), Error::Value(_)));
    assert!(s.scan("users").unwrap().is_empty());
}

#[test]
fn test_periodic_commit_keeps_the_transaction_open() {
    let config = StoreConfig {
        periodic_commit_after_bytes: 16,
        ..StoreConfig::default()
    };
    let db = Database::open_memory(config).unwrap();
    users_and_orders(&db);
    let mut s = db.session();
    s.begin().unwrap();
    assert!(!s.should_periodically_commit());
    s.insert("users", vec![int(1), text("a long enough name")]).unwrap();
    assert!(s.should_periodically_commit());
    s.periodically_commit().unwrap();
    assert!(s.in_transaction());
    assert!(!s.should_periodically_commit());

    let mut other = db.session();
    assert_eq!(other.scan("users").unwrap().len(), 1);

    s.insert("users", vec![int(2), text("b")]).unwrap();
    s.rollback().unwrap();
    assert_eq!(other.scan("users").unwrap().len(), 1);
}

#[test]
fn test_statement_pass_runs_once_per_outermost_statement() {
    let db = memory();
    let mut s = db.session();
    let inserted = s
        .statement(|s| {
            s.insert("orders", vec![int(1), int(1), Value::BigInt(3)])?;
            s.statement(|s| s.insert("users", vec![int(1), text("ram")]))?;
            Ok(2)
        })
        .unwrap();
    assert_eq!(inserted, 2);
    assert_eq!(db.metrics().pending(), 0);
    assert_eq!(s.scan("orders").unwrap().len(), 1);
}
