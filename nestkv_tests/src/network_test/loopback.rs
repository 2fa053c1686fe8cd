use super::*;
use std::time::Duration;

fn db() -> Database {
    let db = loopback_db(Arc::new(KvNode::new()), StoreConfig::default());
    parent_child(&db, ForeignKeyAction::NoAction);
    db
}

#[test]
fn test_network_store_defaults_to_delayed_checks() {
    let db = db();
    assert_eq!(db.backend(), "network");
    assert_eq!(db.check_time(), CheckTime::Delayed);
}

#[test]
fn test_rows_round_trip_through_the_node() {
    let node = Arc::new(KvNode::new());
    let db = loopback_db(node.clone(), StoreConfig::default());
    parent_child(&db, ForeignKeyAction::NoAction);
    let mut s = db.session();
    s.insert("parent", vec![int(1), text("p1")]).unwrap();
    s.insert("child", vec![int(10), int(1)]).unwrap();
    assert_eq!(
        s.get_by_pk("parent", &[int(1)]).unwrap(),
        Some(vec![int(1), text("p1")])
    );
    assert!(node.read_version() >= 2);
    assert!(!node.snapshot().is_empty());
}

#[test]
fn test_missing_parent_fails_at_commit() {
    let db = db();
    let mut s = db.session();
    let err = s.insert("child", vec![int(10), int(1)]).unwrap_err();
    assert!(matches!(err, Error::ForeignKeyReferencingViolation { .. }));
    assert!(s.scan("child").unwrap().is_empty());
}

#[test]
fn test_parent_inserted_later_in_the_transaction_satisfies_the_check() {
    let db = db();
    let mut s = db.session();
    s.run(|s| {
        s.insert("child", vec![int(10), int(1)])?;
        s.insert("parent", vec![int(1), text("p1")])
    })
    .unwrap();
    assert_eq!(s.scan("child").unwrap().len(), 1);
}

#[test]
fn test_referenced_parent_cannot_be_deleted() {
    let db = db();
    let mut s = db.session();
    s.insert("parent", vec![int(1), text("p1")]).unwrap();
    s.insert("child", vec![int(10), int(1)]).unwrap();
    let err = s.delete_by_pk("parent", &[int(1)]).unwrap_err();
    assert!(matches!(err, Error::ForeignKeyReferencedViolation { .. }));
    assert!(s.get_by_pk("parent", &[int(1)]).unwrap().is_some());
}

#[test]
fn test_duplicate_key_is_reported() {
    let db = db();
    let mut s = db.session();
    s.insert("parent", vec![int(1), text("p1")]).unwrap();
    let err = s.insert("parent", vec![int(1), text("again")]).unwrap_err();
    assert!(matches!(err, Error::DuplicateKey { .. }));
    assert_eq!(
        s.get_by_pk("parent", &[int(1)]).unwrap(),
        Some(vec![int(1), text("p1")])
    );
}

#[test]
fn test_cascade_delete_runs_over_the_network() {
    let db = loopback_db(Arc::new(KvNode::new()), StoreConfig::default());
    parent_child(&db, ForeignKeyAction::Cascade);
    let mut s = db.session();
    s.insert("parent", vec![int(1), text("p1")]).unwrap();
    s.run(|s| {
        for id in 0..100 {
            s.insert("child", vec![int(id), int(1)])?;
        }
        Ok(())
    })
    .unwrap();
    assert!(s.delete_by_pk("parent", &[int(1)]).unwrap());
    assert!(s.scan("child").unwrap().is_empty());
}

#[test]
fn test_conflicting_writers_get_a_retryable_error() {
    let node = Arc::new(KvNode::new());
    let db = loopback_db(node, StoreConfig::default());
    parent_child(&db, ForeignKeyAction::NoAction);
    db.session().insert("parent", vec![int(1), text("p1")]).unwrap();

    let mut first = db.session();
    let mut second = db.session();
    first.begin().unwrap();
    second.begin().unwrap();
    let row = first.get_by_pk("parent", &[int(1)]).unwrap().unwrap();
    second.get_by_pk("parent", &[int(1)]).unwrap().unwrap();

    first.update("parent", &row, vec![int(1), text("first")]).unwrap();
    first.commit().unwrap();
    second.update("parent", &row, vec![int(1), text("second")]).unwrap();
    let err = second.commit().unwrap_err();
    assert!(matches!(err, Error::NotCommitted));
    assert!(err.is_retryable());
    assert_eq!(
        db.session().get_by_pk("parent", &[int(1)]).unwrap(),
        Some(vec![int(1), text("first")])
    );
}

#[test]
fn test_run_retries_after_a_conflict() {
    let node = Arc::new(KvNode::new());
    let db = loopback_db(node.clone(), StoreConfig::default());
    parent_child(&db, ForeignKeyAction::NoAction);
    db.session().insert("parent", vec![int(1), text("p0")]).unwrap();

    let interloper = db.clone();
    let mut attempts = 0;
    let mut s = db.session();
    s.run(|s| {
        attempts += 1;
        let row = s.get_by_pk("parent", &[int(1)])?.unwrap_or_default();
        if attempts == 1 {
            let mut other = interloper.session();
            other.update("parent", &row, vec![int(1), text("interloper")])?;
        }
        s.update("parent", &row, vec![int(1), text(&format!("attempt {attempts}"))])
    })
    .unwrap();
    assert_eq!(attempts, 2);
    assert_eq!(
        db.session().get_by_pk("parent", &[int(1)]).unwrap(),
        Some(vec![int(1), text("attempt 2")])
    );
}

#[test]
fn test_latency_from_config_slows_each_request() {
    let config = StoreConfig {
        network_latency_ms: 5,
        ..StoreConfig::default()
    };
    let db = loopback_db(Arc::new(KvNode::new()), config);
    parent_child(&db, ForeignKeyAction::NoAction);
    let started = std::time::Instant::now();
    db.session().insert("parent", vec![int(1), text("p1")]).unwrap();
    assert!(started.elapsed() >= Duration::from_millis(5));
}

#[test]
fn test_immediate_check_time_resolves_each_check_on_its_row() {
    let node = Arc::new(KvNode::new());
    let store = NetworkStore::with_own_runtime(Arc::new(LoopbackTransport::new(node))).unwrap();
    let config = StoreConfig::default().with_check_time(CheckTime::Immediate);
    let db = Database::open_network(store, config).unwrap();
    parent_child(&db, ForeignKeyAction::Restrict);
    let mut s = db.session();
    s.begin().unwrap();
    let err = s.insert("child", vec![int(1), int(1)]).unwrap_err();
    assert!(matches!(err, Error::ForeignKeyReferencingViolation { .. }));
    assert!(s.is_rollback_pending());
    s.rollback().unwrap();
}
