use super::*;

const ALL: [CheckTime; 7] = [
    CheckTime::Immediate,
    CheckTime::Statement,
    CheckTime::StatementWithRangeCache,
    CheckTime::Delayed,
    CheckTime::DelayedWithRangeCache,
    CheckTime::DelayedAlwaysUntilCommit,
    CheckTime::DelayedWithRangeCacheAlwaysUntilCommit,
];

/// Runs a fixed script and reports which steps succeeded.
fn outcomes(check_time: CheckTime) -> Vec<bool> {
    let db = memory_db_with(check_time);
    assert_eq!(db.check_time(), check_time);
    parent_child(&db, |fk| fk);
    let mut s = db.session();
    let mut out = Vec::new();
    out.push(s.insert("parent", vec![int(1), text("p1")]).is_ok());
    out.push(s.insert("parent", vec![int(2), text("p2")]).is_ok());
    out.push(s.insert("parent", vec![int(1), text("dup")]).is_ok());
    out.push(s.insert("child", vec![int(10), int(1)]).is_ok());
    out.push(s.insert("child", vec![int(11), int(3)]).is_ok());
    out.push(s.insert("child", vec![int(12), Value::Null]).is_ok());
    out.push(s.delete_by_pk("parent", &[int(1)]).is_ok());
    out.push(s.delete_by_pk("parent", &[int(2)]).is_ok());
    out.push(
        s.statement(|s| {
            s.insert("child", vec![int(13), int(4)])?;
            s.insert("parent", vec![int(4), text("p4")])
        })
        .is_ok(),
    );
    out.push(s.truncate("parent").is_ok());
    out
}

#[test]
fn test_every_check_time_reaches_the_same_outcome() {
    let expected = vec![true, true, false, true, false, true, false, true, true, false];
    for check_time in ALL {
        assert_eq!(outcomes(check_time), expected, "check time {check_time:?}");
    }
}

#[test]
fn test_every_check_time_leaves_the_same_rows() {
    for check_time in ALL {
        let db = memory_db_with(check_time);
        parent_child(&db, |fk| fk.on_delete(ForeignKeyAction::Cascade));
        let mut s = db.session();
        insert_parents(&mut s, &[1, 2, 3]);
        for (id, pid) in [(10, 1), (11, 2), (12, 2), (13, 3)] {
            insert_child(&mut s, id, int(pid));
        }
        assert!(s.delete_by_pk("parent", &[int(2)]).unwrap());
        assert_eq!(
            sorted(s.scan("child").unwrap()),
            vec![vec![int(10), int(1)], vec![int(13), int(3)]],
            "check time {check_time:?}"
        );
        assert_eq!(db.metrics().pending(), 0, "check time {check_time:?}");
    }
}

#[test]
fn test_check_time_is_read_from_json_config() {
    let config = StoreConfig::from_json_str(r#"{"check_time": "delayed_with_range_cache"}"#).unwrap();
    let db = Database::open_memory(config).unwrap();
    assert_eq!(db.check_time(), CheckTime::DelayedWithRangeCache);
    assert_eq!(db.backend(), "memory");
    assert_eq!(memory_db().check_time(), CheckTime::Immediate);
}

#[test]
fn test_unknown_config_fields_are_rejected() {
    assert!(StoreConfig::from_json_str(r#"{"check_tme": "delayed"}"#).is_err());
    assert!(StoreConfig::from_json_str(r#"{"lock_timeout_ms": 0}"#).is_err());
}

#[test]
fn test_delayed_checks_do_not_accumulate_within_a_statement() {
    let db = memory_db_with(CheckTime::Delayed);
    parent_child(&db, |fk| fk);
    let metrics = db.metrics();
    let mut s = db.session();
    insert_parents(&mut s, &[1]);

    let mut peak = 0;
    s.statement(|s| {
        for id in 0..200 {
            s.insert("child", vec![int(id), int(1)])?;
            peak = peak.max(metrics.pending());
        }
        Ok(())
    })
    .unwrap();
    assert!(peak <= 1, "pending checks peaked at {peak}");
    assert_eq!(metrics.pending(), 0);
    assert_eq!(s.scan("child").unwrap().len(), 200);
}

#[test]
fn test_delayed_duplicate_is_raised_before_the_row_is_overwritten() {
    let db = memory_db_with(CheckTime::Delayed);
    parent_child(&db, |fk| fk);
    let mut s = db.session();
    s.begin().unwrap();
    insert_parents(&mut s, &[1]);
    let err = s.insert("parent", vec![int(1), text("again")]).unwrap_err();
    match err {
        Error::DuplicateKey { index, key } => {
            assert_eq!(index, "parent.PRIMARY");
            assert_eq!(key, "(1)");
        }
        other => panic!("unexpected error: {other}"),
    }
    assert!(s.is_rollback_pending());
    s.rollback().unwrap();
}
