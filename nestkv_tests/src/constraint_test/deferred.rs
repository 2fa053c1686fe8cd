use super::*;

#[test]
fn test_initially_deferred_key_is_checked_at_commit() {
    let db = memory_db();
    parent_child(&db, |fk| fk.deferrable(true));
    let mut s = db.session();
    s.begin().unwrap();
    insert_child(&mut s, 1, int(5));
    insert_parents(&mut s, &[5]);
    s.commit().unwrap();
    assert_eq!(s.scan("child").unwrap(), vec![vec![int(1), int(5)]]);
}

#[test]
fn test_deferred_violation_fails_the_commit() {
    let db = memory_db();
    parent_child(&db, |fk| fk.deferrable(true));
    let mut s = db.session();
    s.begin().unwrap();
    insert_child(&mut s, 1, int(5));
    let err = s.commit().unwrap_err();
    assert!(matches!(err, Error::ForeignKeyReferencingViolation { .. }));
    assert!(!s.in_transaction());
    assert!(s.scan("child").unwrap().is_empty());
}

#[test]
fn test_immediate_key_fails_the_statement_and_poisons_the_transaction() {
    let db = memory_db();
    parent_child(&db, |fk| fk);
    let mut s = db.session();
    s.begin().unwrap();
    insert_parents(&mut s, &[1]);
    let err = s.insert("child", vec![int(1), int(5)]).unwrap_err();
    assert!(matches!(err, Error::ForeignKeyReferencingViolation { .. }));
    assert!(s.is_rollback_pending());
    assert!(matches!(s.commit().unwrap_err(), Error::TransactionAborted));
    assert!(s.scan("parent").unwrap().is_empty());
}

#[test]
fn test_set_constraints_defers_a_deferrable_key() {
    let db = memory_db();
    parent_child(&db, |fk| fk.deferrable(false));
    let mut s = db.session();
    s.begin().unwrap();
    s.set_deferred_foreign_key(Some("fk_child_parent"), true).unwrap();
    insert_child(&mut s, 1, int(9));
    insert_parents(&mut s, &[9]);
    s.commit().unwrap();
    assert_eq!(s.scan("child").unwrap().len(), 1);
}

#[test]
fn test_set_constraints_cannot_defer_a_non_deferrable_key() {
    let db = memory_db();
    parent_child(&db, |fk| fk);
    let mut s = db.session();
    s.begin().unwrap();
    s.set_deferred_foreign_key(None, true).unwrap();
    let err = s.insert("child", vec![int(1), int(9)]).unwrap_err();
    assert!(matches!(err, Error::ForeignKeyReferencingViolation { .. }));
    s.rollback().unwrap();
}

#[test]
fn test_set_constraints_immediate_overrides_initially_deferred() {
    let db = memory_db();
    parent_child(&db, |fk| fk.deferrable(true));
    let mut s = db.session();
    s.begin().unwrap();
    s.set_deferred_foreign_key(None, false).unwrap();
    let err = s.insert("child", vec![int(1), int(9)]).unwrap_err();
    assert!(matches!(err, Error::ForeignKeyReferencingViolation { .. }));
    s.rollback().unwrap();
}

#[test]
fn test_deferred_delete_of_referenced_parent_is_checked_at_commit() {
    let db = memory_db();
    parent_child(&db, |fk| fk.deferrable(true));
    let mut s = db.session();
    insert_parents(&mut s, &[1]);
    insert_child(&mut s, 10, int(1));

    s.begin().unwrap();
    assert!(s.delete_by_pk("parent", &[int(1)]).unwrap());
    assert!(s.delete_by_pk("child", &[int(10)]).unwrap());
    s.commit().unwrap();

    insert_parents(&mut s, &[2]);
    insert_child(&mut s, 20, int(2));
    s.begin().unwrap();
    assert!(s.delete_by_pk("parent", &[int(2)]).unwrap());
    let err = s.commit().unwrap_err();
    assert!(matches!(err, Error::ForeignKeyReferencedViolation { .. }));
    assert!(s.get_by_pk("parent", &[int(2)]).unwrap().is_some());
}

#[test]
fn test_force_immediate_resolves_even_deferred_checks_on_the_spot() {
    let db = memory_db();
    parent_child(&db, |fk| fk.deferrable(true));
    let mut s = db.session();
    s.begin().unwrap();
    s.set_force_immediate(true).unwrap();
    let err = s.insert("child", vec![int(1), int(9)]).unwrap_err();
    assert!(matches!(err, Error::ForeignKeyReferencingViolation { .. }));
    s.rollback().unwrap();
}

#[test]
fn test_run_commits_the_unit_of_work() {
    let db = memory_db();
    parent_child(&db, |fk| fk.deferrable(true));
    let mut s = db.session();
    let n = s
        .run(|s| {
            s.insert("child", vec![int(1), int(3)])?;
            s.insert("parent", vec![int(3), text("p3")])?;
            Ok(2)
        })
        .unwrap();
    assert_eq!(n, 2);
    assert!(!s.in_transaction());
    assert_eq!(s.scan("child").unwrap().len(), 1);
}

#[test]
fn test_run_does_not_retry_constraint_violations() {
    let db = memory_db();
    parent_child(&db, |fk| fk);
    let mut s = db.session();
    let mut attempts = 0;
    let err = s
        .run(|s| {
            attempts += 1;
            s.insert("child", vec![int(1), int(3)])
        })
        .unwrap_err();
    assert!(err.is_constraint_violation());
    assert_eq!(attempts, 1);
}
