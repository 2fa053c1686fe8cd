use super::*;

fn seeded(action: ForeignKeyAction) -> Database {
    let db = memory_db();
    parent_child(&db, |fk| fk.on_delete(action).on_update(action));
    let mut s = db.session();
    insert_parents(&mut s, &[1, 2]);
    insert_child(&mut s, 10, int(1));
    db
}

#[test]
fn test_restrict_delete_of_referenced_parent_fails() {
    let db = seeded(ForeignKeyAction::Restrict);
    let mut s = db.session();
    let err = s.delete_by_pk("parent", &[int(1)]).unwrap_err();
    assert_eq!(
        err.to_string(),
        "cannot delete from parent because id = 1 is still referenced from child, violating foreign key constraint fk_child_parent"
    );
    assert!(s.get_by_pk("parent", &[int(1)]).unwrap().is_some());
}

#[test]
fn test_no_action_delete_of_referenced_parent_fails_at_statement_end() {
    let db = seeded(ForeignKeyAction::NoAction);
    let mut s = db.session();
    let err = s.delete_by_pk("parent", &[int(1)]).unwrap_err();
    assert!(matches!(
        err,
        Error::ForeignKeyReferencedViolation { ref operation, .. } if operation == "delete from"
    ));
    assert!(s.get_by_pk("parent", &[int(1)]).unwrap().is_some());
}

#[test]
fn test_unreferenced_parent_can_be_deleted() {
    for action in [ForeignKeyAction::Restrict, ForeignKeyAction::NoAction] {
        let db = seeded(action);
        let mut s = db.session();
        assert!(s.delete_by_pk("parent", &[int(2)]).unwrap());
        assert!(!s.delete_by_pk("parent", &[int(2)]).unwrap());
    }
}

#[test]
fn test_no_action_allows_removing_the_reference_later_in_the_statement() {
    let db = seeded(ForeignKeyAction::NoAction);
    let mut s = db.session();
    s.statement(|s| {
        s.delete_by_pk("parent", &[int(1)])?;
        s.delete_by_pk("child", &[int(10)])
    })
    .unwrap();
    assert!(s.get_by_pk("parent", &[int(1)]).unwrap().is_none());
    assert!(s.scan("child").unwrap().is_empty());
    assert!(db.metrics().rechecks() > 0);
}

#[test]
fn test_restrict_fails_before_the_reference_is_removed() {
    let db = seeded(ForeignKeyAction::Restrict);
    let mut s = db.session();
    let err = s
        .statement(|s| {
            s.delete_by_pk("parent", &[int(1)])?;
            s.delete_by_pk("child", &[int(10)])
        })
        .unwrap_err();
    assert!(matches!(err, Error::ForeignKeyReferencedViolation { .. }));
    assert_eq!(
        s.get_by_pk("parent", &[int(1)]).unwrap(),
        Some(vec![int(1), text("p1")])
    );
    assert_eq!(s.scan("child").unwrap().len(), 1);
}

#[test]
fn test_update_of_referenced_key_fails() {
    let db = seeded(ForeignKeyAction::Restrict);
    let mut s = db.session();
    let err = s
        .update("parent", &vec![int(1), text("p1")], vec![int(5), text("p1")])
        .unwrap_err();
    assert!(matches!(
        err,
        Error::ForeignKeyReferencedViolation { ref operation, ref key, .. }
            if operation == "update" && key == "id = 1"
    ));
}

#[test]
fn test_update_of_non_key_parent_column_is_allowed() {
    let db = seeded(ForeignKeyAction::Restrict);
    let mut s = db.session();
    s.update("parent", &vec![int(1), text("p1")], vec![int(1), text("renamed")])
        .unwrap();
    assert_eq!(
        s.get_by_pk("parent", &[int(1)]).unwrap(),
        Some(vec![int(1), text("renamed")])
    );
}

#[test]
fn test_truncate_of_referenced_parent_names_the_first_reference() {
    let db = seeded(ForeignKeyAction::NoAction);
    let mut s = db.session();
    let err = s.truncate("parent").unwrap_err();
    match err {
        Error::ForeignKeyReferencedViolation { operation, key, referencing_table, .. } => {
            assert_eq!(operation, "truncate");
            assert_eq!(key, "pid = 1");
            assert_eq!(referencing_table, "child");
        }
        other => panic!("unexpected error: {other}"),
    }
    assert_eq!(s.scan("parent").unwrap().len(), 2);
}

#[test]
fn test_truncate_succeeds_when_only_null_references_remain() {
    let db = seeded(ForeignKeyAction::Restrict);
    let mut s = db.session();
    s.update("child", &vec![int(10), int(1)], vec![int(10), Value::Null]).unwrap();
    assert_eq!(s.truncate("parent").unwrap(), 2);
    assert!(s.scan("parent").unwrap().is_empty());
    assert_eq!(s.scan("child").unwrap(), vec![vec![int(10), Value::Null]]);
}
