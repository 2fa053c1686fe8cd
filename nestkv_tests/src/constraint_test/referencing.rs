use super::*;

#[test]
fn test_insert_child_without_parent_fails() {
    let db = memory_db();
    parent_child(&db, |fk| fk);
    let mut s = db.session();
    let err = s.insert("child", vec![int(1), int(7)]).unwrap_err();
    assert!(matches!(err, Error::ForeignKeyReferencingViolation { .. }));
    assert_eq!(
        err.to_string(),
        "cannot insert into child because pid = 7 does not have a corresponding value in parent, violating foreign key constraint fk_child_parent"
    );
    assert!(s.scan("child").unwrap().is_empty());
}

#[test]
fn test_insert_child_with_parent_succeeds() {
    let db = memory_db();
    parent_child(&db, |fk| fk);
    let mut s = db.session();
    insert_parents(&mut s, &[7]);
    insert_child(&mut s, 1, int(7));
    assert_eq!(s.scan("child").unwrap(), vec![vec![int(1), int(7)]]);
}

#[test]
fn test_null_referencing_value_is_not_checked() {
    let db = memory_db();
    parent_child(&db, |fk| fk);
    let mut s = db.session();
    insert_child(&mut s, 1, Value::Null);
    assert_eq!(s.scan("child").unwrap().len(), 1);
}

#[test]
fn test_update_child_to_missing_parent_fails() {
    let db = memory_db();
    parent_child(&db, |fk| fk);
    let mut s = db.session();
    insert_parents(&mut s, &[1]);
    insert_child(&mut s, 1, int(1));
    let err = s
        .update("child", &vec![int(1), int(1)], vec![int(1), int(2)])
        .unwrap_err();
    match err {
        Error::ForeignKeyReferencingViolation { operation, key, .. } => {
            assert_eq!(operation, "update");
            assert_eq!(key, "pid = 2");
        }
        other => panic!("unexpected error: {other}"),
    }
    assert_eq!(s.get_by_pk("child", &[int(1)]).unwrap(), Some(vec![int(1), int(1)]));
}

#[test]
fn test_update_of_unrelated_child_column_skips_the_check() {
    let db = memory_db();
    db.update_catalog(|c| {
        c.create_table(
            "public",
            "parent",
            vec![Column::new("id", DataType::Int)],
            &["id"],
        )?;
        c.create_table(
            "public",
            "child",
            vec![
                Column::new("id", DataType::Int),
                Column::new("pid", DataType::Int),
                Column::new("note", DataType::Text),
            ],
            &["id"],
        )?;
        c.add_foreign_key(ForeignKeySpec::new("fk_note", "child", &["pid"], "parent", &["id"]))
    })
    .unwrap();
    let mut s = db.session();
    s.insert("parent", vec![int(1)]).unwrap();
    let old = vec![int(1), int(1), text("a")];
    s.insert("child", old.clone()).unwrap();
    let before = db.metrics().rechecks();
    s.update("child", &old, vec![int(1), int(1), text("b")]).unwrap();
    assert_eq!(db.metrics().rechecks(), before);
    assert_eq!(db.metrics().pending(), 0);
}

#[test]
fn test_statement_sees_parent_inserted_after_child() {
    let db = memory_db();
    parent_child(&db, |fk| fk);
    let mut s = db.session();
    s.statement(|s| {
        s.insert("child", vec![int(1), int(3)])?;
        s.insert("parent", vec![int(3), text("late")])
    })
    .unwrap();
    assert_eq!(s.scan("child").unwrap().len(), 1);
}
