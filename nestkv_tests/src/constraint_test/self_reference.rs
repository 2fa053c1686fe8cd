use super::*;

fn employees(action: ForeignKeyAction) -> Database {
    let db = memory_db();
    db.update_catalog(|c| {
        c.create_table(
            "public",
            "employees",
            vec![
                Column::new("id", DataType::Int),
                Column::new("manager_id", DataType::Int),
            ],
            &["id"],
        )?;
        c.add_foreign_key(
            ForeignKeySpec::new("fk_manager", "employees", &["manager_id"], "employees", &["id"])
                .on_delete(action)
                .on_update(action),
        )
    })
    .unwrap();
    db
}

#[test]
fn test_row_may_reference_itself_on_insert() {
    let db = employees(ForeignKeyAction::Restrict);
    let mut s = db.session();
    s.insert("employees", vec![int(1), int(1)]).unwrap();
    assert_eq!(s.scan("employees").unwrap().len(), 1);
}

#[test]
fn test_self_referencing_row_can_be_deleted() {
    for action in [ForeignKeyAction::Restrict, ForeignKeyAction::NoAction] {
        let db = employees(action);
        let mut s = db.session();
        s.insert("employees", vec![int(1), int(1)]).unwrap();
        assert!(s.delete("employees", &vec![int(1), int(1)]).unwrap());
        assert!(s.scan("employees").unwrap().is_empty());
    }
}

#[test]
fn test_self_referencing_row_with_other_references_cannot_be_deleted() {
    let db = employees(ForeignKeyAction::NoAction);
    let mut s = db.session();
    s.insert("employees", vec![int(1), int(1)]).unwrap();
    s.insert("employees", vec![int(2), int(1)]).unwrap();
    let err = s.delete("employees", &vec![int(1), int(1)]).unwrap_err();
    assert!(matches!(
        err,
        Error::ForeignKeyReferencedViolation { ref constraint, .. } if constraint == "fk_manager"
    ));
    assert_eq!(s.scan("employees").unwrap().len(), 2);
}

#[test]
fn test_reference_to_another_row_is_checked() {
    let db = employees(ForeignKeyAction::Restrict);
    let mut s = db.session();
    let err = s.insert("employees", vec![int(2), int(1)]).unwrap_err();
    assert!(matches!(err, Error::ForeignKeyReferencingViolation { .. }));
}

#[test]
fn test_truncate_of_self_referencing_table_is_not_checked() {
    let db = employees(ForeignKeyAction::Restrict);
    let mut s = db.session();
    s.insert("employees", vec![int(1), int(1)]).unwrap();
    s.insert("employees", vec![int(2), int(1)]).unwrap();
    s.insert("employees", vec![int(3), int(2)]).unwrap();
    assert_eq!(s.truncate("employees").unwrap(), 3);
    assert!(s.scan("employees").unwrap().is_empty());
}

#[test]
fn test_cascade_delete_walks_the_chain() {
    let db = employees(ForeignKeyAction::Cascade);
    let mut s = db.session();
    s.insert("employees", vec![int(1), int(1)]).unwrap();
    s.insert("employees", vec![int(2), int(1)]).unwrap();
    s.insert("employees", vec![int(3), int(2)]).unwrap();
    s.insert("employees", vec![int(4), Value::Null]).unwrap();
    assert!(s.delete_by_pk("employees", &[int(1)]).unwrap());
    assert_eq!(s.scan("employees").unwrap(), vec![vec![int(4), Value::Null]]);
}
