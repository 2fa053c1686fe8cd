use super::*;

fn lazy_checkpoints() -> StoreConfig {
    StoreConfig {
        checkpoint_interval: 1000,
        ..StoreConfig::default()
    }
}

#[test]
fn test_wal_is_truncated_after_each_checkpointed_commit() {
    let path = temp_dir("wal_truncate");
    let db = Database::open_embedded(path.clone(), StoreConfig::default()).unwrap();
    users_and_orders(&db);
    db.session().insert("users", vec![int(1), text("ram")]).unwrap();
    let wal = std::fs::read_to_string(path.join("wal.log")).unwrap();
    assert_eq!(wal, "");
    let data = std::fs::read_to_string(path.join("data.kv")).unwrap();
    assert!(!data.is_empty());
}

#[test]
fn test_committed_rows_are_replayed_from_the_wal() {
    let path = temp_dir("wal_replay");
    {
        let db = Database::open_embedded(path.clone(), lazy_checkpoints()).unwrap();
        users_and_orders(&db);
        db.session().insert("users", vec![int(1), text("ram")]).unwrap();
        let wal = std::fs::read_to_string(path.join("wal.log")).unwrap();
        assert!(wal.starts_with("BEGIN "));
        assert!(wal.contains("\nCOMMIT "));
        assert_eq!(std::fs::read_to_string(path.join("data.kv")).unwrap(), "");
    }

    let db = Database::open_embedded(path.clone(), lazy_checkpoints()).unwrap();
    let mut s = db.session();
    assert_eq!(
        s.get_by_pk("users", &[int(1)]).unwrap(),
        Some(vec![int(1), text("ram")])
    );
    assert_eq!(std::fs::read_to_string(path.join("wal.log")).unwrap(), "");
}

#[test]
fn test_recovery_ignores_uncommitted_wal_transaction() {
    let path = temp_dir("wal_uncommitted_ignored");
    {
        let db = Database::open_embedded(path.clone(), lazy_checkpoints()).unwrap();
        users_and_orders(&db);
        db.session().insert("users", vec![int(1), text("ram")]).unwrap();
    }

    // Crash after the writes reached the log, before COMMIT did.
    let wal = std::fs::read_to_string(path.join("wal.log")).unwrap();
    let torn: String = wal
        .lines()
        .filter(|line| !line.starts_with("COMMIT"))
        .map(|line| format!("{line}\n"))
        .collect();
    std::fs::write(path.join("wal.log"), torn).unwrap();

    let db = Database::open_embedded(path.clone(), lazy_checkpoints()).unwrap();
    let mut s = db.session();
    assert!(s.get_by_pk("users", &[int(1)]).unwrap().is_none());
    assert!(s.scan("users").unwrap().is_empty());
}

#[test]
fn test_recovery_skips_malformed_records_and_keeps_the_rest() {
    let path = temp_dir("wal_malformed");
    {
        EmbeddedStore::open(path.clone(), &StoreConfig::default()).unwrap();
    }
    std::fs::write(
        path.join("wal.log"),
        format!(
            "BEGIN 7\nSET 7 {} {}\nnot a record\nCOMMIT 7\nBEGIN 8\nSET 8 {} zz\nCOMMIT 8\n",
            hex::encode(b"alpha"),
            hex::encode(b"1"),
            hex::encode(b"beta"),
        ),
    )
    .unwrap();

    let store = EmbeddedStore::open(path.clone(), &StoreConfig::default()).unwrap();
    let data = store.snapshot();
    assert_eq!(data.get(b"alpha".as_slice()), Some(&b"1".to_vec()));
    assert!(data.get(b"beta".as_slice()).is_none());
}

#[test]
fn test_rolled_back_transaction_never_reaches_disk() {
    let path = temp_dir("wal_rollback");
    {
        let db = Database::open_embedded(path.clone(), lazy_checkpoints()).unwrap();
        users_and_orders(&db);
        let mut s = db.session();
        s.begin().unwrap();
        s.insert("users", vec![int(1), text("ram")]).unwrap();
        s.rollback().unwrap();
        assert_eq!(std::fs::read_to_string(path.join("wal.log")).unwrap(), "");
    }
    let db = Database::open_embedded(path, StoreConfig::default()).unwrap();
    assert!(db.session().scan("users").unwrap().is_empty());
}

#[test]
fn test_explicit_checkpoint_folds_the_wal_into_the_data_file() {
    let path = temp_dir("wal_checkpoint");
    let store = EmbeddedStore::open(path.clone(), &lazy_checkpoints()).unwrap();
    let mut txn = store.begin_embedded();
    txn.set(b"k", b"v").unwrap();
    txn.commit().unwrap();
    assert!(!std::fs::read_to_string(path.join("wal.log")).unwrap().is_empty());
    store.checkpoint().unwrap();
    assert_eq!(std::fs::read_to_string(path.join("wal.log")).unwrap(), "");
    let data = std::fs::read_to_string(path.join("data.kv")).unwrap();
    assert_eq!(data, format!("{}\t{}\n", hex::encode(b"k"), hex::encode(b"v")));
}

#[test]
fn test_failed_checkpoint_does_not_fail_the_commit() {
    let path = temp_dir("wal_checkpoint_failure");
    let store = EmbeddedStore::open(path.clone(), &StoreConfig::default()).unwrap();

    // A directory in place of the data file makes the rename fail.
    std::fs::remove_file(path.join("data.kv")).unwrap();
    std::fs::create_dir(path.join("data.kv")).unwrap();
    std::fs::write(path.join("data.kv").join("blocker"), "").unwrap();

    let mut txn = store.begin_embedded();
    txn.set(b"a", b"1").unwrap();
    txn.commit().unwrap();
    assert_eq!(store.snapshot().get(b"a".as_slice()), Some(&b"1".to_vec()));
    let wal = std::fs::read_to_string(path.join("wal.log")).unwrap();
    assert!(wal.contains("\nCOMMIT "));

    std::fs::remove_dir_all(path.join("data.kv")).unwrap();
    let mut txn = store.begin_embedded();
    txn.set(b"b", b"2").unwrap();
    txn.commit().unwrap();
    assert_eq!(std::fs::read_to_string(path.join("wal.log")).unwrap(), "");
    drop(store);

    let reopened = EmbeddedStore::open(path, &StoreConfig::default()).unwrap();
    let data = reopened.snapshot();
    assert_eq!(data.get(b"a".as_slice()), Some(&b"1".to_vec()));
    assert_eq!(data.get(b"b".as_slice()), Some(&b"2".to_vec()));
}
