use super::*;
use nestkv_core::codec::{encode_values, group_prefix, row_key};
use std::sync::Arc;

fn grouped_memory() -> (Database, MemoryStore) {
    let store = MemoryStore::new(&StoreConfig::default());
    let db = Database::with_store(Arc::new(store.clone()), StoreConfig::default()).unwrap();
    (db, store)
}

fn hkey(values: &[Value]) -> Vec<u8> {
    encode_values(values.iter()).unwrap()
}

/// Row keys of the group rooted at `root`, in key order.
fn group_keys(store: &MemoryStore, root: u32) -> Vec<Vec<u8>> {
    let prefix = group_prefix(root);
    store
        .snapshot()
        .into_keys()
        .filter(|k| k.starts_with(&prefix))
        .collect()
}

#[test]
fn test_child_rows_are_stored_under_their_parent() {
    let (db, store) = grouped_memory();
    users_and_orders(&db);
    let mut s = db.session();
    s.insert("users", vec![int(2), text("sita")]).unwrap();
    s.insert("users", vec![int(1), text("ram")]).unwrap();
    s.insert("orders", vec![int(1), int(5), Value::BigInt(10)]).unwrap();

    let root = db.catalog().table_by_name("users").unwrap().root;
    let user1 = hkey(&[int(1), int(1)]);
    let mut order = user1.clone();
    order.extend(hkey(&[int(2), int(1), int(5)]));
    let user2 = hkey(&[int(1), int(2)]);
    assert_eq!(
        group_keys(&store, root),
        vec![row_key(root, &user1), row_key(root, &order), row_key(root, &user2)]
    );
}

#[test]
fn test_orphan_lands_where_its_parent_will_be() {
    let (db, store) = grouped_memory();
    users_and_orders(&db);
    db.update_catalog(|c| c.drop_foreign_key("fk_orders_users")).unwrap();
    let mut s = db.session();
    s.insert("orders", vec![int(3), int(1), Value::BigInt(7)]).unwrap();
    s.insert("users", vec![int(3), text("hari")]).unwrap();

    let root = db.catalog().table_by_name("users").unwrap().root;
    let keys = group_keys(&store, root);
    assert_eq!(keys.len(), 2);
    assert_eq!(keys[0], row_key(root, &hkey(&[int(1), int(3)])));
    assert!(keys[1].starts_with(&keys[0]));
}

#[test]
fn test_moving_a_child_to_another_parent_moves_its_row() {
    let (db, store) = grouped_memory();
    users_and_orders(&db);
    let mut s = db.session();
    s.insert("users", vec![int(1), text("ram")]).unwrap();
    s.insert("users", vec![int(2), text("sita")]).unwrap();
    let old = vec![int(1), int(5), Value::BigInt(10)];
    s.insert("orders", old.clone()).unwrap();
    s.update("orders", &old, vec![int(2), int(5), Value::BigInt(10)]).unwrap();

    let root = db.catalog().table_by_name("users").unwrap().root;
    let mut moved = hkey(&[int(1), int(2)]);
    moved.extend(hkey(&[int(2), int(2), int(5)]));
    assert!(group_keys(&store, root).contains(&row_key(root, &moved)));
    assert_eq!(
        s.lookup("orders", "PRIMARY", &[int(2)]).unwrap(),
        vec![vec![int(2), int(5), Value::BigInt(10)]]
    );
    assert!(s.lookup("orders", "PRIMARY", &[int(1)]).unwrap().is_empty());
}

#[test]
fn test_truncating_a_parent_leaves_child_rows() {
    let (db, _store) = grouped_memory();
    users_and_orders(&db);
    db.update_catalog(|c| c.drop_foreign_key("fk_orders_users")).unwrap();
    let mut s = db.session();
    s.insert("users", vec![int(1), text("ram")]).unwrap();
    s.insert("orders", vec![int(1), int(5), Value::BigInt(10)]).unwrap();
    assert_eq!(s.truncate("users").unwrap(), 1);
    assert!(s.scan("users").unwrap().is_empty());
    assert_eq!(s.scan("orders").unwrap().len(), 1);
}

#[test]
fn test_range_and_point_lookups_agree() {
    let (db, _store) = grouped_memory();
    users_and_orders(&db);
    db.update_catalog(|c| c.add_index("users", "users_name", &["name"], false))
        .unwrap();
    let mut s = db.session();
    for (id, name) in [(1, "ram"), (2, "sita"), (3, "ram")] {
        s.insert("users", vec![int(id), text(name)]).unwrap();
    }
    assert_eq!(
        s.lookup("users", "PRIMARY", &[int(2)]).unwrap(),
        s.get_by_pk("users", &[int(2)]).unwrap().into_iter().collect::<Vec<_>>()
    );
    let rams = s.lookup("users", "users_name", &[text("ram")]).unwrap();
    assert_eq!(rams, vec![vec![int(1), text("ram")], vec![int(3), text("ram")]]);
    assert!(s.lookup("users", "users_name", &[text("nobody")]).unwrap().is_empty());
}
