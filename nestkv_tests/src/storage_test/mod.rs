use nestkv_core::config::StoreConfig;
use nestkv_core::schema::{Column, ForeignKeyAction, ForeignKeySpec};
use nestkv_core::store::{EmbeddedStore, KvStore, KvTransaction, MemoryStore};
use nestkv_core::types::datatype::DataType;
use nestkv_core::types::value::Value;
use nestkv_core::{Database, Error};
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};

fn temp_dir(prefix: &str) -> PathBuf {
    static COUNTER: AtomicUsize = AtomicUsize::new(0);
    let id = COUNTER.fetch_add(1, Ordering::SeqCst);
    let mut path = std::env::temp_dir();
    path.push(format!(
        "nestkv_storage_{}_{}_{}",
        prefix,
        std::process::id(),
        id
    ));
    let _ = std::fs::remove_dir_all(&path);
    path
}

fn int(n: i64) -> Value {
    Value::Int(n)
}

fn text(s: &str) -> Value {
    Value::Text(s.to_string())
}

fn users_and_orders(db: &Database) {
    db.update_catalog(|c| {
        c.create_table(
            "public",
            "users",
            vec![Column::new("id", DataType::Int), Column::new("name", DataType::Text)],
            &["id"],
        )?;
        c.create_child_table(
            "public",
            "orders",
            vec![
                Column::new("uid", DataType::Int),
                Column::new("oid", DataType::Int),
                Column::new("total", DataType::BigInt),
            ],
            &["uid", "oid"],
            "users",
            &["uid"],
        )?;
        c.add_foreign_key(
            ForeignKeySpec::new("fk_orders_users", "orders", &["uid"], "users", &["id"])
                .on_delete(ForeignKeyAction::Cascade),
        )
    })
    .unwrap();
}

mod undo;
mod wal_recovery;
mod grouping;
mod transactions;
