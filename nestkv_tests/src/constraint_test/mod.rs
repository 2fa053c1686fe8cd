use nestkv_core::checks::CheckTime;
use nestkv_core::config::StoreConfig;
use nestkv_core::schema::{Column, ForeignKeyAction, ForeignKeySpec};
use nestkv_core::types::datatype::DataType;
use nestkv_core::types::value::Value;
use nestkv_core::types::Row;
use nestkv_core::{Database, Error, Session};

fn memory_db() -> Database {
    Database::open_memory(StoreConfig::default()).unwrap()
}

fn memory_db_with(check_time: CheckTime) -> Database {
    Database::open_memory(StoreConfig::default().with_check_time(check_time)).unwrap()
}

fn int(n: i64) -> Value {
    Value::Int(n)
}

fn text(s: &str) -> Value {
    Value::Text(s.to_string())
}

/// `parent(id, name)` and `child(id, pid)` joined by `fk_child_parent`
/// on `child.pid -> parent.id`. `child.pid` defaults to 0.
fn parent_child(db: &Database, configure: impl FnOnce(ForeignKeySpec) -> ForeignKeySpec) {
    db.update_catalog(|c| {
        c.create_table(
            "public",
            "parent",
            vec![Column::new("id", DataType::Int), Column::new("name", DataType::Text)],
            &["id"],
        )?;
        c.create_table(
            "public",
            "child",
            vec![
                Column::new("id", DataType::Int),
                Column::new("pid", DataType::Int).with_default(Value::Int(0)),
            ],
            &["id"],
        )?;
        c.add_foreign_key(configure(ForeignKeySpec::new(
            "fk_child_parent",
            "child",
            &["pid"],
            "parent",
            &["id"],
        )))
    })
    .unwrap();
}

fn insert_parents(s: &mut Session, ids: &[i64]) {
    for id in ids {
        s.insert("parent", vec![int(*id), text(&format!("p{id}"))]).unwrap();
    }
}

fn insert_child(s: &mut Session, id: i64, pid: Value) {
    s.insert("child", vec![int(id), pid]).unwrap();
}

fn sorted(mut rows: Vec<Row>) -> Vec<Row> {
    rows.sort_by_key(|r| match r[0] {
        Value::Int(n) => n,
        _ => i64::MIN,
    });
    rows
}

mod referencing;
mod restrict;
mod self_reference;
mod deferred;
mod check_times;
