use super::*;
use proptest::prelude::*;
use std::collections::BTreeMap;

#[derive(Debug, Clone)]
enum Op {
    Set(u8, u8),
    Clear(u8),
    ClearRange(u8, u8),
}

fn arb_op() -> impl Strategy<Value = Op> {
    prop_oneof![
        3 => (0u8..16, any::<u8>()).prop_map(|(k, v)| Op::Set(k, v)),
        1 => (0u8..16).prop_map(Op::Clear),
        1 => (0u8..16, 0u8..16).prop_map(|(a, b)| Op::ClearRange(a.min(b), a.max(b))),
    ]
}

fn apply(txn: &mut dyn KvTransaction, op: &Op) {
    match op {
        Op::Set(k, v) => txn.set(&[*k], &[*v]).unwrap(),
        Op::Clear(k) => txn.clear(&[*k]).unwrap(),
        Op::ClearRange(a, b) => txn.clear_range(&[*a], &[*b]).unwrap(),
    }
}

fn apply_model(model: &mut BTreeMap<Vec<u8>, Vec<u8>>, op: &Op) {
    match op {
        Op::Set(k, v) => {
            model.insert(vec![*k], vec![*v]);
        }
        Op::Clear(k) => {
            model.remove(&vec![*k]);
        }
        Op::ClearRange(a, b) => {
            let (begin, end) = (vec![*a], vec![*b]);
            model.retain(|k, _| *k < begin || *k >= end);
        }
    }
}

fn seed(store: &dyn KvStore, pairs: &[(u8, u8)]) -> BTreeMap<Vec<u8>, Vec<u8>> {
    let mut txn = store.begin().unwrap();
    let mut model = BTreeMap::new();
    for (k, v) in pairs {
        txn.set(&[*k], &[*v]).unwrap();
        model.insert(vec![*k], vec![*v]);
    }
    txn.commit().unwrap();
    model
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    /// Rolling back restores the shared map byte for byte.
    #[test]
    fn test_memory_rollback_restores_prior_contents(
        initial in prop::collection::vec((0u8..16, any::<u8>()), 0..12),
        ops in prop::collection::vec(arb_op(), 0..24),
    ) {
        let store = MemoryStore::new(&StoreConfig::default());
        let before = seed(&store, &initial);
        prop_assert_eq!(store.snapshot(), before.clone());

        let mut txn = store.begin_memory();
        for op in &ops {
            apply(&mut txn, op);
        }
        txn.rollback().unwrap();
        prop_assert_eq!(store.snapshot(), before);
    }

    /// Committed effects match applying the same writes to a plain map.
    #[test]
    fn test_memory_commit_matches_model(
        initial in prop::collection::vec((0u8..16, any::<u8>()), 0..12),
        ops in prop::collection::vec(arb_op(), 0..24),
    ) {
        let store = MemoryStore::new(&StoreConfig::default());
        let mut model = seed(&store, &initial);
        let mut txn = store.begin_memory();
        for op in &ops {
            apply(&mut txn, op);
            apply_model(&mut model, op);
        }
        txn.commit().unwrap();
        prop_assert_eq!(store.snapshot(), model);
    }
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(16))]

    /// The embedded overlay reads its own writes and commits what the model
    /// predicts; a rollback leaves the committed data alone.
    #[test]
    fn test_embedded_matches_model(
        initial in prop::collection::vec((0u8..16, any::<u8>()), 0..8),
        ops in prop::collection::vec(arb_op(), 0..16),
    ) {
        let path = temp_dir("prop_embedded");
        let store = EmbeddedStore::open(path.clone(), &StoreConfig::default()).unwrap();
        let before = seed(&store, &initial);

        let mut model = before.clone();
        let mut txn = store.begin_embedded();
        for op in &ops {
            apply(&mut txn, op);
            apply_model(&mut model, op);
        }
        let seen: BTreeMap<Vec<u8>, Vec<u8>> =
            txn.get_range(&[0], &[255], None).unwrap().into_iter().collect();
        prop_assert_eq!(&seen, &model);
        txn.rollback().unwrap();
        prop_assert_eq!(store.snapshot(), before);

        let mut txn = store.begin_embedded();
        for op in &ops {
            apply(&mut txn, op);
        }
        txn.commit().unwrap();
        prop_assert_eq!(store.snapshot(), model.clone());

        drop(txn);
        drop(store);
        let reopened = EmbeddedStore::open(path.clone(), &StoreConfig::default()).unwrap();
        prop_assert_eq!(reopened.snapshot(), model);
        let _ = std::fs::remove_dir_all(&path);
    }
}

#[test]
fn test_rolled_back_writes_release_their_locks() {
    let store = MemoryStore::new(&StoreConfig::default().with_lock_timeout_ms(50));
    let mut first = store.begin_memory();
    first.set(b"k", b"1").unwrap();
    first.rollback().unwrap();

    let mut second = store.begin_memory();
    second.set(b"k", b"2").unwrap();
    second.commit().unwrap();
    assert_eq!(store.snapshot().get(b"k".as_slice()), Some(&b"2".to_vec()));
}

#[test]
fn test_dropped_transaction_is_rolled_back() {
    let store = MemoryStore::new(&StoreConfig::default());
    {
        let mut txn = store.begin_memory();
        txn.set(b"k", b"1").unwrap();
        assert_eq!(txn.undo_len(), 1);
    }
    assert!(store.is_empty());
}

#[test]
fn test_write_behind_a_held_lock_times_out() {
    let store = MemoryStore::new(&StoreConfig::default().with_lock_timeout_ms(30));
    let mut first = store.begin_memory();
    first.set(b"k", b"1").unwrap();
    let mut second = store.begin_memory();
    let err = second.set(b"k", b"2").unwrap_err();
    assert!(matches!(err, Error::LockTimeout { backend: "memory", .. }));
    assert!(second.is_rollback_pending());
    first.commit().unwrap();
}
