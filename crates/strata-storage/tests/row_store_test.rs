//! Row store integration tests.
//!
//! Exercises the row store end to end through the public API:
//! - randomized append, rollback and read-back against a plain Vec model
//! - serialization into a second store
//! - block reuse across passes
//! - allocator limits shared between threads

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::sync::{Arc, Barrier};
use std::thread;

use strata_common::{ActionFlag, RowStoreConfig, StrataError, Value};
use strata_storage::{LimitedPageAllocator, PooledPageAllocator, Row, RowDesc, RowStore};

const SEED: u64 = 0x5eed_0001;
const COLUMNS: u64 = 5;

fn desc() -> Arc<RowDesc> {
    let columns: Vec<(u64, u64)> = (0..COLUMNS).map(|c| (11, c)).collect();
    Arc::new(RowDesc::from_columns(&columns).unwrap())
}

fn random_value(rng: &mut StdRng) -> Value {
    match rng.random_range(0..8) {
        0 => Value::Null,
        1 => Value::Bool(rng.random()),
        2 => Value::Int(rng.random()),
        3 => Value::Int(rng.random_range(-100..100)),
        4 => Value::Double(rng.random_range(-1.0e6..1.0e6)),
        5 => {
            let len = rng.random_range(0..100);
            let data: Vec<u8> = (0..len).map(|_| rng.random()).collect();
            Value::varchar(data)
        }
        6 => Value::DateTime(rng.random_range(0..i64::MAX)),
        _ => Value::Extend(match rng.random_range(0..5) {
            0 => ActionFlag::Valid,
            1 => ActionFlag::RowDoesNotExist,
            2 => ActionFlag::DeleteRow,
            3 => ActionFlag::NewAdd,
            _ => ActionFlag::Nop,
        }),
    }
}

fn random_row(rng: &mut StdRng, desc: &Arc<RowDesc>) -> Row {
    let cells = (0..desc.column_count()).map(|_| random_value(rng)).collect();
    Row::with_cells(Arc::clone(desc), cells).unwrap()
}

fn read_all<A: strata_storage::PageAllocator>(store: &mut RowStore<A>) -> Vec<Row> {
    store.reset_iterator();
    let mut out = Vec::new();
    let mut row = Row::new(desc());
    while store.get_next_row(&mut row).unwrap().is_some() {
        out.push(row.clone());
    }
    out
}

fn config(block_size: usize) -> RowStoreConfig {
    RowStoreConfig { block_size }
}

#[test]
fn test_randomized_append_and_rollback() {
    let mut rng = StdRng::seed_from_u64(SEED);
    let desc = desc();
    let mut store = RowStore::new(strata_storage::SystemPageAllocator, config(1024)).unwrap();
    let mut model: Vec<Row> = Vec::new();
    let mut can_rollback = false;

    for _ in 0..2_000 {
        if can_rollback && rng.random_bool(0.1) {
            store.rollback_last_row().unwrap();
            model.pop();
            can_rollback = false;
        } else {
            let row = random_row(&mut rng, &desc);
            let total = store.add_row_counted(&row).unwrap();
            assert_eq!(total, store.data_size());
            model.push(row);
            can_rollback = true;
        }
        assert_eq!(store.row_count(), model.len());
    }

    assert_eq!(read_all(&mut store), model);
    assert!(store.is_intact());
}

#[test]
fn test_randomized_serialize_roundtrip() {
    let mut rng = StdRng::seed_from_u64(SEED + 1);
    let desc = desc();
    let mut source = RowStore::new(strata_storage::SystemPageAllocator, config(2048)).unwrap();
    source.register_reserved_column(11, 2).unwrap();
    for _ in 0..500 {
        source.add_row(&random_row(&mut rng, &desc)).unwrap();
    }
    let expected = read_all(&mut source);

    let bytes = source.serialize().unwrap();
    assert_eq!(bytes.len(), source.serialized_size());

    let mut target = RowStore::new(strata_storage::SystemPageAllocator, config(2048)).unwrap();
    let mut pos = 0;
    target.deserialize(&bytes, &mut pos).unwrap();
    assert_eq!(pos, bytes.len());
    assert_eq!(target.row_count(), source.row_count());
    assert_eq!(target.data_size(), source.data_size());
    assert_eq!(read_all(&mut target), expected);

    // Reserved cells survive the trip byte for byte.
    source.reset_iterator();
    target.reset_iterator();
    for row in &expected {
        let a = source.next_stored_row().unwrap().unwrap().reserved_cell(0).unwrap();
        let b = target.next_stored_row().unwrap().unwrap().reserved_cell(0).unwrap();
        assert_eq!(a, b);
        assert_eq!(&a, row.get_cell(11, 2).unwrap());
    }
}

#[test]
fn test_deserialize_into_larger_blocks() {
    let mut rng = StdRng::seed_from_u64(SEED + 2);
    let desc = desc();
    let mut source = RowStore::new(strata_storage::SystemPageAllocator, config(1024)).unwrap();
    for _ in 0..100 {
        source.add_row(&random_row(&mut rng, &desc)).unwrap();
    }
    let bytes = source.serialize().unwrap();

    let mut target = RowStore::new(strata_storage::SystemPageAllocator, config(4096)).unwrap();
    let mut pos = 0;
    target.deserialize(&bytes, &mut pos).unwrap();
    assert_eq!(target.block_count(), source.block_count());
    assert_eq!(read_all(&mut target), read_all(&mut source));
}

#[test]
fn test_deserialize_into_smaller_blocks_rejected() {
    let mut rng = StdRng::seed_from_u64(SEED + 3);
    let desc = desc();
    let mut source = RowStore::new(strata_storage::SystemPageAllocator, config(4096)).unwrap();
    for _ in 0..100 {
        source.add_row(&random_row(&mut rng, &desc)).unwrap();
    }
    let bytes = source.serialize().unwrap();

    let mut target = RowStore::new(strata_storage::SystemPageAllocator, config(256)).unwrap();
    let mut pos = 0;
    assert!(matches!(
        target.deserialize(&bytes, &mut pos),
        Err(StrataError::CorruptData(_))
    ));
    assert_eq!(pos, 0);
}

#[test]
fn test_passes_reuse_blocks() {
    let mut rng = StdRng::seed_from_u64(SEED + 4);
    let desc = desc();
    let allocator = Arc::new(LimitedPageAllocator::new(1 << 20));
    let mut store = RowStore::new(Arc::clone(&allocator), config(1024)).unwrap();

    let mut peak = 0;
    for pass in 0..5 {
        let rows: Vec<Row> = (0..200).map(|_| random_row(&mut rng, &desc)).collect();
        for row in &rows {
            store.add_row(row).unwrap();
        }
        assert_eq!(read_all(&mut store), rows);

        peak = peak.max(store.block_count());
        assert_eq!(allocator.outstanding_pages(), store.block_count());
        if pass % 2 == 0 {
            store.reuse();
        } else {
            store.clear_rows();
        }
        assert_eq!(store.block_count(), peak);
    }

    store.clear();
    assert_eq!(allocator.outstanding_pages(), 0);
    assert_eq!(allocator.allocated_bytes(), 0);
}

#[test]
fn test_drop_returns_blocks() {
    let mut rng = StdRng::seed_from_u64(SEED + 5);
    let desc = desc();
    let allocator = Arc::new(LimitedPageAllocator::new(1 << 20));
    {
        let mut store = RowStore::new(Arc::clone(&allocator), config(1024)).unwrap();
        for _ in 0..100 {
            store.add_row(&random_row(&mut rng, &desc)).unwrap();
        }
        assert!(allocator.outstanding_pages() > 0);
    }
    assert_eq!(allocator.outstanding_pages(), 0);
}

#[test]
fn test_pooled_allocator_recycles_blocks() {
    let mut rng = StdRng::seed_from_u64(SEED + 6);
    let desc = desc();
    let pool = Arc::new(PooledPageAllocator::new(1024, 64));

    let mut first = RowStore::new(Arc::clone(&pool), config(1024)).unwrap();
    for _ in 0..100 {
        first.add_row(&random_row(&mut rng, &desc)).unwrap();
    }
    let blocks = first.block_count();
    first.clear();
    assert_eq!(pool.cached_pages(), blocks);

    // Recycled buffers still hold old bytes; a new store must not see them.
    let mut second = RowStore::new(Arc::clone(&pool), config(1024)).unwrap();
    let row = random_row(&mut rng, &desc);
    second.add_row(&row).unwrap();
    assert_eq!(pool.cached_pages(), blocks - 1);
    assert_eq!(read_all(&mut second), vec![row]);
    assert!(second.is_intact());
}

#[test]
fn test_memory_limit_shared_across_threads() {
    let allocator = Arc::new(LimitedPageAllocator::new(16 * 1024));
    let barrier = Arc::new(Barrier::new(4));
    let desc = desc();

    let handles: Vec<_> = (0..4)
        .map(|t| {
            let allocator = Arc::clone(&allocator);
            let desc = Arc::clone(&desc);
            let barrier = Arc::clone(&barrier);
            thread::spawn(move || {
                let mut rng = StdRng::seed_from_u64(SEED + 100 + t);
                let mut store = RowStore::new(allocator, config(1024)).unwrap();
                let mut model = Vec::new();
                loop {
                    let row = random_row(&mut rng, &desc);
                    match store.add_row(&row) {
                        Ok(_) => model.push(row),
                        Err(StrataError::OutOfMemory { requested }) => {
                            assert_eq!(requested, 1024);
                            break;
                        }
                        Err(err) => panic!("unexpected error: {}", err),
                    }
                }
                assert_eq!(read_all(&mut store), model);
                let blocks = store.block_count();
                // Hold every store until all threads have hit the limit.
                barrier.wait();
                blocks
            })
        })
        .collect();

    let blocks: usize = handles.into_iter().map(|h| h.join().unwrap()).sum();
    assert_eq!(blocks, 16);
    assert_eq!(allocator.outstanding_pages(), 0);
}

#[test]
fn test_config_from_json() {
    let config: RowStoreConfig = serde_json::from_str(r#"{ "block_size": 8192 }"#).unwrap();
    let store = RowStore::new(strata_storage::SystemPageAllocator, config).unwrap();
    assert_eq!(store.block_size(), 8192);
    assert_eq!(store.to_string(), "data_size=0 block_count=0");

    let bad: RowStoreConfig = serde_json::from_str(r#"{ "block_size": 8 }"#).unwrap();
    assert!(matches!(
        RowStore::new(strata_storage::SystemPageAllocator, bad),
        Err(StrataError::InvalidArgument(_))
    ));
}

#[test]
fn test_randomized_failed_adds_keep_committed_rows() {
    let mut rng = StdRng::seed_from_u64(SEED + 7);
    let desc = desc();
    let mut store = RowStore::new(strata_storage::SystemPageAllocator, config(1024)).unwrap();
    let mut model: Vec<Row> = Vec::new();

    for _ in 0..500 {
        if rng.random_bool(0.1) {
            let mut cells: Vec<Value> = (0..COLUMNS).map(|_| Value::Null).collect();
            cells[1] = Value::varchar(vec![b'x'; 2048]);
            let oversized = Row::with_cells(Arc::clone(&desc), cells).unwrap();
            assert!(matches!(
                store.add_row(&oversized),
                Err(StrataError::RowTooLarge { .. })
            ));
            // Undoing the failed add must not touch committed rows.
            if rng.random_bool(0.5) {
                store.rollback_last_row().unwrap();
            }
        } else {
            let row = random_row(&mut rng, &desc);
            store.add_row(&row).unwrap();
            model.push(row);
        }
        assert_eq!(store.row_count(), model.len());
    }

    assert_eq!(read_all(&mut store), model);
}
